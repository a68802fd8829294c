//! External collaborators the course stages call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

use super::model::{CourseCompletion, Difficulty, Flashcard, GenerationSummary, ModuleAssessment, Quiz, VideoHit};
use crate::errors::PortError;

/// LLM structured generation.
#[async_trait]
pub trait ContentGenerator: Send + Sync + Debug {
    /// Generates an object conforming to `schema`.
    async fn generate(&self, prompt: &str, schema: &serde_json::Value) -> Result<serde_json::Value, PortError>;
}

/// Video search.
#[async_trait]
pub trait VideoSearch: Send + Sync + Debug {
    /// Returns the best match for `query`, if any.
    async fn search(&self, query: &str) -> Result<Option<VideoHit>, PortError>;
}

/// A course row to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCourse {
    /// The generation request it belongs to.
    pub request_id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Difficulty.
    pub difficulty: Difficulty,
    /// Estimated duration.
    pub estimated_duration: Option<String>,
    /// Prerequisites.
    pub prerequisites: Vec<String>,
    /// Objectives.
    pub learning_objectives: Vec<String>,
}

/// A module row to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewModule {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Position.
    pub order_index: u32,
    /// Estimated duration.
    pub estimated_duration: Option<String>,
    /// Objectives.
    pub learning_objectives: Vec<String>,
}

/// A lesson row to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLesson {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Position.
    pub order_index: u32,
    /// Estimated duration.
    pub estimated_duration: Option<String>,
    /// Key topics.
    pub key_topics: Vec<String>,
}

/// A lesson content item to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContentItem {
    /// `lesson`, `video` or `example`.
    pub content_type: String,
    /// Title.
    pub title: String,
    /// Position within the lesson.
    pub order_index: u32,
    /// Type-specific body.
    pub body: serde_json::Value,
}

/// Flags set on a lesson once its content exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonFlags {
    /// A quiz was saved.
    pub has_quiz: bool,
    /// Examples were saved.
    pub has_examples: bool,
}

/// The cards written for one lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonFlashcards {
    /// Lesson id.
    pub lesson_id: String,
    /// Non-blank cards in order.
    pub cards: Vec<Flashcard>,
}

/// Course persistence.
#[async_trait]
pub trait CourseRepository: Send + Sync + Debug {
    /// Creates a course in `generating` status and returns its id.
    async fn create_course(&self, course: NewCourse) -> Result<String, PortError>;

    /// Creates a module and returns its id.
    async fn create_module(&self, course_id: &str, module: NewModule) -> Result<String, PortError>;

    /// Creates a lesson and returns its id.
    async fn create_lesson(&self, module_id: &str, lesson: NewLesson) -> Result<String, PortError>;

    /// Creates a lesson content item and returns its id.
    async fn create_content_item(&self, lesson_id: &str, item: NewContentItem) -> Result<String, PortError>;

    /// Stores the article body of a content item and returns its id.
    async fn create_article(&self, content_item_id: &str, body: &str) -> Result<String, PortError>;

    /// Stores a lesson quiz and returns its id.
    async fn save_quiz(&self, lesson_id: &str, quiz: &Quiz) -> Result<String, PortError>;

    /// Marks a lesson as generated.
    async fn mark_lesson_generated(&self, lesson_id: &str, flags: LessonFlags) -> Result<(), PortError>;

    /// Stores a module assessment and returns its id.
    async fn save_module_assessment(&self, module_id: &str, assessment: &ModuleAssessment) -> Result<String, PortError>;

    /// Number of flashcards already stored for the course.
    async fn flashcard_count(&self, course_id: &str) -> Result<usize, PortError>;

    /// Stores every lesson's cards in one write and returns how many were stored.
    async fn save_flashcards(&self, course_id: &str, batch: &[LessonFlashcards]) -> Result<usize, PortError>;

    /// Sets the final course status and stores the generation summary.
    async fn finalize_course(
        &self,
        course_id: &str,
        status: CourseCompletion,
        summary: &GenerationSummary,
    ) -> Result<(), PortError>;
}
