//! Course generation.
//!
//! A course request is validated, an outline is generated and persisted,
//! every lesson is written by a sub-run of the lesson pipeline, flashcards
//! are written for the generated lessons, module assessments are added when
//! requested, and the course is finalized with a generation summary.
//!
//! A finished course can later be continued one module slice at a time by
//! the lesson expansion pipeline.

mod expansion;
mod lessons;
mod model;
mod pipeline;
mod ports;
mod prompts;
mod stages;


pub use expansion::{
    expansion_slice_len, lesson_expansion_pipeline, ReportExpansion, LESSON_EXPANSION_PIPELINE_ID,
};
pub use lessons::{
    lesson_pipeline, AttachVideo, GenerateContent, LessonPlan, MarkGenerated, SaveExamples, SaveQuiz,
    LESSON_PIPELINE_ID,
};
pub use model::{
    AiPreferences, AssessmentQuestion, AssessmentQuestionType, AssessmentsSummary, ContentFormat, CourseCompletion,
    CourseDuration, CourseGenerationInput, CourseOutline, CourseSettings, Difficulty, ExampleType, ExpansionReport,
    Flashcard, FlashcardsSummary, GeneratedContent, GeneratedFlashcards, GenerationRequested, GenerationSummary,
    Interactivity, LearningArea, LearningGoal, LearningStyle, LessonBatchReport, LessonContent, LessonExample,
    LessonOutline, LessonSummary, LessonUnit, ModuleAssessment, ModuleOutline, ModuleQuiz,
    MoreLessonsRequested, PracticalExercise, ProjectIdea, ProposedLesson, ProposedModule, ProposedStructure,
    QuestionType, Quiz, QuizQuestion, SavedExamples, SavedQuiz, StructurePreferences, Tone, UserProfileContext,
    VideoAttachment, VideoHit,
};
pub use pipeline::{course_pipeline, lesson_weight, CoursePorts, COURSE_PIPELINE_ID};
pub use ports::{
    ContentGenerator, CourseRepository, LessonFlags, LessonFlashcards, NewContentItem, NewCourse, NewLesson, NewModule, VideoSearch,
};
pub use prompts::{
    assessment_prompt, assessment_schema, flashcard_prompt, flashcard_schema, lesson_prompt, lesson_schema,
    structure_prompt, structure_schema, video_query, ASSESSMENT_SCHEMA, FLASHCARD_SCHEMA, LESSON_SCHEMA,
    STRUCTURE_SCHEMA,
};
pub use stages::{
    course_settings, summarize, BuildStructure, FinalizeCourse, GenerateAssessments, GenerateFlashcards,
    ValidateRequest, MAX_LESSONS_PER_MODULE, MAX_MODULES,
};

/// Context keys of the course and lesson pipelines.
pub mod keys {
    /// Trigger: the [`GenerationRequested`](super::GenerationRequested) event.
    pub const REQUEST: &str = "request";
    /// Output of `validate_request`.
    pub const SETTINGS: &str = "settings";
    /// Output of `build_structure`.
    pub const STRUCTURE: &str = "structure";
    /// Output of `generate_lessons`.
    pub const LESSONS: &str = "lessons";
    /// Output of `generate_flashcards`.
    pub const FLASHCARDS: &str = "flashcards";
    /// Output of `generate_assessments`.
    pub const ASSESSMENTS: &str = "assessments";
    /// Output of `finalize_course`.
    pub const COURSE: &str = "course";

    /// Expansion trigger: the [`MoreLessonsRequested`](super::MoreLessonsRequested) event.
    pub const EXPANSION: &str = "expansion";
    /// Output of `report_expansion`.
    pub const EXPANSION_REPORT: &str = "expansion_report";

    /// Lesson trigger: the [`LessonUnit`](super::LessonUnit).
    pub const LESSON: &str = "lesson";
    /// Output of `generate_content`.
    pub const CONTENT: &str = "content";
    /// Output of `attach_video`.
    pub const VIDEO: &str = "video";
    /// Output of `save_quiz`.
    pub const QUIZ: &str = "quiz";
    /// Output of `save_examples`.
    pub const EXAMPLES: &str = "examples";
    /// Output of `mark_generated`.
    pub const GENERATED: &str = "generated";
}
