//! Course generation request, settings and generated content contracts.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why the learner wants the course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningGoal {
    /// Career change or advancement.
    Career,
    /// A specific skill.
    Skill,
    /// Personal interest.
    Hobby,
    /// Exam preparation.
    Certification,
    /// Running a business.
    Business,
    /// Teaching others.
    Teaching,
}

impl fmt::Display for LearningGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Career => "career",
            Self::Skill => "skill",
            Self::Hobby => "hobby",
            Self::Certification => "certification",
            Self::Business => "business",
            Self::Teaching => "teaching",
        };
        f.write_str(label)
    }
}

/// Target course length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourseDuration {
    /// One week.
    #[serde(rename = "1-week")]
    OneWeek,
    /// One month.
    #[serde(rename = "1-month")]
    OneMonth,
    /// Three months.
    #[serde(rename = "3-months")]
    ThreeMonths,
    /// Six months.
    #[serde(rename = "6-months")]
    SixMonths,
}

impl fmt::Display for CourseDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::OneWeek => "1 week",
            Self::OneMonth => "1 month",
            Self::ThreeMonths => "3 months",
            Self::SixMonths => "6 months",
        };
        f.write_str(label)
    }
}

/// Difficulty and learner level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// No prior knowledge.
    Beginner,
    /// Some experience.
    Intermediate,
    /// Experienced.
    Advanced,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beginner => write!(f, "beginner"),
            Self::Intermediate => write!(f, "intermediate"),
            Self::Advanced => write!(f, "advanced"),
        }
    }
}

/// Content formats the learner prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    /// Video lessons.
    Video,
    /// Audio.
    Audio,
    /// Reading.
    Text,
    /// Interactive exercises.
    Interactive,
    /// Hands-on practice.
    Practical,
    /// Diagrams and visuals.
    Visual,
    /// Slides.
    Presentation,
    /// Quizzes.
    Quiz,
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
            Self::Interactive => "interactive",
            Self::Practical => "practical",
            Self::Visual => "visual",
            Self::Presentation => "presentation",
            Self::Quiz => "quiz",
        };
        f.write_str(label)
    }
}

/// Requested course shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructurePreferences {
    /// Number of modules, 1 to 20.
    pub modules: u32,
    /// Lessons per module, 1 to 10.
    pub lessons_per_module: u32,
    /// Generate module assessments.
    pub assessments: bool,
    /// Include project ideas.
    pub projects: bool,
}

/// Tone of generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    /// Formal.
    #[default]
    Professional,
    /// Conversational.
    Friendly,
    /// Upbeat.
    Energetic,
}

/// How interactive the lessons should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interactivity {
    /// Many exercises.
    High,
    /// Some exercises.
    #[default]
    Medium,
    /// Mostly reading.
    Low,
}

/// Generation style preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiPreferences {
    /// Tone.
    pub tone: Tone,
    /// Interactivity.
    pub interactivity: Interactivity,
    /// What kind of examples to include.
    pub examples: String,
    /// Pacing description.
    pub pacing: String,
}

impl Default for AiPreferences {
    fn default() -> Self {
        Self {
            tone: Tone::Professional,
            interactivity: Interactivity::Medium,
            examples: "practical examples with real-world applications".to_string(),
            pacing: "moderate pace with clear explanations".to_string(),
        }
    }
}

/// Broad subject area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningArea {
    /// Technology.
    Technology,
    /// Business.
    Business,
    /// Science.
    Science,
    /// Arts.
    Arts,
    /// Languages.
    Languages,
    /// Health.
    Health,
    /// Education.
    Education,
    /// Anything else.
    Others,
}

impl fmt::Display for LearningArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Technology => "technology",
            Self::Business => "business",
            Self::Science => "science",
            Self::Arts => "arts",
            Self::Languages => "languages",
            Self::Health => "health",
            Self::Education => "education",
            Self::Others => "others",
        };
        f.write_str(label)
    }
}

/// Preferred learning style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningStyle {
    /// Visual.
    Visual,
    /// Auditory.
    Auditory,
    /// Hands-on.
    Kinesthetic,
    /// Reading and writing.
    Reading,
}

/// What the platform knows about the learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileContext {
    /// Subject area.
    pub learning_area: LearningArea,
    /// Learning style.
    pub learning_style: LearningStyle,
    /// Current level.
    pub current_level: Difficulty,
}

/// The course form as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseGenerationInput {
    /// Course title.
    pub title: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Learning goals.
    #[serde(default)]
    pub goals: Vec<LearningGoal>,
    /// Target duration.
    pub duration: CourseDuration,
    /// Difficulty.
    pub difficulty: Difficulty,
    /// Preferred formats.
    #[serde(default)]
    pub format: Vec<ContentFormat>,
    /// Requested shape.
    pub structure: StructurePreferences,
    /// Style preferences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_preferences: Option<AiPreferences>,
    /// Learner profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_profile_context: Option<UserProfileContext>,
}

/// Emitted when a user submits a course generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequested {
    /// The request entity.
    pub request_id: Uuid,
    /// The requesting user.
    pub user_id: String,
    /// The submitted form.
    pub input: CourseGenerationInput,
}

/// Output of `validate_request`: the input with every default applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseSettings {
    /// The requesting user.
    pub user_id: String,
    /// Course title.
    pub title: String,
    /// Description.
    pub description: Option<String>,
    /// Learning goals, never empty.
    pub goals: Vec<LearningGoal>,
    /// Target duration.
    pub duration: CourseDuration,
    /// Difficulty.
    pub difficulty: Difficulty,
    /// Preferred formats.
    pub format: Vec<ContentFormat>,
    /// Requested shape.
    pub structure: StructurePreferences,
    /// Style preferences.
    pub ai_preferences: AiPreferences,
    /// Learner profile.
    pub user_profile_context: UserProfileContext,
}

impl CourseSettings {
    /// Returns true if lessons should get a video attached.
    #[must_use]
    pub fn wants_video(&self) -> bool {
        self.format.contains(&ContentFormat::Video)
    }
}

/// A lesson as proposed by the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedLesson {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Position within the module.
    pub order_index: u32,
    /// Estimated duration.
    #[serde(default)]
    pub estimated_duration: Option<String>,
    /// Key topics.
    #[serde(default)]
    pub key_topics: Vec<String>,
}

/// A module as proposed by the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedModule {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Position within the course.
    pub order_index: u32,
    /// Estimated duration.
    #[serde(default)]
    pub estimated_duration: Option<String>,
    /// Objectives.
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    /// Lessons.
    pub lessons: Vec<ProposedLesson>,
}

/// The course outline the generator must return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedStructure {
    /// Course title.
    pub title: String,
    /// Course description.
    pub description: String,
    /// Estimated total duration.
    #[serde(default)]
    pub estimated_total_duration: Option<String>,
    /// Prerequisites.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// Objectives.
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    /// Modules.
    pub modules: Vec<ProposedModule>,
}

/// A persisted lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonOutline {
    /// Repository id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Position within the module.
    pub order_index: u32,
    /// Key topics.
    pub key_topics: Vec<String>,
}

/// A persisted module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOutline {
    /// Repository id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Position within the course.
    pub order_index: u32,
    /// Lessons in order.
    pub lessons: Vec<LessonOutline>,
}

/// Output of `build_structure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseOutline {
    /// Repository id of the course.
    pub course_id: String,
    /// Course title.
    pub title: String,
    /// Modules in order.
    pub modules: Vec<ModuleOutline>,
}

impl CourseOutline {
    /// Total number of lessons.
    #[must_use]
    pub fn lesson_count(&self) -> usize {
        self.modules.iter().map(|m| m.lessons.len()).sum()
    }

    /// Finds a lesson by repository id.
    #[must_use]
    pub fn lesson(&self, lesson_id: &str) -> Option<&LessonOutline> {
        self.modules
            .iter()
            .flat_map(|m| m.lessons.iter())
            .find(|l| l.id == lesson_id)
    }

    /// Finds a module and its zero-based position by repository id.
    #[must_use]
    pub fn module(&self, module_id: &str) -> Option<(usize, &ModuleOutline)> {
        self.modules.iter().enumerate().find(|(_, m)| m.id == module_id)
    }
}

/// The fan-out seed of one lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonUnit {
    /// Course id.
    pub course_id: String,
    /// Module id.
    pub module_id: String,
    /// Module title.
    pub module_title: String,
    /// Zero-based module position.
    pub module_index: usize,
    /// The lesson.
    pub lesson: LessonOutline,
    /// Zero-based lesson position within the module.
    pub lesson_index: usize,
}

impl LessonUnit {
    /// Stable fan-out key.
    #[must_use]
    pub fn key(&self) -> String {
        format!("module-{}/lesson-{}", self.module_index + 1, self.lesson_index + 1)
    }
}

/// Quiz question kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    /// One of several options.
    MultipleChoice,
    /// True or false.
    TrueFalse,
    /// Free text.
    ShortAnswer,
}

/// A lesson quiz question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    /// Prompt.
    pub question: String,
    /// Kind.
    pub question_type: QuestionType,
    /// Options, for multiple choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// Expected answer.
    pub correct_answer: String,
}

/// A lesson quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    /// Title.
    pub title: String,
    /// Questions in order.
    pub questions: Vec<QuizQuestion>,
}

/// Kinds of lesson example.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExampleType {
    /// Worked practice.
    Practical,
    /// Conceptual.
    Theoretical,
    /// Taken from the real world.
    RealWorld,
}

/// A lesson example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonExample {
    /// Title.
    pub title: String,
    /// Body.
    pub content: String,
    /// Kind.
    #[serde(rename = "type")]
    pub example_type: ExampleType,
}

/// Lesson content the generator must return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonContent {
    /// Short summary.
    pub summary: String,
    /// Full article body.
    pub content: String,
    /// Key topics.
    #[serde(default)]
    pub key_topics: Vec<String>,
    /// Objectives.
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    /// Quiz.
    pub quiz: Quiz,
    /// Examples.
    #[serde(default)]
    pub examples: Vec<LessonExample>,
}

/// Output of `generate_content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    /// Lesson content item id.
    pub content_item_id: String,
    /// Article id.
    pub article_id: String,
    /// The generated content.
    pub content: LessonContent,
}

/// A video found for a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoHit {
    /// Video title.
    pub title: String,
    /// Watch URL.
    pub url: String,
    /// Duration label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Thumbnail URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// Output of `attach_video`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoAttachment {
    /// Whether a video was attached.
    pub attached: bool,
    /// Video content item id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_item_id: Option<String>,
    /// Why nothing was attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Output of `save_quiz`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedQuiz {
    /// Quiz id.
    pub quiz_id: String,
    /// Number of questions saved.
    pub question_count: usize,
}

/// Output of `save_examples`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedExamples {
    /// Example content item ids in order.
    pub content_item_ids: Vec<String>,
}

/// Output of `mark_generated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSummary {
    /// Lesson id.
    pub lesson_id: String,
    /// Fan-out key.
    pub unit_key: String,
    /// A quiz was saved.
    pub has_quiz: bool,
    /// At least one example was saved.
    pub has_examples: bool,
    /// A video was attached.
    pub video_attached: bool,
}

/// Output of `generate_lessons`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonBatchReport {
    /// Lessons planned for generation.
    pub planned: usize,
    /// Summaries of generated lessons.
    pub generated: Vec<LessonSummary>,
    /// Keys of failed lessons.
    pub failed: Vec<String>,
    /// Modules left for later generation.
    pub pending_modules: Vec<String>,
}

/// A study card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    /// Prompt side.
    pub front: String,
    /// Answer side.
    pub back: String,
}

impl Flashcard {
    /// Returns true if either side is empty.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.front.trim().is_empty() || self.back.trim().is_empty()
    }
}

/// Flashcards the generator must return for one lesson.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFlashcards {
    /// Cards in order.
    #[serde(default)]
    pub flashcards: Vec<Flashcard>,
}

/// Output of `generate_flashcards`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashcardsSummary {
    /// Cards stored.
    pub total: usize,
    /// Lessons that got at least one card.
    pub lessons_with_flashcards: usize,
    /// Lessons left without cards.
    pub failed_lessons: Vec<String>,
}

/// Emitted when a learner asks for more lessons of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoreLessonsRequested {
    /// The finished course generation run that built the outline.
    pub generation_run_id: Uuid,
    /// The module to continue.
    pub module_id: String,
    /// Zero-based position of the first lesson to write.
    #[serde(default)]
    pub start_from_index: usize,
    /// Lessons to write.
    #[serde(default = "default_more_lessons")]
    pub count: usize,
}

const fn default_more_lessons() -> usize {
    2
}

/// Output of `report_expansion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionReport {
    /// The continued module.
    pub module_id: String,
    /// Lessons written by this run.
    pub generated: Vec<LessonSummary>,
    /// Keys of lessons that failed.
    pub failed: Vec<String>,
    /// Where the next request should start.
    pub next_start_index: usize,
    /// Whether lessons remain after this slice.
    pub has_more_lessons: bool,
}

/// Assessment question kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentQuestionType {
    /// One of several options.
    MultipleChoice,
    /// True or false.
    TrueFalse,
    /// Short free text.
    ShortAnswer,
    /// Long free text.
    Essay,
}

/// A module quiz question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentQuestion {
    /// Kind.
    #[serde(rename = "type")]
    pub question_type: AssessmentQuestionType,
    /// Prompt.
    pub question: String,
    /// Options, for multiple choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// Expected answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<String>,
    /// Why the answer is right.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Model answer for free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_answer: Option<String>,
    /// Points awarded.
    #[serde(default = "default_points")]
    pub points: u32,
}

const fn default_points() -> u32 {
    5
}

/// A module-level quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleQuiz {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Questions.
    pub questions: Vec<AssessmentQuestion>,
}

/// A hands-on exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticalExercise {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Steps.
    pub instructions: String,
    /// What success looks like.
    pub expected_outcome: String,
}

/// A project suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIdea {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Requirements.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Difficulty.
    pub difficulty: Difficulty,
}

/// Assessments the generator must return for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAssessment {
    /// Module quiz.
    pub module_quiz: ModuleQuiz,
    /// Exercises.
    #[serde(default)]
    pub practical_exercises: Vec<PracticalExercise>,
    /// Project ideas.
    #[serde(default)]
    pub project_ideas: Vec<ProjectIdea>,
}

/// Output of `generate_assessments`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentsSummary {
    /// Assessment ids, one per assessed module.
    pub assessment_ids: Vec<String>,
}

/// Final status of a generated course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseCompletion {
    /// Every planned lesson was generated.
    Completed,
    /// Some lessons failed.
    CompletedWithErrors,
}

impl fmt::Display for CourseCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::CompletedWithErrors => write!(f, "completed_with_errors"),
        }
    }
}

/// Output of `finalize_course`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSummary {
    /// Course id.
    pub course_id: String,
    /// Final status.
    pub status: CourseCompletion,
    /// Lessons in the outline.
    pub total_lessons: usize,
    /// Lessons with generated content.
    pub successful_content: usize,
    /// Lessons with a video.
    pub videos_attached: usize,
    /// Lessons with a quiz.
    pub quizzes_generated: usize,
    /// Lessons with examples.
    pub examples_generated: usize,
    /// Flashcards stored.
    pub flashcards_generated: usize,
    /// Failed lessons.
    pub total_failed: usize,
    /// Share of outline lessons generated, in percent.
    pub completion_percentage: u8,
    /// Modules left for later generation.
    pub pending_modules: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_input_decodes_form_shape() {
        let input: CourseGenerationInput = serde_json::from_value(json!({
            "title": "Rust for Pythonistas",
            "goals": ["skill", "career"],
            "duration": "1-month",
            "difficulty": "intermediate",
            "format": ["text", "video"],
            "structure": {"modules": 2, "lessonsPerModule": 3, "assessments": true, "projects": false},
            "userProfileContext": {
                "learningArea": "technology",
                "learningStyle": "reading",
                "currentLevel": "beginner",
                "multipleIntelligences": [],
                "timeAvailable": "5h/week",
                "preferredSchedule": "evenings"
            }
        }))
        .unwrap();

        assert_eq!(input.duration, CourseDuration::OneMonth);
        assert_eq!(input.structure.lessons_per_module, 3);
        assert!(input.ai_preferences.is_none());
        assert_eq!(input.format, vec![ContentFormat::Text, ContentFormat::Video]);
    }

    #[test]
    fn test_ai_preference_defaults() {
        let prefs = AiPreferences::default();
        assert_eq!(prefs.tone, Tone::Professional);
        assert_eq!(prefs.interactivity, Interactivity::Medium);
        assert_eq!(prefs.examples, "practical examples with real-world applications");
    }

    #[test]
    fn test_assessment_points_default() {
        let question: AssessmentQuestion =
            serde_json::from_value(json!({"type": "essay", "question": "Why borrow?"})).unwrap();
        assert_eq!(question.points, 5);
    }

    #[test]
    fn test_more_lessons_count_defaults_to_two() {
        let event: MoreLessonsRequested = serde_json::from_value(json!({
            "generationRunId": Uuid::nil(),
            "moduleId": "module-2",
        }))
        .unwrap();
        assert_eq!(event.start_from_index, 0);
        assert_eq!(event.count, 2);
    }

    #[test]
    fn test_blank_flashcard_sides() {
        let card = |front: &str, back: &str| Flashcard {
            front: front.into(),
            back: back.into(),
        };
        assert!(card(" ", "answer").is_blank());
        assert!(card("question", "").is_blank());
        assert!(!card("question", "answer").is_blank());
    }

    #[test]
    fn test_lesson_unit_key() {
        let unit = LessonUnit {
            course_id: "c".into(),
            module_id: "m".into(),
            module_title: "Basics".into(),
            module_index: 0,
            lesson: LessonOutline {
                id: "l".into(),
                title: "Intro".into(),
                description: String::new(),
                order_index: 1,
                key_topics: vec![],
            },
            lesson_index: 1,
        };
        assert_eq!(unit.key(), "module-1/lesson-2");
    }
}
