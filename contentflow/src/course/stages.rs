//! Course-level stage bodies.

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use std::sync::Arc;
use tracing::{info, warn};

use super::keys;
use super::model::{
    AssessmentsSummary, CourseCompletion, CourseGenerationInput, CourseOutline, CourseSettings, Flashcard,
    FlashcardsSummary, GeneratedFlashcards, GenerationRequested, GenerationSummary, LessonBatchReport, LessonOutline,
    ModuleAssessment, ModuleOutline, ProposedStructure,
};
use super::ports::{ContentGenerator, CourseRepository, LessonFlashcards, NewCourse, NewLesson, NewModule};
use super::prompts;
use crate::context::StageInputs;
use crate::errors::{ContentflowError, PortError, StageError};
use crate::stages::TypedStage;

/// Most modules a request may ask for.
pub const MAX_MODULES: u32 = 20;
/// Most lessons per module a request may ask for.
pub const MAX_LESSONS_PER_MODULE: u32 = 10;

/// Validates a course form and applies defaults.
///
/// # Errors
///
/// Returns `ContentflowError::InvalidTrigger` naming the first problem.
pub fn course_settings(user_id: &str, input: &CourseGenerationInput) -> Result<CourseSettings, ContentflowError> {
    let invalid = |msg: &str| Err(ContentflowError::InvalidTrigger(format!("Course request rejected: {msg}")));

    if input.title.trim().is_empty() {
        return invalid("title is required");
    }
    if input.goals.is_empty() {
        return invalid("at least one learning goal is required");
    }
    if !(1..=MAX_MODULES).contains(&input.structure.modules) {
        return invalid("structure.modules must be between 1 and 20");
    }
    if !(1..=MAX_LESSONS_PER_MODULE).contains(&input.structure.lessons_per_module) {
        return invalid("structure.lessonsPerModule must be between 1 and 10");
    }
    let Some(profile) = input.user_profile_context.clone() else {
        return invalid("user profile context is required");
    };

    Ok(CourseSettings {
        user_id: user_id.to_string(),
        title: input.title.trim().to_string(),
        description: input.description.clone(),
        goals: input.goals.clone(),
        duration: input.duration,
        difficulty: input.difficulty,
        format: input.format.clone(),
        structure: input.structure,
        ai_preferences: input.ai_preferences.clone().unwrap_or_default(),
        user_profile_context: profile,
    })
}

/// Validates the request into [`CourseSettings`].
#[derive(Debug, Default)]
pub struct ValidateRequest;

#[async_trait]
impl TypedStage for ValidateRequest {
    type Output = CourseSettings;

    async fn run(&self, inputs: &StageInputs) -> Result<CourseSettings, StageError> {
        let request: GenerationRequested = inputs.require(keys::REQUEST)?;
        let settings =
            course_settings(&request.user_id, &request.input).map_err(|e| StageError::fatal(e.to_string()))?;
        info!(request_id = %request.request_id, title = %settings.title, "Course request validated");
        Ok(settings)
    }
}

/// Generates the outline and persists the course, its modules and lessons.
#[derive(Debug)]
pub struct BuildStructure {
    generator: Arc<dyn ContentGenerator>,
    repository: Arc<dyn CourseRepository>,
}

impl BuildStructure {
    /// Creates a new structure stage.
    pub fn new(generator: Arc<dyn ContentGenerator>, repository: Arc<dyn CourseRepository>) -> Self {
        Self { generator, repository }
    }
}

#[async_trait]
impl TypedStage for BuildStructure {
    type Output = CourseOutline;

    async fn run(&self, inputs: &StageInputs) -> Result<CourseOutline, StageError> {
        let request: GenerationRequested = inputs.require(keys::REQUEST)?;
        let settings: CourseSettings = inputs.require(keys::SETTINGS)?;

        let raw = self
            .generator
            .generate(&prompts::structure_prompt(&settings), &prompts::structure_schema())
            .await?;
        let mut proposed: ProposedStructure = serde_json::from_value(raw)
            .map_err(|e| StageError::fatal(format!("generated course structure does not match schema: {e}")))?;
        if proposed.modules.is_empty() {
            return Err(StageError::fatal("generated course structure has no modules"));
        }
        proposed.modules.sort_by_key(|m| m.order_index);

        let course_id = self
            .repository
            .create_course(NewCourse {
                request_id: request.request_id,
                user_id: settings.user_id.clone(),
                title: proposed.title.clone(),
                description: proposed.description.clone(),
                difficulty: settings.difficulty,
                estimated_duration: proposed.estimated_total_duration.clone(),
                prerequisites: proposed.prerequisites.clone(),
                learning_objectives: proposed.learning_objectives.clone(),
            })
            .await?;

        let mut modules = Vec::with_capacity(proposed.modules.len());
        for mut module in proposed.modules {
            module.lessons.sort_by_key(|l| l.order_index);
            let module_id = self
                .repository
                .create_module(
                    &course_id,
                    NewModule {
                        title: module.title.clone(),
                        description: module.description.clone(),
                        order_index: module.order_index,
                        estimated_duration: module.estimated_duration.clone(),
                        learning_objectives: module.learning_objectives.clone(),
                    },
                )
                .await?;

            let mut lessons = Vec::with_capacity(module.lessons.len());
            for lesson in module.lessons {
                let lesson_id = self
                    .repository
                    .create_lesson(
                        &module_id,
                        NewLesson {
                            title: lesson.title.clone(),
                            description: lesson.description.clone(),
                            order_index: lesson.order_index,
                            estimated_duration: lesson.estimated_duration.clone(),
                            key_topics: lesson.key_topics.clone(),
                        },
                    )
                    .await?;
                lessons.push(LessonOutline {
                    id: lesson_id,
                    title: lesson.title,
                    description: lesson.description,
                    order_index: lesson.order_index,
                    key_topics: lesson.key_topics,
                });
            }

            modules.push(ModuleOutline {
                id: module_id,
                title: module.title,
                description: module.description,
                order_index: module.order_index,
                lessons,
            });
        }

        let outline = CourseOutline {
            course_id,
            title: proposed.title,
            modules,
        };
        info!(
            course_id = %outline.course_id,
            modules = outline.modules.len(),
            lessons = outline.lesson_count(),
            "Course structure created"
        );
        Ok(outline)
    }
}

/// Writes flashcards for every generated lesson.
///
/// Cards are stored in a single write after every lesson has been answered,
/// so a retried attempt starts from an empty course. A lesson whose cards are
/// all blank, unreadable or rejected is reported instead of failing the stage.
#[derive(Debug)]
pub struct GenerateFlashcards {
    generator: Arc<dyn ContentGenerator>,
    repository: Arc<dyn CourseRepository>,
}

impl GenerateFlashcards {
    /// Creates a new flashcard stage.
    pub fn new(generator: Arc<dyn ContentGenerator>, repository: Arc<dyn CourseRepository>) -> Self {
        Self { generator, repository }
    }

    fn cards(lesson: &LessonOutline, raw: serde_json::Value) -> Vec<Flashcard> {
        match serde_json::from_value::<GeneratedFlashcards>(raw) {
            Ok(generated) => generated.flashcards.into_iter().filter(|c| !c.is_blank()).collect(),
            Err(err) => {
                warn!(lesson_id = %lesson.id, error = %err, "Generated flashcards do not match schema");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl TypedStage for GenerateFlashcards {
    type Output = FlashcardsSummary;

    async fn run(&self, inputs: &StageInputs) -> Result<FlashcardsSummary, StageError> {
        let settings: CourseSettings = inputs.require(keys::SETTINGS)?;
        let outline: CourseOutline = inputs.require(keys::STRUCTURE)?;
        let lessons: LessonBatchReport = inputs.require(keys::LESSONS)?;

        if self.repository.flashcard_count(&outline.course_id).await? > 0 {
            return Err(StageError::fatal(format!(
                "flashcards already exist for course {}",
                outline.course_id
            )));
        }

        let targets: Vec<&LessonOutline> = lessons
            .generated
            .iter()
            .filter_map(|summary| outline.lesson(&summary.lesson_id))
            .collect();
        let schema = prompts::flashcard_schema();
        let responses = join_all(targets.iter().map(|lesson| {
            let prompt = prompts::flashcard_prompt(&settings, lesson);
            let schema = &schema;
            async move { self.generator.generate(&prompt, schema).await }
        }))
        .await;

        let mut summary = FlashcardsSummary::default();
        let mut batch = Vec::new();
        for (lesson, response) in targets.into_iter().zip(responses) {
            let cards = match response {
                Ok(raw) => Self::cards(lesson, raw),
                Err(err @ PortError::Unavailable { .. }) => return Err(err.into()),
                Err(err) => {
                    warn!(lesson_id = %lesson.id, error = %err, "Flashcard generation rejected");
                    Vec::new()
                }
            };
            if cards.is_empty() {
                summary.failed_lessons.push(lesson.id.clone());
                continue;
            }
            summary.lessons_with_flashcards += 1;
            batch.push(LessonFlashcards {
                lesson_id: lesson.id.clone(),
                cards,
            });
        }
        if !batch.is_empty() {
            summary.total = self.repository.save_flashcards(&outline.course_id, &batch).await?;
        }

        info!(
            course_id = %outline.course_id,
            flashcards = summary.total,
            failed_lessons = summary.failed_lessons.len(),
            "Flashcards generated"
        );
        Ok(summary)
    }
}

/// Generates and stores one assessment per module.
#[derive(Debug)]
pub struct GenerateAssessments {
    generator: Arc<dyn ContentGenerator>,
    repository: Arc<dyn CourseRepository>,
}

impl GenerateAssessments {
    /// Creates a new assessment stage.
    pub fn new(generator: Arc<dyn ContentGenerator>, repository: Arc<dyn CourseRepository>) -> Self {
        Self { generator, repository }
    }
}

#[async_trait]
impl TypedStage for GenerateAssessments {
    type Output = AssessmentsSummary;

    async fn run(&self, inputs: &StageInputs) -> Result<AssessmentsSummary, StageError> {
        let settings: CourseSettings = inputs.require(keys::SETTINGS)?;
        let outline: CourseOutline = inputs.require(keys::STRUCTURE)?;

        let schema = prompts::assessment_schema();
        let generated = try_join_all(outline.modules.iter().map(|module| {
            let prompt = prompts::assessment_prompt(&settings, module);
            let schema = &schema;
            async move { self.generator.generate(&prompt, schema).await }
        }))
        .await?;

        let mut summary = AssessmentsSummary::default();
        for (module, raw) in outline.modules.iter().zip(generated) {
            let mut assessment: ModuleAssessment = serde_json::from_value(raw)
                .map_err(|e| StageError::fatal(format!("generated assessment does not match schema: {e}")))?;
            if !settings.structure.projects {
                assessment.project_ideas.clear();
            }
            let id = self.repository.save_module_assessment(&module.id, &assessment).await?;
            summary.assessment_ids.push(id);
        }

        info!(course_id = %outline.course_id, assessed = summary.assessment_ids.len(), "Assessments generated");
        Ok(summary)
    }
}

/// Computes the generation summary and closes the course.
#[derive(Debug)]
pub struct FinalizeCourse {
    repository: Arc<dyn CourseRepository>,
}

impl FinalizeCourse {
    /// Creates a new finalize stage.
    pub fn new(repository: Arc<dyn CourseRepository>) -> Self {
        Self { repository }
    }
}

/// Folds the lesson report and flashcard count into the course summary.
#[must_use]
pub fn summarize(
    outline: &CourseOutline,
    lessons: &LessonBatchReport,
    flashcards: Option<&FlashcardsSummary>,
) -> GenerationSummary {
    let total_lessons = outline.lesson_count();
    let successful_content = lessons.generated.len();
    let total_failed = lessons.failed.len();
    let completion_percentage = if total_lessons == 0 {
        100
    } else {
        u8::try_from(successful_content * 100 / total_lessons).unwrap_or(100)
    };

    GenerationSummary {
        course_id: outline.course_id.clone(),
        status: if total_failed > 0 {
            CourseCompletion::CompletedWithErrors
        } else {
            CourseCompletion::Completed
        },
        total_lessons,
        successful_content,
        videos_attached: lessons.generated.iter().filter(|l| l.video_attached).count(),
        quizzes_generated: lessons.generated.iter().filter(|l| l.has_quiz).count(),
        examples_generated: lessons.generated.iter().filter(|l| l.has_examples).count(),
        flashcards_generated: flashcards.map_or(0, |f| f.total),
        total_failed,
        completion_percentage,
        pending_modules: lessons.pending_modules.clone(),
    }
}

#[async_trait]
impl TypedStage for FinalizeCourse {
    type Output = GenerationSummary;

    async fn run(&self, inputs: &StageInputs) -> Result<GenerationSummary, StageError> {
        let outline: CourseOutline = inputs.require(keys::STRUCTURE)?;
        let lessons: LessonBatchReport = inputs.require(keys::LESSONS)?;
        let flashcards: Option<FlashcardsSummary> = inputs.optional(keys::FLASHCARDS)?;

        let summary = summarize(&outline, &lessons, flashcards.as_ref());
        self.repository
            .finalize_course(&outline.course_id, summary.status, &summary)
            .await?;

        if summary.status == CourseCompletion::CompletedWithErrors {
            warn!(course_id = %summary.course_id, failed = summary.total_failed, "Course finalized with errors");
        } else {
            info!(course_id = %summary.course_id, lessons = summary.successful_content, "Course finalized");
        }
        Ok(summary)
    }
}
