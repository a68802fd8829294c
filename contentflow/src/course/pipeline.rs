//! The course generation definition.

use std::sync::Arc;

use super::keys;
use super::lessons::{lesson_pipeline, LessonPlan};
use super::model::{CourseSettings, StructurePreferences};
use super::ports::{ContentGenerator, CourseRepository, VideoSearch};
use super::stages::{BuildStructure, FinalizeCourse, GenerateAssessments, GenerateFlashcards, ValidateRequest};
use crate::config::CourseConfig;
use crate::context::RunContext;
use crate::errors::PipelineValidationError;
use crate::events::EventSink;
use crate::pipeline::{FanOutDriver, FanOutStage, PipelineDefinition, RetryPolicy, StageSpec};
use crate::run::RunStore;
use crate::stages::typed;

/// Pipeline id of course generation runs.
pub const COURSE_PIPELINE_ID: &str = "course_generation";

/// Collaborators the course stages call.
#[derive(Debug, Clone)]
pub struct CoursePorts {
    /// Structured content generation.
    pub generator: Arc<dyn ContentGenerator>,
    /// Lesson video search.
    pub videos: Arc<dyn VideoSearch>,
    /// Course persistence.
    pub repository: Arc<dyn CourseRepository>,
}

fn wants_assessments(context: &RunContext) -> bool {
    matches!(
        context.get_typed::<CourseSettings>(keys::SETTINGS),
        Ok(Some(settings)) if settings.structure.assessments
    )
}

/// Weight of the lesson fan-out: one unit per lesson that will be generated.
#[must_use]
pub fn lesson_weight(structure: &StructurePreferences, max_modules: Option<usize>) -> u32 {
    let modules = max_modules.map_or(structure.modules, |cap| {
        structure.modules.min(u32::try_from(cap).unwrap_or(u32::MAX))
    });
    modules.saturating_mul(structure.lessons_per_module).max(1)
}

/// Builds the course definition for one request.
///
/// The lesson fan-out is weighted by the requested structure, so progress
/// advances in proportion to the lessons still to write.
///
/// # Errors
///
/// Returns a validation error if either definition is malformed.
pub fn course_pipeline(
    ports: &CoursePorts,
    config: &CourseConfig,
    retry: &RetryPolicy,
    structure: &StructurePreferences,
    store: Arc<dyn RunStore>,
    sink: Arc<dyn EventSink>,
) -> Result<PipelineDefinition, PipelineValidationError> {
    let lessons = Arc::new(lesson_pipeline(
        ports.generator.clone(),
        ports.videos.clone(),
        ports.repository.clone(),
        retry,
    )?);
    let driver = FanOutDriver::new(lessons, store, sink).with_policy(config.fanout_policy);
    let plan = LessonPlan::new().with_max_modules(config.max_generated_modules);

    PipelineDefinition::builder(COURSE_PIPELINE_ID)
        .trigger_key(keys::REQUEST)
        .stage(
            StageSpec::new("validate_request", typed(ValidateRequest))
                .with_inputs([keys::REQUEST])
                .with_output_key(keys::SETTINGS)
                .with_retry_policy(RetryPolicy::no_retry()),
        )
        .stage(
            StageSpec::new(
                "build_structure",
                typed(BuildStructure::new(ports.generator.clone(), ports.repository.clone())),
            )
            .with_inputs([keys::REQUEST, keys::SETTINGS])
            .with_output_key(keys::STRUCTURE)
            .with_retry_policy(retry.clone())
            .with_weight(2),
        )
        .stage(
            StageSpec::new("generate_lessons", Arc::new(FanOutStage::new(plan, driver)))
                .with_inputs([keys::SETTINGS, keys::STRUCTURE])
                .with_output_key(keys::LESSONS)
                .with_retry_policy(RetryPolicy::no_retry())
                .with_weight(lesson_weight(structure, config.max_generated_modules)),
        )
        .stage(
            StageSpec::new(
                "generate_flashcards",
                typed(GenerateFlashcards::new(ports.generator.clone(), ports.repository.clone())),
            )
            .with_inputs([keys::SETTINGS, keys::STRUCTURE, keys::LESSONS])
            .with_output_key(keys::FLASHCARDS)
            .with_retry_policy(retry.clone()),
        )
        .stage(
            StageSpec::new(
                "generate_assessments",
                typed(GenerateAssessments::new(ports.generator.clone(), ports.repository.clone())),
            )
            .with_inputs([keys::SETTINGS, keys::STRUCTURE])
            .with_output_key(keys::ASSESSMENTS)
            .with_retry_policy(retry.clone())
            .when(wants_assessments),
        )
        .stage(
            StageSpec::new("finalize_course", typed(FinalizeCourse::new(ports.repository.clone())))
                .with_inputs([keys::STRUCTURE, keys::LESSONS])
                .with_optional_inputs([keys::FLASHCARDS, keys::ASSESSMENTS])
                .with_output_key(keys::COURSE)
                .with_retry_policy(retry.clone()),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::run::InMemoryRunStore;
    use crate::testing::CourseFakes;
    use pretty_assertions::assert_eq;

    fn structure(modules: u32, lessons_per_module: u32) -> StructurePreferences {
        StructurePreferences {
            modules,
            lessons_per_module,
            assessments: true,
            projects: false,
        }
    }

    #[test]
    fn test_lesson_weight_follows_cap() {
        assert_eq!(lesson_weight(&structure(4, 3), None), 12);
        assert_eq!(lesson_weight(&structure(4, 3), Some(1)), 3);
        assert_eq!(lesson_weight(&structure(4, 3), Some(0)), 1);
    }

    #[test]
    fn test_definition_shape() {
        let fakes = CourseFakes::new();
        let definition = course_pipeline(
            &fakes.ports(),
            &CourseConfig::default(),
            &RetryPolicy::default(),
            &structure(2, 3),
            Arc::new(InMemoryRunStore::new()),
            Arc::new(CollectingEventSink::new()),
        )
        .unwrap();

        assert_eq!(definition.id(), COURSE_PIPELINE_ID);
        assert_eq!(
            definition.stage_ids(),
            vec![
                "validate_request",
                "build_structure",
                "generate_lessons",
                "generate_flashcards",
                "generate_assessments",
                "finalize_course"
            ]
        );
        assert!(definition.stage(4).unwrap().is_conditional());
        assert_eq!(definition.progress().total_weight(), 1 + 2 + 6 + 1 + 1 + 1);
    }
}
