//! More lessons for a module of a course that finished generating.
//!
//! The outline and settings come from the finished generation run; the
//! expansion run writes one slice of a module through the lesson pipeline and
//! reports where the next slice starts.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::keys;
use super::lessons::{lesson_pipeline, LessonPlan};
use super::model::{CourseOutline, ExpansionReport, LessonBatchReport, MoreLessonsRequested};
use super::pipeline::CoursePorts;
use crate::config::CourseConfig;
use crate::context::StageInputs;
use crate::errors::{ContentflowError, PipelineValidationError, StageError};
use crate::events::EventSink;
use crate::pipeline::{FanOutDriver, FanOutStage, PipelineDefinition, RetryPolicy, StageSpec};
use crate::run::RunStore;
use crate::stages::{typed, TypedStage};

/// Pipeline id of lesson expansion runs.
pub const LESSON_EXPANSION_PIPELINE_ID: &str = "lesson_expansion";

/// Number of lessons `request` will write.
///
/// # Errors
///
/// Returns `InvalidTrigger` if the count is zero, the module is not in the
/// outline, or no lesson exists at the start index.
pub fn expansion_slice_len(outline: &CourseOutline, request: &MoreLessonsRequested) -> Result<usize, ContentflowError> {
    let invalid = |msg: String| Err(ContentflowError::InvalidTrigger(format!("More lessons rejected: {msg}")));

    if request.count == 0 {
        return invalid("count must be at least 1".to_string());
    }
    let Some((_, module)) = outline.module(&request.module_id) else {
        return invalid(format!(
            "module {} is not part of course {}",
            request.module_id, outline.course_id
        ));
    };
    let available = module.lessons.len().saturating_sub(request.start_from_index);
    if available == 0 {
        return invalid(format!(
            "no lessons found from index {} in module {}",
            request.start_from_index, request.module_id
        ));
    }
    Ok(available.min(request.count))
}

/// Folds the slice's lesson report into an [`ExpansionReport`].
#[derive(Debug, Default)]
pub struct ReportExpansion;

#[async_trait]
impl TypedStage for ReportExpansion {
    type Output = ExpansionReport;

    async fn run(&self, inputs: &StageInputs) -> Result<ExpansionReport, StageError> {
        let request: MoreLessonsRequested = inputs.require(keys::EXPANSION)?;
        let outline: CourseOutline = inputs.require(keys::STRUCTURE)?;
        let lessons: LessonBatchReport = inputs.require(keys::LESSONS)?;

        let module_len = outline.module(&request.module_id).map_or(0, |(_, m)| m.lessons.len());
        let next_start_index = (request.start_from_index + lessons.planned).min(module_len);
        let report = ExpansionReport {
            module_id: request.module_id,
            generated: lessons.generated,
            failed: lessons.failed,
            next_start_index,
            has_more_lessons: next_start_index < module_len,
        };
        info!(
            module_id = %report.module_id,
            generated = report.generated.len(),
            next_start_index = report.next_start_index,
            has_more_lessons = report.has_more_lessons,
            "Module expanded"
        );
        Ok(report)
    }
}

/// Builds the expansion definition for one request.
///
/// `slice_len` comes from [`expansion_slice_len`] and weights the fan-out.
///
/// # Errors
///
/// Returns a validation error if either definition is malformed.
pub fn lesson_expansion_pipeline(
    ports: &CoursePorts,
    config: &CourseConfig,
    retry: &RetryPolicy,
    request: &MoreLessonsRequested,
    slice_len: usize,
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
    let plan = LessonPlan::for_module_slice(request.module_id.clone(), request.start_from_index, request.count);

    PipelineDefinition::builder(LESSON_EXPANSION_PIPELINE_ID)
        .trigger_key(keys::SETTINGS)
        .trigger_key(keys::STRUCTURE)
        .trigger_key(keys::EXPANSION)
        .stage(
            StageSpec::new("generate_lessons", Arc::new(FanOutStage::new(plan, driver)))
                .with_inputs([keys::SETTINGS, keys::STRUCTURE])
                .with_output_key(keys::LESSONS)
                .with_retry_policy(RetryPolicy::no_retry())
                .with_weight(u32::try_from(slice_len).unwrap_or(u32::MAX).max(1)),
        )
        .stage(
            StageSpec::new("report_expansion", typed(ReportExpansion))
                .with_inputs([keys::EXPANSION, keys::STRUCTURE, keys::LESSONS])
                .with_output_key(keys::EXPANSION_REPORT)
                .with_retry_policy(RetryPolicy::no_retry()),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::events::CollectingEventSink;
    use crate::run::InMemoryRunStore;
    use crate::testing::{fixtures, CourseFakes};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn request(module_id: &str, start_from_index: usize, count: usize) -> MoreLessonsRequested {
        MoreLessonsRequested {
            generation_run_id: Uuid::now_v7(),
            module_id: module_id.to_string(),
            start_from_index,
            count,
        }
    }

    #[test]
    fn test_slice_is_clamped_to_the_module() {
        let outline = fixtures::course_outline(2, 3);
        assert_eq!(expansion_slice_len(&outline, &request("module-2", 0, 2)).unwrap(), 2);
        assert_eq!(expansion_slice_len(&outline, &request("module-2", 2, 5)).unwrap(), 1);

        let err = expansion_slice_len(&outline, &request("module-2", 3, 2)).unwrap_err();
        assert!(err.to_string().contains("no lessons found from index 3"));
        assert!(expansion_slice_len(&outline, &request("module-7", 0, 2)).is_err());
        assert!(expansion_slice_len(&outline, &request("module-1", 0, 0)).is_err());
    }

    #[tokio::test]
    async fn test_report_points_at_the_next_slice() {
        let mut context = RunContext::new();
        context.insert_typed(keys::EXPANSION, &request("module-1", 1, 2)).unwrap();
        context.insert_typed(keys::STRUCTURE, &fixtures::course_outline(1, 4)).unwrap();
        let batch = LessonBatchReport {
            planned: 2,
            ..LessonBatchReport::default()
        };
        context.insert_typed(keys::LESSONS, &batch).unwrap();
        let inputs = fixtures::stage_inputs(&context, &[keys::EXPANSION, keys::STRUCTURE, keys::LESSONS]).unwrap();

        let report = ReportExpansion.run(&inputs).await.unwrap();

        assert_eq!(report.next_start_index, 3);
        assert!(report.has_more_lessons);
    }

    #[test]
    fn test_definition_shape() {
        let fakes = CourseFakes::new();
        let definition = lesson_expansion_pipeline(
            &fakes.ports(),
            &CourseConfig::default(),
            &RetryPolicy::default(),
            &request("module-1", 0, 3),
            3,
            Arc::new(InMemoryRunStore::new()),
            Arc::new(CollectingEventSink::new()),
        )
        .unwrap();

        assert_eq!(definition.id(), LESSON_EXPANSION_PIPELINE_ID);
        assert_eq!(definition.stage_ids(), vec!["generate_lessons", "report_expansion"]);
        assert_eq!(definition.progress().total_weight(), 3 + 1);
    }
}
