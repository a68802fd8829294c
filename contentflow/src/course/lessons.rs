//! Per-lesson generation: the inner pipeline and the fan-out plan over it.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::keys;
use super::model::{
    CourseOutline, CourseSettings, GeneratedContent, LessonBatchReport, LessonContent, LessonOutline, LessonSummary,
    LessonUnit, ModuleOutline, SavedExamples, SavedQuiz, VideoAttachment,
};
use super::ports::{ContentGenerator, CourseRepository, LessonFlags, NewContentItem, VideoSearch};
use super::prompts;
use crate::context::{RunContext, StageInputs};
use crate::core::StageOutput;
use crate::errors::{PipelineValidationError, StageError};
use crate::pipeline::{FanOutPlan, FanOutReport, FanOutUnit, PipelineDefinition, RetryPolicy, StageSpec};
use crate::stages::{typed, TypedStage};

/// Pipeline id of the per-lesson sub-runs.
pub const LESSON_PIPELINE_ID: &str = "lesson_generation";

const LESSON_ITEM_ORDER: u32 = 1;
const VIDEO_ITEM_ORDER: u32 = 0;

/// Generates the lesson text and stores it as the lesson content item.
#[derive(Debug)]
pub struct GenerateContent {
    generator: Arc<dyn ContentGenerator>,
    repository: Arc<dyn CourseRepository>,
}

impl GenerateContent {
    /// Creates a new content stage.
    pub fn new(generator: Arc<dyn ContentGenerator>, repository: Arc<dyn CourseRepository>) -> Self {
        Self { generator, repository }
    }
}

#[async_trait]
impl TypedStage for GenerateContent {
    type Output = GeneratedContent;

    async fn run(&self, inputs: &StageInputs) -> Result<GeneratedContent, StageError> {
        let unit: LessonUnit = inputs.require(keys::LESSON)?;
        let settings: CourseSettings = inputs.require(keys::SETTINGS)?;

        let raw = self
            .generator
            .generate(&prompts::lesson_prompt(&settings, &unit), &prompts::lesson_schema())
            .await?;
        let content: LessonContent = serde_json::from_value(raw)
            .map_err(|e| StageError::fatal(format!("generated lesson content does not match schema: {e}")))?;

        let content_item_id = self
            .repository
            .create_content_item(
                &unit.lesson.id,
                NewContentItem {
                    content_type: "lesson".to_string(),
                    title: unit.lesson.title.clone(),
                    order_index: LESSON_ITEM_ORDER,
                    body: json!({
                        "summary": content.summary,
                        "keyTopics": content.key_topics,
                        "learningObjectives": content.learning_objectives,
                    }),
                },
            )
            .await?;
        let article_id = self.repository.create_article(&content_item_id, &content.content).await?;

        debug!(lesson_id = %unit.lesson.id, content_item_id = %content_item_id, "Lesson content stored");
        Ok(GeneratedContent {
            content_item_id,
            article_id,
            content,
        })
    }
}

/// Attaches the best matching video. Search failures only produce a warning.
#[derive(Debug)]
pub struct AttachVideo {
    videos: Arc<dyn VideoSearch>,
    repository: Arc<dyn CourseRepository>,
}

impl AttachVideo {
    /// Creates a new video stage.
    pub fn new(videos: Arc<dyn VideoSearch>, repository: Arc<dyn CourseRepository>) -> Self {
        Self { videos, repository }
    }
}

#[async_trait]
impl TypedStage for AttachVideo {
    type Output = VideoAttachment;

    async fn run(&self, inputs: &StageInputs) -> Result<VideoAttachment, StageError> {
        let unit: LessonUnit = inputs.require(keys::LESSON)?;
        let settings: CourseSettings = inputs.require(keys::SETTINGS)?;
        let query = prompts::video_query(&settings, &unit);

        let hit = match self.videos.search(&query).await {
            Ok(Some(hit)) => hit,
            Ok(None) => {
                return Ok(VideoAttachment {
                    attached: false,
                    content_item_id: None,
                    warning: Some(format!("no video found for '{query}'")),
                })
            }
            Err(err) => {
                warn!(lesson_id = %unit.lesson.id, error = %err, "Video search failed; continuing without video");
                return Ok(VideoAttachment {
                    attached: false,
                    content_item_id: None,
                    warning: Some(err.to_string()),
                });
            }
        };

        let content_item_id = self
            .repository
            .create_content_item(
                &unit.lesson.id,
                NewContentItem {
                    content_type: "video".to_string(),
                    title: format!("Video: {}", hit.title),
                    order_index: VIDEO_ITEM_ORDER,
                    body: json!({
                        "url": hit.url,
                        "duration": hit.duration,
                        "thumbnailUrl": hit.thumbnail_url,
                    }),
                },
            )
            .await?;
        Ok(VideoAttachment {
            attached: true,
            content_item_id: Some(content_item_id),
            warning: None,
        })
    }
}

/// Stores the lesson quiz.
#[derive(Debug)]
pub struct SaveQuiz {
    repository: Arc<dyn CourseRepository>,
}

impl SaveQuiz {
    /// Creates a new quiz stage.
    pub fn new(repository: Arc<dyn CourseRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl TypedStage for SaveQuiz {
    type Output = SavedQuiz;

    async fn run(&self, inputs: &StageInputs) -> Result<SavedQuiz, StageError> {
        let unit: LessonUnit = inputs.require(keys::LESSON)?;
        let generated: GeneratedContent = inputs.require(keys::CONTENT)?;
        let quiz = &generated.content.quiz;
        let quiz_id = self.repository.save_quiz(&unit.lesson.id, quiz).await?;
        Ok(SavedQuiz {
            quiz_id,
            question_count: quiz.questions.len(),
        })
    }
}

/// Stores each example as a content item after the lesson item.
#[derive(Debug)]
pub struct SaveExamples {
    repository: Arc<dyn CourseRepository>,
}

impl SaveExamples {
    /// Creates a new examples stage.
    pub fn new(repository: Arc<dyn CourseRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl TypedStage for SaveExamples {
    type Output = SavedExamples;

    async fn run(&self, inputs: &StageInputs) -> Result<SavedExamples, StageError> {
        let unit: LessonUnit = inputs.require(keys::LESSON)?;
        let generated: GeneratedContent = inputs.require(keys::CONTENT)?;

        let mut saved = SavedExamples::default();
        for (order_index, example) in (LESSON_ITEM_ORDER + 1..).zip(&generated.content.examples) {
            let id = self
                .repository
                .create_content_item(
                    &unit.lesson.id,
                    NewContentItem {
                        content_type: "example".to_string(),
                        title: example.title.clone(),
                        order_index,
                        body: json!({"content": example.content, "type": example.example_type}),
                    },
                )
                .await?;
            saved.content_item_ids.push(id);
        }
        Ok(saved)
    }
}

/// Flags the lesson as generated.
#[derive(Debug)]
pub struct MarkGenerated {
    repository: Arc<dyn CourseRepository>,
}

impl MarkGenerated {
    /// Creates a new mark stage.
    pub fn new(repository: Arc<dyn CourseRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl TypedStage for MarkGenerated {
    type Output = LessonSummary;

    async fn run(&self, inputs: &StageInputs) -> Result<LessonSummary, StageError> {
        let unit: LessonUnit = inputs.require(keys::LESSON)?;
        let quiz: SavedQuiz = inputs.require(keys::QUIZ)?;
        let examples: SavedExamples = inputs.require(keys::EXAMPLES)?;
        let video: Option<VideoAttachment> = inputs.optional(keys::VIDEO)?;

        let flags = LessonFlags {
            has_quiz: quiz.question_count > 0,
            has_examples: !examples.content_item_ids.is_empty(),
        };
        self.repository.mark_lesson_generated(&unit.lesson.id, flags).await?;

        Ok(LessonSummary {
            lesson_id: unit.lesson.id.clone(),
            unit_key: unit.key(),
            has_quiz: flags.has_quiz,
            has_examples: flags.has_examples,
            video_attached: video.is_some_and(|v| v.attached),
        })
    }
}

fn wants_video(context: &RunContext) -> bool {
    matches!(context.get_typed::<CourseSettings>(keys::SETTINGS), Ok(Some(settings)) if settings.wants_video())
}

/// Builds the inner pipeline run once per lesson.
///
/// # Errors
///
/// Returns a validation error if the definition is malformed.
pub fn lesson_pipeline(
    generator: Arc<dyn ContentGenerator>,
    videos: Arc<dyn VideoSearch>,
    repository: Arc<dyn CourseRepository>,
    retry: &RetryPolicy,
) -> Result<PipelineDefinition, PipelineValidationError> {
    PipelineDefinition::builder(LESSON_PIPELINE_ID)
        .trigger_key(keys::LESSON)
        .trigger_key(keys::SETTINGS)
        .stage(
            StageSpec::new("generate_content", typed(GenerateContent::new(generator, repository.clone())))
                .with_inputs([keys::LESSON, keys::SETTINGS])
                .with_output_key(keys::CONTENT)
                .with_retry_policy(retry.clone()),
        )
        .stage(
            StageSpec::new("attach_video", typed(AttachVideo::new(videos, repository.clone())))
                .with_inputs([keys::LESSON, keys::SETTINGS])
                .with_output_key(keys::VIDEO)
                .with_retry_policy(retry.clone())
                .when(wants_video),
        )
        .stage(
            StageSpec::new("save_quiz", typed(SaveQuiz::new(repository.clone())))
                .with_inputs([keys::LESSON, keys::CONTENT])
                .with_output_key(keys::QUIZ)
                .with_retry_policy(retry.clone()),
        )
        .stage(
            StageSpec::new("save_examples", typed(SaveExamples::new(repository.clone())))
                .with_inputs([keys::LESSON, keys::CONTENT])
                .with_output_key(keys::EXAMPLES)
                .with_retry_policy(retry.clone()),
        )
        .stage(
            StageSpec::new("mark_generated", typed(MarkGenerated::new(repository)))
                .with_inputs([keys::LESSON, keys::QUIZ, keys::EXAMPLES])
                .with_optional_inputs([keys::VIDEO])
                .with_output_key(keys::GENERATED)
                .with_retry_policy(retry.clone()),
        )
        .build()
}

/// A run of consecutive lessons inside one module.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ModuleSlice {
    module_id: String,
    start: usize,
    count: usize,
}

/// Plans one unit per lesson of the first `max_modules` modules, or of one
/// slice of a single module.
#[derive(Debug, Clone, Default)]
pub struct LessonPlan {
    max_modules: Option<usize>,
    slice: Option<ModuleSlice>,
}

impl LessonPlan {
    /// Creates a plan covering every module.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_modules: None,
            slice: None,
        }
    }

    /// Limits generation to the first `max_modules` modules.
    #[must_use]
    pub fn with_max_modules(mut self, max_modules: Option<usize>) -> Self {
        self.max_modules = max_modules;
        self
    }

    /// Plans only `count` lessons of `module_id`, starting at zero-based `start`.
    #[must_use]
    pub fn for_module_slice(module_id: impl Into<String>, start: usize, count: usize) -> Self {
        Self {
            max_modules: None,
            slice: Some(ModuleSlice {
                module_id: module_id.into(),
                start,
                count,
            }),
        }
    }

    fn generated_module_count(&self, outline: &CourseOutline) -> usize {
        self.max_modules
            .map_or(outline.modules.len(), |cap| cap.min(outline.modules.len()))
    }

    fn selected(&self, outline: &CourseOutline) -> Result<Vec<LessonUnit>, StageError> {
        let unit = |module_index: usize, module: &ModuleOutline, lesson_index: usize, lesson: &LessonOutline| {
            LessonUnit {
                course_id: outline.course_id.clone(),
                module_id: module.id.clone(),
                module_title: module.title.clone(),
                module_index,
                lesson: lesson.clone(),
                lesson_index,
            }
        };

        let Some(slice) = &self.slice else {
            return Ok(outline
                .modules
                .iter()
                .take(self.generated_module_count(outline))
                .enumerate()
                .flat_map(|(mi, module)| module.lessons.iter().enumerate().map(move |(li, l)| unit(mi, module, li, l)))
                .collect());
        };

        let (module_index, module) = outline.module(&slice.module_id).ok_or_else(|| {
            StageError::fatal(format!(
                "module {} is not part of course {}",
                slice.module_id, outline.course_id
            ))
        })?;
        let units: Vec<LessonUnit> = module
            .lessons
            .iter()
            .enumerate()
            .skip(slice.start)
            .take(slice.count)
            .map(|(li, lesson)| unit(module_index, module, li, lesson))
            .collect();
        if units.is_empty() {
            return Err(StageError::fatal(format!(
                "no lessons found from index {} in module {}",
                slice.start, slice.module_id
            )));
        }
        Ok(units)
    }
}

#[async_trait]
impl FanOutPlan for LessonPlan {
    async fn units(&self, inputs: &StageInputs) -> Result<Vec<FanOutUnit>, StageError> {
        let settings: CourseSettings = inputs.require(keys::SETTINGS)?;
        let outline: CourseOutline = inputs.require(keys::STRUCTURE)?;

        let mut units = Vec::new();
        for unit in self.selected(&outline)? {
            let mut seed = RunContext::new();
            let seeded = seed
                .insert_typed(keys::LESSON, &unit)
                .and_then(|()| seed.insert_typed(keys::SETTINGS, &settings));
            seeded.map_err(|e| StageError::fatal(e.to_string()))?;
            units.push(FanOutUnit::new(unit.key(), seed));
        }
        Ok(units)
    }

    async fn aggregate(&self, inputs: &StageInputs, report: FanOutReport) -> Result<StageOutput, StageError> {
        let outline: CourseOutline = inputs.require(keys::STRUCTURE)?;

        let mut generated = Vec::new();
        for record in report.succeeded() {
            if let Some(summary) = record.context.get_typed::<LessonSummary>(keys::GENERATED)? {
                generated.push(summary);
            }
        }
        let batch = LessonBatchReport {
            planned: report.planned,
            generated,
            failed: report.failed().map(|r| r.unit_key.clone()).collect(),
            pending_modules: if self.slice.is_some() {
                Vec::new()
            } else {
                outline
                    .modules
                    .iter()
                    .skip(self.generated_module_count(&outline))
                    .map(|m| m.id.clone())
                    .collect()
            },
        };
        info!(
            planned = batch.planned,
            generated = batch.generated.len(),
            failed = batch.failed.len(),
            pending_modules = batch.pending_modules.len(),
            "Lesson batch finished"
        );
        StageOutput::from_typed(&batch)
    }
}
