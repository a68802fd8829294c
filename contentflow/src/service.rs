//! Trigger service: turns upload and generation events into running pipelines.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::context::RunContext;
use crate::core::{RunStatus, StageAttempt};
use crate::course::{
    self, course_pipeline, course_settings, expansion_slice_len, lesson_expansion_pipeline, CourseOutline, CoursePorts,
    CourseSettings, GenerationRequested, MoreLessonsRequested, COURSE_PIPELINE_ID,
};
use crate::errors::ContentflowError;
use crate::events::EventSink;
use crate::ingestion::{self, ingestion_pipeline, IngestionPorts, UploadCompleted};
use crate::pipeline::RunCoordinator;
use crate::run::{OwnerRef, OwnerState, PipelineRun, RunStore};

/// A run started in the background.
#[derive(Debug)]
pub struct RunHandle {
    /// The run id.
    pub run_id: Uuid,
    /// The owner entity the run drives.
    pub owner: OwnerRef,
    /// The task driving the run to completion.
    pub join: JoinHandle<Result<PipelineRun, ContentflowError>>,
}

impl RunHandle {
    /// Waits for the run to reach a terminal state.
    ///
    /// # Errors
    ///
    /// Returns `Join` if the task panicked or was aborted, or the error the
    /// coordinator returned.
    pub async fn wait(self) -> Result<PipelineRun, ContentflowError> {
        self.join
            .await
            .map_err(|e| ContentflowError::Join(e.to_string()))?
    }
}

/// Owns the collaborators, the run store, the event sink and the
/// configuration, and starts one run per accepted event.
#[derive(Debug, Clone)]
pub struct PipelineService {
    ingestion: RunCoordinator,
    course_ports: CoursePorts,
    store: Arc<dyn RunStore>,
    sink: Arc<dyn EventSink>,
    config: OrchestratorConfig,
}

impl PipelineService {
    /// Creates a service.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid, or `Validation` if
    /// the ingestion definition cannot be built.
    pub fn new(
        ingestion_ports: &IngestionPorts,
        course_ports: CoursePorts,
        store: Arc<dyn RunStore>,
        sink: Arc<dyn EventSink>,
        config: OrchestratorConfig,
    ) -> Result<Self, ContentflowError> {
        config.validate()?;
        let definition = ingestion_pipeline(ingestion_ports, &config.ingestion, &config.retry)?;
        let ingestion = RunCoordinator::new(
            Arc::new(definition),
            store.clone(),
            sink.clone(),
            config.error_message_limit,
        );
        Ok(Self {
            ingestion,
            course_ports,
            store,
            sink,
            config,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Starts document ingestion for an upload.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTrigger` for an incomplete event, or `Store` if the
    /// document already has an active run.
    pub async fn on_upload_completed(&self, event: UploadCompleted) -> Result<RunHandle, ContentflowError> {
        if event.filename.trim().is_empty() {
            return Err(ContentflowError::InvalidTrigger("upload has no filename".to_string()));
        }
        if event.blob_url.trim().is_empty() {
            return Err(ContentflowError::InvalidTrigger("upload has no blob URL".to_string()));
        }
        if event.owner_id.trim().is_empty() {
            return Err(ContentflowError::InvalidTrigger("upload has no owner".to_string()));
        }

        let owner = OwnerRef::Document(event.document_id);
        let mut trigger = RunContext::new();
        trigger.insert_typed(ingestion::keys::DOCUMENT, &event)?;
        let run = self.ingestion.create_run(owner, trigger).await?;
        info!(run_id = %run.id(), owner = %owner, filename = %event.filename, "Ingestion accepted");
        Ok(Self::spawn(self.ingestion.clone(), run))
    }

    /// Starts course generation for a request.
    ///
    /// The request is validated before a run exists, so an invalid form
    /// never claims its owner.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTrigger` for an invalid request, or `Store` if the
    /// request already has an active run.
    pub async fn on_generation_requested(&self, event: GenerationRequested) -> Result<RunHandle, ContentflowError> {
        course_settings(&event.user_id, &event.input)?;

        let definition = course_pipeline(
            &self.course_ports,
            &self.config.course,
            &self.config.retry,
            &event.input.structure,
            self.store.clone(),
            self.sink.clone(),
        )?;
        let coordinator = RunCoordinator::new(
            Arc::new(definition),
            self.store.clone(),
            self.sink.clone(),
            self.config.error_message_limit,
        );

        let owner = OwnerRef::CourseGenerationRequest(event.request_id);
        let mut trigger = RunContext::new();
        trigger.insert_typed(course::keys::REQUEST, &event)?;
        let run = coordinator.create_run(owner, trigger).await?;
        info!(run_id = %run.id(), owner = %owner, title = %event.input.title, "Course generation accepted");
        Ok(Self::spawn(coordinator, run))
    }

    /// Writes more lessons of one module of a finished course.
    ///
    /// The settings and outline are read from the finished generation run,
    /// and the new run drives the same course request owner.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTrigger` if the referenced run is not a succeeded
    /// course generation or the slice is empty, or `Store` if the run is
    /// unknown or the request already has an active run.
    pub async fn on_more_lessons_requested(&self, event: MoreLessonsRequested) -> Result<RunHandle, ContentflowError> {
        let generation = self.store.load_run(event.generation_run_id).await?;
        if generation.pipeline_id() != COURSE_PIPELINE_ID || generation.status() != RunStatus::Succeeded {
            return Err(ContentflowError::InvalidTrigger(format!(
                "run {} is not a finished course generation",
                generation.id()
            )));
        }
        let missing = |key: &str| {
            ContentflowError::InvalidTrigger(format!("run {} has no {key} to continue from", generation.id()))
        };
        let settings: CourseSettings = generation
            .context()
            .get_typed(course::keys::SETTINGS)?
            .ok_or_else(|| missing(course::keys::SETTINGS))?;
        let outline: CourseOutline = generation
            .context()
            .get_typed(course::keys::STRUCTURE)?
            .ok_or_else(|| missing(course::keys::STRUCTURE))?;
        let slice_len = expansion_slice_len(&outline, &event)?;

        let definition = lesson_expansion_pipeline(
            &self.course_ports,
            &self.config.course,
            &self.config.retry,
            &event,
            slice_len,
            self.store.clone(),
            self.sink.clone(),
        )?;
        let coordinator = RunCoordinator::new(
            Arc::new(definition),
            self.store.clone(),
            self.sink.clone(),
            self.config.error_message_limit,
        );

        let owner = generation.owner();
        let mut trigger = RunContext::new();
        trigger.insert_typed(course::keys::SETTINGS, &settings)?;
        trigger.insert_typed(course::keys::STRUCTURE, &outline)?;
        trigger.insert_typed(course::keys::EXPANSION, &event)?;
        let run = coordinator.create_run(owner, trigger).await?;
        info!(
            run_id = %run.id(),
            owner = %owner,
            module_id = %event.module_id,
            lessons = slice_len,
            "Lesson expansion accepted"
        );
        Ok(Self::spawn(coordinator, run))
    }

    fn spawn(coordinator: RunCoordinator, run: PipelineRun) -> RunHandle {
        let run_id = run.id();
        let owner = run.owner();
        let join = tokio::spawn(async move {
            let result = coordinator.run_to_completion(run).await;
            if let Err(err) = &result {
                warn!(run_id = %run_id, error = %err, "Run stopped on a store error");
            }
            result
        });
        RunHandle { run_id, owner, join }
    }

    /// Loads the persisted run.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the run does not exist.
    pub async fn run_snapshot(&self, run_id: Uuid) -> Result<PipelineRun, ContentflowError> {
        Ok(self.store.load_run(run_id).await?)
    }

    /// Loads the owner's visible state.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the owner has never been driven by a run.
    pub async fn owner_state(&self, owner: OwnerRef) -> Result<OwnerState, ContentflowError> {
        Ok(self.store.load_owner(owner).await?)
    }

    /// Loads the attempt log of a run.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the log cannot be read.
    pub async fn attempts(&self, run_id: Uuid) -> Result<Vec<StageAttempt>, ContentflowError> {
        Ok(self.store.attempts(run_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::events::CollectingEventSink;
    use crate::run::InMemoryRunStore;
    use crate::testing::{fixtures, CourseFakes, FakeDocumentParser, IngestionFakes};

    fn service(ingestion: &IngestionFakes, course: &CourseFakes) -> PipelineService {
        PipelineService::new(
            &ingestion.ports(),
            course.ports(),
            Arc::new(InMemoryRunStore::new()),
            Arc::new(CollectingEventSink::new()),
            OrchestratorConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_upload_is_rejected_before_a_run_exists() {
        let service = service(&IngestionFakes::new(), &CourseFakes::new());
        let mut event = fixtures::upload("notes.txt");
        event.filename = "  ".into();

        let err = service.on_upload_completed(event.clone()).await.unwrap_err();

        assert!(matches!(err, ContentflowError::InvalidTrigger(_)));
        assert!(service.owner_state(OwnerRef::Document(event.document_id)).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_course_request_is_rejected() {
        let service = service(&IngestionFakes::new(), &CourseFakes::new());
        let mut event = fixtures::course_request(1, 1);
        event.input.user_profile_context = None;

        let err = service.on_generation_requested(event).await.unwrap_err();

        assert!(err.to_string().contains("user profile"));
    }

    #[tokio::test]
    async fn test_second_run_for_busy_owner_is_rejected() {
        let ingestion = IngestionFakes::with_parser(FakeDocumentParser::never_finishing());
        let service = service(&ingestion, &CourseFakes::new());
        let event = fixtures::upload("slow.pdf");
        ingestion
            .blobs
            .seed(&event.blob_url, b"%PDF".to_vec(), Some("application/pdf"));

        let first = service.on_upload_completed(event.clone()).await.unwrap();
        let err = service.on_upload_completed(event).await.unwrap_err();

        assert!(matches!(err, ContentflowError::Store(StoreError::OwnerBusy { .. })));
        first.join.abort();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let ingestion = IngestionFakes::new();
        let mut config = OrchestratorConfig::default();
        config.retry.max_attempts = 0;

        let result = PipelineService::new(
            &ingestion.ports(),
            CourseFakes::new().ports(),
            Arc::new(InMemoryRunStore::new()),
            Arc::new(CollectingEventSink::new()),
            config,
        );

        assert!(matches!(result, Err(ContentflowError::Config(_))));
    }
}
