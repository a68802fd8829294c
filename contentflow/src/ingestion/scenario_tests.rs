//! End-to-end ingestion runs through the trigger service.

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    use crate::config::OrchestratorConfig;
    use crate::core::RunStatus;
    use crate::events::{types, CollectingEventSink};
    use crate::ingestion::keys;
    use crate::pipeline::RetryPolicy;
    use crate::run::{InMemoryRunStore, OwnerRef, OwnerState, ProcessingStatus};
    use crate::service::PipelineService;
    use crate::testing::{fixtures, CourseFakes, FakeDocumentParser, IngestionFakes};

    fn config() -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.retry = RetryPolicy::immediate(2);
        config.ingestion.parse_poll_interval_ms = 0;
        config.ingestion.parse_max_polls = 3;
        config
    }

    fn service(fakes: &IngestionFakes, sink: Arc<CollectingEventSink>) -> PipelineService {
        PipelineService::new(
            &fakes.ports(),
            CourseFakes::new().ports(),
            Arc::new(InMemoryRunStore::new()),
            sink,
            config(),
        )
        .unwrap()
    }

    fn processing_status(state: &OwnerState) -> ProcessingStatus {
        match state {
            OwnerState::Document(doc) => doc.processing_status,
            OwnerState::CourseGenerationRequest(_) => panic!("expected a document owner"),
        }
    }

    #[tokio::test]
    async fn test_text_upload_skips_parsing() {
        let fakes = IngestionFakes::new();
        let sink = Arc::new(CollectingEventSink::new());
        let service = service(&fakes, sink.clone());
        let upload = fixtures::upload("notes.txt");
        fakes.blobs.seed(
            &upload.blob_url,
            "Some notes about ownership.\n".repeat(10).into_bytes(),
            Some("text/plain"),
        );

        let handle = service.on_upload_completed(upload.clone()).await.unwrap();
        let run = handle.wait().await.unwrap();

        assert_eq!(run.status(), RunStatus::Succeeded);
        assert_eq!(run.progress_percent(), 100);
        let attempts = service.attempts(run.id()).await.unwrap();
        let executed: Vec<&str> = attempts.iter().map(|a| a.stage_id.as_str()).collect();
        assert_eq!(executed, vec!["validate_document", "store_document", "extract_metadata", "vectorize"]);
        assert_eq!(sink.count(types::STAGE_SKIPPED), 2);
        assert_eq!(fakes.parser.submissions(), 0);
        assert!(!run.context().contains_key(keys::PARSED));

        assert_eq!(
            fakes.blobs.stored_paths(),
            vec![format!("user-1/documents/{}.txt", upload.document_id)]
        );
        let records = fakes.catalog.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "notes.txt");
        let chunks = fakes.index.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, format!("{}_chunk_0", upload.document_id));

        let owner = service.owner_state(OwnerRef::Document(upload.document_id)).await.unwrap();
        assert_eq!(processing_status(&owner), ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn test_pdf_upload_is_parsed_and_markdown_stored() {
        let fakes = IngestionFakes::new();
        let service = service(&fakes, Arc::new(CollectingEventSink::new()));
        let upload = fixtures::upload("paper.pdf");
        fakes
            .blobs
            .seed(&upload.blob_url, b"%PDF-1.7".to_vec(), Some("application/pdf"));

        let run = service.on_upload_completed(upload.clone()).await.unwrap().wait().await.unwrap();

        assert_eq!(run.status(), RunStatus::Succeeded);
        assert_eq!(fakes.parser.submissions(), 1);
        assert_eq!(
            fakes.blobs.stored_paths(),
            vec![
                format!("user-1/documents/{}.pdf", upload.document_id),
                format!("user-1/markdown/{}.md", upload.document_id),
            ]
        );
        assert!(fakes.index.chunks()[0].text.starts_with("# Parsed document"));
    }

    #[tokio::test]
    async fn test_pdf_that_never_parses_fails_the_document() {
        let fakes = IngestionFakes::with_parser(FakeDocumentParser::never_finishing());
        let sink = Arc::new(CollectingEventSink::new());
        let service = service(&fakes, sink.clone());
        let upload = fixtures::upload("scan.pdf");
        fakes
            .blobs
            .seed(&upload.blob_url, b"%PDF-1.4".to_vec(), Some("application/pdf"));

        let run = service.on_upload_completed(upload.clone()).await.unwrap().wait().await.unwrap();

        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.current_stage_index(), 2);
        assert!(run.last_error().unwrap().contains("did not finish"));
        assert!(run.context().contains_key(keys::STORED_DOCUMENT));
        assert!(!run.context().contains_key(keys::PARSED));

        assert_eq!(fakes.parser.submissions(), 2);
        assert_eq!(fakes.parser.total_polls(), 6);
        assert_eq!(fakes.extractor.calls(), 0);
        assert_eq!(fakes.index.upsert_calls(), 0);
        assert_eq!(sink.count(types::RUN_FAILED), 1);

        let owner = service.owner_state(OwnerRef::Document(upload.document_id)).await.unwrap();
        assert_eq!(processing_status(&owner), ProcessingStatus::Failed);
        assert!(owner.error_message().is_some());
    }

    #[tokio::test]
    async fn test_unreadable_metadata_is_fatal() {
        let fakes = IngestionFakes::new();
        fakes.extractor.respond_with(serde_json::json!({"title": 42}));
        let service = service(&fakes, Arc::new(CollectingEventSink::new()));
        let upload = fixtures::upload("notes.md");
        fakes.blobs.seed(&upload.blob_url, b"# Notes".to_vec(), Some("text/markdown"));

        let run = service.on_upload_completed(upload).await.unwrap().wait().await.unwrap();

        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(fakes.extractor.calls(), 1);
        assert!(run.last_error().unwrap().contains("does not match schema"));
    }
}
