//! In-memory collaborators for both pipelines.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::course::{
    CourseCompletion, CoursePorts, ContentGenerator, CourseRepository, Flashcard, GenerationSummary, LessonFlags,
    LessonFlashcards, ModuleAssessment, NewContentItem, NewCourse, NewLesson, NewModule, Quiz, VideoHit, VideoSearch,
    ASSESSMENT_SCHEMA, FLASHCARD_SCHEMA, LESSON_SCHEMA, STRUCTURE_SCHEMA,
};
use crate::errors::PortError;
use crate::ingestion::{
    BlobStore, ContentCatalog, ContentRecord, DocumentChunk, DocumentParser, FetchedBlob, IngestionPorts,
    MetadataExtractor, ParseJobStatus, StoredBlob, VectorIndex,
};

/// Blob store backed by a map from URL to blob.
#[derive(Debug, Default)]
pub struct FakeBlobStore {
    blobs: DashMap<String, FetchedBlob>,
    stored: Mutex<Vec<String>>,
}

impl FakeBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `bytes` fetchable at `url`.
    pub fn seed(&self, url: &str, bytes: Vec<u8>, content_type: Option<&str>) {
        self.blobs.insert(
            url.to_string(),
            FetchedBlob {
                bytes,
                content_type: content_type.map(str::to_string),
            },
        );
    }

    /// Pathnames written through [`BlobStore::store`], in order.
    #[must_use]
    pub fn stored_paths(&self) -> Vec<String> {
        self.stored.lock().clone()
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn fetch(&self, url: &str) -> Result<FetchedBlob, PortError> {
        self.blobs
            .get(url)
            .map(|blob| blob.clone())
            .ok_or_else(|| PortError::rejected("blob-store", format!("no blob at {url}")))
    }

    async fn store(&self, pathname: &str, bytes: Vec<u8>, content_type: &str) -> Result<StoredBlob, PortError> {
        let url = format!("memory://{pathname}");
        let size = bytes.len() as u64;
        self.seed(&url, bytes, Some(content_type));
        self.stored.lock().push(pathname.to_string());
        Ok(StoredBlob {
            url,
            pathname: pathname.to_string(),
            size,
            content_type: content_type.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
enum ParseOutcome {
    Finish(String),
    Fail(String),
    Never,
}

/// Parse service that finishes, fails or stays pending on a schedule.
#[derive(Debug)]
pub struct FakeDocumentParser {
    pending_polls: u32,
    outcome: ParseOutcome,
    jobs: DashMap<String, u32>,
    submissions: AtomicUsize,
}

impl FakeDocumentParser {
    fn with_outcome(pending_polls: u32, outcome: ParseOutcome) -> Self {
        Self {
            pending_polls,
            outcome,
            jobs: DashMap::new(),
            submissions: AtomicUsize::new(0),
        }
    }

    /// Reports `Pending` `pending_polls` times per job, then `text`.
    #[must_use]
    pub fn finishing_after(pending_polls: u32, text: &str) -> Self {
        Self::with_outcome(pending_polls, ParseOutcome::Finish(text.to_string()))
    }

    /// Reports an error status on the first poll.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self::with_outcome(0, ParseOutcome::Fail(message.to_string()))
    }

    /// Never leaves `Pending`.
    #[must_use]
    pub fn never_finishing() -> Self {
        Self::with_outcome(0, ParseOutcome::Never)
    }

    /// Number of submitted jobs.
    #[must_use]
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Polls across every job.
    #[must_use]
    pub fn total_polls(&self) -> u32 {
        self.jobs.iter().map(|entry| *entry.value()).sum()
    }
}

#[async_trait]
impl DocumentParser for FakeDocumentParser {
    async fn submit_parse_job(&self, _bytes: Vec<u8>, _filename: &str) -> Result<String, PortError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        let job_id = format!("job-{n}");
        self.jobs.insert(job_id.clone(), 0);
        Ok(job_id)
    }

    async fn poll_job(&self, job_id: &str) -> Result<ParseJobStatus, PortError> {
        let polls = {
            let mut entry = self
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| PortError::rejected("document-parser", format!("unknown job {job_id}")))?;
            *entry += 1;
            *entry
        };
        if polls <= self.pending_polls {
            return Ok(ParseJobStatus::Pending);
        }
        Ok(match &self.outcome {
            ParseOutcome::Finish(text) => ParseJobStatus::Success { text: text.clone() },
            ParseOutcome::Fail(message) => ParseJobStatus::Error {
                message: message.clone(),
            },
            ParseOutcome::Never => ParseJobStatus::Pending,
        })
    }
}

/// Metadata extractor returning a fixed response.
#[derive(Debug)]
pub struct FakeMetadataExtractor {
    response: Mutex<Value>,
    calls: AtomicUsize,
}

impl Default for FakeMetadataExtractor {
    fn default() -> Self {
        Self {
            response: Mutex::new(json!({
                "title": null,
                "author": "Test Author",
                "subject": null,
                "keywords": ["notes"],
                "createdAt": null,
                "modifiedAt": null,
                "pageCount": 1,
                "language": "en",
                "layoutElements": [],
            })),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeMetadataExtractor {
    /// Creates an extractor with a minimal valid response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the response.
    pub fn respond_with(&self, response: Value) {
        *self.response.lock() = response;
    }

    /// Number of extraction calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataExtractor for FakeMetadataExtractor {
    async fn extract(&self, _text: &str, _schema: &Value) -> Result<Value, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.lock().clone())
    }
}

/// Catalog that keeps every record.
#[derive(Debug, Default)]
pub struct FakeContentCatalog {
    records: Mutex<Vec<ContentRecord>>,
}

impl FakeContentCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded content, in order.
    #[must_use]
    pub fn records(&self) -> Vec<ContentRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl ContentCatalog for FakeContentCatalog {
    async fn record_content(&self, record: ContentRecord) -> Result<String, PortError> {
        let mut records = self.records.lock();
        records.push(record);
        Ok(format!("content-{}", records.len()))
    }
}

/// Vector index that keeps every upserted chunk.
#[derive(Debug, Default)]
pub struct FakeVectorIndex {
    chunks: Mutex<Vec<DocumentChunk>>,
    upserts: AtomicUsize,
}

impl FakeVectorIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserted chunks, in order.
    #[must_use]
    pub fn chunks(&self) -> Vec<DocumentChunk> {
        self.chunks.lock().clone()
    }

    /// Number of upsert calls.
    #[must_use]
    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for FakeVectorIndex {
    async fn upsert(&self, chunks: Vec<DocumentChunk>) -> Result<usize, PortError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let count = chunks.len();
        self.chunks.lock().extend(chunks);
        Ok(count)
    }
}

/// Every ingestion collaborator, faked.
#[derive(Debug, Clone)]
pub struct IngestionFakes {
    /// Blob store.
    pub blobs: Arc<FakeBlobStore>,
    /// Parse service.
    pub parser: Arc<FakeDocumentParser>,
    /// Metadata extractor.
    pub extractor: Arc<FakeMetadataExtractor>,
    /// Content catalog.
    pub catalog: Arc<FakeContentCatalog>,
    /// Vector index.
    pub index: Arc<FakeVectorIndex>,
}

impl Default for IngestionFakes {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestionFakes {
    /// Creates fakes whose parser finishes on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parser(FakeDocumentParser::finishing_after(0, "# Parsed document\n\nBody text."))
    }

    /// Creates fakes around `parser`.
    #[must_use]
    pub fn with_parser(parser: FakeDocumentParser) -> Self {
        Self {
            blobs: Arc::new(FakeBlobStore::new()),
            parser: Arc::new(parser),
            extractor: Arc::new(FakeMetadataExtractor::new()),
            catalog: Arc::new(FakeContentCatalog::new()),
            index: Arc::new(FakeVectorIndex::new()),
        }
    }

    /// Port bundle for [`ingestion_pipeline`](crate::ingestion::ingestion_pipeline).
    #[must_use]
    pub fn ports(&self) -> IngestionPorts {
        IngestionPorts {
            blobs: self.blobs.clone(),
            parser: self.parser.clone(),
            extractor: self.extractor.clone(),
            catalog: self.catalog.clone(),
            index: self.index.clone(),
        }
    }
}

/// Generator that answers by schema title.
///
/// The outline follows the `Modules:` and `Lessons per module:` lines of the
/// structure prompt; lessons are titled `Lesson {module}.{lesson}`. Every
/// flashcard answer holds one usable card and one with a blank back.
#[derive(Debug, Default)]
pub struct FakeContentGenerator {
    structure_outages: AtomicU32,
    flashcard_outage: AtomicBool,
    rejected_lessons: Mutex<Vec<String>>,
    calls: DashMap<String, usize>,
}

impl FakeContentGenerator {
    /// Creates a generator that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` structure requests fail as unavailable.
    pub fn fail_structure(&self, times: u32) {
        self.structure_outages.store(times, Ordering::SeqCst);
    }

    /// Makes every flashcard request fail as unavailable.
    pub fn fail_flashcards(&self) {
        self.flashcard_outage.store(true, Ordering::SeqCst);
    }

    /// Rejects content and flashcard requests for the lesson titled `title`.
    pub fn reject_lesson(&self, title: &str) {
        self.rejected_lessons.lock().push(title.to_string());
    }

    /// Number of requests made against the schema titled `schema`.
    #[must_use]
    pub fn calls(&self, schema: &str) -> usize {
        self.calls.get(schema).map_or(0, |count| *count)
    }

    fn prompt_number(prompt: &str, label: &str) -> u32 {
        prompt
            .lines()
            .find_map(|line| line.trim().strip_prefix(label))
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(1)
    }

    fn structure(prompt: &str) -> Value {
        let modules = Self::prompt_number(prompt, "Modules:");
        let lessons = Self::prompt_number(prompt, "Lessons per module:");
        let modules: Vec<Value> = (1..=modules)
            .map(|m| {
                let lessons: Vec<Value> = (1..=lessons)
                    .map(|l| {
                        json!({
                            "title": format!("Lesson {m}.{l}"),
                            "description": format!("Lesson {l} of module {m}"),
                            "orderIndex": l,
                            "keyTopics": [format!("topic {m}.{l}")],
                        })
                    })
                    .collect();
                json!({
                    "title": format!("Module {m}"),
                    "description": format!("Module {m} description"),
                    "orderIndex": m,
                    "lessons": lessons,
                })
            })
            .collect();
        json!({
            "title": "Generated Course",
            "description": "A generated course",
            "prerequisites": [],
            "learningObjectives": ["learn things"],
            "modules": modules,
        })
    }

    fn lesson() -> Value {
        json!({
            "summary": "Lesson summary",
            "content": "Full lesson text.",
            "keyTopics": ["topic"],
            "learningObjectives": ["objective"],
            "quiz": {
                "title": "Check your understanding",
                "questions": [
                    {"question": "Is this a lesson?", "questionType": "true_false", "correctAnswer": "true"},
                    {"question": "Pick one", "questionType": "multiple_choice",
                     "options": ["a", "b"], "correctAnswer": "a"},
                ],
            },
            "examples": [
                {"title": "Worked example", "content": "Do this.", "type": "practical"},
            ],
        })
    }

    fn is_rejected(&self, prompt: &str) -> bool {
        self.rejected_lessons
            .lock()
            .iter()
            .any(|lesson| prompt.contains(&format!("\"{lesson}\"")))
    }

    fn flashcards() -> Value {
        json!({
            "flashcards": [
                {"front": "What does this lesson cover?", "back": "The lesson topic."},
                {"front": "Left unanswered", "back": " "},
            ],
        })
    }

    fn assessment() -> Value {
        json!({
            "moduleQuiz": {
                "title": "Module quiz",
                "description": "Covers the module",
                "questions": [{"type": "essay", "question": "Explain the module."}],
            },
            "practicalExercises": [{
                "title": "Exercise",
                "description": "Practice",
                "instructions": "Follow the steps",
                "expectedOutcome": "It works",
            }],
            "projectIdeas": [{
                "title": "Project",
                "description": "Build something",
                "requirements": ["time"],
                "difficulty": "beginner",
            }],
        })
    }
}

#[async_trait]
impl ContentGenerator for FakeContentGenerator {
    async fn generate(&self, prompt: &str, schema: &Value) -> Result<Value, PortError> {
        let title = schema.get("title").and_then(Value::as_str).unwrap_or_default().to_string();
        *self.calls.entry(title.clone()).or_insert(0) += 1;

        match title.as_str() {
            STRUCTURE_SCHEMA => {
                let outage = self
                    .structure_outages
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if outage {
                    return Err(PortError::unavailable("content-generator", "rate limited"));
                }
                Ok(Self::structure(prompt))
            }
            LESSON_SCHEMA | FLASHCARD_SCHEMA if self.is_rejected(prompt) => {
                Err(PortError::rejected("content-generator", "content policy violation"))
            }
            LESSON_SCHEMA => Ok(Self::lesson()),
            FLASHCARD_SCHEMA if self.flashcard_outage.load(Ordering::SeqCst) => {
                Err(PortError::unavailable("content-generator", "rate limited"))
            }
            FLASHCARD_SCHEMA => Ok(Self::flashcards()),
            ASSESSMENT_SCHEMA => Ok(Self::assessment()),
            other => Err(PortError::rejected("content-generator", format!("unknown schema '{other}'"))),
        }
    }
}

/// Video search with a fixed hit, no hit, or an error.
#[derive(Debug)]
pub struct FakeVideoSearch {
    hit: Mutex<Option<VideoHit>>,
    error: Mutex<Option<String>>,
}

impl Default for FakeVideoSearch {
    fn default() -> Self {
        Self {
            hit: Mutex::new(Some(VideoHit {
                title: "Intro video".to_string(),
                url: "https://video.example/watch?v=1".to_string(),
                duration: Some("10:00".to_string()),
                thumbnail_url: None,
            })),
            error: Mutex::new(None),
        }
    }
}

impl FakeVideoSearch {
    /// Creates a search that always finds one video.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every search fail as unavailable.
    pub fn fail_with(&self, message: &str) {
        *self.error.lock() = Some(message.to_string());
    }

    /// Makes every search come back empty.
    pub fn find_nothing(&self) {
        *self.hit.lock() = None;
    }
}

#[async_trait]
impl VideoSearch for FakeVideoSearch {
    async fn search(&self, _query: &str) -> Result<Option<VideoHit>, PortError> {
        if let Some(message) = self.error.lock().clone() {
            return Err(PortError::unavailable("video-search", message));
        }
        Ok(self.hit.lock().clone())
    }
}

/// Course repository held in memory.
#[derive(Debug, Default)]
pub struct FakeCourseRepository {
    sequence: AtomicUsize,
    courses: Mutex<Vec<NewCourse>>,
    modules: Mutex<Vec<(String, NewModule)>>,
    lessons: Mutex<Vec<(String, NewLesson)>>,
    content_items: Mutex<Vec<(String, NewContentItem)>>,
    quizzes: Mutex<Vec<String>>,
    generated: Mutex<HashMap<String, LessonFlags>>,
    assessments: Mutex<Vec<String>>,
    flashcards: Mutex<Vec<(String, String, Flashcard)>>,
    flashcard_writes: AtomicUsize,
    finalized: Mutex<Option<(CourseCompletion, GenerationSummary)>>,
}

impl FakeCourseRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Number of created courses.
    #[must_use]
    pub fn course_count(&self) -> usize {
        self.courses.lock().len()
    }

    /// Ids of created lessons, in creation order.
    #[must_use]
    pub fn lesson_ids(&self) -> Vec<String> {
        self.lessons.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    /// Total content items.
    #[must_use]
    pub fn content_item_count(&self) -> usize {
        self.content_items.lock().len()
    }

    /// Content items of one lesson, in creation order.
    #[must_use]
    pub fn content_items_for(&self, lesson_id: &str) -> Vec<NewContentItem> {
        self.content_items
            .lock()
            .iter()
            .filter(|(owner, _)| owner == lesson_id)
            .map(|(_, item)| item.clone())
            .collect()
    }

    /// Flags of a lesson marked generated.
    #[must_use]
    pub fn lesson_flags(&self, lesson_id: &str) -> Option<LessonFlags> {
        self.generated.lock().get(lesson_id).copied()
    }

    /// Number of saved module assessments.
    #[must_use]
    pub fn assessment_count(&self) -> usize {
        self.assessments.lock().len()
    }

    /// Cards stored for one lesson, in order.
    #[must_use]
    pub fn flashcards_for(&self, lesson_id: &str) -> Vec<Flashcard> {
        self.flashcards
            .lock()
            .iter()
            .filter(|(_, lesson, _)| lesson == lesson_id)
            .map(|(_, _, card)| card.clone())
            .collect()
    }

    /// Number of flashcard batch writes.
    #[must_use]
    pub fn flashcard_writes(&self) -> usize {
        self.flashcard_writes.load(Ordering::SeqCst)
    }

    /// Final status and summary, once finalized.
    #[must_use]
    pub fn finalized(&self) -> Option<(CourseCompletion, GenerationSummary)> {
        self.finalized.lock().clone()
    }
}

#[async_trait]
impl CourseRepository for FakeCourseRepository {
    async fn create_course(&self, course: NewCourse) -> Result<String, PortError> {
        self.courses.lock().push(course);
        Ok(self.next_id("course"))
    }

    async fn create_module(&self, _course_id: &str, module: NewModule) -> Result<String, PortError> {
        let id = self.next_id("module");
        self.modules.lock().push((id.clone(), module));
        Ok(id)
    }

    async fn create_lesson(&self, _module_id: &str, lesson: NewLesson) -> Result<String, PortError> {
        let id = self.next_id("lesson");
        self.lessons.lock().push((id.clone(), lesson));
        Ok(id)
    }

    async fn create_content_item(&self, lesson_id: &str, item: NewContentItem) -> Result<String, PortError> {
        self.content_items.lock().push((lesson_id.to_string(), item));
        Ok(self.next_id("item"))
    }

    async fn create_article(&self, _content_item_id: &str, _body: &str) -> Result<String, PortError> {
        Ok(self.next_id("article"))
    }

    async fn save_quiz(&self, lesson_id: &str, _quiz: &Quiz) -> Result<String, PortError> {
        self.quizzes.lock().push(lesson_id.to_string());
        Ok(self.next_id("quiz"))
    }

    async fn mark_lesson_generated(&self, lesson_id: &str, flags: LessonFlags) -> Result<(), PortError> {
        self.generated.lock().insert(lesson_id.to_string(), flags);
        Ok(())
    }

    async fn save_module_assessment(&self, module_id: &str, _assessment: &ModuleAssessment) -> Result<String, PortError> {
        self.assessments.lock().push(module_id.to_string());
        Ok(self.next_id("assessment"))
    }

    async fn flashcard_count(&self, course_id: &str) -> Result<usize, PortError> {
        Ok(self.flashcards.lock().iter().filter(|(course, _, _)| course == course_id).count())
    }

    async fn save_flashcards(&self, course_id: &str, batch: &[LessonFlashcards]) -> Result<usize, PortError> {
        self.flashcard_writes.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.flashcards.lock();
        let before = stored.len();
        for lesson in batch {
            for card in &lesson.cards {
                stored.push((course_id.to_string(), lesson.lesson_id.clone(), card.clone()));
            }
        }
        Ok(stored.len() - before)
    }

    async fn finalize_course(
        &self,
        _course_id: &str,
        status: CourseCompletion,
        summary: &GenerationSummary,
    ) -> Result<(), PortError> {
        *self.finalized.lock() = Some((status, summary.clone()));
        Ok(())
    }
}

/// Every course collaborator, faked.
#[derive(Debug, Clone, Default)]
pub struct CourseFakes {
    /// Content generator.
    pub generator: Arc<FakeContentGenerator>,
    /// Video search.
    pub videos: Arc<FakeVideoSearch>,
    /// Repository.
    pub repository: Arc<FakeCourseRepository>,
}

impl CourseFakes {
    /// Creates fakes that always succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Port bundle for [`course_pipeline`](crate::course::course_pipeline).
    #[must_use]
    pub fn ports(&self) -> CoursePorts {
        CoursePorts {
            generator: self.generator.clone(),
            videos: self.videos.clone(),
            repository: self.repository.clone(),
        }
    }
}
