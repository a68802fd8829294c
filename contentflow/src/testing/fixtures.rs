//! Ready-made triggers and outlines.

use std::collections::BTreeSet;
use uuid::Uuid;

use crate::context::{RunContext, RunIdentity, StageInputs};
use crate::course::{
    ContentFormat, CourseDuration, CourseGenerationInput, CourseOutline, Difficulty, GenerationRequested,
    LearningArea, LearningGoal, LearningStyle, LessonOutline, ModuleOutline, StructurePreferences,
    UserProfileContext,
};
use crate::errors::MissingInputError;
use crate::ingestion::UploadCompleted;
use crate::run::OwnerRef;

/// Owner used by every fixture.
pub const OWNER_ID: &str = "user-1";

/// An upload of `filename`, fetchable at `https://uploads.example/{filename}`.
#[must_use]
pub fn upload(filename: &str) -> UploadCompleted {
    UploadCompleted {
        document_id: Uuid::new_v4(),
        blob_url: format!("https://uploads.example/{filename}"),
        filename: filename.to_string(),
        owner_id: OWNER_ID.to_string(),
    }
}

/// A valid text-format course request with `modules` × `lessons_per_module` lessons.
#[must_use]
pub fn course_request(modules: u32, lessons_per_module: u32) -> GenerationRequested {
    GenerationRequested {
        request_id: Uuid::new_v4(),
        user_id: OWNER_ID.to_string(),
        input: CourseGenerationInput {
            title: "Rust for Backend Engineers".to_string(),
            description: Some("Ownership, async and services".to_string()),
            goals: vec![LearningGoal::Skill, LearningGoal::Career],
            duration: CourseDuration::OneMonth,
            difficulty: Difficulty::Intermediate,
            format: vec![ContentFormat::Text, ContentFormat::Practical],
            structure: StructurePreferences {
                modules,
                lessons_per_module,
                assessments: false,
                projects: false,
            },
            ai_preferences: None,
            user_profile_context: Some(UserProfileContext {
                learning_area: LearningArea::Technology,
                learning_style: LearningStyle::Reading,
                current_level: Difficulty::Beginner,
            }),
        },
    }
}

/// An outline with ids `module-{m}` and `lesson-{m}-{l}`, counting from one.
#[must_use]
pub fn course_outline(modules: usize, lessons_per_module: usize) -> CourseOutline {
    CourseOutline {
        course_id: "course-1".to_string(),
        title: "Rust for Backend Engineers".to_string(),
        modules: (1..=modules)
            .map(|m| ModuleOutline {
                id: format!("module-{m}"),
                title: format!("Module {m}"),
                description: format!("Module {m} description"),
                order_index: u32::try_from(m).unwrap_or(u32::MAX),
                lessons: (1..=lessons_per_module)
                    .map(|l| LessonOutline {
                        id: format!("lesson-{m}-{l}"),
                        title: format!("Lesson {m}.{l}"),
                        description: format!("Lesson {l} of module {m}"),
                        order_index: u32::try_from(l).unwrap_or(u32::MAX),
                        key_topics: vec![format!("topic {m}.{l}")],
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Projects `required` out of `context` the way a course stage sees it.
///
/// # Errors
///
/// Returns the missing keys if `context` lacks any of `required`.
pub fn stage_inputs(context: &RunContext, required: &[&str]) -> Result<StageInputs, MissingInputError> {
    let identity = RunIdentity::new(
        Uuid::now_v7(),
        "course_generation",
        OwnerRef::CourseGenerationRequest(Uuid::new_v4()),
    );
    let required: BTreeSet<String> = required.iter().map(|k| (*k).to_string()).collect();
    context.project(&identity, "stage", &required, &BTreeSet::new())
}
