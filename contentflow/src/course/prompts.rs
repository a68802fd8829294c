//! Generator prompts and the schemas they are paired with.
//!
//! Every schema carries a `title` naming the contract, so a generator can
//! tell the requests apart.

use serde_json::{json, Value};

use super::model::{CourseSettings, LessonOutline, LessonUnit, ModuleOutline};

/// Schema title of [`ProposedStructure`](super::ProposedStructure).
pub const STRUCTURE_SCHEMA: &str = "CourseStructure";
/// Schema title of [`LessonContent`](super::LessonContent).
pub const LESSON_SCHEMA: &str = "LessonContent";
/// Schema title of [`ModuleAssessment`](super::ModuleAssessment).
pub const ASSESSMENT_SCHEMA: &str = "ModuleAssessment";
/// Schema title of [`GeneratedFlashcards`](super::GeneratedFlashcards).
pub const FLASHCARD_SCHEMA: &str = "Flashcards";

fn strings() -> Value {
    json!({"type": "array", "items": {"type": "string"}})
}

/// Schema of the course outline.
#[must_use]
pub fn structure_schema() -> Value {
    json!({
        "title": STRUCTURE_SCHEMA,
        "type": "object",
        "required": ["title", "description", "modules"],
        "properties": {
            "title": {"type": "string"},
            "description": {"type": "string"},
            "estimatedTotalDuration": {"type": "string"},
            "prerequisites": strings(),
            "learningObjectives": strings(),
            "modules": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["title", "description", "orderIndex", "lessons"],
                    "properties": {
                        "title": {"type": "string"},
                        "description": {"type": "string"},
                        "orderIndex": {"type": "integer"},
                        "estimatedDuration": {"type": "string"},
                        "learningObjectives": strings(),
                        "lessons": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["title", "description", "orderIndex"],
                                "properties": {
                                    "title": {"type": "string"},
                                    "description": {"type": "string"},
                                    "orderIndex": {"type": "integer"},
                                    "estimatedDuration": {"type": "string"},
                                    "keyTopics": strings(),
                                },
                            },
                        },
                    },
                },
            },
        },
    })
}

/// Schema of one lesson's content.
#[must_use]
pub fn lesson_schema() -> Value {
    json!({
        "title": LESSON_SCHEMA,
        "type": "object",
        "required": ["summary", "content", "quiz"],
        "properties": {
            "summary": {"type": "string"},
            "content": {"type": "string"},
            "keyTopics": strings(),
            "learningObjectives": strings(),
            "quiz": {
                "type": "object",
                "required": ["title", "questions"],
                "properties": {
                    "title": {"type": "string"},
                    "questions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["question", "questionType", "correctAnswer"],
                            "properties": {
                                "question": {"type": "string"},
                                "questionType": {"enum": ["multiple_choice", "true_false", "short_answer"]},
                                "options": strings(),
                                "correctAnswer": {"type": "string"},
                            },
                        },
                    },
                },
            },
            "examples": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["title", "content", "type"],
                    "properties": {
                        "title": {"type": "string"},
                        "content": {"type": "string"},
                        "type": {"enum": ["practical", "theoretical", "real_world"]},
                    },
                },
            },
        },
    })
}

/// Schema of one module's assessment.
#[must_use]
pub fn assessment_schema() -> Value {
    json!({
        "title": ASSESSMENT_SCHEMA,
        "type": "object",
        "required": ["moduleQuiz"],
        "properties": {
            "moduleQuiz": {
                "type": "object",
                "required": ["title", "description", "questions"],
                "properties": {
                    "title": {"type": "string"},
                    "description": {"type": "string"},
                    "questions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["type", "question"],
                            "properties": {
                                "type": {"enum": ["multiple_choice", "true_false", "short_answer", "essay"]},
                                "question": {"type": "string"},
                                "options": strings(),
                                "correct": {"type": "string"},
                                "explanation": {"type": "string"},
                                "sampleAnswer": {"type": "string"},
                                "points": {"type": "integer"},
                            },
                        },
                    },
                },
            },
            "practicalExercises": {"type": "array"},
            "projectIdeas": {"type": "array"},
        },
    })
}

/// Schema of one lesson's flashcards.
#[must_use]
pub fn flashcard_schema() -> Value {
    json!({
        "title": FLASHCARD_SCHEMA,
        "type": "object",
        "required": ["flashcards"],
        "properties": {
            "flashcards": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["front", "back"],
                    "properties": {
                        "front": {"type": "string"},
                        "back": {"type": "string"},
                    },
                },
            },
        },
    })
}

fn join<T: ToString>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Prompt for the course outline.
#[must_use]
pub fn structure_prompt(settings: &CourseSettings) -> String {
    let profile = &settings.user_profile_context;
    let prefs = &settings.ai_preferences;
    format!(
        "Design a course outline.\n\
         Title: {title}\n\
         Description: {description}\n\
         Learning area: {area}\n\
         Difficulty: {difficulty}\n\
         Duration: {duration}\n\
         Goals: {goals}\n\
         Learning style: {style:?}\n\
         Current level: {level}\n\
         Preferred formats: {formats}\n\
         Modules: {modules}\n\
         Lessons per module: {lessons}\n\
         Include assessments: {assessments}\n\
         Include projects: {projects}\n\
         Tone: {tone:?}\n\
         Interactivity: {interactivity:?}\n\
         Examples: {examples}\n\
         Pacing: {pacing}",
        title = settings.title,
        description = settings.description.as_deref().unwrap_or("none"),
        area = profile.learning_area,
        difficulty = settings.difficulty,
        duration = settings.duration,
        goals = join(&settings.goals),
        style = profile.learning_style,
        level = profile.current_level,
        formats = join(&settings.format),
        modules = settings.structure.modules,
        lessons = settings.structure.lessons_per_module,
        assessments = settings.structure.assessments,
        projects = settings.structure.projects,
        tone = prefs.tone,
        interactivity = prefs.interactivity,
        examples = prefs.examples,
        pacing = prefs.pacing,
    )
}

/// Prompt for one lesson's content.
#[must_use]
pub fn lesson_prompt(settings: &CourseSettings, unit: &LessonUnit) -> String {
    format!(
        "Write the lesson \"{lesson}\" of module \"{module}\" in the course \"{course}\".\n\
         Lesson description: {description}\n\
         Key topics: {topics}\n\
         Difficulty: {difficulty}\n\
         Examples: {examples}\n\
         Pacing: {pacing}\n\
         Include a summary, the full lesson text, a short quiz and worked examples.",
        lesson = unit.lesson.title,
        module = unit.module_title,
        course = settings.title,
        description = unit.lesson.description,
        topics = unit.lesson.key_topics.join(", "),
        difficulty = settings.difficulty,
        examples = settings.ai_preferences.examples,
        pacing = settings.ai_preferences.pacing,
    )
}

/// Prompt for one module's assessment.
#[must_use]
pub fn assessment_prompt(settings: &CourseSettings, module: &ModuleOutline) -> String {
    let lessons: Vec<&str> = module.lessons.iter().map(|l| l.title.as_str()).collect();
    format!(
        "Create assessments for module \"{module}\" of the course \"{course}\".\n\
         Lessons: {lessons}\n\
         Difficulty: {difficulty}\n\
         Provide a module quiz, practical exercises{projects}.",
        module = module.title,
        course = settings.title,
        lessons = lessons.join(", "),
        difficulty = settings.difficulty,
        projects = if settings.structure.projects { " and project ideas" } else { "" },
    )
}

/// Prompt for one lesson's flashcards.
#[must_use]
pub fn flashcard_prompt(settings: &CourseSettings, lesson: &LessonOutline) -> String {
    format!(
        "Write flashcards for the lesson \"{lesson}\" in the course \"{course}\".\n\
         Lesson description: {description}\n\
         Key topics: {topics}\n\
         Difficulty: {difficulty}\n\
         Each card has a question on the front and a short answer on the back.",
        lesson = lesson.title,
        course = settings.title,
        description = lesson.description,
        topics = lesson.key_topics.join(", "),
        difficulty = settings.difficulty,
    )
}

/// Search query for a lesson video.
#[must_use]
pub fn video_query(settings: &CourseSettings, unit: &LessonUnit) -> String {
    format!(
        "{} {} {} {} tutorial",
        unit.lesson.title, unit.module_title, settings.user_profile_context.learning_area, settings.difficulty
    )
}
