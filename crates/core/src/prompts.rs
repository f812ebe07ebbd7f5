//! Prompt templates for the tutor and the quiz workflow.
//!
//! Templates use `{topic}` and `{answers}` placeholders. The defaults can be
//! replaced from a prompts directory by the service.

use std::collections::HashMap;

/// The tutor persona used when the caller does not supply its own.
pub const DEFAULT_TUTOR_PROMPT: &str = "You are a friendly Russian language tutor. Explain the chosen topic in Russian, then ask the student to rephrase the rule. Offer subtle hints that guide toward the correct understanding without revealing the full answer.";

const QUIZ_REQUEST: &str =
    "Составь короткий тест из трех вопросов по теме: {topic}. Ответы не предоставляй.";

const GRADING_REQUEST: &str =
    "Проверь ответы ученика по теме: {topic}.\n{answers}\nДай отзыв на русском.";

/// Directive templates appended to the caller's system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    /// Asks for three questions on `{topic}` without answers.
    pub quiz_request: String,
    /// Asks for feedback on `{answers}` against `{topic}`.
    pub grading_request: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            quiz_request: QUIZ_REQUEST.to_string(),
            grading_request: GRADING_REQUEST.to_string(),
        }
    }
}

impl Prompts {
    /// Builds prompts from a map keyed by file stem, falling back to the
    /// defaults for missing keys.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let pick = |key: &str, fallback: String| {
            map.get(key)
                .map(|s| s.trim_end().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback)
        };
        Self {
            quiz_request: pick("quiz_request", defaults.quiz_request),
            grading_request: pick("grading_request", defaults.grading_request),
        }
    }

    pub fn quiz_instructions(&self, system_prompt: &str, topic: &str) -> String {
        format!(
            "{}\n{}",
            system_prompt,
            self.quiz_request.replace("{topic}", topic)
        )
    }

    pub fn grading_request(&self, topic: &str, answers: &str) -> String {
        // Substituted values are never re-scanned for placeholders.
        self.grading_request
            .split("{answers}")
            .map(|part| part.replace("{topic}", topic))
            .collect::<Vec<_>>()
            .join(answers)
    }
}
