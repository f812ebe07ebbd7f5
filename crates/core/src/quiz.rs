//! Quiz Generation and Grading
//!
//! A quiz is generated from the tutoring topic with one completion request
//! and graded with a second one. Both requests are stateless and never touch
//! the realtime session, so they can run alongside it.

use crate::{
    error::QuizError,
    llm_client::{ChatMessage, CompletionClient},
    observer::TutorObserver,
    prompts::Prompts,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Questions, the learner's answers, and the grading feedback.
///
/// `answers` always has exactly one slot per question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Quiz {
    questions: Vec<String>,
    answers: Vec<String>,
    result: String,
}

impl Quiz {
    /// Creates an ungraded quiz with an empty answer per question.
    pub fn new(questions: Vec<String>) -> Self {
        let answers = vec![String::new(); questions.len()];
        Self {
            questions,
            answers,
            result: String::new(),
        }
    }

    /// Builds a quiz from a raw completion reply, one question per
    /// non-blank line.
    pub fn from_reply(reply: &str) -> Self {
        Self::new(
            reply
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn answers(&self) -> &[String] {
        &self.answers
    }

    pub fn result(&self) -> &str {
        &self.result
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Stores the answer for question `index`. Returns `false` when there is
    /// no such question.
    pub fn set_answer(&mut self, index: usize, answer: impl Into<String>) -> bool {
        match self.answers.get_mut(index) {
            Some(slot) => {
                *slot = answer.into();
                true
            }
            None => false,
        }
    }

    pub fn record_result(&mut self, feedback: impl Into<String>) {
        self.result = feedback.into();
    }

    /// Each question followed by its answer, separated by blank lines.
    pub fn graded_content(&self) -> String {
        self.questions
            .iter()
            .zip(&self.answers)
            .map(|(question, answer)| format!("{}\nОтвет: {}", question, answer))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Generates and grades quizzes against a completion endpoint.
pub struct QuizEngine {
    client: Arc<dyn CompletionClient>,
    prompts: Prompts,
    observer: Option<Arc<dyn TutorObserver>>,
}

impl QuizEngine {
    pub fn new(client: Arc<dyn CompletionClient>, prompts: Prompts) -> Self {
        Self {
            client,
            prompts,
            observer: None,
        }
    }

    /// Reports generated quizzes and feedback to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn TutorObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Requests three questions on `topic`.
    ///
    /// A reply with no usable lines yields an empty quiz rather than an
    /// error; the caller decides whether to ask again.
    #[instrument(name = "generate_quiz", skip_all, fields(topic = %topic))]
    pub async fn generate_quiz(
        &self,
        api_key: &str,
        system_prompt: &str,
        topic: &str,
    ) -> Result<Quiz, QuizError> {
        if api_key.is_empty() {
            return Err(QuizError::MissingApiKey);
        }

        let messages = vec![ChatMessage::system(
            self.prompts.quiz_instructions(system_prompt, topic),
        )];
        let reply = self.client.complete(api_key, messages).await?;
        let quiz = Quiz::from_reply(&reply);
        info!(questions = quiz.questions().len(), "Quiz generated");

        if let Some(observer) = &self.observer {
            observer.on_quiz_generated(&quiz);
        }
        Ok(quiz)
    }

    /// Requests feedback on the learner's answers. The reply is returned
    /// verbatim, and may be empty.
    #[instrument(name = "grade_quiz", skip_all, fields(topic = %topic))]
    pub async fn grade_quiz(
        &self,
        api_key: &str,
        system_prompt: &str,
        topic: &str,
        quiz: &Quiz,
    ) -> Result<String, QuizError> {
        if api_key.is_empty() {
            return Err(QuizError::MissingApiKey);
        }

        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(
                self.prompts
                    .grading_request(topic, &quiz.graded_content()),
            ),
        ];
        let feedback = self.client.complete(api_key, messages).await?;
        info!(chars = feedback.chars().count(), "Quiz graded");

        if let Some(observer) = &self.observer {
            observer.on_quiz_graded(&feedback);
        }
        Ok(feedback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompletionRequestError;
    use crate::llm_client::{ChatRole, MockCompletionClient};
    use std::sync::Mutex;

    fn engine(client: MockCompletionClient) -> QuizEngine {
        QuizEngine::new(Arc::new(client), Prompts::default())
    }

    #[derive(Default)]
    struct RecordingObserver {
        generated: Mutex<Vec<Quiz>>,
        graded: Mutex<Vec<String>>,
    }

    impl TutorObserver for RecordingObserver {
        fn on_quiz_generated(&self, quiz: &Quiz) {
            self.generated.lock().unwrap().push(quiz.clone());
        }

        fn on_quiz_graded(&self, feedback: &str) {
            self.graded.lock().unwrap().push(feedback.to_string());
        }
    }

    #[test]
    fn test_from_reply_drops_blank_lines_and_trims() {
        let quiz = Quiz::from_reply("Q1\n\nQ2\nQ3");
        assert_eq!(quiz.questions(), ["Q1", "Q2", "Q3"]);
        assert_eq!(quiz.answers(), ["", "", ""]);
        assert_eq!(quiz.result(), "");

        let quiz = Quiz::from_reply("  1. Первый вопрос  \r\n\t\n2. Второй\n   ");
        assert_eq!(quiz.questions(), ["1. Первый вопрос", "2. Второй"]);
        assert_eq!(quiz.answers().len(), 2);
    }

    #[test]
    fn test_from_reply_empty_is_empty_quiz() {
        let quiz = Quiz::from_reply("\n \n");
        assert!(quiz.is_empty());
        assert!(quiz.answers().is_empty());
    }

    #[test]
    fn test_set_answer_out_of_range_is_rejected() {
        let mut quiz = Quiz::new(vec!["Q1".to_string()]);
        assert!(quiz.set_answer(0, "A1"));
        assert!(!quiz.set_answer(1, "A2"));
        assert_eq!(quiz.answers(), ["A1"]);
    }

    #[test]
    fn test_graded_content_pairs_by_index() {
        let mut quiz = Quiz::new(vec!["Q1".to_string(), "Q2".to_string()]);
        quiz.set_answer(0, "A1");
        quiz.set_answer(1, "A2");
        assert_eq!(quiz.graded_content(), "Q1\nОтвет: A1\n\nQ2\nОтвет: A2");
    }

    #[tokio::test]
    async fn test_generate_quiz_sends_single_system_message() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .withf(|key: &str, messages: &Vec<ChatMessage>| {
                key == "sk-test"
                    && messages.len() == 1
                    && messages[0].role == ChatRole::System
                    && messages[0].content.starts_with("Tutor prompt\n")
                    && messages[0].content.contains("по теме: Падежи.")
                    && messages[0].content.contains("Ответы не предоставляй.")
            })
            .times(1)
            .returning(|_, _| Ok("Q1\n\nQ2\nQ3".to_string()));

        let quiz = engine(client)
            .generate_quiz("sk-test", "Tutor prompt", "Падежи")
            .await
            .unwrap();
        assert_eq!(quiz.questions(), ["Q1", "Q2", "Q3"]);
        assert_eq!(quiz.answers(), ["", "", ""]);
    }

    #[tokio::test]
    async fn test_generate_quiz_notifies_observer() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .returning(|_, _| Ok("Q1".to_string()));
        let observer = Arc::new(RecordingObserver::default());
        let engine = engine(client).with_observer(observer.clone());

        engine.generate_quiz("k", "p", "t").await.unwrap();
        let generated = observer.generated.lock().unwrap();
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].questions(), ["Q1"]);
    }

    #[tokio::test]
    async fn test_generate_quiz_empty_reply_is_not_an_error() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .returning(|_, _| Ok(String::new()));

        let quiz = engine(client).generate_quiz("k", "p", "t").await.unwrap();
        assert!(quiz.is_empty());
    }

    #[tokio::test]
    async fn test_generate_quiz_without_key_makes_no_request() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().never();

        let err = engine(client).generate_quiz("", "p", "t").await.unwrap_err();
        assert!(matches!(err, QuizError::MissingApiKey));
    }

    #[tokio::test]
    async fn test_generate_quiz_propagates_request_failure() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().returning(|_, _| {
            Err(CompletionRequestError::Status {
                status: 500,
                body: String::new(),
            })
        });
        let observer = Arc::new(RecordingObserver::default());
        let engine = engine(client).with_observer(observer.clone());

        let err = engine.generate_quiz("k", "p", "t").await.unwrap_err();
        assert!(matches!(
            err,
            QuizError::Completion(CompletionRequestError::Status { status: 500, .. })
        ));
        assert!(observer.generated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grade_quiz_sends_questions_with_answers() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .withf(|_key: &str, messages: &Vec<ChatMessage>| {
                messages.len() == 2
                    && messages[0] == ChatMessage::system("Tutor prompt")
                    && messages[1].role == ChatRole::User
                    && messages[1]
                        .content
                        .contains("Q1\nОтвет: A1\n\nQ2\nОтвет: A2")
                    && messages[1].content.contains("по теме: Падежи.")
            })
            .times(1)
            .returning(|_, _| Ok("Молодец!".to_string()));

        let mut quiz = Quiz::new(vec!["Q1".to_string(), "Q2".to_string()]);
        quiz.set_answer(0, "A1");
        quiz.set_answer(1, "A2");

        let feedback = engine(client)
            .grade_quiz("sk-test", "Tutor prompt", "Падежи", &quiz)
            .await
            .unwrap();
        assert_eq!(feedback, "Молодец!");
    }

    #[tokio::test]
    async fn test_grade_quiz_empty_reply_is_valid_feedback() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .returning(|_, _| Ok(String::new()));
        let observer = Arc::new(RecordingObserver::default());
        let engine = engine(client).with_observer(observer.clone());

        let feedback = engine
            .grade_quiz("k", "p", "t", &Quiz::new(vec!["Q1".to_string()]))
            .await
            .unwrap();
        assert_eq!(feedback, "");
        assert_eq!(observer.graded.lock().unwrap().as_slice(), [String::new()]);
    }

    #[tokio::test]
    async fn test_grade_quiz_failure_leaves_quiz_untouched() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().returning(|_, _| {
            Err(CompletionRequestError::Status {
                status: 429,
                body: "slow down".to_string(),
            })
        });

        let mut quiz = Quiz::new(vec!["Q1".to_string()]);
        quiz.set_answer(0, "A1");
        quiz.record_result("previous feedback");
        let before = quiz.clone();

        let result = engine(client).grade_quiz("k", "p", "t", &quiz).await;
        assert!(result.is_err());
        assert_eq!(quiz, before);
    }
}
