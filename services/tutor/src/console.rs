//! Terminal rendering and command parsing for the `tutor` binary.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use tutor_core::{InboundEvent, ProtocolEvent, Quiz, SessionState, TutorObserver};

/// One line of learner input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Topic(String),
    Quiz,
    /// Answer for a zero-based question index.
    Answer { index: usize, text: String },
    Grade,
    Quit,
    /// Anything that is not a command goes to the tutor.
    Say(String),
    /// A recognised command with bad arguments, carrying its usage text.
    Invalid(&'static str),
}

impl Command {
    /// Parses one input line. Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        let command = match head {
            "/start" => Self::Start,
            "/stop" => Self::Stop,
            "/quiz" => Self::Quiz,
            "/grade" => Self::Grade,
            "/quit" | "/exit" => Self::Quit,
            "/topic" if rest.is_empty() => Self::Invalid("/topic <text>"),
            "/topic" => Self::Topic(rest.to_string()),
            "/answer" => Self::parse_answer(rest),
            _ => Self::Say(line.to_string()),
        };
        Some(command)
    }

    fn parse_answer(rest: &str) -> Self {
        const USAGE: &str = "/answer <question number> <text>";
        let Some((number, text)) = rest.split_once(char::is_whitespace) else {
            return Self::Invalid(USAGE);
        };
        match number.parse::<usize>() {
            Ok(n) if n >= 1 => Self::Answer {
                index: n - 1,
                text: text.trim().to_string(),
            },
            _ => Self::Invalid(USAGE),
        }
    }
}

/// Numbered questions with the current answers, for display.
pub fn format_quiz(quiz: &Quiz) -> String {
    if quiz.is_empty() {
        return "No questions were generated. Try /quiz again.".to_string();
    }
    let mut out = String::new();
    for (i, (question, answer)) in quiz.questions().iter().zip(quiz.answers()).enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, question));
        if !answer.is_empty() {
            out.push_str(&format!("   > {}\n", answer));
        }
    }
    out
}

/// Renders session and quiz notifications to a writer.
pub struct ConsoleObserver<W: Write + Send> {
    out: Mutex<W>,
}

impl ConsoleObserver<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleObserver<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        // A closed terminal leaves nothing to report to.
        let _ = out.write_all(text.as_bytes()).and_then(|_| out.flush());
    }
}

impl<W: Write + Send> TutorObserver for ConsoleObserver<W> {
    fn on_state_changed(&self, state: SessionState) {
        let label = match state {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "connecting",
            SessionState::Active => "live",
        };
        self.write(&format!("[session {}]\n", label));
    }

    fn on_event(&self, event: &InboundEvent) {
        match event {
            InboundEvent::Event(ProtocolEvent::TextDelta { delta })
            | InboundEvent::Event(ProtocolEvent::TranscriptDelta { delta }) => self.write(delta),
            InboundEvent::Event(ProtocolEvent::ResponseDone) => self.write("\n"),
            InboundEvent::Event(ProtocolEvent::InputTranscript { transcript }) => {
                self.write(&format!("you: {}\n", transcript.trim()))
            }
            InboundEvent::Event(ProtocolEvent::ServerError { message }) => {
                self.write(&format!("[server error] {}\n", message))
            }
            InboundEvent::Event(other) => debug!(event = ?other, "Unrendered event"),
            InboundEvent::Unknown(unknown) => debug!(kind = ?unknown.kind, "Ignoring unknown event"),
        }
    }

    fn on_quiz_generated(&self, quiz: &Quiz) {
        self.write(&format_quiz(quiz));
    }

    fn on_quiz_graded(&self, feedback: &str) {
        if feedback.is_empty() {
            self.write("[no feedback returned]\n");
        } else {
            self.write(&format!("{}\n", feedback));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::UnknownEvent;

    fn rendered(f: impl FnOnce(&ConsoleObserver<Vec<u8>>)) -> String {
        let observer = ConsoleObserver::new(Vec::new());
        f(&observer);
        String::from_utf8(observer.into_inner()).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("  /stop  "), Some(Command::Stop));
        assert_eq!(Command::parse("/quiz"), Some(Command::Quiz));
        assert_eq!(Command::parse("/grade"), Some(Command::Grade));
        assert_eq!(Command::parse("/quit"), Some(Command::Quit));
        assert_eq!(
            Command::parse("/topic Глаголы движения"),
            Some(Command::Topic("Глаголы движения".to_string()))
        );
    }

    #[test]
    fn test_parse_blank_and_plain_text() {
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("   \t"), None);
        assert_eq!(
            Command::parse("Я иду в школу"),
            Some(Command::Say("Я иду в школу".to_string()))
        );
        assert_eq!(
            Command::parse("/shrug ok"),
            Some(Command::Say("/shrug ok".to_string()))
        );
    }

    #[test]
    fn test_parse_answer_is_one_based() {
        assert_eq!(
            Command::parse("/answer 2 в школу"),
            Some(Command::Answer {
                index: 1,
                text: "в школу".to_string()
            })
        );
        assert!(matches!(Command::parse("/answer 0 x"), Some(Command::Invalid(_))));
        assert!(matches!(Command::parse("/answer two x"), Some(Command::Invalid(_))));
        assert!(matches!(Command::parse("/answer 1"), Some(Command::Invalid(_))));
        assert!(matches!(Command::parse("/topic"), Some(Command::Invalid(_))));
    }

    #[test]
    fn test_format_quiz_numbers_questions() {
        let mut quiz = Quiz::from_reply("Q1\nQ2");
        quiz.set_answer(1, "A2");
        assert_eq!(format_quiz(&quiz), "1. Q1\n2. Q2\n   > A2\n");
        assert!(format_quiz(&Quiz::default()).contains("/quiz"));
    }

    #[test]
    fn test_streams_deltas_until_done() {
        let out = rendered(|o| {
            o.on_event(&InboundEvent::Event(ProtocolEvent::TextDelta {
                delta: "При".to_string(),
            }));
            o.on_event(&InboundEvent::Event(ProtocolEvent::TranscriptDelta {
                delta: "вет".to_string(),
            }));
            o.on_event(&InboundEvent::Event(ProtocolEvent::ResponseDone));
        });
        assert_eq!(out, "Привет\n");
    }

    #[test]
    fn test_unknown_and_unrendered_events_print_nothing() {
        let out = rendered(|o| {
            o.on_event(&InboundEvent::Unknown(UnknownEvent {
                kind: Some("rate_limits.updated".to_string()),
                raw: "{}".to_string(),
            }));
            o.on_event(&InboundEvent::Event(ProtocolEvent::SessionCreated));
        });
        assert_eq!(out, "");
    }

    #[test]
    fn test_state_and_feedback_rendering() {
        let out = rendered(|o| {
            o.on_state_changed(SessionState::Active);
            o.on_quiz_graded("");
            o.on_quiz_graded("Хорошо");
        });
        assert_eq!(out, "[session live]\n[no feedback returned]\nХорошо\n");
    }
}
