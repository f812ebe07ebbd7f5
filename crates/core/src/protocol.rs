//! Defines the JSON event protocol spoken over the `oai-events` data channel.
//!
//! `ProtocolEvent` is the typed view used by the rest of the crate. The
//! private `wire` module holds the exact serde shapes the remote endpoint
//! expects; `MessageRouter` converts between the two.

use serde_json::Value;

/// A typed protocol event, outbound or inbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// Primes the remote model with tutoring instructions.
    SessionInstruction { instructions: String },
    /// A text turn from the learner.
    UserMessage { text: String },
    /// Explicit trigger asking the model to reply.
    ResponseRequest,
    /// The remote side acknowledged the session.
    SessionCreated,
    /// A chunk of the model's text reply.
    TextDelta { delta: String },
    /// A chunk of the transcript of the model's spoken reply.
    TranscriptDelta { delta: String },
    /// The final transcript of what the learner said.
    InputTranscript { transcript: String },
    /// The model finished its reply.
    ResponseDone,
    /// The remote side reported an error.
    ServerError { message: String },
}

/// A payload that did not match any known event shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEvent {
    /// The `type` field, when the payload was a JSON object carrying one.
    pub kind: Option<String>,
    pub raw: String,
}

/// The result of decoding one inbound channel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Event(ProtocolEvent),
    Unknown(UnknownEvent),
}

mod wire {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug)]
    #[serde(tag = "type")]
    pub(super) enum WireEvent {
        #[serde(rename = "response.create")]
        ResponseCreate {
            #[serde(default, skip_serializing_if = "Option::is_none")]
            response: Option<ResponseConfig>,
        },
        #[serde(rename = "conversation.item.create")]
        ConversationItemCreate { item: ConversationItem },
        #[serde(rename = "session.created")]
        SessionCreated {},
        #[serde(rename = "response.text.delta")]
        TextDelta { delta: String },
        #[serde(rename = "response.audio_transcript.delta")]
        AudioTranscriptDelta { delta: String },
        #[serde(rename = "conversation.item.input_audio_transcription.completed")]
        InputTranscriptionCompleted { transcript: String },
        #[serde(rename = "response.done")]
        ResponseDone {},
        #[serde(rename = "error")]
        Error { error: ErrorDetail },
    }

    #[derive(Serialize, Deserialize, Debug)]
    pub(super) struct ResponseConfig {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub instructions: Option<String>,
    }

    #[derive(Serialize, Deserialize, Debug)]
    pub(super) struct ConversationItem {
        #[serde(rename = "type")]
        pub kind: String,
        pub role: String,
        pub content: Vec<ContentPart>,
    }

    #[derive(Serialize, Deserialize, Debug)]
    pub(super) struct ContentPart {
        #[serde(rename = "type")]
        pub kind: String,
        #[serde(default)]
        pub text: Option<String>,
    }

    #[derive(Serialize, Deserialize, Debug)]
    pub(super) struct ErrorDetail {
        pub message: String,
    }
}

use wire::{ContentPart, ConversationItem, ErrorDetail, ResponseConfig, WireEvent};

/// Stateless codec between `ProtocolEvent` values and channel payloads.
pub struct MessageRouter;

impl MessageRouter {
    /// Serializes an event into the JSON text sent over the channel.
    pub fn encode(event: &ProtocolEvent) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Self::to_wire(event))
    }

    /// Parses an inbound payload. Unrecognized shapes become `Unknown`.
    pub fn decode(raw: &str) -> InboundEvent {
        match serde_json::from_str::<WireEvent>(raw)
            .ok()
            .and_then(Self::from_wire)
        {
            Some(event) => InboundEvent::Event(event),
            None => {
                let kind = serde_json::from_str::<Value>(raw).ok().and_then(|value| {
                    value
                        .get("type")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                });
                InboundEvent::Unknown(UnknownEvent {
                    kind,
                    raw: raw.to_string(),
                })
            }
        }
    }

    fn to_wire(event: &ProtocolEvent) -> WireEvent {
        match event {
            ProtocolEvent::SessionInstruction { instructions } => WireEvent::ResponseCreate {
                response: Some(ResponseConfig {
                    instructions: Some(instructions.clone()),
                }),
            },
            ProtocolEvent::UserMessage { text } => WireEvent::ConversationItemCreate {
                item: ConversationItem {
                    kind: "message".to_string(),
                    role: "user".to_string(),
                    content: vec![ContentPart {
                        kind: "input_text".to_string(),
                        text: Some(text.clone()),
                    }],
                },
            },
            ProtocolEvent::ResponseRequest => WireEvent::ResponseCreate { response: None },
            ProtocolEvent::SessionCreated => WireEvent::SessionCreated {},
            ProtocolEvent::TextDelta { delta } => WireEvent::TextDelta {
                delta: delta.clone(),
            },
            ProtocolEvent::TranscriptDelta { delta } => WireEvent::AudioTranscriptDelta {
                delta: delta.clone(),
            },
            ProtocolEvent::InputTranscript { transcript } => {
                WireEvent::InputTranscriptionCompleted {
                    transcript: transcript.clone(),
                }
            }
            ProtocolEvent::ResponseDone => WireEvent::ResponseDone {},
            ProtocolEvent::ServerError { message } => WireEvent::Error {
                error: ErrorDetail {
                    message: message.clone(),
                },
            },
        }
    }

    fn from_wire(event: WireEvent) -> Option<ProtocolEvent> {
        let event = match event {
            WireEvent::ResponseCreate {
                response:
                    Some(ResponseConfig {
                        instructions: Some(instructions),
                    }),
            } => ProtocolEvent::SessionInstruction { instructions },
            WireEvent::ResponseCreate { .. } => ProtocolEvent::ResponseRequest,
            WireEvent::ConversationItemCreate { item } => {
                if item.kind != "message" || item.role != "user" {
                    return None;
                }
                let text: String = item
                    .content
                    .into_iter()
                    .filter(|part| part.kind == "input_text")
                    .filter_map(|part| part.text)
                    .collect();
                ProtocolEvent::UserMessage { text }
            }
            WireEvent::SessionCreated {} => ProtocolEvent::SessionCreated,
            WireEvent::TextDelta { delta } => ProtocolEvent::TextDelta { delta },
            WireEvent::AudioTranscriptDelta { delta } => ProtocolEvent::TranscriptDelta { delta },
            WireEvent::InputTranscriptionCompleted { transcript } => {
                ProtocolEvent::InputTranscript { transcript }
            }
            WireEvent::ResponseDone {} => ProtocolEvent::ResponseDone,
            WireEvent::Error { error } => ProtocolEvent::ServerError {
                message: error.message,
            },
        };
        Some(event)
    }
}
