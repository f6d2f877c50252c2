//! Event schema pushed to UI consumers of a live translation session.
//!
//! Every state change the controller makes to the transcript is mirrored as
//! a [`SessionEvent`], so a UI bridge (WebSocket, Tauri, terminal) can stay
//! in sync without polling [`snapshot`](super::SessionController::snapshot).
//! Events serialize to tagged JSON objects.

use serde::Serialize;

use super::registry::TranscriptEntry;

/// Messages broadcast by a [`SessionController`](super::SessionController).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// A session started listening.
    #[serde(rename = "session_started")]
    SessionStarted {
        #[serde(rename = "sessionId")]
        session_id: String,
        generation: u64,
    },

    /// An utterance was appended to the transcript.
    #[serde(rename = "utterance_appended")]
    UtteranceAppended {
        #[serde(rename = "sessionId")]
        session_id: String,
        entry: TranscriptEntry,
    },

    /// An existing transcript entry changed (translation, read state, failure).
    #[serde(rename = "utterance_annotated")]
    UtteranceAnnotated {
        #[serde(rename = "sessionId")]
        session_id: String,
        entry: TranscriptEntry,
    },

    /// The translation service entered or left degraded (rate-limited) mode.
    #[serde(rename = "degraded_changed")]
    DegradedChanged {
        #[serde(rename = "sessionId")]
        session_id: String,
        degraded: bool,
    },

    /// The session was torn down.
    #[serde(rename = "session_ended")]
    SessionEnded {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "totalUtterances")]
        total_utterances: u64,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::UtteranceAppended { session_id, .. }
            | Self::UtteranceAnnotated { session_id, .. }
            | Self::DegradedChanged { session_id, .. }
            | Self::SessionEnded { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::registry::UtterancePhase;
    use crate::voice::Utterance;
    use chrono::Utc;

    #[test]
    fn annotated_event_json_shape() {
        let event = SessionEvent::UtteranceAnnotated {
            session_id: "s1".into(),
            entry: TranscriptEntry {
                utterance: Utterance {
                    id: 3,
                    speaker_id: "spk".into(),
                    speaker_name: "Ana".into(),
                    text: "Hello".into(),
                    arrived_at: Utc::now(),
                },
                translated_text: Some("Hola".into()),
                is_being_read: true,
                failed: false,
                phase: UtterancePhase::Scheduled,
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "utterance_annotated");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["entry"]["utterance"]["speakerName"], "Ana");
        assert_eq!(json["entry"]["translatedText"], "Hola");
        assert_eq!(json["entry"]["isBeingRead"], true);
        assert!(json["entry"].get("translated_text").is_none());
        assert_eq!(json["entry"]["phase"], "scheduled");
    }

    #[test]
    fn degraded_event_json_shape() {
        let event = SessionEvent::DegradedChanged {
            session_id: "s1".into(),
            degraded: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"degraded_changed\""));
        assert!(json.contains("\"degraded\":true"));
        assert_eq!(event.session_id(), "s1");
    }
}
