//! Frame decoder: raw inbound text to [`DecodedFrame`].
//!
//! The decoder is a two-mode machine that is reset every time the
//! transport reports `Opened`:
//!
//! ```text
//!   awaiting session ──(valid session envelope)──► established
//!         │                                            │
//!         └─ anything else: CantParseConnectionEvent   └─ events, error envelopes,
//!            (recoverable), stays awaiting                CantParseEvent (informational)
//! ```
//!
//! Error envelopes (`{"error": {...}}`) are recognised in both modes so an
//! authentication rejection sent as the first frame is classified by its
//! code instead of as a parse failure.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{ChatError, ErrorBody, ErrorCode};

/// Event type the backend uses for both the session envelope and liveness frames.
pub const HEALTH_CHECK_EVENT: &str = "health.check";

/// Identifiers of an established session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Server-assigned connection id.
    pub connection_id: String,
    /// Id of the principal the server resolved.
    pub user_id: String,
    /// Full `me` object from the session envelope.
    pub me: serde_json::Value,
}

/// A typed application event received after the session opened.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationEvent {
    /// Event type, e.g. `message.new`.
    pub event_type: String,
    /// Server timestamp, when present and well-formed.
    pub created_at: Option<DateTime<Utc>>,
    /// Connection id echoed by the server, if any.
    pub connection_id: Option<String>,
    /// Complete JSON payload, handed to collaborators as-is.
    pub payload: serde_json::Value,
}

impl ApplicationEvent {
    /// Whether this is a server liveness frame.
    #[must_use]
    pub fn is_health_check(&self) -> bool {
        self.event_type == HEALTH_CHECK_EVENT
    }
}

/// Result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// The mandatory first frame: the session is open.
    SessionEstablished(SessionInfo),
    /// A regular application event.
    ApplicationEvent(ApplicationEvent),
    /// A server error envelope or a local decode failure.
    TransportError(ChatError),
}

/// Minimal envelope shared by every event.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    me: Option<serde_json::Value>,
}

/// Stateful decoder for one physical connection.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    session_seen: bool,
}

impl FrameDecoder {
    /// Create a decoder in "awaiting session" mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return to "awaiting session" mode (called on every transport `Opened`).
    pub fn reset(&mut self) {
        self.session_seen = false;
    }

    /// Whether the session envelope has not been seen yet.
    #[must_use]
    pub fn is_awaiting_session(&self) -> bool {
        !self.session_seen
    }

    /// Decode one raw text frame.
    pub fn decode(&mut self, raw: &str) -> DecodedFrame {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("[Decoder] Frame is not JSON: {}", e);
                return DecodedFrame::TransportError(self.parse_failure(e, true));
            }
        };

        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            return DecodedFrame::TransportError(decode_error_body(error));
        }

        let envelope = match EventEnvelope::deserialize(&value) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::debug!("[Decoder] Frame has no event envelope: {}", e);
                return DecodedFrame::TransportError(self.parse_failure(e, false));
            }
        };

        if self.session_seen {
            return DecodedFrame::ApplicationEvent(ApplicationEvent {
                event_type: envelope.event_type,
                created_at: envelope.created_at.as_deref().and_then(parse_timestamp),
                connection_id: envelope.connection_id,
                payload: value,
            });
        }

        match session_from_envelope(envelope) {
            Some(session) => {
                log::debug!(
                    "[Decoder] Session envelope received (connection_id={})",
                    session.connection_id
                );
                self.session_seen = true;
                DecodedFrame::SessionEstablished(session)
            }
            None => DecodedFrame::TransportError(ChatError::new(
                ErrorCode::CantParseConnectionEvent,
            )),
        }
    }

    fn parse_failure(&self, cause: serde_json::Error, not_json: bool) -> ChatError {
        let code = if !self.session_seen {
            ErrorCode::CantParseConnectionEvent
        } else if not_json {
            ErrorCode::UnableToParseSocketEvent
        } else {
            ErrorCode::CantParseEvent
        };
        ChatError::new(code).caused_by(cause)
    }
}

fn decode_error_body(error: &serde_json::Value) -> ChatError {
    match ErrorBody::deserialize(error) {
        Ok(body) => ChatError::from(body),
        Err(e) => ChatError::new(ErrorCode::NoErrorBody).caused_by(e),
    }
}

fn session_from_envelope(envelope: EventEnvelope) -> Option<SessionInfo> {
    let connection_id = envelope.connection_id?;
    let me = envelope.me?;
    let user_id = me.get("id")?.as_str()?.to_string();
    Some(SessionInfo {
        connection_id,
        user_id,
        me,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Serialize the keep-alive frame sent while connected.
#[must_use]
pub fn encode_keep_alive(connection_id: &str) -> String {
    serde_json::json!({
        "type": HEALTH_CHECK_EVENT,
        "client_id": connection_id,
        "created_at": Utc::now().to_rfc3339(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const SESSION_FRAME: &str = r#"{
        "type": "health.check",
        "connection_id": "6cfffec7-40df-40ac-901a-6ea6c5b7fb83",
        "created_at": "2024-01-01T10:00:00Z",
        "me": {"id": "jc", "name": "JC"}
    }"#;

    fn established_decoder() -> FrameDecoder {
        let mut decoder = FrameDecoder::new();
        assert!(matches!(
            decoder.decode(SESSION_FRAME),
            DecodedFrame::SessionEstablished(_)
        ));
        decoder
    }

    // ========== Awaiting Session Tests ==========

    #[test]
    fn test_first_frame_session_envelope() {
        let mut decoder = FrameDecoder::new();
        match decoder.decode(SESSION_FRAME) {
            DecodedFrame::SessionEstablished(session) => {
                assert_eq!(session.connection_id, "6cfffec7-40df-40ac-901a-6ea6c5b7fb83");
                assert_eq!(session.user_id, "jc");
                assert_eq!(session.me["name"], "JC");
            }
            other => panic!("expected session, got {other:?}"),
        }
        assert!(!decoder.is_awaiting_session());
    }

    #[test]
    fn test_first_frame_without_me_is_connection_parse_error() {
        let mut decoder = FrameDecoder::new();
        let frame = r#"{"type":"health.check","connection_id":"abc"}"#;
        match decoder.decode(frame) {
            DecodedFrame::TransportError(error) => {
                assert_eq!(error.code, ErrorCode::CantParseConnectionEvent);
                assert_eq!(error.kind(), ErrorKind::Recoverable);
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(decoder.is_awaiting_session());
    }

    #[test]
    fn test_first_frame_garbage_stays_awaiting() {
        let mut decoder = FrameDecoder::new();
        match decoder.decode("not json") {
            DecodedFrame::TransportError(error) => {
                assert_eq!(error.code, ErrorCode::CantParseConnectionEvent);
                assert!(error.cause.is_some());
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(decoder.is_awaiting_session());
        assert!(matches!(
            decoder.decode(SESSION_FRAME),
            DecodedFrame::SessionEstablished(_)
        ));
    }

    #[test]
    fn test_error_envelope_before_session_is_classified_by_code() {
        let mut decoder = FrameDecoder::new();
        let frame = r#"{"error":{"code":2,"message":"api key not found","StatusCode":401}}"#;
        match decoder.decode(frame) {
            DecodedFrame::TransportError(error) => {
                assert_eq!(error.code, ErrorCode::ApiKeyNotFound);
                assert_eq!(error.kind(), ErrorKind::Fatal);
                assert_eq!(error.message, "api key not found");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn test_reset_returns_to_awaiting_session() {
        let mut decoder = established_decoder();
        decoder.reset();
        assert!(decoder.is_awaiting_session());
    }

    // ========== Established Tests ==========

    #[test]
    fn test_events_after_session() {
        let mut decoder = established_decoder();
        let frame = r#"{"type":"message.new","cid":"messaging:general","created_at":"2024-01-01T10:00:01.5Z"}"#;
        match decoder.decode(frame) {
            DecodedFrame::ApplicationEvent(event) => {
                assert_eq!(event.event_type, "message.new");
                assert!(event.created_at.is_some());
                assert_eq!(event.payload["cid"], "messaging:general");
                assert!(!event.is_health_check());
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_second_session_envelope_is_plain_health_event() {
        let mut decoder = established_decoder();
        match decoder.decode(SESSION_FRAME) {
            DecodedFrame::ApplicationEvent(event) => assert!(event.is_health_check()),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_event_after_session_is_informational() {
        let mut decoder = established_decoder();
        match decoder.decode(r#"{"no_type": true}"#) {
            DecodedFrame::TransportError(error) => {
                assert_eq!(error.code, ErrorCode::CantParseEvent);
                assert_eq!(error.kind(), ErrorKind::Informational);
            }
            other => panic!("expected error, got {other:?}"),
        }
        match decoder.decode("{{{") {
            DecodedFrame::TransportError(error) => {
                assert_eq!(error.code, ErrorCode::UnableToParseSocketEvent);
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(!decoder.is_awaiting_session());
    }

    #[test]
    fn test_invalid_timestamp_is_dropped_not_fatal() {
        let mut decoder = established_decoder();
        match decoder.decode(r#"{"type":"typing.start","created_at":"yesterday"}"#) {
            DecodedFrame::ApplicationEvent(event) => assert!(event.created_at.is_none()),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_error_envelope_without_body_fields() {
        let mut decoder = established_decoder();
        match decoder.decode(r#"{"error":{"message":"no code"}}"#) {
            DecodedFrame::TransportError(error) => assert_eq!(error.code, ErrorCode::NoErrorBody),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn test_null_error_field_is_not_an_error() {
        let mut decoder = established_decoder();
        assert!(matches!(
            decoder.decode(r#"{"type":"user.updated","error":null}"#),
            DecodedFrame::ApplicationEvent(_)
        ));
    }

    // ========== Keep-alive Tests ==========

    #[test]
    fn test_keep_alive_frame_format() {
        let frame: serde_json::Value =
            serde_json::from_str(&encode_keep_alive("conn-1")).expect("valid json");
        assert_eq!(frame["type"], HEALTH_CHECK_EVENT);
        assert_eq!(frame["client_id"], "conn-1");
        assert!(frame["created_at"].is_string());
    }
}
