//! Error types and classification for the socket connection.
//!
//! Every error produced while talking to the backend is a [`ChatError`]
//! carrying an [`ErrorCode`]. The code alone decides how the connection
//! reacts, via [`ChatError::kind`]:
//!
//! ```text
//! ErrorKind::Fatal          -> Disconnected::Permanent, no automatic retry
//! ErrorKind::Recoverable    -> Disconnected::Temporary, backoff + retry
//! ErrorKind::Informational  -> reported to observers only
//! ```
//!
//! Observers see every error through `on_error`, regardless of kind.
//!
//! Rust guideline compliant 2026-02

use serde::Deserialize;

/// Numeric error codes shared with the backend.
///
/// Codes below 1000 are sent by the server inside an error envelope.
/// Codes from 1000 upward are produced locally by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The API key is unknown to the backend.
    ApiKeyNotFound,
    /// The connect payload failed server-side validation.
    InputError,
    /// Generic authentication failure.
    AuthenticationError,
    /// The token has expired and must be refreshed.
    TokenExpired,
    /// The token is not valid for this application.
    TokenNotValid,
    /// The token's issued-at/expiry dates are inconsistent.
    TokenDateIncorrect,
    /// The token signature does not match.
    TokenSignatureIncorrect,
    /// Underlying network request failed.
    NetworkFailed,
    /// A frame could not be parsed.
    ParserError,
    /// The socket was closed without a client request.
    SocketClosed,
    /// The socket failed (I/O error, handshake failure).
    SocketFailure,
    /// The first frame was not a valid session envelope.
    CantParseConnectionEvent,
    /// An application event could not be parsed.
    CantParseEvent,
    /// The token supplied by the caller is malformed.
    InvalidToken,
    /// No token was supplied for a non-anonymous principal.
    UndefinedToken,
    /// The frame was not valid JSON at all.
    UnableToParseSocketEvent,
    /// An error envelope arrived without an error body.
    NoErrorBody,
    /// An operation did not complete in time.
    Timeout,
    /// Any code this client does not know about.
    Other(u32),
}

impl ErrorCode {
    /// Map a numeric code received from the wire.
    #[must_use]
    pub fn from_code(code: u32) -> Self {
        match code {
            2 => Self::ApiKeyNotFound,
            4 => Self::InputError,
            5 => Self::AuthenticationError,
            40 => Self::TokenExpired,
            41 => Self::TokenNotValid,
            42 => Self::TokenDateIncorrect,
            43 => Self::TokenSignatureIncorrect,
            1000 => Self::NetworkFailed,
            1001 => Self::ParserError,
            1002 => Self::SocketClosed,
            1003 => Self::SocketFailure,
            1004 => Self::CantParseConnectionEvent,
            1005 => Self::CantParseEvent,
            1006 => Self::InvalidToken,
            1007 => Self::UndefinedToken,
            1008 => Self::UnableToParseSocketEvent,
            1009 => Self::NoErrorBody,
            1010 => Self::Timeout,
            other => Self::Other(other),
        }
    }

    /// Numeric value of this code.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::ApiKeyNotFound => 2,
            Self::InputError => 4,
            Self::AuthenticationError => 5,
            Self::TokenExpired => 40,
            Self::TokenNotValid => 41,
            Self::TokenDateIncorrect => 42,
            Self::TokenSignatureIncorrect => 43,
            Self::NetworkFailed => 1000,
            Self::ParserError => 1001,
            Self::SocketClosed => 1002,
            Self::SocketFailure => 1003,
            Self::CantParseConnectionEvent => 1004,
            Self::CantParseEvent => 1005,
            Self::InvalidToken => 1006,
            Self::UndefinedToken => 1007,
            Self::UnableToParseSocketEvent => 1008,
            Self::NoErrorBody => 1009,
            Self::Timeout => 1010,
            Self::Other(code) => code,
        }
    }

    /// Default human-readable description for locally produced errors.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::ApiKeyNotFound => "API key not found",
            Self::InputError => "Input validation failed",
            Self::AuthenticationError => "Authentication failed",
            Self::TokenExpired => "Token expired",
            Self::TokenNotValid => "Token not valid",
            Self::TokenDateIncorrect => "Token date incorrect",
            Self::TokenSignatureIncorrect => "Token signature incorrect",
            Self::NetworkFailed => "Network request failed",
            Self::ParserError => "Unable to parse data",
            Self::SocketClosed => "Server closed connection",
            Self::SocketFailure => "Socket failure",
            Self::CantParseConnectionEvent => "Unable to parse connection event",
            Self::CantParseEvent => "Unable to parse event",
            Self::InvalidToken => "Invalid token",
            Self::UndefinedToken => "No token defined for the user",
            Self::UnableToParseSocketEvent => "Socket event payload either invalid or null",
            Self::NoErrorBody => "No error body. See http status code",
            Self::Timeout => "Operation timed out",
            Self::Other(_) => "Unknown error",
        }
    }
}

/// How an error affects the connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unrecoverable: only an explicit caller-initiated connect can recover.
    Fatal,
    /// Transient: automatic reconnection with backoff is allowed.
    Recoverable,
    /// Reported to observers without any state transition.
    Informational,
}

/// An error observed on the socket connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatError {
    /// Classified error code.
    pub code: ErrorCode,
    /// Human-readable message (server-provided when available).
    pub message: String,
    /// HTTP-like status code from the server envelope, if any.
    pub status_code: Option<u16>,
    /// Description of the underlying cause (I/O error text, parse error).
    pub cause: Option<String>,
}

impl ChatError {
    /// Create an error with the code's default description.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.description().to_string(),
            status_code: None,
            cause: None,
        }
    }

    /// Create an error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::new(code)
        }
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn caused_by(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.code {
            ErrorCode::ApiKeyNotFound
            | ErrorCode::InputError
            | ErrorCode::AuthenticationError
            | ErrorCode::TokenNotValid
            | ErrorCode::TokenSignatureIncorrect
            | ErrorCode::InvalidToken
            | ErrorCode::UndefinedToken => ErrorKind::Fatal,
            ErrorCode::CantParseEvent | ErrorCode::UnableToParseSocketEvent => {
                ErrorKind::Informational
            }
            _ => ErrorKind::Recoverable,
        }
    }

    /// Whether the server rejected the token (codes 40-43).
    #[must_use]
    pub fn is_authentication_error(&self) -> bool {
        matches!(self.code.code(), 40..=43)
    }
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)?;
        if let Some(status) = self.status_code {
            write!(f, " (status {status})")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ChatError {}

/// Error body inside a server error envelope.
///
/// The backend spells the status field `StatusCode`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub code: u32,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "StatusCode", default)]
    pub status_code: Option<u16>,
}

impl From<ErrorBody> for ChatError {
    fn from(body: ErrorBody) -> Self {
        let code = ErrorCode::from_code(body.code);
        let message = if body.message.is_empty() {
            code.description().to_string()
        } else {
            body.message
        };
        Self {
            code,
            message,
            status_code: body.status_code,
            cause: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========== ErrorCode Tests ==========

    #[test]
    fn test_from_code_known_values() {
        assert_eq!(ErrorCode::from_code(2), ErrorCode::ApiKeyNotFound);
        assert_eq!(ErrorCode::from_code(40), ErrorCode::TokenExpired);
        assert_eq!(ErrorCode::from_code(1004), ErrorCode::CantParseConnectionEvent);
    }

    #[test]
    fn test_from_code_unknown_value_is_preserved() {
        let code = ErrorCode::from_code(17);
        assert_eq!(code, ErrorCode::Other(17));
        assert_eq!(code.code(), 17);
    }

    #[test]
    fn test_code_matches_from_code_for_all_local_codes() {
        for raw in 1000..=1010 {
            assert_eq!(ErrorCode::from_code(raw).code(), raw);
        }
    }

    // ========== Classification Tests ==========

    #[test]
    fn test_credential_errors_are_fatal() {
        for code in [
            ErrorCode::ApiKeyNotFound,
            ErrorCode::InputError,
            ErrorCode::InvalidToken,
            ErrorCode::UndefinedToken,
            ErrorCode::TokenNotValid,
        ] {
            assert_eq!(ChatError::new(code).kind(), ErrorKind::Fatal, "{code:?}");
        }
    }

    #[test]
    fn test_expired_token_is_recoverable() {
        let error = ChatError::new(ErrorCode::TokenExpired);
        assert_eq!(error.kind(), ErrorKind::Recoverable);
        assert!(error.is_authentication_error());
    }

    #[test]
    fn test_socket_errors_are_recoverable() {
        assert_eq!(
            ChatError::new(ErrorCode::SocketClosed).kind(),
            ErrorKind::Recoverable
        );
        assert_eq!(ChatError::new(ErrorCode::Timeout).kind(), ErrorKind::Recoverable);
        assert_eq!(
            ChatError::new(ErrorCode::CantParseConnectionEvent).kind(),
            ErrorKind::Recoverable
        );
    }

    #[test]
    fn test_event_parse_errors_are_informational() {
        assert_eq!(
            ChatError::new(ErrorCode::CantParseEvent).kind(),
            ErrorKind::Informational
        );
    }

    // ========== Display / Envelope Tests ==========

    #[test]
    fn test_display_includes_code_status_and_cause() {
        let error = ChatError {
            status_code: Some(401),
            ..ChatError::with_message(ErrorCode::TokenNotValid, "bad token")
        }
        .caused_by("signature mismatch");
        assert_eq!(
            error.to_string(),
            "[41] bad token (status 401): signature mismatch"
        );
    }

    #[test]
    fn test_error_body_conversion_uses_default_message_when_empty() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"code": 2, "StatusCode": 401}"#).expect("valid body");
        let error = ChatError::from(body);
        assert_eq!(error.code, ErrorCode::ApiKeyNotFound);
        assert_eq!(error.message, "API key not found");
        assert_eq!(error.status_code, Some(401));
    }
}
