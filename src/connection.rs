//! Per-attempt connection configuration and the authenticated connect URL.
//!
//! A [`ConnectionConfig`] names the principal to connect as. It is created
//! by the caller, handed to the manager with `connect()`, and never mutated:
//! reconnection attempts derive a copy through
//! [`ConnectionConfig::as_reconnection`]. A user's JWT comes from a
//! [`TokenProvider`]; the cached value is expired when the server rejects
//! it, so the next attempt loads a fresh one.
//!
//! The backend negotiates everything through the handshake URL:
//!
//! ```text
//! {ws_url}/connect?json={payload}&api_key={key}&authorization={token}&stream-auth-type=jwt
//! {ws_url}/connect?json={payload}&api_key={key}&stream-auth-type=anonymous
//! ```

use std::sync::{Arc, Mutex};

use serde::Serialize;
use url::Url;

use crate::error::{ChatError, ErrorCode};

/// User id sent in the connect payload for anonymous principals.
pub const ANONYMOUS_USER_ID: &str = "!anon";

/// User details announced to the backend on first connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Backend user id.
    pub id: String,
    /// Optional display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl User {
    /// Create a user with only an id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Source of JWTs for a user principal.
///
/// Called from the manager actor when a connection is about to open and no
/// valid token is cached. Implementations must return quickly (cache, keychain
/// or a value fetched ahead of time).
pub trait TokenProvider: Send + Sync + 'static {
    /// Produce a token for the user.
    ///
    /// # Errors
    ///
    /// Any `ChatError`; its classification decides whether the manager
    /// retries.
    fn load_token(&self) -> Result<String, ChatError>;
}

/// Provider that always returns the same token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn load_token(&self) -> Result<String, ChatError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct TokenCache {
    current: Option<String>,
}

/// Cached token plus the provider that refreshes it.
///
/// Clones share the cache, so expiring the token of a stored config also
/// affects every reconnection derived from it.
#[derive(Clone)]
pub struct UserToken {
    provider: Arc<dyn TokenProvider>,
    cache: Arc<Mutex<TokenCache>>,
}

impl UserToken {
    /// Wrap a provider. Nothing is loaded until the first [`UserToken::current`].
    #[must_use]
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            cache: Arc::new(Mutex::new(TokenCache::default())),
        }
    }

    /// The cached token, loading a fresh one from the provider if needed.
    ///
    /// # Errors
    ///
    /// The provider's error, or `UndefinedToken` when it returned an empty
    /// token.
    pub fn current(&self) -> Result<String, ChatError> {
        let mut cache = self.cache.lock().expect("token lock poisoned");
        if let Some(token) = &cache.current {
            return Ok(token.clone());
        }
        let token = self.provider.load_token()?;
        if token.is_empty() {
            return Err(ChatError::new(ErrorCode::UndefinedToken));
        }
        log::debug!("[Socket] Loaded a new token from the provider");
        cache.current = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next [`UserToken::current`] asks the
    /// provider again.
    pub fn expire(&self) {
        self.cache.lock().expect("token lock poisoned").current = None;
    }
}

impl PartialEq for UserToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cache, &other.cache)
    }
}

impl Eq for UserToken {}

impl std::fmt::Debug for UserToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserToken(<redacted>)")
    }
}

/// Who the connection authenticates as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// A known user authenticated by a JWT.
    User {
        /// The user being connected.
        user: User,
        /// JWT source. Read when the URL is built at open time.
        token: UserToken,
    },
    /// Anonymous connection (no token).
    Anonymous,
}

/// Immutable configuration for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Principal to connect as.
    pub principal: Principal,
    /// Whether this attempt re-establishes a previous session.
    ///
    /// Only affects the connect payload, never state machine logic.
    pub is_reconnection: bool,
}

/// Payload serialized into the `json` query parameter.
#[derive(Debug, Serialize)]
struct ConnectPayload<'a> {
    user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_details: Option<&'a User>,
    server_determines_connection_id: bool,
}

impl ConnectionConfig {
    /// Connect as an authenticated user with a fixed token.
    #[must_use]
    pub fn user(user: User, token: impl Into<String>) -> Self {
        Self::user_with_provider(user, Arc::new(StaticToken(token.into())))
    }

    /// Connect as an authenticated user whose token can be refreshed.
    #[must_use]
    pub fn user_with_provider(user: User, provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            principal: Principal::User {
                user,
                token: UserToken::new(provider),
            },
            is_reconnection: false,
        }
    }

    /// Connect anonymously.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            principal: Principal::Anonymous,
            is_reconnection: false,
        }
    }

    /// Copy of this config flagged as a reconnection.
    #[must_use]
    pub fn as_reconnection(&self) -> Self {
        Self {
            principal: self.principal.clone(),
            is_reconnection: true,
        }
    }

    /// The user id this config connects as (anonymous marker for anonymous).
    #[must_use]
    pub fn user_id(&self) -> &str {
        match &self.principal {
            Principal::User { user, .. } => &user.id,
            Principal::Anonymous => ANONYMOUS_USER_ID,
        }
    }

    /// Forget the cached token (after the server rejected it).
    pub fn expire_token(&self) {
        if let Principal::User { token, .. } = &self.principal {
            token.expire();
        }
    }

    /// Build the authenticated handshake URL.
    ///
    /// `ws_url` may use `http(s)://` or `ws(s)://`; HTTP schemes are
    /// rewritten to their WebSocket equivalents.
    ///
    /// # Errors
    ///
    /// `UndefinedToken` when a user principal has an empty token, the token
    /// provider's error, or `InputError` when `ws_url` cannot be parsed.
    pub fn authenticated_url(&self, ws_url: &str, api_key: &str) -> Result<Url, ChatError> {
        let mut url = connect_endpoint(ws_url)?;

        let token = match &self.principal {
            Principal::User { token, .. } => Some(token.current()?),
            Principal::Anonymous => None,
        };

        let payload = match &self.principal {
            Principal::User { user, .. } => {
                ConnectPayload {
                    user_id: &user.id,
                    user_details: (!self.is_reconnection).then_some(user),
                    server_determines_connection_id: true,
                }
            }
            Principal::Anonymous => ConnectPayload {
                user_id: ANONYMOUS_USER_ID,
                user_details: None,
                server_determines_connection_id: true,
            },
        };
        let json = serde_json::to_string(&payload).map_err(|e| {
            ChatError::new(ErrorCode::ParserError).caused_by(e)
        })?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("json", &json);
            query.append_pair("api_key", api_key);
            match &token {
                Some(token) => {
                    query.append_pair("authorization", token);
                    query.append_pair("stream-auth-type", "jwt");
                }
                None => {
                    query.append_pair("stream-auth-type", "anonymous");
                }
            }
        }

        Ok(url)
    }
}

/// `{ws_url}/connect` with the scheme mapped to its WebSocket form.
fn connect_endpoint(ws_url: &str) -> Result<Url, ChatError> {
    let invalid =
        || ChatError::with_message(ErrorCode::InputError, format!("invalid ws_url '{ws_url}'"));

    let mut url = Url::parse(ws_url).map_err(|e| invalid().caused_by(e))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(invalid().caused_by(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme).map_err(|()| invalid())?;
    let path = format!("{}/connect", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}

/// Render a URL for logs with the `authorization` parameter masked.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k == "authorization" {
                (k.into_owned(), "<redacted>".to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
