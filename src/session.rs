//! Session state carried between requests.

use crate::document::{Document, Element};

/// Response paths the session is refreshed from.
pub const COOKIE_CREDENTIAL_PATH: &str = "//cookieCredential";
pub const TOKEN_CREDENTIAL_PATH: &str = "//tokenCredential";
pub const USER_PROFILE_PATH: &str = "//methodResult/datosUsuario";

/// Server-issued credentials and the last user profile snapshot.
///
/// Values are sticky: a response that does not carry a field leaves the
/// previously known value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    cookie_credential: Option<String>,
    token_credential: Option<String>,
    user_profile: Option<Element>,
}

impl SessionState {
    /// Empty state, before any response has been seen.
    pub fn initial() -> Self {
        Self::default()
    }

    /// State after observing `document`.
    pub fn update(&self, document: &Document) -> Self {
        Self {
            cookie_credential: document
                .text_at(COOKIE_CREDENTIAL_PATH)
                .or_else(|| self.cookie_credential.clone()),
            token_credential: document
                .text_at(TOKEN_CREDENTIAL_PATH)
                .or_else(|| self.token_credential.clone()),
            user_profile: document
                .node_at(USER_PROFILE_PATH)
                .cloned()
                .or_else(|| self.user_profile.clone()),
        }
    }

    pub fn cookie_credential(&self) -> Option<&str> {
        self.cookie_credential.as_deref()
    }

    pub fn token_credential(&self) -> Option<&str> {
        self.token_credential.as_deref()
    }

    /// The `datosUsuario` block exactly as the server last sent it.
    pub fn user_profile(&self) -> Option<&Element> {
        self.user_profile.as_ref()
    }

    /// True once a non-empty security token has been issued.
    pub fn is_authenticated(&self) -> bool {
        self.token_credential
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }
}
