//! Collaborators the client talks to outside HTTP: token storage, user
//! notifications and the progress indicator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use tracing::{error, info, warn};

/// Tokens as handed out by `/auth/login` and `/auth/refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds
    pub expires: i64,
}

impl TokenData {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires <= chrono::Utc::now().timestamp()
    }
}

pub trait TokenStore: Send + Sync {
    fn get(&self) -> Option<TokenData>;
    fn set(&self, token: TokenData);
    fn remove(&self);
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<TokenData>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new(token: Option<TokenData>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<TokenData> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, token: TokenData) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    fn remove(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Success,
    Warning,
    Error,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Ask whether the user wants to log in again. `true` means confirm.
    async fn confirm_relogin(&self, prompt: &str) -> bool;

    fn message(&self, text: &str, kind: MessageKind);

    fn redirect_to_login(&self);
}

/// Notifier for headless use: everything goes to the log and re-login is declined.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn confirm_relogin(&self, prompt: &str) -> bool {
        warn!("{prompt}");
        false
    }

    fn message(&self, text: &str, kind: MessageKind) {
        match kind {
            MessageKind::Error => error!("{text}"),
            MessageKind::Warning => warn!("{text}"),
            MessageKind::Info | MessageKind::Success => info!("{text}"),
        }
    }

    fn redirect_to_login(&self) {
        info!("Session ended, login required");
    }
}

pub trait Progress: Send + Sync {
    fn start(&self);
    fn done(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn start(&self) {}
    fn done(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires: i64) -> TokenData {
        TokenData {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires,
        }
    }

    #[test]
    fn memory_store_round() {
        let store = MemoryTokenStore::default();
        assert_eq!(store.get(), None);
        store.set(token(10));
        assert_eq!(store.get().map(|t| t.expires), Some(10));
        store.remove();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn expiry_is_against_now() {
        let now = chrono::Utc::now().timestamp();
        assert!(token(now - 1).is_expired());
        assert!(!token(now + 60).is_expired());
    }

    #[test]
    fn token_data_uses_wire_names() -> Result<(), serde_json::Error> {
        let parsed: TokenData = serde_json::from_value(serde_json::json!({
            "accessToken": "a",
            "refreshToken": "r",
            "expires": 5
        }))?;
        assert_eq!(parsed.access_token, "a");
        assert_eq!(parsed.refresh_token, "r");
        Ok(())
    }

    #[tokio::test]
    async fn log_notifier_declines_relogin() {
        assert!(!LogNotifier.confirm_relogin("expired").await);
    }
}
