//! Explicit session state shared by the sync components.
//!
//! A [`SessionContext`] is built once at startup and handed to each
//! controller. Clones share the signed-in identity, so `sign_in` and
//! `teardown` are visible to every holder immediately.

use secrecy::SecretString;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::Config;
use crate::storage::DEFAULT_VIEW_CAPACITY;

/// Tunables the sync components read at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub page_size: usize,
    pub scroll_prefetch_margin: usize,
    pub request_timeout: Duration,
    pub comment_load_delay: Duration,
    pub cache_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 10,
            scroll_prefetch_margin: 3,
            request_timeout: Duration::from_secs(20),
            comment_load_delay: Duration::from_millis(100),
            cache_capacity: DEFAULT_VIEW_CAPACITY,
        }
    }
}

impl From<&Config> for SyncSettings {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.page_size,
            scroll_prefetch_margin: config.scroll_prefetch_margin,
            request_timeout: config.request_timeout(),
            comment_load_delay: config.comment_load_delay(),
            cache_capacity: config.cache_capacity,
        }
    }
}

/// Who the signed-in user is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
    pub avatar: Option<String>,
}

/// Identity plus credentials for authoring remote writes.
#[derive(Debug, Clone)]
pub struct AuthorContext {
    pub identity: Identity,
    pub token: Arc<SecretString>,
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    settings: SyncSettings,
    author: Arc<RwLock<Option<AuthorContext>>>,
}

impl SessionContext {
    /// A session with nobody signed in.
    pub fn anonymous(settings: SyncSettings) -> Self {
        Self {
            settings,
            author: Arc::new(RwLock::new(None)),
        }
    }

    /// Start a session from config.
    ///
    /// Signs in when both a token and a user id are configured; a token
    /// without a user id is ignored with a warning.
    pub fn init(config: &Config) -> Self {
        let session = Self::anonymous(SyncSettings::from(config));

        match (config.resolved_token(), config.user_id) {
            (Some(token), Some(user_id)) => {
                let identity = Identity {
                    user_id,
                    username: config
                        .username
                        .clone()
                        .unwrap_or_else(|| crate::remote::DEFAULT_AUTHOR_NAME.to_string()),
                    avatar: None,
                };
                session.sign_in(identity, SecretString::from(token));
            }
            (Some(_), None) => {
                tracing::warn!("auth_token configured without user_id, staying anonymous");
            }
            _ => {
                tracing::debug!("No credentials configured, session is anonymous");
            }
        }
        session
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn sign_in(&self, identity: Identity, token: SecretString) {
        let mut author = self.author.write().unwrap_or_else(|e| e.into_inner());
        tracing::info!(user_id = identity.user_id, "Signed in");
        *author = Some(AuthorContext {
            identity,
            token: Arc::new(token),
        });
    }

    /// Forget identity and token (logout).
    pub fn teardown(&self) {
        let mut author = self.author.write().unwrap_or_else(|e| e.into_inner());
        if author.take().is_some() {
            tracing::info!("Session cleared");
        }
    }

    pub fn author(&self) -> Option<AuthorContext> {
        self.author
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.author
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}
