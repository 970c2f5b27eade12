//! Account and credential surface consumed by the uploader
//!
//! The authorization flow itself lives outside this crate. Here we only keep
//! the current account, broadcast when it changes, and recognise redirect
//! URLs that belong to the flow.

use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::config::AccountConfig;
use crate::events::{EventBus, Notification};

/// Opaque bearer credential
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.token
    }

    pub fn is_valid(&self) -> bool {
        if self.token.is_empty() {
            return false;
        }
        self.expires_at.map(|at| at > Utc::now()).unwrap_or(true)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Signed-in account
#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    pub token: AccessToken,
}

/// Receives redirect URLs that belong to the authorization flow
pub trait AuthorizationFlow: Send + Sync {
    fn complete(&self, url: &Url);
}

/// Current account plus the redirect hook
#[derive(Clone)]
pub struct AccountStore {
    account: Arc<RwLock<Option<Account>>>,
    redirect_uri: Option<Url>,
    flow: Option<Arc<dyn AuthorizationFlow>>,
    events: EventBus,
}

impl AccountStore {
    pub fn new(config: &AccountConfig, events: EventBus) -> Self {
        let redirect_uri = config.redirect_uri.as_deref().and_then(|uri| match Url::parse(uri) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Ignoring invalid redirect URI {:?}: {}", uri, e);
                None
            }
        });

        Self {
            account: Arc::new(RwLock::new(None)),
            redirect_uri,
            flow: None,
            events,
        }
    }

    pub fn with_flow(mut self, flow: Arc<dyn AuthorizationFlow>) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn account(&self) -> Option<Account> {
        self.account.read().ok()?.clone()
    }

    /// Token for the current account, if signed in
    pub fn token(&self) -> Option<AccessToken> {
        self.account().map(|account| account.token)
    }

    /// Replace the current account and broadcast the change
    pub fn set_account(&self, account: Option<Account>) {
        let changed = match self.account.write() {
            Ok(mut slot) => {
                let changed = slot.as_ref().map(|a| (&a.username, &a.token))
                    != account.as_ref().map(|a| (&a.username, &a.token));
                *slot = account;
                changed
            }
            Err(_) => false,
        };

        if changed {
            info!("Account changed");
            self.events.notify(Notification::AccountDidChange);
        }
    }

    /// Sign out
    pub fn remove_access(&self) {
        self.set_account(None);
    }

    /// Broadcast that requesting access failed
    pub fn report_access_failure(&self) {
        warn!("Access request failed");
        self.events.notify(Notification::DidFailToRequestAccess);
    }

    /// Report whether `url` belongs to the authorization flow
    ///
    /// Matching URLs are handed to the flow, if one is installed.
    pub fn handle_redirect_url(&self, url: &str) -> bool {
        let Some(expected) = self.redirect_uri.as_ref() else {
            return false;
        };
        let Ok(url) = Url::parse(url) else {
            debug!("Ignoring unparseable redirect {:?}", url);
            return false;
        };

        let matches = url.scheme() == expected.scheme()
            && url.host_str() == expected.host_str()
            && url.path().trim_end_matches('/') == expected.path().trim_end_matches('/');
        if !matches {
            return false;
        }

        if let Some(flow) = &self.flow {
            flow.complete(&url);
        }
        true
    }
}
