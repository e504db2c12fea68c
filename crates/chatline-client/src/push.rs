//! Device push-token registration.
//!
//! The platform reports token refreshes at any time, signed in or not. The
//! registrar remembers the latest token and registers it with the service
//! whenever a session is available, including right after sign-in.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chatline_net::ChatApi;

use crate::error::Result;
use crate::signals::SessionContext;

#[derive(Clone)]
pub struct PushTokenRegistrar {
    api: Arc<dyn ChatApi>,
    context: SessionContext,
    platform: String,
    token: Arc<Mutex<Option<String>>>,
}

impl PushTokenRegistrar {
    pub fn new(api: Arc<dyn ChatApi>, context: SessionContext, platform: impl Into<String>) -> Self {
        Self {
            api,
            context,
            platform: platform.into(),
            token: Arc::new(Mutex::new(None)),
        }
    }

    fn remembered(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Remember `token` and register it if signed in, unregistering the token
    /// it replaces.  Returns whether it was registered now.
    pub async fn on_token_refreshed(&self, token: String) -> Result<bool> {
        let replaced = self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(token.clone());

        if let Some(previous) = replaced.filter(|previous| *previous != token) {
            if self.context.credentials.current().is_some() {
                match self.api.unregister_device_token(&previous).await {
                    Ok(()) => debug!("Replaced push token unregistered"),
                    Err(e) => warn!(error = %e, "Failed to unregister replaced push token"),
                }
            }
        }

        self.on_session_started().await
    }

    /// Register the remembered token, if any, for the current session.
    pub async fn on_session_started(&self) -> Result<bool> {
        let Some(token) = self.remembered() else {
            return Ok(false);
        };
        if self.context.credentials.current().is_none() {
            debug!("No session, push token registration deferred");
            return Ok(false);
        }

        self.api.register_device_token(&token, &self.platform).await?;
        info!(platform = %self.platform, "Push token registered");
        Ok(true)
    }

    /// Remove the remembered token from the service, e.g. before signing out.
    pub async fn unregister(&self) -> Result<()> {
        let Some(token) = self.remembered() else {
            return Ok(());
        };
        self.api.unregister_device_token(&token).await?;
        info!("Push token unregistered");
        Ok(())
    }

    /// Register again every time a new session token appears.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut credentials = self.context.credentials.subscribe();
            let mut last = credentials.borrow_and_update().as_ref().map(|c| c.token.clone());

            while credentials.changed().await.is_ok() {
                let current = credentials.borrow_and_update().as_ref().map(|c| c.token.clone());
                if current.is_some() && current != last {
                    if let Err(e) = self.on_session_started().await {
                        warn!(error = %e, "Push token registration failed");
                    }
                }
                last = current;
            }
        })
    }
}
