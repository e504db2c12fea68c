//! External state the client reacts to: credentials, network reachability
//! and foreground state.
//!
//! Each is a [`Signal`]: a current value plus change notification, backed by
//! a `tokio::sync::watch` channel.  The platform layer owns the producing
//! side (it calls [`Signal::set`]); the client only reads, except for the
//! profile mirror kept inside [`Credentials`].

use std::sync::Arc;

use tokio::sync::watch;

use chatline_net::TokenSource;
use chatline_shared::UserId;

/// A value that changes over time.  Cloning shares the same underlying cell.
#[derive(Debug)]
pub struct Signal<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value.  Subscribers are only woken when it changed.
    pub fn set(&self, value: T) {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Mutate in place; `f` returns whether anything changed.
    pub fn update(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

/// The signed-in user's session, mirrored from the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub user_id: UserId,
    pub username: String,
    pub profile_picture_url: Option<String>,
}

pub type CredentialSignal = Signal<Option<Credentials>>;
pub type ConnectivitySignal = Signal<bool>;
pub type ForegroundSignal = Signal<bool>;

impl TokenSource for Signal<Option<Credentials>> {
    fn current_token(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|c| c.token.clone())
    }
}

/// Handles to the three signals the connection lifecycle depends on.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub credentials: CredentialSignal,
    pub connectivity: ConnectivitySignal,
    pub foreground: ForegroundSignal,
}

impl SessionContext {
    pub fn new(
        credentials: CredentialSignal,
        connectivity: ConnectivitySignal,
        foreground: ForegroundSignal,
    ) -> Self {
        Self {
            credentials,
            connectivity,
            foreground,
        }
    }

    /// Apply a profile picture change to the cached session if it concerns
    /// the local user.  Returns whether the mirror changed.
    pub fn mirror_profile_picture(&self, user_id: &UserId, url: Option<&str>) -> bool {
        self.credentials.update(|current| match current {
            Some(c) if c.user_id == *user_id && c.profile_picture_url.as_deref() != url => {
                c.profile_picture_url = url.map(str::to_string);
                true
            }
            _ => false,
        })
    }
}
