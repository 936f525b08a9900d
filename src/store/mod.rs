//! Storage seams between the core and the hosting platform.
//!
//! Everything the app persists or registers lives behind one of five
//! interfaces: the authoritative per-user document store, the ordered
//! per-conversation message log, object storage for chat images, the
//! platform alarm service, and the authentication session. `memory`
//! provides reference backends; `local` is the on-device profile cache.

pub mod local;
pub mod memory;

pub use local::PreferenceStore;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{AlarmItem, UserProfile, UserRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Remote service unavailable: {0}")]
    Unavailable(String),

    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Lock poisoned")]
    LockPoisoned,
}

// ═══════════════════════════════════════════════════════════
// Trait seams
// ═══════════════════════════════════════════════════════════

/// Authoritative per-user record store, keyed by uid.
#[allow(async_fn_in_trait)]
pub trait DocumentStore {
    /// Fetch the record for `uid`. `Ok(None)` means the user has no
    /// record yet — distinct from a transport failure.
    async fn fetch(&self, uid: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Overwrite the profile portion of the record (last writer wins).
    async fn store_profile(&self, uid: &str, profile: &UserProfile) -> Result<(), StoreError>;

    /// Create a default record for `uid` if none exists (first sign-in).
    async fn ensure_registered(&self, uid: &str) -> Result<(), StoreError>;
}

/// Append-only, per-conversation ordered message log.
///
/// Entry payloads are opaque JSON here; `chat` owns the keyed record
/// format and its validation.
#[allow(async_fn_in_trait)]
pub trait MessageLog {
    /// Reserve the next log key for a conversation without writing.
    /// Keys are monotonic per conversation, so log order is key order.
    fn new_key(&self, conversation_id: &str) -> String;

    /// Append an entry under a previously reserved key.
    async fn append(
        &self,
        conversation_id: &str,
        key: &str,
        entry: Value,
    ) -> Result<(), StoreError>;

    /// All stored entries for a conversation, in log order.
    async fn entries(&self, conversation_id: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// Live subscription: replays every stored entry in order, then
    /// delivers each subsequent append as it arrives, exactly once per
    /// arrival. No de-duplication is performed.
    fn subscribe(&self, conversation_id: &str) -> LogSubscription;
}

/// Remote object storage for chat image attachments.
#[allow(async_fn_in_trait)]
pub trait ObjectStore {
    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Resolve a stored object to a downloadable reference.
    async fn url_for(&self, key: &str) -> Result<String, StoreError>;
}

/// Platform alarm facility. Registration is synchronous on the platforms
/// this targets; failures are reported but never retried.
pub trait AlarmService {
    fn schedule(&self, alarm: &AlarmItem) -> Result<(), StoreError>;

    /// Cancel by identity match. Cancelling an unregistered alarm is a no-op.
    fn cancel(&self, alarm: &AlarmItem);
}

/// Authentication session, as far as the core needs it. The
/// phone-verification flow stays on the platform side.
pub trait AuthService {
    fn current_user_id(&self) -> Option<String>;
    fn sign_out(&self);
}

// ═══════════════════════════════════════════════════════════
// LogSubscription — cancellable live feed
// ═══════════════════════════════════════════════════════════

/// Handle to a live message-log feed.
///
/// Yields (key, entry) pairs in log order until unsubscribed. Dropping
/// the handle also unsubscribes.
pub struct LogSubscription {
    rx: mpsc::UnboundedReceiver<(String, Value)>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl LogSubscription {
    pub fn new(
        rx: mpsc::UnboundedReceiver<(String, Value)>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Next entry, or `None` once unsubscribed and drained.
    pub async fn next(&mut self) -> Option<(String, Value)> {
        self.rx.recv().await
    }

    /// Non-blocking variant: whatever has already arrived.
    pub fn try_next(&mut self) -> Option<(String, Value)> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}
