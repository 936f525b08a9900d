//! In-memory reference backends for the store seams.
//!
//! These back the test suite and any embedder that has not wired a cloud
//! SDK yet. The document store and object store carry failure switches so
//! tests can exercise the degraded paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{AlarmItem, UserProfile, UserRecord};

use super::{
    AlarmService, AuthService, DocumentStore, LogSubscription, MessageLog, ObjectStore, StoreError,
};

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ═══════════════════════════════════════════════════════════
// MemoryDocumentStore
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryDocumentStore {
    records: Mutex<HashMap<String, UserRecord>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record, e.g. a doctor with an assigned patient list.
    pub fn insert(&self, uid: impl Into<String>, record: UserRecord) {
        lock(&self.records).insert(uid.into(), record);
    }

    pub fn record(&self, uid: &str) -> Option<UserRecord> {
        lock(&self.records).get(uid).cloned()
    }

    /// Make subsequent fetches fail with `Unavailable`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent profile pushes fail with `Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl DocumentStore for MemoryDocumentStore {
    async fn fetch(&self, uid: &str) -> Result<Option<UserRecord>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("document store".into()));
        }
        Ok(lock(&self.records).get(uid).cloned())
    }

    async fn store_profile(&self, uid: &str, profile: &UserProfile) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("document store".into()));
        }
        let mut records = lock(&self.records);
        records.entry(uid.to_string()).or_default().profile = profile.clone();
        Ok(())
    }

    async fn ensure_registered(&self, uid: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("document store".into()));
        }
        lock(&self.records).entry(uid.to_string()).or_default();
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// MemoryMessageLog
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
struct Conversation {
    entries: Vec<(String, Value)>,
    subscribers: HashMap<Uuid, mpsc::UnboundedSender<(String, Value)>>,
}

/// Append-only log with per-arrival fan-out to live subscribers.
#[derive(Default)]
pub struct MemoryMessageLog {
    conversations: Arc<Mutex<HashMap<String, Conversation>>>,
    /// Keys are monotonic across the whole log, which also makes them
    /// monotonic within any one conversation.
    next_key: AtomicU64,
}

impl MemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageLog for MemoryMessageLog {
    fn new_key(&self, _conversation_id: &str) -> String {
        let n = self.next_key.fetch_add(1, Ordering::SeqCst);
        format!("{n:016x}")
    }

    async fn append(
        &self,
        conversation_id: &str,
        key: &str,
        entry: Value,
    ) -> Result<(), StoreError> {
        let mut conversations = lock(&self.conversations);
        let conversation = conversations.entry(conversation_id.to_string()).or_default();
        conversation.entries.push((key.to_string(), entry.clone()));
        conversation
            .subscribers
            .retain(|_, tx| tx.send((key.to_string(), entry.clone())).is_ok());
        Ok(())
    }

    async fn entries(&self, conversation_id: &str) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(lock(&self.conversations)
            .get(conversation_id)
            .map(|c| c.entries.clone())
            .unwrap_or_default())
    }

    fn subscribe(&self, conversation_id: &str) -> LogSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        {
            let mut conversations = lock(&self.conversations);
            let conversation = conversations.entry(conversation_id.to_string()).or_default();
            // Replay stored entries first, then go live. Registration and
            // replay share the lock so no append can slip between them.
            for (key, entry) in &conversation.entries {
                let _ = tx.send((key.clone(), entry.clone()));
            }
            conversation.subscribers.insert(id, tx);
        }

        let conversations = Arc::clone(&self.conversations);
        let conversation_id = conversation_id.to_string();
        LogSubscription::new(rx, move || {
            if let Some(conversation) = lock(&conversations).get_mut(&conversation_id) {
                conversation.subscribers.remove(&id);
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════
// MemoryObjectStore
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.objects).is_empty()
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("object store".into()));
        }
        lock(&self.objects).insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn url_for(&self, key: &str) -> Result<String, StoreError> {
        if lock(&self.objects).contains_key(key) {
            Ok(format!("memory://{key}"))
        } else {
            Err(StoreError::NotFound { key: key.to_string() })
        }
    }
}

// ═══════════════════════════════════════════════════════════
// MemoryAlarmService
// ═══════════════════════════════════════════════════════════

/// Records registrations the way the platform alarm manager would:
/// re-registering an identical alarm replaces it, cancellation matches
/// by identity and is a no-op when nothing matches.
#[derive(Default)]
pub struct MemoryAlarmService {
    alarms: Mutex<Vec<AlarmItem>>,
}

impl MemoryAlarmService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<AlarmItem> {
        lock(&self.alarms).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.alarms).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.alarms).is_empty()
    }
}

impl AlarmService for MemoryAlarmService {
    fn schedule(&self, alarm: &AlarmItem) -> Result<(), StoreError> {
        let mut alarms = lock(&self.alarms);
        alarms.retain(|a| a != alarm);
        alarms.push(alarm.clone());
        Ok(())
    }

    fn cancel(&self, alarm: &AlarmItem) {
        lock(&self.alarms).retain(|a| a != alarm);
    }
}

// ═══════════════════════════════════════════════════════════
// MemoryAuth
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryAuth {
    uid: Mutex<Option<String>>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(uid: impl Into<String>) -> Self {
        Self {
            uid: Mutex::new(Some(uid.into())),
        }
    }

    pub fn set_user(&self, uid: Option<String>) {
        *lock(&self.uid) = uid;
    }
}

impl AuthService for MemoryAuth {
    fn current_user_id(&self) -> Option<String> {
        lock(&self.uid).clone()
    }

    fn sign_out(&self) {
        *lock(&self.uid) = None;
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
