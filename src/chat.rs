//! Doctor–patient chat — message types, conversation identity, and the
//! live assembler over the message-log seam.
//!
//! Log entries are keyed records {author, image, message, time}; decoding
//! validates the shape and yields an explicit malformed-entry error
//! instead of trusting field positions. Images ride along as object-store
//! references, uploaded before the entry is appended.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::store::{LogSubscription, MessageLog, ObjectStore, StoreError};

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// A decoded chat message. Immutable once appended; ordering is the
/// log's insertion-key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender_id: String,
    pub text: String,
    /// Epoch seconds at send time.
    pub sent_at: i64,
    /// Download reference of the attached image, if any.
    pub image_ref: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Malformed log entry {key}: {reason}")]
    MalformedEntry { key: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Conversation key: patient id then doctor id, concatenated.
///
/// Deliberately not order-symmetric — swapping the arguments yields a
/// different log. Every caller resolves the key through here so the
/// order is applied exactly once.
pub fn conversation_id(patient_uid: &str, doctor_uid: &str) -> String {
    format!("{patient_uid}{doctor_uid}")
}

// ═══════════════════════════════════════════════════════════
// Wire format
// ═══════════════════════════════════════════════════════════

fn encode_entry(sender_id: &str, text: &str, sent_at: i64, image_ref: Option<&str>) -> Value {
    json!({
        "author": sender_id,
        "message": text,
        "time": sent_at,
        // Empty string means no image, matching the stored format.
        "image": image_ref.unwrap_or(""),
    })
}

fn malformed(key: &str, reason: impl Into<String>) -> ChatError {
    ChatError::MalformedEntry {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Decode one keyed log entry into a message.
///
/// `time` may be a JSON number or a numeric string (older writers stored
/// it as a string); anything else is malformed.
pub fn decode_entry(key: &str, entry: &Value) -> Result<ChatMessage, ChatError> {
    let object = entry
        .as_object()
        .ok_or_else(|| malformed(key, "entry is not an object"))?;

    let sender_id = object
        .get("author")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(key, "missing or non-string 'author'"))?;
    let text = object
        .get("message")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(key, "missing or non-string 'message'"))?;

    let sent_at = match object.get("time") {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| malformed(key, "non-integer 'time'"))?,
        Some(Value::String(s)) => s
            .parse::<i64>()
            .map_err(|_| malformed(key, format!("non-numeric 'time': '{s}'")))?,
        _ => return Err(malformed(key, "missing 'time'")),
    };

    let image_ref = match object.get("image").and_then(Value::as_str) {
        None | Some("") => None,
        Some(url) => Some(url.to_string()),
    };

    Ok(ChatMessage {
        sender_id: sender_id.to_string(),
        text: text.to_string(),
        sent_at,
        image_ref,
    })
}

// ═══════════════════════════════════════════════════════════
// ChatClient
// ═══════════════════════════════════════════════════════════

pub struct ChatClient<M, O>
where
    M: MessageLog,
    O: ObjectStore,
{
    log: M,
    objects: O,
}

/// Live message feed for one conversation. Wraps the log subscription
/// and decodes each arrival; unsubscribes on drop.
pub struct MessageStream {
    inner: LogSubscription,
}

impl MessageStream {
    /// Next message, or `None` once the feed ends. A malformed entry
    /// yields an error item without ending the feed.
    pub async fn next(&mut self) -> Option<Result<ChatMessage, ChatError>> {
        let (key, entry) = self.inner.next().await?;
        Some(decode_entry(&key, &entry))
    }

    pub fn unsubscribe(self) {
        self.inner.unsubscribe();
    }
}

impl<M, O> ChatClient<M, O>
where
    M: MessageLog,
    O: ObjectStore,
{
    pub fn new(log: M, objects: O) -> Self {
        Self { log, objects }
    }

    pub fn log(&self) -> &M {
        &self.log
    }

    pub fn objects(&self) -> &O {
        &self.objects
    }

    /// Append a message, uploading the attached image first.
    ///
    /// The image lands under `images/{conversation}/{message key}` before
    /// the entry referencing it is appended. The two steps are sequential,
    /// not atomic: an upload success followed by an append failure leaves
    /// an orphaned object behind.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
        image: Option<&[u8]>,
    ) -> Result<String, ChatError> {
        let key = self.log.new_key(conversation_id);

        let image_ref = match image {
            Some(bytes) => {
                let object_key = format!("images/{conversation_id}/{key}");
                self.objects.upload(&object_key, bytes).await?;
                Some(self.objects.url_for(&object_key).await?)
            }
            None => None,
        };

        let sent_at = chrono::Utc::now().timestamp();
        let entry = encode_entry(sender_id, text, sent_at, image_ref.as_deref());
        self.log.append(conversation_id, &key, entry).await?;

        tracing::debug!(conversation_id, key, "message appended");
        Ok(key)
    }

    /// Subscribe to a conversation: stored messages replay in order,
    /// then each new append arrives live.
    pub fn subscribe(&self, conversation_id: &str) -> MessageStream {
        MessageStream {
            inner: self.log.subscribe(conversation_id),
        }
    }

    /// One-shot assembly of every stored message, in log order.
    pub async fn load_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let entries = self.log.entries(conversation_id).await?;
        let mut messages = Vec::with_capacity(entries.len());
        for (key, entry) in &entries {
            messages.push(decode_entry(key, entry)?);
        }
        Ok(messages)
    }

    /// Newest message of each patient's conversation with the doctor —
    /// the doctor's conversation-list view. Unreadable conversations
    /// degrade to `None` rather than failing the whole list.
    pub async fn last_messages(
        &self,
        doctor_uid: &str,
        patients: &[String],
    ) -> Vec<(String, Option<ChatMessage>)> {
        let mut latest = Vec::with_capacity(patients.len());
        for patient in patients {
            let conversation = conversation_id(patient, doctor_uid);
            let message = match self.log.entries(&conversation).await {
                Ok(entries) => entries
                    .last()
                    .and_then(|(key, entry)| decode_entry(key, entry).ok()),
                Err(e) => {
                    tracing::warn!(patient, "last-message load failed: {e}");
                    None
                }
            };
            latest.push((patient.clone(), message));
        }
        latest
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
