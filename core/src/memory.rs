//! Capacity-bounded conversation log persisted to a [`KeyValueStore`].
//!
//! The store keeps no cache: every read deserializes the persisted value, and
//! every mutation writes the full sequence back. System prompts are injected
//! at send time and never reach this module.

use std::sync::{Arc, Mutex, MutexGuard};

use log::warn;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::errors::StoreError;
use crate::kv::KeyValueStore;
use crate::persona::PersonaId;
use crate::transcript::{DownloadSink, TranscriptExport};

pub const MEMORY_KEY: &str = "her_os_memory";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, with = "epoch_millis", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<OffsetDateTime>,
}

impl Message {
    /// Timestamped turn, truncated to millisecond precision so that it
    /// survives the epoch-millis encoding unchanged.
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(now_millis()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            timestamp: None,
        }
    }
}

fn now_millis() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    let millis = now.millisecond();
    now.replace_millisecond(millis).unwrap_or(now)
}

/// Clones share one write lock, so appends from concurrent turns never
/// overwrite each other.
#[derive(Clone)]
pub struct ConversationStore {
    kv: Arc<dyn KeyValueStore>,
    capacity: usize,
    writes: Arc<Mutex<()>>,
}

impl ConversationStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            kv,
            capacity: capacity.max(1),
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a turn, evict the oldest entries beyond capacity, persist, and
    /// return the resulting sequence.
    pub fn append(&self, role: Role, content: &str) -> Result<Vec<Message>, StoreError> {
        if role == Role::System {
            return Err(StoreError::SystemRole);
        }
        let _guard = self.write_lock();
        let mut messages = self.all();
        messages.push(Message::now(role, content));
        if messages.len() > self.capacity {
            let excess = messages.len() - self.capacity;
            messages.drain(..excess);
        }
        let encoded = serde_json::to_string(&messages)?;
        self.kv.set(MEMORY_KEY, &encoded)?;
        Ok(messages)
    }

    pub fn all(&self) -> Vec<Message> {
        let stored = match self.kv.get(MEMORY_KEY) {
            Ok(Some(stored)) => stored,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!("Failed to read memory: {err}");
                return Vec::new();
            }
        };
        match serde_json::from_str(&stored) {
            Ok(messages) => messages,
            Err(err) => {
                warn!("Failed to read memory: {err}");
                Vec::new()
            }
        }
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock();
        self.kv.remove(MEMORY_KEY)
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot the transcript for `persona` and hand it to the sink.
    /// Returns the filename the sink received.
    pub fn export(
        &self,
        persona: &PersonaId,
        sink: &dyn DownloadSink,
    ) -> Result<String, StoreError> {
        let bundle = TranscriptExport::build(persona, &self.all(), OffsetDateTime::now_utc());
        let filename = bundle.filename();
        let payload = serde_json::to_vec_pretty(&bundle)?;
        sink.save(&filename, &payload)?;
        Ok(filename)
    }
}

/// Optional timestamps as epoch milliseconds.
mod epoch_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => {
                let millis = (ts.unix_timestamp_nanos() / 1_000_000) as i64;
                serializer.serialize_i64(millis)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<i64>::deserialize(deserializer)?;
        millis
            .map(|ms| {
                OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}
