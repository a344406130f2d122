//! Self-describing transcript export and the sink that saves it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::errors::StoreError;
use crate::memory::{Message, Role};
use crate::persona::PersonaId;

pub const APPLICATION_NAME: &str = "Her OS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptExport {
    pub application: String,
    #[serde(with = "time::serde::rfc3339")]
    pub exported_at: OffsetDateTime,
    pub persona: PersonaId,
    pub message_count: usize,
    pub messages: Vec<ExportedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedMessage {
    pub role: Role,
    pub content: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

impl TranscriptExport {
    pub fn build(persona: &PersonaId, messages: &[Message], exported_at: OffsetDateTime) -> Self {
        let messages: Vec<ExportedMessage> = messages
            .iter()
            .map(|m| ExportedMessage {
                role: m.role,
                content: m.content.clone(),
                timestamp: m.timestamp,
            })
            .collect();
        Self {
            application: APPLICATION_NAME.to_string(),
            exported_at,
            persona: persona.clone(),
            message_count: messages.len(),
            messages,
        }
    }

    /// `her-os-transcript-<persona>-<YYYY-MM-DD>.json`, dated in UTC.
    pub fn filename(&self) -> String {
        let date = self
            .exported_at
            .to_offset(time::UtcOffset::UTC)
            .date()
            .format(format_description!("[year]-[month]-[day]"))
            .unwrap_or_else(|_| "undated".to_string());
        format!("her-os-transcript-{}-{}.json", self.persona, date)
    }

    pub fn exported_at_iso(&self) -> String {
        self.exported_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.exported_at.to_string())
    }
}

/// Client-side "save as file" collaborator.
pub trait DownloadSink: Send + Sync {
    fn save(&self, filename: &str, payload: &[u8]) -> Result<(), StoreError>;
}

/// Writes exports into a directory, creating it on first use.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DownloadSink for DirectorySink {
    fn save(&self, filename: &str, payload: &[u8]) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(filename), payload)?;
        Ok(())
    }
}
