//! Classification of blobs written before the split blob columns existed.
//!
//! Old rows kept everything in a single `blob` column: sometimes a ciphertext
//! envelope, sometimes the structured plaintext body, sometimes an even older
//! `{title, text}` document, and occasionally bare text.

use crate::error::StorageResult;
use journal_types::{EntryBlob, EntryPayload};
use serde_json::Value;

/// The shape a legacy `blob` value was recognised as.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyBlob {
    /// `{"cipher": .., "iv": ..}`, kept verbatim as ciphertext.
    Envelope(String),
    /// `{"content": .., ...}`.
    Structured(EntryBlob),
    /// `{"title"?: .., "text": ..}`.
    Document { title: Option<String>, text: String },
    /// Anything else. Preserved as plaintext content.
    Unclassifiable(String),
}

impl LegacyBlob {
    /// Classifies `raw`. Checked in order: envelope, structured body,
    /// document, then unclassifiable. The first match wins.
    pub fn detect(raw: &str) -> Self {
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
            return LegacyBlob::Unclassifiable(raw.to_string());
        };

        let is_str = |key: &str| map.get(key).is_some_and(Value::is_string);

        if is_str("cipher") && is_str("iv") {
            return LegacyBlob::Envelope(raw.to_string());
        }

        if is_str("content") {
            if let Ok(blob) = EntryBlob::from_json(raw) {
                return LegacyBlob::Structured(blob);
            }
        }

        if let Some(text) = map.get("text").and_then(Value::as_str) {
            let title = map
                .get("title")
                .and_then(Value::as_str)
                .filter(|t| !t.trim().is_empty())
                .map(str::to_string);
            return LegacyBlob::Document {
                title,
                text: text.to_string(),
            };
        }

        LegacyBlob::Unclassifiable(raw.to_string())
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, LegacyBlob::Unclassifiable(_))
    }

    /// The at-rest payload this blob becomes under the current schema.
    pub fn into_payload(self) -> StorageResult<EntryPayload> {
        let payload = match self {
            LegacyBlob::Envelope(raw) => EntryPayload::Encrypted(raw),
            LegacyBlob::Structured(blob) => EntryPayload::plain(&blob)?,
            LegacyBlob::Document { title, text } => {
                let content = match title {
                    Some(title) => format!("{title}\n\n{text}"),
                    None => text,
                };
                EntryPayload::plain(&EntryBlob::new(content, None))?
            }
            LegacyBlob::Unclassifiable(text) => EntryPayload::plain(&EntryBlob::new(text, None))?,
        };
        Ok(payload)
    }
}
