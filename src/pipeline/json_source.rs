use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{MessageSource, SourceError};
use crate::media::MessageDescriptor;

/// Enumerates messages from a JSON export: an array of message descriptors.
///
/// Messages are served in ascending id order regardless of file order;
/// repeated ids keep their first occurrence.
#[derive(Debug, Clone, Default)]
pub struct JsonMessageSource {
    messages: Vec<MessageDescriptor>,
}

impl JsonMessageSource {
    /// Reads and parses an export file.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the file cannot be read or is not a JSON
    /// array of messages.
    #[instrument]
    pub async fn open(path: &Path) -> Result<Self, SourceError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            SourceError::new(format!("failed to read '{}': {e}", path.display()))
        })?;
        let messages: Vec<MessageDescriptor> = serde_json::from_str(&raw).map_err(|e| {
            SourceError::new(format!("failed to parse '{}': {e}", path.display()))
        })?;
        debug!(count = messages.len(), "loaded message export");
        Ok(Self::from_messages(messages))
    }

    /// Wraps already-parsed messages.
    #[must_use]
    pub fn from_messages(mut messages: Vec<MessageDescriptor>) -> Self {
        messages.sort_by_key(|message| message.id);
        messages.dedup_by_key(|message| message.id);
        Self { messages }
    }

    /// Number of messages held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if the export had no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl MessageSource for JsonMessageSource {
    async fn fetch_page(
        &self,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<MessageDescriptor>, SourceError> {
        let start = self.messages.partition_point(|message| message.id <= after_id);
        Ok(self
            .messages
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_message(&self, id: i64) -> Result<Option<MessageDescriptor>, SourceError> {
        Ok(self
            .messages
            .binary_search_by_key(&id, |message| message.id)
            .ok()
            .map(|index| self.messages[index].clone()))
    }
}
