//! Fixtures shared by the integration tests.

#![allow(dead_code)]

pub mod socket_guard;

use mediafetch_core::media::{DocumentMedia, MediaPayload};
use mediafetch_core::{MediaKind, MediaLocator, MessageDescriptor};

/// Deterministic, non-repeating-looking payload of `len` bytes.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

/// Document locator for an object served under `locator_id`.
pub fn document_locator(locator_id: &str, size_bytes: Option<u64>) -> MediaLocator {
    MediaLocator {
        locator_id: locator_id.to_string(),
        access_token: "tok".to_string(),
        routing_key: "dc1".to_string(),
        size_bytes,
        kind: MediaKind::Document,
        reference: "ref-1".to_string(),
        variant: None,
        file_name: Some(format!("{locator_id}.bin")),
        mime_type: None,
    }
}

/// Message carrying a document stored under `locator_id`.
pub fn document_message(id: i64, locator_id: &str, size: u64) -> MessageDescriptor {
    MessageDescriptor {
        id,
        date: 1_700_000_000 + id,
        media: Some(MediaPayload::Document(DocumentMedia {
            id: locator_id.to_string(),
            access_token: "tok".to_string(),
            routing_key: "dc1".to_string(),
            reference: "ref-1".to_string(),
            size: Some(size),
            file_name: Some(format!("{locator_id}.bin")),
            mime_type: None,
        })),
    }
}

/// Message without media.
pub fn text_message(id: i64) -> MessageDescriptor {
    MessageDescriptor {
        id,
        date: 1_700_000_000 + id,
        media: None,
    }
}
