use serde::{Deserialize, Serialize};

/// One message as yielded by the message enumerator.
///
/// Only the fields the transfer engine needs are modelled; text, sender and
/// reply metadata stay with the outer export layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDescriptor {
    /// Message id, unique and increasing within one scope.
    pub id: i64,
    /// Send time as unix seconds.
    #[serde(default)]
    pub date: i64,
    /// Attached media, if any.
    #[serde(default)]
    pub media: Option<MediaPayload>,
}

/// Media attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaPayload {
    /// A photo with one or more resolution variants.
    Photo(PhotoMedia),
    /// A generic file (video, audio, archive, PDF, ...).
    Document(DocumentMedia),
    /// A sticker; a document on the wire but its own category.
    Sticker(DocumentMedia),
    /// Link preview.
    WebPage,
    /// Poll.
    Poll,
    /// Location or venue.
    Geo,
    /// Shared contact card.
    Contact,
    /// Any payload type this build does not know about.
    #[serde(other)]
    Other,
}

impl MediaPayload {
    /// Stable label used in logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Photo(_) => "photo",
            Self::Document(_) => "document",
            Self::Sticker(_) => "sticker",
            Self::WebPage => "web_page",
            Self::Poll => "poll",
            Self::Geo => "geo",
            Self::Contact => "contact",
            Self::Other => "other",
        }
    }
}

/// Photo payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoMedia {
    pub id: String,
    pub access_token: String,
    pub routing_key: String,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub sizes: Vec<PhotoSize>,
}

/// One stored resolution of a photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoSize {
    /// Variant tag the remote uses to address this resolution.
    pub variant: String,
    /// Reported byte size.
    pub size: u64,
}

/// Document (and sticker) payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMedia {
    pub id: String,
    pub access_token: String,
    pub routing_key: String,
    #[serde(default)]
    pub reference: String,
    /// Declared size; absent or zero means unknown.
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Downloadable media kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Document,
}

impl MediaKind {
    /// Returns the stable string label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Document => "document",
        }
    }
}

/// Identifies one remote object: where it lives and how to ask for it.
///
/// Immutable once resolved. When the remote reports the reference as expired
/// a fresh locator has to be resolved from the original message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLocator {
    /// Remote object id.
    pub locator_id: String,
    /// Credential that authorizes reads of this object.
    pub access_token: String,
    /// Storage shard/node holding the object.
    pub routing_key: String,
    /// Total size in bytes; `None` when the remote did not declare it.
    pub size_bytes: Option<u64>,
    pub kind: MediaKind,
    /// Opaque, time-limited file reference.
    pub reference: String,
    /// Selected photo variant; `None` for documents.
    pub variant: Option<String>,
    /// Original file name when the payload carried one.
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_descriptor_parses_photo_payload() {
        let json = r#"{
            "id": 42,
            "date": 1700000000,
            "media": {
                "type": "photo",
                "id": "p1",
                "access_token": "tok",
                "routing_key": "dc2",
                "sizes": [{"variant": "m", "size": 120}, {"variant": "y", "size": 900}]
            }
        }"#;
        let message: MessageDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(message.id, 42);
        let Some(MediaPayload::Photo(photo)) = message.media else {
            panic!("expected photo payload");
        };
        assert_eq!(photo.sizes.len(), 2);
        assert_eq!(photo.reference, "");
    }

    #[test]
    fn test_message_descriptor_unknown_payload_type_maps_to_other() {
        let json = r#"{"id": 7, "media": {"type": "dice"}}"#;
        let message: MessageDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(message.media, Some(MediaPayload::Other));
        assert_eq!(message.date, 0);
    }

    #[test]
    fn test_message_descriptor_without_media() {
        let message: MessageDescriptor = serde_json::from_str(r#"{"id": 3}"#).unwrap();
        assert!(message.media.is_none());
    }

    #[test]
    fn test_media_payload_labels() {
        assert_eq!(MediaPayload::WebPage.label(), "web_page");
        assert_eq!(MediaPayload::Geo.label(), "geo");
        assert_eq!(MediaKind::Document.as_str(), "document");
    }
}
