use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::types::{DocumentMedia, MediaKind, MediaLocator, MediaPayload, MessageDescriptor, PhotoMedia};

/// Payload categories a run may opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadKind {
    Photo,
    Document,
    Sticker,
}

impl FromStr for DownloadKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "photo" | "photos" => Ok(Self::Photo),
            "document" | "documents" | "doc" => Ok(Self::Document),
            "sticker" | "stickers" => Ok(Self::Sticker),
            other => Err(format!(
                "unknown media kind '{other}' (expected photo, document or sticker)"
            )),
        }
    }
}

/// Which messages produce transfer jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFilter {
    /// Allowed payload categories.
    pub kinds: Vec<DownloadKind>,
    /// Skip messages sent before this unix time.
    pub min_date: Option<i64>,
    /// Skip messages sent after this unix time.
    pub max_date: Option<i64>,
    /// Lowercase document extensions without the dot; empty allows all.
    pub extensions: Vec<String>,
}

impl Default for MediaFilter {
    fn default() -> Self {
        Self {
            kinds: vec![DownloadKind::Photo, DownloadKind::Document],
            min_date: None,
            max_date: None,
            extensions: Vec::new(),
        }
    }
}

impl MediaFilter {
    fn allows(&self, kind: DownloadKind) -> bool {
        self.kinds.contains(&kind)
    }

    fn date_in_range(&self, date: i64) -> bool {
        self.min_date.is_none_or(|min| date >= min) && self.max_date.is_none_or(|max| date <= max)
    }

    fn extension_allowed(&self, file_name: Option<&str>) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let Some(ext) = file_name
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
        else {
            return false;
        };
        self.extensions.iter().any(|allowed| *allowed == ext)
    }
}

/// Outcome of resolving one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Downloadable object.
    Media(MediaLocator),
    /// The message carries no media.
    NoMedia,
    /// The payload is of a kind this engine never downloads.
    Unsupported {
        /// Payload label.
        kind: &'static str,
    },
    /// Downloadable in principle but excluded by the run's filter.
    Filtered {
        /// Why the message was excluded.
        reason: &'static str,
    },
}

/// Resolves a message's payload into a [`MediaLocator`].
///
/// Photos resolve to their largest variant by byte size (first seen wins a
/// tie). Documents use their declared size; a zero or missing size is
/// reported as unknown so the transfer learns it from the remote.
#[must_use]
pub fn resolve_locator(message: &MessageDescriptor, filter: &MediaFilter) -> Resolution {
    let Some(payload) = message.media.as_ref() else {
        return Resolution::NoMedia;
    };

    let resolution = match payload {
        MediaPayload::Photo(photo) => {
            if !filter.allows(DownloadKind::Photo) {
                return Resolution::Filtered {
                    reason: "photos not selected",
                };
            }
            photo_locator(photo).map_or(Resolution::Unsupported { kind: "photo" }, Resolution::Media)
        }
        MediaPayload::Document(doc) => {
            if !filter.allows(DownloadKind::Document) {
                return Resolution::Filtered {
                    reason: "documents not selected",
                };
            }
            if !filter.extension_allowed(doc.file_name.as_deref()) {
                return Resolution::Filtered {
                    reason: "extension not selected",
                };
            }
            Resolution::Media(document_locator(doc))
        }
        MediaPayload::Sticker(doc) => {
            if !filter.allows(DownloadKind::Sticker) {
                return Resolution::Unsupported { kind: "sticker" };
            }
            Resolution::Media(document_locator(doc))
        }
        other => Resolution::Unsupported { kind: other.label() },
    };

    if matches!(resolution, Resolution::Media(_)) && !filter.date_in_range(message.date) {
        return Resolution::Filtered {
            reason: "outside date range",
        };
    }

    trace!(message_id = message.id, kind = payload.label(), "resolved message payload");
    resolution
}

fn photo_locator(photo: &PhotoMedia) -> Option<MediaLocator> {
    let mut best = photo.sizes.first()?;
    for candidate in &photo.sizes[1..] {
        if candidate.size > best.size {
            best = candidate;
        }
    }

    Some(MediaLocator {
        locator_id: photo.id.clone(),
        access_token: photo.access_token.clone(),
        routing_key: photo.routing_key.clone(),
        size_bytes: (best.size > 0).then_some(best.size),
        kind: MediaKind::Photo,
        reference: photo.reference.clone(),
        variant: Some(best.variant.clone()),
        file_name: None,
        mime_type: Some("image/jpeg".to_string()),
    })
}

fn document_locator(doc: &DocumentMedia) -> MediaLocator {
    MediaLocator {
        locator_id: doc.id.clone(),
        access_token: doc.access_token.clone(),
        routing_key: doc.routing_key.clone(),
        size_bytes: doc.size.filter(|size| *size > 0),
        kind: MediaKind::Document,
        reference: doc.reference.clone(),
        variant: None,
        file_name: doc.file_name.clone(),
        mime_type: doc.mime_type.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::media::PhotoSize;

    fn photo(sizes: &[(&str, u64)]) -> MediaPayload {
        MediaPayload::Photo(PhotoMedia {
            id: "p1".to_string(),
            access_token: "tok".to_string(),
            routing_key: "dc1".to_string(),
            reference: "ref".to_string(),
            sizes: sizes
                .iter()
                .map(|(variant, size)| PhotoSize {
                    variant: (*variant).to_string(),
                    size: *size,
                })
                .collect(),
        })
    }

    fn document(file_name: Option<&str>, size: Option<u64>) -> DocumentMedia {
        DocumentMedia {
            id: "d1".to_string(),
            access_token: "tok".to_string(),
            routing_key: "dc4".to_string(),
            reference: "ref".to_string(),
            size,
            file_name: file_name.map(str::to_string),
            mime_type: Some("application/pdf".to_string()),
        }
    }

    fn message(media: Option<MediaPayload>) -> MessageDescriptor {
        MessageDescriptor {
            id: 10,
            date: 1_700_000_000,
            media,
        }
    }

    #[test]
    fn test_resolve_no_media() {
        let resolution = resolve_locator(&message(None), &MediaFilter::default());
        assert_eq!(resolution, Resolution::NoMedia);
    }

    #[test]
    fn test_resolve_photo_picks_largest_variant() {
        let msg = message(Some(photo(&[("s", 100), ("x", 5000), ("m", 900)])));
        let Resolution::Media(locator) = resolve_locator(&msg, &MediaFilter::default()) else {
            panic!("expected media");
        };
        assert_eq!(locator.variant.as_deref(), Some("x"));
        assert_eq!(locator.size_bytes, Some(5000));
        assert_eq!(locator.kind, MediaKind::Photo);
    }

    #[test]
    fn test_resolve_photo_tie_keeps_first_seen() {
        let msg = message(Some(photo(&[("a", 700), ("b", 700), ("c", 10)])));
        let Resolution::Media(locator) = resolve_locator(&msg, &MediaFilter::default()) else {
            panic!("expected media");
        };
        assert_eq!(locator.variant.as_deref(), Some("a"));
    }

    #[test]
    fn test_resolve_photo_without_variants_is_unsupported() {
        let msg = message(Some(photo(&[])));
        assert_eq!(
            resolve_locator(&msg, &MediaFilter::default()),
            Resolution::Unsupported { kind: "photo" }
        );
    }

    #[test]
    fn test_resolve_document_uses_declared_size() {
        let msg = message(Some(MediaPayload::Document(document(Some("a.pdf"), Some(2048)))));
        let Resolution::Media(locator) = resolve_locator(&msg, &MediaFilter::default()) else {
            panic!("expected media");
        };
        assert_eq!(locator.size_bytes, Some(2048));
        assert_eq!(locator.file_name.as_deref(), Some("a.pdf"));
        assert!(locator.variant.is_none());
    }

    #[test]
    fn test_resolve_document_zero_size_is_unknown() {
        let msg = message(Some(MediaPayload::Document(document(None, Some(0)))));
        let Resolution::Media(locator) = resolve_locator(&msg, &MediaFilter::default()) else {
            panic!("expected media");
        };
        assert_eq!(locator.size_bytes, None);
    }

    #[test]
    fn test_resolve_rejects_non_downloadable_kinds() {
        for (payload, label) in [
            (MediaPayload::WebPage, "web_page"),
            (MediaPayload::Poll, "poll"),
            (MediaPayload::Geo, "geo"),
            (MediaPayload::Contact, "contact"),
            (MediaPayload::Other, "other"),
        ] {
            assert_eq!(
                resolve_locator(&message(Some(payload)), &MediaFilter::default()),
                Resolution::Unsupported { kind: label }
            );
        }
    }

    #[test]
    fn test_resolve_sticker_requires_opt_in() {
        let msg = message(Some(MediaPayload::Sticker(document(Some("s.webp"), Some(10)))));
        assert_eq!(
            resolve_locator(&msg, &MediaFilter::default()),
            Resolution::Unsupported { kind: "sticker" }
        );

        let filter = MediaFilter {
            kinds: vec![DownloadKind::Sticker],
            ..MediaFilter::default()
        };
        let Resolution::Media(locator) = resolve_locator(&msg, &filter) else {
            panic!("expected media");
        };
        assert_eq!(locator.kind, MediaKind::Document);
    }

    #[test]
    fn test_resolve_kind_filter() {
        let filter = MediaFilter {
            kinds: vec![DownloadKind::Document],
            ..MediaFilter::default()
        };
        let msg = message(Some(photo(&[("x", 10)])));
        assert!(matches!(
            resolve_locator(&msg, &filter),
            Resolution::Filtered { .. }
        ));
    }

    #[test]
    fn test_resolve_date_window() {
        let filter = MediaFilter {
            min_date: Some(1_800_000_000),
            ..MediaFilter::default()
        };
        let msg = message(Some(photo(&[("x", 10)])));
        assert_eq!(
            resolve_locator(&msg, &filter),
            Resolution::Filtered {
                reason: "outside date range"
            }
        );
    }

    #[test]
    fn test_resolve_extension_allow_list() {
        let filter = MediaFilter {
            extensions: vec!["mp4".to_string()],
            ..MediaFilter::default()
        };
        let pdf = message(Some(MediaPayload::Document(document(Some("a.PDF"), Some(1)))));
        let mp4 = message(Some(MediaPayload::Document(document(Some("clip.MP4"), Some(1)))));
        let unnamed = message(Some(MediaPayload::Document(document(None, Some(1)))));
        assert!(matches!(resolve_locator(&pdf, &filter), Resolution::Filtered { .. }));
        assert!(matches!(resolve_locator(&mp4, &filter), Resolution::Media(_)));
        assert!(matches!(resolve_locator(&unnamed, &filter), Resolution::Filtered { .. }));
    }

    #[test]
    fn test_download_kind_from_str() {
        assert_eq!("Photos".parse::<DownloadKind>().unwrap(), DownloadKind::Photo);
        assert_eq!(" doc ".parse::<DownloadKind>().unwrap(), DownloadKind::Document);
        assert!("video".parse::<DownloadKind>().is_err());
    }
}
