use std::path::{Path, PathBuf};

use super::DestinationNamer;
use crate::media::{MediaKind, MediaLocator, MessageDescriptor};

/// Places every object directly in one directory as
/// `<message_id>_<file name>`.
///
/// Names are a pure function of the message and locator, so a re-run maps
/// each message to the same path and finds it already complete.
#[derive(Debug, Clone)]
pub struct FlatNamer {
    output_dir: PathBuf,
}

impl FlatNamer {
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Returns the directory files are placed in.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl DestinationNamer for FlatNamer {
    fn destination_for(&self, message: &MessageDescriptor, locator: &MediaLocator) -> PathBuf {
        let stem = locator
            .file_name
            .as_deref()
            .map(sanitize_filename_component)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| {
                let id = sanitize_filename_component(&locator.locator_id);
                format!("{id}{}", fallback_extension(locator))
            });
        self.output_dir.join(format!("{}_{stem}", message.id))
    }
}

/// Replaces path separators, reserved characters and whitespace with `_`,
/// collapsing runs and trimming the ends.
pub(crate) fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            c if c.is_alphanumeric() || matches!(c, '-' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches(|c| c == '_' || c == '.').to_string()
}

fn fallback_extension(locator: &MediaLocator) -> &'static str {
    if locator.kind == MediaKind::Photo {
        return ".jpg";
    }
    locator
        .mime_type
        .as_deref()
        .map_or(".bin", extension_from_mime)
}

/// Guess a file extension from a MIME type.
fn extension_from_mime(mime: &str) -> &'static str {
    let mime = mime.split(';').next().unwrap_or("").trim().to_lowercase();
    match mime.as_str() {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "video/mp4" => ".mp4",
        "video/quicktime" => ".mov",
        "audio/mpeg" => ".mp3",
        "audio/ogg" => ".ogg",
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "text/plain" => ".txt",
        _ => ".bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator(file_name: Option<&str>, kind: MediaKind, mime: Option<&str>) -> MediaLocator {
        MediaLocator {
            locator_id: "5512".to_string(),
            access_token: String::new(),
            routing_key: "dc1".to_string(),
            size_bytes: None,
            kind,
            reference: String::new(),
            variant: None,
            file_name: file_name.map(str::to_string),
            mime_type: mime.map(str::to_string),
        }
    }

    fn message(id: i64) -> MessageDescriptor {
        MessageDescriptor {
            id,
            date: 0,
            media: None,
        }
    }

    #[test]
    fn test_flat_namer_uses_file_name() {
        let namer = FlatNamer::new("/out");
        let path = namer.destination_for(
            &message(7),
            &locator(Some("Quarterly Report.pdf"), MediaKind::Document, None),
        );
        assert_eq!(path, PathBuf::from("/out/7_Quarterly_Report.pdf"));
    }

    #[test]
    fn test_flat_namer_neutralizes_path_traversal() {
        let namer = FlatNamer::new("/out");
        let path = namer.destination_for(
            &message(8),
            &locator(Some("../../etc/passwd"), MediaKind::Document, None),
        );
        assert_eq!(path, PathBuf::from("/out/8_etc_passwd"));
    }

    #[test]
    fn test_flat_namer_fallbacks() {
        let namer = FlatNamer::new("/out");
        assert_eq!(
            namer.destination_for(&message(1), &locator(None, MediaKind::Photo, None)),
            PathBuf::from("/out/1_5512.jpg")
        );
        assert_eq!(
            namer.destination_for(
                &message(2),
                &locator(None, MediaKind::Document, Some("video/mp4"))
            ),
            PathBuf::from("/out/2_5512.mp4")
        );
        assert_eq!(
            namer.destination_for(&message(3), &locator(Some("///"), MediaKind::Document, None)),
            PathBuf::from("/out/3_5512.bin")
        );
    }

    #[test]
    fn test_sanitize_filename_component() {
        assert_eq!(sanitize_filename_component("a  b\tc"), "a_b_c");
        assert_eq!(sanitize_filename_component("..hidden."), "hidden");
        assert_eq!(sanitize_filename_component("naïve.txt"), "naïve.txt");
    }
}
