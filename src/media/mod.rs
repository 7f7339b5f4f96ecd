//! Message payload model and media locator resolution.
//!
//! A message carries at most one media payload. The payload shapes the remote
//! service can return are modelled as the closed [`MediaPayload`] variant, and
//! [`resolve_locator`] turns a downloadable payload into a [`MediaLocator`]
//! exactly once, before any transfer starts.
//!
//! Only photos and documents are downloadable. Everything else (web page
//! previews, polls, locations, contacts, and stickers unless explicitly
//! allowed) is rejected here rather than at the transfer layer.

mod resolve;
mod types;

pub use resolve::{DownloadKind, MediaFilter, Resolution, resolve_locator};
pub use types::{
    DocumentMedia, MediaKind, MediaLocator, MediaPayload, MessageDescriptor, PhotoMedia, PhotoSize,
};
