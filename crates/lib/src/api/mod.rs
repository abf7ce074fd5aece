//! Client side of the chat and file-indexing service.
//!
//! Streaming chat/document queries, file upload and listing, and the indexing status channel.

mod client;
pub mod status;
pub mod stream;

pub use client::{ApiClient, ApiError, StreamRequest, UploadOutcome, UploadResponse, UploadedFile};
pub use status::{StatusStream, StatusUpdate, DONE_MARKER};
pub use stream::{decode_fragments, handle_stream, FragmentStream, Utf8Decoder};
