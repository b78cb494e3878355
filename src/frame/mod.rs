//! Frame codec: padding buckets, content sub-encoding, AEAD framing.

pub mod codec;
pub mod content;
pub mod padding;

pub use codec::{construct_aad, open_frame, parse_frame, seal_frame, FrameView};
pub use content::{Content, ContentType};
