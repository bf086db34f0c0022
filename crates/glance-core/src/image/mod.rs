//! Image metadata, streamed RGB conversion and the two-controller panel write.

mod convert;
mod palette;
mod sync;

pub use convert::StreamConverter;
pub use palette::rgb_to_palette;
pub use sync::{ERROR_PATTERN, ImageError, ImageMetadata, ImageSyncPipeline, METADATA_MAX_BYTES};
