use alloc::{string::String, vec::Vec};

use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;

use super::convert::StreamConverter;
use crate::{
    config::{Endpoints, SleepPolicy},
    net::{BufferSink, HttpClient, NetError},
    panel::{Color, Controller, EinkPanel},
    store::{ImageId, PersistentStore},
};
use gdep133c02::{PackedFrame, protocol};

/// Largest metadata document accepted.
pub const METADATA_MAX_BYTES: usize = 1024;

/// Bands shown top to bottom when a download breaks off mid-image.
pub const ERROR_PATTERN: [Color; 6] = [
    Color::Red,
    Color::Yellow,
    Color::Green,
    Color::Blue,
    Color::Black,
    Color::White,
];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ImageError {
    #[error("metadata request failed: {0}")]
    Metadata(NetError),
    #[error("metadata document is malformed")]
    MetadataFormat,
    #[error("image download failed: {0}")]
    Download(NetError),
    #[error("image stream ended after {received} of {expected} pixels")]
    Incomplete { received: usize, expected: usize },
    #[error("frame buffer allocation failed")]
    OutOfMemory,
    #[error("persistent store failed")]
    Store,
    #[error("panel write failed")]
    Panel,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataDocument {
    image_id: String,
    #[serde(default)]
    sleep_duration: Option<f64>,
}

/// What the server wants shown, and for how long to sleep afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageMetadata {
    pub image_id: ImageId,
    /// Already clamped into the sleep policy bounds.
    pub sleep_duration_us: u64,
    pub has_new_image: bool,
}

impl ImageMetadata {
    /// Parses a metadata document and compares it to the last displayed id.
    pub fn from_json(
        bytes: &[u8],
        last_image_id: &str,
        sleep: &SleepPolicy,
    ) -> Result<Self, ImageError> {
        let doc: MetadataDocument =
            serde_json::from_slice(bytes).map_err(|_| ImageError::MetadataFormat)?;

        let mut image_id = ImageId::new();
        if doc.image_id.is_empty() || image_id.push_str(&doc.image_id).is_err() {
            return Err(ImageError::MetadataFormat);
        }

        // Float to int casts saturate; negatives and NaN become zero.
        let requested = doc
            .sleep_duration
            .map(|us| us as u64)
            .unwrap_or(sleep.default_us);

        let has_new_image = last_image_id.is_empty() || last_image_id != image_id.as_str();
        Ok(Self {
            image_id,
            sleep_duration_us: sleep.clamp(requested),
            has_new_image,
        })
    }
}

/// Fetches, converts and displays server images.
pub struct ImageSyncPipeline<'a> {
    endpoints: &'a Endpoints,
    sleep: SleepPolicy,
    width: usize,
    height: usize,
}

impl<'a> ImageSyncPipeline<'a> {
    /// `width` must be even; two pixels share each packed byte.
    pub fn new(endpoints: &'a Endpoints, sleep: SleepPolicy, width: usize, height: usize) -> Self {
        Self {
            endpoints,
            sleep,
            width,
            height,
        }
    }

    fn row_bytes(&self) -> usize {
        self.width / protocol::PIXELS_PER_BYTE
    }

    fn frame_bytes(&self) -> usize {
        self.row_bytes() * self.height
    }

    pub async fn fetch_metadata<H: HttpClient>(
        &self,
        http: &mut H,
        last_image_id: &str,
    ) -> Result<ImageMetadata, ImageError> {
        let mut buf = [0u8; METADATA_MAX_BYTES];
        let mut sink = BufferSink::new(&mut buf);
        http.get(self.endpoints.metadata, &mut sink)
            .await
            .map_err(ImageError::Metadata)?;

        let metadata = ImageMetadata::from_json(sink.bytes(), last_image_id, &self.sleep)?;
        info!(
            "image metadata id={} last={} new={} sleep_us={}",
            metadata.image_id.as_str(),
            last_image_id,
            metadata.has_new_image,
            metadata.sleep_duration_us
        );
        Ok(metadata)
    }

    /// Downloads the image for `metadata` and pushes it to the panel.
    ///
    /// The image id is persisted before the refresh starts, so a brownout
    /// during the refresh is not followed by the same download again. A
    /// stream that breaks off after some pixels shows [`ERROR_PATTERN`]
    /// when `allow_error_pattern` agrees; it is only asked after such a failure.
    pub async fn sync_and_display<H, P, S, G>(
        &self,
        http: &mut H,
        panel: &mut P,
        store: &mut S,
        metadata: &ImageMetadata,
        allow_error_pattern: G,
    ) -> Result<(), ImageError>
    where
        H: HttpClient,
        P: EinkPanel,
        S: PersistentStore,
        G: FnOnce() -> bool,
    {
        let frame_bytes = self.frame_bytes();
        let mut frame = Vec::new();
        frame
            .try_reserve_exact(frame_bytes)
            .map_err(|_| ImageError::OutOfMemory)?;
        frame.resize(frame_bytes, Color::White.packed_pair());

        let expected = self.width * self.height;
        let mut converter = StreamConverter::new(&mut frame, expected);
        let result = http.get(self.endpoints.image, &mut converter).await;
        let received = converter.pixels_written();

        if received < expected {
            if received == 0 {
                let err = result.err().unwrap_or(NetError::Io);
                warn!("image download failed before any pixel: {}", err);
                return Err(ImageError::Download(err));
            }

            warn!(
                "image stream incomplete received={} expected={} result={:?}",
                received, expected, result
            );
            if !allow_error_pattern() {
                info!("image error pattern skipped; battery too low");
            } else if let Err(err) = self.show_error_pattern(panel, store, &mut frame) {
                warn!("image error pattern not shown: {}", err);
            }
            return Err(ImageError::Incomplete { received, expected });
        }

        let mut record = store.load().map_err(|err| {
            warn!("image store load failed: {:?}", err);
            ImageError::Store
        })?;
        record.set_last_image_id(&metadata.image_id);
        store.save(&record).map_err(|err| {
            warn!("image store save failed: {:?}", err);
            ImageError::Store
        })?;

        info!(
            "image converted pixels={} id={}; refreshing",
            received,
            metadata.image_id.as_str()
        );
        self.display(panel, store, &frame)
    }

    fn show_error_pattern<P: EinkPanel, S: PersistentStore>(
        &self,
        panel: &mut P,
        store: &mut S,
        frame: &mut [u8],
    ) -> Result<(), ImageError> {
        let row_bytes = self.row_bytes();
        let band = self.height.div_ceil(ERROR_PATTERN.len()).max(1);
        let mut packed = PackedFrame::new(frame);
        for (index, color) in ERROR_PATTERN.iter().enumerate() {
            packed.fill_rows(index * band..(index + 1) * band, row_bytes, *color);
        }

        self.display(panel, store, packed.bytes())
    }

    /// Writes a packed frame with the refresh bracketed by the operation flag.
    fn display<P: EinkPanel, S: PersistentStore>(
        &self,
        panel: &mut P,
        store: &mut S,
        frame: &[u8],
    ) -> Result<(), ImageError> {
        store.mark_operation_start().map_err(|err| {
            warn!("image operation flag not set: {:?}", err);
            ImageError::Store
        })?;

        let result = self.write_frame(panel, frame);

        if let Err(err) = store.mark_operation_end() {
            warn!("image operation flag not cleared: {:?}", err);
        }
        result
    }

    fn write_frame<P: EinkPanel>(&self, panel: &mut P, frame: &[u8]) -> Result<(), ImageError> {
        let row_bytes = self.row_bytes();
        let packed = PackedFrame::new(frame);
        let panel_err = |err: P::Error| {
            warn!("image panel error: {:?}", err);
            ImageError::Panel
        };

        panel.init().map_err(panel_err)?;

        for target in [Controller::Left, Controller::Right] {
            let span = target.row_span(row_bytes);
            panel
                .write_command(target, protocol::DTM)
                .map_err(panel_err)?;
            for row in 0..self.height {
                let bytes = packed
                    .row_slice(row, row_bytes, span.clone())
                    .ok_or(ImageError::Panel)?;
                panel.write_data(target, bytes).map_err(panel_err)?;
            }
        }

        panel.refresh().map_err(panel_err)?;
        panel.sleep().map_err(panel_err)
    }
}
