//! Firmware version negotiation, streamed flashing and rollback acknowledgment.

use alloc::{string::String, vec::Vec};
use core::fmt::Debug;

use log::{info, warn};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{
    config::{Endpoints, UpdateLimits},
    net::{BufferSink, ChunkSink, Flow, HttpClient, NetError},
};

/// Rollback state of the running image as tracked by the bootloader.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageState {
    /// Written and activated but never booted, or booted without rollback support.
    New,
    /// First boot after an update; the bootloader rolls back unless confirmed.
    PendingVerify,
    Valid,
    Invalid,
    Aborted,
    Undefined,
}

/// Inactive application partition plus boot selection.
pub trait FirmwareSlot {
    type Error: Debug;

    fn running_state(&mut self) -> Result<ImageState, Self::Error>;

    /// Marks the running image valid, cancelling automatic rollback.
    fn confirm_running(&mut self) -> Result<(), Self::Error>;

    /// Size of the partition an update would be written to, `None` if there is none.
    fn inactive_capacity(&mut self) -> Result<Option<u32>, Self::Error>;

    /// Prepares the inactive partition for an image of `size` bytes.
    fn begin(&mut self, size: u32) -> Result<(), Self::Error>;

    /// Writes image bytes at `offset`. Offsets arrive in increasing order.
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Flushes pending writes and points the bootloader at the new image.
    fn activate(&mut self) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum UpdateError {
    #[error("network: {0}")]
    Net(#[from] NetError),
    #[error("version descriptor is malformed")]
    Descriptor,
    #[error("version descriptor exceeds {0} bytes")]
    DescriptorTooLarge(usize),
    #[error("firmware size {0} outside accepted bounds")]
    SizeOutOfBounds(u32),
    #[error("sha256 field is not 64 hex characters")]
    BadDigest,
    #[error("no inactive firmware partition")]
    PartitionUnavailable,
    #[error("firmware size {size} exceeds partition capacity {capacity}")]
    PartitionTooSmall { size: u32, capacity: u32 },
    #[error("flash operation failed")]
    Flash,
    #[error("received {received} bytes, expected {expected}")]
    SizeMismatch { expected: u32, received: u32 },
    #[error("sha256 digest mismatch")]
    DigestMismatch,
    #[error("buffer allocation failed")]
    OutOfMemory,
}

/// Identity of the running firmware.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FirmwareIdentity {
    pub version: &'static str,
    /// Build timestamp, `None` for untimestamped builds.
    pub build_date: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionDescriptor {
    version: String,
    #[serde(default)]
    build_date: u32,
    size: u32,
    #[serde(default)]
    sha256: String,
    #[serde(default)]
    min_battery: Option<f32>,
    #[serde(default)]
    force_update: bool,
}

/// Server description of the available firmware.
#[derive(Clone, Debug, PartialEq)]
pub struct OtaVersionInfo {
    pub version: String,
    /// `0` when the server did not provide one.
    pub build_date: u32,
    pub size: u32,
    /// Lowercase hex digest, empty when absent.
    pub sha256: String,
    pub min_battery: f32,
    pub force_update: bool,
}

impl OtaVersionInfo {
    /// Parses a descriptor; a missing `minBattery` becomes `default_min_battery`.
    pub fn from_json(bytes: &[u8], default_min_battery: f32) -> Result<Self, UpdateError> {
        let wire: VersionDescriptor =
            serde_json::from_slice(bytes).map_err(|_| UpdateError::Descriptor)?;

        Ok(Self {
            version: wire.version,
            build_date: wire.build_date,
            size: wire.size,
            sha256: wire.sha256,
            min_battery: wire.min_battery.unwrap_or(default_min_battery),
            force_update: wire.force_update,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateDecision {
    /// Server override; comparison skipped.
    Forced,
    Newer,
    UpToDate,
    /// Versions not comparable without enough build metadata.
    Refused,
}

impl UpdateDecision {
    pub fn should_update(self) -> bool {
        matches!(self, Self::Forced | Self::Newer)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forced => "forced",
            Self::Newer => "newer",
            Self::UpToDate => "up_to_date",
            Self::Refused => "refused",
        }
    }
}

/// Parses `major.minor.patch` with plain decimal fields.
fn numeric_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.split('.');
    let mut field = || -> Option<u32> {
        let part = parts.next()?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        part.parse().ok()
    };

    let version = (field()?, field()?, field()?);
    if parts.next().is_some() {
        return None;
    }
    Some(version)
}

/// Decides whether `server` should replace `current`.
pub fn decide_update(current: &FirmwareIdentity, server: &OtaVersionInfo) -> UpdateDecision {
    if server.force_update {
        return UpdateDecision::Forced;
    }
    if server.version == current.version {
        return UpdateDecision::UpToDate;
    }

    if let (Some(local), Some(remote)) = (
        numeric_version(current.version),
        numeric_version(&server.version),
    ) {
        return if remote > local {
            UpdateDecision::Newer
        } else {
            UpdateDecision::UpToDate
        };
    }

    let remote_date = (server.build_date != 0).then_some(server.build_date);
    let local_date = current.build_date.filter(|date| *date != 0);
    match (remote_date, local_date) {
        (Some(remote), Some(local)) if remote > local => UpdateDecision::Newer,
        (Some(_), Some(_)) => UpdateDecision::Refused,
        (Some(_), None) => UpdateDecision::Newer,
        (None, _) => UpdateDecision::Refused,
    }
}

fn parse_digest(hex: &str) -> Result<Option<[u8; 32]>, UpdateError> {
    if hex.is_empty() {
        return Ok(None);
    }

    let bytes = hex.as_bytes();
    if bytes.len() != 64 {
        return Err(UpdateError::BadDigest);
    }

    let nibble = |c: u8| -> Result<u8, UpdateError> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err(UpdateError::BadDigest),
        }
    };

    let mut digest = [0u8; 32];
    for (out, pair) in digest.iter_mut().zip(bytes.chunks_exact(2)) {
        *out = (nibble(pair[0])? << 4) | nibble(pair[1])?;
    }
    Ok(Some(digest))
}

/// Writes streamed firmware into the inactive slot while hashing it.
struct FlashSink<'a, F: FirmwareSlot> {
    slot: &'a mut F,
    hasher: Sha256,
    expected: u32,
    written: u32,
    failure: Option<UpdateError>,
}

impl<F: FirmwareSlot> ChunkSink for FlashSink<'_, F> {
    fn begin(&mut self, content_length: Option<u32>) -> Flow {
        match content_length {
            Some(len) if len != self.expected => {
                self.failure = Some(UpdateError::SizeMismatch {
                    expected: self.expected,
                    received: len,
                });
                Flow::Abort
            }
            _ => Flow::Continue,
        }
    }

    fn chunk(&mut self, bytes: &[u8]) -> Flow {
        let received = self.written.saturating_add(bytes.len() as u32);
        if received > self.expected {
            self.failure = Some(UpdateError::SizeMismatch {
                expected: self.expected,
                received,
            });
            return Flow::Abort;
        }

        if let Err(err) = self.slot.write(self.written, bytes) {
            warn!("ota flash write failed offset={} err={:?}", self.written, err);
            self.failure = Some(UpdateError::Flash);
            return Flow::Abort;
        }

        self.hasher.update(bytes);
        self.written = received;
        Flow::Continue
    }
}

/// Version check and firmware flashing for one wake cycle.
pub struct UpdatePipeline<'a> {
    endpoints: &'a Endpoints,
    limits: UpdateLimits,
    identity: FirmwareIdentity,
    default_min_battery: f32,
}

impl<'a> UpdatePipeline<'a> {
    pub fn new(
        endpoints: &'a Endpoints,
        limits: UpdateLimits,
        identity: FirmwareIdentity,
        default_min_battery: f32,
    ) -> Self {
        Self {
            endpoints,
            limits,
            identity,
            default_min_battery,
        }
    }

    /// Fetches the version descriptor; returns it only when an update should be applied.
    pub async fn check_version<H: HttpClient>(
        &self,
        http: &mut H,
    ) -> Result<Option<OtaVersionInfo>, UpdateError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(self.limits.max_descriptor_bytes)
            .map_err(|_| UpdateError::OutOfMemory)?;
        buf.resize(self.limits.max_descriptor_bytes, 0);

        let mut sink = BufferSink::new(&mut buf);
        match http.get(self.endpoints.version, &mut sink).await {
            Ok(_) => {}
            Err(NetError::Aborted) if sink.overflowed() => {
                return Err(UpdateError::DescriptorTooLarge(
                    self.limits.max_descriptor_bytes,
                ));
            }
            Err(err) => return Err(err.into()),
        }

        let info = OtaVersionInfo::from_json(sink.bytes(), self.default_min_battery)?;
        let decision = decide_update(&self.identity, &info);
        info!(
            "ota check current={} server={} build_date={} decision={}",
            self.identity.version,
            info.version,
            info.build_date,
            decision.as_str()
        );

        Ok(decision.should_update().then_some(info))
    }

    /// Downloads and flashes `info`, then switches the boot partition.
    ///
    /// On `Ok` the new image runs after the next reset.
    pub async fn apply_update<H: HttpClient, F: FirmwareSlot>(
        &self,
        http: &mut H,
        slot: &mut F,
        info: &OtaVersionInfo,
    ) -> Result<(), UpdateError> {
        if info.size < self.limits.min_firmware_bytes || info.size > self.limits.max_firmware_bytes
        {
            return Err(UpdateError::SizeOutOfBounds(info.size));
        }
        let expected_digest = parse_digest(&info.sha256)?;

        let capacity = match slot.inactive_capacity() {
            Ok(Some(capacity)) => capacity,
            Ok(None) => return Err(UpdateError::PartitionUnavailable),
            Err(err) => {
                warn!("ota partition lookup failed: {:?}", err);
                return Err(UpdateError::PartitionUnavailable);
            }
        };
        if info.size > capacity {
            return Err(UpdateError::PartitionTooSmall {
                size: info.size,
                capacity,
            });
        }

        slot.begin(info.size).map_err(|err| {
            warn!("ota partition prepare failed: {:?}", err);
            UpdateError::Flash
        })?;

        info!(
            "ota downloading version={} size={} verify_digest={}",
            info.version,
            info.size,
            expected_digest.is_some()
        );

        let mut sink = FlashSink {
            slot,
            hasher: Sha256::new(),
            expected: info.size,
            written: 0,
            failure: None,
        };
        let transfer = http.get(self.endpoints.firmware, &mut sink).await;
        if let Some(failure) = sink.failure {
            return Err(failure);
        }
        transfer?;

        if sink.written != info.size {
            return Err(UpdateError::SizeMismatch {
                expected: info.size,
                received: sink.written,
            });
        }

        let FlashSink { slot, hasher, .. } = sink;
        if let Some(expected) = expected_digest {
            let digest = hasher.finalize();
            if digest.as_slice() != expected.as_slice() {
                return Err(UpdateError::DigestMismatch);
            }
        }

        slot.activate().map_err(|err| {
            warn!("ota activate failed: {:?}", err);
            UpdateError::Flash
        })?;
        info!("ota image written and activated version={}", info.version);
        Ok(())
    }
}

/// Confirms a freshly updated image so the bootloader keeps it.
///
/// Returns `true` when the image had not been confirmed yet.
pub fn mark_firmware_valid<F: FirmwareSlot>(slot: &mut F) -> Result<bool, F::Error> {
    match slot.running_state()? {
        ImageState::New | ImageState::PendingVerify => {
            slot.confirm_running()?;
            info!("ota running image confirmed; rollback cancelled");
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests;
