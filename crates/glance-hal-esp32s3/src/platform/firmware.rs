use embedded_storage::Storage;
use esp_bootloader_esp_idf::{
    ota::OtaImageState,
    ota_updater::OtaUpdater,
    partitions::{self, PARTITION_TABLE_MAX_LEN},
};
use glance_core::update::{FirmwareSlot, ImageState};
use log::{debug, warn};

use crate::storage::raw_flash::{FLASH_SECTOR_SIZE, FlashError, RawFlash};

const SECTOR_LEN: usize = FLASH_SECTOR_SIZE as usize;

#[derive(Debug)]
pub enum OtaError {
    Flash(FlashError),
    Partition(partitions::Error),
    /// A write did not continue where the previous one ended.
    OutOfOrder { expected: u32, got: u32 },
    /// More bytes arrived than announced in `begin`.
    Overrun,
}

impl From<FlashError> for OtaError {
    fn from(value: FlashError) -> Self {
        Self::Flash(value)
    }
}

impl From<partitions::Error> for OtaError {
    fn from(value: partitions::Error) -> Self {
        Self::Partition(value)
    }
}

/// Inactive OTA partition behind the ESP-IDF bootloader.
///
/// Incoming bytes are gathered into whole sectors so every sector is erased
/// and programmed once.
pub struct OtaSlot {
    flash: RawFlash,
    table: [u8; PARTITION_TABLE_MAX_LEN],
    sector: [u8; SECTOR_LEN],
    sector_base: u32,
    filled: usize,
    expected: u32,
}

impl OtaSlot {
    pub fn new() -> Result<Self, OtaError> {
        Ok(Self {
            flash: RawFlash::new()?,
            table: [0u8; PARTITION_TABLE_MAX_LEN],
            sector: [0xFF; SECTOR_LEN],
            sector_base: 0,
            filled: 0,
            expected: 0,
        })
    }

    fn flush_sector(&mut self) -> Result<(), OtaError> {
        if self.filled == 0 {
            return Ok(());
        }

        self.sector[self.filled..].fill(0xFF);

        let mut ota = OtaUpdater::new(&mut self.flash, &mut self.table)?;
        let (mut region, _) = ota.next_partition()?;
        region.write(self.sector_base, &self.sector)?;

        self.sector_base += FLASH_SECTOR_SIZE;
        self.filled = 0;
        Ok(())
    }
}

impl FirmwareSlot for OtaSlot {
    type Error = OtaError;

    fn running_state(&mut self) -> Result<ImageState, Self::Error> {
        let mut ota = OtaUpdater::new(&mut self.flash, &mut self.table)?;
        let state = match ota.current_ota_state()? {
            OtaImageState::New => ImageState::New,
            OtaImageState::PendingVerify => ImageState::PendingVerify,
            OtaImageState::Valid => ImageState::Valid,
            OtaImageState::Invalid => ImageState::Invalid,
            OtaImageState::Aborted => ImageState::Aborted,
            OtaImageState::Undefined => ImageState::Undefined,
        };
        Ok(state)
    }

    fn confirm_running(&mut self) -> Result<(), Self::Error> {
        let mut ota = OtaUpdater::new(&mut self.flash, &mut self.table)?;
        ota.set_current_ota_state(OtaImageState::Valid)?;
        Ok(())
    }

    fn inactive_capacity(&mut self) -> Result<Option<u32>, Self::Error> {
        let mut ota = OtaUpdater::new(&mut self.flash, &mut self.table)?;
        match ota.next_partition() {
            Ok((region, kind)) => {
                debug!("ota: next partition {:?} capacity={}", kind, region.capacity());
                Ok(Some(region.capacity() as u32))
            }
            Err(err) => {
                warn!("ota: no inactive partition err={:?}", err);
                Ok(None)
            }
        }
    }

    fn begin(&mut self, size: u32) -> Result<(), Self::Error> {
        self.sector.fill(0xFF);
        self.sector_base = 0;
        self.filled = 0;
        self.expected = size;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let position = self.sector_base + self.filled as u32;
        if offset != position {
            return Err(OtaError::OutOfOrder {
                expected: position,
                got: offset,
            });
        }
        if position as u64 + bytes.len() as u64 > self.expected as u64 {
            return Err(OtaError::Overrun);
        }

        let mut remaining = bytes;
        while !remaining.is_empty() {
            let take = (SECTOR_LEN - self.filled).min(remaining.len());
            self.sector[self.filled..self.filled + take].copy_from_slice(&remaining[..take]);
            self.filled += take;
            remaining = &remaining[take..];

            if self.filled == SECTOR_LEN {
                self.flush_sector()?;
            }
        }

        Ok(())
    }

    fn activate(&mut self) -> Result<(), Self::Error> {
        self.flush_sector()?;

        let mut ota = OtaUpdater::new(&mut self.flash, &mut self.table)?;
        ota.activate_next_partition()?;
        ota.set_current_ota_state(OtaImageState::New)?;
        debug!("ota: activated image of {} bytes", self.expected);
        Ok(())
    }
}
