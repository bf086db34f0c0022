use esp_bootloader_esp_idf::partitions::{
    DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType, read_partition_table,
};
use glance_core::store::{
    PersistentRecord, PersistentStore, RECORD_LEN, encode_record, newest_record,
};
use log::{debug, warn};

use super::raw_flash::{FLASH_SECTOR_SIZE, FlashError, RawFlash};

const RECORD_SECTORS: u32 = 2;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashRecordError {
    Flash(FlashError),
    PartitionTable,
    RecordPartitionMissing,
    PartitionTooSmall,
}

impl From<FlashError> for FlashRecordError {
    fn from(value: FlashError) -> Self {
        Self::Flash(value)
    }
}

/// Node record kept in the last two sectors of a data partition.
///
/// Saves alternate between the sectors, so a reset mid-write leaves the
/// previous copy intact.
pub struct FlashRecordStore {
    flash: RawFlash,
    slot_addrs: [u32; 2],
    sequence: u32,
    next_slot: usize,
}

impl FlashRecordStore {
    pub fn new() -> Result<Self, FlashRecordError> {
        let mut flash = RawFlash::new()?;

        let mut table_buf = [0u8; PARTITION_TABLE_MAX_LEN];
        let table = read_partition_table(&mut flash, &mut table_buf)
            .map_err(|_| FlashRecordError::PartitionTable)?;

        let mut best_data_undefined: Option<(u32, u32)> = None;
        let mut fallback_nvs: Option<(u32, u32)> = None;

        for entry in table.iter() {
            if entry.is_read_only() {
                continue;
            }

            match entry.partition_type() {
                PartitionType::Data(DataPartitionSubType::Undefined) => {
                    best_data_undefined = Some((entry.offset(), entry.len()));
                    break;
                }
                PartitionType::Data(DataPartitionSubType::Nvs) => {
                    if fallback_nvs.is_none() {
                        fallback_nvs = Some((entry.offset(), entry.len()));
                    }
                }
                _ => {}
            }
        }

        let (offset, len) = best_data_undefined
            .or(fallback_nvs)
            .ok_or(FlashRecordError::RecordPartitionMissing)?;

        if len < RECORD_SECTORS * FLASH_SECTOR_SIZE {
            return Err(FlashRecordError::PartitionTooSmall);
        }

        let last = offset + len - FLASH_SECTOR_SIZE;
        debug!("record: sectors at {:#x} and {:#x}", last - FLASH_SECTOR_SIZE, last);

        Ok(Self {
            flash,
            slot_addrs: [last - FLASH_SECTOR_SIZE, last],
            sequence: 0,
            next_slot: 0,
        })
    }

    fn read_slots(&mut self) -> Result<([u8; RECORD_LEN], [u8; RECORD_LEN]), FlashError> {
        let mut a = [0xFFu8; RECORD_LEN];
        let mut b = [0xFFu8; RECORD_LEN];
        self.flash.read_bytes(self.slot_addrs[0], &mut a)?;
        self.flash.read_bytes(self.slot_addrs[1], &mut b)?;
        Ok((a, b))
    }
}

impl PersistentStore for FlashRecordStore {
    type Error = FlashRecordError;

    fn load(&mut self) -> Result<PersistentRecord, Self::Error> {
        let (a, b) = self.read_slots()?;

        match newest_record([&a, &b]) {
            Some((record, sequence, slot)) => {
                self.sequence = sequence;
                self.next_slot = 1 - slot;
                Ok(record)
            }
            None => {
                if !(a.iter().all(|byte| *byte == 0xFF) && b.iter().all(|byte| *byte == 0xFF)) {
                    warn!("record: no valid copy in flash, using defaults");
                }
                self.sequence = 0;
                self.next_slot = 0;
                Ok(PersistentRecord::default())
            }
        }
    }

    fn save(&mut self, record: &PersistentRecord) -> Result<(), Self::Error> {
        let sequence = self.sequence.wrapping_add(1);
        let buf = encode_record(record, sequence);
        let addr = self.slot_addrs[self.next_slot];

        self.flash.erase_sector(addr)?;
        self.flash.write_erased_bytes(addr, &buf)?;

        self.sequence = sequence;
        self.next_slot = 1 - self.next_slot;
        Ok(())
    }
}
