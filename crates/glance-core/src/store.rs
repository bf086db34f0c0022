//! Durable node state and its on-flash record format.

use core::fmt::Debug;

use heapless::String;

/// Longest image id the record can hold.
pub const IMAGE_ID_CAPACITY: usize = 64;

pub type ImageId = String<IMAGE_ID_CAPACITY>;

const RECORD_MAGIC: u32 = 0x434E_4C47; // "GLNC"
const RECORD_VERSION: u8 = 1;
const FLAG_OPERATION_IN_PROGRESS: u8 = 0x01;
const ID_OFFSET: usize = 24;
const CHECKSUM_OFFSET: usize = ID_OFFSET + IMAGE_ID_CAPACITY;

/// Encoded record length in bytes. A multiple of four for word-wise flash writes.
pub const RECORD_LEN: usize = CHECKSUM_OFFSET + 4;

/// State that must survive power loss.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PersistentRecord {
    /// Id of the last image pushed to the panel. Empty on first boot.
    pub last_image_id: ImageId,
    /// Consecutive brownouts not yet cleared by a completed cycle.
    pub brownout_count: i32,
    /// Platform clock reading (microseconds) at the latest brownout.
    pub brownout_time: i64,
    /// Set right before a high-current refresh and cleared right after.
    pub operation_in_progress: bool,
}

impl PersistentRecord {
    /// Records one more brownout.
    pub fn note_brownout(&mut self, now_us: i64) {
        self.brownout_count = self.brownout_count.saturating_add(1);
        self.brownout_time = now_us;
    }

    pub fn clear_brownouts(&mut self) {
        self.brownout_count = 0;
        self.brownout_time = 0;
    }

    /// Stores `id`. Returns `false` (and leaves the record unchanged) if it does not fit.
    pub fn set_last_image_id(&mut self, id: &str) -> bool {
        let mut next = ImageId::new();
        if next.push_str(id).is_err() {
            return false;
        }
        self.last_image_id = next;
        true
    }
}

/// Durable key/value storage for [`PersistentRecord`].
///
/// `save` must be atomic from the caller's point of view: after a reset,
/// `load` returns either the previous or the new record, never a mix.
pub trait PersistentStore {
    type Error: Debug;

    /// Reads the stored record. Blank or unreadable storage yields the default record.
    fn load(&mut self) -> Result<PersistentRecord, Self::Error>;

    fn save(&mut self, record: &PersistentRecord) -> Result<(), Self::Error>;

    /// Sets the dirty flag in storage without touching other fields.
    fn mark_operation_start(&mut self) -> Result<(), Self::Error> {
        self.store_operation_flag(true)
    }

    /// Clears the dirty flag in storage without touching other fields.
    fn mark_operation_end(&mut self) -> Result<(), Self::Error> {
        self.store_operation_flag(false)
    }

    /// Read-modify-write of the flag against the durable copy.
    fn store_operation_flag(&mut self, in_progress: bool) -> Result<(), Self::Error> {
        let mut record = self.load()?;
        if record.operation_in_progress == in_progress {
            return Ok(());
        }
        record.operation_in_progress = in_progress;
        self.save(&record)
    }
}

/// Counter kept in memory that survives deep sleep but not power loss.
pub trait RetainedCounter {
    fn get(&mut self) -> u32;
    fn set(&mut self, value: u32);
}

/// Serializes `record` tagged with a write `sequence`.
///
/// Layout (little endian):
/// - 0..4 magic, 4 version, 5 flags, 6 id length, 7 reserved
/// - 8..12 sequence, 12..16 brownout count, 16..24 brownout time
/// - 24..88 image id bytes, 88..92 checksum over 0..88
pub fn encode_record(record: &PersistentRecord, sequence: u32) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];
    let id = record.last_image_id.as_bytes();

    buf[0..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
    buf[4] = RECORD_VERSION;
    buf[5] = if record.operation_in_progress {
        FLAG_OPERATION_IN_PROGRESS
    } else {
        0
    };
    buf[6] = id.len() as u8;
    buf[8..12].copy_from_slice(&sequence.to_le_bytes());
    buf[12..16].copy_from_slice(&record.brownout_count.to_le_bytes());
    buf[16..24].copy_from_slice(&record.brownout_time.to_le_bytes());
    buf[ID_OFFSET..ID_OFFSET + id.len()].copy_from_slice(id);

    let checksum = checksum32(&buf[..CHECKSUM_OFFSET]);
    buf[CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_le_bytes());
    buf
}

/// Parses a record and its sequence. Returns `None` for blank, foreign or corrupt bytes.
pub fn decode_record(buf: &[u8]) -> Option<(PersistentRecord, u32)> {
    let buf: &[u8; RECORD_LEN] = buf.get(..RECORD_LEN)?.try_into().ok()?;

    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != RECORD_MAGIC || buf[4] != RECORD_VERSION {
        return None;
    }

    let expected = u32::from_le_bytes([
        buf[CHECKSUM_OFFSET],
        buf[CHECKSUM_OFFSET + 1],
        buf[CHECKSUM_OFFSET + 2],
        buf[CHECKSUM_OFFSET + 3],
    ]);
    if checksum32(&buf[..CHECKSUM_OFFSET]) != expected {
        return None;
    }

    let id_len = buf[6] as usize;
    if id_len > IMAGE_ID_CAPACITY {
        return None;
    }
    let id = core::str::from_utf8(&buf[ID_OFFSET..ID_OFFSET + id_len]).ok()?;

    let mut record = PersistentRecord {
        operation_in_progress: buf[5] & FLAG_OPERATION_IN_PROGRESS != 0,
        brownout_count: i32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        brownout_time: i64::from_le_bytes([
            buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
        ]),
        ..PersistentRecord::default()
    };
    if !record.set_last_image_id(id) {
        return None;
    }

    let sequence = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    Some((record, sequence))
}

/// Picks the newest valid copy out of two alternating slots.
///
/// Returns the record, its sequence and the index of the slot it came from.
pub fn newest_record(slots: [&[u8]; 2]) -> Option<(PersistentRecord, u32, usize)> {
    let a = decode_record(slots[0]);
    let b = decode_record(slots[1]);

    match (a, b) {
        (Some((ra, sa)), Some((rb, sb))) => {
            // Wrapping compare so the sequence may roll over.
            if sb.wrapping_sub(sa) as i32 > 0 {
                Some((rb, sb, 1))
            } else {
                Some((ra, sa, 0))
            }
        }
        (Some((ra, sa)), None) => Some((ra, sa, 0)),
        (None, Some((rb, sb))) => Some((rb, sb, 1)),
        (None, None) => None,
    }
}

/// FNV-1a over `bytes`.
pub fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C9DC5u32;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::convert::Infallible;

    fn record(id: &str, count: i32, flag: bool) -> PersistentRecord {
        let mut record = PersistentRecord {
            brownout_count: count,
            brownout_time: 1_234_567,
            operation_in_progress: flag,
            ..PersistentRecord::default()
        };
        assert!(record.set_last_image_id(id));
        record
    }

    #[test]
    fn record_length_is_word_aligned() {
        assert_eq!(RECORD_LEN % 4, 0);
    }

    #[test]
    fn encoded_record_decodes_with_sequence() {
        let original = record("img-2024-05-01", 2, true);

        let bytes = encode_record(&original, 41);
        assert_eq!(decode_record(&bytes), Some((original, 41)));
    }

    #[test]
    fn erased_flash_is_not_a_record() {
        assert_eq!(decode_record(&[0xFF; RECORD_LEN]), None);
        assert_eq!(decode_record(&[0x00; RECORD_LEN]), None);
        assert_eq!(decode_record(&[0x00; 8]), None);
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let mut bytes = encode_record(&record("abc", 0, false), 1);
        bytes[ID_OFFSET] ^= 0x20;

        assert_eq!(decode_record(&bytes), None);
    }

    #[test]
    fn newest_slot_wins_including_wraparound() {
        let old = encode_record(&record("old", 0, false), 7);
        let new = encode_record(&record("new", 0, false), 8);

        let (picked, sequence, slot) = newest_record([&old, &new]).unwrap();
        assert_eq!(picked.last_image_id.as_str(), "new");
        assert_eq!((sequence, slot), (8, 1));

        let before_wrap = encode_record(&record("before", 0, false), u32::MAX);
        let after_wrap = encode_record(&record("after", 0, false), 0);
        let (picked, _, slot) = newest_record([&after_wrap, &before_wrap]).unwrap();
        assert_eq!(picked.last_image_id.as_str(), "after");
        assert_eq!(slot, 0);
    }

    #[test]
    fn torn_second_slot_falls_back_to_first() {
        let good = encode_record(&record("good", 1, false), 3);
        let mut torn = encode_record(&record("torn", 1, false), 4);
        torn[RECORD_LEN - 1] ^= 0xFF;

        let (picked, sequence, _) = newest_record([&good, &torn]).unwrap();
        assert_eq!(picked.last_image_id.as_str(), "good");
        assert_eq!(sequence, 3);
    }

    #[test]
    fn oversized_image_id_is_rejected() {
        let mut record = PersistentRecord::default();
        let long = "x".repeat(IMAGE_ID_CAPACITY + 1);

        assert!(!record.set_last_image_id(&long));
        assert!(record.last_image_id.is_empty());
    }

    struct MemoryStore {
        record: PersistentRecord,
        saves: usize,
    }

    impl PersistentStore for MemoryStore {
        type Error = Infallible;

        fn load(&mut self) -> Result<PersistentRecord, Self::Error> {
            Ok(self.record.clone())
        }

        fn save(&mut self, record: &PersistentRecord) -> Result<(), Self::Error> {
            self.record = record.clone();
            self.saves += 1;
            Ok(())
        }
    }

    #[test]
    fn operation_flag_updates_only_the_flag() {
        let mut store = MemoryStore {
            record: record("keep-me", 2, false),
            saves: 0,
        };

        store.mark_operation_start().unwrap();
        assert!(store.record.operation_in_progress);
        assert_eq!(store.record.last_image_id.as_str(), "keep-me");
        assert_eq!(store.record.brownout_count, 2);

        store.mark_operation_end().unwrap();
        store.mark_operation_end().unwrap();
        assert!(!store.record.operation_in_progress);
        assert_eq!(store.saves, 2);
    }
}
