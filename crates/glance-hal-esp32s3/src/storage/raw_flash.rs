use embedded_storage::{ReadStorage, Storage};
use esp_rom_sys::rom::spiflash::{
    ESP_ROM_SPIFLASH_RESULT_OK, esp_rom_spiflash_erase_sector, esp_rom_spiflash_read,
    esp_rom_spiflash_unlock, esp_rom_spiflash_write,
};

pub const FLASH_SECTOR_SIZE: u32 = 4096;
const SECTOR_WORDS: usize = FLASH_SECTOR_SIZE as usize / 4;
const DEFAULT_FLASH_CAPACITY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashError {
    FlashOpFailed(i32),
    Unaligned,
    OutOfRange,
}

/// SPI flash through the ROM routines.
///
/// `write` erases as needed: partially covered sectors are read back,
/// patched and rewritten whole.
pub struct RawFlash {
    sector: [u32; SECTOR_WORDS],
}

impl RawFlash {
    pub fn new() -> Result<Self, FlashError> {
        let rc = unsafe { esp_rom_spiflash_unlock() };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashError::FlashOpFailed(rc));
        }
        Ok(Self {
            sector: [0xFFFF_FFFF; SECTOR_WORDS],
        })
    }

    pub fn erase_sector(&mut self, sector_addr: u32) -> Result<(), FlashError> {
        if !sector_addr.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(FlashError::Unaligned);
        }

        let rc = unsafe { esp_rom_spiflash_erase_sector(sector_addr / FLASH_SECTOR_SIZE) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashError::FlashOpFailed(rc));
        }
        Ok(())
    }

    fn read_words(addr: u32, words: &mut [u32]) -> Result<(), FlashError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashError::Unaligned);
        }

        let len = (words.len() * 4) as u32;
        let rc = unsafe { esp_rom_spiflash_read(addr, words.as_mut_ptr() as *const u32, len) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashError::FlashOpFailed(rc));
        }
        Ok(())
    }

    fn write_words(addr: u32, words: &[u32]) -> Result<(), FlashError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashError::Unaligned);
        }

        let len = (words.len() * 4) as u32;
        let rc = unsafe { esp_rom_spiflash_write(addr, words.as_ptr(), len) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashError::FlashOpFailed(rc));
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, addr: u32, out: &mut [u8]) -> Result<(), FlashError> {
        if out.is_empty() {
            return Ok(());
        }

        let start = addr & !0b11;
        let end = addr
            .checked_add(out.len() as u32)
            .ok_or(FlashError::OutOfRange)?
            .next_multiple_of(4);

        for word_addr in (start..end).step_by(4) {
            let mut word = [0u32; 1];
            Self::read_words(word_addr, &mut word)?;

            let base = word_addr as i64 - addr as i64;
            for (i, b) in word[0].to_le_bytes().iter().enumerate() {
                let dst = base + i as i64;
                if dst < 0 {
                    continue;
                }
                let Some(slot) = out.get_mut(dst as usize) else {
                    break;
                };
                *slot = *b;
            }
        }

        Ok(())
    }

    /// Programs `data` into already erased flash. Unaligned edges are padded with `0xFF`.
    pub fn write_erased_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        if data.is_empty() {
            return Ok(());
        }

        let start = addr & !0b11;
        let end = (addr + data.len() as u32).next_multiple_of(4);

        for word_addr in (start..end).step_by(4) {
            let mut bytes = [0xFFu8; 4];
            let base = word_addr as i64 - addr as i64;
            for (i, slot) in bytes.iter_mut().enumerate() {
                let src = base + i as i64;
                if src < 0 {
                    continue;
                }
                let Some(byte) = data.get(src as usize) else {
                    break;
                };
                *slot = *byte;
            }

            Self::write_words(word_addr, &[u32::from_le_bytes(bytes)])?;
        }

        Ok(())
    }

    /// Rewrites one sector with `data` placed at `in_sector`.
    fn program_sector(
        &mut self,
        sector_addr: u32,
        in_sector: usize,
        data: &[u8],
    ) -> Result<(), FlashError> {
        if in_sector != 0 || data.len() != FLASH_SECTOR_SIZE as usize {
            Self::read_words(sector_addr, &mut self.sector)?;
        }

        for (i, byte) in data.iter().enumerate() {
            let pos = in_sector + i;
            let word = &mut self.sector[pos / 4];
            let mut bytes = word.to_le_bytes();
            bytes[pos % 4] = *byte;
            *word = u32::from_le_bytes(bytes);
        }

        self.erase_sector(sector_addr)?;
        Self::write_words(sector_addr, &self.sector)
    }
}

impl ReadStorage for RawFlash {
    type Error = FlashError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.read_bytes(offset, bytes)
    }

    fn capacity(&self) -> usize {
        DEFAULT_FLASH_CAPACITY_BYTES
    }
}

impl Storage for RawFlash {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let end = offset as usize + bytes.len();
        if end > DEFAULT_FLASH_CAPACITY_BYTES {
            return Err(FlashError::OutOfRange);
        }

        let mut offset = offset;
        let mut remaining = bytes;
        while !remaining.is_empty() {
            let sector_addr = offset & !(FLASH_SECTOR_SIZE - 1);
            let in_sector = (offset - sector_addr) as usize;
            let take = (FLASH_SECTOR_SIZE as usize - in_sector).min(remaining.len());

            self.program_sector(sector_addr, in_sector, &remaining[..take])?;

            offset += take as u32;
            remaining = &remaining[take..];
        }

        Ok(())
    }
}
