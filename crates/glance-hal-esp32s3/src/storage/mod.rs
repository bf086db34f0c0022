pub mod flash_record;
pub mod raw_flash;
pub mod retained;
