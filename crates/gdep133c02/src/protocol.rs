//! Wire-level protocol constants for the GDEP133C02 dual-controller panel.
//!
//! The glass is driven by two controller ICs. Each one owns half of every
//! display row: the left controller receives the first half of a row and the
//! right controller the second half. Commands are framed as one SPI
//! transaction per chip select: the command byte followed by its parameters.

/// Panel width in pixels.
pub const WIDTH: usize = 1200;
/// Panel height in pixels.
pub const HEIGHT: usize = 1600;
/// Number of pixels packed into one byte.
pub const PIXELS_PER_BYTE: usize = 2;
/// Bytes in one full display row.
pub const ROW_BYTES: usize = WIDTH / PIXELS_PER_BYTE;
/// Bytes in the half row owned by one controller.
pub const HALF_ROW_BYTES: usize = ROW_BYTES / 2;
/// Total packed frame size in bytes.
pub const BUFFER_SIZE: usize = ROW_BYTES * HEIGHT;

pub const PSR: u8 = 0x00;
pub const PWR: u8 = 0x01;
pub const POF: u8 = 0x02;
pub const PON: u8 = 0x04;
pub const BTST_N: u8 = 0x05;
pub const BTST_P: u8 = 0x06;
pub const DSLP: u8 = 0x07;
/// Data start transmission: pixel payload follows under the same chip select.
pub const DTM: u8 = 0x10;
pub const DRF: u8 = 0x12;
pub const CDI: u8 = 0x50;
pub const TCON: u8 = 0x60;
pub const TRES: u8 = 0x61;
pub const AN_TM: u8 = 0x74;
pub const AGID: u8 = 0x86;
pub const BUCK_BOOST_VDDN: u8 = 0xB0;
pub const TFT_VCOM_POWER: u8 = 0xB1;
pub const EN_BUF: u8 = 0xB6;
pub const BOOST_VDDP_EN: u8 = 0xB7;
pub const CCSET: u8 = 0xE0;
pub const PWS: u8 = 0xE3;
pub const CMD66: u8 = 0xF0;

/// Parameter byte that must accompany [`DSLP`].
pub const DEEP_SLEEP_CHECK: u8 = 0xA5;

/// Which controller(s) a transaction addresses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Controller {
    /// Left half of the panel (CS0).
    Left,
    /// Right half of the panel (CS1).
    Right,
    /// Both controllers at once.
    Both,
}

impl Controller {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Both => "both",
        }
    }

    /// Byte range of a packed row owned by this controller.
    ///
    /// `row_bytes` is the length of one packed row; `Both` covers the whole row.
    pub fn row_span(self, row_bytes: usize) -> core::ops::Range<usize> {
        let half = row_bytes / 2;
        match self {
            Self::Left => 0..half,
            Self::Right => half..row_bytes,
            Self::Both => 0..row_bytes,
        }
    }
}

/// One register write in the power-up sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InitStep {
    pub target: Controller,
    pub command: u8,
    pub data: &'static [u8],
}

const fn step(target: Controller, command: u8, data: &'static [u8]) -> InitStep {
    InitStep {
        target,
        command,
        data,
    }
}

/// Register sequence sent after the hardware reset.
///
/// Shared timing and resolution registers go to both controllers; the
/// booster and VCOM setup is only accepted by the left (primary) controller.
pub const INIT_SEQUENCE: [InitStep; 16] = [
    step(
        Controller::Both,
        AN_TM,
        &[0xC0, 0x1C, 0x1C, 0xCC, 0xCC, 0xCC, 0x15, 0x15, 0x55],
    ),
    step(Controller::Both, CMD66, &[0x49, 0x55, 0x13, 0x5D, 0x05, 0x10]),
    step(Controller::Both, PSR, &[0xDF, 0x69]),
    step(Controller::Both, CDI, &[0xF7]),
    step(Controller::Both, TCON, &[0x03, 0x03]),
    step(Controller::Both, AGID, &[0x10]),
    step(Controller::Both, PWS, &[0x22]),
    step(Controller::Both, CCSET, &[0x01]),
    step(Controller::Both, TRES, &[0x04, 0xB0, 0x03, 0x20]),
    step(Controller::Left, PWR, &[0x0F, 0x00, 0x28, 0x2C, 0x28, 0x38]),
    step(Controller::Left, EN_BUF, &[0x07]),
    step(Controller::Left, BTST_P, &[0xE8, 0x28]),
    step(Controller::Left, BOOST_VDDP_EN, &[0x01]),
    step(Controller::Left, BTST_N, &[0xE8, 0x28]),
    step(Controller::Left, BUCK_BOOST_VDDN, &[0x01]),
    step(Controller::Left, TFT_VCOM_POWER, &[0x02]),
];

/// Parameter for [`DRF`].
pub const REFRESH_DATA: [u8; 1] = [0x00];
/// Parameter for [`POF`].
pub const POWER_OFF_DATA: [u8; 1] = [0x00];
