//! Spectra 6 palette as understood by the panel controllers.

/// Palette index the panel can physically render.
///
/// Discriminants are the 4-bit codes written into pixel nibbles. Code `0x4`
/// is unused by this panel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Color {
    Black = 0x0,
    White = 0x1,
    Yellow = 0x2,
    Red = 0x3,
    Blue = 0x5,
    Green = 0x6,
}

impl Color {
    /// All renderable colors in band order for test patterns.
    pub const ALL: [Color; 6] = [
        Self::Black,
        Self::White,
        Self::Yellow,
        Self::Red,
        Self::Blue,
        Self::Green,
    ];

    /// 4-bit nibble code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decodes a nibble code. Unknown codes return `None`.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x0 => Some(Self::Black),
            0x1 => Some(Self::White),
            0x2 => Some(Self::Yellow),
            0x3 => Some(Self::Red),
            0x5 => Some(Self::Blue),
            0x6 => Some(Self::Green),
            _ => None,
        }
    }

    /// Byte holding two pixels of this color.
    pub const fn packed_pair(self) -> u8 {
        (self.code() << 4) | self.code()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Black => "black",
            Self::White => "white",
            Self::Yellow => "yellow",
            Self::Red => "red",
            Self::Blue => "blue",
            Self::Green => "green",
        }
    }
}
