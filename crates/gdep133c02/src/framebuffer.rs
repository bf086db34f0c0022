//! Packed 4-bit pixel storage.

use crate::color::Color;

/// Two palette pixels per byte over caller-provided storage.
///
/// Even pixel indices live in the high nibble and odd indices in the low
/// nibble, which is the order the controllers shift pixels out.
#[derive(Clone, Debug)]
pub struct PackedFrame<B> {
    bytes: B,
}

impl<B> PackedFrame<B>
where
    B: AsRef<[u8]>,
{
    /// Wraps existing storage without touching its contents.
    pub fn new(bytes: B) -> Self {
        Self { bytes }
    }

    /// Number of pixels the storage can hold.
    pub fn pixel_capacity(&self) -> usize {
        self.bytes.as_ref().len() * 2
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_ref()
    }

    /// Reads a pixel. Returns `None` out of range or for an unknown code.
    pub fn pixel(&self, index: usize) -> Option<Color> {
        let byte = *self.bytes.as_ref().get(index / 2)?;
        let code = if index % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        Color::from_code(code)
    }

    /// Packed bytes of one row restricted to `span`.
    pub fn row_slice(
        &self,
        row: usize,
        row_bytes: usize,
        span: core::ops::Range<usize>,
    ) -> Option<&[u8]> {
        if span.end > row_bytes {
            return None;
        }
        let start = row.checked_mul(row_bytes)?;
        self.bytes
            .as_ref()
            .get(start + span.start..start + span.end)
    }

    pub fn into_inner(self) -> B {
        self.bytes
    }
}

impl<B> PackedFrame<B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Writes one pixel.
    ///
    /// Returns `true` when the index is in bounds, `false` otherwise.
    pub fn set_pixel(&mut self, index: usize, color: Color) -> bool {
        let Some(byte) = self.bytes.as_mut().get_mut(index / 2) else {
            return false;
        };

        if index % 2 == 0 {
            *byte = (*byte & 0x0F) | (color.code() << 4);
        } else {
            *byte = (*byte & 0xF0) | color.code();
        }
        true
    }

    /// Fills every pixel with one color.
    pub fn fill(&mut self, color: Color) {
        self.bytes.as_mut().fill(color.packed_pair());
    }

    /// Fills whole rows `rows` with one color.
    pub fn fill_rows(&mut self, rows: core::ops::Range<usize>, row_bytes: usize, color: Color) {
        let bytes = self.bytes.as_mut();
        let start = (rows.start * row_bytes).min(bytes.len());
        let end = (rows.end * row_bytes).min(bytes.len());
        bytes[start..end].fill(color.packed_pair());
    }
}
