use log::warn;

use super::palette::rgb_to_palette;
use crate::net::{ChunkSink, Flow};
use gdep133c02::PackedFrame;

/// Converts an RGB24 body into packed palette pixels as it streams in.
///
/// Chunk boundaries may split a pixel; up to two trailing bytes are carried
/// into the next chunk. Bytes past the expected pixel count are ignored.
pub struct StreamConverter<'a> {
    frame: PackedFrame<&'a mut [u8]>,
    expected_pixels: usize,
    pixels: usize,
    carry: [u8; 3],
    carry_len: usize,
}

impl<'a> StreamConverter<'a> {
    /// `frame` must hold at least `expected_pixels` pixels.
    pub fn new(frame: &'a mut [u8], expected_pixels: usize) -> Self {
        let frame = PackedFrame::new(frame);
        let expected_pixels = expected_pixels.min(frame.pixel_capacity());
        Self {
            frame,
            expected_pixels,
            pixels: 0,
            carry: [0; 3],
            carry_len: 0,
        }
    }

    pub fn pixels_written(&self) -> usize {
        self.pixels
    }

    pub fn is_complete(&self) -> bool {
        self.pixels >= self.expected_pixels
    }

    pub fn expected_pixels(&self) -> usize {
        self.expected_pixels
    }

    /// Converts one slice of the stream. Returns the number of pixels completed.
    pub fn push(&mut self, mut bytes: &[u8]) -> usize {
        let start = self.pixels;

        while self.carry_len > 0 && !bytes.is_empty() && !self.is_complete() {
            self.carry[self.carry_len] = bytes[0];
            self.carry_len += 1;
            bytes = &bytes[1..];

            if self.carry_len == 3 {
                let [r, g, b] = self.carry;
                self.emit(r, g, b);
                self.carry_len = 0;
            }
        }

        let mut triplets = bytes.chunks_exact(3);
        for pixel in &mut triplets {
            if self.is_complete() {
                return self.pixels - start;
            }
            self.emit(pixel[0], pixel[1], pixel[2]);
        }

        let rest = triplets.remainder();
        if !self.is_complete() && !rest.is_empty() {
            self.carry[..rest.len()].copy_from_slice(rest);
            self.carry_len = rest.len();
        }

        self.pixels - start
    }

    fn emit(&mut self, r: u8, g: u8, b: u8) {
        self.frame.set_pixel(self.pixels, rgb_to_palette(r, g, b));
        self.pixels += 1;
    }
}

impl ChunkSink for StreamConverter<'_> {
    fn begin(&mut self, content_length: Option<u32>) -> Flow {
        let needed = self.expected_pixels.saturating_mul(3);
        match content_length {
            Some(len) if (len as usize) < needed => {
                warn!(
                    "image stream too short content_length={} needed={}",
                    len, needed
                );
                Flow::Abort
            }
            _ => Flow::Continue,
        }
    }

    fn chunk(&mut self, bytes: &[u8]) -> Flow {
        self.push(bytes);
        if self.is_complete() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}
