//! Display capability driven by the image pipeline.

use core::fmt::Debug;

pub use gdep133c02::{Color, Controller};

/// A dual-controller e-paper panel.
///
/// `write_command` opens a transfer on `target`; following `write_data`
/// calls for the same target stream its payload.
pub trait EinkPanel {
    type Error: Debug;

    /// Powers the panel and loads its registers.
    fn init(&mut self) -> Result<(), Self::Error>;

    fn write_command(&mut self, target: Controller, command: u8) -> Result<(), Self::Error>;

    fn write_data(&mut self, target: Controller, data: &[u8]) -> Result<(), Self::Error>;

    /// Latches loaded pixel data onto the glass. This is the high-current step.
    fn refresh(&mut self) -> Result<(), Self::Error>;

    fn clear(&mut self, color: Color) -> Result<(), Self::Error>;

    /// Deep sleep and rail off until the next [`Self::init`].
    fn sleep(&mut self) -> Result<(), Self::Error>;
}
