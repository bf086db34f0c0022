#![cfg_attr(not(test), no_std)]

//! GDEP133C02 (13.3" 1200x1600 Spectra 6) dual-controller e-paper driver.

mod color;
mod framebuffer;
pub mod protocol;

pub use color::Color;
pub use framebuffer::PackedFrame;
pub use protocol::Controller;

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    spi::SpiBus,
};

/// Driver timing configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// Expected SPI clock in Hz (documented for board glue).
    pub spi_hz: u32,
    /// Longest time to wait for BUSY to release.
    pub busy_timeout_ms: u32,
    /// BUSY polling period.
    pub busy_poll_ms: u32,
    /// RST low pulse width.
    pub reset_pulse_ms: u32,
    /// Settle time after RST and after enabling the panel rail.
    pub settle_ms: u32,
    /// BUSY reads low while the controllers are working.
    pub busy_active_low: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spi_hz: 10_000_000,
            busy_timeout_ms: 60_000,
            busy_poll_ms: 10,
            reset_pulse_ms: 20,
            settle_ms: 50,
            busy_active_low: true,
        }
    }
}

/// Board wiring owned by the driver.
#[derive(Debug)]
pub struct Pins<CS0, CS1, RST, BUSY, PWR> {
    /// Chip select of the left controller.
    pub cs_left: CS0,
    /// Chip select of the right controller.
    pub cs_right: CS1,
    pub reset: RST,
    pub busy: BUSY,
    /// Load switch feeding the panel rail.
    pub power: PWR,
}

/// Driver errors.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Error<SpiErr, PinErr> {
    /// SPI transaction failed.
    Spi(SpiErr),
    /// A GPIO operation failed.
    Pin(PinErr),
    /// BUSY stayed asserted past the configured timeout.
    BusyTimeout,
    /// Data was written without an open command.
    NoTransfer,
}

pub type DriverResult<SpiErr, PinErr> = Result<(), Error<SpiErr, PinErr>>;

/// GDEP133C02 driver over a shared SPI bus with two manual chip selects.
#[derive(Debug)]
pub struct Gdep133c02<SPI, CS0, CS1, RST, BUSY, PWR, D> {
    spi: SPI,
    pins: Pins<CS0, CS1, RST, BUSY, PWR>,
    delay: D,
    config: Config,
    selected: Option<Controller>,
}

impl<SPI, CS0, CS1, RST, BUSY, PWR, D, PinErr> Gdep133c02<SPI, CS0, CS1, RST, BUSY, PWR, D>
where
    SPI: SpiBus<u8>,
    CS0: OutputPin<Error = PinErr>,
    CS1: OutputPin<Error = PinErr>,
    RST: OutputPin<Error = PinErr>,
    BUSY: InputPin<Error = PinErr>,
    PWR: OutputPin<Error = PinErr>,
    D: DelayNs,
{
    /// Creates a new driver instance. No bus traffic happens until [`Self::init`].
    pub fn new(spi: SPI, pins: Pins<CS0, CS1, RST, BUSY, PWR>, delay: D, config: Config) -> Self {
        Self {
            spi,
            pins,
            delay,
            config,
            selected: None,
        }
    }

    /// Returns current configuration.
    pub fn config(&self) -> Config {
        self.config
    }

    /// Releases owned bus, pins and delay.
    pub fn release(self) -> (SPI, Pins<CS0, CS1, RST, BUSY, PWR>, D) {
        (self.spi, self.pins, self.delay)
    }

    /// Enables the panel rail.
    pub fn power_on(&mut self) -> DriverResult<SPI::Error, PinErr> {
        self.pins.power.set_high().map_err(Error::Pin)?;
        self.delay.delay_ms(self.config.settle_ms);
        Ok(())
    }

    /// Deselects both controllers and cuts the panel rail.
    pub fn power_off(&mut self) -> DriverResult<SPI::Error, PinErr> {
        self.end()?;
        self.pins.power.set_low().map_err(Error::Pin)
    }

    /// Pulses RST low.
    pub fn hardware_reset(&mut self) -> DriverResult<SPI::Error, PinErr> {
        self.pins.reset.set_high().map_err(Error::Pin)?;
        self.delay.delay_ms(self.config.settle_ms);
        self.pins.reset.set_low().map_err(Error::Pin)?;
        self.delay.delay_ms(self.config.reset_pulse_ms);
        self.pins.reset.set_high().map_err(Error::Pin)?;
        self.delay.delay_ms(self.config.settle_ms);
        Ok(())
    }

    /// Reports whether the controllers are still working.
    pub fn is_busy(&mut self) -> Result<bool, Error<SPI::Error, PinErr>> {
        let low = self.pins.busy.is_low().map_err(Error::Pin)?;
        Ok(low == self.config.busy_active_low)
    }

    /// Polls BUSY until released or the configured timeout expires.
    pub fn wait_idle(&mut self) -> DriverResult<SPI::Error, PinErr> {
        let poll_ms = self.config.busy_poll_ms.max(1);
        let mut waited_ms = 0u32;

        while self.is_busy()? {
            if waited_ms >= self.config.busy_timeout_ms {
                return Err(Error::BusyTimeout);
            }
            self.delay.delay_ms(poll_ms);
            waited_ms = waited_ms.saturating_add(poll_ms);
        }

        Ok(())
    }

    /// Powers the panel, resets it and loads the register sequence.
    pub fn init(&mut self) -> DriverResult<SPI::Error, PinErr> {
        self.end()?;
        self.power_on()?;
        self.hardware_reset()?;
        self.wait_idle()?;

        for step in protocol::INIT_SEQUENCE.iter() {
            self.command(step.target, step.command, step.data)?;
        }

        Ok(())
    }

    /// Sends one complete command with its parameters.
    pub fn command(
        &mut self,
        target: Controller,
        command: u8,
        data: &[u8],
    ) -> DriverResult<SPI::Error, PinErr> {
        self.begin(target, command)?;
        if !data.is_empty() {
            self.write_data(data)?;
        }
        self.end()
    }

    /// Selects `target` and sends `command`, leaving the chip select asserted
    /// so payload bytes can follow through [`Self::write_data`].
    pub fn begin(&mut self, target: Controller, command: u8) -> DriverResult<SPI::Error, PinErr> {
        self.end()?;
        self.select(target)?;
        self.selected = Some(target);
        self.spi.write(&[command]).map_err(Error::Spi)
    }

    /// Streams payload bytes into the open command.
    pub fn write_data(&mut self, data: &[u8]) -> DriverResult<SPI::Error, PinErr> {
        if self.selected.is_none() {
            return Err(Error::NoTransfer);
        }
        self.spi.write(data).map_err(Error::Spi)
    }

    /// Closes the open command, if any.
    pub fn end(&mut self) -> DriverResult<SPI::Error, PinErr> {
        if self.selected.take().is_some() {
            self.spi.flush().map_err(Error::Spi)?;
        }
        self.pins.cs_left.set_high().map_err(Error::Pin)?;
        self.pins.cs_right.set_high().map_err(Error::Pin)
    }

    /// Currently open command target.
    pub fn selected(&self) -> Option<Controller> {
        self.selected
    }

    /// Runs the power-on, refresh, power-off cycle for loaded pixel data.
    pub fn refresh(&mut self) -> DriverResult<SPI::Error, PinErr> {
        self.end()?;
        self.command(Controller::Both, protocol::PON, &[])?;
        self.wait_idle()?;
        self.delay.delay_ms(self.config.settle_ms);
        self.command(Controller::Both, protocol::DRF, &protocol::REFRESH_DATA)?;
        self.wait_idle()?;
        self.command(Controller::Both, protocol::POF, &protocol::POWER_OFF_DATA)?;
        self.wait_idle()
    }

    /// Fills the whole panel with one color and refreshes.
    pub fn clear(&mut self, color: Color) -> DriverResult<SPI::Error, PinErr> {
        let row = [color.packed_pair(); protocol::HALF_ROW_BYTES];

        for target in [Controller::Left, Controller::Right] {
            self.begin(target, protocol::DTM)?;
            for _ in 0..protocol::HEIGHT {
                self.write_data(&row)?;
            }
        }

        self.refresh()
    }

    /// Puts both controllers into deep sleep. A reset is required to wake them.
    pub fn sleep(&mut self) -> DriverResult<SPI::Error, PinErr> {
        self.command(
            Controller::Both,
            protocol::DSLP,
            &[protocol::DEEP_SLEEP_CHECK],
        )
    }

    fn select(&mut self, target: Controller) -> DriverResult<SPI::Error, PinErr> {
        match target {
            Controller::Left => self.pins.cs_left.set_low().map_err(Error::Pin),
            Controller::Right => self.pins.cs_right.set_low().map_err(Error::Pin),
            Controller::Both => {
                self.pins.cs_left.set_low().map_err(Error::Pin)?;
                self.pins.cs_right.set_low().map_err(Error::Pin)
            }
        }
    }
}
