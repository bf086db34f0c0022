use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    spi::SpiBus,
};
use gdep133c02::{Color, Controller, Error, Gdep133c02};
use glance_core::panel::EinkPanel;

/// Board-level adapter exposing the GDEP133C02 driver as an [`EinkPanel`].
#[derive(Debug)]
pub struct PanelDisplay<SPI, CS0, CS1, RST, BUSY, PWR, D> {
    driver: Gdep133c02<SPI, CS0, CS1, RST, BUSY, PWR, D>,
}

impl<SPI, CS0, CS1, RST, BUSY, PWR, D, PinErr> PanelDisplay<SPI, CS0, CS1, RST, BUSY, PWR, D>
where
    SPI: SpiBus<u8>,
    CS0: OutputPin<Error = PinErr>,
    CS1: OutputPin<Error = PinErr>,
    RST: OutputPin<Error = PinErr>,
    BUSY: InputPin<Error = PinErr>,
    PWR: OutputPin<Error = PinErr>,
    D: DelayNs,
{
    pub fn new(driver: Gdep133c02<SPI, CS0, CS1, RST, BUSY, PWR, D>) -> Self {
        Self { driver }
    }

    /// Cuts the panel rail. Called before deep sleep.
    pub fn power_off(&mut self) -> Result<(), Error<SPI::Error, PinErr>> {
        self.driver.power_off()
    }
}

impl<SPI, CS0, CS1, RST, BUSY, PWR, D, PinErr> EinkPanel
    for PanelDisplay<SPI, CS0, CS1, RST, BUSY, PWR, D>
where
    SPI: SpiBus<u8>,
    SPI::Error: core::fmt::Debug,
    CS0: OutputPin<Error = PinErr>,
    CS1: OutputPin<Error = PinErr>,
    RST: OutputPin<Error = PinErr>,
    BUSY: InputPin<Error = PinErr>,
    PWR: OutputPin<Error = PinErr>,
    PinErr: core::fmt::Debug,
    D: DelayNs,
{
    type Error = Error<SPI::Error, PinErr>;

    fn init(&mut self) -> Result<(), Self::Error> {
        self.driver.init()
    }

    fn write_command(&mut self, target: Controller, command: u8) -> Result<(), Self::Error> {
        self.driver.begin(target, command)
    }

    fn write_data(&mut self, target: Controller, data: &[u8]) -> Result<(), Self::Error> {
        if self.driver.selected() != Some(target) {
            return Err(Error::NoTransfer);
        }
        self.driver.write_data(data)
    }

    fn refresh(&mut self) -> Result<(), Self::Error> {
        self.driver.refresh()
    }

    fn clear(&mut self, color: Color) -> Result<(), Self::Error> {
        self.driver.clear(color)
    }

    fn sleep(&mut self) -> Result<(), Self::Error> {
        self.driver.sleep()?;
        self.driver.power_off()
    }
}
