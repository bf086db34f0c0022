use esp_hal::{
    Blocking,
    analog::adc::{Adc, AdcConfig, AdcPin, Attenuation},
    peripherals::{ADC1, GPIO2},
};
use glance_core::battery::AdcSampler;

/// Battery divider tap on GPIO2, read through ADC1 at 11 dB attenuation.
pub struct AdcBattery<'d> {
    adc: Adc<'d, ADC1<'d>, Blocking>,
    pin: AdcPin<GPIO2<'d>, ADC1<'d>>,
}

impl<'d> AdcBattery<'d> {
    pub fn new(adc1: ADC1<'d>, gpio: GPIO2<'d>) -> Self {
        let mut config = AdcConfig::new();
        let pin = config.enable_pin(gpio, Attenuation::_11dB);
        let adc = Adc::new(adc1, config);
        Self { adc, pin }
    }
}

impl AdcSampler for AdcBattery<'_> {
    type Error = ();

    fn sample(&mut self) -> Result<u16, Self::Error> {
        nb::block!(self.adc.read_oneshot(&mut self.pin))
    }
}
