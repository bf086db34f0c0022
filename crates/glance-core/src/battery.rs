//! Battery voltage sampling, filtering and classification.

use core::fmt::Debug;

use embedded_hal::delay::DelayNs;
use log::{debug, warn};

use crate::config::{BatteryCalibration, BatterySampling, PowerThresholds};

/// Upper bound on samples per filtered reading.
pub const MAX_SAMPLES: usize = 32;

/// One battery measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatteryReading {
    pub voltage: f32,
    /// `false` when the sensor looks disconnected or implausible. Never a low-battery signal.
    pub valid: bool,
    pub charging: bool,
}

impl BatteryReading {
    pub fn invalid(voltage: f32) -> Self {
        Self {
            voltage,
            valid: false,
            charging: false,
        }
    }
}

/// Raw ADC access for the battery divider.
pub trait AdcSampler {
    type Error: Debug;

    fn sample(&mut self) -> Result<u16, Self::Error>;
}

/// Anything that can produce battery readings for a wake cycle.
pub trait BatterySource {
    /// Filtered multi-sample reading.
    fn read(&mut self) -> BatteryReading;

    /// Single unfiltered sample for latency-sensitive call sites.
    fn read_fast(&mut self) -> BatteryReading;
}

pub fn is_charging(voltage: f32, thresholds: &PowerThresholds) -> bool {
    voltage >= thresholds.charging_v
}

/// Linear state of charge between the empty and full voltages, clamped to 0..=100.
pub fn battery_percent(voltage: f32, thresholds: &PowerThresholds) -> u8 {
    let range = thresholds.full_v - thresholds.empty_v;
    if range <= 0.0 {
        return 0;
    }

    let percent = (voltage - thresholds.empty_v) / range * 100.0;
    if percent <= 0.0 {
        0
    } else if percent >= 100.0 {
        100
    } else {
        (percent + 0.5) as u8
    }
}

/// Median-filtered battery monitor over an ADC sampler.
pub struct BatteryMonitor<S, D> {
    sampler: S,
    delay: D,
    calibration: BatteryCalibration,
    sampling: BatterySampling,
    thresholds: PowerThresholds,
}

impl<S, D> BatteryMonitor<S, D>
where
    S: AdcSampler,
    D: DelayNs,
{
    pub fn new(
        sampler: S,
        delay: D,
        calibration: BatteryCalibration,
        sampling: BatterySampling,
        thresholds: PowerThresholds,
    ) -> Self {
        Self {
            sampler,
            delay,
            calibration,
            sampling,
            thresholds,
        }
    }

    pub fn release(self) -> (S, D) {
        (self.sampler, self.delay)
    }

    fn classify(&self, voltage: f32) -> BatteryReading {
        if !(self.sampling.min_plausible_v..=self.sampling.max_plausible_v).contains(&voltage) {
            warn!("battery voltage implausible voltage={}", voltage);
            return BatteryReading::invalid(voltage);
        }

        BatteryReading {
            voltage,
            valid: true,
            charging: is_charging(voltage, &self.thresholds),
        }
    }
}

impl<S, D> BatterySource for BatteryMonitor<S, D>
where
    S: AdcSampler,
    D: DelayNs,
{
    fn read(&mut self) -> BatteryReading {
        let count = self.sampling.samples.clamp(1, MAX_SAMPLES);
        let mut samples = [0u16; MAX_SAMPLES];

        for (i, slot) in samples[..count].iter_mut().enumerate() {
            match self.sampler.sample() {
                Ok(raw) => *slot = raw,
                Err(err) => {
                    warn!("battery adc sample failed: {:?}", err);
                    return BatteryReading::invalid(0.0);
                }
            }
            if i + 1 < count {
                self.delay.delay_ms(self.sampling.spacing_ms);
            }
        }

        let samples = &mut samples[..count];
        samples.sort_unstable();

        // Spread of the middle half; outliers are the median's job.
        let trim = count / 4;
        let spread = samples[count - 1 - trim] - samples[trim];
        let median = if count % 2 == 0 {
            ((samples[count / 2 - 1] as u32 + samples[count / 2] as u32) / 2) as u16
        } else {
            samples[count / 2]
        };
        let voltage = self.calibration.voltage(median);

        if spread > self.sampling.max_spread_raw {
            warn!(
                "battery samples unstable spread={} limit={} median_raw={}",
                spread, self.sampling.max_spread_raw, median
            );
            return BatteryReading::invalid(voltage);
        }

        debug!(
            "battery median_raw={} spread={} voltage={}",
            median, spread, voltage
        );
        self.classify(voltage)
    }

    fn read_fast(&mut self) -> BatteryReading {
        match self.sampler.sample() {
            Ok(raw) => self.classify(self.calibration.voltage(raw)),
            Err(err) => {
                warn!("battery adc sample failed: {:?}", err);
                BatteryReading::invalid(0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::vec::Vec;

    struct ScriptedAdc {
        samples: Vec<u16>,
        next: usize,
        fail: bool,
    }

    impl ScriptedAdc {
        fn new(samples: &[u16]) -> Self {
            Self {
                samples: samples.to_vec(),
                next: 0,
                fail: false,
            }
        }
    }

    impl AdcSampler for ScriptedAdc {
        type Error = ();

        fn sample(&mut self) -> Result<u16, ()> {
            if self.fail {
                return Err(());
            }
            let raw = self.samples[self.next % self.samples.len()];
            self.next += 1;
            Ok(raw)
        }
    }

    #[derive(Default)]
    struct CountingDelay {
        total_ns: u64,
    }

    impl DelayNs for CountingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_ns += ns as u64;
        }
    }

    /// Calibration where raw counts are millivolts.
    fn millivolt_calibration() -> BatteryCalibration {
        BatteryCalibration {
            full_scale: 1000,
            reference_v: 1.0,
            divider_ratio: 1.0,
        }
    }

    fn monitor(adc: ScriptedAdc) -> BatteryMonitor<ScriptedAdc, CountingDelay> {
        BatteryMonitor::new(
            adc,
            CountingDelay::default(),
            millivolt_calibration(),
            BatterySampling::default(),
            PowerThresholds::default(),
        )
    }

    #[test]
    fn charging_threshold_is_inclusive() {
        let thresholds = PowerThresholds::default();

        assert!(is_charging(4.18, &thresholds));
        assert!(is_charging(4.2, &thresholds));
        assert!(!is_charging(4.17, &thresholds));
        assert!(!is_charging(3.9, &thresholds));
    }

    #[test]
    fn percent_hits_anchor_points() {
        let thresholds = PowerThresholds::default();

        assert_eq!(battery_percent(thresholds.empty_v, &thresholds), 0);
        assert_eq!(battery_percent(thresholds.full_v, &thresholds), 100);
        assert_eq!(battery_percent(3.75, &thresholds), 50);
        assert_eq!(battery_percent(2.0, &thresholds), 0);
        assert_eq!(battery_percent(5.0, &thresholds), 100);
    }

    #[test]
    fn percent_is_monotonic() {
        let thresholds = PowerThresholds::default();
        let mut last = 0u8;

        for step in 0..=200 {
            let voltage = 3.0 + step as f32 * 0.01;
            let percent = battery_percent(voltage, &thresholds);
            assert!(percent >= last, "voltage={} percent={}", voltage, percent);
            assert!(percent <= 100);
            last = percent;
        }
    }

    #[test]
    fn median_ignores_single_spike() {
        let mut samples = [3900u16; 16];
        samples[3] = 999;
        samples[9] = 3910;
        let mut monitor = monitor(ScriptedAdc::new(&samples));

        let reading = monitor.read();
        assert!(reading.valid);
        assert!(!reading.charging);
        assert!((reading.voltage - 3.9).abs() < 0.001);
    }

    #[test]
    fn spread_limit_ignores_tail_outliers() {
        let mut samples = [3900u16; 16];
        samples[0] = 999;
        samples[5] = 1500;
        samples[11] = 4800;
        samples[14] = 3950;
        let mut monitor = monitor(ScriptedAdc::new(&samples));

        let reading = monitor.read();
        assert!(reading.valid);
        assert!((reading.voltage - 3.9).abs() < 0.001);
    }

    #[test]
    fn wide_spread_marks_reading_invalid() {
        let samples: Vec<u16> = (0..16).map(|i| 3000 + i * 100).collect();
        let mut monitor = monitor(ScriptedAdc::new(&samples));

        let reading = monitor.read();
        assert!(!reading.valid);
        assert!(!reading.charging);
    }

    #[test]
    fn implausible_voltage_is_invalid_not_critical() {
        let mut monitor = monitor(ScriptedAdc::new(&[100]));

        let reading = monitor.read();
        assert!(!reading.valid);
        assert!(!reading.charging);

        let mut monitor = self::monitor(ScriptedAdc::new(&[4900]));
        assert!(!monitor.read().valid);
    }

    #[test]
    fn full_cell_reads_as_charging() {
        let mut monitor = monitor(ScriptedAdc::new(&[4190]));

        let reading = monitor.read();
        assert!(reading.valid);
        assert!(reading.charging);
    }

    #[test]
    fn read_spaces_samples_and_fast_read_does_not() {
        let mut monitor = monitor(ScriptedAdc::new(&[3800]));

        monitor.read();
        monitor.read_fast();
        let (adc, delay) = monitor.release();

        assert_eq!(adc.next, 17);
        assert_eq!(delay.total_ns, 15 * 5 * 1_000_000);
    }

    #[test]
    fn adc_failure_yields_invalid_reading() {
        let mut adc = ScriptedAdc::new(&[3800]);
        adc.fail = true;
        let mut monitor = monitor(adc);

        assert!(!monitor.read().valid);
        assert!(!monitor.read_fast().valid);
    }
}
