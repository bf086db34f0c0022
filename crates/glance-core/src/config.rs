//! Tunables for one node. Defaults match the 13.3" board with a single LiPo cell.

/// Voltage thresholds driving mode selection and operation gates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PowerThresholds {
    /// Readings at or above this are classified as charging.
    ///
    /// Sits just under [`Self::full_v`] because a rested cell settles near full.
    pub charging_v: f32,
    pub full_v: f32,
    pub empty_v: f32,
    /// Below this (and not charging) the node sleeps without touching the radio.
    pub critical_v: f32,
    /// Minimum for Wi-Fi; higher than `critical_v` to absorb sag under radio load.
    pub wifi_min_v: f32,
    /// Below this the sleep interval is doubled.
    pub low_v: f32,
    /// Minimum for a panel refresh.
    pub display_min_v: f32,
    /// Minimum for flashing firmware on battery.
    pub ota_min_v: f32,
    /// Substituted when the sensor reading is invalid.
    pub assumed_v: f32,
    /// Consecutive brownouts that put the node into recovery.
    pub brownout_threshold: i32,
}

impl Default for PowerThresholds {
    fn default() -> Self {
        Self {
            charging_v: 4.18,
            full_v: 4.2,
            empty_v: 3.3,
            critical_v: 3.3,
            wifi_min_v: 3.4,
            low_v: 3.5,
            display_min_v: 3.6,
            ota_min_v: 3.8,
            assumed_v: 3.7,
            brownout_threshold: 3,
        }
    }
}

/// ADC to cell-voltage conversion. Board-specific.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatteryCalibration {
    /// Raw value at the ADC reference voltage.
    pub full_scale: u16,
    pub reference_v: f32,
    /// Resistor divider between the cell and the ADC pin.
    pub divider_ratio: f32,
}

impl Default for BatteryCalibration {
    fn default() -> Self {
        Self {
            full_scale: 4095,
            reference_v: 3.3,
            divider_ratio: 4.7,
        }
    }
}

impl BatteryCalibration {
    pub fn voltage(&self, raw: u16) -> f32 {
        (raw as f32 / self.full_scale.max(1) as f32) * self.reference_v * self.divider_ratio
    }
}

/// Filtering and plausibility window for battery sampling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatterySampling {
    /// Samples per filtered reading, capped at [`crate::battery::MAX_SAMPLES`].
    pub samples: usize,
    pub spacing_ms: u32,
    /// Largest accepted spread of the middle half of the sorted raw samples.
    pub max_spread_raw: u16,
    pub min_plausible_v: f32,
    pub max_plausible_v: f32,
}

impl Default for BatterySampling {
    fn default() -> Self {
        Self {
            samples: 16,
            spacing_ms: 5,
            max_spread_raw: 400,
            min_plausible_v: 2.5,
            max_plausible_v: 4.5,
        }
    }
}

/// Sleep bounds and fixed intervals, all in microseconds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SleepPolicy {
    pub min_us: u64,
    pub default_us: u64,
    pub max_us: u64,
    /// Fast poll while on external power.
    pub charging_us: u64,
    pub recovery_us: u64,
    pub critical_us: u64,
}

impl Default for SleepPolicy {
    fn default() -> Self {
        Self {
            min_us: 5 * 60 * 1_000_000,
            default_us: 60 * 60 * 1_000_000,
            max_us: 24 * 60 * 60 * 1_000_000,
            charging_us: 30 * 1_000_000,
            recovery_us: 2 * 60 * 60 * 1_000_000,
            critical_us: 4 * 60 * 60 * 1_000_000,
        }
    }
}

impl SleepPolicy {
    /// Clamps an untrusted duration into `[min_us, max_us]`.
    pub fn clamp(&self, duration_us: u64) -> u64 {
        duration_us.clamp(self.min_us, self.max_us)
    }
}

/// Firmware download bounds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UpdateLimits {
    pub min_firmware_bytes: u32,
    pub max_firmware_bytes: u32,
    pub max_descriptor_bytes: usize,
}

impl Default for UpdateLimits {
    fn default() -> Self {
        Self {
            min_firmware_bytes: 100_000,
            max_firmware_bytes: 8 * 1024 * 1024,
            max_descriptor_bytes: 2048,
        }
    }
}

/// Deadlines for every blocking network operation, in milliseconds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NetworkTimeouts {
    pub wifi_connect_ms: u32,
    /// Connect plus response headers.
    pub request_ms: u32,
    /// One body read.
    pub read_ms: u32,
}

impl Default for NetworkTimeouts {
    fn default() -> Self {
        Self {
            wifi_connect_ms: 20_000,
            request_ms: 15_000,
            read_ms: 30_000,
        }
    }
}

/// Server URLs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Endpoints {
    pub metadata: &'static str,
    pub image: &'static str,
    pub version: &'static str,
    pub firmware: &'static str,
    pub status: &'static str,
}

/// Everything one wake cycle needs to know about this node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeConfig {
    pub device_id: &'static str,
    pub endpoints: Endpoints,
    pub power: PowerThresholds,
    pub calibration: BatteryCalibration,
    pub sampling: BatterySampling,
    pub sleep: SleepPolicy,
    pub update: UpdateLimits,
    pub timeouts: NetworkTimeouts,
    /// Panel size in pixels.
    pub panel_width: usize,
    pub panel_height: usize,
}

impl NodeConfig {
    pub fn new(device_id: &'static str, endpoints: Endpoints) -> Self {
        Self {
            device_id,
            endpoints,
            power: PowerThresholds::default(),
            calibration: BatteryCalibration::default(),
            sampling: BatterySampling::default(),
            sleep: SleepPolicy::default(),
            update: UpdateLimits::default(),
            timeouts: NetworkTimeouts::default(),
            panel_width: gdep133c02::protocol::WIDTH,
            panel_height: gdep133c02::protocol::HEIGHT,
        }
    }

    pub fn panel_pixels(&self) -> usize {
        self.panel_width * self.panel_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wifi_threshold_sits_above_critical() {
        let power = PowerThresholds::default();
        assert!(power.wifi_min_v > power.critical_v);
        assert!(power.ota_min_v > power.display_min_v);
        assert!(power.charging_v < power.full_v);
    }

    #[test]
    fn sleep_clamp_applies_both_bounds() {
        let sleep = SleepPolicy::default();
        assert_eq!(sleep.clamp(0), sleep.min_us);
        assert_eq!(sleep.clamp(u64::MAX), sleep.max_us);
        assert_eq!(sleep.clamp(sleep.default_us), sleep.default_us);
    }

    #[test]
    fn calibration_scales_full_range_through_divider() {
        let calibration = BatteryCalibration {
            full_scale: 4000,
            reference_v: 1.0,
            divider_ratio: 2.0,
        };
        assert_eq!(calibration.voltage(2000), 1.0);
        assert_eq!(calibration.voltage(0), 0.0);
    }
}
