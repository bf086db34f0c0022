//! Reset classification, battery-gated mode selection and sleep sizing.
//!
//! Every decision here fails toward drawing less current. Nothing retries;
//! an unresolved condition is simply evaluated again on the next wake.

use log::{info, warn};

use crate::{
    battery::BatteryReading,
    config::{PowerThresholds, SleepPolicy},
    store::PersistentRecord,
};

/// Hardware reset cause, reduced to what the orchestrator distinguishes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResetReason {
    /// Cold start after power was applied.
    PowerOn,
    /// Supply dropped below the brownout detector level.
    Brownout,
    /// Timer wake, software reset, watchdog and everything else.
    Other,
}

impl ResetReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PowerOn => "power_on",
            Self::Brownout => "brownout",
            Self::Other => "other",
        }
    }
}

/// What the reset meant once the persisted flag was taken into account.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootKind {
    /// Genuine power cycle: history cleared, full refresh forced.
    PowerCycle,
    Brownout,
    /// Reset while the refresh flag was still set.
    PseudoBrownout,
    Wake,
}

impl BootKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PowerCycle => "power_cycle",
            Self::Brownout => "brownout",
            Self::PseudoBrownout => "pseudo_brownout",
            Self::Wake => "wake",
        }
    }

    pub fn is_brownout(self) -> bool {
        matches!(self, Self::Brownout | Self::PseudoBrownout)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperatingMode {
    Normal,
    LowBattery,
    CriticalBattery,
    BrownoutRecovery,
    Charging,
}

impl OperatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::LowBattery => "low_battery",
            Self::CriticalBattery => "critical_battery",
            Self::BrownoutRecovery => "brownout_recovery",
            Self::Charging => "charging",
        }
    }
}

/// Why the network was not used this cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
    BatteryCritical,
    BatteryBelowWifiMin,
    BrownoutRecovery,
}

/// Gates for one wake cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PowerPlan {
    pub mode: OperatingMode,
    /// Voltage used for gating after substituting a default for invalid readings.
    pub voltage: f32,
    pub charging: bool,
    pub network_allowed: bool,
    pub ota_allowed: bool,
    pub display_allowed: bool,
    pub skip: Option<SkipReason>,
    /// Sleep that ignores the server-provided interval.
    pub fixed_sleep_us: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PowerOrchestrator {
    thresholds: PowerThresholds,
    sleep: SleepPolicy,
}

impl PowerOrchestrator {
    pub fn new(thresholds: PowerThresholds, sleep: SleepPolicy) -> Self {
        Self { thresholds, sleep }
    }

    pub fn thresholds(&self) -> &PowerThresholds {
        &self.thresholds
    }

    /// Applies the reset reason to the loaded record and retained counter.
    ///
    /// The caller persists `record` afterwards. The operation flag is always
    /// cleared here so it never survives two observed boots.
    pub fn classify_reset(
        &self,
        reason: ResetReason,
        record: &mut PersistentRecord,
        boot_count: &mut u32,
        now_us: i64,
    ) -> BootKind {
        let interrupted = record.operation_in_progress;
        record.operation_in_progress = false;

        let kind = match reason {
            ResetReason::Brownout => {
                record.note_brownout(now_us);
                BootKind::Brownout
            }
            ResetReason::PowerOn if interrupted => {
                record.note_brownout(now_us);
                BootKind::PseudoBrownout
            }
            ResetReason::PowerOn => {
                record.clear_brownouts();
                record.last_image_id.clear();
                *boot_count = 0;
                BootKind::PowerCycle
            }
            ResetReason::Other => {
                *boot_count = boot_count.saturating_add(1);
                if interrupted {
                    record.note_brownout(now_us);
                    BootKind::PseudoBrownout
                } else {
                    BootKind::Wake
                }
            }
        };

        if kind.is_brownout() {
            warn!(
                "power {} detected brownout_count={} reset_reason={}",
                kind.as_str(),
                record.brownout_count,
                reason.as_str()
            );
        } else {
            info!(
                "power boot kind={} boot_count={} reset_reason={}",
                kind.as_str(),
                *boot_count,
                reason.as_str()
            );
        }

        kind
    }

    /// Replaces an invalid reading with an assumed adequate, non-charging one.
    pub fn effective_reading(&self, reading: BatteryReading) -> BatteryReading {
        if reading.valid {
            return reading;
        }

        warn!(
            "power battery reading invalid; assuming voltage={}",
            self.thresholds.assumed_v
        );
        BatteryReading {
            voltage: self.thresholds.assumed_v,
            valid: false,
            charging: false,
        }
    }

    /// Selects the operating mode and gates for this wake.
    pub fn plan(&self, reading: BatteryReading, record: &PersistentRecord) -> PowerPlan {
        let reading = self.effective_reading(reading);
        let voltage = reading.voltage;
        let charging = reading.charging;
        let t = &self.thresholds;

        let plan = if record.brownout_count >= t.brownout_threshold {
            PowerPlan {
                mode: OperatingMode::BrownoutRecovery,
                voltage,
                charging,
                network_allowed: charging,
                ota_allowed: charging,
                display_allowed: false,
                skip: (!charging).then_some(SkipReason::BrownoutRecovery),
                fixed_sleep_us: Some(self.sleep.recovery_us),
            }
        } else if !charging && voltage < t.critical_v {
            self.skip_plan(voltage, SkipReason::BatteryCritical)
        } else if !charging && voltage < t.wifi_min_v {
            self.skip_plan(voltage, SkipReason::BatteryBelowWifiMin)
        } else {
            let mode = if charging {
                OperatingMode::Charging
            } else if voltage < t.low_v {
                OperatingMode::LowBattery
            } else {
                OperatingMode::Normal
            };

            PowerPlan {
                mode,
                voltage,
                charging,
                network_allowed: true,
                ota_allowed: charging || voltage >= t.ota_min_v,
                display_allowed: charging || voltage >= t.display_min_v,
                skip: None,
                fixed_sleep_us: None,
            }
        };

        info!(
            "power mode={} voltage={} charging={} network={} ota={} display={}",
            plan.mode.as_str(),
            plan.voltage,
            plan.charging,
            plan.network_allowed,
            plan.ota_allowed,
            plan.display_allowed
        );
        plan
    }

    fn skip_plan(&self, voltage: f32, reason: SkipReason) -> PowerPlan {
        PowerPlan {
            mode: OperatingMode::CriticalBattery,
            voltage,
            charging: false,
            network_allowed: false,
            ota_allowed: false,
            display_allowed: false,
            skip: Some(reason),
            fixed_sleep_us: Some(self.sleep.critical_us),
        }
    }

    /// Interval before the next wake for an already clamped `base_us`.
    ///
    /// Doubling on low battery may exceed the nominal maximum.
    pub fn sleep_duration(&self, base_us: u64, voltage: f32, charging: bool) -> u64 {
        if charging {
            self.sleep.charging_us
        } else if voltage < self.thresholds.low_v {
            base_us.saturating_mul(2)
        } else {
            base_us
        }
    }

    /// Final sleep for the cycle. `server_base_us` is `None` when metadata was unavailable.
    pub fn final_sleep_us(&self, plan: &PowerPlan, server_base_us: Option<u64>) -> u64 {
        if let Some(fixed) = plan.fixed_sleep_us {
            return fixed;
        }

        let base = self
            .sleep
            .clamp(server_base_us.unwrap_or(self.sleep.default_us));
        self.sleep_duration(base, plan.voltage, plan.charging)
    }

    /// Clears the brownout history once a cycle reaches its sleep or reboot call.
    ///
    /// Returns `true` when `record` changed and must be persisted.
    pub fn finish_cycle(&self, record: &mut PersistentRecord) -> bool {
        if record.brownout_count == 0 {
            return false;
        }

        info!(
            "power cycle completed; clearing brownout_count={}",
            record.brownout_count
        );
        record.clear_brownouts();
        true
    }
}
