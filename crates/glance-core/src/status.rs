//! End-of-cycle status strings and the device-status telemetry document.

use alloc::vec::Vec;

use log::{info, warn};
use serde::Serialize;

use crate::{
    net::{HttpClient, NetError},
    power::SkipReason,
};

/// Outcome reported for one wake cycle.
///
/// Skips ("didn't try") and failures ("tried and failed") never share a string.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CycleStatus {
    Ok,
    NoChange,
    BatteryCritical,
    BatteryBelowWifiMin,
    BrownoutRecovery,
    DisplaySkippedLowBattery,
    OtaSkippedLowBattery,
    WifiFailed,
    MetadataFailed,
    DownloadFailed,
    DisplayFailed,
    OtaFailed,
    OtaApplied,
}

impl CycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NoChange => "no_change",
            Self::BatteryCritical => "battery_critical",
            Self::BatteryBelowWifiMin => "battery_below_wifi_min",
            Self::BrownoutRecovery => "brownout_recovery",
            Self::DisplaySkippedLowBattery => "display_skipped_low_battery",
            Self::OtaSkippedLowBattery => "ota_skipped_low_battery",
            Self::WifiFailed => "wifi_failed",
            Self::MetadataFailed => "metadata_failed",
            Self::DownloadFailed => "download_failed",
            Self::DisplayFailed => "display_failed",
            Self::OtaFailed => "ota_failed",
            Self::OtaApplied => "ota_applied",
        }
    }

    /// A power-safety skip rather than a failure.
    pub fn is_skip(self) -> bool {
        matches!(
            self,
            Self::BatteryCritical
                | Self::BatteryBelowWifiMin
                | Self::BrownoutRecovery
                | Self::DisplaySkippedLowBattery
                | Self::OtaSkippedLowBattery
        )
    }
}

impl From<SkipReason> for CycleStatus {
    fn from(reason: SkipReason) -> Self {
        match reason {
            SkipReason::BatteryCritical => Self::BatteryCritical,
            SkipReason::BatteryBelowWifiMin => Self::BatteryBelowWifiMin,
            SkipReason::BrownoutRecovery => Self::BrownoutRecovery,
        }
    }
}

/// Telemetry posted once per networked cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus<'a> {
    pub device_id: &'a str,
    pub battery_voltage: f32,
    pub battery_percent: u8,
    pub charging: bool,
    /// dBm, absent when the radio reported nothing.
    pub signal_strength: Option<i8>,
    pub free_heap: u32,
    pub boot_count: u32,
    pub brownout_count: i32,
    pub firmware_version: &'a str,
    pub mode: &'a str,
    pub status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ota_status: Option<&'a str>,
}

impl DeviceStatus<'_> {
    pub fn to_json(&self) -> Option<Vec<u8>> {
        match serde_json::to_vec(self) {
            Ok(body) => Some(body),
            Err(err) => {
                warn!("status serialize failed: {:?}", err);
                None
            }
        }
    }
}

/// Posts `status`. Best effort: failures are logged and never retried.
pub async fn report_status<H: HttpClient>(
    http: &mut H,
    url: &str,
    status: &DeviceStatus<'_>,
) -> Result<(), NetError> {
    let Some(body) = status.to_json() else {
        return Ok(());
    };

    match http.post_json(url, &body).await {
        Ok(code) if (200..300).contains(&code) => {
            info!("status reported status={} http={}", status.status, code);
            Ok(())
        }
        Ok(code) => {
            warn!("status rejected http={}", code);
            Err(NetError::Status(code))
        }
        Err(err) => {
            warn!("status report failed: {:?}", err);
            Err(err)
        }
    }
}
