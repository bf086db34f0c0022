use esp_hal::{
    rtc_cntl::{SocResetReason, reset_reason},
    system::Cpu,
};
use glance_core::power::ResetReason;

/// Reset cause of the application core, as the wake cycle sees it.
pub fn last_reset_reason() -> ResetReason {
    match reset_reason(Cpu::ProCpu) {
        Some(SocResetReason::ChipPowerOn) => ResetReason::PowerOn,
        Some(SocResetReason::SysBrownOut) => ResetReason::Brownout,
        _ => ResetReason::Other,
    }
}
