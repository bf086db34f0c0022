use core::time::Duration;

use esp_hal::rtc_cntl::{Rtc, sleep::TimerWakeupSource};
use log::info;

pub(super) fn enter_deep_sleep(rtc: &mut Rtc<'_>, duration_us: u64) -> ! {
    info!("sleep: deep sleep for {}s", duration_us / 1_000_000);
    let timer = TimerWakeupSource::new(Duration::from_micros(duration_us));
    rtc.sleep_deep(&[&timer]);
}
