use glance_core::store::RetainedCounter;

const RETAINED_MAGIC: u32 = 0x474C_4E43;

#[repr(C)]
struct RetainedState {
    magic: u32,
    boot_count: u32,
}

#[esp_hal::ram(unstable(rtc_fast))]
static mut RETAINED: RetainedState = RetainedState {
    magic: 0,
    boot_count: 0,
};

/// Boot counter in RTC fast memory.
///
/// Survives deep sleep. After power loss the magic no longer matches and the
/// counter reads as zero.
pub struct RtcBootCounter {
    _private: (),
}

impl RtcBootCounter {
    pub fn take() -> Self {
        Self { _private: () }
    }
}

impl RetainedCounter for RtcBootCounter {
    fn get(&mut self) -> u32 {
        // SAFETY: single core access before any task touches the counter.
        let state = unsafe { &*(&raw const RETAINED) };
        if state.magic == RETAINED_MAGIC {
            state.boot_count
        } else {
            0
        }
    }

    fn set(&mut self, value: u32) {
        // SAFETY: see `get`.
        let state = unsafe { &mut *(&raw mut RETAINED) };
        state.magic = RETAINED_MAGIC;
        state.boot_count = value;
    }
}
