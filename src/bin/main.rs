#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

extern crate alloc;

use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_net::StackResources;
use esp_hal::{
    clock::CpuClock,
    delay::Delay,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    rng::Rng,
    rtc_cntl::Rtc,
    spi::master::Spi,
    time::Rate,
    timer::timg::TimerGroup,
};
use gdep133c02::{Gdep133c02, Pins};
use glance_core::{
    battery::BatteryMonitor,
    config::{Endpoints, NodeConfig},
    cycle::{CycleOutcome, NodeIo, WakeCycleDriver},
    update::FirmwareIdentity,
};
use glance_hal_esp32s3::{
    network::{HttpTcpState, ReqwlessHttp, WifiConfig, WifiLink},
    platform::{
        battery::AdcBattery, display::PanelDisplay, firmware::OtaSlot, reset::last_reset_reason,
    },
    storage::{flash_record::FlashRecordStore, retained::RtcBootCounter},
};
use log::{LevelFilter, info, warn};
use static_cell::StaticCell;

#[path = "main/power.rs"]
mod power;

const WIFI_SSID: &str = env!(
    "GLANCE_WIFI_SSID",
    "Set GLANCE_WIFI_SSID in your environment before building/flashing."
);
const WIFI_PASSWORD: &str = env!(
    "GLANCE_WIFI_PASSWORD",
    "Set GLANCE_WIFI_PASSWORD in your environment before building/flashing."
);
const WIFI_CONFIG: WifiConfig = WifiConfig::new(WIFI_SSID, WIFI_PASSWORD);

const ENDPOINTS: Endpoints = Endpoints {
    metadata: concat!(env!("GLANCE_API_BASE"), "/current.json"),
    image: concat!(env!("GLANCE_API_BASE"), "/image.bin"),
    version: concat!(env!("GLANCE_API_BASE"), "/firmware/version"),
    firmware: concat!(env!("GLANCE_API_BASE"), "/firmware/latest"),
    status: concat!(env!("GLANCE_API_BASE"), "/device-status"),
};

const DEVICE_ID: &str = match option_env!("GLANCE_DEVICE_ID") {
    Some(id) => id,
    None => "glance-s3",
};
const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");
const USER_AGENT: &str = concat!("glance/", env!("CARGO_PKG_VERSION"));
const PANEL_SPI_HZ: u32 = 10_000_000;

static NET_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
static TCP_STATE: StaticCell<HttpTcpState> = StaticCell::new();

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

fn free_heap() -> u32 {
    esp_alloc::HEAP.free() as u32
}

fn build_date() -> Option<u32> {
    option_env!("GLANCE_BUILD_DATE")
        .and_then(|raw| raw.parse().ok())
        .filter(|date| *date != 0)
}

#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    esp_println::logger::init_logger(LevelFilter::Info);
    esp_println::println!("boot: glance {} starting", FIRMWARE_VERSION);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    let reason = last_reset_reason();

    // esp-radio requires an allocator; the frame buffer lives in PSRAM.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);
    esp_alloc::psram_allocator!(&peripherals.PSRAM, esp_hal::psram);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let mut rtc = Rtc::new(peripherals.LPWR);
    let now_us = rtc.current_time_us() as i64;
    let node = NodeConfig::new(DEVICE_ID, ENDPOINTS);
    let fallback_sleep_us = node.sleep.default_us;
    info!("boot reset_reason={} device_id={}", reason.as_str(), DEVICE_ID);

    let store = match FlashRecordStore::new() {
        Ok(store) => store,
        Err(err) => {
            warn!("record store unavailable: {:?}", err);
            power::enter_deep_sleep(&mut rtc, fallback_sleep_us);
        }
    };
    let firmware = match OtaSlot::new() {
        Ok(slot) => slot,
        Err(err) => {
            warn!("ota slot unavailable: {:?}", err);
            power::enter_deep_sleep(&mut rtc, fallback_sleep_us);
        }
    };

    let battery = BatteryMonitor::new(
        AdcBattery::new(peripherals.ADC1, peripherals.GPIO2),
        Delay::new(),
        node.calibration,
        node.sampling,
        node.power,
    );

    // Panel wiring: SCK=GPIO9 MOSI=GPIO41 CS0=GPIO18 CS1=GPIO17 RST=GPIO6 BUSY=GPIO7 PWR=GPIO45
    let spi_config = esp_hal::spi::master::Config::default()
        .with_frequency(Rate::from_hz(PANEL_SPI_HZ))
        .with_mode(esp_hal::spi::Mode::_0);
    let spi = match Spi::new(peripherals.SPI2, spi_config) {
        Ok(spi) => spi
            .with_sck(peripherals.GPIO9)
            .with_mosi(peripherals.GPIO41),
        Err(err) => {
            warn!("panel spi config failed: {:?}", err);
            power::enter_deep_sleep(&mut rtc, fallback_sleep_us);
        }
    };
    let pins = Pins {
        cs_left: Output::new(peripherals.GPIO18, Level::High, OutputConfig::default()),
        cs_right: Output::new(peripherals.GPIO17, Level::High, OutputConfig::default()),
        reset: Output::new(peripherals.GPIO6, Level::High, OutputConfig::default()),
        busy: Input::new(
            peripherals.GPIO7,
            InputConfig::default().with_pull(Pull::Up),
        ),
        power: Output::new(peripherals.GPIO45, Level::Low, OutputConfig::default()),
    };
    let panel = PanelDisplay::new(Gdep133c02::new(
        spi,
        pins,
        Delay::new(),
        gdep133c02::Config {
            spi_hz: PANEL_SPI_HZ,
            ..Default::default()
        },
    ));

    let radio = match esp_radio::init() {
        Ok(radio) => radio,
        Err(err) => {
            warn!("esp-radio init failed: {:?}", err);
            power::enter_deep_sleep(&mut rtc, fallback_sleep_us);
        }
    };
    let (wifi_controller, interfaces) =
        match esp_radio::wifi::new(&radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                warn!("wifi peripheral init failed: {:?}", err);
                power::enter_deep_sleep(&mut rtc, fallback_sleep_us);
            }
        };

    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let (stack, mut net_runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::<4>::new()),
        seed,
    );

    let mut io = NodeIo {
        store,
        counter: RtcBootCounter::take(),
        battery,
        link: WifiLink::new(wifi_controller, stack, WIFI_CONFIG),
        http: ReqwlessHttp::new(
            stack,
            TCP_STATE.init(HttpTcpState::new()),
            DEVICE_ID,
            USER_AGENT,
            node.timeouts,
        ),
        firmware,
        panel,
        free_heap,
    };

    let identity = FirmwareIdentity {
        version: FIRMWARE_VERSION,
        build_date: build_date(),
    };
    let driver = WakeCycleDriver::new(&node, identity);

    let outcome = match select(net_runner.run(), driver.run(&mut io, reason, now_us)).await {
        Either::First(never) => never,
        Either::Second(outcome) => outcome,
    };

    if let Err(err) = io.panel.power_off() {
        warn!("panel power off failed: {:?}", err);
    }

    match outcome {
        CycleOutcome::Sleep { duration_us } => power::enter_deep_sleep(&mut rtc, duration_us),
        CycleOutcome::Reboot => {
            info!("restarting into new firmware");
            esp_hal::system::software_reset()
        }
    }
}
