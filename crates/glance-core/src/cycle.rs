//! One wake cycle from restored state to the terminal sleep or reboot.

use log::{info, warn};
use thiserror::Error;

use crate::{
    battery::{BatteryReading, BatterySource, battery_percent},
    config::NodeConfig,
    image::{ImageError, ImageSyncPipeline},
    net::{HttpClient, NetError, NetworkLink},
    panel::EinkPanel,
    power::{BootKind, OperatingMode, PowerOrchestrator, PowerPlan, ResetReason},
    status::{CycleStatus, DeviceStatus, report_status},
    store::{PersistentRecord, PersistentStore, RetainedCounter},
    update::{FirmwareIdentity, FirmwareSlot, UpdateError, UpdatePipeline, mark_firmware_valid},
};

/// Board capabilities for one wake cycle.
pub struct NodeIo<S, C, B, L, H, F, P> {
    pub store: S,
    pub counter: C,
    pub battery: B,
    pub link: L,
    pub http: H,
    pub firmware: F,
    pub panel: P,
    /// Free heap in bytes, for telemetry.
    pub free_heap: fn() -> u32,
}

/// What the board does once the cycle returns.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CycleOutcome {
    Sleep { duration_us: u64 },
    /// A new firmware image is active and needs a reset to run.
    Reboot,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum CycleError {
    #[error("wifi: {0}")]
    Link(NetError),
    #[error("update: {0}")]
    Update(#[from] UpdateError),
    #[error("image: {0}")]
    Image(#[from] ImageError),
}

impl CycleError {
    fn status(&self) -> CycleStatus {
        match self {
            Self::Link(_) => CycleStatus::WifiFailed,
            Self::Update(_) => CycleStatus::OtaFailed,
            Self::Image(ImageError::Metadata(_) | ImageError::MetadataFormat) => {
                CycleStatus::MetadataFailed
            }
            Self::Image(
                ImageError::Download(_) | ImageError::Incomplete { .. } | ImageError::OutOfMemory,
            ) => CycleStatus::DownloadFailed,
            Self::Image(ImageError::Store | ImageError::Panel) => CycleStatus::DisplayFailed,
        }
    }
}

/// State of the running cycle, threaded through every step.
#[derive(Clone, Debug, PartialEq)]
pub struct WakeCycleContext {
    pub reason: ResetReason,
    pub now_us: i64,
    pub boot: BootKind,
    /// Durable record as of the last load or save.
    pub record: PersistentRecord,
    pub boot_count: u32,
    pub reading: BatteryReading,
    pub plan: PowerPlan,
    pub status: CycleStatus,
    pub ota_status: Option<CycleStatus>,
    pub rssi: Option<i8>,
    /// Clamped server interval, `None` when metadata was not fetched.
    pub server_sleep_us: Option<u64>,
}

enum OtaResult {
    UpToDate,
    SkippedLowBattery,
    Applied,
}

pub struct WakeCycleDriver<'a> {
    config: &'a NodeConfig,
    identity: FirmwareIdentity,
    orchestrator: PowerOrchestrator,
}

impl<'a> WakeCycleDriver<'a> {
    pub fn new(config: &'a NodeConfig, identity: FirmwareIdentity) -> Self {
        Self {
            config,
            identity,
            orchestrator: PowerOrchestrator::new(config.power, config.sleep),
        }
    }

    pub async fn run<S, C, B, L, H, F, P>(
        &self,
        io: &mut NodeIo<S, C, B, L, H, F, P>,
        reason: ResetReason,
        now_us: i64,
    ) -> CycleOutcome
    where
        S: PersistentStore,
        C: RetainedCounter,
        B: BatterySource,
        L: NetworkLink,
        H: HttpClient,
        F: FirmwareSlot,
        P: EinkPanel,
    {
        let mut ctx = self.restore(io, reason, now_us);

        if let Err(err) = mark_firmware_valid(&mut io.firmware) {
            warn!("cycle firmware state unavailable: {:?}", err);
        }

        if let Some(skip) = ctx.plan.skip {
            ctx.status = skip.into();
            info!(
                "cycle skipping network status={} voltage={}",
                ctx.status.as_str(),
                ctx.plan.voltage
            );
            return self.finish(io, &mut ctx);
        }

        if let Err(err) = io.link.connect(self.config.timeouts.wifi_connect_ms).await {
            let err = CycleError::Link(err);
            warn!("cycle {}", err);
            ctx.status = err.status();
            io.link.disconnect().await;
            return self.finish(io, &mut ctx);
        }
        ctx.rssi = io.link.rssi();

        if ctx.plan.ota_allowed {
            match self.run_ota(&mut io.http, &mut io.firmware, &ctx.plan).await {
                Ok(OtaResult::Applied) => {
                    ctx.status = CycleStatus::OtaApplied;
                    ctx.ota_status = Some(CycleStatus::OtaApplied);
                    self.report(io, &ctx).await;
                    io.link.disconnect().await;
                    self.complete(io, &mut ctx);
                    info!("cycle rebooting into new firmware");
                    return CycleOutcome::Reboot;
                }
                Ok(OtaResult::SkippedLowBattery) => {
                    ctx.ota_status = Some(CycleStatus::OtaSkippedLowBattery);
                }
                Ok(OtaResult::UpToDate) => {}
                Err(err) => {
                    warn!("cycle {}", err);
                    ctx.ota_status = Some(err.status());
                }
            }
        } else if ctx.plan.mode != OperatingMode::BrownoutRecovery {
            info!(
                "cycle ota skipped voltage={} min={}",
                ctx.plan.voltage, self.config.power.ota_min_v
            );
            ctx.ota_status = Some(CycleStatus::OtaSkippedLowBattery);
        }

        ctx.status = match self.run_display(io, &mut ctx).await {
            Ok(status) => status,
            Err(err) => {
                warn!("cycle {}", err);
                err.status()
            }
        };

        self.report(io, &ctx).await;
        io.link.disconnect().await;
        self.finish(io, &mut ctx)
    }

    /// Loads the record, applies the reset reason and plans the cycle.
    fn restore<S, C, B, L, H, F, P>(
        &self,
        io: &mut NodeIo<S, C, B, L, H, F, P>,
        reason: ResetReason,
        now_us: i64,
    ) -> WakeCycleContext
    where
        S: PersistentStore,
        C: RetainedCounter,
        B: BatterySource,
    {
        let loaded = io.store.load().unwrap_or_else(|err| {
            warn!("cycle record load failed, using defaults: {:?}", err);
            PersistentRecord::default()
        });

        let mut record = loaded.clone();
        let mut boot_count = io.counter.get();
        let boot = self
            .orchestrator
            .classify_reset(reason, &mut record, &mut boot_count, now_us);
        io.counter.set(boot_count);

        if record != loaded {
            if let Err(err) = io.store.save(&record) {
                warn!("cycle record save failed: {:?}", err);
            }
        }

        let reading = io.battery.read();
        let plan = self.orchestrator.plan(reading, &record);

        WakeCycleContext {
            reason,
            now_us,
            boot,
            record,
            boot_count,
            reading,
            plan,
            status: CycleStatus::Ok,
            ota_status: None,
            rssi: None,
            server_sleep_us: None,
        }
    }

    async fn run_ota<H: HttpClient, F: FirmwareSlot>(
        &self,
        http: &mut H,
        slot: &mut F,
        plan: &PowerPlan,
    ) -> Result<OtaResult, CycleError> {
        let pipeline = UpdatePipeline::new(
            &self.config.endpoints,
            self.config.update,
            self.identity,
            self.config.power.ota_min_v,
        );

        let Some(info) = pipeline.check_version(http).await? else {
            return Ok(OtaResult::UpToDate);
        };

        let floor = info.min_battery.max(self.config.power.ota_min_v);
        if !plan.charging && plan.voltage < floor {
            info!(
                "cycle ota skipped version={} voltage={} floor={}",
                info.version, plan.voltage, floor
            );
            return Ok(OtaResult::SkippedLowBattery);
        }

        pipeline.apply_update(http, slot, &info).await?;
        Ok(OtaResult::Applied)
    }

    async fn run_display<S, C, B, L, H, F, P>(
        &self,
        io: &mut NodeIo<S, C, B, L, H, F, P>,
        ctx: &mut WakeCycleContext,
    ) -> Result<CycleStatus, CycleError>
    where
        S: PersistentStore,
        B: BatterySource,
        H: HttpClient,
        P: EinkPanel,
    {
        if ctx.plan.mode == OperatingMode::BrownoutRecovery {
            info!("cycle display skipped; brownout recovery");
            return Ok(CycleStatus::BrownoutRecovery);
        }

        let pipeline = ImageSyncPipeline::new(
            &self.config.endpoints,
            self.config.sleep,
            self.config.panel_width,
            self.config.panel_height,
        );
        let metadata = pipeline
            .fetch_metadata(&mut io.http, &ctx.record.last_image_id)
            .await?;
        ctx.server_sleep_us = Some(metadata.sleep_duration_us);

        if !metadata.has_new_image {
            return Ok(CycleStatus::NoChange);
        }
        if !ctx.plan.display_allowed {
            info!(
                "cycle display skipped voltage={} min={}",
                ctx.plan.voltage, self.config.power.display_min_v
            );
            return Ok(CycleStatus::DisplaySkippedLowBattery);
        }

        let battery = &mut io.battery;
        let orchestrator = &self.orchestrator;
        let display_min_v = self.config.power.display_min_v;
        let battery_allows_pattern = || {
            let fast = orchestrator.effective_reading(battery.read_fast());
            let allowed = fast.charging || fast.voltage >= display_min_v;
            info!(
                "cycle error pattern gate voltage={} charging={} allowed={}",
                fast.voltage, fast.charging, allowed
            );
            allowed
        };

        pipeline
            .sync_and_display(
                &mut io.http,
                &mut io.panel,
                &mut io.store,
                &metadata,
                battery_allows_pattern,
            )
            .await?;
        Ok(CycleStatus::Ok)
    }

    async fn report<S, C, B, L, H, F, P>(
        &self,
        io: &mut NodeIo<S, C, B, L, H, F, P>,
        ctx: &WakeCycleContext,
    ) where
        B: BatterySource,
        H: HttpClient,
    {
        let fast = io.battery.read_fast();
        let (voltage, charging) = if fast.valid {
            (fast.voltage, fast.charging)
        } else {
            (ctx.plan.voltage, ctx.plan.charging)
        };

        let status = DeviceStatus {
            device_id: self.config.device_id,
            battery_voltage: voltage,
            battery_percent: battery_percent(voltage, &self.config.power),
            charging,
            signal_strength: ctx.rssi,
            free_heap: (io.free_heap)(),
            boot_count: ctx.boot_count,
            brownout_count: ctx.record.brownout_count,
            firmware_version: self.identity.version,
            mode: ctx.plan.mode.as_str(),
            status: ctx.status.as_str(),
            ota_status: ctx.ota_status.map(CycleStatus::as_str),
        };

        let _ = report_status(&mut io.http, self.config.endpoints.status, &status).await;
    }

    /// Applies the end-of-cycle brownout clear against the durable record.
    fn complete<S, C, B, L, H, F, P>(
        &self,
        io: &mut NodeIo<S, C, B, L, H, F, P>,
        ctx: &mut WakeCycleContext,
    ) where
        S: PersistentStore,
    {
        let mut record = io.store.load().unwrap_or_else(|err| {
            warn!("cycle record reload failed: {:?}", err);
            ctx.record.clone()
        });

        if self.orchestrator.finish_cycle(&mut record)
            && let Err(err) = io.store.save(&record)
        {
            warn!("cycle record save failed: {:?}", err);
        }
        ctx.record = record;
    }

    /// Completes the cycle and sizes the sleep.
    fn finish<S, C, B, L, H, F, P>(
        &self,
        io: &mut NodeIo<S, C, B, L, H, F, P>,
        ctx: &mut WakeCycleContext,
    ) -> CycleOutcome
    where
        S: PersistentStore,
    {
        self.complete(io, ctx);

        let duration_us = self
            .orchestrator
            .final_sleep_us(&ctx.plan, ctx.server_sleep_us);
        info!(
            "cycle done boot={} status={} mode={} sleep_us={}",
            ctx.boot.as_str(),
            ctx.status.as_str(),
            ctx.plan.mode.as_str(),
            duration_us
        );
        CycleOutcome::Sleep { duration_us }
    }
}
