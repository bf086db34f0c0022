use embassy_net::Stack;
use embassy_time::{Duration, with_timeout};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController};
use glance_core::net::{NetError, NetworkLink};
use log::{info, warn};

/// Wi-Fi credentials source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WifiConfig {
    pub ssid: &'static str,
    pub password: &'static str,
}

impl WifiConfig {
    pub const fn new(ssid: &'static str, password: &'static str) -> Self {
        Self { ssid, password }
    }
}

/// Station link brought up once per wake cycle and torn down before sleep.
pub struct WifiLink<'d> {
    controller: WifiController<'d>,
    stack: Stack<'d>,
    config: WifiConfig,
}

impl<'d> WifiLink<'d> {
    pub fn new(controller: WifiController<'d>, stack: Stack<'d>, config: WifiConfig) -> Self {
        Self {
            controller,
            stack,
            config,
        }
    }

    async fn bring_up(&mut self) -> Result<(), NetError> {
        if !matches!(self.controller.is_started(), Ok(true)) {
            let client_config = ClientConfig::default()
                .with_ssid(self.config.ssid.into())
                .with_password(self.config.password.into());
            if let Err(err) = self.controller.set_config(&ModeConfig::Client(client_config)) {
                warn!("wifi mode config failed: {:?}", err);
                return Err(NetError::Connect);
            }
            if let Err(err) = self.controller.start_async().await {
                warn!("wifi start failed: {:?}", err);
                return Err(NetError::Connect);
            }
        }

        if let Err(err) = self.controller.connect_async().await {
            warn!("wifi connect failed: {:?}", err);
            return Err(NetError::Connect);
        }

        self.stack.wait_config_up().await;
        Ok(())
    }
}

impl NetworkLink for WifiLink<'_> {
    async fn connect(&mut self, timeout_ms: u32) -> Result<(), NetError> {
        match with_timeout(Duration::from_millis(timeout_ms as u64), self.bring_up()).await {
            Ok(Ok(())) => {
                if let Some(config) = self.stack.config_v4() {
                    info!("wifi connected address={}", config.address);
                }
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                warn!("wifi connect timed out after {}ms", timeout_ms);
                Err(NetError::Timeout)
            }
        }
    }

    fn rssi(&mut self) -> Option<i8> {
        self.controller
            .rssi()
            .ok()
            .map(|rssi| rssi.clamp(i8::MIN as i32, i8::MAX as i32) as i8)
    }

    async fn disconnect(&mut self) {
        if matches!(self.controller.is_connected(), Ok(true))
            && let Err(err) = self.controller.disconnect_async().await
        {
            warn!("wifi disconnect failed: {:?}", err);
        }
        if matches!(self.controller.is_started(), Ok(true))
            && let Err(err) = self.controller.stop_async().await
        {
            warn!("wifi stop failed: {:?}", err);
        }
    }
}
