//! In-memory collaborators shared by the unit tests.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};

use crate::{
    battery::{BatteryReading, BatterySource},
    net::{ChunkSink, Flow, HttpClient, NetError, NetworkLink, Transfer},
    panel::{Color, Controller, EinkPanel},
    store::{PersistentRecord, PersistentStore, RetainedCounter},
    update::{FirmwareSlot, ImageState},
};

pub fn block_on<F: core::future::Future>(future: F) -> F::Output {
    embassy_futures::block_on(future)
}

/// Canned response for one URL.
#[derive(Clone, Debug)]
pub struct Route {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
    pub content_length: Option<u32>,
    /// Drop the connection after this many body bytes.
    pub cut_after: Option<usize>,
    pub error: Option<NetError>,
}

impl Route {
    pub fn ok(url: &str, body: &[u8]) -> Self {
        Self {
            url: url.to_string(),
            status: 200,
            body: body.to_vec(),
            content_length: Some(body.len() as u32),
            cut_after: None,
            error: None,
        }
    }

    pub fn failing(url: &str, error: NetError) -> Self {
        Self {
            error: Some(error),
            ..Self::ok(url, b"")
        }
    }

    pub fn declared_length(mut self, len: Option<u32>) -> Self {
        self.content_length = len;
        self
    }

    pub fn cut_after(mut self, bytes: usize) -> Self {
        self.cut_after = Some(bytes);
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeHttp {
    pub routes: Vec<Route>,
    /// Body delivery granularity.
    pub chunk_size: usize,
    pub requests: Vec<String>,
    pub posts: Vec<(String, String)>,
    pub post_error: Option<NetError>,
}

impl FakeHttp {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes,
            chunk_size: 7,
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn requested(&self, url: &str) -> bool {
        self.requests.iter().any(|req| req == url)
    }
}

impl HttpClient for FakeHttp {
    async fn get<S: ChunkSink>(&mut self, url: &str, sink: &mut S) -> Result<Transfer, NetError> {
        self.requests.push(url.to_string());
        let route = self
            .routes
            .iter()
            .find(|route| route.url == url)
            .ok_or(NetError::Status(404))?;

        if let Some(error) = route.error {
            return Err(error);
        }
        if !(200..300).contains(&route.status) {
            return Err(NetError::Status(route.status));
        }

        let mut transfer = Transfer {
            bytes: 0,
            content_length: route.content_length,
            stopped_early: false,
        };
        match sink.begin(route.content_length) {
            Flow::Continue => {}
            Flow::Stop => {
                transfer.stopped_early = true;
                return Ok(transfer);
            }
            Flow::Abort => return Err(NetError::Aborted),
        }

        let sent = route.cut_after.unwrap_or(route.body.len()).min(route.body.len());
        for chunk in route.body[..sent].chunks(self.chunk_size.max(1)) {
            transfer.bytes += chunk.len() as u32;
            match sink.chunk(chunk) {
                Flow::Continue => {}
                Flow::Stop => {
                    transfer.stopped_early = true;
                    return Ok(transfer);
                }
                Flow::Abort => return Err(NetError::Aborted),
            }
        }

        if route.cut_after.is_some() {
            return Err(NetError::Io);
        }
        Ok(transfer)
    }

    async fn post_json(&mut self, url: &str, body: &[u8]) -> Result<u16, NetError> {
        self.posts
            .push((url.to_string(), String::from_utf8_lossy(body).into_owned()));
        match self.post_error {
            Some(error) => Err(error),
            None => Ok(200),
        }
    }
}

/// Record store that logs every durable write.
#[derive(Debug, Default)]
pub struct FakeStore {
    pub record: PersistentRecord,
    pub fail_load: bool,
    pub saves: Vec<PersistentRecord>,
}

impl FakeStore {
    pub fn with(record: PersistentRecord) -> Self {
        Self {
            record,
            ..Self::default()
        }
    }
}

impl PersistentStore for FakeStore {
    type Error = ();

    fn load(&mut self) -> Result<PersistentRecord, ()> {
        if self.fail_load {
            return Err(());
        }
        Ok(self.record.clone())
    }

    fn save(&mut self, record: &PersistentRecord) -> Result<(), ()> {
        self.record = record.clone();
        self.saves.push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeCounter(pub u32);

impl RetainedCounter for FakeCounter {
    fn get(&mut self) -> u32 {
        self.0
    }

    fn set(&mut self, value: u32) {
        self.0 = value;
    }
}

#[derive(Debug)]
pub struct FakeBattery {
    pub reading: BatteryReading,
    /// Overrides what `read_fast` sees, e.g. a rail sagging mid-cycle.
    pub fast: Option<BatteryReading>,
    pub full_reads: u32,
    pub fast_reads: u32,
}

impl FakeBattery {
    pub fn at(voltage: f32, charging: bool) -> Self {
        Self {
            reading: BatteryReading {
                voltage,
                valid: true,
                charging,
            },
            fast: None,
            full_reads: 0,
            fast_reads: 0,
        }
    }
}

impl BatterySource for FakeBattery {
    fn read(&mut self) -> BatteryReading {
        self.full_reads += 1;
        self.reading
    }

    fn read_fast(&mut self) -> BatteryReading {
        self.fast_reads += 1;
        self.fast.unwrap_or(self.reading)
    }
}

#[derive(Debug, Default)]
pub struct FakeLink {
    pub fail: bool,
    pub connects: u32,
    pub disconnects: u32,
}

impl NetworkLink for FakeLink {
    async fn connect(&mut self, _timeout_ms: u32) -> Result<(), NetError> {
        self.connects += 1;
        if self.fail {
            Err(NetError::Timeout)
        } else {
            Ok(())
        }
    }

    fn rssi(&mut self) -> Option<i8> {
        (!self.fail).then_some(-61)
    }

    async fn disconnect(&mut self) {
        self.disconnects += 1;
    }
}

#[derive(Debug)]
pub struct FakeSlot {
    pub state: ImageState,
    pub capacity: Option<u32>,
    pub image: Vec<u8>,
    pub begun: Option<u32>,
    pub activated: bool,
    pub confirmed: bool,
    pub fail_write_at: Option<u32>,
}

impl Default for FakeSlot {
    fn default() -> Self {
        Self {
            state: ImageState::Valid,
            capacity: Some(2 * 1024 * 1024),
            image: Vec::new(),
            begun: None,
            activated: false,
            confirmed: false,
            fail_write_at: None,
        }
    }
}

impl FirmwareSlot for FakeSlot {
    type Error = ();

    fn running_state(&mut self) -> Result<ImageState, ()> {
        Ok(self.state)
    }

    fn confirm_running(&mut self) -> Result<(), ()> {
        self.confirmed = true;
        self.state = ImageState::Valid;
        Ok(())
    }

    fn inactive_capacity(&mut self) -> Result<Option<u32>, ()> {
        Ok(self.capacity)
    }

    fn begin(&mut self, size: u32) -> Result<(), ()> {
        self.begun = Some(size);
        self.image.clear();
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), ()> {
        assert_eq!(offset as usize, self.image.len());
        if let Some(limit) = self.fail_write_at {
            if offset + bytes.len() as u32 > limit {
                return Err(());
            }
        }
        self.image.extend_from_slice(bytes);
        Ok(())
    }

    fn activate(&mut self) -> Result<(), ()> {
        self.activated = true;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PanelOp {
    Init,
    Command(Controller, u8),
    Data(Controller, Vec<u8>),
    Refresh,
    Clear(Color),
    Sleep,
}

#[derive(Debug, Default)]
pub struct FakePanel {
    pub ops: Vec<PanelOp>,
    pub fail_refresh: bool,
}

impl FakePanel {
    /// Concatenated data written to one controller.
    pub fn data_for(&self, target: Controller) -> Vec<u8> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                PanelOp::Data(t, data) if *t == target => Some(data.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub fn refreshed(&self) -> bool {
        self.ops.contains(&PanelOp::Refresh)
    }
}

impl EinkPanel for FakePanel {
    type Error = ();

    fn init(&mut self) -> Result<(), ()> {
        self.ops.push(PanelOp::Init);
        Ok(())
    }

    fn write_command(&mut self, target: Controller, command: u8) -> Result<(), ()> {
        self.ops.push(PanelOp::Command(target, command));
        Ok(())
    }

    fn write_data(&mut self, target: Controller, data: &[u8]) -> Result<(), ()> {
        self.ops.push(PanelOp::Data(target, data.to_vec()));
        Ok(())
    }

    fn refresh(&mut self) -> Result<(), ()> {
        if self.fail_refresh {
            return Err(());
        }
        self.ops.push(PanelOp::Refresh);
        Ok(())
    }

    fn clear(&mut self, color: Color) -> Result<(), ()> {
        self.ops.push(PanelOp::Clear(color));
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), ()> {
        self.ops.push(PanelOp::Sleep);
        Ok(())
    }
}
