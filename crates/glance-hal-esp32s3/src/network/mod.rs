//! Wi-Fi link and HTTP transport for one wake cycle.

mod http;
mod wifi;

pub use http::{HttpTcpState, ReqwlessHttp};
pub use wifi::{WifiConfig, WifiLink};
