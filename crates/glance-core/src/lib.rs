#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

//! Wake-cycle logic for a deep-sleeping, battery-powered e-paper node.
//!
//! Everything here is hardware independent. Board crates implement the
//! capability traits (`PersistentStore`, `AdcSampler`, `NetworkLink`,
//! `HttpClient`, `FirmwareSlot`, `EinkPanel`) and hand them to
//! [`cycle::WakeCycleDriver`].

extern crate alloc;

pub mod battery;
pub mod config;
pub mod cycle;
pub mod image;
pub mod net;
pub mod panel;
pub mod power;
pub mod status;
pub mod store;
pub mod update;

#[cfg(test)]
mod testing;
