#![no_std]

//! ESP32-S3 adapters for the glance wake cycle.

extern crate alloc;

pub mod network;
pub mod platform;
pub mod storage;
