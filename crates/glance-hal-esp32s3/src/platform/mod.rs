pub mod battery;
pub mod display;
pub mod firmware;
pub mod reset;
