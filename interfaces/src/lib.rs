//! Datapath Interfaces Library
//!
//! This crate provides the pieces that sit between clock domains and
//! between the datapath and the outside world: the streaming queue, the
//! synchronizer, the dual-port sample memory, the register bus signals and
//! the register/bus controller.

pub mod apb;
pub mod controller;
pub mod fifo;
pub mod ram;
pub mod sync;

pub use apb::{BusRequest, BusResponse};
pub use controller::{ControlWord, Controller, DatapathStatus, RxControl, TxControl};
pub use fifo::{QueueConfig, QueueFlags, StreamingQueue};
pub use ram::{DualPortRam, PortRequest};
pub use sync::Synchronizer;

use common::ConfigError;
use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bus transaction at {address:#04x} timed out after {cycles} cycles")]
    BusTimeout { address: u32, cycles: u32 },
}
