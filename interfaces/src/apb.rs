//! Register Bus Signals
//!
//! Signals of the synchronous decode-on-select register bus. The master
//! holds a request stable until it sees `ready`, then drops `select`.

use serde::{Deserialize, Serialize};

use common::registers::Register;

/// Signals driven by the bus master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BusRequest {
    pub address: u32,
    pub select: bool,
    pub enable: bool,
    pub write: bool,
    pub write_data: u32,
}

impl BusRequest {
    /// Bus idle
    pub const IDLE: Self = Self { address: 0, select: false, enable: false, write: false, write_data: 0 };

    pub fn write(register: Register, value: u32) -> Self {
        Self {
            address: register.address(),
            select: true,
            enable: true,
            write: true,
            write_data: value,
        }
    }

    pub fn read(register: Register) -> Self {
        Self {
            address: register.address(),
            select: true,
            enable: true,
            write: false,
            write_data: 0,
        }
    }

    /// Request to a raw address, decoded or not
    pub fn raw(address: u32, write: bool, write_data: u32) -> Self {
        Self { address, select: true, enable: true, write, write_data }
    }

    pub fn active(&self) -> bool {
        self.select && self.enable
    }
}

/// Signals driven by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BusResponse {
    /// Asserted for exactly one cycle per transaction
    pub ready: bool,
    pub read_data: u32,
}
