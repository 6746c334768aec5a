//! Dual-Port Sample Memory
//!
//! Model of a synchronous dual-port RAM: each port has its own clock, reads
//! are registered (data appears one edge after the address) and writes land
//! on the edge they are presented. Only one port may be writable, so two
//! ports can never write the same address on the same edge.

use tracing::{debug, warn};

use common::{ConfigError, SampleFormat};

use crate::InterfaceError;

/// Static configuration of one port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    /// Data width seen by this port
    pub width: u8,
    /// Whether this port may write
    pub writable: bool,
}

/// Memory configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamConfig {
    /// Number of words
    pub depth: usize,
    pub port_a: PortConfig,
    pub port_b: PortConfig,
}

/// One edge's worth of port signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortRequest {
    pub enable: bool,
    pub write: bool,
    pub address: usize,
    pub data: i64,
}

impl PortRequest {
    pub fn read(address: usize) -> Self {
        Self { enable: true, write: false, address, data: 0 }
    }

    pub fn write(address: usize, data: i64) -> Self {
        Self { enable: true, write: true, address, data }
    }
}

#[derive(Debug, Clone)]
struct Port {
    config: PortConfig,
    dout: i64,
}

/// Synchronous dual-port memory holding signed words
#[derive(Debug, Clone)]
pub struct DualPortRam {
    words: Vec<i64>,
    format: SampleFormat,
    port_a: Port,
    port_b: Port,
}

impl DualPortRam {
    /// Create a zeroed memory
    pub fn new(config: RamConfig) -> Result<Self, InterfaceError> {
        if config.port_a.width != config.port_b.width {
            return Err(ConfigError::PortWidthMismatch {
                port_a: config.port_a.width,
                port_b: config.port_b.width,
            }
            .into());
        }
        if config.port_a.writable && config.port_b.writable {
            return Err(ConfigError::InvalidConfig("only one memory port may be writable".to_string()).into());
        }
        if config.depth == 0 {
            return Err(ConfigError::InvalidConfig("memory depth must be at least 1".to_string()).into());
        }
        let format = SampleFormat::signed(config.port_a.width)?;

        debug!("Dual-port RAM: {} x {} bits", config.depth, config.port_a.width);

        Ok(Self {
            words: vec![0; config.depth],
            format,
            port_a: Port { config: config.port_a, dout: 0 },
            port_b: Port { config: config.port_b, dout: 0 },
        })
    }

    /// Convenience: one writable port A, read-only port B
    pub fn single_writer(depth: usize, width: u8) -> Result<Self, InterfaceError> {
        Self::new(RamConfig {
            depth,
            port_a: PortConfig { width, writable: true },
            port_b: PortConfig { width, writable: false },
        })
    }

    fn access(words: &mut [i64], format: SampleFormat, port: &mut Port, request: PortRequest, name: &str) {
        if !request.enable {
            return;
        }
        let address = request.address % words.len();
        if request.write {
            if port.config.writable {
                words[address] = format.wrap(request.data);
            } else {
                warn!("Write on read-only port {} to {:#x} ignored", name, address);
            }
        } else {
            port.dout = words[address];
        }
    }

    /// Clock port A
    pub fn tick_a(&mut self, request: PortRequest) {
        Self::access(&mut self.words, self.format, &mut self.port_a, request, "A");
    }

    /// Clock port B
    pub fn tick_b(&mut self, request: PortRequest) {
        Self::access(&mut self.words, self.format, &mut self.port_b, request, "B");
    }

    /// Registered read data of port A
    pub fn dout_a(&self) -> i64 {
        self.port_a.dout
    }

    /// Registered read data of port B
    pub fn dout_b(&self) -> i64 {
        self.port_b.dout
    }

    pub fn depth(&self) -> usize {
        self.words.len()
    }

    /// Zero all words and both read registers
    pub fn clear(&mut self) {
        self.words.fill(0);
        self.port_a.dout = 0;
        self.port_b.dout = 0;
    }
}
