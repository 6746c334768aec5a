//! Register Map
//!
//! Addresses, access kinds and field layouts of the transceiver register
//! file, kept in one table so the controller, the bus master and the
//! tests all decode words the same way.

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::utils::{sign_extend, to_field};

/// Register addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[repr(u32)]
pub enum Register {
    /// Transmit sample word, pushed into the transmit queue
    TxSample = 0x00,
    TxStatus = 0x04,
    /// Interpolation factor
    TxInterp = 0x08,
    /// Transmit NCO frequency control word
    TxFcw = 0x0c,
    /// Underrun and overrun counters
    TxRuns = 0x10,
    TxThreshold = 0x14,
    TxCorrection = 0x18,
    /// Transmit queue occupancy
    TxAvailable = 0x1c,
    /// Number of sample writes since clear
    TxDebug = 0x20,
    TxGain = 0x24,
    /// FIR tap count, bank selection and coefficient access
    TxFir = 0x28,
    /// Receive sample word, popped from the receive queue
    RxSample = 0x30,
    RxStatus = 0x34,
    /// Decimation factor
    RxDecim = 0x38,
    /// Receive NCO frequency control word
    RxFcw = 0x3c,
    RxRuns = 0x40,
    RxThreshold = 0x44,
    RxCorrection = 0x48,
    RxAvailable = 0x4c,
    /// Receive resampler ratio
    RxResample = 0x50,
    /// Number of sample reads since clear
    RxDebug = 0xa0,
}

/// Who may touch a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn readable(&self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    pub fn writable(&self) -> bool {
        !matches!(self, Access::ReadOnly)
    }
}

/// A contiguous bit field inside a 32-bit register word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub lsb: u8,
    pub width: u8,
    pub signed: bool,
}

impl Field {
    pub const fn unsigned(lsb: u8, width: u8) -> Self {
        Self { lsb, width, signed: false }
    }

    pub const fn signed(lsb: u8, width: u8) -> Self {
        Self { lsb, width, signed: true }
    }

    /// Single-bit flag field
    pub const fn bit(lsb: u8) -> Self {
        Self { lsb, width: 1, signed: false }
    }

    fn mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }

    /// Extract the field from a register word
    pub fn get(&self, word: u32) -> i64 {
        let raw = (word >> self.lsb) & self.mask();
        if self.signed {
            sign_extend(raw as u64, self.width)
        } else {
            raw as i64
        }
    }

    /// Extract a single-bit field as a flag
    pub fn flag(&self, word: u32) -> bool {
        self.get(word) != 0
    }

    /// Place a value into the field of a register word
    pub fn set(&self, word: u32, value: i64) -> u32 {
        let cleared = word & !(self.mask() << self.lsb);
        cleared | (to_field(value, self.width) << self.lsb)
    }
}

// Field layouts
pub const THRESHOLD_NEAR_FULL: Field = Field::unsigned(16, 10);
pub const THRESHOLD_NEAR_EMPTY: Field = Field::unsigned(0, 10);
pub const CORRECTION_Q: Field = Field::signed(16, 10);
pub const CORRECTION_I: Field = Field::signed(0, 10);
pub const GAIN_Q: Field = Field::unsigned(16, 10);
pub const GAIN_I: Field = Field::unsigned(0, 10);
pub const RUNS_HIGH: Field = Field::unsigned(16, 16);
pub const RUNS_LOW: Field = Field::unsigned(0, 16);
pub const RATE: Field = Field::unsigned(0, 11);
pub const FCW: Field = Field::unsigned(0, 25);
pub const FIR_TAPS: Field = Field::unsigned(0, 7);
pub const FIR_BANK0: Field = Field::bit(7);
pub const FIR_BANK1: Field = Field::bit(8);
pub const FIR_ACCESS: Field = Field::bit(16);
pub const FIR_COEFFICIENT: Field = Field::signed(0, 18);
pub const RESAMPLE_INTERPOLATE: Field = Field::unsigned(0, 16);
pub const RESAMPLE_DECIMATE: Field = Field::unsigned(16, 16);

/// Unity gain of the gain corrector
pub const GAIN_UNITY: i64 = 512;

bitflags! {
    /// Status register bits, shared by the transmit and receive status words
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusFlags: u32 {
        /// Write: request a clear. Read: clear still in progress
        const CLEAR = 1 << 0;
        const LOOPEN = 1 << 1;
        const TXEN = 1 << 8;
        const TX_FILTEREN = 1 << 9;
        const DDSEN = 1 << 10;
        const TXSTOP = 1 << 11;
        const TX_AEMPTY = 1 << 12;
        const TX_AFULL = 1 << 13;
        /// Transmit queue is not full
        const TX_SPACE = 1 << 14;
        /// Transmit queue is not empty
        const TX_DATA = 1 << 15;
        const RXEN = 1 << 16;
        const RX_FILTEREN = 1 << 17;
        /// Read: the programmed resample ratio was rejected and the
        /// resampler is bypassed
        const RX_RESAMPLE_ERR = 1 << 18;
        const RXSTOP = 1 << 19;
        const RX_AEMPTY = 1 << 20;
        const RX_AFULL = 1 << 21;
        const RX_SPACE = 1 << 22;
        const RX_DATA = 1 << 23;
        const FIREN = 1 << 24;
    }
}

/// One row of the register map
#[derive(Debug, Clone, Copy)]
pub struct RegisterSpec {
    pub register: Register,
    pub name: &'static str,
    pub access: Access,
    pub fields: &'static [(&'static str, Field)],
}

/// The complete register map
pub const REGISTER_MAP: &[RegisterSpec] = &[
    RegisterSpec { register: Register::TxSample, name: "TX_SAMPLE", access: Access::WriteOnly, fields: &[] },
    RegisterSpec { register: Register::TxStatus, name: "TX_STATUS", access: Access::ReadWrite, fields: &[] },
    RegisterSpec { register: Register::TxInterp, name: "TX_INTERP", access: Access::ReadWrite, fields: &[("rate", RATE)] },
    RegisterSpec { register: Register::TxFcw, name: "TX_FCW", access: Access::ReadWrite, fields: &[("fcw", FCW)] },
    RegisterSpec {
        register: Register::TxRuns,
        name: "TX_RUNS",
        access: Access::ReadOnly,
        fields: &[("underrun", RUNS_HIGH), ("overrun", RUNS_LOW)],
    },
    RegisterSpec {
        register: Register::TxThreshold,
        name: "TX_THRESHOLD",
        access: Access::ReadWrite,
        fields: &[("near_full", THRESHOLD_NEAR_FULL), ("near_empty", THRESHOLD_NEAR_EMPTY)],
    },
    RegisterSpec {
        register: Register::TxCorrection,
        name: "TX_CORRECTION",
        access: Access::ReadWrite,
        fields: &[("q", CORRECTION_Q), ("i", CORRECTION_I)],
    },
    RegisterSpec { register: Register::TxAvailable, name: "TX_AVAILABLE", access: Access::ReadOnly, fields: &[] },
    RegisterSpec { register: Register::TxDebug, name: "TX_DEBUG", access: Access::ReadOnly, fields: &[] },
    RegisterSpec {
        register: Register::TxGain,
        name: "TX_GAIN",
        access: Access::ReadWrite,
        fields: &[("q", GAIN_Q), ("i", GAIN_I)],
    },
    RegisterSpec {
        register: Register::TxFir,
        name: "TX_FIR",
        access: Access::ReadWrite,
        fields: &[("access", FIR_ACCESS), ("bank1", FIR_BANK1), ("bank0", FIR_BANK0), ("taps", FIR_TAPS)],
    },
    RegisterSpec { register: Register::RxSample, name: "RX_SAMPLE", access: Access::ReadOnly, fields: &[] },
    RegisterSpec { register: Register::RxStatus, name: "RX_STATUS", access: Access::ReadWrite, fields: &[] },
    RegisterSpec { register: Register::RxDecim, name: "RX_DECIM", access: Access::ReadWrite, fields: &[("rate", RATE)] },
    RegisterSpec { register: Register::RxFcw, name: "RX_FCW", access: Access::ReadWrite, fields: &[("fcw", FCW)] },
    RegisterSpec {
        register: Register::RxRuns,
        name: "RX_RUNS",
        access: Access::ReadOnly,
        fields: &[("overrun", RUNS_HIGH), ("underrun", RUNS_LOW)],
    },
    RegisterSpec {
        register: Register::RxThreshold,
        name: "RX_THRESHOLD",
        access: Access::ReadWrite,
        fields: &[("near_full", THRESHOLD_NEAR_FULL), ("near_empty", THRESHOLD_NEAR_EMPTY)],
    },
    RegisterSpec {
        register: Register::RxCorrection,
        name: "RX_CORRECTION",
        access: Access::ReadWrite,
        fields: &[("q", CORRECTION_Q), ("i", CORRECTION_I)],
    },
    RegisterSpec { register: Register::RxAvailable, name: "RX_AVAILABLE", access: Access::ReadOnly, fields: &[] },
    RegisterSpec {
        register: Register::RxResample,
        name: "RX_RESAMPLE",
        access: Access::ReadWrite,
        fields: &[("decimate", RESAMPLE_DECIMATE), ("interpolate", RESAMPLE_INTERPOLATE)],
    },
    RegisterSpec { register: Register::RxDebug, name: "RX_DEBUG", access: Access::ReadOnly, fields: &[] },
];

impl Register {
    /// Decode a bus address; unaligned or unmapped addresses give `None`
    pub fn decode(address: u32) -> Option<Self> {
        Self::from_u32(address)
    }

    pub fn address(&self) -> u32 {
        *self as u32
    }

    /// Row of the register map describing this register
    pub fn spec(&self) -> &'static RegisterSpec {
        REGISTER_MAP
            .iter()
            .find(|spec| spec.register == *self)
            .unwrap_or(&REGISTER_MAP[0])
    }

    pub fn access(&self) -> Access {
        self.spec().access
    }

    pub fn name(&self) -> &'static str {
        self.spec().name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_covers_every_register() {
        for spec in REGISTER_MAP {
            assert_eq!(spec.register.spec().name, spec.name);
            assert_eq!(Register::decode(spec.register.address()), Some(spec.register));
        }
        assert_eq!(REGISTER_MAP.len(), 21);
    }

    #[test]
    fn test_decode_rejects_unmapped() {
        assert_eq!(Register::decode(0x02), None);
        assert_eq!(Register::decode(0x2c), None);
        assert_eq!(Register::decode(0xfc), None);
        assert_eq!(Register::decode(0x34), Some(Register::RxStatus));
    }

    #[test]
    fn test_field_round_trip_signed() {
        let word = CORRECTION_Q.set(CORRECTION_I.set(0, -3), 100);
        assert_eq!(CORRECTION_I.get(word), -3);
        assert_eq!(CORRECTION_Q.get(word), 100);
        assert_eq!(word & 0x3ff, 0x3fd);
    }

    #[test]
    fn test_fir_register_layout() {
        let word = FIR_ACCESS.set(FIR_BANK1.set(FIR_TAPS.set(0, 4), 1), 1);
        assert_eq!(word, (1 << 16) | (1 << 8) | 4);
        assert!(FIR_ACCESS.flag(word));
        assert!(!FIR_BANK0.flag(word));
    }

    #[test]
    fn test_status_bits() {
        assert_eq!(StatusFlags::TXEN.bits(), 0x100);
        assert_eq!(StatusFlags::RXSTOP.bits(), 0x80000);
        assert_eq!(StatusFlags::FIREN.bits(), 0x0100_0000);
        assert!(Register::TxSample.access().writable());
        assert!(!Register::TxSample.access().readable());
    }
}
