//! Register/Bus Controller
//!
//! Protocol state machine on the register-bus clock. It owns the
//! configuration registers and the synchronizers that bring datapath status
//! back into the bus domain, pushes transmit words into the transmit queue
//! and pops received words from the receive queue.
//!
//! Each bus edge runs, in order: status synchronizers, clear and
//! end-of-burst handling, then the `Idle -> Access -> Done` protocol step.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use common::registers::{
    Register, StatusFlags, CORRECTION_I, CORRECTION_Q, FCW, FIR_ACCESS, FIR_BANK0, FIR_BANK1,
    FIR_COEFFICIENT, FIR_TAPS, GAIN_I, GAIN_Q, GAIN_UNITY, RATE, RESAMPLE_DECIMATE, RESAMPLE_INTERPOLATE,
    RUNS_HIGH, RUNS_LOW, THRESHOLD_NEAR_EMPTY, THRESHOLD_NEAR_FULL,
};

use crate::apb::{BusRequest, BusResponse};
use crate::fifo::{StreamingQueue, MAX_THRESHOLD};
use crate::sync::Synchronizer;

/// Number of address bits selecting a tap inside a FIR bank
pub const FIR_TAP_ADDRESS_BITS: u32 = 7;

/// Transmit configuration registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxControl {
    pub enable: bool,
    pub stop: bool,
    pub filter_enable: bool,
    pub dds_enable: bool,
    pub fir_enable: bool,
    pub interp: u16,
    pub fcw: u32,
    pub correct_i: i16,
    pub correct_q: i16,
    pub gain_i: u16,
    pub gain_q: u16,
    pub fir_taps: u8,
    /// Bank selection `{bank1, bank0}`
    pub fir_bank: u8,
}

impl Default for TxControl {
    fn default() -> Self {
        Self {
            enable: false,
            stop: false,
            filter_enable: false,
            dds_enable: false,
            fir_enable: false,
            interp: 1,
            fcw: 0,
            correct_i: 0,
            correct_q: 0,
            gain_i: GAIN_UNITY as u16,
            gain_q: GAIN_UNITY as u16,
            fir_taps: 0,
            fir_bank: 0,
        }
    }
}

/// Receive configuration registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxControl {
    pub enable: bool,
    pub stop: bool,
    pub filter_enable: bool,
    pub decim: u16,
    pub fcw: u32,
    pub correct_i: i16,
    pub correct_q: i16,
    pub resample_interpolate: u16,
    pub resample_decimate: u16,
}

impl Default for RxControl {
    fn default() -> Self {
        Self {
            enable: false,
            stop: false,
            filter_enable: false,
            decim: 1,
            fcw: 0,
            correct_i: 0,
            correct_q: 0,
            resample_interpolate: 0,
            resample_decimate: 0,
        }
    }
}

/// Everything the sample domain needs from the register file
///
/// Carried across the clock boundary as one word; every field is
/// quasi-static while samples flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControlWord {
    pub tx: TxControl,
    pub rx: RxControl,
    pub loopback: bool,
    /// Clear requested and not yet acknowledged
    pub clear: bool,
}

/// Sample-domain signals observed by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatapathStatus {
    /// Low while the datapath is being cleared
    pub clear_done: bool,
    /// Transmit chain finished its burst after a stop
    pub tx_drained: bool,
    /// Receive chain finished its burst
    pub rx_drained: bool,
    /// Programmed resample ratio could not be built
    pub rx_resample_rejected: bool,
    pub tx_underruns: u16,
    pub rx_overruns: u16,
}

impl Default for DatapathStatus {
    fn default() -> Self {
        Self {
            clear_done: true,
            tx_drained: false,
            rx_drained: false,
            rx_resample_rejected: false,
            tx_underruns: 0,
            rx_overruns: 0,
        }
    }
}

/// A coefficient load destined for the FIR coefficient memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoefficientWrite {
    pub address: usize,
    pub value: i64,
}

/// Controller outputs for one bus edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerOutput {
    pub response: BusResponse,
    pub coefficient: Option<CoefficientWrite>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusState {
    Idle,
    Access,
    Done,
}

/// Register/bus controller
#[derive(Debug, Clone)]
pub struct Controller {
    state: BusState,
    latched: BusRequest,
    read_data: u32,
    control: ControlWord,
    status_sync: Synchronizer<DatapathStatus>,
    status: DatapathStatus,
    prev_tx_drained: bool,
    prev_rx_drained: bool,
    write_count: u32,
    read_count: u32,
    fir_access: bool,
    fir_load_k: usize,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Self {
            state: BusState::Idle,
            latched: BusRequest::IDLE,
            read_data: 0,
            control: ControlWord::default(),
            status_sync: Synchronizer::new(),
            status: DatapathStatus::default(),
            prev_tx_drained: false,
            prev_rx_drained: false,
            write_count: 0,
            read_count: 0,
            fir_access: false,
            fir_load_k: 0,
        }
    }

    /// Bus-side register values
    pub fn control(&self) -> ControlWord {
        self.control
    }

    /// Datapath status as last seen through the synchronizers
    pub fn status(&self) -> DatapathStatus {
        self.status
    }

    /// Whether the next FIR writes load coefficients
    pub fn loading_coefficients(&self) -> bool {
        self.fir_access
    }

    /// Advance one bus clock edge
    pub fn step(
        &mut self,
        request: &BusRequest,
        datapath: DatapathStatus,
        tx_queue: &mut StreamingQueue,
        rx_queue: &mut StreamingQueue,
    ) -> ControllerOutput {
        self.status = self.status_sync.tick(datapath);
        let mut output = ControllerOutput::default();

        if !self.status.clear_done {
            self.apply_clear();
        }

        if self.status.tx_drained && !self.prev_tx_drained {
            debug!("Transmit burst drained, disabling transmit");
            self.control.tx.enable = false;
            self.control.tx.stop = false;
        }
        if self.status.rx_drained && !self.prev_rx_drained {
            debug!("Receive burst drained, disabling receive");
            self.control.rx.enable = false;
            self.control.rx.stop = false;
        }
        self.prev_tx_drained = self.status.tx_drained;
        self.prev_rx_drained = self.status.rx_drained;

        match self.state {
            BusState::Idle => {
                if request.active() {
                    self.latched = *request;
                    self.state = BusState::Access;
                }
            }
            BusState::Access => {
                let request = self.latched;
                let register = Register::decode(request.address);
                if request.write {
                    trace!("Bus write {:#04x} <- {:08x}", request.address, request.write_data);
                    output.coefficient = self.write_register(register, request.write_data, tx_queue, rx_queue);
                    self.read_data = 0;
                } else {
                    self.read_data = self.read_register(register, tx_queue, rx_queue);
                    trace!("Bus read {:#04x} -> {:08x}", request.address, self.read_data);
                }
                self.state = BusState::Done;
            }
            BusState::Done => {
                output.response = BusResponse { ready: true, read_data: self.read_data };
                self.state = BusState::Idle;
            }
        }

        output
    }

    fn apply_clear(&mut self) {
        if self.control.clear {
            info!("Datapath clear acknowledged");
        }
        self.control.clear = false;
        self.control.loopback = false;
        self.control.tx.enable = false;
        self.control.tx.stop = false;
        self.control.tx.filter_enable = false;
        self.control.tx.dds_enable = false;
        self.control.tx.fir_enable = false;
        self.control.rx.enable = false;
        self.control.rx.stop = false;
        self.control.rx.filter_enable = false;
        self.write_count = 0;
        self.read_count = 0;
        self.fir_access = false;
    }

    fn write_register(
        &mut self,
        register: Option<Register>,
        data: u32,
        tx_queue: &mut StreamingQueue,
        rx_queue: &mut StreamingQueue,
    ) -> Option<CoefficientWrite> {
        let Some(register) = register else {
            debug!("Write to undecoded address ignored");
            return None;
        };
        if !register.access().writable() {
            debug!("Write to read-only register {} ignored", register.name());
            return None;
        }

        if self.fir_access && register == Register::TxFir {
            return Some(self.load_coefficient(data));
        }

        let flags = StatusFlags::from_bits_truncate(data);
        let tx = &mut self.control.tx;
        let rx = &mut self.control.rx;

        match register {
            Register::TxSample => {
                self.write_count = self.write_count.wrapping_add(1);
                tx_queue.push(data);
            }
            Register::TxStatus => {
                if flags.contains(StatusFlags::CLEAR) {
                    info!("Datapath clear requested");
                    self.control.clear = true;
                } else if flags.contains(StatusFlags::TXSTOP) {
                    debug!("Transmit stop requested");
                    tx.stop = true;
                } else {
                    tx.enable = flags.contains(StatusFlags::TXEN);
                    tx.filter_enable = flags.contains(StatusFlags::TX_FILTEREN);
                    tx.dds_enable = flags.contains(StatusFlags::DDSEN);
                    tx.fir_enable = flags.contains(StatusFlags::FIREN);
                    self.control.loopback = flags.contains(StatusFlags::LOOPEN);
                    debug!("Transmit mode {:?}", *tx);
                }
            }
            Register::TxInterp => tx.interp = RATE.get(data) as u16,
            Register::TxFcw => tx.fcw = FCW.get(data) as u32,
            Register::TxThreshold => tx_queue.set_thresholds(
                THRESHOLD_NEAR_FULL.get(data) as usize,
                THRESHOLD_NEAR_EMPTY.get(data) as usize,
            ),
            Register::TxCorrection => {
                tx.correct_i = CORRECTION_I.get(data) as i16;
                tx.correct_q = CORRECTION_Q.get(data) as i16;
            }
            Register::TxGain => {
                tx.gain_i = GAIN_I.get(data) as u16;
                tx.gain_q = GAIN_Q.get(data) as u16;
            }
            Register::TxFir => {
                tx.fir_taps = FIR_TAPS.get(data) as u8;
                tx.fir_bank = ((FIR_BANK1.get(data) << 1) | FIR_BANK0.get(data)) as u8;
                self.fir_access = FIR_ACCESS.flag(data) && tx.fir_taps > 0;
                self.fir_load_k = 0;
                debug!("FIR taps={} bank={} loading={}", tx.fir_taps, tx.fir_bank, self.fir_access);
            }
            Register::RxStatus => {
                if flags.contains(StatusFlags::CLEAR) {
                    info!("Datapath clear requested");
                    self.control.clear = true;
                } else if flags.contains(StatusFlags::RXSTOP) {
                    debug!("Receive stop requested");
                    rx.stop = true;
                } else {
                    rx.enable = flags.contains(StatusFlags::RXEN);
                    rx.filter_enable = flags.contains(StatusFlags::RX_FILTEREN);
                    self.control.loopback = flags.contains(StatusFlags::LOOPEN);
                    debug!("Receive mode {:?}", *rx);
                }
            }
            Register::RxDecim => rx.decim = RATE.get(data) as u16,
            Register::RxFcw => rx.fcw = FCW.get(data) as u32,
            Register::RxThreshold => rx_queue.set_thresholds(
                THRESHOLD_NEAR_FULL.get(data) as usize,
                THRESHOLD_NEAR_EMPTY.get(data) as usize,
            ),
            Register::RxCorrection => {
                rx.correct_i = CORRECTION_I.get(data) as i16;
                rx.correct_q = CORRECTION_Q.get(data) as i16;
            }
            Register::RxResample => {
                rx.resample_interpolate = RESAMPLE_INTERPOLATE.get(data) as u16;
                rx.resample_decimate = RESAMPLE_DECIMATE.get(data) as u16;
            }
            Register::TxRuns
            | Register::TxAvailable
            | Register::TxDebug
            | Register::RxSample
            | Register::RxRuns
            | Register::RxAvailable
            | Register::RxDebug => {}
        }
        None
    }

    fn load_coefficient(&mut self, data: u32) -> CoefficientWrite {
        let bank = self.control.tx.fir_bank as usize;
        let write = CoefficientWrite {
            address: (bank << FIR_TAP_ADDRESS_BITS) | self.fir_load_k,
            value: FIR_COEFFICIENT.get(data),
        };
        trace!("FIR coefficient {} = {}", self.fir_load_k, write.value);
        self.fir_load_k += 1;
        if self.fir_load_k >= self.control.tx.fir_taps as usize {
            debug!("Loaded {} FIR coefficients into bank {}", self.fir_load_k, bank);
            self.fir_access = false;
        }
        write
    }

    fn status_word(&self, tx_queue: &StreamingQueue, rx_queue: &StreamingQueue, register: Register) -> u32 {
        let mut flags = StatusFlags::empty();
        flags.set(StatusFlags::CLEAR, self.control.clear || !self.status.clear_done);
        flags.set(StatusFlags::LOOPEN, self.control.loopback);
        flags.set(StatusFlags::FIREN, self.control.tx.fir_enable);

        if register == Register::TxStatus {
            let tx = &self.control.tx;
            let q = tx_queue.flags();
            flags.set(StatusFlags::TXEN, tx.enable);
            flags.set(StatusFlags::TX_FILTEREN, tx.filter_enable);
            flags.set(StatusFlags::DDSEN, tx.dds_enable);
            flags.set(StatusFlags::TXSTOP, tx.stop);
            flags.set(StatusFlags::TX_AEMPTY, q.near_empty);
            flags.set(StatusFlags::TX_AFULL, q.near_full);
            flags.set(StatusFlags::TX_SPACE, !q.full);
            flags.set(StatusFlags::TX_DATA, !q.empty);
        } else {
            let rx = &self.control.rx;
            let q = rx_queue.flags();
            flags.set(StatusFlags::RXEN, rx.enable);
            flags.set(StatusFlags::RX_FILTEREN, rx.filter_enable);
            flags.set(StatusFlags::RXSTOP, rx.stop);
            flags.set(StatusFlags::RX_RESAMPLE_ERR, self.status.rx_resample_rejected);
            flags.set(StatusFlags::RX_AEMPTY, q.near_empty);
            flags.set(StatusFlags::RX_AFULL, q.near_full);
            flags.set(StatusFlags::RX_SPACE, !q.full);
            flags.set(StatusFlags::RX_DATA, !q.empty);
        }
        flags.bits()
    }

    fn read_register(
        &mut self,
        register: Option<Register>,
        tx_queue: &mut StreamingQueue,
        rx_queue: &mut StreamingQueue,
    ) -> u32 {
        let Some(register) = register else {
            debug!("Read from undecoded address returns 0");
            return 0;
        };
        let tx = &self.control.tx;
        let rx = &self.control.rx;

        match register {
            Register::TxSample => 0,
            Register::TxStatus | Register::RxStatus => self.status_word(tx_queue, rx_queue, register),
            Register::TxInterp => tx.interp as u32,
            Register::TxFcw => tx.fcw,
            Register::TxRuns => {
                RUNS_LOW.set(RUNS_HIGH.set(0, self.status.tx_underruns as i64), tx_queue.overruns() as i64)
            }
            Register::TxThreshold => threshold_word(tx_queue),
            Register::TxCorrection => {
                CORRECTION_Q.set(CORRECTION_I.set(0, tx.correct_i as i64), tx.correct_q as i64)
            }
            Register::TxAvailable => tx_queue.len() as u32,
            Register::TxDebug => self.write_count,
            Register::TxGain => GAIN_Q.set(GAIN_I.set(0, tx.gain_i as i64), tx.gain_q as i64),
            Register::TxFir => {
                let word = FIR_TAPS.set(0, tx.fir_taps as i64);
                let word = FIR_BANK0.set(word, (tx.fir_bank & 1) as i64);
                let word = FIR_BANK1.set(word, ((tx.fir_bank >> 1) & 1) as i64);
                FIR_ACCESS.set(word, self.fir_access as i64)
            }
            Register::RxSample => {
                self.read_count = self.read_count.wrapping_add(1);
                rx_queue.pop().unwrap_or(0)
            }
            Register::RxDecim => rx.decim as u32,
            Register::RxFcw => rx.fcw,
            Register::RxRuns => {
                RUNS_LOW.set(RUNS_HIGH.set(0, self.status.rx_overruns as i64), rx_queue.underruns() as i64)
            }
            Register::RxThreshold => threshold_word(rx_queue),
            Register::RxCorrection => {
                CORRECTION_Q.set(CORRECTION_I.set(0, rx.correct_i as i64), rx.correct_q as i64)
            }
            Register::RxAvailable => rx_queue.len() as u32,
            Register::RxResample => RESAMPLE_DECIMATE.set(
                RESAMPLE_INTERPOLATE.set(0, rx.resample_interpolate as i64),
                rx.resample_decimate as i64,
            ),
            Register::RxDebug => self.read_count,
        }
    }
}

fn threshold_word(queue: &StreamingQueue) -> u32 {
    let (near_full, near_empty) = queue.thresholds();
    let near_full = near_full.min(MAX_THRESHOLD) as i64;
    let near_empty = near_empty.min(MAX_THRESHOLD) as i64;
    THRESHOLD_NEAR_FULL.set(THRESHOLD_NEAR_EMPTY.set(0, near_empty), near_full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::QueueConfig;

    struct Bench {
        controller: Controller,
        tx: StreamingQueue,
        rx: StreamingQueue,
        status: DatapathStatus,
        coefficients: Vec<CoefficientWrite>,
    }

    impl Bench {
        fn new() -> Self {
            Self {
                controller: Controller::new(),
                tx: StreamingQueue::new(QueueConfig::with_depth(4)).unwrap(),
                rx: StreamingQueue::new(QueueConfig::with_depth(4)).unwrap(),
                status: DatapathStatus::default(),
                coefficients: Vec::new(),
            }
        }

        fn tick(&mut self, request: &BusRequest) -> ControllerOutput {
            let out = self.controller.step(request, self.status, &mut self.tx, &mut self.rx);
            if let Some(c) = out.coefficient {
                self.coefficients.push(c);
            }
            out
        }

        fn transact(&mut self, request: BusRequest) -> u32 {
            for cycle in 0..8 {
                let out = self.tick(&request);
                if out.response.ready {
                    assert_eq!(cycle, 2, "ready expected on the third edge");
                    self.tick(&BusRequest::IDLE);
                    return out.response.read_data;
                }
            }
            panic!("bus transaction never completed");
        }

        fn write(&mut self, register: Register, value: u32) {
            self.transact(BusRequest::write(register, value));
        }

        fn read(&mut self, register: Register) -> u32 {
            self.transact(BusRequest::read(register))
        }
    }

    #[test]
    fn test_ready_asserted_for_one_cycle() {
        let mut bench = Bench::new();
        let request = BusRequest::read(Register::TxInterp);
        let ready: Vec<bool> = (0..3).map(|_| bench.tick(&request).response.ready).collect();
        assert_eq!(ready, vec![false, false, true]);
        assert!(!bench.tick(&BusRequest::IDLE).response.ready);
    }

    #[test]
    fn test_register_read_back() {
        let mut bench = Bench::new();
        bench.write(Register::TxInterp, 40);
        bench.write(Register::TxFcw, 0x01ab_cdef);
        bench.write(Register::TxCorrection, CORRECTION_I.set(CORRECTION_Q.set(0, 5), -7));
        assert_eq!(bench.read(Register::TxInterp), 40);
        assert_eq!(bench.read(Register::TxFcw), 0x01ab_cdef);
        let corr = bench.read(Register::TxCorrection);
        assert_eq!(CORRECTION_I.get(corr), -7);
        assert_eq!(CORRECTION_Q.get(corr), 5);
        assert_eq!(bench.controller.control().tx.correct_i, -7);
    }

    #[test]
    fn test_undecoded_address() {
        let mut bench = Bench::new();
        assert_eq!(bench.transact(BusRequest::raw(0x2c, false, 0)), 0);
        assert_eq!(bench.transact(BusRequest::raw(0x03, false, 0)), 0);
        bench.transact(BusRequest::raw(0x2c, true, 0xffff_ffff));
        assert_eq!(bench.controller.control(), ControlWord::default());
    }

    #[test]
    fn test_sample_writes_fill_queue_and_count_overruns() {
        let mut bench = Bench::new();
        for w in 0..6 {
            bench.write(Register::TxSample, w);
        }
        assert_eq!(bench.tx.len(), 4);
        assert_eq!(bench.read(Register::TxAvailable), 4);
        assert_eq!(bench.read(Register::TxDebug), 6);
        let runs = bench.read(Register::TxRuns);
        assert_eq!(RUNS_LOW.get(runs), 2);
        let status = StatusFlags::from_bits_truncate(bench.read(Register::TxStatus));
        assert!(status.contains(StatusFlags::TX_DATA));
        assert!(!status.contains(StatusFlags::TX_SPACE));
    }

    #[test]
    fn test_rx_sample_reads_pop_and_count_underruns() {
        let mut bench = Bench::new();
        bench.rx.push(0x1234_5678);
        assert_eq!(bench.read(Register::RxSample), 0x1234_5678);
        assert_eq!(bench.read(Register::RxSample), 0);
        let runs = bench.read(Register::RxRuns);
        assert_eq!(RUNS_LOW.get(runs), 1);
        assert_eq!(bench.read(Register::RxDebug), 2);
    }

    #[test]
    fn test_status_write_precedence() {
        let mut bench = Bench::new();
        let modes = StatusFlags::TXEN | StatusFlags::DDSEN | StatusFlags::LOOPEN;
        bench.write(Register::TxStatus, modes.bits());
        let tx = bench.controller.control().tx;
        assert!(tx.enable && tx.dds_enable && !tx.filter_enable);
        assert!(bench.controller.control().loopback);

        bench.write(Register::TxStatus, (StatusFlags::TXSTOP | StatusFlags::TX_FILTEREN).bits());
        let tx = bench.controller.control().tx;
        assert!(tx.stop && tx.enable && !tx.filter_enable);

        bench.write(Register::TxStatus, (StatusFlags::CLEAR | StatusFlags::TXSTOP).bits());
        assert!(bench.controller.control().clear);
        let status = StatusFlags::from_bits_truncate(bench.read(Register::TxStatus));
        assert!(status.contains(StatusFlags::CLEAR));
    }

    #[test]
    fn test_clear_acknowledge_zeroes_modes() {
        let mut bench = Bench::new();
        bench.write(Register::RxStatus, (StatusFlags::RXEN | StatusFlags::RX_FILTEREN).bits());
        bench.write(Register::TxInterp, 8);
        bench.write(Register::TxStatus, StatusFlags::CLEAR.bits());
        bench.status.clear_done = false;
        for _ in 0..3 {
            bench.tick(&BusRequest::IDLE);
        }
        let control = bench.controller.control();
        assert!(!control.clear);
        assert!(!control.rx.enable && !control.rx.filter_enable);
        assert_eq!(control.tx.interp, 8);
        assert_eq!(bench.read(Register::TxDebug), 0);
    }

    #[test]
    fn test_resample_rejection_reported_in_rx_status() {
        let mut bench = Bench::new();
        bench.status.rx_resample_rejected = true;
        bench.tick(&BusRequest::IDLE);
        bench.tick(&BusRequest::IDLE);
        let rx = StatusFlags::from_bits_truncate(bench.read(Register::RxStatus));
        assert!(rx.contains(StatusFlags::RX_RESAMPLE_ERR));
        let tx = StatusFlags::from_bits_truncate(bench.read(Register::TxStatus));
        assert!(!tx.contains(StatusFlags::RX_RESAMPLE_ERR));
    }

    #[test]
    fn test_drain_disables_on_rising_edge() {
        let mut bench = Bench::new();
        bench.write(Register::TxStatus, StatusFlags::TXEN.bits());
        bench.write(Register::TxStatus, StatusFlags::TXSTOP.bits());
        bench.status.tx_drained = true;
        for _ in 0..3 {
            bench.tick(&BusRequest::IDLE);
        }
        let tx = bench.controller.control().tx;
        assert!(!tx.enable && !tx.stop);

        // re-enabling while the stale drained level is still visible sticks
        bench.write(Register::TxStatus, StatusFlags::TXEN.bits());
        assert!(bench.controller.control().tx.enable);
    }

    #[test]
    fn test_synchronized_status_latency() {
        let mut bench = Bench::new();
        bench.status.tx_underruns = 3;
        bench.tick(&BusRequest::IDLE);
        assert_eq!(bench.controller.status().tx_underruns, 0);
        bench.tick(&BusRequest::IDLE);
        assert_eq!(bench.controller.status().tx_underruns, 3);
        assert_eq!(RUNS_HIGH.get(bench.read(Register::TxRuns)), 3);
    }

    #[test]
    fn test_fir_coefficient_loading() {
        let mut bench = Bench::new();
        let fir = FIR_ACCESS.set(FIR_BANK1.set(FIR_TAPS.set(0, 3), 1), 1);
        bench.write(Register::TxFir, fir);
        assert!(bench.controller.loading_coefficients());
        for value in [5i64, -6, 7] {
            bench.write(Register::TxFir, FIR_COEFFICIENT.set(0, value));
        }
        assert!(!bench.controller.loading_coefficients());
        let bank = 2usize << FIR_TAP_ADDRESS_BITS;
        assert_eq!(
            bench.coefficients,
            vec![
                CoefficientWrite { address: bank, value: 5 },
                CoefficientWrite { address: bank + 1, value: -6 },
                CoefficientWrite { address: bank + 2, value: 7 },
            ]
        );
        let word = bench.read(Register::TxFir);
        assert_eq!(FIR_TAPS.get(word), 3);
        assert!(FIR_BANK1.flag(word) && !FIR_ACCESS.flag(word));
    }

    #[test]
    fn test_thresholds_reach_queue() {
        let mut bench = Bench::new();
        let word = THRESHOLD_NEAR_FULL.set(THRESHOLD_NEAR_EMPTY.set(0, 1), 3);
        bench.write(Register::TxThreshold, word);
        assert_eq!(bench.tx.thresholds(), (3, 1));
        assert_eq!(bench.read(Register::TxThreshold), word);
    }
}
