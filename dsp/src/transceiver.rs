//! Transceiver Assembly
//!
//! Ties the register/bus controller (bus clock) to the transmit and receive
//! chains (sample clock). Control words reach the sample domain through a
//! two-stage synchronizer and the controller synchronizes the status it
//! reads back, so each side observes the other two of its own edges late.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::Sample;
use interfaces::{
    BusRequest, BusResponse, ControlWord, Controller, DatapathStatus, QueueConfig, StreamingQueue, Synchronizer,
};

use crate::conditioning::{DacWord, Interleaver};
use crate::ddc::{Ddc, DdcConfig};
use crate::duc::{Duc, DucConfig};
use crate::DspError;

/// Sample ticks the datapath is held in reset by a clear
pub const CLEAR_TICKS: u32 = 16;

/// Full transceiver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransceiverConfig {
    pub tx_queue: QueueConfig,
    pub rx_queue: QueueConfig,
    pub duc: DucConfig,
    pub ddc: DdcConfig,
}

/// Sample-domain clear state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearState {
    /// Clear requested, reset starts next tick
    Clear,
    /// Holding the datapath in reset, ticks remaining
    Clearing(u32),
    /// Reset done, waiting for the bus side to drop its request
    Release,
    Run,
}

/// Holds the datapath in reset for a fixed number of ticks after a clear
///
/// The acknowledge is a level: `done()` stays low until the synchronized
/// request has been withdrawn, so the bus side observes it whatever the
/// ratio of the two clocks.
#[derive(Debug, Clone)]
pub struct ClearSequencer {
    state: ClearState,
    ticks: u32,
}

impl ClearSequencer {
    /// Starts clearing, as after power-up
    pub fn new(ticks: u32) -> Self {
        Self { state: ClearState::Clear, ticks: ticks.max(1) }
    }

    pub fn state(&self) -> ClearState {
        self.state
    }

    /// Clear acknowledged and datapath running
    pub fn done(&self) -> bool {
        self.state == ClearState::Run
    }

    /// Advance one tick; returns whether the datapath runs this tick
    pub fn step(&mut self, request: bool) -> bool {
        self.state = match self.state {
            ClearState::Clear => ClearState::Clearing(self.ticks),
            ClearState::Clearing(n) if n > 1 => ClearState::Clearing(n - 1),
            ClearState::Clearing(_) | ClearState::Release if request => ClearState::Release,
            ClearState::Clearing(_) | ClearState::Release => {
                debug!("Datapath clear complete");
                ClearState::Run
            }
            ClearState::Run if request => ClearState::Clear,
            ClearState::Run => ClearState::Run,
        };
        self.state == ClearState::Run
    }
}

/// Controller, queues and both chains across the two clock domains
#[derive(Debug, Clone)]
pub struct Transceiver {
    controller: Controller,
    tx_queue: StreamingQueue,
    rx_queue: StreamingQueue,
    control_sync: Synchronizer<ControlWord>,
    clear: ClearSequencer,
    duc: Duc,
    ddc: Ddc,
    interleaver: Interleaver,
}

impl Transceiver {
    pub fn new(config: TransceiverConfig) -> Result<Self, DspError> {
        info!(
            "Transceiver: tx queue {} x {}, rx queue {} x {}",
            config.tx_queue.depth, config.tx_queue.width, config.rx_queue.depth, config.rx_queue.width
        );
        Ok(Self {
            controller: Controller::new(),
            tx_queue: StreamingQueue::new(config.tx_queue)?,
            rx_queue: StreamingQueue::new(config.rx_queue)?,
            control_sync: Synchronizer::new(),
            clear: ClearSequencer::new(CLEAR_TICKS),
            duc: Duc::new(config.duc)?,
            ddc: Ddc::new(config.ddc)?,
            interleaver: Interleaver::new(),
        })
    }

    /// Raw datapath status, before it crosses into the bus domain
    fn datapath_status(&self) -> DatapathStatus {
        DatapathStatus {
            clear_done: self.clear.done(),
            tx_drained: self.duc.drained(),
            rx_drained: self.ddc.drained(),
            rx_resample_rejected: self.ddc.resample_rejected(),
            tx_underruns: self.tx_queue.underruns(),
            rx_overruns: self.rx_queue.overruns(),
        }
    }

    /// Advance one bus clock edge
    pub fn tick_bus(&mut self, request: &BusRequest) -> BusResponse {
        let status = self.datapath_status();
        let output = self.controller.step(request, status, &mut self.tx_queue, &mut self.rx_queue);
        if let Some(write) = output.coefficient {
            self.duc.fir_mut().load_coefficient(write.address, write.value);
        }
        output.response
    }

    /// Advance one sample clock edge; returns the two DAC words of the
    /// doubled-rate clock
    pub fn tick_sample(&mut self, adc: Sample) -> [DacWord; 2] {
        let control = self.control_sync.tick(self.controller.control());

        if !self.clear.step(control.clear) {
            self.duc.reset();
            self.ddc.reset();
            self.tx_queue.reset();
            self.rx_queue.reset();
            self.interleaver.reset();
            return [DacWord::default(); 2];
        }

        let tx = self.duc.step(&control.tx, &mut self.tx_queue);
        let rx_input = if control.loopback { tx.loopback } else { adc };
        self.ddc.step(&control.rx, rx_input, &mut self.rx_queue);

        self.interleaver.latch(if control.loopback { Sample::IDLE } else { tx.dac });
        self.interleaver.words()
    }

    /// Control word as currently seen by the sample domain
    pub fn sample_control(&self) -> ControlWord {
        self.control_sync.output()
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn clear_state(&self) -> ClearState {
        self.clear.state()
    }

    pub fn tx_queue(&self) -> &StreamingQueue {
        &self.tx_queue
    }

    pub fn rx_queue(&self) -> &StreamingQueue {
        &self.rx_queue
    }

    pub fn duc(&self) -> &Duc {
        &self.duc
    }

    pub fn ddc(&self) -> &Ddc {
        &self.ddc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::registers::{Register, StatusFlags};
    use common::pack_sample_word;

    fn transceiver() -> Transceiver {
        Transceiver::new(TransceiverConfig::default()).unwrap()
    }

    /// One full bus transaction, sample clock ticking in lockstep
    fn transact(t: &mut Transceiver, request: BusRequest) -> u32 {
        for _ in 0..8 {
            let response = t.tick_bus(&request);
            t.tick_sample(Sample::IDLE);
            if response.ready {
                t.tick_bus(&BusRequest::IDLE);
                t.tick_sample(Sample::IDLE);
                return response.read_data;
            }
        }
        panic!("no ready for {:?}", request);
    }

    fn settle(t: &mut Transceiver, ticks: usize) {
        for _ in 0..ticks {
            t.tick_bus(&BusRequest::IDLE);
            t.tick_sample(Sample::IDLE);
        }
    }

    #[test]
    fn test_clear_sequencer() {
        let mut seq = ClearSequencer::new(3);
        let running: Vec<bool> = (0..6).map(|_| seq.step(false)).collect();
        assert_eq!(running, vec![false, false, false, true, true, true]);
        assert!(!seq.step(true));
        assert_eq!(seq.state(), ClearState::Clear);
        // a request still held after the reset keeps the acknowledge low
        let running: Vec<bool> = (0..8).map(|_| seq.step(true)).collect();
        assert_eq!(running, vec![false; 8]);
        assert_eq!(seq.state(), ClearState::Release);
        assert!(!seq.done());
        assert!(seq.step(false));
        assert!(seq.done());
    }

    #[test]
    fn test_power_up_clear() {
        let mut t = transceiver();
        assert_eq!(t.clear_state(), ClearState::Clear);
        settle(&mut t, CLEAR_TICKS as usize + 1);
        assert_eq!(t.clear_state(), ClearState::Run);
        settle(&mut t, 2);
        let status = transact(&mut t, BusRequest::read(Register::TxStatus));
        assert!(!StatusFlags::from_bits_truncate(status).contains(StatusFlags::CLEAR));
    }

    #[test]
    fn test_loopback_round_trip() {
        let mut t = transceiver();
        settle(&mut t, 20);
        for n in 0..4i64 {
            transact(&mut t, BusRequest::write(Register::TxSample, pack_sample_word(n * 640, -n * 640)));
        }
        transact(&mut t, BusRequest::write(Register::TxInterp, 16));
        transact(&mut t, BusRequest::write(Register::RxDecim, 16));
        let mode = StatusFlags::TXEN | StatusFlags::LOOPEN;
        transact(&mut t, BusRequest::write(Register::TxStatus, mode.bits()));
        let mode = StatusFlags::RXEN | StatusFlags::LOOPEN;
        transact(&mut t, BusRequest::write(Register::RxStatus, mode.bits()));
        settle(&mut t, 16 * 6);

        assert_eq!(t.rx_queue().len(), 4);
        for n in 0..4i64 {
            let word = transact(&mut t, BusRequest::read(Register::RxSample));
            assert_eq!(common::unpack_sample_word(word), (n * 640, -n * 640));
        }
    }

    #[test]
    fn test_fir_coefficients_reach_engine() {
        let mut t = transceiver();
        settle(&mut t, 20);
        transact(&mut t, BusRequest::write(Register::TxFir, (1 << 16) | 2));
        assert!(t.controller().loading_coefficients());
        transact(&mut t, BusRequest::write(Register::TxFir, 1 << 16));
        transact(&mut t, BusRequest::write(Register::TxFir, 1 << 15));
        assert!(!t.controller().loading_coefficients());

        transact(&mut t, BusRequest::write(Register::TxInterp, 8));
        transact(&mut t, BusRequest::write(Register::RxDecim, 8));
        transact(&mut t, BusRequest::write(Register::TxSample, pack_sample_word(6400, 0)));
        transact(&mut t, BusRequest::write(Register::TxSample, pack_sample_word(6400, 0)));
        let mode = StatusFlags::TXEN | StatusFlags::FIREN | StatusFlags::LOOPEN;
        transact(&mut t, BusRequest::write(Register::TxStatus, mode.bits()));
        let mode = StatusFlags::RXEN | StatusFlags::LOOPEN;
        transact(&mut t, BusRequest::write(Register::RxStatus, mode.bits()));
        settle(&mut t, 8 * 8);

        // 0.5 then 0.5 + 0.25 of 6400, through the 16 -> 10 -> 16 bit path
        let first = common::unpack_sample_word(transact(&mut t, BusRequest::read(Register::RxSample)));
        let second = common::unpack_sample_word(transact(&mut t, BusRequest::read(Register::RxSample)));
        assert_eq!(first.0, 3200 >> 6 << 6);
        assert_eq!(second.0, 4800 >> 6 << 6);
    }

    #[test]
    fn test_clear_resets_datapath() {
        let mut t = transceiver();
        settle(&mut t, 20);
        transact(&mut t, BusRequest::write(Register::TxSample, 1));
        let mode = StatusFlags::TXEN;
        transact(&mut t, BusRequest::write(Register::TxStatus, mode.bits()));
        settle(&mut t, 8);
        assert!(t.tx_queue().underruns() > 0);

        transact(&mut t, BusRequest::write(Register::TxStatus, StatusFlags::CLEAR.bits()));
        settle(&mut t, CLEAR_TICKS as usize + 8);
        assert_eq!(t.clear_state(), ClearState::Run);
        assert_eq!(t.tx_queue().underruns(), 0);
        assert!(!t.controller().control().tx.enable);
        assert!(!t.sample_control().clear);
    }
}
