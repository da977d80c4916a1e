use core::cell::RefCell;
use std::{rc::Rc, vec::Vec};

use crate::{
    driver::bitbang::{DelayCycles, InputOutputPin},
    jtag,
    scratch::BitScratch,
    speed::SpeedProfile,
};
use embedded_hal::delay::DelayNs;

#[mockall::automock]
pub trait JtagDevice {
    fn profile(&self) -> SpeedProfile;
    fn shift(&mut self, n_bits: usize, tms: &[u8], tdi: &[u8], tdo: &mut [u8]);
    fn shift_dr(
        &mut self,
        bulk_bytes: usize,
        tail_bits: usize,
        tms: &[u8],
        tdi: &[u8],
        tdo: &mut [u8],
    );
    fn capture_timestamp(&mut self);
}

impl jtag::Jtag for MockJtagDevice {
    fn profile(&self) -> SpeedProfile {
        JtagDevice::profile(self)
    }

    fn shift(&mut self, n_bits: usize, tms: &[u8], tdi: &[u8], tdo: &mut [u8]) {
        JtagDevice::shift(self, n_bits, tms, tdi, tdo)
    }

    fn shift_dr(
        &mut self,
        bulk_bytes: usize,
        tail_bits: usize,
        tms: &[u8],
        tdi: &[u8],
        tdo: &mut [u8],
    ) {
        JtagDevice::shift_dr(self, bulk_bytes, tail_bits, tms, tdi, tdo)
    }

    fn capture_timestamp(&mut self) {
        JtagDevice::capture_timestamp(self)
    }
}

mockall::mock! {
    pub Delay {}

    impl DelayNs for Delay {
        fn delay_ns(&mut self, ns: u32);
    }

    impl DelayCycles for Delay {
        fn cpu_clock(&self) -> u32;
        fn delay_cycles(&mut self, cycles: u32);
        fn timestamp(&mut self) -> u32;
    }
}

/// A delay that accepts any call, for tests that only look at the wire.
pub fn idle_delay() -> MockDelay {
    let mut delay = MockDelay::new();
    delay.expect_cpu_clock().return_const(48_000_000u32);
    delay.expect_delay_cycles().return_const(());
    delay.expect_delay_ns().return_const(());
    delay.expect_timestamp().return_const(0u32);
    delay
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    Reset,
    Idle,
    SelectDR,
    CaptureDR,
    ShiftDR,
    Exit1DR,
    PauseDR,
    Exit2DR,
    UpdateDR,
    SelectIR,
    CaptureIR,
    ShiftIR,
    Exit1IR,
    PauseIR,
    Exit2IR,
    UpdateIR,
}

impl TapState {
    fn next(self, tms: bool) -> Self {
        use TapState::*;
        match (self, tms) {
            (Reset, false) | (Idle, false) | (UpdateDR, false) | (UpdateIR, false) => Idle,
            (Reset, true) | (SelectIR, true) => Reset,
            (Idle, true) | (UpdateDR, true) | (UpdateIR, true) => SelectDR,
            (SelectDR, false) => CaptureDR,
            (SelectDR, true) => SelectIR,
            (CaptureDR, false) | (ShiftDR, false) | (Exit2DR, false) => ShiftDR,
            (CaptureDR, true) | (ShiftDR, true) => Exit1DR,
            (Exit1DR, false) | (PauseDR, false) => PauseDR,
            (Exit1DR, true) | (Exit2DR, true) => UpdateDR,
            (PauseDR, true) => Exit2DR,
            (SelectIR, false) => CaptureIR,
            (CaptureIR, false) | (ShiftIR, false) | (Exit2IR, false) => ShiftIR,
            (CaptureIR, true) | (ShiftIR, true) => Exit1IR,
            (Exit1IR, false) | (PauseIR, false) => PauseIR,
            (Exit1IR, true) | (Exit2IR, true) => UpdateIR,
            (PauseIR, true) => Exit2IR,
        }
    }
}

/// TAP controller model fed by the simulated TCK edges.
#[derive(Debug)]
pub struct SimTap {
    pub state: TapState,
    /// TDI bits shifted during the most recent Shift-IR.
    pub ir_bits: Vec<bool>,
    /// TDI bits shifted during the most recent Shift-DR.
    pub dr_bits: Vec<bool>,
    pub ir_updates: usize,
    pub dr_updates: usize,
}

impl SimTap {
    fn clock(&mut self, tms: bool, tdi: bool) {
        match self.state {
            TapState::ShiftIR => self.ir_bits.push(tdi),
            TapState::ShiftDR => self.dr_bits.push(tdi),
            _ => {}
        }
        self.state = self.state.next(tms);
        match self.state {
            TapState::CaptureIR => self.ir_bits.clear(),
            TapState::CaptureDR => self.dr_bits.clear(),
            TapState::UpdateIR => self.ir_updates += 1,
            TapState::UpdateDR => self.dr_updates += 1,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Tdi = 0,
    Tms = 1,
    Tck = 2,
    Tdo = 3,
    Srst = 4,
    Trst = 5,
}

/// Shared state of the simulated probe lines.
#[derive(Debug)]
pub struct Wire {
    pub levels: [bool; 6],
    pub outputs: [bool; 6],
    /// TDO follows TDI on every rising edge.
    pub loopback: bool,
    /// TDO responses, one scratch per scan of `script_period` bits; the last
    /// one repeats.
    pub scripts: Vec<BitScratch>,
    pub script_period: usize,
    /// (TMS, TDI) seen at each rising edge.
    pub edges: Vec<(bool, bool)>,
    pub tap: SimTap,
}

impl Wire {
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            levels: [false; 6],
            outputs: [false; 6],
            loopback: false,
            scripts: Vec::new(),
            script_period: 64,
            edges: Vec::new(),
            tap: SimTap {
                state: TapState::Idle,
                ir_bits: Vec::new(),
                dr_bits: Vec::new(),
                ir_updates: 0,
                dr_updates: 0,
            },
        }))
    }

    pub fn level(&self, line: Line) -> bool {
        self.levels[line as usize]
    }

    pub fn is_output(&self, line: Line) -> bool {
        self.outputs[line as usize]
    }

    fn rising_edge(&mut self) {
        let tms = self.level(Line::Tms);
        let tdi = self.level(Line::Tdi);
        let index = self.edges.len();
        self.edges.push((tms, tdi));
        self.tap.clock(tms, tdi);

        let tdo = if self.loopback {
            tdi
        } else {
            let scan = index / self.script_period;
            self.scripts
                .get(scan)
                .or(self.scripts.last())
                .map_or(false, |script| script.get_bit(index % self.script_period))
        };
        self.levels[Line::Tdo as usize] = tdo;
    }
}

pub struct SimPin {
    line: Line,
    wire: Rc<RefCell<Wire>>,
}

impl SimPin {
    pub fn new(line: Line, wire: &Rc<RefCell<Wire>>) -> Self {
        Self {
            line,
            wire: wire.clone(),
        }
    }
}

impl InputOutputPin for SimPin {
    fn set_as_output(&mut self) {
        self.wire.borrow_mut().outputs[self.line as usize] = true;
    }

    fn set_high(&mut self, high: bool) {
        let mut wire = self.wire.borrow_mut();
        let rising = self.line == Line::Tck
            && wire.is_output(Line::Tck)
            && !wire.level(Line::Tck)
            && high;
        wire.levels[self.line as usize] = high;
        if rising {
            wire.rising_edge();
        }
    }

    fn set_as_input(&mut self) {
        self.wire.borrow_mut().outputs[self.line as usize] = false;
    }

    fn is_high(&mut self) -> bool {
        self.wire.borrow().level(self.line)
    }
}
