//! Bitbanging (GPIO-driven) JTAG implementation.

use embedded_hal::delay::DelayNs;

use crate::{
    jtag::Jtag,
    pins::Pins,
    speed::{CalibrationTable, Engine, SpeedProfile},
};

/// One TCK cycle: TDI/TMS set up before the falling edge, TDO sampled into
/// bit 7 of `$tdo` after the rising edge.
macro_rules! clock_bit {
    ($lines:expr, $pace:expr, $delay:expr, $tms:ident, $tdi:ident, $tdo:ident) => {
        $lines.tdi.set_high($tdi & 1 != 0);
        $lines.tms.set_high($tms & 1 != 0);
        $lines.tck.set_high(false);
        $pace.half_cycle($delay);
        $tms >>= 1;
        $tdi >>= 1;
        $tdo >>= 1;
        $lines.tck.set_high(true);
        $pace.half_cycle($delay);
        if $lines.tdo.is_high() {
            $tdo |= 0x80;
        }
    };
}

/// A trait for a pin that can be used as an input or output.
pub trait InputOutputPin {
    /// Switch the pin to push-pull output.
    fn set_as_output(&mut self);
    /// Drive the output level.
    fn set_high(&mut self, high: bool);

    /// Switch the pin to input (high impedance).
    fn set_as_input(&mut self);
    /// Sample the pin level.
    fn is_high(&mut self) -> bool;
}

/// A trait for a delay implementation that can be used to delay for a number of CPU cycles.
pub trait DelayCycles: DelayNs {
    /// CPU clock frequency in Hz.
    fn cpu_clock(&self) -> u32;
    /// Busy-wait for approximately `cycles` CPU cycles.
    fn delay_cycles(&mut self, cycles: u32);

    /// Free-running tick counter used to timestamp transfers.
    fn timestamp(&mut self) -> u32 {
        0
    }
}

/// Block transfer backend for the middle bytes of a data register scan.
///
/// Head and tail bits are always clocked by hand, so a backend only ever
/// sees whole bytes and never has to know the TAP framing.
pub trait BulkTransfer {
    /// Move `tdi` out and `tdo` in, returning `false` if the bytes were not
    /// transferred and have to be bit-banged instead.
    fn transfer(&mut self, tms: &[u8], tdi: &[u8], tdo: &mut [u8]) -> bool;
}

/// Default bulk backend: leaves every byte to the GPIO loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bitbang;

impl BulkTransfer for Bitbang {
    #[inline(always)]
    fn transfer(&mut self, _tms: &[u8], _tdi: &[u8], _tdo: &mut [u8]) -> bool {
        false
    }
}

/// Wait inserted after each TCK edge.
trait Pace {
    fn half_cycle<D: DelayCycles>(&self, delay: &mut D);
}

/// Relies on the loop's own latency; compiles to nothing.
struct Unthrottled;

impl Pace for Unthrottled {
    #[inline(always)]
    fn half_cycle<D: DelayCycles>(&self, _delay: &mut D) {}
}

struct Throttled(u32);

impl Pace for Throttled {
    #[inline(always)]
    fn half_cycle<D: DelayCycles>(&self, delay: &mut D) {
        delay.delay_cycles(self.0);
    }
}

struct Lines<IO> {
    tdi: IO,
    tms: IO,
    tck: IO,
    tdo: IO,
    srst: IO,
    trst: IO,
}

impl<IO: InputOutputPin> Lines<IO> {
    fn to_jtag(&mut self) {
        self.tdi.set_high(true);
        self.tdi.set_as_output();

        self.tms.set_high(true);
        self.tms.set_as_output();

        self.tck.set_high(true);
        self.tck.set_as_output();

        self.tdo.set_as_input();

        self.srst.set_high(true);
        self.srst.set_as_output();

        self.trst.set_high(true);
        self.trst.set_as_output();
    }

    fn release(&mut self) {
        self.tdi.set_as_input();
        self.tms.set_as_input();
        self.tck.set_as_input();
        self.tdo.set_as_input();
        self.srst.set_as_input();
        self.trst.set_as_input();
    }

    /// Shift up to 8 bits; the result is right-aligned.
    #[inline(always)]
    fn shift_byte<P: Pace, D: DelayCycles>(
        &mut self,
        pace: &P,
        delay: &mut D,
        bits: usize,
        mut tms: u8,
        mut tdi: u8,
    ) -> u8 {
        let mut tdo = 0u8;
        for _ in 0..bits {
            clock_bit!(self, pace, delay, tms, tdi, tdo);
        }
        tdo >> (8 - bits)
    }

    #[inline(always)]
    fn shift<P: Pace, D: DelayCycles>(
        &mut self,
        pace: &P,
        delay: &mut D,
        mut n_bits: usize,
        tms: &[u8],
        tdi: &[u8],
        tdo: &mut [u8],
    ) {
        check_buffers(n_bits, tms, tdi, tdo);
        let mut i = 0;
        while n_bits > 0 {
            let bits = n_bits.min(8);
            tdo[i] = self.shift_byte(pace, delay, bits, tms[i], tdi[i]);
            n_bits -= bits;
            i += 1;
        }
    }

    #[inline(always)]
    #[allow(clippy::too_many_arguments)]
    fn shift_split<P: Pace, D: DelayCycles, B: BulkTransfer>(
        &mut self,
        pace: &P,
        delay: &mut D,
        bulk: &mut B,
        bulk_bytes: usize,
        tail_bits: usize,
        tms: &[u8],
        tdi: &[u8],
        tdo: &mut [u8],
    ) {
        check_buffers(8 + bulk_bytes * 8 + tail_bits, tms, tdi, tdo);

        // head
        tdo[0] = self.shift_byte(pace, delay, 8, tms[0], tdi[0]);

        // bulk
        let body = 1..1 + bulk_bytes;
        if !bulk.transfer(&tms[body.clone()], &tdi[body.clone()], &mut tdo[body.clone()]) {
            self.shift(
                pace,
                delay,
                bulk_bytes * 8,
                &tms[body.clone()],
                &tdi[body.clone()],
                &mut tdo[body],
            );
        }

        // tail
        let tail = 1 + bulk_bytes..;
        self.shift(
            pace,
            delay,
            tail_bits,
            &tms[tail.clone()],
            &tdi[tail.clone()],
            &mut tdo[tail],
        );
    }
}

/// A scan must never run with fewer clocks than requested, so undersized
/// buffers are rejected before the first edge.
#[inline(always)]
fn check_buffers(n_bits: usize, tms: &[u8], tdi: &[u8], tdo: &[u8]) {
    let bytes = n_bits.div_ceil(8);
    assert!(
        tms.len() >= bytes && tdi.len() >= bytes && tdo.len() >= bytes,
        "scan buffers shorter than {} bits",
        n_bits
    );
}

/// JTAG engine driving TDI, TMS and TCK and sampling TDO over GPIO.
pub struct BitbangJtag<IO, D, B = Bitbang>
where
    IO: InputOutputPin,
    D: DelayCycles,
    B: BulkTransfer,
{
    lines: Lines<IO>,
    delay: D,
    bulk: B,
    calibration: CalibrationTable,
    profile: SpeedProfile,
    #[cfg(feature = "timestamp")]
    timestamp: u32,
}

impl<IO, D> BitbangJtag<IO, D>
where
    IO: InputOutputPin,
    D: DelayCycles,
{
    /// Create an engine on the given lines. Nothing is driven until [`init`](Self::init).
    pub fn new(tdi: IO, tms: IO, tck: IO, tdo: IO, srst: IO, trst: IO, delay: D) -> Self {
        Self {
            lines: Lines {
                tdi,
                tms,
                tck,
                tdo,
                srst,
                trst,
            },
            delay,
            bulk: Bitbang,
            calibration: CalibrationTable::DEFAULT,
            profile: SpeedProfile::INIT,
            #[cfg(feature = "timestamp")]
            timestamp: 0,
        }
    }
}

impl<IO, D, B> BitbangJtag<IO, D, B>
where
    IO: InputOutputPin,
    D: DelayCycles,
    B: BulkTransfer,
{
    /// Replace the bulk transfer backend used by data register scans.
    pub fn with_bulk<B2: BulkTransfer>(self, bulk: B2) -> BitbangJtag<IO, D, B2> {
        BitbangJtag {
            lines: self.lines,
            delay: self.delay,
            bulk,
            calibration: self.calibration,
            profile: self.profile,
            #[cfg(feature = "timestamp")]
            timestamp: self.timestamp,
        }
    }

    /// Take the lines into JTAG mode and forget any previous configuration.
    pub fn init(&mut self) {
        self.reconfigure_io();
        self.profile = SpeedProfile::INIT;
        #[cfg(feature = "timestamp")]
        {
            self.timestamp = 0;
        }
    }

    /// Release all lines.
    pub fn fini(&mut self) {
        self.lines.release();
    }

    /// Restore idle JTAG line levels after the pins were used for something else.
    pub fn reconfigure_io(&mut self) {
        self.lines.to_jtag();
    }

    /// Use different half-period waits for the throttled tiers. Takes effect
    /// on the next [`configure`](Self::configure).
    pub fn set_calibration(&mut self, calibration: CalibrationTable) {
        self.calibration = calibration;
    }

    /// Select the clock tier for `frequency_khz` and set the transfer
    /// parameters. Returns `false` and keeps the current settings if the
    /// frequency is invalid.
    pub fn configure(&mut self, frequency_khz: u32, retry_limit: u16, idle_cycles: u8) -> bool {
        let profile = match SpeedProfile::select(
            frequency_khz,
            self.delay.cpu_clock(),
            &self.calibration,
            retry_limit,
            idle_cycles,
        ) {
            Some(profile) => profile,
            None => return false,
        };

        debug!(
            "configure({} kHz): {:?}, {} ticks/half period, retry {}, idle {}",
            frequency_khz,
            profile.tier,
            profile.half_period_ticks,
            retry_limit,
            idle_cycles
        );
        self.profile = profile;
        true
    }

    /// Shift an arbitrary TMS/TDI sequence, e.g. a TAP reset.
    ///
    /// Always runs the throttled loop, with no wait at the unthrottled tier.
    pub fn raw_shift(&mut self, n_bits: usize, tms: &[u8], tdi: &[u8], tdo: &mut [u8]) {
        let pace = Throttled(self.profile.engine.delay_cycles());
        self.lines
            .shift(&pace, &mut self.delay, n_bits, tms, tdi, tdo);
    }

    /// Drive the lines selected by `mask` to the levels in `output`, wait
    /// `wait_us`, and read back every line.
    pub fn pins(&mut self, output: Pins, mask: Pins, wait_us: u32) -> Pins {
        if mask.contains(Pins::TCK) {
            self.lines.tck.set_high(output.contains(Pins::TCK));
        }
        if mask.contains(Pins::TMS) {
            self.lines.tms.set_high(output.contains(Pins::TMS));
        }
        if mask.contains(Pins::TDI) {
            self.lines.tdi.set_high(output.contains(Pins::TDI));
        }
        if mask.contains(Pins::NTRST) {
            self.lines.trst.set_high(output.contains(Pins::NTRST));
        }
        if mask.contains(Pins::NRESET) {
            self.lines.srst.set_high(output.contains(Pins::NRESET));
        }

        if wait_us != 0 {
            self.delay.delay_us(wait_us);
        }

        let mut read = Pins::empty();

        read.set(Pins::TCK, self.lines.tck.is_high());
        read.set(Pins::TMS, self.lines.tms.is_high());
        read.set(Pins::TDI, self.lines.tdi.is_high());
        read.set(Pins::TDO, self.lines.tdo.is_high());
        read.set(Pins::NTRST, self.lines.trst.is_high());
        read.set(Pins::NRESET, self.lines.srst.is_high());

        read
    }

    /// Time at which the last timestamped transfer was first issued.
    pub fn get_timestamp(&self) -> u32 {
        #[cfg(feature = "timestamp")]
        {
            self.timestamp
        }
        #[cfg(not(feature = "timestamp"))]
        {
            0
        }
    }
}

impl<IO, D, B> Jtag for BitbangJtag<IO, D, B>
where
    IO: InputOutputPin,
    D: DelayCycles,
    B: BulkTransfer,
{
    fn profile(&self) -> SpeedProfile {
        self.profile
    }

    fn shift(&mut self, n_bits: usize, tms: &[u8], tdi: &[u8], tdo: &mut [u8]) {
        let delay = &mut self.delay;
        match self.profile.engine {
            Engine::Unthrottled => self.lines.shift(&Unthrottled, delay, n_bits, tms, tdi, tdo),
            Engine::Throttled { delay_cycles } => {
                self.lines
                    .shift(&Throttled(delay_cycles), delay, n_bits, tms, tdi, tdo)
            }
        }
    }

    fn shift_dr(
        &mut self,
        bulk_bytes: usize,
        tail_bits: usize,
        tms: &[u8],
        tdi: &[u8],
        tdo: &mut [u8],
    ) {
        let (delay, bulk) = (&mut self.delay, &mut self.bulk);
        match self.profile.engine {
            Engine::Unthrottled => self.lines.shift_split(
                &Unthrottled,
                delay,
                bulk,
                bulk_bytes,
                tail_bits,
                tms,
                tdi,
                tdo,
            ),
            Engine::Throttled { delay_cycles } => self.lines.shift_split(
                &Throttled(delay_cycles),
                delay,
                bulk,
                bulk_bytes,
                tail_bits,
                tms,
                tdi,
                tdo,
            ),
        }
    }

    #[cfg(feature = "timestamp")]
    fn capture_timestamp(&mut self) {
        self.timestamp = self.delay.timestamp();
    }
}
