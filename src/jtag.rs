//! JTAG scan encoding and the debug-port transfer protocol.
//!
//! Scans are staged in [`BitScratch`] buffers and handed to a [`Jtag`]
//! implementation in one piece, so the shift engine never has to know which
//! TAP state it is walking through.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{scratch::BitScratch, speed::SpeedProfile};

/// Encode if a transaction is for AP or DP.
#[repr(u8)]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum APnDP {
    /// For DP.
    DP = 0,
    /// For AP.
    AP = 1,
}

/// Encode if a transaction is a read or a write.
#[repr(u8)]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RnW {
    /// Write flag.
    W = 0,
    /// Read flag.
    R = 1,
}

/// Acknowledge codes with a meaning to the retry loop, in logical bit order.
///
/// Any other code is a protocol fault and is handed back to the caller as is.
#[repr(u8)]
#[derive(PartialEq, Eq, Copy, Clone, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ack {
    /// The transfer was accepted.
    Ok = 0b001,
    /// The target is busy; the same transfer should be issued again.
    Wait = 0b010,
}

/// Convert an acknowledge between wire order and logical order.
///
/// The first two sampled bits are swapped; applying it twice is a no-op.
pub fn reorder_ack(ack: u8) -> u8 {
    (ack & 0x4) | ((ack & 0x2) >> 1) | ((ack & 0x1) << 1)
}

/// Describes a data register transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferInfo {
    /// Access port or debug port.
    pub ap_ndp: APnDP,
    /// Read or write.
    pub r_nw: RnW,
    /// Register address bits A[3:2].
    pub a2a3: u8,
    /// Record the time the transfer was issued.
    pub timestamp: bool,
}

impl TransferInfo {
    /// The three header bits shifted in ahead of the data word.
    pub fn header(&self) -> u8 {
        (self.a2a3 & 0b11) << 1 | self.r_nw as u8
    }
}

impl From<u8> for TransferInfo {
    fn from(byte: u8) -> Self {
        const DAP_TRANSFER_APNDP: u8 = 1 << 0;
        const DAP_TRANSFER_RNW: u8 = 1 << 1;
        const DAP_TRANSFER_A2: u8 = 1 << 2;
        const DAP_TRANSFER_A3: u8 = 1 << 3;
        const DAP_TRANSFER_TIMESTAMP: u8 = 1 << 7;

        Self {
            ap_ndp: if byte & DAP_TRANSFER_APNDP != 0 {
                APnDP::AP
            } else {
                APnDP::DP
            },
            r_nw: if byte & DAP_TRANSFER_RNW != 0 {
                RnW::R
            } else {
                RnW::W
            },
            a2a3: (byte & (DAP_TRANSFER_A2 | DAP_TRANSFER_A3)) >> 2,
            timestamp: byte & DAP_TRANSFER_TIMESTAMP != 0,
        }
    }
}

/// Position of the selected TAP's instruction register in the chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TapConfig {
    /// The number of bits in the IR register.
    pub ir_length: u8,
    /// The number of bypass bits before the IR register.
    pub ir_before: u16,
    /// The number of bypass bits after the IR register.
    pub ir_after: u16,
}

/// A fully encoded scan, starting and ending in Run-Test/Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Scan {
    /// TMS level for each clock.
    pub tms: BitScratch,
    /// TDI level for each clock.
    pub tdi: BitScratch,
    /// The number of clocks in the scan.
    pub n_bits: usize,
}

impl Scan {
    fn new() -> Self {
        Self {
            tms: BitScratch::new(),
            tdi: BitScratch::new(),
            n_bits: 0,
        }
    }

    /// Append a bit with the given TMS and TDI levels.
    fn push(&mut self, tms: bool, tdi: bool) {
        self.tms.set_bit(self.n_bits, tms);
        self.tdi.set_bit(self.n_bits, tdi);
        self.n_bits += 1;
    }

    /// Append `count` bits with TMS low and TDI taken from `value`.
    fn push_data(&mut self, count: usize, value: u64) {
        self.tdi.set_bits(self.n_bits, count, value);
        self.n_bits += count;
    }

    /// Append `count` bits with TMS low and TDI high.
    fn push_ones(&mut self, count: usize) {
        self.tdi.fill_ones(self.n_bits, count);
        self.n_bits += count;
    }
}

/// Encode an instruction register load for `ir` on `tap`.
pub fn encode_ir(ir: u32, tap: &TapConfig) -> Scan {
    const IDLE_TO_SHIFT_IR: u64 = 0b0011;

    debug_assert!(tap.ir_length > 0);
    let body = tap.ir_length.saturating_sub(1) as usize;
    let top = (ir as u64 >> body) & 1 != 0;

    let mut scan = Scan::new();
    scan.tms.set_bits(0, 4, IDLE_TO_SHIFT_IR);
    scan.n_bits = 4;

    // Bypass registers ahead of us are fed ones.
    scan.push_ones(tap.ir_before as usize);
    scan.push_data(body, ir as u64);

    if tap.ir_after > 0 {
        scan.push(false, top);
        scan.push_ones(tap.ir_after as usize - 1);
        // Exit1-IR
        scan.push(true, true);
    } else {
        // Last instruction bit and Exit1-IR on the same edge.
        scan.push(true, top);
    }

    // Update-IR
    scan.push(true, false);
    // Run-Test/Idle, TDI kept high
    scan.push(false, true);

    scan
}

/// An encoded data register transfer together with the TDO offsets of its
/// acknowledge and data fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DrScan {
    /// The encoded scan.
    pub scan: Scan,
    /// TDO bit at which the three acknowledge bits start.
    pub ack_offset: usize,
    /// TDO bit at which the 32-bit read value starts.
    pub data_offset: usize,
}

impl DrScan {
    /// Encode a transfer of `data` (ignored for reads) through a chain with
    /// `dr_before`/`dr_after` bypass bits around the selected TAP.
    pub fn new(
        req: TransferInfo,
        data: u32,
        dr_before: u16,
        dr_after: u16,
        idle_cycles: u8,
    ) -> Self {
        const IDLE_TO_SHIFT_DR: u64 = 0b001;

        let mut scan = Scan::new();
        scan.tms.set_bits(0, 3, IDLE_TO_SHIFT_DR);
        scan.n_bits = 3 + dr_before as usize;

        let ack_offset = scan.n_bits;
        scan.push_data(3, req.header() as u64);

        let data_offset = scan.n_bits;
        let data = match req.r_nw {
            RnW::W => data,
            RnW::R => 0,
        };
        scan.push_data(32, data as u64);
        scan.n_bits += dr_after as usize;

        // Exit1-DR rides on the last shifted bit.
        scan.tms.set_bit(scan.n_bits - 1, true);
        // Update-DR
        scan.push(true, false);
        scan.n_bits += idle_cycles as usize;
        // Run-Test/Idle, TDI kept high
        scan.push(false, true);

        Self {
            scan,
            ack_offset,
            data_offset,
        }
    }

    /// Whole bytes between the head byte and the tail.
    pub fn bulk_bytes(&self) -> usize {
        (self.scan.n_bits - 8) / 8
    }

    /// Bits left after the head byte and the bulk bytes.
    pub fn tail_bits(&self) -> usize {
        self.scan.n_bits - 8 - self.bulk_bytes() * 8
    }
}

/// A JTAG shift engine, with the instruction and data register protocols
/// built on top of it.
pub trait Jtag {
    /// The clocking and retry settings in effect.
    fn profile(&self) -> SpeedProfile;

    /// Shift `n_bits` bits of TMS/TDI out and capture TDO, least significant
    /// bit of the first byte first.
    fn shift(&mut self, n_bits: usize, tms: &[u8], tdi: &[u8], tdo: &mut [u8]);

    /// Shift one head byte, `bulk_bytes` whole bytes and `tail_bits` bits.
    ///
    /// Equivalent to `shift(8 + 8 * bulk_bytes + tail_bits, ..)`; the bulk
    /// region may be moved by a block transfer backend.
    fn shift_dr(
        &mut self,
        bulk_bytes: usize,
        tail_bits: usize,
        tms: &[u8],
        tdi: &[u8],
        tdo: &mut [u8],
    );

    /// Record the time a timestamped transfer was first issued.
    fn capture_timestamp(&mut self) {}

    /// Shift out the instruction register (IR), ending in Run-Test/Idle.
    fn load_instruction(&mut self, ir: u32, ir_length: u8, ir_before: u16, ir_after: u16) {
        let tap = TapConfig {
            ir_length,
            ir_before,
            ir_after,
        };
        let scan = encode_ir(ir, &tap);
        trace!("IR load {:x}, {} bits", ir, scan.n_bits);

        // TDO of an instruction load carries nothing of interest.
        let mut tdo = BitScratch::new();
        self.shift(
            scan.n_bits,
            scan.tms.as_bytes(),
            scan.tdi.as_bytes(),
            tdo.as_bytes_mut(),
        );
    }

    /// Run a debug-port register transfer, re-issuing it while the target
    /// answers WAIT.
    ///
    /// Returns the last acknowledge in logical order. For reads, the value is
    /// stored little-endian into `out` when one is given.
    fn transfer(
        &mut self,
        req: TransferInfo,
        data: u32,
        dr_before: u16,
        dr_after: u16,
        out: Option<&mut [u8; 4]>,
    ) -> u8 {
        let profile = self.profile();
        let dr = DrScan::new(req, data, dr_before, dr_after, profile.idle_cycles);
        let (bulk_bytes, tail_bits) = (dr.bulk_bytes(), dr.tail_bits());

        #[cfg(feature = "timestamp")]
        if req.timestamp {
            self.capture_timestamp();
        }

        let mut tdo = BitScratch::new();
        let mut retry = profile.retry_limit;
        let ack = loop {
            self.shift_dr(
                bulk_bytes,
                tail_bits,
                dr.scan.tms.as_bytes(),
                dr.scan.tdi.as_bytes(),
                tdo.as_bytes_mut(),
            );
            let ack = reorder_ack(tdo.get_bits(dr.ack_offset, 3) as u8);
            if ack != u8::from(Ack::Wait) || retry == 0 {
                break ack;
            }
            retry -= 1;
        };

        match Ack::try_from(ack) {
            Ok(Ack::Ok) => {}
            Ok(Ack::Wait) => warn!("transfer still WAIT after {} retries", profile.retry_limit),
            Err(_) => debug!("transfer ack {}", ack),
        }

        if let (Some(out), RnW::R) = (out, req.r_nw) {
            let value = tdo.get_bits(dr.data_offset, 32) as u32;
            *out = value.to_le_bytes();
        }

        ack
    }
}
