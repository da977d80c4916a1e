use bitflags::bitflags;

bitflags! {
    /// Probe lines that can be driven or read back directly, in the bit
    /// positions CMSIS-DAP uses for its pin commands.
    pub struct Pins: u8 {
        /// TCK
        const TCK = 1 << 0;
        /// TMS
        const TMS = 1 << 1;
        /// TDI
        const TDI = 1 << 2;
        /// TDO
        const TDO = 1 << 3;
        /// nTRST
        const NTRST = 1 << 5;
        /// nRESET (SRST)
        const NRESET = 1 << 7;
    }
}
