//! Clock tier selection.
//!
//! A requested TCK frequency is mapped once, at configuration time, onto one
//! of five shift strategies. The fastest tier relies on the natural latency
//! of the toggle loop and never calls the delay primitive; the others insert
//! a calibrated busy-wait after each clock edge.

/// Frequency bands the engine can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tier {
    /// 3 MHz and above: no delay between edges.
    Unthrottled,
    /// 1.5 MHz up to 3 MHz.
    Khz2000,
    /// 750 kHz up to 1.5 MHz.
    Khz1000,
    /// 375 kHz up to 750 kHz.
    Khz500,
    /// Below 375 kHz.
    Khz250,
}

/// Lower bound, in kHz, of every tier except the slowest.
const TIER_FLOORS: [(u32, Tier); 4] = [
    (3000, Tier::Unthrottled),
    (1500, Tier::Khz2000),
    (750, Tier::Khz1000),
    (375, Tier::Khz500),
];

impl Tier {
    /// Pick the tier for `frequency_khz`, by descending threshold.
    pub fn for_frequency(frequency_khz: u32) -> Self {
        TIER_FLOORS
            .iter()
            .find(|(floor, _)| frequency_khz >= *floor)
            .map(|&(_, tier)| tier)
            .unwrap_or(Tier::Khz250)
    }
}

/// Busy-wait lengths, in delay cycles, inserted after each clock edge by the
/// throttled tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationTable {
    /// Wait for [`Tier::Khz2000`].
    pub khz2000: u32,
    /// Wait for [`Tier::Khz1000`].
    pub khz1000: u32,
    /// Wait for [`Tier::Khz500`].
    pub khz500: u32,
    /// Wait for [`Tier::Khz250`].
    pub khz250: u32,
}

impl CalibrationTable {
    /// Values measured on the reference probe.
    pub const DEFAULT: Self = Self {
        khz2000: 4,
        khz1000: 36,
        khz500: 100,
        khz250: 228,
    };

    /// Returns the half-period wait for `tier`, or `None` for the unthrottled tier.
    pub fn delay_cycles(&self, tier: Tier) -> Option<u32> {
        match tier {
            Tier::Unthrottled => None,
            Tier::Khz2000 => Some(self.khz2000),
            Tier::Khz1000 => Some(self.khz1000),
            Tier::Khz500 => Some(self.khz500),
            Tier::Khz250 => Some(self.khz250),
        }
    }
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Shift strategy chosen for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Engine {
    /// Toggle loop without any delay calls.
    Unthrottled,
    /// Toggle loop waiting after each edge.
    Throttled {
        /// Delay cycles per half period.
        delay_cycles: u32,
    },
}

impl Engine {
    /// Half-period wait of this strategy, zero when unthrottled.
    pub fn delay_cycles(&self) -> u32 {
        match *self {
            Engine::Unthrottled => 0,
            Engine::Throttled { delay_cycles } => delay_cycles,
        }
    }
}

/// Clocking and transfer settings shared by every scan until the next
/// reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpeedProfile {
    /// The selected frequency band.
    pub tier: Tier,
    /// The shift strategy for that band.
    pub engine: Engine,
    /// CPU clock ticks per TCK half period at the requested frequency.
    pub half_period_ticks: u32,
    /// Extra Run-Test/Idle cycles appended to every data register scan.
    pub idle_cycles: u8,
    /// Number of times a scan is re-issued while the target answers WAIT.
    pub retry_limit: u16,
}

impl SpeedProfile {
    /// Profile in effect before the first configuration: slowest tier, no
    /// idle cycles, no retries.
    pub const INIT: Self = Self {
        tier: Tier::Khz250,
        engine: Engine::Throttled {
            delay_cycles: CalibrationTable::DEFAULT.khz250,
        },
        half_period_ticks: 0,
        idle_cycles: 0,
        retry_limit: 0,
    };

    /// Build the profile for `frequency_khz`.
    ///
    /// Returns `None` if the frequency is zero.
    pub fn select(
        frequency_khz: u32,
        cpu_clock: u32,
        calibration: &CalibrationTable,
        retry_limit: u16,
        idle_cycles: u8,
    ) -> Option<Self> {
        if frequency_khz == 0 {
            return None;
        }

        let tier = Tier::for_frequency(frequency_khz);
        let engine = match calibration.delay_cycles(tier) {
            Some(delay_cycles) => Engine::Throttled { delay_cycles },
            None => Engine::Unthrottled,
        };

        Some(Self {
            tier,
            engine,
            half_period_ticks: cpu_clock / frequency_khz.saturating_mul(2000),
            idle_cycles,
            retry_limit,
        })
    }
}

impl Default for SpeedProfile {
    fn default() -> Self {
        Self::INIT
    }
}
