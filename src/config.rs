/// Frames the queue between the interrupt handler and the draining task holds.
pub const QUEUE_DEPTH: usize = 8;

/// Storage slots backing a queue of [`QUEUE_DEPTH`] frames. The ring keeps
/// one slot free to tell "full" from "empty".
pub const QUEUE_STORAGE: usize = QUEUE_DEPTH + 1;

/// Period of the statistics report, in microseconds.
pub const STATS_PERIOD_US: u64 = 5_000_000;

/// Error warning limit programmed at install.
pub const ERROR_WARNING_LIMIT: u8 = 96;

/// Largest watched-identifier table a vehicle profile may supply.
pub const MAX_WATCHED: usize = 64;

/// Peripheral clock feeding the bit rate prescaler.
pub const APB_CLOCK_HZ: u32 = 80_000_000;

/// Bit timing of the physical bus.
///
/// `tseg1`, `tseg2` and `sjw` are in time quanta; `brp` divides
/// [`APB_CLOCK_HZ`] into one time quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusTiming {
    pub brp: u32,
    pub sjw: u8,
    pub tseg1: u8,
    pub tseg2: u8,
    pub triple_sampling: bool,
}

impl BusTiming {
    pub const KBITS_25: Self = Self::new(128, 16, 8, 3);
    pub const KBITS_50: Self = Self::new(80, 15, 4, 3);
    pub const KBITS_100: Self = Self::new(40, 15, 4, 3);
    pub const KBITS_125: Self = Self::new(32, 15, 4, 3);
    pub const KBITS_250: Self = Self::new(16, 15, 4, 3);
    pub const KBITS_500: Self = Self::new(8, 15, 4, 3);
    pub const KBITS_800: Self = Self::new(4, 16, 8, 3);
    pub const MBITS_1: Self = Self::new(4, 15, 4, 3);

    const fn new(brp: u32, tseg1: u8, tseg2: u8, sjw: u8) -> Self {
        Self {
            brp,
            sjw,
            tseg1,
            tseg2,
            triple_sampling: false,
        }
    }

    /// Resulting bit rate in bit/s, `None` for a zero or overflowing divisor.
    pub const fn bit_rate(&self) -> Option<u32> {
        let quanta = 1 + self.tseg1 as u32 + self.tseg2 as u32;
        match self.brp.checked_mul(quanta) {
            Some(divisor) => APB_CLOCK_HZ.checked_div(divisor),
            None => None,
        }
    }

    /// Checks the parameters against what the bus timing registers can hold.
    pub fn validate(&self) -> Result<(), TimingError> {
        if !(2..=128).contains(&self.brp) || self.brp % 2 != 0 {
            return Err(TimingError::Prescaler(self.brp));
        }

        if !(1..=16).contains(&self.tseg1) {
            return Err(TimingError::Segment1(self.tseg1));
        }

        if !(1..=8).contains(&self.tseg2) {
            return Err(TimingError::Segment2(self.tseg2));
        }

        if !(1..=4).contains(&self.sjw) {
            return Err(TimingError::SyncJumpWidth(self.sjw));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimingError {
    #[error("Bit rate prescaler ({0:?}) must be even and in the range 2..=128")]
    Prescaler(u32),
    #[error("Time segment 1 ({0:?}) out of the valid range (1..=16)")]
    Segment1(u8),
    #[error("Time segment 2 ({0:?}) out of the valid range (1..=8)")]
    Segment2(u8),
    #[error("Sync jump width ({0:?}) out of the valid range (1..=4)")]
    SyncJumpWidth(u8),
}

/// Hardware acceptance filter applied before any frame reaches the interrupt
/// handler. Mask bits set to 1 are "don't care".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcceptanceFilter {
    pub code: u32,
    pub mask: u32,
    pub single: bool,
}

impl AcceptanceFilter {
    pub const ACCEPT_ALL: Self = Self {
        code: 0,
        mask: 0xFFFF_FFFF,
        single: true,
    };

    /// Two standard-identifier filters, a frame passes if either matches.
    /// `*_care` selects the identifier bits that must equal the code.
    pub const fn dual_standard(first: u16, first_care: u16, second: u16, second_care: u16) -> Self {
        Self {
            code: ((first as u32) << 21) | ((second as u32) << 5),
            mask: !(((first_care as u32) << 21) | ((second_care as u32) << 5)),
            single: false,
        }
    }
}

impl Default for AcceptanceFilter {
    fn default() -> Self {
        Self::ACCEPT_ALL
    }
}
