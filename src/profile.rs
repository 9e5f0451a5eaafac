use crate::{AcceptanceFilter, BusTiming};

/// Rate of an identifier that is watched but not forwarded.
pub const RATE_DISABLED: u16 = 0;

/// Rate used for identifiers a profile has no specific rate for.
pub const RATE_DEFAULT: u16 = 1;

/// Vehicle specific decoding data: bus timing, hardware filter and the
/// identifiers worth forwarding with their sampling rate.
pub trait Profile {
    /// Name of the profile (for logging purposes)
    fn name(&self) -> &'static str;

    fn timing(&self) -> BusTiming;

    /// Hardware acceptance filter. Accepts every frame unless a profile
    /// narrows it down to reduce interrupt load.
    fn filter(&self) -> AcceptanceFilter {
        AcceptanceFilter::ACCEPT_ALL
    }

    /// Watched identifiers. Must be sorted in strictly ascending order.
    fn watched(&self) -> &'static [u32];

    /// Forward one out of every `rate` frames of `id`.
    fn rate(&self, id: u32) -> u16;
}

/// BMW G8x series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BmwG8x;

impl BmwG8x {
    const WATCHED: [u32; 14] = [
        0x0A5, // RPM
        0x0D9, // THROTTLE
        0x0EF, // BRAKE PRESSURE
        0x173, // ABS / ASC
        0x199, // LONGITUDINAL ACCELERATION
        0x19A, // LATERAL ACCELERATION
        0x19F, // YAW RATE
        0x1A1, // SPEED
        0x281, // BATTERY VOLTAGE
        0x2C4, // FUEL RAW
        0x2CA, // AIR TEMP
        0x301, // STEERING ANGLE
        0x330, // FUEL USED, FUEL LAMP, FUEL RANGE
        0x3F9, // GEAR, OIL TEMP, WATER TEMP
    ];
}

impl Profile for BmwG8x {
    fn name(&self) -> &'static str {
        "BMW G8X Decoder"
    }

    fn timing(&self) -> BusTiming {
        BusTiming::KBITS_500
    }

    /// Everything the profile watches lives in 0x000..=0x3FF, so the first
    /// filter only requires bit 10 to be clear and the second passes 0x000.
    fn filter(&self) -> AcceptanceFilter {
        AcceptanceFilter::dual_standard(0x000, 0x400, 0x000, 0x7FF)
    }

    fn watched(&self) -> &'static [u32] {
        &Self::WATCHED
    }

    fn rate(&self, id: u32) -> u16 {
        match id {
            // RPM, THROTTLE - 100 Hz
            0x0A5 | 0x0D9 => 3,
            // BRAKE PRESSURE, ABS, ACCELERATION, YAW RATE, SPEED - 50 Hz
            0x0EF | 0x173 | 0x199 | 0x19A | 0x19F | 0x1A1 => 2,
            _ => RATE_DEFAULT,
        }
    }
}

/// Porsche 992 GT3 (possibly other 992 models).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Porsche992;

impl Porsche992 {
    const WATCHED: [u32; 3] = [0x1F1, 0x1F2, 0x1F3];
}

impl Profile for Porsche992 {
    fn name(&self) -> &'static str {
        "Porsche 992 Decoder"
    }

    fn timing(&self) -> BusTiming {
        BusTiming::KBITS_500
    }

    fn watched(&self) -> &'static [u32] {
        &Self::WATCHED
    }

    fn rate(&self, _id: u32) -> u16 {
        RATE_DEFAULT
    }
}

/// The supported vehicles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Vehicle {
    BmwG8x(BmwG8x),
    Porsche992(Porsche992),
}

impl Vehicle {
    /// The vehicle selected by the `bmw-g8x` / `porsche-992` cargo features.
    pub const fn configured() -> Self {
        #[cfg(feature = "porsche-992")]
        {
            Self::Porsche992(Porsche992)
        }
        #[cfg(not(feature = "porsche-992"))]
        {
            Self::BmwG8x(BmwG8x)
        }
    }

    fn profile(&self) -> &dyn Profile {
        match self {
            Self::BmwG8x(profile) => profile,
            Self::Porsche992(profile) => profile,
        }
    }
}

impl Profile for Vehicle {
    fn name(&self) -> &'static str {
        self.profile().name()
    }

    fn timing(&self) -> BusTiming {
        self.profile().timing()
    }

    fn filter(&self) -> AcceptanceFilter {
        self.profile().filter()
    }

    fn watched(&self) -> &'static [u32] {
        self.profile().watched()
    }

    fn rate(&self, id: u32) -> u16 {
        self.profile().rate(id)
    }
}
