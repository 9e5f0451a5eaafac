//! ESP32 TWAI register access.
//!
//! The controller is SJA1000 compatible ("PeliCAN" layout). Every register is
//! 32 bits wide with only the low byte in use. Bit positions follow the
//! ESP32 technical reference manual, chapter TWAI; other members of the family
//! (S2, S3, C3) move fields around and are not covered.

use core::ptr;

use bitflags::bitflags;

use crate::{AcceptanceFilter, BusTiming, FrameInfo};

/// Base address of the TWAI register block on the ESP32.
pub const ESP32_TWAI_BASE: usize = 0x3FF6_B000;

const MODE_RESET: u32 = 1 << 0;
const MODE_LISTEN_ONLY: u32 = 1 << 1;
const MODE_SELF_TEST: u32 = 1 << 2;
const MODE_SINGLE_FILTER: u32 = 1 << 3;

const COMMAND_RELEASE_RX_BUFFER: u32 = 1 << 2;

const CLOCK_DIVIDER_MASK: u32 = 0x07;
const CLOCK_OFF: u32 = 1 << 3;
const CLOCK_EXTENDED_LAYOUT: u32 = 1 << 7;

const RX_MESSAGE_COUNT_MASK: u32 = 0x7F;

/// TWAI registers, in reset mode and operating mode alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    Mode,
    Command,
    Status,
    Interrupt,
    InterruptEnable,
    BusTiming0,
    BusTiming1,
    ErrorWarningLimit,
    RxErrorCounter,
    TxErrorCounter,
    /// 13 byte frame buffer window. Holds the acceptance code (0..4) and
    /// mask (4..8) while in reset mode, and the oldest received message
    /// otherwise.
    Buffer(u8),
    RxMessageCount,
    ClockDivider,
}

impl Register {
    /// Byte offset from the start of the register block.
    pub const fn offset(self) -> usize {
        match self {
            Self::Mode => 0x00,
            Self::Command => 0x04,
            Self::Status => 0x08,
            Self::Interrupt => 0x0C,
            Self::InterruptEnable => 0x10,
            Self::BusTiming0 => 0x18,
            Self::BusTiming1 => 0x1C,
            Self::ErrorWarningLimit => 0x34,
            Self::RxErrorCounter => 0x38,
            Self::TxErrorCounter => 0x3C,
            Self::Buffer(n) => 0x40 + 4 * n as usize,
            Self::RxMessageCount => 0x74,
            Self::ClockDivider => 0x7C,
        }
    }
}

bitflags! {
    /// Interrupt status and interrupt enable bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interrupts: u32 {
        const RECEIVE = 1 << 0;
        const TRANSMIT = 1 << 1;
        const ERROR_WARNING = 1 << 2;
        const DATA_OVERRUN = 1 << 3;
        const WAKE_UP = 1 << 4;
        const ERROR_PASSIVE = 1 << 5;
        const ARBITRATION_LOST = 1 << 6;
        const BUS_ERROR = 1 << 7;
    }
}

impl Interrupts {
    /// Error class interrupts, counted by the interrupt handler.
    pub const ERRORS: Self = Self::ERROR_WARNING
        .union(Self::ERROR_PASSIVE)
        .union(Self::ARBITRATION_LOST)
        .union(Self::BUS_ERROR);

    /// Sources armed at install. The device never transmits, and data
    /// overrun and wake-up are unreliable on the ESP32, so only receive and
    /// the error sources that can occur while listening are enabled.
    pub const ENABLED: Self = Self::RECEIVE
        .union(Self::ERROR_WARNING)
        .union(Self::ERROR_PASSIVE)
        .union(Self::BUS_ERROR);
}

/// Raw access to a TWAI register block.
///
/// Reads take `&mut self`: reading [`Register::Interrupt`] clears it.
pub trait Peripheral {
    fn read(&mut self, reg: Register) -> u32;

    fn write(&mut self, reg: Register, value: u32);

    /// Resets the peripheral module and enables its bus clock.
    fn reset_module(&mut self) {}

    /// Routes the receive pin to the peripheral as a floating input.
    fn configure_rx_pin(&mut self) {}

    /// Unmasks the peripheral's interrupt line.
    fn enable_interrupt(&mut self) {}

    /// Masks the peripheral's interrupt line.
    fn disable_interrupt(&mut self) {}
}

/// Memory mapped register block.
///
/// The platform hooks of [`Peripheral`] are left to board support code
/// wrapping this type.
#[derive(Debug)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of a TWAI register block, e.g.
    /// [`ESP32_TWAI_BASE`], and at most one `Mmio` may exist for it.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }
}

impl Peripheral for Mmio {
    fn read(&mut self, reg: Register) -> u32 {
        // SAFETY: `new` guarantees a valid, exclusively owned register block
        unsafe { ptr::read_volatile((self.base + reg.offset()) as *const u32) }
    }

    fn write(&mut self, reg: Register, value: u32) {
        // SAFETY: `new` guarantees a valid, exclusively owned register block
        unsafe { ptr::write_volatile((self.base + reg.offset()) as *mut u32, value) }
    }
}

fn modify<R: Peripheral>(regs: &mut R, reg: Register, f: impl FnOnce(u32) -> u32) {
    let value = regs.read(reg);
    regs.write(reg, f(value));
}

/* Mode */

pub(crate) fn enter_reset_mode<R: Peripheral>(regs: &mut R) {
    modify(regs, Register::Mode, |mode| mode | MODE_RESET);
}

pub(crate) fn exit_reset_mode<R: Peripheral>(regs: &mut R) {
    modify(regs, Register::Mode, |mode| mode & !MODE_RESET);
}

pub(crate) fn is_in_reset_mode<R: Peripheral>(regs: &mut R) -> bool {
    regs.read(Register::Mode) & MODE_RESET != 0
}

/// Listen only: never acknowledges or transmits, which also freezes the
/// receive error counter.
pub(crate) fn set_listen_only<R: Peripheral>(regs: &mut R) {
    modify(regs, Register::Mode, |mode| {
        (mode | MODE_LISTEN_ONLY) & !MODE_SELF_TEST
    });
}

/* Clock divider */

pub(crate) fn enable_extended_reg_layout<R: Peripheral>(regs: &mut R) {
    modify(regs, Register::ClockDivider, |cd| cd | CLOCK_EXTENDED_LAYOUT);
}

pub(crate) fn disable_clock_out<R: Peripheral>(regs: &mut R) {
    modify(regs, Register::ClockDivider, |cd| {
        (cd & !CLOCK_DIVIDER_MASK) | CLOCK_OFF
    });
}

/* Error counters (reset mode only) */

pub(crate) fn set_rx_error_count<R: Peripheral>(regs: &mut R, count: u8) {
    regs.write(Register::RxErrorCounter, count as u32);
}

pub(crate) fn set_tx_error_count<R: Peripheral>(regs: &mut R, count: u8) {
    regs.write(Register::TxErrorCounter, count as u32);
}

pub(crate) fn set_error_warning_limit<R: Peripheral>(regs: &mut R, limit: u8) {
    regs.write(Register::ErrorWarningLimit, limit as u32);
}

/* Bus timing and acceptance filter (reset mode only) */

/// BTR0: sync jump width in bits 7..6, prescaler in bits 5..0. The ESP32
/// doubles the prescaler in hardware, so the field holds `brp / 2 - 1`.
/// BTR1: triple sampling in bit 7, segment 2 in bits 6..4, segment 1 in
/// bits 3..0.
pub(crate) fn set_bus_timing<R: Peripheral>(regs: &mut R, timing: &BusTiming) {
    let btr0 = ((timing.sjw as u32 - 1) & 0x3) << 6 | ((timing.brp / 2 - 1) & 0x3F);
    let btr1 = (timing.triple_sampling as u32) << 7
        | ((timing.tseg2 as u32 - 1) & 0x7) << 4
        | ((timing.tseg1 as u32 - 1) & 0xF);

    regs.write(Register::BusTiming0, btr0);
    regs.write(Register::BusTiming1, btr1);
}

/// Code and mask are written most significant byte first into the buffer
/// window.
pub(crate) fn set_acceptance_filter<R: Peripheral>(regs: &mut R, filter: &AcceptanceFilter) {
    for (n, (code, mask)) in filter
        .code
        .to_be_bytes()
        .into_iter()
        .zip(filter.mask.to_be_bytes())
        .enumerate()
    {
        regs.write(Register::Buffer(n as u8), code as u32);
        regs.write(Register::Buffer(n as u8 + 4), mask as u32);
    }

    modify(regs, Register::Mode, |mode| {
        if filter.single {
            mode | MODE_SINGLE_FILTER
        } else {
            mode & !MODE_SINGLE_FILTER
        }
    });
}

/* Interrupts */

pub(crate) fn set_enabled_interrupts<R: Peripheral>(regs: &mut R, interrupts: Interrupts) {
    regs.write(Register::InterruptEnable, interrupts.bits());
}

/// Reads the latched interrupt status, which clears it.
pub(crate) fn take_interrupts<R: Peripheral>(regs: &mut R) -> Interrupts {
    Interrupts::from_bits_truncate(regs.read(Register::Interrupt))
}

/* Receive */

/// Messages waiting in the receive FIFO.
pub(crate) fn rx_message_count<R: Peripheral>(regs: &mut R) -> u32 {
    regs.read(Register::RxMessageCount) & RX_MESSAGE_COUNT_MASK
}

pub(crate) fn rx_frame_info<R: Peripheral>(regs: &mut R) -> FrameInfo {
    FrameInfo::from_bits(regs.read(Register::Buffer(0)) as u8)
}

/// Standard identifier: bits 10..3 in buffer byte 1, bits 2..0 in the top of
/// buffer byte 2.
pub(crate) fn rx_standard_id<R: Peripheral>(regs: &mut R) -> u32 {
    let high = regs.read(Register::Buffer(1)) & 0xFF;
    let low = regs.read(Register::Buffer(2)) & 0xFF;
    (high << 3) | (low >> 5)
}

/// Payload byte `n` of a standard frame.
pub(crate) fn rx_data<R: Peripheral>(regs: &mut R, n: usize) -> u8 {
    regs.read(Register::Buffer(3 + n as u8)) as u8
}

/// Frees the oldest message in the receive FIFO. Skipping this stalls the
/// FIFO.
pub(crate) fn release_rx_buffer<R: Peripheral>(regs: &mut R) {
    regs.write(Register::Command, COMMAND_RELEASE_RX_BUFFER);
}
