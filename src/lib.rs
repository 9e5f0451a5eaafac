#![no_std]

//! Passive CAN bus tap for lap timing telemetry.
//!
//! A listen-only TWAI controller receives standard frames, a per-identifier
//! [`Decoder`] keeps one out of every N frames of the identifiers a vehicle
//! [`Profile`] watches, and the survivors travel through a fixed-size
//! [`FrameQueue`] from the interrupt handler to a task that [`forward`]s them
//! as notifications to the telemetry application.

// This mod MUST go first, so that the others see its macros.
mod fmt;

mod command;
mod config;
mod controller;
mod decoder;
mod frame;
mod profile;
mod queue;
mod regs;
mod stats;
mod transport;

#[cfg(test)]
mod sim;

pub use command::*;
pub use config::*;
pub use controller::*;
pub use decoder::*;
pub use frame::*;
pub use profile::*;
pub use queue::*;
pub use regs::{Interrupts, Mmio, Peripheral, Register, ESP32_TWAI_BASE};
pub use stats::*;
pub use transport::*;

pub use embedded_can::{Id, StandardId};
