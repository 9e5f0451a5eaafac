//! Register level model of the TWAI peripheral for host tests.

use heapless::Deque;

use crate::{BusTiming, Interrupts, Peripheral, Profile, Register, FRAME_SIZE};

const MODE_RESET: u32 = 1 << 0;
const COMMAND_RELEASE_RX_BUFFER: u32 = 1 << 2;

/// Hardware receive FIFO depth, in messages.
const FIFO_DEPTH: usize = 16;

pub struct SimTwai {
    mode: u32,
    interrupt_enable: u32,
    bus_timing: [u32; 2],
    error_warning_limit: u32,
    rx_error_counter: u32,
    tx_error_counter: u32,
    clock_divider: u32,
    acceptance: [u32; 8],
    latched: u32,
    fifo: Deque<[u8; FRAME_SIZE], FIFO_DEPTH>,
    /// Reset mode requests are ignored.
    pub stuck: bool,
    pub module_resets: u32,
    pub rx_pin_configured: bool,
    pub interrupt_line: bool,
}

impl SimTwai {
    /// Comes up in reset mode with the basic register layout, as after a
    /// hardware reset.
    pub fn new() -> Self {
        Self {
            mode: MODE_RESET,
            interrupt_enable: 0,
            bus_timing: [0; 2],
            error_warning_limit: 0,
            rx_error_counter: 0,
            tx_error_counter: 0,
            clock_divider: 0,
            acceptance: [0; 8],
            latched: 0,
            fifo: Deque::new(),
            stuck: false,
            module_resets: 0,
            rx_pin_configured: false,
            interrupt_line: false,
        }
    }

    pub fn in_reset_mode(&self) -> bool {
        self.mode & MODE_RESET != 0
    }

    /// Messages still in the receive FIFO.
    pub fn pending(&self) -> usize {
        self.fifo.len()
    }

    pub fn raise(&mut self, interrupts: Interrupts) {
        self.latched |= interrupts.bits();
    }

    /// Puts a raw message into the receive FIFO and latches the receive
    /// interrupt. Nothing is received in reset mode or with a full FIFO.
    pub fn receive_raw(&mut self, message: [u8; FRAME_SIZE]) -> bool {
        if self.in_reset_mode() || self.fifo.push_back(message).is_err() {
            return false;
        }
        self.raise(Interrupts::RECEIVE);
        true
    }

    pub fn receive_standard(&mut self, id: u16, data: &[u8]) -> bool {
        let mut message = [0u8; FRAME_SIZE];
        message[0] = data.len() as u8;
        message[1] = (id >> 3) as u8;
        message[2] = (id << 5) as u8;
        message[3..3 + data.len()].copy_from_slice(data);
        self.receive_raw(message)
    }

    pub fn receive_extended(&mut self, id: u32, data: &[u8]) -> bool {
        let mut message = [0u8; FRAME_SIZE];
        message[0] = 0x80 | data.len() as u8;
        message[1..5].copy_from_slice(&(id << 3).to_be_bytes());
        message[5..5 + data.len()].copy_from_slice(data);
        self.receive_raw(message)
    }

    pub fn receive_remote(&mut self, id: u16, dlc: u8) -> bool {
        let mut message = [0u8; FRAME_SIZE];
        message[0] = 0x40 | dlc;
        message[1] = (id >> 3) as u8;
        message[2] = (id << 5) as u8;
        self.receive_raw(message)
    }
}

impl Peripheral for SimTwai {
    fn read(&mut self, reg: Register) -> u32 {
        match reg {
            Register::Mode => self.mode,
            Register::Interrupt => core::mem::take(&mut self.latched),
            Register::InterruptEnable => self.interrupt_enable,
            Register::BusTiming0 => self.bus_timing[0],
            Register::BusTiming1 => self.bus_timing[1],
            Register::ErrorWarningLimit => self.error_warning_limit,
            Register::RxErrorCounter => self.rx_error_counter,
            Register::TxErrorCounter => self.tx_error_counter,
            Register::Buffer(n) if self.in_reset_mode() && n < 8 => self.acceptance[n as usize],
            Register::Buffer(n) => self
                .fifo
                .front()
                .and_then(|message| message.get(n as usize))
                .map_or(0, |&byte| byte as u32),
            Register::RxMessageCount => self.fifo.len() as u32,
            Register::ClockDivider => self.clock_divider,
            Register::Command | Register::Status => 0,
        }
    }

    fn write(&mut self, reg: Register, value: u32) {
        let value = value & 0xFF;
        match reg {
            Register::Mode if self.stuck => self.mode = value & !MODE_RESET,
            Register::Mode => self.mode = value,
            Register::Command => {
                if value & COMMAND_RELEASE_RX_BUFFER != 0 {
                    self.fifo.pop_front();
                }
            }
            Register::InterruptEnable => self.interrupt_enable = value,
            Register::BusTiming0 => self.bus_timing[0] = value,
            Register::BusTiming1 => self.bus_timing[1] = value,
            Register::ErrorWarningLimit => self.error_warning_limit = value,
            Register::RxErrorCounter => self.rx_error_counter = value,
            Register::TxErrorCounter => self.tx_error_counter = value,
            Register::Buffer(n) if self.in_reset_mode() && n < 8 => {
                self.acceptance[n as usize] = value
            }
            Register::ClockDivider => self.clock_divider = value,
            Register::Buffer(_) | Register::Interrupt | Register::Status | Register::RxMessageCount => {}
        }
    }

    fn reset_module(&mut self) {
        self.module_resets += 1;
    }

    fn configure_rx_pin(&mut self) {
        self.rx_pin_configured = true;
    }

    fn enable_interrupt(&mut self) {
        self.interrupt_line = true;
    }

    fn disable_interrupt(&mut self) {
        self.interrupt_line = false;
    }
}

/// Profile watching a fixed table at one rate.
pub struct Watch(pub &'static [u32], pub u16);

impl Profile for Watch {
    fn name(&self) -> &'static str {
        "test"
    }

    fn timing(&self) -> BusTiming {
        BusTiming::KBITS_500
    }

    fn watched(&self) -> &'static [u32] {
        self.0
    }

    fn rate(&self, _id: u32) -> u16 {
        self.1
    }
}
