use core::cell::RefCell;

use critical_section::Mutex;
use portable_atomic::{AtomicBool, Ordering};

use crate::{
    regs::{self, Interrupts, Peripheral},
    stats::bump,
    Counters, Decoder, Frame, FrameFormat, FrameProducer, FrameQueue, FrameRtr, Profile,
    Receiver, TimingError, ERROR_WARNING_LIMIT, QUEUE_STORAGE,
};

/// Lifecycle of the controller.
///
/// ```text
///   Uninstalled --install--> Installed --start--> Running --stop--> Stopped
///        ^                                           ^                 |
///        +----------------- uninstall ---------------+------ start ----+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Uninstalled,
    Installed,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error("The peripheral did not enter reset mode")]
    ResetMode,
    #[error("Invalid bus timing: {0}")]
    InvalidTiming(#[from] TimingError),
    #[error("Operation not allowed in the {0:?} state")]
    InvalidState(State),
}

struct Inner<'a, R, const S: usize> {
    regs: R,
    state: State,
    producer: Option<FrameProducer<'a, S>>,
}

/// Receive-only, listen-only CAN controller.
///
/// Owns the peripheral and the producer half of the frame queue. Everything
/// touching either runs inside a critical section, shared between the task
/// side and [`Controller::on_interrupt`].
pub struct Controller<'a, R, P, const S: usize = QUEUE_STORAGE> {
    decoder: &'a Decoder<P>,
    inner: Mutex<RefCell<Inner<'a, R, S>>>,
    running: AtomicBool,
    counters: Counters,
}

impl<'a, R: Peripheral, P: Profile, const S: usize> Controller<'a, R, P, S> {
    pub const fn new(regs: R, decoder: &'a Decoder<P>) -> Self {
        Self {
            decoder,
            inner: Mutex::new(RefCell::new(Inner {
                regs,
                state: State::Uninstalled,
                producer: None,
            })),
            running: AtomicBool::new(false),
            counters: Counters::new(),
        }
    }

    /// Configures the peripheral from the decoder's profile and takes the
    /// producer half of `queue`. The peripheral is left in reset mode, so no
    /// frame is received until [`Controller::start`].
    pub fn install(&self, queue: &'a mut FrameQueue<S>) -> Result<Receiver<'a, S>, Error> {
        info!("CAN bus starting with {}...", self.decoder.name());

        let timing = self.decoder.timing();
        let filter = self.decoder.filter();
        timing.validate()?;

        let (producer, receiver) = queue.split();

        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if inner.state != State::Uninstalled {
                return Err(Error::InvalidState(inner.state));
            }

            let regs = &mut inner.regs;
            regs.reset_module();

            regs::enter_reset_mode(regs);
            if !regs::is_in_reset_mode(regs) {
                return Err(Error::ResetMode);
            }

            regs::enable_extended_reg_layout(regs);
            regs::set_listen_only(regs);
            regs::set_rx_error_count(regs, 0);
            regs::set_tx_error_count(regs, 0);
            regs::set_error_warning_limit(regs, ERROR_WARNING_LIMIT);
            regs::set_bus_timing(regs, &timing);
            regs::set_acceptance_filter(regs, &filter);
            regs::disable_clock_out(regs);
            regs::set_enabled_interrupts(regs, Interrupts::ENABLED);
            regs::take_interrupts(regs);

            inner.producer = Some(producer);
            inner.state = State::Installed;
            Ok(())
        })
        .inspect_err(|e| error!("CAN bus install failed: {}", e))?;

        debug!(
            "CAN bus timing: BRP {} TSEG1 {} TSEG2 {} SJW {} ({} bit/s)",
            timing.brp,
            timing.tseg1,
            timing.tseg2,
            timing.sjw,
            timing.bit_rate().unwrap_or(0)
        );
        debug!(
            "CAN bus filter: code {:#x} mask {:#x} single {}",
            filter.code,
            filter.mask,
            filter.single
        );

        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            inner.regs.configure_rx_pin();
            inner.regs.enable_interrupt();
        });
        debug!("CAN bus interrupt handler installed");

        Ok(receiver)
    }

    /// Discards anything queued, clears latched interrupts and leaves reset
    /// mode.
    pub fn start(&self, rx: &mut Receiver<'a, S>) -> Result<(), Error> {
        let discarded = critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            match inner.state {
                State::Installed | State::Stopped => {}
                state => return Err(Error::InvalidState(state)),
            }

            let discarded = rx.clear();
            regs::take_interrupts(&mut inner.regs);
            self.running.store(true, Ordering::Relaxed);
            regs::exit_reset_mode(&mut inner.regs);
            inner.state = State::Running;
            Ok(discarded)
        })?;

        if discarded > 0 {
            debug!("CAN bus start discarded {} stale frames", discarded);
        }
        info!("CAN bus started!");
        Ok(())
    }

    /// Marks the controller stopped. The peripheral keeps receiving; frames
    /// keep flowing through the queue until [`Controller::uninstall`].
    pub fn stop(&self) -> Result<(), Error> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if inner.state != State::Running {
                return Err(Error::InvalidState(inner.state));
            }
            inner.state = State::Stopped;
            Ok(())
        })?;

        info!("CAN bus stopped");
        Ok(())
    }

    /// Masks the interrupt, puts the peripheral back into reset mode and
    /// releases the queue.
    pub fn uninstall(&self, rx: Receiver<'a, S>) -> Result<(), Error> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if inner.state == State::Uninstalled {
                return Err(Error::InvalidState(inner.state));
            }

            inner.regs.disable_interrupt();
            regs::enter_reset_mode(&mut inner.regs);
            inner.producer = None;
            inner.state = State::Uninstalled;
            self.running.store(false, Ordering::Relaxed);
            Ok(())
        })?;
        drop(rx);

        info!("CAN bus uninstalled");
        Ok(())
    }

    /// Interrupt handler body. Drains the receive FIFO into the queue and
    /// returns `true` if at least one frame was queued, in which case the
    /// caller should wake the task owning the [`Receiver`].
    pub fn on_interrupt(&self) -> bool {
        critical_section::with(|cs| {
            bump(&self.counters.interrupts);

            let mut inner = self.inner.borrow_ref_mut(cs);
            let Inner { regs, producer, .. } = &mut *inner;

            let pending = regs::take_interrupts(regs);

            if pending.contains(Interrupts::RECEIVE) {
                let mut woken = false;

                for _ in 0..regs::rx_message_count(regs) {
                    bump(&self.counters.received);

                    if let Some(frame) = self.capture(regs) {
                        bump(&self.counters.admitted);
                        if producer.as_mut().is_some_and(|p| p.try_push(frame)) {
                            woken = true;
                        } else {
                            bump(&self.counters.dropped);
                        }
                    }

                    regs::release_rx_buffer(regs);
                }

                woken
            } else {
                if pending.intersects(Interrupts::ERRORS) {
                    bump(&self.counters.errors);
                }
                false
            }
        })
    }

    /// Reads the message at the head of the receive FIFO if the decoder
    /// wants it. Remote and extended frames are skipped.
    fn capture(&self, regs: &mut R) -> Option<Frame> {
        let info = regs::rx_frame_info(regs);

        if info.rtr() == FrameRtr::Remote || info.format() == FrameFormat::Extended {
            return None;
        }

        let id = regs::rx_standard_id(regs);
        if !self.decoder.should_decode(id) {
            return None;
        }

        let mut data = [0u8; 8];
        for (n, byte) in data[..info.data_len()].iter_mut().enumerate() {
            *byte = regs::rx_data(regs, n);
        }

        Some(Frame::from_parts(info, id, data))
    }

    pub fn state(&self) -> State {
        critical_section::with(|cs| self.inner.borrow_ref(cs).state)
    }

    /// Set by [`Controller::start`], cleared by [`Controller::uninstall`].
    pub fn running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn decoder(&self) -> &'a Decoder<P> {
        self.decoder
    }

    /// Runs `f` with exclusive access to the peripheral, e.g. to read the
    /// error counters.
    pub fn with_peripheral<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs).regs))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        sim::{SimTwai, Watch},
        BmwG8x, BusTiming, Controller, Decoder, Error, FrameQueue, Interrupts, Peripheral,
        Profile, Register, State,
    };

    struct BadTiming;

    impl Profile for BadTiming {
        fn name(&self) -> &'static str {
            "bad"
        }

        fn timing(&self) -> BusTiming {
            BusTiming {
                brp: 3,
                ..BusTiming::KBITS_500
            }
        }

        fn watched(&self) -> &'static [u32] {
            &[]
        }

        fn rate(&self, _id: u32) -> u16 {
            1
        }
    }

    #[test]
    fn install_configures_peripheral() {
        let decoder = Decoder::new(BmwG8x).unwrap();
        let mut queue: FrameQueue = FrameQueue::new();
        let controller = Controller::new(SimTwai::new(), &decoder);

        assert_eq!(controller.state(), State::Uninstalled);
        let _rx = controller.install(&mut queue).unwrap();
        assert_eq!(controller.state(), State::Installed);
        assert!(!controller.running());

        controller.with_peripheral(|sim| {
            assert_eq!(sim.module_resets, 1);
            assert!(sim.in_reset_mode());
            assert!(sim.rx_pin_configured);
            assert!(sim.interrupt_line);

            // listen only, dual filter
            assert_eq!(sim.read(Register::Mode), 0x03);
            // extended layout, clock out off
            assert_eq!(sim.read(Register::ClockDivider), 0x88);
            assert_eq!(sim.read(Register::InterruptEnable), 0xA5);
            assert_eq!(sim.read(Register::ErrorWarningLimit), 96);
            assert_eq!(sim.read(Register::BusTiming0), 0x83);
            assert_eq!(sim.read(Register::BusTiming1), 0x3E);

            let mask = !((0x400u32 << 21) | (0x7FF << 5));
            for (n, byte) in mask.to_be_bytes().into_iter().enumerate() {
                assert_eq!(sim.read(Register::Buffer(n as u8)), 0);
                assert_eq!(sim.read(Register::Buffer(n as u8 + 4)), byte as u32);
            }

            // nothing is received before start
            assert!(!sim.receive_standard(0x0A5, &[1]));
        });
    }

    #[test]
    fn stuck_reset_mode() {
        let decoder = Decoder::new(BmwG8x).unwrap();
        let mut queue: FrameQueue = FrameQueue::new();
        let mut sim = SimTwai::new();
        sim.stuck = true;
        let controller = Controller::new(sim, &decoder);

        assert_eq!(controller.install(&mut queue).err(), Some(Error::ResetMode));
        assert_eq!(controller.state(), State::Uninstalled);
        controller.with_peripheral(|sim| {
            assert!(!sim.interrupt_line);
            assert!(!sim.rx_pin_configured);
        });
    }

    #[test]
    fn invalid_timing() {
        let decoder = Decoder::new(BadTiming).unwrap();
        let mut queue: FrameQueue = FrameQueue::new();
        let controller = Controller::new(SimTwai::new(), &decoder);

        assert!(matches!(
            controller.install(&mut queue),
            Err(Error::InvalidTiming(_))
        ));
        controller.with_peripheral(|sim| assert_eq!(sim.module_resets, 0));
    }

    #[test]
    fn lifecycle() {
        let decoder = Decoder::new(Watch(&[0x1F1], 1)).unwrap();
        decoder.allow_all();
        let mut queue: FrameQueue = FrameQueue::new();
        let controller = Controller::new(SimTwai::new(), &decoder);

        assert_eq!(controller.stop(), Err(Error::InvalidState(State::Uninstalled)));

        let mut rx = controller.install(&mut queue).unwrap();
        assert_eq!(controller.stop(), Err(Error::InvalidState(State::Installed)));

        controller.start(&mut rx).unwrap();
        assert_eq!(controller.state(), State::Running);
        assert!(controller.running());
        assert_eq!(
            controller.start(&mut rx),
            Err(Error::InvalidState(State::Running))
        );

        // stop leaves the peripheral receiving
        controller.stop().unwrap();
        assert_eq!(controller.state(), State::Stopped);
        assert!(controller.running());
        controller.with_peripheral(|sim| assert!(sim.receive_standard(0x1F1, &[1])));
        assert!(controller.on_interrupt());
        assert_eq!(rx.len(), 1);

        // restarting discards what was queued
        controller.start(&mut rx).unwrap();
        assert!(rx.is_empty());

        controller.uninstall(rx).unwrap();
        assert_eq!(controller.state(), State::Uninstalled);
        assert!(!controller.running());
        controller.with_peripheral(|sim| {
            assert!(sim.in_reset_mode());
            assert!(!sim.interrupt_line);
        });
    }

    #[test]
    fn start_clears_latched_interrupts() {
        let decoder = Decoder::new(Watch(&[0x1F1], 1)).unwrap();
        let mut queue: FrameQueue = FrameQueue::new();
        let controller = Controller::new(SimTwai::new(), &decoder);

        let mut rx = controller.install(&mut queue).unwrap();
        controller.with_peripheral(|sim| sim.raise(Interrupts::BUS_ERROR));
        controller.start(&mut rx).unwrap();

        assert!(!controller.on_interrupt());
        let counts = controller.counters().take();
        assert_eq!(counts.interrupts, 1);
        assert_eq!(counts.errors, 0);
    }

    #[test]
    fn decimated_stream() {
        let decoder = Decoder::new(BmwG8x).unwrap();
        decoder.allow_all();
        let mut queue: FrameQueue = FrameQueue::new();
        let controller = Controller::new(SimTwai::new(), &decoder);

        let mut rx = controller.install(&mut queue).unwrap();
        controller.start(&mut rx).unwrap();

        let mut received = 0;
        for n in 0..9u8 {
            controller.with_peripheral(|sim| sim.receive_standard(0x0A5, &[n, 0xEE]));
            controller.on_interrupt();
            while let Some(frame) = rx.recv() {
                assert_eq!(frame.raw_id(), 0x0A5);
                assert_eq!(frame.payload(), &[n, 0xEE]);
                assert_eq!(n % 3, 2);
                received += 1;
            }
        }
        assert_eq!(received, 3);

        let counts = controller.counters().take();
        assert_eq!(counts.interrupts, 9);
        assert_eq!(counts.received, 9);
        assert_eq!(counts.admitted, 3);
        assert_eq!(counts.dropped, 0);
    }

    #[test]
    fn only_watched_standard_frames_pass() {
        let decoder = Decoder::new(Watch(&[0x0A5], 3)).unwrap();
        decoder.allow_all();
        let mut queue: FrameQueue = FrameQueue::new();
        let controller = Controller::new(SimTwai::new(), &decoder);

        let mut rx = controller.install(&mut queue).unwrap();
        controller.start(&mut rx).unwrap();

        for n in 1..=3u8 {
            controller.with_peripheral(|sim| sim.receive_standard(0x0A5, &[n]));
            assert_eq!(controller.on_interrupt(), n == 3);
        }
        assert_eq!(rx.recv().unwrap().payload(), &[3]);

        controller.with_peripheral(|sim| sim.receive_standard(0x123, &[]));
        assert!(!controller.on_interrupt());

        // two hits counted, an extended frame must not complete the cycle
        for _ in 0..2 {
            controller.with_peripheral(|sim| sim.receive_standard(0x0A5, &[]));
            controller.on_interrupt();
        }
        controller.with_peripheral(|sim| sim.receive_extended(0x0A5, &[0xEE]));
        assert!(!controller.on_interrupt());
        assert_eq!(rx.recv(), None);

        controller.with_peripheral(|sim| sim.receive_standard(0x0A5, &[0x55]));
        assert!(controller.on_interrupt());
        assert_eq!(rx.recv().unwrap().payload(), &[0x55]);
    }

    #[test]
    fn skipped_messages_are_released() {
        let decoder = Decoder::new(Watch(&[0x100, 0x200], 1)).unwrap();
        decoder.allow_id(0x200);
        let mut queue: FrameQueue = FrameQueue::new();
        let controller = Controller::new(SimTwai::new(), &decoder);

        let mut rx = controller.install(&mut queue).unwrap();
        controller.start(&mut rx).unwrap();

        controller.with_peripheral(|sim| {
            assert!(sim.receive_remote(0x200, 4));
            assert!(sim.receive_extended(0x200, &[1, 2]));
            assert!(sim.receive_standard(0x100, &[3]));
            assert!(sim.receive_standard(0x300, &[4]));
            assert!(sim.receive_raw([0x0F, 0x40, 0x00, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10]));
        });

        assert!(controller.on_interrupt());
        controller.with_peripheral(|sim| assert_eq!(sim.pending(), 0));

        // only the last message passes, its DLC of 15 capped to 8 bytes
        let frame = rx.recv().unwrap();
        assert_eq!(frame.raw_id(), 0x200);
        assert_eq!(frame.info().dlc(), 8);
        assert_eq!(frame.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(rx.recv(), None);

        let counts = controller.counters().take();
        assert_eq!(counts.received, 5);
        assert_eq!(counts.admitted, 1);
    }

    #[test]
    fn error_interrupts_counted() {
        let decoder = Decoder::new(Watch(&[0x1F1], 1)).unwrap();
        let mut queue: FrameQueue = FrameQueue::new();
        let controller = Controller::new(SimTwai::new(), &decoder);

        let mut rx = controller.install(&mut queue).unwrap();
        controller.start(&mut rx).unwrap();

        for interrupts in [
            Interrupts::ERROR_WARNING,
            Interrupts::ERROR_PASSIVE,
            Interrupts::ARBITRATION_LOST,
            Interrupts::BUS_ERROR | Interrupts::ERROR_PASSIVE,
            Interrupts::WAKE_UP,
        ] {
            controller.with_peripheral(|sim| sim.raise(interrupts));
            assert!(!controller.on_interrupt());
        }

        let counts = controller.counters().take();
        assert_eq!(counts.interrupts, 5);
        assert_eq!(counts.errors, 4);
    }

    #[test]
    fn receive_takes_precedence_over_errors() {
        let decoder = Decoder::new(Watch(&[0x1F1], 1)).unwrap();
        decoder.allow_all();
        let mut queue: FrameQueue = FrameQueue::new();
        let controller = Controller::new(SimTwai::new(), &decoder);

        let mut rx = controller.install(&mut queue).unwrap();
        controller.start(&mut rx).unwrap();

        controller.with_peripheral(|sim| {
            assert!(sim.receive_standard(0x1F1, &[0x42]));
            sim.raise(Interrupts::BUS_ERROR);
        });
        assert!(controller.on_interrupt());
        assert_eq!(rx.recv().unwrap().payload(), &[0x42]);

        let counts = controller.counters().take();
        assert_eq!(counts.errors, 0);
        assert_eq!(counts.admitted, 1);
    }

    #[test]
    fn full_queue_drops() {
        let decoder = Decoder::new(Watch(&[0x1F1], 1)).unwrap();
        decoder.allow_all();
        let mut queue = FrameQueue::<3>::new();
        let controller = Controller::new(SimTwai::new(), &decoder);

        let mut rx = controller.install(&mut queue).unwrap();
        controller.start(&mut rx).unwrap();

        controller.with_peripheral(|sim| {
            for n in 0..4 {
                assert!(sim.receive_standard(0x1F1, &[n]));
            }
        });
        assert!(controller.on_interrupt());

        assert_eq!(rx.recv().unwrap().payload(), &[0]);
        assert_eq!(rx.recv().unwrap().payload(), &[1]);
        assert_eq!(rx.recv(), None);

        let counts = controller.counters().take();
        assert_eq!(counts.admitted, 4);
        assert_eq!(counts.dropped, 2);

        // nothing admitted, nothing to wake for
        controller.with_peripheral(|sim| sim.receive_standard(0x123, &[]));
        assert!(!controller.on_interrupt());
    }
}
