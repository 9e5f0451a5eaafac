use portable_atomic::{AtomicU32, Ordering};

use crate::STATS_PERIOD_US;

/// Event counters shared by the interrupt handler and the task side.
///
/// Counting is relaxed; a report may attribute an event to the neighbouring
/// period.
#[derive(Debug, Default)]
pub struct Counters {
    pub(crate) interrupts: AtomicU32,
    pub(crate) errors: AtomicU32,
    pub(crate) received: AtomicU32,
    pub(crate) admitted: AtomicU32,
    pub(crate) dropped: AtomicU32,
    pub(crate) forwarded: AtomicU32,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            interrupts: AtomicU32::new(0),
            errors: AtomicU32::new(0),
            received: AtomicU32::new(0),
            admitted: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            forwarded: AtomicU32::new(0),
        }
    }

    /// Reads the counters without resetting them.
    pub fn peek(&self) -> Snapshot {
        Snapshot {
            interrupts: self.interrupts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
        }
    }

    /// Reads and resets every counter. Each counter is swapped atomically,
    /// so no event is lost between two calls.
    pub fn take(&self) -> Snapshot {
        Snapshot {
            interrupts: self.interrupts.swap(0, Ordering::Relaxed),
            errors: self.errors.swap(0, Ordering::Relaxed),
            received: self.received.swap(0, Ordering::Relaxed),
            admitted: self.admitted.swap(0, Ordering::Relaxed),
            dropped: self.dropped.swap(0, Ordering::Relaxed),
            forwarded: self.forwarded.swap(0, Ordering::Relaxed),
        }
    }
}

pub(crate) fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Snapshot {
    /// Interrupt handler invocations
    pub interrupts: u32,
    /// Interrupts carrying an error condition
    pub errors: u32,
    /// Messages read out of the receive FIFO
    pub received: u32,
    /// Frames that passed the decoder, queued or dropped
    pub admitted: u32,
    /// Admitted frames lost to a full queue
    pub dropped: u32,
    /// Frames handed to the transport
    pub forwarded: u32,
}

/// Free running microsecond clock.
pub trait Monotonic {
    fn now_us(&self) -> u64;
}

/// Fires once every `timeout` microseconds of a wrapping clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    start: u64,
}

impl Interval {
    pub const fn new(now: u64) -> Self {
        Self { start: now }
    }

    /// Returns the time since the last firing and restarts the interval once
    /// at least `timeout` has passed.
    pub fn elapsed(&mut self, now: u64, timeout: u64) -> Option<u64> {
        let delta = now.wrapping_sub(self.start);
        if delta >= timeout {
            self.start = now;
            Some(delta)
        } else {
            None
        }
    }
}

/// One statistics period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Report {
    pub elapsed_us: u64,
    pub counts: Snapshot,
    /// Frames waiting in the queue at the time of the report
    pub queued: usize,
    pub capacity: usize,
}

impl Report {
    /// `count` events over this period, per second.
    pub fn per_second(&self, count: u32) -> f32 {
        if self.elapsed_us == 0 {
            return 0.0;
        }
        count as f32 * 1_000_000.0 / self.elapsed_us as f32
    }

    fn log(&self) {
        info!("Interrupts: {}/s", self.per_second(self.counts.interrupts));
        info!("    Errors: {}/s", self.per_second(self.counts.errors));
        info!("  Received: {}/s", self.per_second(self.counts.received));
        info!("  Admitted: {}/s", self.per_second(self.counts.admitted));
        info!(" Forwarded: {}/s", self.per_second(self.counts.forwarded));
        if self.counts.dropped > 0 {
            warn!("   Dropped: {} frames", self.counts.dropped);
        }
        info!(
            "     Queue: {} waiting, {} available",
            self.queued,
            self.capacity - self.queued.min(self.capacity)
        );
    }
}

/// Periodic statistics logger, polled from the task side.
pub struct Reporter<C> {
    clock: C,
    interval: Interval,
    period_us: u64,
}

impl<C: Monotonic> Reporter<C> {
    /// Reports every [`STATS_PERIOD_US`].
    pub fn new(clock: C) -> Self {
        Self::with_period(clock, STATS_PERIOD_US)
    }

    pub fn with_period(clock: C, period_us: u64) -> Self {
        let interval = Interval::new(clock.now_us());
        Self {
            clock,
            interval,
            period_us,
        }
    }

    /// Once a period has passed, resets `counters`, logs the rates and
    /// returns them.
    pub fn poll(&mut self, counters: &Counters, queued: usize, capacity: usize) -> Option<Report> {
        let elapsed_us = self
            .interval
            .elapsed(self.clock.now_us(), self.period_us)?;

        let report = Report {
            elapsed_us,
            counts: counters.take(),
            queued,
            capacity,
        };
        report.log();
        Some(report)
    }
}
