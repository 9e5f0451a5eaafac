use heapless::spsc::{Consumer, Producer, Queue};

use crate::{Frame, QUEUE_STORAGE};

/// Fixed-capacity single-producer/single-consumer frame ring.
///
/// `S` is the number of storage slots; the queue holds `S - 1` frames. The
/// indices are atomics, so the producer half can be used from an interrupt
/// handler without a lock while the consumer half lives in a task.
pub struct FrameQueue<const S: usize = QUEUE_STORAGE> {
    queue: Queue<Frame, S>,
}

impl<const S: usize> FrameQueue<S> {
    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Appends `frame`. A full queue drops it and returns `false`.
    pub fn try_push(&mut self, frame: Frame) -> bool {
        self.queue.enqueue(frame).is_ok()
    }

    pub fn try_pop(&mut self) -> Option<Frame> {
        self.queue.dequeue()
    }

    /// Splits the queue into its interrupt side and its task side.
    pub fn split(&mut self) -> (FrameProducer<'_, S>, Receiver<'_, S>) {
        let (producer, consumer) = self.queue.split();
        (FrameProducer { producer }, Receiver { consumer })
    }
}

impl<const S: usize> Default for FrameQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer half, owned by the interrupt handler.
pub struct FrameProducer<'a, const S: usize> {
    producer: Producer<'a, Frame, S>,
}

impl<'a, const S: usize> FrameProducer<'a, S> {
    /// Appends `frame` without blocking. A full queue drops it and returns
    /// `false`.
    pub fn try_push(&mut self, frame: Frame) -> bool {
        self.producer.enqueue(frame).is_ok()
    }

    pub fn len(&self) -> usize {
        self.producer.len()
    }
}

/// Consumer half, owned by the task forwarding frames to the transport.
pub struct Receiver<'a, const S: usize> {
    consumer: Consumer<'a, Frame, S>,
}

impl<'a, const S: usize> Receiver<'a, S> {
    /// Takes the oldest frame, `None` if nothing is queued. Never waits.
    pub fn recv(&mut self) -> Option<Frame> {
        self.consumer.dequeue()
    }

    /// Frames currently queued. Advisory only: the interrupt handler may
    /// push right after this returns.
    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.consumer.capacity()
    }

    /// Discards everything queued and returns how many frames that was.
    pub fn clear(&mut self) -> usize {
        let mut discarded = 0;
        while self.consumer.dequeue().is_some() {
            discarded += 1;
        }
        discarded
    }
}
