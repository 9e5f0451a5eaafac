use crate::{stats::bump, Counters, Receiver};

/// Notification channel towards the telemetry application.
pub trait Sink {
    /// Whether a peer is subscribed. Nothing is drained from the queue while
    /// this is `false`.
    fn connected(&self) -> bool;

    /// Sends one frame notification. Must not block.
    fn send(&mut self, notification: &[u8]);
}

/// Drains the queue into `sink` while it stays connected, sending one
/// notification per frame. Returns the number of frames sent.
pub fn forward<T: Sink, const S: usize>(
    rx: &mut Receiver<'_, S>,
    sink: &mut T,
    counters: &Counters,
) -> usize {
    let mut sent = 0;

    while sink.connected() {
        let Some(frame) = rx.recv() else {
            break;
        };

        sink.send(&frame.notification());
        bump(&counters.forwarded);
        sent += 1;
    }

    if sent > 0 {
        trace!("Forwarded {} frames", sent);
    }
    sent
}
