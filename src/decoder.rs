use heapless::Vec;
use portable_atomic::{AtomicU16, Ordering};

use crate::{
    profile::RATE_DISABLED, AcceptanceFilter, BusTiming, Command, Profile, MAX_WATCHED,
};

/// One watched identifier.
///
/// `rate` is written by the control channel and read by the interrupt
/// handler, `count` is written by both. Relaxed loads and stores are enough:
/// a command racing an admission decision costs at most one extra or one
/// skipped frame for that identifier, and only within the instant the two
/// overlap.
#[derive(Debug)]
struct Entry {
    id: u32,
    rate: AtomicU16,
    count: AtomicU16,
}

/// Rate limiting identifier filter.
///
/// Keeps one sorted entry per watched identifier and forwards one out of
/// every `rate` frames of each, independently per identifier.
pub struct Decoder<P> {
    profile: P,
    entries: Vec<Entry, MAX_WATCHED>,
}

impl<P: Profile> Decoder<P> {
    /// Builds the table from the profile. Every entry starts disabled until
    /// the telemetry application asks for it.
    pub fn new(profile: P) -> Result<Self, ConfigError> {
        let watched = profile.watched();

        if watched.len() > MAX_WATCHED {
            return Err(ConfigError::TooManyIds(watched.len()));
        }

        // binary search needs strictly ascending identifiers
        if let Some(pair) = watched.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::NotAscending {
                previous: pair[0],
                id: pair[1],
            });
        }

        let mut entries = Vec::new();
        for &id in watched {
            entries
                .push(Entry {
                    id,
                    rate: AtomicU16::new(RATE_DISABLED),
                    count: AtomicU16::new(0),
                })
                .map_err(|_| ConfigError::TooManyIds(watched.len()))?;
        }

        Ok(Self { profile, entries })
    }

    pub fn profile(&self) -> &P {
        &self.profile
    }

    pub fn name(&self) -> &'static str {
        self.profile.name()
    }

    pub fn timing(&self) -> BusTiming {
        self.profile.timing()
    }

    pub fn filter(&self) -> AcceptanceFilter {
        self.profile.filter()
    }

    /// Watched identifiers, in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|entry| entry.id)
    }

    /// Current rate of `id`, `None` if it is not watched.
    pub fn rate(&self, id: u32) -> Option<u16> {
        self.find(id).map(|entry| entry.rate.load(Ordering::Relaxed))
    }

    /// Whether `id` is watched at all.
    pub fn can_decode(&self, id: u32) -> bool {
        self.find(id).is_some()
    }

    /// Admission test for one received frame of `id`. Called from the
    /// interrupt handler, so it never blocks.
    pub fn should_decode(&self, id: u32) -> bool {
        let Some(entry) = self.find(id) else {
            return false;
        };

        let rate = entry.rate.load(Ordering::Relaxed);
        if rate == RATE_DISABLED {
            return false;
        }

        let count = entry.count.load(Ordering::Relaxed).saturating_add(1);
        if count >= rate {
            entry.count.store(0, Ordering::Relaxed);
            true
        } else {
            entry.count.store(count, Ordering::Relaxed);
            false
        }
    }

    pub fn deny_all(&self) {
        for entry in &self.entries {
            entry.rate.store(RATE_DISABLED, Ordering::Relaxed);
        }
    }

    pub fn allow_all(&self) {
        for entry in &self.entries {
            self.allow(entry);
        }
    }

    /// Restores the profile rate of `id`. Unwatched identifiers are ignored.
    pub fn allow_id(&self, id: u32) {
        if let Some(entry) = self.find(id) {
            self.allow(entry);
        }
    }

    pub fn apply(&self, command: Command) {
        match command {
            Command::DenyAll => {
                trace!("ID request DENY all");
                self.deny_all();
            }
            Command::AllowAll { interval_ms } => {
                trace!("ID request ALLOW all INTERVAL {} ms", interval_ms);
                self.allow_all();
            }
            Command::AllowId { interval_ms, id } => {
                trace!("ID request ALLOW ID {} INTERVAL {} ms", id, interval_ms);
                self.allow_id(id);
            }
        }
    }

    /// Handles a request written to the control channel. Malformed requests
    /// are logged and leave the table untouched.
    pub fn handle_request(&self, request: &[u8]) {
        match Command::from_bytes(request) {
            Ok(command) => {
                debug!("ID request CMD {} LEN {}", request[0], request.len());
                self.apply(command);
            }
            Err(e) => warn!("ID request ignored: {}", e),
        }
    }

    fn allow(&self, entry: &Entry) {
        entry.count.store(0, Ordering::Relaxed);
        entry
            .rate
            .store(self.profile.rate(entry.id), Ordering::Relaxed);
    }

    fn find(&self, id: u32) -> Option<&Entry> {
        self.entries
            .binary_search_by_key(&id, |entry| entry.id)
            .ok()
            .map(|idx| &self.entries[idx])
    }
}

/// Errors in a vehicle profile's watched-identifier table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("Watched identifiers must be strictly ascending ({previous:?} followed by {id:?})")]
    NotAscending { previous: u32, id: u32 },
    #[error("Profile watches ({0:?}) identifiers, more than the table holds")]
    TooManyIds(usize),
}
