use sha2::{Digest, Sha256};
use tokio::time::{Duration, Instant};

use crate::remote::RowSet;
use crate::space::Space;

/// The full local set as it is pushed: every visible row, sorted by id so
/// the hash is stable. Parked remote drafts belong to their own session and
/// are not included.
pub fn payload(space: &Space) -> RowSet {
    let snapshot = space.snapshot();
    RowSet {
        thoughts: snapshot.thoughts,
        chains: snapshot.chains,
        links: snapshot.links,
    }
}

/// Hex SHA-256 of the payload's JSON encoding.
pub fn payload_hash(rows: &RowSet) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(rows).unwrap_or_default());
    hex::encode(hasher.finalize())
}

/// What the debouncer wants done right now.
#[derive(Debug, PartialEq)]
pub enum Fire {
    /// Nothing changed since the last successful push.
    Skip,
    /// A push is in flight; this one runs when it lands.
    Queued,
    Push { rows: RowSet, hash: String },
}

/// Debounce and coalescing state: at most one push in flight plus one
/// pending behind it.
#[derive(Debug)]
pub struct Outbound {
    debounce: Duration,
    deadline: Option<Instant>,
    in_flight: bool,
    pending: bool,
    last_synced_hash: Option<String>,
}

impl Outbound {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            deadline: None,
            in_flight: false,
            pending: false,
            last_synced_hash: None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn is_idle(&self) -> bool {
        !self.in_flight && !self.pending && self.deadline.is_none()
    }

    /// A local mutation happened: restart the quiet period. A forced push
    /// that has not fired yet is not pushed back.
    pub fn touch(&mut self) {
        let now = Instant::now();
        self.deadline = match self.deadline {
            Some(due) if due <= now => Some(due),
            _ => Some(now + self.debounce),
        };
    }

    /// Skip the quiet period.
    pub fn force(&mut self) {
        self.deadline = Some(Instant::now());
    }

    /// The deadline passed (or a flush asked): decide whether to push.
    pub fn fire(&mut self, space: &Space) -> Fire {
        self.deadline = None;
        if self.in_flight {
            self.pending = true;
            return Fire::Queued;
        }

        let rows = payload(space);
        let hash = payload_hash(&rows);
        if self.last_synced_hash.as_deref() == Some(hash.as_str()) {
            return Fire::Skip;
        }
        self.in_flight = true;
        Fire::Push { rows, hash }
    }

    /// A push finished. Returns whether a queued push should run now.
    pub fn landed(&mut self, hash: Option<String>) -> bool {
        self.in_flight = false;
        if let Some(hash) = hash {
            self.last_synced_hash = Some(hash);
        }
        std::mem::take(&mut self.pending)
    }
}
