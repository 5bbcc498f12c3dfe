// ABOUTME: Eviction policy — drops the oldest turns while a session exceeds its byte budget.
// ABOUTME: Size is measured by an explicit strategy: full JSON encoding or summed raw lengths.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::session::types::{Session, Turn};

/// Eviction never shrinks history below one full user/assistant pair.
pub const MIN_RETAINED_TURNS: usize = 2;

/// Default base budget before the multiplier is applied.
pub const DEFAULT_MAX_SIZE_BYTES: usize = 128_000;

/// Default budget multiplier.
pub const DEFAULT_BUDGET_MULTIPLIER: usize = 5;

/// How the size of a session is measured against the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeStrategy {
    /// Length of the compact JSON document, structure included.
    Json,
    /// System message, turn contents and attachment bytes, no structure.
    RawLength,
}

/// A byte threshold scaled by a multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub max_size_bytes: usize,
    pub multiplier: usize,
}

impl Budget {
    pub fn new(max_size_bytes: usize, multiplier: usize) -> Self {
        Self {
            max_size_bytes,
            multiplier,
        }
    }

    /// The effective threshold in bytes.
    pub fn limit(&self) -> usize {
        self.max_size_bytes.saturating_mul(self.multiplier)
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE_BYTES, DEFAULT_BUDGET_MULTIPLIER)
    }
}

/// Measure a session under the given strategy.
pub fn session_size(session: &Session, strategy: SizeStrategy) -> usize {
    match strategy {
        SizeStrategy::Json => json_len(session),
        SizeStrategy::RawLength => raw_length(session),
    }
}

fn raw_length(session: &Session) -> usize {
    session.system.len()
        + session
            .history
            .iter()
            .map(|turn| turn_cost(turn, SizeStrategy::RawLength))
            .sum::<usize>()
}

/// Bytes removed from the session size when `turn` is dropped from the head
/// of a history that still has at least one following turn.
fn turn_cost(turn: &Turn, strategy: SizeStrategy) -> usize {
    match strategy {
        SizeStrategy::RawLength => {
            turn.content.len() + turn.attachments.iter().map(Vec::len).sum::<usize>()
        }
        // The element plus the separating comma.
        SizeStrategy::Json => json_len(turn).saturating_add(1),
    }
}

/// Compact JSON length of `value`.
///
/// Sessions hold only strings, a closed role enum and base64 blobs, so
/// encoding them does not fail. If it ever does, the value counts as
/// oversized; it is never measured with the other strategy instead.
fn json_len<T: Serialize + ?Sized>(value: &T) -> usize {
    match serde_json::to_vec(value) {
        Ok(bytes) => bytes.len(),
        Err(e) => {
            warn!(error = %e, "cannot encode for size measurement, treating as over budget");
            usize::MAX
        }
    }
}

/// Decides which oldest turns to drop to respect a budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub budget: Budget,
    pub strategy: SizeStrategy,
}

impl EvictionPolicy {
    pub fn new(budget: Budget, strategy: SizeStrategy) -> Self {
        Self { budget, strategy }
    }

    /// Current size of `session` under this policy's strategy.
    pub fn size_of(&self, session: &Session) -> usize {
        session_size(session, self.strategy)
    }

    /// Number of head turns that must go for `session` to fit the budget,
    /// respecting the retained-pair floor.
    pub fn plan(&self, session: &Session) -> usize {
        let limit = self.budget.limit();
        let mut size = self.size_of(session);
        let mut remaining = session.history.len();
        let mut drop = 0;

        while size > limit && remaining > MIN_RETAINED_TURNS {
            size = size.saturating_sub(turn_cost(&session.history[drop], self.strategy));
            drop += 1;
            remaining -= 1;
        }
        drop
    }

    /// Remove the oldest turns in place. Returns how many were removed.
    pub fn evict(&self, session: &mut Session) -> usize {
        let drop = self.plan(session);
        if drop > 0 {
            session.history.drain(..drop);
            debug!(
                conversation_id = %session.id,
                evicted = drop,
                retained = session.history.len(),
                limit = self.budget.limit(),
                "evicted oldest turns"
            );
        }
        drop
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(Budget::default(), SizeStrategy::Json)
    }
}
