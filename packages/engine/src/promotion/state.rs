use std::fmt;

use crate::entity::asset;
use crate::outcome::AbortReason;

/// Where an asset's file is in its move from cache to store. Derived from
/// the row and the running operation, never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromotionState {
    /// File is in temporary storage only.
    Pending,
    /// Inside the hook/transition window.
    Promoting,
    /// File is in permanent storage.
    Stored,
    /// A hook vetoed the transition or the file changed under it. The
    /// cached file is left alone.
    Aborted,
}

impl PromotionState {
    pub fn of(asset: &asset::Model) -> Self {
        if asset.stored {
            Self::Stored
        } else {
            Self::Pending
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Promoting => "promoting",
            Self::Stored => "stored",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for PromotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum PromotionOutcome {
    /// `promote` is `false`; nothing happened.
    Pending,
    /// A promote job was handed to the queue.
    Enqueued,
    Stored(asset::Model),
    Aborted(AbortReason),
}

impl PromotionOutcome {
    pub fn state(&self) -> PromotionState {
        match self {
            Self::Pending | Self::Enqueued => PromotionState::Pending,
            Self::Stored(_) => PromotionState::Stored,
            Self::Aborted(_) => PromotionState::Aborted,
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored(_))
    }
}

/// Result of the core move, as seen by around hooks.
#[derive(Debug)]
pub enum Transition {
    Stored(asset::Model),
    Stale(AbortReason),
}
