//! Block-height change detection.

use tracing::warn;

/// Result of comparing one poll sample against the stored baseline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// First successful observation. Baseline recorded, nothing to announce.
    NoBaseline,
    /// Height unchanged, decreased, or unreadable. Baseline retained.
    NoChange,
    /// Height strictly increased. Downstream notification should fire.
    Increased { from: u64, to: u64 },
}

/// Holds the single piece of poll-cycle state: the last observed height.
///
/// A `None` sample means the source was unreachable and carries no
/// information, so read failures never reset the baseline. A decrease is
/// logged and otherwise ignored; the ledger height only moves forward under
/// normal operation.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: Option<u64>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }

    pub fn observe(&mut self, current: Option<u64>) -> Transition {
        let Some(current) = current else {
            return Transition::NoChange;
        };

        match self.last {
            None => {
                self.last = Some(current);
                Transition::NoBaseline
            }
            Some(previous) if current > previous => {
                self.last = Some(current);
                Transition::Increased {
                    from: previous,
                    to: current,
                }
            }
            Some(previous) => {
                if current < previous {
                    warn!(previous, current, "ledger height decreased, keeping baseline");
                }
                Transition::NoChange
            }
        }
    }
}
