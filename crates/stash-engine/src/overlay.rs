//! Row overlay renderer.
//!
//! The backend only reports ordinal progress ("3 of 10 done, 34%").  The
//! host's track list is virtualised and remounted at will, so nothing here is
//! cached across ticks: each tick takes the rows the host currently renders,
//! projects the live job record onto their ordinals and repaints them.
//!
//! Projection rules for a row at ordinal `i`:
//!
//! ```text
//!  completed            every row Complete
//!  failed               row `done` Failed, others left as they are
//!  total == 0           every row Indeterminate (count not known yet)
//!  i <  done            Complete
//!  i == done < total    Active(percent) or Indeterminate
//!  otherwise            unmarked
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use stash_proto::job::{JobContext, JobRecord};
use stash_proto::protocol::JobStatus;
use tracing::trace;

use crate::host::RowSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RowState {
    Complete,
    Failed,
    Active { percent: u8 },
    Indeterminate,
}

/// What one tick should do to the host list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Remove every overlay (no job, or another list is on screen).
    Clear,
    Paint {
        rows: Vec<(usize, RowState)>,
        /// Whether previously painted rows missing from `rows` are cleared.
        clear_unmarked: bool,
    },
}

/// Progress of the item currently being fetched, derived from the aggregate.
///
/// `percent` covers `total` items, so `percent * total / 100` is the number
/// of items done including the fraction of the current one; subtracting
/// `done` leaves that fraction.  Returns None when there is no fraction to
/// show (aggregate only counts whole items, or the count is unknown).
pub fn current_item_percent(record: &JobRecord) -> Option<u8> {
    if record.total == 0 || record.done >= record.total {
        return None;
    }
    let derived = record.percent * record.total as f64 - record.done as f64 * 100.0;
    if derived <= 0.0 {
        return None;
    }
    Some(derived.clamp(0.0, 100.0).round() as u8)
}

/// State of a single ordinal for a running (non-failed) job.
pub fn project_row(record: &JobRecord, ordinal: usize) -> Option<RowState> {
    match record.status {
        JobStatus::Completed => return Some(RowState::Complete),
        JobStatus::Failed => {
            return (ordinal == record.done as usize).then_some(RowState::Failed);
        }
        JobStatus::Starting | JobStatus::Downloading => {}
    }

    if record.total == 0 {
        return Some(RowState::Indeterminate);
    }

    let done = record.done as usize;
    if ordinal < done {
        Some(RowState::Complete)
    } else if ordinal == done && done < record.total as usize {
        Some(match current_item_percent(record) {
            Some(percent) => RowState::Active { percent },
            None => RowState::Indeterminate,
        })
    } else {
        None
    }
}

/// Pure projection of `record` onto the rendered `ordinals` of the list the
/// user is looking at.
pub fn project(
    record: Option<&JobRecord>,
    on_screen: Option<&JobContext>,
    ordinals: &[usize],
) -> Projection {
    let Some(record) = record else {
        return Projection::Clear;
    };
    if on_screen != Some(&record.context) {
        return Projection::Clear;
    }

    let rows = ordinals
        .iter()
        .filter_map(|&i| project_row(record, i).map(|state| (i, state)))
        .collect();
    Projection::Paint {
        rows,
        clear_unmarked: record.status != JobStatus::Failed,
    }
}

/// Applies projections to a `RowSurface`, remembering which ordinals carry an
/// overlay so they can be cleared later.
#[derive(Debug, Default)]
pub struct OverlayRenderer {
    painted: BTreeSet<usize>,
}

impl OverlayRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows painted this tick.
    pub fn tick(
        &mut self,
        record: Option<&JobRecord>,
        on_screen: Option<&JobContext>,
        surface: &dyn RowSurface,
    ) -> usize {
        let ordinals = if record.is_some() {
            surface.visible_rows()
        } else {
            Vec::new()
        };

        match project(record, on_screen, &ordinals) {
            Projection::Clear => {
                self.clear_all(surface);
                0
            }
            Projection::Paint {
                rows,
                clear_unmarked,
            } => {
                let marked: BTreeSet<usize> = rows.iter().map(|(i, _)| *i).collect();
                if clear_unmarked {
                    for stale in self.painted.difference(&marked) {
                        surface.clear(*stale);
                    }
                    self.painted.retain(|i| marked.contains(i));
                }
                for (ordinal, state) in &rows {
                    surface.paint(*ordinal, *state);
                }
                self.painted.extend(marked);
                trace!("overlay: painted {} rows", rows.len());
                rows.len()
            }
        }
    }

    pub fn clear_all(&mut self, surface: &dyn RowSurface) {
        for ordinal in std::mem::take(&mut self.painted) {
            surface.clear(ordinal);
        }
    }

    pub fn painted(&self) -> &BTreeSet<usize> {
        &self.painted
    }
}
