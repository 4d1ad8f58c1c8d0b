//! Collision-safe ordering of position renames.
//!
//! Renumbering scenes moves many files inside one directory at once. Applied
//! naively, a move can land on a file that has not been moved out yet. The
//! planner sequences moves so every target is free when it is written:
//! chains are emitted from their free end, and cycles are broken by parking
//! one file in a staging slot.

use std::collections::BTreeMap;

/// A file slot inside one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    /// The file named after a scene position.
    Position(usize),
    /// A temporary name outside the position numbering.
    Staging,
}

/// One rename step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub from: Slot,
    pub to: Slot,
}

/// Sequence `(old, new)` position moves so none clobbers a pending source.
///
/// Sources and targets must each be distinct. Identity moves are dropped.
/// The result is deterministic: among ready moves the lowest source goes
/// first, so a downward shift runs in ascending order and an upward shift in
/// descending order.
pub fn plan_moves(mapping: &[(usize, usize)]) -> Vec<Move> {
    let mut pending: BTreeMap<Slot, Slot> = mapping
        .iter()
        .filter(|(from, to)| from != to)
        .map(|&(from, to)| (Slot::Position(from), Slot::Position(to)))
        .collect();
    debug_assert_eq!(
        pending.len(),
        mapping.iter().filter(|(f, t)| f != t).count(),
        "duplicate source in move mapping"
    );

    let mut steps = Vec::with_capacity(pending.len() + 2);
    while let Some((&first_from, &first_to)) = pending.iter().next() {
        let ready = pending
            .iter()
            .find(|(_, to)| !pending.contains_key(to))
            .map(|(&from, &to)| (from, to));

        match ready {
            Some((from, to)) => {
                pending.remove(&from);
                steps.push(Move { from, to });
            }
            None => {
                // Only cycles remain: park the lowest source and let the
                // cycle unwind into the slot it vacated.
                pending.remove(&first_from);
                steps.push(Move {
                    from: first_from,
                    to: Slot::Staging,
                });
                pending.insert(Slot::Staging, first_to);
            }
        }
    }
    steps
}
