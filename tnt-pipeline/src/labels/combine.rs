//! Cross product of two label sets.

use super::LabelSet;
use serde::{Deserialize, Serialize};

/// One entry of a combined label set together with the pair it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedLabel {
    /// Index assigned in the combined set.
    pub index: u32,
    /// Index in the first (outer) set.
    pub first: u32,
    /// Index in the second (inner) set.
    pub second: u32,
    /// `"<first name>+<second name>"`.
    pub name: String,
}

/// The combination of two label sets.
///
/// Indices are assigned sequentially from 1 in row-major order: every label
/// of the first set in order, and for each of them every label of the second
/// set in order. The result depends only on the two inputs, so combining the
/// same sets twice yields the same table. The same table drives both the
/// combined label sidecar and the voxel-wise image combination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCombination {
    entries: Vec<CombinedLabel>,
}

impl LabelCombination {
    /// Combines `first` (outer) with `second` (inner).
    #[must_use]
    pub fn new(first: &LabelSet, second: &LabelSet) -> Self {
        let entries = first
            .iter()
            .flat_map(|a| second.iter().map(move |b| (a, b)))
            .zip(1u32..)
            .map(|((a, b), index)| CombinedLabel {
                index,
                first: a.index,
                second: b.index,
                name: format!("{}+{}", a.name, b.name),
            })
            .collect();
        Self { entries }
    }

    /// Combined index for a voxel labeled `first` and `second`.
    ///
    /// Returns `None` when either value is not part of its set, including the
    /// background value 0 unless a set declares it.
    #[must_use]
    pub fn lookup(&self, first: u32, second: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.first == first && e.second == second)
            .map(|e| e.index)
    }

    /// The combined entries in index order.
    #[must_use]
    pub fn entries(&self) -> &[CombinedLabel] {
        &self.entries
    }

    /// The combined label set.
    #[must_use]
    pub fn labels(&self) -> LabelSet {
        // indices are sequential and names are joined from valid names
        LabelSet {
            labels: self
                .entries
                .iter()
                .map(|e| super::Label::new(e.index, e.name.clone()))
                .collect(),
        }
    }
}
