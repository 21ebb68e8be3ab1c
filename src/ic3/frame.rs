//! The IC3 frame vector (§3 "Frame", §4.4 "Frames").
//!
//! `frames_[i]` holds units that hold at frame `i` and have not yet been
//! pushed forward; the semantic content of `F_i` is `⋀_{j ≥ i} frames_[j]`.
//! Frame 0 is special: it encodes the initial states via a label for
//! `init` rather than via units of its own.

use std::collections::HashSet;

use crate::term::{Term, TermManager};

use super::unit::IC3Unit;

/// One level of the frame vector. Frame 0 never receives units directly
/// (its content is `init`, asserted once under `label_init`); frames
/// `1..` accumulate units via `step`/`block_all` and lose them to higher
/// frames via `propagate`.
#[derive(Default)]
pub struct Frame {
    units: Vec<IC3Unit>,
    /// Caches which units are already present, so `add` is idempotent
    /// without an O(n) linear scan against `units` on every call.
    present: HashSet<Term>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units(&self) -> &[IC3Unit] {
        &self.units
    }

    pub fn contains(&self, unit: &IC3Unit) -> bool {
        self.present.contains(&unit.term)
    }

    /// Adds `unit` to this frame if not already present. Returns whether
    /// it was newly added.
    pub fn add(&mut self, unit: IC3Unit) -> bool {
        if self.present.insert(unit.term.clone()) {
            self.units.push(unit);
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, unit: &IC3Unit) {
        if self.present.remove(&unit.term) {
            self.units.retain(|u| u.term != unit.term);
        }
    }
}

/// A vector of [`Frame`]s, each with an activation label, plus the shared
/// `init`/`trans` labels (§4.4 "Each frame has an associated activation
/// label ... frame i is activated by assuming all labels `label_j` for
/// `j ≥ i`. Trans has its own label.").
pub struct FrameVec {
    frames: Vec<Frame>,
    labels: Vec<Term>,
    pub label_init: Term,
    pub label_trans: Term,
}

impl FrameVec {
    /// Builds frame 0 and its labels; `label_init`/`label_trans` are fresh
    /// boolean symbols minted from `manager`.
    pub fn new(manager: &TermManager) -> Self {
        let label_init = manager.mk_symbol("ic3!label_init", crate::sort::Sort::Bool);
        let label_trans = manager.mk_symbol("ic3!label_trans", crate::sort::Sort::Bool);
        let label_0 = manager.mk_symbol("ic3!label_0", crate::sort::Sort::Bool);
        Self {
            frames: vec![Frame::new()],
            labels: vec![label_0],
            label_init,
            label_trans,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, i: usize) -> &Frame {
        &self.frames[i]
    }

    pub fn frame_mut(&mut self, i: usize) -> &mut Frame {
        &mut self.frames[i]
    }

    pub fn label(&self, i: usize) -> &Term {
        &self.labels[i]
    }

    /// Appends a new, empty highest frame with a fresh activation label
    /// (§4.4 "`step_0`: ... push frame 1").
    pub fn push_frame(&mut self, manager: &TermManager) -> usize {
        let index = self.frames.len();
        let label = manager.mk_symbol(format!("ic3!label_{index}"), crate::sort::Sort::Bool);
        self.frames.push(Frame::new());
        self.labels.push(label);
        index
    }

    /// Labels `i..self.len()`, for a `check_sat_assuming` call that
    /// activates `F_i` (§4.4 "frame i is activated by assuming all labels
    /// `label_j` for `j ≥ i`").
    pub fn activation_labels(&self, from: usize) -> Vec<Term> {
        self.labels[from..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ic3::unit::{BitLevelHandler, UnitHandler};
    use crate::sort::Sort;

    #[test]
    fn add_is_idempotent() {
        let m = TermManager::new();
        let handler = BitLevelHandler;
        let a = m.mk_symbol("a", Sort::Bool);
        let unit = handler.create(&m, vec![a]).unwrap();

        let mut frame = Frame::new();
        assert!(frame.add(unit.clone()));
        assert!(!frame.add(unit.clone()));
        assert_eq!(frame.units().len(), 1);
    }

    #[test]
    fn push_frame_grows_labels_in_step_with_frames() {
        let m = TermManager::new();
        let mut frames = FrameVec::new(&m);
        assert_eq!(frames.len(), 1);
        frames.push_frame(&m);
        frames.push_frame(&m);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames.activation_labels(1).len(), 2);
    }
}
