//! Proof-goal chains (§3 "Proof goal", §9 "Proof-goal chain cycles").
//!
//! The engine discovers goals in search order: starting from the unsafe
//! target at the highest frame, it walks backward to progressively lower
//! frames looking for a predecessor that intersects `init`. Each goal
//! found this way keeps a reference to the *later* goal it was derived to
//! block, so that once a frame-0 goal intersecting `init` is found, the
//! chain can be walked forward -- chronologically, init first -- to
//! reconstruct the witness. The chain is acyclic by construction (frame
//! index strictly decreases while searching) but must outlive the stack
//! frames of `block_all` while walked, so goals are reference-counted
//! rather than owned by a single stack frame.

use std::rc::Rc;

use super::unit::IC3Unit;
use crate::witness::StateAssignment;

struct ProofGoalData {
    unit: IC3Unit,
    frame: u32,
    /// The chronologically later goal this one was found while trying to
    /// block, if any. `None` for the original unsafe target.
    later: Option<ProofGoal>,
    /// Input-variable values used on the transition from this goal's
    /// state into `later`'s state, captured at the moment the predecessor
    /// was found (§6 "witness(): ... per-step total assignments to state
    /// and input variables").
    transition_inputs: Option<StateAssignment>,
}

/// A cheaply-cloneable handle to one link of a proof-goal chain.
#[derive(Clone)]
pub struct ProofGoal(Rc<ProofGoalData>);

impl ProofGoal {
    /// The original unsafe target (§4.4 "`step i`: ... add it as a proof
    /// goal at frame `reached_k + 1`"): chronologically last, no `later`.
    pub fn root(unit: IC3Unit, frame: u32) -> Self {
        Self(Rc::new(ProofGoalData { unit, frame, later: None, transition_inputs: None }))
    }

    /// A goal found one frame earlier than `later`, via `get_predecessor`
    /// (§4.4 "push a new proof goal (pred, i−1, this)"). `transition_inputs`
    /// are the input values observed driving `unit`'s state into `later`'s.
    pub fn earlier(unit: IC3Unit, frame: u32, later: ProofGoal, transition_inputs: StateAssignment) -> Self {
        Self(Rc::new(ProofGoalData {
            unit,
            frame,
            later: Some(later),
            transition_inputs: Some(transition_inputs),
        }))
    }

    pub fn unit(&self) -> &IC3Unit {
        &self.0.unit
    }

    pub fn frame(&self) -> u32 {
        self.0.frame
    }

    pub fn later(&self) -> Option<&ProofGoal> {
        self.0.later.as_ref()
    }

    /// Walks the chain from this goal (expected to intersect `init`)
    /// forward through `later` links to the original unsafe target,
    /// returning `(state_assignment, transition_inputs_into_next)` pairs
    /// in chronological order. The final pair's inputs are `None` (there
    /// is no further transition after the unsafe target).
    pub fn chain_from_init(&self) -> Vec<(IC3Unit, Option<StateAssignment>)> {
        let mut steps = vec![(self.0.unit.clone(), self.0.transition_inputs.clone())];
        let mut cur = self.0.later.clone();
        while let Some(goal) = cur {
            steps.push((goal.0.unit.clone(), goal.0.transition_inputs.clone()));
            cur = goal.0.later.clone();
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ic3::unit::{BitLevelHandler, UnitHandler};
    use crate::sort::Sort;
    use crate::term::{TermManager, Value};

    #[test]
    fn chain_from_init_walks_chronologically_to_target() {
        let m = TermManager::new();
        let handler = BitLevelHandler;
        let a = m.mk_symbol("a", Sort::Bool);
        let target_unit = handler.create_negated(&m, vec![a]).unwrap();
        let target = ProofGoal::root(target_unit.clone(), 2);

        let b = m.mk_symbol("b", Sort::Bool);
        let unit_b = handler.create_negated(&m, vec![b]).unwrap();
        let mut inputs_1 = StateAssignment::new();
        inputs_1.insert("i", Value::Bool(true));
        let frame_1 = ProofGoal::earlier(unit_b.clone(), 1, target.clone(), inputs_1);

        let c = m.mk_symbol("c", Sort::Bool);
        let unit_c = handler.create_negated(&m, vec![c]).unwrap();
        let mut inputs_0 = StateAssignment::new();
        inputs_0.insert("i", Value::Bool(false));
        let frame_0 = ProofGoal::earlier(unit_c.clone(), 0, frame_1.clone(), inputs_0);

        let chain = frame_0.chain_from_init();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].0.term, unit_c.term);
        assert_eq!(chain[1].0.term, unit_b.term);
        assert_eq!(chain[2].0.term, target_unit.term);
        assert!(chain[2].1.is_none(), "the final step has no further transition");
    }
}
