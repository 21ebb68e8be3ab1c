//! Cone-of-influence analysis and model-equivalence classes (§4.6, and the
//! "Syntax-guided (IC3SA)" predecessor-generalisation variant of §4.3).
//!
//! The structural traversal itself lives on [`crate::ts::TransitionSystem`]
//! (it needs the transition system's `next` map and functional/relational
//! distinction); this module adds the two satellite facilities IC3SA's
//! generalisation strategy needs on top of it: restricting a candidate
//! literal set to a cone, and building model-equivalence classes to
//! synthesise extra equality/disequality literals.

use std::collections::{HashMap, HashSet};

use crate::solver::SmtSolver;
use crate::sort::Sort;
use crate::term::{Term, TermManager, Value};
use crate::ts::TransitionSystem;

/// Restricts `candidates` to those whose free symbols lie entirely within
/// the structural cone of influence of `seed` (§4.3 "restrict literals to
/// those whose symbols lie in the structural cone-of-influence of
/// `c.term`").
pub fn restrict_to_cone(ts: &TransitionSystem, seed: &Term, candidates: &[Term]) -> Vec<Term> {
    let cone = ts.cone_of_influence(seed);
    candidates
        .iter()
        .filter(|lit| {
            let mut syms = HashSet::new();
            lit.free_symbols(&mut syms);
            syms.iter().all(|s| {
                let base = ts.var_of_next(s).cloned().unwrap_or_else(|| s.clone());
                !ts.is_state_var(&base) || cone.contains(&base)
            })
        })
        .cloned()
        .collect()
}

/// `class_by_sort : Sort -> Value -> Set<Term>` (§3 "Equivalence classes"):
/// terms partitioned by equal model value, grouped by sort, so that the
/// IC3SA handler can synthesise pairwise (in-)equality literals between
/// classes.
pub struct EquivalenceClasses {
    classes: HashMap<Sort, HashMap<ValueKey, Vec<Term>>>,
}

/// `Value` does not implement `Hash`/`Eq` for floats it doesn't carry, but
/// it does for the variants this kernel supports; wrapping it keeps the
/// `HashMap` key requirement local to this module.
#[derive(PartialEq, Eq, Hash, Clone)]
struct ValueKey(Value);

impl EquivalenceClasses {
    /// Evaluates every term in `terms` under `solver`'s current model
    /// (which must be SAT) and groups them by `(sort, value)`.
    pub fn from_model(
        solver: &mut dyn SmtSolver,
        terms: impl IntoIterator<Item = Term>,
    ) -> crate::error::VerificationResult<Self> {
        let mut classes: HashMap<Sort, HashMap<ValueKey, Vec<Term>>> = HashMap::new();
        for t in terms {
            let value = solver.get_value(&t)?;
            classes
                .entry(t.sort().clone())
                .or_default()
                .entry(ValueKey(value))
                .or_default()
                .push(t);
        }
        Ok(Self { classes })
    }

    /// Picks the class representative per §4.3's rule: "prefer a symbolic
    /// constant over a non-value compound over a value literal".
    fn representative(class: &[Term]) -> &Term {
        class
            .iter()
            .min_by_key(|t| if t.is_symbol() { 0 } else if !t.is_value() { 1 } else { 2 })
            .expect("equivalence classes are never constructed empty")
    }

    /// Pairwise equalities within each class, plus pairwise disequalities
    /// between class representatives across all classes of matching sort
    /// (§4.3 (b), (c)).
    pub fn synthesize_literals(&self, manager: &TermManager) -> Vec<Term> {
        let mut literals = Vec::new();
        for by_value in self.classes.values() {
            let representatives: Vec<&Term> = by_value.values().map(|c| Self::representative(c)).collect();
            for (i, rep_i) in representatives.iter().enumerate() {
                for rep_j in representatives.iter().skip(i + 1) {
                    literals.push(manager.mk_distinct((*rep_i).clone(), (*rep_j).clone()));
                }
            }
            for class in by_value.values() {
                for (i, a) in class.iter().enumerate() {
                    for b in class.iter().skip(i + 1) {
                        literals.push(manager.mk_eq(a.clone(), b.clone()));
                    }
                }
            }
        }
        literals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::Sort as S;
    use std::rc::Rc;

    #[test]
    fn restrict_to_cone_drops_unrelated_literals() {
        let m = Rc::new(TermManager::new());
        let mut ts = TransitionSystem::new(m.clone());
        let (a, _) = ts.declare_state_var("a", S::Bool);
        let (b, _) = ts.declare_state_var("b", S::Bool);
        let (c, _) = ts.declare_state_var("c", S::Bool);
        let mut fns = HashMap::new();
        fns.insert(a.clone(), a.clone());
        fns.insert(b.clone(), b.clone());
        fns.insert(c.clone(), c.clone());
        ts.set_trans_functional(fns).unwrap();

        let lit_a = m.mk_not(a.clone());
        let lit_c = m.mk_not(c.clone());
        let kept = restrict_to_cone(&ts, &a, &[lit_a.clone(), lit_c]);
        assert_eq!(kept, vec![lit_a]);
    }

    #[test]
    fn representative_prefers_symbol_over_value() {
        let m = TermManager::new();
        let x = m.mk_symbol("x", S::BitVec(4));
        let five = m.mk_bv(5, 4);
        let class = vec![five, x.clone()];
        assert_eq!(EquivalenceClasses::representative(&class), &x);
    }
}
