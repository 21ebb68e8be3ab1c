//! Time-indexed unrolling of transition-system terms (§4.1 "Unroller").
//!
//! Turns a term written over `S ∪ next(S) ∪ I` into its copy at a concrete
//! time step, e.g. `at_time(c < 4, 3)` produces the term that means
//! "`c` is less than 4 at step 3". Every state/input symbol gets a fresh,
//! hash-consed per-step symbol (`c@3`); results are cached so repeated
//! unrolling of the same `(term, step)` pair is free and, per §4.1's
//! determinism requirement, always returns the identical `Term`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::term::{Term, TermManager};
use crate::ts::TransitionSystem;

/// Failure unrolling a term: it mentions a symbol that is neither a state
/// variable, an input variable, nor a declared next-state symbol of the
/// transition system driving this unroller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrollError {
    pub symbol: String,
}

impl fmt::Display for UnrollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot unroll: '{}' is not a state, input or next-state variable of this transition system",
            self.symbol
        )
    }
}

impl std::error::Error for UnrollError {}

/// Time-indexes terms over a fixed [`TransitionSystem`]'s variables.
///
/// One `Unroller` is shared by every engine running against a given
/// transition system (K-induction, IC3, CEGAR's concrete context) so that
/// `at_time` caches and per-step symbols are shared rather than
/// duplicated per engine.
pub struct Unroller {
    manager: Rc<TermManager>,
    /// `step_symbols[(base_symbol, step)] = base_symbol@step`.
    step_symbols: RefCell<HashMap<(Term, u64), Term>>,
    /// `cache[(term, step)] = at_time(term, step)`, keyed by the term's
    /// identity (pointer equality, per the kernel's hash-consing) so the
    /// same sub-term unrolled at the same step is only ever computed once.
    cache: RefCell<HashMap<(Term, u64), Term>>,
}

impl Unroller {
    pub fn new(manager: Rc<TermManager>) -> Self {
        Self {
            manager,
            step_symbols: RefCell::new(HashMap::new()),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// The step-`step` copy of a state, input or next-state symbol
    /// (`base@step`), minted once and cached thereafter.
    fn symbol_at(&self, base: &Term, step: u64) -> Term {
        let key = (base.clone(), step);
        if let Some(existing) = self.step_symbols.borrow().get(&key) {
            return existing.clone();
        }
        let name = format!("{base}@{step}");
        let sym = self.manager.mk_symbol(name, base.sort().clone());
        self.step_symbols.borrow_mut().insert(key, sym.clone());
        sym
    }

    /// Produces the copy of `term` at time `step`: every state variable
    /// `s` becomes `s@step`, every input variable `i` becomes `i@step`,
    /// and every next-state symbol `next(s)` becomes `s@(step + 1)`.
    ///
    /// Errors if `term` mentions a symbol that is not one of `ts`'s state,
    /// input, or next-state variables (§4.1 edge case).
    pub fn at_time(&self, ts: &TransitionSystem, term: &Term, step: u64) -> Result<Term, UnrollError> {
        if let Some(hit) = self.cache.borrow().get(&(term.clone(), step)) {
            return Ok(hit.clone());
        }
        let result = self.unroll(ts, term, step)?;
        self.cache.borrow_mut().insert((term.clone(), step), result.clone());
        Ok(result)
    }

    fn unroll(&self, ts: &TransitionSystem, term: &Term, step: u64) -> Result<Term, UnrollError> {
        if term.is_value() {
            return Ok(term.clone());
        }
        if term.is_symbol() {
            if ts.is_state_var(term) {
                return Ok(self.symbol_at(term, step));
            }
            if ts.is_input_var(term) {
                return Ok(self.symbol_at(term, step));
            }
            if let Some(base) = ts.var_of_next(term) {
                return Ok(self.symbol_at(base, step + 1));
            }
            return Err(UnrollError { symbol: term.to_string() });
        }
        let (op, children) = term.op().expect("non-value, non-symbol term must be an application");
        let mut unrolled = Vec::with_capacity(children.len());
        for c in children {
            unrolled.push(self.at_time(ts, c, step)?);
        }
        Ok(self.manager.mk_term(op, unrolled))
    }

    /// Unrolls `term` over every step in `0..=last`, returning the
    /// conjunction. Used to build a bounded path constraint in one call.
    pub fn at_times(
        &self,
        ts: &TransitionSystem,
        term: &Term,
        steps: impl IntoIterator<Item = u64>,
    ) -> Result<Term, UnrollError> {
        let mut conjuncts = Vec::new();
        for step in steps {
            conjuncts.push(self.at_time(ts, term, step)?);
        }
        Ok(self.manager.mk_and(conjuncts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::Sort;
    use crate::term::Op;

    fn counter_ts() -> (Rc<TermManager>, TransitionSystem) {
        let m = Rc::new(TermManager::new());
        let mut ts = TransitionSystem::new(m.clone());
        let (c, c_next) = ts.declare_state_var("c", Sort::BitVec(4));
        let zero = m.mk_bv(0, 4);
        let one = m.mk_bv(1, 4);
        ts.set_init(m.mk_eq(c.clone(), zero)).unwrap();
        let step = m.mk_term(Op::Add, vec![c, one]);
        ts.set_trans_relational(m.mk_eq(c_next, step)).unwrap();
        (m, ts)
    }

    #[test]
    fn same_step_and_term_is_cached_and_deterministic() {
        let (m, ts) = counter_ts();
        let unroller = Unroller::new(m.clone());
        let c = ts.state_vars()[0].clone();
        let a = unroller.at_time(&ts, &c, 3).unwrap();
        let b = unroller.at_time(&ts, &c, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn next_state_symbol_unrolls_one_step_ahead() {
        let (m, ts) = counter_ts();
        let unroller = Unroller::new(m.clone());
        let c = ts.state_vars()[0].clone();
        let c_next = ts.next(&c).unwrap().clone();
        let at_c_5 = unroller.at_time(&ts, &c, 5).unwrap();
        let at_next_4 = unroller.at_time(&ts, &c_next, 4).unwrap();
        assert_eq!(at_c_5, at_next_4, "next(c)@4 must equal c@5");
    }

    #[test]
    fn foreign_symbol_is_rejected() {
        let (m, ts) = counter_ts();
        let unroller = Unroller::new(m.clone());
        let ghost = m.mk_symbol("ghost", Sort::Bool);
        assert!(unroller.at_time(&ts, &ghost, 0).is_err());
    }

    #[test]
    fn at_times_conjoins_every_step() {
        let (m, ts) = counter_ts();
        let unroller = Unroller::new(m.clone());
        let c = ts.state_vars()[0].clone();
        let four = m.mk_bv(4, 4);
        let lt = m.mk_term(Op::BVUlt, vec![c, four]);
        let conj = unroller.at_times(&ts, &lt, 0..3).unwrap();
        let (op, children) = conj.op().unwrap();
        assert_eq!(op, Op::And);
        assert_eq!(children.len(), 2);
    }
}
