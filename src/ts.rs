//! Transition systems and properties (§3 "Variable partitioning of a
//! TransitionSystem", §3 "Property").

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::{VerificationError, VerificationResult};
use crate::term::{Term, TermManager};

/// How `trans` is presented (§3, §6 "`functional_ts`").
#[derive(Clone)]
pub enum TransKind {
    /// A single predicate over `S ∪ next(S) ∪ I`.
    Relational(Term),
    /// A next-state function per state variable; `next(s) = f_s(S, I)` is
    /// implied conjunctively. Enables the symbolic post-image
    /// optimisations mentioned in §6, which this core does not implement
    /// but preserves room for (engines fall back to
    /// [`TransitionSystem::trans_predicate`]).
    Functional(HashMap<Term, Term>),
}

/// The tuple `(S, I, init, trans)` of §3/GLOSSARY, plus the bookkeeping
/// (the `next` map) needed to talk about primed state variables.
///
/// A `TransitionSystem` borrows its [`TermManager`] for the lifetime of its
/// use; per §3 "Lifecycles", a `TransitionSystem` built from one manager is
/// invalid against another (CEGAR, §4.5/§9, therefore keeps two of them,
/// joined by a [`crate::cegar::Translator`]).
pub struct TransitionSystem {
    manager: Rc<TermManager>,
    state_vars: Vec<Term>,
    input_vars: Vec<Term>,
    /// `next_of[s]` is the symbol standing for `next(s)` inside `trans`.
    next_of: HashMap<Term, Term>,
    /// Inverse of `next_of`, for the unroller and COI analysis.
    var_of_next: HashMap<Term, Term>,
    init: Term,
    trans: TransKind,
}

impl TransitionSystem {
    /// An empty transition system with `init = true` and `trans = true`;
    /// callers populate it via `declare_state_var`/`declare_input_var`/
    /// `set_init`/`set_trans_*`.
    pub fn new(manager: Rc<TermManager>) -> Self {
        let init = manager.mk_bool(true);
        let trans = manager.mk_bool(true);
        Self {
            manager,
            state_vars: Vec::new(),
            input_vars: Vec::new(),
            next_of: HashMap::new(),
            var_of_next: HashMap::new(),
            init,
            trans: TransKind::Relational(trans),
        }
    }

    pub fn manager(&self) -> &Rc<TermManager> {
        &self.manager
    }

    /// Declares a state variable and its primed counterpart. Returns
    /// `(s, next(s))`.
    pub fn declare_state_var(&mut self, name: &str, sort: crate::sort::Sort) -> (Term, Term) {
        let s = self.manager.mk_symbol(name, sort.clone());
        let next = self.manager.mk_symbol(format!("{name}!next"), sort);
        self.state_vars.push(s.clone());
        self.next_of.insert(s.clone(), next.clone());
        self.var_of_next.insert(next.clone(), s.clone());
        (s, next)
    }

    pub fn declare_input_var(&mut self, name: &str, sort: crate::sort::Sort) -> Term {
        let v = self.manager.mk_symbol(name, sort);
        self.input_vars.push(v.clone());
        v
    }

    pub fn state_vars(&self) -> &[Term] {
        &self.state_vars
    }

    pub fn input_vars(&self) -> &[Term] {
        &self.input_vars
    }

    pub fn next(&self, state_var: &Term) -> Option<&Term> {
        self.next_of.get(state_var)
    }

    pub fn is_state_var(&self, t: &Term) -> bool {
        self.next_of.contains_key(t)
    }

    pub fn is_input_var(&self, t: &Term) -> bool {
        self.input_vars.contains(t)
    }

    pub fn is_next_var(&self, t: &Term) -> bool {
        self.var_of_next.contains_key(t)
    }

    pub fn var_of_next(&self, next_var: &Term) -> Option<&Term> {
        self.var_of_next.get(next_var)
    }

    /// Looks up a declared state variable by name; used by CEGAR (§4.5)
    /// to recover the `Term` for an `abs_<n>` variable it minted earlier
    /// from only the name stored in its `abs_var -> original_value` map.
    pub fn state_var_named(&self, name: &str) -> Option<Term> {
        self.state_vars.iter().find(|t| t.symbol_name() == Some(name)).cloned()
    }

    pub fn init(&self) -> &Term {
        &self.init
    }

    pub fn trans(&self) -> &TransKind {
        &self.trans
    }

    /// Asserts `init`, validating the §3 invariant that every free symbol
    /// in `init` is a state variable.
    pub fn set_init(&mut self, init: Term) -> VerificationResult<()> {
        self.check_symbols(&init, false)?;
        self.init = init;
        Ok(())
    }

    pub fn set_trans_relational(&mut self, trans: Term) -> VerificationResult<()> {
        self.check_symbols(&trans, true)?;
        self.trans = TransKind::Relational(trans);
        Ok(())
    }

    /// Sets a functional transition relation, `next(s) = f_s(S, I)` per
    /// state variable. Missing state variables default to `next(s) = s`
    /// (a frozen variable, §3 "a *frozen* variable satisfies
    /// `assign_next(s, s)`").
    pub fn set_trans_functional(&mut self, mut fns: HashMap<Term, Term>) -> VerificationResult<()> {
        for s in &self.state_vars {
            fns.entry(s.clone()).or_insert_with(|| s.clone());
        }
        for f in fns.values() {
            self.check_symbols(f, true)?;
        }
        self.trans = TransKind::Functional(fns);
        Ok(())
    }

    /// Marks `state_var` frozen: `next(state_var) == state_var` is folded
    /// into `trans` (§4.5 "mark `abs_var` frozen").
    pub fn freeze(&mut self, state_var: &Term) -> VerificationResult<()> {
        let next = self
            .next_of
            .get(state_var)
            .cloned()
            .ok_or_else(|| VerificationError::internal("freeze: not a state variable"))?;
        let conjunct = self.manager.mk_eq(next, state_var.clone());
        match &mut self.trans {
            TransKind::Relational(t) => {
                *t = self.manager.mk_and(vec![t.clone(), conjunct]);
            }
            TransKind::Functional(fns) => {
                fns.insert(state_var.clone(), state_var.clone());
            }
        }
        Ok(())
    }

    /// The relational form of `trans`, building it from the functional
    /// form on demand: `⋀_s next(s) = f_s(S, I)`.
    pub fn trans_predicate(&self) -> Term {
        match &self.trans {
            TransKind::Relational(t) => t.clone(),
            TransKind::Functional(fns) => {
                let conjuncts: Vec<Term> = self
                    .state_vars
                    .iter()
                    .map(|s| {
                        let next = self.next_of[s].clone();
                        let f = fns.get(s).cloned().unwrap_or_else(|| s.clone());
                        self.manager.mk_eq(next, f)
                    })
                    .collect();
                self.manager.mk_and(conjuncts)
            }
        }
    }

    fn check_symbols(&self, t: &Term, allow_next_and_input: bool) -> VerificationResult<()> {
        let mut syms = HashSet::new();
        t.free_symbols(&mut syms);
        for s in syms {
            let ok = self.is_state_var(&s)
                || (allow_next_and_input && (self.is_next_var(&s) || self.is_input_var(&s)));
            if !ok {
                return Err(VerificationError::unsupported(format!(
                    "symbol '{s}' is not a declared state{} variable of this transition system",
                    if allow_next_and_input { ", next-state or input" } else { "" }
                )));
            }
        }
        Ok(())
    }

    /// Rebuilds `term` with every free state variable replaced by its
    /// `next` counterpart -- i.e. produces "`term'`" in the notation of
    /// §4.4's IC3 engine description. Combined with
    /// [`crate::unroller::Unroller::at_time`] at a fixed step, this is how
    /// the IC3 engine anchors a unit's "current" and "next" forms into the
    /// same two-slice window it reuses across every frame.
    pub fn prime(&self, term: &Term) -> Term {
        self.manager.substitute(term, &self.next_of)
    }

    /// Structural cone-of-influence (§4.6, L1 "coi-reachable variable
    /// analysis"): the transitive set of state variables whose defining
    /// expression in `trans` reaches `seed`.
    ///
    /// For a relational `trans`, every state variable is considered to
    /// influence every other (the relation does not separate by
    /// variable), so the COI degenerates to "all state variables mentioned
    /// transitively via `seed` and its own free symbols" -- callers that
    /// need the precise per-variable cone should use a functional `trans`,
    /// where each `f_s` only mentions the variables that actually drive
    /// `s`.
    pub fn cone_of_influence(&self, seed: &Term) -> HashSet<Term> {
        let mut frontier: HashSet<Term> = HashSet::new();
        seed.free_symbols(&mut frontier);
        let mut result: HashSet<Term> = HashSet::new();
        let mut worklist: Vec<Term> = frontier
            .into_iter()
            .map(|t| self.var_of_next.get(&t).cloned().unwrap_or(t))
            .filter(|t| self.is_state_var(t))
            .collect();

        while let Some(s) = worklist.pop() {
            if !result.insert(s.clone()) {
                continue;
            }
            if let TransKind::Functional(fns) = &self.trans {
                if let Some(f) = fns.get(&s) {
                    let mut deps = HashSet::new();
                    f.free_symbols(&mut deps);
                    for d in deps {
                        let base = self.var_of_next.get(&d).cloned().unwrap_or(d);
                        if self.is_state_var(&base) && !result.contains(&base) {
                            worklist.push(base);
                        }
                    }
                }
            } else {
                // Relational trans: every state variable mentioned in
                // trans may constrain `s`, so saturate against the whole
                // relation's free state variables once.
                let mut deps = HashSet::new();
                self.trans_predicate().free_symbols(&mut deps);
                for d in deps {
                    let base = self.var_of_next.get(&d).cloned().unwrap_or(d);
                    if self.is_state_var(&base) && !result.contains(&base) {
                        worklist.push(base);
                    }
                }
            }
        }
        result
    }
}

/// Operator-set sanity helper used by engines' `check_ts` (§4.4
/// "initialize ... calls `check_ts`"): returns the set of sorts mentioned
/// by any state or input variable.
pub fn sorts_used(ts: &TransitionSystem) -> HashSet<crate::sort::Sort> {
    ts.state_vars()
        .iter()
        .chain(ts.input_vars())
        .map(|t| t.sort().clone())
        .collect()
}

/// A safety property: a boolean-sorted term over the state variables of a
/// transition system (§3 "Property").
#[derive(Clone)]
pub struct Property {
    pub prop: Term,
}

impl Property {
    pub fn new(prop: Term) -> VerificationResult<Self> {
        if !prop.sort().is_bool() {
            return Err(VerificationError::unsupported("property must be Bool-sorted"));
        }
        Ok(Self { prop })
    }

    /// `bad = ¬property`.
    pub fn bad(&self, manager: &TermManager) -> Term {
        manager.mk_not(self.prop.clone())
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
        let (c, c_next) = ts.declare_state_var("c", Sort::BitVec(2));
        let zero = m.mk_bv(0, 2);
        let one = m.mk_bv(1, 2);
        ts.set_init(m.mk_eq(c.clone(), zero)).unwrap();
        let step = m.mk_term(Op::Add, vec![c, one]);
        ts.set_trans_relational(m.mk_eq(c_next, step)).unwrap();
        (m, ts)
    }

    #[test]
    fn functional_trans_builds_conjunctive_relation() {
        let m = Rc::new(TermManager::new());
        let mut ts = TransitionSystem::new(m.clone());
        let (a, a_next) = ts.declare_state_var("a", Sort::Bool);
        let not_a = m.mk_not(a.clone());
        let mut fns = HashMap::new();
        fns.insert(a.clone(), not_a);
        ts.set_trans_functional(fns).unwrap();
        let pred = ts.trans_predicate();
        let (op, children) = pred.op().unwrap();
        assert_eq!(op, Op::Equal);
        assert_eq!(children[0], a_next);
    }

    #[test]
    fn rejects_foreign_symbol_in_init() {
        let m = Rc::new(TermManager::new());
        let mut ts = TransitionSystem::new(m.clone());
        ts.declare_state_var("a", Sort::Bool);
        let foreign = m.mk_symbol("ghost", Sort::Bool);
        assert!(ts.set_init(foreign).is_err());
    }

    #[test]
    fn freeze_adds_next_equals_self() {
        let (m, mut ts) = counter_ts();
        let c = ts.state_vars()[0].clone();
        ts.freeze(&c).unwrap();
        let pred = ts.trans_predicate();
        let text = pred.to_string();
        assert!(text.contains("c!next"));
        let _ = m;
    }

    #[test]
    fn prime_substitutes_state_vars_with_next_symbols() {
        let (m, ts) = counter_ts();
        let c = ts.state_vars()[0].clone();
        let four = m.mk_bv(4, 2);
        let lit = m.mk_term(Op::BVUlt, vec![c, four]);
        let primed = ts.prime(&lit);
        let (_, children) = primed.op().unwrap();
        assert_eq!(children[0], *ts.next(&ts.state_vars()[0]).unwrap());
    }

    #[test]
    fn cone_of_influence_follows_functional_deps() {
        let m = Rc::new(TermManager::new());
        let mut ts = TransitionSystem::new(m.clone());
        let (a, _) = ts.declare_state_var("a", Sort::Bool);
        let (b, _) = ts.declare_state_var("b", Sort::Bool);
        let (c, _) = ts.declare_state_var("c", Sort::Bool);
        let mut fns = HashMap::new();
        fns.insert(a.clone(), b.clone()); // a' = b
        fns.insert(b.clone(), b.clone()); // b' = b
        fns.insert(c.clone(), c.clone()); // c' = c, unrelated
        ts.set_trans_functional(fns).unwrap();

        let coi = ts.cone_of_influence(&a);
        assert!(coi.contains(&a));
        assert!(coi.contains(&b));
        assert!(!coi.contains(&c));
    }
}
