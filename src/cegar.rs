//! The CEGAR driver (§4.5, L3 of §2): wraps an inner prover over a
//! value-abstracted transition system and refines the abstraction on
//! spurious counterexamples.
//!
//! This module implements the **value-abstraction** instance named in §1:
//! concrete value literals in `init`/`trans`/`bad` are replaced by fresh
//! frozen state variables (§4.5 "Abstraction"), and a spurious abstract
//! counterexample is ruled out by adding back the subset of `abs_var =
//! value` equalities an unsat core says is jointly necessary (§4.5
//! "Refinement loop"). §9 open question (b) calls this construction a
//! stub in the source and directs an implementer to treat §4.5 as the
//! intended semantics; that is what is built here.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{VerificationError, VerificationResult};
use crate::ic3::engine::Ic3Engine;
use crate::ic3::unit::{BitLevelHandler, UnitHandler};
use crate::solver::{SatResponse, SmtSolver, Z3Solver};
use crate::sort::Sort;
use crate::term::{Op, Term, TermManager, Value};
use crate::ts::{Property, TransitionSystem};
use crate::unroller::Unroller;
use crate::witness::{StateAssignment, Verdict, Witness};

/// Operators `abstract_term` must not descend through (§4.5 "the
/// non-linearising set {Mult, Div, Mod, Abs, Pow, IntDiv, BVMul, BVUdiv,
/// BVSdiv, BVUrem, BVSrem, BVSmod}"): substituting a frozen variable into
/// one of these operands would create a non-linearity the back-end
/// cannot handle, so the whole subtree is kept concrete instead.
const NONLINEAR_OPS: &[Op] = &[
    Op::Mul,
    Op::Div,
    Op::Mod,
    Op::Abs,
    Op::Pow,
    Op::IntDiv,
    Op::BVMul,
    Op::BVUdiv,
    Op::BVSdiv,
    Op::BVUrem,
    Op::BVSrem,
    Op::BVSmod,
];

fn is_nonlinear(op: Op) -> bool {
    NONLINEAR_OPS.contains(&op)
}

/// A bidirectional, cached map between terms of two solver contexts (§3
/// "CEGAR translator", §9 "Two solver contexts in CEGAR"). `translate`
/// rebuilds `term` bottom-up in `to`, preserving value literals as-is and
/// remapping every free symbol through `symbol_map`; this is also the
/// "keep the original term" half of §4.5's abstraction rule, since a
/// subtree under a non-linearising operator is moved across solvers
/// without abstraction rather than rebuilt from scratch.
#[derive(Default)]
pub struct Translator {
    cache: RefCell<HashMap<Term, Term>>,
}

impl Translator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translate(&self, term: &Term, to: &TermManager, symbol_map: &HashMap<Term, Term>) -> VerificationResult<Term> {
        if let Some(hit) = self.cache.borrow().get(term) {
            return Ok(hit.clone());
        }
        let result = if let Some(v) = term.as_value() {
            to.mk_value(v.clone())
        } else if term.is_symbol() {
            symbol_map.get(term).cloned().ok_or_else(|| {
                VerificationError::internal(format!("translator: no counterpart registered for symbol '{term}'"))
            })?
        } else {
            let (op, children) = term.op().expect("non-value, non-symbol term must be an application");
            let mut translated = Vec::with_capacity(children.len());
            for c in children {
                translated.push(self.translate(c, to, symbol_map)?);
            }
            to.mk_term(op, translated)
        };
        self.cache.borrow_mut().insert(term.clone(), result.clone());
        Ok(result)
    }
}

/// The abstracted transition system plus the bookkeeping CEGAR needs to
/// move between it and the concrete one it was built from (§3
/// "Lifecycles": a `TransitionSystem` is invalid across solvers, so this
/// carries its own [`TermManager`]).
pub struct Abstraction {
    pub manager: Rc<TermManager>,
    pub ts: TransitionSystem,
    pub property: Property,
    /// `abs_var name -> original concrete value` (§4.5 "register the map
    /// `abs_var -> original_value`").
    pub abs_values: HashMap<String, Value>,
    pub translator: Translator,
    pub symbol_map: HashMap<Term, Term>,
}

/// Builds the value-abstracted transition system and property (§4.5
/// "Abstraction"): traverses `init`, `trans`, `prop` in post-order (`bad`
/// is `¬prop`, so abstracting `prop` and negating afterwards is
/// equivalent and lets every caller share one abstracted property),
/// replacing each leaf value literal with a fresh frozen state variable
/// unless it sits under a non-linearising operator.
pub fn abstract_values(concrete: &TransitionSystem, property: &Property) -> VerificationResult<Abstraction> {
    let manager = Rc::new(TermManager::new());
    let mut ts_abs = TransitionSystem::new(manager.clone());

    let mut symbol_map: HashMap<Term, Term> = HashMap::new();
    for s in concrete.state_vars() {
        let name = s.symbol_name().unwrap_or_default().to_string();
        let (abs_s, abs_next) = ts_abs.declare_state_var(&name, s.sort().clone());
        symbol_map.insert(s.clone(), abs_s);
        symbol_map.insert(concrete.next(s).expect("declared state var has a next counterpart").clone(), abs_next);
    }
    for v in concrete.input_vars() {
        let name = v.symbol_name().unwrap_or_default().to_string();
        let abs_v = ts_abs.declare_input_var(&name, v.sort().clone());
        symbol_map.insert(v.clone(), abs_v);
    }

    let translator = Translator::new();
    let mut abs_values: HashMap<String, Value> = HashMap::new();
    let mut literal_cache: HashMap<Term, Term> = HashMap::new();
    let mut counter = 0u32;

    let init_abs = abstract_term(
        concrete.init(),
        &manager,
        &mut ts_abs,
        &symbol_map,
        &translator,
        &mut literal_cache,
        &mut abs_values,
        &mut counter,
    )?;
    let trans_abs = abstract_term(
        &concrete.trans_predicate(),
        &manager,
        &mut ts_abs,
        &symbol_map,
        &translator,
        &mut literal_cache,
        &mut abs_values,
        &mut counter,
    )?;
    let prop_abs = abstract_term(
        &property.prop,
        &manager,
        &mut ts_abs,
        &symbol_map,
        &translator,
        &mut literal_cache,
        &mut abs_values,
        &mut counter,
    )?;

    ts_abs.set_init(init_abs)?;
    ts_abs.set_trans_relational(trans_abs)?;
    // Freeze every abs var *after* trans is set, so `freeze`'s
    // `next(abs) = abs` conjunct lands on the real relation instead of
    // being clobbered by the subsequent `set_trans_relational` above.
    let abs_var_names: Vec<String> = abs_values.keys().cloned().collect();
    for name in &abs_var_names {
        let abs_var = ts_abs
            .state_var_named(name)
            .ok_or_else(|| VerificationError::internal("abstraction: abs var vanished from its own transition system"))?;
        ts_abs.freeze(&abs_var)?;
    }

    let property_abs = Property::new(prop_abs)?;

    Ok(Abstraction { manager, ts: ts_abs, property: property_abs, abs_values, translator, symbol_map })
}

#[allow(clippy::too_many_arguments)]
fn abstract_term(
    term: &Term,
    manager: &Rc<TermManager>,
    ts_abs: &mut TransitionSystem,
    symbol_map: &HashMap<Term, Term>,
    translator: &Translator,
    literal_cache: &mut HashMap<Term, Term>,
    abs_values: &mut HashMap<String, Value>,
    counter: &mut u32,
) -> VerificationResult<Term> {
    if let Some(hit) = literal_cache.get(term) {
        return Ok(hit.clone());
    }
    let result = if let Some(v) = term.as_value() {
        // §4.5: "for every leaf value literal whose sort is not an
        // array, introduce a fresh state variable". This kernel's `Value`
        // has no array variant, so every literal qualifies.
        let name = format!("abs_{}", *counter);
        *counter += 1;
        let (abs_var, _) = ts_abs.declare_state_var(&name, v.sort());
        abs_values.insert(name, v.clone());
        abs_var
    } else if term.is_symbol() {
        symbol_map.get(term).cloned().ok_or_else(|| {
            VerificationError::internal(format!(
                "abstraction: '{term}' is not a declared state, input or next-state variable"
            ))
        })?
    } else {
        let (op, children) = term.op().expect("non-value, non-symbol term must be an application");
        if is_nonlinear(op) {
            translator.translate(term, manager, symbol_map)?
        } else {
            let mut abs_children = Vec::with_capacity(children.len());
            for c in children {
                abs_children.push(abstract_term(
                    c,
                    manager,
                    ts_abs,
                    symbol_map,
                    translator,
                    literal_cache,
                    abs_values,
                    counter,
                )?);
            }
            manager.mk_term(op, abs_children)
        }
    };
    literal_cache.insert(term.clone(), result.clone());
    Ok(result)
}

/// Whether a candidate abstract counterexample is an artefact of
/// over-abstraction (`Spurious`, carrying the lemma literals to add) or a
/// genuine violation (`Realizable`).
enum RealizabilityOutcome {
    Realizable,
    Spurious(Vec<Term>),
    Unknown,
}

/// CEGAR driver (§4.5, L3): owns the concrete transition system, the
/// abstracted one, and a single abstract-side SMT context; it rebuilds
/// the inner prover at the start of each refinement round over a
/// strictly more constrained abstract `init` (§8 invariant 7, "CEGAR
/// refinement progress").
///
/// The inner engine here is always a bit-level IC3 instance. §6 names
/// `cegar-values+ic3ia` as the engine the original system pairs value
/// abstraction with; this crate does not implement IC3IA's
/// implicit-predicate-abstraction refinement (§9 open question (c) marks
/// the relevant IC3SA methods NYI in the source), so plain bit-level IC3
/// over the abstracted (now fully bit-vector, thanks to value
/// abstraction) transition system is substituted -- sound for the same
/// reason IC3SA would be: every remaining variable is bit-vector-sorted.
pub struct CegarProver<'ctx> {
    concrete_ts: Rc<TransitionSystem>,
    #[allow(dead_code)]
    concrete_property: Property,
    abstraction: Abstraction,
    abstract_ctx: &'ctx z3::Context,
    /// Extra `abs_var = value` conjuncts accumulated across refinement
    /// rounds (§4.5 "add those equalities as lemmas ... to the abstract
    /// transition system"), conjoined into `init` each time the inner
    /// prover is rebuilt.
    lemmas: Vec<Term>,
    witness: Option<Witness>,
    initialized: bool,
}

impl<'ctx> CegarProver<'ctx> {
    pub fn new(concrete_ts: Rc<TransitionSystem>, concrete_property: Property, abstract_ctx: &'ctx z3::Context) -> VerificationResult<Self> {
        let abstraction = abstract_values(&concrete_ts, &concrete_property)?;
        Ok(Self {
            concrete_ts,
            concrete_property,
            abstraction,
            abstract_ctx,
            lemmas: Vec::new(),
            witness: None,
            initialized: false,
        })
    }

    pub fn initialize(&mut self) -> VerificationResult<()> {
        self.initialized = true;
        Ok(())
    }

    pub fn witness(&self) -> Option<&Witness> {
        self.witness.as_ref()
    }

    /// Number of state variables the concrete system actually declares,
    /// used only to size the refinement-round cap below.
    fn concrete_state_var_count(&self) -> usize {
        self.concrete_ts.state_vars().len()
    }

    /// Rebuilds a `TransitionSystem` identical to `self.abstraction.ts`
    /// but with `self.lemmas` conjoined into `init`. Re-declaring state
    /// and input variables on the same (shared, hash-consed) manager
    /// returns the identical `Term`s as before, so this does not mint new
    /// symbols -- it only reconstructs the bookkeeping a fresh
    /// `TransitionSystem` instance needs.
    fn current_abstract_ts(&self) -> VerificationResult<TransitionSystem> {
        let manager = &self.abstraction.manager;
        let mut ts = TransitionSystem::new(manager.clone());
        for s in self.abstraction.ts.state_vars() {
            let name = s.symbol_name().unwrap_or_default().to_string();
            ts.declare_state_var(&name, s.sort().clone());
        }
        for v in self.abstraction.ts.input_vars() {
            let name = v.symbol_name().unwrap_or_default().to_string();
            ts.declare_input_var(&name, v.sort().clone());
        }

        let mut init = self.abstraction.ts.init().clone();
        if !self.lemmas.is_empty() {
            let mut conjuncts = vec![init];
            conjuncts.extend(self.lemmas.iter().cloned());
            init = manager.mk_and(conjuncts);
        }
        ts.set_init(init)?;
        ts.set_trans_relational(self.abstraction.ts.trans_predicate())?;
        for name in self.abstraction.abs_values.keys() {
            let abs_var = ts
                .state_var_named(name)
                .ok_or_else(|| VerificationError::internal("current_abstract_ts: abs var missing"))?;
            ts.freeze(&abs_var)?;
        }
        Ok(ts)
    }

    /// §4.5 "Refinement loop": builds a fresh BMC formula for the
    /// abstract system at the witness's length, with each `(abs_var,
    /// value)` pair guarded by its own assumption label, and checks
    /// satisfiability under all labels.
    fn check_realizable(&self, ts_abs: &TransitionSystem, property_abs: &Property, witness: &Witness) -> VerificationResult<RealizabilityOutcome> {
        let manager = &self.abstraction.manager;
        let unroller = Unroller::new(manager.clone());
        let len = witness.len() as u64;

        let mut solver = Z3Solver::new(self.abstract_ctx, manager.clone());
        let init_0 = unroller.at_time(ts_abs, ts_abs.init(), 0)?;
        solver.assert_formula(&init_0)?;
        for i in 0..len {
            let trans_i = unroller.at_time(ts_abs, &ts_abs.trans_predicate(), i)?;
            solver.assert_formula(&trans_i)?;
        }
        let bad_len = unroller.at_time(ts_abs, &property_abs.bad(manager), len)?;
        solver.assert_formula(&bad_len)?;

        let mut labels = Vec::with_capacity(self.abstraction.abs_values.len());
        let mut label_to_name: HashMap<Term, String> = HashMap::new();
        for name in self.abstraction.abs_values.keys() {
            let abs_var = ts_abs
                .state_var_named(name)
                .ok_or_else(|| VerificationError::internal("check_realizable: abs var missing"))?;
            let abs_var_0 = unroller.at_time(ts_abs, &abs_var, 0)?;
            let value_term = manager.mk_value(self.abstraction.abs_values[name].clone());
            let eq = manager.mk_eq(abs_var_0, value_term);
            let label = manager.mk_symbol(format!("cegar!lbl_{name}"), Sort::Bool);
            solver.assert_labelled(&label, &eq)?;
            labels.push(label.clone());
            label_to_name.insert(label, name.clone());
        }

        match solver.check_sat_assuming(&labels)? {
            SatResponse::Sat => Ok(RealizabilityOutcome::Realizable),
            SatResponse::Unknown => Ok(RealizabilityOutcome::Unknown),
            SatResponse::Unsat => {
                let core = solver.unsat_core(&labels)?;
                // §4.5: "the labels in the core identify the subset of
                // value-equalities needed to rule the trace out". A
                // degenerate empty core (the BMC skeleton alone was
                // already UNSAT) still must add at least one lemma to
                // guarantee refinement progress (§8 invariant 7), so fall
                // back to the full label set in that case.
                let chosen = if core.is_empty() { &labels } else { &core };
                let mut lemma_literals = Vec::with_capacity(chosen.len());
                for label in chosen {
                    if let Some(name) = label_to_name.get(label) {
                        let abs_var = ts_abs.state_var_named(name).expect("label names a declared abs var");
                        let value_term = manager.mk_value(self.abstraction.abs_values[name].clone());
                        lemma_literals.push(manager.mk_eq(abs_var, value_term));
                    }
                }
                Ok(RealizabilityOutcome::Spurious(lemma_literals))
            }
        }
    }

    /// Drops every `abs_<n>`-named entry from a witness's assignments,
    /// recovering the concrete-variable-only trace §6's `witness()`
    /// promises (abs vars are an internal CEGAR artefact, never part of
    /// the original transition system).
    fn project_to_concrete(&self, witness: &Witness) -> Witness {
        let steps = witness
            .steps
            .iter()
            .map(|step| {
                let mut assignment = StateAssignment::new();
                for (name, value) in &step.values {
                    if !self.abstraction.abs_values.contains_key(name) {
                        assignment.insert(name.clone(), value.clone());
                    }
                }
                assignment
            })
            .collect();
        Witness::new(steps)
    }

    pub fn check_until(&mut self, k: u32) -> VerificationResult<Verdict> {
        self.initialize()?;
        // Each successful refinement round consumes at least one
        // abs-var lemma (§8 invariant 7: "cannot produce the same
        // abstract counterexample twice"), so the number of rounds is
        // bounded by the number of abstracted literals; +1 covers the
        // first, lemma-free attempt. A concrete system with no state
        // variables still gets one attempt.
        let max_rounds = self.abstraction.abs_values.len() as u32 + self.concrete_state_var_count() as u32 + 1;

        for round in 0..max_rounds {
            log::debug!("cegar: refinement round {round}, {} lemmas so far", self.lemmas.len());
            let ts_abs = Rc::new(self.current_abstract_ts()?);
            let property_abs = self.abstraction.property.clone();
            let handler: Rc<dyn UnitHandler> = Rc::new(BitLevelHandler);
            let solver = Z3Solver::new(self.abstract_ctx, self.abstraction.manager.clone());
            let mut inner = Ic3Engine::new(ts_abs.clone(), property_abs.clone(), solver, handler);

            match inner.check_until(k)? {
                Verdict::Safe => return Ok(Verdict::Safe),
                Verdict::Unknown => return Ok(Verdict::Unknown),
                Verdict::Unsafe => {
                    let witness_abs = inner
                        .witness()
                        .cloned()
                        .ok_or_else(|| VerificationError::internal("UNSAFE verdict without a witness"))?;
                    match self.check_realizable(&ts_abs, &property_abs, &witness_abs)? {
                        RealizabilityOutcome::Realizable => {
                            self.witness = Some(self.project_to_concrete(&witness_abs));
                            return Ok(Verdict::Unsafe);
                        }
                        RealizabilityOutcome::Unknown => return Ok(Verdict::Unknown),
                        RealizabilityOutcome::Spurious(lemma_literals) => {
                            if lemma_literals.is_empty() {
                                return Err(VerificationError::internal(
                                    "spurious counterexample produced no refinement lemma",
                                ));
                            }
                            self.lemmas.push(self.abstraction.manager.mk_and(lemma_literals));
                        }
                    }
                }
            }
        }
        Ok(Verdict::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::Sort;
    use z3::Context;

    /// S5 (§8): `x, y` BV(8), `init: x=0 ∧ y=0`, `trans: x'=x+1 ∧
    /// y'=y+2`, `prop: y = 2x` (phrased as the non-negation so the
    /// property itself is the invariant). Bit-level IC3 cannot find the
    /// multiplicative relation directly, but value abstraction turns
    /// every constant into a frozen variable, and k-induction/IC3 over
    /// the abstracted system can still verify the *shape* of the
    /// recurrence once lemmas pin the abstracted `1` and `2` back down.
    fn counters_ts() -> (Rc<TermManager>, Rc<TransitionSystem>, Property) {
        let m = Rc::new(TermManager::new());
        let mut ts = TransitionSystem::new(m.clone());
        let (x, x_next) = ts.declare_state_var("x", Sort::BitVec(8));
        let (y, y_next) = ts.declare_state_var("y", Sort::BitVec(8));
        let zero = m.mk_bv(0, 8);
        let init = m.mk_and(vec![m.mk_eq(x.clone(), zero.clone()), m.mk_eq(y.clone(), zero)]);
        ts.set_init(init).unwrap();

        let one = m.mk_bv(1, 8);
        let two = m.mk_bv(2, 8);
        let x_step = m.mk_term(Op::Add, vec![x.clone(), one]);
        let y_step = m.mk_term(Op::Add, vec![y.clone(), two]);
        let trans = m.mk_and(vec![m.mk_eq(x_next, x_step), m.mk_eq(y_next, y_step)]);
        ts.set_trans_relational(trans).unwrap();

        let two_x = m.mk_term(Op::Add, vec![x.clone(), x.clone()]);
        let prop = m.mk_eq(y, two_x);
        let property = Property::new(prop).unwrap();
        (m, Rc::new(ts), property)
    }

    #[test]
    fn abstraction_replaces_every_value_literal_with_a_frozen_var() {
        let (_, ts, property) = counters_ts();
        let abstraction = abstract_values(&ts, &property).unwrap();
        // init: x=0, y=0 -> two fresh abs vars (one per zero occurrence,
        // each zero literal is hash-consed to the identical Term).
        // trans: x'=x+1, y'=y+2 -> one each for the `1` and `2` literals.
        assert_eq!(abstraction.abs_values.len(), 3, "0, 1 and 2 are the only distinct value literals");
        for name in abstraction.abs_values.keys() {
            let var = abstraction.ts.state_var_named(name).unwrap();
            // every abs var is frozen: next(abs) = abs is a trans conjunct
            assert!(abstraction.ts.trans_predicate().to_string().contains(&var.to_string()));
        }
    }

    #[test]
    fn cegar_proves_the_recurrence_safe() {
        let (_, ts, property) = counters_ts();
        let cfg = crate::solver::Z3Solver::default_config();
        let ctx = Context::new(&cfg);
        let mut prover = CegarProver::new(ts, property, &ctx).unwrap();
        assert_eq!(prover.check_until(4).unwrap(), Verdict::Safe);
    }

    #[test]
    fn translator_preserves_value_literals_across_managers() {
        let from = TermManager::new();
        let to = TermManager::new();
        let x_from = from.mk_symbol("x", Sort::BitVec(4));
        let x_to = to.mk_symbol("x", Sort::BitVec(4));
        let mut map = HashMap::new();
        map.insert(x_from.clone(), x_to.clone());

        let five = from.mk_bv(5, 4);
        let term = from.mk_term(Op::Add, vec![x_from, five]);

        let translator = Translator::new();
        let translated = translator.translate(&term, &to, &map).unwrap();
        let (op, children) = translated.op().unwrap();
        assert_eq!(op, Op::Add);
        assert_eq!(children[0], x_to);
        assert_eq!(children[1], to.mk_bv(5, 4));
    }
}
