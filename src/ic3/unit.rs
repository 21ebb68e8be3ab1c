//! IC3 unit handlers (§4.3): pluggable strategies for building the logical
//! cells that populate frames and proof goals, and for generalising them.
//!
//! "Do not use inheritance chains; tagged variants plus a handler record
//! suffice" (§9 "Polymorphic IC3 units") -- here, a single [`IC3Unit`] value
//! type plus a [`UnitHandler`] trait object injected at engine
//! construction, exactly mirroring that guidance.

use std::rc::Rc;

use crate::error::{VerificationError, VerificationResult};
use crate::term::{Term, TermManager};

/// A structured logical cell (§3 "IC3Unit"): either a clause (disjunction
/// of `children`, `negated == false`) or a cube (conjunction of
/// `children`, `negated == true`). `term` is the single-formula form kept
/// in sync with `children`/`negated` by the handler that built it.
#[derive(Clone)]
pub struct IC3Unit {
    pub term: Term,
    pub children: Vec<Term>,
    pub negated: bool,
}

impl PartialEq for IC3Unit {
    fn eq(&self, other: &Self) -> bool {
        self.term == other.term
    }
}
impl Eq for IC3Unit {}
impl std::hash::Hash for IC3Unit {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.term.hash(state);
    }
}

impl IC3Unit {
    /// `¬unit.term`, e.g. for asserting a blocked cube's clause form.
    pub fn negation_term(&self, manager: &TermManager) -> Term {
        manager.mk_not(self.term.clone())
    }
}

/// A pluggable strategy for building and manipulating [`IC3Unit`]s
/// (§4.3). Concrete kinds: boolean/bit-level clauses, predicate clauses
/// over a registered atom set, and syntax-guided equality cubes (IC3SA).
pub trait UnitHandler {
    /// Builds a clause: `term = ⋁ children`, `negated = false`.
    fn create(&self, manager: &TermManager, children: Vec<Term>) -> VerificationResult<IC3Unit>;

    /// Builds a cube: `term = ⋀ children`, `negated = true`.
    fn create_negated(&self, manager: &TermManager, children: Vec<Term>) -> VerificationResult<IC3Unit>;

    /// The dual unit: a clause's negation is the cube of the negated
    /// children, and vice versa.
    fn negate(&self, manager: &TermManager, u: &IC3Unit) -> VerificationResult<IC3Unit> {
        let negated_children: Vec<Term> = u.children.iter().map(|c| manager.mk_not(c.clone())).collect();
        if u.negated {
            self.create(manager, negated_children)
        } else {
            self.create_negated(manager, negated_children)
        }
    }

    /// Debug-time structural check (§4.3): `term` must actually be the
    /// disjunction/conjunction its `negated` flag claims over `children`.
    fn check_valid(&self, manager: &TermManager, u: &IC3Unit) -> bool {
        let rebuilt = if u.negated {
            manager.mk_and(u.children.clone())
        } else {
            manager.mk_or(u.children.clone())
        };
        rebuilt == u.term
    }

    /// Whether this handler only supports bit-vector-sorted state
    /// (§7 "Unsupported: ... IC3SA on non-BV sorts").
    fn requires_bitvec_sorts(&self) -> bool {
        false
    }

    /// Predecessor-generalisation variant (§4.3 "Predecessor generalization
    /// (variants)"). The default ("Bit-level: return the model-derived
    /// cube unchanged") also serves the predicate handler; [`SyntaxGuidedHandler`]
    /// overrides it with the IC3SA restriction-plus-equivalence-class
    /// strategy.
    fn generalize_predecessor(
        &self,
        _ts: &crate::ts::TransitionSystem,
        _manager: &TermManager,
        _solver: &mut dyn crate::solver::SmtSolver,
        cube: &IC3Unit,
    ) -> VerificationResult<IC3Unit> {
        Ok(cube.clone())
    }
}

/// Boolean/bit-level handler (§4.3 "Boolean / bit-level"): children may be
/// any boolean-sorted literal, no further restriction.
pub struct BitLevelHandler;

impl UnitHandler for BitLevelHandler {
    fn create(&self, manager: &TermManager, children: Vec<Term>) -> VerificationResult<IC3Unit> {
        validate_boolean_children(&children)?;
        let term = manager.mk_or(children.clone());
        Ok(IC3Unit { term, children, negated: false })
    }

    fn create_negated(&self, manager: &TermManager, children: Vec<Term>) -> VerificationResult<IC3Unit> {
        validate_boolean_children(&children)?;
        let term = manager.mk_and(children.clone());
        Ok(IC3Unit { term, children, negated: true })
    }
}

/// Predicate handler (§4.3 "Predicate"): children must be theory atoms
/// drawn from a registered predicate set `predset_`, rather than arbitrary
/// literals -- callers that want genuinely arbitrary children should use
/// [`BitLevelHandler`] instead.
pub struct PredicateHandler {
    predicate_set: Vec<Term>,
}

impl PredicateHandler {
    pub fn new(predicate_set: Vec<Term>) -> Self {
        Self { predicate_set }
    }

    pub fn predicate_set(&self) -> &[Term] {
        &self.predicate_set
    }

    fn validate_membership(&self, children: &[Term]) -> VerificationResult<()> {
        for c in children {
            let atom = strip_not(c);
            if !self.predicate_set.iter().any(|p| p == atom) {
                return Err(VerificationError::unsupported(format!(
                    "'{atom}' is not a registered predicate of this IC3 predicate handler"
                )));
            }
        }
        Ok(())
    }
}

impl UnitHandler for PredicateHandler {
    fn create(&self, manager: &TermManager, children: Vec<Term>) -> VerificationResult<IC3Unit> {
        self.validate_membership(&children)?;
        let term = manager.mk_or(children.clone());
        Ok(IC3Unit { term, children, negated: false })
    }

    fn create_negated(&self, manager: &TermManager, children: Vec<Term>) -> VerificationResult<IC3Unit> {
        self.validate_membership(&children)?;
        let term = manager.mk_and(children.clone());
        Ok(IC3Unit { term, children, negated: true })
    }
}

/// Syntax-guided equality handler (§4.3 "Syntax-guided equalities",
/// IC3SA): children are equalities, disequalities, or boolean symbols
/// drawn from a term abstraction built from sub-terms of `init`, `trans`
/// and `bad`. Membership is the caller's responsibility (the abstraction
/// is built once by [`super::engine::Ic3Engine::initialize`]); this
/// handler enforces only the shape of each child.
pub struct SyntaxGuidedHandler {
    /// `predset_` (§4.3 (a)): predicates evaluated under the model and
    /// unconditionally added as candidate literals during predecessor
    /// generalisation, independent of cone-of-influence membership.
    pub predicate_set: Vec<Term>,
}

impl SyntaxGuidedHandler {
    pub fn new(predicate_set: Vec<Term>) -> Self {
        Self { predicate_set }
    }
}

impl UnitHandler for SyntaxGuidedHandler {
    fn create(&self, manager: &TermManager, children: Vec<Term>) -> VerificationResult<IC3Unit> {
        validate_equality_shaped_children(&children)?;
        let term = manager.mk_or(children.clone());
        Ok(IC3Unit { term, children, negated: false })
    }

    fn create_negated(&self, manager: &TermManager, children: Vec<Term>) -> VerificationResult<IC3Unit> {
        validate_equality_shaped_children(&children)?;
        let term = manager.mk_and(children.clone());
        Ok(IC3Unit { term, children, negated: true })
    }

    fn requires_bitvec_sorts(&self) -> bool {
        true
    }

    /// §4.3 "Syntax-guided (IC3SA)": restrict `cube`'s literals to the
    /// structural cone of influence of its own term, then add (a) every
    /// registered predicate evaluated under the current model, (b)
    /// pairwise equalities within model-equivalence classes, and (c)
    /// pairwise disequalities between class representatives.
    fn generalize_predecessor(
        &self,
        ts: &crate::ts::TransitionSystem,
        manager: &TermManager,
        solver: &mut dyn crate::solver::SmtSolver,
        cube: &IC3Unit,
    ) -> VerificationResult<IC3Unit> {
        let restricted = crate::coi::restrict_to_cone(ts, &cube.term, &cube.children);

        let mut evaluated_predicates = Vec::new();
        for p in &self.predicate_set {
            let value = solver.get_value(p)?;
            evaluated_predicates.push(match value {
                crate::term::Value::Bool(true) => p.clone(),
                _ => manager.mk_not(p.clone()),
            });
        }

        let mut universe: Vec<Term> = restricted;
        universe.extend(self.predicate_set.iter().cloned());
        let classes = crate::coi::EquivalenceClasses::from_model(solver, universe)?;
        let synthesized = classes.synthesize_literals(manager);

        let mut children = Vec::new();
        children.extend(evaluated_predicates);
        children.extend(synthesized);
        if children.is_empty() {
            children = cube.children.clone();
        }
        self.create_negated(manager, children)
    }
}

fn validate_boolean_children(children: &[Term]) -> VerificationResult<()> {
    for c in children {
        if !c.sort().is_bool() {
            return Err(VerificationError::unsupported("IC3 unit children must be Bool-sorted"));
        }
    }
    Ok(())
}

fn validate_equality_shaped_children(children: &[Term]) -> VerificationResult<()> {
    use crate::term::Op;
    for c in children {
        let atom = strip_not(c);
        let is_equality_or_symbol = atom.is_symbol()
            || matches!(atom.op().map(|(op, _)| op), Some(Op::Equal) | Some(Op::Distinct));
        if !is_equality_or_symbol {
            return Err(VerificationError::unsupported(
                "syntax-guided IC3 unit children must be equalities, disequalities, or boolean symbols",
            ));
        }
    }
    Ok(())
}

fn strip_not(t: &Term) -> &Term {
    match t.op() {
        Some((crate::term::Op::Not, children)) => &children[0],
        _ => t,
    }
}

/// Constructs the unit handler named by an [`crate::options::EngineKind`],
/// boxed so the engine can be parameterised at runtime.
pub fn handler_for_engine(
    engine: crate::options::EngineKind,
    predicate_set: Vec<Term>,
) -> Rc<dyn UnitHandler> {
    match engine {
        crate::options::EngineKind::Ic3 if !predicate_set.is_empty() => Rc::new(PredicateHandler::new(predicate_set)),
        _ => Rc::new(BitLevelHandler),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::Sort;

    #[test]
    fn negate_swaps_clause_and_cube() {
        let m = TermManager::new();
        let handler = BitLevelHandler;
        let a = m.mk_symbol("a", Sort::Bool);
        let b = m.mk_symbol("b", Sort::Bool);
        let clause = handler.create(&m, vec![a.clone(), b.clone()]).unwrap();
        assert!(!clause.negated);

        let cube = handler.negate(&m, &clause).unwrap();
        assert!(cube.negated);
        assert_eq!(cube.children[0], m.mk_not(a));
        assert_eq!(cube.children[1], m.mk_not(b));
    }

    #[test]
    fn involution_recovers_equisatisfiable_unit() {
        let m = TermManager::new();
        let handler = BitLevelHandler;
        let a = m.mk_symbol("a", Sort::Bool);
        let b = m.mk_symbol("b", Sort::Bool);
        let clause = handler.create(&m, vec![a, b]).unwrap();
        let twice_negated = handler.negate(&m, &handler.negate(&m, &clause).unwrap()).unwrap();
        assert_eq!(twice_negated.children, clause.children);
        assert_eq!(twice_negated.negated, clause.negated);
    }

    #[test]
    fn predicate_handler_rejects_unregistered_atoms() {
        let m = TermManager::new();
        let p = m.mk_symbol("p", Sort::Bool);
        let q = m.mk_symbol("q", Sort::Bool);
        let handler = PredicateHandler::new(vec![p.clone()]);
        assert!(handler.create(&m, vec![p]).is_ok());
        assert!(handler.create(&m, vec![q]).is_err());
    }

    #[test]
    fn check_valid_detects_mismatched_term() {
        let m = TermManager::new();
        let handler = BitLevelHandler;
        let a = m.mk_symbol("a", Sort::Bool);
        let b = m.mk_symbol("b", Sort::Bool);
        let mut clause = handler.create(&m, vec![a, b]).unwrap();
        clause.term = m.mk_bool(true);
        assert!(!handler.check_valid(&m, &clause));
    }
}
