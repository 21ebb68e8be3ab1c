//! K-induction prover (§4.2).
//!
//! Alternates a **base step**, which bounded-model-checks the property up
//! to the current depth, with an **inductive step**, which tries to prove
//! the property an invariant of the simple-path-restricted relation. Both
//! steps share one incremental solver context; once a depth is proved by
//! either step the corresponding fact (`prop@i`, or a depth's simple-path
//! disjunction) is kept asserted for every later call, per §9 open
//! question (a) and §5's "assertions that persist across operations are
//! added at context level 0".

use std::rc::Rc;

use crate::error::{VerificationError, VerificationResult};
use crate::solver::{SatResponse, SmtSolver};
use crate::term::TermManager;
use crate::ts::{Property, TransitionSystem};
use crate::unroller::Unroller;
use crate::witness::{StateAssignment, Verdict, Witness};

/// Drives L0+L1 with a persistent incremental solver context (§4.2).
pub struct KInductionProver<S: SmtSolver> {
    ts: Rc<TransitionSystem>,
    manager: Rc<TermManager>,
    unroller: Unroller,
    property: Property,
    solver: S,
    initialized: bool,
    /// Next depth whose base step has not yet been attempted.
    next_base_depth: u32,
    /// Highest depth proved safe by induction so far this run; monotone
    /// non-decreasing per §5 "Ordering guarantees".
    reached_k: u32,
    /// Per-depth simple-path disjunction, accumulated across calls (§4.2
    /// "Simple-path constraint"; index `i` holds `⋀_{j<i} ⋁_s (s@i ≠ s@j)`).
    simple_path_terms: Vec<crate::term::Term>,
    witness: Option<Witness>,
}

impl<S: SmtSolver> KInductionProver<S> {
    pub fn new(ts: Rc<TransitionSystem>, property: Property, solver: S) -> Self {
        let manager = ts.manager().clone();
        let unroller = Unroller::new(manager.clone());
        Self {
            ts,
            manager,
            unroller,
            property,
            solver,
            initialized: false,
            next_base_depth: 0,
            reached_k: 0,
            simple_path_terms: Vec::new(),
            witness: None,
        }
    }

    /// Idempotent: asserts `init@0` once.
    pub fn initialize(&mut self) -> VerificationResult<()> {
        if self.initialized {
            return Ok(());
        }
        let init_0 = self.unroller.at_time(&self.ts, self.ts.init(), 0)?;
        self.solver.assert_formula(&init_0)?;
        self.initialized = true;
        Ok(())
    }

    pub fn witness(&self) -> Option<&Witness> {
        self.witness.as_ref()
    }

    pub fn reached_k(&self) -> u32 {
        self.reached_k
    }

    /// Drives depths `self.next_base_depth..=k`. May be called again with a
    /// larger `k` after an `Unknown`/inconclusive result.
    pub fn check_until(&mut self, k: u32) -> VerificationResult<Verdict> {
        self.initialize()?;
        let mut depth = self.next_base_depth;
        while depth <= k {
            log::debug!("k-induction: base step at depth {depth}");
            if let Some(verdict) = self.base_step(depth)? {
                return Ok(verdict);
            }
            self.next_base_depth = depth + 1;

            match self.inductive_step(depth)? {
                Some(Verdict::Safe) => return Ok(Verdict::Safe),
                Some(Verdict::Unknown) => return Ok(Verdict::Unknown),
                Some(Verdict::Unsafe) => {
                    return Err(VerificationError::internal(
                        "inductive step cannot itself report UNSAFE",
                    ))
                }
                None => self.reached_k = depth,
            }
            depth += 1;
        }
        Ok(Verdict::Unknown)
    }

    /// Base step at depth `i` (§4.2): extends the persistent BMC unrolling
    /// by `trans@(i-1)`, checks `¬prop@i` under a temporary push, and on
    /// UNSAT asserts `prop@i` permanently so later depths do not redo it.
    fn base_step(&mut self, i: u32) -> VerificationResult<Option<Verdict>> {
        if i > 0 {
            let trans_prev = self.unroller.at_time(&self.ts, &self.ts.trans_predicate(), i - 1)?;
            self.solver.assert_formula(&trans_prev)?;
        }

        let prop_i = self.unroller.at_time(&self.ts, &self.property.prop, i)?;
        let bad_i = self.manager.mk_not(prop_i.clone());

        self.solver.push();
        self.solver.assert_formula(&bad_i)?;
        let response = self.solver.check_sat()?;
        let outcome = match response {
            SatResponse::Sat => {
                self.witness = Some(self.extract_witness(i)?);
                Some(Verdict::Unsafe)
            }
            SatResponse::Unsat => None,
            SatResponse::Unknown => Some(Verdict::Unknown),
        };
        self.solver.pop(1);

        if outcome.is_none() {
            self.solver.assert_formula(&prop_i)?;
        }
        Ok(outcome)
    }

    /// Inductive step at depth `i` (§4.2): under a temporary push, links
    /// state `i` to `i+1` via `trans@i`, asserts the accumulated
    /// simple-path constraint, and checks `¬prop@(i+1)`.
    fn inductive_step(&mut self, i: u32) -> VerificationResult<Option<Verdict>> {
        let trans_i = self.unroller.at_time(&self.ts, &self.ts.trans_predicate(), i)?;
        let simple_path = self.simple_path_constraint(i)?;
        let prop_next = self.unroller.at_time(&self.ts, &self.property.prop, i + 1)?;
        let bad_next = self.manager.mk_not(prop_next);

        self.solver.push();
        self.solver.assert_formula(&trans_i)?;
        self.solver.assert_formula(&simple_path)?;
        self.solver.assert_formula(&bad_next)?;
        let response = self.solver.check_sat()?;
        self.solver.pop(1);

        Ok(match response {
            SatResponse::Unsat => Some(Verdict::Safe),
            SatResponse::Sat => None,
            SatResponse::Unknown => Some(Verdict::Unknown),
        })
    }

    fn simple_path_constraint(&mut self, i: u32) -> VerificationResult<crate::term::Term> {
        let mut disjuncts_per_j = Vec::new();
        for j in 0..i {
            let mut disjuncts = Vec::new();
            for s in self.ts.state_vars() {
                let s_i = self.unroller.at_time(&self.ts, s, i)?;
                let s_j = self.unroller.at_time(&self.ts, s, j)?;
                disjuncts.push(self.manager.mk_distinct(s_i, s_j));
            }
            disjuncts_per_j.push(self.manager.mk_or(disjuncts));
        }
        let term_i = self.manager.mk_and(disjuncts_per_j);
        self.simple_path_terms.push(term_i);
        Ok(self.manager.mk_and(self.simple_path_terms.clone()))
    }

    /// Reconstructs the counterexample trace found by `base_step(i)`:
    /// steps `0..=i`, each carrying every state variable's value, plus
    /// (for steps `0..i`) every input variable's value (§6 "witness()").
    fn extract_witness(&mut self, i: u32) -> VerificationResult<Witness> {
        let mut steps = Vec::with_capacity(i as usize + 1);
        for t in 0..=i {
            let mut assignment = StateAssignment::new();
            for s in self.ts.state_vars().to_vec() {
                let name = s.symbol_name().unwrap_or_default().to_string();
                let at_t = self.unroller.at_time(&self.ts, &s, t)?;
                assignment.insert(name, self.solver.get_value(&at_t)?);
            }
            if t < i {
                for v in self.ts.input_vars().to_vec() {
                    let name = v.symbol_name().unwrap_or_default().to_string();
                    let at_t = self.unroller.at_time(&self.ts, &v, t)?;
                    assignment.insert(name, self.solver.get_value(&at_t)?);
                }
            }
            steps.push(assignment);
        }
        Ok(Witness::new(steps))
    }
}
