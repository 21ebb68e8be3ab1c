//! The IC3 engine state machine (§4.4): frame vector, proof-goal queue,
//! block/propagate/generalise, parameterised by a [`super::unit::UnitHandler`].

use std::collections::HashSet;
use std::rc::Rc;

use crate::error::{VerificationError, VerificationResult};
use crate::solver::{SatResponse, SmtSolver};
use crate::sort::Sort;
use crate::term::{Term, TermManager};
use crate::ts::{Property, TransitionSystem};
use crate::unroller::Unroller;
use crate::witness::{StateAssignment, Verdict, Witness};

use super::frame::FrameVec;
use super::goal::ProofGoal;
use super::unit::{IC3Unit, UnitHandler};

/// Outcome of `get_predecessor` (§4.4).
enum PredecessorOutcome {
    /// No predecessor exists; carries the minimal sub-unit extracted from
    /// the unsat core ("reduced c").
    None(IC3Unit),
    /// A predecessor was found; carries its cube and the input-variable
    /// assignment used on the transition into `c`.
    Found(IC3Unit, StateAssignment),
    Unknown,
}

pub struct Ic3Engine<S: SmtSolver> {
    ts: Rc<TransitionSystem>,
    manager: Rc<TermManager>,
    unroller: Unroller,
    property: Property,
    solver: S,
    handler: Rc<dyn UnitHandler>,
    frames: FrameVec,
    initialized: bool,
    step_0_done: bool,
    witness: Option<Witness>,
    next_label_counter: u32,
}

impl<S: SmtSolver> Ic3Engine<S> {
    pub fn new(ts: Rc<TransitionSystem>, property: Property, solver: S, handler: Rc<dyn UnitHandler>) -> Self {
        let manager = ts.manager().clone();
        let unroller = Unroller::new(manager.clone());
        let frames = FrameVec::new(&manager);
        Self {
            ts,
            manager,
            unroller,
            property,
            solver,
            handler,
            frames,
            initialized: false,
            step_0_done: false,
            witness: None,
            next_label_counter: 0,
        }
    }

    pub fn witness(&self) -> Option<&Witness> {
        self.witness.as_ref()
    }

    /// `check_ts` (§4.4 "initialize ... calls `check_ts`"): rejects a
    /// transition system the handler cannot support.
    fn check_ts(&self) -> VerificationResult<()> {
        if self.handler.requires_bitvec_sorts() {
            for sort in crate::ts::sorts_used(&self.ts) {
                if !matches!(sort, Sort::BitVec(_)) {
                    return Err(VerificationError::unsupported(
                        "this IC3 unit handler requires every state and input variable to be bit-vector sorted",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Idempotent (§4.4 "initialize"): asserts `label_init -> init`,
    /// `label_trans -> trans`, and frame 0 as `init`.
    pub fn initialize(&mut self) -> VerificationResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.check_ts()?;

        let init_0 = self.unroller.at_time(&self.ts, self.ts.init(), 0)?;
        self.solver.assert_labelled(&self.frames.label_init.clone(), &init_0)?;

        let trans_0 = self.unroller.at_time(&self.ts, &self.ts.trans_predicate(), 0)?;
        self.solver.assert_labelled(&self.frames.label_trans.clone(), &trans_0)?;

        // Frame 0's content *is* init: label_0 implies the same fact as
        // label_init (§4.4 "Frame 0 encodes the initial states via a label
        // for `init`").
        let label_0 = self.frames.label(0).clone();
        self.solver.assert_labelled(&label_0, &init_0)?;

        self.initialized = true;
        Ok(())
    }

    pub fn check_until(&mut self, k: u32) -> VerificationResult<Verdict> {
        self.initialize()?;

        if !self.step_0_done {
            if let Some(verdict) = self.step_0()? {
                return Ok(verdict);
            }
            self.step_0_done = true;
            self.frames.push_frame(&self.manager);
        }

        loop {
            let last = self.frames.len() - 1;
            loop {
                match self.intersects_bad(last)? {
                    SatResponse::Unsat => break,
                    SatResponse::Unknown => return Ok(Verdict::Unknown),
                    SatResponse::Sat => {
                        let state_vars = self.ts.state_vars().to_vec();
                        let cube = self.get_unit(&state_vars, 0)?;
                        let goal = ProofGoal::root(cube, last as u32);
                        if let Some(verdict) = self.block_all(goal)? {
                            return Ok(verdict);
                        }
                    }
                }
            }

            if let Some(verdict) = self.propagate()? {
                return Ok(verdict);
            }

            if (last as u32) >= k {
                return Ok(Verdict::Unknown);
            }
            self.frames.push_frame(&self.manager);
            log::debug!("ic3: pushed frame {}", self.frames.len() - 1);
        }
    }

    /// `step_0` (§4.4): checks `init ∧ bad`.
    fn step_0(&mut self) -> VerificationResult<Option<Verdict>> {
        let bad_0 = self.unroller.at_time(&self.ts, &self.property.bad(&self.manager), 0)?;
        self.solver.push();
        self.solver.assert_formula(&bad_0)?;
        let response = self.solver.check_sat_assuming(&[self.frames.label_init.clone()])?;
        let outcome = match response {
            SatResponse::Sat => {
                let state_vars = self.ts.state_vars().to_vec();
                let cube = self.get_unit(&state_vars, 0)?;
                let goal = ProofGoal::root(cube, 0);
                self.witness = Some(self.reconstruct_witness(&goal)?);
                Some(Verdict::Unsafe)
            }
            SatResponse::Unsat => None,
            SatResponse::Unknown => Some(Verdict::Unknown),
        };
        self.solver.pop(1);
        Ok(outcome)
    }

    fn intersects_bad(&mut self, frame_index: usize) -> VerificationResult<SatResponse> {
        let bad_0 = self.unroller.at_time(&self.ts, &self.property.bad(&self.manager), 0)?;
        self.solver.push();
        self.solver.assert_formula(&bad_0)?;
        let assumptions = self.frames.activation_labels(frame_index);
        let response = self.solver.check_sat_assuming(&assumptions)?;
        self.solver.pop(1);
        Ok(response)
    }

    /// `get_unit` from the current model: one equality literal per
    /// variable in `vars`, anchored at time `step`, negated into a cube.
    fn get_unit(&mut self, vars: &[Term], step: u64) -> VerificationResult<IC3Unit> {
        let mut literals = Vec::with_capacity(vars.len());
        for v in vars {
            let anchored = self.unroller.at_time(&self.ts, v, step)?;
            let value = self.solver.get_value(&anchored)?;
            let value_term = self.manager.mk_value(value);
            literals.push(self.manager.mk_eq(v.clone(), value_term));
        }
        self.handler.create_negated(&self.manager, literals)
    }

    /// Reads the current model's input-variable assignment at time `step`.
    fn model_inputs(&mut self, step: u64) -> VerificationResult<StateAssignment> {
        let mut assignment = StateAssignment::new();
        for v in self.ts.input_vars().to_vec() {
            let name = v.symbol_name().unwrap_or_default().to_string();
            let anchored = self.unroller.at_time(&self.ts, &v, step)?;
            assignment.insert(name, self.solver.get_value(&anchored)?);
        }
        Ok(assignment)
    }

    /// Proof-goal discipline (§4.4): processes goals smallest-frame-first.
    fn block_all(&mut self, initial: ProofGoal) -> VerificationResult<Option<Verdict>> {
        let mut queue = vec![initial];
        while let Some(pos) = queue.iter().enumerate().min_by_key(|(_, g)| g.frame()).map(|(i, _)| i) {
            let goal = queue.remove(pos);
            let i = goal.frame() as usize;

            match self.get_predecessor(i, goal.unit())? {
                PredecessorOutcome::Unknown => return Ok(Some(Verdict::Unknown)),
                PredecessorOutcome::None(reduced) => {
                    let clause = self.inductive_generalize(i, &reduced)?;
                    let h = self.find_highest_frame(i, &clause)?;
                    self.add_unit_to_frame(h, clause)?;
                }
                PredecessorOutcome::Found(pred_cube, inputs) => {
                    if i == 0 {
                        let root = ProofGoal::earlier(pred_cube, 0, goal, inputs);
                        self.witness = Some(self.reconstruct_witness(&root)?);
                        return Ok(Some(Verdict::Unsafe));
                    }
                    let pred_unit =
                        self.handler.generalize_predecessor(&self.ts, &self.manager, &mut self.solver, &pred_cube)?;
                    let earlier = ProofGoal::earlier(pred_unit, (i - 1) as u32, goal.clone(), inputs);
                    queue.push(earlier);
                    queue.push(goal);
                }
            }
        }
        Ok(None)
    }

    /// `get_predecessor(i, c)` (§4.4).
    fn get_predecessor(&mut self, i: usize, c: &IC3Unit) -> VerificationResult<PredecessorOutcome> {
        let c_next = self.ts.prime(&c.term);
        let c_next_0 = self.unroller.at_time(&self.ts, &c_next, 0)?;
        let not_c_0 = self.unroller.at_time(&self.ts, &self.manager.mk_not(c.term.clone()), 0)?;

        let from = i.saturating_sub(1);
        let mut assumptions = self.frames.activation_labels(from);
        assumptions.push(self.frames.label_trans.clone());

        self.solver.push();
        self.solver.assert_formula(&c_next_0)?;
        self.solver.assert_formula(&not_c_0)?;
        let response = self.solver.check_sat_assuming(&assumptions)?;

        let outcome = match response {
            SatResponse::Sat => {
                let state_vars = self.ts.state_vars().to_vec();
                let cube = self.get_unit(&state_vars, 0)?;
                let inputs = self.model_inputs(0)?;
                self.solver.pop(1);
                PredecessorOutcome::Found(cube, inputs)
            }
            SatResponse::Unsat => {
                self.solver.pop(1);
                PredecessorOutcome::None(self.minimize_cube_via_core(i, c)?)
            }
            SatResponse::Unknown => {
                self.solver.pop(1);
                PredecessorOutcome::Unknown
            }
        };
        Ok(outcome)
    }

    /// Extracts an unsat core over labelled literals of `c` to produce a
    /// minimal "reduced c" (§4.4 "`get_predecessor`... UNSAT: extract an
    /// unsat core over labelled literals of c").
    fn minimize_cube_via_core(&mut self, i: usize, c: &IC3Unit) -> VerificationResult<IC3Unit> {
        self.solver.push();
        let mut labelled = Vec::with_capacity(c.children.len());
        for lit in &c.children {
            let label = self.fresh_label();
            let lit_0 = self.unroller.at_time(&self.ts, lit, 0)?;
            self.solver.assert_labelled(&label, &lit_0)?;
            labelled.push((label, lit.clone()));
        }
        let c_next = self.ts.prime(&c.term);
        let c_next_0 = self.unroller.at_time(&self.ts, &c_next, 0)?;
        self.solver.assert_formula(&c_next_0)?;

        let from = i.saturating_sub(1);
        let mut assumptions: Vec<Term> = labelled.iter().map(|(l, _)| l.clone()).collect();
        assumptions.extend(self.frames.activation_labels(from));
        assumptions.push(self.frames.label_trans.clone());

        let _ = self.solver.check_sat_assuming(&assumptions)?;
        let core: HashSet<Term> = self.solver.unsat_core(&assumptions)?.into_iter().collect();
        self.solver.pop(1);

        let kept: Vec<Term> = labelled
            .into_iter()
            .filter(|(label, _)| core.contains(label))
            .map(|(_, lit)| lit)
            .collect();
        let kept = if kept.is_empty() { c.children.clone() } else { kept };
        self.handler.create_negated(&self.manager, kept)
    }

    /// Inductive generalisation (§4.4): greedily drops literals of `c`
    /// that are not needed for relative inductiveness to `F_{i-1}`, then
    /// returns the negation of what remains (a clause).
    fn inductive_generalize(&mut self, i: usize, c: &IC3Unit) -> VerificationResult<IC3Unit> {
        let mut literals = c.children.clone();
        let mut idx = 0;
        while idx < literals.len() {
            if literals.len() == 1 {
                break;
            }
            let mut candidate = literals.clone();
            candidate.remove(idx);
            if self.relatively_inductive(i, &candidate)? {
                literals = candidate;
            } else {
                idx += 1;
            }
        }
        let cube = self.handler.create_negated(&self.manager, literals)?;
        self.handler.negate(&self.manager, &cube)
    }

    /// `F_{i-1} ∧ ¬cube ∧ T ∧ cube'` UNSAT?
    fn relatively_inductive(&mut self, i: usize, literals: &[Term]) -> VerificationResult<bool> {
        let cube_term = self.manager.mk_and(literals.to_vec());
        let not_cube = self.manager.mk_not(cube_term.clone());
        let cube_next = self.ts.prime(&cube_term);

        let not_cube_0 = self.unroller.at_time(&self.ts, &not_cube, 0)?;
        let cube_next_0 = self.unroller.at_time(&self.ts, &cube_next, 0)?;

        let from = i.saturating_sub(1);
        let mut assumptions = self.frames.activation_labels(from);
        assumptions.push(self.frames.label_trans.clone());

        self.solver.push();
        self.solver.assert_formula(&not_cube_0)?;
        self.solver.assert_formula(&cube_next_0)?;
        let response = self.solver.check_sat_assuming(&assumptions)?;
        self.solver.pop(1);
        Ok(response == SatResponse::Unsat)
    }

    /// `find_highest_frame` (§4.4): highest `h >= from` with
    /// `F_h ∧ T ∧ ¬u'` UNSAT.
    fn find_highest_frame(&mut self, from: usize, unit: &IC3Unit) -> VerificationResult<usize> {
        let mut highest = from;
        for h in (from + 1)..self.frames.len() {
            if self.unit_blocked_at(h, unit)? {
                highest = h;
            } else {
                break;
            }
        }
        Ok(highest)
    }

    fn unit_blocked_at(&mut self, h: usize, unit: &IC3Unit) -> VerificationResult<bool> {
        let not_u_next = self.ts.prime(&self.manager.mk_not(unit.term.clone()));
        let not_u_next_0 = self.unroller.at_time(&self.ts, &not_u_next, 0)?;
        let mut assumptions = self.frames.activation_labels(h);
        assumptions.push(self.frames.label_trans.clone());

        self.solver.push();
        self.solver.assert_formula(&not_u_next_0)?;
        let response = self.solver.check_sat_assuming(&assumptions)?;
        self.solver.pop(1);
        Ok(response == SatResponse::Unsat)
    }

    /// Asserts `label_h -> unit` in the same `@0` current-state namespace
    /// every other frame/trans/bad assertion lives in (`initialize`,
    /// `intersects_bad`, `relatively_inductive`, `unit_blocked_at`):
    /// `unit.term` is built by `get_unit` over the base state variables, so
    /// it must be timed at step 0 before it shares any constants with the
    /// rest of the persistent context.
    fn add_unit_to_frame(&mut self, h: usize, unit: IC3Unit) -> VerificationResult<()> {
        let label = self.frames.label(h).clone();
        let unit_0 = self.unroller.at_time(&self.ts, &unit.term, 0)?;
        self.solver.assert_labelled(&label, &unit_0)?;
        self.frames.frame_mut(h).add(unit);
        Ok(())
    }

    /// Propagation (§4.4): pushes each frame's units forward when they
    /// remain inductive, and declares SAFE if an intermediate frame
    /// empties out (`F_i ≡ F_{i+1}`).
    fn propagate(&mut self) -> VerificationResult<Option<Verdict>> {
        let top = self.frames.len() - 1;
        for i in 1..top {
            let units: Vec<IC3Unit> = self.frames.frame(i).units().to_vec();
            for u in units {
                if self.unit_blocked_at(i, &u)? {
                    self.frames.frame_mut(i).remove(&u);
                    self.add_unit_to_frame(i + 1, u)?;
                }
            }
        }
        for i in 1..top {
            if self.frames.frame(i).units().is_empty() {
                return Ok(Some(Verdict::Safe));
            }
        }
        Ok(None)
    }

    fn reconstruct_witness(&self, goal_at_init: &ProofGoal) -> VerificationResult<Witness> {
        let chain = goal_at_init.chain_from_init();
        let mut steps = Vec::with_capacity(chain.len());
        for (idx, (unit, inputs)) in chain.iter().enumerate() {
            let mut assignment = self.state_assignment_from_cube(unit)?;
            if let Some(inputs) = inputs {
                for (name, value) in &inputs.values {
                    assignment.insert(name.clone(), value.clone());
                }
            }
            steps.push(assignment);
            let _ = idx;
        }
        Ok(Witness::new(steps))
    }

    /// Converts a cube's `var = value` equality literals back into a
    /// [`StateAssignment`].
    fn state_assignment_from_cube(&self, unit: &IC3Unit) -> VerificationResult<StateAssignment> {
        use crate::term::Op;
        let mut assignment = StateAssignment::new();
        for lit in &unit.children {
            if let Some((Op::Equal, children)) = lit.op() {
                let (sym, val) = match (children[0].symbol_name(), children[1].as_value()) {
                    (Some(_), Some(v)) => (&children[0], v.clone()),
                    _ => match (children[1].symbol_name(), children[0].as_value()) {
                        (Some(_), Some(v)) => (&children[1], v.clone()),
                        _ => continue,
                    },
                };
                assignment.insert(sym.symbol_name().unwrap_or_default().to_string(), val);
            }
        }
        Ok(assignment)
    }

    fn fresh_label(&mut self) -> Term {
        let label = self.manager.mk_symbol(format!("ic3!lit_{}", self.next_label_counter), Sort::Bool);
        self.next_label_counter += 1;
        label
    }
}
