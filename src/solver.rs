//! The logical backend (§4's "L0 -- Logical kernel", §6 "External
//! interfaces: the back-end collaborator").
//!
//! [`SmtSolver`] is the uniform handle every engine programs against:
//! incremental push/pop, `assert_formula`, `check_sat`/`check_sat_assuming`,
//! model extraction and unsat cores. [`Z3Solver`] is the only implementation,
//! generalising the teacher crate's one-shot `Verifier`/`VerificationContext`
//! (which built a fresh `Context` per check and could not push/pop) into a
//! single persistent incremental context, as the engines above it require.

use std::collections::HashMap;
use std::rc::Rc;

use z3::ast::{Ast, Bool as Z3Bool, Dynamic, BV as Z3Bv};
use z3::{Config, Context, SatResult, Solver as Z3NativeSolver};

use crate::error::{VerificationError, VerificationResult};
use crate::sort::Sort;
use crate::term::{Op, Term, Value};

/// The verdict of a single `check_sat`/`check_sat_assuming` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatResponse {
    Sat,
    Unsat,
    Unknown,
}

/// Uniform handle to an incremental SMT solver (§6). Engines are written
/// against this trait, not against `Z3Solver` directly, so that the
/// K-induction, IC3 and CEGAR engines never name a concrete back-end.
pub trait SmtSolver {
    /// Asserts `formula` at the current context level.
    fn assert_formula(&mut self, formula: &Term) -> VerificationResult<()>;

    /// Asserts `formula` labelled by `label` (an already-asserted boolean
    /// symbol), i.e. effectively `label -> formula`, so that later
    /// `check_sat_assuming` calls can activate or deactivate it by
    /// including or excluding `label`. Used by IC3's frame activation
    /// labels (§4.4 "Frames").
    fn assert_labelled(&mut self, label: &Term, formula: &Term) -> VerificationResult<()>;

    /// Opens a new context level; every assertion made after this call is
    /// undone by the matching `pop`.
    fn push(&mut self);

    /// Closes `n` context levels, undoing every assertion made since.
    fn pop(&mut self, n: u32);

    /// Checks satisfiability of everything asserted so far.
    fn check_sat(&mut self) -> VerificationResult<SatResponse>;

    /// Checks satisfiability of everything asserted so far, together with
    /// `assumptions` treated as unit literals for this call only (not
    /// persisted). Used to activate frame labels without re-asserting
    /// frame contents (§4.4).
    fn check_sat_assuming(&mut self, assumptions: &[Term]) -> VerificationResult<SatResponse>;

    /// The model's value for `term`, valid only immediately after a `Sat`
    /// response and before the next `push`/`pop`/`check_sat*` call.
    fn get_value(&mut self, term: &Term) -> VerificationResult<Value>;

    /// The subset of `assumptions` from the most recent `Sat == Unsat`
    /// `check_sat_assuming` call that the solver actually used to derive
    /// unsatisfiability. Used by IC3's `get_predecessor` to extract a
    /// minimal blocking core (§4.4) and by CEGAR-values refinement (§4.5).
    fn unsat_core(&mut self, assumptions: &[Term]) -> VerificationResult<Vec<Term>>;
}

/// A push/pop incremental Z3 context, owning both the `z3::Context` and
/// the live `Solver`, plus the bidirectional map between [`Term`]s and
/// native Z3 ASTs needed to cross the boundary in both directions (model
/// values must be read back as [`Value`]s).
pub struct Z3Solver<'ctx> {
    ctx: &'ctx Context,
    solver: Z3NativeSolver<'ctx>,
    manager: Rc<crate::term::TermManager>,
    cache: HashMap<Term, Dynamic<'ctx>>,
}

impl<'ctx> Z3Solver<'ctx> {
    pub fn new(ctx: &'ctx Context, manager: Rc<crate::term::TermManager>) -> Self {
        Self {
            ctx,
            solver: Z3NativeSolver::new(ctx),
            manager,
            cache: HashMap::new(),
        }
    }

    /// A `Config` with a 10-second solver timeout, matching the teacher
    /// crate's default (`solver.rs`'s original `Verifier::new`).
    pub fn default_config() -> Config {
        let mut cfg = Config::new();
        cfg.set_param_value("timeout", "10000");
        cfg
    }

    /// Encodes `term` into a native Z3 `Dynamic`, caching by `Term`
    /// identity so repeated encodings of a shared sub-term (common after
    /// hash-consing and unrolling) are free after the first.
    fn encode(&mut self, term: &Term) -> VerificationResult<Dynamic<'ctx>> {
        if let Some(hit) = self.cache.get(term) {
            return Ok(hit.clone());
        }
        let encoded = self.encode_uncached(term)?;
        self.cache.insert(term.clone(), encoded.clone());
        Ok(encoded)
    }

    fn encode_uncached(&mut self, term: &Term) -> VerificationResult<Dynamic<'ctx>> {
        if let Some(v) = term.as_value() {
            return Ok(self.encode_value(v));
        }
        if let Some(name) = term.symbol_name() {
            return Ok(self.declare(name, term.sort()));
        }
        let (op, children) = term
            .op()
            .expect("term is neither a value, a symbol, nor an application");
        let mut args = Vec::with_capacity(children.len());
        for c in children {
            args.push(self.encode(c)?);
        }
        self.encode_op(op, &args, term.sort())
    }

    fn encode_value(&self, v: &Value) -> Dynamic<'ctx> {
        match v {
            Value::Bool(b) => Dynamic::from(Z3Bool::from_bool(self.ctx, *b)),
            Value::BitVec { width, value } => {
                Dynamic::from(Z3Bv::from_u64(self.ctx, *value, *width))
            }
            Value::Int(n) => Dynamic::from(z3::ast::Int::from_i64(self.ctx, *n)),
        }
    }

    fn declare(&self, name: &str, sort: &Sort) -> Dynamic<'ctx> {
        match sort {
            Sort::Bool => Dynamic::from(Z3Bool::new_const(self.ctx, name)),
            Sort::BitVec(w) => Dynamic::from(Z3Bv::new_const(self.ctx, name, *w)),
            Sort::Int => Dynamic::from(z3::ast::Int::new_const(self.ctx, name)),
            Sort::Array(index, elem) => {
                let index_sort = self.z3_sort(index);
                let elem_sort = self.z3_sort(elem);
                Dynamic::from(z3::ast::Array::new_const(self.ctx, name, &index_sort, &elem_sort))
            }
            Sort::Function(..) => {
                // Uninterpreted predicates are modelled as Bool constants keyed
                // by their fully-applied name (§4.3 "Predicate"); functions of
                // non-zero arity are encoded at the call site via `Op::Apply`.
                Dynamic::from(Z3Bool::new_const(self.ctx, name))
            }
        }
    }

    fn z3_sort(&self, sort: &Sort) -> z3::Sort<'ctx> {
        match sort {
            Sort::Bool => z3::Sort::bool(self.ctx),
            Sort::BitVec(w) => z3::Sort::bitvector(self.ctx, *w),
            Sort::Int => z3::Sort::int(self.ctx),
            Sort::Array(index, elem) => {
                z3::Sort::array(self.ctx, &self.z3_sort(index), &self.z3_sort(elem))
            }
            Sort::Function(..) => z3::Sort::bool(self.ctx),
        }
    }

    fn encode_op(&mut self, op: Op, args: &[Dynamic<'ctx>], result: &Sort) -> VerificationResult<Dynamic<'ctx>> {
        macro_rules! as_bool {
            ($d:expr) => {
                $d.as_bool().ok_or_else(|| VerificationError::internal("expected Bool-sorted argument"))?
            };
        }
        macro_rules! as_bv {
            ($d:expr) => {
                $d.as_bv().ok_or_else(|| VerificationError::internal("expected BitVec-sorted argument"))?
            };
        }
        macro_rules! as_int {
            ($d:expr) => {
                $d.as_int().ok_or_else(|| VerificationError::internal("expected Int-sorted argument"))?
            };
        }

        let out = match op {
            Op::Not => Dynamic::from(as_bool!(&args[0]).not()),
            Op::And => {
                let bs: Vec<Z3Bool> = args.iter().map(|a| as_bool!(a)).collect();
                let refs: Vec<&Z3Bool> = bs.iter().collect();
                Dynamic::from(Z3Bool::and(self.ctx, &refs))
            }
            Op::Or => {
                let bs: Vec<Z3Bool> = args.iter().map(|a| as_bool!(a)).collect();
                let refs: Vec<&Z3Bool> = bs.iter().collect();
                Dynamic::from(Z3Bool::or(self.ctx, &refs))
            }
            Op::Implies => Dynamic::from(as_bool!(&args[0]).implies(&as_bool!(&args[1]))),
            Op::Equal => Dynamic::from(args[0]._eq(&args[1])),
            Op::Distinct => Dynamic::from(Z3Bool::distinct(self.ctx, &[&args[0], &args[1]])),
            Op::Ite => as_bool!(&args[0]).ite(&args[1], &args[2]),

            Op::Add if result.is_bitvec() => Dynamic::from(as_bv!(&args[0]).bvadd(&as_bv!(&args[1]))),
            Op::Add => Dynamic::from(as_int!(&args[0]) + as_int!(&args[1])),
            Op::Sub if result.is_bitvec() => Dynamic::from(as_bv!(&args[0]).bvsub(&as_bv!(&args[1]))),
            Op::Sub => Dynamic::from(as_int!(&args[0]) - as_int!(&args[1])),
            Op::Mul | Op::BVMul if result.is_bitvec() => Dynamic::from(as_bv!(&args[0]).bvmul(&as_bv!(&args[1]))),
            Op::Mul => Dynamic::from(as_int!(&args[0]) * as_int!(&args[1])),
            Op::Div | Op::IntDiv => Dynamic::from(as_int!(&args[0]).div(&as_int!(&args[1]))),
            Op::Mod => Dynamic::from(as_int!(&args[0]).modulo(&as_int!(&args[1]))),
            Op::Abs => {
                let zero = z3::ast::Int::from_i64(self.ctx, 0);
                let n = as_int!(&args[0]);
                Dynamic::from(n.lt(&zero).ite(&n.clone().unary_minus(), &n))
            }
            Op::Pow => Dynamic::from(as_int!(&args[0]).power(&as_int!(&args[1]))),

            Op::BVUdiv => Dynamic::from(as_bv!(&args[0]).bvudiv(&as_bv!(&args[1]))),
            Op::BVSdiv => Dynamic::from(as_bv!(&args[0]).bvsdiv(&as_bv!(&args[1]))),
            Op::BVUrem => Dynamic::from(as_bv!(&args[0]).bvurem(&as_bv!(&args[1]))),
            Op::BVSrem => Dynamic::from(as_bv!(&args[0]).bvsrem(&as_bv!(&args[1]))),
            Op::BVSmod => Dynamic::from(as_bv!(&args[0]).bvsmod(&as_bv!(&args[1]))),
            Op::BVComp => Dynamic::from(as_bv!(&args[0])._eq(&as_bv!(&args[1]))),
            Op::BVUlt => Dynamic::from(as_bv!(&args[0]).bvult(&as_bv!(&args[1]))),
            Op::BVUle => Dynamic::from(as_bv!(&args[0]).bvule(&as_bv!(&args[1]))),
            Op::BVSlt => Dynamic::from(as_bv!(&args[0]).bvslt(&as_bv!(&args[1]))),
            Op::BVSle => Dynamic::from(as_bv!(&args[0]).bvsle(&as_bv!(&args[1]))),
            Op::BVNot => Dynamic::from(as_bv!(&args[0]).bvnot()),
            Op::BVAnd => Dynamic::from(as_bv!(&args[0]).bvand(&as_bv!(&args[1]))),
            Op::BVOr => Dynamic::from(as_bv!(&args[0]).bvor(&as_bv!(&args[1]))),
            Op::BVXor => Dynamic::from(as_bv!(&args[0]).bvxor(&as_bv!(&args[1]))),
            Op::BVShl => Dynamic::from(as_bv!(&args[0]).bvshl(&as_bv!(&args[1]))),
            Op::BVLshr => Dynamic::from(as_bv!(&args[0]).bvlshr(&as_bv!(&args[1]))),
            Op::BVAshr => Dynamic::from(as_bv!(&args[0]).bvashr(&as_bv!(&args[1]))),
            Op::BVNeg => Dynamic::from(as_bv!(&args[0]).bvneg()),
            Op::Concat => Dynamic::from(as_bv!(&args[0]).concat(&as_bv!(&args[1]))),
            Op::Extract { high, low } => Dynamic::from(as_bv!(&args[0]).extract(high, low)),
            Op::ZeroExtend { bits } => Dynamic::from(as_bv!(&args[0]).zero_ext(bits)),
            Op::SignExtend { bits } => Dynamic::from(as_bv!(&args[0]).sign_ext(bits)),

            Op::Select => {
                let arr = args[0].as_array().ok_or_else(|| VerificationError::internal("expected Array"))?;
                arr.select(&args[1])
            }
            Op::Store => {
                let arr = args[0].as_array().ok_or_else(|| VerificationError::internal("expected Array"))?;
                Dynamic::from(arr.store(&args[1], &args[2]))
            }
            Op::Apply(_) => {
                return Err(VerificationError::not_implemented(
                    "uninterpreted function application with non-zero arity",
                ));
            }
        };
        Ok(out)
    }

    fn decode_value(&self, dynamic: &Dynamic<'ctx>, sort: &Sort) -> VerificationResult<Value> {
        match sort {
            Sort::Bool => {
                let b = dynamic
                    .as_bool()
                    .and_then(|b| b.as_bool())
                    .ok_or_else(|| VerificationError::internal("model value was not a concrete Bool"))?;
                Ok(Value::Bool(b))
            }
            Sort::BitVec(width) => {
                let bv = dynamic
                    .as_bv()
                    .and_then(|b| b.as_u64())
                    .ok_or_else(|| VerificationError::internal("model value was not a concrete bit-vector"))?;
                Ok(Value::BitVec { width: *width, value: bv })
            }
            Sort::Int => {
                let n = dynamic
                    .as_int()
                    .and_then(|i| i.as_i64())
                    .ok_or_else(|| VerificationError::internal("model value was not a concrete Int"))?;
                Ok(Value::Int(n))
            }
            Sort::Array(..) | Sort::Function(..) => Err(VerificationError::not_implemented(
                "model extraction for array- or function-sorted terms",
            )),
        }
    }
}

impl<'ctx> SmtSolver for Z3Solver<'ctx> {
    fn assert_formula(&mut self, formula: &Term) -> VerificationResult<()> {
        let encoded = self.encode(formula)?;
        let b = encoded
            .as_bool()
            .ok_or_else(|| VerificationError::unsupported("assert_formula requires a Bool-sorted term"))?;
        self.solver.assert(&b);
        Ok(())
    }

    fn assert_labelled(&mut self, label: &Term, formula: &Term) -> VerificationResult<()> {
        let implication = self.manager.mk_implies(label.clone(), formula.clone());
        self.assert_formula(&implication)
    }

    fn push(&mut self) {
        self.solver.push();
    }

    fn pop(&mut self, n: u32) {
        self.solver.pop(n);
    }

    fn check_sat(&mut self) -> VerificationResult<SatResponse> {
        Ok(match self.solver.check() {
            SatResult::Sat => SatResponse::Sat,
            SatResult::Unsat => SatResponse::Unsat,
            SatResult::Unknown => SatResponse::Unknown,
        })
    }

    fn check_sat_assuming(&mut self, assumptions: &[Term]) -> VerificationResult<SatResponse> {
        let mut bools = Vec::with_capacity(assumptions.len());
        for a in assumptions {
            let encoded = self.encode(a)?;
            bools.push(
                encoded
                    .as_bool()
                    .ok_or_else(|| VerificationError::unsupported("assumptions must be Bool-sorted"))?,
            );
        }
        let refs: Vec<&Z3Bool> = bools.iter().collect();
        Ok(match self.solver.check_assumptions(&refs) {
            SatResult::Sat => SatResponse::Sat,
            SatResult::Unsat => SatResponse::Unsat,
            SatResult::Unknown => SatResponse::Unknown,
        })
    }

    fn get_value(&mut self, term: &Term) -> VerificationResult<Value> {
        let model = self
            .solver
            .get_model()
            .ok_or_else(|| VerificationError::internal("get_value called without a satisfiable model"))?;
        let encoded = self.encode(term)?;
        let evaluated = model
            .eval(&encoded, true)
            .ok_or_else(|| VerificationError::internal("model did not assign a value to this term"))?;
        self.decode_value(&evaluated, term.sort())
    }

    fn unsat_core(&mut self, assumptions: &[Term]) -> VerificationResult<Vec<Term>> {
        // Z3's unsat core is returned as a list of the literal ASTs it was
        // given; matching by rendered form is cheap and avoids depending on
        // `Dynamic`'s (absent) structural equality.
        let core_names: std::collections::HashSet<String> =
            self.solver.get_unsat_core().iter().map(|c| c.to_string()).collect();
        let mut result = Vec::new();
        for a in assumptions {
            let encoded = self.encode(a)?;
            if core_names.contains(&encoded.to_string()) {
                result.push(a.clone());
            }
        }
        Ok(result)
    }
}

/// A single-shot validity checker layered over a fresh [`Z3Solver`] per
/// call, kept in the spirit of the teacher crate's `Verifier::check_bool`/
/// `check_int_greater_than` helpers: most callers of this crate want the
/// full incremental engines below, but a one-off "is this formula valid"
/// check over a hand-built [`Term`] doesn't need a transition system or a
/// persistent context.
pub struct Verifier {
    manager: Rc<crate::term::TermManager>,
}

impl Verifier {
    pub fn new(manager: Rc<crate::term::TermManager>) -> Self {
        Self { manager }
    }

    /// Checks whether `formula` is valid, i.e. `¬formula` is UNSAT. On
    /// `SatResponse::Sat` the returned error carries the falsifying model's
    /// value for every symbol named in `witness_vars`.
    pub fn check_valid(&self, formula: &Term, witness_vars: &[Term]) -> VerificationResult<()> {
        let cfg = Z3Solver::default_config();
        let ctx = Context::new(&cfg);
        let mut solver = Z3Solver::new(&ctx, self.manager.clone());

        let negated = self.manager.mk_not(formula.clone());
        solver.assert_formula(&negated)?;
        match solver.check_sat()? {
            SatResponse::Unsat => Ok(()),
            SatResponse::Sat => {
                let mut witness = crate::witness::StateAssignment::new();
                for v in witness_vars {
                    if let Some(name) = v.symbol_name() {
                        witness.insert(name.to_string(), solver.get_value(v)?);
                    }
                }
                Err(VerificationError::contradiction("this formula is not always true")
                    .with_witness(crate::witness::Witness::new(vec![witness])))
            }
            SatResponse::Unknown => Err(VerificationError::solver_failure()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::TermManager;

    #[test]
    fn tautology_is_sat_and_contradiction_is_unsat() {
        let manager = Rc::new(TermManager::new());
        let cfg = Z3Solver::default_config();
        let ctx = Context::new(&cfg);
        let mut solver = Z3Solver::new(&ctx, manager.clone());

        let p = manager.mk_symbol("p", Sort::Bool);
        let tautology = manager.mk_or(vec![p.clone(), manager.mk_not(p.clone())]);
        solver.assert_formula(&tautology).unwrap();
        assert_eq!(solver.check_sat().unwrap(), SatResponse::Sat);

        solver.push();
        let contradiction = manager.mk_and(vec![p.clone(), manager.mk_not(p)]);
        solver.assert_formula(&contradiction).unwrap();
        assert_eq!(solver.check_sat().unwrap(), SatResponse::Unsat);
        solver.pop(1);
        assert_eq!(solver.check_sat().unwrap(), SatResponse::Sat);
    }

    #[test]
    fn get_value_reads_back_a_model() {
        let manager = Rc::new(TermManager::new());
        let cfg = Z3Solver::default_config();
        let ctx = Context::new(&cfg);
        let mut solver = Z3Solver::new(&ctx, manager.clone());

        let x = manager.mk_symbol("x", Sort::BitVec(4));
        let five = manager.mk_bv(5, 4);
        solver.assert_formula(&manager.mk_eq(x.clone(), five)).unwrap();
        assert_eq!(solver.check_sat().unwrap(), SatResponse::Sat);
        assert_eq!(solver.get_value(&x).unwrap(), Value::BitVec { width: 4, value: 5 });
    }

    #[test]
    fn check_sat_assuming_does_not_persist() {
        let manager = Rc::new(TermManager::new());
        let cfg = Z3Solver::default_config();
        let ctx = Context::new(&cfg);
        let mut solver = Z3Solver::new(&ctx, manager.clone());

        let p = manager.mk_symbol("p", Sort::Bool);
        let not_p = manager.mk_not(p.clone());
        solver.assert_formula(&p).unwrap();
        assert_eq!(solver.check_sat_assuming(&[not_p]).unwrap(), SatResponse::Unsat);
        assert_eq!(solver.check_sat().unwrap(), SatResponse::Sat, "the assumption must not persist");
    }

    #[test]
    fn verifier_accepts_tautology_and_rejects_contradiction() {
        let manager = Rc::new(TermManager::new());
        let p = manager.mk_symbol("p", Sort::Bool);
        let verifier = Verifier::new(manager.clone());

        let tautology = manager.mk_or(vec![p.clone(), manager.mk_not(p.clone())]);
        assert!(verifier.check_valid(&tautology, &[]).is_ok());

        let contradiction = manager.mk_and(vec![p.clone(), manager.mk_not(p.clone())]);
        let err = verifier.check_valid(&contradiction, &[p]).unwrap_err();
        assert!(err.witness.is_some());
    }
}
