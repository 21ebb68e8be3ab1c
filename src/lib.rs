//! mcprove -- a model-checking core for finite-state transition systems.
//!
//! # Overview
//!
//! Three proof engines share one logical kernel:
//!
//! - **K-induction** (§4.2): alternates a bounded-model-checking base step
//!   with an inductive step over a simple-path-restricted relation.
//! - **IC3/PDR** (§4.3, §4.4): frame-based relative induction, parameterised
//!   by a pluggable unit handler (bit-level clauses, registered predicates,
//!   or syntax-guided generalisation over bit-vector transition systems).
//! - **CEGAR** (§4.5): wraps an inner prover over a value-abstracted
//!   transition system, refining the abstraction on spurious
//!   counterexamples.
//!
//! All three are written against [`solver::SmtSolver`], an incremental
//! push/pop handle to an SMT back-end; [`solver::Z3Solver`] is the only
//! implementation. Terms are hash-consed through a [`term::TermManager`]
//! and time-indexed by an [`unroller::Unroller`] before being handed to a
//! solver.
//!
//! # Choosing an engine
//!
//! [`options::Options`] selects an engine kind and shared knobs (bound,
//! verbosity). The engines themselves are generic over their solver type
//! and are constructed directly; there is no dynamic dispatch between them
//! beyond the common [`Prover`] trait, since each closes over a distinct
//! solver/context lifetime.

pub mod cegar;
pub mod coi;
pub mod error;
pub mod ic3;
pub mod kinduction;
pub mod options;
pub mod solver;
pub mod sort;
pub mod term;
pub mod ts;
pub mod unroller;
pub mod witness;

pub use error::{VerificationError, VerificationErrorKind, VerificationResult};
pub use options::{EngineKind, Options};
pub use solver::{SatResponse, SmtSolver, Verifier, Z3Solver};
pub use sort::Sort;
pub use term::{Op, Term, TermManager, Value};
pub use ts::{Property, TransitionSystem};
pub use witness::{StateAssignment, Verdict, Witness};

pub use cegar::CegarProver;
pub use ic3::engine::Ic3Engine;
pub use kinduction::KInductionProver;

/// Common surface every engine in this crate exposes (§6 "External
/// interfaces"): an idempotent setup step, a bounded check that may be
/// called repeatedly with a growing bound, and the witness produced by the
/// most recent `Unsafe` verdict.
///
/// Each implementation's own inherent methods of the same names resolve
/// ahead of this trait's default dispatch per Rust's normal method lookup,
/// so calling this trait's methods through a concrete engine type costs
/// nothing beyond the inherent call already does; the trait exists so
/// generic callers (a future CLI front-end, or `tests/scenarios.rs`) can be
/// written once against any of the three engines.
pub trait Prover {
    /// Idempotent: sets up whatever persistent solver state the engine
    /// keeps across `check_until` calls.
    fn initialize(&mut self) -> VerificationResult<()>;

    /// Checks the property up to bound/frame count `k`. Safe to call again
    /// with a larger `k` after an `Unknown` result.
    fn check_until(&mut self, k: u32) -> VerificationResult<Verdict>;

    /// The counterexample trace behind the most recent `Unsafe` verdict, if
    /// any.
    fn witness(&self) -> Option<&Witness>;
}

impl<S: SmtSolver> Prover for KInductionProver<S> {
    fn initialize(&mut self) -> VerificationResult<()> {
        KInductionProver::initialize(self)
    }
    fn check_until(&mut self, k: u32) -> VerificationResult<Verdict> {
        KInductionProver::check_until(self, k)
    }
    fn witness(&self) -> Option<&Witness> {
        KInductionProver::witness(self)
    }
}

impl<S: SmtSolver> Prover for Ic3Engine<S> {
    fn initialize(&mut self) -> VerificationResult<()> {
        Ic3Engine::initialize(self)
    }
    fn check_until(&mut self, k: u32) -> VerificationResult<Verdict> {
        Ic3Engine::check_until(self, k)
    }
    fn witness(&self) -> Option<&Witness> {
        Ic3Engine::witness(self)
    }
}

impl<'ctx> Prover for CegarProver<'ctx> {
    fn initialize(&mut self) -> VerificationResult<()> {
        CegarProver::initialize(self)
    }
    fn check_until(&mut self, k: u32) -> VerificationResult<Verdict> {
        CegarProver::check_until(self, k)
    }
    fn witness(&self) -> Option<&Witness> {
        CegarProver::witness(self)
    }
}
