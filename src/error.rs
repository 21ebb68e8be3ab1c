//! Verification error types with Socratic error messages.
//!
//! ## Philosophy
//!
//! Errors in this module follow the Socratic method: they guide users
//! toward understanding rather than simply reporting failures. Each error
//! type includes a clear description of what went wrong and, when
//! available, a concrete witness.
//!
//! ## Error Categories (§7 "Error kinds")
//!
//! | Category | Error Types | User Action |
//! |----------|-------------|-------------|
//! | Logic | `ContradictoryAssertion` | Fix the conflicting constraints |
//! | Engine | `Unsupported`, `NotImplemented` | Pick a different engine/fragment |
//! | Solver | `SolverFailure`, `SolverError` | Simplify, or retry with a larger bound |
//! | Fatal | `Internal` | Report a bug; the prover must not be reused |

use std::fmt;

use crate::unroller::UnrollError;
use crate::witness::Witness;

/// Result type for verification operations.
pub type VerificationResult<T = ()> = Result<T, VerificationError>;

/// A verification error with Socratic explanation.
#[derive(Debug)]
pub struct VerificationError {
    pub kind: VerificationErrorKind,
    pub explanation: String,
    /// A concrete counterexample trace, when the failure produced one.
    pub witness: Option<Witness>,
}

/// The kind of verification error.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationErrorKind {
    /// An assertion that can never be true. Used by the low-level
    /// single-shot [`crate::solver::Verifier`] helper.
    ContradictoryAssertion,

    /// The transition system or property uses theories or sorts the active
    /// engine does not support, e.g. IC3SA invoked on a non-bit-vector
    /// sort. No retry: pick a different engine.
    Unsupported { reason: String },

    /// The back-end returned UNKNOWN on a query whose outcome was required
    /// for soundness. Non-fatal: context stacks are unwound and the prover
    /// may be retried with a different bound or options.
    SolverFailure,

    /// An engine invariant was violated (e.g. a proof-goal chain link went
    /// missing during witness reconstruction). Fatal: the prover must not
    /// be reused after this error.
    Internal { reason: String },

    /// A recognised but unimplemented feature was reached, e.g. a
    /// functional transition system fed to value-abstraction CEGAR.
    NotImplemented { feature: String },

    /// The back-end raised an internal or configuration error unrelated to
    /// satisfiability.
    SolverError { message: String },
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            VerificationErrorKind::ContradictoryAssertion => {
                writeln!(f, "This assertion can never be true.")?;
                writeln!(f)?;
                writeln!(f, "{}", self.explanation)?;
            }
            VerificationErrorKind::Unsupported { reason } => {
                writeln!(f, "This engine does not support the given transition system.")?;
                writeln!(f)?;
                writeln!(f, "{reason}")?;
            }
            VerificationErrorKind::SolverFailure => {
                writeln!(f, "The solver could not determine if the assertion is valid.")?;
                writeln!(f)?;
                writeln!(
                    f,
                    "This may be due to complexity or timeout; the prover may be retried with a different bound."
                )?;
            }
            VerificationErrorKind::Internal { reason } => {
                writeln!(f, "Internal invariant violated: {reason}")?;
                writeln!(f)?;
                writeln!(f, "This is a bug. The prover instance must not be reused.")?;
            }
            VerificationErrorKind::NotImplemented { feature } => {
                writeln!(f, "'{feature}' is recognised but not implemented yet.")?;
            }
            VerificationErrorKind::SolverError { message } => {
                writeln!(f, "Solver error: {message}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for VerificationError {}

impl From<UnrollError> for VerificationError {
    /// A term mentioning a foreign symbol reaching the unroller is an
    /// engine bug, not a user-facing condition: every term an engine
    /// unrolls is built from its own transition system's variables.
    fn from(e: UnrollError) -> Self {
        VerificationError::internal(e.to_string())
    }
}

impl VerificationError {
    pub fn contradiction(explanation: impl Into<String>) -> Self {
        Self {
            kind: VerificationErrorKind::ContradictoryAssertion,
            explanation: explanation.into(),
            witness: None,
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            kind: VerificationErrorKind::Unsupported { reason: reason.into() },
            explanation: String::new(),
            witness: None,
        }
    }

    pub fn solver_failure() -> Self {
        Self {
            kind: VerificationErrorKind::SolverFailure,
            explanation: String::new(),
            witness: None,
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self {
            kind: VerificationErrorKind::Internal { reason: reason.into() },
            explanation: String::new(),
            witness: None,
        }
    }

    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self {
            kind: VerificationErrorKind::NotImplemented { feature: feature.into() },
            explanation: String::new(),
            witness: None,
        }
    }

    pub fn solver_error(message: impl Into<String>) -> Self {
        Self {
            kind: VerificationErrorKind::SolverError { message: message.into() },
            explanation: String::new(),
            witness: None,
        }
    }

    pub fn with_witness(mut self, witness: Witness) -> Self {
        self.witness = Some(witness);
        self
    }
}
