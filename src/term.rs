//! The logical kernel's term representation (§3 "Term", §4.1, §9 "Shared
//! mutable term graphs").
//!
//! Generalises the teacher crate's `VerifyExpr` (`ir.rs`) -- there, a cloned
//! `enum` tree re-walked into Z3 ASTs on every call -- into a hash-consed DAG
//! owned by a [`TermManager`], independent of any particular solver. A
//! [`crate::solver::SmtSolver`] encodes `Term`s into its own native AST the
//! way the teacher's `Encoder` walks a `VerifyExpr` into a Z3 `Dynamic`; the
//! kernel itself never touches a solver.
//!
//! Hash-consing invariant: two `Term`s are structurally equal iff they are
//! the same `Rc` allocation (`Term::eq` is pointer equality, see §3 "Term
//! equality is pointer/identity equality under hash-consing"). Every
//! constructor goes through [`TermManager`], which is the only place new
//! `Rc`s are minted.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::sort::Sort;

/// A literal value carried by a [`Term`] of kind [`TermKind::Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Bool(bool),
    /// Stored as a plain `u64`; only the low `width` bits are meaningful.
    BitVec { width: u32, value: u64 },
    Int(i64),
}

impl Value {
    pub fn sort(&self) -> Sort {
        match self {
            Value::Bool(_) => Sort::Bool,
            Value::BitVec { width, .. } => Sort::BitVec(*width),
            Value::Int(_) => Sort::Int,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::BitVec { width, value } => write!(f, "#b{value:0width$b}", width = *width as usize),
            Value::Int(n) => write!(f, "{n}"),
        }
    }
}

/// The operator set the back-end must provide (§6), plus boolean
/// quantifiers and array/ite operators needed by the data model of §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Not,
    And,
    Or,
    Implies,
    Equal,
    Distinct,
    Ite,

    // Arithmetic / bit-vector arithmetic (combined per §6's listing)
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Abs,
    Pow,
    IntDiv,
    BVMul,
    BVUdiv,
    BVSdiv,
    BVUrem,
    BVSrem,
    BVSmod,

    // Bit-vector comparisons and bitwise/shift ops ("standard bit-vector
    // ... operators" of §6).
    BVComp,
    BVUlt,
    BVUle,
    BVSlt,
    BVSle,
    BVNot,
    BVAnd,
    BVOr,
    BVXor,
    BVShl,
    BVLshr,
    BVAshr,
    BVNeg,
    Concat,
    Extract { high: u32, low: u32 },
    ZeroExtend { bits: u32 },
    SignExtend { bits: u32 },

    // Arrays
    Select,
    Store,

    // Uninterpreted function application, keyed by name (§4.3 "Predicate").
    Apply(Rc<str>),
}

/// Interned payload of a [`Term`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TermKind {
    Value(Value),
    /// A free symbolic constant, e.g. a state/input variable or a
    /// time-indexed copy produced by the unroller (`s@3`).
    Symbol(Rc<str>),
    App(Op, Vec<Term>),
}

struct TermData {
    sort: Sort,
    kind: TermKind,
}

// Manual Hash/Eq: children inside `kind` are already-interned `Term`s, so
// comparing them by identity (their own Hash/Eq, defined below) is enough --
// this is the standard hash-consing trick that avoids re-hashing whole
// subtrees on every lookup.
impl PartialEq for TermData {
    fn eq(&self, other: &Self) -> bool {
        self.sort == other.sort && self.kind == other.kind
    }
}
impl Eq for TermData {}
impl Hash for TermData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sort.hash(state);
        self.kind.hash(state);
    }
}

/// A hash-consed term handle. Cloning is an `Rc` bump, not a copy of the
/// subtree. `PartialEq`/`Hash` are pointer identity, matching §3's
/// "Term equality is pointer/identity equality under hash-consing".
#[derive(Clone)]
pub struct Term(Rc<TermData>);

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Term {}
impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}
impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl Term {
    pub fn sort(&self) -> &Sort {
        &self.0.sort
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self.0.kind, TermKind::Symbol(_))
    }

    pub fn is_value(&self) -> bool {
        matches!(self.0.kind, TermKind::Value(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match &self.0.kind {
            TermKind::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn symbol_name(&self) -> Option<&str> {
        match &self.0.kind {
            TermKind::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn op(&self) -> Option<(Op, &[Term])> {
        match &self.0.kind {
            TermKind::App(op, children) => Some((*op, children.as_slice())),
            _ => None,
        }
    }

    /// Every free symbol transitively reachable from this term. Used by
    /// [`crate::unroller::Unroller`] to validate its input and by the
    /// cone-of-influence pass (§4.6).
    pub fn free_symbols(&self, out: &mut std::collections::HashSet<Term>) {
        match &self.0.kind {
            TermKind::Value(_) => {}
            TermKind::Symbol(_) => {
                out.insert(self.clone());
            }
            TermKind::App(_, children) => {
                for c in children {
                    c.free_symbols(out);
                }
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            TermKind::Value(v) => write!(f, "{v}"),
            TermKind::Symbol(name) => write!(f, "{name}"),
            TermKind::App(op, children) => {
                write!(f, "({op:?}")?;
                for c in children {
                    write!(f, " {c}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Owns the hash-consing table and is the sole constructor of [`Term`]s
/// (§9 "Shared mutable term graphs": "Model this as an arena owned by the
/// solver; consumers hold non-owning references").
///
/// One `TermManager` is shared by a [`crate::ts::TransitionSystem`], its
/// [`crate::unroller::Unroller`], and the prover(s) running against it.
/// CEGAR (§4.5/§9 "Two solver contexts") keeps two independent managers, one
/// per solver context, joined only by a [`crate::cegar::Translator`].
#[derive(Default)]
pub struct TermManager {
    table: RefCell<HashMap<Rc<TermData>, ()>>,
}

impl TermManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&self, data: TermData) -> Term {
        let probe = Rc::new(data);
        let mut table = self.table.borrow_mut();
        if let Some((existing, _)) = table.get_key_value(&probe) {
            return Term(existing.clone());
        }
        table.insert(probe.clone(), ());
        Term(probe)
    }

    pub fn mk_value(&self, value: Value) -> Term {
        let sort = value.sort();
        self.intern(TermData { sort, kind: TermKind::Value(value) })
    }

    pub fn mk_bool(&self, b: bool) -> Term {
        self.mk_value(Value::Bool(b))
    }

    pub fn mk_bv(&self, value: u64, width: u32) -> Term {
        let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        self.mk_value(Value::BitVec { width, value: value & mask })
    }

    pub fn mk_int(&self, n: i64) -> Term {
        self.mk_value(Value::Int(n))
    }

    /// A named free symbol of the given sort. Repeated calls with the same
    /// `(name, sort)` return the identical `Term` (hash-consing).
    pub fn mk_symbol(&self, name: impl Into<Rc<str>>, sort: Sort) -> Term {
        self.intern(TermData { sort, kind: TermKind::Symbol(name.into()) })
    }

    pub fn mk_term(&self, op: Op, children: Vec<Term>) -> Term {
        let sort = self.result_sort(op, &children);
        self.intern(TermData { sort, kind: TermKind::App(op, children) })
    }

    pub fn mk_not(&self, t: Term) -> Term {
        self.mk_term(Op::Not, vec![t])
    }
    pub fn mk_and(&self, terms: impl IntoIterator<Item = Term>) -> Term {
        self.fold_assoc(Op::And, terms, true)
    }
    pub fn mk_or(&self, terms: impl IntoIterator<Item = Term>) -> Term {
        self.fold_assoc(Op::Or, terms, false)
    }
    pub fn mk_implies(&self, a: Term, b: Term) -> Term {
        self.mk_term(Op::Implies, vec![a, b])
    }
    pub fn mk_eq(&self, a: Term, b: Term) -> Term {
        self.mk_term(Op::Equal, vec![a, b])
    }
    pub fn mk_distinct(&self, a: Term, b: Term) -> Term {
        self.mk_term(Op::Distinct, vec![a, b])
    }
    pub fn mk_ite(&self, cond: Term, then_: Term, else_: Term) -> Term {
        self.mk_term(Op::Ite, vec![cond, then_, else_])
    }
    pub fn mk_apply(&self, name: impl Into<Rc<str>>, args: Vec<Term>, result_sort: Sort) -> Term {
        let name = name.into();
        self.intern(TermData {
            sort: result_sort,
            kind: TermKind::App(Op::Apply(name), args),
        })
    }

    /// Right-folds an associative boolean connective; an empty iterator
    /// returns the identity element (`true` for `And`, `false` for `Or`).
    fn fold_assoc(&self, op: Op, terms: impl IntoIterator<Item = Term>, identity: bool) -> Term {
        let mut it = terms.into_iter();
        let Some(first) = it.next() else {
            return self.mk_bool(identity);
        };
        it.fold(first, |acc, t| self.mk_term(op, vec![acc, t]))
    }

    /// Rebuilds `term` bottom-up, replacing every leaf symbol present in
    /// `map` with its image. Used to build a term's "primed" form (swap
    /// state variables for their `next` counterparts, §4.4) and by
    /// CEGAR's value abstraction (swap value literals for frozen
    /// variables, §4.5).
    pub fn substitute(&self, term: &Term, map: &HashMap<Term, Term>) -> Term {
        if let Some(replacement) = map.get(term) {
            return replacement.clone();
        }
        match term.op() {
            None => term.clone(),
            Some((op, children)) => {
                let rebuilt: Vec<Term> = children.iter().map(|c| self.substitute(c, map)).collect();
                if rebuilt.iter().zip(children.iter()).all(|(a, b)| a == b) {
                    term.clone()
                } else {
                    self.mk_term(op, rebuilt)
                }
            }
        }
    }

    fn result_sort(&self, op: Op, children: &[Term]) -> Sort {
        use Op::*;
        match op {
            Not | And | Or | Implies | Equal | Distinct | BVComp | BVUlt | BVUle | BVSlt
            | BVSle => Sort::Bool,
            Ite => children[1].sort().clone(),
            Add | Sub | Mul | Div | Mod | Abs | Pow | IntDiv => children[0].sort().clone(),
            BVMul | BVUdiv | BVSdiv | BVUrem | BVSrem | BVSmod | BVNot | BVAnd | BVOr | BVXor
            | BVShl | BVLshr | BVAshr | BVNeg => children[0].sort().clone(),
            Concat => {
                let w0 = children[0].sort().bv_width().unwrap_or(0);
                let w1 = children[1].sort().bv_width().unwrap_or(0);
                Sort::BitVec(w0 + w1)
            }
            Extract { high, low } => Sort::BitVec(high - low + 1),
            ZeroExtend { bits } | SignExtend { bits } => {
                Sort::BitVec(children[0].sort().bv_width().unwrap_or(0) + bits)
            }
            Select => match children[0].sort() {
                Sort::Array(_, elem) => (**elem).clone(),
                _ => Sort::Bool,
            },
            Store => children[0].sort().clone(),
            Apply(_) => Sort::Bool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_consing_identity() {
        let m = TermManager::new();
        let a = m.mk_symbol("x", Sort::BitVec(4));
        let b = m.mk_symbol("x", Sort::BitVec(4));
        assert_eq!(a, b, "same name+sort must intern to the identical term");

        let c = m.mk_symbol("x", Sort::BitVec(8));
        assert_ne!(a, c, "differing sort must not collide");
    }

    #[test]
    fn compound_terms_hash_cons_too() {
        let m = TermManager::new();
        let x = m.mk_symbol("x", Sort::Bool);
        let y = m.mk_symbol("y", Sort::Bool);
        let lhs = m.mk_and(vec![x.clone(), y.clone()]);
        let rhs = m.mk_and(vec![x, y]);
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn free_symbols_collects_leaves() {
        let m = TermManager::new();
        let x = m.mk_symbol("x", Sort::BitVec(2));
        let y = m.mk_symbol("y", Sort::BitVec(2));
        let sum = m.mk_term(Op::Add, vec![x.clone(), y.clone()]);
        let mut syms = std::collections::HashSet::new();
        sum.free_symbols(&mut syms);
        assert_eq!(syms.len(), 2);
        assert!(syms.contains(&x));
        assert!(syms.contains(&y));
    }

    #[test]
    fn substitute_rebuilds_only_affected_subterms() {
        let m = TermManager::new();
        let x = m.mk_symbol("x", Sort::BitVec(4));
        let y = m.mk_symbol("y", Sort::BitVec(4));
        let x_next = m.mk_symbol("x!next", Sort::BitVec(4));
        let sum = m.mk_term(Op::Add, vec![x.clone(), y.clone()]);

        let mut map = HashMap::new();
        map.insert(x.clone(), x_next.clone());
        let primed = m.substitute(&sum, &map);

        let (op, children) = primed.op().unwrap();
        assert_eq!(op, Op::Add);
        assert_eq!(children[0], x_next);
        assert_eq!(children[1], y);

        let unaffected = m.substitute(&y, &map);
        assert_eq!(unaffected, y);
    }

    #[test]
    fn and_or_identity_elements() {
        let m = TermManager::new();
        assert_eq!(m.mk_and(vec![]), m.mk_bool(true));
        assert_eq!(m.mk_or(vec![]), m.mk_bool(false));
    }
}
