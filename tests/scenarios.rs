//! End-to-end scenarios against the public crate surface, one per §8
//! "End-to-end scenarios" example, plus a handful of the property-based
//! invariants that are cheap to pin to a concrete fixture rather than a
//! randomized search.

use std::rc::Rc;

use mcprove::ic3::engine::Ic3Engine;
use mcprove::ic3::unit::BitLevelHandler;
use mcprove::{CegarProver, KInductionProver, Op, Prover, Property, Sort, TermManager, TransitionSystem, Verdict, Z3Solver};
use z3::{Config, Context};

fn fresh_z3(manager: &Rc<TermManager>) -> (Config, Context) {
    let cfg = Z3Solver::default_config();
    let ctx = Context::new(&cfg);
    let _ = manager;
    (cfg, ctx)
}

/// S1: two-bit counter, trivially safe property.
#[test]
fn s1_two_bit_counter_is_safe_under_k_induction_and_ic3() {
    let manager = Rc::new(TermManager::new());
    let mut ts = TransitionSystem::new(manager.clone());
    let (c, c_next) = ts.declare_state_var("c", Sort::BitVec(2));
    let zero = manager.mk_bv(0, 2);
    let one = manager.mk_bv(1, 2);
    ts.set_init(manager.mk_eq(c.clone(), zero)).unwrap();
    let step = manager.mk_term(Op::Add, vec![c.clone(), one]);
    ts.set_trans_relational(manager.mk_eq(c_next, step)).unwrap();

    let three = manager.mk_bv(0b11, 2);
    let not_three = manager.mk_term(Op::Distinct, vec![c.clone(), three]);
    let tautology = manager.mk_bool(true);
    let prop = manager.mk_term(Op::Or, vec![not_three, tautology]);
    let property = Property::new(prop).unwrap();
    let ts = Rc::new(ts);

    let (_cfg1, ctx1) = fresh_z3(&manager);
    let solver = Z3Solver::new(&ctx1, manager.clone());
    let mut kind = KInductionProver::new(ts.clone(), property.clone(), solver);
    assert_eq!(Prover::check_until(&mut kind, 3).unwrap(), Verdict::Safe);

    let (_cfg2, ctx2) = fresh_z3(&manager);
    let solver = Z3Solver::new(&ctx2, manager.clone());
    let handler = Rc::new(BitLevelHandler);
    let mut ic3 = Ic3Engine::new(ts, property, solver, handler);
    assert_eq!(Prover::check_until(&mut ic3, 5).unwrap(), Verdict::Safe);
}

/// S2: two-bit counter, genuinely unsafe, witness length 3.
#[test]
fn s2_two_bit_counter_is_unsafe_with_length_3_witness() {
    let manager = Rc::new(TermManager::new());
    let mut ts = TransitionSystem::new(manager.clone());
    let (c, c_next) = ts.declare_state_var("c", Sort::BitVec(2));
    let zero = manager.mk_bv(0, 2);
    let one = manager.mk_bv(1, 2);
    ts.set_init(manager.mk_eq(c.clone(), zero)).unwrap();
    let step = manager.mk_term(Op::Add, vec![c.clone(), one]);
    ts.set_trans_relational(manager.mk_eq(c_next, step)).unwrap();

    let three = manager.mk_bv(0b11, 2);
    let prop = manager.mk_term(Op::Distinct, vec![c, three]);
    let property = Property::new(prop).unwrap();
    let ts = Rc::new(ts);

    let (_cfg, ctx) = fresh_z3(&manager);
    let solver = Z3Solver::new(&ctx, manager.clone());
    let mut kind = KInductionProver::new(ts, property, solver);
    assert_eq!(Prover::check_until(&mut kind, 3).unwrap(), Verdict::Unsafe);
    let witness = Prover::witness(&kind).expect("UNSAFE verdict must carry a witness");
    assert_eq!(witness.len(), 3);
}

/// S3: a latch driven straight from its input is unsafe at a small bound.
#[test]
fn s3_free_latch_is_unsafe_at_a_small_bound() {
    let manager = Rc::new(TermManager::new());
    let mut ts = TransitionSystem::new(manager.clone());
    let (x, x_next) = ts.declare_state_var("x", Sort::Bool);
    let i = ts.declare_input_var("i", Sort::Bool);
    ts.set_init(manager.mk_not(x.clone())).unwrap();
    ts.set_trans_relational(manager.mk_eq(x_next, i)).unwrap();
    let property = Property::new(manager.mk_not(x)).unwrap();
    let ts = Rc::new(ts);

    let (_cfg, ctx) = fresh_z3(&manager);
    let solver = Z3Solver::new(&ctx, manager.clone());
    let handler = Rc::new(BitLevelHandler);
    let mut ic3 = Ic3Engine::new(ts, property, solver, handler);
    assert_eq!(Prover::check_until(&mut ic3, 2).unwrap(), Verdict::Unsafe);
}

/// S4: mutually exclusive latches; IC3 should find the inductive invariant.
#[test]
fn s4_mutually_exclusive_latches_is_safe() {
    let manager = Rc::new(TermManager::new());
    let mut ts = TransitionSystem::new(manager.clone());
    let (a, a_next) = ts.declare_state_var("a", Sort::Bool);
    let (b, b_next) = ts.declare_state_var("b", Sort::Bool);
    let init = manager.mk_and(vec![a.clone(), manager.mk_not(b.clone())]);
    ts.set_init(init).unwrap();
    let trans = manager.mk_and(vec![
        manager.mk_eq(a_next, manager.mk_not(a.clone())),
        manager.mk_eq(b_next, manager.mk_not(b.clone())),
    ]);
    ts.set_trans_relational(trans).unwrap();
    let property = Property::new(manager.mk_distinct(a, b)).unwrap();
    let ts = Rc::new(ts);

    let (_cfg, ctx) = fresh_z3(&manager);
    let solver = Z3Solver::new(&ctx, manager.clone());
    let handler = Rc::new(BitLevelHandler);
    let mut ic3 = Ic3Engine::new(ts, property, solver, handler);
    assert_eq!(Prover::check_until(&mut ic3, 5).unwrap(), Verdict::Safe);
}

/// S5: value abstraction recovers a multiplicative-shaped invariant plain
/// bit-level IC3 over the concrete system cannot find directly.
#[test]
fn s5_cegar_recovers_the_doubling_recurrence() {
    let manager = Rc::new(TermManager::new());
    let mut ts = TransitionSystem::new(manager.clone());
    let (x, x_next) = ts.declare_state_var("x", Sort::BitVec(8));
    let (y, y_next) = ts.declare_state_var("y", Sort::BitVec(8));
    let zero = manager.mk_bv(0, 8);
    ts.set_init(manager.mk_and(vec![manager.mk_eq(x.clone(), zero.clone()), manager.mk_eq(y.clone(), zero)]))
        .unwrap();
    let one = manager.mk_bv(1, 8);
    let two = manager.mk_bv(2, 8);
    let x_step = manager.mk_term(Op::Add, vec![x.clone(), one]);
    let y_step = manager.mk_term(Op::Add, vec![y.clone(), two]);
    ts.set_trans_relational(manager.mk_and(vec![manager.mk_eq(x_next, x_step), manager.mk_eq(y_next, y_step)]))
        .unwrap();
    let two_x = manager.mk_term(Op::Add, vec![x.clone(), x.clone()]);
    let property = Property::new(manager.mk_eq(y, two_x)).unwrap();
    let ts = Rc::new(ts);

    let (_cfg, ctx) = fresh_z3(&manager);
    let mut cegar = CegarProver::new(ts, property, &ctx).unwrap();
    assert_eq!(Prover::check_until(&mut cegar, 4).unwrap(), Verdict::Safe);
}

/// S6: without the simple-path constraint a k-induction base step would
/// loop forever on this wrapping counter; with it, the counterexample at
/// length 4 is found.
#[test]
fn s6_wrapping_counter_needs_simple_path_and_is_unsafe_at_length_4() {
    let manager = Rc::new(TermManager::new());
    let mut ts = TransitionSystem::new(manager.clone());
    let (x, x_next) = ts.declare_state_var("x", Sort::BitVec(3));
    let zero = manager.mk_bv(0, 3);
    ts.set_init(manager.mk_eq(x.clone(), zero.clone())).unwrap();
    let seven = manager.mk_bv(7, 3);
    let one = manager.mk_bv(1, 3);
    let wrapped = manager.mk_ite(
        manager.mk_eq(x.clone(), seven),
        zero,
        manager.mk_term(Op::Add, vec![x.clone(), one]),
    );
    ts.set_trans_relational(manager.mk_eq(x_next, wrapped)).unwrap();
    let four = manager.mk_bv(4, 3);
    let property = Property::new(manager.mk_distinct(x, four)).unwrap();
    let ts = Rc::new(ts);

    let (_cfg, ctx) = fresh_z3(&manager);
    let solver = Z3Solver::new(&ctx, manager.clone());
    let mut kind = KInductionProver::new(ts, property, solver);
    assert_eq!(Prover::check_until(&mut kind, 4).unwrap(), Verdict::Unsafe);
    let witness = Prover::witness(&kind).unwrap();
    assert_eq!(witness.len(), 4);
}

/// Invariant 1: an UNSAFE k-induction verdict always carries a witness no
/// longer than `k + 1` states.
#[test]
fn invariant_1_base_step_witness_never_exceeds_bound_plus_one() {
    let manager = Rc::new(TermManager::new());
    let mut ts = TransitionSystem::new(manager.clone());
    let (c, c_next) = ts.declare_state_var("c", Sort::BitVec(2));
    let zero = manager.mk_bv(0, 2);
    let one = manager.mk_bv(1, 2);
    ts.set_init(manager.mk_eq(c.clone(), zero)).unwrap();
    let step = manager.mk_term(Op::Add, vec![c.clone(), one]);
    ts.set_trans_relational(manager.mk_eq(c_next, step)).unwrap();
    let three = manager.mk_bv(0b11, 2);
    let property = Property::new(manager.mk_term(Op::Distinct, vec![c, three])).unwrap();
    let ts = Rc::new(ts);

    let (_cfg, ctx) = fresh_z3(&manager);
    let solver = Z3Solver::new(&ctx, manager.clone());
    let mut kind = KInductionProver::new(ts, property, solver);
    let k = 10;
    assert_eq!(Prover::check_until(&mut kind, k).unwrap(), Verdict::Unsafe);
    let witness = Prover::witness(&kind).unwrap();
    assert!(witness.len() <= k as usize + 1);
}

/// Invariant 5: unrolling the same term at the same step always returns the
/// identical term, even across two independently constructed unrollers
/// sharing a manager (determinism is per-manager, not per-unroller-instance).
#[test]
fn invariant_5_unroller_determinism_holds_across_instances() {
    use mcprove::ts::TransitionSystem as Ts;
    use mcprove::unroller::Unroller;

    let manager = Rc::new(TermManager::new());
    let mut ts = Ts::new(manager.clone());
    let (c, _) = ts.declare_state_var("c", Sort::BitVec(4));
    ts.set_init(manager.mk_bool(true)).unwrap();

    let u1 = Unroller::new(manager.clone());
    let u2 = Unroller::new(manager.clone());
    let a = u1.at_time(&ts, &c, 7).unwrap();
    let b = u2.at_time(&ts, &c, 7).unwrap();
    assert_eq!(a, b, "same (symbol, step) pair must intern to the identical term");
}
