// Snapshot tests: lock the IR dump format and the effect of cleanup on a
// small hand-built program.
//
// Snapshots are managed by `insta` and stored under `compiler/tests/snapshots/`.
//
// Run `cargo insta review` after intentional output changes to update baselines.

use dfsc::builder::Emitter;
use dfsc::cleanup;
use dfsc::framework::kernel;
use dfsc::ir::{BinOp, ClassKind, Constant, Operand, Program, Rvalue, Type};
use dfsc::token::Token;

/// `fire` computes `(2 + 3) * 2`, stores it and returns it.
fn gain_program() -> Program {
    let mut program = Program::new();
    let class = program.add_class("demo.Gain", kernel::ATOMIC_ACTOR, ClassKind::Actor);
    let gain = program.add_field(class, "_CGvalue_gain", Type::Int);
    {
        let f = program.field_mut(gain);
        f.is_final = true;
        f.initial = Some(Token::Int(5));
    }
    let count = program.add_field(class, "count", Type::Int);
    let fire = program.add_method(class, "fire", vec![], Type::Int, false);

    let body = &mut program.method_mut(fire).body;
    let this = body.this_local.unwrap();
    let mut em = Emitter::new(body);
    let a = em.value(
        "a",
        Type::Int,
        Rvalue::Binary(BinOp::Add, Operand::int(2), Operand::int(3)),
    );
    let b = em.value(
        "b",
        Type::Int,
        Rvalue::Binary(BinOp::Mul, a.into(), Operand::Const(Constant::Int(2))),
    );
    em.field_store(this, count, b.into());
    em.ret(Some(b.into()));
    em.append();
    program
}

#[test]
fn snapshot_ir_before_cleanup() {
    insta::assert_snapshot!("gain_before_cleanup", gain_program().to_string());
}

#[test]
fn snapshot_ir_after_cleanup() {
    let mut program = gain_program();
    let fire = program.all_live_methods()[0];
    let mut body = std::mem::take(&mut program.method_mut(fire).body);
    cleanup::simplify(&program, &mut body);
    program.method_mut(fire).body = body;
    insta::assert_snapshot!("gain_after_cleanup", program.to_string());
}
