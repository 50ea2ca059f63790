// Property-based tests for specializer invariants.
//
// Four categories:
// 1. Lattice laws of the value-type lattice (generated and exhaustive)
// 2. Evaluator / folded machine arithmetic agreement
// 3. Fixed-point idempotence of the reference and token-type analyses
// 4. Generated actor chains specialize completely
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use std::collections::BTreeMap;

use dfsc::cleanup::fold_binary;
use dfsc::config::PipelineOptions;
use dfsc::dataflow;
use dfsc::eval::evaluate;
use dfsc::ir::{BinOp, Constant, Rvalue};
use dfsc::named_obj;
use dfsc::parser::parse_expression;
use dfsc::pass::{PassId, StageCert};
use dfsc::pipeline::{run_pipeline, specialize, CompilationState};
use dfsc::token::Token;
use dfsc::token_types::{self, TokenTypes};
use dfsc::types::{TokenType, HIGHER, INCOMPARABLE, LOWER, SAME};
use proptest::prelude::*;

// ── Generators ──────────────────────────────────────────────────────────────

const SCALARS: [TokenType; 10] = [
    TokenType::Boolean,
    TokenType::UnsignedByte,
    TokenType::Int,
    TokenType::Long,
    TokenType::Double,
    TokenType::Complex,
    TokenType::Fix,
    TokenType::String,
    TokenType::General,
    TokenType::Unknown,
];

fn arb_type() -> impl Strategy<Value = TokenType> {
    let leaf = (0..SCALARS.len()).prop_map(|i| SCALARS[i].clone());
    leaf.prop_recursive(2, 8, 1, |inner| {
        prop_oneof![
            inner.clone().prop_map(|t| TokenType::Array(Box::new(t))),
            inner.prop_map(|t| TokenType::Matrix(Box::new(t))),
        ]
    })
}

fn arb_op() -> impl Strategy<Value = (BinOp, &'static str)> {
    prop_oneof![
        Just((BinOp::Add, "+")),
        Just((BinOp::Sub, "-")),
        Just((BinOp::Mul, "*")),
    ]
}

/// Const → Scale* → Recorder with the given literals.
fn chain_model(value: i32, factors: &[i32]) -> String {
    let mut entities = vec![format!(
        r#"{{"name": "src", "kind": "Const", "parameters": [{{"name": "value", "expression": "{value}"}}]}}"#
    )];
    let mut relations = Vec::new();
    let mut upstream = "src".to_string();
    for (i, f) in factors.iter().enumerate() {
        entities.push(format!(
            r#"{{"name": "s{i}", "kind": "Scale", "parameters": [{{"name": "factor", "expression": "{f}"}}]}}"#
        ));
        relations.push(format!(
            r#"{{"name": "r{i}", "links": ["{upstream}.output", "s{i}.input"]}}"#
        ));
        upstream = format!("s{i}");
    }
    entities.push(r#"{"name": "sink", "kind": "Recorder"}"#.to_string());
    relations.push(format!(
        r#"{{"name": "last", "links": ["{upstream}.output", "sink.input"]}}"#
    ));
    format!(
        r#"{{"name": "Chain", "entities": [{}], "relations": [{}]}}"#,
        entities.join(", "),
        relations.join(", ")
    )
}

fn eval_text(text: &str) -> Result<Token, String> {
    let expr = parse_expression(text)?;
    evaluate(&expr, &BTreeMap::<String, Token>::new())
}

// ── 1. Lattice laws ─────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn lub_is_a_commutative_upper_bound(a in arb_type(), b in arb_type()) {
        let j = a.lub(&b);
        prop_assert_eq!(&j, &b.lub(&a));
        prop_assert!(a.leq(&j), "{:?} not below {:?}", a, j);
        prop_assert!(b.leq(&j), "{:?} not below {:?}", b, j);
    }

    #[test]
    fn lub_is_idempotent_and_absorbs_lower(a in arb_type(), b in arb_type()) {
        prop_assert_eq!(a.lub(&a), a.clone());
        if a.leq(&b) {
            prop_assert_eq!(a.lub(&b), b.clone());
        }
    }

    #[test]
    fn compare_is_antisymmetric(a in arb_type(), b in arb_type()) {
        let ab = a.compare(&b);
        let ba = b.compare(&a);
        match ab {
            SAME => prop_assert_eq!(ba, SAME),
            LOWER => prop_assert_eq!(ba, HIGHER),
            HIGHER => prop_assert_eq!(ba, LOWER),
            INCOMPARABLE => prop_assert_eq!(ba, INCOMPARABLE),
            other => prop_assert!(false, "unexpected encoding {}", other),
        }
    }

    #[test]
    fn local_merge_never_invents_a_type(a in arb_type(), b in arb_type()) {
        let m = a.merge_local(&b);
        prop_assert!(m == a || m == TokenType::Unknown || matches!(m, TokenType::Array(_)));
        prop_assert_eq!(a.merge_local(&a), a.clone());
    }
}

#[test]
fn leq_is_transitive_over_scalars() {
    for a in &SCALARS {
        for b in &SCALARS {
            for c in &SCALARS {
                if a.leq(b) && b.leq(c) {
                    assert!(a.leq(c), "{a:?} <= {b:?} <= {c:?} but not {a:?} <= {c:?}");
                }
            }
        }
    }
}

#[test]
fn int_with_double_joins_to_double() {
    assert_eq!(TokenType::Int.lub(&TokenType::Double), TokenType::Double);
    assert_eq!(TokenType::Double.lub(&TokenType::Int), TokenType::Double);
}

// ── 2. Evaluator / machine arithmetic agreement ─────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn int_arithmetic_agrees(a in any::<i32>(), b in any::<i32>(), (op, sym) in arb_op()) {
        // i32::MIN has no literal form; negation of its successor stands in.
        let a = a.max(i32::MIN + 1);
        let b = b.max(i32::MIN + 1);
        let text = format!("({a}) {sym} ({b})");
        let evaluated = eval_text(&text).unwrap();
        let folded = fold_binary(op, &Constant::Int(a), &Constant::Int(b)).unwrap();
        prop_assert_eq!(evaluated, Token::Int(match folded {
            Constant::Int(v) => v,
            other => panic!("folded to {other:?}"),
        }));
    }

    #[test]
    fn double_arithmetic_agrees(x in -4000i32..4000, y in -4000i32..4000, (op, sym) in arb_op()) {
        let a = f64::from(x) / 4.0;
        let b = f64::from(y) / 4.0;
        let text = format!("({a:?}) {sym} ({b:?})");
        let evaluated = eval_text(&text).unwrap();
        let folded = fold_binary(op, &Constant::Double(a), &Constant::Double(b)).unwrap();
        prop_assert_eq!(evaluated, Token::Double(match folded {
            Constant::Double(v) => v,
            other => panic!("folded to {other:?}"),
        }));
    }
}

// ── 3 + 4. Analyses and whole chains ────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        max_shrink_iters: 50,
        .. ProptestConfig::default()
    })]

    #[test]
    fn analyses_are_idempotent_at_their_fixed_point(
        value in -100i32..100,
        factors in prop::collection::vec(-9i32..10, 1..4),
    ) {
        let json = chain_model(value, &factors);
        let mut state = CompilationState::from_json(&json, PipelineOptions::default()).unwrap();
        run_pipeline(&mut state, PassId::FieldsForAttributes, false, |_, _| {}).unwrap();
        let ctx = &state.ctx;
        for m in ctx.program.all_live_methods() {
            let body = &ctx.program.method(m).body;
            let (objects, types) = token_types::analyze_method(ctx, m);
            let again = named_obj::resume(body, &ctx.model, &ctx.tags, objects.clone());
            prop_assert_eq!(&again, &objects);
            let analysis = TokenTypes {
                model: &ctx.model,
                tags: &ctx.tags,
                program: &ctx.program,
                objects: &objects,
            };
            let resumed = dataflow::resume(&analysis, body, types.clone());
            prop_assert_eq!(&resumed, &types);
        }
    }

    #[test]
    fn scale_chains_specialize_to_native_multiplies(
        value in -100i32..100,
        factors in prop::collection::vec(-9i32..10, 1..4),
    ) {
        let json = chain_model(value, &factors);
        let state = specialize(&json, PipelineOptions::default()).unwrap();
        prop_assert!(state.cert.as_ref().unwrap().all_pass());
        let ctx = &state.ctx;
        for m in ctx.program.all_live_methods() {
            for (_, inv) in ctx.program.method(m).body.invokes() {
                prop_assert!(
                    !matches!(inv.method.name.as_str(), "getToken" | "getAttribute" | "getPort"),
                    "{} survives in {}", inv.method.name, ctx.program.method_name(m)
                );
            }
        }
        for i in 0..factors.len() {
            let obj = ctx.model.by_name(&format!("Chain.s{i}")).unwrap();
            let class = ctx.class_for_object(obj).unwrap();
            let fire = ctx.program.method_by_name(class, "fire").unwrap();
            let multiplies = ctx.program.method(fire).body.stmts.iter()
                .filter(|s| matches!(s.kind.rvalue(), Some(Rvalue::Binary(BinOp::Mul, ..))))
                .count();
            prop_assert_eq!(multiplies, 1, "{}", ctx.program.dump_method(fire));
        }
    }
}
