use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use dfsc::config::PipelineOptions;
use dfsc::model::Model;
use dfsc::pass::PassId;
use dfsc::pipeline::{run_pipeline, specialize, CompilationState};
use dfsc::*;

// KPI-aligned benchmark scenarios.
// Every scenario loads and specializes with the built-in actor library.

const EXPRESSIONS: [(&str, &str); 4] = [
    ("literal", "42"),
    ("arith", "(gain * 2.0 + offset) / 3"),
    ("array", "{1, 2, 3, 4, 5, 6, 7, 8}"),
    ("conditional", "x > 0 ? sin(x) : -x"),
];

const CONST_SCALE: &str = r#"{
    "name": "P",
    "entities": [
        {"name": "producer", "kind": "Const", "parameters": [{"name": "value", "expression": "5"}]},
        {"name": "consumer", "kind": "Scale", "parameters": [{"name": "factor", "expression": "2"}]},
        {"name": "sink", "kind": "Recorder"}
    ],
    "relations": [
        {"name": "r1", "links": ["producer.output", "consumer.input"]},
        {"name": "r2", "links": ["consumer.output", "sink.input"]}
    ]
}"#;

const SHARED_PARAMETERS: &str = r#"{
    "name": "S",
    "parameters": [
        {"name": "gain", "expression": "3"},
        {"name": "offset", "expression": "gain * 10 + 1"}
    ],
    "entities": [
        {"name": "ramp", "kind": "Ramp"},
        {"name": "scale", "kind": "Scale", "parameters": [{"name": "factor", "expression": "offset"}]},
        {"name": "sink", "kind": "Recorder"}
    ],
    "relations": [
        {"name": "r1", "links": ["ramp.output", "scale.input"]},
        {"name": "r2", "links": ["scale.output", "sink.input"]}
    ]
}"#;

const WRITTEN_PARAMETERS: &str = r#"{
    "name": "W",
    "parameters": [
        {"name": "a", "expression": "1"},
        {"name": "b", "expression": "a * 10"}
    ],
    "entities": [
        {"name": "ramp", "kind": "Ramp"},
        {"name": "set", "kind": "SetVariable", "parameters": [{"name": "variableName", "expression": "a"}]},
        {"name": "scale", "kind": "Scale", "parameters": [{"name": "factor", "expression": "b"}]},
        {"name": "sink", "kind": "Recorder"}
    ],
    "relations": [
        {"name": "r1", "links": ["ramp.output", "set.input"]},
        {"name": "r2", "links": ["set.output", "scale.input"]},
        {"name": "r3", "links": ["scale.output", "sink.input"]}
    ]
}"#;

fn scenarios() -> [(&'static str, &'static str); 3] {
    [
        ("const_scale", CONST_SCALE),
        ("shared_parameters", SHARED_PARAMETERS),
        ("written_parameters", WRITTEN_PARAMETERS),
    ]
}

/// Model-scaling generator: a Ramp feeding `n` chained Scale actors.
fn generate_scaling_chain(n: usize) -> String {
    let mut entities = vec![r#"{"name": "src", "kind": "Ramp"}"#.to_string()];
    let mut relations = Vec::new();
    let mut upstream = "src".to_string();
    for i in 0..n {
        entities.push(format!(
            r#"{{"name": "s{i}", "kind": "Scale", "parameters": [{{"name": "factor", "expression": "{}"}}]}}"#,
            i + 2
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

// KPI: expression front end latency.
fn bench_kpi_expression_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/expression_latency");

    for (name, source) in EXPRESSIONS {
        group.bench_with_input(BenchmarkId::new("lex", name), source, |b, source| {
            b.iter(|| black_box(lexer::lex(black_box(source))));
        });
        group.bench_with_input(BenchmarkId::new("parse", name), source, |b, source| {
            b.iter(|| black_box(parser::parse_expression(black_box(source))));
        });
    }

    group.finish();
}

// KPI: model load latency (JSON -> model tree with resolved values).
fn bench_kpi_model_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/model_load");

    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| {
                let model = Model::from_json(black_box(source)).expect("scenario must load");
                black_box(model);
            });
        });
    }

    group.finish();
}

// KPI: full specialization latency (load -> materialize -> rounds -> verify).
fn bench_kpi_full_specialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/full_specialize");

    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| {
                let state = specialize(black_box(source), PipelineOptions::default())
                    .expect("scenario must specialize");
                black_box(state.rounds);
            });
        });
    }

    group.finish();
}

// KPI: materialization alone, separated from the reduction rounds.
fn bench_kpi_materialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/materialize");

    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter_batched(
                || CompilationState::from_json(source, PipelineOptions::default())
                    .expect("scenario must load"),
                |mut state| {
                    run_pipeline(&mut state, PassId::Materialize, false, |_, _| {})
                        .expect("scenario must materialize");
                    black_box(state.ctx.program.classes.len());
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

// KPI: specialization time as the actor count grows.
fn bench_kpi_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/scaling");
    group.sample_size(20);

    for n in [1usize, 4, 16, 64] {
        let source = generate_scaling_chain(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &source, |b, source| {
            b.iter(|| {
                let state = specialize(black_box(source), PipelineOptions::default())
                    .expect("chain must specialize");
                black_box(state.ctx.actor_classes().len());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_kpi_expression_latency,
    bench_kpi_model_load,
    bench_kpi_full_specialize,
    bench_kpi_materialize,
    bench_kpi_scaling
);
criterion_main!(benches);
