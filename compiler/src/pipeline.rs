// pipeline.rs — Specialization state and pass orchestration
//
// Holds the pipeline context plus run bookkeeping, runs materialization
// once, then repeats the reducing passes in rounds until a round changes
// nothing (or the round cap is hit), and finally verifies the program.
//
// Preconditions: the model has been loaded (`CompilationState::from_json`).
// Postconditions: the program satisfies the pipeline certificate, or
//   `run_pipeline` returns the failing pass.
// Failure modes: any fatal `SpecError` from a pass; watchdog expiry;
//   certificate failure (E0600).
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::fmt;
use std::time::{Duration, Instant};

use crate::config::PipelineOptions;
use crate::context::PipelineContext;
use crate::diag::codes;
use crate::diag::{DiagLevel, Diagnostic};
use crate::error::{Result, SpecError};
use crate::framework;
use crate::ir::StmtKind;
use crate::materialize;
use crate::model::Model;
use crate::pass::{descriptor, required_passes, PassId, StageCert, ALL_PASSES};

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for reproducible runs and cache-key use.
///
/// `model_hash`: SHA-256 of the raw model JSON.
/// `catalogue_fingerprint`: SHA-256 of the library catalogue and native
/// function table renderings.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub model_hash: [u8; 32],
    pub catalogue_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the model hash (64 characters).
    pub fn model_hash_hex(&self) -> String {
        bytes_to_hex(&self.model_hash)
    }

    /// Hex string of the catalogue fingerprint (64 characters).
    pub fn catalogue_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.catalogue_fingerprint)
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "model_hash": self.model_hash_hex(),
            "catalogue_fingerprint": self.catalogue_fingerprint_hex(),
            "compiler_version": self.compiler_version,
        })
        .to_string()
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(text: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from the model text and the built-in catalogue.
pub fn compute_provenance(model_json: &str) -> Provenance {
    let catalogue = format!(
        "{}{}",
        crate::library::fingerprint(),
        crate::native::fingerprint()
    );
    Provenance {
        model_hash: sha256(model_json),
        catalogue_fingerprint: sha256(&catalogue),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── State ──────────────────────────────────────────────────────────────────

/// Textual program dump taken after a named stage.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub stage: String,
    pub dump: String,
}

/// Holds the pipeline context and everything the driver records about a run.
pub struct CompilationState {
    pub ctx: PipelineContext,
    /// Reduction rounds actually run.
    pub rounds: usize,
    pub snapshots: Vec<Snapshot>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
    pub cert: Option<PipelineCert>,
}

impl CompilationState {
    pub fn new(model: Model, options: PipelineOptions) -> Self {
        Self {
            ctx: PipelineContext::new(model, options),
            rounds: 0,
            snapshots: Vec::new(),
            has_error: false,
            provenance: None,
            cert: None,
        }
    }

    /// Load a model description and record its provenance.
    pub fn from_json(text: &str, options: PipelineOptions) -> Result<Self> {
        let model = Model::from_json(text)?;
        let mut state = Self::new(model, options);
        state.provenance = Some(compute_provenance(text));
        Ok(state)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.ctx.diagnostics
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution stopped in `failing_pass`. `error` is the fatal cause;
/// `None` means a certificate failed and the E0600 diagnostic is in
/// `CompilationState::diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    pub failing_pass: PassId,
    pub error: Option<SpecError>,
}

impl PipelineError {
    /// True when the run was cut short rather than rejected.
    pub fn did_not_complete(&self) -> bool {
        self.error.as_ref().is_some_and(SpecError::is_watchdog)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pass = descriptor(self.failing_pass).name;
        match &self.error {
            Some(e) => write!(f, "{pass}: {e}"),
            None => write!(f, "{pass}: verification failed"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ── Pipeline certificate ───────────────────────────────────────────────────

/// Obligations checked once the program stops changing.
#[derive(Debug, Clone)]
pub struct PipelineCert {
    /// P1: No method stores to a final field.
    pub p1_constant_write_freedom: bool,
    /// P2: The class/object maps are still a bijection over live classes.
    pub p2_bijection: bool,
    /// P3: Every branch target of every live method has its label.
    pub p3_labels_resolve: bool,
}

impl StageCert for PipelineCert {
    fn all_pass(&self) -> bool {
        self.p1_constant_write_freedom && self.p2_bijection && self.p3_labels_resolve
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("P1_constant_write_freedom", self.p1_constant_write_freedom),
            ("P2_bijection", self.p2_bijection),
            ("P3_labels_resolve", self.p3_labels_resolve),
        ]
    }
}

/// Verify the end-of-pipeline postconditions.
pub fn verify_program(ctx: &PipelineContext) -> PipelineCert {
    let program = &ctx.program;
    let methods = program.all_live_methods();

    let p1_constant_write_freedom = methods.iter().all(|m| {
        program.method(*m).body.stmts.iter().all(|s| match &s.kind {
            StmtKind::Assign {
                place: crate::ir::Place::Field { field, .. },
                ..
            } => !program.field(*field).is_final,
            _ => true,
        })
    });

    let p2_bijection = materialize::certify(ctx).m1_bijection
        && ctx.registered().all(|(_, c)| !program.class(c).removed);

    let p3_labels_resolve = methods.iter().all(|m| {
        let body = &program.method(*m).body;
        body.stmts
            .iter()
            .filter_map(|s| s.kind.branch_target())
            .all(|l| body.label_position(l).is_some())
    });

    PipelineCert {
        p1_constant_write_freedom,
        p2_bijection,
        p3_labels_resolve,
    }
}

/// Report dynamic lookups the reducers could not resolve and, with unboxing
/// on, token arithmetic that stayed boxed.
fn warn_leftovers(ctx: &mut PipelineContext) {
    let mut lookups = Vec::new();
    let mut boxed = Vec::new();
    for m in ctx.program.all_live_methods() {
        for (_, inv) in ctx.program.method(m).body.invokes() {
            match inv.method.name.as_str() {
                "getAttribute" | "getPort" | "getEntity" | "getRelation" => {
                    lookups.push((ctx.program.method_name(m), inv.method.name.clone()));
                }
                "add" | "subtract" | "multiply" | "divide" | "modulo"
                    if ctx.options.unboxing && framework::is_value_class(&inv.method.class) =>
                {
                    boxed.push((ctx.program.method_name(m), inv.method.name.clone()));
                }
                _ => {}
            }
        }
    }
    for (subject, name) in lookups {
        ctx.warn(
            Diagnostic::warning(subject, format!("dynamic {name} call left in place"))
                .with_code(codes::W0300)
                .with_hint("the target could not be resolved to a single model object"),
        );
    }
    for (subject, name) in boxed {
        ctx.warn(
            Diagnostic::warning(subject, format!("token {name} left boxed"))
                .with_code(codes::W0301)
                .with_hint("an operand type is unknown at this point"),
        );
    }
}

// ── Helper: finish a pass ──────────────────────────────────────────────────

/// Per-pass post-processing: callback, verbose timing, watchdog check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    changed: usize,
    elapsed: Duration,
    started: Instant,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> std::result::Result<(), PipelineError> {
    on_pass_complete(pass_id, &state.ctx.diagnostics);
    let name = descriptor(pass_id).name;
    if verbose {
        tracing::debug!(
            changed,
            "{} complete, {:.1}ms",
            name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if let Some(limit) = state.ctx.options.watchdog_timeout_ms {
        let elapsed_ms = started.elapsed().as_millis();
        if elapsed_ms >= u128::from(limit) {
            state.has_error = true;
            return Err(PipelineError {
                failing_pass: pass_id,
                error: Some(SpecError::WatchdogExpired {
                    pass: name,
                    elapsed_ms,
                }),
            });
        }
    }
    Ok(())
}

fn fail(state: &mut CompilationState, pass_id: PassId, error: SpecError) -> PipelineError {
    let pass = descriptor(pass_id).name;
    tracing::error!(pass, "{error}");
    let mut diag = Diagnostic::new(DiagLevel::Error, pass, error.to_string());
    diag.code = error.code();
    state.ctx.diagnostics.push(diag);
    state.has_error = true;
    PipelineError {
        failing_pass: pass_id,
        error: Some(error),
    }
}

fn snapshot(state: &mut CompilationState, stage: impl Into<String>) {
    if state.ctx.options.snapshots {
        let dump = state.ctx.program.to_string();
        state.snapshots.push(Snapshot {
            stage: stage.into(),
            dump,
        });
    }
}

/// Execute one reducing pass and report how much it changed.
fn run_reducing(ctx: &mut PipelineContext, pass_id: PassId) -> Result<usize> {
    match pass_id {
        PassId::FieldsForEntities => crate::reducers::fields_for_entities(ctx),
        PassId::FieldsForPorts => crate::reducers::fields_for_ports(ctx),
        PassId::FieldsForAttributes => crate::reducers::fields_for_attributes(ctx),
        PassId::InlineParameters => crate::inline_params::run(ctx),
        PassId::NamedObjEquality => crate::named_obj::fold_equality(ctx),
        PassId::InlineTokens => crate::inline_tokens::run(ctx),
        PassId::Cleanup => crate::cleanup::run(ctx),
        PassId::DeadCode => crate::dce::run(ctx),
        PassId::Materialize | PassId::Verify => Err(SpecError::inconsistency(
            "pipeline",
            format!("{} is not a reducing pass", descriptor(pass_id).name),
        )),
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → watchdog.
///
/// Preconditions: `state.ctx` holds a loaded model and an empty program.
/// Postconditions: every pass in `required_passes(terminal)` has run to a
///   fixed point, or `state.has_error` is true.
/// Failure modes: fatal pass errors; certificate failure; watchdog expiry.
/// Side effects: calls `on_pass_complete` after each pass for immediate diagnostic display.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> std::result::Result<(), PipelineError> {
    let passes = required_passes(terminal);
    let started = Instant::now();

    if passes.contains(&PassId::Materialize) {
        let t = Instant::now();
        let cert = materialize::run(&mut state.ctx)
            .map_err(|e| fail(state, PassId::Materialize, e))?;
        let elapsed = t.elapsed();
        if !cert.all_pass() {
            state.ctx.diagnostics.push(
                Diagnostic::new(
                    DiagLevel::Error,
                    state.ctx.model.name(state.ctx.model.top),
                    format!("materialization verification failed: {}", cert.failed().join(", ")),
                )
                .with_code(codes::E0600),
            );
            state.has_error = true;
            on_pass_complete(PassId::Materialize, &state.ctx.diagnostics);
            return Err(PipelineError {
                failing_pass: PassId::Materialize,
                error: None,
            });
        }
        let classes = state.ctx.program.live_classes().count();
        finish_pass(
            state,
            PassId::Materialize,
            classes,
            elapsed,
            started,
            verbose,
            &mut on_pass_complete,
        )?;
        snapshot(state, "materialize");
    }

    // Declaration order, not dependency order: ports before attributes keeps
    // the dumps stable across terminals.
    let reducing: Vec<PassId> = ALL_PASSES
        .iter()
        .copied()
        .filter(|p| passes.contains(p) && descriptor(*p).reducing)
        .collect();
    if !reducing.is_empty() {
        let max_rounds = state.ctx.options.max_rounds.max(1);
        for round in 1..=max_rounds {
            let mut changed = 0;
            for &pass_id in &reducing {
                let t = Instant::now();
                let n = run_reducing(&mut state.ctx, pass_id).map_err(|e| fail(state, pass_id, e))?;
                let elapsed = t.elapsed();
                changed += n;
                finish_pass(state, pass_id, n, elapsed, started, verbose, &mut on_pass_complete)?;
            }
            state.rounds = round;
            tracing::debug!(round, changed, "reduction round finished");
            snapshot(state, format!("round {round}"));
            if changed == 0 {
                break;
            }
            if round == max_rounds {
                tracing::info!(max_rounds, "round cap reached before a fixed point");
            }
        }
    }

    if passes.contains(&PassId::Verify) {
        let t = Instant::now();
        warn_leftovers(&mut state.ctx);
        let cert = verify_program(&state.ctx);
        let elapsed = t.elapsed();
        if !cert.all_pass() {
            let failed = cert.failed().join(", ");
            state.ctx.diagnostics.push(
                Diagnostic::new(
                    DiagLevel::Error,
                    state.ctx.model.name(state.ctx.model.top),
                    format!("program verification failed: {failed}"),
                )
                .with_code(codes::E0600),
            );
            state.cert = Some(cert);
            state.has_error = true;
            on_pass_complete(PassId::Verify, &state.ctx.diagnostics);
            return Err(PipelineError {
                failing_pass: PassId::Verify,
                error: None,
            });
        }
        state.cert = Some(cert);
        finish_pass(state, PassId::Verify, 0, elapsed, started, verbose, &mut on_pass_complete)?;
        snapshot(state, "final");
    }

    tracing::info!(
        rounds = state.rounds,
        classes = state.ctx.program.live_classes().count(),
        warnings = state.ctx.diagnostics.len(),
        "specialization finished"
    );
    Ok(())
}

/// Load, specialize and verify `model_json` in one call.
pub fn specialize(
    model_json: &str,
    options: PipelineOptions,
) -> std::result::Result<CompilationState, PipelineError> {
    let mut state = CompilationState::from_json(model_json, options).map_err(|e| PipelineError {
        failing_pass: PassId::Materialize,
        error: Some(e),
    })?;
    run_pipeline(&mut state, PassId::Verify, false, |_, _| {})?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::DEMO;

    fn count_calls(ctx: &PipelineContext, name: &str) -> usize {
        ctx.program
            .all_live_methods()
            .into_iter()
            .map(|m| {
                ctx.program
                    .method(m)
                    .body
                    .invokes()
                    .filter(|(_, i)| i.method.name == name)
                    .count()
            })
            .sum()
    }

    #[test]
    fn demo_reaches_a_fixed_point_and_verifies() {
        let state = specialize(DEMO, PipelineOptions::default()).unwrap();
        assert!(!state.has_error);
        assert!(state.rounds >= 2);
        let cert = state.cert.as_ref().unwrap();
        assert!(cert.all_pass(), "{:?}", cert.obligations());
        assert_eq!(count_calls(&state.ctx, "getAttribute"), 0);
        assert_eq!(count_calls(&state.ctx, "getPort"), 0);
        assert_eq!(count_calls(&state.ctx, "getToken"), 0);
    }

    #[test]
    fn callback_sees_every_pass() {
        let mut state = CompilationState::from_json(DEMO, PipelineOptions::default()).unwrap();
        let mut seen = Vec::new();
        run_pipeline(&mut state, PassId::Verify, true, |p, _| seen.push(p)).unwrap();
        assert_eq!(seen.first(), Some(&PassId::Materialize));
        assert_eq!(seen.last(), Some(&PassId::Verify));
        let cleanups = seen.iter().filter(|p| **p == PassId::Cleanup).count();
        assert_eq!(cleanups, state.rounds);
    }

    #[test]
    fn terminal_materialize_runs_one_pass() {
        let mut state = CompilationState::from_json(DEMO, PipelineOptions::default()).unwrap();
        let mut seen = Vec::new();
        run_pipeline(&mut state, PassId::Materialize, false, |p, _| seen.push(p)).unwrap();
        assert_eq!(seen, vec![PassId::Materialize]);
        assert_eq!(state.rounds, 0);
        assert!(count_calls(&state.ctx, "getAttribute") > 0);
    }

    #[test]
    fn zero_budget_watchdog_does_not_complete() {
        let options = PipelineOptions {
            watchdog_timeout_ms: Some(0),
            ..PipelineOptions::default()
        };
        let err = specialize(DEMO, options).err().unwrap();
        assert!(err.did_not_complete());
        assert_eq!(err.failing_pass, PassId::Materialize);
        assert!(err.to_string().contains("did not complete"), "{err}");
    }

    #[test]
    fn unsupported_kind_names_the_pass_and_object() {
        let json = r#"{"name": "M", "entities": [{"name": "fn", "kind": "MathFunction"}]}"#;
        let err = specialize(json, PipelineOptions::default()).err().unwrap();
        assert_eq!(err.failing_pass, PassId::Materialize);
        assert!(!err.did_not_complete());
        let text = err.to_string();
        assert!(text.starts_with("materialize: "), "{text}");
        assert!(text.contains("M.fn"), "{text}");
    }

    #[test]
    fn snapshots_follow_named_stages() {
        let options = PipelineOptions {
            snapshots: true,
            ..PipelineOptions::default()
        };
        let state = specialize(DEMO, options).unwrap();
        let stages: Vec<&str> = state.snapshots.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(stages.first(), Some(&"materialize"));
        assert_eq!(stages.last(), Some(&"final"));
        assert_eq!(stages.len(), state.rounds + 2);
        assert!(state.snapshots[0].dump.contains("class "));
    }

    #[test]
    fn no_snapshots_unless_asked() {
        let state = specialize(DEMO, PipelineOptions::default()).unwrap();
        assert!(state.snapshots.is_empty());
    }

    #[test]
    fn provenance_is_stable_and_sensitive_to_the_model() {
        let a = compute_provenance(DEMO);
        let b = compute_provenance(DEMO);
        assert_eq!(a.model_hash, b.model_hash);
        assert_eq!(a.catalogue_fingerprint, b.catalogue_fingerprint);
        assert_eq!(a.model_hash_hex().len(), 64);
        let c = compute_provenance(&DEMO.replace("2+3", "2+4"));
        assert_ne!(a.model_hash, c.model_hash);
        assert!(a.to_json().contains("\"compiler_version\""));
    }

    #[test]
    fn certificate_catches_stores_to_final_fields() {
        let mut state = specialize(DEMO, PipelineOptions::default()).unwrap();
        let ctx = &mut state.ctx;
        let top = ctx.class_for_object(ctx.model.top).unwrap();
        let field = ctx.program.add_field(top, "_frozen", crate::ir::Type::Int);
        ctx.program.field_mut(field).is_final = true;
        let init = ctx.program.method_by_name(top, "<init>").unwrap();
        let body = &mut ctx.program.method_mut(init).body;
        let this = body.this_local.unwrap();
        let mut em = crate::builder::Emitter::new(body);
        em.field_store(this, field, crate::ir::Operand::int(1));
        let stmts = em.finish();
        body.insert_before_return(stmts);
        let cert = verify_program(ctx);
        assert!(!cert.p1_constant_write_freedom);
        assert!(cert.p2_bijection);
        assert_eq!(cert.failed(), vec!["P1_constant_write_freedom"]);
    }
}
