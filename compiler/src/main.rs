use clap::Parser;
use std::path::{Path, PathBuf};

use dfsc::config::PipelineOptions;
use dfsc::diag::DiagLevel;
use dfsc::model::{Model, ObjKind};
use dfsc::pass::PassId;
use dfsc::pipeline::{run_pipeline, CompilationState};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// Classes, rounds, warnings and provenance
    Summary,
    /// The specialized program dump
    Ir,
    /// The loaded model tree with resolved values; no specialization
    Model,
}

#[derive(Parser, Debug)]
#[command(
    name = "dfsc",
    version,
    about = "Dataflow Specializing Compiler: turns actor models into specialized classes"
)]
struct Cli {
    /// Input model description (JSON)
    model: PathBuf,

    /// Package prefix of the generated classes
    #[arg(long, default_value = "dfsc.generated")]
    target_package: String,

    /// Directory for the program dump and snapshots
    #[arg(long, default_value = "out")]
    output_dir: PathBuf,

    /// Keep a program dump after each named stage
    #[arg(long)]
    snapshots: bool,

    /// Skip the native-value unboxing narrowing
    #[arg(long)]
    no_unboxing: bool,

    /// Abort after this many milliseconds
    #[arg(long)]
    watchdog_ms: Option<u64>,

    /// Upper bound on reduction rounds
    #[arg(long, default_value_t = 16)]
    max_rounds: usize,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Summary)]
    emit: EmitStage,

    /// Print passes and timing
    #[arg(long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "dfsc=debug" } else { "dfsc=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn describe_model(model: &Model) -> String {
    let mut out = String::new();
    for id in model.ids() {
        let obj = model.object(id);
        let depth = obj.full_name.matches('.').count();
        let detail = match &obj.kind {
            ObjKind::Composite => "composite".to_string(),
            ObjKind::Atomic(info) => format!("actor {}", info.kind_name),
            ObjKind::Director { kind } => format!("director {kind}"),
            ObjKind::Port(p) => {
                let dir = match (p.input, p.output) {
                    (true, true) => "inout",
                    (true, false) => "input",
                    _ => "output",
                };
                format!("{dir} port : {}", p.resolved)
            }
            ObjKind::Relation => "relation".to_string(),
            ObjKind::Variable(v) => match &v.value {
                Some(value) => format!("parameter \"{}\" = {value} : {}", v.expression, v.resolved),
                None => format!("parameter \"\" : {}", v.resolved),
            },
            ObjKind::Settable { expression } => format!("string \"{expression}\""),
        };
        out.push_str(&format!("{}{} ({detail})\n", "  ".repeat(depth), obj.name));
    }
    out
}

fn write_outputs(state: &CompilationState, dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join("program.ir"), state.ctx.program.to_string())?;
    if !state.snapshots.is_empty() {
        let snaps = dir.join("snapshots");
        std::fs::create_dir_all(&snaps)?;
        for (i, snap) in state.snapshots.iter().enumerate() {
            let name = format!("{:02}-{}.ir", i, snap.stage.replace(' ', "-"));
            std::fs::write(snaps.join(name), &snap.dump)?;
        }
    }
    Ok(())
}

fn summary(state: &CompilationState) -> String {
    let ctx = &state.ctx;
    let mut out = String::new();
    out.push_str(&format!("model: {}\n", ctx.model.name(ctx.model.top)));
    out.push_str(&format!("rounds: {}\n", state.rounds));
    out.push_str(&format!("actor classes: {}\n", ctx.actor_classes().len()));
    for class in ctx.actor_classes() {
        out.push_str(&format!("  {}\n", ctx.program.class(*class).name));
    }
    out.push_str(&format!("attribute classes: {}\n", ctx.attribute_classes().len()));
    for class in ctx.attribute_classes() {
        out.push_str(&format!("  {}\n", ctx.program.class(*class).name));
    }
    out.push_str(&format!("warnings: {}\n", ctx.diagnostics.len()));
    if let Some(p) = &state.provenance {
        out.push_str(&format!("model sha256: {}\n", p.model_hash_hex()));
        out.push_str(&format!("catalogue sha256: {}\n", p.catalogue_fingerprint_hex()));
        out.push_str(&format!("dfsc {}\n", p.compiler_version));
    }
    out
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tracing::debug!(model = %cli.model.display(), emit = ?cli.emit, "starting");

    // ── Read and load the model ──
    let text = match std::fs::read_to_string(&cli.model) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("dfsc: error: {}: {}", cli.model.display(), e);
            std::process::exit(2);
        }
    };

    let options = PipelineOptions {
        target_package: cli.target_package.clone(),
        output_dir: cli.output_dir.clone(),
        snapshots: cli.snapshots,
        unboxing: !cli.no_unboxing,
        watchdog_timeout_ms: cli.watchdog_ms,
        max_rounds: cli.max_rounds,
    };
    let mut state = match CompilationState::from_json(&text, options) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("dfsc: error: {}", e);
            std::process::exit(2);
        }
    };

    if matches!(cli.emit, EmitStage::Model) {
        print!("{}", describe_model(&state.ctx.model));
        return;
    }

    // ── Specialize ──
    let result = run_pipeline(&mut state, PassId::Verify, cli.verbose, |_, diags| {
        for d in diags.iter().filter(|d| d.level == DiagLevel::Error) {
            eprintln!("dfsc: {}", d);
        }
    });
    if let Err(e) = result {
        eprintln!("dfsc: error: {}", e);
        std::process::exit(if e.did_not_complete() { 3 } else { 1 });
    }

    if let Err(e) = write_outputs(&state, &cli.output_dir) {
        eprintln!("dfsc: error: {}: {}", cli.output_dir.display(), e);
        std::process::exit(2);
    }

    match cli.emit {
        EmitStage::Summary => print!("{}", summary(&state)),
        EmitStage::Ir => print!("{}", state.ctx.program),
        EmitStage::Model => {}
    }
}
