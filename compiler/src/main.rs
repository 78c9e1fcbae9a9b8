use clap::Parser;
use std::path::PathBuf;

use layoutc::catalogue::{Catalogue, KernelCatalogue};
use layoutc::config::JudgeConfig;
use layoutc::graph::ComputeGraph;
use layoutc::precision::PrecisionMode;

#[derive(Debug, Clone, clap::ValueEnum)]
enum Emit {
    /// Annotated graph, one line per slot
    Text,
    /// Annotated graph as JSON
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "layoutc",
    version,
    about = "Decides tensor layouts and element types for every node of a compute graph"
)]
struct Cli {
    /// Input graph (JSON)
    graph: PathBuf,

    /// Kernel catalogue file (repeatable)
    #[arg(short, long = "catalogue", required = true)]
    catalogue: Vec<PathBuf>,

    /// Run configuration file (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Precision mode, e.g. `allow_mix_precision_bf16`
    #[arg(long)]
    precision_mode: Option<PrecisionMode>,

    /// Per-operator precision class overrides: `OpType=class[,OpType=class...]`
    #[arg(long)]
    mix_list: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Emit::Text)]
    emit: Emit,

    /// Output file (stdout when absent)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print phases, decisions and timing
    #[arg(long)]
    verbose: bool,
}

fn input_error(msg: impl std::fmt::Display) -> ! {
    eprintln!("layoutc: error: {}", msg);
    std::process::exit(2);
}

fn main() {
    let cli = Cli::parse();

    let verbosity: usize = if cli.verbose { 3 } else { 1 };
    if let Err(e) = stderrlog::new()
        .module(module_path!())
        .verbosity(verbosity)
        .init()
    {
        eprintln!("layoutc: warning: logger unavailable: {}", e);
    }

    // ── Configuration ──
    let mut config = match &cli.config {
        Some(path) => JudgeConfig::load_json(path).unwrap_or_else(|e| input_error(e)),
        None => JudgeConfig::default(),
    };
    if let Some(mode) = cli.precision_mode {
        config.precision_mode = mode;
    }
    for list in &cli.mix_list {
        if let Err(e) = config.apply_mix_list(list) {
            input_error(e);
        }
    }
    log::info!("precision mode = {}", config.precision_mode);

    // ── Load kernel catalogue ──
    let mut catalogue = Catalogue::new();
    for path in &cli.catalogue {
        match catalogue.load_json(path) {
            Ok(n) => log::info!("loaded {} kernel table(s) from {}", n, path.display()),
            Err(e) => input_error(e),
        }
    }
    log::info!(
        "{} kernel tables, fingerprint {}",
        catalogue.len(),
        catalogue.fingerprint()
    );
    for (op, class) in &config.precision_overrides {
        log::debug!(
            "{}: {} (catalogue: {})",
            op,
            class,
            catalogue.precision_class(op)
        );
    }

    // ── Read graph ──
    let source = std::fs::read_to_string(&cli.graph)
        .unwrap_or_else(|e| input_error(format!("{}: {}", cli.graph.display(), e)));
    let mut graph: ComputeGraph = serde_json::from_str(&source)
        .unwrap_or_else(|e| input_error(format!("{}: {}", cli.graph.display(), e)));

    // ── Judge ──
    let report = match layoutc::pipeline::judge_graph(&mut graph, &catalogue, &config) {
        Ok(report) => report,
        Err(failure) => {
            eprintln!("layoutc: {}", failure.to_diagnostic());
            std::process::exit(1);
        }
    };
    log::info!("{}", report);

    // ── Emit ──
    let rendered = match cli.emit {
        Emit::Text => graph.to_string(),
        Emit::Json => match serde_json::to_string_pretty(&graph) {
            Ok(mut s) => {
                s.push('\n');
                s
            }
            Err(e) => input_error(e),
        },
    };
    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, rendered) {
                input_error(format!("{}: {}", path.display(), e));
            }
        }
        None => print!("{}", rendered),
    }
}
