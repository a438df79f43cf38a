use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use funcptr_detector::ir::loader;
use funcptr_detector::{Analysis, AnalysisConfig};

/// Resolve the targets of indirect calls in an SSA module and print them per source line.
#[derive(Debug, Parser)]
#[command(name = "funcptr-detector", version)]
struct Cli {
    /// JSON-encoded IR module
    input: PathBuf,

    /// Maximum number of nested callee bodies walked below a top-level function
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,

    /// Number of passes over the module
    #[arg(long, value_name = "N")]
    rounds: Option<usize>,

    /// Treat NAME as an opaque allocation primitive (repeatable)
    #[arg(long = "opaque", value_name = "NAME", action = clap::ArgAction::Append)]
    opaque: Vec<String>,

    /// Print the resolved call graph in dot format after the records
    #[arg(long)]
    dot: bool,

    /// Limit the dot output to functions reachable from NAME
    #[arg(long, value_name = "NAME", requires = "dot")]
    dot_root: Option<String>,

    /// Write the module with single-target indirect calls rewritten to PATH
    #[arg(long, value_name = "PATH")]
    emit_ir: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AnalysisConfig::from_env()?;
    if let Some(max_depth) = cli.max_depth {
        config.max_call_depth = max_depth;
    }
    if let Some(rounds) = cli.rounds {
        config.rounds = rounds;
    }
    config.opaque_functions.extend(cli.opaque.iter().cloned());
    config.validate()?;

    let mut module = loader::load_file(&cli.input)
        .with_context(|| format!("failed to load {}", cli.input.display()))?;
    info!(
        "loaded {} function(s) from {}",
        module.functions().count(),
        cli.input.display()
    );

    let mut analysis = Analysis::new(&module, config);
    analysis.run();
    for record in analysis.report().records(&module) {
        println!("{}", record);
    }

    let (report, callgraph) = analysis.into_parts();
    if cli.dot {
        let root = match &cli.dot_root {
            Some(name) => {
                let func = module
                    .function_by_name(name)
                    .ok_or_else(|| anyhow!("no function named '{}' in the module", name))?;
                info!(
                    "{} function(s) reachable from {}",
                    callgraph.reachable_from(func).len(),
                    name
                );
                Some(func)
            }
            None => None,
        };
        print!("{}", callgraph.dot(&module, root));
    }

    if let Some(path) = cli.emit_ir {
        let rewritten = report.apply(&mut module);
        if rewritten.is_empty() {
            warn!("no indirect call has a single target; writing the module unchanged");
        }
        info!("devirtualized {} call site(s)", rewritten.len());
        fs::write(&path, module.to_string())
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}
