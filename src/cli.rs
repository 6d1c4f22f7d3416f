//! The `capns` command-line interface.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use capns_def::Manifest;
use capns_exec::{CancelToken, PlanExecutor};
use capns_plan::{CapInputFile, PlanBuilder};
use capns_resolver::resolve_paths;
use capns_router::{CapCube, CapMatrix};
use capns_transport::CommandSpec;

use crate::engine::{PluginBackend, UnboundProvider};
use crate::exit_codes::ExitCode;

/// Capability-graph runtime: route, plan and execute typed data
/// transformations.
#[derive(Debug, Parser)]
#[command(name = "capns", version, about)]
pub struct Cli {
    /// Enable debug-level logging for the capns crates.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Emit machine-readable JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve paths, directories and globs into typed input files.
    Resolve {
        /// Files, directories or glob patterns.
        paths: Vec<String>,
    },
    /// Show the conversion graph derived from one or more manifests.
    Graph {
        /// Manifest JSON files.
        #[arg(long = "manifest", required = true)]
        manifests: Vec<PathBuf>,
        /// Also list media types reachable from this source.
        #[arg(long)]
        from: Option<String>,
    },
    /// Build an execution plan and print it as JSON.
    Plan {
        #[arg(long = "manifest", required = true)]
        manifests: Vec<PathBuf>,
        /// Source media URN.
        #[arg(long)]
        from: String,
        /// Target media URN.
        #[arg(long)]
        to: String,
        /// Input files to bind into the plan.
        inputs: Vec<String>,
    },
    /// Build a plan and execute it against a plugin.
    Run {
        #[arg(long = "manifest", required = true)]
        manifests: Vec<PathBuf>,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// Plugin command implementing the caps (argv style; first
        /// element is the program).
        #[arg(long, required = true, num_args = 1..)]
        plugin: Vec<String>,
        /// Write the final output here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
        inputs: Vec<String>,
    },
    /// Validate a manifest: identity cap, duplicates, cap definitions,
    /// inline media specs.
    Validate {
        /// Manifest JSON file.
        manifest: PathBuf,
    },
}

/// Run the parsed CLI to an exit code.
pub async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Resolve { paths } => cmd_resolve(&paths, cli.json),
        Command::Graph { manifests, from } => cmd_graph(&manifests, from.as_deref(), cli.json),
        Command::Plan {
            manifests,
            from,
            to,
            inputs,
        } => cmd_plan(&manifests, &from, &to, &inputs),
        Command::Run {
            manifests,
            from,
            to,
            plugin,
            output,
            inputs,
        } => cmd_run(&manifests, &from, &to, &plugin, output.as_deref(), &inputs).await,
        Command::Validate { manifest } => cmd_validate(&manifest),
    }
}

fn load_manifests(paths: &[PathBuf]) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        let manifest = Manifest::from_json(value)
            .with_context(|| format!("decoding manifest {}", path.display()))?;
        manifest
            .validate(None)
            .with_context(|| format!("validating manifest {}", path.display()))?;
        manifests.push(manifest);
    }
    Ok(manifests)
}

/// Build a cube with every manifest's caps registered as unbound
/// declarations, enough for routing, graphing and planning.
fn declaration_cube(manifests: &[Manifest]) -> CapCube {
    let mut cube = CapCube::new();
    for manifest in manifests {
        let mut matrix = CapMatrix::new();
        for cap in &manifest.caps {
            matrix.register(cap.clone(), Arc::new(UnboundProvider));
        }
        cube.add(manifest.name.clone(), matrix);
    }
    cube
}

fn resolved_input_files(inputs: &[String]) -> Result<Vec<CapInputFile>> {
    if inputs.is_empty() {
        return Ok(Vec::new());
    }
    let set = resolve_paths(inputs)?;
    Ok(set
        .files
        .into_iter()
        .map(|f| CapInputFile::new(f.path.into_std_path_buf(), f.media_urn))
        .collect())
}

fn cmd_resolve(paths: &[String], json: bool) -> Result<ExitCode> {
    let set = resolve_paths(paths)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&set)?);
    } else {
        for file in &set.files {
            println!(
                "{}\t{}\t{} bytes",
                file.path, file.media_urn, file.size_bytes
            );
        }
        println!(
            "{} file(s), cardinality {:?}, common media {}",
            set.files.len(),
            set.cardinality,
            set.common_media
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string)
        );
    }
    Ok(ExitCode::Success)
}

fn cmd_graph(manifests: &[PathBuf], from: Option<&str>, json: bool) -> Result<ExitCode> {
    let manifests = load_manifests(manifests)?;
    let cube = declaration_cube(&manifests);
    let graph = cube.graph();
    let stats = graph.stats();

    if json {
        let mut report = serde_json::json!({
            "nodes": stats.node_count,
            "edges": stats.edge_count,
            "input_specs": graph.input_specs(),
            "output_specs": graph.output_specs(),
        });
        if let Some(source) = from {
            let builder = PlanBuilder::new(graph);
            report["reachable"] = serde_json::to_value(builder.reachable_targets(source, 8))?;
        }
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} nodes, {} edges ({} input specs, {} output specs)",
            stats.node_count, stats.edge_count, stats.input_spec_count, stats.output_spec_count
        );
        if let Some(source) = from {
            let builder = PlanBuilder::new(graph);
            for target in builder.reachable_targets(source, 8) {
                println!(
                    "{} (depth {}..{})",
                    target.media_urn, target.min_depth, target.max_depth
                );
            }
        }
    }
    Ok(ExitCode::Success)
}

fn cmd_plan(manifests: &[PathBuf], from: &str, to: &str, inputs: &[String]) -> Result<ExitCode> {
    let manifests = load_manifests(manifests)?;
    let cube = declaration_cube(&manifests);
    let builder = PlanBuilder::new(cube.graph());
    let input_files = resolved_input_files(inputs)?;
    let plan = builder.build_plan(from, to, &input_files)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(ExitCode::Success)
}

async fn cmd_run(
    manifests: &[PathBuf],
    from: &str,
    to: &str,
    plugin: &[String],
    output: Option<&std::path::Path>,
    inputs: &[String],
) -> Result<ExitCode> {
    let loaded = load_manifests(manifests)?;
    let cube = declaration_cube(&loaded);
    let builder = PlanBuilder::new(cube.graph());
    let input_files = resolved_input_files(inputs)?;
    let plan = builder.build_plan(from, to, &input_files)?;
    info!(plan = %plan.name, nodes = plan.nodes.len(), "plan built");

    let (program, args) = plugin
        .split_first()
        .ok_or_else(|| anyhow!("empty plugin command"))?;
    let spec = CommandSpec::new(program).args(args.iter().map(String::as_str));
    // The plugin serves every manifest's caps over one connection.
    let mut merged = Manifest::new("merged", "0", "merged manifest set");
    for manifest in loaded {
        merged.caps.extend(manifest.caps);
    }
    let backend = PluginBackend::spawn(&spec, merged)
        .map_err(|e| anyhow!("spawning plugin: {e}"))?;

    let executor = PlanExecutor::new(&backend, &plan, input_files);
    let result = executor
        .execute(&CancelToken::new())
        .await
        .map_err(|e| anyhow!("executing plan: {e}"))?;

    for node in &result.node_results {
        info!(
            node = %node.node_id,
            success = node.success,
            duration_ms = node.duration_ms,
            "node finished"
        );
    }

    if !result.success {
        eprintln!(
            "execution failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        return Ok(ExitCode::ExecutionFailure);
    }

    match (output, result.final_output) {
        (Some(path), Some(bytes)) => {
            std::fs::write(path, bytes)
                .with_context(|| format!("writing output {}", path.display()))?;
        }
        (None, Some(bytes)) => {
            use std::io::Write;
            std::io::stdout().write_all(&bytes)?;
        }
        (_, None) => eprintln!("plan produced no output"),
    }
    Ok(ExitCode::Success)
}

fn cmd_validate(path: &std::path::Path) -> Result<ExitCode> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let manifest = Manifest::from_json(value)?;
    match manifest.validate(None) {
        Ok(()) => {
            println!(
                "manifest {} v{} is valid ({} caps)",
                manifest.name,
                manifest.version,
                manifest.caps.len()
            );
            Ok(ExitCode::Success)
        }
        Err(e) => {
            eprintln!("manifest invalid: {e}");
            Ok(ExitCode::PlanFailure)
        }
    }
}

/// Map a top-level error to the exit code contract: resolution and
/// planning problems are plan failures.
#[must_use]
pub fn error_exit_code(_error: &anyhow::Error) -> ExitCode {
    ExitCode::PlanFailure
}
