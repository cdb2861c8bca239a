//! opup - operator-set upgrader
//!
//! Loads a versioned graph and rewrites nodes whose operators changed
//! behavior since the graph was produced.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use opset_upgrade::middle::upgrade::{OldOpsReplacer, UpgradeContext, UpgradeOutcome};
use opset_upgrade::versioning::{
    builtin_registry, builtin_upgraders, builtin_version_map, OperatorVersionMap, UpgraderCatalog,
    MAX_OPERATOR_VERSION,
};
use opset_upgrade::{parse_ir, print_ir, Graph};

/// Operator-set upgrader
#[derive(Parser, Debug)]
#[command(name = "opup")]
#[command(author = "Z1529")]
#[command(version = "0.1.0")]
#[command(about = "Rewrite versioned graphs onto current operator semantics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replace old operators in a graph with their upgraders
    Upgrade {
        /// Input graph file
        input: PathBuf,

        /// Treat the graph as produced under this operator version
        #[arg(long, value_name = "N")]
        op_version: Option<u64>,

        /// Extra version map entries (JSON), merged over the built-in map
        #[arg(long, value_name = "JSON")]
        version_map: Option<PathBuf>,

        /// Extra upgrader bodies (JSON object of name to graph text)
        #[arg(long, value_name = "JSON")]
        upgraders: Option<PathBuf>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Parse a graph file and report what it contains
    Check {
        /// Input graph file
        input: PathBuf,
    },
    /// Validate and print the built-in version map and upgrader catalog
    DumpTables,
    /// Print version information
    Version,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Upgrade {
            input,
            op_version,
            version_map,
            upgraders,
            output,
        } => upgrade_file(
            input,
            *op_version,
            version_map.as_deref(),
            upgraders.as_deref(),
            output.as_deref(),
        ),
        Commands::Check { input } => check_file(input),
        Commands::DumpTables => dump_tables(),
        Commands::Version => {
            println!("opup 0.1.0");
            println!("Operator-set upgrader (operator version {})", MAX_OPERATOR_VERSION);
            println!("License: Apache-2.0");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_graph(input: &Path) -> anyhow::Result<Graph> {
    let source = fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    parse_ir(&source).with_context(|| format!("parsing {}", input.display()))
}

/// Upgrade a graph file
fn upgrade_file(
    input: &Path,
    op_version: Option<u64>,
    version_map: Option<&Path>,
    upgraders: Option<&Path>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let mut graph = load_graph(input)?;
    if let Some(version) = op_version {
        graph.set_op_version(version);
    }

    let mut map = builtin_version_map().clone();
    if let Some(path) = version_map {
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let extra = OperatorVersionMap::from_json(&json)
            .with_context(|| format!("loading version map {}", path.display()))?;
        map.extend(extra);
    }
    map.validate().context("merged version map is inconsistent")?;

    let mut catalog = builtin_upgraders().clone();
    if let Some(path) = upgraders {
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let extra: UpgraderCatalog = serde_json::from_str(&json)
            .with_context(|| format!("loading upgraders {}", path.display()))?;
        for (name, body) in extra.iter() {
            catalog.insert(name, body);
        }
    }

    let ctx = UpgradeContext::new(&map, &catalog, builtin_registry());
    let report = OldOpsReplacer::new(ctx)
        .run(&mut graph)
        .with_context(|| format!("upgrading {}", input.display()))?;

    match &report.outcome {
        UpgradeOutcome::Unversioned => eprintln!("  [-] Graph has no operator version; left as is"),
        UpgradeOutcome::Completed { version } => {
            eprintln!("  [✓] Upgraded {} node(s), operator version {}", report.upgraded.len(), version)
        }
        UpgradeOutcome::StoppedAtCurrentOp { op } => eprintln!(
            "  [!] Stopped at {} (already current); upgraded {} node(s)",
            op,
            report.upgraded.len()
        ),
    }
    for node in &report.upgraded {
        eprintln!("      {} -> {}", node.op, node.upgrader);
    }

    let text = print_ir(&graph);
    match output {
        Some(path) => {
            fs::write(path, &text).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("  [→] Wrote {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

/// Check a graph file without rewriting it
fn check_file(input: &Path) -> anyhow::Result<()> {
    println!("Checking: {}", input.display());
    let graph = load_graph(input)?;

    let map = builtin_version_map();
    let registry = builtin_registry();
    let mut versioned = 0;
    for node in graph.nodes_depth_first() {
        let resolved = registry.maybe_schema(&graph, node).map(|s| s.full_name());
        if let Some(op) = resolved {
            if map.lookup(&op).is_some() {
                versioned += 1;
            }
        }
    }

    match graph.op_version() {
        Some(version) => println!("  operator version: {}", version),
        None => println!("  operator version: none"),
    }
    println!("  inputs: {}, outputs: {}", graph.inputs().len(), graph.outputs().len());
    println!("  nodes: {} ({} with version history)", graph.node_count(), versioned);
    if let Some(version) = graph.op_version() {
        if version > MAX_OPERATOR_VERSION {
            bail!(
                "graph operator version {} is newer than this runtime ({})",
                version,
                MAX_OPERATOR_VERSION
            );
        }
    }
    println!("✅ No errors found");
    Ok(())
}

/// Print both built-in tables as JSON after checking they agree
fn dump_tables() -> anyhow::Result<()> {
    let map = builtin_version_map();
    let catalog = builtin_upgraders();
    map.validate().context("built-in version map")?;
    catalog
        .check_against(map)
        .context("built-in upgraders do not cover the version map")?;

    let dump = serde_json::json!({
        "max_operator_version": MAX_OPERATOR_VERSION,
        "version_map": serde_json::to_value(map)?,
        "upgraders": serde_json::to_value(catalog)?,
    });
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}
