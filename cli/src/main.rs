use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Once;

static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "evmasm=debug,evmasm_core=info,evmasm_cli=info";

use anyhow::Context;
use clap::{Parser, Subcommand};
use evmasm_core::{
    Assembly, EvmVersion, OptimiserSettings,
    description::AssemblyDescription,
    disasm,
    linker::ADDRESS_WIDTH,
    printer::{SourceCodes, SourceIndices},
};
use tracing::debug;

#[cfg(test)]
mod main_test;

#[derive(Debug, Parser)]
#[command(
    name = "evmasm",
    author,
    version,
    about = "Optimise, assemble and inspect EVM assembly descriptions",
    long_about = None
)]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,
}

/// Knobs shared by every command that may optimise.
#[derive(Debug, Clone, Default, clap::Args)]
struct OptimiseArgs {
    /// Run every optimiser pass (jumpdest removal and peephole always run when optimising)
    #[arg(long, alias = "optimise")]
    optimize: bool,
    /// Expected executions per deployment, weighs runtime gas against code size
    #[arg(long, value_name = "N")]
    runs: Option<u64>,
    /// Treat the root as creation code
    #[arg(long)]
    creation: bool,
    #[arg(long, value_name = "VERSION")]
    evm_version: Option<EvmVersion>,
    /// TOML file with optimiser settings; flags override it
    #[arg(long, value_name = "FILE", value_parser = parse_sanitized_path)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Assemble a JSON assembly description into a linker object.
    Assemble {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        #[command(flatten)]
        optimise: OptimiseArgs,
        /// Resolve a library address, `NAME=0x<40 hex digits>`; may be repeated
        #[arg(long = "link", value_name = "NAME=ADDRESS")]
        links: Vec<String>,
        /// Write the object here instead of stdout
        #[arg(long, short, value_name = "FILE", value_parser = parse_sanitized_path)]
        output: Option<PathBuf>,
    },
    /// Print the text or JSON presentation of an assembly description.
    Print {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        optimise: OptimiseArgs,
    },
    /// Disassemble hex-encoded bytecode.
    Disasm {
        #[arg(value_name = "HEX")]
        hex: String,
    },
}

fn read_file_content(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read file '{}'", path.display()))
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);

    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            anyhow::bail!("Parent directory components ('..') are not allowed in file paths.");
        }
    }

    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}

fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn maybe_init_tracing() {
    let raw = match std::env::var("EVMASM_TRACE") {
        Ok(value) => value,
        Err(_) => return,
    };

    if !env_toggle_enabled(&raw) {
        return;
    }

    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());

        let builder = fmt().with_writer(std::io::stderr);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };

        let _ = builder.try_init();
    });
}

/// Settings from `--config` (or the defaults) with the command-line flags applied on top.
/// `None` when nothing asked for optimisation.
fn resolve_settings(args: &OptimiseArgs) -> anyhow::Result<Option<OptimiserSettings>> {
    let mut settings = match &args.config {
        Some(path) => {
            let text = read_file_content(path)?;
            toml::from_str::<OptimiserSettings>(&text)
                .with_context(|| format!("Invalid optimiser config '{}'", path.display()))?
        }
        None if args.optimize => OptimiserSettings {
            is_creation: false,
            ..OptimiserSettings::full()
        },
        None => return Ok(None),
    };
    if args.optimize {
        settings.run_deduplicate = true;
        settings.run_cse = true;
        settings.run_constant_optimiser = true;
    }
    if args.creation {
        settings.is_creation = true;
    }
    if let Some(runs) = args.runs {
        settings.expected_executions_per_deployment = runs;
    }
    if let Some(version) = args.evm_version {
        settings.evm_version = version;
    }
    Ok(Some(settings))
}

fn parse_link(raw: &str) -> anyhow::Result<(String, [u8; ADDRESS_WIDTH])> {
    let (name, address) = raw
        .split_once('=')
        .with_context(|| format!("Expected NAME=ADDRESS, got '{raw}'"))?;
    anyhow::ensure!(!name.is_empty(), "Empty library name in '{raw}'");
    let bytes = hex::decode(address.trim_start_matches("0x"))
        .with_context(|| format!("Invalid library address for '{name}'"))?;
    let address: [u8; ADDRESS_WIDTH] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("Library address for '{name}' has {} bytes, expected 20", b.len()))?;
    Ok((name.to_string(), address))
}

fn load_assembly(path: &Path, optimise: &OptimiseArgs) -> anyhow::Result<Assembly> {
    let src = read_file_content(path)?;
    let description = AssemblyDescription::from_json(&src).with_context(|| format!("In '{}'", path.display()))?;
    let mut assembly = description
        .build()
        .with_context(|| format!("Invalid assembly description '{}'", path.display()))?;
    if let Some(settings) = resolve_settings(optimise)? {
        debug!(target: "evmasm::cli", ?settings, "optimising");
        assembly.optimise(&settings).context("Optimisation failed")?;
    }
    Ok(assembly)
}

fn collect_source_names(assembly: &Assembly, names: &mut BTreeSet<String>) {
    for item in assembly.items() {
        if let Some(name) = item.location().source_name() {
            names.insert(name.to_string());
        }
    }
    for sub in assembly.subs() {
        collect_source_names(sub, names);
    }
}

/// Source texts found next to the description, for quoting in the text view.
fn load_sources(base: &Path, names: &BTreeSet<String>) -> SourceCodes {
    let mut sources = BTreeMap::new();
    for name in names {
        let Ok(relative) = sanitize_path(name) else {
            continue;
        };
        if let Ok(text) = std::fs::read_to_string(base.join(relative)) {
            sources.insert(name.clone(), text);
        }
    }
    sources
}

fn write_output(output: Option<&Path>, text: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("Failed to write '{}'", path.display()))?;
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn run_assemble(file: &Path, optimise: &OptimiseArgs, links: &[String], output: Option<&Path>) -> anyhow::Result<()> {
    let mut assembly = load_assembly(file, optimise)?;
    let mut object = assembly.assemble().context("Assembly failed")?.clone();
    if !links.is_empty() {
        let libraries = links
            .iter()
            .map(|raw| parse_link(raw))
            .collect::<anyhow::Result<BTreeMap<_, _>>>()?;
        object.link(&libraries);
    }
    debug!(target: "evmasm::cli", size = object.len(), unresolved = object.link_references.len(), "assembled");
    let text = serde_json::to_string_pretty(&object)?;
    write_output(output, &text)
}

fn run_print(file: &Path, json: bool, optimise: &OptimiseArgs) -> anyhow::Result<()> {
    let assembly = load_assembly(file, optimise)?;
    let mut names = BTreeSet::new();
    collect_source_names(&assembly, &mut names);
    if json {
        let indices: SourceIndices = names.into_iter().enumerate().map(|(i, name)| (name, i)).collect();
        let value = assembly.assembly_json(&indices)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let base = file.parent().unwrap_or_else(|| Path::new("."));
        let sources = load_sources(base, &names);
        print!("{}", assembly.assembly_text(&sources));
    }
    Ok(())
}

fn run_disasm(raw: &str) -> anyhow::Result<()> {
    let digits: String = raw.split_whitespace().collect();
    let bytes = hex::decode(digits.trim_start_matches("0x")).context("Invalid hex bytecode")?;
    print!("{}", disasm::disassemble_to_string(&bytes));
    Ok(())
}

fn main() -> anyhow::Result<()> {
    maybe_init_tracing();

    let CliArgs { command } = CliArgs::parse();

    match command {
        Commands::Assemble {
            file,
            optimise,
            links,
            output,
        } => run_assemble(&file, &optimise, &links, output.as_deref()),
        Commands::Print { file, json, optimise } => run_print(&file, json, &optimise),
        Commands::Disasm { hex } => run_disasm(&hex),
    }
}
