use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use hwgrid::{TomlCatalog, expand, licenses};
use wafersub::arbiter::{ArbiterRegistry, EnsureOutcome};
use wafersub::config::PluginConfig;
use wafersub::options::{RESOURCE_PREFIX, SubmitOptions};
use wafersub::scheduler::SlurmClient;

#[derive(Parser)]
#[command(name = "wafersub", about = "Wafer resource expansion diagnostics")]
struct RootOptions {
    /// Log debug messages
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Expand resource selectors against a catalog and print the resulting
    /// licenses and environment payload
    Expand(ExpandOpts),
    /// Validate a plugin configuration file
    CheckConfig(CheckConfigOpts),
    /// Run the arbiter-ensure protocol for one board against Slurm
    Ensure(EnsureOpts),
}

#[derive(Parser)]
struct EnsureOpts {
    /// Path to the plugin configuration file
    #[arg(long)]
    config: PathBuf,

    /// Board to ensure an arbiter for
    board_id: String,
}

#[derive(Parser)]
struct ExpandOpts {
    /// Path to the hardware catalog
    #[arg(long)]
    catalog: PathBuf,

    /// Module to allocate; repeatable
    #[arg(long = "module", required = true)]
    modules: Vec<u32>,

    /// Board selector, `<id>` or `<id>:<slot>`; repeatable
    #[arg(long = "board")]
    boards: Vec<String>,

    /// Board selector without analog readout; repeatable
    #[arg(long = "board-without-aout")]
    boards_without_aout: Vec<String>,

    /// Chip selector, `<id>` or `<id>:<slot>`; repeatable
    #[arg(long = "chip")]
    chips: Vec<String>,

    /// Chip selector without analog readout; repeatable
    #[arg(long = "chip-without-aout")]
    chips_without_aout: Vec<String>,

    /// Reticle selector, `<id>` or `<id>:<slot>`; repeatable
    #[arg(long = "reticle")]
    reticles: Vec<String>,

    /// Reticle selector without analog readout; repeatable
    #[arg(long = "reticle-without-aout")]
    reticles_without_aout: Vec<String>,

    /// Reticle-of-chip selector, `<id>` or `<id>:<slot>`; repeatable
    #[arg(long = "reticle-of-chip")]
    reticles_of_chip: Vec<String>,

    /// Reticle-of-chip selector without analog readout; repeatable
    #[arg(long = "reticle-of-chip-without-aout")]
    reticles_of_chip_without_aout: Vec<String>,

    #[arg(long)]
    skip_master_alloc: bool,

    #[arg(long)]
    without_trigger: bool,

    #[arg(long, conflicts_with = "force_chip_init")]
    skip_chip_init: bool,

    #[arg(long)]
    force_chip_init: bool,
}

#[derive(Parser)]
struct CheckConfigOpts {
    /// Path to the plugin configuration file
    config: PathBuf,
}

fn setup_logging(verbose: bool) {
    let mut builder = env_logger::Builder::default();
    builder.filter_level(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    builder.parse_default_env();
    builder.init();
}

/// Reuse the plugin's own option parser by rebuilding the scheduler's
/// option-string surface from the CLI arguments.
fn to_option_pairs(opts: &ExpandOpts) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut push = |name: &str, args: String| {
        pairs.push((format!("{RESOURCE_PREFIX}{name}"), args));
    };
    push(
        "module",
        opts.modules
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(","),
    );
    let selector_lists = [
        ("board", &opts.boards),
        ("board_without_aout", &opts.boards_without_aout),
        ("chip", &opts.chips),
        ("chip_without_aout", &opts.chips_without_aout),
        ("reticle", &opts.reticles),
        ("reticle_without_aout", &opts.reticles_without_aout),
        ("reticle_of_chip", &opts.reticles_of_chip),
        (
            "reticle_of_chip_without_aout",
            &opts.reticles_of_chip_without_aout,
        ),
    ];
    for (name, values) in selector_lists {
        for value in values {
            push(name, value.clone());
        }
    }
    let flags = [
        ("skip_master_alloc", opts.skip_master_alloc),
        ("without_trigger", opts.without_trigger),
        ("skip_chip_init", opts.skip_chip_init),
        ("force_chip_init", opts.force_chip_init),
    ];
    for (name, enabled) in flags {
        if enabled {
            push(name, "(null)".to_string());
        }
    }
    pairs
}

fn command_expand(opts: ExpandOpts) -> anyhow::Result<()> {
    let parsed = SubmitOptions::parse(to_option_pairs(&opts))?;
    let resources = parsed
        .resources
        .ok_or_else(|| anyhow::anyhow!("No resources requested"))?;

    let catalog = TomlCatalog::from_file(&opts.catalog)?;
    let request = expand::ExpansionRequest {
        modules: resources.modules,
        selectors: resources.selectors,
        flags: expand::AllocFlags {
            skip_master_alloc: resources.skip_master_alloc,
            without_trigger: resources.without_trigger,
            neighbor_init: match resources.chip_init {
                wafersub::options::ChipInit::Skip => expand::NeighborInit::Skip,
                wafersub::options::ChipInit::Force => expand::NeighborInit::Force,
                wafersub::options::ChipInit::Default => expand::NeighborInit::Default,
            },
        },
    };
    let allocations = expand::expand(&catalog, &request)?;
    let payload = licenses::render(&allocations, resources.without_trigger);

    println!("licenses:          {}", payload.merged_licenses());
    println!("neighbor licenses: {}", payload.neighbor_licenses);
    println!("chips:             {}", payload.chips);
    println!("neighbor chips:    {}", payload.neighbor_chips);
    println!("readouts:          {}", payload.readouts);
    Ok(())
}

fn command_check_config(opts: CheckConfigOpts) -> anyhow::Result<()> {
    let config = PluginConfig::from_file(&opts.config)?;
    for service in &config.services {
        if !service.script_path.is_file() {
            log::warn!(
                "Service {}: script {} does not exist",
                service.name,
                service.script_path.display()
            );
        }
        println!(
            "service {} (port {}): {} board(s)",
            service.name,
            service.port,
            service.board_ids.len()
        );
    }
    println!("configuration OK");
    Ok(())
}

fn command_ensure(opts: EnsureOpts) -> anyhow::Result<()> {
    let config = PluginConfig::from_file(&opts.config)?;
    let scheduler = SlurmClient::new(Some(config.working_dir.clone()));
    let registry = ArbiterRegistry::new();

    match registry.ensure_running(&scheduler, &config, &opts.board_id, None)? {
        EnsureOutcome::Running { job, address } => {
            println!(
                "arbiter running as job {job} on {}",
                address.as_deref().unwrap_or("<unknown>")
            );
        }
        EnsureOutcome::Deferred { depends_on } => {
            println!("arbiter pending as job {depends_on}");
        }
        EnsureOutcome::GaveUp { message } => {
            println!("gave up: {message}");
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let opts = RootOptions::parse();
    setup_logging(opts.verbose);

    match opts.subcmd {
        SubCommand::Expand(opts) => command_expand(opts),
        SubCommand::CheckConfig(opts) => command_check_config(opts),
        SubCommand::Ensure(opts) => command_ensure(opts),
    }
}
