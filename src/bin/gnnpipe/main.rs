//! Command-line front end for gnnpipe.
#![forbid(unsafe_code)]

mod config;
mod ui;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use gnnpipe::cache::{persist_rankings, rank_by_degree, rank_by_heuristic};
use gnnpipe::graph::{import_edge_csv, SyntheticGraph};
use gnnpipe::logging::init_logging_from_env;
use gnnpipe::pipeline::Coordinator;
use gnnpipe::profiler::readable_size;
use gnnpipe::{
    CachePolicy, Context, Dataset, ErrorKind, ExtractedBatch, GnnError, RunArch, RunConfig,
    RunSummary, SampleType,
};
use serde::Serialize;
use thiserror::Error;

use config::{CliConfig, ConfigError, ProfileUpdate};
use ui::{format_duration, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "gnnpipe",
    version,
    about = "Sample, cache and pipeline mini-batches for GNN training",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[arg(short, long, global = true, help = "Print only essential output")]
    quiet: bool,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = ColorArg::Auto,
        help = "When to color text output"
    )]
    color: ColorArg,

    #[arg(
        long,
        global = true,
        env = "GNNPIPE_CLI_CONFIG",
        value_name = "FILE",
        help = "CLI profile file (default: <config dir>/gnnpipe/cli.toml)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "GNNPIPE_PROFILE",
        value_name = "NAME",
        help = "Profile supplying run defaults"
    )]
    profile: Option<String>,

    #[arg(
        long,
        global = true,
        default_value = "warn",
        value_name = "FILTER",
        help = "Log filter when GNNPIPE_LOG is unset"
    )]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Write a synthetic dataset directory")]
    Generate(GenerateCmd),

    #[command(about = "Build a dataset directory from a src,dst[,weight] CSV")]
    Import(ImportCmd),

    #[command(about = "Print dataset statistics")]
    Inspect {
        #[arg(value_name = "DATASET")]
        dataset: PathBuf,
    },

    #[command(about = "Compute and store the static cache rankings of a dataset")]
    Rank {
        #[arg(value_name = "DATASET")]
        dataset: PathBuf,
    },

    #[command(about = "Run the sampling and extraction pipeline over a dataset")]
    Run(RunCmd),

    #[command(about = "Manage stored run profiles")]
    Profile {
        #[command(subcommand)]
        action: ProfileCmd,
    },

    #[command(about = "Print shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
struct GenerateCmd {
    #[arg(value_name = "OUT")]
    out: PathBuf,

    #[arg(long, default_value_t = 10_000)]
    nodes: usize,

    #[arg(long, default_value_t = 10)]
    avg_degree: usize,

    #[arg(long, default_value_t = 16)]
    feat_dim: usize,

    #[arg(long, default_value_t = 4)]
    num_class: usize,

    #[arg(long, default_value_t = 0.6)]
    train_ratio: f64,

    #[arg(long, default_value_t = 2.0, help = "Neighbor skew toward low ids; 1.0 is uniform")]
    skew: f64,

    #[arg(long, help = "Attach random edge weights")]
    weighted: bool,

    #[arg(long, default_value_t = 0x5151_5151)]
    seed: u64,
}

#[derive(Args, Debug)]
struct ImportCmd {
    #[arg(value_name = "EDGES_CSV")]
    edges: PathBuf,

    #[arg(value_name = "OUT")]
    out: PathBuf,

    #[arg(long, default_value_t = 16)]
    feat_dim: usize,

    #[arg(long, default_value_t = 0.6)]
    train_ratio: f64,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Args, Debug)]
struct RunOverrides {
    #[arg(long, value_name = "ARCH", help = "Run architecture, e.g. arch3")]
    arch: Option<RunArch>,

    #[arg(long, value_name = "KIND", help = "Sampling algorithm, e.g. weighted-khop")]
    sample_type: Option<SampleType>,

    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,

    #[arg(long, value_name = "N,N,..", value_delimiter = ',', help = "Per-layer fanout")]
    fanout: Option<Vec<usize>>,

    #[arg(long, value_name = "N")]
    epochs: Option<usize>,

    #[arg(long, value_name = "POLICY")]
    cache_policy: Option<CachePolicy>,

    #[arg(long, value_name = "FRACTION", help = "Share of nodes to cache, 0..=1")]
    cache_percentage: Option<f64>,
}

#[derive(Args, Debug)]
struct RunCmd {
    #[arg(value_name = "DATASET", help = "Dataset directory (default: from profile)")]
    dataset: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "TOML run configuration")]
    run_config: Option<PathBuf>,

    #[command(flatten)]
    overrides: RunOverrides,

    #[arg(long, value_name = "N")]
    samplers: Option<usize>,

    #[arg(long, value_name = "N")]
    trainers: Option<usize>,

    #[arg(long, value_name = "N")]
    switchers: Option<usize>,

    #[arg(long, value_name = "DEVICE", help = "Trainer device, e.g. gpu:1")]
    trainer_ctx: Option<Context>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_name = "LEVEL", help = "Report level 1..=3")]
    profile_level: Option<u8>,

    #[arg(long, help = "Check batch invariants on every step")]
    sanity_check: bool,

    #[arg(long, help = "Count node accesses and report the hottest nodes")]
    log_node_access: bool,

    #[arg(long, value_name = "FILE", help = "Write per-step metrics as CSV")]
    profile_csv: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Write trace spans as JSON")]
    trace: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum ProfileCmd {
    #[command(about = "List stored profiles")]
    List,

    #[command(about = "Show one profile")]
    Show { name: String },

    #[command(about = "Create or update a profile")]
    Set {
        name: String,

        #[arg(long, value_name = "DIR")]
        dataset: Option<PathBuf>,

        #[command(flatten)]
        overrides: RunOverrides,

        #[arg(long, help = "Make this the default profile")]
        default: bool,
    },

    #[command(about = "Delete a profile")]
    Delete { name: String },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ColorArg {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Gnn(#[from] GnnError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Gnn(err) => match err.kind() {
                ErrorKind::Configuration => 2,
                ErrorKind::SynchronizationTimeout => 3,
                _ => 1,
            },
            CliError::Config(_) | CliError::Message(_) => 2,
            CliError::Json(_) => 1,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging_from_env(&cli.log);
    let ui = Ui::new(cli.color, cli.quiet);
    if let Err(err) = run(cli, &ui) {
        ui.error(&err.to_string());
        std::process::exit(err.exit_code());
    }
}

fn run(cli: Cli, ui: &Ui) -> Result<(), CliError> {
    let format = cli.format;
    match cli.command {
        Command::Generate(cmd) => {
            let task = ui.task(format!("generating {} nodes", cmd.nodes));
            let dataset = SyntheticGraph::new(cmd.nodes, cmd.avg_degree)
                .feat_dim(cmd.feat_dim)
                .num_class(cmd.num_class)
                .train_ratio(cmd.train_ratio)
                .skew(cmd.skew)
                .weighted(cmd.weighted)
                .seed(cmd.seed)
                .build()?;
            dataset.save(&cmd.out)?;
            let took = task.finish();
            emit_written(ui, format, &dataset, &cmd.out, took)?;
        }
        Command::Import(cmd) => {
            let task = ui.task(format!("importing {}", cmd.edges.display()));
            let dataset = import_edge_csv(&cmd.edges, cmd.feat_dim, cmd.train_ratio, cmd.seed)?;
            dataset.save(&cmd.out)?;
            let took = task.finish();
            emit_written(ui, format, &dataset, &cmd.out, took)?;
        }
        Command::Inspect { dataset } => {
            let dataset = Dataset::load(&dataset)?;
            let stats = dataset.stats();
            emit(format, &stats, || {
                ui.section(
                    "Dataset",
                    [
                        ("nodes", stats.meta.num_node.to_string()),
                        ("edges", stats.meta.num_edge.to_string()),
                        ("feat_dim", stats.meta.feat_dim.to_string()),
                        ("classes", stats.meta.num_class.to_string()),
                        (
                            "splits",
                            format!(
                                "train={} valid={} test={}",
                                stats.num_train, stats.num_valid, stats.num_test
                            ),
                        ),
                        ("avg_degree", format!("{:.2}", stats.avg_degree)),
                        ("max_in_degree", stats.max_in_degree.to_string()),
                        ("max_out_degree", stats.max_out_degree.to_string()),
                        ("empty_rows", stats.zero_out_degree_nodes.to_string()),
                        ("weighted", stats.weighted.to_string()),
                        ("features", readable_size(stats.feature_bytes as f64)),
                    ],
                );
            })?;
        }
        Command::Rank { dataset: dir } => {
            let dataset = Dataset::load(&dir)?;
            let task = ui.task("ranking nodes");
            persist_rankings(&dataset, &dir)?;
            task.finish();
            let report = RankReport {
                dataset: dir.display().to_string(),
                by_degree_head: rank_by_degree(&dataset).into_iter().take(10).collect(),
                by_heuristic_head: rank_by_heuristic(&dataset).into_iter().take(10).collect(),
            };
            emit(format, &report, || {
                ui.success(&format!("rankings stored in {}", report.dataset));
                ui.section(
                    "Top nodes",
                    [
                        ("by-degree", join(&report.by_degree_head)),
                        ("by-heuristic", join(&report.by_heuristic_head)),
                    ],
                );
            })?;
        }
        Command::Run(cmd) => run_pipeline(cmd, &cli.config, cli.profile.as_deref(), format, ui)?,
        Command::Profile { action } => manage_profiles(action, cli.config, format, ui)?,
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "gnnpipe", &mut io::stdout());
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct WrittenReport {
    path: String,
    nodes: usize,
    edges: usize,
    train: usize,
    elapsed_ms: f64,
}

#[derive(Serialize)]
struct RankReport {
    dataset: String,
    by_degree_head: Vec<u32>,
    by_heuristic_head: Vec<u32>,
}

fn emit_written(
    ui: &Ui,
    format: OutputFormat,
    dataset: &Dataset,
    out: &std::path::Path,
    took: std::time::Duration,
) -> Result<(), CliError> {
    let report = WrittenReport {
        path: out.display().to_string(),
        nodes: dataset.num_nodes(),
        edges: dataset.num_edges(),
        train: dataset.train_set().len(),
        elapsed_ms: took.as_secs_f64() * 1_000.0,
    };
    emit(format, &report, || {
        ui.success(&format!(
            "wrote {} ({} nodes, {} edges, {} train) in {}",
            report.path,
            report.nodes,
            report.edges,
            report.train,
            format_duration(took)
        ));
    })
}

fn run_pipeline(
    cmd: RunCmd,
    cli_config: &Option<PathBuf>,
    profile: Option<&str>,
    format: OutputFormat,
    ui: &Ui,
) -> Result<(), CliError> {
    let profiles = CliConfig::load(cli_config.clone())?;
    let mut config = RunConfig::default();
    if let Some(profile) = profiles.active(profile)? {
        if format == OutputFormat::Text {
            ui.info(&format!("using profile {}", profile.name));
        }
        config = profile.apply(config);
    }
    if let Some(path) = &cmd.run_config {
        config = config.overlay_toml(&std::fs::read_to_string(path).map_err(GnnError::from)?)?;
    }
    config = config.apply_env()?;
    if let Some(dataset) = cmd.dataset {
        config.dataset_path = dataset;
    }
    config = apply_overrides(config, &cmd.overrides);
    let layout = &mut config.workers;
    layout.samplers = cmd.samplers.unwrap_or(layout.samplers);
    layout.trainers = cmd.trainers.unwrap_or(layout.trainers);
    layout.switchers = cmd.switchers.unwrap_or(layout.switchers);
    if let Some(ctx) = cmd.trainer_ctx {
        config.trainer_ctx = ctx;
    }
    if let Some(seed) = cmd.seed {
        config.seed = seed;
    }
    if let Some(level) = cmd.profile_level {
        config.profile_level = level;
    }
    config.sanity_check |= cmd.sanity_check;
    config.log_node_access |= cmd.log_node_access;
    if let Some(trace) = cmd.trace {
        config.dump_trace = Some(trace);
    }
    if config.dataset_path.as_os_str().is_empty() {
        return Err(CliError::Message(
            "no dataset given; pass DATASET or set one in a profile".into(),
        ));
    }

    let graph = Arc::new(Dataset::load(config.dataset_path())?);
    let task = ui.task(format!(
        "{} epochs over {}",
        config.num_epoch,
        config.dataset_path.display()
    ));
    let coordinator = Coordinator::new(graph, config)?;
    let summary = coordinator.run(|_, _| touch_batch)?;
    task.finish();
    if let Some(path) = &cmd.profile_csv {
        coordinator.profiler().write_step_csv(path)?;
    }
    emit(format, &summary, || print_summary(ui, &summary))
}

/// Stand-in train step: reads every feature and label once.
fn touch_batch(batch: &ExtractedBatch) -> gnnpipe::Result<()> {
    let checksum: f64 = batch.feat.data.iter().map(|v| f64::from(*v)).sum::<f64>()
        + batch.labels.iter().map(|l| *l as f64).sum::<f64>();
    std::hint::black_box(checksum);
    Ok(())
}

fn apply_overrides(mut config: RunConfig, o: &RunOverrides) -> RunConfig {
    if let Some(arch) = o.arch {
        config = config.run_arch(arch);
    }
    if let Some(kind) = o.sample_type {
        config.sample_type = kind;
    }
    if let Some(batch_size) = o.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(fanout) = &o.fanout {
        config.fanout = fanout.clone();
    }
    if let Some(epochs) = o.epochs {
        config.num_epoch = epochs;
    }
    if let Some(policy) = o.cache_policy {
        config.cache_policy = policy;
    }
    if let Some(fraction) = o.cache_percentage {
        config.cache_percentage = fraction;
    }
    config
}

fn print_summary(ui: &Ui, summary: &RunSummary) {
    ui.section(
        "Run",
        [
            ("epochs", summary.num_epoch.to_string()),
            ("steps_per_epoch", summary.steps_per_epoch.to_string()),
            ("batches_sampled", summary.batches_sampled.to_string()),
            ("batches_trained", summary.batches_trained.to_string()),
            ("elapsed", format!("{:.3}s", summary.elapsed_secs)),
        ],
    );
    if let Some(cache) = &summary.cache {
        ui.section(
            "Cache",
            [
                ("policy", cache.policy.to_string()),
                ("capacity", format!("{} ({} cached)", cache.capacity, cache.cached)),
                ("hit_rate", format!("{:.2}%", cache.hit_rate * 100.0)),
                ("hit_bytes", readable_size(cache.hit_bytes as f64)),
                ("miss_bytes", readable_size(cache.miss_bytes as f64)),
                ("evictions", cache.evictions.to_string()),
            ],
        );
    }
    ui.section(
        "Step average",
        summary
            .step_average
            .metrics
            .iter()
            .map(|(name, value)| (*name, format!("{value:.6}"))),
    );
    let rows: Vec<Vec<String>> = summary
        .workers
        .iter()
        .map(|w| {
            vec![
                w.role.to_string(),
                w.worker.to_string(),
                w.sampled.to_string(),
                w.trained.to_string(),
                w.switches.to_string(),
                w.state.to_string(),
            ]
        })
        .collect();
    ui.table(
        "Workers",
        &["role", "id", "sampled", "trained", "switches", "state"],
        &rows,
    );
    if let Some(access) = &summary.node_access {
        let rows: Vec<Vec<String>> = access
            .top
            .iter()
            .map(|n| {
                vec![
                    n.node.to_string(),
                    n.count.to_string(),
                    n.in_degree.to_string(),
                    n.out_degree.to_string(),
                ]
            })
            .collect();
        ui.table(
            "Hottest nodes",
            &["node", "accesses", "in_degree", "out_degree"],
            &rows,
        );
    }
}

fn manage_profiles(
    action: ProfileCmd,
    path: Option<PathBuf>,
    format: OutputFormat,
    ui: &Ui,
) -> Result<(), CliError> {
    let mut store = CliConfig::load(path)?;
    match action {
        ProfileCmd::List => {
            let names: Vec<String> = store.profiles().map(|p| p.name.clone()).collect();
            let default = store.default_profile_name().map(str::to_string);
            emit(format, &ProfileList { profiles: &names, default: default.as_deref() }, || {
                if names.is_empty() {
                    ui.info("no profiles stored");
                }
                for name in &names {
                    let marker = if default.as_deref() == Some(name) { " (default)" } else { "" };
                    println!("{name}{marker}");
                }
            })?;
        }
        ProfileCmd::Show { name } => {
            let profile = store.profile(&name)?;
            let rows = profile.rows();
            let map: std::collections::BTreeMap<&str, &String> =
                rows.iter().map(|(k, v)| (*k, v)).collect();
            emit(format, &map, || {
                ui.section(&format!("Profile {name}"), rows.iter().map(|(k, v)| (*k, v)));
            })?;
        }
        ProfileCmd::Set {
            name,
            dataset,
            overrides,
            default,
        } => {
            let update = ProfileUpdate {
                dataset,
                run_arch: overrides.arch,
                sample_type: overrides.sample_type,
                cache_policy: overrides.cache_policy,
                cache_percentage: overrides.cache_percentage,
                batch_size: overrides.batch_size,
                fanout: overrides.fanout,
                num_epoch: overrides.epochs,
            };
            store.upsert_profile(&name, update)?;
            if default {
                store.set_default_profile(Some(&name))?;
            }
            let written = store.persist()?;
            ui.success(&format!("saved profile {name} to {}", written.display()));
        }
        ProfileCmd::Delete { name } => {
            store.delete_profile(&name)?;
            let written = store.persist()?;
            ui.success(&format!("deleted profile {name} from {}", written.display()));
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ProfileList<'a> {
    profiles: &'a [String],
    default: Option<&'a str>,
}

fn join(ids: &[u32]) -> String {
    ids.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), CliError>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => printer(),
    }
    Ok(())
}
