//! homopa CLI - homopath discovery over partitioned sensor networks.

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use homopa::experiment::select_regions;
use homopa::report::ResultLog;
use homopa::{
    read_adjacency, run_experiment, write_hashed_observations, HashedIntersection, MinHasher,
    ObservationMode, RegionConnectionMap, RegionId, RunConfig, RunReport,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// JSON output for a run.
#[derive(Serialize)]
struct JsonOutput {
    regions_with_homopaths: usize,
    regions: usize,
    skipped: Vec<RegionId>,
    failed: Vec<RegionId>,
    total_homopaths: usize,
    spanning_homopaths: usize,
    same_region: usize,
    unspanned: usize,
    global_objects: usize,
    total_edges: usize,
    transfer_bytes: u64,
    transfer_cost: f64,
    first_level_integers: u64,
    elapsed_secs: f64,
}

impl From<&RunReport> for JsonOutput {
    fn from(report: &RunReport) -> Self {
        let outcome = &report.outcome;
        Self {
            regions_with_homopaths: report.regions_with_homopaths(),
            regions: report.regions.len(),
            skipped: report.skipped.clone(),
            failed: report.failed.clone(),
            total_homopaths: outcome.total_homopaths(),
            spanning_homopaths: outcome.spanning.len(),
            same_region: outcome.same_region.len(),
            unspanned: outcome.unspanned.len(),
            global_objects: outcome.global_objects,
            total_edges: report.total_edges,
            transfer_bytes: outcome.costs.transfer_bytes,
            transfer_cost: outcome.costs.transfer_cost(),
            first_level_integers: outcome.costs.first_level_integers,
            elapsed_secs: report.elapsed_secs,
        }
    }
}

/// Observation format of the region files.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum Mode {
    /// Object ids per edge
    Raw,
    /// MinHash signatures per edge
    Hashed,
}

impl From<Mode> for ObservationMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Raw => ObservationMode::Raw,
            Mode::Hashed => ObservationMode::Hashed,
        }
    }
}

/// How hashed path members are intersected.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum Intersection {
    /// Keep a slot whose value occurs anywhere in the other signature
    ValueSet,
    /// Keep a slot only where both signatures agree
    Positional,
}

impl From<Intersection> for HashedIntersection {
    fn from(rule: Intersection) -> Self {
        match rule {
            Intersection::ValueSet => HashedIntersection::ValueSet,
            Intersection::Positional => HashedIntersection::Positional,
        }
    }
}

/// Distributed homopath discovery.
///
/// Finds walks of road edges shared by a threshold fraction of a region's
/// objects, then stitches them across region boundaries.
#[derive(Parser, Debug)]
#[command(name = "homopa")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (same as RUST_LOG=debug).
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one experiment: all region workers plus the coordinator
    Run(RunArgs),

    /// Convert a raw observation file into MinHash signatures
    Hash {
        /// Raw observation file.
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Hashed observation file to write.
        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        /// Number of MinHash permutations.
        #[arg(short = 'p', long, default_value = "128")]
        permutations: usize,

        /// Seed for the permutation hashes.
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Build the region connection map and write connections.txt
    Connections {
        /// Directory holding the region files.
        #[arg(short, long, default_value = ".")]
        data_dir: PathBuf,

        /// Directory receiving connections.txt.
        #[arg(short, long, default_value = "results")]
        output_dir: PathBuf,

        /// Ignore regions with ids below 10^depth.
        #[arg(long, default_value = "0")]
        partition_depth: u32,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON run configuration; flags below override it.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the region files.
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Directory receiving the result logs.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Observation format.
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Homopath threshold (0.0-1.0).
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Number of MinHash permutations (log column in raw mode).
    #[arg(short = 'p', long)]
    permutations: Option<usize>,

    /// Seed of the data-preparation stage, echoed into seeds.txt.
    #[arg(long)]
    seed: Option<u64>,

    /// Compression level of the data-preparation stage (log column).
    #[arg(long)]
    compression: Option<u32>,

    /// Ignore regions with ids below 10^depth.
    #[arg(long)]
    partition_depth: Option<u32>,

    /// Explicit region ids; discovered from the data directory by default.
    #[arg(short, long = "region", value_name = "ID")]
    regions: Vec<RegionId>,

    /// Port of region 0; region N listens on base + N.
    #[arg(long)]
    base_port: Option<u16>,

    /// Engine round limit.
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Intersection rule for hashed members.
    #[arg(long, value_enum)]
    intersection: Option<Intersection>,

    /// Retire every sub-path of an extended homopath, not just its prefix.
    #[arg(long)]
    retire_subpaths: bool,

    /// Compress RPC frames with zstd.
    #[arg(long)]
    compress_transfers: bool,

    /// Give up waiting for regions after this many seconds.
    #[arg(long, value_name = "SECS")]
    barrier_timeout: Option<u64>,

    /// Output results as JSON.
    #[arg(long)]
    json: bool,

    /// Show a progress spinner.
    #[arg(long)]
    progress: bool,
}

impl RunArgs {
    /// Load the config file, if any, and apply flag overrides.
    fn to_config(&self) -> Result<RunConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)?,
            None => RunConfig::default(),
        };

        if let Some(dir) = &self.data_dir {
            config = config.with_data_dir(dir);
        }
        if let Some(dir) = &self.output_dir {
            config = config.with_output_dir(dir);
        }
        if let Some(mode) = self.mode {
            config = config.with_mode(mode.into());
        }
        if let Some(threshold) = self.threshold {
            config = config.with_threshold(threshold);
        }
        if let Some(permutations) = self.permutations {
            config = config.with_num_permutations(permutations);
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(level) = self.compression {
            config.compression_level = level;
        }
        if let Some(depth) = self.partition_depth {
            config = config.with_partition_depth(depth);
        }
        if !self.regions.is_empty() {
            config = config.with_regions(self.regions.clone());
        }
        if let Some(port) = self.base_port {
            config = config.with_base_port(port);
        }
        if let Some(max_rounds) = self.max_rounds {
            config.engine = config.engine.with_max_rounds(max_rounds);
        }
        if let Some(rule) = self.intersection {
            config.engine = config.engine.with_hashed_intersection(rule.into());
        }
        if self.retire_subpaths {
            config.engine = config.engine.with_retire_subpaths(true);
        }
        if self.compress_transfers {
            config.rpc.compress_transfers = true;
        }
        if let Some(secs) = self.barrier_timeout {
            config = config.with_barrier_timeout(secs);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Create a spinner for indeterminate progress.
fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(args: &RunArgs, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.to_config()?;

    if verbose && !args.json {
        eprintln!("Configuration:");
        eprintln!("  Data dir: {}", config.data_dir.display());
        eprintln!("  Output dir: {}", config.output_dir.display());
        eprintln!("  Mode: {}", config.mode);
        eprintln!("  Threshold: {}", config.threshold());
        eprintln!("  Permutations: {}", config.num_permutations);
        eprintln!("  Partition depth: {}", config.partition_depth);
        eprintln!("  Base port: {}", config.rpc.base_port);
        eprintln!();
    }

    let pb = if args.progress && !args.json {
        Some(create_spinner("Discovering homopaths..."))
    } else {
        None
    };

    let report = run_experiment(config).await?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&JsonOutput::from(&report))?);
        return Ok(());
    }

    let outcome = &report.outcome;
    eprintln!();
    eprintln!("Homopath Results:");
    eprintln!("  Regions:            {}", report.regions.len());
    eprintln!("  Skipped regions:    {}", report.skipped.len());
    eprintln!("  Failed regions:     {}", report.failed.len());
    eprintln!("  Region homopaths:   {}", outcome.total_homopaths());
    eprintln!("  Spanning homopaths: {}", outcome.spanning.len());
    eprintln!("  Unspanned paths:    {}", outcome.unspanned.len());
    eprintln!();
    eprintln!("Costs:");
    eprintln!("  Transfer bytes:     {}", outcome.costs.transfer_bytes);
    eprintln!("  Transfer cost:      {}", outcome.costs.transfer_cost());
    eprintln!("  First-level ints:   {}", outcome.costs.first_level_integers);
    eprintln!();
    eprintln!("Total time: {:.3}s", report.elapsed_secs);

    println!("{}", report.regions_with_homopaths());
    Ok(())
}

fn hash(
    input: &Path,
    output: &Path,
    permutations: usize,
    seed: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    if permutations == 0 {
        return Err("permutations must be > 0".into());
    }
    let start = Instant::now();
    let hasher = MinHasher::with_seed(permutations, seed);
    let summary = write_hashed_observations(input, output, &hasher)?;

    eprintln!(
        "Hashed {} edges ({} without objects skipped) in {:.3}s",
        summary.edges_written,
        summary.edges_skipped,
        start.elapsed().as_secs_f64()
    );
    println!("{}", summary.edges_written);
    Ok(())
}

fn connections(
    data_dir: PathBuf,
    output_dir: PathBuf,
    partition_depth: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = RunConfig::default()
        .with_data_dir(data_dir)
        .with_output_dir(output_dir)
        .with_partition_depth(partition_depth);
    let selection = select_regions(&config)?;

    let mut adjacencies = Vec::with_capacity(selection.active.len());
    for files in &selection.active {
        adjacencies.push((files.region, read_adjacency(&files.adjacency)?));
    }
    let map = RegionConnectionMap::build(&adjacencies);

    let log = ResultLog::new(&config.output_dir)?;
    log.record_connections(&map)?;

    eprintln!(
        "Wrote links for {} region pairs out of {} regions to {}",
        map.len(),
        adjacencies.len(),
        log.path(homopa::report::CONNECTIONS).display()
    );
    println!("{}", map.len());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "homopa", &mut io::stdout());
            Ok(())
        }
        Commands::Run(args) => {
            init_tracing(cli.verbose);
            run(&args, cli.verbose).await
        }
        Commands::Hash {
            input,
            output,
            permutations,
            seed,
        } => {
            init_tracing(cli.verbose);
            hash(&input, &output, permutations, seed)
        }
        Commands::Connections {
            data_dir,
            output_dir,
            partition_depth,
        } => {
            init_tracing(cli.verbose);
            connections(data_dir, output_dir, partition_depth)
        }
    }
}
