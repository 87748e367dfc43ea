//! vstage - Volume Stage
//!
//! Populate named container volumes from host paths, powered by volstage.

use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use volstage::{CopyNode, Error as VolstageError, Owner, VolumeCopy, VolumePlan};

/// vstage - Copy host paths into container volumes
///
/// Each PATH is copied into volume NAME through one ephemeral container.
/// Paths that need no ownership or permission changes and share a parent
/// directory are mounted in place; everything else is staged in a private
/// temporary directory that is shredded afterwards.
///
/// Usage:
///   vstage --volume NAME=PATH...
///   vstage --file-mode 600 --owner app --volume secrets=/etc/app/secrets
#[derive(Parser, Debug)]
#[command(name = "vstage", version, about, long_about = None)]
struct Args {
    /// Volume to populate, as NAME=PATH (repeatable)
    #[arg(long = "volume", value_name = "NAME=PATH", required = true, value_parser = parse_volume)]
    volumes: Vec<(String, PathBuf)>,

    /// Owner for every copied entry (user name or uid)
    #[arg(long)]
    owner: Option<String>,

    /// Group for every copied entry (group name or gid)
    #[arg(long)]
    group: Option<String>,

    /// chmod mode for every copied file
    #[arg(long, value_name = "MODE")]
    file_mode: Option<String>,

    /// chmod mode for every copied directory
    #[arg(long, value_name = "MODE")]
    dir_mode: Option<String>,

    /// Place each PATH under this relative directory inside its volume
    #[arg(long, value_name = "DIR")]
    subdir: Option<PathBuf>,

    /// Image of the ephemeral container (never started)
    #[arg(long, default_value = "hello-world")]
    image: String,

    /// Container runtime executable
    #[arg(long, env = "VSTAGE_RUNTIME", default_value = "docker")]
    runtime: String,

    /// Directory in which staging directories are created
    #[arg(long, value_name = "DIR")]
    tmpdir: Option<PathBuf>,

    /// Extra flag for the shred call (repeatable)
    #[arg(long = "shred-flag", value_name = "FLAG", allow_hyphen_values = true)]
    shred_flags: Vec<String>,

    /// Extra flag for `container create` (repeatable)
    #[arg(long = "create-flag", value_name = "FLAG", allow_hyphen_values = true)]
    create_flags: Vec<String>,

    /// Number of parallel file copies while staging
    #[arg(short = 'j', long, default_value = "16")]
    jobs: usize,

    /// Print how each volume would be staged without copying anything
    #[arg(short = 'n', long = "dry-run", alias = "plan")]
    dry_run: bool,

    /// Disable the spinner and summary
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Verbose output (-v for steps, -vv for everything)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_volume(s: &str) -> Result<(String, PathBuf), String> {
    let Some((name, path)) = s.split_once('=') else {
        return Err(format!("expected NAME=PATH, got {s:?}"));
    };
    if path.is_empty() {
        return Err(format!("missing path for volume {name:?}"));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

fn parse_owner(s: &str) -> Owner {
    match s.parse::<u32>() {
        Ok(id) => Owner::Id(id),
        Err(_) => Owner::Name(s.to_string()),
    }
}

type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
enum CliError {
    #[error("Invalid source {path}: {source}")]
    Source { path: PathBuf, source: VolstageError },

    #[error("{source}")]
    Transfer { source: VolstageError },
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Source { source, .. } | Self::Transfer { source } if source.is_construction() => 2,
            _ => 1,
        }
    }
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error}");
        if let Some(original) = original_error(&error) {
            eprintln!("  while handling: {original}");
        }
        std::process::exit(error.exit_code());
    }
}

fn original_error(error: &CliError) -> Option<&VolstageError> {
    match error {
        CliError::Transfer { source } => source.original(),
        CliError::Source { .. } => None,
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> CliResult<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let copy = build_copy(&args)?;

    if args.dry_run {
        let plan = copy
            .plan()
            .map_err(|source| CliError::Transfer { source })?;
        print_plan(&plan);
        return Ok(());
    }

    let pb = if args.quiet { None } else { spinner(args.volumes.len()) };

    let start_time = Instant::now();
    let result = copy.run();
    let elapsed = start_time.elapsed();

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    result.map_err(|source| CliError::Transfer { source })?;
    if !args.quiet {
        eprintln!(
            "Populated {} volume(s) in {:.2}s",
            volume_count(&args),
            elapsed.as_secs_f64()
        );
    }
    Ok(())
}

fn build_copy(args: &Args) -> CliResult<VolumeCopy> {
    let mut copy = VolumeCopy::new(&args.image)
        .runtime(&args.runtime)
        .shred_flags(&args.shred_flags)
        .parallel(args.jobs);
    if let Some(ref tmpdir) = args.tmpdir {
        copy = copy.temp_root(tmpdir);
    }
    for flag in &args.create_flags {
        copy = copy.create_flag(flag);
    }

    for (name, path) in &args.volumes {
        let node = build_node(args, path).map_err(|source| CliError::Source {
            path: path.clone(),
            source,
        })?;
        tracing::info!(
            "volume {}: {} (needs staging: {})",
            name,
            node.path().display(),
            node.artificial()
        );
        copy = copy.node(name, node);
    }
    Ok(copy)
}

fn build_node(args: &Args, path: &Path) -> volstage::Result<CopyNode> {
    let mut builder = CopyNode::builder(path);
    if let Some(ref owner) = args.owner {
        builder = builder.default_user_owner(parse_owner(owner));
    }
    if let Some(ref group) = args.group {
        builder = builder.default_group_owner(parse_owner(group));
    }
    if let Some(ref mode) = args.file_mode {
        builder = builder.default_file_perms(mode);
    }
    if let Some(ref mode) = args.dir_mode {
        builder = builder.default_dir_perms(mode);
    }
    if let Some(ref subdir) = args.subdir {
        builder = builder.subdir(subdir);
    }
    builder.build()
}

fn volume_count(args: &Args) -> usize {
    let mut names: Vec<&str> = args.volumes.iter().map(|(name, _)| name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    names.len()
}

fn spinner(sources: usize) -> Option<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .ok()?;
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(format!("Staging {sources} source(s)..."));
    Some(pb)
}

fn print_plan(plan: &[VolumePlan]) {
    for volume in plan {
        match volume.mount {
            Some(ref mount) => println!(
                "{}: mount {} in place (no copy, {} root(s))",
                volume.name,
                mount.display(),
                volume.roots
            ),
            None => println!("{}: staged copy of {} root(s)", volume.name, volume.roots),
        }
    }
}
