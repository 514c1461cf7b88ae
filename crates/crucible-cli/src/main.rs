use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crucible_cache::{CachedEntry, Pac, PacConfig};
use crucible_config::CoordinatorConfig;
use crucible_core::Reporter;
use crucible_storage::{EntryKind, FilesystemStorageProvider, Payload};
use crucible_trial::{TrainResult, TrialTree};
use crucible_types::{ComponentType, DatasetRole, MetaKey, SemanticVersion, Workspace};
use crucible_vcs::SemanticVcs;

/// A minimal demonstration binary: the actual worker runtime and sandbox are
/// out of scope, so these subcommands exercise the three components that
/// don't need a live worker pool to show their behavior end to end.
#[derive(Parser, Debug)]
#[command(name = "crucible", version)]
#[command(about = "Inspect the pipeline-aware cache, semantic VCS, and trial tree in isolation")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scripted submission history through the PAC model and show the
    /// version-score matrix it converges to, plus which cached worker it
    /// would evict.
    Pac {
        /// Number of pipeline positions the model tracks.
        #[arg(long, default_value_t = 2)]
        pipeline_length: usize,
        /// Learning rate.
        #[arg(long, default_value_t = 0.2)]
        alpha: f64,
    },
    /// Commit a couple of versions to a filesystem-backed semantic VCS under
    /// a tempdir (or `--state-dir`), fork a branch, and print the lineage.
    Vcs {
        /// Directory to store the demo VCS content in. Defaults to a
        /// process-local tempdir that is removed on exit.
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Build a trial tree over two candidate pipelines sharing a dataset
    /// prefix and show which nodes are already trained and which path a
    /// lookup by exact pipeline resolves to.
    Trial,
    /// Print the effective `CoordinatorConfig`, optionally loaded from a
    /// TOML file and validated by round-tripping it.
    Config {
        /// Path to a `coordinator.toml`. Omit to print built-in defaults.
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut reporter = CliReporter;

    match cli.cmd {
        Commands::Pac { pipeline_length, alpha } => run_pac_demo(pipeline_length, alpha),
        Commands::Vcs { state_dir } => run_vcs_demo(state_dir, &mut reporter),
        Commands::Trial => run_trial_demo(),
        Commands::Config { path } => run_config_demo(path.as_deref()),
    }
}

fn run_pac_demo(pipeline_length: usize, alpha: f64) -> Result<()> {
    if pipeline_length == 0 {
        anyhow::bail!("pipeline_length must be at least 1");
    }
    let mut pac = Pac::new(PacConfig {
        alpha,
        history_capacity: 16,
        pipeline_length,
        enable_sl: true,
        enable_ul: true,
    });

    // A scripted history: the first position settles on (0, 1), the last
    // position drifts from (0, 0) to (0, 2).
    let submissions: Vec<Vec<(u32, u32)>> = vec![
        vec![(0, 1); pipeline_length],
        vec![(0, 1); pipeline_length],
        {
            let mut last = vec![(0, 1); pipeline_length];
            *last.last_mut().unwrap() = (0, 2);
            last
        },
    ];

    for pipeline in &submissions {
        pac.submit_pipeline(pipeline)?;
    }

    println!("version-score matrix after {} submissions:", submissions.len());
    for position in 0..pipeline_length {
        let vsm = pac.vsm(position);
        let ordered = vsm.ascending_order();
        println!("  position {position}:");
        for version in ordered.into_iter().take(4) {
            println!("    {:?} -> {:.4}", version, vsm.get(version));
        }
    }

    let cached = vec![
        CachedEntry { worker_id: "worker-a".to_string(), position: 0, version: (0, 1) },
        CachedEntry { worker_id: "worker-b".to_string(), position: pipeline_length - 1, version: (0, 2) },
    ];
    match pac.least_possible_worker(&cached) {
        Some(worker_id) => println!("would evict: {worker_id}"),
        None => println!("would evict: <no candidate>"),
    }

    Ok(())
}

fn run_vcs_demo(state_dir: Option<PathBuf>, reporter: &mut dyn Reporter) -> Result<()> {
    let _tempdir_guard;
    let root = match state_dir {
        Some(dir) => dir,
        None => {
            let dir = tempfile::tempdir().context("creating demo state dir")?;
            let path = dir.path().to_path_buf();
            _tempdir_guard = dir;
            path
        }
    };
    reporter.info(&format!("using storage root {}", root.display()));

    let storage = Arc::new(FilesystemStorageProvider::open(root.clone())?);
    let vcs = SemanticVcs::new(storage, "crucible-cli-demo");

    let v1 = MetaKey::new(ComponentType::Library, "scaler", SemanticVersion::new("master", 0, 0));
    let v2 = MetaKey::new(ComponentType::Library, "scaler", SemanticVersion::new("master", 0, 1));
    vcs.put(&v1, EntryKind::String, Payload::Bytes(b"scaler v1".to_vec()))?;
    vcs.put(&v2, EntryKind::String, Payload::Bytes(b"scaler v2".to_vec()))?;

    let forked = vcs.branch_on_semantic_version(&v2, "experiment")?;
    println!("forked {forked} from {v2}");

    let lineage = vcs.lineage(&forked)?;
    println!("lineage of {forked} ({} entries):", lineage.len());
    for entry in &lineage {
        println!("  {entry:?}");
    }

    let versions = vcs.list_versions(&MetaKey::new(ComponentType::Library, "scaler", SemanticVersion::zero()))?;
    println!("known versions of scaler: {versions:?}");

    Ok(())
}

fn run_trial_demo() -> Result<()> {
    fn key(kind: ComponentType, name: &str, branch: &str, api: u32, inc: u32) -> MetaKey {
        MetaKey::new(kind, name, SemanticVersion::new(branch, api, inc))
    }

    let dataset = key(ComponentType::Dataset, "mnist", "master", 0, 0);
    let scaler = key(ComponentType::Library, "scaler", "master", 0, 0);
    let classifier_v1 = key(ComponentType::Library, "classifier", "master", 0, 0);
    let classifier_v2 = key(ComponentType::Library, "classifier", "master", 0, 1);

    let mut trained = Workspace::new(
        key(ComponentType::Workspace, "ws-trained", "master", 0, 0),
        vec![dataset.clone(), scaler.clone(), classifier_v1.clone()],
    );
    trained.datasets.insert(DatasetRole::Train, dataset.clone());

    let untrained = Workspace::new(
        key(ComponentType::Workspace, "ws-new", "master", 0, 1),
        vec![dataset.clone(), scaler.clone(), classifier_v2.clone()],
    );

    let mut tree = TrialTree::build(&[trained, untrained])?;
    println!("trial tree has {} candidate path(s):", tree.paths().len());
    for path in tree.paths() {
        let rendered: Vec<String> = path.iter().map(|k| k.to_string()).collect();
        println!("  {}", rendered.join(" -> "));
    }

    let exact = vec![dataset.clone(), scaler.clone(), classifier_v1.clone()];
    if let Some(path) = tree.find_exact_path(&exact) {
        println!("exact match for classifier_v1 pipeline resolves to {} node(s)", path.len());
        let node_id = *path.last().unwrap();
        tree.mark_trained_with(
            node_id,
            TrainResult {
                output: crucible_types::BlobHash::compute(0, "classifier", "master", b"demo-output"),
                params: crucible_types::BlobHash::compute(0, "classifier", "master", b"demo-params"),
                execution_time: std::time::Duration::from_secs(1),
                io_time: std::time::Duration::from_millis(50),
                storage_time: std::time::Duration::from_millis(10),
                perf: 0.91,
            },
        );
        println!("node {node_id:?} is now trained: {}", tree.node(node_id).trained);
    } else {
        println!("no exact match found for classifier_v1 pipeline");
    }

    Ok(())
}

fn run_config_demo(path: Option<&std::path::Path>) -> Result<()> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            CoordinatorConfig::from_toml_str(&text)?
        }
        None => CoordinatorConfig::default(),
    };

    // Round-tripping validates the config is at least internally consistent
    // (every field (de)serializes), the same check a host would do before
    // handing it to `Env::with_filesystem_storage`.
    let rendered = config.to_toml_string()?;
    let reparsed = CoordinatorConfig::from_toml_str(&rendered)?;
    if reparsed != config {
        anyhow::bail!("config did not round-trip through TOML identically");
    }

    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn pac_demo_runs_without_error() {
        run_pac_demo(2, 0.2).unwrap();
    }

    #[test]
    fn pac_demo_rejects_zero_length_pipelines() {
        assert!(run_pac_demo(0, 0.2).is_err());
    }

    #[test]
    #[serial]
    fn vcs_demo_runs_against_a_tempdir() {
        let mut reporter = CliReporter;
        run_vcs_demo(None, &mut reporter).unwrap();
    }

    #[test]
    fn trial_demo_runs_without_error() {
        run_trial_demo().unwrap();
    }

    #[test]
    fn config_demo_prints_defaults_when_no_path_given() {
        run_config_demo(None).unwrap();
    }

    #[test]
    fn config_demo_rejects_a_missing_path() {
        let missing = PathBuf::from("/nonexistent/coordinator.toml");
        assert!(run_config_demo(Some(&missing)).is_err());
    }

    #[test]
    fn cli_reporter_methods_are_callable() {
        let mut rep = CliReporter;
        rep.info("info");
        rep.warn("warn");
        rep.error("error");
    }
}
