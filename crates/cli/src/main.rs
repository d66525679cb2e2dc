use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clustering_core::clustering::{ClusterCount, DuplicateOptions, EdgeOptions};
use clustering_core::config;
use clustering_core::pipeline::Pipeline;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod render;

/// k-means++ seed used when neither `--seed` nor `clustering.seed` is set, so that
/// cluster ids printed by one invocation can be passed to `members` in the next.
const DEFAULT_SEED: u64 = 42;

#[derive(Parser)]
#[command(name = "semantic-clusters")]
#[command(about = "Group files by embedding similarity", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    /// Embed files under this path before running the command (repeatable)
    #[arg(long, global = true)]
    ingest: Vec<PathBuf>,

    /// Seed for cluster assignment; overrides `clustering.seed`
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ClusterArgs {
    /// Number of clusters, or "auto"
    #[arg(long, default_value = "auto")]
    k: ClusterCount,
    /// Ask the text backend to name clusters
    #[arg(long, default_value_t = false)]
    labels: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute clusters and print a summary of each
    Cluster {
        #[command(flatten)]
        args: ClusterArgs,
        #[arg(long)]
        json: bool,
    },
    /// Print clusters and the edges between them
    Graph {
        #[command(flatten)]
        args: ClusterArgs,
        /// Minimum centroid similarity for an edge
        #[arg(long)]
        threshold: Option<f32>,
        /// Include bridge files on each edge
        #[arg(long, default_value_t = false)]
        bridges: bool,
        #[arg(long)]
        json: bool,
    },
    /// List the files of one cluster that still exist
    Members {
        id: usize,
        #[command(flatten)]
        args: ClusterArgs,
        #[arg(long)]
        json: bool,
    },
    /// Find groups of near-duplicate files
    Duplicates {
        /// Similarity floor (never applied below 0.7)
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    cfg.clustering.seed = Some(resolve_seed(cli.seed, cfg.clustering.seed));
    let pipeline = Pipeline::from_config(cfg).await?;

    if !cli.ingest.is_empty() {
        let summary = pipeline.ingest(&cli.ingest).await?;
        info!(
            discovered = summary.discovered,
            embedded = summary.embedded,
            "ingested files"
        );
    }

    let result = run(&pipeline, cli.command).await;
    pipeline.shutdown().await;
    result
}

fn resolve_seed(flag: Option<u64>, configured: Option<u64>) -> u64 {
    flag.or(configured).unwrap_or(DEFAULT_SEED)
}

async fn run(pipeline: &Pipeline, command: Commands) -> Result<()> {
    match command {
        Commands::Cluster { args, json } => {
            let summary = compute(pipeline, &args).await?;
            let nodes = pipeline.engine.get_clusters_for_graph().await;
            if json {
                let out = serde_json::json!({ "summary": summary, "clusters": nodes });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print!("{}", render::summary(&summary));
                print!("{}", render::clusters(&nodes));
            }
        }
        Commands::Graph {
            args,
            threshold,
            bridges,
            json,
        } => {
            compute(pipeline, &args).await?;
            let threshold = threshold.unwrap_or(pipeline.config.clustering.edge_threshold);
            let options = EdgeOptions {
                include_bridge_files: bridges,
                ..EdgeOptions::default()
            };
            let nodes = pipeline.engine.get_clusters_for_graph().await;
            let edges = pipeline
                .engine
                .find_cross_cluster_edges(threshold, &options)
                .await;
            if json {
                let out = serde_json::json!({ "nodes": nodes, "edges": edges });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print!("{}", render::clusters(&nodes));
                print!("{}", render::edges(&edges));
            }
        }
        Commands::Members { id, args, json } => {
            compute(pipeline, &args).await?;
            let members = pipeline.engine.get_cluster_members(id).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&members)?);
            } else {
                print!("{}", render::members(&members));
            }
        }
        Commands::Duplicates { threshold, json } => {
            let report = pipeline
                .engine
                .find_near_duplicates(&DuplicateOptions { threshold })
                .await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render::duplicates(&report));
            }
        }
    }
    Ok(())
}

async fn compute(
    pipeline: &Pipeline,
    args: &ClusterArgs,
) -> Result<clustering_core::clustering::ClusterRunSummary> {
    let summary = pipeline.engine.compute_clusters(args.k).await?;
    if args.labels {
        pipeline.engine.generate_labels().await;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_prefers_flag_then_config_then_default() {
        assert_eq!(resolve_seed(Some(1), Some(2)), 1);
        assert_eq!(resolve_seed(None, Some(2)), 2);
        assert_eq!(resolve_seed(None, None), DEFAULT_SEED);
    }

    #[test]
    fn members_accepts_a_seed_after_the_id() {
        let cli = Cli::try_parse_from(["semantic-clusters", "members", "3", "--seed", "9"]).unwrap();
        assert_eq!(cli.seed, Some(9));
        assert!(matches!(cli.command, Commands::Members { id: 3, .. }));
    }
}
