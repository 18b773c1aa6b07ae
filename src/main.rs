//! riskforge entrypoint: orchestrates ingest, feature aggregation, proxy
//! labeling, and the multi-model training harness.

use anyhow::Result;
use clap::Parser;
use riskforge::harness::CandidateOutcome;
use riskforge::tracking::{new_run_id, JsonRunTracker};
use riskforge::{
    aggregate_customers, assign_high_risk_labels, load_transactions, merge_labels, run_training,
    write_labeled_table, Args, PipelineConfig,
};
use std::time::Instant;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = args.to_config()?;

    if args.verbose {
        println!("riskforge - credit risk proxy-label pipeline");
        println!("============================================\n");
    }

    run_full_pipeline(&config, args.verbose)
}

fn run_full_pipeline(config: &PipelineConfig, verbose: bool) -> Result<()> {
    let start_time = Instant::now();

    // Step 1: Load and validate the transaction ledger
    if verbose {
        println!("Step 1: Loading transactions");
        println!("  Input file: {}", config.input.display());
    }
    let rows = load_transactions(&config.input)?;
    println!("✓ Loaded {} transactions", rows.len());

    // Step 2: Aggregate to per-customer RFM features
    let customers = aggregate_customers(&rows)?;
    println!("✓ Aggregated {} customers", customers.len());

    // Step 3: Derive the proxy risk label
    if verbose {
        println!("\nStep 3: Clustering for the proxy label");
        println!("  Clusters: {}", config.n_clusters);
        println!("  Seed: {}", config.seed);
    }
    let labels = assign_high_risk_labels(
        &customers,
        config.n_clusters,
        config.seed,
        config.kmeans_max_iters,
        config.kmeans_tolerance,
    )?;
    let high_risk = labels
        .assignments
        .iter()
        .filter(|a| a.is_high_risk == 1)
        .count();
    println!(
        "✓ High-risk cluster: {} ({} of {} customers, {:.1}%)",
        labels.high_risk_cluster,
        high_risk,
        customers.len(),
        high_risk as f64 / customers.len() as f64 * 100.0
    );
    if verbose {
        for profile in &labels.profiles {
            println!(
                "  Cluster {}: {} customers, mean R={:.1}d F={:.1} M={:.1}",
                profile.cluster,
                profile.size,
                profile.mean_recency,
                profile.mean_frequency,
                profile.mean_monetary
            );
        }
    }

    // Step 4: Persist the labeled feature table
    let table = merge_labels(&customers, &labels);
    write_labeled_table(&config.features_out, &table)?;
    println!("✓ Labeled table saved to {}", config.features_out.display());

    // Step 5: Train and evaluate candidates
    let run_id = new_run_id(config.seed);
    let mut tracker = JsonRunTracker::create(&config.runs_dir, &run_id)?;
    let outcomes = run_training(&customers, &labels, config, &run_id, &mut tracker)?;

    println!("\n=== Candidate Results (run {}) ===", run_id);
    for outcome in &outcomes {
        match outcome {
            CandidateOutcome::Trained {
                name,
                metrics,
                metric_errors,
            } => {
                let auc = metrics
                    .roc_auc
                    .map(|v| format!("{:.3}", v))
                    .unwrap_or_else(|| "n/a".to_string());
                println!(
                    "{:<22} acc={:.3} prec={:.3} rec={:.3} f1={:.3} auc={}",
                    name, metrics.accuracy, metrics.precision, metrics.recall, metrics.f1, auc
                );
                for e in metric_errors {
                    println!("  warning: {}", e);
                }
            }
            CandidateOutcome::Failed { name, reason } => {
                println!("{:<22} FAILED: {}", name, reason);
            }
        }
    }

    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    println!("Run records saved under: {}", tracker.run_dir().display());

    Ok(())
}
