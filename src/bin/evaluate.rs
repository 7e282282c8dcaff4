// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
/// 计数评估 (Evaluation)
///
/// 结果表 + 人工标注 → MAE; 同时导出电池电压时间序列
use std::fs::File;

use anyhow::{Context, Result};
use clap::Parser;

use yolov8_counter::config::EvaluateArgs;
use yolov8_counter::evaluation::{evaluate, GroundTruth, VoltageSeries};
use yolov8_counter::logging;
use yolov8_counter::store::{ObservationStore, SqliteStore};

fn main() -> Result<()> {
    logging::init();
    let args = EvaluateArgs::parse();

    let store = SqliteStore::open(&args.db, &args.table)?;
    let observations = store.list()?;
    let truth = GroundTruth::from_csv_path(&args.truth)?;
    tracing::info!(
        "📊 观测记录 {} 条, 标注 {} 条",
        observations.len(),
        truth.len()
    );

    let report = evaluate(&observations, &truth);
    match report.mae {
        Some(mae) => println!("MAE: {mae:.4} ({} pairs)", report.matched.len()),
        None => println!("MAE: n/a (no matched pairs)"),
    }
    if !report.unmatched_truth.is_empty() {
        tracing::warn!("⚠️ {} 条标注没有对应的观测", report.unmatched_truth.len());
    }
    if !report.unmatched_observations.is_empty() {
        tracing::info!("{} 条观测没有标注", report.unmatched_observations.len());
    }

    if let Some(path) = &args.errors_out {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        report.write_errors_csv(file)?;
        tracing::info!("💾 误差: {}", path.display());
    }

    let series = VoltageSeries::from_observations(&observations);
    match series.decay_per_hour() {
        Some(slope) => println!("battery: {} points, {slope:+.4} V/h", series.len()),
        None => println!("battery: {} points", series.len()),
    }
    if let Some(path) = &args.voltage_out {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        series.write_csv(file)?;
        tracing::info!("💾 电压: {}", path.display());
    }
    Ok(())
}
