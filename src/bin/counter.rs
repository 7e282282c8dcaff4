// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
/// 人员计数 (Person Counter)
///
/// 批处理流程:
/// 1. 列出存储桶中的图片 (本地目录或 S3 兼容端点)
/// 2. 逐张下载 → 旋转 → YOLO 检测 → 统计 person
/// 3. 上传标注图片, 写入结果表 (同一图片重跑时覆盖)
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use yolov8_counter::config::CounterArgs;
use yolov8_counter::detection::PersonDetector;
use yolov8_counter::source::{HttpBucket, ImageSource, LocalBucket};
use yolov8_counter::store::{MemoryStore, ObservationStore, SqliteStore};
use yolov8_counter::{logging, BatchRunner};

fn main() -> Result<()> {
    logging::init();
    let args = CounterArgs::parse();

    tracing::info!("🚀 人员计数启动");
    tracing::info!("📦 模型: {}", args.model.model);

    // ========== 图片来源 ==========
    let source: Box<dyn ImageSource> = match &args.endpoint {
        Some(endpoint) => Box::new(HttpBucket::new(
            endpoint,
            &args.bucket,
            Duration::from_secs(args.timeout_secs),
        )?),
        None => Box::new(LocalBucket::open(&args.bucket_root, &args.bucket)?),
    };
    tracing::info!("🪣 存储桶: {}", source.describe());

    // ========== 模型 (整个批次只加载一次) ==========
    let detector = PersonDetector::load(&args.model)?;
    if args.model.profile {
        detector.summary();
    }

    // ========== 结果表 ==========
    let store: Box<dyn ObservationStore> = if args.dry_run {
        tracing::warn!("🧪 dry-run: 结果不会写入数据库");
        Box::new(MemoryStore::new())
    } else {
        tracing::info!("🗄️ 结果表: {} ({})", args.table, args.db.display());
        Box::new(SqliteStore::open(&args.db, &args.table)?)
    };

    let mut runner = BatchRunner::new(source, detector, store, args.run_options());
    let summary = runner.run()?;

    tracing::info!(
        "✅ 完成: 共 {} 张, 处理 {} 张, 跳过 {} 张, 失败 {} 张, 累计 {} 人",
        summary.listed,
        summary.processed,
        summary.skipped,
        summary.failed.len(),
        summary.total_persons
    );
    for failed in &summary.failed {
        tracing::warn!("❌ {}: {}", failed.key, failed.error);
    }
    Ok(())
}
