// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
/// 批处理流程 (Batch Pipeline)
///
/// 单线程顺序处理, 每张图片:
/// ```text
/// 下载 → 解码 → 旋转 → 检测 → 计数 → (标注 + 上传) → 写入结果表
/// ```
/// 图片来源、模型、结果表在启动时创建一次, 由 BatchRunner 持有至批次结束。
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::detection::{annotate, count_persons, encode, Detector, Orientation};
use crate::source::{annotated_key, format_for, ImageSource};
use crate::store::{Observation, ObservationStore};

/// 单张图片失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// 记录错误, 继续下一张
    #[default]
    Skip,
    /// 立即终止批次
    Abort,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// 输入前缀, 为空时处理整个桶
    pub input_prefix: String,
    /// 标注图片输出前缀; 该前缀下的 key 不作为输入
    pub output_prefix: String,
    /// 生成并上传标注图片
    pub annotate: bool,
    pub orientation: Orientation,
    /// 跳过结果表中已存在的图片
    pub skip_existing: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            input_prefix: String::new(),
            output_prefix: "resultados/".to_string(),
            annotate: true,
            orientation: Orientation::Rotate180,
            skip_existing: false,
            failure_policy: FailurePolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedImage {
    pub key: String,
    pub error: String,
}

/// 批次统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub listed: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: Vec<FailedImage>,
    pub total_persons: u64,
}

pub struct BatchRunner<S, D, O> {
    source: S,
    detector: D,
    store: O,
    options: RunOptions,

    // 统计
    prof_detect: Duration,
}

impl<S, D, O> BatchRunner<S, D, O>
where
    S: ImageSource,
    D: Detector,
    O: ObservationStore,
{
    pub fn new(source: S, detector: D, store: O, options: RunOptions) -> Self {
        Self {
            source,
            detector,
            store,
            options,
            prof_detect: Duration::ZERO,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn store(&self) -> &O {
        &self.store
    }

    pub fn into_parts(self) -> (S, D, O) {
        (self.source, self.detector, self.store)
    }

    /// 待处理的图片: 输入前缀下的图片, 排除标注输出目录, 去重
    pub fn pending_images(&self) -> Result<Vec<String>> {
        let listed = self.source.list_images(&self.options.input_prefix)?;
        let output_prefix = self.options.output_prefix.as_str();
        let keys: BTreeSet<String> = listed
            .into_iter()
            .filter(|k| output_prefix.is_empty() || !k.starts_with(output_prefix))
            .collect();
        Ok(keys.into_iter().collect())
    }

    /// 处理单张图片并写入结果表
    pub fn process_image(&mut self, key: &str) -> Result<Observation> {
        let object = self.source.fetch(key)?;
        let image = image::load_from_memory(&object.bytes)
            .with_context(|| format!("failed to decode image {key}"))?;
        let image = self.options.orientation.apply(image);

        let t = Instant::now();
        let detections = self
            .detector
            .detect(&image)
            .with_context(|| format!("detection failed for {key}"))?;
        self.prof_detect += t.elapsed();
        let person_count = count_persons(&detections);

        let output_key = if self.options.annotate {
            let out_key = annotated_key(&self.options.output_prefix, key);
            let (format, content_type) = format_for(&out_key);
            let bytes = encode(&annotate(&image, &detections), format)?;
            self.source.put(&out_key, &bytes, content_type)?;
            tracing::debug!(key = %out_key, "annotated image uploaded");
            Some(out_key)
        } else {
            None
        };

        let obs = Observation {
            image: key.to_string(),
            output_key,
            person_count,
            battery: object.battery_level(),
            image_time: object.device_timestamp(),
            run_time: crate::execution_timestamp(),
        };
        self.store.put(&obs)?;
        tracing::info!(
            key = %key,
            persons = person_count,
            detections = detections.len(),
            battery = ?obs.battery,
            "observation stored"
        );
        Ok(obs)
    }

    /// 处理全部图片
    pub fn run(&mut self) -> Result<RunSummary> {
        tracing::info!(
            source = %self.source.describe(),
            prefix = %self.options.input_prefix,
            "listing images"
        );
        let keys = self.pending_images()?;
        let mut summary = RunSummary {
            listed: keys.len(),
            ..Default::default()
        };
        if keys.is_empty() {
            tracing::warn!("no images found in bucket");
            return Ok(summary);
        }

        for key in keys {
            if self.options.skip_existing && self.store.contains(&key)? {
                tracing::debug!(key = %key, "already processed, skipping");
                summary.skipped += 1;
                continue;
            }

            match self.process_image(&key) {
                Ok(obs) => {
                    summary.processed += 1;
                    summary.total_persons += u64::from(obs.person_count);
                }
                Err(e) => match self.options.failure_policy {
                    FailurePolicy::Skip => {
                        tracing::warn!(key = %key, error = %format!("{e:#}"), "failed to process image");
                        summary.failed.push(FailedImage {
                            key,
                            error: format!("{e:#}"),
                        });
                    }
                    FailurePolicy::Abort => {
                        return Err(e.context(format!("batch aborted at {key}")));
                    }
                },
            }
        }

        if summary.processed > 0 {
            tracing::info!(
                detect_ms_per_image = format!(
                    "{:.2}",
                    self.prof_detect.as_secs_f64() * 1000.0 / summary.processed as f64
                ),
                "batch timings"
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Bbox, Detection};
    use crate::source::LocalBucket;
    use crate::store::MemoryStore;
    use image::{DynamicImage, RgbImage};

    struct FixedDetector(Vec<&'static str>);

    impl Detector for FixedDetector {
        fn detect(&mut self, _image: &DynamicImage) -> Result<Vec<Detection>> {
            Ok(self
                .0
                .iter()
                .map(|label| Detection {
                    label: label.to_string(),
                    class_id: 0,
                    confidence: 0.9,
                    bbox: Bbox::new(1.0, 1.0, 4.0, 4.0, 0, 0.9),
                })
                .collect())
        }
    }

    fn jpeg() -> Vec<u8> {
        crate::detection::encode_jpeg(&RgbImage::new(16, 16)).unwrap()
    }

    #[test]
    fn output_prefix_is_excluded_from_input() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::new(dir.path());
        bucket.put("a.jpg", &jpeg(), "image/jpeg").unwrap();
        bucket.put("resultados/out_a.jpg", &jpeg(), "image/jpeg").unwrap();

        let runner = BatchRunner::new(
            bucket,
            FixedDetector(vec![]),
            MemoryStore::new(),
            RunOptions::default(),
        );
        assert_eq!(runner.pending_images().unwrap(), vec!["a.jpg"]);
    }

    #[test]
    fn process_image_counts_persons_and_uploads_annotation() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::new(dir.path());
        bucket.put("cam/a.jpg", &jpeg(), "image/jpeg").unwrap();

        let mut runner = BatchRunner::new(
            bucket,
            FixedDetector(vec!["person", "bus", "person"]),
            MemoryStore::new(),
            RunOptions::default(),
        );
        let obs = runner.process_image("cam/a.jpg").unwrap();
        assert_eq!(obs.person_count, 2);
        assert_eq!(obs.output_key.as_deref(), Some("resultados/out_a.jpg"));
        assert!(dir.path().join("resultados/out_a.jpg").is_file());
        assert_eq!(runner.store().get("cam/a.jpg").unwrap(), Some(obs));
    }
}
