#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 命令行与环境变量配置
pub mod detection; // 人员检测与计数
pub mod evaluation; // 离线评估 (MAE / 电池电压)
pub mod logging; // tracing 初始化
pub mod models; // 模型接口与具体实现
pub mod pipeline; // 批处理流程: 下载 → 检测 → 计数 → 存储
pub mod source; // 图片来源 (对象存储)
pub mod store; // 结果存储 (键值表)

pub mod ort_backend;

pub use crate::config::Args;
pub use crate::detection::{count_persons, Bbox, Detection, DetectionResult, Detector};
pub use crate::models::{Model, ModelType, YOLOv8};
pub use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP, YOLOTask};
pub use crate::pipeline::{BatchRunner, FailedImage, FailurePolicy, RunOptions, RunSummary};
pub use crate::store::{Observation, ObservationStore};

/// 非极大值抑制 (按类别): 按置信度降序, 丢弃与已保留的同类别框 IoU 超过阈值的框。
/// 不同类别的框互不抑制 (骑车的人不会被摩托车框吞掉)。
pub fn non_max_suppression(xs: &mut Vec<Bbox>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence().total_cmp(&b1.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].id() != xs[index].id() {
                continue;
            }
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 采集现场时区 (America/Sao_Paulo, 2019年起无夏令时)
pub const SITE_UTC_OFFSET_SECS: i32 = -3 * 60 * 60;

/// 当前时间, RFC 3339 格式, 现场时区
pub fn execution_timestamp() -> String {
    let t_now = chrono::Utc::now();
    match chrono::FixedOffset::east_opt(SITE_UTC_OFFSET_SECS) {
        Some(offset) => t_now.with_timezone(&offset).to_rfc3339(),
        None => t_now.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_highest_confidence_of_overlapping_boxes() {
        let mut boxes = vec![
            Bbox::new(10.0, 10.0, 100.0, 200.0, 0, 0.6),
            Bbox::new(12.0, 12.0, 100.0, 200.0, 0, 0.9),
            Bbox::new(400.0, 10.0, 80.0, 160.0, 0, 0.5),
        ];
        non_max_suppression(&mut boxes, 0.45);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].confidence(), 0.9);
        assert_eq!(boxes[1].confidence(), 0.5);
    }

    #[test]
    fn nms_does_not_suppress_across_classes() {
        // 骑手 (person) 与摩托车 (motorcycle) 重叠, IoU ≈ 0.58
        let mut boxes = vec![
            Bbox::new(100.0, 100.0, 100.0, 200.0, 0, 0.50),
            Bbox::new(100.0, 160.0, 100.0, 180.0, 3, 0.90),
        ];
        assert!(boxes[0].iou(&boxes[1]) > 0.45);
        non_max_suppression(&mut boxes, 0.45);
        assert_eq!(boxes.len(), 2);

        let persons: Vec<_> = boxes
            .iter()
            .map(|b| crate::Detection::from_bbox(b.clone(), &[]))
            .collect();
        assert_eq!(count_persons(&persons), 1);
    }

    #[test]
    fn execution_timestamp_is_sao_paulo_rfc3339() {
        let ts = execution_timestamp();
        let parsed = chrono::DateTime::parse_from_rfc3339(&ts).unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), SITE_UTC_OFFSET_SECS);
    }
}
