// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
/// 模型统一接口与实现
///
/// ## Model Trait
/// 统一的模型接口，定义标准流程: preprocess → run → postprocess
///
/// ## 使用示例
/// ```no_run
/// use yolov8_counter::models::{Model, YOLOv8};
/// use yolov8_counter::Args;
///
/// # fn main() -> anyhow::Result<()> {
/// let mut model = YOLOv8::new(Args::default())?;
/// let image = image::open("bus.jpg")?;
/// let results = model.forward(&[image])?;
/// # Ok(())
/// # }
/// ```
use anyhow::Result;
use image::DynamicImage;
use ndarray::{Array, IxDyn};

use crate::{Args, DetectionResult};

/// 模型类型枚举（用于自动识别模型）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// YOLOv8 标准模型
    YOLOv8,
    /// YOLOv5 模型 (ultralytics 导出, 输出格式与 v8 相同)
    YOLOv5,
    /// YOLOv11 改进模型 (C3k2 + SPPF)
    YOLOv11,
}

impl ModelType {
    /// 从模型路径推断模型类型
    /// 只看文件名 (不含目录与扩展名), 例如 `yolov5su.onnx` → YOLOv5
    pub fn from_path(path: &str) -> Self {
        let stem = std::path::Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if stem.starts_with("yolov11") || stem.starts_with("yolo11") {
            ModelType::YOLOv11
        } else if stem.starts_with("yolov5") || stem.starts_with("yolo5") {
            ModelType::YOLOv5
        } else {
            ModelType::YOLOv8
        }
    }

    /// 获取模型推荐的置信度阈值
    pub fn default_conf_threshold(&self) -> f32 {
        match self {
            ModelType::YOLOv11 => 0.15, // v11与v8相同
            ModelType::YOLOv5 => 0.25,
            ModelType::YOLOv8 => 0.15,
        }
    }

    /// 获取模型推荐的IOU阈值
    pub fn default_iou_threshold(&self) -> f32 {
        0.45
    }

    /// 按类型加载模型; 命令行未指定的阈值使用该类型的默认值
    pub fn load(self, mut args: Args) -> Result<Box<dyn Model>> {
        let (conf, iou) = args.resolved_thresholds(self);
        args.conf = Some(conf);
        args.iou = Some(iou);
        Ok(match self {
            ModelType::YOLOv8 | ModelType::YOLOv5 => Box::new(YOLOv8::new(args)?),
            ModelType::YOLOv11 => Box::new(YOLOv11::new(args)?),
        })
    }
}

/// 统一的深度学习模型接口
///
/// ## 核心流程
/// ```text
/// 原始图片 → preprocess → ndarray张量
///          ↓
///     推理引擎 run
///          ↓
///     原始输出 → postprocess → 检测结果
/// ```
pub trait Model {
    /// 预处理: 图片 → NCHW 张量
    fn preprocess(&mut self, images: &[DynamicImage]) -> Result<Vec<Array<f32, IxDyn>>>;

    /// 推理: 执行模型前向传播, 返回原始输出(未解码)
    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>>;

    /// 后处理: 原始输出 → 检测结果 (坐标还原到原图)
    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<DetectionResult>>;

    /// 完整的推理流程: preprocess → run → postprocess
    fn forward(&mut self, images: &[DynamicImage]) -> Result<Vec<DetectionResult>> {
        let xs = self.preprocess(images)?;
        let ys = self.run(xs, false)?;
        self.postprocess(ys, images)
    }

    /// 类别名称表 (下标 = 类别 id)
    fn names(&self) -> &[String];

    /// 打印模型信息
    fn summary(&self);
}

// 各模型的具体实现
pub mod yolov11; // YOLOv11 改进模型
pub mod yolov8; // YOLOv8 完整模型 + 实现 Model trait

// Re-exports
pub use yolov11::YOLOv11;
pub use yolov8::YOLOv8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_type_from_file_name() {
        assert_eq!(ModelType::from_path("models/yolov8n.onnx"), ModelType::YOLOv8);
        assert_eq!(ModelType::from_path("models/YOLO11s.onnx"), ModelType::YOLOv11);
        assert_eq!(ModelType::from_path("models/yolov5su.onnx"), ModelType::YOLOv5);
        assert_eq!(ModelType::from_path("yolo5n"), ModelType::YOLOv5);
        // 目录名或文件名中间的 "v5" 不影响判断
        assert_eq!(
            ModelType::from_path("models/yolov8n_v5data.onnx"),
            ModelType::YOLOv8
        );
        assert_eq!(
            ModelType::from_path("runs/v5/yolov8s.onnx"),
            ModelType::YOLOv8
        );
    }

    #[test]
    fn thresholds_default_per_model_type() {
        let args = Args::default();
        assert_eq!(args.conf, None);
        assert_eq!(
            args.resolved_thresholds(ModelType::YOLOv5),
            (0.25, 0.45)
        );
        assert_eq!(
            args.resolved_thresholds(ModelType::YOLOv8),
            (0.15, 0.45)
        );

        let explicit = Args {
            conf: Some(0.4),
            ..Args::default()
        };
        assert_eq!(explicit.resolved_thresholds(ModelType::YOLOv5), (0.4, 0.45));
    }
}
