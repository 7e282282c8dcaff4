// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 配置参数: 命令行 + 环境变量 (环境变量名沿用采集脚本的命名)

use std::path::PathBuf;

use clap::Parser;

use crate::detection::Orientation;
use crate::models::ModelType;
use crate::pipeline::{FailurePolicy, RunOptions};

/// 模型参数
#[derive(clap::Args, Debug, Clone)]
pub struct Args {
    /// ONNX 模型路径 (文件名决定模型类型: yolov8*/yolov11*/yolov5*)
    #[arg(long, env = "NOME_MODELO", default_value = "models/yolov8n.onnx")]
    pub model: String,

    /// 输入宽度 (动态输入时使用)
    #[arg(long)]
    pub width: Option<u32>,

    /// 输入高度 (动态输入时使用)
    #[arg(long)]
    pub height: Option<u32>,

    /// 置信度阈值 (默认随模型类型: v8/v11 为 0.15, v5 为 0.25)
    #[arg(long)]
    pub conf: Option<f32>,

    /// NMS IoU 阈值 (默认 0.45)
    #[arg(long)]
    pub iou: Option<f32>,

    /// GPU 设备号
    #[arg(long, default_value_t = 0)]
    pub device_id: i32,

    /// 使用 CUDA
    #[arg(long)]
    pub cuda: bool,

    /// 使用 TensorRT
    #[arg(long)]
    pub trt: bool,

    /// TensorRT FP16
    #[arg(long)]
    pub fp16: bool,

    /// 类别数 (模型元数据缺失时显式指定)
    #[arg(long)]
    pub nc: Option<u32>,

    /// 打印每个阶段耗时
    #[arg(long)]
    pub profile: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            model: "models/yolov8n.onnx".to_string(),
            width: None,
            height: None,
            conf: None,
            iou: None,
            device_id: 0,
            cuda: false,
            trt: false,
            fp16: false,
            nc: None,
            profile: false,
        }
    }
}

impl Args {
    /// (conf, iou): 命令行优先, 否则取模型类型的默认值
    pub fn resolved_thresholds(&self, model_type: ModelType) -> (f32, f32) {
        (
            self.conf
                .unwrap_or_else(|| model_type.default_conf_threshold()),
            self.iou.unwrap_or_else(|| model_type.default_iou_threshold()),
        )
    }
}

/// 批量计数程序参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "YOLOv8 人员计数: 对象存储图片 → 检测 → 键值表", long_about = None)]
pub struct CounterArgs {
    #[command(flatten)]
    pub model: Args,

    /// 存储桶名称
    #[arg(long, env = "BUCKET_NAME", default_value = "fotos-esp32")]
    pub bucket: String,

    /// S3 兼容端点 (例如 http://127.0.0.1:9000); 未设置时使用本地目录
    #[arg(long, env = "BUCKET_ENDPOINT")]
    pub endpoint: Option<String>,

    /// 本地存储桶的根目录 (桶 = <root>/<bucket>)
    #[arg(long, env = "BUCKET_ROOT", default_value = ".")]
    pub bucket_root: PathBuf,

    /// 输入前缀, 为空时处理整个桶
    #[arg(long, env = "INPUT_IMAGE_PREFIXO", default_value = "")]
    pub input_prefix: String,

    /// 标注图片的输出前缀
    #[arg(long, env = "OUTPUT_IMAGE_PREFIXO", default_value = "resultados/")]
    pub output_prefix: String,

    /// 不上传标注图片
    #[arg(long)]
    pub no_annotate: bool,

    /// 检测前旋转图片 (摄像头倒装, 默认 180°)
    #[arg(long, value_enum, default_value_t = Orientation::Rotate180)]
    pub rotate: Orientation,

    /// 结果数据库 (SQLite)
    #[arg(long, env = "RESULTS_DB", default_value = "results.db")]
    pub db: PathBuf,

    /// 结果表名
    #[arg(long, env = "DYNAMO_TABLE", default_value = "yolo-resultados")]
    pub table: String,

    /// 跳过已有结果的图片 (默认重跑时覆盖)
    #[arg(long)]
    pub skip_existing: bool,

    /// 单张图片失败时终止整个批次 (默认跳过并继续)
    #[arg(long)]
    pub fail_fast: bool,

    /// 只检测不写入 (结果保存在内存中, 不上传标注图片)
    #[arg(long)]
    pub dry_run: bool,

    /// HTTP 请求超时 (秒)
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

impl CounterArgs {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            input_prefix: self.input_prefix.clone(),
            output_prefix: self.output_prefix.clone(),
            annotate: !(self.no_annotate || self.dry_run),
            orientation: self.rotate,
            skip_existing: self.skip_existing,
            failure_policy: if self.fail_fast {
                FailurePolicy::Abort
            } else {
                FailurePolicy::Skip
            },
        }
    }
}

/// 离线评估程序参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "计数结果评估: MAE 与电池电压衰减", long_about = None)]
pub struct EvaluateArgs {
    /// 结果数据库 (SQLite)
    #[arg(long, env = "RESULTS_DB", default_value = "results.db")]
    pub db: PathBuf,

    /// 结果表名
    #[arg(long, env = "DYNAMO_TABLE", default_value = "yolo-resultados")]
    pub table: String,

    /// 人工标注 CSV (列: image,timestamp,true_count)
    #[arg(long)]
    pub truth: PathBuf,

    /// 输出每张图片的误差 CSV
    #[arg(long)]
    pub errors_out: Option<PathBuf>,

    /// 输出电池电压时间序列 CSV
    #[arg(long)]
    pub voltage_out: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_field_deployment() {
        let args = CounterArgs::try_parse_from(["counter"]).unwrap();
        assert_eq!(args.model.resolved_thresholds(ModelType::YOLOv8), (0.15, 0.45));
        assert_eq!(args.output_prefix, "resultados/");
        assert_eq!(args.rotate, Orientation::Rotate180);

        let opts = args.run_options();
        assert_eq!(opts.failure_policy, FailurePolicy::Skip);
        assert_eq!(opts.output_prefix, "resultados/");
        assert!(opts.annotate);
        assert!(!opts.skip_existing);
    }

    #[test]
    fn dry_run_disables_annotation_upload() {
        let args = CounterArgs::try_parse_from([
            "counter", "--dry-run", "--fail-fast", "--rotate", "none", "--conf", "0.3",
        ])
        .unwrap();
        assert_eq!(args.model.resolved_thresholds(ModelType::YOLOv5), (0.3, 0.45));
        let opts = args.run_options();
        assert!(!opts.annotate);
        assert_eq!(opts.failure_policy, FailurePolicy::Abort);
        assert_eq!(opts.orientation, Orientation::None);
    }
}
