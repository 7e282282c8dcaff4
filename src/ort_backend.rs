// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ONNX Runtime 推理后端
// 负责: 会话构建、执行提供者选择、模型元数据读取、前向推理

use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{Array, IxDyn};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use regex::Regex;

/// YOLO 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YOLOTask {
    Classify,
    Detect,
    Pose,
    Segment,
}

impl YOLOTask {
    /// 解析模型元数据中的 task 字段
    pub fn from_metadata(s: &str) -> Option<Self> {
        match s.trim() {
            "classify" => Some(Self::Classify),
            "detect" => Some(Self::Detect),
            "pose" => Some(Self::Pose),
            "segment" => Some(Self::Segment),
            _ => None,
        }
    }
}

/// 执行提供者
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

/// 推理后端配置
#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: String,
    pub task: Option<YOLOTask>,
    pub ep: OrtEP,
    pub trt_fp16: bool,
    /// (height, width)
    pub image_size: (Option<u32>, Option<u32>),
}

/// 默认输入尺寸
pub const DEFAULT_INPUT_SIZE: u32 = 640;

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    task: YOLOTask,
    height: u32,
    width: u32,
    height_dynamic: bool,
    width_dynamic: bool,
    names: Option<Vec<String>>,
    author: Option<String>,
    version: Option<String>,
}

impl OrtBackend {
    pub fn build(args: OrtConfig) -> Result<Self> {
        let path = Path::new(&args.f);
        if !path.is_file() {
            anyhow::bail!("model file not found: {}", path.display());
        }

        let providers: Vec<ExecutionProviderDispatch> = match args.ep {
            OrtEP::Trt(device_id) => vec![
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .with_fp16(args.trt_fp16)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ],
            OrtEP::CUDA(device_id) => vec![
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ],
            OrtEP::CPU => vec![CPUExecutionProvider::default().build()],
        };

        let session = Session::builder()
            .context("failed to create ORT session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("failed to set ORT optimization level")?
            .with_execution_providers(providers)
            .context("failed to register execution providers")?
            .commit_from_file(path)
            .with_context(|| format!("failed to load ONNX model {}", path.display()))?;

        // 元数据 (ultralytics 导出时写入 names/task/author/version/imgsz)
        let (names, task, author, version, imgsz) = match session.metadata() {
            Ok(meta) => {
                let custom = |key: &str| meta.custom(key).ok().flatten();
                (
                    custom("names").map(|s| parse_names(&s)).filter(|v| !v.is_empty()),
                    custom("task").and_then(|s| YOLOTask::from_metadata(&s)),
                    custom("author"),
                    custom("version"),
                    custom("imgsz").and_then(|s| parse_imgsz(&s)),
                )
            }
            Err(e) => {
                tracing::warn!("failed to read model metadata: {e}");
                (None, None, None, None, None)
            }
        };

        let task = args.task.or(task).unwrap_or(YOLOTask::Detect);
        let (height_dynamic, width_dynamic) = (imgsz.is_none(), imgsz.is_none());
        let (height, width) = match imgsz {
            Some((h, w)) => (h, w),
            None => (
                args.image_size.0.unwrap_or(DEFAULT_INPUT_SIZE),
                args.image_size.1.unwrap_or(DEFAULT_INPUT_SIZE),
            ),
        };

        Ok(Self {
            session,
            ep: args.ep,
            task,
            height,
            width,
            height_dynamic,
            width_dynamic,
            names,
            author,
            version,
        })
    }

    /// 前向推理, 返回全部输出 (按模型输出顺序)
    pub fn run(&mut self, xs: Array<f32, IxDyn>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        let t = std::time::Instant::now();
        let input = Tensor::from_array(xs).context("failed to create input tensor")?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .context("ONNX inference failed")?;
        if profile {
            tracing::info!("[ORT H2D + Inference]: {:?}", t.elapsed());
        }

        let mut ys = Vec::new();
        for (name, value) in outputs.iter() {
            let (shape, data) = value
                .try_extract_tensor::<f32>()
                .with_context(|| format!("failed to extract output tensor {name}"))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            ys.push(Array::from_shape_vec(IxDyn(&dims), data.to_vec())?);
        }
        Ok(ys)
    }

    pub fn ep(&self) -> &OrtEP {
        &self.ep
    }

    pub fn task(&self) -> YOLOTask {
        self.task
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn is_height_dynamic(&self) -> bool {
        self.height_dynamic
    }

    pub fn is_width_dynamic(&self) -> bool {
        self.width_dynamic
    }

    /// 类别数 (来自 names 元数据)
    pub fn nc(&self) -> Option<u32> {
        self.names.as_ref().map(|names| names.len() as u32)
    }

    pub fn names(&self) -> Option<Vec<String>> {
        self.names.clone()
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

/// 解析 ultralytics 的 names 元数据: "{0: 'person', 1: 'bicycle', ...}"
pub fn parse_names(raw: &str) -> Vec<String> {
    let re = match Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    let mut pairs: Vec<(usize, String)> = re
        .captures_iter(raw)
        .filter_map(|cap| Some((cap[1].parse().ok()?, cap[2].to_string())))
        .collect();
    pairs.sort_by_key(|(id, _)| *id);
    pairs.into_iter().map(|(_, name)| name).collect()
}

/// 解析 imgsz 元数据: "[640, 640]" → (height, width)
fn parse_imgsz(raw: &str) -> Option<(u32, u32)> {
    let nums: Vec<u32> = raw
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    match nums.as_slice() {
        [h, w] => Some((*h, *w)),
        [s] => Some((*s, *s)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ultralytics_names_metadata() {
        let names = parse_names("{1: 'bicycle', 0: 'person', 2: \"car\"}");
        assert_eq!(names, vec!["person", "bicycle", "car"]);
    }

    #[test]
    fn parses_imgsz_metadata() {
        assert_eq!(parse_imgsz("[640, 480]"), Some((640, 480)));
        assert_eq!(parse_imgsz("[320]"), Some((320, 320)));
        assert_eq!(parse_imgsz("dynamic"), None);
    }

    #[test]
    fn parses_task_metadata() {
        assert_eq!(YOLOTask::from_metadata("detect"), Some(YOLOTask::Detect));
        assert_eq!(YOLOTask::from_metadata("obb"), None);
    }
}
