// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 检测模型实现
// 包含: 模型加载、预处理、推理、后处理

use anyhow::{bail, Result};
use image::{DynamicImage, GenericImageView};
use ndarray::{s, Array, ArrayView2, Axis, Ix2, IxDyn};

use crate::detection::COCO_CLASSES;
use crate::models::ModelType;
use crate::{
    non_max_suppression, Bbox, DetectionResult, OrtBackend, OrtConfig, OrtEP, YOLOTask,
};

/// 输出中 cx, cy, w, h 的长度
const CXYWH_OFFSET: usize = 4;

/// 解码单张图片的输出 `[4 + nc, anchors]`:
/// 取最大类别分数 → 置信度过滤 → 按 letterbox 比例还原到原图并裁剪 → 按类别 NMS
pub fn decode_detections(
    preds: ArrayView2<f32>,
    ratio: f32,
    (w0, h0): (f32, f32),
    nc: usize,
    conf: f32,
    iou: f32,
) -> Vec<Bbox> {
    let mut data: Vec<Bbox> = Vec::new();
    if nc == 0 || preds.nrows() < CXYWH_OFFSET + nc || ratio <= 0.0 {
        return data;
    }

    for pred in preds.axis_iter(Axis(1)) {
        let bbox = pred.slice(s![0..CXYWH_OFFSET]);
        let clss = pred.slice(s![CXYWH_OFFSET..CXYWH_OFFSET + nc]);

        let Some((id, &confidence)) = clss
            .into_iter()
            .enumerate()
            .reduce(|max, x| if x.1 > max.1 { x } else { max })
        else {
            continue;
        };
        if confidence < conf {
            continue;
        }

        let cx = bbox[0] / ratio;
        let cy = bbox[1] / ratio;
        let w = bbox[2] / ratio;
        let h = bbox[3] / ratio;
        let x1 = (cx - w / 2.).clamp(0.0, w0);
        let y1 = (cy - h / 2.).clamp(0.0, h0);
        let x2 = (cx + w / 2.).clamp(0.0, w0);
        let y2 = (cy + h / 2.).clamp(0.0, h0);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        data.push(Bbox::new(x1, y1, x2 - x1, y2 - y1, id, confidence));
    }

    non_max_suppression(&mut data, iou);
    data
}

/// YOLOv8 完整模型结构
pub struct YOLOv8 {
    engine: OrtBackend,
    nc: Option<u32>,
    height: u32,
    width: u32,
    conf: f32,
    iou: f32,
    names: Vec<String>,
    profile: bool,
}

impl YOLOv8 {
    /// 从配置创建 YOLOv8 模型
    pub fn new(config: crate::Args) -> Result<Self> {
        // execution provider
        let ep = if config.trt {
            OrtEP::Trt(config.device_id)
        } else if config.cuda {
            OrtEP::CUDA(config.device_id)
        } else {
            OrtEP::CPU
        };

        // build ort engine
        let ort_args = OrtConfig {
            ep,
            f: config.model.clone(),
            task: Some(YOLOTask::Detect),
            trt_fp16: config.fp16,
            image_size: (config.height, config.width),
        };
        let engine = OrtBackend::build(ort_args)?;

        if engine.task() != YOLOTask::Detect {
            bail!(
                "model task is {:?}, only detection models can count persons",
                engine.task()
            );
        }

        let (height, width) = (engine.height(), engine.width());
        // 类别数: 元数据 → 命令行 → 推理时由输出形状推断
        let nc = engine.nc().or(config.nc);

        // class names
        let names = engine
            .names()
            .unwrap_or_else(|| COCO_CLASSES.iter().map(|s| s.to_string()).collect());

        let (conf, iou) = config.resolved_thresholds(ModelType::YOLOv8);
        Ok(Self {
            engine,
            names,
            conf,
            iou,
            profile: config.profile,
            nc,
            height,
            width,
        })
    }

    fn scale_wh(&self, w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
        let r = (w1 / w0).min(h1 / h0);
        (r, (w0 * r).round(), (h0 * r).round())
    }

    /// 等比缩放到左上角, 其余区域填充灰色 (144)
    pub fn preprocess(&mut self, xs: &[DynamicImage]) -> Result<Array<f32, IxDyn>> {
        let mut ys =
            Array::ones((xs.len(), 3, self.height() as usize, self.width() as usize)).into_dyn();
        ys.fill(144.0 / 255.0);
        for (idx, x) in xs.iter().enumerate() {
            let (w0, h0) = x.dimensions();
            if w0 == 0 || h0 == 0 {
                bail!("image {idx} is empty");
            }
            let (_, w_new, h_new) = self.scale_wh(
                w0 as f32,
                h0 as f32,
                self.width() as f32,
                self.height() as f32,
            );
            let img = x.resize_exact(
                (w_new as u32).max(1),
                (h_new as u32).max(1),
                image::imageops::FilterType::Triangle,
            );

            for (x, y, rgb) in img.pixels() {
                let x = x as usize;
                let y = y as usize;
                let [r, g, b, _] = rgb.0;
                ys[[idx, 0, y, x]] = (r as f32) / 255.0;
                ys[[idx, 1, y, x]] = (g as f32) / 255.0;
                ys[[idx, 2, y, x]] = (b as f32) / 255.0;
            }
        }

        Ok(ys)
    }

    pub fn run(&mut self, xs: &[DynamicImage]) -> Result<Vec<DetectionResult>> {
        let t_pre = std::time::Instant::now();
        let xs_ = self.preprocess(xs)?;
        if self.profile {
            tracing::info!("[Model Preprocess]: {:?}", t_pre.elapsed());
        }

        let t_run = std::time::Instant::now();
        let ys = self.engine.run(xs_, self.profile)?;
        if self.profile {
            tracing::info!("[Model Inference]: {:?}", t_run.elapsed());
        }

        let t_post = std::time::Instant::now();
        let ys = self.postprocess(ys, xs)?;
        if self.profile {
            tracing::info!("[Model Postprocess]: {:?}", t_post.elapsed());
        }

        Ok(ys)
    }

    /// 解码 [batch, 4 + nc, anchors] 输出
    pub fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<DetectionResult>> {
        let Some(preds) = xs.first() else {
            bail!("model produced no outputs");
        };
        if preds.ndim() != 3 {
            bail!("unexpected output shape {:?}", preds.shape());
        }
        let channels = preds.shape()[1];
        if channels <= CXYWH_OFFSET {
            bail!("unexpected output shape {:?}", preds.shape());
        }
        let nc = match self.nc {
            Some(nc) if (nc as usize) + CXYWH_OFFSET <= channels => nc as usize,
            _ => channels - CXYWH_OFFSET,
        };

        let mut ys = Vec::new();
        for (idx, anchor) in preds.axis_iter(Axis(0)).enumerate() {
            let Some(x0) = xs0.get(idx) else {
                bail!("batch index {idx} has no source image");
            };
            let (w0, h0) = (x0.width() as f32, x0.height() as f32);
            let ratio = (self.width() as f32 / w0).min(self.height() as f32 / h0);
            let data = decode_detections(
                anchor.into_dimensionality::<Ix2>()?,
                ratio,
                (w0, h0),
                nc,
                self.conf,
                self.iou,
            );
            ys.push(DetectionResult::new(data));
        }

        Ok(ys)
    }

    pub fn summary(&self) {
        tracing::info!(
            "\nSummary:\n\
            > Task: Detect{}\n\
            > EP: {:?} {}\n\
            > Height: {} ({}), Width: {} ({})\n\
            > nc: {}, conf: {}, iou: {}",
            match self.engine.author().zip(self.engine.version()) {
                Some((author, ver)) => format!(" ({} {})", author, ver),
                None => String::from(""),
            },
            self.engine.ep(),
            if let OrtEP::CPU = self.engine.ep() {
                ""
            } else {
                "(May still fall back to CPU)"
            },
            self.height(),
            if self.engine.is_height_dynamic() {
                "Dynamic"
            } else {
                "Const"
            },
            self.width(),
            if self.engine.is_width_dynamic() {
                "Dynamic"
            } else {
                "Const"
            },
            self.nc
                .map(|nc| nc.to_string())
                .unwrap_or_else(|| "auto".to_string()),
            self.conf,
            self.iou,
        );
    }

    pub fn conf(&self) -> f32 {
        self.conf
    }

    pub fn iou(&self) -> f32 {
        self.iou
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

// 实现统一的 Model trait
impl super::Model for YOLOv8 {
    fn preprocess(&mut self, images: &[DynamicImage]) -> Result<Vec<Array<f32, IxDyn>>> {
        Ok(vec![YOLOv8::preprocess(self, images)?])
    }

    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        let mut ys = Vec::new();
        for x in xs {
            ys.extend(self.engine.run(x, profile)?);
        }
        Ok(ys)
    }

    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<DetectionResult>> {
        YOLOv8::postprocess(self, xs, xs0)
    }

    fn forward(&mut self, images: &[DynamicImage]) -> Result<Vec<DetectionResult>> {
        YOLOv8::run(self, images)
    }

    fn names(&self) -> &[String] {
        &self.names
    }

    fn summary(&self) {
        YOLOv8::summary(self)
    }
}
