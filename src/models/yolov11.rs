// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv11 模型实现 (改进的C3k2和SPPF模块)
//
// 注: YOLOv11与YOLOv8的ONNX接口完全兼容,
// 差异仅在网络结构内部(C3k2, SPPF改进),
// 因此直接复用YOLOv8的实现

use anyhow::Result;
use image::DynamicImage;
use ndarray::{Array, IxDyn};

use crate::models::{Model, YOLOv8};
use crate::DetectionResult;

/// YOLOv11 模型结构 (内部委托给YOLOv8)
pub struct YOLOv11 {
    inner: YOLOv8,
}

impl YOLOv11 {
    /// 从配置创建 YOLOv11 模型 (委托给YOLOv8)
    pub fn new(config: crate::Args) -> Result<Self> {
        let inner = YOLOv8::new(config)?;
        Ok(Self { inner })
    }
}

impl Model for YOLOv11 {
    fn preprocess(&mut self, xs: &[DynamicImage]) -> Result<Vec<Array<f32, IxDyn>>> {
        Model::preprocess(&mut self.inner, xs)
    }

    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        Model::run(&mut self.inner, xs, profile)
    }

    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<DetectionResult>> {
        self.inner.postprocess(xs, xs0)
    }

    fn forward(&mut self, images: &[DynamicImage]) -> Result<Vec<DetectionResult>> {
        self.inner.run(images)
    }

    fn names(&self) -> &[String] {
        self.inner.names()
    }

    fn summary(&self) {
        tracing::info!("Model: YOLOv11 (Improved Architecture), Backend: YOLOv8 (ONNX Compatible)");
        self.inner.summary();
    }
}
