// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
//! 检测器 (Detector)
//! 职责: 图片 → 模型推理 → 带类别名称的检测结果

use anyhow::{Context, Result};
use image::DynamicImage;

use super::types::Detection;
use crate::models::{Model, ModelType};
use crate::Args;

/// 检测接口: 给定解码后的图片, 返回全部检测结果
pub trait Detector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Detection>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Detection>> {
        (**self).detect(image)
    }
}

/// 预训练模型封装, 启动时加载一次, 整个批次复用
pub struct PersonDetector {
    model: Box<dyn Model>,
    model_type: ModelType,
}

impl PersonDetector {
    pub fn load(args: &Args) -> Result<Self> {
        let model_type = ModelType::from_path(&args.model);
        let model = model_type
            .load(args.clone())
            .with_context(|| format!("failed to load {:?} model {}", model_type, args.model))?;
        tracing::info!(model = %args.model, kind = ?model_type, "detection model loaded");
        Ok(Self { model, model_type })
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn summary(&self) {
        self.model.summary();
    }
}

impl Detector for PersonDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let results = self.model.forward(std::slice::from_ref(image))?;
        let names = self.model.names();
        Ok(results
            .into_iter()
            .next()
            .map(|r| {
                r.bboxes
                    .into_iter()
                    .map(|bbox| Detection::from_bbox(bbox, names))
                    .collect()
            })
            .unwrap_or_default())
    }
}
