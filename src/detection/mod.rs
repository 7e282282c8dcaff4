// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
/// 检测系统 (Detection System)
///
/// - Detector:   图片 → 检测结果 (类别 + 置信度 + 框)
/// - 计数:       只统计 person 类别
/// - 标注:       在图片上画出人员框, 用于人工复核
pub mod annotate;
pub mod detector;
pub mod types;

use image::DynamicImage;

pub use annotate::{annotate, encode, encode_jpeg};
pub use detector::{Detector, PersonDetector};
pub use types::{Bbox, Detection, DetectionResult, COCO_CLASSES, PERSON_LABEL};

/// 统计 person 类别数量; 没有检测结果时为 0
pub fn count_persons(detections: &[Detection]) -> u32 {
    let n = detections.iter().filter(|d| d.is_person()).count();
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// 检测前的图片旋转 (摄像头安装方向)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Orientation {
    None,
    Rotate90,
    #[default]
    Rotate180,
    Rotate270,
}

impl Orientation {
    pub fn apply(self, image: DynamicImage) -> DynamicImage {
        match self {
            Orientation::None => image,
            Orientation::Rotate90 => image.rotate90(),
            Orientation::Rotate180 => image.rotate180(),
            Orientation::Rotate270 => image.rotate270(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    fn det(label: &str) -> Detection {
        Detection {
            label: label.to_string(),
            class_id: 0,
            confidence: 0.8,
            bbox: Bbox::default(),
        }
    }

    #[test]
    fn counts_only_person_label() {
        let dets = vec![det("person"), det("bus"), det("person"), det("dog")];
        assert_eq!(count_persons(&dets), 2);
    }

    #[test]
    fn zero_detections_count_as_zero() {
        assert_eq!(count_persons(&[]), 0);
    }

    #[test]
    fn rotate_180_moves_top_left_pixel_to_bottom_right() {
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        let rotated = Orientation::Rotate180.apply(DynamicImage::ImageRgb8(img));
        assert_eq!(rotated.dimensions(), (4, 2));
        assert_eq!(rotated.to_rgb8().get_pixel(3, 1), &Rgb([255, 0, 0]));

        let turned = Orientation::Rotate90.apply(rotated);
        assert_eq!(turned.dimensions(), (2, 4));
    }
}
