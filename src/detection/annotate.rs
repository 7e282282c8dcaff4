// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 标注图片: 人员框 (绿色) 与其它类别 (灰色)

use std::io::Cursor;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::types::Detection;

const PERSON_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OTHER_COLOR: Rgb<u8> = Rgb([160, 160, 160]);
const LINE_WIDTH: i32 = 3;

/// 在图片副本上绘制检测框
pub fn annotate(image: &DynamicImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (w, h) = canvas.dimensions();

    for det in detections {
        let color = if det.is_person() {
            PERSON_COLOR
        } else {
            OTHER_COLOR
        };
        let x0 = det.bbox.xmin().max(0.0) as i32;
        let y0 = det.bbox.ymin().max(0.0) as i32;
        let x1 = det.bbox.xmax().min(w as f32) as i32;
        let y1 = det.bbox.ymax().min(h as f32) as i32;

        // 由外向内画多层, 得到粗线框
        for t in 0..LINE_WIDTH {
            let bw = x1 - x0 - 2 * t;
            let bh = y1 - y0 - 2 * t;
            if bw <= 0 || bh <= 0 {
                break;
            }
            let rect = Rect::at(x0 + t, y0 + t).of_size(bw as u32, bh as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }

    canvas
}

/// 编码为 JPEG / PNG
pub fn encode(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut buf), format)
        .with_context(|| format!("failed to encode annotated image as {format:?}"))?;
    Ok(buf)
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    encode(image, ImageFormat::Jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Bbox;

    #[test]
    fn draws_person_box_edges() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(64, 64));
        let dets = vec![Detection {
            label: "person".to_string(),
            class_id: 0,
            confidence: 0.9,
            bbox: Bbox::new(10.0, 10.0, 20.0, 30.0, 0, 0.9),
        }];
        let out = annotate(&image, &dets);
        assert_eq!(out.get_pixel(10, 10), &PERSON_COLOR);
        assert_eq!(out.get_pixel(20, 25), &Rgb([0, 0, 0]));

        let jpeg = encode_jpeg(&out).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
