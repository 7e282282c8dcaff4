// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
/// 图片来源 (Image Source)
///
/// 对象存储桶的最小接口: 列出图片 → 按 key 下载 → 上传标注图片。
/// - LocalBucket: 本地目录充当存储桶 (元数据放在 `<key>.meta.json`)
/// - HttpBucket:  S3 兼容 REST 端点 (匿名或预签名访问)
pub mod http;
pub mod local;

use std::collections::BTreeMap;

use anyhow::Result;
use thiserror::Error;

pub use http::HttpBucket;
pub use local::LocalBucket;

/// 元数据: 电池电压 (伏)
pub const META_BATTERY_LEVEL: &str = "battery-level";
/// 元数据: 设备采集时间
pub const META_DEVICE_TIMESTAMP: &str = "device-timestamp";

/// 单个对象的读写错误
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("request for {key} failed: {message}")]
    Http { key: String, message: String },

    #[error("i/o error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid metadata for {key}: {message}")]
    Metadata { key: String, message: String },
}

/// 下载得到的图片对象 (原始字节只在处理期间存在)
#[derive(Debug, Clone, PartialEq)]
pub struct ImageObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
}

impl ImageObject {
    /// 电池电压; 缺失或无法解析时为 None
    pub fn battery_level(&self) -> Option<f64> {
        self.metadata
            .get(META_BATTERY_LEVEL)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    /// 设备写入的采集时间
    pub fn device_timestamp(&self) -> Option<String> {
        self.metadata
            .get(META_DEVICE_TIMESTAMP)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// 对象存储接口
pub trait ImageSource {
    /// 列出 prefix 下的全部图片 key (已排序, 无重复)
    fn list_images(&self, prefix: &str) -> Result<Vec<String>>;

    /// 下载单个对象及其元数据
    fn fetch(&self, key: &str) -> Result<ImageObject, SourceError>;

    /// 上传单个对象
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), SourceError>;

    /// 用于日志的位置描述
    fn describe(&self) -> String;
}

impl<S: ImageSource + ?Sized> ImageSource for Box<S> {
    fn list_images(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list_images(prefix)
    }

    fn fetch(&self, key: &str) -> Result<ImageObject, SourceError> {
        (**self).fetch(key)
    }

    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), SourceError> {
        (**self).put(key, bytes, content_type)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// 是否为图片 key (.jpg / .jpeg / .png, 不区分大小写)
pub fn is_image_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    !lower.ends_with('/')
        && (lower.ends_with(".jpg") || lower.ends_with(".jpeg") || lower.ends_with(".png"))
}

/// 标注图片的 key: `<output_prefix>out_<文件名>`
pub fn annotated_key(output_prefix: &str, key: &str) -> String {
    let basename = key.rsplit('/').next().unwrap_or(key);
    format!("{output_prefix}out_{basename}")
}

/// 根据扩展名选择编码格式与 Content-Type
pub fn format_for(key: &str) -> (image::ImageFormat, &'static str) {
    if key.to_lowercase().ends_with(".png") {
        (image::ImageFormat::Png, "image/png")
    } else {
        (image::ImageFormat::Jpeg, "image/jpeg")
    }
}
