// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
/// 结果存储 (Results Sink)
///
/// 每张图片一条记录, 以图片 key 为主键; 同一 key 再次写入时覆盖。
/// 序列化字段名沿用现有结果表 (imagem / qtd_pessoas / bateria ...),
/// 已有的分析数据可直接读取。
pub mod memory;
pub mod sqlite;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// 单张图片的计数结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// 原图 key
    #[serde(rename = "imagem")]
    pub image: String,
    /// 标注图片 key (未上传时为 null)
    #[serde(rename = "outputKey", default)]
    pub output_key: Option<String>,
    /// 人数
    #[serde(rename = "qtd_pessoas")]
    pub person_count: u32,
    /// 电池电压 (伏)
    #[serde(rename = "bateria", default)]
    pub battery: Option<f64>,
    /// 设备采集时间
    #[serde(rename = "hora_imagem", default)]
    pub image_time: Option<String>,
    /// 处理时间 (RFC 3339, 现场时区)
    #[serde(rename = "hora_execucao")]
    pub run_time: String,
}

/// 键值存储接口
pub trait ObservationStore {
    /// 按 image 写入 (存在则覆盖)
    fn put(&mut self, obs: &Observation) -> Result<()>;

    fn get(&self, image: &str) -> Result<Option<Observation>>;

    /// 全部记录, 按 image 排序
    fn list(&self) -> Result<Vec<Observation>>;

    fn contains(&self, image: &str) -> Result<bool> {
        Ok(self.get(image)?.is_some())
    }
}

impl<S: ObservationStore + ?Sized> ObservationStore for Box<S> {
    fn put(&mut self, obs: &Observation) -> Result<()> {
        (**self).put(obs)
    }

    fn get(&self, image: &str) -> Result<Option<Observation>> {
        (**self).get(image)
    }

    fn list(&self) -> Result<Vec<Observation>> {
        (**self).list()
    }

    fn contains(&self, image: &str) -> Result<bool> {
        (**self).contains(image)
    }
}

impl<S: ObservationStore + ?Sized> ObservationStore for &mut S {
    fn put(&mut self, obs: &Observation) -> Result<()> {
        (**self).put(obs)
    }

    fn get(&self, image: &str) -> Result<Option<Observation>> {
        (**self).get(image)
    }

    fn list(&self) -> Result<Vec<Observation>> {
        (**self).list()
    }

    fn contains(&self, image: &str) -> Result<bool> {
        (**self).contains(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_results_table_field_names() {
        let obs = Observation {
            image: "cam1/a.jpg".to_string(),
            output_key: None,
            person_count: 0,
            battery: Some(3.71),
            image_time: None,
            run_time: "2024-05-01T10:00:00-03:00".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["imagem"], "cam1/a.jpg");
        assert_eq!(json["qtd_pessoas"], 0);
        assert!(json["outputKey"].is_null());
        assert_eq!(json["bateria"], 3.71);

        let back: Observation = serde_json::from_value(json).unwrap();
        assert_eq!(back, obs);
    }
}
