// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
/// 离线评估 (Offline Evaluation)
///
/// 读取结果表中的计数, 与人工标注的真实人数对比:
/// ```text
/// 结果表 + ground_truth.csv → 匹配 → 单项绝对误差 → MAE
/// ```
/// 匹配规则: 标注行有 `image` 时按图片 key 匹配, 否则按 `timestamp` 与设备采集时间匹配。
/// 未匹配的两侧记录不参与均值, 单独列出。
pub mod voltage;

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::store::Observation;

pub use voltage::{parse_timestamp, VoltagePoint, VoltageSeries};

/// ground truth CSV 的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruthRow {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub timestamp: String,
    pub true_count: u32,
}

/// 人工标注的真实人数
#[derive(Debug, Clone, Default)]
pub struct GroundTruth {
    rows: Vec<TruthRow>,
}

impl GroundTruth {
    pub fn new(rows: Vec<TruthRow>) -> Self {
        Self { rows }
    }

    /// 表头: `image,timestamp,true_count`
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut rows = Vec::new();
        for (i, record) in rdr.deserialize::<TruthRow>().enumerate() {
            // 行号从 2 开始 (第 1 行为表头)
            let row = record.with_context(|| format!("invalid ground truth row {}", i + 2))?;
            if row.image.is_empty() && row.timestamp.is_empty() {
                anyhow::bail!("ground truth row {} has neither image nor timestamp", i + 2);
            }
            rows.push(row);
        }
        Ok(Self { rows })
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open ground truth {}", path.display()))?;
        Self::from_reader(file)
    }

    pub fn rows(&self) -> &[TruthRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// 一对匹配成功的 (预测, 真实) 记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedPair {
    pub image: String,
    pub timestamp: Option<String>,
    pub predicted: u32,
    pub truth: u32,
    pub abs_error: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    pub matched: Vec<MatchedPair>,
    /// 没有匹配的真实值 → 不参与 MAE
    pub mae: Option<f64>,
    pub unmatched_observations: Vec<String>,
    pub unmatched_truth: Vec<TruthRow>,
}

impl EvaluationReport {
    /// 单项误差导出为 CSV
    pub fn write_errors_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for pair in &self.matched {
            wtr.serialize(pair)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// 时间匹配键: 可解析时按时刻比较 (不同写法的同一时刻相等), 否则按原字符串
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum TimeKey {
    Instant(DateTime<FixedOffset>),
    Raw(String),
}

impl TimeKey {
    fn new(s: &str) -> Self {
        match parse_timestamp(s) {
            Some(t) => TimeKey::Instant(t),
            None => TimeKey::Raw(s.trim().to_string()),
        }
    }
}

/// MAE = Σ|预测 - 真实| / n; 空输入返回 None
pub fn mean_absolute_error(pairs: &[(u32, u32)]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let total: u64 = pairs
        .iter()
        .map(|&(p, t)| u64::from(p.abs_diff(t)))
        .sum();
    Some(total as f64 / pairs.len() as f64)
}

/// 匹配观测记录与真实值并计算误差
pub fn evaluate(observations: &[Observation], truth: &GroundTruth) -> EvaluationReport {
    let by_image: BTreeMap<&str, &Observation> = observations
        .iter()
        .map(|o| (o.image.as_str(), o))
        .collect();
    let by_time: BTreeMap<TimeKey, &Observation> = observations
        .iter()
        .filter_map(|o| o.image_time.as_deref().map(|t| (TimeKey::new(t), o)))
        .collect();

    let mut report = EvaluationReport::default();
    let mut used: BTreeSet<&str> = BTreeSet::new();

    for row in truth.rows() {
        let found = if !row.image.is_empty() {
            by_image.get(row.image.as_str())
        } else {
            by_time.get(&TimeKey::new(&row.timestamp))
        };
        match found {
            Some(obs) if used.insert(obs.image.as_str()) => {
                report.matched.push(MatchedPair {
                    image: obs.image.clone(),
                    timestamp: obs.image_time.clone(),
                    predicted: obs.person_count,
                    truth: row.true_count,
                    abs_error: obs.person_count.abs_diff(row.true_count),
                });
            }
            Some(obs) => {
                tracing::warn!(image = %obs.image, "observation matched by more than one ground truth row");
                report.unmatched_truth.push(row.clone());
            }
            None => report.unmatched_truth.push(row.clone()),
        }
    }

    report.unmatched_observations = observations
        .iter()
        .filter(|o| !used.contains(o.image.as_str()))
        .map(|o| o.image.clone())
        .collect();

    let pairs: Vec<(u32, u32)> = report
        .matched
        .iter()
        .map(|p| (p.predicted, p.truth))
        .collect();
    report.mae = mean_absolute_error(&pairs);
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(image: &str, time: Option<&str>, count: u32) -> Observation {
        Observation {
            image: image.to_string(),
            output_key: None,
            person_count: count,
            battery: None,
            image_time: time.map(str::to_string),
            run_time: "2024-05-01T12:00:00-03:00".to_string(),
        }
    }

    #[test]
    fn mae_of_known_pairs_is_exact() {
        assert_eq!(mean_absolute_error(&[(3, 3), (5, 4), (0, 2)]), Some(1.0));
        assert_eq!(mean_absolute_error(&[]), None);
    }

    #[test]
    fn matches_by_image_then_timestamp() {
        let csv = "image,timestamp,true_count\n\
                   a.jpg,,3\n\
                   ,2024-05-01 10:05,4\n\
                   ,2024-05-01 10:10,2\n\
                   zzz.jpg,,7\n";
        let truth = GroundTruth::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(truth.len(), 4);

        let observations = vec![
            obs("a.jpg", Some("2024-05-01 10:00"), 3),
            obs("b.jpg", Some("2024-05-01 10:05"), 5),
            obs("c.jpg", Some("2024-05-01 10:10"), 0),
            obs("d.jpg", None, 9),
        ];
        let report = evaluate(&observations, &truth);

        assert_eq!(report.matched.len(), 3);
        assert_eq!(report.mae, Some(1.0));
        assert_eq!(report.unmatched_observations, vec!["d.jpg"]);
        assert_eq!(report.unmatched_truth.len(), 1);
        assert_eq!(report.unmatched_truth[0].image, "zzz.jpg");

        let mut buf = Vec::new();
        report.write_errors_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("image,timestamp,predicted,truth,abs_error\n"));
        assert!(text.contains("b.jpg,2024-05-01 10:05,5,4,1"));
    }

    #[test]
    fn timestamps_match_across_formats() {
        // 标注使用本地时间, 设备写入 RFC 3339
        let csv = "image,timestamp,true_count\n\
                   ,2024-05-01 10:05,4\n\
                   ,2024-05-01T13:10:00Z,1\n\
                   ,lunch,2\n";
        let truth = GroundTruth::from_reader(csv.as_bytes()).unwrap();
        let observations = vec![
            obs("a.jpg", Some("2024-05-01T10:05:00-03:00"), 5),
            obs("b.jpg", Some("2024-05-01T10:10:00-03:00"), 1),
            obs("c.jpg", Some("lunch"), 2),
        ];
        let report = evaluate(&observations, &truth);

        assert_eq!(report.matched.len(), 3);
        assert!(report.unmatched_truth.is_empty());
        assert_eq!(report.matched[0].image, "a.jpg");
        assert_eq!(report.mae, Some(1.0 / 3.0));
    }

    #[test]
    fn nothing_matched_gives_no_mae() {
        let truth = GroundTruth::from_reader("image,timestamp,true_count\nx.jpg,,1\n".as_bytes()).unwrap();
        let report = evaluate(&[obs("a.jpg", None, 2)], &truth);
        assert!(report.matched.is_empty());
        assert_eq!(report.mae, None);
    }

    #[test]
    fn rejects_row_without_key() {
        let err = GroundTruth::from_reader("image,timestamp,true_count\n,,1\n".as_bytes());
        assert!(err.is_err());
        let err = GroundTruth::from_reader("image,timestamp,true_count\na.jpg,,-1\n".as_bytes());
        assert!(err.is_err());
    }
}
