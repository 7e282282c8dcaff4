// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 电池电压时间序列: 按采集时间排序, 最小二乘估计每小时压降

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};

use crate::store::Observation;

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Debug, Clone, PartialEq)]
pub struct VoltagePoint {
    pub time: DateTime<FixedOffset>,
    pub volts: f64,
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoltageSeries {
    points: Vec<VoltagePoint>,
}

/// RFC 3339, 或不带时区的本地时间 (按站点时区解释)
pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t);
    }
    let site = FixedOffset::east_opt(crate::SITE_UTC_OFFSET_SECS)?;
    NAIVE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .and_then(|naive| site.from_local_datetime(&naive).single())
}

impl VoltageSeries {
    /// 只保留有电压读数且时间可解析的记录; 优先使用设备采集时间, 否则用执行时间
    pub fn from_observations(observations: &[Observation]) -> Self {
        let mut points: Vec<VoltagePoint> = observations
            .iter()
            .filter_map(|o| {
                let volts = o.battery?;
                let time = o
                    .image_time
                    .as_deref()
                    .and_then(parse_timestamp)
                    .or_else(|| parse_timestamp(&o.run_time));
                match time {
                    Some(time) => Some(VoltagePoint {
                        time,
                        volts,
                        image: o.image.clone(),
                    }),
                    None => {
                        tracing::debug!(image = %o.image, "unparsable timestamp, skipped");
                        None
                    }
                }
            })
            .collect();
        points.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.image.cmp(&b.image)));
        Self { points }
    }

    pub fn points(&self) -> &[VoltagePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 电压对时间 (小时) 的最小二乘斜率, 单位 V/h; 少于两个点或时间全相同时为 None
    pub fn decay_per_hour(&self) -> Option<f64> {
        let first = self.points.first()?;
        if self.points.len() < 2 {
            return None;
        }
        let xs: Vec<f64> = self
            .points
            .iter()
            .map(|p| (p.time - first.time).num_milliseconds() as f64 / 3_600_000.0)
            .collect();
        let n = xs.len() as f64;
        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = self.points.iter().map(|p| p.volts).sum::<f64>() / n;

        let (mut sxy, mut sxx) = (0.0, 0.0);
        for (x, p) in xs.iter().zip(&self.points) {
            sxy += (x - mean_x) * (p.volts - mean_y);
            sxx += (x - mean_x) * (x - mean_x);
        }
        if sxx == 0.0 {
            return None;
        }
        Some(sxy / sxx)
    }

    /// `time,volts,image`, 供外部绘图
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(["time", "volts", "image"])?;
        for p in &self.points {
            wtr.write_record([p.time.to_rfc3339(), p.volts.to_string(), p.image.clone()])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(image: &str, time: Option<&str>, battery: Option<f64>) -> Observation {
        Observation {
            image: image.to_string(),
            output_key: None,
            person_count: 0,
            battery,
            image_time: time.map(str::to_string),
            run_time: "2024-05-02T00:00:00-03:00".to_string(),
        }
    }

    #[test]
    fn sorted_by_time_and_linear_decay() {
        let series = VoltageSeries::from_observations(&[
            obs("c.jpg", Some("2024-05-01 12:00:00"), Some(3.8)),
            obs("a.jpg", Some("2024-05-01T10:00:00-03:00"), Some(4.0)),
            obs("b.jpg", Some("2024-05-01 11:00"), Some(3.9)),
            obs("x.jpg", Some("2024-05-01 11:30"), None),
        ]);
        let images: Vec<&str> = series.points().iter().map(|p| p.image.as_str()).collect();
        assert_eq!(images, vec!["a.jpg", "b.jpg", "c.jpg"]);

        let slope = series.decay_per_hour().unwrap();
        assert!((slope + 0.1).abs() < 1e-9, "slope = {slope}");

        let mut buf = Vec::new();
        series.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.lines().nth(1).unwrap().starts_with("2024-05-01T10:00:00-03:00,4,a.jpg"));
    }

    #[test]
    fn falls_back_to_run_time() {
        let series = VoltageSeries::from_observations(&[obs("a.jpg", Some("garbage"), Some(3.7))]);
        assert_eq!(series.len(), 1);
        assert_eq!(series.points()[0].time.to_rfc3339(), "2024-05-02T00:00:00-03:00");
        assert_eq!(series.decay_per_hour(), None);
    }
}
