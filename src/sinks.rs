// src/sinks.rs
//
// 三个显示缓冲区：日志 / 曲线 / 表格
// 全部基于 BoundedSeries：超过容量时每次只从头部挤掉一条（FIFO）

use crate::abs_core::TelemetryRecord;
use crate::error::Result;
use chrono::Local;
use std::collections::VecDeque;
use std::path::Path;

// ================= 通用有界序列 =================

#[derive(Debug, Clone)]
pub struct BoundedSeries<T> {
    items: VecDeque<T>,
    max_len: usize,
}

impl<T> BoundedSeries<T> {
    pub fn new(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            items: VecDeque::with_capacity(max_len),
            max_len,
        }
    }

    /// 追加一条；超出容量时返回被挤掉的最旧一条
    pub fn push(&mut self, item: T) -> Option<T> {
        self.items.push_back(item);
        if self.items.len() > self.max_len {
            self.items.pop_front()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.items.iter()
    }
}

// ================= 导出结果 =================

/// 导出结果：成功 / 失败 + 一句可直接显示的话
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub ok: bool,
    pub message: String,
}

impl ExportReport {
    fn from_result(res: Result<usize>, unit: &str, path: &Path) -> Self {
        match res {
            Ok(n) => Self {
                ok: true,
                message: format!("Exported {} {} to {}", n, unit, path.display()),
            },
            Err(e) => Self {
                ok: false,
                message: format!("Export failed: {}", e),
            },
        }
    }
}

// ================= 日志 =================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stamp: String,
    pub text: String,
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.stamp, self.text)
    }
}

#[derive(Debug, Clone)]
pub struct LogRing {
    lines: BoundedSeries<LogLine>,
}

impl LogRing {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: BoundedSeries::new(max_lines),
        }
    }

    /// 加本地时间戳（毫秒）后入队，返回入队的那一行
    pub fn append(&mut self, text: &str) -> LogLine {
        let line = LogLine {
            stamp: Local::now().format("%H:%M:%S%.3f").to_string(),
            text: text.to_string(),
        };
        self.lines.push(line.clone());
        line
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogLine> + '_ {
        self.lines.iter()
    }
}

// ================= 曲线 =================

pub const CHART_HEADER: [&str; 11] = [
    "Time(s)", "Speed1", "Speed2", "Speed3", "Speed4", "AccelX", "AccelY", "AccelZ", "GyroX",
    "GyroY", "GyroZ",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSample {
    pub t_s: f64,
    pub speed: [i32; 4],
    pub accel: [i32; 3],
    pub gyro: [i32; 3],
}

/// 曲线上的一个通道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Speed(usize),
    Accel(usize),
    Gyro(usize),
}

#[derive(Debug, Clone)]
pub struct ChartSeries {
    samples: BoundedSeries<ChartSample>,
    // 序列为空时收到的第一条记录的时间戳
    origin_ms: Option<u64>,
}

impl ChartSeries {
    pub fn new(max_points: usize) -> Self {
        Self {
            samples: BoundedSeries::new(max_points),
            origin_ms: None,
        }
    }

    pub fn push(&mut self, rec: &TelemetryRecord) {
        if self.samples.is_empty() {
            self.origin_ms = Some(rec.timestamp);
        }
        let origin = self.origin_ms.unwrap_or(rec.timestamp);
        let t_s = (rec.timestamp as f64 - origin as f64) / 1000.0;

        self.samples.push(ChartSample {
            t_s,
            speed: rec.speed,
            accel: rec.accel,
            gyro: rec.gyro,
        });
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.origin_ms = None;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> impl Iterator<Item = &ChartSample> + '_ {
        self.samples.iter()
    }

    /// 单个通道的 [t, value] 点列，给 egui_plot 用；通道号越界时为空
    pub fn channel(&self, ch: Channel) -> Vec<[f64; 2]> {
        self.samples
            .iter()
            .filter_map(|s| {
                let v = match ch {
                    Channel::Speed(i) => s.speed.get(i),
                    Channel::Accel(i) => s.accel.get(i),
                    Channel::Gyro(i) => s.gyro.get(i),
                };
                v.map(|v| [s.t_s, *v as f64])
            })
            .collect()
    }

    pub fn export_csv(&self, path: &Path) -> ExportReport {
        ExportReport::from_result(self.write_csv(path), "samples", path)
    }

    fn write_csv(&self, path: &Path) -> Result<usize> {
        let mut w = csv::Writer::from_path(path)?;
        w.write_record(CHART_HEADER)?;
        for s in self.samples.iter() {
            let mut row = Vec::with_capacity(CHART_HEADER.len());
            row.push(format!("{:.3}", s.t_s));
            row.extend(s.speed.iter().map(|v| v.to_string()));
            row.extend(s.accel.iter().map(|v| v.to_string()));
            row.extend(s.gyro.iter().map(|v| v.to_string()));
            w.write_record(&row)?;
        }
        w.flush()?;
        Ok(self.samples.len())
    }
}

// ================= 表格 =================

pub const TABLE_HEADER: [&str; 13] = [
    "Prefix", "Timestamp", "Speed1", "Speed2", "Speed3", "Speed4", "AccelX", "AccelY", "AccelZ",
    "GyroX", "GyroY", "GyroZ", "Status",
];

#[derive(Debug, Clone)]
pub struct DataTable {
    rows: BoundedSeries<TelemetryRecord>,
}

impl DataTable {
    pub fn new(max_rows: usize) -> Self {
        Self {
            rows: BoundedSeries::new(max_rows),
        }
    }

    pub fn push(&mut self, rec: TelemetryRecord) {
        self.rows.push(rec);
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.rows.iter()
    }

    /// 一行记录转成 13 列文本（表格显示和导出共用）
    pub fn cells(rec: &TelemetryRecord) -> Vec<String> {
        let mut cells = Vec::with_capacity(TABLE_HEADER.len());
        cells.push(rec.prefix.clone());
        cells.push(rec.timestamp.to_string());
        cells.extend(rec.speed.iter().map(|v| v.to_string()));
        cells.extend(rec.accel.iter().map(|v| v.to_string()));
        cells.extend(rec.gyro.iter().map(|v| v.to_string()));
        cells.push(rec.status.to_string());
        cells
    }

    pub fn export_csv(&self, path: &Path) -> ExportReport {
        ExportReport::from_result(self.write_csv(path), "rows", path)
    }

    fn write_csv(&self, path: &Path) -> Result<usize> {
        let mut w = csv::Writer::from_path(path)?;
        w.write_record(TABLE_HEADER)?;
        for rec in self.rows.iter() {
            w.write_record(Self::cells(rec))?;
        }
        w.flush()?;
        Ok(self.rows.len())
    }
}
