// src/abs_core.rs
//
// ABS 控制器协议核心：
// - 解析下位机输出的遥测行 `<前缀> T=..,SPD=..,ACC=..,GYRO=..,S=..`
// - 前缀分类（实时 / 历史）
// - 上位机下发命令 MODE_* / FLASH_*

use crate::error::{MonitorError, Result};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

// \w 在 regex crate 中默认支持 Unicode，中文前缀也能匹配
static RECORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\w+)\s+T=(\d+),SPD=(-?\d+),(-?\d+),(-?\d+),(-?\d+),ACC=(-?\d+),(-?\d+),(-?\d+),GYRO=(-?\d+),(-?\d+),(-?\d+),S=(\d+)",
    )
    .expect("Invalid regex")
});

/// 一条解码后的遥测数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub prefix: String,
    pub timestamp: u64,
    pub speed: [i32; 4],
    pub accel: [i32; 3],
    pub gyro: [i32; 3],
    pub status: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixKind {
    Realtime,
    History,
    Other,
}

impl TelemetryRecord {
    pub fn kind(&self) -> PrefixKind {
        PrefixKind::of(&self.prefix)
    }
}

impl PrefixKind {
    pub fn of(prefix: &str) -> Self {
        if prefix.contains("实时") {
            PrefixKind::Realtime
        } else if prefix.contains("历史") {
            PrefixKind::History
        } else {
            PrefixKind::Other
        }
    }
}

// 单个数字字符，用于把 \d 匹配到的非 ASCII 数字换算成数值
static DIGIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d$").expect("Invalid regex"));

/// 解析一行下位机输出；不匹配的行直接丢弃（返回 None）
pub fn parse_line(line: &str) -> Option<TelemetryRecord> {
    let mut matched = false;
    for caps in RECORD_RE.captures_iter(line) {
        matched = true;
        // 某一处字段溢出就接着找后面的
        if let Some(rec) = record_from(&caps) {
            return Some(rec);
        }
    }
    if !matched {
        try_json(line);
    }
    None
}

fn record_from(caps: &regex::Captures<'_>) -> Option<TelemetryRecord> {
    let group = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or_default();
    Some(TelemetryRecord {
        prefix: group(1).to_string(),
        timestamp: parse_int(group(2))?,
        speed: [
            parse_int(group(3))?,
            parse_int(group(4))?,
            parse_int(group(5))?,
            parse_int(group(6))?,
        ],
        accel: [
            parse_int(group(7))?,
            parse_int(group(8))?,
            parse_int(group(9))?,
        ],
        gyro: [
            parse_int(group(10))?,
            parse_int(group(11))?,
            parse_int(group(12))?,
        ],
        status: parse_int(group(13))?,
    })
}

/// 十进制整数，数字可以是任意 Unicode 十进制数字（全角、阿拉伯-印度等）
fn parse_int<T: TryFrom<i128>>(text: &str) -> Option<T> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if digits.is_empty() {
        return None;
    }
    let mut value: i128 = 0;
    for c in digits.chars() {
        value = value
            .checked_mul(10)?
            .checked_add(i128::from(decimal_value(c)?))?;
    }
    if negative {
        value = -value;
    }
    T::try_from(value).ok()
}

// Unicode 的十进制数字总是 0..9 十个一组连续编码，
// 往前找到这一段的起点，再按 10 取余就是数值
fn decimal_value(c: char) -> Option<u32> {
    if let Some(d) = c.to_digit(10) {
        return Some(d);
    }
    let mut buf = [0u8; 4];
    if !DIGIT_RE.is_match(c.encode_utf8(&mut buf)) {
        return None;
    }
    let mut start = c as u32;
    while let Some(prev) = start.checked_sub(1).and_then(char::from_u32) {
        if !DIGIT_RE.is_match(prev.encode_utf8(&mut buf)) {
            break;
        }
        start -= 1;
    }
    Some((c as u32 - start) % 10)
}

// 非数据行：如果像 JSON 对象就试着解一下，只打调试日志
fn try_json(line: &str) {
    if !(line.starts_with('{') && line.ends_with('}')) {
        return;
    }
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(v) => debug!("[PARSE] JSON 解析成功: {}", v),
        Err(e) => debug!("[PARSE] JSON 解析失败: {}", e),
    }
}

// ----------------- 下发命令 -----------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    ModeDefault,
    ModeRealtime,
    ModeHistory,
    FlashInfo,
    FlashErase,
    FlashRead { index: i64, count: i64 },
    Raw(String),
}

impl DeviceCommand {
    /// 索引 / 数量输入框，空白分别视为 0 / 1
    pub fn flash_read(index_text: &str, count_text: &str) -> Result<Self> {
        let index = parse_int_or(index_text, 0)?;
        let count = parse_int_or(count_text, 1)?;
        Ok(DeviceCommand::FlashRead { index, count })
    }

    pub fn wire(&self) -> String {
        match self {
            DeviceCommand::ModeDefault => "MODE_DEFAULT".to_string(),
            DeviceCommand::ModeRealtime => "MODE_REALTIME".to_string(),
            DeviceCommand::ModeHistory => "MODE_HISTORY".to_string(),
            DeviceCommand::FlashInfo => "FLASH_INFO".to_string(),
            DeviceCommand::FlashErase => "FLASH_ERASE".to_string(),
            DeviceCommand::FlashRead { index, count } => format!("FLASH_READ:{},{}", index, count),
            DeviceCommand::Raw(text) => text.clone(),
        }
    }

    /// 模式切换和读 Flash 会解除选项卡锁定
    pub fn unlocks_tab(&self) -> bool {
        matches!(
            self,
            DeviceCommand::ModeDefault
                | DeviceCommand::ModeRealtime
                | DeviceCommand::ModeHistory
                | DeviceCommand::FlashRead { .. }
        )
    }
}

fn parse_int_or(text: &str, default: i64) -> Result<i64> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(default);
    }
    text.parse()
        .map_err(|_| MonitorError::InvalidInput("Index and count must be integers".to_string()))
}
