// src/config.rs
//
// abs_monitor.toml：所有字段可选，缺省值叠加在 AppConfig::default() 上

use crate::error::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "abs_monitor.toml";

const SAMPLE_CONFIG: &str = r#"# ABS Monitor 配置文件

# 先解析 mDNS 主机名，失败再用 AP 模式默认地址
mdns_host     = "esp32.local"
fallback_host = "192.168.4.1"
port          = 8080
path          = "/ws"

# 显示缓冲区上限
max_log_lines    = 1000
max_chart_points = 500
max_table_rows   = 100

# 日志目录 / 日志级别（RUST_LOG 优先）
log_folder = "logs"
log_level  = "info"

# 中文字体（可选），例如 "C:/Windows/Fonts/msyh.ttc"
# cjk_font = ""
"#;

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    mdns_host: Option<String>,
    fallback_host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    max_log_lines: Option<usize>,
    max_chart_points: Option<usize>,
    max_table_rows: Option<usize>,
    log_folder: Option<String>,
    log_level: Option<String>,
    cjk_font: Option<String>,
}

/// 连接参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetConfig {
    pub mdns_host: String,
    pub fallback_host: String,
    pub port: u16,
    pub path: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            mdns_host: "esp32.local".to_string(),
            fallback_host: "192.168.4.1".to_string(),
            port: 8080,
            path: "/ws".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub net: NetConfig,
    pub max_log_lines: usize,
    pub max_chart_points: usize,
    pub max_table_rows: usize,
    pub log_folder: String,
    pub log_level: String,
    pub cjk_font: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            net: NetConfig::default(),
            max_log_lines: 1000,
            max_chart_points: 500,
            max_table_rows: 100,
            log_folder: "logs".to_string(),
            log_level: "info".to_string(),
            cjk_font: None,
        }
    }
}

impl AppConfig {
    /// 读取工作目录下的配置；任何问题都退回默认值。
    /// 这时日志系统还没初始化（级别来自配置），所以直接打到终端。
    pub fn load() -> Self {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            let _ = fs::write(path, SAMPLE_CONFIG);
            println!("[CFG] 未找到 {}，已生成示例配置文件，使用默认。", path.display());
            return AppConfig::default();
        }

        let content = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("[CFG] 读取 {} 失败: {:?}，使用默认。", path.display(), e);
                return AppConfig::default();
            }
        };

        match Self::from_toml_str(&content) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("[CFG] 解析 {} 失败: {}，使用默认。", path.display(), e);
                AppConfig::default()
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)?;

        let mut cfg = AppConfig::default();
        if let Some(h) = raw.mdns_host {
            cfg.net.mdns_host = h;
        }
        if let Some(h) = raw.fallback_host {
            cfg.net.fallback_host = h;
        }
        if let Some(p) = raw.port {
            cfg.net.port = p;
        }
        if let Some(p) = raw.path {
            cfg.net.path = p;
        }
        if let Some(n) = raw.max_log_lines {
            cfg.max_log_lines = n;
        }
        if let Some(n) = raw.max_chart_points {
            cfg.max_chart_points = n;
        }
        if let Some(n) = raw.max_table_rows {
            cfg.max_table_rows = n;
        }
        if let Some(f) = raw.log_folder {
            cfg.log_folder = f;
        }
        if let Some(l) = raw.log_level {
            cfg.log_level = l;
        }
        cfg.cjk_font = raw.cjk_font.filter(|f| !f.trim().is_empty());
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;

    #[test]
    fn sample_config_matches_defaults() {
        let cfg = AppConfig::from_toml_str(SAMPLE_CONFIG).unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn partial_config_overrides_only_given_fields() {
        let cfg = AppConfig::from_toml_str(
            r#"
fallback_host = "10.0.0.7"
port = 9000
max_table_rows = 20
cjk_font = "/usr/share/fonts/noto/NotoSansCJK-Regular.ttc"
"#,
        )
        .unwrap();
        assert_eq!(cfg.net.mdns_host, "esp32.local");
        assert_eq!(cfg.net.fallback_host, "10.0.0.7");
        assert_eq!(cfg.net.port, 9000);
        assert_eq!(cfg.net.path, "/ws");
        assert_eq!(cfg.max_table_rows, 20);
        assert_eq!(cfg.max_chart_points, 500);
        assert!(cfg.cjk_font.is_some());
    }

    #[test]
    fn bad_toml_is_an_error() {
        let err = AppConfig::from_toml_str("port = \"not a number\"").unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[test]
    fn missing_file_writes_sample_and_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        assert_eq!(AppConfig::load_from(&path), AppConfig::default());
        assert!(path.exists());

        fs::write(&path, "port = [").unwrap();
        assert_eq!(AppConfig::load_from(&path), AppConfig::default());

        fs::write(&path, "max_log_lines = 10").unwrap();
        assert_eq!(AppConfig::load_from(&path).max_log_lines, 10);
    }
}
