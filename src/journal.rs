// src/journal.rs
//
// 控制台日志落盘：<log_folder>/YYYY-MM-DD.txt，跨天自动换文件

use crate::sinks::LogLine;
use chrono::Local;
use log::{info, warn};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Journal {
    base_folder: PathBuf,
    current_date: String,
    file: Option<File>,
}

impl Journal {
    pub fn new(base_folder: &str) -> Self {
        let date = today();
        let base_folder = PathBuf::from(base_folder);
        let file = Self::open_file_for_date(&base_folder, &date);
        Self {
            base_folder,
            current_date: date,
            file,
        }
    }

    fn rotate_if_needed(&mut self) {
        let today = today();
        if today != self.current_date {
            self.file = Self::open_file_for_date(&self.base_folder, &today);
            self.current_date = today;
        }
    }

    fn open_file_for_date(base_folder: &Path, date_str: &str) -> Option<File> {
        if let Err(e) = create_dir_all(base_folder) {
            warn!("[LOG] 创建日志目录失败: {:?}", e);
            return None;
        }

        let path = base_folder.join(format!("{}.txt", date_str));
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => {
                info!("[LOG] 当前日志文件: {}", path.display());
                Some(f)
            }
            Err(e) => {
                warn!("[LOG] 打开日志文件失败: {:?}", e);
                None
            }
        }
    }

    pub fn write_line(&mut self, line: &LogLine) {
        self.rotate_if_needed();

        let Some(file) = self.file.as_mut() else {
            return;
        };

        let text = format!("{}\r\n", line);
        if let Err(e) = file.write_all(text.as_bytes()) {
            warn!("[LOG] 写入日志失败: {:?}", e);
        } else {
            let _ = file.flush();
        }
    }
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn appends_lines_to_daily_file() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("logs");
        let mut journal = Journal::new(folder.to_str().unwrap());

        for text in ["Connected", "RX: hello"] {
            journal.write_line(&LogLine {
                stamp: "12:00:00.000".to_string(),
                text: text.to_string(),
            });
        }

        let path = folder.join(format!("{}.txt", today()));
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(
            content,
            "[12:00:00.000] Connected\r\n[12:00:00.000] RX: hello\r\n"
        );
    }
}
