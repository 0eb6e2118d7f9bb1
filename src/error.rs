// src/error.rs
//
// 统一错误类型：GUI 边界处全部转成状态文字 / 日志行，不会让进程退出

use std::io;

#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    #[error("cannot resolve {host} or fallback {fallback}")]
    Resolve { host: String, fallback: String },
    #[error("TCP connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),
    #[error("Not connected")]
    NotConnected,
    #[error("socket error: {0}")]
    Socket(#[from] tungstenite::Error),
    #[error("{0}")]
    InvalidInput(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
