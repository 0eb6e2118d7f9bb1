// src/main.rs
//
// ABS MONITOR - Rust GUI
//
// WebSocket 连接 ESP32 上的 ABS 控制器，解析遥测行，
// 以日志 / 曲线 / 表格显示，并可导出 CSV。

mod abs_core;
mod app;
mod config;
mod error;
mod journal;
mod sinks;
mod state;
mod ws_client;

use crate::app::AbsApp;
use crate::config::AppConfig;
use eframe::{egui, NativeOptions};
use log::info;

// ================= main =================

fn main() -> eframe::Result<()> {
    let cfg = AppConfig::load();

    // RUST_LOG 优先于配置里的 log_level
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cfg.log_level.as_str()),
    )
    .init();

    info!(
        "[CFG] 使用配置: host={} fallback={} port={} path={} log_folder={}",
        cfg.net.mdns_host, cfg.net.fallback_host, cfg.net.port, cfg.net.path, cfg.log_folder
    );

    let native_options = NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(egui::vec2(1100.0, 800.0))
            .with_min_inner_size(egui::vec2(800.0, 600.0))
            .with_title("ABS CONTROL MONITOR - Rust GUI"),
        ..Default::default()
    };

    eframe::run_native(
        "abs_monitor_gui",
        native_options,
        Box::new(move |cc| Ok(Box::new(AbsApp::new(cc, cfg)))),
    )
}
