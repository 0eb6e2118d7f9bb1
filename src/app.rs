// src/app.rs
//
// ABS MONITOR - eframe 界面
//
// 顶部：标题 + Logs... / 📌TOP
//       连接行：状态 LED + 状态文字 + 帧率 + Connect / Disconnect
//       模式按钮、Flash 操作、命令输入
// 中间：Log / Chart / Table 三个选项卡

use crate::abs_core::{DeviceCommand, PrefixKind};
use crate::config::AppConfig;
use crate::error::Result;
use crate::journal::Journal;
use crate::sinks::{Channel, DataTable, TABLE_HEADER};
use crate::state::{MonitorState, Tab};
use crate::ws_client::{ConnectionStatus, WsClient};
use chrono::{DateTime, Local};
use eframe::egui;
use egui::viewport::{ViewportCommand, WindowLevel};
use egui::{Align, Color32, FontFamily, FontId, Layout, TextStyle};
use egui_plot::{Legend, Line, Plot, PlotPoints};
use log::{info, warn};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct AbsApp {
    cfg: AppConfig,
    state: MonitorState,
    client: Option<WsClient>,

    cmd_text: String,
    read_index_text: String,
    read_count_text: String,

    start_time: Instant,
    always_on_top: bool,
}

impl AbsApp {
    pub fn new(cc: &eframe::CreationContext<'_>, cfg: AppConfig) -> Self {
        let ctx = &cc.egui_ctx;
        ctx.set_visuals(egui::Visuals::light());

        let mut style = (*ctx.style()).clone();
        style.text_styles.insert(
            TextStyle::Body,
            FontId::new(15.0, FontFamily::Proportional),
        );
        style.text_styles.insert(
            TextStyle::Heading,
            FontId::new(22.0, FontFamily::Proportional),
        );
        ctx.set_style(style);

        if let Some(path) = cfg.cjk_font.as_deref() {
            match install_cjk_font(ctx, path) {
                Ok(()) => info!("[UI] 已加载中文字体: {}", path),
                Err(e) => warn!("[UI] 加载中文字体 {} 失败: {}", path, e),
            }
        }

        let journal = Journal::new(&cfg.log_folder);
        Self {
            state: MonitorState::new(&cfg, Some(journal)),
            cfg,
            client: None,
            cmd_text: String::new(),
            read_index_text: String::new(),
            read_count_text: String::new(),
            start_time: Instant::now(),
            always_on_top: false,
        }
    }

    // ----------------- 连接 -----------------

    fn connect(&mut self, ctx: &egui::Context) {
        // 旧连接整体替换
        if let Some(mut old) = self.client.take() {
            old.close();
            self.state.append_log("Connection state reset");
        }

        self.state.mark_connecting();
        let repaint = ctx.clone();
        self.client = Some(WsClient::connect(self.cfg.net.clone(), move || {
            repaint.request_repaint()
        }));
    }

    fn disconnect(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.close();
            self.state.append_log("Disconnected by user");
        }
        self.state.mark_disconnected("Disconnected");
    }

    fn poll_events(&mut self) {
        let Some(client) = self.client.as_mut() else {
            return;
        };
        for ev in client.drain() {
            self.state.dispatch(ev);
        }
        // IO 线程意外退出、没来得及报 Disconnected
        if client.status() == ConnectionStatus::Disconnected
            && self.state.status != ConnectionStatus::Disconnected
        {
            self.state.mark_disconnected("Connection lost");
        }
    }

    // ----------------- 命令 -----------------

    fn send_command(&mut self, cmd: DeviceCommand) {
        let Some(client) = self.client.as_ref() else {
            self.state.append_log("Not connected");
            return;
        };
        if let Err(e) = client.send(&cmd.wire()) {
            self.state.append_log(&e.to_string());
            return;
        }
        if matches!(
            cmd,
            DeviceCommand::ModeDefault | DeviceCommand::ModeRealtime | DeviceCommand::ModeHistory
        ) {
            self.state
                .append_log(&format!("Switching to {}", cmd.wire()));
        }
        if cmd.unlocks_tab() {
            self.state.tab_lock = false;
        }
    }

    fn send_flash_read(&mut self) {
        match DeviceCommand::flash_read(&self.read_index_text, &self.read_count_text) {
            Ok(cmd) => self.send_command(cmd),
            Err(e) => self.state.append_log(&e.to_string()),
        }
    }

    fn send_raw(&mut self) {
        let text = std::mem::take(&mut self.cmd_text);
        self.send_command(DeviceCommand::Raw(text));
    }

    // ----------------- 导出 -----------------

    fn export(&mut self) {
        // 日志页默认导出曲线数据
        let kind = match self.state.tab {
            Tab::Table => ExportKind::Table,
            Tab::Log | Tab::Chart => ExportKind::Chart,
        };

        let picked = rfd::FileDialog::new()
            .set_title(kind.title())
            .set_file_name(default_export_name(kind, Local::now()))
            .add_filter("CSV", &["csv"])
            .save_file();
        let Some(path) = picked else {
            return;
        };
        let path = ensure_csv_extension(path);

        let report = match kind {
            ExportKind::Chart => self.state.chart.export_csv(&path),
            ExportKind::Table => self.state.table.export_csv(&path),
        };
        if report.ok {
            info!("[EXPORT] {}", report.message);
        } else {
            warn!("[EXPORT] {}", report.message);
        }
        self.state.append_log(&report.message);
    }

    fn open_logs_folder(&self) {
        let folder = self.cfg.log_folder.clone();

        #[cfg(target_os = "windows")]
        {
            let _ = Command::new("explorer").arg(folder).spawn();
        }
        #[cfg(target_os = "linux")]
        {
            let _ = Command::new("xdg-open").arg(folder).spawn();
        }
        #[cfg(target_os = "macos")]
        {
            let _ = Command::new("open").arg(folder).spawn();
        }
    }

    // ----------------- 绘制 -----------------

    // 连接状态小灯：连接中闪烁，已连接常亮
    fn draw_status_led(&self, ui: &mut egui::Ui) {
        let size = 14.0;
        let blink = (self.start_time.elapsed().as_millis() / 500) % 2 == 0;
        let color = match self.state.status {
            ConnectionStatus::Connected => Color32::from_rgb(50, 220, 120),
            ConnectionStatus::Connecting if blink => Color32::from_rgb(255, 200, 60),
            _ => Color32::from_gray(150),
        };

        let (rect, _) = ui.allocate_exact_size(egui::vec2(size, size), egui::Sense::hover());
        ui.painter().circle_filled(rect.center(), size / 2.0, color);
    }

    fn ui_top_bar(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let connected = self.state.is_connected();

        // 行1：标题 + Logs / TOP
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("ABS CONTROL MONITOR").size(24.0).strong());

            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                if ui.button("Logs...").clicked() {
                    self.open_logs_folder();
                }

                ui.add_space(6.0);

                let top_fill = if self.always_on_top {
                    Color32::from_rgb(255, 210, 80)
                } else {
                    Color32::from_gray(200)
                };
                let top_btn = egui::Button::new(
                    egui::RichText::new("📌 TOP").strong().color(Color32::BLACK),
                )
                .fill(top_fill);
                if ui.add(top_btn).clicked() {
                    self.always_on_top = !self.always_on_top;
                    let level = if self.always_on_top {
                        WindowLevel::AlwaysOnTop
                    } else {
                        WindowLevel::Normal
                    };
                    ctx.send_viewport_cmd(ViewportCommand::WindowLevel(level));
                }
            });
        });

        ui.add_space(4.0);

        // 行2：连接
        ui.horizontal(|ui| {
            self.draw_status_led(ui);
            ui.label(egui::RichText::new(&self.state.status_text).strong());
            ui.add_space(12.0);
            let fps = self.state.frames.poll(Instant::now());
            ui.label(egui::RichText::new(format!("Rate: {:.1} fps", fps)).monospace());

            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                let idle = self.state.status == ConnectionStatus::Disconnected;
                let disc_btn = egui::Button::new(
                    egui::RichText::new("Disconnect").strong().color(Color32::BLACK),
                )
                .fill(Color32::from_rgb(220, 80, 80));
                if ui.add_enabled(!idle, disc_btn).clicked() {
                    self.disconnect();
                }
                let conn_btn = egui::Button::new(
                    egui::RichText::new("Connect").strong().color(Color32::BLACK),
                )
                .fill(Color32::from_rgb(80, 200, 120));
                if ui.add_enabled(idle, conn_btn).clicked() {
                    self.connect(ctx);
                }
            });
        });

        ui.add_space(4.0);

        // 行3：工作模式
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("Mode:").strong());
            if ui.add_enabled(connected, egui::Button::new("Default")).clicked() {
                self.send_command(DeviceCommand::ModeDefault);
            }
            if ui.add_enabled(connected, egui::Button::new("Realtime")).clicked() {
                self.send_command(DeviceCommand::ModeRealtime);
            }
            if ui.add_enabled(connected, egui::Button::new("History")).clicked() {
                self.send_command(DeviceCommand::ModeHistory);
            }
        });

        // 行4：Flash 操作
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("Flash:").strong());
            if ui.add_enabled(connected, egui::Button::new("Info")).clicked() {
                self.send_command(DeviceCommand::FlashInfo);
            }
            if ui.add_enabled(connected, egui::Button::new("Read")).clicked() {
                self.send_flash_read();
            }
            ui.add(
                egui::TextEdit::singleline(&mut self.read_index_text)
                    .hint_text("Index")
                    .desired_width(60.0),
            );
            ui.add(
                egui::TextEdit::singleline(&mut self.read_count_text)
                    .hint_text("Count")
                    .desired_width(60.0),
            );
            if ui.add_enabled(connected, egui::Button::new("Erase")).clicked() {
                self.send_command(DeviceCommand::FlashErase);
            }

            ui.add_space(16.0);
            if ui.button("Clear").clicked() {
                self.state.clear_all();
            }
            if ui.button("Export...").clicked() {
                self.export();
            }
        });

        // 行5：命令输入
        ui.horizontal(|ui| {
            let resp = ui.add(
                egui::TextEdit::singleline(&mut self.cmd_text)
                    .hint_text("Command to send")
                    .desired_width(360.0),
            );
            let enter = resp.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            let clicked = ui.add_enabled(connected, egui::Button::new("Send")).clicked();
            if clicked || (enter && connected) {
                self.send_raw();
            }
        });
    }

    fn ui_log(&self, ui: &mut egui::Ui) {
        egui::Frame::new()
            .fill(Color32::from_rgb(245, 247, 250))
            .inner_margin(egui::Margin::symmetric(8, 4))
            .show(ui, |ui| {
                egui::ScrollArea::vertical()
                    .stick_to_bottom(true)
                    .auto_shrink([false; 2])
                    .show(ui, |ui| {
                        for line in self.state.log.iter() {
                            // 失败红，断开橙，其他灰
                            let color = if line.text.contains("failed")
                                || line.text.starts_with("Error")
                            {
                                Color32::from_rgb(220, 60, 60)
                            } else if line.text.starts_with("Disconnected")
                                || line.text.starts_with("Connection")
                            {
                                Color32::from_rgb(230, 150, 40)
                            } else {
                                Color32::from_gray(30)
                            };
                            ui.label(
                                egui::RichText::new(line.to_string())
                                    .monospace()
                                    .color(color),
                            );
                        }
                    });
            });
    }

    fn ui_chart(&self, ui: &mut egui::Ui) {
        let height = ((ui.available_height() - 80.0) / 3.0).max(120.0);
        let chart = &self.state.chart;

        let groups: [(&str, &str, Vec<(Channel, &str)>); 3] = [
            (
                "speed_plot",
                "Wheel speed",
                (0..4)
                    .map(|i| (Channel::Speed(i), ["Wheel 1", "Wheel 2", "Wheel 3", "Wheel 4"][i]))
                    .collect(),
            ),
            (
                "accel_plot",
                "Acceleration",
                (0..3)
                    .map(|i| (Channel::Accel(i), ["Accel X", "Accel Y", "Accel Z"][i]))
                    .collect(),
            ),
            (
                "gyro_plot",
                "Angular rate",
                (0..3)
                    .map(|i| (Channel::Gyro(i), ["Gyro X", "Gyro Y", "Gyro Z"][i]))
                    .collect(),
            ),
        ];

        egui::ScrollArea::vertical().show(ui, |ui| {
            for (id, title, channels) in groups {
                ui.label(egui::RichText::new(title).strong());
                Plot::new(id)
                    .height(height)
                    .legend(Legend::default())
                    .x_axis_label("Time (s)")
                    .show(ui, |plot_ui| {
                        for (ch, name) in channels {
                            let points: PlotPoints = chart.channel(ch).into();
                            plot_ui.line(Line::new(name, points).width(1.5));
                        }
                    });
                ui.add_space(6.0);
            }
        });
    }

    fn ui_table(&self, ui: &mut egui::Ui) {
        egui::ScrollArea::both()
            .stick_to_bottom(true)
            .auto_shrink([false; 2])
            .show(ui, |ui| {
                egui::Grid::new("data_table")
                    .min_col_width(56.0)
                    .spacing([10.0, 2.0])
                    .show(ui, |ui| {
                        for h in TABLE_HEADER {
                            ui.label(egui::RichText::new(h).strong());
                        }
                        ui.end_row();

                        for rec in self.state.table.rows() {
                            let bg = row_color(rec.kind());
                            for cell in DataTable::cells(rec) {
                                ui.label(
                                    egui::RichText::new(cell)
                                        .monospace()
                                        .background_color(bg),
                                );
                            }
                            ui.end_row();
                        }
                    });
            });
    }
}

impl eframe::App for AbsApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // 1. 先收后台数据
        self.poll_events();
        ctx.request_repaint_after(Duration::from_millis(50));

        // 2. 顶部
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            self.ui_top_bar(ui, ctx);
            ui.add_space(4.0);
        });

        // 3. 中间选项卡
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal(|ui| {
                for (tab, label) in [(Tab::Log, "Log"), (Tab::Chart, "Chart"), (Tab::Table, "Table")] {
                    if ui.selectable_label(self.state.tab == tab, label).clicked() {
                        self.state.select_tab(tab);
                    }
                }
                ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                    ui.label(format!(
                        "{} samples / {} rows",
                        self.state.chart.len(),
                        self.state.table.len()
                    ));
                });
            });
            ui.separator();

            match self.state.tab {
                Tab::Log => self.ui_log(ui),
                Tab::Chart => self.ui_chart(ui),
                Tab::Table => self.ui_table(ui),
            }
        });
    }
}

// ----------------- 工具函数 -----------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExportKind {
    Chart,
    Table,
}

impl ExportKind {
    fn title(self) -> &'static str {
        match self {
            ExportKind::Chart => "Export chart data",
            ExportKind::Table => "Export table data",
        }
    }
}

fn default_export_name(kind: ExportKind, now: DateTime<Local>) -> String {
    let stem = match kind {
        ExportKind::Chart => "chart_data",
        ExportKind::Table => "table_data",
    };
    format!("{}_{}.csv", stem, now.format("%Y%m%d_%H%M%S"))
}

fn ensure_csv_extension(path: PathBuf) -> PathBuf {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        return path;
    }
    let mut s = path.into_os_string();
    s.push(".csv");
    PathBuf::from(s)
}

fn row_color(kind: PrefixKind) -> Color32 {
    match kind {
        PrefixKind::Realtime => Color32::from_rgb(220, 255, 220),
        PrefixKind::History => Color32::from_rgb(220, 220, 255),
        PrefixKind::Other => Color32::from_rgb(255, 255, 220),
    }
}

fn install_cjk_font(ctx: &egui::Context, path: &str) -> Result<()> {
    let bytes = fs::read(path)?;
    let mut fonts = egui::FontDefinitions::default();
    fonts
        .font_data
        .insert("cjk".to_owned(), Arc::new(egui::FontData::from_owned(bytes)));
    for family in [FontFamily::Proportional, FontFamily::Monospace] {
        fonts.families.entry(family).or_default().push("cjk".to_owned());
    }
    ctx.set_fonts(fonts);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn export_names_carry_timestamp() {
        let now = Local.with_ymd_and_hms(2026, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            default_export_name(ExportKind::Chart, now),
            "chart_data_20260309_140507.csv"
        );
        assert_eq!(
            default_export_name(ExportKind::Table, now),
            "table_data_20260309_140507.csv"
        );
    }

    #[test]
    fn csv_extension_is_appended_when_missing() {
        assert_eq!(
            ensure_csv_extension(PathBuf::from("/tmp/out")),
            PathBuf::from("/tmp/out.csv")
        );
        assert_eq!(
            ensure_csv_extension(PathBuf::from("/tmp/out.txt")),
            PathBuf::from("/tmp/out.txt.csv")
        );
        assert_eq!(
            ensure_csv_extension(PathBuf::from("/tmp/OUT.CSV")),
            PathBuf::from("/tmp/OUT.CSV")
        );
    }

    #[test]
    fn rows_are_coloured_by_prefix() {
        assert_ne!(row_color(PrefixKind::Realtime), row_color(PrefixKind::History));
        assert_eq!(row_color(PrefixKind::Other), Color32::from_rgb(255, 255, 220));
    }
}
