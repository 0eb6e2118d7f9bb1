// src/state.rs
//
// GUI 线程持有的全部应用状态。IO 线程只通过 WsEvent 间接修改它，
// 每帧由 dispatch 按到达顺序逐条处理。

use crate::abs_core::{PrefixKind, TelemetryRecord};
use crate::config::AppConfig;
use crate::journal::Journal;
use crate::sinks::{ChartSeries, DataTable, LogRing};
use crate::ws_client::{ConnectionStatus, WsEvent};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tab {
    Log,
    Chart,
    Table,
}

// ================= 帧率 =================

#[derive(Debug)]
pub struct FrameCounter {
    count: u32,
    since: Instant,
    fps: f64,
}

impl FrameCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            since: now,
            fps: 0.0,
        }
    }

    pub fn tick(&mut self) {
        self.count += 1;
    }

    /// 满 1 秒结算一次
    pub fn poll(&mut self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.since);
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.count as f64 / elapsed.as_secs_f64();
            self.count = 0;
            self.since = now;
        }
        self.fps
    }

    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

// ================= 应用状态 =================

pub struct MonitorState {
    pub status: ConnectionStatus,
    pub status_text: String,
    pub log: LogRing,
    pub chart: ChartSeries,
    pub table: DataTable,
    pub frames: FrameCounter,
    pub tab: Tab,
    /// 用户手动切过选项卡后不再自动跳
    pub tab_lock: bool,
    journal: Option<Journal>,
}

impl MonitorState {
    pub fn new(cfg: &AppConfig, journal: Option<Journal>) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            status_text: "Not connected".to_string(),
            log: LogRing::new(cfg.max_log_lines),
            chart: ChartSeries::new(cfg.max_chart_points),
            table: DataTable::new(cfg.max_table_rows),
            frames: FrameCounter::new(Instant::now()),
            tab: Tab::Log,
            tab_lock: false,
            journal,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn append_log(&mut self, text: &str) {
        let line = self.log.append(text);
        if let Some(journal) = self.journal.as_mut() {
            journal.write_line(&line);
        }
    }

    pub fn dispatch(&mut self, event: WsEvent) {
        match event {
            WsEvent::Log(text) => self.append_log(&text),
            WsEvent::Connected(url) => {
                self.status = ConnectionStatus::Connected;
                let text = format!("Connected: {}", url);
                self.append_log(&text);
                self.status_text = text;
            }
            WsEvent::Disconnected(reason) => {
                self.mark_disconnected(&reason);
                self.append_log("Disconnected, press \"Connect\" to reconnect");
            }
            WsEvent::Record(rec) => self.process_record(rec),
        }
    }

    pub fn mark_connecting(&mut self) {
        self.status = ConnectionStatus::Connecting;
        self.status_text = "Connecting...".to_string();
    }

    pub fn mark_disconnected(&mut self, reason: &str) {
        self.status = ConnectionStatus::Disconnected;
        self.status_text = reason.to_string();
        self.frames.reset(Instant::now());
    }

    fn process_record(&mut self, rec: TelemetryRecord) {
        self.frames.tick();
        self.chart.push(&rec);

        let kind = rec.kind();
        self.table.push(rec);

        if !self.tab_lock {
            match kind {
                PrefixKind::Realtime => self.tab = Tab::Chart,
                PrefixKind::History => self.tab = Tab::Table,
                PrefixKind::Other => {}
            }
        }
    }

    /// 用户手动选择选项卡
    pub fn select_tab(&mut self, tab: Tab) {
        self.tab = tab;
        if !self.tab_lock {
            self.tab_lock = true;
            self.append_log("Tab locked, data keeps updating in background");
        }
    }

    pub fn clear_all(&mut self) {
        self.chart.clear();
        self.table.clear();
        self.log.clear();
        self.frames.reset(Instant::now());
        self.append_log("All display data cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abs_core::parse_line;

    fn state() -> MonitorState {
        MonitorState::new(&AppConfig::default(), None)
    }

    fn record(prefix: &str, ts: u64) -> WsEvent {
        let line = format!("{} T={},SPD=1,2,3,4,ACC=5,6,7,GYRO=8,9,10,S=0", prefix, ts);
        WsEvent::Record(parse_line(&line).unwrap())
    }

    #[test]
    fn records_fan_out_in_arrival_order() {
        let mut st = state();
        for ts in [100, 200, 300] {
            st.dispatch(record("X", ts));
        }
        assert_eq!(st.chart.len(), 3);
        let ts: Vec<u64> = st.table.rows().map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![100, 200, 300]);
        let t_s: Vec<f64> = st.chart.samples().map(|s| s.t_s).collect();
        assert_eq!(t_s, vec![0.0, 0.1, 0.2]);
    }

    #[test]
    fn log_events_do_not_touch_data_sinks() {
        let mut st = state();
        st.dispatch(WsEvent::Log("RX: FLASH OK".to_string()));
        assert_eq!(st.log.len(), 1);
        assert_eq!(st.chart.len(), 0);
        assert_eq!(st.table.len(), 0);
    }

    #[test]
    fn prefix_switches_tab_until_locked() {
        let mut st = state();
        st.dispatch(record("实时", 1));
        assert_eq!(st.tab, Tab::Chart);
        st.dispatch(record("历史", 2));
        assert_eq!(st.tab, Tab::Table);
        st.dispatch(record("other", 3));
        assert_eq!(st.tab, Tab::Table);

        st.select_tab(Tab::Log);
        assert!(st.tab_lock);
        st.dispatch(record("实时", 4));
        assert_eq!(st.tab, Tab::Log);
    }

    #[test]
    fn connection_events_update_status() {
        let mut st = state();
        st.mark_connecting();
        assert_eq!(st.status, ConnectionStatus::Connecting);

        st.dispatch(WsEvent::Connected("ws://192.168.4.1:8080/ws".to_string()));
        assert!(st.is_connected());
        assert!(st.status_text.contains("192.168.4.1"));

        st.dispatch(record("X", 1));
        st.dispatch(WsEvent::Disconnected("Connection closed".to_string()));
        assert!(!st.is_connected());
        assert_eq!(st.status_text, "Connection closed");
        assert_eq!(st.frames.fps(), 0.0);
        // 断开后数据保留
        assert_eq!(st.table.len(), 1);
    }

    #[test]
    fn clear_all_empties_sinks_and_logs_notice() {
        let mut st = state();
        st.dispatch(record("X", 1));
        st.dispatch(WsEvent::Log("hello".to_string()));
        st.clear_all();
        assert_eq!(st.chart.len(), 0);
        assert_eq!(st.table.len(), 0);
        assert_eq!(st.log.len(), 1);
        assert_eq!(st.log.iter().next().unwrap().text, "All display data cleared");
    }

    #[test]
    fn frame_counter_settles_every_second() {
        let t0 = Instant::now();
        let mut fc = FrameCounter::new(t0);
        for _ in 0..25 {
            fc.tick();
        }
        assert_eq!(fc.poll(t0 + Duration::from_millis(500)), 0.0);
        let fps = fc.poll(t0 + Duration::from_millis(2500));
        assert!((fps - 10.0).abs() < 1e-9);
        // 计数已清零，下一秒没有新帧
        assert_eq!(fc.poll(t0 + Duration::from_millis(3500)), 0.0);
    }
}
