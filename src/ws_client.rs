// src/ws_client.rs
//
// WebSocket IO 线程：
// - 先解析 mDNS 主机名，失败退回 AP 默认地址
// - 100ms 读超时轮询：下发命令 / 关闭标志 / 收帧
// - 收到的帧在本线程解析成记录，经 mpsc 交给 GUI 线程

use crate::abs_core::{parse_line, TelemetryRecord};
use crate::config::NetConfig;
use crate::error::{MonitorError, Result};
use log::{info, warn};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tungstenite::Message;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const HEX_PREVIEW_BYTES: usize = 20;

/// IO 线程 -> GUI 线程
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    Log(String),
    Connected(String),
    Disconnected(String),
    Record(TelemetryRecord),
}

/// GUI 线程 -> IO 线程
#[derive(Debug)]
enum ClientCommand {
    Send(String),
    Close,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

// ================= 地址解析 =================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub url: String,
    /// 走了哪条路径（给日志看）
    pub note: String,
}

impl Endpoint {
    pub fn discover(net: &NetConfig) -> Result<Self> {
        match resolve(&net.mdns_host, net.port) {
            Ok(addr) => Ok(Self::new(
                addr,
                &net.path,
                format!("Resolved {} -> {}", net.mdns_host, addr.ip()),
            )),
            Err(e) => {
                warn!("[WS] 解析 {} 失败: {}，改用默认地址", net.mdns_host, e);
                let addr = resolve(&net.fallback_host, net.port).map_err(|_| {
                    MonitorError::Resolve {
                        host: net.mdns_host.clone(),
                        fallback: net.fallback_host.clone(),
                    }
                })?;
                Ok(Self::new(
                    addr,
                    &net.path,
                    format!(
                        "Cannot resolve {} ({}), using default {}",
                        net.mdns_host, e, net.fallback_host
                    ),
                ))
            }
        }
    }

    fn new(addr: SocketAddr, path: &str, note: String) -> Self {
        Self {
            addr,
            url: format!("ws://{}{}", addr, path),
            note,
        }
    }
}

// 优先 IPv4，设备一般只挂 v4
fn resolve(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, "no address"))
}

// ================= 帧解码 =================

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Text(String),
    Undecodable { len: usize, preview: String },
    Control,
    Close,
}

fn classify(msg: Message) -> Frame {
    match msg {
        Message::Text(text) => Frame::Text(text.trim().to_string()),
        Message::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Frame::Text(text.trim().to_string()),
            Err(e) => {
                let bytes = e.into_bytes();
                Frame::Undecodable {
                    len: bytes.len(),
                    preview: hex_preview(&bytes),
                }
            }
        },
        Message::Close(_) => Frame::Close,
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Frame::Control,
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(HEX_PREVIEW_BYTES)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 一帧文本 -> 日志行 + 可能的一条记录（保持先后顺序）
fn text_events(text: &str) -> Vec<WsEvent> {
    let mut out = vec![WsEvent::Log(format!("RX: {}", text))];
    if let Some(rec) = parse_line(text) {
        out.push(WsEvent::Record(rec));
    }
    out
}

fn frame_events(frame: Frame) -> Vec<WsEvent> {
    match frame {
        Frame::Text(text) => text_events(&text),
        Frame::Undecodable { len, preview } => vec![WsEvent::Log(format!(
            "RX binary: {} bytes - first 20: {}...",
            len, preview
        ))],
        Frame::Control | Frame::Close => Vec::new(),
    }
}

// ================= 客户端句柄 =================

pub struct WsClient {
    cmd_tx: Sender<ClientCommand>,
    events: Receiver<WsEvent>,
    // 置位后 IO 线程退出，不会再自动连
    shutdown: Arc<AtomicBool>,
    status: ConnectionStatus,
}

impl WsClient {
    /// 启动 IO 线程；`notify` 在每个事件发出后调用（GUI 里用来 request_repaint）
    pub fn connect<F>(net: NetConfig, notify: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (tx_event, rx_event) = mpsc::channel::<WsEvent>();
        let (tx_cmd, rx_cmd) = mpsc::channel::<ClientCommand>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let link = Link {
            events: tx_event,
            notify: Box::new(notify),
        };
        let flag = Arc::clone(&shutdown);
        thread::spawn(move || io_thread(net, link, rx_cmd, flag));

        Self {
            cmd_tx: tx_cmd,
            events: rx_event,
            shutdown,
            status: ConnectionStatus::Connecting,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// 原样发送；失败由 IO 线程回报，不重试
    pub fn send(&self, text: &str) -> Result<()> {
        if self.status == ConnectionStatus::Disconnected {
            return Err(MonitorError::NotConnected);
        }
        self.cmd_tx
            .send(ClientCommand::Send(text.to_string()))
            .map_err(|_| MonitorError::NotConnected)
    }

    pub fn close(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.cmd_tx.send(ClientCommand::Close);
        self.status = ConnectionStatus::Disconnected;
    }

    /// 取走目前所有事件，同时更新连接状态
    pub fn drain(&mut self) -> Vec<WsEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(ev) => {
                    self.track(&ev);
                    out.push(ev);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.status = ConnectionStatus::Disconnected;
                    break;
                }
            }
        }
        out
    }

    fn track(&mut self, ev: &WsEvent) {
        match ev {
            WsEvent::Connected(_) if !self.shutdown.load(Ordering::SeqCst) => {
                self.status = ConnectionStatus::Connected;
            }
            WsEvent::Disconnected(_) => self.status = ConnectionStatus::Disconnected,
            _ => {}
        }
    }

    #[cfg(test)]
    fn next_event(&mut self, timeout: Duration) -> Option<WsEvent> {
        let ev = self.events.recv_timeout(timeout).ok()?;
        self.track(&ev);
        Some(ev)
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.close();
    }
}

// ================= IO 线程 =================

struct Link {
    events: Sender<WsEvent>,
    notify: Box<dyn Fn() + Send>,
}

impl Link {
    /// GUI 那头已经没了就返回 false
    fn emit(&self, ev: WsEvent) -> bool {
        let ok = self.events.send(ev).is_ok();
        (self.notify)();
        ok
    }
}

fn io_thread(net: NetConfig, link: Link, commands: Receiver<ClientCommand>, shutdown: Arc<AtomicBool>) {
    let reason = match run_session(&net, &link, &commands, &shutdown) {
        Ok(reason) => reason,
        Err(e) => {
            warn!("[WS] {}", e);
            format!("Error: {}", e)
        }
    };
    info!("[WS] IO 线程退出: {}", reason);
    link.emit(WsEvent::Disconnected(reason));
}

fn run_session(
    net: &NetConfig,
    link: &Link,
    commands: &Receiver<ClientCommand>,
    shutdown: &AtomicBool,
) -> Result<String> {
    let endpoint = Endpoint::discover(net)?;
    link.emit(WsEvent::Log(endpoint.note.clone()));
    link.emit(WsEvent::Log(format!("Connecting: {}", endpoint.url)));

    let stream = TcpStream::connect(endpoint.addr).map_err(|source| MonitorError::Connect {
        addr: endpoint.addr.to_string(),
        source,
    })?;
    let (mut socket, _resp) = tungstenite::client(endpoint.url.as_str(), stream)
        .map_err(|e| MonitorError::Handshake(e.to_string()))?;
    socket.get_ref().set_read_timeout(Some(POLL_INTERVAL))?;

    info!("[WS] 已连接 {}", endpoint.url);
    link.emit(WsEvent::Connected(endpoint.url.clone()));

    loop {
        if shutdown.load(Ordering::SeqCst) {
            let _ = socket.close(None);
            let _ = socket.flush();
            return Ok("Connection closed".to_string());
        }

        // 发命令
        loop {
            match commands.try_recv() {
                Ok(ClientCommand::Send(text)) => match socket.send(Message::text(text.clone())) {
                    Ok(()) => {
                        link.emit(WsEvent::Log(format!("TX: {}", text)));
                    }
                    Err(e) => {
                        link.emit(WsEvent::Log(format!("Send failed: {}", e)));
                    }
                },
                Ok(ClientCommand::Close) | Err(TryRecvError::Disconnected) => {
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        if shutdown.load(Ordering::SeqCst) {
            continue;
        }

        // 收帧
        match socket.read() {
            Ok(msg) => {
                let frame = classify(msg);
                if frame == Frame::Close {
                    return Ok("Connection closed by device".to_string());
                }
                for ev in frame_events(frame) {
                    if !link.emit(ev) {
                        shutdown.store(true, Ordering::SeqCst);
                    }
                }
            }
            Err(tungstenite::Error::Io(ref e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                return Ok("Connection closed".to_string());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Instant;

    const LINE: &str = "实时 T=1000,SPD=10,20,30,40,ACC=1,-2,3,GYRO=0,0,0,S=1";

    fn local_net(port: u16) -> NetConfig {
        NetConfig {
            mdns_host: "127.0.0.1".to_string(),
            fallback_host: "127.0.0.1".to_string(),
            port,
            path: "/ws".to_string(),
        }
    }

    #[test]
    fn endpoint_prefers_resolved_host() {
        let ep = Endpoint::discover(&local_net(8080)).unwrap();
        assert_eq!(ep.url, "ws://127.0.0.1:8080/ws");
        assert!(ep.note.starts_with("Resolved"));
    }

    #[test]
    fn endpoint_falls_back_to_default_ip() {
        let net = NetConfig {
            mdns_host: "abs-monitor-test.invalid".to_string(),
            ..NetConfig::default()
        };
        let ep = Endpoint::discover(&net).unwrap();
        assert_eq!(ep.url, "ws://192.168.4.1:8080/ws");
        assert!(ep.note.contains("using default 192.168.4.1"));
    }

    #[test]
    fn endpoint_fails_when_both_hosts_fail() {
        let net = NetConfig {
            mdns_host: "a.invalid".to_string(),
            fallback_host: "b.invalid".to_string(),
            ..NetConfig::default()
        };
        assert!(matches!(
            Endpoint::discover(&net),
            Err(MonitorError::Resolve { .. })
        ));
    }

    #[test]
    fn text_frames_are_trimmed_and_parsed() {
        let frame = classify(Message::text(format!("  {}\r\n", LINE)));
        assert_eq!(frame, Frame::Text(LINE.to_string()));

        let events = frame_events(frame);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], WsEvent::Log(format!("RX: {}", LINE)));
        assert!(matches!(&events[1], WsEvent::Record(r) if r.timestamp == 1000));
    }

    #[test]
    fn utf8_binary_is_treated_as_text() {
        let frame = classify(Message::binary(LINE.as_bytes().to_vec()));
        assert!(matches!(frame_events(frame).last(), Some(WsEvent::Record(_))));
    }

    #[test]
    fn invalid_utf8_binary_never_reaches_parser() {
        let mut bytes = LINE.as_bytes().to_vec();
        bytes.push(0xff);
        let len = bytes.len();

        let frame = classify(Message::binary(bytes));
        assert!(matches!(frame, Frame::Undecodable { .. }));

        let events = frame_events(frame);
        assert_eq!(events.len(), 1);
        let WsEvent::Log(text) = &events[0] else {
            panic!("expected a log line, got {:?}", events[0]);
        };
        assert!(text.starts_with(&format!("RX binary: {} bytes - first 20: ", len)));
        assert!(text.ends_with("..."));
    }

    #[test]
    fn hex_preview_is_limited_to_20_bytes() {
        let bytes: Vec<u8> = (0u8..32).collect();
        let preview = hex_preview(&bytes);
        assert_eq!(preview.split(' ').count(), 20);
        assert!(preview.starts_with("00 01 02"));
        assert!(preview.ends_with("13"));
        assert_eq!(hex_preview(&[0xab]), "ab");
    }

    #[test]
    fn control_frames_produce_nothing() {
        assert!(frame_events(classify(Message::Ping(vec![1]))).is_empty());
        assert_eq!(classify(Message::Close(None)), Frame::Close);
    }

    #[test]
    fn session_receives_records_sends_commands_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx_seen, rx_seen) = mpsc::channel::<String>();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut ws = tungstenite::accept(stream).unwrap();
            ws.send(Message::text(LINE)).unwrap();
            ws.send(Message::binary(vec![0xff, 0xfe, 0x00])).unwrap();
            loop {
                match ws.read() {
                    Ok(Message::Text(t)) => {
                        let _ = tx_seen.send(t.to_string());
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });

        let mut client = WsClient::connect(local_net(port), || {});
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut got_record = false;
        let mut got_preview = false;
        while Instant::now() < deadline && !(got_record && got_preview) {
            match client.next_event(Duration::from_millis(200)) {
                Some(WsEvent::Record(r)) => {
                    assert_eq!(r.speed, [10, 20, 30, 40]);
                    got_record = true;
                }
                Some(WsEvent::Log(l)) if l.starts_with("RX binary: 3 bytes") => got_preview = true,
                _ => {}
            }
        }
        assert!(got_record && got_preview);
        assert_eq!(client.status(), ConnectionStatus::Connected);

        client.send("MODE_REALTIME").unwrap();
        let seen = rx_seen.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seen, "MODE_REALTIME");

        client.close();
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(matches!(
            client.send("MODE_DEFAULT"),
            Err(MonitorError::NotConnected)
        ));

        // IO 线程收尾只会报 Disconnected，不会再有 Connected
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut closed = false;
        while Instant::now() < deadline && !closed {
            for ev in client.drain() {
                assert!(!matches!(ev, WsEvent::Connected(_)));
                closed |= matches!(ev, WsEvent::Disconnected(_));
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(closed);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        server.join().unwrap();
    }

    #[test]
    fn send_on_dropped_connection_is_not_connected() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let mut client = WsClient::connect(local_net(port), || {});
        // IO 线程报错退出后，状态变为断开
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && client.status() != ConnectionStatus::Disconnected {
            client.drain();
            thread::sleep(Duration::from_millis(20));
        }
        let err = client.send("FLASH_INFO").unwrap_err();
        assert!(matches!(err, MonitorError::NotConnected));
        assert_eq!(err.to_string(), "Not connected");
    }

    #[test]
    fn unreachable_endpoint_reports_disconnect() {
        // 先占一个端口再释放，确保没人监听
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let mut client = WsClient::connect(local_net(port), || {});
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut reason = None;
        while Instant::now() < deadline && reason.is_none() {
            if let Some(WsEvent::Disconnected(r)) = client.next_event(Duration::from_millis(200)) {
                reason = Some(r);
            }
        }
        let reason = reason.expect("no disconnect event");
        assert!(reason.starts_with("Error: TCP connect"), "{}", reason);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }
}
