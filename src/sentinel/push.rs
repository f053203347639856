//! Push channel
//!
//! Long-lived WebSocket subscription used by watchers that support
//! event-driven detection. One channel = one task owning the socket.
//!
//! Lifecycle:
//! ```text
//! Idle ──start──▶ Connecting ──open──▶ Connected
//!                     ▲                    │ close / error
//!                     │                    ▼
//!                     └──── delay ──── ReconnectPending
//!
//! stop() from any state ──▶ Stopped (never reconnects)
//! ```
//! The reconnect delay is fixed and retries are unbounded. A disconnect is
//! reported once even when the socket yields both an error and a close.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::error::PushError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    ReconnectPending,
    Stopped,
}

/// Reconnect state machine, kept free of I/O
#[derive(Debug)]
pub struct LinkState {
    state: ConnectionState,
    reconnects_scheduled: u64,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            reconnects_scheduled: 0,
        }
    }
}

impl LinkState {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnects_scheduled(&self) -> u64 {
        self.reconnects_scheduled
    }

    /// Returns false once stopped.
    pub fn begin_connect(&mut self) -> bool {
        if self.state == ConnectionState::Stopped {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    pub fn opened(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Connected;
        }
    }

    /// Record a disconnect. Returns true if the caller must schedule a reconnect.
    ///
    /// Only the first report per connection attempt schedules one.
    pub fn disconnected(&mut self) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.state = ConnectionState::ReconnectPending;
                self.reconnects_scheduled += 1;
                true
            }
            ConnectionState::Idle
            | ConnectionState::ReconnectPending
            | ConnectionState::Stopped => false,
        }
    }

    pub fn stop(&mut self) {
        self.state = ConnectionState::Stopped;
    }

    pub fn reset(&mut self) {
        self.state = ConnectionState::Idle;
    }
}

/// Receives every text frame from the channel
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn on_frame(&self, frame: &str);
}

#[derive(Debug, Clone)]
pub struct PushSettings {
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    /// Silence after which a ping is sent; a second silent period drops the link
    pub idle_timeout: Duration,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

pub struct PushChannel {
    name: String,
    url: String,
    settings: PushSettings,
    link: Arc<Mutex<LinkState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PushChannel {
    pub fn new(name: &str, url: &str, settings: PushSettings) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            settings,
            link: Arc::new(Mutex::new(LinkState::default())),
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.link).state()
    }

    pub fn reconnects_scheduled(&self) -> u64 {
        lock(&self.link).reconnects_scheduled()
    }

    /// (Re)start the subscription with a fresh frame set.
    ///
    /// Any running session and any pending reconnect are cancelled first, so
    /// at most one session task exists per channel.
    pub fn start(&self, frames: Vec<String>, handler: Arc<dyn FrameHandler>) {
        let mut task = lock(&self.task);
        if let Some(previous) = task.take() {
            previous.abort();
        }
        lock(&self.link).reset();

        info!(
            channel = %self.name,
            url = %self.url,
            subscriptions = frames.len(),
            "Starting push channel"
        );

        *task = Some(tokio::spawn(run_channel(
            self.name.clone(),
            self.url.clone(),
            frames,
            handler,
            Arc::clone(&self.link),
            self.settings.clone(),
        )));
    }

    /// Resubscribe with a new frame set after the watched addresses changed.
    pub fn restart(&self, frames: Vec<String>, handler: Arc<dyn FrameHandler>) {
        info!(channel = %self.name, state = ?self.state(), "Restarting push channel");
        self.start(frames, handler);
    }

    /// Close the channel for good. No reconnect follows.
    pub fn stop(&self) {
        lock(&self.link).stop();
        if let Some(task) = lock(&self.task).take() {
            task.abort();
            info!(channel = %self.name, "Push channel stopped");
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

async fn run_channel(
    name: String,
    url: String,
    frames: Vec<String>,
    handler: Arc<dyn FrameHandler>,
    link: Arc<Mutex<LinkState>>,
    settings: PushSettings,
) {
    loop {
        if !lock(&link).begin_connect() {
            return;
        }

        match run_session(&name, &url, &frames, handler.as_ref(), &link, &settings).await {
            Ok(()) => info!(channel = %name, "Push channel closed by peer"),
            Err(e) => error!(channel = %name, error = %e, "Push channel error"),
        }

        if !lock(&link).disconnected() {
            return;
        }

        info!(channel = %name, delay = ?settings.reconnect_delay, "Reconnecting push channel");
        tokio::time::sleep(settings.reconnect_delay).await;
    }
}

/// One connection lifetime. Returns on the first close or error.
async fn run_session(
    name: &str,
    url: &str,
    frames: &[String],
    handler: &dyn FrameHandler,
    link: &Mutex<LinkState>,
    settings: &PushSettings,
) -> Result<(), PushError> {
    let (ws_stream, _) = tokio::time::timeout(settings.connect_timeout, connect_async(url))
        .await
        .map_err(|_| PushError::ConnectTimeout)??;
    let (mut write, mut read) = ws_stream.split();

    for frame in frames {
        write.send(Message::Text(frame.clone())).await?;
    }
    lock(link).opened();
    info!(channel = %name, subscriptions = frames.len(), "Push channel connected");

    let mut awaiting_pong = false;
    loop {
        let next = match tokio::time::timeout(settings.idle_timeout, read.next()).await {
            Ok(next) => next,
            Err(_) if awaiting_pong => return Err(PushError::PingTimeout),
            Err(_) => {
                debug!(channel = %name, "Push channel idle, sending ping");
                write.send(Message::Ping(Vec::new())).await?;
                awaiting_pong = true;
                continue;
            }
        };
        awaiting_pong = false;

        match next {
            Some(Ok(Message::Text(text))) => handler.on_frame(&text).await,
            Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
            Some(Ok(Message::Close(frame))) => {
                debug!(channel = %name, frame = ?frame, "Close frame");
                return Ok(());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => {
                warn!(channel = %name, "Push stream ended without close frame");
                return Err(PushError::Closed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_close_and_error_schedule_one_reconnect() {
        let mut link = LinkState::default();
        assert!(link.begin_connect());
        link.opened();
        assert_eq!(link.state(), ConnectionState::Connected);

        // close then error for the same disconnect
        assert!(link.disconnected());
        assert!(!link.disconnected());
        assert_eq!(link.state(), ConnectionState::ReconnectPending);
        assert_eq!(link.reconnects_scheduled(), 1);

        // next attempt fails while connecting
        assert!(link.begin_connect());
        assert!(link.disconnected());
        assert_eq!(link.reconnects_scheduled(), 2);
    }

    #[test]
    fn test_stop_prevents_reconnect() {
        let mut link = LinkState::default();
        link.begin_connect();
        link.opened();
        link.stop();

        assert!(!link.disconnected());
        assert!(!link.begin_connect());
        assert_eq!(link.state(), ConnectionState::Stopped);
        assert_eq!(link.reconnects_scheduled(), 0);
    }

    struct Collect(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl FrameHandler for Collect {
        async fn on_frame(&self, frame: &str) {
            let _ = self.0.send(frame.to_string());
        }
    }

    fn fast_settings() -> PushSettings {
        PushSettings {
            reconnect_delay: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_resubscribes_after_server_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel::<(usize, String)>();

        tokio::spawn(async move {
            for conn in 0..2usize {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(stream).await.unwrap();
                let first = ws.next().await.unwrap().unwrap();
                sub_tx.send((conn, first.into_text().unwrap())).unwrap();
                ws.send(Message::Text(format!("event-{}", conn))).await.unwrap();
                if conn == 0 {
                    ws.close(None).await.unwrap();
                } else {
                    // hold the second connection open
                    while ws.next().await.is_some() {}
                }
            }
        });

        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let channel = PushChannel::new("test", &url, fast_settings());
        channel.start(vec!["subscribe".to_string()], Arc::new(Collect(frame_tx)));

        let timeout = Duration::from_secs(5);
        assert_eq!(
            tokio::time::timeout(timeout, sub_rx.recv()).await.unwrap(),
            Some((0, "subscribe".to_string()))
        );
        assert_eq!(
            tokio::time::timeout(timeout, frame_rx.recv()).await.unwrap().as_deref(),
            Some("event-0")
        );
        assert_eq!(
            tokio::time::timeout(timeout, sub_rx.recv()).await.unwrap(),
            Some((1, "subscribe".to_string()))
        );
        assert_eq!(
            tokio::time::timeout(timeout, frame_rx.recv()).await.unwrap().as_deref(),
            Some("event-1")
        );

        assert_eq!(channel.reconnects_scheduled(), 1);
        assert_eq!(channel.state(), ConnectionState::Connected);

        channel.stop();
        assert_eq!(channel.state(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_keeps_retrying() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let (frame_tx, _frame_rx) = mpsc::unbounded_channel();
        let channel = PushChannel::new("dead", &url, fast_settings());
        channel.start(Vec::new(), Arc::new(Collect(frame_tx)));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(channel.reconnects_scheduled() >= 2);

        channel.stop();
        let after_stop = channel.reconnects_scheduled();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(channel.reconnects_scheduled(), after_stop);
    }
}
