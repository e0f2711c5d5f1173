//! Message bus collaborator (a named interface, deliberately out of scope
//! for a concrete broker client): subscribe to the single configured topic and deliver
//! raw payload bytes. The core never touches the wire protocol directly.
//!
//! The concrete adapter here is a line-delimited JSON stream over TCP —
//! the simplest thing that satisfies "subscribe + deliver bytes" without
//! pulling in a broker-specific client crate the rest of the stack doesn't
//! already depend on. A real deployment swaps this for whatever broker
//! client fits (MQTT, NATS, Kafka); [`MessageBus`] is the seam.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Subscribe-only collaborator: deliver the next message's raw bytes.
/// `?Send` because the engine that drives it lives on a single local task
/// alongside `Rc<RefCell<_>>` sensor state.
#[async_trait(?Send)]
pub trait MessageBus {
    /// Blocks until the next message is available. Returns `Ok(None)` only
    /// when the bus has been told to shut down cleanly.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Connects to `bus_url` (`host:port`) and subscribes to `topic` by writing
/// a single `SUBSCRIBE <topic>\n` line, then reads newline-delimited JSON
/// payloads. Reconnects automatically on any I/O error with a fixed 5 s
/// period; messages in flight during a reconnect are not redelivered.
pub struct TcpLineBus {
    url: String,
    topic: String,
    conn: Option<BufReader<TcpStream>>,
}

impl TcpLineBus {
    pub fn new(url: String, topic: String) -> Self {
        Self { url, topic, conn: None }
    }

    async fn connect(&mut self) -> Result<()> {
        let stream = TcpStream::connect(&self.url)
            .await
            .with_context(|| format!("connecting to bus at {}", self.url))?;
        let mut reader = BufReader::new(stream);
        let subscribe_line = format!("SUBSCRIBE {}\n", self.topic);
        reader.get_mut().write_all(subscribe_line.as_bytes()).await?;
        self.conn = Some(reader);
        info!("bus connected, subscribed to {}", self.topic);
        Ok(())
    }
}

#[async_trait(?Send)]
impl MessageBus for TcpLineBus {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if self.conn.is_none() {
                if let Err(err) = self.connect().await {
                    warn!("bus connect failed, retrying in 5s: {err:#}");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            }

            let reader = self.conn.as_mut().expect("connection established above");
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    warn!("bus connection closed, reconnecting in 5s");
                    self.conn = None;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Ok(Some(trimmed.as_bytes().to_vec()));
                }
                Err(err) => {
                    error!("bus read error, reconnecting in 5s: {err}");
                    self.conn = None;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}
