//! NetworkSink - UDP fire-and-forget JSON streaming
//!
//! A failed send drops the socket; the next write after `reconnect_delay`
//! binds a fresh one. Messages written while disconnected are lost.

use contracts::{ContractError, PushMessage, PushSink};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

/// Configuration for NetworkSink
#[derive(Debug, Clone)]
pub struct NetworkSinkConfig {
    /// Target address
    pub addr: SocketAddr,
    /// Max datagram size (UDP typically 65507 for IPv4)
    pub max_packet_size: usize,
    /// Fixed wait before rebinding after a send failure
    pub reconnect_delay: Duration,
}

impl NetworkSinkConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            max_packet_size: 65000,
            reconnect_delay: Duration::from_millis(1000),
        }
    }

    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let addr_str = params
            .get("addr")
            .ok_or_else(|| "missing 'addr' parameter".to_string())?;

        let addr: SocketAddr = addr_str
            .parse()
            .map_err(|e| format!("invalid address '{}': {}", addr_str, e))?;

        let mut config = Self::new(addr);
        if let Some(size) = params.get("max_packet_size") {
            config.max_packet_size = size
                .parse()
                .map_err(|e| format!("invalid max_packet_size '{}': {}", size, e))?;
        }
        if let Some(ms) = params.get("reconnect_ms") {
            let ms: u64 = ms
                .parse()
                .map_err(|e| format!("invalid reconnect_ms '{}': {}", ms, e))?;
            config.reconnect_delay = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// Observer that sends every push message as one JSON datagram
pub struct NetworkSink {
    name: String,
    config: NetworkSinkConfig,
    socket: Option<UdpSocket>,
    retry_at: Option<Instant>,
    reconnects: u64,
}

impl NetworkSink {
    /// Create a new NetworkSink
    #[instrument(name = "network_sink_new", skip(name, config))]
    pub async fn new(name: impl Into<String>, config: NetworkSinkConfig) -> std::io::Result<Self> {
        let name = name.into();
        let socket = connect(config.addr).await?;

        debug!(
            sink = %name,
            target = %config.addr,
            "NetworkSink connected"
        );

        Ok(Self {
            name,
            config,
            socket: Some(socket),
            retry_at: None,
            reconnects: 0,
        })
    }

    /// Create from params (for factory)
    #[instrument(name = "network_sink_from_params", skip(name, params))]
    pub async fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = NetworkSinkConfig::from_params(params)
            .map_err(|e| ContractError::sink_write(&name, e))?;

        Self::new(name.clone(), config)
            .await
            .map_err(|e| ContractError::SinkConnection {
                sink_name: name,
                message: e.to_string(),
            })
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Successful rebinds after a failure
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    fn prepare_payload(&self, message: &PushMessage) -> Result<Vec<u8>, ContractError> {
        let data = serde_json::to_vec(message)
            .map_err(|e| ContractError::sink_write(&self.name, format!("json error: {e}")))?;

        if data.len() > self.config.max_packet_size {
            warn!(
                sink = %self.name,
                size = data.len(),
                max = self.config.max_packet_size,
                "Packet too large, dropped"
            );
            return Err(ContractError::sink_write(
                &self.name,
                format!("packet of {} bytes exceeds {}", data.len(), self.config.max_packet_size),
            ));
        }

        Ok(data)
    }

    /// Rebind once the reconnect delay has passed
    async fn ensure_connected(&mut self) -> Result<(), ContractError> {
        if self.socket.is_some() {
            return Ok(());
        }
        if let Some(at) = self.retry_at {
            if Instant::now() < at {
                return Err(ContractError::sink_write(&self.name, "disconnected, waiting to reconnect"));
            }
        }

        match connect(self.config.addr).await {
            Ok(socket) => {
                self.socket = Some(socket);
                self.retry_at = None;
                self.reconnects += 1;
                debug!(sink = %self.name, target = %self.config.addr, "NetworkSink reconnected");
                Ok(())
            }
            Err(e) => {
                self.retry_at = Some(Instant::now() + self.config.reconnect_delay);
                Err(ContractError::SinkConnection {
                    sink_name: self.name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn disconnect(&mut self) {
        self.socket = None;
        self.retry_at = Some(Instant::now() + self.config.reconnect_delay);
    }
}

async fn connect(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let bind: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await?;
    Ok(socket)
}

impl PushSink for NetworkSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "network_sink_write",
        skip(self, message),
        fields(sink = %self.name, kind = message.kind())
    )]
    async fn write(&mut self, message: &PushMessage) -> Result<(), ContractError> {
        let data = self.prepare_payload(message)?;
        self.ensure_connected().await?;

        let sent = match &self.socket {
            Some(socket) => socket.send(&data).await,
            None => return Err(ContractError::sink_write(&self.name, "socket not connected")),
        };
        match sent {
            Ok(bytes) => {
                debug!(sink = %self.name, bytes, "Sent");
                Ok(())
            }
            Err(e) => {
                error!(sink = %self.name, error = %e, "UDP send failed, reconnecting later");
                self.disconnect();
                Err(ContractError::sink_write(&self.name, e.to_string()))
            }
        }
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        // UDP doesn't buffer
        Ok(())
    }

    #[instrument(name = "network_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.socket = None;
        self.retry_at = None;
        debug!(sink = %self.name, "NetworkSink closed");
        Ok(())
    }
}
