//! The UDP event loop around a [`DeviceManager`].

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::ops::ControlFlow;
use std::time::Duration;

use log::{debug, error, info};
use serde_json::Value;

use crate::config::{BridgeConfig, LiveConfig};
use crate::device::{Timestamp, unix_now};
use crate::errors::Error;
use crate::events::{DEVICE_CATEGORY, Severity};
use crate::manager::DeviceManager;
use crate::protocol::MAX_DATAGRAM;
use crate::runtime::{self, AsyncUdpSocket, Instant, UdpSocket};

type Result<T> = std::result::Result<T, Error>;

/// Owns the bridge socket and feeds the device manager from it.
///
/// Inbound datagrams and the periodic tick are processed one at a time from
/// a single task, so the manager never sees concurrent calls.
///
/// # Example
///
/// ```ignore
/// use serde_json::json;
/// use wiz_bridge::{Bridge, BridgeConfig};
///
/// let config = json!({"wiz": {"devices": []}});
/// let mut bridge = Bridge::initialize(BridgeConfig::default(), &config).await?;
/// bridge.run().await;
/// ```
pub struct Bridge {
    socket: UdpSocket,
    manager: DeviceManager,
}

impl Bridge {
    /// How often the manager's periodic tick runs.
    pub const TICK: Duration = Duration::from_secs(1);

    /// Pause after a failed receive.
    pub const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

    /// Open the bridge socket. Failing to bind or to enable broadcast is
    /// fatal: the bridge cannot work without its transport.
    pub async fn bind(manager: DeviceManager) -> Result<Self> {
        let config = manager.config();
        let addr = SocketAddr::V4(SocketAddrV4::new(config.bind_address, config.listen_port));
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::socket("bind", e))?;
        socket
            .set_broadcast(true)
            .map_err(|e| Error::socket("set_broadcast", e))?;
        info!("UDP port {} is now open", config.listen_port);
        Ok(Bridge { socket, manager })
    }

    /// Open the socket and load the device list.
    ///
    /// A configuration error is logged and recorded as a diagnostic. It
    /// leaves the registry empty but does not prevent the bridge from
    /// running: devices will still be added as they announce themselves.
    pub async fn initialize(config: BridgeConfig, document: &Value) -> Result<Self> {
        let mut bridge = Self::bind(DeviceManager::new(config)).await?;
        if let Err(e) = bridge.refresh("ON STARTUP", document) {
            error!("starting with an empty registry: {e}");
        }
        Ok(bridge)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| Error::socket("local_addr", e))
    }

    pub fn manager(&self) -> &DeviceManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut DeviceManager {
        &mut self.manager
    }

    /// Reload the device list from a configuration document.
    pub fn refresh(&mut self, reason: &str, document: &Value) -> Result<()> {
        self.manager.refresh(reason, document, unix_now())
    }

    /// True once after self-announced devices were added.
    pub fn changed(&mut self) -> bool {
        self.manager.changed()
    }

    pub fn live_config(&self) -> LiveConfig {
        self.manager.live_config()
    }

    /// Command a device and transmit the command right away.
    pub async fn set(&mut self, index: usize, state: bool, pulse: u64) -> Result<()> {
        self.manager.set(index, state, pulse, unix_now())?;
        self.flush().await;
        Ok(())
    }

    /// Run the periodic activities for `now` and transmit their output.
    pub async fn periodic(&mut self, now: Timestamp) {
        self.manager.periodic(now);
        self.flush().await;
    }

    /// Wait up to `wait` for one datagram and process it.
    ///
    /// Returns whether a datagram was received. Receive errors are reported
    /// as diagnostics, never returned.
    pub async fn receive_once(&mut self, wait: Duration) -> bool {
        let mut buffer = [0u8; MAX_DATAGRAM];
        match runtime::timeout(wait, self.socket.recv_from(&mut buffer)).await {
            Ok(Ok((size, addr))) => {
                self.manager
                    .handle_datagram(&buffer[..size], addr, unix_now());
                self.flush().await;
                true
            }
            Ok(Err(e)) => {
                let pause = self.receive_failed(&e, wait);
                runtime::sleep(pause).await;
                false
            }
            Err(_) => false,
        }
    }

    /// Report a receive error and return how long to pause before the next
    /// receive, so that a socket failing immediately does not spin the loop.
    fn receive_failed(&mut self, e: &io::Error, wait: Duration) -> Duration {
        self.manager.log_mut().diagnose(
            unix_now(),
            Severity::Failure,
            DEVICE_CATEGORY,
            format!("recvfrom() error: {e}"),
        );
        wait.min(Self::RECEIVE_BACKOFF)
    }

    /// Send every queued message. Send failures are reported as
    /// diagnostics; the retry sweep compensates for lost datagrams.
    pub async fn flush(&mut self) {
        for outbound in self.manager.take_outbound() {
            let bytes = match outbound.command.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.manager.log_mut().diagnose(
                        unix_now(),
                        Severity::Failure,
                        DEVICE_CATEGORY,
                        e.to_string(),
                    );
                    continue;
                }
            };
            debug!(
                "Sending packet to {}: {}",
                outbound.target,
                String::from_utf8_lossy(&bytes[..bytes.len() - 1])
            );
            if let Err(e) = self
                .socket
                .send_to(&bytes, SocketAddr::V4(outbound.target))
                .await
            {
                self.manager.log_mut().diagnose(
                    unix_now(),
                    Severity::Failure,
                    DEVICE_CATEGORY,
                    format!("sendto() error: {e}"),
                );
            }
        }
    }

    /// Run the event loop forever.
    pub async fn run(&mut self) {
        self.run_with(|_| ControlFlow::Continue(())).await
    }

    /// Run the event loop, calling `on_tick` after every periodic tick
    /// until it breaks.
    pub async fn run_with<F>(&mut self, mut on_tick: F)
    where
        F: FnMut(&mut DeviceManager) -> ControlFlow<()>,
    {
        let mut last_tick: Option<Instant> = None;
        loop {
            let elapsed = last_tick.map_or(Self::TICK, |t| t.elapsed());
            if elapsed >= Self::TICK {
                last_tick = Some(Instant::now());
                self.periodic(unix_now()).await;
                if on_tick(&mut self.manager).is_break() {
                    return;
                }
                continue;
            }
            self.receive_once(Self::TICK - elapsed).await;
        }
    }
}
