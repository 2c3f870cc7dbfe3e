//! Shared fixtures for the integration tests.
//!
//! `Lab` is a line device with a tiny command set covering the reply shapes
//! the transports must support:
//!
//! | Request  | Reply                                              |
//! |----------|----------------------------------------------------|
//! | `PING`   | `PONG` (no terminator)                             |
//! | `MULTI`  | `1\n`, `2\n`, `3\n` as three separate writes       |
//! | `NOTIFY` | nothing; broadcasts `EVENT\n` to every connection  |
//! | `FAIL`   | handler error, closes the connection               |

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use labsim_core::{DeviceEntry, Options, SimulatorConfig};
use labsim_server::application::broadcast::Broadcaster;
use labsim_server::application::device::warn_unused_options;
use labsim_server::testing::ServerHandle;
use labsim_server::{Device, DeviceError, DeviceSettings, Registry, Reply};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub struct Lab {
    name: String,
    settings: DeviceSettings,
    broadcaster: OnceLock<Broadcaster>,
}

pub fn create_lab(name: &str, mut options: Options) -> Result<Arc<dyn Device>, DeviceError> {
    let mut settings = DeviceSettings::default();
    settings.apply_options(&mut options)?;
    warn_unused_options(name, &options);
    Ok(Arc::new(Lab {
        name: name.to_string(),
        settings,
        broadcaster: OnceLock::new(),
    }))
}

#[async_trait]
impl Device for Lab {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    async fn handle_message(&self, message: &[u8]) -> Result<Reply, DeviceError> {
        match message {
            b"PING" => Ok(Reply::single("PONG")),
            b"MULTI" => Ok(Reply::iter(vec![
                b"1\n".to_vec(),
                b"2\n".to_vec(),
                b"3\n".to_vec(),
            ])),
            b"NOTIFY" => {
                if let Some(broadcaster) = self.broadcaster.get() {
                    broadcaster.broadcast(b"EVENT\n").await;
                }
                Ok(Reply::None)
            }
            b"FAIL" => Err(DeviceError::Command("requested failure".into())),
            _ => Ok(Reply::None),
        }
    }

    fn attach(&self, broadcaster: Broadcaster) {
        let _ = self.broadcaster.set(broadcaster);
    }
}

/// Built-in devices plus `tests.lab.Lab`.
pub fn registry() -> Registry {
    let mut registry = Registry::with_builtin_devices();
    registry
        .register("tests.lab", "Lab", "integration test device", create_lab)
        .expect("register Lab");
    registry
}

pub async fn start(devices: Vec<DeviceEntry>) -> ServerHandle {
    let config = SimulatorConfig::new(devices);
    ServerHandle::start(&config, &registry()).await
}

pub fn tcp_addr(handle: &ServerHandle, device: &str) -> SocketAddr {
    handle.tcp_addr(device).expect("device has a bound tcp transport")
}

/// Reads exactly `n` bytes or fails after [`TIMEOUT`].
pub async fn read_n<R: AsyncRead + Unpin>(reader: &mut R, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    tokio::time::timeout(TIMEOUT, reader.read_exact(&mut buf))
        .await
        .expect("timed out waiting for reply")
        .expect("read");
    buf
}

/// Reads until `needle` has been seen, returning everything read so far.
pub async fn read_until<R: AsyncRead + Unpin>(reader: &mut R, needle: &[u8]) -> Vec<u8> {
    let mut seen = Vec::new();
    let mut chunk = [0u8; 256];
    tokio::time::timeout(TIMEOUT, async {
        while !seen.windows(needle.len()).any(|w| w == needle) {
            let n = reader.read(&mut chunk).await.expect("read");
            assert!(n > 0, "eof before {:?}", String::from_utf8_lossy(needle));
            seen.extend_from_slice(&chunk[..n]);
        }
    })
    .await
    .expect("timed out waiting for reply");
    seen
}

/// Polls `check` until it holds or [`TIMEOUT`] elapses.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
