//! Serial transport over a pseudo-terminal.
//!
//! `start` opens a pty pair, puts the terminal in raw mode and points a
//! stable symlink (the configured URL) at the slave side, so clients open
//! the link exactly as they would a real serial port.  The server speaks on
//! the master side through one long-lived protocol session.
//!
//! The slave descriptor stays open for the transport's lifetime.  Without it
//! the master would report `EIO` whenever no client has the link open.
//!
//! A device error ends the current session and a new one starts on the same
//! line.  An I/O error on the master ends `serve_forever`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, OnceLock, Weak};
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use labsim_core::TransportKind;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::application::device::{Device, DeviceSettings, Peer};
use crate::application::transport::{Transport, TransportError};
use crate::infrastructure::channel::{ChannelReader, ChannelWriter};
use crate::infrastructure::delay::delay;
use crate::infrastructure::protocol::{MessageProtocol, ProtocolError};

/// Resources held while the transport is started.
struct PtyPair {
    master: Arc<AsyncFd<File>>,
    _slave: OwnedFd,
    writer: ChannelWriter,
}

/// Pseudo-terminal endpoint for one device.
pub struct SerialTransport {
    device: Weak<dyn Device>,
    settings: DeviceSettings,
    link: PathBuf,
    pty: Mutex<Option<PtyPair>>,
    tty: OnceLock<PathBuf>,
    shutdown: watch::Sender<bool>,
    serving: Mutex<()>,
    span: Span,
}

impl SerialTransport {
    pub fn new(device: &Arc<dyn Device>, settings: DeviceSettings, link: impl Into<PathBuf>) -> Self {
        let link = link.into();
        let span = info_span!(
            "transport",
            device = %device.name(),
            kind = "serial",
            address = %link.display()
        );
        info!(parent: &span, "serial line on {} (baud={:?})", link.display(), settings.baudrate);
        Self {
            device: Arc::downgrade(device),
            settings,
            link,
            pty: Mutex::new(None),
            tty: OnceLock::new(),
            shutdown: watch::channel(false).0,
            serving: Mutex::new(()),
            span,
        }
    }

    /// The symlink clients open.
    pub fn link(&self) -> &Path {
        &self.link
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn run_sessions(
        &self,
        master: Arc<AsyncFd<File>>,
        writer: ChannelWriter,
    ) -> Result<(), TransportError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Ok(());
        }

        loop {
            let mut protocol = MessageProtocol::new(
                self.device.clone(),
                self.settings.clone(),
                ChannelReader::new(PtyReader {
                    fd: master.clone(),
                }),
                writer.clone(),
                Peer::Serial(self.link.clone()),
            );
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                result = protocol.run() => match result {
                    Ok(()) => {
                        info!("serial line closed");
                        return Ok(());
                    }
                    Err(ProtocolError::Device(e)) => {
                        warn!("device error on serial line, restarting session: {e}");
                    }
                    Err(ProtocolError::DeviceGone) => return Ok(()),
                    Err(ProtocolError::Io(e)) => return Err(TransportError::Io(e)),
                },
            }
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn address(&self) -> String {
        self.link.display().to_string()
    }

    fn tty_name(&self) -> Option<PathBuf> {
        self.tty.get().cloned()
    }

    async fn start(&self) -> Result<(), TransportError> {
        if self.is_stopped() {
            return Err(TransportError::Stopped);
        }
        let mut pty = self.pty.lock().await;
        if pty.is_some() {
            return Ok(());
        }

        let (master, slave, tty) = open_pty().map_err(TransportError::Pty)?;
        let master = Arc::new(AsyncFd::new(master).map_err(TransportError::Pty)?);
        create_link(&tty, &self.link).await?;
        let _ = self.tty.set(tty.clone());
        info!(parent: &self.span, "{} -> {}", self.link.display(), tty.display());

        let writer = ChannelWriter::new(PtyWriter {
            fd: master.clone(),
        });
        *pty = Some(PtyPair {
            master,
            _slave: slave,
            writer,
        });
        Ok(())
    }

    async fn serve_forever(&self) -> Result<(), TransportError> {
        if self.is_stopped() {
            return Ok(());
        }
        self.start().await?;
        let _serving = self.serving.lock().await;
        let Some((master, writer)) = self
            .pty
            .lock()
            .await
            .as_ref()
            .map(|pair| (pair.master.clone(), pair.writer.clone()))
        else {
            return Ok(());
        };

        let result = self
            .run_sessions(master, writer)
            .instrument(self.span.clone())
            .await;
        info!(parent: &self.span, "stopped serving");
        result
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.shutdown.send_replace(true);
        // The session holds the master; wait for it to let go.
        drop(self.serving.lock().await);
        let Some(pair) = self.pty.lock().await.take() else {
            return Ok(());
        };
        drop(pair);
        remove_link(&self.link).await
    }

    async fn broadcast(&self, data: &[u8]) {
        let writer = match self.pty.lock().await.as_ref() {
            Some(pair) => pair.writer.clone(),
            None => return,
        };
        delay(data.len(), self.settings.baudrate).await;
        if let Err(e) = writer.write(data).await {
            warn!(parent: &self.span, "broadcast on serial line failed: {e}");
        }
    }
}

// ── Pseudo-terminal plumbing ──────────────────────────────────────────────────

/// Opens a raw-mode pty pair with a non-blocking master.
fn open_pty() -> io::Result<(File, OwnedFd, PathBuf)> {
    let pty = nix::pty::openpty(None, None)?;
    let tty = nix::unistd::ttyname(&pty.slave)?;

    let mut termios = tcgetattr(&pty.slave)?;
    cfmakeraw(&mut termios);
    tcsetattr(&pty.slave, SetArg::TCSANOW, &termios)?;

    let raw = pty.master.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

    Ok((File::from(pty.master), pty.slave, tty))
}

async fn create_link(tty: &Path, link: &Path) -> Result<(), TransportError> {
    let link_err = |source| TransportError::Link {
        path: link.to_path_buf(),
        source,
    };

    // A link left behind by an earlier run is replaced.
    match tokio::fs::symlink_metadata(link).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            tokio::fs::remove_file(link).await.map_err(link_err)?;
        }
        Ok(_) => return Err(link_err(io::ErrorKind::AlreadyExists.into())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(link_err(e)),
    }
    if let Some(parent) = link.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(link_err)?;
    }
    tokio::fs::symlink(tty, link).await.map_err(link_err)
}

async fn remove_link(link: &Path) -> Result<(), TransportError> {
    match tokio::fs::symlink_metadata(link).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            tokio::fs::remove_file(link)
                .await
                .map_err(|source| TransportError::Link {
                    path: link.to_path_buf(),
                    source,
                })?;
            debug!("removed {}", link.display());
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(TransportError::Link {
            path: link.to_path_buf(),
            source,
        }),
    }
}

struct PtyReader {
    fd: Arc<AsyncFd<File>>,
}

impl AsyncRead for PtyReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.read(unfilled)
            }) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

struct PtyWriter {
    fd: Arc<AsyncFd<File>>,
}

impl AsyncWrite for PtyWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;
            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.write(buf)
            }) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::device::DeviceError;
    use crate::application::reply::Reply;

    struct Silent {
        settings: DeviceSettings,
    }

    #[async_trait]
    impl Device for Silent {
        fn name(&self) -> &str {
            "silent"
        }
        fn settings(&self) -> &DeviceSettings {
            &self.settings
        }
        async fn handle_message(&self, _message: &[u8]) -> Result<Reply, DeviceError> {
            Ok(Reply::None)
        }
    }

    fn scratch_link() -> PathBuf {
        std::env::temp_dir()
            .join(format!("labsim-{}", uuid::Uuid::new_v4()))
            .join("tty")
    }

    #[tokio::test]
    async fn test_start_links_tty_and_stop_removes_link() {
        // Arrange
        let device: Arc<dyn Device> = Arc::new(Silent {
            settings: DeviceSettings::default(),
        });
        let link = scratch_link();
        let transport = SerialTransport::new(&device, DeviceSettings::default(), &link);

        // Act
        transport.start().await.expect("start");
        transport.start().await.expect("second start is a no-op");

        // Assert
        let tty = transport.tty_name().expect("tty name");
        let target = std::fs::read_link(&link).expect("symlink");
        assert_eq!(target, tty);

        transport.stop().await.expect("stop");
        assert!(std::fs::symlink_metadata(&link).is_err());
        transport.stop().await.expect("second stop");
    }

    #[tokio::test]
    async fn test_stale_link_is_replaced() {
        let device: Arc<dyn Device> = Arc::new(Silent {
            settings: DeviceSettings::default(),
        });
        let link = scratch_link();
        std::fs::create_dir_all(link.parent().expect("parent")).expect("mkdir");
        std::os::unix::fs::symlink("/nonexistent", &link).expect("stale link");
        let transport = SerialTransport::new(&device, DeviceSettings::default(), &link);

        transport.start().await.expect("start");

        assert_eq!(
            std::fs::read_link(&link).expect("symlink"),
            transport.tty_name().expect("tty")
        );
        transport.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_regular_file_at_link_path_is_not_clobbered() {
        let device: Arc<dyn Device> = Arc::new(Silent {
            settings: DeviceSettings::default(),
        });
        let link = scratch_link();
        std::fs::create_dir_all(link.parent().expect("parent")).expect("mkdir");
        std::fs::write(&link, b"keep me").expect("file");
        let transport = SerialTransport::new(&device, DeviceSettings::default(), &link);

        let result = transport.start().await;

        assert!(matches!(result, Err(TransportError::Link { .. })));
        assert_eq!(std::fs::read(&link).expect("still there"), b"keep me");
    }
}
