//! Streamer: an acquisition device with streamed and continuous frames.
//!
//! Requests are terminated by `\r`.  A bare `S` stops continuous
//! acquisition the moment it arrives, without a terminator.  Replies end
//! with `\n`.
//!
//! | Request     | Reply                                                       |
//! |-------------|-------------------------------------------------------------|
//! | `*IDN?`     | `LABSIM,STREAMER,<name>,<version>`                          |
//! | `ACQ <n>`   | `n` lines `FRAME <i>`, one per `period`, then `DONE`        |
//! | `CONT ON`   | `OK`; then `FRAME <i>` to every connection once per period  |
//! | `CONT OFF`  | `OK`; stops continuous acquisition                          |
//! | `S`         | `ACK` if continuous acquisition was running, else `NAK`     |
//!
//! Anything else gets `ERR <reason>`.
//!
//! Options: `period` (seconds between frames, positive, default 0.1), plus `newline`
//! and `baudrate`.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use labsim_core::Options;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::broadcast::Broadcaster;
use crate::application::device::{
    pop_seconds, warn_unused_options, Device, DeviceError, DeviceSettings,
};
use crate::application::reply::Reply;

const DEFAULT_PERIOD: Duration = Duration::from_millis(100);

/// Out-of-band stop token.
const STOP: &str = "S";

type Command = fn(&Streamer, &str) -> Reply;

/// Request keyword → handler.
const COMMANDS: &[(&str, Command)] = &[
    ("*IDN?", Streamer::identify),
    ("ACQ", Streamer::acquire),
    ("CONT", Streamer::continuous),
    (STOP, Streamer::stop_continuous),
];

pub struct Streamer {
    name: String,
    settings: DeviceSettings,
    period: Duration,
    broadcaster: OnceLock<Broadcaster>,
    continuous: Mutex<Option<JoinHandle<()>>>,
}

/// Registry constructor.
pub fn create(name: &str, mut options: Options) -> Result<Arc<dyn Device>, DeviceError> {
    let mut settings = DeviceSettings::line("\r").with_special_message(STOP);
    settings.apply_options(&mut options)?;
    let period = pop_seconds(&mut options, "period")?
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_PERIOD);
    if period.is_zero() {
        return Err(DeviceError::InvalidOption {
            key: "period".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    warn_unused_options(name, &options);

    Ok(Arc::new(Streamer {
        name: name.to_string(),
        settings,
        period,
        broadcaster: OnceLock::new(),
        continuous: Mutex::new(None),
    }))
}

fn line(text: impl AsRef<str>) -> Vec<u8> {
    let mut data = text.as_ref().as_bytes().to_vec();
    data.push(b'\n');
    data
}

impl Streamer {
    fn identify(&self, _args: &str) -> Reply {
        Reply::single(line(format!(
            "LABSIM,STREAMER,{},{}",
            self.name,
            env!("CARGO_PKG_VERSION")
        )))
    }

    /// Streams `n` frames lazily, one per period, then `DONE`.
    fn acquire(&self, args: &str) -> Reply {
        let Ok(count) = args.trim().parse::<u32>() else {
            return Reply::single(line(format!("ERR bad frame count {args:?}")));
        };
        let period = self.period;
        let frames = stream::unfold(0u32, move |i| async move {
            match i.cmp(&count) {
                std::cmp::Ordering::Less => {
                    tokio::time::sleep(period).await;
                    Some((Ok(line(format!("FRAME {i}"))), i + 1))
                }
                std::cmp::Ordering::Equal => Some((Ok(line("DONE")), i + 1)),
                std::cmp::Ordering::Greater => None,
            }
        });
        Reply::stream(frames)
    }

    fn continuous(&self, args: &str) -> Reply {
        match args.trim() {
            "ON" => {
                self.start_continuous();
                Reply::single(line("OK"))
            }
            "OFF" => {
                self.abort_continuous();
                Reply::single(line("OK"))
            }
            other => Reply::single(line(format!("ERR expected ON or OFF, got {other:?}"))),
        }
    }

    fn stop_continuous(&self, _args: &str) -> Reply {
        if self.abort_continuous() {
            Reply::single(line("ACK"))
        } else {
            Reply::single(line("NAK"))
        }
    }

    fn task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.continuous
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn start_continuous(&self) {
        let mut task = self.task();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let broadcaster = self.broadcaster.get().cloned().unwrap_or_default();
        let period = self.period;
        info!(device = %self.name, "continuous acquisition started");
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            for i in 0u64.. {
                interval.tick().await;
                broadcaster.broadcast(&line(format!("FRAME {i}"))).await;
            }
        }));
    }

    /// Returns whether a running acquisition was stopped.
    fn abort_continuous(&self) -> bool {
        match self.task().take() {
            Some(task) if !task.is_finished() => {
                task.abort();
                info!(device = %self.name, "continuous acquisition stopped");
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Device for Streamer {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    async fn handle_message(&self, message: &[u8]) -> Result<Reply, DeviceError> {
        let Ok(text) = std::str::from_utf8(message) else {
            return Ok(Reply::single(line("ERR not ASCII")));
        };
        let text = text.trim();
        let (keyword, args) = text.split_once(' ').unwrap_or((text, ""));
        debug!(device = %self.name, "command {keyword:?}");

        Ok(match COMMANDS.iter().find(|(name, _)| *name == keyword) {
            Some((_, command)) => command(self, args),
            None => Reply::single(line(format!("ERR unknown command {keyword:?}"))),
        })
    }

    fn attach(&self, broadcaster: Broadcaster) {
        let _ = self.broadcaster.set(broadcaster);
    }

    async fn shutdown(&self) {
        self.abort_continuous();
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        if let Some(task) = self.task().take() {
            task.abort();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
