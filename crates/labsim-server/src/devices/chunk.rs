//! Chunk: a binary-protocol stand-in.
//!
//! Uses raw framing, so every read from the channel is one message with no
//! terminator handling, and echoes each chunk back unchanged.
//!
//! Options: `chunk_size` (largest message, default 4096) and `baudrate`.

use std::sync::Arc;

use async_trait::async_trait;
use labsim_core::protocol::DEFAULT_CHUNK_SIZE;
use labsim_core::Options;

use crate::application::device::{warn_unused_options, Device, DeviceError, DeviceSettings};
use crate::application::reply::Reply;

pub struct Chunk {
    name: String,
    settings: DeviceSettings,
}

/// Registry constructor.
pub fn create(name: &str, mut options: Options) -> Result<Arc<dyn Device>, DeviceError> {
    let chunk_size = match options.remove("chunk_size") {
        None => DEFAULT_CHUNK_SIZE,
        Some(value) => value
            .as_u64()
            .filter(|&n| n > 0)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| DeviceError::InvalidOption {
                key: "chunk_size".to_string(),
                reason: format!("expected a positive integer, got {value}"),
            })?,
    };
    let mut settings = DeviceSettings::raw(chunk_size);
    settings.apply_options(&mut options)?;
    warn_unused_options(name, &options);

    Ok(Arc::new(Chunk {
        name: name.to_string(),
        settings,
    }))
}

#[async_trait]
impl Device for Chunk {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    async fn handle_message(&self, message: &[u8]) -> Result<Reply, DeviceError> {
        Ok(Reply::single(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labsim_core::Framing;
    use serde_json::json;

    #[test]
    fn test_chunk_size_option() {
        let mut options = Options::new();
        options.insert("chunk_size".into(), json!(16));

        let device = create("c", options).expect("create");

        assert_eq!(device.settings().framing, Framing::Raw { chunk_size: 16 });
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let mut options = Options::new();
        options.insert("chunk_size".into(), json!(0));
        assert!(create("c", options).is_err());
    }

    #[tokio::test]
    async fn test_binary_chunk_echoed_verbatim() {
        let device = create("c", Options::new()).expect("create");
        let reply = device.handle_message(b"\x00\x01\n\xff").await.expect("reply");
        assert!(matches!(reply, Reply::Single(ref data) if data == b"\x00\x01\n\xff"));
    }
}
