//! Echo: answers every line with the same line.
//!
//! Options:
//!
//! - `greeting` (string) – sent to every new connection before any request.
//! - `newline`, `baudrate` – the usual framing and timing settings.

use std::sync::Arc;

use async_trait::async_trait;
use labsim_core::Options;

use crate::application::device::{
    pop_string, warn_unused_options, Device, DeviceError, DeviceSettings, Peer,
};
use crate::application::reply::Reply;

pub struct Echo {
    name: String,
    settings: DeviceSettings,
    greeting: Option<String>,
}

/// Registry constructor.
pub fn create(name: &str, mut options: Options) -> Result<Arc<dyn Device>, DeviceError> {
    let mut settings = DeviceSettings::default();
    settings.apply_options(&mut options)?;
    let greeting = pop_string(&mut options, "greeting")?;
    warn_unused_options(name, &options);

    Ok(Arc::new(Echo {
        name: name.to_string(),
        settings,
        greeting,
    }))
}

#[async_trait]
impl Device for Echo {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    async fn handle_message(&self, message: &[u8]) -> Result<Reply, DeviceError> {
        let mut reply = Vec::with_capacity(message.len() + self.settings.newline.len());
        reply.extend_from_slice(message);
        reply.extend_from_slice(&self.settings.newline);
        Ok(Reply::Single(reply))
    }

    async fn on_connection(&self, _peer: &Peer) -> Result<Reply, DeviceError> {
        Ok(self
            .greeting
            .as_deref()
            .map_or(Reply::None, |greeting| {
                let mut banner = greeting.as_bytes().to_vec();
                banner.extend_from_slice(&self.settings.newline);
                Reply::Single(banner)
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: serde_json::Value) -> Options {
        value.as_object().cloned().unwrap_or_default()
    }

    fn single(reply: Reply) -> Vec<u8> {
        match reply {
            Reply::Single(data) => data,
            other => panic!("expected a single reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_echo_appends_device_newline() {
        // Arrange
        let echo = create("e", options(json!({"newline": "\r\n"}))).expect("create");

        // Act
        let reply = echo.handle_message(b"*IDN?").await.expect("reply");

        // Assert
        assert_eq!(single(reply), b"*IDN?\r\n");
    }

    #[tokio::test]
    async fn test_greeting_only_when_configured() {
        let peer = Peer::Tcp("127.0.0.1:1".parse().expect("addr"));
        let silent = create("e", Options::new()).expect("create");
        let chatty = create("e", options(json!({"greeting": "READY"}))).expect("create");

        assert!(silent.on_connection(&peer).await.expect("hook").is_none());
        assert_eq!(single(chatty.on_connection(&peer).await.expect("hook")), b"READY\n");
    }

    #[test]
    fn test_non_string_greeting_is_rejected() {
        let result = create("e", options(json!({"greeting": 3})));
        assert!(matches!(result, Err(DeviceError::InvalidOption { .. })));
    }
}
