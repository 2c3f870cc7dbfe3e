//! Built-in demo devices.
//!
//! These are small stand-ins for real instruments, registered in
//! [`Registry::with_builtin_devices`].  They exercise every feature of the
//! transport core: line and raw framing, special messages, streamed replies,
//! greetings and device-level broadcast.
//!
//! | Plugin                     | Framing | Exercises                          |
//! |----------------------------|---------|------------------------------------|
//! | `labsim.echo.Echo`         | `\n`    | round trip, greeting               |
//! | `labsim.streamer.Streamer` | `\r`    | special `S`, streaming, broadcast  |
//! | `labsim.chunk.Chunk`       | raw     | binary chunks                      |

use tracing::error;

use crate::application::registry::{DeviceConstructor, Registry};

pub mod chunk;
pub mod echo;
pub mod streamer;

/// Adds the demo devices to `registry`.
pub fn register_builtins(registry: &mut Registry) {
    let builtins: [(&str, &str, &str, DeviceConstructor); 3] = [
        (
            "labsim.echo",
            "Echo",
            "Echoes every line back",
            echo::create,
        ),
        (
            "labsim.streamer",
            "Streamer",
            "Acquisition device with streamed and continuous frames",
            streamer::create,
        ),
        (
            "labsim.chunk",
            "Chunk",
            "Echoes raw binary chunks",
            chunk::create,
        ),
    ];
    for (module, class, description, constructor) in builtins {
        if let Err(e) = registry.register(module, class, description, constructor) {
            error!("failed to register built-in device {module}.{class}: {e}");
        }
    }
}
