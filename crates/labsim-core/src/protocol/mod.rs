//! Protocol module: message framing and transmission timing.

pub mod delay;
pub mod framing;

pub use delay::{transmission_time, BITS_PER_BYTE};
pub use framing::{Framing, LineFramer, DEFAULT_CHUNK_SIZE};
