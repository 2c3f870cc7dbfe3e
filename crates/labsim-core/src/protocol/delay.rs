//! Baud-rate transmission time model.
//!
//! # Why simulate a delay? (for beginners)
//!
//! A real instrument attached through an RS-232 line cannot answer faster than
//! its wire allows.  At 9600 baud a 1000-byte reply takes about a second to
//! arrive.  Client software written against real hardware often depends on
//! that pacing (timeouts, progress bars, polling loops), so the simulator
//! reproduces it.
//!
//! Each byte on an asynchronous serial line is framed by a start bit, eight
//! data bits and a stop bit (parity optional), so roughly ten bits travel per
//! byte.  The byte rate is therefore `baudrate / 10`.
//!
//! This module only computes the duration.  The async sleep lives in the
//! server crate so that `labsim-core` stays runtime-free.

use std::time::Duration;

/// Number of line bits used to transmit one byte (start + 8 data + stop).
pub const BITS_PER_BYTE: f64 = 10.0;

/// Returns how long `nb_bytes` would take to cross a serial line running at
/// `baudrate` bits per second.
///
/// Returns `None` when no delay should be applied: the baud rate is unset or
/// zero.  Negative rates cannot be expressed; absurdly small positive rates
/// are not validated.
///
/// # Examples
///
/// ```rust
/// use labsim_core::protocol::transmission_time;
///
/// let t = transmission_time(960, Some(9600)).unwrap();
/// assert_eq!(t.as_secs(), 1);
/// assert!(transmission_time(960, None).is_none());
/// ```
pub fn transmission_time(nb_bytes: usize, baudrate: Option<u32>) -> Option<Duration> {
    let baudrate = baudrate.filter(|&b| b > 0)?;
    let byterate = f64::from(baudrate) / BITS_PER_BYTE;
    Some(Duration::from_secs_f64(nb_bytes as f64 / byterate))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
