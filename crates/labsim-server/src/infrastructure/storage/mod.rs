//! Storage infrastructure: reading the device list from disk.
//!
//! The `config_file` sub-module picks a parser from the file extension and
//! deserializes the file into a [`labsim_core::SimulatorConfig`].  The
//! schema itself lives in `labsim-core`.

pub mod config_file;
