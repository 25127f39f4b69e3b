//! # zkscan-core
//!
//! Wire-protocol primitives for ZK-family attendance devices:
//! - Typed little-endian byte codec
//! - Frame building with the 16-bit one's-complement checksum
//! - TCP envelope wrap/detect and response parsing
//! - CommKey authentication scramble
//! - The two on-wire time encodings and record layouts
//!
//! Everything in this crate is pure: no sockets, no clocks.

pub mod auth;
pub mod checksum;
pub mod codec;
pub mod command;
pub mod constants;
pub mod error;
pub mod frame;
pub mod records;
pub mod time;

pub use command::Command;
pub use error::{Error, Result};
pub use frame::Response;

/// Default device port
pub const DEFAULT_PORT: u16 = 4370;

/// Inner frame header size
pub const HEADER_SIZE: usize = 8;

/// TCP outer envelope size
pub const TCP_TOP_SIZE: usize = 8;
