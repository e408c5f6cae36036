//! Wire protocol between the bridge and the viewer process.
//!
//! # Architecture
//!
//! - **codec**: field encoding and the tokio-util frame codec
//! - **protocol**: message types, composer and decoder
//! - **transport**: single-client loopback TCP session

pub mod codec;
pub mod protocol;
pub mod transport;
