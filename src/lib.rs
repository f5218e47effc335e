//! DUFTP: a stop-and-wait file transfer protocol with fixed-size PDUs.
//!
//! - [`pdu`]       wire format and codec
//! - [`sequence`]  per-session sequence numbering
//! - [`client`]    sending state machine
//! - [`server`]    receiving state machine and accept loop
//! - [`transport`] TCP / QUIC / in-memory connection provider
//! - [`storage`]   chunked reads, staged writes, digests
//! - [`config`]    defaults and the optional config file
//! - [`identity`]  state directory and QUIC certificate

pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod pdu;
pub mod sequence;
pub mod server;
pub mod storage;
pub mod transport;
