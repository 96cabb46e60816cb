//! Types shared between the jukebox daemon and its clients: configuration,
//! platform paths, and the socket/HTTP wire protocol.

pub mod config;
pub mod platform;
pub mod protocol;
