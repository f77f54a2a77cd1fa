//! WebSocket transport

pub mod connection;
pub mod message;
