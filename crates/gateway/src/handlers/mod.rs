//! HTTP and WebSocket handlers

pub mod health;
pub mod images;
pub mod ws;
