//! HTTP endpoints served next to the WebSocket gateway

pub mod health;
