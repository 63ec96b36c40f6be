//! Transport tests against local mock servers

mod http;
mod websocket;
