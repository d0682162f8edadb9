pub mod auth;
pub mod handshake;
pub mod logs;
