pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod line;
pub mod server;
pub mod session;
pub mod shell;
