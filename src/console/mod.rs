//! Operator console over a Unix socket.

pub mod client;
pub mod handler;
pub mod protocol;
pub mod server;

pub use client::send_command;
pub use handler::{ConsoleHandler, RegistryConsole};
pub use protocol::{ConsoleCommand, ConsoleReply};
pub use server::ConsoleServer;
