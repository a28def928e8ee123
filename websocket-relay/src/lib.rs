//! WebSocket broadcast relay with a static file responder on the same port.
//!
//! Every message a client sends is relayed, byte for byte, to every client
//! that is connected at that moment, the sender included. Plain HTTP requests
//! are answered from a local asset directory.
//!
//! - [`hub`] owns the registry of live channels and the broadcast fan-out.
//! - [`server`] binds the port, routes upgrades to the hub and everything
//!   else to the asset directory, and runs one session task per socket.
//! - [`client`] is a terminal publisher that sends stdin lines and prints
//!   every broadcast.
//! - [`cli`] and [`config`] turn command-line flags and environment variables
//!   into a [`config::RelayConfig`].
//! - [`message`] holds the opaque [`message::Payload`] and the optional
//!   transcript envelope.
//! - [`error`] defines the typed errors the library returns.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod message;
pub mod server;
