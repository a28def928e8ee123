use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf};

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve static assets and relay WebSocket messages to every connected client.
    Serve(ServeArgs),
    /// Connect to a relay, publish stdin lines and print every broadcast.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, env = "RELAY_LISTEN", default_value = "0.0.0.0:9000")]
    pub listen: SocketAddr,

    /// Override only the port of `--listen`.
    #[arg(long, env = "RELAY_PORT")]
    pub port: Option<u16>,

    /// Directory served for plain HTTP requests.
    #[arg(long, env = "RELAY_STATIC_DIR", default_value = "public")]
    pub static_dir: PathBuf,

    /// Do not send a message back to the client that sent it.
    #[arg(long, env = "RELAY_NO_ECHO")]
    pub no_echo: bool,

    /// Messages queued per client before further ones are dropped for it.
    #[arg(long, env = "RELAY_SEND_QUEUE", default_value = "128")]
    pub send_queue: NonZeroUsize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// WebSocket URL of the relay.
    #[arg(long, default_value = "ws://127.0.0.1:9000")]
    pub server: String,

    /// Wrap each line in a JSON transcript envelope under this speaker label.
    #[arg(long)]
    pub speaker: Option<String>,
}
