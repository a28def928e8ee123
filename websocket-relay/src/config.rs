use std::{net::SocketAddr, path::PathBuf};

use crate::{
    cli::ServeArgs,
    hub::{DEFAULT_SEND_QUEUE, HubOptions},
};

pub const DEFAULT_PORT: u16 = 9000;

/// Resolved settings for one relay process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub static_dir: PathBuf,
    pub echo_to_sender: bool,
    pub send_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            static_dir: PathBuf::from("public"),
            echo_to_sender: true,
            send_queue: DEFAULT_SEND_QUEUE,
        }
    }
}

impl RelayConfig {
    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            echo_to_sender: self.echo_to_sender,
            send_queue: self.send_queue,
        }
    }
}

impl From<ServeArgs> for RelayConfig {
    fn from(args: ServeArgs) -> Self {
        let mut listen = args.listen;
        if let Some(port) = args.port {
            listen.set_port(port);
        }

        Self {
            listen,
            static_dir: args.static_dir,
            echo_to_sender: !args.no_echo,
            send_queue: args.send_queue.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Command};

    fn serve_config(argv: &[&str]) -> RelayConfig {
        let cli = Cli::try_parse_from(argv).expect("parse");
        match cli.command {
            Command::Serve(args) => args.into(),
            Command::Client(_) => panic!("expected serve subcommand"),
        }
    }

    #[test]
    fn port_overrides_listen_port_only() {
        let config = serve_config(&[
            "websocket-relay",
            "serve",
            "--listen",
            "127.0.0.1:5000",
            "--port",
            "9100",
        ]);
        assert_eq!(config.listen, "127.0.0.1:9100".parse().unwrap());
    }

    #[test]
    fn no_echo_disables_echo() {
        let config = serve_config(&["websocket-relay", "serve", "--no-echo", "--send-queue", "4"]);
        assert_eq!(
            config.hub_options(),
            HubOptions {
                echo_to_sender: false,
                send_queue: 4,
            }
        );
    }

    #[test]
    fn defaults_match_cli_defaults() {
        assert_eq!(serve_config(&["websocket-relay", "serve"]), RelayConfig::default());
    }
}
