use std::{
    future::Future,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::Result;
use axum::{
    Router,
    extract::{
        ConnectInfo, Request, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::{net::TcpListener, select};
use tower::ServiceExt;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    error::ServeError,
    hub::{Channel, Hub},
    message::Payload,
};

/// A bound listener plus the hub its sessions share.
pub struct Relay {
    listener: TcpListener,
    hub: Hub,
    static_dir: PathBuf,
}

impl Relay {
    /// Binds the configured address. A bind failure is fatal to the caller.
    pub async fn bind(config: RelayConfig) -> Result<Self, ServeError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| ServeError::Bind {
                addr: config.listen,
                source,
            })?;
        if !config.static_dir.is_dir() {
            warn!(dir = %config.static_dir.display(), "static asset directory does not exist");
        }
        Ok(Self::new(listener, &config))
    }

    pub fn new(listener: TcpListener, config: &RelayConfig) -> Self {
        Self {
            listener,
            hub: Hub::new(config.hub_options()),
            static_dir: config.static_dir.clone(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Hub {
        self.hub.clone()
    }

    /// Serves until `shutdown` resolves. Every live channel is closed before
    /// the server stops waiting on open connections.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Relay {
            listener,
            hub,
            static_dir,
        } = self;
        let app = router(hub.clone(), &static_dir);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            handle_shutdown(&hub);
        })
        .await?;

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_shutdown(hub: &Hub) {
    info!("relay shutting down");
    hub.close_all();
}

#[derive(Clone)]
struct AppState {
    hub: Hub,
    assets: ServeDir,
}

/// Every path accepts a WebSocket upgrade; anything else is a static asset
/// lookup under `static_dir`.
pub fn router(hub: Hub, static_dir: &Path) -> Router {
    let state = AppState {
        hub,
        assets: ServeDir::new(static_dir),
    };

    Router::new()
        .fallback(relay_or_static)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn relay_or_static(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    upgrade: Option<WebSocketUpgrade>,
    request: Request,
) -> Response {
    let peer = peer.map(|ConnectInfo(addr)| addr);

    match upgrade {
        Some(upgrade) => {
            let hub = state.hub;
            upgrade
                .on_upgrade(move |socket| run_session(socket, hub, peer))
                .into_response()
        }
        None => match state.assets.oneshot(request).await {
            Ok(response) => response.into_response(),
            Err(never) => match never {},
        },
    }
}

async fn run_session(socket: WebSocket, hub: Hub, peer: Option<SocketAddr>) {
    let (channel, mut outbox) = hub.on_connect();
    info!(channel = channel.id(), ?peer, "client connected");

    let (mut sink, mut stream) = socket.split();

    loop {
        select! {
            inbound = stream.next() => {
                if !handle_inbound(inbound, &channel, &hub) {
                    break;
                }
            }
            outbound = outbox.recv() => {
                if !handle_outbound(outbound, &mut sink, &channel).await {
                    break;
                }
            }
        }
    }

    drop(channel);
}

/// Returns false once the client side of the connection is gone.
fn handle_inbound(
    frame: Option<Result<Message, axum::Error>>,
    channel: &Channel,
    hub: &Hub,
) -> bool {
    let message = match frame {
        Some(Ok(message)) => message,
        Some(Err(err)) => {
            debug!(channel = channel.id(), error = ?err, "receive failed");
            return false;
        }
        None => return false,
    };

    let payload = match message {
        Message::Text(text) => {
            info!(channel = channel.id(), bytes = text.len(), %text, "message received");
            Payload::Text(text)
        }
        Message::Binary(bytes) => {
            info!(channel = channel.id(), bytes = bytes.len(), "binary message received");
            Payload::Binary(bytes)
        }
        Message::Close(frame) => {
            debug!(channel = channel.id(), ?frame, "client requested close");
            channel.begin_close();
            return true;
        }
        Message::Ping(_) | Message::Pong(_) => return true,
    };

    let report = hub.on_message(channel.id(), payload);
    debug!(channel = channel.id(), ?report, "broadcast finished");
    true
}

async fn handle_outbound(
    payload: Option<Payload>,
    sink: &mut SplitSink<WebSocket, Message>,
    channel: &Channel,
) -> bool {
    match payload {
        Some(payload) => {
            if let Err(err) = sink.send(into_frame(payload)).await {
                debug!(channel = channel.id(), error = ?err, "failed to deliver message to client");
                return false;
            }
            true
        }
        None => {
            if let Err(err) = sink.send(Message::Close(None)).await {
                debug!(channel = channel.id(), error = ?err, "failed to send close frame");
            }
            false
        }
    }
}

fn into_frame(payload: Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text),
        Payload::Binary(bytes) => Message::Binary(bytes),
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::StatusCode,
    };

    use super::*;

    fn request(uri: &str) -> Request {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn serves_files_from_static_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("app.js"), "console.log('relay');").expect("write asset");

        let response = router(Hub::default(), dir.path())
            .oneshot(request("/app.js"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&body[..], b"console.log('relay');");
    }

    #[tokio::test]
    async fn root_serves_index_html() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("index.html"), "<h1>relay</h1>").expect("write index");

        let response = router(Hub::default(), dir.path())
            .oneshot(request("/"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&body[..], b"<h1>relay</h1>");
    }

    #[tokio::test]
    async fn missing_asset_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");

        let response = router(Hub::default(), dir.path())
            .oneshot(request("/nope.css"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn frames_keep_their_kind() {
        assert_eq!(
            into_frame(Payload::from("hello")),
            Message::Text("hello".to_string())
        );
        assert_eq!(
            into_frame(Payload::from(vec![1, 2, 3])),
            Message::Binary(vec![1, 2, 3])
        );
    }
}
