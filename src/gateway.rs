use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::unbounded_channel;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use groove_bot::models::SessionKey;
use groove_bot::notify::{NotificationBus, SocketId};

/// Inbound control frame. Anything else a client sends drops its
/// subscription, matching the subscribe-or-nothing protocol.
#[derive(Deserialize)]
struct InboundFrame {
    event: String,
    data: Option<SubscribeData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeData {
    player_id: String,
}

/// Accepts websocket clients and bridges them onto the notification bus.
/// Handshake authentication belongs to the fronting proxy, not here.
pub async fn run(bind: SocketAddr, bus: Arc<NotificationBus>) {
    let listener = match TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!("Socket gateway could not bind {bind}: {err}");
            return;
        }
    };
    info!("Socket gateway listening on {bind}");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let bus = bus.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket(stream, bus).await {
                        info!("Socket from {peer} closed: {err}");
                    }
                });
            }
            Err(err) => warn!("Socket accept failed: {err}"),
        }
    }
}

async fn handle_socket(
    stream: TcpStream,
    bus: Arc<NotificationBus>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut inbound) = ws.split();

    let socket_id = SocketId::new();
    let (tx, mut rx) = unbounded_channel::<String>();
    bus.register_socket(socket_id.clone(), tx);
    info!("Socket {socket_id} connected");

    // Single writer per socket: this task is the only sender, so events
    // reach the client in publish order.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = inbound.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                info!("Socket {socket_id} errored: {err}");
                break;
            }
        };
        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_text() else {
            continue;
        };
        match parse_subscribe(text) {
            Some(key) => bus.subscribe(key, &socket_id),
            None => bus.unsubscribe(&socket_id),
        }
    }

    bus.on_socket_closed(&socket_id);
    writer.abort();
    info!("Socket {socket_id} closed");
    Ok(())
}

fn parse_subscribe(text: &str) -> Option<SessionKey> {
    let frame: InboundFrame = serde_json::from_str(text).ok()?;
    if frame.event != "subscribe" {
        return None;
    }
    frame.data?.player_id.parse().ok().map(SessionKey)
}
