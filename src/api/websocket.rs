use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Extension,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::{services::auth::Claims, storage::redis::RedisClient, AppState};

use super::{
    middleware::{get_device_id, get_user_id},
    rooms::RoomRegistry,
    signaling::{ClientEvent, PublishedEvent, ServerEvent},
};

/// Routing hub for gateway sockets. Point-to-point delivery goes to every
/// connection of the target user, locally and over Redis for other server
/// instances. Published messages carry this process's instance id so the
/// local subscribers skip what was already delivered directly. Room
/// fan-out stays local to this process.
pub struct WsHub {
    clients: RwLock<HashMap<String, mpsc::Sender<ServerEvent>>>,
    rooms: Arc<RoomRegistry>,
    redis: RedisClient,
    instance_id: Uuid,
}

impl WsHub {
    pub fn new(rooms: Arc<RoomRegistry>, redis: RedisClient) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            rooms,
            redis,
            instance_id: Uuid::new_v4(),
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub async fn register(&self, client_id: &str, sender: mpsc::Sender<ServerEvent>) {
        let mut clients = self.clients.write().await;
        clients.insert(client_id.to_string(), sender);
        tracing::info!("Client registered: {}", client_id);
    }

    pub async fn unregister(&self, client_id: &str) {
        let mut clients = self.clients.write().await;
        clients.remove(client_id);
        tracing::info!("Client unregistered: {}", client_id);
    }

    /// Best-effort delivery to every connection of a user. Unknown targets
    /// are dropped without a failure signal to the sender.
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) {
        let prefix = format!("{}:", user_id);
        let clients = self.clients.read().await;
        for (client_id, sender) in clients.iter() {
            if client_id.starts_with(&prefix) {
                let _ = sender.send(event.clone()).await;
            }
        }

        // Other server instances pick this up via their per-user
        // subscriptions; the origin tag stops this instance's own
        // subscribers from delivering a second copy.
        let published = PublishedEvent {
            origin: Some(self.instance_id),
            event,
        };
        if let Ok(msg) = serde_json::to_string(&published) {
            let _ = self.redis.publish_event(&user_id.to_string(), &msg).await;
        }
    }

    pub async fn send_to_client(&self, client_id: &str, event: ServerEvent) {
        let clients = self.clients.read().await;
        if let Some(sender) = clients.get(client_id) {
            let _ = sender.send(event).await;
        }
    }

    /// Fan out to every room member except the originating socket.
    pub async fn broadcast_room(&self, call_id: Uuid, skip_client: &str, event: ServerEvent) {
        let members = self.rooms.members(call_id).await;
        let clients = self.clients.read().await;
        for member in members {
            if member == skip_client {
                continue;
            }
            if let Some(sender) = clients.get(&member) {
                let _ = sender.send(event.clone()).await;
            }
        }
    }
}

pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Response {
    let user_id = get_user_id(&claims).unwrap_or_default();
    let device_id = get_device_id(&claims).unwrap_or(1);

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, device_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid, device_id: i32) {
    let client_id = format!("{}:{}", user_id, device_id);
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<ServerEvent>(256);

    state.ws_hub.register(&client_id, tx.clone()).await;

    let _ = state
        .redis
        .set_user_presence(&user_id.to_string(), "online", Duration::from_secs(300))
        .await;

    // Forward events published for this user, skipping what this
    // instance's hub already delivered directly.
    let redis_client = state.redis.clone();
    let user_id_str = user_id.to_string();
    let tx_clone = tx.clone();
    let instance_id = state.ws_hub.instance_id();

    let mut redis_task = tokio::spawn(async move {
        if let Ok(mut pubsub) = redis_client.subscribe_events(&user_id_str).await {
            while let Some(msg) = pubsub.on_message().next().await {
                if let Ok(payload) = msg.get_payload::<String>() {
                    if let Ok(published) = serde_json::from_str::<PublishedEvent>(&payload) {
                        if published.should_forward(instance_id) {
                            let _ = tx_clone.send(published.event).await;
                        }
                    }
                }
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    let hub = state.ws_hub.clone();
    let client_id_for_recv = client_id.clone();

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        handle_client_event(&hub, user_id, &client_id_for_recv, event).await;
                    }
                    Err(e) => {
                        tracing::warn!("Malformed event from {}: {}", client_id_for_recv, e);
                    }
                },
                Ok(Message::Ping(data)) => {
                    // Pong is handled automatically by axum
                    let _ = data;
                }
                Ok(Message::Close(_)) => break,
                Err(_) => break,
                _ => {}
            }
        }
    });

    // Whichever side finishes first, the survivors must not outlive the
    // socket: the forwarder in particular holds a dedicated pub/sub
    // connection and would otherwise loop forever.
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            redis_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
            redis_task.abort();
        },
        _ = &mut redis_task => {
            send_task.abort();
            recv_task.abort();
        },
    }

    // Cleanup: drop the socket from every room it joined and tell each
    // room exactly once.
    let left_rooms = state.ws_hub.rooms().leave_all(&client_id).await;
    for call_id in left_rooms {
        state
            .ws_hub
            .broadcast_room(call_id, &client_id, ServerEvent::ParticipantLeft { call_id, user_id })
            .await;
    }

    state.ws_hub.unregister(&client_id).await;

    let _ = state
        .redis
        .set_user_presence(&user_id.to_string(), "offline", Duration::from_secs(1))
        .await;
}

async fn handle_client_event(hub: &Arc<WsHub>, user_id: Uuid, client_id: &str, event: ClientEvent) {
    match event {
        ClientEvent::Ping => {
            hub.send_to_client(client_id, ServerEvent::Pong).await;
        }
        ClientEvent::Join { call_id } => {
            if hub.rooms().join(call_id, client_id).await {
                hub.broadcast_room(
                    call_id,
                    client_id,
                    ServerEvent::ParticipantJoined { call_id, user_id },
                )
                .await;
            }
        }
        ClientEvent::Leave { call_id } => {
            if hub.rooms().leave(call_id, client_id).await {
                hub.broadcast_room(
                    call_id,
                    client_id,
                    ServerEvent::ParticipantLeft { call_id, user_id },
                )
                .await;
            }
        }
        ClientEvent::Offer {
            call_id,
            target_user_id,
            sdp,
        } => {
            hub.send_to_user(
                target_user_id,
                ServerEvent::OfferReceived {
                    call_id,
                    from_user_id: user_id,
                    sdp,
                },
            )
            .await;
        }
        ClientEvent::Answer {
            call_id,
            target_user_id,
            sdp,
        } => {
            hub.send_to_user(
                target_user_id,
                ServerEvent::AnswerReceived {
                    call_id,
                    from_user_id: user_id,
                    sdp,
                },
            )
            .await;
        }
        ClientEvent::IceCandidate {
            call_id,
            target_user_id,
            candidate,
        } => {
            hub.send_to_user(
                target_user_id,
                ServerEvent::IceCandidateReceived {
                    call_id,
                    from_user_id: user_id,
                    candidate,
                },
            )
            .await;
        }
        ClientEvent::MediaToggle {
            call_id,
            kind,
            enabled,
        } => {
            if !hub.rooms().is_member(call_id, client_id).await {
                return;
            }
            hub.broadcast_room(
                call_id,
                client_id,
                ServerEvent::MediaToggled {
                    call_id,
                    user_id,
                    kind,
                    enabled,
                },
            )
            .await;
        }
        ClientEvent::ScreenStart { call_id } => {
            if !hub.rooms().is_member(call_id, client_id).await {
                return;
            }
            hub.broadcast_room(
                call_id,
                client_id,
                ServerEvent::ScreenStarted { call_id, user_id },
            )
            .await;
        }
        ClientEvent::ScreenStop { call_id } => {
            if !hub.rooms().is_member(call_id, client_id).await {
                return;
            }
            hub.broadcast_room(
                call_id,
                client_id,
                ServerEvent::ScreenStopped { call_id, user_id },
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    // Mirrors the socket teardown: when one side of the connection
    // finishes, the event forwarder must be cancelled rather than left
    // looping on its subscription.
    #[tokio::test]
    async fn surviving_forwarder_is_cancelled_on_teardown() {
        let (_keep_open, mut rx) = mpsc::channel::<()>(1);
        let mut forwarder = tokio::spawn(async move {
            // Never yields on its own while the channel stays open.
            while rx.recv().await.is_some() {}
        });
        let mut closed_socket = tokio::spawn(async {});

        tokio::select! {
            _ = &mut closed_socket => {
                forwarder.abort();
            },
            _ = &mut forwarder => {
                closed_socket.abort();
            },
        }

        assert!(forwarder.await.unwrap_err().is_cancelled());
    }
}
