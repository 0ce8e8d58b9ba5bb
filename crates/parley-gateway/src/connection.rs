use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::api::Claims;
use parley_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Consecutive unanswered Pings (~30s) after which the connection is dropped.
const MAX_MISSED_PONGS: u8 = 2;

/// Time a client has to send Identify after connecting.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Handle a single WebSocket connection: Identify handshake, Ready, then
/// relay events until either side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let Some(user_id) = handshake(&mut receiver, &mut sender, &jwt_secret).await else {
        return;
    };

    run_connection_loop(sender, receiver, dispatcher, user_id).await;
    info!("{} disconnected from gateway", user_id);
}

/// Wait for a valid Identify, then answer with Ready.
/// `None` means the connection should be closed.
async fn handshake<R, W, E>(receiver: &mut R, sender: &mut W, jwt_secret: &str) -> Option<Uuid>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    W: Sink<Message> + Unpin,
{
    let Some(user_id) = wait_for_identify(receiver, jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return None;
    };

    if !send_event(sender, &GatewayEvent::Ready { user_id }).await {
        return None;
    }
    Some(user_id)
}

/// Resolve a text frame received before identification.
///
/// Returns `None` for frames that are not an Identify command, which are
/// ignored. An Identify frame yields the token's subject or the reason the
/// token was rejected.
pub fn identify(
    text: &str,
    jwt_secret: &str,
) -> Option<Result<Uuid, jsonwebtoken::errors::Error>> {
    let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(text)
    else {
        return None;
    };

    Some(
        decode::<Claims>(
            &token,
            &DecodingKey::from_secret(jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims.sub),
    )
}

/// Counts consecutive heartbeats that went unanswered.
#[derive(Debug, Default)]
struct Heartbeat {
    missed: u8,
}

impl Heartbeat {
    /// Record a heartbeat tick. Returns `false` once the peer has missed
    /// [`MAX_MISSED_PONGS`] Pongs in a row.
    fn tick(&mut self, pong_received: bool) -> bool {
        if pong_received {
            self.missed = 0;
        } else {
            self.missed += 1;
        }
        self.missed < MAX_MISSED_PONGS
    }
}

/// Whether a client subscribed to `subscriptions` should receive `event`.
/// Channel-scoped events only reach subscribers of that channel; the rest are global.
pub fn should_deliver(event: &GatewayEvent, subscriptions: &HashSet<Uuid>) -> bool {
    match event.channel_id() {
        Some(channel_id) => subscriptions.contains(&channel_id),
        None => true,
    }
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    user_id: Uuid,
) {
    let mut broadcast_rx = dispatcher.subscribe();
    info!(
        "{} connected to gateway ({} connections)",
        user_id,
        dispatcher.connection_count()
    );

    // Per-connection channel subscriptions (shared between send and recv tasks).
    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut liveness = Heartbeat::default();

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver for {} lagged by {} events", user_id, n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    let deliver = match send_subscriptions.read() {
                        Ok(subs) => should_deliver(&event, &subs),
                        Err(_) => break,
                    };
                    if deliver && !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if !liveness.tick(pong_flag_send.swap(false, Ordering::Acquire)) {
                        warn!("Heartbeat timeout for {} (missed {} pongs), dropping connection", user_id, liveness.missed);
                        break;
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_subscriptions = subscriptions.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(user_id, cmd, &recv_subscriptions),
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

fn handle_command(user_id: Uuid, cmd: GatewayCommand, subscriptions: &Subscriptions) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { channel_ids } => {
            info!("{} subscribing to {} channels", user_id, channel_ids.len());
            match subscriptions.write() {
                Ok(mut subs) => *subs = channel_ids.into_iter().collect(),
                Err(e) => warn!("Subscription lock poisoned for {}: {}", user_id, e),
            }
        }
    }
}

async fn wait_for_identify<R, E>(receiver: &mut R, jwt_secret: &str) -> Option<Uuid>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let identified = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else {
                continue;
            };
            match identify(&text, jwt_secret) {
                Some(Ok(user_id)) => return Some(user_id),
                Some(Err(e)) => {
                    debug!("Gateway identify rejected: {}", e);
                    return None;
                }
                None => {}
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identified)
        .await
        .ok()
        .flatten()
}

async fn send_event<W>(sender: &mut W, event: &GatewayEvent) -> bool
where
    W: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
