use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, trace, warn};

use oabridge_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Handle one dashboard WebSocket connection.
///
/// The client drives its subscription set with `Subscribe` commands;
/// the server forwards every gateway event whose account is in that
/// set. A client that never subscribes receives nothing.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = dispatcher.subscribe();
    let mut subscriptions: HashSet<String> = HashSet::new();

    info!("Dashboard client connected to gateway");

    loop {
        tokio::select! {
            event = broadcast_rx.recv() => {
                let event = match event {
                    Ok(e) => e,
                    // Lagged: slow client missed events; the next
                    // projection read recovers them, keep going.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Gateway client lagged, skipped {} events", n);
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                if !subscriptions.contains(event.oa_id()) {
                    continue;
                }

                let text = match serde_json::to_string(&event) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Could not serialize gateway event: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<GatewayCommand>(&text) {
                            Ok(GatewayCommand::Subscribe { oa_ids }) => {
                                trace!("Gateway client subscribed to {:?}", oa_ids);
                                subscriptions = oa_ids.into_iter().collect();
                            }
                            Err(e) => warn!("Bad gateway command: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Gateway socket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    info!("Dashboard client disconnected from gateway");
}
