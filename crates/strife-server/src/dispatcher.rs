//! One long-running task per channel: decode each incoming frame and invoke
//! the matching handler. A decode or handler failure is logged and the
//! dispatcher keeps running — a single malformed frame never takes a channel
//! down. Files-channel handlers are spawned onto their own task since file
//! I/O can block for a while; general and chats run their handlers in line,
//! so message ordering within those two channels is preserved per-channel.

use std::sync::Arc;

use strife_protocol::decode_client_message;
use strife_protocol::opcodes::Channel;
use tokio::sync::mpsc;
use tracing::warn;

use crate::channel::IncomingFrame;
use crate::handlers;
use crate::state::AppState;

pub fn spawn_dispatcher(state: Arc<AppState>, channel: Channel, mut queue_rx: mpsc::Receiver<IncomingFrame>) {
    tokio::spawn(async move {
        while let Some(frame) = queue_rx.recv().await {
            let Some(raw) = frame.payload else {
                state.registry.logout(frame.peer);
                continue;
            };

            if channel == Channel::Files {
                let state = state.clone();
                tokio::spawn(async move { dispatch_one(&state, channel, frame.peer, &raw).await });
            } else {
                dispatch_one(&state, channel, frame.peer, &raw).await;
            }
        }
    });
}

async fn dispatch_one(state: &AppState, channel: Channel, peer: std::net::SocketAddr, raw: &str) {
    let decoded = match decode_client_message(channel, raw) {
        Ok(d) => d,
        Err(e) => {
            warn!(?channel, %peer, "failed to decode client frame: {e}");
            return;
        }
    };

    if let Err(e) = handlers::dispatch(state, channel, peer, raw, &decoded).await {
        warn!(?channel, %peer, opname = %decoded.opname, "handler failed: {e}");
    }
}
