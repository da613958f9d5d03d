//! WebSocket endpoint bridging device sockets into the session manager.
//!
//! Each device connects to `/ws?device_id=...`; the socket's sink drains the
//! device's outbound queue while inbound frames are parsed into envelopes
//! and routed through the registry. A closed socket becomes a session
//! disconnect — task state survives for the next login.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use fleet::Context;
use fleet_protocol::{ClientKind, Envelope};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::config::Config;

#[derive(Debug, Deserialize)]
struct ConnectQuery {
	device_id: String,
	#[serde(default)]
	client_type: Option<ClientKind>,
}

pub async fn serve(ctx: Arc<Context>, config: &Config) -> Result<()> {
	let app = Router::new()
		.route("/", get(|| async { "OK" }))
		.route(
			"/ws",
			get(
				|Query(query): Query<ConnectQuery>,
				 ws: WebSocketUpgrade,
				 State(ctx): State<Arc<Context>>| async move {
					ws_upgrade(query, ws, ctx)
				},
			),
		)
		.with_state(ctx);

	let addr = config.bind_addr();
	let listener = TcpListener::bind(&addr)
		.await
		.with_context(|| format!("binding {addr}"))?;
	info!(addr = %addr, "fleetd listening");

	axum::serve(listener, app.into_make_service())
		.await
		.context("server loop")?;
	Ok(())
}

fn ws_upgrade(query: ConnectQuery, ws: WebSocketUpgrade, ctx: Arc<Context>) -> impl IntoResponse {
	let client = query.client_type.unwrap_or(ClientKind::Device);
	ws.on_upgrade(move |socket| handle_socket(socket, ctx, query.device_id, client))
}

async fn handle_socket(socket: WebSocket, ctx: Arc<Context>, device_id: String, client: ClientKind) {
	let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Envelope>();
	let device = match ctx.devices.connect(&device_id, client, outbound_tx) {
		Ok(device) => device,
		Err(e) => {
			warn!(device = %device_id, "connect rejected: {e}");
			return;
		}
	};
	info!(device = %device_id, "device connected");

	let (mut sink, mut source) = socket.split();

	// Writer: drain the device's outbound queue onto the socket.
	let mut outbound = UnboundedReceiverStream::new(outbound_rx);
	let writer = tokio::spawn(async move {
		while let Some(envelope) = outbound.next().await {
			let text = match serde_json::to_string(&envelope) {
				Ok(text) => text,
				Err(e) => {
					warn!("envelope serialization failed: {e}");
					continue;
				}
			};
			if sink.send(Message::Text(text.into())).await.is_err() {
				break;
			}
		}
	});

	// Reader: parse and route inbound envelopes.
	while let Some(frame) = source.next().await {
		let text = match frame {
			Ok(Message::Text(text)) => text,
			Ok(Message::Close(_)) | Err(_) => break,
			Ok(_) => continue,
		};
		let envelope: Envelope = match serde_json::from_str(&text) {
			Ok(envelope) => envelope,
			Err(e) => {
				warn!(device = %device_id, "unparseable frame dropped: {e}");
				continue;
			}
		};
		debug!(device = %device_id, "inbound envelope");
		match ctx.devices.handle_envelope(&device_id, envelope).await {
			Ok(Some(reply)) => {
				if let Err(e) = device.send(reply) {
					warn!(device = %device_id, "reply not sent: {e}");
				}
			}
			Ok(None) => {}
			Err(e) => warn!(device = %device_id, "envelope handling failed: {e}"),
		}
	}

	if let Err(e) = ctx.devices.disconnect(&device_id) {
		debug!(device = %device_id, "disconnect: {e}");
	}
	writer.abort();
	info!(device = %device_id, "device disconnected");
}
