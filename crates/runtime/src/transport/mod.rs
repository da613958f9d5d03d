//! Transport abstraction and the WebSocket client.
//!
//! A [`Transport`] moves [`Envelope`]s; inbound frames arrive on the
//! receiver handed out at construction. [`WsTransport`] runs its socket on a
//! dedicated worker with bounded reconnect, so connection churn never blocks
//! or panics the callers queueing outbound frames.

use std::time::Duration;

use fleet_protocol::Envelope;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, Result};

pub trait Transport: Send + Sync {
	/// Queues an envelope for delivery. Fails only if the transport has
	/// shut down, never because the link is momentarily re-connecting.
	fn send(&self, envelope: Envelope) -> Result<()>;
}

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
	pub attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		Self {
			attempts: 3,
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(5),
		}
	}
}

impl ReconnectPolicy {
	/// Delay before the given 0-based retry attempt.
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
		exp.min(self.max_delay)
	}
}

/// WebSocket client transport used by the device side.
///
/// `connect` returns immediately; the socket is established (and
/// re-established) by a worker task. Outbound envelopes queue while the link
/// is down and flush once it is up again. After the reconnect budget is
/// exhausted the worker closes the inbound stream, which the session layer
/// observes as going offline.
pub struct WsTransport {
	outbound: mpsc::UnboundedSender<Envelope>,
}

impl WsTransport {
	pub fn connect(url: impl Into<String>, policy: ReconnectPolicy) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
		let url = url.into();
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

		tokio::spawn(run_socket(url, policy, outbound_rx, inbound_tx));

		(
			Self {
				outbound: outbound_tx,
			},
			inbound_rx,
		)
	}
}

impl Transport for WsTransport {
	fn send(&self, envelope: Envelope) -> Result<()> {
		self.outbound.send(envelope).map_err(|_| Error::ChannelClosed)
	}
}

async fn run_socket(
	url: String,
	policy: ReconnectPolicy,
	mut outbound: mpsc::UnboundedReceiver<Envelope>,
	inbound: mpsc::UnboundedSender<Envelope>,
) {
	let mut attempt = 0u32;
	loop {
		let stream = match connect_async(url.as_str()).await {
			Ok((stream, _)) => {
				tracing::info!(url = %url, "transport connected");
				attempt = 0;
				stream
			}
			Err(e) => {
				if attempt >= policy.attempts {
					tracing::error!(url = %url, attempts = attempt, "reconnect budget exhausted: {e}");
					return;
				}
				let delay = policy.delay_for(attempt);
				attempt += 1;
				tracing::warn!(url = %url, attempt, delay_ms = delay.as_millis() as u64, "connect failed: {e}");
				tokio::time::sleep(delay).await;
				continue;
			}
		};

		let (mut sink, mut source) = stream.split();
		loop {
			tokio::select! {
				frame = source.next() => match frame {
					Some(Ok(Message::Text(text))) => match serde_json::from_str::<Envelope>(&text) {
						Ok(envelope) => {
							if inbound.send(envelope).is_err() {
								// Receiver dropped: session is gone, stop the worker.
								return;
							}
						}
						Err(e) => tracing::warn!("unparseable frame dropped: {e}"),
					},
					Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
					Some(Ok(Message::Close(_))) | None => {
						tracing::warn!(url = %url, "transport closed by peer");
						break;
					}
					Some(Ok(_)) => {}
					Some(Err(e)) => {
						tracing::warn!(url = %url, "transport read error: {e}");
						break;
					}
				},
				envelope = outbound.recv() => match envelope {
					Some(envelope) => {
						let text = match serde_json::to_string(&envelope) {
							Ok(text) => text,
							Err(e) => {
								tracing::error!("envelope serialization failed: {e}");
								continue;
							}
						};
						if let Err(e) = sink.send(Message::Text(text.into())).await {
							tracing::warn!(url = %url, "transport write error: {e}");
							break;
						}
					}
					None => return,
				},
			}
		}
		// Fall through to reconnect with the remaining budget.
	}
}

/// In-process transport pair for tests and same-host wiring: whatever one
/// end sends arrives on the other end's inbound receiver.
pub struct LoopbackTransport {
	peer: mpsc::UnboundedSender<Envelope>,
}

impl LoopbackTransport {
	#[allow(clippy::type_complexity)]
	pub fn pair() -> (
		(Self, mpsc::UnboundedReceiver<Envelope>),
		(Self, mpsc::UnboundedReceiver<Envelope>),
	) {
		let (a_tx, a_rx) = mpsc::unbounded_channel();
		let (b_tx, b_rx) = mpsc::unbounded_channel();
		((Self { peer: b_tx }, a_rx), (Self { peer: a_tx }, b_rx))
	}
}

impl Transport for LoopbackTransport {
	fn send(&self, envelope: Envelope) -> Result<()> {
		self.peer.send(envelope).map_err(|_| Error::ChannelClosed)
	}
}
