use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Map, Value, json};

use super::*;

struct EchoHandler;

impl RpcHandler for EchoHandler {
	fn class_name(&self) -> &'static str {
		"echo"
	}

	fn methods(&self) -> &'static [MethodSpec] {
		const METHODS: &[MethodSpec] = &[
			MethodSpec {
				name: "say",
				params: &[ParamSpec {
					name: "text",
					kind: ParamKind::Str,
				}],
			},
			MethodSpec {
				name: "add",
				params: &[
					ParamSpec {
						name: "a",
						kind: ParamKind::Int,
					},
					ParamSpec {
						name: "b",
						kind: ParamKind::Int,
					},
				],
			},
			MethodSpec {
				name: "since",
				params: &[ParamSpec {
					name: "day",
					kind: ParamKind::Date,
				}],
			},
			MethodSpec {
				name: "whoami",
				params: &[],
			},
		];
		METHODS
	}

	fn invoke<'a>(&'a self, method: &'a str, id: Option<&'a str>, args: Args) -> HandlerFuture<'a> {
		Box::pin(async move {
			match method {
				"say" => Ok(json!(args.str("text")?)),
				"add" => Ok(json!(args.i64("a")? + args.i64("b")?)),
				"since" => Ok(json!(args.date("day")?.to_string())),
				"whoami" => match id {
					Some(id) => Ok(json!(id)),
					None => Err(Error::MissingInstance {
						class: "echo".into(),
						id: String::new(),
					}),
				},
				_ => unreachable!("router filters unknown methods"),
			}
		})
	}
}

fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
	pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn request(id: &str, method: &str, instance: Option<&str>, params: Map<String, Value>) -> RpcRequest {
	RpcRequest {
		request_id: id.to_string(),
		class_name: "echo".to_string(),
		method_name: method.to_string(),
		id: instance.map(str::to_string),
		params,
		device_id: None,
		timeout_ms: 0,
	}
}

/// Sender that counts envelopes but never answers.
struct BlackHole(AtomicUsize);

impl CallSender for BlackHole {
	fn send(&self, _target: &Target, _envelope: Envelope) -> Result<()> {
		self.0.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

#[tokio::test]
async fn local_call_short_circuits_transport() {
	let router = RpcRouter::new();
	router.register(Arc::new(EchoHandler));
	// No sender wired: a local call must still succeed.
	let result = router
		.call(Target::Local, "echo", "say", params(&[("text", json!("hi"))]), 0)
		.await
		.unwrap();
	assert_eq!(result, json!("hi"));
}

#[tokio::test]
async fn unknown_class_and_method_are_errors_not_panics() {
	let router = RpcRouter::new();
	router.register(Arc::new(EchoHandler));

	let err = router
		.call(Target::Local, "nope", "say", Map::new(), 0)
		.await
		.unwrap_err();
	assert!(matches!(err, Error::UnknownClass(_)));

	let err = router
		.call(Target::Local, "echo", "nope", Map::new(), 0)
		.await
		.unwrap_err();
	assert!(matches!(err, Error::UnknownMethod { .. }));
}

#[tokio::test]
async fn string_params_coerce_to_declared_types() {
	let router = RpcRouter::new();
	router.register(Arc::new(EchoHandler));

	// "add" declares integers; string digits coerce.
	let response = router
		.handle_request(&request("r1", "add", None, params(&[("a", json!("2")), ("b", json!(40))])))
		.await;
	assert_eq!(response.result, Some(json!(42)));

	// Dates parse from both plain and datetime forms.
	let response = router
		.handle_request(&request(
			"r2",
			"since",
			None,
			params(&[("day", json!("2025-06-01 08:30:00"))]),
		))
		.await;
	assert_eq!(response.result, Some(json!("2025-06-01")));
}

#[tokio::test]
async fn handle_request_wraps_errors_in_envelope() {
	let router = RpcRouter::new();
	router.register(Arc::new(EchoHandler));

	let response = router.handle_request(&request("r3", "whoami", None, Map::new())).await;
	assert!(response.is_err());
	assert_eq!(response.request_id, "r3");
	assert!(response.result.is_none());
}

#[tokio::test]
async fn instance_id_reaches_handler() {
	let router = RpcRouter::new();
	router.register(Arc::new(EchoHandler));

	let response = router
		.handle_request(&request("r4", "whoami", Some("D1"), Map::new()))
		.await;
	assert_eq!(response.result, Some(json!("D1")));
}

#[tokio::test(start_paused = true)]
async fn timed_out_calls_leave_no_pending_entries() {
	let router = Arc::new(RpcRouter::new());
	router.set_sender(Arc::new(BlackHole(AtomicUsize::new(0))));

	let before = router.pending_len();
	for _ in 0..8 {
		let err = router
			.call(Target::Server, "echo", "say", Map::new(), 50)
			.await
			.unwrap_err();
		assert!(err.is_timeout());
	}
	assert_eq!(router.pending_len(), before);
}

#[tokio::test]
async fn response_resolves_matching_caller() {
	let router = Arc::new(RpcRouter::new());

	// Sender that answers every call out-of-band, like a remote peer.
	struct Replier(Arc<RpcRouter>);
	impl CallSender for Replier {
		fn send(&self, _target: &Target, envelope: Envelope) -> Result<()> {
			let Envelope::RpcCall(request) = envelope else {
				panic!("expected rpc call");
			};
			let router = Arc::clone(&self.0);
			tokio::spawn(async move {
				router.resolve_response(RpcResponse::ok(&request.request_id, json!("pong")));
			});
			Ok(())
		}
	}
	router.set_sender(Arc::new(Replier(Arc::clone(&router))));

	let result = router
		.call(Target::Device("D1".into()), "echo", "say", Map::new(), 1_000)
		.await
		.unwrap();
	assert_eq!(result, json!("pong"));
	assert_eq!(router.pending_len(), 0);
}

#[tokio::test]
async fn remote_error_surfaces_as_remote() {
	let router = Arc::new(RpcRouter::new());

	struct Failer(Arc<RpcRouter>);
	impl CallSender for Failer {
		fn send(&self, _target: &Target, envelope: Envelope) -> Result<()> {
			let Envelope::RpcCall(request) = envelope else {
				panic!("expected rpc call");
			};
			self.0
				.resolve_response(RpcResponse::err(&request.request_id, "no such device"));
			Ok(())
		}
	}
	router.set_sender(Arc::new(Failer(Arc::clone(&router))));

	let err = router
		.call(Target::Device("D9".into()), "echo", "say", Map::new(), 1_000)
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Remote(m) if m == "no such device"));
}

#[test]
fn late_response_is_dropped_quietly() {
	let router = RpcRouter::new();
	router.resolve_response(RpcResponse::ok("gone", Value::Null));
	assert_eq!(router.pending_len(), 0);
}

#[tokio::test]
async fn reregistration_replaces_handler() {
	struct V2;
	impl RpcHandler for V2 {
		fn class_name(&self) -> &'static str {
			"echo"
		}
		fn methods(&self) -> &'static [MethodSpec] {
			const METHODS: &[MethodSpec] = &[MethodSpec {
				name: "version",
				params: &[],
			}];
			METHODS
		}
		fn invoke<'a>(&'a self, _method: &'a str, _id: Option<&'a str>, _args: Args) -> HandlerFuture<'a> {
			Box::pin(async { Ok(json!(2)) })
		}
	}

	let router = RpcRouter::new();
	router.register(Arc::new(EchoHandler));
	router.register(Arc::new(V2));

	let response = router.handle_request(&request("r5", "version", None, Map::new())).await;
	assert_eq!(response.result, Some(json!(2)));
}
