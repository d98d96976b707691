use crate::config::ServerConfig;
use crate::node::MwebNode;
use crate::onion::Onion;
use crate::server::{PeerClient, SwapError, SwapServer, SwapServerImpl};
use crate::store::SwapStore;

use grin_util::{self, StopState, ToHex};
use jsonrpc_core::{ErrorCode, IoHandler};
use jsonrpc_derive::rpc;
use jsonrpc_http_server::ServerBuilder;
use log::{error, info};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// The `swap` JSON-RPC namespace
#[rpc(server)]
pub trait SwapApi {
	/// User-facing submission of a new onion. Coordinator only.
	#[rpc(name = "swap_swap")]
	fn swap(&self, onion: Onion) -> jsonrpc_core::Result<()>;

	/// Peer-to-peer: the encrypted forward batch, hex encoded.
	#[rpc(name = "swap_forward")]
	fn forward(&self, data: String) -> jsonrpc_core::Result<()>;

	/// Peer-to-peer: the encrypted settlement leg, hex encoded.
	#[rpc(name = "swap_backward")]
	fn backward(&self, data: String) -> jsonrpc_core::Result<()>;
}

struct RpcServer {
	server: Arc<SwapServerImpl>,
}

fn into_rpc_error(err: SwapError) -> jsonrpc_core::Error {
	jsonrpc_core::Error {
		code: ErrorCode::ServerError(-32000),
		message: err.to_string(),
		data: None,
	}
}

fn parse_hex(data: &str) -> jsonrpc_core::Result<Vec<u8>> {
	grin_util::from_hex(data).map_err(|_| jsonrpc_core::Error::invalid_params("expected hex"))
}

impl SwapApi for RpcServer {
	fn swap(&self, onion: Onion) -> jsonrpc_core::Result<()> {
		self.server.submit(&onion).map_err(into_rpc_error)
	}

	fn forward(&self, data: String) -> jsonrpc_core::Result<()> {
		self.server
			.forward(&parse_hex(&data)?)
			.map_err(into_rpc_error)
	}

	fn backward(&self, data: String) -> jsonrpc_core::Result<()> {
		self.server
			.backward(&parse_hex(&data)?)
			.map_err(into_rpc_error)
	}
}

/// Fire-and-forget JSON-RPC calls to neighboring mix nodes. Each call runs
/// on its own thread; a failed peer kills the round on its side only.
pub struct HttpPeerClient;

impl HttpPeerClient {
	pub fn new() -> HttpPeerClient {
		HttpPeerClient
	}

	fn call(url: &str, method: &'static str, data: Vec<u8>) -> Result<(), SwapError> {
		let body = json!({
			"jsonrpc": "2.0",
			"method": method,
			"params": [data.to_hex()],
			"id": 1,
		})
		.to_string();

		let url = url.to_owned();
		let mut rt = tokio::runtime::Runtime::new()
			.map_err(|e| SwapError::UnknownError(e.to_string()))?;
		let response = rt.block_on(async move {
			let req = hyper::Request::post(url.as_str())
				.header("Content-Type", "application/json")
				.body(hyper::Body::from(body))
				.map_err(|e| SwapError::UnknownError(e.to_string()))?;

			let client = hyper::Client::new();
			let res = client
				.request(req)
				.await
				.map_err(|e| SwapError::PeerUnavailable(e.to_string()))?;
			hyper::body::to_bytes(res.into_body())
				.await
				.map_err(|e| SwapError::PeerUnavailable(e.to_string()))
		})?;

		let reply: serde_json::Value = serde_json::from_slice(&response)
			.map_err(|e| SwapError::UnknownError(e.to_string()))?;
		if let Some(err) = reply.get("error") {
			if !err.is_null() {
				return Err(SwapError::UnknownError(err.to_string()));
			}
		}
		Ok(())
	}

	fn dispatch(&self, url: &str, method: &'static str, data: Vec<u8>) {
		let url = url.to_owned();
		thread::spawn(move || {
			if let Err(e) = HttpPeerClient::call(&url, method, data) {
				error!("{}: {}", method, e);
			}
		});
	}
}

impl PeerClient for HttpPeerClient {
	fn send_forward(&self, url: &str, data: Vec<u8>) {
		self.dispatch(url, "swap_forward", data);
	}

	fn send_backward(&self, url: &str, data: Vec<u8>) {
		self.dispatch(url, "swap_backward", data);
	}
}

/// Starts the JSON-RPC server and, on the coordinator, the periodic round
/// scheduler. Blocks until the stop state fires.
pub fn listen(
	server_config: ServerConfig,
	node: Arc<dyn MwebNode>,
	store: SwapStore,
	stop_state: Arc<StopState>,
) -> Result<(), Box<dyn std::error::Error>> {
	let addr = server_config.addr;
	let interval = Duration::from_secs(server_config.interval_s as u64);
	let swap_on_startup = server_config.swap_on_startup;

	let server = Arc::new(SwapServerImpl::new(
		server_config,
		node,
		Arc::new(HttpPeerClient::new()),
		store,
	)?);

	let mut io = IoHandler::new();
	io.extend_with(
		RpcServer {
			server: server.clone(),
		}
		.to_delegate(),
	);

	let http_server = ServerBuilder::new(io).start_http(&addr)?;
	info!("Listening on {}", addr);

	// the periodic tick initiating rounds, coordinator only
	let scheduler = server.clone();
	let scheduler_stop = stop_state.clone();
	let scheduler_thread = thread::spawn(move || {
		if !scheduler.is_coordinator() {
			return;
		}
		let mut next_round = if swap_on_startup {
			Instant::now()
		} else {
			Instant::now() + interval
		};
		while !scheduler_stop.is_stopped() {
			if Instant::now() >= next_round {
				if let Err(e) = scheduler.execute_round() {
					error!("Swap round failed: {}", e);
				}
				next_round = Instant::now() + interval;
			}
			thread::sleep(Duration::from_secs(1));
		}
	});

	let close_handle = http_server.close_handle();
	let stop_thread = thread::spawn(move || {
		while !stop_state.is_stopped() {
			thread::sleep(Duration::from_millis(100));
		}
		close_handle.close();
	});

	http_server.wait();
	let _ = scheduler_thread.join();
	let _ = stop_thread.join();
	Ok(())
}
