use config::ServerConfig;
use node::HttpMwebNode;
use store::SwapStore;

use clap::App;
use grin_util::{StopState, ToHex};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;

#[macro_use]
extern crate clap;

mod config;
mod node;
mod onion;
mod rpc;
mod secp;
mod server;
mod store;
mod tx;
mod types;
mod validation;

const DEFAULT_INTERVAL: u32 = 12 * 60 * 60;

fn main() {
	real_main().unwrap();
	std::process::exit(0);
}

fn real_main() -> Result<(), Box<dyn std::error::Error>> {
	env_logger::init();

	let yml = load_yaml!("../coinswapd.yml");
	let args = App::from_yaml(yml).get_matches();

	let config_path = match args.value_of("config_file") {
		Some(path) => PathBuf::from(path),
		None => {
			let mut path = config::default_data_dir();
			path.push("coinswapd-config.toml");
			path
		}
	};

	let round_time = args
		.value_of("round_time")
		.map(|t| t.parse::<u32>())
		.transpose()?;
	let bind_addr = args.value_of("bind_addr");
	let node_url = args.value_of("node_url");

	// Write a new config file if init-config command is supplied
	if let ("init-config", Some(sub_args)) = args.subcommand() {
		if config_path.exists() {
			panic!(
				"Config file already exists at {}",
				config_path.to_string_lossy()
			);
		}

		let fee_address = tx::StealthAddress::from_hex(sub_args.value_of("fee_address").unwrap())?;
		let addr = bind_addr.unwrap_or("0.0.0.0:3000").parse()?;
		let mut server_config = ServerConfig {
			key: x25519_dalek::StaticSecret::new(&mut rand::rngs::OsRng),
			interval_s: round_time.unwrap_or(DEFAULT_INTERVAL),
			addr,
			node_url: node_url.unwrap_or("http://127.0.0.1:9332").to_owned(),
			fee_address,
			swap_on_startup: false,
			nodes: Vec::new(),
		};

		// seed the node list with this server; the full chain is appended
		// by hand once the operators have exchanged keys
		server_config.nodes.push(config::NodeDescriptor {
			url: format!("http://{}", addr),
			pubkey: server_config.server_pubkey(),
		});

		if let Some(dir) = config_path.parent() {
			std::fs::create_dir_all(dir)?;
		}
		config::write_config(&config_path, &server_config)?;
		println!(
			"Config file written to {:?}. Please back this file up in a safe place.",
			config_path
		);
		println!(
			"This node's public key: {}",
			server_config.server_pubkey().0.to_vec().to_hex()
		);
		return Ok(());
	}

	let mut server_config = config::load_config(&config_path)?;

	// Override bind_addr, if supplied
	if let Some(bind_addr) = bind_addr {
		server_config.addr = bind_addr.parse()?;
	}

	// Override node_url, if supplied
	if let Some(node_url) = node_url {
		server_config.node_url = node_url.to_owned();
	}

	// Override round_time, if supplied
	if let Some(round_time) = round_time {
		server_config.interval_s = round_time;
	}

	if args.is_present("swap_on_startup") {
		server_config.swap_on_startup = true;
	}

	// Create the chain service client
	let node = Arc::new(HttpMwebNode::new(&server_config.node_url));

	// Open the onion store
	let store = SwapStore::new(
		config::default_data_dir()
			.join("db")
			.to_str()
			.ok_or("db_root path error")?,
	)?;

	let stop_state = Arc::new(StopState::new());
	let stop_state_clone = stop_state.clone();

	let rt = Runtime::new()?;
	rt.spawn(async move {
		futures::executor::block_on(build_signals_fut());
		stop_state_clone.stop();
	});

	// Start the coinswap JSON-RPC HTTP server
	rpc::listen(server_config, node, store, stop_state)
}

async fn build_signals_fut() {
	if cfg!(unix) {
		use tokio::signal::unix::{signal, SignalKind};

		// Listen for SIGINT, SIGQUIT, and SIGTERM
		let mut terminate_signal =
			signal(SignalKind::terminate()).expect("failed to create terminate signal");
		let mut quit_signal = signal(SignalKind::quit()).expect("failed to create quit signal");
		let mut interrupt_signal =
			signal(SignalKind::interrupt()).expect("failed to create interrupt signal");

		futures::future::select_all(vec![
			Box::pin(terminate_signal.recv()),
			Box::pin(quit_signal.recv()),
			Box::pin(interrupt_signal.recv()),
		])
		.await;
	} else {
		tokio::signal::ctrl_c()
			.await
			.expect("failed to install CTRL+C signal handler");
	}
}
