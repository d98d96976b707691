use crate::tx::StealthAddress;
use crate::types::XPubKey;

use grin_util::ToHex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use x25519_dalek::StaticSecret;

/// Config error types
#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("Error reading config file: {0}")]
	ReadError(String),
	#[error("Error parsing config file: {0}")]
	ParseError(String),
	#[error("Error writing config file: {0}")]
	WriteError(String),
	#[error("Invalid server key")]
	InvalidKey,
	#[error("Invalid entry for node {0}")]
	InvalidNode(String),
	#[error("Invalid fee address")]
	InvalidFeeAddress,
}

/// One mix node as configured: where to reach it and its static X25519 key.
/// The position in the configured list is the node's index in the chain.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeDescriptor {
	pub url: String,
	pub pubkey: XPubKey,
}

/// The server's runtime configuration.
#[derive(Clone)]
pub struct ServerConfig {
	/// The server's static X25519 secret key
	pub key: StaticSecret,
	/// Seconds between swap rounds, only meaningful on the coordinator
	pub interval_s: u32,
	/// Socket address the JSON-RPC server binds
	pub addr: SocketAddr,
	/// URL of the chain service
	pub node_url: String,
	/// Stealth address collecting this node's fee surplus
	pub fee_address: StealthAddress,
	/// Fire one swap round immediately at startup
	pub swap_on_startup: bool,
	/// The ordered mix node chain; must contain this server's own key
	pub nodes: Vec<NodeDescriptor>,
}

impl ServerConfig {
	/// The server's public key
	pub fn server_pubkey(&self) -> XPubKey {
		XPubKey::from_secret(&self.key)
	}

	/// This server's position in the node chain, if present
	pub fn node_index(&self) -> Option<usize> {
		let own_pubkey = self.server_pubkey();
		self.nodes.iter().position(|n| n.pubkey == own_pubkey)
	}
}

// On-disk TOML shape, hex for all key material.
#[derive(Serialize, Deserialize)]
struct RawConfig {
	key: String,
	interval_s: u32,
	addr: String,
	node_url: String,
	fee_address: String,
	#[serde(default)]
	swap_on_startup: bool,
	nodes: Vec<RawNode>,
}

#[derive(Serialize, Deserialize)]
struct RawNode {
	url: String,
	pubkey: String,
}

fn parse_xpubkey(hex: &str) -> Option<XPubKey> {
	let bytes = grin_util::from_hex(hex).ok()?;
	if bytes.len() != 32 {
		return None;
	}
	let mut key = [0u8; 32];
	key.copy_from_slice(&bytes);
	Some(XPubKey(key))
}

/// Reads the server config from the given TOML file
pub fn load_config(config_path: &Path) -> Result<ServerConfig, ConfigError> {
	let contents =
		fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
	let raw: RawConfig =
		toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

	let key_bytes = grin_util::from_hex(&raw.key).map_err(|_| ConfigError::InvalidKey)?;
	if key_bytes.len() != 32 {
		return Err(ConfigError::InvalidKey);
	}
	let mut key = [0u8; 32];
	key.copy_from_slice(&key_bytes);

	let mut nodes = Vec::with_capacity(raw.nodes.len());
	for node in raw.nodes {
		let pubkey =
			parse_xpubkey(&node.pubkey).ok_or(ConfigError::InvalidNode(node.url.clone()))?;
		nodes.push(NodeDescriptor {
			url: node.url,
			pubkey,
		});
	}

	Ok(ServerConfig {
		key: StaticSecret::from(key),
		interval_s: raw.interval_s,
		addr: raw
			.addr
			.parse()
			.map_err(|_| ConfigError::ParseError("invalid bind address".to_owned()))?,
		node_url: raw.node_url,
		fee_address: StealthAddress::from_hex(&raw.fee_address)
			.map_err(|_| ConfigError::InvalidFeeAddress)?,
		swap_on_startup: raw.swap_on_startup,
		nodes,
	})
}

/// Writes the server config to the given TOML file
pub fn write_config(config_path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
	let raw = RawConfig {
		key: config.key.to_bytes().to_vec().to_hex(),
		interval_s: config.interval_s,
		addr: config.addr.to_string(),
		node_url: config.node_url.clone(),
		fee_address: config.fee_address.to_hex(),
		swap_on_startup: config.swap_on_startup,
		nodes: config
			.nodes
			.iter()
			.map(|n| RawNode {
				url: n.url.clone(),
				pubkey: n.pubkey.0.to_vec().to_hex(),
			})
			.collect(),
	};

	let contents = toml::to_string(&raw).map_err(|e| ConfigError::WriteError(e.to_string()))?;
	fs::write(config_path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;
	Ok(())
}

/// The default directory holding the config file and the onion db
pub fn default_data_dir() -> PathBuf {
	let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
	path.push(".coinswap");
	path
}
