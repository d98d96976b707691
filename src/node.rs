use crate::tx::{Output, Transaction};

use grin_core::core::hash::Hash;
use grin_core::ser::{self, ProtocolVersion};
use grin_util::ToHex;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

/// Error types for interacting with the chain service
#[derive(Error, Debug)]
pub enum NodeError {
	#[error("Error decoding JSON response: {0:?}")]
	DecodeResponseError(serde_json::Error),
	#[error("JSON-RPC API returned an error: {0}")]
	ApiError(String),
	#[error("Error communicating with the node: {0}")]
	CommError(String),
	#[error("Serialization error occurred: {0:?}")]
	SerError(ser::Error),
}

impl From<ser::Error> for NodeError {
	fn from(err: ser::Error) -> NodeError {
		NodeError::SerError(err)
	}
}

/// The chain service backing a mix node: resolves committed outputs and
/// broadcasts the final settlement transaction.
pub trait MwebNode: Send + Sync {
	/// Looks up an unspent confidential output by its id. None means the
	/// output does not exist or was already spent.
	fn get_utxo(&self, output_id: &Hash) -> Result<Option<Output>, NodeError>;

	/// Broadcasts the finalized transaction.
	fn post_tx(&self, tx: &Transaction) -> Result<(), NodeError>;
}

/// A JSON-RPC client for a remote chain node.
pub struct HttpMwebNode {
	url: String,
}

impl HttpMwebNode {
	pub fn new(url: &str) -> HttpMwebNode {
		HttpMwebNode {
			url: url.to_owned(),
		}
	}

	fn send_json_request<T: DeserializeOwned>(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<T, NodeError> {
		let body = json!({
			"jsonrpc": "2.0",
			"method": method,
			"params": params,
			"id": 1,
		})
		.to_string();

		let url = self.url.clone();
		let mut rt = tokio::runtime::Runtime::new()
			.map_err(|e| NodeError::CommError(e.to_string()))?;
		let response = rt.block_on(async move {
			let req = hyper::Request::post(url.as_str())
				.header("Content-Type", "application/json")
				.body(hyper::Body::from(body))
				.map_err(|e| NodeError::CommError(e.to_string()))?;

			let client = hyper::Client::new();
			let res = client
				.request(req)
				.await
				.map_err(|e| NodeError::CommError(e.to_string()))?;
			hyper::body::to_bytes(res.into_body())
				.await
				.map_err(|e| NodeError::CommError(e.to_string()))
		})?;

		let reply: serde_json::Value =
			serde_json::from_slice(&response).map_err(NodeError::DecodeResponseError)?;
		if let Some(err) = reply.get("error") {
			if !err.is_null() {
				return Err(NodeError::ApiError(err.to_string()));
			}
		}
		serde_json::from_value(reply["result"].clone()).map_err(NodeError::DecodeResponseError)
	}
}

impl MwebNode for HttpMwebNode {
	fn get_utxo(&self, output_id: &Hash) -> Result<Option<Output>, NodeError> {
		let result: Option<String> =
			self.send_json_request("mweb_utxo", json!([output_id.to_hex()]))?;
		let hex = match result {
			Some(hex) => hex,
			None => return Ok(None),
		};

		let bytes = grin_util::from_hex(&hex)
			.map_err(|_| NodeError::ApiError("utxo is not valid hex".to_owned()))?;
		let output: Output = ser::deserialize_default(&mut &bytes[..])?;
		Ok(Some(output))
	}

	fn post_tx(&self, tx: &Transaction) -> Result<(), NodeError> {
		let tx_hex = ser::ser_vec(tx, ProtocolVersion::local())?.to_hex();
		let _: serde_json::Value = self.send_json_request("mweb_broadcast", json!([tx_hex]))?;
		Ok(())
	}
}

#[cfg(test)]
pub mod mock {
	use super::{MwebNode, NodeError};
	use crate::tx::{Output, Transaction};

	use grin_core::core::hash::Hash;
	use std::collections::HashMap;
	use std::sync::RwLock;

	/// An in-memory chain service tracking a mutable UTXO set and recording
	/// every broadcast transaction.
	pub struct MockMwebNode {
		utxos: RwLock<HashMap<Hash, Output>>,
		posted_txns: RwLock<Vec<Transaction>>,
	}

	impl MockMwebNode {
		pub fn new() -> MockMwebNode {
			MockMwebNode {
				utxos: RwLock::new(HashMap::new()),
				posted_txns: RwLock::new(Vec::new()),
			}
		}

		pub fn add_utxo(&self, output: &Output) {
			self.utxos
				.write()
				.unwrap()
				.insert(output.id().unwrap(), output.clone());
		}

		pub fn remove_utxo(&self, output_id: &Hash) {
			self.utxos.write().unwrap().remove(output_id);
		}

		pub fn get_posted_txns(&self) -> Vec<Transaction> {
			self.posted_txns.read().unwrap().clone()
		}
	}

	impl MwebNode for MockMwebNode {
		fn get_utxo(&self, output_id: &Hash) -> Result<Option<Output>, NodeError> {
			Ok(self.utxos.read().unwrap().get(output_id).cloned())
		}

		fn post_tx(&self, tx: &Transaction) -> Result<(), NodeError> {
			self.posted_txns.write().unwrap().push(tx.clone());
			Ok(())
		}
	}
}
