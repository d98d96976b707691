use crate::config::ServerConfig;
use crate::node::MwebNode;
use crate::onion::{self, Onion, OnionError};
use crate::secp::{self, Commitment, PublicKey, SecretKey};
use crate::store::{StoreError, SwapStore};
use crate::tx::{self, Kernel, Output, Transaction, TxBody, TxError};
use crate::types::{OnionEntry, Payload};
use crate::validation::{self, ValidationError};

use chacha20::cipher::StreamCipher;
use grin_core::ser::{self, Readable, Reader, Writeable, Writer};
use itertools::Itertools;
use log::{info, warn};
use std::collections::HashMap;
use std::result::Result;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Swap error types
#[derive(Clone, Error, Debug, PartialEq)]
pub enum SwapError {
	#[error("{0}")]
	Validation(ValidationError),
	#[error("Output {commit:?} is already in the swap list.")]
	AlreadySwapped { commit: Commitment },
	#[error("Swap round already in progress")]
	Busy,
	#[error("Operation not supported at this node position")]
	WrongRole,
	#[error("Message does not belong to the current round phase")]
	WrongPhase,
	#[error("Failed to peel onion layer: {0:?}")]
	PeelFailed(OnionError),
	#[error("Another onion already peeled to the same commitment")]
	DuplicateCommit,
	#[error("Hop carries an output misaligned with this node's position")]
	MisalignedOutput,
	#[error("Final output failed validation")]
	InvalidOutput,
	#[error("Hop fees do not cover this node's share")]
	InsufficientFees,
	#[error("Round invariants violated by downstream data")]
	InvariantViolation,
	#[error("Malformed peer message: {0:?}")]
	Deserialization(ser::Error),
	#[error("Peer is unavailable: {0}")]
	PeerUnavailable(String),
	#[error("Error saving onion to data store: {0}")]
	StoreError(StoreError),
	#[error("{0}")]
	UnknownError(String),
}

impl From<ValidationError> for SwapError {
	fn from(err: ValidationError) -> SwapError {
		SwapError::Validation(err)
	}
}

impl From<OnionError> for SwapError {
	fn from(err: OnionError) -> SwapError {
		SwapError::PeelFailed(err)
	}
}

impl From<secp256k1zkp::Error> for SwapError {
	fn from(err: secp256k1zkp::Error) -> SwapError {
		SwapError::UnknownError(format!("{:?}", err))
	}
}

impl From<TxError> for SwapError {
	fn from(err: TxError) -> SwapError {
		SwapError::UnknownError(err.to_string())
	}
}

impl From<ser::Error> for SwapError {
	fn from(err: ser::Error) -> SwapError {
		SwapError::Deserialization(err)
	}
}

/// Delivers encrypted round messages to peer nodes. Implementations are
/// fire-and-forget: failures are logged, never surfaced to the round.
pub trait PeerClient: Send + Sync {
	fn send_forward(&self, url: &str, data: Vec<u8>);
	fn send_backward(&self, url: &str, data: Vec<u8>);
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum SwapPhase {
	/// No round in progress
	Idle,
	/// This node peeled and passed the batch on; awaiting the backward leg
	Forwarding,
	/// The round died here; cleared by the next tick or forward ingest
	Failed,
}

struct SwapState {
	phase: SwapPhase,
	onions: HashMap<Commitment, OnionEntry>,
}

/// A mix node in the swap chain
pub trait SwapServer: Send + Sync {
	/// Submit a new onion to be swapped. Coordinator only.
	fn submit(&self, onion: &Onion) -> Result<(), SwapError>;

	/// Handle the encrypted batch from the preceding node.
	fn forward(&self, data: &[u8]) -> Result<(), SwapError>;

	/// Handle the encrypted settlement leg from the following node.
	fn backward(&self, data: &[u8]) -> Result<(), SwapError>;

	/// Start a swap round over all pending onions. Called by the scheduler;
	/// a no-op off the coordinator.
	fn execute_round(&self) -> Result<(), SwapError>;
}

/// The standard swap server implementation
pub struct SwapServerImpl {
	server_config: ServerConfig,
	node_index: usize,
	node: Arc<dyn MwebNode>,
	peers: Arc<dyn PeerClient>,
	store: Arc<Mutex<SwapStore>>,
	state: Arc<Mutex<SwapState>>,
}

impl SwapServerImpl {
	/// Create a new swap server. The configured node list must contain the
	/// operator's own key.
	pub fn new(
		server_config: ServerConfig,
		node: Arc<dyn MwebNode>,
		peers: Arc<dyn PeerClient>,
		store: SwapStore,
	) -> Result<SwapServerImpl, SwapError> {
		let node_index = server_config.node_index().ok_or(SwapError::WrongRole)?;
		Ok(SwapServerImpl {
			server_config,
			node_index,
			node,
			peers,
			store: Arc::new(Mutex::new(store)),
			state: Arc::new(Mutex::new(SwapState {
				phase: SwapPhase::Idle,
				onions: HashMap::new(),
			})),
		})
	}

	pub fn is_coordinator(&self) -> bool {
		self.node_index == 0
	}

	fn is_terminal(&self) -> bool {
		self.node_index == self.server_config.nodes.len() - 1
	}

	/// This node's share of the aggregate fee, given the outputs collected
	/// so far: its part of the output weight plus one stealth kernel.
	fn required_fee(&self, outputs_so_far: usize) -> u64 {
		let n_nodes = self.server_config.nodes.len() as u64;
		let n_outputs = (outputs_so_far + self.node_index + 1) as u64;
		let fee = n_outputs * tx::STANDARD_OUTPUT_WEIGHT * tx::BASE_MWEB_FEE;
		let fee = (fee + n_nodes - 1) / n_nodes;
		fee + tx::KERNEL_WITH_STEALTH_WEIGHT * tx::BASE_MWEB_FEE
	}

	/// The commitment transform applied by one peel:
	/// commit' = commit + commit(kernelBlind, 0) - commit(0, fee).
	fn next_commit(
		commit: &Commitment,
		payload: &Payload,
	) -> Result<Commitment, secp256k1zkp::Error> {
		let with_blind = secp::add_blind(commit, &payload.kernel_blind)?;
		secp::sub_value(&with_blind, payload.fee)
	}

	/// Builds a fresh round from every pending onion in the store, dropping
	/// (and deleting) the ones that no longer validate.
	fn start_round(&self, state: &mut SwapState) -> Result<(), SwapError> {
		state.phase = SwapPhase::Idle;
		state.onions.clear();

		let store = self.store.lock().unwrap();
		let pending: Vec<Onion> = store
			.onions_iter()
			.map_err(SwapError::StoreError)?
			.unique_by(|o| o.input.as_ref().map(|i| i.commit.clone()))
			.collect();

		let mut entries = HashMap::new();
		for onion in pending {
			if let Err(e) = validation::validate_onion(&onion, &self.node) {
				warn!("Dropping stored onion: {}", e);
				store.delete_onion(&onion).map_err(SwapError::StoreError)?;
				continue;
			}

			let input = onion.input()?.clone();
			let stealth_sum = secp::sub_pubkeys(&input.output_pubkey, &input.input_pubkey)?;
			entries.insert(input.commit, OnionEntry { onion, stealth_sum });
		}
		drop(store);

		if entries.is_empty() {
			info!("No pending onions; skipping swap round");
			return Ok(());
		}

		info!("Starting swap round over {} onions", entries.len());
		state.onions = entries;
		self.forward_own(state)
	}

	/// Peels every entry, dropping the ones a malicious user or peer could
	/// have crafted. Returns the post-peel map and the collected outputs.
	fn peel_onions(&self, state: &mut SwapState) -> (HashMap<Commitment, OnionEntry>, Vec<Output>) {
		// ascending big-endian order makes the collision drop deterministic
		let mut commits: Vec<Commitment> = state.onions.keys().cloned().collect();
		commits.sort_by(|a, b| a.0.cmp(&b.0));

		let mut peeled: HashMap<Commitment, OnionEntry> = HashMap::new();
		let mut outputs: Vec<Output> = Vec::new();
		for commit in commits {
			let entry = match state.onions.get(&commit) {
				Some(entry) => entry.clone(),
				None => continue,
			};
			if let Err(e) = self.peel_entry(&commit, &entry, &mut peeled, &mut outputs) {
				warn!("Dropping onion {:?}: {}", commit, e);
				state.onions.remove(&commit);
			}
		}
		(peeled, outputs)
	}

	fn peel_entry(
		&self,
		commit: &Commitment,
		entry: &OnionEntry,
		peeled: &mut HashMap<Commitment, OnionEntry>,
		outputs: &mut Vec<Output>,
	) -> Result<(), SwapError> {
		let (payload, next_onion) = entry.onion.peel_layer(&self.server_config.key)?;

		let next_commit = SwapServerImpl::next_commit(commit, &payload)?;
		let stealth_sum = secp::add_pubkeys(&entry.stealth_sum, &payload.stealth_pubkey()?)?;

		if peeled.contains_key(&next_commit) {
			return Err(SwapError::DuplicateCommit);
		}

		// the plaintext must produce an output iff this is the last node
		if self.is_terminal() != payload.output.is_some() {
			return Err(SwapError::MisalignedOutput);
		}

		if let Some(output) = &payload.output {
			if output.commit != next_commit || output.sender_pubkey != stealth_sum {
				return Err(SwapError::InvalidOutput);
			}
			output
				.verify_rangeproof(&next_commit)
				.map_err(|_| SwapError::InvalidOutput)?;
			if !output.verify_sig() {
				return Err(SwapError::InvalidOutput);
			}
			outputs.push(output.clone());
		}

		peeled.insert(
			next_commit,
			OnionEntry {
				onion: next_onion,
				stealth_sum,
			},
		);
		Ok(())
	}

	/// The forward half of this node's round work: peel, then either pass
	/// the batch on or, at the terminal node, turn around.
	fn forward_own(&self, state: &mut SwapState) -> Result<(), SwapError> {
		let (peeled, outputs) = self.peel_onions(state);

		if self.is_terminal() {
			return self.backward_own(state, outputs, Vec::new());
		}

		// the sort destroys the submission order upstream nodes saw
		let mut commits: Vec<Commitment> = peeled.keys().cloned().collect();
		commits.sort_by(|a, b| a.0.cmp(&b.0));

		let entries: Vec<OnionEntry> = commits
			.iter()
			.filter_map(|commit| peeled.get(commit).cloned())
			.collect();
		let blob = ForwardBlob { commits, entries };
		let mut data = vec![];
		ser::serialize_default(&mut data, &blob)?;

		let next_node = &self.server_config.nodes[self.node_index + 1];
		let mut cipher = onion::new_stream_cipher(&self.server_config.key, &next_node.pubkey)?;
		cipher.apply_keystream(&mut data);

		state.phase = SwapPhase::Forwarding;
		self.peers.send_forward(&next_node.url, data);
		Ok(())
	}

	fn process_forward(&self, state: &mut SwapState, data: &[u8]) -> Result<(), SwapError> {
		let prev_node = &self.server_config.nodes[self.node_index - 1];
		let mut decrypted = data.to_vec();
		let mut cipher = onion::new_stream_cipher(&self.server_config.key, &prev_node.pubkey)?;
		cipher.apply_keystream(&mut decrypted);

		let blob: ForwardBlob =
			ser::deserialize_default(&mut &decrypted[..]).map_err(SwapError::Deserialization)?;

		// a node participates in at most one round; prior state is dropped
		state.phase = SwapPhase::Idle;
		state.onions = blob
			.commits
			.into_iter()
			.zip(blob.entries.into_iter())
			.collect();

		self.forward_own(state)
	}

	/// The backward half: account fees, mint this node's fee-collection
	/// output, contribute one kernel, then pass the settlement upstream or,
	/// at the coordinator, finalize.
	fn backward_own(
		&self,
		state: &mut SwapState,
		mut outputs: Vec<Output>,
		mut kernels: Vec<Kernel>,
	) -> Result<(), SwapError> {
		let mut kernel_blind: Option<SecretKey> = None;
		let mut stealth_blind: Option<SecretKey> = None;
		let mut fee_total: u64 = 0;
		for entry in state.onions.values() {
			let (payload, _) = entry.onion.peel_layer(&self.server_config.key)?;
			kernel_blind = Some(match kernel_blind {
				Some(sum) => secp::add_secrets(&sum, &payload.kernel_blind)?,
				None => payload.kernel_blind.clone(),
			});
			stealth_blind = Some(match stealth_blind {
				Some(sum) => secp::add_secrets(&sum, &payload.stealth_blind)?,
				None => payload.stealth_blind.clone(),
			});
			fee_total = fee_total.saturating_add(payload.fee);
		}

		let required_fee = self.required_fee(outputs.len());
		if fee_total < required_fee {
			return Err(SwapError::InsufficientFees);
		}
		let surplus = fee_total - required_fee;

		// mint the fee-collection output with a fresh sender secret
		let sender_key = secp::random_secret();
		let (fee_output, blind) =
			Output::create(surplus, &sender_key, &self.server_config.fee_address)?;
		let switch_blind = secp::blind_switch(surplus, &blind)?;
		let kernel_blind = match kernel_blind {
			Some(sum) => secp::add_secrets(&sum, &switch_blind)?,
			None => switch_blind,
		};
		let stealth_blind = match stealth_blind {
			Some(sum) => secp::add_secrets(&sum, &sender_key)?,
			None => sender_key,
		};
		outputs.push(fee_output);

		kernels.push(Kernel::create(&kernel_blind, &stealth_blind, required_fee)?);

		outputs.sort_by_key(|output| output.id().unwrap_or(grin_core::core::hash::ZERO_HASH));

		if self.is_coordinator() {
			return self.finalize(state, outputs, kernels);
		}

		let mut commits: Vec<Commitment> = state.onions.keys().cloned().collect();
		commits.sort_by(|a, b| a.0.cmp(&b.0));
		let blob = BackwardBlob {
			commits,
			outputs,
			kernels,
		};
		let mut data = vec![];
		ser::serialize_default(&mut data, &blob)?;

		let prev_node = &self.server_config.nodes[self.node_index - 1];
		let mut cipher = onion::new_stream_cipher(&self.server_config.key, &prev_node.pubkey)?;
		cipher.apply_keystream(&mut data);

		state.phase = SwapPhase::Idle;
		state.onions.clear();
		self.peers.send_backward(&prev_node.url, data);
		Ok(())
	}

	fn process_backward(&self, state: &mut SwapState, data: &[u8]) -> Result<(), SwapError> {
		let next_node = &self.server_config.nodes[self.node_index + 1];
		let mut decrypted = data.to_vec();
		let mut cipher = onion::new_stream_cipher(&self.server_config.key, &next_node.pubkey)?;
		cipher.apply_keystream(&mut decrypted);

		let blob: BackwardBlob =
			ser::deserialize_default(&mut &decrypted[..]).map_err(SwapError::Deserialization)?;
		let expected_kernels = self.server_config.nodes.len() - self.node_index - 1;
		if blob.kernels.len() != expected_kernels {
			return Err(SwapError::Deserialization(ser::Error::CountError));
		}

		// sum(outputs) + sum(fee*H) must equal sum(commit') + sum(excess),
		// and the stealth analogue, over everything downstream reported
		let mut commit_lhs: Vec<Commitment> =
			blob.outputs.iter().map(|output| output.commit).collect();
		let mut commit_rhs: Vec<Commitment> = Vec::new();
		let mut stealth_rhs: Vec<PublicKey> = Vec::new();
		for kernel in &blob.kernels {
			commit_lhs.push(
				secp::commit_value(kernel.fee).map_err(|_| SwapError::InvariantViolation)?,
			);
			commit_rhs.push(kernel.excess);
			stealth_rhs.push(kernel.stealth_excess.clone());
		}

		let commits: Vec<Commitment> = state.onions.keys().cloned().collect();
		for commit in commits {
			let entry = match state.onions.get(&commit) {
				Some(entry) => entry.clone(),
				None => continue,
			};
			let (payload, _) = entry.onion.peel_layer(&self.server_config.key)?;
			let next_commit = SwapServerImpl::next_commit(&commit, &payload)
				.map_err(|_| SwapError::InvariantViolation)?;

			if blob.commits.contains(&next_commit) {
				commit_rhs.push(next_commit);
				let stealth_pubkey = payload
					.stealth_pubkey()
					.map_err(|_| SwapError::InvariantViolation)?;
				stealth_rhs.push(
					secp::add_pubkeys(&entry.stealth_sum, &stealth_pubkey)
						.map_err(|_| SwapError::InvariantViolation)?,
				);
			} else {
				// failed validation somewhere downstream
				warn!("Dropping onion {:?}: no longer in the round", commit);
				state.onions.remove(&commit);
			}
		}

		let commit_lhs_sum =
			secp::commit_sum(commit_lhs, Vec::new()).map_err(|_| SwapError::InvariantViolation)?;
		let commit_rhs_sum =
			secp::commit_sum(commit_rhs, Vec::new()).map_err(|_| SwapError::InvariantViolation)?;
		if commit_lhs_sum != commit_rhs_sum {
			return Err(SwapError::InvariantViolation);
		}

		let stealth_lhs_sum = secp::sum_pubkeys(
			blob.outputs
				.iter()
				.map(|output| &output.sender_pubkey)
				.collect(),
		)
		.map_err(|_| SwapError::InvariantViolation)?;
		let stealth_rhs_sum = secp::sum_pubkeys(stealth_rhs.iter().collect())
			.map_err(|_| SwapError::InvariantViolation)?;
		if stealth_lhs_sum != stealth_rhs_sum {
			return Err(SwapError::InvariantViolation);
		}

		self.backward_own(state, blob.outputs, blob.kernels)
	}

	/// Assemble and broadcast the final settlement transaction, then let go
	/// of the pending onions.
	fn finalize(
		&self,
		state: &mut SwapState,
		outputs: Vec<Output>,
		kernels: Vec<Kernel>,
	) -> Result<(), SwapError> {
		let mut inputs = Vec::new();
		for entry in state.onions.values() {
			inputs.push(entry.onion.input()?.clone());
		}

		let mut body = TxBody {
			inputs,
			outputs,
			kernels,
		};
		body.sort();
		let tx = Transaction::new(body);

		self.node
			.post_tx(&tx)
			.map_err(|e| SwapError::UnknownError(e.to_string()))?;
		info!(
			"Posted swap transaction with {} inputs, {} outputs, {} kernels",
			tx.body.inputs.len(),
			tx.body.outputs.len(),
			tx.body.kernels.len()
		);

		let store = self.store.lock().unwrap();
		store.clear_all().map_err(SwapError::StoreError)?;

		state.phase = SwapPhase::Idle;
		state.onions.clear();
		Ok(())
	}
}

impl SwapServer for SwapServerImpl {
	fn submit(&self, onion: &Onion) -> Result<(), SwapError> {
		if !self.is_coordinator() {
			return Err(SwapError::WrongRole);
		}

		let state = self.state.lock().unwrap();
		if state.phase != SwapPhase::Idle {
			return Err(SwapError::Busy);
		}

		validation::validate_onion(onion, &self.node)?;

		let store = self.store.lock().unwrap();
		store.save_onion(onion).map_err(|e| match e {
			StoreError::AlreadyExists(commit) => SwapError::AlreadySwapped { commit },
			e => SwapError::StoreError(e),
		})?;
		Ok(())
	}

	fn forward(&self, data: &[u8]) -> Result<(), SwapError> {
		if self.is_coordinator() {
			return Err(SwapError::WrongRole);
		}

		let mut state = self.state.lock().unwrap();
		let result = self.process_forward(&mut state, data);
		if result.is_err() {
			state.phase = SwapPhase::Failed;
			state.onions.clear();
		}
		result
	}

	fn backward(&self, data: &[u8]) -> Result<(), SwapError> {
		if self.is_terminal() {
			return Err(SwapError::WrongRole);
		}

		let mut state = self.state.lock().unwrap();
		// a settlement leg we are not expecting belongs to a dead round
		if state.phase != SwapPhase::Forwarding {
			return Err(SwapError::WrongPhase);
		}

		let result = self.process_backward(&mut state, data);
		if result.is_err() {
			state.phase = SwapPhase::Failed;
			state.onions.clear();
		}
		result
	}

	fn execute_round(&self) -> Result<(), SwapError> {
		if !self.is_coordinator() {
			return Ok(());
		}

		let mut state = self.state.lock().unwrap();
		let result = self.start_round(&mut state);
		if result.is_err() {
			state.phase = SwapPhase::Failed;
			state.onions.clear();
		}
		result
	}
}

// The wire shape of the peer-to-peer batch: the sorted current commitments
// followed by one entry per commitment.
struct ForwardBlob {
	commits: Vec<Commitment>,
	entries: Vec<OnionEntry>,
}

impl Writeable for ForwardBlob {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.commits.len() as u64)?;
		for commit in &self.commits {
			writer.write_fixed_bytes(commit)?;
		}
		for entry in &self.entries {
			entry.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for ForwardBlob {
	fn read<R: Reader>(reader: &mut R) -> Result<ForwardBlob, ser::Error> {
		let count = reader.read_u64()?;
		let mut commits = Vec::with_capacity(count as usize);
		for _ in 0..count {
			commits.push(Commitment::read(reader)?);
		}
		let mut entries = Vec::with_capacity(count as usize);
		for _ in 0..count {
			entries.push(OnionEntry::read(reader)?);
		}
		Ok(ForwardBlob { commits, entries })
	}
}

// The wire shape of the settlement leg: this node's commitment set, the
// outputs collected so far, and one kernel per downstream node.
struct BackwardBlob {
	commits: Vec<Commitment>,
	outputs: Vec<Output>,
	kernels: Vec<Kernel>,
}

impl Writeable for BackwardBlob {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.commits.len() as u64)?;
		for commit in &self.commits {
			writer.write_fixed_bytes(commit)?;
		}
		writer.write_u64(self.outputs.len() as u64)?;
		for output in &self.outputs {
			output.write(writer)?;
		}
		writer.write_u64(self.kernels.len() as u64)?;
		for kernel in &self.kernels {
			kernel.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for BackwardBlob {
	fn read<R: Reader>(reader: &mut R) -> Result<BackwardBlob, ser::Error> {
		let count = reader.read_u64()?;
		let mut commits = Vec::with_capacity(count as usize);
		for _ in 0..count {
			commits.push(Commitment::read(reader)?);
		}
		let count = reader.read_u64()?;
		let mut outputs = Vec::with_capacity(count as usize);
		for _ in 0..count {
			outputs.push(Output::read(reader)?);
		}
		let count = reader.read_u64()?;
		let mut kernels = Vec::with_capacity(count as usize);
		for _ in 0..count {
			kernels.push(Kernel::read(reader)?);
		}
		Ok(BackwardBlob {
			commits,
			outputs,
			kernels,
		})
	}
}
