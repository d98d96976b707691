use crate::node::MwebNode;
use crate::onion::Onion;

use std::sync::Arc;
use thiserror::Error;

/// The reasons a user-submitted onion is refused admission
#[derive(Clone, Error, Debug, PartialEq)]
pub enum ValidationError {
	#[error("Onion is malformed")]
	BadInput,
	#[error("Referenced output does not exist, or is already spent")]
	UnknownOutput,
	#[error("Onion does not match the committed output")]
	InputMismatch,
	#[error("Input spend signature is invalid")]
	BadInputSig,
	#[error("Owner proof is invalid")]
	BadOwnerProof,
	#[error("Chain lookup failed: {0}")]
	NodeError(String),
}

/// Admission check for a user-submitted onion, in order: well-formed input
/// descriptor, known unspent output, commitment and output-key match, valid
/// input spend signature, valid owner proof. Pure; mutates nothing.
pub fn validate_onion(onion: &Onion, node: &Arc<dyn MwebNode>) -> Result<(), ValidationError> {
	let input = onion.input().map_err(|_| ValidationError::BadInput)?;

	let utxo = node
		.get_utxo(&input.output_id)
		.map_err(|e| ValidationError::NodeError(e.to_string()))?
		.ok_or(ValidationError::UnknownOutput)?;

	if input.commit != utxo.commit || input.output_pubkey != utxo.receiver_pubkey {
		return Err(ValidationError::InputMismatch);
	}

	if !input.verify_sig() {
		return Err(ValidationError::BadInputSig);
	}

	if !onion.verify_owner_proof() {
		return Err(ValidationError::BadOwnerProof);
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::node::mock::MockMwebNode;
	use crate::onion::test_util::{new_test_coin, new_user_swap, rand_stealth_address};
	use crate::secp;

	use std::sync::Arc;
	use x25519_dalek::StaticSecret;

	fn node_keys(n: usize) -> Vec<StaticSecret> {
		(0..n)
			.map(|_| StaticSecret::new(&mut rand::rngs::OsRng))
			.collect()
	}

	#[test]
	fn accepts_valid_onion() {
		let keys = node_keys(3);
		let coin = new_test_coin(100_000);
		let swap = new_user_swap(&keys, &vec![500, 500, 500], &coin, &rand_stealth_address());

		let node = MockMwebNode::new();
		node.add_utxo(&coin.utxo);
		let node: Arc<dyn crate::node::MwebNode> = Arc::new(node);

		assert_eq!(Ok(()), validate_onion(&swap.onion, &node));
	}

	#[test]
	fn rejects_missing_input() {
		let keys = node_keys(1);
		let coin = new_test_coin(100_000);
		let swap = new_user_swap(&keys, &vec![500], &coin, &rand_stealth_address());

		let node = MockMwebNode::new();
		node.add_utxo(&coin.utxo);
		let node: Arc<dyn crate::node::MwebNode> = Arc::new(node);

		let mut onion = swap.onion.clone();
		onion.input = None;
		assert_eq!(Err(ValidationError::BadInput), validate_onion(&onion, &node));
	}

	#[test]
	fn rejects_unknown_output() {
		let keys = node_keys(1);
		let coin = new_test_coin(100_000);
		let swap = new_user_swap(&keys, &vec![500], &coin, &rand_stealth_address());

		// chain has no record of the referenced output
		let node: Arc<dyn crate::node::MwebNode> = Arc::new(MockMwebNode::new());
		assert_eq!(
			Err(ValidationError::UnknownOutput),
			validate_onion(&swap.onion, &node)
		);
	}

	#[test]
	fn rejects_commitment_mismatch() {
		let keys = node_keys(1);
		let coin = new_test_coin(100_000);
		let swap = new_user_swap(&keys, &vec![500], &coin, &rand_stealth_address());

		// the onion claims a different commitment than the chain record;
		// the mismatch check fires before any signature check
		let mut onion = swap.onion.clone();
		if let Some(input) = onion.input.as_mut() {
			input.commit = secp::commit(100_000, &secp::random_secret()).unwrap();
		}

		let node = MockMwebNode::new();
		node.add_utxo(&coin.utxo);
		let node: Arc<dyn crate::node::MwebNode> = Arc::new(node);
		assert_eq!(
			Err(ValidationError::InputMismatch),
			validate_onion(&onion, &node)
		);
	}

	#[test]
	fn rejects_bad_input_sig() {
		let keys = node_keys(1);
		let coin = new_test_coin(100_000);
		let swap = new_user_swap(&keys, &vec![500], &coin, &rand_stealth_address());

		let mut onion = swap.onion.clone();
		if let Some(input) = onion.input.as_mut() {
			// a signature from an unrelated input
			let other_coin = new_test_coin(100_000);
			let other_swap =
				new_user_swap(&keys, &vec![500], &other_coin, &rand_stealth_address());
			input.signature = other_swap.input.signature;
		}
		onion.sign(&coin.spend_key).unwrap();

		let node = MockMwebNode::new();
		node.add_utxo(&coin.utxo);
		let node: Arc<dyn crate::node::MwebNode> = Arc::new(node);
		assert_eq!(
			Err(ValidationError::BadInputSig),
			validate_onion(&onion, &node)
		);
	}

	#[test]
	fn rejects_bad_owner_proof() {
		let keys = node_keys(1);
		let coin = new_test_coin(100_000);
		let swap = new_user_swap(&keys, &vec![500], &coin, &rand_stealth_address());

		let mut onion = swap.onion.clone();
		onion.sign(&secp::random_secret()).unwrap();

		let node = MockMwebNode::new();
		node.add_utxo(&coin.utxo);
		let node: Arc<dyn crate::node::MwebNode> = Arc::new(node);
		assert_eq!(
			Err(ValidationError::BadOwnerProof),
			validate_onion(&onion, &node)
		);
	}
}
