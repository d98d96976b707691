pub use secp256k1zkp::aggsig;
pub use secp256k1zkp::constants::{
	AGG_SIGNATURE_SIZE, COMPRESSED_PUBLIC_KEY_SIZE, MAX_PROOF_SIZE, PEDERSEN_COMMITMENT_SIZE,
	SECRET_KEY_SIZE,
};
pub use secp256k1zkp::key::{PublicKey, SecretKey, ZERO_KEY};
pub use secp256k1zkp::pedersen::{Commitment, RangeProof};
pub use secp256k1zkp::{ContextFlag, Message, Secp256k1, Signature};

use grin_core::ser::{self, Reader};
use secp256k1zkp::rand::thread_rng;

/// Generate a random SecretKey.
pub fn random_secret() -> SecretKey {
	let secp = Secp256k1::new();
	SecretKey::new(&secp, &mut thread_rng())
}

/// Deserialize a SecretKey from a Reader
pub fn read_secret_key<R: Reader>(reader: &mut R) -> Result<SecretKey, ser::Error> {
	let buf = reader.read_fixed_bytes(SECRET_KEY_SIZE)?;
	let secp = Secp256k1::with_caps(ContextFlag::None);
	let sk = SecretKey::from_slice(&secp, &buf).map_err(|_| ser::Error::CorruptedData)?;
	Ok(sk)
}

/// Build a Pedersen Commitment using the provided value and blinding factor
pub fn commit(value: u64, blind: &SecretKey) -> Result<Commitment, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Commit);
	let commit = secp.commit(value, blind.clone())?;
	Ok(commit)
}

/// Build a Pedersen Commitment to a value with a zero blinding factor (v*H)
pub fn commit_value(value: u64) -> Result<Commitment, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Commit);
	let commit = secp.commit(value, ZERO_KEY)?;
	Ok(commit)
}

/// Add a blinding factor to an existing Commitment
pub fn add_blind(
	commitment: &Commitment,
	blind: &SecretKey,
) -> Result<Commitment, secp256k1zkp::Error> {
	let blind_commit = commit(0, blind)?;
	add_commitments(commitment, &blind_commit)
}

/// Subtracts a value (v*H) from an existing commitment
pub fn sub_value(commitment: &Commitment, value: u64) -> Result<Commitment, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Commit);
	let neg_commit = secp.commit(value, ZERO_KEY)?;
	let sum = secp.commit_sum(vec![commitment.clone()], vec![neg_commit])?;
	Ok(sum)
}

/// Adds two Commitments
pub fn add_commitments(a: &Commitment, b: &Commitment) -> Result<Commitment, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Commit);
	let sum = secp.commit_sum(vec![a.clone(), b.clone()], Vec::new())?;
	Ok(sum)
}

/// Sums a set of positive and negative Commitments
pub fn commit_sum(
	positive: Vec<Commitment>,
	negative: Vec<Commitment>,
) -> Result<Commitment, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Commit);
	secp.commit_sum(positive, negative)
}

/// The public key of the provided SecretKey
pub fn to_pubkey(sk: &SecretKey) -> Result<PublicKey, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Full);
	PublicKey::from_secret_key(&secp, sk)
}

/// Adds two public keys
pub fn add_pubkeys(a: &PublicKey, b: &PublicKey) -> Result<PublicKey, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Full);
	PublicKey::from_combination(&secp, vec![a, b])
}

/// Sums a set of public keys
pub fn sum_pubkeys(keys: Vec<&PublicKey>) -> Result<PublicKey, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Full);
	PublicKey::from_combination(&secp, keys)
}

/// Subtracts one public key from another by routing the points through
/// their commitment representations, since the underlying library only
/// exposes signed sums over commitments.
pub fn sub_pubkeys(a: &PublicKey, b: &PublicKey) -> Result<PublicKey, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Commit);
	let a_commit = Commitment::from_pubkey(&secp, a)?;
	let b_commit = Commitment::from_pubkey(&secp, b)?;
	let sum = secp.commit_sum(vec![a_commit], vec![b_commit])?;
	sum.to_pubkey(&secp)
}

/// Multiplies a public key by a scalar
pub fn mul_pubkey(
	pubkey: &PublicKey,
	scalar: &SecretKey,
) -> Result<PublicKey, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Full);
	let mut result = pubkey.clone();
	result.mul_assign(&secp, scalar)?;
	Ok(result)
}

/// Multiplies a secret key by a scalar
pub fn mul_secret(sk: &SecretKey, scalar: &SecretKey) -> Result<SecretKey, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Full);
	let mut result = sk.clone();
	result.mul_assign(&secp, scalar)?;
	Ok(result)
}

/// Adds two secret keys
pub fn add_secrets(a: &SecretKey, b: &SecretKey) -> Result<SecretKey, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Full);
	let mut sum = a.clone();
	sum.add_assign(&secp, b)?;
	Ok(sum)
}

/// Computes the value-dependent switch commitment blinding factor
pub fn blind_switch(value: u64, blind: &SecretKey) -> Result<SecretKey, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Commit);
	secp.blind_switch(value, blind.clone())
}

/// Hashes the concatenation of the provided parts with BLAKE3-256 and
/// interprets the digest as a secret scalar.
pub fn hash_to_scalar<T: AsRef<[u8]>>(parts: &[T]) -> Result<SecretKey, secp256k1zkp::Error> {
	let mut hasher = blake3::Hasher::new();
	for part in parts {
		hasher.update(part.as_ref());
	}
	let secp = Secp256k1::with_caps(ContextFlag::None);
	SecretKey::from_slice(&secp, hasher.finalize().as_bytes())
}

/// Hashes arbitrary bytes with BLAKE3-256 into a signable Message
pub fn message(data: &[u8]) -> Result<Message, secp256k1zkp::Error> {
	Message::from_slice(blake3::hash(data).as_bytes())
}

/// Signs the message with the provided SecretKey
pub fn sign(sk: &SecretKey, msg: &Message) -> Result<Signature, secp256k1zkp::Error> {
	let secp = Secp256k1::with_caps(ContextFlag::Full);
	let pubkey = PublicKey::from_secret_key(&secp, &sk)?;
	let sig = aggsig::sign_single(&secp, &msg, &sk, None, None, None, Some(&pubkey), None)?;
	Ok(sig)
}

/// Verifies the Schnorr signature against the provided public key
pub fn verify_signature(sig: &Signature, pubkey: &PublicKey, msg: &Message) -> bool {
	let secp = Secp256k1::with_caps(ContextFlag::Full);
	aggsig::verify_single(&secp, sig, msg, None, pubkey, Some(pubkey), None, false)
}

#[cfg(test)]
pub mod test_util {
	use crate::secp::{self, Commitment, PublicKey, RangeProof, Secp256k1};
	use rand::RngCore;

	pub fn rand_commit() -> Commitment {
		secp::commit(rand::thread_rng().next_u64(), &secp::random_secret()).unwrap()
	}

	pub fn rand_pubkey() -> PublicKey {
		secp::to_pubkey(&secp::random_secret()).unwrap()
	}

	pub fn rand_proof() -> RangeProof {
		let secp = Secp256k1::new();
		secp.bullet_proof(
			rand::thread_rng().next_u64(),
			secp::random_secret(),
			secp::random_secret(),
			secp::random_secret(),
			None,
			None,
		)
	}
}
