use crate::secp::{self, Commitment, PublicKey, RangeProof, Secp256k1, SecretKey, Signature};

use byteorder::{BigEndian, ByteOrder};
use grin_core::core::hash::{Hash, ZERO_HASH};
use grin_core::ser::{self, ProtocolVersion, Readable, Reader, Writeable, Writer};
use grin_util::{self, ToHex};
use rand::RngCore;
use thiserror::Error;

/// Fee charged per unit of transaction weight.
pub const BASE_MWEB_FEE: u64 = 100;
/// Weight of a standard confidential output.
pub const STANDARD_OUTPUT_WEIGHT: u64 = 18;
/// Weight of a kernel carrying a stealth excess.
pub const KERNEL_WITH_STEALTH_WEIGHT: u64 = 3;

/// Error types for building and validating transaction parts
#[derive(Clone, Error, Debug, PartialEq)]
pub enum TxError {
	#[error("Secp256k1zkp error: {0:?}")]
	Secp(secp256k1zkp::Error),
	#[error("Serialization error occurred: {0:?}")]
	Ser(ser::Error),
	#[error("Range proof is invalid")]
	InvalidRangeProof,
	#[error("Signature is invalid")]
	InvalidSignature,
	#[error("Transaction does not sum to zero")]
	KernelSumMismatch,
	#[error("Stealth offsets do not sum to zero")]
	StealthSumMismatch,
	#[error("Invalid stealth address")]
	InvalidAddress,
}

impl From<secp256k1zkp::Error> for TxError {
	fn from(err: secp256k1zkp::Error) -> TxError {
		TxError::Secp(err)
	}
}

impl From<ser::Error> for TxError {
	fn from(err: ser::Error) -> TxError {
		TxError::Ser(err)
	}
}

/// BLAKE3-256 of the canonical serialization, used as the sort key for
/// every transaction part.
fn hash_writeable<W: Writeable>(w: &W) -> Result<Hash, ser::Error> {
	let bytes = ser::ser_vec(w, ProtocolVersion::local())?;
	Ok(Hash::from_vec(blake3::hash(&bytes).as_bytes()))
}

fn pubkey_bytes(pubkey: &PublicKey) -> Vec<u8> {
	let secp = Secp256k1::new();
	pubkey.serialize_vec(&secp, true).to_vec()
}

/// A dual-key stealth address (scan key, spend key).
#[derive(Clone, Debug, PartialEq)]
pub struct StealthAddress {
	pub scan_pubkey: PublicKey,
	pub spend_pubkey: PublicKey,
}

impl StealthAddress {
	#[allow(dead_code)]
	pub fn from_secrets(scan_key: &SecretKey, spend_key: &SecretKey) -> Result<Self, TxError> {
		Ok(StealthAddress {
			scan_pubkey: secp::to_pubkey(scan_key)?,
			spend_pubkey: secp::to_pubkey(spend_key)?,
		})
	}

	/// Parses the concatenated compressed scan and spend keys from hex
	pub fn from_hex(hex: &str) -> Result<Self, TxError> {
		let bytes = grin_util::from_hex(hex).map_err(|_| TxError::InvalidAddress)?;
		if bytes.len() != 2 * secp::COMPRESSED_PUBLIC_KEY_SIZE {
			return Err(TxError::InvalidAddress);
		}
		let secp = Secp256k1::new();
		let scan_pubkey = PublicKey::from_slice(&secp, &bytes[..secp::COMPRESSED_PUBLIC_KEY_SIZE])
			.map_err(|_| TxError::InvalidAddress)?;
		let spend_pubkey = PublicKey::from_slice(&secp, &bytes[secp::COMPRESSED_PUBLIC_KEY_SIZE..])
			.map_err(|_| TxError::InvalidAddress)?;
		Ok(StealthAddress {
			scan_pubkey,
			spend_pubkey,
		})
	}

	pub fn to_hex(&self) -> String {
		let mut bytes = pubkey_bytes(&self.scan_pubkey);
		bytes.extend_from_slice(&pubkey_bytes(&self.spend_pubkey));
		bytes.to_hex()
	}
}

/// An input spending a committed output.
///
/// The signature proves knowledge of both the one-time input key and the
/// spent output's key: it verifies against InputPubKey + e*OutputPubKey
/// where e = BLAKE3(InputPubKey || OutputPubKey).
#[derive(Clone, Debug, PartialEq)]
pub struct Input {
	pub output_id: Hash,
	pub commit: Commitment,
	pub input_pubkey: PublicKey,
	pub output_pubkey: PublicKey,
	pub signature: Signature,
}

impl Input {
	/// Builds a signed input spending the output with the given id and
	/// commitment. Returns the input along with its freshly sampled
	/// one-time input key.
	#[allow(dead_code)]
	pub fn create(
		output_id: Hash,
		commit: Commitment,
		output_pubkey: &PublicKey,
		spend_key: &SecretKey,
	) -> Result<(Input, SecretKey), TxError> {
		let input_key = secp::random_secret();
		let input_pubkey = secp::to_pubkey(&input_key)?;

		let key_hash =
			secp::hash_to_scalar(&[&pubkey_bytes(&input_pubkey), &pubkey_bytes(output_pubkey)])?;
		let sig_key = secp::add_secrets(&input_key, &secp::mul_secret(spend_key, &key_hash)?)?;

		let msg = Input::sig_msg(&output_id, &commit, output_pubkey, &input_pubkey)?;
		let signature = secp::sign(&sig_key, &msg)?;

		Ok((
			Input {
				output_id,
				commit,
				input_pubkey,
				output_pubkey: output_pubkey.clone(),
				signature,
			},
			input_key,
		))
	}

	fn sig_msg(
		output_id: &Hash,
		commit: &Commitment,
		output_pubkey: &PublicKey,
		input_pubkey: &PublicKey,
	) -> Result<secp::Message, TxError> {
		let mut buf = output_id.to_vec();
		buf.extend_from_slice(&commit.0);
		buf.extend_from_slice(&pubkey_bytes(output_pubkey));
		buf.extend_from_slice(&pubkey_bytes(input_pubkey));
		Ok(secp::message(&buf)?)
	}

	pub fn verify_sig(&self) -> bool {
		let result = || -> Result<bool, TxError> {
			let key_hash = secp::hash_to_scalar(&[
				&pubkey_bytes(&self.input_pubkey),
				&pubkey_bytes(&self.output_pubkey),
			])?;
			let sig_pubkey = secp::add_pubkeys(
				&self.input_pubkey,
				&secp::mul_pubkey(&self.output_pubkey, &key_hash)?,
			)?;
			let msg = Input::sig_msg(
				&self.output_id,
				&self.commit,
				&self.output_pubkey,
				&self.input_pubkey,
			)?;
			Ok(secp::verify_signature(&self.signature, &sig_pubkey, &msg))
		}();
		result.unwrap_or(false)
	}

	pub fn hash(&self) -> Result<Hash, ser::Error> {
		hash_writeable(self)
	}
}

impl Writeable for Input {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.output_id.write(writer)?;
		writer.write_fixed_bytes(&self.commit)?;
		self.input_pubkey.write(writer)?;
		self.output_pubkey.write(writer)?;
		self.signature.write(writer)?;
		Ok(())
	}
}

impl Readable for Input {
	fn read<R: Reader>(reader: &mut R) -> Result<Input, ser::Error> {
		Ok(Input {
			output_id: Hash::read(reader)?,
			commit: Commitment::read(reader)?,
			input_pubkey: PublicKey::read(reader)?,
			output_pubkey: PublicKey::read(reader)?,
			signature: Signature::read(reader)?,
		})
	}
}

/// The cleartext portion of a confidential output, committed to by its
/// range proof.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputMessage {
	pub features: u8,
	pub key_exchange_pubkey: PublicKey,
	pub view_tag: u8,
	pub masked_value: u64,
	pub masked_nonce: [u8; 16],
}

impl Writeable for OutputMessage {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u8(self.features)?;
		self.key_exchange_pubkey.write(writer)?;
		writer.write_u8(self.view_tag)?;
		writer.write_u64(self.masked_value)?;
		writer.write_fixed_bytes(&self.masked_nonce.to_vec())?;
		Ok(())
	}
}

impl Readable for OutputMessage {
	fn read<R: Reader>(reader: &mut R) -> Result<OutputMessage, ser::Error> {
		let features = reader.read_u8()?;
		let key_exchange_pubkey = PublicKey::read(reader)?;
		let view_tag = reader.read_u8()?;
		let masked_value = reader.read_u64()?;
		let nonce_bytes = reader.read_fixed_bytes(16)?;
		let mut masked_nonce = [0u8; 16];
		masked_nonce.copy_from_slice(&nonce_bytes);
		Ok(OutputMessage {
			features,
			key_exchange_pubkey,
			view_tag,
			masked_value,
			masked_nonce,
		})
	}
}

/// A confidential output with its range proof and sender signature.
#[derive(Clone, Debug, PartialEq)]
pub struct Output {
	pub commit: Commitment,
	pub sender_pubkey: PublicKey,
	pub receiver_pubkey: PublicKey,
	pub message: OutputMessage,
	pub rangeproof: RangeProof,
	pub signature: Signature,
}

impl Output {
	/// Builds an output paying `value` to the stealth address, authored by
	/// `sender_key`. Returns the output along with the raw (pre-switch)
	/// blinding factor; the caller owes commit(value, blind_switch(blind,
	/// value)) to its kernel.
	pub fn create(
		value: u64,
		sender_key: &SecretKey,
		address: &StealthAddress,
	) -> Result<(Output, SecretKey), TxError> {
		// Shared point, recoverable by the receiver as scan_key * SenderPubKey
		let key_exchange_pubkey = secp::mul_pubkey(&address.scan_pubkey, sender_key)?;
		let shared = blake3::hash(&pubkey_bytes(&key_exchange_pubkey));
		let shared = shared.as_bytes();

		let mut value_mask = [0u8; 32];
		value_mask.copy_from_slice(blake3::hash(&[&b"value"[..], &shared[..]].concat()).as_bytes());
		let mut nonce_mask = [0u8; 32];
		nonce_mask.copy_from_slice(blake3::hash(&[&b"nonce"[..], &shared[..]].concat()).as_bytes());

		let mut nonce = [0u8; 16];
		rand::thread_rng().fill_bytes(&mut nonce);
		let mut masked_nonce = [0u8; 16];
		for i in 0..16 {
			masked_nonce[i] = nonce[i] ^ nonce_mask[i];
		}

		let blind = secp::hash_to_scalar(&[&b"blind"[..], &shared[..]])?;
		let switch_blind = secp::blind_switch(value, &blind)?;
		let commit = secp::commit(value, &switch_blind)?;

		let receiver_hash = secp::hash_to_scalar(&[&b"receiver"[..], &shared[..]])?;
		let receiver_pubkey = secp::mul_pubkey(&address.spend_pubkey, &receiver_hash)?;

		let message = OutputMessage {
			features: 0,
			key_exchange_pubkey,
			view_tag: shared[0],
			masked_value: value ^ BigEndian::read_u64(&value_mask[..8]),
			masked_nonce,
		};
		let message_bytes = ser::ser_vec(&message, ProtocolVersion::local())?;

		let secp = Secp256k1::with_caps(secp256k1zkp::ContextFlag::Commit);
		let proof_nonce = secp::hash_to_scalar(&[&b"proof_nonce"[..], &shared[..]])?;
		let rangeproof = secp.bullet_proof(
			value,
			switch_blind.clone(),
			proof_nonce.clone(),
			proof_nonce.clone(),
			Some(message_bytes),
			None,
		);

		let sender_pubkey = secp::to_pubkey(sender_key)?;
		let msg = Output::sig_msg(&commit, &receiver_pubkey, &message)?;
		let signature = secp::sign(sender_key, &msg)?;

		Ok((
			Output {
				commit,
				sender_pubkey,
				receiver_pubkey,
				message,
				rangeproof,
				signature,
			},
			blind,
		))
	}

	fn sig_msg(
		commit: &Commitment,
		receiver_pubkey: &PublicKey,
		message: &OutputMessage,
	) -> Result<secp::Message, TxError> {
		let mut buf = commit.0.to_vec();
		buf.extend_from_slice(&pubkey_bytes(receiver_pubkey));
		buf.extend_from_slice(&ser::ser_vec(message, ProtocolVersion::local())?);
		Ok(secp::message(&buf)?)
	}

	/// The output id: BLAKE3 of the canonical serialization.
	pub fn id(&self) -> Result<Hash, ser::Error> {
		hash_writeable(self)
	}

	pub fn verify_sig(&self) -> bool {
		let result = || -> Result<bool, TxError> {
			let msg = Output::sig_msg(&self.commit, &self.receiver_pubkey, &self.message)?;
			Ok(secp::verify_signature(&self.signature, &self.sender_pubkey, &msg))
		}();
		result.unwrap_or(false)
	}

	/// Verifies the range proof against the provided commitment, binding
	/// the serialized message as proof context.
	pub fn verify_rangeproof(&self, commit: &Commitment) -> Result<(), TxError> {
		let message_bytes = ser::ser_vec(&self.message, ProtocolVersion::local())?;
		let secp = Secp256k1::with_caps(secp256k1zkp::ContextFlag::Commit);
		secp.verify_bullet_proof(commit.clone(), self.rangeproof.clone(), Some(message_bytes))
			.map_err(|_| TxError::InvalidRangeProof)?;
		Ok(())
	}

	pub fn verify(&self) -> Result<(), TxError> {
		self.verify_rangeproof(&self.commit)?;
		if !self.verify_sig() {
			return Err(TxError::InvalidSignature);
		}
		Ok(())
	}
}

impl Writeable for Output {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.commit)?;
		self.sender_pubkey.write(writer)?;
		self.receiver_pubkey.write(writer)?;
		self.message.write(writer)?;
		self.rangeproof.write(writer)?;
		self.signature.write(writer)?;
		Ok(())
	}
}

impl Readable for Output {
	fn read<R: Reader>(reader: &mut R) -> Result<Output, ser::Error> {
		Ok(Output {
			commit: Commitment::read(reader)?,
			sender_pubkey: PublicKey::read(reader)?,
			receiver_pubkey: PublicKey::read(reader)?,
			message: OutputMessage::read(reader)?,
			rangeproof: RangeProof::read(reader)?,
			signature: Signature::read(reader)?,
		})
	}
}

/// A kernel binding its share of the fee and the excess blinding factors
/// of the transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
	pub excess: Commitment,
	pub stealth_excess: PublicKey,
	pub fee: u64,
	pub signature: Signature,
}

impl Kernel {
	/// Builds a kernel committing to the summed kernel and stealth blinds,
	/// signed with the combined key kernelBlind + e*stealthBlind.
	pub fn create(
		kernel_blind: &SecretKey,
		stealth_blind: &SecretKey,
		fee: u64,
	) -> Result<Kernel, TxError> {
		let excess = secp::commit(0, kernel_blind)?;
		let stealth_excess = secp::to_pubkey(stealth_blind)?;

		let key_hash =
			secp::hash_to_scalar(&[&excess.0[..], &pubkey_bytes(&stealth_excess)[..]])?;
		let sig_key =
			secp::add_secrets(kernel_blind, &secp::mul_secret(stealth_blind, &key_hash)?)?;

		let msg = Kernel::sig_msg(&excess, &stealth_excess, fee)?;
		let signature = secp::sign(&sig_key, &msg)?;

		Ok(Kernel {
			excess,
			stealth_excess,
			fee,
			signature,
		})
	}

	fn sig_msg(
		excess: &Commitment,
		stealth_excess: &PublicKey,
		fee: u64,
	) -> Result<secp::Message, TxError> {
		let mut buf = excess.0.to_vec();
		buf.extend_from_slice(&pubkey_bytes(stealth_excess));
		buf.extend_from_slice(&fee.to_be_bytes());
		Ok(secp::message(&buf)?)
	}

	#[allow(dead_code)]
	pub fn verify_sig(&self) -> bool {
		let result = || -> Result<bool, TxError> {
			let secp = Secp256k1::with_caps(secp256k1zkp::ContextFlag::Commit);
			let excess_pubkey = self.excess.to_pubkey(&secp)?;
			let key_hash = secp::hash_to_scalar(&[
				&self.excess.0[..],
				&pubkey_bytes(&self.stealth_excess)[..],
			])?;
			let sig_pubkey = secp::add_pubkeys(
				&excess_pubkey,
				&secp::mul_pubkey(&self.stealth_excess, &key_hash)?,
			)?;
			let msg = Kernel::sig_msg(&self.excess, &self.stealth_excess, self.fee)?;
			Ok(secp::verify_signature(&self.signature, &sig_pubkey, &msg))
		}();
		result.unwrap_or(false)
	}

	pub fn hash(&self) -> Result<Hash, ser::Error> {
		hash_writeable(self)
	}
}

impl Writeable for Kernel {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.excess)?;
		self.stealth_excess.write(writer)?;
		writer.write_u64(self.fee)?;
		self.signature.write(writer)?;
		Ok(())
	}
}

impl Readable for Kernel {
	fn read<R: Reader>(reader: &mut R) -> Result<Kernel, ser::Error> {
		Ok(Kernel {
			excess: Commitment::read(reader)?,
			stealth_excess: PublicKey::read(reader)?,
			fee: reader.read_u64()?,
			signature: Signature::read(reader)?,
		})
	}
}

/// The body of an aggregate settlement transaction.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TxBody {
	pub inputs: Vec<Input>,
	pub outputs: Vec<Output>,
	pub kernels: Vec<Kernel>,
}

impl TxBody {
	/// Canonically sorts inputs, outputs and kernels by their hashes.
	pub fn sort(&mut self) {
		self.inputs
			.sort_by_key(|input| input.hash().unwrap_or(ZERO_HASH));
		self.outputs
			.sort_by_key(|output| output.id().unwrap_or(ZERO_HASH));
		self.kernels
			.sort_by_key(|kernel| kernel.hash().unwrap_or(ZERO_HASH));
	}
}

impl Writeable for TxBody {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.inputs.len() as u64)?;
		for input in &self.inputs {
			input.write(writer)?;
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

impl Readable for TxBody {
	fn read<R: Reader>(reader: &mut R) -> Result<TxBody, ser::Error> {
		let num_inputs = reader.read_u64()?;
		let mut inputs = Vec::with_capacity(num_inputs as usize);
		for _ in 0..num_inputs {
			inputs.push(Input::read(reader)?);
		}
		let num_outputs = reader.read_u64()?;
		let mut outputs = Vec::with_capacity(num_outputs as usize);
		for _ in 0..num_outputs {
			outputs.push(Output::read(reader)?);
		}
		let num_kernels = reader.read_u64()?;
		let mut kernels = Vec::with_capacity(num_kernels as usize);
		for _ in 0..num_kernels {
			kernels.push(Kernel::read(reader)?);
		}
		Ok(TxBody {
			inputs,
			outputs,
			kernels,
		})
	}
}

/// An aggregate settlement transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
	pub body: TxBody,
}

impl Transaction {
	pub fn new(body: TxBody) -> Transaction {
		Transaction { body }
	}

	/// Full consensus-style validation: per-part proofs and signatures,
	/// then the value and stealth balance equations.
	#[allow(dead_code)]
	pub fn validate(&self) -> Result<(), TxError> {
		for input in &self.body.inputs {
			if !input.verify_sig() {
				return Err(TxError::InvalidSignature);
			}
		}
		for output in &self.body.outputs {
			output.verify()?;
		}
		for kernel in &self.body.kernels {
			if !kernel.verify_sig() {
				return Err(TxError::InvalidSignature);
			}
		}

		// sum(inputs) + sum(kernel.excess) == sum(outputs) + sum(fee*H)
		let mut lhs = self
			.body
			.inputs
			.iter()
			.map(|input| input.commit.clone())
			.collect::<Vec<_>>();
		lhs.extend(self.body.kernels.iter().map(|kernel| kernel.excess.clone()));
		let mut rhs = self
			.body
			.outputs
			.iter()
			.map(|output| output.commit.clone())
			.collect::<Vec<_>>();
		for kernel in &self.body.kernels {
			rhs.push(secp::commit_value(kernel.fee)?);
		}
		if secp::commit_sum(lhs, Vec::new())? != secp::commit_sum(rhs, Vec::new())? {
			return Err(TxError::KernelSumMismatch);
		}

		// sum(kernel.stealthExcess) + sum(input.inputPubKey)
		//   == sum(output.senderPubKey) + ... rearranged all-additive
		let mut lhs_keys: Vec<&PublicKey> = self
			.body
			.kernels
			.iter()
			.map(|kernel| &kernel.stealth_excess)
			.collect();
		lhs_keys.extend(self.body.inputs.iter().map(|input| &input.input_pubkey));
		let mut rhs_keys: Vec<&PublicKey> = self
			.body
			.outputs
			.iter()
			.map(|output| &output.sender_pubkey)
			.collect();
		rhs_keys.extend(self.body.inputs.iter().map(|input| &input.output_pubkey));
		let rhs_sum = secp::sum_pubkeys(rhs_keys)?;
		let lhs_sum = secp::sum_pubkeys(lhs_keys)?;
		if lhs_sum != rhs_sum {
			return Err(TxError::StealthSumMismatch);
		}

		Ok(())
	}
}

impl Writeable for Transaction {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.body.write(writer)
	}
}

impl Readable for Transaction {
	fn read<R: Reader>(reader: &mut R) -> Result<Transaction, ser::Error> {
		Ok(Transaction {
			body: TxBody::read(reader)?,
		})
	}
}

#[cfg(test)]
pub mod test_util {
	use super::StealthAddress;
	use crate::secp::{self, SecretKey};

	pub fn rand_stealth_address() -> (SecretKey, SecretKey, StealthAddress) {
		let scan_key = secp::random_secret();
		let spend_key = secp::random_secret();
		let address = StealthAddress::from_secrets(&scan_key, &spend_key).unwrap();
		(scan_key, spend_key, address)
	}
}

#[cfg(test)]
mod tests {
	use super::test_util::rand_stealth_address;
	use super::*;
	use grin_core::core::hash::Hash;

	#[test]
	fn output_create_and_verify() -> Result<(), TxError> {
		let (_, _, address) = rand_stealth_address();
		let sender_key = secp::random_secret();
		let value: u64 = 25_000;

		let (output, blind) = Output::create(value, &sender_key, &address)?;
		output.verify()?;

		assert_eq!(secp::to_pubkey(&sender_key)?, output.sender_pubkey);
		let switch_blind = secp::blind_switch(value, &blind)?;
		assert_eq!(secp::commit(value, &switch_blind)?, output.commit);

		// proof must not verify under a different commitment
		let other = secp::commit(value, &secp::random_secret())?;
		assert_eq!(
			Err(TxError::InvalidRangeProof),
			output.verify_rangeproof(&other)
		);
		Ok(())
	}

	#[test]
	fn output_tampered_message_fails() -> Result<(), TxError> {
		let (_, _, address) = rand_stealth_address();
		let (mut output, _) = Output::create(1_000, &secp::random_secret(), &address)?;

		output.message.masked_value ^= 1;
		assert_eq!(
			Err(TxError::InvalidRangeProof),
			output.verify_rangeproof(&output.commit)
		);
		assert!(!output.verify_sig());
		Ok(())
	}

	#[test]
	fn kernel_create_and_verify() -> Result<(), TxError> {
		let kernel_blind = secp::random_secret();
		let stealth_blind = secp::random_secret();

		let kernel = Kernel::create(&kernel_blind, &stealth_blind, 700)?;
		assert!(kernel.verify_sig());
		assert_eq!(secp::commit(0, &kernel_blind)?, kernel.excess);
		assert_eq!(secp::to_pubkey(&stealth_blind)?, kernel.stealth_excess);

		let mut tampered = kernel.clone();
		tampered.fee += 1;
		assert!(!tampered.verify_sig());
		Ok(())
	}

	#[test]
	fn input_create_and_verify() -> Result<(), TxError> {
		let spend_key = secp::random_secret();
		let output_pubkey = secp::to_pubkey(&spend_key)?;
		let commit = secp::commit(10_000, &secp::random_secret())?;
		let output_id = Hash::from_vec(blake3::hash(b"some output").as_bytes());

		let (input, _) = Input::create(output_id, commit, &output_pubkey, &spend_key)?;
		assert!(input.verify_sig());

		// signing with a key other than the output's spend key must fail
		let (forged, _) = Input::create(output_id, commit, &output_pubkey, &secp::random_secret())?;
		assert!(!forged.verify_sig());
		Ok(())
	}

	#[test]
	fn input_serialization_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
		let spend_key = secp::random_secret();
		let (input, _) = Input::create(
			Hash::from_vec(blake3::hash(b"id").as_bytes()),
			secp::commit(42, &secp::random_secret())?,
			&secp::to_pubkey(&spend_key)?,
			&spend_key,
		)?;

		let bytes = ser::ser_vec(&input, ProtocolVersion::local())?;
		let decoded: Input = ser::deserialize_default(&mut &bytes[..])?;
		assert_eq!(input, decoded);
		assert!(decoded.verify_sig());
		Ok(())
	}

	/// The canonical sort is a total order: sorting any permutation of the
	/// same parts yields byte-identical bodies.
	#[test]
	fn body_sort_is_canonical() -> Result<(), Box<dyn std::error::Error>> {
		let (_, _, address) = rand_stealth_address();
		let mut outputs = Vec::new();
		for i in 0..4u64 {
			let (output, _) = Output::create(1_000 * (i + 1), &secp::random_secret(), &address)?;
			outputs.push(output);
		}

		let mut body1 = TxBody {
			inputs: vec![],
			outputs: outputs.clone(),
			kernels: vec![],
		};
		outputs.reverse();
		let mut body2 = TxBody {
			inputs: vec![],
			outputs,
			kernels: vec![],
		};

		body1.sort();
		body2.sort();
		assert_eq!(
			ser::ser_vec(&body1, ProtocolVersion::local())?,
			ser::ser_vec(&body2, ProtocolVersion::local())?
		);
		Ok(())
	}
}
