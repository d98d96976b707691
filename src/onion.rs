use crate::secp::{self, SecretKey, Signature};
use crate::tx::Input;
use crate::types::{Payload, XPubKey};

use chacha20::cipher::{NewCipher, StreamCipher};
use chacha20::{ChaCha20, Key, Nonce};
use grin_core::ser::{self, ProtocolVersion, Readable, Reader, Writeable, Writer};
use grin_util::{self, ToHex};
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::result::Result;
use thiserror::Error;
use x25519_dalek::StaticSecret;

type HmacSha256 = Hmac<Sha256>;
type RawBytes = Vec<u8>;

/// A data packet with layers of encryption, submitted by a user and
/// relayed between mix nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct Onion {
	/// The input being mixed. Only meaningful on user-submitted onions;
	/// cleared by peeling.
	pub input: Option<Input>,
	/// The encrypted payloads which represent the layers of the onion
	pub enc_payloads: Vec<RawBytes>,
	/// The onion originator's portion of the shared secret
	pub ephemeral_pubkey: XPubKey,
	/// Signature binding the onion to the spent output's key. Only
	/// meaningful on user-submitted onions; cleared by peeling.
	pub owner_proof: Option<Signature>,
}

/// The material a user supplies for one hop when building an onion.
#[derive(Clone)]
#[allow(dead_code)]
pub struct Hop {
	/// The static X25519 key of the node serving this hop
	pub pubkey: XPubKey,
	pub kernel_blind: SecretKey,
	pub stealth_blind: SecretKey,
	pub fee: u64,
	/// The re-blinded output, present on the terminal hop only
	pub output: Option<crate::tx::Output>,
}

/// Create an Onion routed through the given hops, encrypting each layer so
/// that exactly one hop can read it.
#[allow(dead_code)]
pub fn create_onion(hops: &Vec<Hop>) -> Result<Onion, OnionError> {
	let mut ephemeral_key = StaticSecret::new(&mut rand::rngs::OsRng);
	let ephemeral_pubkey = XPubKey::from_secret(&ephemeral_key);

	let mut ciphers: Vec<ChaCha20> = Vec::new();
	let mut enc_payloads: Vec<RawBytes> = Vec::new();
	for (i, hop) in hops.iter().enumerate() {
		ciphers.push(new_stream_cipher(&ephemeral_key, &hop.pubkey)?);

		ephemeral_key = StaticSecret::new(&mut rand::rngs::OsRng);
		let next_pubkey = if i < hops.len() - 1 {
			XPubKey::from_secret(&ephemeral_key)
		} else {
			XPubKey::zero()
		};

		let payload = Payload {
			next_pubkey,
			kernel_blind: hop.kernel_blind.clone(),
			stealth_blind: hop.stealth_blind.clone(),
			fee: hop.fee,
			output: hop.output.clone(),
		};
		enc_payloads.push(payload.serialize()?);
	}

	for i in (0..ciphers.len()).rev() {
		for j in i..enc_payloads.len() {
			ciphers[i].apply_keystream(&mut enc_payloads[j]);
		}
	}

	Ok(Onion {
		input: None,
		enc_payloads,
		ephemeral_pubkey,
		owner_proof: None,
	})
}

/// Derive the shared stream cipher for one (secret, public) X25519 pair:
/// ChaCha20 keyed with HMAC-SHA256("MWIXNET", ECDH), fixed nonce.
pub fn new_stream_cipher(
	secret: &StaticSecret,
	pubkey: &XPubKey,
) -> Result<ChaCha20, OnionError> {
	let shared_secret = secret.diffie_hellman(&pubkey.to_x25519());
	if shared_secret.as_bytes() == &[0u8; 32] {
		return Err(OnionError::DegenerateKey);
	}

	let mut mu_hmac = HmacSha256::new_from_slice(b"MWIXNET")?;
	mu_hmac.update(shared_secret.as_bytes());
	let mukey = mu_hmac.finalize().into_bytes();

	let key = Key::from_slice(&mukey[0..32]);
	let nonce = Nonce::from_slice(b"NONCE1234567");

	Ok(ChaCha20::new(&key, &nonce))
}

impl Onion {
	#[allow(dead_code)]
	pub fn serialize(&self) -> Result<Vec<u8>, ser::Error> {
		let mut vec = vec![];
		ser::serialize_default(&mut vec, &self)?;
		Ok(vec)
	}

	/// The input descriptor of a user-submitted onion.
	pub fn input(&self) -> Result<&Input, OnionError> {
		self.input.as_ref().ok_or(OnionError::MissingInput)
	}

	/// The payload layers in their wire form:
	/// count:u64 || (len:u64 || bytes){count}, big-endian.
	pub fn payloads_bytes(&self) -> Result<Vec<u8>, ser::Error> {
		let mut vec = vec![];
		ser::serialize_default(&mut vec, &PayloadsRef(&self.enc_payloads))?;
		Ok(vec)
	}

	/// Peel a single layer off of the Onion, returning the decrypted Payload
	/// and the Onion for the next hop.
	pub fn peel_layer(&self, secret_key: &StaticSecret) -> Result<(Payload, Onion), OnionError> {
		let mut cipher = new_stream_cipher(secret_key, &self.ephemeral_pubkey)?;

		if self.enc_payloads.is_empty() {
			return Err(OnionError::DeserializationError(ser::Error::CountError));
		}

		let mut decrypted_bytes = self.enc_payloads[0].clone();
		cipher.apply_keystream(&mut decrypted_bytes);
		let decrypted_payload = Payload::deserialize(&decrypted_bytes).map_err(|e| match e {
			ser::Error::UnsupportedProtocolVersion => OnionError::WrongVersion,
			e => OnionError::DeserializationError(e),
		})?;

		let enc_payloads: Vec<RawBytes> = self
			.enc_payloads
			.iter()
			.enumerate()
			.filter(|&(i, _)| i != 0)
			.map(|(_, enc_payload)| {
				let mut p = enc_payload.clone();
				cipher.apply_keystream(&mut p);
				p
			})
			.collect();

		let peeled_onion = Onion {
			input: None,
			enc_payloads,
			ephemeral_pubkey: decrypted_payload.next_pubkey,
			owner_proof: None,
		};
		Ok((decrypted_payload, peeled_onion))
	}

	/// The message bound by the owner proof: every input field, then the
	/// wire payloads, then the ephemeral key.
	fn sig_msg(&self) -> Result<Vec<u8>, OnionError> {
		let input = self.input()?;

		let mut buf = input.output_id.to_vec();
		buf.extend_from_slice(&input.commit.0);
		buf.extend_from_slice(&ser::ser_vec(
			&input.output_pubkey,
			ProtocolVersion::local(),
		)?);
		buf.extend_from_slice(&ser::ser_vec(&input.input_pubkey, ProtocolVersion::local())?);
		buf.extend_from_slice(&ser::ser_vec(&input.signature, ProtocolVersion::local())?);
		buf.extend_from_slice(&self.payloads_bytes()?);
		buf.extend_from_slice(&self.ephemeral_pubkey.0);
		Ok(buf)
	}

	/// Attach the owner proof, signing with the spent output's key scaled by
	/// BLAKE3(InputPubKey || OutputPubKey).
	#[allow(dead_code)]
	pub fn sign(&mut self, spend_key: &SecretKey) -> Result<(), OnionError> {
		let key_hash = self.owner_key_hash()?;
		let sig_key = secp::mul_secret(spend_key, &key_hash)?;

		let msg = secp::message(&self.sig_msg()?)?;
		self.owner_proof = Some(secp::sign(&sig_key, &msg)?);
		Ok(())
	}

	/// Verify the owner proof against OutputPubKey * keyHash. Any failure
	/// along the way reads as an invalid proof.
	pub fn verify_owner_proof(&self) -> bool {
		let result = || -> Result<bool, OnionError> {
			let proof = self.owner_proof.ok_or(OnionError::MissingInput)?;
			let input = self.input()?;

			let key_hash = self.owner_key_hash()?;
			let sig_pubkey = secp::mul_pubkey(&input.output_pubkey, &key_hash)?;
			let msg = secp::message(&self.sig_msg()?)?;
			Ok(secp::verify_signature(&proof, &sig_pubkey, &msg))
		}();
		result.unwrap_or(false)
	}

	fn owner_key_hash(&self) -> Result<SecretKey, OnionError> {
		let input = self.input()?;
		let input_pk = ser::ser_vec(&input.input_pubkey, ProtocolVersion::local())?;
		let output_pk = ser::ser_vec(&input.output_pubkey, ProtocolVersion::local())?;
		Ok(secp::hash_to_scalar(&[&input_pk, &output_pk])?)
	}
}

// Wrappers so the count-prefixed payload framing reads and writes the same
// way everywhere it appears (binary wire form and the JSON blob).
struct PayloadsRef<'a>(&'a Vec<RawBytes>);

impl<'a> Writeable for PayloadsRef<'a> {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.0.len() as u64)?;
		for p in self.0 {
			writer.write_u64(p.len() as u64)?;
			writer.write_fixed_bytes(p)?;
		}
		Ok(())
	}
}

struct Payloads(Vec<RawBytes>);

impl Readable for Payloads {
	fn read<R: Reader>(reader: &mut R) -> Result<Payloads, ser::Error> {
		let len = reader.read_u64()?;
		let mut enc_payloads: Vec<RawBytes> = Vec::new();
		for _ in 0..len {
			let size = reader.read_u64()?;
			let bytes = reader.read_fixed_bytes(size as usize)?;
			enc_payloads.push(bytes);
		}
		Ok(Payloads(enc_payloads))
	}
}

impl Writeable for Onion {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		match &self.input {
			Some(input) => {
				writer.write_u8(1)?;
				input.write(writer)?;
			}
			None => writer.write_u8(0)?,
		};
		PayloadsRef(&self.enc_payloads).write(writer)?;
		self.ephemeral_pubkey.write(writer)?;
		match &self.owner_proof {
			Some(proof) => {
				writer.write_u8(1)?;
				proof.write(writer)?;
			}
			None => writer.write_u8(0)?,
		};
		Ok(())
	}
}

impl Readable for Onion {
	fn read<R: Reader>(reader: &mut R) -> Result<Onion, ser::Error> {
		let input = match reader.read_u8()? {
			0 => None,
			1 => Some(Input::read(reader)?),
			_ => return Err(ser::Error::CorruptedData),
		};
		let Payloads(enc_payloads) = Payloads::read(reader)?;
		let ephemeral_pubkey = XPubKey::read(reader)?;
		let owner_proof = match reader.read_u8()? {
			0 => None,
			1 => Some(Signature::read(reader)?),
			_ => return Err(ser::Error::CorruptedData),
		};
		Ok(Onion {
			input,
			enc_payloads,
			ephemeral_pubkey,
			owner_proof,
		})
	}
}

// The user-facing JSON shape: a nested input descriptor plus the payload
// blob, every field lowercase hex.
#[derive(Serialize, Deserialize)]
struct InputJson {
	output_id: String,
	output_commit: String,
	output_pk: String,
	input_pk: String,
	input_sig: String,
}

#[derive(Serialize, Deserialize)]
struct OnionJson {
	input: InputJson,
	enc_payloads: String,
	ephemeral_xpub: String,
	owner_proof: String,
}

impl serde::ser::Serialize for Onion {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::ser::Serializer,
	{
		use serde::ser::Error;

		let input = self.input().map_err(S::Error::custom)?;
		let proof = self
			.owner_proof
			.ok_or(OnionError::MissingInput)
			.map_err(S::Error::custom)?;

		let output_pk = ser::ser_vec(&input.output_pubkey, ProtocolVersion::local())
			.map_err(S::Error::custom)?;
		let input_pk = ser::ser_vec(&input.input_pubkey, ProtocolVersion::local())
			.map_err(S::Error::custom)?;
		let input_sig =
			ser::ser_vec(&input.signature, ProtocolVersion::local()).map_err(S::Error::custom)?;
		let enc_payloads = self.payloads_bytes().map_err(S::Error::custom)?;
		let owner_proof =
			ser::ser_vec(&proof, ProtocolVersion::local()).map_err(S::Error::custom)?;

		let json = OnionJson {
			input: InputJson {
				output_id: input.output_id.to_vec().to_hex(),
				output_commit: input.commit.0.to_vec().to_hex(),
				output_pk: output_pk.to_hex(),
				input_pk: input_pk.to_hex(),
				input_sig: input_sig.to_hex(),
			},
			enc_payloads: enc_payloads.to_hex(),
			ephemeral_xpub: self.ephemeral_pubkey.0.to_vec().to_hex(),
			owner_proof: owner_proof.to_hex(),
		};
		json.serialize(serializer)
	}
}

impl<'de> serde::de::Deserialize<'de> for Onion {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::de::Deserializer<'de>,
	{
		use serde::de::Error;

		let json = OnionJson::deserialize(deserializer)?;

		let fixed_hex = |hex: &str, len: usize| -> Result<Vec<u8>, D::Error> {
			let bytes = grin_util::from_hex(hex).map_err(D::Error::custom)?;
			if bytes.len() != len {
				return Err(D::Error::custom("unexpected field length"));
			}
			Ok(bytes)
		};
		let read_pubkey = |hex: &str| -> Result<secp::PublicKey, D::Error> {
			let bytes = fixed_hex(hex, secp::COMPRESSED_PUBLIC_KEY_SIZE)?;
			ser::deserialize_default(&mut &bytes[..]).map_err(D::Error::custom)
		};

		let output_id_bytes = fixed_hex(&json.input.output_id, 32)?;
		let commit_bytes = fixed_hex(&json.input.output_commit, secp::PEDERSEN_COMMITMENT_SIZE)?;
		let sig_bytes = fixed_hex(&json.input.input_sig, secp::AGG_SIGNATURE_SIZE)?;
		let proof_bytes = fixed_hex(&json.owner_proof, secp::AGG_SIGNATURE_SIZE)?;
		let xpub_bytes = fixed_hex(&json.ephemeral_xpub, 32)?;

		let input = Input {
			output_id: grin_core::core::hash::Hash::from_vec(&output_id_bytes),
			commit: secp::Commitment::from_vec(commit_bytes),
			output_pubkey: read_pubkey(&json.input.output_pk)?,
			input_pubkey: read_pubkey(&json.input.input_pk)?,
			signature: ser::deserialize_default(&mut &sig_bytes[..]).map_err(D::Error::custom)?,
		};

		let payload_bytes = grin_util::from_hex(&json.enc_payloads).map_err(D::Error::custom)?;
		let Payloads(enc_payloads) =
			ser::deserialize_default(&mut &payload_bytes[..]).map_err(D::Error::custom)?;

		let mut ephemeral = [0u8; 32];
		ephemeral.copy_from_slice(&xpub_bytes);

		Ok(Onion {
			input: Some(input),
			enc_payloads,
			ephemeral_pubkey: XPubKey(ephemeral),
			owner_proof: Some(
				ser::deserialize_default(&mut &proof_bytes[..]).map_err(D::Error::custom)?,
			),
		})
	}
}

/// Error types for creating and peeling Onions
#[derive(Clone, Error, Debug, PartialEq)]
pub enum OnionError {
	#[error("Invalid key length for MAC initialization")]
	InvalidKeyLength,
	#[error("Shared secret is the identity")]
	DegenerateKey,
	#[error("Wrong onion version")]
	WrongVersion,
	#[error("Onion is missing its input descriptor")]
	MissingInput,
	#[error("Serialization error occurred: {0:?}")]
	SerializationError(ser::Error),
	#[error("Deserialization error occurred: {0:?}")]
	DeserializationError(ser::Error),
	#[error("Error during key arithmetic: {0:?}")]
	CalcError(secp256k1zkp::Error),
}

impl From<InvalidLength> for OnionError {
	fn from(_err: InvalidLength) -> OnionError {
		OnionError::InvalidKeyLength
	}
}

impl From<ser::Error> for OnionError {
	fn from(err: ser::Error) -> OnionError {
		OnionError::SerializationError(err)
	}
}

impl From<secp256k1zkp::Error> for OnionError {
	fn from(err: secp256k1zkp::Error) -> OnionError {
		OnionError::CalcError(err)
	}
}

#[cfg(test)]
pub mod test_util {
	use super::{create_onion, Hop, Onion};
	use crate::secp::{self, SecretKey};
	use crate::tx::{self, Input, Output, OutputMessage, StealthAddress};
	use crate::types::XPubKey;

	use x25519_dalek::StaticSecret;

	/// A spendable test coin: the committed output's secrets along with the
	/// chain-side record.
	pub struct TestCoin {
		pub value: u64,
		pub blind: SecretKey,
		pub spend_key: SecretKey,
		pub utxo: Output,
	}

	/// Mint a coin the mock chain can serve and a user can spend. Proof and
	/// signature are placeholders; the validator trusts the chain record.
	pub fn new_test_coin(value: u64) -> TestCoin {
		let blind = secp::random_secret();
		let spend_key = secp::random_secret();
		let utxo = Output {
			commit: secp::commit(value, &blind).unwrap(),
			sender_pubkey: crate::secp::test_util::rand_pubkey(),
			receiver_pubkey: secp::to_pubkey(&spend_key).unwrap(),
			message: OutputMessage {
				features: 0,
				key_exchange_pubkey: crate::secp::test_util::rand_pubkey(),
				view_tag: 0,
				masked_value: value,
				masked_nonce: [0u8; 16],
			},
			rangeproof: crate::secp::test_util::rand_proof(),
			signature: secp::sign(&spend_key, &secp::message(b"utxo").unwrap()).unwrap(),
		};
		TestCoin {
			value,
			blind,
			spend_key,
			utxo,
		}
	}

	/// Everything a user derives while building an onion; kept around so
	/// tests can assert against the expected round results.
	pub struct UserSwap {
		pub onion: Onion,
		pub input: Input,
		pub out_value: u64,
		pub output: Output,
	}

	/// Run the full user-side flow: spend the coin through the node chain,
	/// paying `fees[i]` at hop i, with the final output re-blinded to the
	/// destination address.
	pub fn new_user_swap(
		node_keys: &Vec<StaticSecret>,
		fees: &Vec<u64>,
		coin: &TestCoin,
		destination: &StealthAddress,
	) -> UserSwap {
		build_user_swap(node_keys, fees, coin, destination, None)
	}

	/// Same as [`new_user_swap`] but with the first hop's kernel blind
	/// pinned, so tests can steer the post-peel commitment.
	pub fn new_user_swap_pinned(
		node_keys: &Vec<StaticSecret>,
		fees: &Vec<u64>,
		coin: &TestCoin,
		destination: &StealthAddress,
		first_kernel_blind: &SecretKey,
	) -> UserSwap {
		build_user_swap(node_keys, fees, coin, destination, Some(first_kernel_blind))
	}

	fn build_user_swap(
		node_keys: &Vec<StaticSecret>,
		fees: &Vec<u64>,
		coin: &TestCoin,
		destination: &StealthAddress,
		first_kernel_blind: Option<&SecretKey>,
	) -> UserSwap {
		let (input, input_key) = Input::create(
			coin.utxo.id().unwrap(),
			coin.utxo.commit,
			&coin.utxo.receiver_pubkey,
			&coin.spend_key,
		)
		.unwrap();

		let out_value = coin.value - fees.iter().sum::<u64>();

		let stealth_blinds: Vec<SecretKey> =
			node_keys.iter().map(|_| secp::random_secret()).collect();
		let mut stealth_sum = stealth_blinds[0].clone();
		for blind in &stealth_blinds[1..] {
			stealth_sum = secp::add_secrets(&stealth_sum, blind).unwrap();
		}

		// sender key = spendKey - inputKey + sum(stealthBlinds), so the
		// output's sender pubkey equals the stealth sum the terminal node
		// accumulates
		let sender_key = secp::add_secrets(
			&sub_secrets(&coin.spend_key, &input_key),
			&stealth_sum,
		)
		.unwrap();
		let (output, raw_blind) = Output::create(out_value, &sender_key, destination).unwrap();
		let out_blind = secp::blind_switch(out_value, &raw_blind).unwrap();

		// all but the last kernel blind are free; the last one closes the
		// commitment equation out_blind = coin.blind + sum(kernel_blinds)
		let mut kernel_blinds: Vec<SecretKey> = Vec::new();
		let mut partial = coin.blind.clone();
		for i in 0..node_keys.len() - 1 {
			let blind = match (i, first_kernel_blind) {
				(0, Some(pinned)) => pinned.clone(),
				_ => secp::random_secret(),
			};
			partial = secp::add_secrets(&partial, &blind).unwrap();
			kernel_blinds.push(blind);
		}
		kernel_blinds.push(sub_secrets(&out_blind, &partial));

		let hops: Vec<Hop> = node_keys
			.iter()
			.enumerate()
			.map(|(i, node_key)| Hop {
				pubkey: XPubKey::from_secret(node_key),
				kernel_blind: kernel_blinds[i].clone(),
				stealth_blind: stealth_blinds[i].clone(),
				fee: fees[i],
				output: if i == node_keys.len() - 1 {
					Some(output.clone())
				} else {
					None
				},
			})
			.collect();

		let mut onion = create_onion(&hops).unwrap();
		onion.input = Some(input.clone());
		onion.sign(&coin.spend_key).unwrap();

		UserSwap {
			onion,
			input,
			out_value,
			output,
		}
	}

	// n - 1 for the secp256k1 group, used to negate scalars with nothing
	// but mul_assign
	const MINUS_ONE: [u8; 32] = [
		0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
		0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36,
		0x41, 0x40,
	];

	pub fn sub_secrets(a: &SecretKey, b: &SecretKey) -> SecretKey {
		let secp = secp::Secp256k1::with_caps(secp::ContextFlag::Full);
		let minus_one = SecretKey::from_slice(&secp, &MINUS_ONE).unwrap();
		let neg_b = secp::mul_secret(b, &minus_one).unwrap();
		secp::add_secrets(a, &neg_b).unwrap()
	}

	pub fn rand_onion() -> Onion {
		let keys: Vec<StaticSecret> = (0..3)
			.map(|_| StaticSecret::new(&mut rand::rngs::OsRng))
			.collect();
		let hops: Vec<Hop> = keys
			.iter()
			.map(|key| Hop {
				pubkey: XPubKey::from_secret(key),
				kernel_blind: secp::random_secret(),
				stealth_blind: secp::random_secret(),
				fee: 100,
				output: None,
			})
			.collect();

		let mut onion = create_onion(&hops).unwrap();
		let coin = new_test_coin(1_000_000);
		let (input, _) = Input::create(
			coin.utxo.id().unwrap(),
			coin.utxo.commit,
			&coin.utxo.receiver_pubkey,
			&coin.spend_key,
		)
		.unwrap();
		onion.input = Some(input);
		onion.sign(&coin.spend_key).unwrap();
		onion
	}

	pub fn rand_stealth_address() -> StealthAddress {
		let (_, _, address) = tx::test_util::rand_stealth_address();
		address
	}
}
