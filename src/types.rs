use crate::onion::Onion;
use crate::secp::{self, PublicKey, SecretKey};
use crate::tx::Output;

use grin_core::ser::{self, Readable, Reader, Writeable, Writer};

/// Version byte expected at the head of every hop payload.
pub const ONION_VERSION: u8 = 0;

/// A 32-byte X25519 public key as it travels on the wire. The all-zero key
/// is the sentinel marking the terminal hop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct XPubKey(pub [u8; 32]);

impl XPubKey {
	#[allow(dead_code)]
	pub fn zero() -> XPubKey {
		XPubKey([0u8; 32])
	}

	pub fn from_secret(secret: &x25519_dalek::StaticSecret) -> XPubKey {
		XPubKey(*x25519_dalek::PublicKey::from(secret).as_bytes())
	}

	#[allow(dead_code)]
	pub fn is_zero(&self) -> bool {
		self.0 == [0u8; 32]
	}

	pub fn to_x25519(&self) -> x25519_dalek::PublicKey {
		x25519_dalek::PublicKey::from(self.0)
	}
}

impl AsRef<[u8]> for XPubKey {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}

impl Writeable for XPubKey {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.0.to_vec())
	}
}

impl Readable for XPubKey {
	fn read<R: Reader>(reader: &mut R) -> Result<XPubKey, ser::Error> {
		let bytes = reader.read_fixed_bytes(32)?;
		let mut key = [0u8; 32];
		key.copy_from_slice(&bytes);
		Ok(XPubKey(key))
	}
}

/// The decrypted layer belonging to a single hop: where to send the onion
/// next and this node's blinding material, plus the final output on the
/// terminal layer only.
#[derive(Clone, Debug, PartialEq)]
pub struct Payload {
	pub next_pubkey: XPubKey,
	pub kernel_blind: SecretKey,
	pub stealth_blind: SecretKey,
	pub fee: u64,
	pub output: Option<Output>,
}

impl Payload {
	#[allow(dead_code)]
	pub fn serialize(&self) -> Result<Vec<u8>, ser::Error> {
		let mut vec = vec![];
		ser::serialize_default(&mut vec, &self)?;
		Ok(vec)
	}

	pub fn deserialize(bytes: &Vec<u8>) -> Result<Payload, ser::Error> {
		let payload: Payload = ser::deserialize_default(&mut &bytes[..])?;
		Ok(payload)
	}

	/// The public key of the stealth blinding factor.
	pub fn stealth_pubkey(&self) -> Result<PublicKey, secp256k1zkp::Error> {
		secp::to_pubkey(&self.stealth_blind)
	}
}

impl Writeable for Payload {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u8(ONION_VERSION)?;
		self.next_pubkey.write(writer)?;
		writer.write_fixed_bytes(&self.kernel_blind)?;
		writer.write_fixed_bytes(&self.stealth_blind)?;
		writer.write_u64(self.fee)?;
		match &self.output {
			Some(output) => {
				writer.write_u8(1)?;
				output.write(writer)?;
			}
			None => writer.write_u8(0)?,
		};
		Ok(())
	}
}

impl Readable for Payload {
	fn read<R: Reader>(reader: &mut R) -> Result<Payload, ser::Error> {
		let version = reader.read_u8()?;
		if version != ONION_VERSION {
			return Err(ser::Error::UnsupportedProtocolVersion);
		}

		let next_pubkey = XPubKey::read(reader)?;
		let kernel_blind = secp::read_secret_key(reader)?;
		let stealth_blind = secp::read_secret_key(reader)?;
		let fee = reader.read_u64()?;
		let output = if reader.read_u8()? == 0 {
			None
		} else {
			Some(Output::read(reader)?)
		};

		Ok(Payload {
			next_pubkey,
			kernel_blind,
			stealth_blind,
			fee,
			output,
		})
	}
}

/// Per-round bookkeeping for one onion: the onion as received at this node
/// and the stealth public keys accumulated across the layers peeled so far.
#[derive(Clone, Debug, PartialEq)]
pub struct OnionEntry {
	pub onion: Onion,
	pub stealth_sum: PublicKey,
}

impl Writeable for OnionEntry {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.onion.write(writer)?;
		self.stealth_sum.write(writer)?;
		Ok(())
	}
}

impl Readable for OnionEntry {
	fn read<R: Reader>(reader: &mut R) -> Result<OnionEntry, ser::Error> {
		Ok(OnionEntry {
			onion: Onion::read(reader)?,
			stealth_sum: PublicKey::read(reader)?,
		})
	}
}
