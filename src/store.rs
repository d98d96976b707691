use crate::onion::Onion;
use crate::secp::Commitment;

use grin_core::ser::{self, ProtocolVersion};
use grin_store::{self as store, Store};
use thiserror::Error;

const DB_NAME: &str = "coinswap";
const STORE_SUBPATH: &str = "onions";

const ONION_PREFIX: u8 = b'O';

/// Store error types
#[derive(Clone, Error, Debug, PartialEq)]
pub enum StoreError {
	#[error("Error occurred while attempting to open db: {0}")]
	OpenError(store::lmdb::Error),
	#[error("Serialization error occurred: {0}")]
	SerializationError(ser::Error),
	#[error("Error occurred while attempting to read from db: {0}")]
	ReadError(store::lmdb::Error),
	#[error("Error occurred while attempting to write to db: {0}")]
	WriteError(store::lmdb::Error),
	#[error("Onion for commitment {0:?} is already stored")]
	AlreadyExists(Commitment),
	#[error("Onion has no input to key by")]
	MissingInput,
}

impl From<ser::Error> for StoreError {
	fn from(e: ser::Error) -> StoreError {
		StoreError::SerializationError(e)
	}
}

/// Persistence for submitted onions, keyed by their input commitment, so a
/// crash between submission and the next round loses nothing.
pub struct SwapStore {
	db: Store,
}

impl SwapStore {
	/// Create new onion store
	pub fn new(db_root: &str) -> Result<SwapStore, StoreError> {
		let db = Store::new(db_root, Some(DB_NAME), Some(STORE_SUBPATH), None)
			.map_err(StoreError::OpenError)?;
		Ok(SwapStore { db })
	}

	fn onion_key(onion: &Onion) -> Result<Vec<u8>, StoreError> {
		let input = onion.input.as_ref().ok_or(StoreError::MissingInput)?;
		Ok(store::to_key(ONION_PREFIX, &input.commit.0.to_vec()))
	}

	/// Saves a submitted onion, refusing to overwrite a pending one for the
	/// same input commitment.
	pub fn save_onion(&self, onion: &Onion) -> Result<(), StoreError> {
		let key = SwapStore::onion_key(onion)?;
		let exists = self.db.exists(&key).map_err(StoreError::ReadError)?;
		if exists {
			let input = onion.input.as_ref().ok_or(StoreError::MissingInput)?;
			return Err(StoreError::AlreadyExists(input.commit.clone()));
		}

		let data = ser::ser_vec(onion, ProtocolVersion::local())?;
		let batch = self.db.batch().map_err(StoreError::WriteError)?;
		batch.put(&key, &data).map_err(StoreError::WriteError)?;
		batch.commit().map_err(StoreError::WriteError)
	}

	/// Whether an onion is pending for the given input commitment
	#[allow(dead_code)]
	pub fn onion_exists(&self, commit: &Commitment) -> Result<bool, StoreError> {
		self.db
			.exists(&store::to_key(ONION_PREFIX, &commit.0.to_vec()))
			.map_err(StoreError::ReadError)
	}

	/// Iterates over all stored onions
	pub fn onions_iter(&self) -> Result<impl Iterator<Item = Onion>, StoreError> {
		self.db
			.iter(&[ONION_PREFIX], |_, mut data| {
				ser::deserialize_default(&mut data).map_err(From::from)
			})
			.map_err(StoreError::ReadError)
	}

	/// Deletes the stored onion for the given input commitment, if any
	pub fn delete_onion(&self, onion: &Onion) -> Result<(), StoreError> {
		let key = SwapStore::onion_key(onion)?;
		let batch = self.db.batch().map_err(StoreError::WriteError)?;
		batch.delete(&key).map_err(StoreError::WriteError)?;
		batch.commit().map_err(StoreError::WriteError)
	}

	/// Removes every stored onion, called once a round finalizes
	pub fn clear_all(&self) -> Result<(), StoreError> {
		let keys: Vec<Vec<u8>> = self
			.db
			.iter(&[ONION_PREFIX], |key, _| Ok(key.to_vec()))
			.map_err(StoreError::ReadError)?
			.collect();

		let batch = self.db.batch().map_err(StoreError::WriteError)?;
		for key in keys {
			batch.delete(&key).map_err(StoreError::WriteError)?;
		}
		batch.commit().map_err(StoreError::WriteError)
	}
}
