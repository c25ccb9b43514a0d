//! Durable key-value storage and the key layout of the ledger.
//!
//! All ledger data lives in one keyspace. Every key starts with a one-byte
//! table tag followed by `/`, so each logical table is a contiguous prefix
//! range and one [`sled::Batch`] can commit writes to all of them atomically.

use std::collections::BTreeMap;
use std::path::Path;

use sled::Db;
use thiserror::Error;

use crate::codec::CodecError;
use crate::types::{Hash, PublicKey};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),
    #[error("Data not found")]
    NotFound,
    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Pending writes keyed by full storage key. `None` marks a deletion.
pub type Changes = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

pub trait ReadState {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn has(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    /// Every live key starting with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StorageError>;
}

pub trait WriteState: ReadState {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>);
    fn delete(&mut self, key: Vec<u8>);
}

/// Durable store the engine commits accepted blocks into.
pub trait Database: ReadState + Send + Sync {
    /// Apply `changes` atomically: either every write lands or none does.
    fn commit(&self, changes: &Changes) -> Result<(), StorageError>;

    /// Persist buffered writes to disk.
    fn flush(&self) -> Result<(), StorageError>;
}

pub struct SledStorage {
    db: Db,
}

impl SledStorage {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self { db: sled::open(path)? })
    }

    /// A store that lives only as long as this handle.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl ReadState for SledStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn has(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.db.contains_key(key)?)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StorageError> {
        let mut out = BTreeMap::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, value) = item?;
            out.insert(key.to_vec(), value.to_vec());
        }
        Ok(out)
    }
}

impl Database for SledStorage {
    fn commit(&self, changes: &Changes) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        for (key, value) in changes {
            match value {
                Some(value) => batch.insert(key.as_slice(), value.as_slice()),
                None => batch.remove(key.as_slice()),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Key layout.
pub mod keys {
    use super::*;

    const INFO: u8 = 0x00;
    const VALUE: u8 = 0x01;
    const TX: u8 = 0x02;
    const BLOCK: u8 = 0x03;
    const BALANCE: u8 = 0x04;
    const META: u8 = 0x05;

    /// Separator between key segments. Namespaces may not contain it.
    pub const DELIMITER: u8 = b'/';

    fn prefixed(tag: u8, len: usize) -> Vec<u8> {
        let mut key = Vec::with_capacity(2 + len);
        key.push(tag);
        key.push(DELIMITER);
        key
    }

    pub fn namespace_info(namespace: &str) -> Vec<u8> {
        let mut key = prefixed(INFO, namespace.len());
        key.extend_from_slice(namespace.as_bytes());
        key
    }

    /// Prefix shared by every value stored under `namespace`.
    pub fn value_prefix(namespace: &str) -> Vec<u8> {
        let mut key = prefixed(VALUE, namespace.len() + 1);
        key.extend_from_slice(namespace.as_bytes());
        key.push(DELIMITER);
        key
    }

    pub fn value(namespace: &str, k: &[u8]) -> Vec<u8> {
        let mut key = value_prefix(namespace);
        key.extend_from_slice(k);
        key
    }

    pub fn transaction(id: &Hash) -> Vec<u8> {
        let mut key = prefixed(TX, id.len());
        key.extend_from_slice(id);
        key
    }

    pub fn block(id: &Hash) -> Vec<u8> {
        let mut key = prefixed(BLOCK, id.len());
        key.extend_from_slice(id);
        key
    }

    pub fn balance(owner: &PublicKey) -> Vec<u8> {
        let mut key = prefixed(BALANCE, 32);
        key.extend_from_slice(owner.as_bytes());
        key
    }

    fn meta(name: &[u8]) -> Vec<u8> {
        let mut key = prefixed(META, name.len());
        key.extend_from_slice(name);
        key
    }

    pub fn last_accepted() -> Vec<u8> {
        meta(b"last_accepted")
    }

    pub fn initialized() -> Vec<u8> {
        meta(b"initialized")
    }

    pub fn genesis() -> Vec<u8> {
        meta(b"genesis")
    }
}
