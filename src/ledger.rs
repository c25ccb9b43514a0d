//! Namespace ledger and transaction execution.
//!
//! Execution is a pure function of the transaction, the state it runs
//! against, the block timestamp and the genesis constants. Callers run each
//! transaction against a scratch [`VersionDb`](crate::overlay::VersionDb) so a
//! failed transaction leaves no trace.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::CodecError;
use crate::genesis::Genesis;
use crate::storage::{keys, ReadState, StorageError, WriteState};
use crate::transaction::{
    ClaimTx, DeleteTx, LifelineTx, MoveTx, SetTx, TransferTx, UnsignedTransaction,
};
use crate::types::{parse_hex32, Hash, PublicKey, EMPTY_HASH};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Namespace is empty")]
    NamespaceEmpty,
    #[error("Namespace is {0} bytes, over the limit")]
    NamespaceTooBig(usize),
    #[error("Namespace contains a path delimiter: {0}")]
    InvalidNamespace(String),
    #[error("Transaction does not reference a block")]
    InvalidBlockId,
    #[error("Price {price} below minimum {minimum}")]
    InvalidPrice { price: u64, minimum: u64 },
    #[error("Namespace not found: {0}")]
    NamespaceMissing(String),
    #[error("Namespace expired: {0}")]
    NamespaceExpired(String),
    #[error("Namespace still owned: {0}")]
    PrefixNotExpired(String),
    #[error("Sender does not own namespace {0}")]
    Unauthorized(String),
    #[error("Key is empty")]
    KeyEmpty,
    #[error("Key not found")]
    KeyMissing,
    #[error("Key is {0} bytes, over the limit")]
    KeyTooBig(usize),
    #[error("Value is empty")]
    ValueEmpty,
    #[error("Value is {0} bytes, over the limit")]
    ValueTooBig(usize),
    #[error("Operation has no effect")]
    NonActionable,
    #[error("Insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: u64, available: u64 },
    #[error("Units must be non-zero")]
    InvalidUnits,
    #[error("Namespace is reserved for a different public key")]
    PublicKeyMismatch,
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<bincode::Error> for ExecutionError {
    fn from(e: bincode::Error) -> Self {
        ExecutionError::Storage(StorageError::SerializationError(e))
    }
}

/// Ownership and rent state of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRecord {
    pub owner: PublicKey,
    pub created_at: u64,
    pub last_updated: u64,
    /// Time at which the namespace reverts to unowned
    pub expiry: u64,
    /// Decay rate: grows with the amount of data stored
    pub units: u64,
}

impl NamespaceRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry < now
    }

    /// Re-spread the remaining paid time over `new_units`.
    fn rebalance(&mut self, new_units: u64, now: u64) {
        let paid =
            self.expiry.saturating_sub(self.last_updated) as u128 * self.units.max(1) as u128;
        let remaining = paid / new_units.max(1) as u128;
        self.units = new_units.max(1);
        self.last_updated = now;
        self.expiry = now.saturating_add(remaining.min(u64::MAX as u128) as u64);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRecord {
    /// Transaction that last wrote the value
    pub tx_id: Hash,
    pub updated: u64,
    pub size: u64,
    pub value: Vec<u8>,
}

/// Per-transaction execution inputs.
pub struct TxContext<'a> {
    pub genesis: &'a Genesis,
    pub block_time: u64,
    pub tx_id: Hash,
}

pub fn get_namespace<S: ReadState + ?Sized>(
    state: &S,
    namespace: &str,
) -> Result<Option<NamespaceRecord>, StorageError> {
    state
        .get(&keys::namespace_info(namespace))?
        .map(|bytes| bincode::deserialize(&bytes))
        .transpose()
        .map_err(Into::into)
}

/// Like [`get_namespace`], but an expired record reads as absent.
pub fn get_live_namespace<S: ReadState + ?Sized>(
    state: &S,
    namespace: &str,
    now: u64,
) -> Result<Option<NamespaceRecord>, StorageError> {
    Ok(get_namespace(state, namespace)?.filter(|record| !record.is_expired(now)))
}

pub fn put_namespace<S: WriteState + ?Sized>(
    state: &mut S,
    namespace: &str,
    record: &NamespaceRecord,
) -> Result<(), StorageError> {
    state.put(keys::namespace_info(namespace), bincode::serialize(record)?);
    Ok(())
}

pub fn get_value<S: ReadState + ?Sized>(
    state: &S,
    namespace: &str,
    key: &[u8],
) -> Result<Option<ValueRecord>, StorageError> {
    state
        .get(&keys::value(namespace, key))?
        .map(|bytes| bincode::deserialize(&bytes))
        .transpose()
        .map_err(Into::into)
}

/// Every value under `namespace`, in key order.
pub fn get_values<S: ReadState + ?Sized>(
    state: &S,
    namespace: &str,
) -> Result<Vec<(Vec<u8>, ValueRecord)>, StorageError> {
    let prefix = keys::value_prefix(namespace);
    state
        .scan_prefix(&prefix)?
        .into_iter()
        .map(|(key, bytes)| -> Result<_, StorageError> {
            Ok((key[prefix.len()..].to_vec(), bincode::deserialize(&bytes)?))
        })
        .collect()
}

fn delete_all_values<S: WriteState + ?Sized>(
    state: &mut S,
    namespace: &str,
) -> Result<usize, StorageError> {
    let doomed: Vec<Vec<u8>> =
        state.scan_prefix(&keys::value_prefix(namespace))?.into_keys().collect();
    let count = doomed.len();
    for key in doomed {
        state.delete(key);
    }
    Ok(count)
}

pub fn get_balance<S: ReadState + ?Sized>(
    state: &S,
    owner: &PublicKey,
) -> Result<u64, StorageError> {
    match state.get(&keys::balance(owner))? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Ok(0),
    }
}

pub fn set_balance<S: WriteState + ?Sized>(
    state: &mut S,
    owner: &PublicKey,
    balance: u64,
) -> Result<(), StorageError> {
    state.put(keys::balance(owner), bincode::serialize(&balance)?);
    Ok(())
}

pub fn has_transaction<S: ReadState + ?Sized>(state: &S, id: &Hash) -> Result<bool, StorageError> {
    state.has(&keys::transaction(id))
}

/// Record that transaction `id` was included in block `block_id`.
pub fn put_transaction<S: WriteState + ?Sized>(state: &mut S, id: &Hash, block_id: &Hash) {
    state.put(keys::transaction(id), block_id.to_vec());
}

pub fn validate_namespace(namespace: &str, genesis: &Genesis) -> Result<(), ExecutionError> {
    if namespace.is_empty() {
        return Err(ExecutionError::NamespaceEmpty);
    }
    if namespace.len() as u64 > genesis.max_namespace_size {
        return Err(ExecutionError::NamespaceTooBig(namespace.len()));
    }
    if namespace.as_bytes().contains(&keys::DELIMITER) {
        return Err(ExecutionError::InvalidNamespace(namespace.to_string()));
    }
    Ok(())
}

/// Shape checks shared by every variant. Failures mean the transaction is
/// malformed and will never become valid.
pub fn validate_base(tx: &UnsignedTransaction, genesis: &Genesis) -> Result<(), ExecutionError> {
    let base = tx.base();
    if base.block_id == EMPTY_HASH {
        return Err(ExecutionError::InvalidBlockId);
    }
    if base.price < genesis.min_price {
        return Err(ExecutionError::InvalidPrice { price: base.price, minimum: genesis.min_price });
    }
    if let Some(namespace) = tx.namespace() {
        validate_namespace(namespace, genesis)?;
    }
    Ok(())
}

fn validate_key(key: &[u8], genesis: &Genesis) -> Result<(), ExecutionError> {
    if key.is_empty() {
        return Err(ExecutionError::KeyEmpty);
    }
    if key.len() as u64 > genesis.max_key_size {
        return Err(ExecutionError::KeyTooBig(key.len()));
    }
    Ok(())
}

fn charge_fee<S: WriteState + ?Sized>(
    state: &mut S,
    payer: &PublicKey,
    fee: u64,
) -> Result<(), ExecutionError> {
    let available = get_balance(state, payer)?;
    if available < fee {
        return Err(ExecutionError::InsufficientBalance { required: fee, available });
    }
    set_balance(state, payer, available - fee)?;
    Ok(())
}

/// The live record for `namespace`, provided `sender` owns it.
fn owned_namespace<S: ReadState + ?Sized>(
    state: &S,
    namespace: &str,
    sender: &PublicKey,
    now: u64,
) -> Result<NamespaceRecord, ExecutionError> {
    let record = get_namespace(state, namespace)?
        .ok_or_else(|| ExecutionError::NamespaceMissing(namespace.to_string()))?;
    if record.is_expired(now) {
        return Err(ExecutionError::NamespaceExpired(namespace.to_string()));
    }
    if &record.owner != sender {
        return Err(ExecutionError::Unauthorized(namespace.to_string()));
    }
    Ok(record)
}

/// Apply `tx` to `state`. On error `state` may hold partial writes and must
/// be discarded.
pub fn execute<S: WriteState + ?Sized>(
    tx: &UnsignedTransaction,
    state: &mut S,
    ctx: &TxContext<'_>,
) -> Result<(), ExecutionError> {
    validate_base(tx, ctx.genesis)?;
    let fee = tx.fee(ctx.genesis);
    match tx {
        UnsignedTransaction::Claim(claim) => execute_claim(claim, fee, state, ctx),
        UnsignedTransaction::Set(set) => execute_set(set, fee, state, ctx),
        UnsignedTransaction::Delete(delete) => execute_delete(delete, fee, state, ctx),
        UnsignedTransaction::Move(mv) => execute_move(mv, fee, state, ctx),
        UnsignedTransaction::Transfer(transfer) => execute_transfer(transfer, fee, state),
        UnsignedTransaction::Lifeline(lifeline) => execute_lifeline(lifeline, fee, state, ctx),
    }
}

fn execute_claim<S: WriteState + ?Sized>(
    tx: &ClaimTx,
    fee: u64,
    state: &mut S,
    ctx: &TxContext<'_>,
) -> Result<(), ExecutionError> {
    let sender = &tx.base.sender;
    // A namespace spelled like a public key belongs to that key.
    if let Some(reserved) = parse_hex32(&tx.namespace) {
        if &reserved != sender.as_bytes() {
            return Err(ExecutionError::PublicKeyMismatch);
        }
    }

    match get_namespace(state, &tx.namespace)? {
        Some(existing) if !existing.is_expired(ctx.block_time) => {
            return Err(ExecutionError::PrefixNotExpired(tx.namespace.clone()));
        }
        Some(_) => {
            let wiped = delete_all_values(state, &tx.namespace)?;
            tracing::debug!(namespace = %tx.namespace, wiped, "reclaiming expired namespace");
        }
        None => {}
    }

    charge_fee(state, sender, fee)?;
    let record = NamespaceRecord {
        owner: *sender,
        created_at: ctx.block_time,
        last_updated: ctx.block_time,
        expiry: ctx.block_time.saturating_add(ctx.genesis.claim_reward),
        units: 1,
    };
    put_namespace(state, &tx.namespace, &record)?;
    Ok(())
}

fn execute_set<S: WriteState + ?Sized>(
    tx: &SetTx,
    fee: u64,
    state: &mut S,
    ctx: &TxContext<'_>,
) -> Result<(), ExecutionError> {
    validate_key(&tx.key, ctx.genesis)?;
    if tx.value.is_empty() {
        return Err(ExecutionError::ValueEmpty);
    }
    if tx.value.len() as u64 > ctx.genesis.max_value_size {
        return Err(ExecutionError::ValueTooBig(tx.value.len()));
    }

    let mut record = owned_namespace(state, &tx.namespace, &tx.base.sender, ctx.block_time)?;
    charge_fee(state, &tx.base.sender, fee)?;

    let mut units = record.units;
    if let Some(previous) = get_value(state, &tx.namespace, &tx.key)? {
        units = units.saturating_sub(ctx.genesis.value_units(previous.value.len()));
    }
    units = units.saturating_add(ctx.genesis.value_units(tx.value.len()));
    record.rebalance(units, ctx.block_time);

    let value = ValueRecord {
        tx_id: ctx.tx_id,
        updated: ctx.block_time,
        size: tx.value.len() as u64,
        value: tx.value.clone(),
    };
    state.put(keys::value(&tx.namespace, &tx.key), bincode::serialize(&value)?);
    put_namespace(state, &tx.namespace, &record)?;
    Ok(())
}

fn execute_delete<S: WriteState + ?Sized>(
    tx: &DeleteTx,
    fee: u64,
    state: &mut S,
    ctx: &TxContext<'_>,
) -> Result<(), ExecutionError> {
    validate_key(&tx.key, ctx.genesis)?;
    let mut record = owned_namespace(state, &tx.namespace, &tx.base.sender, ctx.block_time)?;
    let previous = get_value(state, &tx.namespace, &tx.key)?.ok_or(ExecutionError::KeyMissing)?;
    charge_fee(state, &tx.base.sender, fee)?;

    let units = record
        .units
        .saturating_sub(ctx.genesis.value_units(previous.value.len()));
    record.rebalance(units, ctx.block_time);

    state.delete(keys::value(&tx.namespace, &tx.key));
    put_namespace(state, &tx.namespace, &record)?;
    Ok(())
}

fn execute_move<S: WriteState + ?Sized>(
    tx: &MoveTx,
    fee: u64,
    state: &mut S,
    ctx: &TxContext<'_>,
) -> Result<(), ExecutionError> {
    if tx.new_owner == tx.base.sender {
        return Err(ExecutionError::NonActionable);
    }
    let mut record = owned_namespace(state, &tx.namespace, &tx.base.sender, ctx.block_time)?;
    charge_fee(state, &tx.base.sender, fee)?;

    record.owner = tx.new_owner;
    put_namespace(state, &tx.namespace, &record)?;
    Ok(())
}

fn execute_transfer<S: WriteState + ?Sized>(
    tx: &TransferTx,
    fee: u64,
    state: &mut S,
) -> Result<(), ExecutionError> {
    let sender = &tx.base.sender;
    if &tx.recipient == sender {
        return Err(ExecutionError::NonActionable);
    }
    if tx.units == 0 {
        return Err(ExecutionError::InvalidUnits);
    }

    let available = get_balance(state, sender)?;
    let required = tx.units.saturating_add(fee);
    if available < required {
        return Err(ExecutionError::InsufficientBalance { required, available });
    }
    set_balance(state, sender, available - required)?;

    let recipient_balance = get_balance(state, &tx.recipient)?;
    set_balance(state, &tx.recipient, recipient_balance.saturating_add(tx.units))?;
    Ok(())
}

fn execute_lifeline<S: WriteState + ?Sized>(
    tx: &LifelineTx,
    fee: u64,
    state: &mut S,
    ctx: &TxContext<'_>,
) -> Result<(), ExecutionError> {
    if tx.units == 0 {
        return Err(ExecutionError::InvalidUnits);
    }
    let mut record = get_namespace(state, &tx.namespace)?
        .ok_or_else(|| ExecutionError::NamespaceMissing(tx.namespace.clone()))?;
    if record.is_expired(ctx.block_time) {
        return Err(ExecutionError::NamespaceExpired(tx.namespace.clone()));
    }
    charge_fee(state, &tx.base.sender, fee)?;

    // Busier namespaces get less time per unit of funding.
    let extension = tx.units.saturating_mul(ctx.genesis.lifeline_unit_reward) / record.units.max(1);
    record.expiry = record.expiry.saturating_add(extension);
    put_namespace(state, &tx.namespace, &record)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{StackView, VersionDb};
    use crate::storage::{Database, SledStorage};
    use crate::test_utils::{base, claim, public_key, signing_key};

    const RICH: u64 = 1_000_000;

    struct Fixture {
        storage: SledStorage,
        genesis: Genesis,
    }

    impl Fixture {
        fn new(funded: &[&PublicKey]) -> Self {
            let storage = SledStorage::temporary().unwrap();
            let mut changes = crate::storage::Changes::new();
            for pk in funded {
                changes.insert(keys::balance(pk), Some(bincode::serialize(&RICH).unwrap()));
            }
            storage.commit(&changes).unwrap();
            Fixture { storage, genesis: Genesis::default() }
        }

        /// Execute against committed state and commit on success.
        fn run(&self, tx: &UnsignedTransaction, block_time: u64) -> Result<(), ExecutionError> {
            let view = StackView::durable(&self.storage);
            let mut vdb = VersionDb::new(&view);
            let ctx = TxContext { genesis: &self.genesis, block_time, tx_id: [9u8; 32] };
            execute(tx, &mut vdb, &ctx)?;
            let changes = vdb.into_changes();
            self.storage.commit(&changes).unwrap();
            Ok(())
        }

        fn namespace(&self, ns: &str) -> Option<NamespaceRecord> {
            get_namespace(&self.storage, ns).unwrap()
        }
    }

    fn set(key: &ed25519_dalek::SigningKey, ns: &str, k: &[u8], v: &[u8]) -> UnsignedTransaction {
        UnsignedTransaction::Set(SetTx {
            base: base(key),
            namespace: ns.into(),
            key: k.to_vec(),
            value: v.to_vec(),
        })
    }

    fn delete(key: &ed25519_dalek::SigningKey, ns: &str, k: &[u8]) -> UnsignedTransaction {
        UnsignedTransaction::Delete(DeleteTx {
            base: base(key),
            namespace: ns.into(),
            key: k.to_vec(),
        })
    }

    fn lifeline(key: &ed25519_dalek::SigningKey, ns: &str, units: u64) -> UnsignedTransaction {
        UnsignedTransaction::Lifeline(LifelineTx { base: base(key), namespace: ns.into(), units })
    }

    #[test]
    fn test_claim_lifecycle() {
        let k1 = signing_key();
        let k2 = signing_key();
        let fx = Fixture::new(&[&public_key(&k1), &public_key(&k2)]);
        let reward = fx.genesis.claim_reward;

        fx.run(&claim(&k1, "foo", [1u8; 32]), 1).unwrap();
        let record = fx.namespace("foo").unwrap();
        assert_eq!(record.owner, public_key(&k1));
        assert_eq!(record.expiry, 1 + reward);
        assert_eq!(record.units, 1);

        fx.run(&set(&k1, "foo", b"bar", b"v"), 1).unwrap();
        assert!(get_value(&fx.storage, "foo", b"bar").unwrap().is_some());

        let err = fx.run(&claim(&k2, "foo", [1u8; 32]), 2).unwrap_err();
        assert!(matches!(err, ExecutionError::PrefixNotExpired(_)));

        let expiry = fx.namespace("foo").unwrap().expiry;
        fx.run(&claim(&k2, "foo", [1u8; 32]), expiry + 1).unwrap();
        assert_eq!(fx.namespace("foo").unwrap().owner, public_key(&k2));
        assert!(get_values(&fx.storage, "foo").unwrap().is_empty());
    }

    #[test]
    fn test_set_without_claim() {
        let k1 = signing_key();
        let fx = Fixture::new(&[&public_key(&k1)]);
        let err = fx.run(&set(&k1, "foo", b"bar", b"v"), 1).unwrap_err();
        assert!(matches!(err, ExecutionError::NamespaceMissing(_)));
    }

    #[test]
    fn test_set_rules() {
        let owner = signing_key();
        let other = signing_key();
        let fx = Fixture::new(&[&public_key(&owner), &public_key(&other)]);
        fx.run(&claim(&owner, "foo", [1u8; 32]), 1).unwrap();

        assert!(matches!(
            fx.run(&set(&other, "foo", b"k", b"v"), 2),
            Err(ExecutionError::Unauthorized(_))
        ));
        assert!(matches!(
            fx.run(&set(&owner, "foo", b"k", b""), 2),
            Err(ExecutionError::ValueEmpty)
        ));
        assert!(matches!(fx.run(&set(&owner, "foo", b"", b"v"), 2), Err(ExecutionError::KeyEmpty)));

        let long_key = vec![b'k'; fx.genesis.max_key_size as usize + 1];
        assert!(matches!(
            fx.run(&set(&owner, "foo", &long_key, b"v"), 2),
            Err(ExecutionError::KeyTooBig(_))
        ));
        let big = vec![0u8; fx.genesis.max_value_size as usize + 1];
        assert!(matches!(
            fx.run(&set(&owner, "foo", b"k", &big), 2),
            Err(ExecutionError::ValueTooBig(_))
        ));

        let expiry = fx.namespace("foo").unwrap().expiry;
        assert!(matches!(
            fx.run(&set(&owner, "foo", b"k", b"v"), expiry + 1),
            Err(ExecutionError::NamespaceExpired(_))
        ));
    }

    #[test]
    fn test_set_and_delete_prorate_expiry() {
        let owner = signing_key();
        let fx = Fixture::new(&[&public_key(&owner)]);
        fx.run(&claim(&owner, "foo", [1u8; 32]), 100).unwrap();
        let reward = fx.genesis.claim_reward;

        fx.run(&set(&owner, "foo", b"a", b"v"), 100).unwrap();
        let record = fx.namespace("foo").unwrap();
        assert_eq!(record.units, 2);
        assert_eq!(record.expiry, 100 + reward / 2);

        // Overwriting with a same-sized value keeps the unit count.
        fx.run(&set(&owner, "foo", b"a", b"w"), 100).unwrap();
        assert_eq!(fx.namespace("foo").unwrap().units, 2);

        fx.run(&delete(&owner, "foo", b"a"), 100).unwrap();
        let record = fx.namespace("foo").unwrap();
        assert_eq!(record.units, 1);
        assert_eq!(record.expiry, 100 + reward / 2 * 2);
        assert!(get_value(&fx.storage, "foo", b"a").unwrap().is_none());

        assert!(matches!(
            fx.run(&delete(&owner, "foo", b"a"), 100),
            Err(ExecutionError::KeyMissing)
        ));
    }

    #[test]
    fn test_move() {
        let owner = signing_key();
        let heir = signing_key();
        let fx = Fixture::new(&[&public_key(&owner), &public_key(&heir)]);
        fx.run(&claim(&owner, "foo", [1u8; 32]), 1).unwrap();
        let before = fx.namespace("foo").unwrap();

        let to_self = UnsignedTransaction::Move(MoveTx {
            base: base(&owner),
            namespace: "foo".into(),
            new_owner: public_key(&owner),
        });
        assert!(matches!(fx.run(&to_self, 2), Err(ExecutionError::NonActionable)));

        let mv = UnsignedTransaction::Move(MoveTx {
            base: base(&owner),
            namespace: "foo".into(),
            new_owner: public_key(&heir),
        });
        fx.run(&mv, 2).unwrap();
        let after = fx.namespace("foo").unwrap();
        assert_eq!(after.owner, public_key(&heir));
        assert_eq!(after.expiry, before.expiry);
        assert_eq!(after.units, before.units);

        assert!(matches!(
            fx.run(&set(&owner, "foo", b"k", b"v"), 3),
            Err(ExecutionError::Unauthorized(_))
        ));
        fx.run(&set(&heir, "foo", b"k", b"v"), 3).unwrap();
    }

    #[test]
    fn test_transfer_insufficient_balance_leaves_no_trace() {
        let sender = signing_key();
        let recipient = signing_key();
        let fx = Fixture::new(&[&public_key(&sender)]);

        let transfer = UnsignedTransaction::Transfer(TransferTx {
            base: base(&sender),
            recipient: public_key(&recipient),
            units: RICH + 1,
        });
        let view = StackView::durable(&fx.storage);
        let mut scratch = VersionDb::new(&view);
        let ctx = TxContext { genesis: &fx.genesis, block_time: 1, tx_id: [9u8; 32] };
        let err = execute(&transfer, &mut scratch, &ctx).unwrap_err();
        assert!(matches!(err, ExecutionError::InsufficientBalance { .. }));
        drop(scratch);

        assert_eq!(get_balance(&fx.storage, &public_key(&sender)).unwrap(), RICH);
        assert_eq!(get_balance(&fx.storage, &public_key(&recipient)).unwrap(), 0);
    }

    #[test]
    fn test_transfer_moves_balance_and_charges_fee() {
        let sender = signing_key();
        let recipient = signing_key();
        let fx = Fixture::new(&[&public_key(&sender)]);

        let transfer = UnsignedTransaction::Transfer(TransferTx {
            base: base(&sender),
            recipient: public_key(&recipient),
            units: 500,
        });
        let fee = transfer.fee(&fx.genesis);
        fx.run(&transfer, 1).unwrap();
        assert_eq!(get_balance(&fx.storage, &public_key(&sender)).unwrap(), RICH - 500 - fee);
        assert_eq!(get_balance(&fx.storage, &public_key(&recipient)).unwrap(), 500);

        let to_self = UnsignedTransaction::Transfer(TransferTx {
            base: base(&sender),
            recipient: public_key(&sender),
            units: 1,
        });
        assert!(matches!(fx.run(&to_self, 1), Err(ExecutionError::NonActionable)));
    }

    #[test]
    fn test_lifeline_only_extends() {
        let owner = signing_key();
        let patron = signing_key();
        let fx = Fixture::new(&[&public_key(&owner), &public_key(&patron)]);
        fx.run(&claim(&owner, "foo", [1u8; 32]), 1).unwrap();
        fx.run(&set(&owner, "foo", b"a", b"v"), 1).unwrap();

        let before = fx.namespace("foo").unwrap();
        fx.run(&lifeline(&patron, "foo", 4), 2).unwrap();
        let after = fx.namespace("foo").unwrap();
        assert_eq!(after.owner, public_key(&owner));
        assert_eq!(
            after.expiry,
            before.expiry + 4 * fx.genesis.lifeline_unit_reward / before.units
        );
        assert!(after.expiry >= before.expiry);

        assert!(matches!(
            fx.run(&lifeline(&patron, "foo", 0), 2),
            Err(ExecutionError::InvalidUnits)
        ));
        assert!(matches!(
            fx.run(&lifeline(&patron, "nope", 1), 2),
            Err(ExecutionError::NamespaceMissing(_))
        ));
    }

    #[test]
    fn test_lifeline_expiry_monotonic() {
        let owner = signing_key();
        let fx = Fixture::new(&[&public_key(&owner)]);
        fx.run(&claim(&owner, "foo", [1u8; 32]), 1).unwrap();
        let mut last = fx.namespace("foo").unwrap().expiry;
        for units in [1, 3, 7, 50] {
            fx.run(&lifeline(&owner, "foo", units), 2).unwrap();
            let expiry = fx.namespace("foo").unwrap().expiry;
            assert!(expiry >= last);
            last = expiry;
        }
    }

    #[test]
    fn test_base_validation() {
        let key = signing_key();
        let fx = Fixture::new(&[&public_key(&key)]);

        assert!(matches!(
            fx.run(&claim(&key, "", [1u8; 32]), 1),
            Err(ExecutionError::NamespaceEmpty)
        ));
        assert!(matches!(
            fx.run(&claim(&key, "a/b", [1u8; 32]), 1),
            Err(ExecutionError::InvalidNamespace(_))
        ));
        let long = "n".repeat(fx.genesis.max_namespace_size as usize + 1);
        assert!(matches!(
            fx.run(&claim(&key, &long, [1u8; 32]), 1),
            Err(ExecutionError::NamespaceTooBig(_))
        ));
        assert!(matches!(
            fx.run(&claim(&key, "foo", [0u8; 32]), 1),
            Err(ExecutionError::InvalidBlockId)
        ));

        let mut cheap = claim(&key, "foo", [1u8; 32]);
        cheap.base_mut().price = 0;
        assert!(matches!(fx.run(&cheap, 1), Err(ExecutionError::InvalidPrice { .. })));
    }

    #[test]
    fn test_key_shaped_namespace_reserved() {
        let owner = signing_key();
        let squatter = signing_key();
        let fx = Fixture::new(&[&public_key(&owner), &public_key(&squatter)]);
        let reserved = public_key(&owner).to_hex();

        let err = fx.run(&claim(&squatter, &reserved, [1u8; 32]), 1).unwrap_err();
        assert!(matches!(err, ExecutionError::PublicKeyMismatch));
        fx.run(&claim(&owner, &reserved, [1u8; 32]), 1).unwrap();
    }

    #[test]
    fn test_unfunded_sender_cannot_claim() {
        let key = signing_key();
        let fx = Fixture::new(&[]);
        let err = fx.run(&claim(&key, "foo", [1u8; 32]), 1).unwrap_err();
        assert!(matches!(err, ExecutionError::InsufficientBalance { available: 0, .. }));
        assert!(fx.namespace("foo").is_none());
    }

    #[test]
    fn test_live_namespace_hides_expired() {
        let key = signing_key();
        let fx = Fixture::new(&[&public_key(&key)]);
        fx.run(&claim(&key, "foo", [1u8; 32]), 1).unwrap();
        let expiry = fx.namespace("foo").unwrap().expiry;
        assert!(get_live_namespace(&fx.storage, "foo", expiry).unwrap().is_some());
        assert!(get_live_namespace(&fx.storage, "foo", expiry + 1).unwrap().is_none());
    }
}
