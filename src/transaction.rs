//! Transaction types.
//!
//! An [`UnsignedTransaction`] is one of a closed set of ledger operations.
//! Submitters fill in `block_id` and `price`, then mine `graffiti` until the
//! unsigned bytes meet the current difficulty, and finally sign. A signed
//! [`Transaction`] is immutable: its id, signing digest and difficulty are
//! derived once, when it is built or decoded.

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;
use crate::genesis::Genesis;
use crate::pow;
use crate::types::{sha256, CryptoError, Hash, PublicKey, TransactionSignature};

/// Fields shared by every operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseTx {
    pub sender: PublicKey,
    /// Recent block the transaction was mined against
    pub block_id: Hash,
    /// Price paid per fee unit
    pub price: u64,
    /// Free-form nonce searched during mining
    pub graffiti: u64,
}

impl BaseTx {
    pub fn new(sender: PublicKey, block_id: Hash, price: u64) -> Self {
        BaseTx { sender, block_id, price, graffiti: 0 }
    }
}

/// Take ownership of an absent or expired namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTx {
    pub base: BaseTx,
    pub namespace: String,
}

/// Write a value under an owned namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTx {
    pub base: BaseTx,
    pub namespace: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Remove a value from an owned namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTx {
    pub base: BaseTx,
    pub namespace: String,
    pub key: Vec<u8>,
}

/// Hand an owned namespace to a new owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveTx {
    pub base: BaseTx,
    pub namespace: String,
    pub new_owner: PublicKey,
}

/// Move balance between keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTx {
    pub base: BaseTx,
    pub recipient: PublicKey,
    pub units: u64,
}

/// Extend the expiry of any live namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifelineTx {
    pub base: BaseTx,
    pub namespace: String,
    pub units: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnsignedTransaction {
    Claim(ClaimTx),
    Set(SetTx),
    Delete(DeleteTx),
    Move(MoveTx),
    Transfer(TransferTx),
    Lifeline(LifelineTx),
}

impl UnsignedTransaction {
    pub fn base(&self) -> &BaseTx {
        match self {
            UnsignedTransaction::Claim(tx) => &tx.base,
            UnsignedTransaction::Set(tx) => &tx.base,
            UnsignedTransaction::Delete(tx) => &tx.base,
            UnsignedTransaction::Move(tx) => &tx.base,
            UnsignedTransaction::Transfer(tx) => &tx.base,
            UnsignedTransaction::Lifeline(tx) => &tx.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BaseTx {
        match self {
            UnsignedTransaction::Claim(tx) => &mut tx.base,
            UnsignedTransaction::Set(tx) => &mut tx.base,
            UnsignedTransaction::Delete(tx) => &mut tx.base,
            UnsignedTransaction::Move(tx) => &mut tx.base,
            UnsignedTransaction::Transfer(tx) => &mut tx.base,
            UnsignedTransaction::Lifeline(tx) => &mut tx.base,
        }
    }

    pub fn sender(&self) -> &PublicKey {
        &self.base().sender
    }

    /// Namespace the operation touches, if any.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            UnsignedTransaction::Claim(tx) => Some(&tx.namespace),
            UnsignedTransaction::Set(tx) => Some(&tx.namespace),
            UnsignedTransaction::Delete(tx) => Some(&tx.namespace),
            UnsignedTransaction::Move(tx) => Some(&tx.namespace),
            UnsignedTransaction::Lifeline(tx) => Some(&tx.namespace),
            UnsignedTransaction::Transfer(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UnsignedTransaction::Claim(_) => "claim",
            UnsignedTransaction::Set(_) => "set",
            UnsignedTransaction::Delete(_) => "delete",
            UnsignedTransaction::Move(_) => "move",
            UnsignedTransaction::Transfer(_) => "transfer",
            UnsignedTransaction::Lifeline(_) => "lifeline",
        }
    }

    /// Fee units charged at `price` each when the transaction executes.
    pub fn fee_units(&self, genesis: &Genesis) -> u64 {
        let extra = match self {
            UnsignedTransaction::Claim(_) => genesis.claim_fee_units,
            UnsignedTransaction::Set(tx) => genesis.value_units(tx.value.len()),
            UnsignedTransaction::Lifeline(tx) => tx.units,
            UnsignedTransaction::Delete(_)
            | UnsignedTransaction::Move(_)
            | UnsignedTransaction::Transfer(_) => 0,
        };
        genesis.base_tx_units.saturating_add(extra)
    }

    pub fn fee(&self, genesis: &Genesis) -> u64 {
        self.base().price.saturating_mul(self.fee_units(genesis))
    }

    pub fn bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(self)?)
    }

    /// Digest the signature covers.
    pub fn digest(&self) -> Result<Hash, CodecError> {
        Ok(sha256(&self.bytes()?))
    }

    /// Proof-of-work score of the current field values. Recomputed on every
    /// call, so it tracks graffiti changes made while mining.
    pub fn difficulty(&self) -> Result<u64, CodecError> {
        Ok(pow::difficulty(&self.bytes()?))
    }

    pub fn sign(self, key: &SigningKey) -> Result<Transaction, CodecError> {
        let digest = self.digest()?;
        let signature = TransactionSignature::sign(key, &digest);
        Transaction::from_parts(self, signature, digest)
    }
}

/// The serialized form of a [`Transaction`].
#[derive(Deserialize)]
struct RawTransaction {
    unsigned: UnsignedTransaction,
    signature: TransactionSignature,
}

impl TryFrom<RawTransaction> for Transaction {
    type Error = CodecError;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        Transaction::new(raw.unsigned, raw.signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTransaction")]
pub struct Transaction {
    unsigned: UnsignedTransaction,
    signature: TransactionSignature,
    #[serde(skip_serializing)]
    id: Hash,
    #[serde(skip_serializing)]
    digest: Hash,
    #[serde(skip_serializing)]
    difficulty: u64,
}

impl Transaction {
    pub fn new(
        unsigned: UnsignedTransaction,
        signature: TransactionSignature,
    ) -> Result<Self, CodecError> {
        let digest = unsigned.digest()?;
        Self::from_parts(unsigned, signature, digest)
    }

    fn from_parts(
        unsigned: UnsignedTransaction,
        signature: TransactionSignature,
        digest: Hash,
    ) -> Result<Self, CodecError> {
        let id = sha256(&bincode::serialize(&(&unsigned, &signature))?);
        Ok(Transaction {
            difficulty: pow::leading_zero_bits(&digest),
            unsigned,
            signature,
            id,
            digest,
        })
    }

    /// Hash of the full serialized transaction, signature included.
    pub fn id(&self) -> Hash {
        self.id
    }

    pub fn difficulty(&self) -> u64 {
        self.difficulty
    }

    pub fn digest(&self) -> &Hash {
        &self.digest
    }

    pub fn unsigned(&self) -> &UnsignedTransaction {
        &self.unsigned
    }

    pub fn signature(&self) -> &TransactionSignature {
        &self.signature
    }

    pub fn sender(&self) -> &PublicKey {
        self.unsigned.sender()
    }

    pub fn block_id(&self) -> &Hash {
        &self.unsigned.base().block_id
    }

    pub fn verify_signature(&self) -> Result<(), CryptoError> {
        self.signature.verify(self.unsigned.sender(), &self.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{claim, public_key, signing_key};

    #[test]
    fn test_sign_and_verify() {
        let key = signing_key();
        let tx = claim(&key, "foo", [1u8; 32]).sign(&key).unwrap();
        tx.verify_signature().unwrap();
        assert_eq!(tx.sender(), &public_key(&key));
        assert_eq!(tx.block_id(), &[1u8; 32]);
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let owner = signing_key();
        let forger = signing_key();
        let tx = claim(&owner, "foo", [1u8; 32]).sign(&forger).unwrap();
        assert!(tx.verify_signature().is_err());
    }

    #[test]
    fn test_decode_recomputes_derived_fields() {
        let key = signing_key();
        let tx = claim(&key, "foo", [1u8; 32]).sign(&key).unwrap();
        let bytes = bincode::serialize(&tx).unwrap();
        let decoded: Transaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.id(), tx.id());
        assert_eq!(decoded.difficulty(), tx.unsigned().difficulty().unwrap());
    }

    #[test]
    fn test_difficulty_tracks_graffiti() {
        let key = signing_key();
        let mut unsigned = claim(&key, "foo", [1u8; 32]);
        let before = unsigned.bytes().unwrap();
        unsigned.base_mut().graffiti += 1;
        assert_ne!(before, unsigned.bytes().unwrap());
        let tx = unsigned.clone().sign(&key).unwrap();
        assert_eq!(tx.difficulty(), unsigned.difficulty().unwrap());
    }

    #[test]
    fn test_id_covers_signature() {
        let key = signing_key();
        let unsigned = claim(&key, "foo", [1u8; 32]);
        let signed = unsigned.clone().sign(&key).unwrap();
        let forged =
            Transaction::new(unsigned, TransactionSignature::from_bytes(&[0u8; 64])).unwrap();
        assert_ne!(signed.id(), forged.id());
        assert_eq!(signed.difficulty(), forged.difficulty());
    }

    #[test]
    fn test_fee_units() {
        let genesis = Genesis::default();
        let key = signing_key();
        let base = BaseTx::new(public_key(&key), [1u8; 32], 3);

        let claim =
            UnsignedTransaction::Claim(ClaimTx { base: base.clone(), namespace: "foo".into() });
        assert_eq!(claim.fee_units(&genesis), genesis.base_tx_units + genesis.claim_fee_units);
        assert_eq!(claim.fee(&genesis), 3 * claim.fee_units(&genesis));

        let set = UnsignedTransaction::Set(SetTx {
            base: base.clone(),
            namespace: "foo".into(),
            key: b"k".to_vec(),
            value: vec![0u8; genesis.value_unit_size as usize * 2],
        });
        assert_eq!(set.fee_units(&genesis), genesis.base_tx_units + 3);

        let lifeline =
            UnsignedTransaction::Lifeline(LifelineTx { base, namespace: "foo".into(), units: 4 });
        assert_eq!(lifeline.fee_units(&genesis), genesis.base_tx_units + 4);
        assert_eq!(lifeline.kind(), "lifeline");
    }
}
