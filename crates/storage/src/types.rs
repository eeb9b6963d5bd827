//! Value types shared by the trees and the mempool

use std::fmt;

use alloy_primitives::U256;
use commander_smt::{Hash, Keccak256Hasher, ZERO_LEAF};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    codec::{Reader, Writer},
    error::StorageError,
};

/// Unix time in seconds
pub type Timestamp = u64;

macro_rules! fixed_bytes {
    ($(#[$attr:meta])* $name:ident, $len:expr) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Encoded width in bytes
            pub const LEN: usize = $len;

            /// Raw bytes
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self([0u8; $len])
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{})", stringify!($name), hex::encode(self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let encoded = String::deserialize(deserializer)?;
                let digits = encoded.strip_prefix("0x").unwrap_or(&encoded);
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(digits, &mut bytes).map_err(serde::de::Error::custom)?;
                Ok(Self(bytes))
            }
        }
    };
}

fixed_bytes!(
    /// Uncompressed BLS public key
    PublicKey,
    128
);

fixed_bytes!(
    /// Opaque BLS signature
    Signature,
    64
);

/// Balance of one token owned by one public key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    /// Owner's account leaf
    pub pub_key_id: u32,
    /// Token held in this state
    pub token_id: U256,
    /// Token balance
    pub balance: U256,
    /// Number of transactions sent from this state
    pub nonce: U256,
}

impl UserState {
    /// `keccak(pub_key_id as uint256 ‖ token_id ‖ balance ‖ nonce)`
    pub fn hash(&self) -> Hash {
        let mut pub_key_id = [0u8; 32];
        pub_key_id[28..].copy_from_slice(&self.pub_key_id.to_be_bytes());
        Keccak256Hasher::hash_parts(&[
            pub_key_id.as_slice(),
            self.token_id.to_be_bytes::<32>().as_slice(),
            self.balance.to_be_bytes::<32>().as_slice(),
            self.nonce.to_be_bytes::<32>().as_slice(),
        ])
    }
}

/// Leaf of the state tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLeaf {
    /// Leaf index
    pub state_id: u32,
    /// Hash stored in the tree
    pub data_hash: Hash,
    /// Decoded leaf
    pub user_state: UserState,
}

impl StateLeaf {
    /// Encoded value width
    pub const BYTES: usize = 32 + 4 + 3 * 32;

    /// Leaf holding `user_state`
    pub fn new(state_id: u32, user_state: UserState) -> Self {
        Self {
            state_id,
            data_hash: user_state.hash(),
            user_state,
        }
    }

    /// Placeholder for an index that was never set
    pub fn empty(state_id: u32) -> Self {
        Self {
            state_id,
            data_hash: ZERO_LEAF,
            user_state: UserState::default(),
        }
    }

    /// Whether this is the placeholder of an unset index
    pub fn is_empty(&self) -> bool {
        self.data_hash == ZERO_LEAF
    }

    /// Encode the leaf, without its index
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::BYTES);
        self.write(&mut buf);
        buf
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.data_hash);
        buf.put_u32(self.user_state.pub_key_id);
        buf.put_u256(&self.user_state.token_id);
        buf.put_u256(&self.user_state.balance);
        buf.put_u256(&self.user_state.nonce);
    }

    /// Decode a leaf stored at `state_id`
    pub fn from_bytes(state_id: u32, bytes: &[u8]) -> Result<Self, StorageError> {
        let mut reader = Reader::new(bytes, "state leaf");
        let leaf = Self::read(state_id, &mut reader)?;
        reader.finish()?;
        Ok(leaf)
    }

    pub(crate) fn read(state_id: u32, reader: &mut Reader<'_>) -> Result<Self, StorageError> {
        Ok(Self {
            state_id,
            data_hash: reader.hash()?,
            user_state: UserState {
                pub_key_id: reader.u32()?,
                token_id: reader.u256()?,
                balance: reader.u256()?,
                nonce: reader.u256()?,
            },
        })
    }
}

/// Journal entry of a state tree write, used to revert it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateUpdate {
    /// Position in the journal
    pub id: u64,
    /// Root right after the write
    pub current_root: Hash,
    /// Root right before the write
    pub prev_root: Hash,
    /// Leaf that was overwritten
    pub prev_state_leaf: StateLeaf,
}

impl StateUpdate {
    /// Encode the update, without its id
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 32 + 4 + StateLeaf::BYTES);
        buf.extend_from_slice(&self.current_root);
        buf.extend_from_slice(&self.prev_root);
        buf.put_u32(self.prev_state_leaf.state_id);
        self.prev_state_leaf.write(&mut buf);
        buf
    }

    /// Decode the update stored under `id`
    pub fn from_bytes(id: u64, bytes: &[u8]) -> Result<Self, StorageError> {
        let mut reader = Reader::new(bytes, "state update");
        let current_root = reader.hash()?;
        let prev_root = reader.hash()?;
        let state_id = reader.u32()?;
        let prev_state_leaf = StateLeaf::read(state_id, &mut reader)?;
        reader.finish()?;
        Ok(Self {
            id,
            current_root,
            prev_root,
            prev_state_leaf,
        })
    }
}

/// Leaf of the account tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLeaf {
    /// Leaf index
    pub pub_key_id: u32,
    /// Registered key
    pub public_key: PublicKey,
}

impl AccountLeaf {
    /// Hash stored in the tree
    pub fn hash(&self) -> Hash {
        Keccak256Hasher::hash(self.public_key.as_bytes())
    }
}

/// Kind of a user transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxType {
    /// Move tokens between existing states
    Transfer = 1,
    /// Move tokens out to another layer
    MassMigration = 2,
    /// Transfer that creates the receiver's state
    Create2Transfer = 3,
}

impl TxType {
    /// Type tagged by `byte`, if any
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Transfer),
            2 => Some(Self::MassMigration),
            3 => Some(Self::Create2Transfer),
            _ => None,
        }
    }

    /// Type tag of a stored record.
    ///
    /// # Panics
    ///
    /// If the tag is unknown, which means the stored data is corrupt.
    pub(crate) fn decode(byte: u8) -> Self {
        Self::from_byte(byte).unwrap_or_else(|| panic!("unknown transaction type {byte}"))
    }
}

/// Kind of a rollup batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum BatchType {
    /// Initial state
    Genesis = 0,
    /// Batch of transfers
    Transfer = 1,
    /// Batch of mass migrations
    MassMigration = 2,
    /// Batch of create-to-transfers
    Create2Transfer = 3,
    /// Subtree of deposits
    Deposit = 4,
}

impl BatchType {
    /// Type tagged by `byte`, if any
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Genesis),
            1 => Some(Self::Transfer),
            2 => Some(Self::MassMigration),
            3 => Some(Self::Create2Transfer),
            4 => Some(Self::Deposit),
            _ => None,
        }
    }

    pub(crate) fn decode(byte: u8) -> Self {
        Self::from_byte(byte).unwrap_or_else(|| panic!("unknown batch type {byte}"))
    }

    /// Whether batches of this type carry user transactions
    pub const fn is_tx_batch(self) -> bool {
        matches!(
            self,
            Self::Transfer | Self::MassMigration | Self::Create2Transfer
        )
    }
}

impl From<TxType> for BatchType {
    fn from(tx_type: TxType) -> Self {
        match tx_type {
            TxType::Transfer => Self::Transfer,
            TxType::MassMigration => Self::MassMigration,
            TxType::Create2Transfer => Self::Create2Transfer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_state() -> UserState {
        UserState {
            pub_key_id: 3,
            token_id: U256::from(1),
            balance: U256::from(420),
            nonce: U256::from(2),
        }
    }

    #[test]
    fn test_user_state_hash_pads_pub_key_id() {
        let state = user_state();
        let mut encoded = vec![0u8; 28];
        encoded.extend_from_slice(&3u32.to_be_bytes());
        encoded.extend_from_slice(&U256::from(1).to_be_bytes::<32>());
        encoded.extend_from_slice(&U256::from(420).to_be_bytes::<32>());
        encoded.extend_from_slice(&U256::from(2).to_be_bytes::<32>());
        assert_eq!(state.hash(), Keccak256Hasher::hash(&encoded));
    }

    #[test]
    fn test_state_leaf_codec() {
        let leaf = StateLeaf::new(9, user_state());
        let bytes = leaf.to_bytes();
        assert_eq!(bytes.len(), StateLeaf::BYTES);
        assert_eq!(StateLeaf::from_bytes(9, &bytes).unwrap(), leaf);
        assert!(StateLeaf::from_bytes(9, &bytes[1..]).is_err());
    }

    #[test]
    fn test_empty_leaf() {
        let leaf = StateLeaf::empty(4);
        assert!(leaf.is_empty());
        assert!(!StateLeaf::new(4, UserState::default()).is_empty());
    }

    #[test]
    fn test_state_update_codec() {
        let update = StateUpdate {
            id: 12,
            current_root: [1u8; 32],
            prev_root: [2u8; 32],
            prev_state_leaf: StateLeaf::empty(77),
        };
        let bytes = update.to_bytes();
        assert_eq!(bytes.len(), 200);
        assert_eq!(StateUpdate::from_bytes(12, &bytes).unwrap(), update);
    }

    #[test]
    fn test_public_key_serializes_as_hex() {
        let key = PublicKey([0xab; 128]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(128)));
        assert_eq!(serde_json::from_str::<PublicKey>(&json).unwrap(), key);
        assert!(serde_json::from_str::<Signature>("\"0x00\"").is_err());
    }

    #[test]
    fn test_type_bytes() {
        assert_eq!(TxType::from_byte(3), Some(TxType::Create2Transfer));
        assert_eq!(TxType::from_byte(0), None);
        assert_eq!(BatchType::from_byte(4), Some(BatchType::Deposit));
        assert_eq!(BatchType::from(TxType::MassMigration), BatchType::MassMigration);
    }

    #[test]
    #[should_panic(expected = "unknown transaction type 9")]
    fn test_unknown_tx_type_panics() {
        TxType::decode(9);
    }

    #[test]
    #[should_panic(expected = "unknown batch type 7")]
    fn test_unknown_batch_type_panics() {
        BatchType::decode(7);
    }
}
