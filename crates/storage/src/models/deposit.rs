use alloy_primitives::U256;
use commander_smt::Hash;
use serde::{Deserialize, Serialize};

use crate::{
    codec::{Reader, Writer},
    error::StorageError,
};

/// Position of a deposit in its subtree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DepositId {
    /// Subtree the deposit was queued into
    pub subtree_id: U256,
    /// Index within the subtree
    pub deposit_index: U256,
}

/// A deposit waiting to be inserted into the state tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeposit {
    /// Position of the deposit
    pub id: DepositId,
    /// Owner of the created state
    pub to_pub_key_id: u32,
    /// Deposited token
    pub token_id: U256,
    /// Deposited amount in layer 2 units
    pub l2_amount: U256,
}

impl PendingDeposit {
    /// Encoded width in bytes
    pub const BYTES: usize = 32 + 32 + 4 + 32 + 32;

    /// Encode the deposit
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::BYTES);
        self.write(&mut buf);
        buf
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_u256(&self.id.subtree_id);
        buf.put_u256(&self.id.deposit_index);
        buf.put_u32(self.to_pub_key_id);
        buf.put_u256(&self.token_id);
        buf.put_u256(&self.l2_amount);
    }

    /// Decode a deposit
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let mut reader = Reader::new(bytes, "pending deposit");
        let deposit = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(deposit)
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self, StorageError> {
        Ok(Self {
            id: DepositId {
                subtree_id: reader.u256()?,
                deposit_index: reader.u256()?,
            },
            to_pub_key_id: reader.u32()?,
            token_id: reader.u256()?,
            l2_amount: reader.u256()?,
        })
    }

    /// Count-prefixed list of deposits
    pub(crate) fn write_all(deposits: &[Self], buf: &mut Vec<u8>) {
        buf.put_u32(deposits.len() as u32);
        for deposit in deposits {
            deposit.write(buf);
        }
    }

    pub(crate) fn read_all(reader: &mut Reader<'_>) -> Result<Vec<Self>, StorageError> {
        let count = reader.u32()?;
        (0..count).map(|_| Self::read(reader)).collect()
    }
}

/// A full subtree of deposits ready to be committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDepositSubtree {
    /// Subtree ID assigned on chain
    pub id: U256,
    /// Root of the subtree
    pub root: Hash,
    /// Deposits, in subtree order
    pub deposits: Vec<PendingDeposit>,
}

impl PendingDepositSubtree {
    /// Encode the subtree, without its id
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 4 + self.deposits.len() * PendingDeposit::BYTES);
        buf.extend_from_slice(&self.root);
        PendingDeposit::write_all(&self.deposits, &mut buf);
        buf
    }

    /// Decode the subtree stored under `id`
    pub fn from_bytes(id: U256, bytes: &[u8]) -> Result<Self, StorageError> {
        let mut reader = Reader::new(bytes, "pending deposit subtree");
        let root = reader.hash()?;
        let deposits = PendingDeposit::read_all(&mut reader)?;
        reader.finish()?;
        Ok(Self { id, root, deposits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit(index: u64) -> PendingDeposit {
        PendingDeposit {
            id: DepositId {
                subtree_id: U256::from(2),
                deposit_index: U256::from(index),
            },
            to_pub_key_id: 1,
            token_id: U256::ZERO,
            l2_amount: U256::from(10 * index),
        }
    }

    #[test]
    fn test_deposit_width() {
        assert_eq!(deposit(1).to_bytes().len(), PendingDeposit::BYTES);
        assert_eq!(PendingDeposit::from_bytes(&deposit(1).to_bytes()).unwrap(), deposit(1));
    }

    #[test]
    fn test_subtree_codec() {
        let subtree = PendingDepositSubtree {
            id: U256::from(2),
            root: [3u8; 32],
            deposits: (0..4).map(deposit).collect(),
        };
        let bytes = subtree.to_bytes();
        assert_eq!(PendingDepositSubtree::from_bytes(subtree.id, &bytes).unwrap(), subtree);
        assert!(PendingDepositSubtree::from_bytes(subtree.id, &bytes[..bytes.len() - 1]).is_err());
    }
}
