use alloy_primitives::U256;
use commander_smt::Hash;
use serde::{Deserialize, Serialize};

use crate::{
    codec::{Reader, Writer},
    error::StorageError,
    types::{BatchType, Timestamp},
};

/// A batch submitted, or about to be submitted, to the rollup contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Batch number. Genesis is batch 0.
    pub id: U256,
    /// Batch kind
    pub batch_type: BatchType,
    /// Hash of the submission transaction
    pub transaction_hash: Hash,
    /// On-chain batch hash, known once the submission is mined
    pub hash: Option<Hash>,
    /// Block after which the batch can no longer be disputed
    pub finalisation_block: Option<u32>,
    /// Account tree root at submission
    pub account_tree_root: Option<Hash>,
    /// State root before the batch was applied
    pub prev_state_root: Option<Hash>,
    /// When the submission was mined
    pub mined_time: Option<Timestamp>,
}

impl Batch {
    /// Encode the batch, without its id
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 32 + 33 + 5 + 33 + 33 + 9);
        buf.push(self.batch_type as u8);
        buf.extend_from_slice(&self.transaction_hash);
        let put_hash = |buf: &mut Vec<u8>, hash: &Hash| buf.extend_from_slice(hash);
        buf.put_option(self.hash.as_ref(), 32, put_hash);
        buf.put_option(self.finalisation_block.as_ref(), 4, |buf, block| buf.put_u32(*block));
        buf.put_option(self.account_tree_root.as_ref(), 32, put_hash);
        buf.put_option(self.prev_state_root.as_ref(), 32, put_hash);
        buf.put_option(self.mined_time.as_ref(), 8, |buf, time| buf.put_u64(*time));
        buf
    }

    /// Decode the batch stored under `id`.
    ///
    /// # Panics
    ///
    /// If the type tag does not name a batch type.
    pub fn from_bytes(id: U256, bytes: &[u8]) -> Result<Self, StorageError> {
        let mut reader = Reader::new(bytes, "batch");
        let batch = Self {
            id,
            batch_type: BatchType::decode(reader.u8()?),
            transaction_hash: reader.hash()?,
            hash: reader.option(Reader::hash)?,
            finalisation_block: reader.option(Reader::u32)?,
            account_tree_root: reader.option(Reader::hash)?,
            prev_state_root: reader.option(Reader::hash)?,
            mined_time: reader.option(Reader::u64)?,
        };
        reader.finish()?;
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_codec() {
        let pending = Batch {
            id: U256::from(5),
            batch_type: BatchType::Create2Transfer,
            transaction_hash: [1u8; 32],
            hash: None,
            finalisation_block: None,
            account_tree_root: None,
            prev_state_root: Some([2u8; 32]),
            mined_time: None,
        };
        let mined = Batch {
            hash: Some([3u8; 32]),
            finalisation_block: Some(1234),
            account_tree_root: Some([4u8; 32]),
            mined_time: Some(1_700_000_000),
            ..pending.clone()
        };
        assert_eq!(pending.to_bytes().len(), mined.to_bytes().len());
        for batch in [pending, mined] {
            assert_eq!(Batch::from_bytes(batch.id, &batch.to_bytes()).unwrap(), batch);
        }
    }
}
