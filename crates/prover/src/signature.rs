//! Public key proofs backing signature disputes

use commander_smt::zero_hash;
use commander_storage::Storage;

use crate::{
    decoded::DecodedCommitment,
    error::ProverError,
    proofs::{
        PublicKeyProof, ReceiverPublicKeyProof, SignatureProof, SignatureProofWithReceiver,
        StateMerkleProof,
    },
    prover::Prover,
};

impl Prover {
    /// Proof of the current state at `state_id`
    pub fn state_merkle_proof(&self, state_id: u32) -> Result<StateMerkleProof, ProverError> {
        self.read_snapshot(|storage| Ok(storage.state_tree.leaf_proof(state_id)?))
    }

    /// Sender public keys for the states in `state_proofs`
    pub fn signature_proof(
        &self,
        state_proofs: &[StateMerkleProof],
    ) -> Result<SignatureProof, ProverError> {
        self.read_snapshot(|storage| {
            let public_keys = state_proofs
                .iter()
                .map(|proof| public_key_proof(storage, proof.user_state.pub_key_id))
                .collect::<Result<_, _>>()?;
            Ok(SignatureProof {
                user_states: state_proofs.to_vec(),
                public_keys,
            })
        })
    }

    /// Sender public keys plus the account leaf of every receiver.
    ///
    /// The receivers are read from the Create2Transfers of `commitment`; the
    /// i-th transaction is the one sent from `state_proofs[i]`.
    pub fn signature_proof_with_receiver(
        &self,
        commitment: &DecodedCommitment,
        state_proofs: &[StateMerkleProof],
    ) -> Result<SignatureProofWithReceiver, ProverError> {
        let receiver_pub_key_ids = commitment.create2_transfer_receivers()?;
        if receiver_pub_key_ids.len() != state_proofs.len() {
            return Err(ProverError::ReceiverCountMismatch {
                expected: state_proofs.len(),
                actual: receiver_pub_key_ids.len(),
            });
        }
        self.read_snapshot(|storage| {
            let mut sender_public_keys = Vec::with_capacity(state_proofs.len());
            let mut receiver_public_keys = Vec::with_capacity(state_proofs.len());
            for (proof, receiver) in state_proofs.iter().zip(&receiver_pub_key_ids) {
                sender_public_keys.push(public_key_proof(storage, proof.user_state.pub_key_id)?);
                receiver_public_keys.push(receiver_public_key_proof(storage, *receiver)?);
            }
            Ok(SignatureProofWithReceiver {
                user_states: state_proofs.to_vec(),
                sender_public_keys,
                receiver_public_keys,
            })
        })
    }
}

fn public_key_proof(storage: &Storage, pub_key_id: u32) -> Result<PublicKeyProof, ProverError> {
    let account = storage.account_tree.leaf(pub_key_id)?;
    Ok(PublicKeyProof {
        public_key: account.public_key,
        witness: storage.account_tree.get_witness(pub_key_id)?,
    })
}

/// An unregistered receiver is proven as the empty leaf
fn receiver_public_key_proof(
    storage: &Storage,
    pub_key_id: u32,
) -> Result<ReceiverPublicKeyProof, ProverError> {
    let witness = storage.account_tree.get_witness(pub_key_id)?;
    let public_key_hash = match storage.account_tree.leaf(pub_key_id) {
        Ok(account) => account.hash(),
        Err(err) if err.is_not_found() => zero_hash(0),
        Err(err) => return Err(err.into()),
    };
    Ok(ReceiverPublicKeyProof {
        public_key_hash,
        witness,
    })
}
