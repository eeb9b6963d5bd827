//! Proof builders over the commander state
//!
//! A [`Prover`] reads the state tree, the account tree and the batch history
//! of a [`Storage`](commander_storage::Storage) and assembles the proofs a
//! dispute or deposit submission needs. Every proof is built from a single
//! read-only snapshot, so all witnesses in it agree on the same roots.

mod commitment;
mod decoded;
mod error;
mod proofs;
mod prover;
mod signature;
mod vacancy;

pub use commitment::create_commitment_inclusion_proof;
pub use decoded::{CREATE2_TRANSFER_LENGTH, DecodedCommitment};
pub use error::ProverError;
pub use proofs::{
    CommitmentInclusionProof, PublicKeyProof, ReceiverPublicKeyProof, SignatureProof,
    SignatureProofWithReceiver, StateMerkleProof, SubtreeVacancyProof,
};
pub use prover::Prover;
