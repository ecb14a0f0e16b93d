#![cfg_attr(not(feature = "std"), no_std)]

//! Deniable anonymous group authentication. A client belonging to a known
//! group of members authenticates against a known group of servers and comes
//! away with a *linkage tag*: a group element that proves membership without
//! revealing which member it is, and that is the same for every
//! authentication by the same client in the same context. Services can
//! therefore detect Sybils while clients stay anonymous across contexts.
//!
//! The protocol runs in three acts:
//!
//! **Request.** The client derives a shared secret `σ_j = H(Y_j^z)` with every
//! server from an ephemeral key `z`, commits to the running products of those
//! secrets in a chain `S`, computes the initial tag `T_0 = h_i^{σ_1..σ_n}`
//! over its per-client generator `h_i`, and proves correct formation with an
//! OR proof across all `m` members: only the client's own clause uses a real
//! witness, the remaining clauses are simulated, and the per-clause
//! challenges must sum to a collective challenge the servers control.
//!
//! **Collective challenge.** Each server commits to a share `k_j` of the
//! challenge with a signed commitment `g^{k_j}`, openings are exchanged and
//! checked, and `cs = Σ k_j` travels through every server in a round-robin
//! until it carries one signature per server. No single server chooses the
//! challenge, so no server can deanonymize the client by grinding it.
//!
//! **Pipeline.** Starting from `T_0`, each server recovers its `σ_j` from the
//! client's ephemeral key, checks the chain link `S_{j+2} = S_{j+1}^{σ_j}`,
//! and rewrites the tag as `T ← T^{r_j·σ_j^{-1}}` under its per-round secret
//! `r_j`, proving the rewrite consistent with its published commitment
//! `R_j = g^{r_j}`. A client whose chain does not match is convicted with a
//! misbehaviour proof and the identity element as final tag. Every hop is
//! signed over the entire prior transcript, so the sequence cannot be
//! reordered or partially replayed. The final tag `h_i^{r_1..r_n}` is
//! independent of the client's ephemeral randomness, which is what makes two
//! authentications in one context link.
//!
//! The crate is the protocol core only: pure state transitions over
//! in-memory values, generic over the curve (`AffineRepr`) and the hash
//! (`Digest`). Transport, persistence and roster management live with the
//! caller.

pub mod challenge;
pub mod client;
pub mod context;
pub mod error;
pub mod hashing;
pub mod serde_utils;
pub mod server;
pub mod signature;

pub use crate::{
    challenge::{
        challenge_signing_bytes, check_openings, finalize_challenge, initialize_challenge,
        verify_commitment_signatures, Challenge, Commitment, PendingChallenge,
    },
    client::{
        assemble_client_message, verify_client_proof, Client, ClientMessage, ClientProof,
        ClientProofCommitments,
    },
    context::{AuthenticationContext, ClientId, Members, ServerId},
    error::DagaError,
    server::{
        initialize_server_message, verify_misbehaving_proof, verify_rewrite_proof,
        MisbehavingProof, RewriteProof, Server, ServerMessage, ServerProof,
    },
    signature::{SchnorrSignature, ServerSignature},
};
