//! Client side of the authentication protocol. The client builds an initial
//! linkage tag and a commitment chain over ephemeral shared secrets with every
//! server, proves correct formation with an OR proof across all group members
//! (hiding which member it is), and, once the server pipeline has rewritten
//! the tag, verifies the full transcript to extract its final linkage tag.

use crate::{
    challenge::{challenge_signing_bytes, Challenge},
    context::{AuthenticationContext, ClientId},
    error::DagaError,
    hashing::hash_to_scalar,
    serde_utils::ArkObjectBytes,
    server::ServerMessage,
};
use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::{One, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::{cfg_into_iter, io::Write, rand::RngCore, vec, vec::Vec, UniformRand};
use digest::Digest;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A group member able to authenticate against a context that lists its
/// public key.
#[serde_as]
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    CanonicalSerialize,
    CanonicalDeserialize,
    Serialize,
    Deserialize,
    Zeroize,
    ZeroizeOnDrop,
)]
pub struct Client<G: AffineRepr> {
    #[zeroize(skip)]
    index: ClientId,
    #[serde_as(as = "ArkObjectBytes")]
    secret: G::ScalarField,
}

/// Authentication request sent to an arbitrarily chosen server: the context it
/// was built under, the commitment chain `S`, the initial tag `T0` and the
/// proof of correct formation.
#[serde_as]
#[derive(
    Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize,
)]
#[serde(bound = "")]
pub struct ClientMessage<G: AffineRepr> {
    pub context: AuthenticationContext<G>,
    /// `S = (Z, g, S_1, .., S_n)` where `Z` is the client's ephemeral public
    /// key and `S_{k+1} = S_k^{σ_k}` chains the per-server shared secrets
    #[serde_as(as = "Vec<ArkObjectBytes>")]
    pub commitment_chain: Vec<G>,
    #[serde_as(as = "ArkObjectBytes")]
    pub initial_tag: G,
    pub proof: ClientProof<G>,
}

/// OR proof that the request was formed by one of the `m` group members:
/// three commitments per clause, per-clause challenges summing to the
/// collective challenge, two responses per clause.
#[serde_as]
#[derive(
    Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize,
)]
pub struct ClientProof<G: AffineRepr> {
    #[serde_as(as = "ArkObjectBytes")]
    pub cs: G::ScalarField,
    #[serde_as(as = "Vec<ArkObjectBytes>")]
    pub t: Vec<G>,
    #[serde_as(as = "Vec<ArkObjectBytes>")]
    pub c: Vec<G::ScalarField>,
    #[serde_as(as = "Vec<ArkObjectBytes>")]
    pub r: Vec<G::ScalarField>,
}

/// Commitments of the OR proof together with the blindings needed to answer
/// the collective challenge. The blindings are erased on drop.
#[serde_as]
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    CanonicalSerialize,
    CanonicalDeserialize,
    Serialize,
    Deserialize,
    Zeroize,
    ZeroizeOnDrop,
)]
pub struct ClientProofCommitments<G: AffineRepr> {
    #[zeroize(skip)]
    #[serde_as(as = "Vec<ArkObjectBytes>")]
    pub t: Vec<G>,
    #[serde_as(as = "Vec<ArkObjectBytes>")]
    v: Vec<G::ScalarField>,
    #[serde_as(as = "Vec<ArkObjectBytes>")]
    w: Vec<G::ScalarField>,
}

impl<G: AffineRepr> Client<G> {
    pub fn new(index: ClientId, secret: G::ScalarField) -> Self {
        Self { index, secret }
    }

    pub fn new_with_random_secret<R: RngCore>(rng: &mut R, index: ClientId) -> Self {
        Self::new(index, G::ScalarField::rand(rng))
    }

    pub fn index(&self) -> ClientId {
        self.index
    }

    pub fn public_key(&self) -> G {
        (G::generator() * self.secret).into_affine()
    }

    /// Generates the elements of the authentication request: the initial tag
    /// `T0 = h_i^s`, the commitment chain `S` and the witness `s`, the product
    /// of the per-server shared secrets. The witness must be kept until the
    /// proof responses have been produced, then discarded.
    pub fn create_request<R: RngCore, D: Digest>(
        &self,
        rng: &mut R,
        context: &AuthenticationContext<G>,
    ) -> Result<(G, Vec<G>, G::ScalarField), DagaError> {
        if self.index as usize >= context.num_clients() {
            return Err(DagaError::InvalidClientIndex(
                self.index,
                context.num_clients(),
            ));
        }
        let generator = G::generator();

        // Ephemeral key pair; `Z` opens the request to misbehaviour proofs.
        let mut z = G::ScalarField::rand(rng);
        let big_z = (generator * z).into_affine();

        // σ_j = H(Y_j^z), the shared secret with server j
        let mut shared = Vec::with_capacity(context.num_servers());
        for y in &context.members.servers {
            let mut bytes = vec![];
            (*y * z).into_affine().serialize_compressed(&mut bytes)?;
            shared.push(hash_to_scalar::<G::ScalarField, D>(&bytes));
        }
        z.zeroize();

        // S[0] = Z, S[1] = g, S[k+2] = g^{σ_0 * .. * σ_k}
        let mut commitment_chain = Vec::with_capacity(context.num_servers() + 2);
        commitment_chain.push(big_z);
        commitment_chain.push(generator);
        let mut exp = G::ScalarField::one();
        for sigma in &shared {
            exp *= sigma;
            commitment_chain.push((generator * exp).into_affine());
        }
        shared.zeroize();

        let initial_tag = (context.generators[self.index as usize] * exp).into_affine();
        Ok((initial_tag, commitment_chain, exp))
    }

    /// First move of the OR proof: three commitments per clause, with real
    /// blindings only in this client's clause (`w_i = 0`).
    pub fn generate_proof_commitments<R: RngCore>(
        &self,
        rng: &mut R,
        context: &AuthenticationContext<G>,
        initial_tag: &G,
        s: &G::ScalarField,
    ) -> Result<ClientProofCommitments<G>, DagaError> {
        let m = context.num_clients();
        if self.index as usize >= m {
            return Err(DagaError::InvalidClientIndex(self.index, m));
        }
        let generator = G::generator();

        let mut w = (0..m)
            .map(|_| G::ScalarField::rand(rng))
            .collect::<Vec<_>>();
        w[self.index as usize] = G::ScalarField::zero();
        let v = (0..2 * m)
            .map(|_| G::ScalarField::rand(rng))
            .collect::<Vec<_>>();

        let gs = (generator * *s).into_affine();
        let mut t = Vec::with_capacity(3 * m);
        for k in 0..m {
            t.push((context.members.clients[k] * w[k] + generator * v[2 * k]).into_affine());
            t.push((gs * w[k] + generator * v[2 * k + 1]).into_affine());
            t.push((*initial_tag * w[k] + context.generators[k] * v[2 * k + 1]).into_affine());
        }
        Ok(ClientProofCommitments { t, v, w })
    }

    /// Finishes the OR proof once the collectively generated challenge
    /// arrives. Every server's signature on the challenge scalar is checked
    /// before the witness is used.
    pub fn generate_proof_responses<D: Digest>(
        &self,
        context: &AuthenticationContext<G>,
        s: &G::ScalarField,
        challenge: &Challenge<G>,
        commitments: &ClientProofCommitments<G>,
    ) -> Result<(Vec<G::ScalarField>, Vec<G::ScalarField>), DagaError> {
        let n = context.num_servers();
        if self.index as usize >= commitments.w.len() {
            return Err(DagaError::InvalidClientIndex(
                self.index,
                commitments.w.len(),
            ));
        }
        if challenge.signatures.len() != n {
            return Err(DagaError::IncompleteChallenge(
                challenge.signatures.len(),
                n,
            ));
        }
        let msg = challenge_signing_bytes::<G>(&challenge.cs)?;
        let mut seen = vec![false; n];
        for sig in &challenge.signatures {
            let j = sig.index as usize;
            if j >= n {
                return Err(DagaError::InvalidServerIndex(sig.index, n));
            }
            if seen[j] {
                return Err(DagaError::DuplicateSigner(sig.index));
            }
            seen[j] = true;
            if !sig.sig.verify::<D>(&msg, context.server_key(sig.index)?) {
                return Err(DagaError::InvalidSignature(sig.index));
            }
        }

        let i = self.index as usize;
        let mut c = commitments.w.clone();
        let sum: G::ScalarField = c.iter().sum();
        c[i] = challenge.cs - sum;

        let mut r = commitments.v.clone();
        r[2 * i] -= c[i] * self.secret;
        r[2 * i + 1] -= c[i] * s;
        Ok((c, r))
    }

    /// Verifies the completed server message and extracts the final linkage
    /// tag. The identity element means the authentication was rejected.
    pub fn final_linkage_tag<D: Digest>(
        &self,
        context: &AuthenticationContext<G>,
        msg: &ServerMessage<G>,
    ) -> Result<G, DagaError> {
        if msg.indexes.len() != context.num_servers() {
            return Err(DagaError::IncompletePipeline(
                msg.indexes.len(),
                context.num_servers(),
            ));
        }
        msg.verify_hops::<D>(context)?;
        Ok(msg.tags[msg.tags.len() - 1])
    }
}

/// Builds the request message from its parts and validates its shape.
pub fn assemble_client_message<G: AffineRepr>(
    context: &AuthenticationContext<G>,
    commitment_chain: Vec<G>,
    initial_tag: G,
    challenge: &Challenge<G>,
    t: Vec<G>,
    c: Vec<G::ScalarField>,
    r: Vec<G::ScalarField>,
) -> Result<ClientMessage<G>, DagaError> {
    let msg = ClientMessage {
        context: context.clone(),
        commitment_chain,
        initial_tag,
        proof: ClientProof {
            cs: challenge.cs,
            t,
            c,
            r,
        },
    };
    msg.validate()?;
    Ok(msg)
}

impl<G: AffineRepr> ClientMessage<G> {
    /// Total shape check of the request: chain and proof lengths against the
    /// embedded context, and the fixed generator at `S[1]`.
    pub fn validate(&self) -> Result<(), DagaError> {
        let m = self.context.num_clients();
        let n = self.context.num_servers();
        if m == 0 || n == 0 {
            return Err(DagaError::EmptyMembers);
        }
        if self.context.generators.len() != m
            || self.context.round_commitments.len() != n
            || self.commitment_chain.len() != n + 2
            || self.proof.t.len() != 3 * m
            || self.proof.c.len() != m
            || self.proof.r.len() != 2 * m
        {
            return Err(DagaError::MalformedClientMessage);
        }
        if self.commitment_chain[1] != G::generator() {
            return Err(DagaError::MalformedClientMessage);
        }
        Ok(())
    }

    /// Canonical byte encoding for signing and hashing:
    /// `context ‖ S ‖ T0 ‖ proof`.
    pub fn write_canonical<W: Write>(&self, mut writer: W) -> Result<(), DagaError> {
        self.context.write_canonical(&mut writer)?;
        for s in &self.commitment_chain {
            s.serialize_compressed(&mut writer)?;
        }
        self.initial_tag.serialize_compressed(&mut writer)?;
        self.proof.write_canonical(writer)
    }

    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, DagaError> {
        let mut bytes = vec![];
        self.write_canonical(&mut bytes)?;
        Ok(bytes)
    }
}

impl<G: AffineRepr> ClientProof<G> {
    /// Canonical byte encoding: `cs ‖ t ‖ c ‖ r`.
    pub fn write_canonical<W: Write>(&self, mut writer: W) -> Result<(), DagaError> {
        self.cs.serialize_compressed(&mut writer)?;
        for t in &self.t {
            t.serialize_compressed(&mut writer)?;
        }
        for c in &self.c {
            c.serialize_compressed(&mut writer)?;
        }
        for r in &self.r {
            r.serialize_compressed(&mut writer)?;
        }
        Ok(())
    }
}

/// Verifies the OR proof of a client request: the per-clause challenges must
/// sum to the collective challenge and the three commitment equations must
/// hold for every clause.
pub fn verify_client_proof<G: AffineRepr>(msg: &ClientMessage<G>) -> Result<(), DagaError> {
    msg.validate()?;
    let m = msg.context.num_clients();
    let n = msg.context.num_servers();

    let cs: G::ScalarField = msg.proof.c.iter().sum();
    if cs != msg.proof.cs {
        return Err(DagaError::InvalidClientProof);
    }

    let generator = G::generator();
    let gs = msg.commitment_chain[n + 1];
    let ok = cfg_into_iter!(0..m).all(|k| {
        let x = msg.context.members.clients[k];
        let h = msg.context.generators[k];
        let c = msg.proof.c[k];
        msg.proof.t[3 * k] == (x * c + generator * msg.proof.r[2 * k]).into_affine()
            && msg.proof.t[3 * k + 1]
                == (gs * c + generator * msg.proof.r[2 * k + 1]).into_affine()
            && msg.proof.t[3 * k + 2]
                == (msg.initial_tag * c + h * msg.proof.r[2 * k + 1]).into_affine()
    });
    if !ok {
        return Err(DagaError::InvalidClientProof);
    }
    Ok(())
}
