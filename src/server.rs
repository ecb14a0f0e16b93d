//! Server side of the authentication protocol. Servers co-generate the
//! collective challenge, then sequentially rewrite the client's initial tag
//! into the final linkage tag. Every step emits a proof of correct
//! computation (or, when the client's commitment chain is inconsistent, a
//! proof of that misbehaviour) and a signature binding the output to the
//! entire transcript so far.

use crate::{
    challenge::{challenge_signing_bytes, check_openings, Commitment, PendingChallenge},
    client::{verify_client_proof, ClientMessage},
    context::{AuthenticationContext, ServerId},
    error::DagaError,
    hashing::hash_to_scalar,
    serde_utils::ArkObjectBytes,
    signature::{SchnorrSignature, ServerSignature},
};
use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::Field;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::{io::Write, rand::RngCore, string::ToString, vec, vec::Vec, UniformRand};
use digest::Digest;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A server participating in challenge generation and the tag-rewriting
/// pipeline. Holds the long-term key and the per-round secret, which only
/// [`Server::new_round`] replaces.
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
pub struct Server<G: AffineRepr> {
    #[zeroize(skip)]
    index: ServerId,
    #[serde_as(as = "ArkObjectBytes")]
    secret: G::ScalarField,
    #[serde_as(as = "Option<ArkObjectBytes>")]
    round_secret: Option<G::ScalarField>,
}

/// The request plus the append-only hop log of the pipeline: one tag, proof,
/// server index and transcript signature per hop.
#[serde_as]
#[derive(
    Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize,
)]
#[serde(bound = "")]
pub struct ServerMessage<G: AffineRepr> {
    pub request: ClientMessage<G>,
    #[serde_as(as = "Vec<ArkObjectBytes>")]
    pub tags: Vec<G>,
    pub proofs: Vec<ServerProof<G>>,
    pub indexes: Vec<ServerId>,
    pub signatures: Vec<ServerSignature<G>>,
}

/// Proof attached to a pipeline hop. A correctly behaving client gets a
/// rewrite proof; a client whose commitment chain is inconsistent gets a
/// misbehaviour proof and the identity element as its tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum ServerProof<G: AffineRepr> {
    Rewrite(RewriteProof<G>),
    Misbehaving(MisbehavingProof<G>),
}

/// Proves knowledge of `(r_j, σ)` with `T = T_prev^{r_j·σ^{-1}}`,
/// `R_j = g^{r_j}` and `S_{j+2} = S_{j+1}^σ`, all bound to the same `σ`.
#[serde_as]
#[derive(
    Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize,
)]
pub struct RewriteProof<G: AffineRepr> {
    #[serde_as(as = "ArkObjectBytes")]
    pub t1: G,
    #[serde_as(as = "ArkObjectBytes")]
    pub t2: G,
    #[serde_as(as = "ArkObjectBytes")]
    pub t3: G,
    #[serde_as(as = "ArkObjectBytes")]
    pub c: G::ScalarField,
    #[serde_as(as = "ArkObjectBytes")]
    pub r1: G::ScalarField,
    #[serde_as(as = "ArkObjectBytes")]
    pub r2: G::ScalarField,
}

/// Proves knowledge of `y_j` with `Zs = Z^{y_j}` and `Y_j = g^{y_j}`, exposing
/// the shared secret `Zs` that convicts the client's chain.
#[serde_as]
#[derive(
    Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize,
)]
pub struct MisbehavingProof<G: AffineRepr> {
    #[serde_as(as = "ArkObjectBytes")]
    pub t1: G,
    #[serde_as(as = "ArkObjectBytes")]
    pub t2: G,
    #[serde_as(as = "ArkObjectBytes")]
    pub t3: G,
    #[serde_as(as = "ArkObjectBytes")]
    pub c: G::ScalarField,
    #[serde_as(as = "ArkObjectBytes")]
    pub r1: G::ScalarField,
}

impl<G: AffineRepr> Server<G> {
    pub fn new(index: ServerId, secret: G::ScalarField) -> Self {
        Self {
            index,
            secret,
            round_secret: None,
        }
    }

    pub fn new_with_random_secret<R: RngCore>(rng: &mut R, index: ServerId) -> Self {
        Self::new(index, G::ScalarField::rand(rng))
    }

    pub fn index(&self) -> ServerId {
        self.index
    }

    pub fn public_key(&self) -> G {
        (G::generator() * self.secret).into_affine()
    }

    /// Erases the previous round secret, samples a fresh one and returns the
    /// commitment `R_j = g^{r_j}` to publish into the next context. Must not
    /// be called while requests against the current round are in flight.
    pub fn new_round<R: RngCore>(&mut self, rng: &mut R) -> G {
        if let Some(old) = self.round_secret.as_mut() {
            old.zeroize();
        }
        let round_secret = G::ScalarField::rand(rng);
        let commitment = (G::generator() * round_secret).into_affine();
        self.round_secret = Some(round_secret);
        commitment
    }

    /// Picks a share `k_j` of the collective challenge and publishes the
    /// signed commitment `C_j = g^{k_j}`; the opening is revealed only once
    /// all commitments have been collected.
    pub fn generate_commitment<R: RngCore, D: Digest>(
        &self,
        rng: &mut R,
    ) -> Result<(Commitment<G>, G::ScalarField), DagaError> {
        let opening = G::ScalarField::rand(rng);
        let commit = (G::generator() * opening).into_affine();
        let mut msg = vec![];
        commit.serialize_compressed(&mut msg)?;
        let sig = SchnorrSignature::new::<R, D>(rng, &msg, &self.secret);
        Ok((
            Commitment {
                commit,
                sig: ServerSignature {
                    index: self.index,
                    sig,
                },
            },
            opening,
        ))
    }

    /// Round-robin step: checks the circulating challenge (no duplicate
    /// signers, every present signature valid, scalar consistent with the
    /// commitments and openings) and endorses it while signatures are still
    /// missing. A call with a complete signature set verifies only, which is
    /// how the leader closes the ring.
    pub fn sign_challenge<R: RngCore, D: Digest>(
        &self,
        rng: &mut R,
        context: &AuthenticationContext<G>,
        pending: &mut PendingChallenge<G>,
    ) -> Result<(), DagaError> {
        let n = context.num_servers();
        if self.index as usize >= n {
            return Err(DagaError::InvalidServerIndex(self.index, n));
        }
        let mut seen = vec![false; n];
        for sig in &pending.signatures {
            let j = sig.index as usize;
            if j >= n {
                return Err(DagaError::InvalidServerIndex(sig.index, n));
            }
            if seen[j] {
                return Err(DagaError::DuplicateSigner(sig.index));
            }
            seen[j] = true;
        }
        let msg = challenge_signing_bytes::<G>(&pending.cs)?;
        for sig in &pending.signatures {
            if !sig.sig.verify::<D>(&msg, context.server_key(sig.index)?) {
                return Err(DagaError::InvalidSignature(sig.index));
            }
        }
        let cs = check_openings(context, &pending.commitments, &pending.openings)?;
        if cs != pending.cs {
            return Err(DagaError::ChallengeMismatch);
        }
        if pending.signatures.len() < n {
            if seen[self.index as usize] {
                return Err(DagaError::DuplicateSigner(self.index));
            }
            pending.signatures.push(ServerSignature {
                index: self.index,
                sig: SchnorrSignature::new::<R, D>(rng, &msg, &self.secret),
            });
        }
        Ok(())
    }

    /// One pipeline step: verify the request and the whole transcript so far,
    /// recover the shared secret, rewrite the tag (or convict a cheating
    /// client with the identity tag), prove it, and sign the extended
    /// transcript.
    pub fn process<R: RngCore, D: Digest>(
        &self,
        rng: &mut R,
        context: &AuthenticationContext<G>,
        msg: &mut ServerMessage<G>,
    ) -> Result<(), DagaError> {
        let round_secret = *self
            .round_secret
            .as_ref()
            .ok_or(DagaError::MissingRoundSecret)?;
        let n = context.num_servers();
        let j = self.index as usize;
        if j >= n {
            return Err(DagaError::InvalidServerIndex(self.index, n));
        }
        msg.request.validate()?;
        // the request must have been built for a roster of this size, or the
        // chain positions below would not line up
        if msg.request.commitment_chain.len() != n + 2 {
            return Err(DagaError::MalformedClientMessage);
        }
        let k = msg.indexes.len();
        if k >= n {
            return Err(DagaError::TooManyHops(k, n));
        }
        verify_client_proof(&msg.request)?;
        msg.verify_hops::<D>(context)?;
        if msg.indexes.contains(&self.index) {
            return Err(DagaError::RepeatedServerIndex(self.index));
        }

        // σ = H(Z^{y_j}), the shared secret the client derived for this server
        let mut bytes = vec![];
        (msg.request.commitment_chain[0] * self.secret)
            .into_affine()
            .serialize_compressed(&mut bytes)?;
        let sigma = hash_to_scalar::<G::ScalarField, D>(&bytes);

        let expected = (msg.request.commitment_chain[j + 1] * sigma).into_affine();
        let (tag, proof) = if msg.request.commitment_chain[j + 2] == expected {
            let previous_tag = if k == 0 {
                msg.request.initial_tag
            } else {
                msg.tags[k - 1]
            };
            let sigma_inv = sigma
                .inverse()
                .ok_or(DagaError::DegenerateSharedSecret)?;
            let tag = (previous_tag * (round_secret * sigma_inv)).into_affine();
            let proof = self.generate_rewrite_proof::<R, D>(rng, context, &sigma, &tag, msg)?;
            (tag, ServerProof::Rewrite(proof))
        } else {
            let proof = self.generate_misbehaving_proof::<R, D>(
                rng,
                context,
                &msg.request.commitment_chain[0],
            )?;
            (G::zero(), ServerProof::Misbehaving(proof))
        };

        let mut transcript = msg.to_transcript_bytes()?;
        tag.serialize_compressed(&mut transcript)?;
        proof.write_canonical(&mut transcript)?;
        transcript.extend_from_slice(self.index.to_string().as_bytes());
        let sig = SchnorrSignature::new::<R, D>(rng, &transcript, &self.secret);

        msg.tags.push(tag);
        msg.proofs.push(proof);
        msg.indexes.push(self.index);
        msg.signatures.push(ServerSignature {
            index: self.index,
            sig,
        });
        Ok(())
    }

    /// Builds the rewrite proof for the tag this server just computed.
    pub fn generate_rewrite_proof<R: RngCore, D: Digest>(
        &self,
        rng: &mut R,
        context: &AuthenticationContext<G>,
        sigma: &G::ScalarField,
        tag: &G,
        msg: &ServerMessage<G>,
    ) -> Result<RewriteProof<G>, DagaError> {
        let round_secret = *self
            .round_secret
            .as_ref()
            .ok_or(DagaError::MissingRoundSecret)?;
        let j = self.index as usize;
        let chain = &msg.request.commitment_chain;

        let v1 = G::ScalarField::rand(rng);
        let v2 = G::ScalarField::rand(rng);
        let previous_tag = if msg.tags.is_empty() {
            msg.request.initial_tag
        } else {
            msg.tags[msg.tags.len() - 1]
        };
        let t1 = (previous_tag * v1 - *tag * v2).into_affine();
        let t2 = (G::generator() * v1).into_affine();
        let t3 = (chain[j + 1] * v2).into_affine();

        let bytes = rewrite_challenge_bytes(
            &previous_tag,
            tag,
            &context.round_commitments[j],
            &chain[j + 2],
            &chain[j + 1],
            &t1,
            &t2,
            &t3,
        )?;
        let c = hash_to_scalar::<G::ScalarField, D>(&bytes);
        let r1 = v1 - c * round_secret;
        let r2 = v2 - c * *sigma;
        Ok(RewriteProof {
            t1,
            t2,
            t3,
            c,
            r1,
            r2,
        })
    }

    /// Builds the proof convicting a client whose commitment chain does not
    /// match the shared secret, by exposing `Zs = Z^{y_j}`.
    pub fn generate_misbehaving_proof<R: RngCore, D: Digest>(
        &self,
        rng: &mut R,
        context: &AuthenticationContext<G>,
        ephemeral: &G,
    ) -> Result<MisbehavingProof<G>, DagaError> {
        let zs = (*ephemeral * self.secret).into_affine();
        let v = G::ScalarField::rand(rng);
        let t1 = (*ephemeral * v).into_affine();
        let t2 = (G::generator() * v).into_affine();

        let bytes =
            misbehaving_challenge_bytes(&zs, ephemeral, context.server_key(self.index)?, &t1, &t2)?;
        let c = hash_to_scalar::<G::ScalarField, D>(&bytes);
        let r1 = v - c * self.secret;
        Ok(MisbehavingProof { t1, t2, t3: zs, c, r1 })
    }
}

/// Wraps a client request into an empty pipeline message.
pub fn initialize_server_message<G: AffineRepr>(request: ClientMessage<G>) -> ServerMessage<G> {
    ServerMessage {
        request,
        tags: Vec::new(),
        proofs: Vec::new(),
        indexes: Vec::new(),
        signatures: Vec::new(),
    }
}

impl<G: AffineRepr> ServerMessage<G> {
    /// Bytes covered by the signature of the next hop: the canonical request
    /// followed by `tag ‖ proof ‖ ascii(index)` for every prior hop.
    pub fn to_transcript_bytes(&self) -> Result<Vec<u8>, DagaError> {
        let mut bytes = self.request.to_canonical_bytes()?;
        for h in 0..self.indexes.len() {
            self.tags[h].serialize_compressed(&mut bytes)?;
            self.proofs[h].write_canonical(&mut bytes)?;
            bytes.extend_from_slice(self.indexes[h].to_string().as_bytes());
        }
        Ok(bytes)
    }

    /// Verifies the hop log: equal-length vectors, valid and unique server
    /// indexes, every signature over the exact prior transcript, and every
    /// hop proof. Servers run this before extending the pipeline and the
    /// client runs it before accepting the final tag.
    pub fn verify_hops<D: Digest>(
        &self,
        context: &AuthenticationContext<G>,
    ) -> Result<(), DagaError> {
        self.request.validate()?;
        let k = self.indexes.len();
        if self.tags.len() != k || self.signatures.len() != k {
            return Err(DagaError::ExpectedSameSizeSequences(self.tags.len(), k));
        }
        if self.proofs.len() != k {
            return Err(DagaError::ExpectedSameSizeSequences(self.proofs.len(), k));
        }
        let n = context.num_servers();
        if k > n {
            return Err(DagaError::TooManyHops(k, n));
        }

        let mut transcript = self.request.to_canonical_bytes()?;
        let mut seen = vec![false; n];
        for h in 0..k {
            let index = self.indexes[h];
            let j = index as usize;
            if j >= n {
                return Err(DagaError::InvalidServerIndex(index, n));
            }
            if seen[j] {
                return Err(DagaError::RepeatedServerIndex(index));
            }
            seen[j] = true;

            self.tags[h].serialize_compressed(&mut transcript)?;
            self.proofs[h].write_canonical(&mut transcript)?;
            transcript.extend_from_slice(index.to_string().as_bytes());

            if self.signatures[h].index != index {
                return Err(DagaError::WrongSignerIndex(self.signatures[h].index, index));
            }
            if !self.signatures[h]
                .sig
                .verify::<D>(&transcript, context.server_key(index)?)
            {
                return Err(DagaError::InvalidSignature(index));
            }

            let proof_ok = match &self.proofs[h] {
                ServerProof::Rewrite(_) => verify_rewrite_proof::<G, D>(context, h, self),
                ServerProof::Misbehaving(proof) => verify_misbehaving_proof::<G, D>(
                    context,
                    index,
                    proof,
                    &self.request.commitment_chain[0],
                ),
            };
            if !proof_ok {
                return Err(DagaError::InvalidServerProof(h));
            }
        }
        Ok(())
    }
}

impl<G: AffineRepr> ServerProof<G> {
    /// Canonical byte encoding for signing and hashing:
    /// `t1 ‖ t2 ‖ t3 ‖ c ‖ r1` plus `r2` for the rewrite variant. The
    /// decodable wire encoding carries an explicit discriminant instead.
    pub fn write_canonical<W: Write>(&self, mut writer: W) -> Result<(), DagaError> {
        match self {
            Self::Rewrite(p) => {
                p.t1.serialize_compressed(&mut writer)?;
                p.t2.serialize_compressed(&mut writer)?;
                p.t3.serialize_compressed(&mut writer)?;
                p.c.serialize_compressed(&mut writer)?;
                p.r1.serialize_compressed(&mut writer)?;
                p.r2.serialize_compressed(&mut writer)?;
            }
            Self::Misbehaving(p) => {
                p.t1.serialize_compressed(&mut writer)?;
                p.t2.serialize_compressed(&mut writer)?;
                p.t3.serialize_compressed(&mut writer)?;
                p.c.serialize_compressed(&mut writer)?;
                p.r1.serialize_compressed(&mut writer)?;
            }
        }
        Ok(())
    }
}

/// Verifies the rewrite proof at position `hop` of the pipeline, against the
/// commitment of the server that produced that hop.
pub fn verify_rewrite_proof<G: AffineRepr, D: Digest>(
    context: &AuthenticationContext<G>,
    hop: usize,
    msg: &ServerMessage<G>,
) -> bool {
    let proof = match &msg.proofs[hop] {
        ServerProof::Rewrite(proof) => proof,
        ServerProof::Misbehaving(_) => return false,
    };
    let j = msg.indexes[hop] as usize;
    let chain = &msg.request.commitment_chain;
    if j >= context.num_servers() || j + 2 >= chain.len() {
        return false;
    }
    let previous_tag = if hop == 0 {
        msg.request.initial_tag
    } else {
        msg.tags[hop - 1]
    };
    let tag = msg.tags[hop];

    let t1 = (previous_tag * proof.r1 - tag * proof.r2).into_affine();
    let t2 = (G::generator() * proof.r1 + context.round_commitments[j] * proof.c).into_affine();
    let t3 = (chain[j + 1] * proof.r2 + chain[j + 2] * proof.c).into_affine();

    match rewrite_challenge_bytes(
        &previous_tag,
        &tag,
        &context.round_commitments[j],
        &chain[j + 2],
        &chain[j + 1],
        &t1,
        &t2,
        &t3,
    ) {
        Ok(bytes) => hash_to_scalar::<G::ScalarField, D>(&bytes) == proof.c,
        Err(_) => false,
    }
}

/// Verifies a misbehaviour proof claimed by server `index` against the
/// client's ephemeral key `Z`.
pub fn verify_misbehaving_proof<G: AffineRepr, D: Digest>(
    context: &AuthenticationContext<G>,
    index: ServerId,
    proof: &MisbehavingProof<G>,
    ephemeral: &G,
) -> bool {
    let public_key = match context.server_key(index) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let t1 = (*ephemeral * proof.r1 + proof.t3 * proof.c).into_affine();
    let t2 = (G::generator() * proof.r1 + *public_key * proof.c).into_affine();

    match misbehaving_challenge_bytes(&proof.t3, ephemeral, public_key, &t1, &t2) {
        Ok(bytes) => hash_to_scalar::<G::ScalarField, D>(&bytes) == proof.c,
        Err(_) => false,
    }
}

/// `T_prev ‖ T ‖ R_j ‖ g ‖ S_{j+2} ‖ S_{j+1} ‖ t1 ‖ t2 ‖ t3`
#[allow(clippy::too_many_arguments)]
fn rewrite_challenge_bytes<G: AffineRepr>(
    previous_tag: &G,
    tag: &G,
    round_commitment: &G,
    chain_next: &G,
    chain_current: &G,
    t1: &G,
    t2: &G,
    t3: &G,
) -> Result<Vec<u8>, DagaError> {
    let mut bytes = vec![];
    previous_tag.serialize_compressed(&mut bytes)?;
    tag.serialize_compressed(&mut bytes)?;
    round_commitment.serialize_compressed(&mut bytes)?;
    G::generator().serialize_compressed(&mut bytes)?;
    chain_next.serialize_compressed(&mut bytes)?;
    chain_current.serialize_compressed(&mut bytes)?;
    t1.serialize_compressed(&mut bytes)?;
    t2.serialize_compressed(&mut bytes)?;
    t3.serialize_compressed(&mut bytes)?;
    Ok(bytes)
}

/// `Zs ‖ Z ‖ Y_j ‖ g ‖ t1 ‖ t2`
fn misbehaving_challenge_bytes<G: AffineRepr>(
    exposed: &G,
    ephemeral: &G,
    public_key: &G,
    t1: &G,
    t2: &G,
) -> Result<Vec<u8>, DagaError> {
    let mut bytes = vec![];
    exposed.serialize_compressed(&mut bytes)?;
    ephemeral.serialize_compressed(&mut bytes)?;
    public_key.serialize_compressed(&mut bytes)?;
    G::generator().serialize_compressed(&mut bytes)?;
    t1.serialize_compressed(&mut bytes)?;
    t2.serialize_compressed(&mut bytes)?;
    Ok(bytes)
}

mod serialization {
    use super::{
        AffineRepr, CanonicalDeserialize, CanonicalSerialize, MisbehavingProof, RewriteProof,
        ServerProof,
    };
    use ark_serialize::{Compress, SerializationError, Valid, Validate};
    use ark_std::io::{Read, Write};

    impl<G: AffineRepr> CanonicalSerialize for ServerProof<G> {
        fn serialize_with_mode<W: Write>(
            &self,
            mut writer: W,
            compress: Compress,
        ) -> Result<(), SerializationError> {
            match self {
                Self::Rewrite(proof) => {
                    0u8.serialize_with_mode(&mut writer, compress)?;
                    proof.serialize_with_mode(&mut writer, compress)
                }
                Self::Misbehaving(proof) => {
                    1u8.serialize_with_mode(&mut writer, compress)?;
                    proof.serialize_with_mode(&mut writer, compress)
                }
            }
        }

        fn serialized_size(&self, compress: Compress) -> usize {
            1 + match self {
                Self::Rewrite(proof) => proof.serialized_size(compress),
                Self::Misbehaving(proof) => proof.serialized_size(compress),
            }
        }
    }

    impl<G: AffineRepr> Valid for ServerProof<G> {
        fn check(&self) -> Result<(), SerializationError> {
            match self {
                Self::Rewrite(proof) => proof.check(),
                Self::Misbehaving(proof) => proof.check(),
            }
        }
    }

    impl<G: AffineRepr> CanonicalDeserialize for ServerProof<G> {
        fn deserialize_with_mode<R: Read>(
            mut reader: R,
            compress: Compress,
            validate: Validate,
        ) -> Result<Self, SerializationError> {
            match u8::deserialize_with_mode(&mut reader, compress, validate)? {
                0u8 => Ok(Self::Rewrite(RewriteProof::deserialize_with_mode(
                    reader, compress, validate,
                )?)),
                1u8 => Ok(Self::Misbehaving(MisbehavingProof::deserialize_with_mode(
                    reader, compress, validate,
                )?)),
                _ => Err(SerializationError::InvalidData),
            }
        }
    }
}
