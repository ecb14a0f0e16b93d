//! Collective challenge generation. Every server commits to a share `k_j` of
//! the challenge, the commitments are signed and exchanged, openings are
//! revealed and checked, and the sum `cs = Σ k_j` circulates through all
//! servers in a round-robin until each has signed it. A client only accepts a
//! challenge endorsed by the full server set.

use crate::{
    context::AuthenticationContext, error::DagaError, serde_utils::ArkObjectBytes,
    signature::ServerSignature,
};
use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::Zero;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::{vec, vec::Vec};
use digest::Digest;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// A server's commitment `C_j = g^{k_j}` to its share of the collective
/// challenge, signed with its long-term key.
#[serde_as]
#[derive(
    Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize,
)]
#[serde(bound = "")]
pub struct Commitment<G: AffineRepr> {
    #[serde_as(as = "ArkObjectBytes")]
    pub commit: G,
    pub sig: ServerSignature<G>,
}

/// The collective challenge while it circulates through the servers. The
/// commitments and openings travel with it so that every signer can recompute
/// the sum instead of trusting the accumulated state.
#[serde_as]
#[derive(
    Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize,
)]
#[serde(bound = "")]
pub struct PendingChallenge<G: AffineRepr> {
    #[serde_as(as = "ArkObjectBytes")]
    pub cs: G::ScalarField,
    pub commitments: Vec<Commitment<G>>,
    #[serde_as(as = "Vec<ArkObjectBytes>")]
    pub openings: Vec<G::ScalarField>,
    pub signatures: Vec<ServerSignature<G>>,
}

/// The client-visible challenge: the scalar and one signature per server.
#[serde_as]
#[derive(
    Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize,
)]
#[serde(bound = "")]
pub struct Challenge<G: AffineRepr> {
    #[serde_as(as = "ArkObjectBytes")]
    pub cs: G::ScalarField,
    pub signatures: Vec<ServerSignature<G>>,
}

/// Bytes covered by every signature endorsing the challenge scalar.
pub fn challenge_signing_bytes<G: AffineRepr>(
    cs: &G::ScalarField,
) -> Result<Vec<u8>, DagaError> {
    let mut bytes = vec![];
    cs.serialize_compressed(&mut bytes)?;
    Ok(bytes)
}

/// Checks that each commitment is signed by the server occupying the same
/// position in the context.
pub fn verify_commitment_signatures<G: AffineRepr, D: Digest>(
    context: &AuthenticationContext<G>,
    commitments: &[Commitment<G>],
) -> Result<(), DagaError> {
    if commitments.len() != context.num_servers() {
        return Err(DagaError::ExpectedSameSizeSequences(
            commitments.len(),
            context.num_servers(),
        ));
    }
    for (j, commitment) in commitments.iter().enumerate() {
        if commitment.sig.index as usize != j {
            return Err(DagaError::WrongSignerIndex(commitment.sig.index, j as u16));
        }
        let mut msg = vec![];
        commitment.commit.serialize_compressed(&mut msg)?;
        if !commitment
            .sig
            .sig
            .verify::<D>(&msg, context.server_key(j as u16)?)
        {
            return Err(DagaError::InvalidSignature(j as u16));
        }
    }
    Ok(())
}

/// Checks every opening against its commitment and returns the collective
/// challenge `cs = Σ k_j`.
pub fn check_openings<G: AffineRepr>(
    context: &AuthenticationContext<G>,
    commitments: &[Commitment<G>],
    openings: &[G::ScalarField],
) -> Result<G::ScalarField, DagaError> {
    if commitments.len() != openings.len() {
        return Err(DagaError::ExpectedSameSizeSequences(
            commitments.len(),
            openings.len(),
        ));
    }
    if commitments.len() != context.num_servers() {
        return Err(DagaError::ExpectedSameSizeSequences(
            commitments.len(),
            context.num_servers(),
        ));
    }
    let mut cs = G::ScalarField::zero();
    for (j, (commitment, opening)) in commitments.iter().zip(openings.iter()).enumerate() {
        if (G::generator() * *opening).into_affine() != commitment.commit {
            return Err(DagaError::OpeningMismatch(j));
        }
        cs += opening;
    }
    Ok(cs)
}

/// Leader entry point of the round-robin: verifies commitment signatures and
/// openings, then wraps the collective challenge for circulation.
pub fn initialize_challenge<G: AffineRepr, D: Digest>(
    context: &AuthenticationContext<G>,
    commitments: Vec<Commitment<G>>,
    openings: Vec<G::ScalarField>,
) -> Result<PendingChallenge<G>, DagaError> {
    verify_commitment_signatures::<G, D>(context, &commitments)?;
    let cs = check_openings(context, &commitments, &openings)?;
    Ok(PendingChallenge {
        cs,
        commitments,
        openings,
        signatures: Vec::new(),
    })
}

/// Projects a fully signed challenge to its client-visible form. The
/// round-robin must have collected a signature from every server.
pub fn finalize_challenge<G: AffineRepr>(
    context: &AuthenticationContext<G>,
    pending: PendingChallenge<G>,
) -> Result<Challenge<G>, DagaError> {
    if pending.signatures.len() != context.num_servers() {
        return Err(DagaError::IncompleteChallenge(
            pending.signatures.len(),
            context.num_servers(),
        ));
    }
    Ok(Challenge {
        cs: pending.cs,
        signatures: pending.signatures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::setup;
    use ark_ec::CurveGroup;
    use ark_secp256r1::{Affine, Fr};
    use ark_std::{
        rand::{rngs::StdRng, SeedableRng},
        UniformRand,
    };
    use blake2::Blake2b512;

    fn commitments_and_openings(
        rng: &mut StdRng,
        servers: &[crate::server::Server<Affine>],
    ) -> (Vec<Commitment<Affine>>, Vec<Fr>) {
        let mut commitments = vec![];
        let mut openings = vec![];
        for server in servers {
            let (commitment, opening) = server.generate_commitment::<_, Blake2b512>(rng).unwrap();
            commitments.push(commitment);
            openings.push(opening);
        }
        (commitments, openings)
    }

    #[test]
    fn commitments_verify_and_openings_sum() {
        let mut rng = StdRng::seed_from_u64(20u64);
        let (_, servers, context) = setup(&mut rng, 2, 4);
        let (commitments, openings) = commitments_and_openings(&mut rng, &servers);

        verify_commitment_signatures::<_, Blake2b512>(&context, &commitments).unwrap();
        let cs = check_openings(&context, &commitments, &openings).unwrap();
        assert_eq!(cs, openings.iter().sum::<Fr>());

        // a commitment claiming the wrong slot
        let mut swapped = commitments.clone();
        swapped.swap(1, 2);
        assert!(matches!(
            verify_commitment_signatures::<_, Blake2b512>(&context, &swapped),
            Err(DagaError::WrongSignerIndex(2, 1))
        ));

        // a substituted commitment no longer matches its signature
        let mut forged = commitments.clone();
        forged[0].commit = (Affine::generator() * Fr::rand(&mut rng)).into_affine();
        assert!(matches!(
            verify_commitment_signatures::<_, Blake2b512>(&context, &forged),
            Err(DagaError::InvalidSignature(0))
        ));

        // an opening that does not open its commitment
        let mut bad_openings = openings.clone();
        bad_openings.swap(0, 3);
        assert!(matches!(
            check_openings(&context, &commitments, &bad_openings),
            Err(DagaError::OpeningMismatch(0))
        ));

        assert!(check_openings(&context, &commitments, &openings[..3]).is_err());
    }

    #[test]
    fn round_robin_collects_one_signature_per_server() {
        let mut rng = StdRng::seed_from_u64(21u64);
        let (_, servers, context) = setup(&mut rng, 2, 3);
        let (commitments, openings) = commitments_and_openings(&mut rng, &servers);
        let mut pending =
            initialize_challenge::<_, Blake2b512>(&context, commitments, openings).unwrap();
        assert!(pending.signatures.is_empty());

        // finishing early is rejected
        assert!(matches!(
            finalize_challenge(&context, pending.clone()),
            Err(DagaError::IncompleteChallenge(0, 3))
        ));

        for server in &servers {
            server
                .sign_challenge::<_, Blake2b512>(&mut rng, &context, &mut pending)
                .unwrap();
        }
        assert_eq!(pending.signatures.len(), 3);

        // the leader closes the ring with a verification-only pass
        servers[0]
            .sign_challenge::<_, Blake2b512>(&mut rng, &context, &mut pending)
            .unwrap();
        assert_eq!(pending.signatures.len(), 3);

        let challenge = finalize_challenge(&context, pending.clone()).unwrap();
        assert_eq!(challenge.cs, pending.cs);
        crate::test_serialization!(Challenge<Affine>, challenge);
        crate::test_serialization!(PendingChallenge<Affine>, pending);
    }

    #[test]
    fn round_robin_rejects_duplicates_and_tampering() {
        let mut rng = StdRng::seed_from_u64(22u64);
        let (_, servers, context) = setup(&mut rng, 2, 3);
        let (commitments, openings) = commitments_and_openings(&mut rng, &servers);
        let mut pending =
            initialize_challenge::<_, Blake2b512>(&context, commitments, openings).unwrap();

        // a tampered scalar is caught before anyone signs
        let mut tampered = pending.clone();
        tampered.cs += Fr::from(1u64);
        assert!(matches!(
            servers[0].sign_challenge::<_, Blake2b512>(&mut rng, &context, &mut tampered),
            Err(DagaError::ChallengeMismatch)
        ));

        servers[0]
            .sign_challenge::<_, Blake2b512>(&mut rng, &context, &mut pending)
            .unwrap();

        // the same signature injected twice
        let mut duplicated = pending.clone();
        let repeat = duplicated.signatures[0].clone();
        duplicated.signatures.push(repeat);
        assert!(matches!(
            servers[1].sign_challenge::<_, Blake2b512>(&mut rng, &context, &mut duplicated),
            Err(DagaError::DuplicateSigner(0))
        ));

        // a server asked to sign twice refuses
        assert!(matches!(
            servers[0].sign_challenge::<_, Blake2b512>(&mut rng, &context, &mut pending),
            Err(DagaError::DuplicateSigner(0))
        ));

        // a forged signature in the accumulated list
        let mut forged = pending.clone();
        forged.signatures[0].sig.response += Fr::from(1u64);
        assert!(matches!(
            servers[1].sign_challenge::<_, Blake2b512>(&mut rng, &context, &mut forged),
            Err(DagaError::InvalidSignature(0))
        ));
    }
}
