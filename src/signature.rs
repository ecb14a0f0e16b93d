use crate::{context::ServerId, hashing::hash_to_scalar, serde_utils::ArkObjectBytes};
use ark_ec::{AffineRepr, CurveGroup};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::{rand::RngCore, vec, UniformRand};
use digest::Digest;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// Schnorr signature over the protocol group, always under the group generator.
#[serde_as]
#[derive(
    Clone, PartialEq, Eq, Debug, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize,
)]
pub struct SchnorrSignature<G: AffineRepr> {
    #[serde_as(as = "ArkObjectBytes")]
    pub response: G::ScalarField,
    #[serde_as(as = "ArkObjectBytes")]
    pub challenge: G::ScalarField,
}

impl<G: AffineRepr> SchnorrSignature<G> {
    pub fn new<R: RngCore, D: Digest>(
        rng: &mut R,
        message: &[u8],
        secret_key: &G::ScalarField,
    ) -> Self {
        let r = G::ScalarField::rand(rng);
        let t = (G::generator() * r).into_affine();
        let challenge = Self::compute_challenge::<D>(&t, message);
        let response = r + challenge * secret_key;
        Self {
            response,
            challenge,
        }
    }

    pub fn verify<D: Digest>(&self, message: &[u8], public_key: &G) -> bool {
        let t = (G::generator() * self.response - *public_key * self.challenge).into_affine();
        let challenge = Self::compute_challenge::<D>(&t, message);
        challenge == self.challenge
    }

    fn compute_challenge<D: Digest>(t: &G, message: &[u8]) -> G::ScalarField {
        let mut challenge_bytes = vec![];
        t.serialize_compressed(&mut challenge_bytes).unwrap();
        challenge_bytes.extend_from_slice(message);
        hash_to_scalar::<G::ScalarField, D>(&challenge_bytes)
    }
}

/// A signature together with the index of the server that produced it. Used on
/// challenge-generation commitments, on the collective challenge and on every
/// pipeline hop.
#[derive(
    Clone, PartialEq, Eq, Debug, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize,
)]
#[serde(bound = "")]
pub struct ServerSignature<G: AffineRepr> {
    pub index: ServerId,
    pub sig: SchnorrSignature<G>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_secp256r1::{Affine, Fr};
    use ark_std::rand::{rngs::StdRng, SeedableRng};
    use blake2::Blake2b512;

    #[test]
    fn sign_and_verify() {
        let mut rng = StdRng::seed_from_u64(0u64);
        let message = vec![1, 2, 3, 4];
        let sk = Fr::rand(&mut rng);
        let pk = (Affine::generator() * sk).into_affine();
        let sig = SchnorrSignature::new::<_, Blake2b512>(&mut rng, &message, &sk);
        assert!(sig.verify::<Blake2b512>(&message, &pk));
        assert!(!sig.verify::<Blake2b512>(&[1, 2, 3], &pk));

        let other_pk = (Affine::generator() * Fr::rand(&mut rng)).into_affine();
        assert!(!sig.verify::<Blake2b512>(&message, &other_pk));
    }

    #[test]
    fn tampered_signature_fails() {
        let mut rng = StdRng::seed_from_u64(1u64);
        let message = b"collective challenge".to_vec();
        let sk = Fr::rand(&mut rng);
        let pk = (Affine::generator() * sk).into_affine();
        let mut sig = SchnorrSignature::<Affine>::new::<_, Blake2b512>(&mut rng, &message, &sk);
        sig.response += Fr::from(1u64);
        assert!(!sig.verify::<Blake2b512>(&message, &pk));
    }
}
