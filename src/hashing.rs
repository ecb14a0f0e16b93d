#![allow(non_snake_case)]

use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::PrimeField;
use ark_std::vec::Vec;
use digest::Digest;

/// Hash arbitrary bytes to a scalar using try-and-increment. Only ever used on
/// public inputs (challenges, shared-secret digests), so the variable runtime
/// leaks nothing useful.
pub fn hash_to_scalar<F: PrimeField, D: Digest>(bytes: &[u8]) -> F {
    let mut hash = D::digest(bytes);
    let mut f = F::from_random_bytes(&hash);
    let mut j = 1u64;
    while f.is_none() {
        let counter = j.to_le_bytes();
        hash = D::digest(&[bytes, b"-attempt-".as_slice(), counter.as_slice()].concat());
        f = F::from_random_bytes(&hash);
        j += 1;
    }
    f.unwrap()
}

/// Hash a domain tag and arbitrary bytes to a group element using
/// try-and-increment, clearing the cofactor so the result lands in the
/// prime-order subgroup.
pub fn hash_to_point<G: AffineRepr, D: Digest>(domain: &[u8], bytes: &[u8]) -> G {
    let input: Vec<u8> = [domain, bytes].concat();
    let mut hash = D::digest(&input);
    let mut g = G::from_random_bytes(&hash);
    let mut j = 1u64;
    while g.is_none() {
        let counter = j.to_le_bytes();
        hash = D::digest(&[input.as_slice(), b"-attempt-".as_slice(), counter.as_slice()].concat());
        g = G::from_random_bytes(&hash);
        j += 1;
    }
    g.unwrap().mul_by_cofactor_to_group().into_affine()
}
