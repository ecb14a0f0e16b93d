use crate::{error::DagaError, hashing::hash_to_point, serde_utils::ArkObjectBytes};
use ark_ec::AffineRepr;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::{cfg_into_iter, io::Write, vec, vec::Vec};
use digest::Digest;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub type ClientId = u16;
pub type ServerId = u16;

/// Domain tag under which per-client generators are derived.
const GENERATOR_DOMAIN: &[u8] = b"daga-client-generator";

/// Client (`X`) and server (`Y`) public keys admitted to an authentication
/// context. Positions double as member indices.
#[serde_as]
#[derive(
    Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize,
)]
pub struct Members<G: AffineRepr> {
    #[serde_as(as = "Vec<ArkObjectBytes>")]
    pub clients: Vec<G>,
    #[serde_as(as = "Vec<ArkObjectBytes>")]
    pub servers: Vec<G>,
}

/// Immutable per-session bundle: the member roster, each server's per-round
/// commitment `R_j = g^{r_j}` and each client's generator `h_i`. Created once
/// by whoever gathers the roster and commitments, then only read.
#[serde_as]
#[derive(
    Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize, Serialize, Deserialize,
)]
#[serde(bound = "")]
pub struct AuthenticationContext<G: AffineRepr> {
    pub members: Members<G>,
    /// Per-round server commitments, one per server
    #[serde_as(as = "Vec<ArkObjectBytes>")]
    pub round_commitments: Vec<G>,
    /// Per-client generators, derived from the client index and the
    /// commitment vector
    #[serde_as(as = "Vec<ArkObjectBytes>")]
    pub generators: Vec<G>,
}

impl<G: AffineRepr> Members<G> {
    pub fn new(clients: Vec<G>, servers: Vec<G>) -> Result<Self, DagaError> {
        if clients.is_empty() || servers.is_empty() {
            return Err(DagaError::EmptyMembers);
        }
        Ok(Self { clients, servers })
    }
}

impl<G: AffineRepr> AuthenticationContext<G> {
    /// Assembles a context from the roster and the published round
    /// commitments, deriving the per-client generators.
    pub fn new<D: Digest>(members: Members<G>, round_commitments: Vec<G>) -> Result<Self, DagaError> {
        if members.clients.is_empty() || members.servers.is_empty() {
            return Err(DagaError::EmptyMembers);
        }
        if round_commitments.len() != members.servers.len() {
            return Err(DagaError::ExpectedSameSizeSequences(
                round_commitments.len(),
                members.servers.len(),
            ));
        }
        let generators = cfg_into_iter!(0..members.clients.len())
            .map(|i| client_generator::<G, D>(i as ClientId, &round_commitments))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            members,
            round_commitments,
            generators,
        })
    }

    pub fn num_clients(&self) -> usize {
        self.members.clients.len()
    }

    pub fn num_servers(&self) -> usize {
        self.members.servers.len()
    }

    pub fn client_key(&self, index: ClientId) -> Result<&G, DagaError> {
        self.members
            .clients
            .get(index as usize)
            .ok_or(DagaError::InvalidClientIndex(index, self.num_clients()))
    }

    pub fn server_key(&self, index: ServerId) -> Result<&G, DagaError> {
        self.members
            .servers
            .get(index as usize)
            .ok_or(DagaError::InvalidServerIndex(index, self.num_servers()))
    }

    /// Canonical byte encoding for signing and hashing: `X ‖ Y ‖ H ‖ R`,
    /// compressed elements, no length prefixes.
    pub fn write_canonical<W: Write>(&self, mut writer: W) -> Result<(), DagaError> {
        for x in &self.members.clients {
            x.serialize_compressed(&mut writer)?;
        }
        for y in &self.members.servers {
            y.serialize_compressed(&mut writer)?;
        }
        for h in &self.generators {
            h.serialize_compressed(&mut writer)?;
        }
        for r in &self.round_commitments {
            r.serialize_compressed(&mut writer)?;
        }
        Ok(())
    }
}

/// Derives the generator `h_i` for client `i`. Depends only on the client
/// index and the commitment vector, so every participant computes the same
/// generators from the public context.
pub fn client_generator<G: AffineRepr, D: Digest>(
    index: ClientId,
    round_commitments: &[G],
) -> Result<G, DagaError> {
    let mut bytes = vec![];
    bytes.extend_from_slice(&(index as u32).to_be_bytes());
    for r in round_commitments {
        r.serialize_compressed(&mut bytes)?;
    }
    Ok(hash_to_point::<G, D>(GENERATOR_DOMAIN, &bytes))
}
