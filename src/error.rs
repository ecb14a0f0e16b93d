use crate::context::{ClientId, ServerId};
use ark_serialize::SerializationError;

#[derive(Debug)]
pub enum DagaError {
    InvalidClientIndex(ClientId, usize),
    InvalidServerIndex(ServerId, usize),
    EmptyMembers,
    MissingRoundSecret,
    ExpectedSameSizeSequences(usize, usize),
    MalformedClientMessage,
    DegenerateSharedSecret,
    InvalidSignature(ServerId),
    WrongSignerIndex(ServerId, ServerId),
    InvalidClientProof,
    InvalidServerProof(usize),
    DuplicateSigner(ServerId),
    RepeatedServerIndex(ServerId),
    TooManyHops(usize, usize),
    IncompletePipeline(usize, usize),
    OpeningMismatch(usize),
    ChallengeMismatch,
    IncompleteChallenge(usize, usize),
    Serialization(SerializationError),
}

impl From<SerializationError> for DagaError {
    fn from(e: SerializationError) -> Self {
        Self::Serialization(e)
    }
}
