use thiserror::Error;
use uuid::Uuid;

/// Synchronous rejections from the local stores. These never involve I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpaceError {
    #[error("thought {0} not found")]
    UnknownThought(Uuid),

    #[error("chain {0} not found")]
    UnknownChain(Uuid),

    #[error("link {0} not found")]
    UnknownLink(Uuid),

    #[error("thought {0} is not active")]
    NotActive(Uuid),

    #[error("thought {0} is not anchored")]
    NotAnchored(Uuid),

    #[error("a chain cannot link to itself")]
    SelfLink,

    #[error("chains {0} and {1} are already linked")]
    DuplicateLink(Uuid, Uuid),
}
