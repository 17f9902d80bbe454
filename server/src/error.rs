use thiserror::Error;

/// Recoverable rejections from the simulation. Neither variant mutates the
/// world.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("Already joined")]
    AlreadyJoined,

    #[error("Not joined")]
    NotJoined,
}
