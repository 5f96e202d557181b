// Construction-time errors.
//
// Nothing in the per-frame simulation returns these: missing paths, stuck
// agents and degenerate geometry are ordinary outcomes and are absorbed into
// agent state. Only building a world, a config or a simulation can fail.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    #[error("invalid configuration: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: &'static str },

    #[error("surface has no tiles")]
    EmptyWorld,

    #[error("tile {tile} lists neighbour {neighbor} which does not exist")]
    InvalidTopology { tile: usize, neighbor: usize },

    #[error("surface data length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

pub type SimResult<T> = Result<T, SimError>;
