use thiserror::Error;

/// Map load failures. Everything past loading answers with sentinels instead.
#[derive(Debug, Error)]
pub enum CmError {
    #[error("{name}: file too short ({len} bytes)")]
    Truncated { name: String, len: usize },

    #[error("{name}: not an IBSP file")]
    BadIdent { name: String },

    #[error("{name} has wrong version number ({found} should be {expected})")]
    BadVersion {
        name: String,
        found: i32,
        expected: i32,
    },

    #[error("funny lump size in {lump}")]
    FunnyLumpSize { lump: &'static str },

    #[error("{lump} lump extends past end of file")]
    LumpOutOfBounds { lump: &'static str },

    #[error("map has too many {what} ({count} > {max})")]
    TooMany {
        what: &'static str,
        count: usize,
        max: usize,
    },

    #[error("map with no {what}")]
    Empty { what: &'static str },

    #[error("bad {what} index {index} (limit {limit})")]
    BadIndex {
        what: &'static str,
        index: i64,
        limit: usize,
    },

    #[error("node {node} has more than one parent")]
    SharedNode { node: usize },

    #[error("node {node} lies on a cycle")]
    NodeCycle { node: usize },

    #[error("map leaf 0 is not CONTENTS_SOLID")]
    LeafZeroNotSolid,

    #[error("portal state: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CmError>;

/// `ensure!`-style guard for index validation.
pub(crate) fn check_index(what: &'static str, index: i64, limit: usize) -> Result<usize> {
    if index < 0 || index as u64 >= limit as u64 {
        return Err(CmError::BadIndex { what, index, limit });
    }
    Ok(index as usize)
}
