// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;
use ufo_alien_core::CoreError;
use ufo_alien_snapshot::SnapshotError;

/// Everything that can mark a block invalid. Kept private to the engine's
/// callers as values, never as strings, so hosts can match on them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The requested block is not part of the local chain.
    #[error("unknown block")]
    UnknownBlock,

    /// The header's timestamp is ahead of wall-clock time.
    #[error("block in the future")]
    FutureBlock,

    /// The extra-data section is shorter than the 32-byte signer vanity.
    #[error("extra-data 32 byte vanity prefix missing")]
    MissingVanity,

    /// The extra-data section doesn't contain a 65-byte seal.
    #[error("extra-data 65 byte suffix signature missing")]
    MissingSignature,

    /// The mix digest must be zero; there is no fork protection here.
    #[error("non-zero mix digest")]
    InvalidMixDigest,

    /// Uncles are meaningless outside of proof-of-work.
    #[error("non empty uncle hash")]
    InvalidUncleHash,

    /// The header's timestamp precedes its parent's.
    #[error("invalid timestamp")]
    InvalidTimestamp,

    /// The parent of the verified header is missing.
    #[error("unknown ancestor")]
    UnknownAncestor,

    /// The header's missed-signer list doesn't match the recomputed one.
    #[error("punished signer missing")]
    PunishedMissing,

    /// Sealing an empty block on a zero-period chain is refused.
    #[error("waiting for transactions")]
    WaitTransactions,

    /// Wrong signer, out of turn, or author/coinbase mismatch.
    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Core(#[from] CoreError),
}
