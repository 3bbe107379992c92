// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;
use ufo_alien_core::CoreError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// The voting state was asked to advance over out-of-range or
    /// non-contiguous headers.
    #[error("invalid voting chain")]
    InvalidVotingChain,

    /// A header was signed by an entity other than its declared coinbase.
    #[error("unauthorized")]
    Unauthorized,

    /// The tally table diverged from the votes and cancels backing it.
    #[error("incorrect tally count")]
    IncorrectTallyCount,

    /// Queue election requested away from a loop boundary, or on a snapshot
    /// whose hash is not the latest history entry.
    #[error("create signer queue not allowed")]
    CreateSignerQueueNotAllowed,

    /// No candidate was available to fill the queue.
    #[error("signer queue is empty")]
    SignerQueueEmpty,

    /// A header carried a signer queue that does not match the election.
    #[error("invalid signer queue")]
    InvalidSignerQueue,

    /// The persisted snapshot blob could not be encoded or decoded.
    #[error("snapshot persistence failed: {0}")]
    Persistence(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}
