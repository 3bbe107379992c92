// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

//! Core structures for the Alien delegated-proof-of-stake consensus engine.
//!
//! This crate provides the building blocks shared by the snapshot state
//! machine and the engine itself, including:
//! - Primitive aliases such as [`Address`], [`Hash`] and [`Stake`]
//! - Voting intent records ([`Vote`], [`Cancel`], [`Confirmation`]) carried
//!   inside block headers
//! - The block [`Header`] and its seal-truncated signing hash
//! - The [`HeaderExtra`] record embedded between the extra-data vanity
//!   prefix and the seal suffix
//! - Consensus parameters ([`AlienConfig`])
//! - Host interfaces the engine consumes ([`api`])
//!
//! The crate deliberately contains no consensus logic: everything here is
//! data, codecs and seams.

pub mod api;
pub mod config;
pub mod error;
pub mod extra;
pub mod header;
pub mod test_utils;
pub mod types;

pub use config::AlienConfig;
pub use error::CoreError;
pub use extra::{HeaderExtra, EXTRA_SEAL, EXTRA_VANITY};
pub use header::Header;
pub use types::{Address, AppId, Cancel, Confirmation, Hash, SideChainConfirmation, Stake, Transaction, Vote};

use sha3::{Digest, Keccak256};

/// Compute the Keccak-256 digest of `bytes`.
pub fn keccak256(bytes: &[u8]) -> Hash {
    let mut digest = Hash::zero();
    digest.0.copy_from_slice(&Keccak256::digest(bytes));
    digest
}

/// Keccak-256 of the RLP encoding of an empty list; the only uncle hash a
/// valid header may carry.
pub fn empty_uncle_hash() -> Hash {
    keccak256(&rlp::EMPTY_LIST_RLP)
}

/// Current unix timestamp in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
