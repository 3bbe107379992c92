// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

//! The signer-queue election.
//!
//! Once per loop the snapshot turns its weighted tally into the next
//! producer order. Stake is weighted by signer credit, ranked descending
//! with a descending address tie-break, paired positionally with recent
//! block hashes and re-sorted by those hashes to mix per-loop entropy into
//! the order while staying fully deterministic.

use crate::{Snapshot, SnapshotError, DEFAULT_FULL_CREDIT, MIN_CAL_SIGNER_QUEUE_CREDIT};
use num_traits::Signed;
use std::cmp::Ordering;
use ufo_alien_core::{Address, Hash, Stake};

/// Side chains with an application id at or below this bound may fall back
/// to the main chain's producers while they have no candidates.
pub const SIDE_CHAIN_APP_ID_LIMIT: u64 = 100;

/// A capability handing the election access to other chains' snapshots.
///
/// Passed in by the host rather than held globally, so a side-chain engine
/// instance is explicit about its dependency on the main chain.
pub trait ChainBackend: Send + Sync {
    fn main_chain_snapshot(&self) -> Option<Snapshot>;
    fn side_chain_snapshot(&self, app_id: &str) -> Option<Snapshot>;
    fn side_chain_snapshot_at_number(&self, _app_id: &str, _number: u64) -> Option<Snapshot> {
        None
    }
}

/// A candidate and its credit-weighted stake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TallyItem {
    pub address: Address,
    pub stake: Stake,
}

impl Ord for TallyItem {
    /// Descending by weighted stake, ties broken by address bytes
    /// descending. Both directions are consensus-visible.
    fn cmp(&self, other: &Self) -> Ordering {
        match self.stake.cmp(&other.stake) {
            Ordering::Greater => Ordering::Less,
            Ordering::Less => Ordering::Greater,
            Ordering::Equal => other.address.cmp(&self.address),
        }
    }
}

impl PartialOrd for TallyItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A selected producer paired with the history hash of its rank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignerItem {
    pub address: Address,
    pub hash: Hash,
}

impl Ord for SignerItem {
    /// Descending by hash bytes: the block-hash mixing step.
    fn cmp(&self, other: &Self) -> Ordering {
        other.hash.cmp(&self.hash)
    }
}

impl PartialOrd for SignerItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Snapshot {
    /// Rank candidates by stake weighted with signer credit.
    ///
    /// A punished signer keeps at least [`MIN_CAL_SIGNER_QUEUE_CREDIT`] of
    /// its [`DEFAULT_FULL_CREDIT`] weight; non-positive tallies never rank.
    pub fn build_tally_slice(&self) -> Vec<TallyItem> {
        let mut slice = Vec::new();
        for (address, stake) in &self.tally {
            if !stake.is_positive() {
                continue;
            }
            let credit = match self.punished.get(address) {
                Some(&debt) if debt > DEFAULT_FULL_CREDIT - MIN_CAL_SIGNER_QUEUE_CREDIT => {
                    MIN_CAL_SIGNER_QUEUE_CREDIT
                }
                Some(&debt) => DEFAULT_FULL_CREDIT - debt,
                None => DEFAULT_FULL_CREDIT,
            };
            slice.push(TallyItem {
                address: *address,
                stake: stake.clone() * credit,
            });
        }
        slice
    }

    /// Produce the ordered queue for the next loop.
    ///
    /// Allowed only at a loop boundary on a snapshot whose own hash is the
    /// latest history entry. Every `lcrs`-th loop the ranking is rebuilt
    /// from the tally; other loops re-shuffle the standing signers.
    pub fn create_signer_queue(
        &self,
        backend: Option<&dyn ChainBackend>,
    ) -> Result<Vec<Address>, SnapshotError> {
        if (self.number + 1) % self.config.max_signer_count != 0
            || self.history_hash.last() != Some(&self.hash)
        {
            return Err(SnapshotError::CreateSignerQueueNotAllowed);
        }

        let mut paired: Vec<SignerItem> = Vec::new();
        let recalculate =
            self.lcrs != 0 && (self.number + 1) % (self.config.max_signer_count * self.lcrs) == 0;
        if recalculate {
            let mut ranking = self.build_tally_slice();
            ranking.sort();
            let queue_length = (self.config.max_signer_count as usize).min(ranking.len());
            for (i, item) in ranking[..queue_length].iter().enumerate() {
                paired.push(SignerItem {
                    address: item.address,
                    hash: self.history_hash[self.history_hash.len() - 1 - i],
                });
            }
        } else {
            for (i, signer) in self.signers.iter().enumerate() {
                paired.push(SignerItem {
                    address: *signer,
                    hash: self.history_hash[self.history_hash.len() - 1 - i],
                });
            }
        }
        paired.sort();

        if paired.is_empty() {
            paired = self.main_chain_fallback(backend)?;
        }

        let mut queue = Vec::with_capacity(self.config.max_signer_count as usize);
        for i in 0..self.config.max_signer_count as usize {
            queue.push(paired[i % paired.len()].address);
        }
        Ok(queue)
    }

    /// A side chain without candidates borrows the main chain's producers,
    /// if its application id is whitelisted and a backend is wired up.
    fn main_chain_fallback(
        &self,
        backend: Option<&dyn ChainBackend>,
    ) -> Result<Vec<SignerItem>, SnapshotError> {
        let whitelisted = self
            .config
            .app_id
            .parse::<u64>()
            .map_or(false, |id| id <= SIDE_CHAIN_APP_ID_LIMIT);
        if !whitelisted {
            return Err(SnapshotError::SignerQueueEmpty);
        }
        let main_snap = backend
            .and_then(|b| b.main_chain_snapshot())
            .ok_or(SnapshotError::SignerQueueEmpty)?;

        let mut paired: Vec<SignerItem> = main_snap
            .signers
            .iter()
            .enumerate()
            .map(|(i, signer)| SignerItem {
                address: *signer,
                hash: self.history_hash[self.history_hash.len() - 1 - i],
            })
            .collect();
        paired.sort();
        if paired.is_empty() {
            return Err(SnapshotError::SignerQueueEmpty);
        }
        Ok(paired)
    }

    /// Check a queue proposed by a header against the election result.
    pub fn verify_signer_queue(
        &self,
        signer_queue: &[Address],
        backend: Option<&dyn ChainBackend>,
    ) -> Result<(), SnapshotError> {
        if signer_queue.len() > self.config.max_signer_count as usize {
            return Err(SnapshotError::InvalidSignerQueue);
        }
        let expected = self.create_signer_queue(backend)?;
        if expected.is_empty() || expected.len() != signer_queue.len() || expected != signer_queue {
            return Err(SnapshotError::InvalidSignerQueue);
        }
        Ok(())
    }
}
