// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

//! Read-only snapshot queries, the backing logic of the host's RPC
//! namespace. Each query has a side-chain variant keyed by application id,
//! resolved through the engine's [`ChainBackend`] capability.

use crate::{Alien, EngineError, DEFAULT_LOOP_CNT_RECALCULATE_SIGNERS};
use ahash::HashMap;
use ufo_alien_core::api::ChainReader;
use ufo_alien_core::{Address, Hash, Header, Stake, Vote};
use ufo_alien_snapshot::Snapshot;

/// The user-facing query API over one engine instance and its chain.
pub struct Api<'a> {
    pub chain: &'a dyn ChainReader,
    pub alien: &'a Alien,
}

impl<'a> Api<'a> {
    fn snapshot_for(&self, header: &Header) -> Result<Snapshot, EngineError> {
        self.alien.snapshot(
            self.chain,
            header.number,
            header.hash(),
            Vec::new(),
            &[],
            DEFAULT_LOOP_CNT_RECALCULATE_SIGNERS,
        )
    }

    /// The snapshot at the given height, or at the chain head.
    pub fn snapshot_at(&self, number: Option<u64>) -> Result<Snapshot, EngineError> {
        let header = match number {
            Some(number) => self.chain.header_by_number(number),
            None => self.chain.current_header(),
        }
        .ok_or(EngineError::UnknownBlock)?;
        self.snapshot_for(&header)
    }

    pub fn snapshot_at_hash(&self, hash: &Hash) -> Result<Snapshot, EngineError> {
        let header = self.chain.header_by_hash(hash).ok_or(EngineError::UnknownBlock)?;
        self.snapshot_for(&header)
    }

    /// The snapshot whose header time covers `target_time`, i.e. the header
    /// with `time <= target_time < time + period`, found by binary search.
    pub fn snapshot_by_header_time(&self, target_time: u64) -> Result<Snapshot, EngineError> {
        let period = self.chain.config().period.max(1);
        let mut header = self.chain.current_header().ok_or(EngineError::UnknownBlock)?;
        if target_time > header.time + period {
            return Err(EngineError::UnknownBlock);
        }

        let mut min_number = 0u64;
        let mut max_number = header.number;
        loop {
            if target_time >= header.time && target_time < header.time + period {
                return self.snapshot_for(&header);
            }
            if max_number == min_number || max_number == min_number + 1 {
                break;
            }
            // jump by the time delta in periods, falling back to bisection
            // whenever the estimate leaves the open interval
            let estimated =
                header.number as i128 + (target_time as i128 - header.time as i128) / period as i128;
            let next = if estimated >= max_number as i128 || estimated <= min_number as i128 {
                (max_number + min_number) / 2
            } else {
                estimated as u64
            };
            header = match self.chain.header_by_number(next) {
                Some(header) => header,
                None => break,
            };
            if header.time >= target_time {
                if header.number < max_number {
                    max_number = header.number;
                }
            } else if header.number > min_number {
                min_number = header.number;
            }
        }
        Err(EngineError::UnknownBlock)
    }

    /// The stake an address has locked behind its active vote.
    pub fn freeze_balance(&self, address: &Address) -> Result<Option<Stake>, EngineError> {
        let snap = self.snapshot_at(None)?;
        Ok(snap.votes.get(address).map(|vote| vote.stake.clone()))
    }

    /// Seconds until a cancelling address gets its stake back; `None` when
    /// it has no pending cancel.
    pub fn remaining_freeze_time(&self, address: &Address) -> Result<Option<u64>, EngineError> {
        let snap = self.snapshot_at(None)?;
        Ok(remaining_freeze_seconds(&snap, address))
    }

    pub fn vote(&self, address: &Address) -> Result<Option<Vote>, EngineError> {
        let snap = self.snapshot_at(None)?;
        Ok(snap.votes.get(address).cloned())
    }

    pub fn tally(&self, address: &Address) -> Result<Option<Stake>, EngineError> {
        let snap = self.snapshot_at(None)?;
        Ok(snap.tally.get(address).cloned())
    }

    /// The full candidate-to-stake map.
    pub fn candidates_and_tally(&self) -> Result<HashMap<Address, Stake>, EngineError> {
        Ok(self.snapshot_at(None)?.tally)
    }

    fn side_snapshot(&self, app_id: &str) -> Result<Snapshot, EngineError> {
        self.alien
            .backend()
            .and_then(|backend| backend.side_chain_snapshot(app_id))
            .ok_or(EngineError::UnknownBlock)
    }

    pub fn side_freeze_balance(&self, app_id: &str, address: &Address) -> Result<Option<Stake>, EngineError> {
        let snap = self.side_snapshot(app_id)?;
        Ok(snap.votes.get(address).map(|vote| vote.stake.clone()))
    }

    pub fn side_remaining_freeze_time(&self, app_id: &str, address: &Address) -> Result<Option<u64>, EngineError> {
        let snap = self.side_snapshot(app_id)?;
        Ok(remaining_freeze_seconds(&snap, address))
    }

    pub fn side_vote(&self, app_id: &str, address: &Address) -> Result<Option<Vote>, EngineError> {
        let snap = self.side_snapshot(app_id)?;
        Ok(snap.votes.get(address).cloned())
    }

    pub fn side_tally(&self, app_id: &str, address: &Address) -> Result<Option<Stake>, EngineError> {
        let snap = self.side_snapshot(app_id)?;
        Ok(snap.tally.get(address).cloned())
    }

    pub fn side_candidates_and_tally(&self, app_id: &str) -> Result<HashMap<Address, Stake>, EngineError> {
        Ok(self.side_snapshot(app_id)?.tally)
    }

    pub fn side_snapshot_at(&self, app_id: &str) -> Result<Snapshot, EngineError> {
        self.side_snapshot(app_id)
    }

    pub fn side_snapshot_at_number(&self, app_id: &str, number: u64) -> Result<Snapshot, EngineError> {
        self.alien
            .backend()
            .and_then(|backend| backend.side_chain_snapshot_at_number(app_id, number))
            .ok_or(EngineError::UnknownBlock)
    }
}

fn remaining_freeze_seconds(snap: &Snapshot, address: &Address) -> Option<u64> {
    let cancelled_at = snap.cancelers.get(address)?;
    let unfreeze_at = cancelled_at + snap.config.freeze_blocks();
    Some(unfreeze_at.saturating_sub(snap.number) * snap.config.period)
}
