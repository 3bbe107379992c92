// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

//! The voting-state snapshot of the Alien delegated-proof-of-stake engine.
//!
//! This crate provides:
//! - [`Snapshot`]: the authoritative state of votes, tallies, cancels,
//!   confirmations and punishment credits at a given block
//! - `Snapshot::apply`: advancing a snapshot over a run of consecutive
//!   headers, all-or-nothing
//! - The signer-queue election ([`queue`]) recomputing the producer order
//!   from weighted stake at loop boundaries
//! - JSON persistence of snapshots keyed by block hash
//!
//! `apply` never mutates the snapshot it is called on: it deep-copies,
//! advances the copy and hands it back, so a failure leaves the caller's
//! state untouched and concurrent readers are never exposed to partial
//! updates.

pub mod error;
pub mod queue;

pub use error::SnapshotError;
pub use queue::{ChainBackend, SignerItem, TallyItem};

use ahash::HashMap;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};
use ufo_alien_core::api::{AuthorRecovery, KeyValueStore};
use ufo_alien_core::types::stringify_map;
use ufo_alien_core::{Address, AlienConfig, Cancel, Confirmation, Hash, Header, HeaderExtra, Stake, Vote};

/// Full credit of a signer that never missed a seal.
pub const DEFAULT_FULL_CREDIT: u64 = 1000;
/// Credit debt added for each missed seal.
pub const MISSING_PUBLISH_CREDIT: u64 = 100;
/// Credit recovered by sealing a block.
pub const SIGN_REWARD_CREDIT: u64 = 100;
/// Credit every punished signer recovers per observed block.
pub const AUTO_REWARD_CREDIT: u64 = 1;
/// Lower bound of the credit weight used in the queue election.
pub const MIN_CAL_SIGNER_QUEUE_CREDIT: u64 = 300;
/// Punishment never exceeds ten full credits.
pub const PUNISH_CREDIT_CAP: u64 = 10 * DEFAULT_FULL_CREDIT;
/// Height from which voters in a cancelling state stop earning rewards.
pub const REWARD_CANCEL_CUTOFF: u64 = 1_507_109;

/// Key prefix of persisted snapshot blobs in the embedded store.
pub const SNAPSHOT_KEY_PREFIX: &[u8] = b"alien-";

/// The state of the authorization voting at a given point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Consensus parameters; re-supplied on load, never persisted.
    #[serde(skip)]
    pub config: AlienConfig,
    /// Loop count to recalculate signers from the top tally.
    #[serde(skip)]
    pub lcrs: u64,

    pub period: u64,
    /// Block number where the snapshot was created.
    pub number: u64,
    /// Latest block known confirmed when the snapshot was created.
    pub confirmed_number: u64,
    /// Block hash where the snapshot was created.
    pub hash: Hash,
    /// Block hashes of the two most recent loops, oldest first.
    pub history_hash: Vec<Hash>,
    /// Signer queue of the current header.
    pub signers: Vec<Address>,
    /// Active votes keyed by voter.
    pub votes: HashMap<Address, Vote>,
    /// Summed stake per candidate.
    #[serde(with = "stringify_map")]
    pub tally: HashMap<Address, Stake>,
    /// Block number at which each voter last voted.
    pub voters: HashMap<Address, u64>,
    /// Pending cancellations keyed by canceler.
    pub cancels: HashMap<Address, Cancel>,
    /// Block number at which each canceler cancelled.
    pub cancelers: HashMap<Address, u64>,
    /// Inbound votes per candidate.
    pub candidates: HashMap<Address, Vec<Vote>>,
    /// Credit debt per signer for missed seals.
    pub punished: HashMap<Address, u64>,
    /// Signers that confirmed each block number.
    #[serde(rename = "confirms")]
    pub confirmations: HashMap<u64, Vec<Address>>,
    /// Timestamp of the current header.
    pub header_time: u64,
    /// Start timestamp of the current loop.
    pub loop_start_time: u64,
}

impl Snapshot {
    /// Build the height-zero snapshot from the genesis self-vote set.
    pub fn genesis(config: AlienConfig, hash: Hash, genesis_votes: &[Vote], lcrs: u64) -> Snapshot {
        let mut snap = Snapshot {
            period: config.period,
            number: 0,
            confirmed_number: 0,
            hash,
            history_hash: vec![hash],
            signers: Vec::new(),
            votes: HashMap::default(),
            tally: HashMap::default(),
            voters: HashMap::default(),
            cancels: HashMap::default(),
            cancelers: HashMap::default(),
            candidates: HashMap::default(),
            punished: HashMap::default(),
            confirmations: HashMap::default(),
            header_time: ufo_alien_core::unix_now().saturating_sub(1),
            loop_start_time: config.genesis_timestamp,
            config,
            lcrs,
        };

        for vote in genesis_votes {
            snap.votes.insert(vote.voter, vote.clone());
            let tally = snap.tally.entry(vote.candidate).or_default();
            *tally += &vote.stake;
            snap.voters.insert(vote.voter, 0);
            snap.candidates.entry(vote.candidate).or_default().push(vote.clone());
        }

        if !snap.config.self_vote_signers.is_empty() {
            let seed = snap.config.self_vote_signers.clone();
            for i in 0..snap.config.max_signer_count as usize {
                snap.signers.push(seed[i % seed.len()]);
            }
        }

        snap
    }

    fn db_key(hash: &Hash) -> Vec<u8> {
        let mut key = SNAPSHOT_KEY_PREFIX.to_vec();
        key.extend_from_slice(hash.as_bytes());
        key
    }

    /// Load a checkpointed snapshot from the store. `Ok(None)` means no blob
    /// exists for this hash and the caller should replay headers instead.
    pub fn load(
        db: &dyn KeyValueStore,
        config: AlienConfig,
        lcrs: u64,
        hash: &Hash,
    ) -> Result<Option<Snapshot>, SnapshotError> {
        let Some(blob) = db.get(&Self::db_key(hash))? else {
            return Ok(None);
        };
        let mut snap: Snapshot =
            serde_json::from_slice(&blob).map_err(|e| SnapshotError::Persistence(e.to_string()))?;
        snap.config = config;
        snap.lcrs = lcrs;
        trace!(number = snap.number, %hash, "loaded voting snapshot from disk");
        Ok(Some(snap))
    }

    /// Persist the snapshot as a single-key JSON blob.
    pub fn store(&self, db: &dyn KeyValueStore) -> Result<(), SnapshotError> {
        let blob = serde_json::to_vec(self).map_err(|e| SnapshotError::Persistence(e.to_string()))?;
        db.put(&Self::db_key(&self.hash), &blob)?;
        trace!(number = self.number, hash = %self.hash, "stored voting snapshot to disk");
        Ok(())
    }

    /// Advance the snapshot over `headers`, returning a fresh snapshot at
    /// the last header's height.
    ///
    /// Headers must start at `self.number + 1` and be strictly consecutive.
    /// Each header's author is recovered and checked against its declared
    /// coinbase. On any failure the partially advanced copy is discarded
    /// and `self` is left untouched.
    pub fn apply(
        &self,
        headers: &[Header],
        recovery: &dyn AuthorRecovery,
    ) -> Result<Snapshot, SnapshotError> {
        if headers.is_empty() {
            return Ok(self.clone());
        }
        for pair in headers.windows(2) {
            if pair[1].number != pair[0].number + 1 {
                return Err(SnapshotError::InvalidVotingChain);
            }
        }
        if headers[0].number != self.number + 1 {
            return Err(SnapshotError::InvalidVotingChain);
        }

        let mut snap = self.clone();
        for header in headers {
            let author = recovery.author(header)?;
            if author != header.coinbase {
                return Err(SnapshotError::Unauthorized);
            }
            let extra = HeaderExtra::from_header(header)?;

            snap.header_time = header.time;
            snap.loop_start_time = extra.loop_start_time;
            snap.signers = extra.signer_queue.clone();
            snap.confirmed_number = extra.confirmed_block_number;

            let cap = (snap.config.max_signer_count as usize) * 2;
            if snap.history_hash.len() >= cap {
                let excess = snap.history_hash.len() + 1 - cap;
                snap.history_hash.drain(..excess);
            }
            snap.history_hash.push(header.hash());

            snap.apply_confirmations(&extra.current_block_confirmations);
            snap.apply_votes(&extra.current_block_votes, header.number);
            snap.apply_cancels(&extra.current_block_cancels, header.number);
            snap.apply_punishment(&extra.signer_missing, header.coinbase);
            // The freeze windows are measured against the snapshot height as
            // of this header, so batch replay matches block-by-block replay.
            snap.collect_expired_freezes(header.number - 1);
        }

        snap.number += headers.len() as u64;
        snap.hash = headers[headers.len() - 1].hash();
        snap.expire();
        snap.verify_tally_cnt()?;

        Ok(snap)
    }

    fn apply_confirmations(&mut self, confirmations: &[Confirmation]) {
        for confirmation in confirmations {
            let entry = self.confirmations.entry(confirmation.block_number).or_default();
            if !entry.contains(&confirmation.signer) {
                entry.push(confirmation.signer);
            }
        }
    }

    fn apply_votes(&mut self, votes: &[Vote], number: u64) {
        for vote in votes {
            if self.votes.contains_key(&vote.voter) {
                warn!(voter = %vote.voter, "repeat vote, skipped");
                continue;
            }
            if !self.is_candidate(&vote.candidate) && vote.candidate != vote.voter {
                warn!(candidate = %vote.candidate, "vote target is not a candidate, skipped");
                continue;
            }
            if self.is_candidate(&vote.candidate) {
                let tally = self.tally.entry(vote.candidate).or_default();
                *tally += &vote.stake;
            } else {
                self.tally.insert(vote.candidate, vote.stake.clone());
            }
            self.votes.insert(vote.voter, vote.clone());
            self.voters.insert(vote.voter, number);
            self.candidates.entry(vote.candidate).or_default().push(vote.clone());
        }
    }

    /// Cancels cascade: a candidate's own cancel enqueues a passive cancel
    /// for each of its voters, processed later in the same pass.
    fn apply_cancels(&mut self, cancels: &[Cancel], number: u64) {
        let mut pending = cancels.to_vec();
        let mut i = 0;
        while i < pending.len() {
            let cancel = pending[i].clone();
            i += 1;

            if self.cancels.contains_key(&cancel.canceler) {
                warn!(canceler = %cancel.canceler, "repeat cancel, skipped");
                continue;
            }

            if let Some(inbound) = self.candidates.get(&cancel.canceler) {
                for vote in inbound {
                    if vote.voter != cancel.canceler {
                        pending.push(Cancel {
                            canceler: vote.voter,
                            passive: true,
                        });
                    }
                }
            }

            match self.votes.get(&cancel.canceler).map(|v| (v.candidate, v.stake.clone())) {
                Some((candidate, stake)) => {
                    if let Some(tally) = self.tally.get_mut(&candidate) {
                        *tally -= &stake;
                        self.cancels.insert(cancel.canceler, cancel.clone());
                        self.cancelers.insert(cancel.canceler, number);
                    } else {
                        warn!(%candidate, "cancel target candidate has no tally");
                    }
                }
                None => warn!(canceler = %cancel.canceler, "cancel without an active vote"),
            }
        }
    }

    fn apply_punishment(&mut self, signer_missing: &[Address], coinbase: Address) {
        for missing in signer_missing {
            let credit = self.punished.entry(*missing).or_insert(0);
            *credit = (*credit + MISSING_PUBLISH_CREDIT).min(PUNISH_CREDIT_CAP);
        }

        let cleared = match self.punished.get_mut(&coinbase) {
            Some(credit) if *credit > SIGN_REWARD_CREDIT => {
                *credit -= SIGN_REWARD_CREDIT;
                false
            }
            Some(_) => true,
            None => false,
        };
        if cleared {
            self.punished.remove(&coinbase);
        }

        // every other punished address recovers the auto credit; the
        // producer's entry was already settled by the sign reward above
        self.punished.retain(|address, credit| {
            if *address == coinbase {
                return true;
            }
            if *credit > AUTO_REWARD_CREDIT {
                *credit -= AUTO_REWARD_CREDIT;
                true
            } else {
                false
            }
        });
    }

    /// Drop vote, voter, cancel and candidate records whose freeze window
    /// elapsed as of `number`.
    fn collect_expired_freezes(&mut self, number: u64) {
        let freeze_blocks = self.config.freeze_blocks();
        let due: Vec<Address> = self
            .cancels
            .iter()
            .filter_map(|(canceler, cancel)| {
                let cancelled_at = self.cancelers.get(canceler).copied()?;
                let elapsed = if cancel.passive {
                    number > cancelled_at + 1
                } else {
                    number + 1 >= cancelled_at + freeze_blocks
                };
                elapsed.then_some(*canceler)
            })
            .collect();

        for canceler in due {
            if self.is_candidate(&canceler) {
                self.punished.remove(&canceler);
                self.candidates.remove(&canceler);
            } else if let Some(vote) = self.votes.get(&canceler) {
                let candidate = vote.candidate;
                if let Some(inbound) = self.candidates.get_mut(&candidate) {
                    inbound.retain(|v| v.voter != canceler);
                }
            }
            self.votes.remove(&canceler);
            self.voters.remove(&canceler);
            self.cancels.remove(&canceler);
            self.cancelers.remove(&canceler);
        }
    }

    /// Age out confirmations beyond one loop and drop non-positive tallies.
    fn expire(&mut self) {
        let number = self.number;
        let max_signer_count = self.config.max_signer_count;
        self.confirmations
            .retain(|confirmed, _| number.saturating_sub(*confirmed) <= max_signer_count);
        self.tally.retain(|_, stake| stake.is_positive());
    }

    /// Cross-check the tally table against the votes and cancels backing it.
    fn verify_tally_cnt(&self) -> Result<(), SnapshotError> {
        let mut target: HashMap<Address, Stake> = HashMap::default();
        for vote in self.votes.values() {
            let tally = target.entry(vote.candidate).or_default();
            *tally += &vote.stake;
        }
        for cancel in self.cancels.values() {
            if let Some(vote) = self.votes.get(&cancel.canceler) {
                if let Some(tally) = target.get_mut(&vote.candidate) {
                    *tally -= &vote.stake;
                }
            }
        }
        for (address, tally) in &self.tally {
            match target.get(address) {
                Some(expected) if expected == tally => {}
                expected => {
                    warn!(%address, ?expected, %tally, "tally diverged from votes");
                    return Err(SnapshotError::IncorrectTallyCount);
                }
            }
        }
        Ok(())
    }

    pub fn is_candidate(&self, address: &Address) -> bool {
        self.candidates.contains_key(address)
    }

    pub fn is_voter(&self, address: &Address) -> bool {
        self.voters.contains_key(address)
    }

    /// Whether `signer` owns the producer slot of `header`'s timestamp.
    pub fn inturn(&self, signer: Address, header: &Header) -> bool {
        if header.coinbase != signer {
            return false;
        }
        if self.signers.is_empty() || self.config.period == 0 {
            return false;
        }
        let slot = header.time.wrapping_sub(self.loop_start_time) / self.config.period;
        self.signers[slot as usize % self.signers.len()] == signer
    }

    /// The highest block within the recent window whose confirmation count
    /// exceeds two thirds of the signer count, after merging in the pending
    /// `confirmations`; the window floor when none qualifies.
    pub fn last_confirmed_block_number(&self, confirmations: &[Confirmation]) -> u64 {
        let mut merged = self.confirmations.clone();
        for confirmation in confirmations {
            let entry = merged.entry(confirmation.block_number).or_default();
            if !entry.contains(&confirmation.signer) {
                entry.push(confirmation.signer);
            }
        }

        let two_thirds = self.config.max_signer_count * 2 / 3;
        let floor = (self.number + 1).saturating_sub(two_thirds);
        let mut height = self.number;
        while height > floor {
            if merged
                .get(&height)
                .map_or(false, |confirmers| confirmers.len() as u64 > two_thirds)
            {
                return height;
            }
            height -= 1;
        }
        height
    }

    /// Split `voters_reward` across the active voters backing `coinbase`,
    /// proportional to stake. Voters in a cancelling state stop earning
    /// past [`REWARD_CANCEL_CUTOFF`].
    pub fn voter_rewards(&self, coinbase: Address, voters_reward: &Stake) -> HashMap<Address, Stake> {
        let mut rewards: HashMap<Address, Stake> = HashMap::default();
        let mut all_stake = Stake::zero();
        for (voter, vote) in &self.votes {
            if vote.candidate != coinbase {
                continue;
            }
            if self.number >= REWARD_CANCEL_CUTOFF && self.cancelers.contains_key(voter) {
                continue;
            }
            all_stake += &vote.stake;
            rewards.insert(*voter, vote.stake.clone());
        }
        if !all_stake.is_positive() {
            return HashMap::default();
        }
        for stake in rewards.values_mut() {
            *stake = &*stake * voters_reward / &all_stake;
        }
        rewards
    }
}
