// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

//! The Alien delegated-proof-of-stake consensus engine.
//!
//! [`Alien`] drives the four host-facing operations — prepare, finalize,
//! seal and verify — on top of the replayable [`Snapshot`] state machine:
//! - snapshots are resolved through an LRU cache, disk checkpoints every
//!   [`CHECKPOINT_INTERVAL`] blocks, and header replay as a last resort
//! - custom transactions are interpreted into votes, cancels and
//!   confirmations embedded in the header extra-data
//! - block rewards are split between the producer and its voters
//! - side-chain instances check in-turn against the main chain and push
//!   confirmations back to it
//!
//! All entry points may be called from multiple threads; the signer key
//! handle and balance-mutation windows share one reader-writer lock, and
//! the caches are individually synchronized.

pub mod api;
pub mod custom_tx;
pub mod error;
pub mod sidechain;

pub use api::Api;
pub use error::EngineError;

use hashlink::LruCache;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, trace};
use ufo_alien_core::api::{AuthorRecovery, ChainReader, KeyValueStore, MainChain, SignerFn, StateStore};
use ufo_alien_core::{
    empty_uncle_hash, unix_now, Address, AlienConfig, CoreError, Hash, Header, HeaderExtra, Stake,
    Transaction, Vote, EXTRA_SEAL, EXTRA_VANITY,
};
use ufo_alien_snapshot::{ChainBackend, Snapshot, SnapshotError};

/// Number of recent vote snapshots kept in memory.
pub const IN_MEMORY_SNAPSHOTS: usize = 128;
/// Number of recent block authors kept in memory to speed up recovery.
pub const IN_MEMORY_SIGNATURES: usize = 4096;
/// Seconds per reward year; the block reward halves once per year.
pub const SECONDS_PER_YEAR: u64 = 2 * 365 * 24 * 3600;
/// Snapshots are checkpointed to disk every this many blocks.
pub const CHECKPOINT_INTERVAL: u64 = 360;
/// Share of the block reward credited to the producer, per thousand.
pub const MINER_REWARD_PER_THOUSAND: u64 = 618;
/// Default loop count to recreate signers from the top tally.
pub const DEFAULT_LOOP_CNT_RECALCULATE_SIGNERS: u64 = 1;

/// First-year block reward in wei.
pub fn signer_block_reward() -> Stake {
    Stake::from(25u64) * Stake::from(10u64).pow(18)
}

/// [`AuthorRecovery`] wrapper memoizing recovered authors by header hash.
struct CachedRecovery {
    inner: Arc<dyn AuthorRecovery>,
    cache: RwLock<LruCache<Hash, Address>>,
}

impl CachedRecovery {
    fn new(inner: Arc<dyn AuthorRecovery>) -> Self {
        CachedRecovery {
            inner,
            cache: RwLock::new(LruCache::new(IN_MEMORY_SIGNATURES)),
        }
    }
}

impl AuthorRecovery for CachedRecovery {
    fn author(&self, header: &Header) -> Result<Address, CoreError> {
        let hash = header.hash();
        if let Some(author) = self.cache.write().get(&hash) {
            return Ok(*author);
        }
        let author = self.inner.author(header)?;
        self.cache.write().insert(hash, author);
        Ok(author)
    }
}

#[derive(Default)]
struct SignerKeys {
    signer: Address,
    sign_fn: Option<Arc<SignerFn>>,
}

/// The delegated-proof-of-stake consensus engine.
pub struct Alien {
    config: AlienConfig,
    db: Arc<dyn KeyValueStore>,
    /// Snapshots for recent blocks to speed up reorgs.
    recents: RwLock<LruCache<Hash, Snapshot>>,
    recovery: CachedRecovery,
    /// Signing key handle; the same lock guards balance-mutation windows.
    keys: RwLock<SignerKeys>,
    backend: Option<Arc<dyn ChainBackend>>,
    main_chain: Option<Arc<dyn MainChain>>,
    /// Last side-chain block height confirmed to the main chain.
    lcsc: AtomicU64,
    shutdown: AtomicBool,
}

impl Alien {
    /// Create an engine over the given checkpoint store and header-author
    /// recovery. Zeroed config parameters are completed with defaults.
    pub fn new(config: AlienConfig, db: Arc<dyn KeyValueStore>, recovery: Arc<dyn AuthorRecovery>) -> Alien {
        Alien {
            config: config.completed(),
            db,
            recents: RwLock::new(LruCache::new(IN_MEMORY_SNAPSHOTS)),
            recovery: CachedRecovery::new(recovery),
            keys: RwLock::new(SignerKeys::default()),
            backend: None,
            main_chain: None,
            lcsc: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Wire up access to sibling chains' snapshots.
    pub fn with_backend(mut self, backend: Arc<dyn ChainBackend>) -> Alien {
        self.backend = Some(backend);
        self
    }

    /// Wire up the main-chain window of a side-chain instance.
    pub fn with_main_chain(mut self, main_chain: Arc<dyn MainChain>) -> Alien {
        self.main_chain = Some(main_chain);
        self
    }

    pub fn config(&self) -> &AlienConfig {
        &self.config
    }

    pub fn backend(&self) -> Option<&dyn ChainBackend> {
        self.backend.as_deref()
    }

    /// Inject the signing credentials used to seal blocks.
    pub fn authorize(&self, signer: Address, sign_fn: SignerFn) {
        let mut keys = self.keys.write();
        keys.signer = signer;
        keys.sign_fn = Some(Arc::new(sign_fn));
    }

    /// Release any bounded sleeps (genesis countdown) promptly.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// The address that sealed `header`.
    pub fn author(&self, header: &Header) -> Result<Address, EngineError> {
        Ok(self.recovery.author(header)?)
    }

    /// Resolve the voting snapshot at `(number, hash)`.
    ///
    /// Checks the in-memory cache, then the disk checkpoint at interval
    /// boundaries, then walks parent headers backward (preferring the
    /// caller-supplied batch) until a base is found, and replays the
    /// collected headers forward.
    pub fn snapshot(
        &self,
        chain: &dyn ChainReader,
        mut number: u64,
        mut hash: Hash,
        mut parents: Vec<Header>,
        genesis_votes: &[Vote],
        lcrs: u64,
    ) -> Result<Snapshot, EngineError> {
        let mut headers: Vec<Header> = Vec::new();
        let base = loop {
            if let Some(snap) = self.recents.write().get(&hash) {
                break snap.clone();
            }
            if number % CHECKPOINT_INTERVAL == 0 {
                if let Some(snap) = Snapshot::load(self.db.as_ref(), self.config.clone(), lcrs, &hash)? {
                    break snap;
                }
            }
            if number == 0 {
                let genesis = chain.header_by_number(0).ok_or(EngineError::UnknownAncestor)?;
                let snap = Snapshot::genesis(self.config.clone(), genesis.hash(), genesis_votes, lcrs);
                snap.store(self.db.as_ref())?;
                trace!("stored genesis voting snapshot to disk");
                break snap;
            }
            let header = match parents.pop() {
                Some(header) => {
                    if header.hash() != hash || header.number != number {
                        return Err(EngineError::UnknownAncestor);
                    }
                    header
                }
                None => chain.header(&hash, number).ok_or(EngineError::UnknownAncestor)?,
            };
            hash = header.parent_hash;
            number -= 1;
            headers.push(header);
        };

        headers.reverse();
        let replayed = !headers.is_empty();
        let snap = base.apply(&headers, &self.recovery)?;
        self.recents.write().insert(snap.hash, snap.clone());

        if replayed && snap.number % CHECKPOINT_INTERVAL == 0 {
            snap.store(self.db.as_ref())?;
            trace!(number = snap.number, "stored voting snapshot to disk");
        }
        Ok(snap)
    }

    /// Check whether a header conforms to the consensus rules.
    pub fn verify_header(&self, chain: &dyn ChainReader, header: &Header) -> Result<(), EngineError> {
        self.verify_header_inner(chain, header, &[])
    }

    /// Verify a batch of headers concurrently with the caller. Returns an
    /// abort sender and a receiver yielding one result per header, in input
    /// order. Sending (or dropping) the abort handle stops the worker.
    pub fn verify_headers(
        self: &Arc<Self>,
        chain: Arc<dyn ChainReader>,
        headers: Vec<Header>,
    ) -> (Sender<()>, Receiver<Result<(), EngineError>>) {
        let (abort_tx, abort_rx) = mpsc::channel::<()>();
        let (results_tx, results_rx) = mpsc::sync_channel(headers.len().max(1));
        let engine = Arc::clone(self);
        std::thread::spawn(move || {
            for i in 0..headers.len() {
                let result = engine.verify_header_inner(chain.as_ref(), &headers[i], &headers[..i]);
                match abort_rx.try_recv() {
                    Ok(()) | Err(mpsc::TryRecvError::Disconnected) => return,
                    Err(mpsc::TryRecvError::Empty) => {}
                }
                if results_tx.send(result).is_err() {
                    return;
                }
            }
        });
        (abort_tx, results_rx)
    }

    fn verify_header_inner(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), EngineError> {
        // Don't waste time on blocks from the future.
        if header.time > unix_now() {
            return Err(EngineError::FutureBlock);
        }
        if header.extra.len() < EXTRA_VANITY {
            return Err(EngineError::MissingVanity);
        }
        if header.extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(EngineError::MissingSignature);
        }
        if header.mix_digest != Hash::zero() {
            return Err(EngineError::InvalidMixDigest);
        }
        if header.uncle_hash != empty_uncle_hash() {
            return Err(EngineError::InvalidUncleHash);
        }
        self.verify_cascading_fields(chain, header, parents)
    }

    fn verify_cascading_fields(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), EngineError> {
        let number = header.number;
        // The genesis block is the always-valid dead end.
        if number == 0 {
            return Ok(());
        }
        let parent = match parents
            .last()
            .cloned()
            .or_else(|| chain.header(&header.parent_hash, number - 1))
        {
            Some(parent) if parent.number == number - 1 && parent.hash() == header.parent_hash => parent,
            _ => return Err(EngineError::UnknownAncestor),
        };
        if parent.time > header.time {
            return Err(EngineError::InvalidTimestamp);
        }
        self.snapshot(
            chain,
            number - 1,
            header.parent_hash,
            parents.to_vec(),
            &[],
            DEFAULT_LOOP_CNT_RECALCULATE_SIGNERS,
        )?;
        self.verify_seal(chain, header, parents)
    }

    /// Check the seal against the producer schedule; at loop boundaries the
    /// embedded signer queue must equal the election result, elsewhere the
    /// parent's, and the missed-signer list must match the recomputed one.
    fn verify_seal(&self, chain: &dyn ChainReader, header: &Header, parents: &[Header]) -> Result<(), EngineError> {
        let number = header.number;
        if number == 0 {
            return Err(EngineError::UnknownBlock);
        }
        let snap = self.snapshot(
            chain,
            number - 1,
            header.parent_hash,
            parents.to_vec(),
            &[],
            DEFAULT_LOOP_CNT_RECALCULATE_SIGNERS,
        )?;
        let signer = self.recovery.author(header)?;

        if !self.config.side_chain {
            if number > self.config.max_signer_count {
                let parent = parents
                    .last()
                    .cloned()
                    .or_else(|| chain.header(&header.parent_hash, number - 1))
                    .ok_or(EngineError::UnknownAncestor)?;
                let parent_extra = HeaderExtra::from_header(&parent)?;
                let current_extra = HeaderExtra::from_header(header)?;

                if number % self.config.max_signer_count == 0 {
                    snap.verify_signer_queue(&current_extra.signer_queue, self.backend.as_deref())?;
                } else if current_extra.signer_queue != parent_extra.signer_queue {
                    return Err(SnapshotError::InvalidSignerQueue.into());
                }

                let expected = signer_missing(parent.coinbase, header.coinbase, &parent_extra);
                if expected != current_extra.signer_missing {
                    return Err(EngineError::PunishedMissing);
                }
            }
            if !snap.inturn(signer, header) {
                return Err(EngineError::Unauthorized);
            }
        } else {
            if !self.mc_inturn(signer, header.time)? {
                return Err(EngineError::Unauthorized);
            }
            // a valid side block is immediately confirmed toward the main chain
            self.mc_confirm_block(chain, header);
        }
        Ok(())
    }

    /// Prepare the consensus fields of a header for sealing on top of
    /// `parent`: unit difficulty and a period-spaced timestamp, clamped
    /// forward to wall-clock time.
    pub fn prepare(&self, chain: &dyn ChainReader, header: &mut Header) -> Result<(), EngineError> {
        header.difficulty = 1u64.into();
        let parent = chain
            .header(&header.parent_hash, header.number.saturating_sub(1))
            .ok_or(EngineError::UnknownAncestor)?;
        header.time = parent.time + self.config.period;
        let now = unix_now();
        if header.time < now {
            header.time = now;
        }

        if self.config.genesis_timestamp < unix_now() {
            return Ok(());
        }

        // Count down toward the genesis timestamp in period-sized slices so
        // a shutdown signal is honoured promptly.
        if header.number == 1 {
            while !self.shutdown.load(Ordering::Relaxed) {
                let now = unix_now();
                if now + 2 >= self.config.genesis_timestamp {
                    info!("ready to seal the first block");
                    break;
                }
                let delay = (self.config.genesis_timestamp - 2 - now).min(self.config.period);
                info!(delay, "waiting for the genesis timestamp");
                std::thread::sleep(Duration::from_secs(delay));
            }
        }
        Ok(())
    }

    /// Run the custom-transaction interpreter, roll the consensus state
    /// forward into the header's extra-data and accumulate rewards.
    pub fn finalize(
        &self,
        chain: &dyn ChainReader,
        header: &mut Header,
        state: &mut dyn StateStore,
        txs: &[Transaction],
    ) -> Result<(), EngineError> {
        let number = header.number;
        // Mix digest is reserved for now, set to empty.
        header.mix_digest = Hash::zero();

        let parent = chain
            .header(&header.parent_hash, number.saturating_sub(1))
            .ok_or(EngineError::UnknownAncestor)?;

        // Genesis self-votes are written straight into the first snapshot.
        let mut genesis_votes: Vec<Vote> = Vec::new();
        let mut parent_extra = HeaderExtra::default();
        let mut current_extra = HeaderExtra::default();
        if number == 1 {
            let mut already_voted = std::collections::HashSet::new();
            for voter in &self.config.self_vote_signers {
                if already_voted.insert(*voter) && state.balance(voter) >= self.config.self_vote_value {
                    state.sub_balance(voter, &self.config.self_vote_value);
                    genesis_votes.push(Vote {
                        voter: *voter,
                        candidate: *voter,
                        stake: self.config.self_vote_value.clone(),
                        hash: Hash::zero(),
                    });
                }
            }
        } else {
            parent_extra = HeaderExtra::from_header(&parent)?;
            current_extra.confirmed_block_number = parent_extra.confirmed_block_number;
            current_extra.signer_queue = parent_extra.signer_queue.clone();
            current_extra.loop_start_time = parent_extra.loop_start_time;
            current_extra.signer_missing = signer_missing(parent.coinbase, header.coinbase, &parent_extra);
        }

        let snap = self.snapshot(
            chain,
            number - 1,
            header.parent_hash,
            Vec::new(),
            &genesis_votes,
            DEFAULT_LOOP_CNT_RECALCULATE_SIGNERS,
        )?;

        self.process_custom_txs(&mut current_extra, chain, &snap, header, state, txs);

        if !self.config.side_chain {
            current_extra.confirmed_block_number =
                snap.last_confirmed_block_number(&current_extra.current_block_confirmations);

            // The first header carries the genesis schedule.
            if number == 1 {
                current_extra.loop_start_time = self.config.genesis_timestamp;
                if !self.config.self_vote_signers.is_empty() {
                    for i in 0..self.config.max_signer_count as usize {
                        current_extra
                            .signer_queue
                            .push(self.config.self_vote_signers[i % self.config.self_vote_signers.len()]);
                    }
                }
            }

            // Return frozen stake in the block where the window elapses.
            for (canceler, cancel) in &snap.cancels {
                let Some(cancelled_at) = snap.cancelers.get(canceler) else {
                    continue;
                };
                let due = if cancel.passive {
                    cancelled_at + 1
                } else {
                    cancelled_at + self.config.freeze_blocks()
                };
                if number == due {
                    if let Some(vote) = snap.votes.get(canceler) {
                        let _balance_guard = self.keys.write();
                        state.add_balance(canceler, &vote.stake);
                    }
                }
            }

            if number % self.config.max_signer_count == 0 {
                current_extra.loop_start_time += self.config.period * self.config.max_signer_count;
                current_extra.signer_queue = snap.create_signer_queue(self.backend.as_deref())?;
            }
        } else {
            // Side chains track whoever actually produced recent blocks.
            let mut queue = vec![header.coinbase];
            queue.extend_from_slice(&parent_extra.signer_queue);
            queue.truncate(self.config.max_signer_count as usize);
            current_extra.signer_queue = queue;
        }

        self.accumulate_rewards(state, header, &snap);

        current_extra.apply_to_extra(&mut header.extra);
        header.difficulty = 1u64.into();
        header.uncle_hash = empty_uncle_hash();
        Ok(())
    }

    /// Attempt to seal a prepared block with the local credentials.
    ///
    /// Out-of-turn producers park on the stop channel and report
    /// unauthorized once released. Returns `Ok(false)` when the host
    /// cancelled sealing before the slot time arrived.
    pub fn seal(
        &self,
        chain: &dyn ChainReader,
        header: &mut Header,
        has_transactions: bool,
        stop: &Receiver<()>,
    ) -> Result<bool, EngineError> {
        let number = header.number;
        if number == 0 {
            return Err(EngineError::UnknownBlock);
        }
        // Refuse empty blocks on instant chains: no reward, pure bloat.
        if self.config.period == 0 && !has_transactions {
            return Err(EngineError::WaitTransactions);
        }
        let snap = self.snapshot(
            chain,
            number - 1,
            header.parent_hash,
            Vec::new(),
            &[],
            DEFAULT_LOOP_CNT_RECALCULATE_SIGNERS,
        )?;

        let (signer, sign_fn) = {
            let keys = self.keys.read();
            (keys.signer, keys.sign_fn.clone())
        };

        let in_turn = if !self.config.side_chain {
            snap.inturn(signer, header)
        } else {
            self.mc_inturn(signer, header.time)?
        };
        if !in_turn {
            let _ = stop.recv();
            return Err(EngineError::Unauthorized);
        }

        // Hold the block until its slot time, unless cancelled first.
        let delay = header.time.saturating_sub(unix_now());
        match stop.recv_timeout(Duration::from_secs(delay)) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(false),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let sign_fn = sign_fn.ok_or(EngineError::Unauthorized)?;
        let signature = (sign_fn.as_ref())(signer, header.sig_hash()?.as_bytes())?;
        let extra_len = header.extra.len();
        if signature.len() != EXTRA_SEAL || extra_len < EXTRA_SEAL {
            return Err(EngineError::MissingSignature);
        }
        header.extra[extra_len - EXTRA_SEAL..].copy_from_slice(&signature);
        Ok(true)
    }

    /// Credit the block reward: `618/1000` to the producer and the rest to
    /// its voters on the main chain, everything to the producer on a side
    /// chain. The reward halves each [`SECONDS_PER_YEAR`].
    fn accumulate_rewards(&self, state: &mut dyn StateStore, header: &Header, snap: &Snapshot) {
        let blocks_per_year = SECONDS_PER_YEAR / self.config.period;
        let year_count = header.number / blocks_per_year;
        let block_reward = signer_block_reward() >> year_count;

        if !self.config.side_chain {
            let mut miner_reward = block_reward.clone();
            miner_reward *= MINER_REWARD_PER_THOUSAND;
            miner_reward /= 1000u64;
            let voters_reward = block_reward - &miner_reward;

            for (voter, reward) in snap.voter_rewards(header.coinbase, &voters_reward) {
                state.add_balance(&voter, &reward);
            }
            state.add_balance(&header.coinbase, &miner_reward);
        } else {
            state.add_balance(&header.coinbase, &block_reward);
        }
    }
}

/// The producers skipped between `last_signer`'s slot and
/// `current_signer`'s, walking the parent queue in cyclic order, both
/// endpoints exclusive. Empty when either coinbase is not queued.
pub fn signer_missing(last_signer: Address, current_signer: Address, parent_extra: &HeaderExtra) -> Vec<Address> {
    let queue = &parent_extra.signer_queue;
    let Some(last_pos) = queue.iter().position(|signer| *signer == last_signer) else {
        return Vec::new();
    };
    if !queue.contains(&current_signer) {
        return Vec::new();
    }
    let mut missing = Vec::new();
    for step in 1..queue.len() {
        let skipped = queue[(last_pos + step) % queue.len()];
        if skipped == current_signer {
            break;
        }
        if skipped != last_signer {
            missing.push(skipped);
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use ufo_alien_core::test_utils::{addr, build_header, ufo, CoinbaseRecovery, MemoryChain, MemoryDb, MemoryState};

    const GENESIS_TIME: u64 = 1_540_000_000;

    fn test_config() -> AlienConfig {
        AlienConfig {
            self_vote_signers: vec![addr(0xa), addr(0xb), addr(0xc)],
            genesis_timestamp: GENESIS_TIME,
            ..Default::default()
        }
    }

    fn new_engine(config: AlienConfig) -> Arc<Alien> {
        Arc::new(Alien::new(config, Arc::new(MemoryDb::default()), Arc::new(CoinbaseRecovery)))
    }

    fn chain_with_genesis(config: AlienConfig) -> MemoryChain {
        let chain = MemoryChain::new(config);
        chain.insert(build_header(0, addr(0xa), Hash::zero(), GENESIS_TIME, &HeaderExtra::default()));
        chain
    }

    fn funded_state() -> MemoryState {
        MemoryState::default()
            .with_balance(addr(0xa), ufo(6_000_000))
            .with_balance(addr(0xb), ufo(6_000_000))
            .with_balance(addr(0xc), ufo(6_000_000))
    }

    /// Finalize block one and return (header, chain, state, engine).
    ///
    /// Block one lands in slot 1 (time `GENESIS_TIME + 5`), which belongs
    /// to the second self-vote signer.
    fn finalized_block_one() -> (Header, MemoryChain, MemoryState, Arc<Alien>) {
        let config = test_config();
        let engine = new_engine(config.clone());
        let chain = chain_with_genesis(config);
        let mut state = funded_state();
        let genesis = chain.header_by_number(0).unwrap();

        let mut header = Header {
            parent_hash: genesis.hash(),
            coinbase: addr(0xb),
            number: 1,
            time: GENESIS_TIME + 5,
            ..Default::default()
        };
        engine.finalize(&chain, &mut header, &mut state, &[]).unwrap();
        chain.insert(header.clone());
        (header, chain, state, engine)
    }

    #[test]
    fn finalize_block_one_writes_genesis_schedule() {
        let (header, _chain, state, _engine) = finalized_block_one();

        let extra = HeaderExtra::from_header(&header).unwrap();
        assert_eq!(extra.loop_start_time, GENESIS_TIME);
        assert_eq!(extra.signer_queue.len(), 21);
        assert_eq!(extra.signer_queue[0], addr(0xa));
        assert_eq!(extra.signer_queue[1], addr(0xb));
        assert_eq!(extra.signer_queue[2], addr(0xc));
        assert_eq!(extra.signer_queue[3], addr(0xa));
        assert_eq!(header.uncle_hash, empty_uncle_hash());
        assert_eq!(header.difficulty.as_u64(), 1);

        // the self vote was debited; the producer got the whole block
        // reward back (sole voter of itself plus the miner share)
        let expected_b = ufo(6_000_000) - ufo(5_000_000) + signer_block_reward();
        assert_eq!(state.balance(&addr(0xb)), expected_b);
        assert_eq!(state.balance(&addr(0xa)), ufo(1_000_000));
        assert_eq!(state.balance(&addr(0xc)), ufo(1_000_000));
    }

    #[test]
    fn finalize_accepts_a_vote_transaction() {
        let (block_one, chain, mut state, engine) = finalized_block_one();
        let voter = addr(0xd);
        state.add_balance(&voter, &ufo(101));

        let tx = Transaction {
            sender: voter,
            to: Some(addr(0xb)),
            value: Stake::from(0),
            payload: format!("ufo:1:event:vote:{}", ufo(100)).into_bytes(),
            hash: Hash::repeat_byte(0x42),
        };
        let mut header = Header {
            parent_hash: block_one.hash(),
            coinbase: addr(0xc),
            number: 2,
            time: GENESIS_TIME + 10,
            ..Default::default()
        };
        engine.finalize(&chain, &mut header, &mut state, &[tx]).unwrap();

        let extra = HeaderExtra::from_header(&header).unwrap();
        assert_eq!(extra.current_block_votes.len(), 1);
        assert_eq!(extra.current_block_votes[0].voter, voter);
        assert_eq!(extra.current_block_votes[0].candidate, addr(0xb));
        assert_eq!(extra.current_block_votes[0].stake, ufo(100));
        assert_eq!(state.balance(&voter), ufo(1));

        // the queue is copied from the parent between loop boundaries
        let parent_extra = HeaderExtra::from_header(&block_one).unwrap();
        assert_eq!(extra.signer_queue, parent_extra.signer_queue);
    }

    #[test]
    fn finalize_returns_frozen_stake_when_the_window_elapses() {
        let (block_one, chain, mut state, engine) = finalized_block_one();
        let voter = addr(0xd);
        state.add_balance(&voter, &ufo(101));

        // block 2: vote, block 3: cancel, blocks 4-5: filler
        let vote_tx = Transaction {
            sender: voter,
            to: Some(addr(0xb)),
            value: Stake::from(0),
            payload: format!("ufo:1:event:vote:{}", ufo(100)).into_bytes(),
            hash: Hash::repeat_byte(0x42),
        };
        let cancel_tx = Transaction {
            sender: voter,
            to: Some(voter),
            value: Stake::from(0),
            payload: b"ufo:1:event:cancel".to_vec(),
            hash: Hash::repeat_byte(0x43),
        };

        let mut parent = block_one;
        for number in 2u64..=7 {
            let txs: Vec<Transaction> = match number {
                2 => vec![vote_tx.clone()],
                3 => vec![cancel_tx.clone()],
                _ => Vec::new(),
            };
            // keep the voted candidate (0xb) away from the coinbase so no
            // voter reward lands on 0xd and muddies the balance deltas
            let producer = if number % 2 == 0 { addr(0xa) } else { addr(0xc) };
            let mut header = Header {
                parent_hash: parent.hash(),
                coinbase: producer,
                number,
                time: GENESIS_TIME + 5 * number,
                ..Default::default()
            };
            let before = state.balance(&voter);
            engine.finalize(&chain, &mut header, &mut state, &txs).unwrap();
            let after = state.balance(&voter);

            // cancel at block 3, freeze 20s / period 5s: refund lands in
            // block 7 and nowhere else
            if number == 2 {
                assert_eq!(after, before - ufo(100));
            } else if number == 7 {
                assert_eq!(after, before + ufo(100));
            } else {
                assert_eq!(after, before);
            }
            chain.insert(header.clone());
            parent = header;
        }
    }

    #[test]
    fn verify_header_checks_structure_first() {
        let config = test_config();
        let engine = new_engine(config.clone());
        let chain = chain_with_genesis(config);

        let valid = build_header(1, addr(0xa), Hash::zero(), GENESIS_TIME, &HeaderExtra::default());

        let mut future = valid.clone();
        future.time = unix_now() + 3600;
        assert_eq!(engine.verify_header(&chain, &future), Err(EngineError::FutureBlock));

        let mut no_vanity = valid.clone();
        no_vanity.extra = vec![0u8; EXTRA_VANITY - 1];
        assert_eq!(engine.verify_header(&chain, &no_vanity), Err(EngineError::MissingVanity));

        let mut no_seal = valid.clone();
        no_seal.extra.truncate(EXTRA_VANITY + 5);
        assert_eq!(engine.verify_header(&chain, &no_seal), Err(EngineError::MissingSignature));

        let mut mixed = valid.clone();
        mixed.mix_digest = Hash::repeat_byte(1);
        assert_eq!(engine.verify_header(&chain, &mixed), Err(EngineError::InvalidMixDigest));

        let mut uncles = valid.clone();
        uncles.uncle_hash = Hash::zero();
        assert_eq!(engine.verify_header(&chain, &uncles), Err(EngineError::InvalidUncleHash));

        let mut orphan = valid;
        orphan.parent_hash = Hash::repeat_byte(0x99);
        assert_eq!(engine.verify_header(&chain, &orphan), Err(EngineError::UnknownAncestor));
    }

    #[test]
    fn verify_header_accepts_an_in_turn_block() {
        let (block_one, chain, _state, engine) = finalized_block_one();
        // slot 1 after loop start belongs to the second self-vote signer
        assert_eq!(engine.verify_header(&chain, &block_one), Ok(()));

        let mut wrong_turn = block_one;
        wrong_turn.coinbase = addr(0xc);
        assert_eq!(engine.verify_header(&chain, &wrong_turn), Err(EngineError::Unauthorized));
    }

    #[test]
    fn verify_headers_streams_results_and_aborts() {
        let config = test_config();
        let engine = new_engine(config.clone());
        let chain = Arc::new(chain_with_genesis(config));

        let mut future = build_header(1, addr(0xa), Hash::zero(), GENESIS_TIME, &HeaderExtra::default());
        future.time = unix_now() + 3600;
        let headers = vec![future.clone(), future.clone(), future];

        let (abort, results) = engine.verify_headers(chain.clone(), headers);
        assert_eq!(
            results.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(EngineError::FutureBlock)
        );
        // aborting closes the stream promptly
        abort.send(()).unwrap();
        let _ = results.recv_timeout(Duration::from_secs(5));
        assert!(results.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn seal_signs_into_the_seal_slot() {
        let (block_one, chain, _state, engine) = finalized_block_one();

        // block 2 in slot 2: third self-vote signer is in turn
        let mut header = Header {
            parent_hash: block_one.hash(),
            coinbase: addr(0xc),
            number: 2,
            time: GENESIS_TIME + 10,
            extra: vec![0u8; EXTRA_VANITY + EXTRA_SEAL],
            ..Default::default()
        };

        engine.authorize(addr(0xc), Box::new(|_, _| Ok(vec![0xAB; EXTRA_SEAL])));
        let (_stop_tx, stop_rx) = mpsc::channel();
        assert!(engine.seal(&chain, &mut header, true, &stop_rx).unwrap());
        assert!(header.seal_signature().unwrap().iter().all(|b| *b == 0xAB));
    }

    #[test]
    fn out_of_turn_sealers_wait_then_report_unauthorized() {
        let (block_one, chain, _state, engine) = finalized_block_one();
        let mut header = Header {
            parent_hash: block_one.hash(),
            coinbase: addr(0xa),
            number: 2,
            time: GENESIS_TIME + 10,
            extra: vec![0u8; EXTRA_VANITY + EXTRA_SEAL],
            ..Default::default()
        };
        engine.authorize(addr(0xa), Box::new(|_, _| Ok(vec![0; EXTRA_SEAL])));

        let (stop_tx, stop_rx) = mpsc::channel();
        stop_tx.send(()).unwrap();
        assert_eq!(
            engine.seal(&chain, &mut header, true, &stop_rx),
            Err(EngineError::Unauthorized)
        );
    }

    #[test]
    fn rewards_split_and_conserve_on_the_main_chain() {
        let (_block_one, chain, _state, engine) = finalized_block_one();
        let genesis = chain.header_by_number(0).unwrap();
        let snap = engine
            .snapshot(&chain, 0, genesis.hash(), Vec::new(), &[], 1)
            .unwrap();

        let mut state = MemoryState::default();
        let header = Header {
            coinbase: addr(0xa),
            number: 5,
            ..Default::default()
        };
        engine.accumulate_rewards(&mut state, &header, &snap);

        let reward = signer_block_reward();
        let miner_share = reward.clone() * MINER_REWARD_PER_THOUSAND / 1000u64;
        // the producer self-votes, so it collects both shares
        assert_eq!(state.balance(&addr(0xa)), reward);
        assert!(state.balance(&addr(0xa)) >= miner_share);
    }

    #[test]
    fn side_chains_pay_the_whole_reward_to_the_producer() {
        let mut config = test_config();
        config.side_chain = true;
        config.app_id = "7".into();
        let engine = new_engine(config.clone());
        let chain = chain_with_genesis(config);
        let genesis = chain.header_by_number(0).unwrap();
        let snap = engine
            .snapshot(&chain, 0, genesis.hash(), Vec::new(), &[], 1)
            .unwrap();

        let mut state = MemoryState::default();
        let header = Header {
            coinbase: addr(0xf),
            number: 3,
            ..Default::default()
        };
        engine.accumulate_rewards(&mut state, &header, &snap);
        assert_eq!(state.balance(&addr(0xf)), signer_block_reward());
    }

    #[test]
    fn block_reward_halves_every_reward_year() {
        let (_block_one, chain, _state, engine) = finalized_block_one();
        let genesis = chain.header_by_number(0).unwrap();
        let snap = engine
            .snapshot(&chain, 0, genesis.hash(), Vec::new(), &[], 1)
            .unwrap();

        let blocks_per_year = SECONDS_PER_YEAR / 5;
        let mut state = MemoryState::default();
        let header = Header {
            coinbase: addr(0xff),
            number: blocks_per_year,
            ..Default::default()
        };
        engine.accumulate_rewards(&mut state, &header, &snap);
        // no voters back 0xff, so it only earns the halved miner share
        let halved = signer_block_reward() >> 1u64;
        let miner_share = halved * MINER_REWARD_PER_THOUSAND / 1000u64;
        assert_eq!(state.balance(&addr(0xff)), miner_share);
    }

    #[test]
    fn side_chain_finalize_prepends_the_producer() {
        let mut config = test_config();
        config.side_chain = true;
        config.app_id = "7".into();
        config.self_vote_signers = Vec::new();
        let engine = new_engine(config.clone());
        let chain = chain_with_genesis(config);
        let genesis = chain.header_by_number(0).unwrap();

        let parent_record = HeaderExtra {
            signer_queue: vec![addr(1), addr(2)],
            ..Default::default()
        };
        let parent = build_header(1, addr(1), genesis.hash(), GENESIS_TIME + 5, &parent_record);
        chain.insert(parent.clone());

        let mut header = Header {
            parent_hash: parent.hash(),
            coinbase: addr(3),
            number: 2,
            time: GENESIS_TIME + 10,
            ..Default::default()
        };
        let mut state = MemoryState::default();
        engine.finalize(&chain, &mut header, &mut state, &[]).unwrap();

        let extra = HeaderExtra::from_header(&header).unwrap();
        assert_eq!(extra.signer_queue, vec![addr(3), addr(1), addr(2)]);
    }

    #[test]
    fn prepare_spaces_the_timestamp_and_clamps_to_now() {
        let config = test_config();
        let engine = new_engine(config.clone());
        let chain = chain_with_genesis(config);
        let genesis = chain.header_by_number(0).unwrap();

        let mut header = Header {
            parent_hash: genesis.hash(),
            number: 1,
            ..Default::default()
        };
        let before = unix_now();
        engine.prepare(&chain, &mut header).unwrap();

        assert_eq!(header.difficulty.as_u64(), 1);
        // the genesis timestamp is far in the past, so the period-spaced
        // time gets clamped forward to the wall clock
        assert!(header.time >= before);
        assert!(header.time >= genesis.time + 5);

        let mut orphan = Header {
            parent_hash: Hash::repeat_byte(0x99),
            number: 1,
            ..Default::default()
        };
        assert_eq!(engine.prepare(&chain, &mut orphan), Err(EngineError::UnknownAncestor));
    }

    #[test]
    fn signer_missing_walks_the_queue_cyclically() {
        let extra = HeaderExtra {
            signer_queue: vec![addr(1), addr(2), addr(3), addr(4), addr(5)],
            ..Default::default()
        };
        // forward gap
        assert_eq!(signer_missing(addr(2), addr(4), &extra), vec![addr(3)]);
        // adjacent producers skip nobody
        assert!(signer_missing(addr(2), addr(3), &extra).is_empty());
        // wrap around the end of the queue
        assert_eq!(signer_missing(addr(4), addr(2), &extra), vec![addr(5), addr(1)]);
        // unknown signers yield nothing
        assert!(signer_missing(addr(9), addr(2), &extra).is_empty());
        assert!(signer_missing(addr(2), addr(9), &extra).is_empty());
    }

    #[test]
    fn loop_boundary_reelects_and_advances_loop_start() {
        let config = AlienConfig {
            max_signer_count: 3,
            self_vote_signers: vec![addr(0xa), addr(0xb), addr(0xc)],
            genesis_timestamp: GENESIS_TIME,
            ..Default::default()
        };
        let engine = new_engine(config.clone());
        let chain = chain_with_genesis(config);
        let mut state = funded_state();

        let mut parent = chain.header_by_number(0).unwrap();
        for number in 1u64..=3 {
            let producer = [addr(0xa), addr(0xb), addr(0xc)][((number) % 3) as usize];
            let mut header = Header {
                parent_hash: parent.hash(),
                coinbase: producer,
                number,
                time: GENESIS_TIME + 5 * number,
                ..Default::default()
            };
            engine.finalize(&chain, &mut header, &mut state, &[]).unwrap();
            chain.insert(header.clone());
            parent = header;
        }

        // block 3 closed the first loop of three slots
        let extra = HeaderExtra::from_header(&parent).unwrap();
        assert_eq!(extra.loop_start_time, GENESIS_TIME + 5 * 3);
        assert_eq!(extra.signer_queue.len(), 3);
        let unique: std::collections::HashSet<Address> = extra.signer_queue.iter().copied().collect();
        assert_eq!(unique.len(), 3);
    }
}
