// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

//! Interfaces the consensus core consumes from its host.
//!
//! The engine never talks to a block database, a state trie or a key store
//! directly; everything external arrives through one of these traits so the
//! core stays replayable and testable in isolation.

use crate::config::AlienConfig;
use crate::error::CoreError;
use crate::header::Header;
use crate::types::{Address, Hash, Stake};

/// Read access to the header chain the engine is verifying against.
pub trait ChainReader: Send + Sync {
    fn config(&self) -> &AlienConfig;
    fn current_header(&self) -> Option<Header>;
    /// Fetch a header by hash and number, the cheap indexed lookup.
    fn header(&self, hash: &Hash, number: u64) -> Option<Header>;
    fn header_by_number(&self, number: u64) -> Option<Header>;
    fn header_by_hash(&self, hash: &Hash) -> Option<Header>;
}

/// Balance access into the account state a block is being built on.
pub trait StateStore {
    fn balance(&self, address: &Address) -> Stake;
    fn add_balance(&mut self, address: &Address, amount: &Stake);
    fn sub_balance(&mut self, address: &Address, amount: &Stake);
}

/// The embedded key-value store used for snapshot checkpoints.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CoreError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), CoreError>;
}

/// Recovery of the producer address from a sealed header.
///
/// Implementations must be safe for concurrent use; the engine layers an
/// LRU cache keyed by header hash on top.
pub trait AuthorRecovery: Send + Sync {
    fn author(&self, header: &Header) -> Result<Address, CoreError>;
}

/// Signing callback backed by the host's key store.
pub type SignerFn = Box<dyn Fn(Address, &[u8]) -> Result<Vec<u8>, CoreError> + Send + Sync>;

/// The slice of a main-chain snapshot a side chain needs to check whether a
/// signer is in-turn at a given wall-clock time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopSchedule {
    pub loop_start_time: u64,
    pub period: u64,
    pub signers: Vec<Address>,
}

/// A block-confirmation transaction a side chain asks the main chain to
/// carry. The host signs and wraps it; the engine only fixes the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub to: Address,
    pub nonce: u64,
    pub payload: Vec<u8>,
}

/// A side-chain engine's window into the main chain.
pub trait MainChain: Send + Sync {
    /// The producer schedule active on the main chain at `target_time`.
    fn loop_schedule_by_time(&self, target_time: u64) -> Result<LoopSchedule, CoreError>;
    /// Next account nonce of the confirming signer on the main chain.
    fn transaction_count(&self, address: &Address) -> Result<u64, CoreError>;
    /// Submit a signed confirmation; returns the main-chain tx hash.
    fn submit_confirmation(&self, request: ConfirmationRequest) -> Result<Hash, CoreError>;
}
