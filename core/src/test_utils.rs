// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

//! Mock host implementations shared by the consensus crates' tests.

use crate::api::{AuthorRecovery, ChainReader, KeyValueStore, StateStore};
use crate::config::AlienConfig;
use crate::error::CoreError;
use crate::extra::HeaderExtra;
use crate::header::Header;
use crate::types::{Address, Hash, Stake};
use std::collections::BTreeMap;
use std::sync::Mutex;

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

/// `n` whole tokens in wei.
pub fn ufo(n: u64) -> Stake {
    Stake::from(n) * Stake::from(10u64).pow(18)
}

/// A header carrying `record` in its extra-data with a blank seal.
pub fn build_header(number: u64, coinbase: Address, parent_hash: Hash, time: u64, record: &HeaderExtra) -> Header {
    let mut extra = Vec::new();
    record.apply_to_extra(&mut extra);
    Header {
        parent_hash,
        uncle_hash: crate::empty_uncle_hash(),
        coinbase,
        difficulty: 1u64.into(),
        number,
        time,
        extra,
        ..Default::default()
    }
}

/// Recovery stub that trusts the declared coinbase.
pub struct CoinbaseRecovery;

impl AuthorRecovery for CoinbaseRecovery {
    fn author(&self, header: &Header) -> Result<Address, CoreError> {
        Ok(header.coinbase)
    }
}

/// Recovery stub that always reports the same author, regardless of the
/// header's coinbase. Useful for exercising author-mismatch paths.
pub struct FixedRecovery(pub Address);

impl AuthorRecovery for FixedRecovery {
    fn author(&self, _header: &Header) -> Result<Address, CoreError> {
        Ok(self.0)
    }
}

/// An in-memory header chain.
#[derive(Default)]
pub struct MemoryChain {
    config: AlienConfig,
    headers: Mutex<BTreeMap<u64, Header>>,
}

impl MemoryChain {
    pub fn new(config: AlienConfig) -> Self {
        MemoryChain {
            config,
            headers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, header: Header) {
        self.headers.lock().unwrap().insert(header.number, header);
    }

    pub fn len(&self) -> usize {
        self.headers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChainReader for MemoryChain {
    fn config(&self) -> &AlienConfig {
        &self.config
    }

    fn current_header(&self) -> Option<Header> {
        self.headers.lock().unwrap().values().next_back().cloned()
    }

    fn header(&self, hash: &Hash, number: u64) -> Option<Header> {
        self.header_by_number(number).filter(|h| h.hash() == *hash)
    }

    fn header_by_number(&self, number: u64) -> Option<Header> {
        self.headers.lock().unwrap().get(&number).cloned()
    }

    fn header_by_hash(&self, hash: &Hash) -> Option<Header> {
        self.headers
            .lock()
            .unwrap()
            .values()
            .find(|h| h.hash() == *hash)
            .cloned()
    }
}

/// Balance table standing in for the account state.
#[derive(Default)]
pub struct MemoryState {
    balances: ahash::HashMap<Address, Stake>,
}

impl MemoryState {
    pub fn with_balance(mut self, address: Address, balance: Stake) -> Self {
        self.balances.insert(address, balance);
        self
    }
}

impl StateStore for MemoryState {
    fn balance(&self, address: &Address) -> Stake {
        self.balances.get(address).cloned().unwrap_or_default()
    }

    fn add_balance(&mut self, address: &Address, amount: &Stake) {
        let balance = self.balances.entry(*address).or_default();
        *balance += amount;
    }

    fn sub_balance(&mut self, address: &Address, amount: &Stake) {
        let balance = self.balances.entry(*address).or_default();
        *balance -= amount;
    }
}

/// An in-memory key-value store.
#[derive(Default)]
pub struct MemoryDb {
    entries: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl KeyValueStore for MemoryDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CoreError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), CoreError> {
        self.entries.lock().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}
