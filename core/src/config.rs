// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::types::{stringify, Address, AppId, Stake};
use serde::{Deserialize, Serialize};

/// Default minimum difference between two consecutive block timestamps.
pub const DEFAULT_BLOCK_PERIOD: u64 = 5;
/// Default number of producer slots per loop.
pub const DEFAULT_MAX_SIGNER_COUNT: u64 = 21;
/// Default stake-lock duration in seconds between a cancel and stake return.
pub const DEFAULT_FREEZE: u64 = 20;

/// Default minimum stake for a vote on another candidate: 100 UFO.
pub fn default_min_vote_value() -> Stake {
    Stake::from(100u64) * Stake::from(10u64).pow(18)
}

/// Default stake for a candidacy-declaring self-vote: 5,000,000 UFO.
pub fn default_self_vote_value() -> Stake {
    Stake::from(5_000_000u64) * Stake::from(10u64).pow(18)
}

/// Consensus engine parameters, normally read from the chain spec.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlienConfig {
    /// Seconds between consecutive blocks.
    pub period: u64,
    /// Producer slots per loop; also the signer queue length.
    pub max_signer_count: u64,
    #[serde(with = "stringify")]
    pub min_vote_value: Stake,
    #[serde(with = "stringify")]
    pub self_vote_value: Stake,
    /// Stake-lock duration in seconds after an active cancel.
    pub freeze: u64,
    /// Addresses that self-vote in the genesis block.
    pub self_vote_signers: Vec<Address>,
    pub genesis_timestamp: u64,
    /// Side-chain application id; empty on the main chain.
    pub app_id: AppId,
    pub side_chain: bool,
}

impl Default for AlienConfig {
    fn default() -> Self {
        AlienConfig {
            period: DEFAULT_BLOCK_PERIOD,
            max_signer_count: DEFAULT_MAX_SIGNER_COUNT,
            min_vote_value: default_min_vote_value(),
            self_vote_value: default_self_vote_value(),
            freeze: DEFAULT_FREEZE,
            self_vote_signers: Vec::new(),
            genesis_timestamp: 0,
            app_id: AppId::new(),
            side_chain: false,
        }
    }
}

impl AlienConfig {
    /// Replace zero-valued parameters with their defaults.
    pub fn completed(mut self) -> Self {
        use num_traits::Zero;
        if self.period == 0 {
            self.period = DEFAULT_BLOCK_PERIOD;
        }
        if self.max_signer_count == 0 {
            self.max_signer_count = DEFAULT_MAX_SIGNER_COUNT;
        }
        if self.min_vote_value.is_zero() {
            self.min_vote_value = default_min_vote_value();
        }
        if self.self_vote_value.is_zero() {
            self.self_vote_value = default_self_vote_value();
        }
        if self.freeze == 0 {
            self.freeze = DEFAULT_FREEZE;
        }
        self
    }

    /// The freeze window measured in blocks.
    pub fn freeze_blocks(&self) -> u64 {
        self.freeze / self.period
    }

    pub fn is_main_chain(&self) -> bool {
        self.app_id.is_empty()
    }
}
