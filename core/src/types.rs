// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};

/// `Address` is the 20-byte account identifier used across the protocol.
pub type Address = ethereum_types::H160;
/// `Hash` is the 32-byte Keccak digest of a block or transaction.
pub type Hash = ethereum_types::H256;
/// `Stake` is an arbitrary-precision token amount in wei.
pub type Stake = num_bigint::BigInt;
/// `AppId` names a side chain. The empty string denotes the main chain.
pub type AppId = String;

/// A vote locking `stake` from `voter` in favour of `candidate`.
///
/// Votes come from custom transactions whose payload reads
/// `ufo:1:event:vote:<stake>`; the transaction sender is the voter and the
/// recipient the candidate. A vote whose voter equals its candidate is a
/// self-vote and declares the sender a candidate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub voter: Address,
    pub candidate: Address,
    #[serde(with = "stringify")]
    pub stake: Stake,
    pub hash: Hash,
}

/// A cancellation starting the stake-freeze unwind for `canceler`.
///
/// `passive` marks cancels propagated from a candidate's own cancellation
/// onto each of its voters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancel {
    pub canceler: Address,
    pub passive: bool,
}

/// An attestation by `signer` that the block at `block_number` is valid.
///
/// Only accepted when the signer appears in the signer queue recorded in
/// that block's header extra.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub signer: Address,
    pub block_number: u64,
}

/// A confirmation of a side-chain block forwarded to the main chain via a
/// `ufo:1:sc:confirm:<hash>:<number>` payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideChainConfirmation {
    /// Hash of the side chain's first block, identifying the chain.
    pub chain_hash: Hash,
    pub block_number: u64,
}

/// The slice of a transaction the consensus core looks at.
///
/// Sender recovery is performed by the host; the engine never touches
/// signatures of transactions, only of headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub sender: Address,
    pub to: Option<Address>,
    pub value: Stake,
    pub payload: Vec<u8>,
    pub hash: Hash,
}

/// Usage: `#[serde(with = "stringify")]`
///
/// Serializes arbitrary-precision integers as base-10 strings so JSON
/// readers never lose precision.
pub mod stringify {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::fmt::Display;
    use std::str::FromStr;

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// Usage: `#[serde(with = "stringify_map")]` on `HashMap<Address, Stake>`.
pub mod stringify_map {
    use super::{Address, Stake};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(map: &ahash::HashMap<Address, Stake>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(map.iter().map(|(address, stake)| (address, stake.to_string())))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ahash::HashMap<Address, Stake>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = ahash::HashMap::<Address, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(address, stake)| {
                stake
                    .parse::<Stake>()
                    .map(|stake| (address, stake))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_serializes_stake_as_decimal_string() {
        let vote = Vote {
            voter: Address::from_low_u64_be(1),
            candidate: Address::from_low_u64_be(2),
            stake: Stake::from(100u64) * Stake::from(10u64).pow(18),
            hash: Hash::zero(),
        };
        let json = serde_json::to_value(&vote).unwrap();
        assert_eq!(json["stake"], "100000000000000000000");

        let back: Vote = serde_json::from_value(json).unwrap();
        assert_eq!(back, vote);
    }
}
