// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The extra-data section is shorter than the 32-byte signer vanity.
    #[error("extra-data 32 byte vanity prefix missing")]
    MissingVanity,

    /// The extra-data section doesn't contain a 65-byte secp256k1 signature.
    #[error("extra-data 65 byte suffix signature missing")]
    MissingSignature,

    /// The record between vanity and seal failed to decode.
    #[error("invalid header extra: {0}")]
    InvalidHeaderExtra(String),

    /// Recovering the author address from a header seal failed.
    #[error("signature recovery failed: {0}")]
    Recovery(String),

    /// The embedded key-value store reported a failure.
    #[error("database error: {0}")]
    Database(String),

    /// A cross-chain RPC call failed.
    #[error("main chain rpc: {0}")]
    Rpc(String),
}
