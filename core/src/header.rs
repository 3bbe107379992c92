// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::error::CoreError;
use crate::extra::EXTRA_SEAL;
use crate::types::{Address, Hash};
use ethereum_types::{Bloom, H64, U256};
use rlp::RlpStream;

/// A block header as the consensus engine sees it.
///
/// The extra-data field carries the 32-byte vanity prefix, the RLP-encoded
/// [`crate::HeaderExtra`] record and the 65-byte seal suffix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub parent_hash: Hash,
    pub uncle_hash: Hash,
    pub coinbase: Address,
    pub root: Hash,
    pub tx_hash: Hash,
    pub receipt_hash: Hash,
    pub bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub time: u64,
    pub extra: Vec<u8>,
    pub mix_digest: Hash,
    pub nonce: H64,
}

impl Header {
    /// The canonical header hash: Keccak-256 over the RLP encoding of every
    /// field, seal included.
    pub fn hash(&self) -> Hash {
        crate::keccak256(&self.rlp(self.extra.len()))
    }

    /// The hash signed by the block producer: the header RLP with the
    /// 65-byte seal suffix truncated from the extra-data.
    ///
    /// Fails with [`CoreError::MissingSignature`] when the extra-data is too
    /// short to hold a seal, so the two hash forms can never be confused.
    pub fn sig_hash(&self) -> Result<Hash, CoreError> {
        if self.extra.len() < EXTRA_SEAL {
            return Err(CoreError::MissingSignature);
        }
        Ok(crate::keccak256(&self.rlp(self.extra.len() - EXTRA_SEAL)))
    }

    /// The 65-byte secp256k1 signature stored at the end of the extra-data.
    pub fn seal_signature(&self) -> Result<&[u8], CoreError> {
        if self.extra.len() < EXTRA_SEAL {
            return Err(CoreError::MissingSignature);
        }
        Ok(&self.extra[self.extra.len() - EXTRA_SEAL..])
    }

    fn rlp(&self, extra_len: usize) -> Vec<u8> {
        let mut stream = RlpStream::new_list(15);
        stream.append(&self.parent_hash);
        stream.append(&self.uncle_hash);
        stream.append(&self.coinbase);
        stream.append(&self.root);
        stream.append(&self.tx_hash);
        stream.append(&self.receipt_hash);
        stream.append(&self.bloom);
        stream.append(&self.difficulty);
        stream.append(&self.number);
        stream.append(&self.gas_limit);
        stream.append(&self.gas_used);
        stream.append(&self.time);
        stream.append(&self.extra[..extra_len].to_vec());
        stream.append(&self.mix_digest);
        stream.append(&self.nonce);
        stream.out().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extra::EXTRA_VANITY;

    fn sealed_header() -> Header {
        Header {
            coinbase: Address::from_low_u64_be(7),
            number: 42,
            time: 1_700_000_000,
            extra: vec![0u8; EXTRA_VANITY + EXTRA_SEAL],
            ..Default::default()
        }
    }

    #[test]
    fn sig_hash_ignores_the_seal_suffix() {
        let header = sealed_header();
        let unsigned = header.sig_hash().unwrap();

        let mut signed = header.clone();
        let len = signed.extra.len();
        signed.extra[len - 1] = 0xff;

        // Writing the seal changes the canonical hash but not the signing hash.
        assert_eq!(signed.sig_hash().unwrap(), unsigned);
        assert_ne!(signed.hash(), header.hash());
    }

    #[test]
    fn sig_hash_requires_room_for_a_seal() {
        let mut header = sealed_header();
        header.extra = vec![0u8; EXTRA_SEAL - 1];
        assert_eq!(header.sig_hash(), Err(CoreError::MissingSignature));
        assert_eq!(header.seal_signature(), Err(CoreError::MissingSignature));
    }

    #[test]
    fn hash_covers_every_field() {
        let header = sealed_header();
        let mut other = header.clone();
        other.time += 1;
        assert_ne!(header.hash(), other.hash());
    }
}
