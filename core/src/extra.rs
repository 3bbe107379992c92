// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::error::CoreError;
use crate::header::Header;
use crate::types::{Address, Cancel, Confirmation, Hash, Stake, Vote};
use num_bigint::Sign;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

/// Fixed number of extra-data prefix bytes reserved for signer vanity.
pub const EXTRA_VANITY: usize = 32;
/// Fixed number of extra-data suffix bytes reserved for the signer seal.
pub const EXTRA_SEAL: usize = 65;

/// The consensus record embedded in `header.extra[EXTRA_VANITY..len-EXTRA_SEAL]`.
///
/// RLP field order is consensus-visible and must not change:
/// `(confirmations, votes, cancels, loop_start_time, signer_queue,
/// signer_missing, confirmed_block_number, backup1, backup2)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderExtra {
    pub current_block_confirmations: Vec<Confirmation>,
    pub current_block_votes: Vec<Vote>,
    pub current_block_cancels: Vec<Cancel>,
    /// Start timestamp of the current loop.
    pub loop_start_time: u64,
    /// Producer order for the current loop.
    pub signer_queue: Vec<Address>,
    /// Producers skipped between the parent block and this one.
    pub signer_missing: Vec<Address>,
    /// Latest block that reached the two-thirds confirmation threshold.
    pub confirmed_block_number: u64,
    pub backup1: Vec<u8>,
    pub backup2: Vec<u8>,
}

fn stake_to_bytes(stake: &Stake) -> Vec<u8> {
    let (_, bytes) = stake.to_bytes_be();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

fn stake_from_bytes(bytes: &[u8]) -> Stake {
    Stake::from_bytes_be(Sign::Plus, bytes)
}

impl Encodable for Vote {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(4);
        stream.append(&self.voter);
        stream.append(&self.candidate);
        stream.append(&stake_to_bytes(&self.stake));
        stream.append(&self.hash);
    }
}

impl Decodable for Vote {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Vote {
            voter: rlp.val_at(0)?,
            candidate: rlp.val_at(1)?,
            stake: stake_from_bytes(&rlp.val_at::<Vec<u8>>(2)?),
            hash: rlp.val_at(3)?,
        })
    }
}

impl Encodable for Cancel {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(2);
        stream.append(&self.canceler);
        stream.append(&(self.passive as u8));
    }
}

impl Decodable for Cancel {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Cancel {
            canceler: rlp.val_at(0)?,
            passive: rlp.val_at::<u8>(1)? != 0,
        })
    }
}

impl Encodable for Confirmation {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(2);
        stream.append(&self.signer);
        stream.append(&self.block_number);
    }
}

impl Decodable for Confirmation {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Confirmation {
            signer: rlp.val_at(0)?,
            block_number: rlp.val_at(1)?,
        })
    }
}

impl Encodable for HeaderExtra {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(9);
        stream.append_list(&self.current_block_confirmations);
        stream.append_list(&self.current_block_votes);
        stream.append_list(&self.current_block_cancels);
        stream.append(&self.loop_start_time);
        stream.append_list(&self.signer_queue);
        stream.append_list(&self.signer_missing);
        stream.append(&self.confirmed_block_number);
        stream.append(&self.backup1);
        stream.append(&self.backup2);
    }
}

impl Decodable for HeaderExtra {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(HeaderExtra {
            current_block_confirmations: rlp.list_at(0)?,
            current_block_votes: rlp.list_at(1)?,
            current_block_cancels: rlp.list_at(2)?,
            loop_start_time: rlp.val_at(3)?,
            signer_queue: rlp.list_at(4)?,
            signer_missing: rlp.list_at(5)?,
            confirmed_block_number: rlp.val_at(6)?,
            backup1: rlp.val_at(7)?,
            backup2: rlp.val_at(8)?,
        })
    }
}

impl HeaderExtra {
    pub fn encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        rlp::decode(bytes).map_err(|e| CoreError::InvalidHeaderExtra(e.to_string()))
    }

    /// Decode the record embedded in a header's extra-data, checking that
    /// both the vanity prefix and the seal suffix are present.
    pub fn from_header(header: &Header) -> Result<Self, CoreError> {
        if header.extra.len() < EXTRA_VANITY {
            return Err(CoreError::MissingVanity);
        }
        if header.extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(CoreError::MissingSignature);
        }
        Self::decode_bytes(&header.extra[EXTRA_VANITY..header.extra.len() - EXTRA_SEAL])
    }

    /// Rewrite `extra` as vanity prefix, encoded record and a zeroed seal
    /// slot. Existing vanity bytes are kept, short vanities zero-padded.
    pub fn apply_to_extra(&self, extra: &mut Vec<u8>) {
        if extra.len() < EXTRA_VANITY {
            extra.resize(EXTRA_VANITY, 0);
        }
        extra.truncate(EXTRA_VANITY);
        extra.extend_from_slice(&self.encode());
        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
    }
}
