// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

//! The custom-transaction interpreter.
//!
//! Voting intents travel as colon-delimited ASCII payloads shaped
//! `ufo:1:<category>:<action>[:arg...]`. A malformed or rejected intent is
//! logged and skipped; the transaction's ordinary transfer effect is
//! untouched either way.

use crate::Alien;
use num_traits::Signed;
use tracing::{info, trace, warn};
use ufo_alien_core::api::{ChainReader, StateStore};
use ufo_alien_core::types::SideChainConfirmation;
use ufo_alien_core::{Confirmation, Cancel, Hash, Header, HeaderExtra, Stake, Transaction, Vote};
use ufo_alien_snapshot::Snapshot;

const UFO_PREFIX: &str = "ufo";
const UFO_VERSION: &str = "1";
const UFO_CATEGORY_EVENT: &str = "event";
const UFO_CATEGORY_LOG: &str = "oplog";
const UFO_CATEGORY_SC: &str = "sc";
const UFO_EVENT_VOTE: &str = "vote";
const UFO_EVENT_CONFIRM: &str = "confirm";
const UFO_EVENT_CANCEL: &str = "cancel";
const UFO_MIN_SPLIT_LEN: usize = 3;
const POS_PREFIX: usize = 0;
const POS_VERSION: usize = 1;
const POS_CATEGORY: usize = 2;
const POS_EVENT: usize = 3;
const POS_EVENT_VOTE_VALUE: usize = 4;
const POS_EVENT_CONFIRM_NUMBER: usize = 4;

impl Alien {
    /// Sift `txs` for voting intents and append the accepted ones to the
    /// header extra under assembly. Side-chain confirmations addressed to
    /// this (main) chain are returned for the host to act on.
    pub(crate) fn process_custom_txs(
        &self,
        extra: &mut HeaderExtra,
        chain: &dyn ChainReader,
        snap: &Snapshot,
        header: &Header,
        state: &mut dyn StateStore,
        txs: &[Transaction],
    ) -> Vec<SideChainConfirmation> {
        let mut side_confirmations = Vec::new();
        for tx in txs {
            let Ok(payload) = std::str::from_utf8(&tx.payload) else {
                continue;
            };
            if payload.len() < UFO_PREFIX.len() {
                continue;
            }
            let fields: Vec<&str> = payload.split(':').collect();
            if fields.len() < UFO_MIN_SPLIT_LEN
                || fields[POS_PREFIX] != UFO_PREFIX
                || fields[POS_VERSION] != UFO_VERSION
            {
                continue;
            }
            match fields[POS_CATEGORY] {
                UFO_CATEGORY_EVENT if fields.len() > UFO_MIN_SPLIT_LEN => match fields[POS_EVENT] {
                    UFO_EVENT_VOTE => self.process_event_vote(extra, snap, state, tx, &fields),
                    UFO_EVENT_CANCEL => self.process_event_cancel(extra, tx),
                    UFO_EVENT_CONFIRM => {
                        self.process_event_confirm(extra, chain, header.number, tx, &fields)
                    }
                    _ => {}
                },
                UFO_CATEGORY_LOG => {
                    // reserved
                }
                UFO_CATEGORY_SC if fields.len() > UFO_MIN_SPLIT_LEN + 2 => {
                    if fields[POS_EVENT] == UFO_EVENT_CONFIRM {
                        if let Some(confirmation) = parse_side_chain_confirm(&fields) {
                            trace!(
                                chain = %confirmation.chain_hash,
                                number = confirmation.block_number,
                                "side chain confirm"
                            );
                            side_confirmations.push(confirmation);
                        }
                    }
                }
                _ => {}
            }
        }
        side_confirmations
    }

    fn process_event_vote(
        &self,
        extra: &mut HeaderExtra,
        snap: &Snapshot,
        state: &mut dyn StateStore,
        tx: &Transaction,
        fields: &[&str],
    ) {
        if fields.len() <= POS_EVENT_VOTE_VALUE {
            return;
        }
        let Some(candidate) = tx.to else {
            return;
        };
        let stake = match fields[POS_EVENT_VOTE_VALUE].parse::<Stake>() {
            Ok(stake) if !stake.is_negative() => stake,
            _ => {
                warn!(voter = %tx.sender, "invalid vote value");
                return;
            }
        };

        if snap.votes.contains_key(&tx.sender) {
            warn!(voter = %tx.sender, "repeat vote in snapshot");
            return;
        }
        if tx.sender != candidate {
            if stake < self.config.min_vote_value {
                warn!(voter = %tx.sender, "vote value below the minimum");
                return;
            }
            if !snap.is_candidate(&candidate) {
                warn!(%candidate, "vote target is not a candidate");
                return;
            }
        } else if stake < self.config.self_vote_value {
            warn!(voter = %tx.sender, "self vote below the candidacy threshold");
            return;
        }

        // balance must strictly exceed the stake
        if state.balance(&tx.sender) > stake {
            if extra.current_block_votes.iter().any(|vote| vote.voter == tx.sender) {
                warn!(voter = %tx.sender, "repeat vote in the current block");
                return;
            }
            {
                let _balance_guard = self.keys.write();
                state.sub_balance(&tx.sender, &stake);
            }
            extra.current_block_votes.push(Vote {
                voter: tx.sender,
                candidate,
                stake,
                hash: tx.hash,
            });
        } else {
            warn!(voter = %tx.sender, "not enough balance for vote");
        }
    }

    fn process_event_cancel(&self, extra: &mut HeaderExtra, tx: &Transaction) {
        if extra
            .current_block_cancels
            .iter()
            .any(|cancel| cancel.canceler == tx.sender)
        {
            warn!(canceler = %tx.sender, "repeat cancel in the current block");
            return;
        }
        extra.current_block_cancels.push(Cancel {
            canceler: tx.sender,
            passive: false,
        });
    }

    /// A confirmation only counts if the target block is within one loop of
    /// the current height and the sender sat in its signer queue.
    fn process_event_confirm(
        &self,
        extra: &mut HeaderExtra,
        chain: &dyn ChainReader,
        number: u64,
        tx: &Transaction,
        fields: &[&str],
    ) {
        if fields.len() <= POS_EVENT_CONFIRM_NUMBER {
            return;
        }
        let Ok(confirmed) = fields[POS_EVENT_CONFIRM_NUMBER].parse::<u64>() else {
            return;
        };
        if confirmed > number || number - confirmed > self.config.max_signer_count {
            return;
        }
        let Some(confirmed_header) = chain.header_by_number(confirmed) else {
            info!(number = confirmed, "failed to fetch the confirmed header");
            return;
        };
        let confirmed_extra = match HeaderExtra::from_header(&confirmed_header) {
            Ok(extra) => extra,
            Err(error) => {
                info!(%error, "failed to decode the confirmed header");
                return;
            }
        };
        if confirmed_extra.signer_queue.contains(&tx.sender) {
            extra.current_block_confirmations.push(Confirmation {
                signer: tx.sender,
                block_number: confirmed,
            });
        }
    }
}

fn parse_side_chain_confirm(fields: &[&str]) -> Option<SideChainConfirmation> {
    let raw_hash = fields[UFO_MIN_SPLIT_LEN + 1].trim_start_matches("0x");
    let chain_hash = raw_hash.parse::<Hash>().ok()?;
    let block_number = fields[UFO_MIN_SPLIT_LEN + 2].parse().ok()?;
    Some(SideChainConfirmation {
        chain_hash,
        block_number,
    })
}
