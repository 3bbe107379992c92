// Copyright 2018-2024 UFO Network Developers
// SPDX-License-Identifier: Apache-2.0, MIT

//! Side-chain hooks: in-turn checks against the main chain's schedule and
//! confirmation dispatch back to it.

use crate::{Alien, EngineError};
use std::sync::atomic::Ordering;
use tracing::info;
use ufo_alien_core::api::{ChainReader, ConfirmationRequest};
use ufo_alien_core::{Address, Header};

impl Alien {
    /// Whether `signer` owns the slot at `header_time` according to the
    /// main chain's schedule. Always false on the main chain itself or
    /// when no main-chain window is wired up.
    pub(crate) fn mc_inturn(&self, signer: Address, header_time: u64) -> Result<bool, EngineError> {
        if !self.config.side_chain {
            return Ok(false);
        }
        let Some(main_chain) = &self.main_chain else {
            return Ok(false);
        };
        let schedule = match main_chain.loop_schedule_by_time(header_time) {
            Ok(schedule) => schedule,
            Err(error) => {
                info!(%error, "main chain snapshot query failed");
                return Ok(false);
            }
        };
        if schedule.signers.is_empty() || schedule.period == 0 {
            return Ok(false);
        }
        let slot = header_time.wrapping_sub(schedule.loop_start_time) / schedule.period;
        Ok(schedule.signers[slot as usize % schedule.signers.len()] == signer)
    }

    /// Ask the main chain to record `header` as confirmed. The payload
    /// names this side chain by the hash of its first block. Heights at or
    /// below the last confirmed one are skipped.
    pub(crate) fn mc_confirm_block(&self, chain: &dyn ChainReader, header: &Header) {
        let signer = self.keys.read().signer;
        if signer == Address::zero() {
            return;
        }
        let Some(main_chain) = &self.main_chain else {
            return;
        };
        if header.number <= self.lcsc.load(Ordering::Relaxed) {
            return;
        }
        let Some(first_block) = chain.header_by_number(1) else {
            return;
        };
        let nonce = match main_chain.transaction_count(&signer) {
            Ok(nonce) => nonce,
            Err(error) => {
                info!(%error, "confirm tx nonce query failed");
                return;
            }
        };

        let payload = format!("ufo:1:sc:confirm:{:#x}:{}", first_block.hash(), header.number);
        let request = ConfirmationRequest {
            to: header.coinbase,
            nonce,
            payload: payload.into_bytes(),
        };
        match main_chain.submit_confirmation(request) {
            Ok(hash) => {
                info!(%hash, "confirm tx sent to the main chain");
                self.lcsc.store(header.number, Ordering::Relaxed);
            }
            Err(error) => info!(%error, "confirm tx send failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use ufo_alien_core::api::{LoopSchedule, MainChain};
    use ufo_alien_core::test_utils::{addr, build_header, CoinbaseRecovery, MemoryChain, MemoryDb};
    use ufo_alien_core::{AlienConfig, CoreError, Hash, HeaderExtra};

    struct StubMainChain {
        schedule: LoopSchedule,
        submitted: Mutex<Vec<ConfirmationRequest>>,
    }

    impl MainChain for StubMainChain {
        fn loop_schedule_by_time(&self, _target_time: u64) -> Result<LoopSchedule, CoreError> {
            Ok(self.schedule.clone())
        }

        fn transaction_count(&self, _address: &Address) -> Result<u64, CoreError> {
            Ok(7)
        }

        fn submit_confirmation(&self, request: ConfirmationRequest) -> Result<Hash, CoreError> {
            self.submitted.lock().push(request);
            Ok(Hash::repeat_byte(0xcc))
        }
    }

    fn side_engine(main: Arc<StubMainChain>) -> Alien {
        let config = AlienConfig {
            side_chain: true,
            app_id: "7".into(),
            ..Default::default()
        };
        Alien::new(config, Arc::new(MemoryDb::default()), Arc::new(CoinbaseRecovery))
            .with_main_chain(main)
    }

    fn stub_main() -> Arc<StubMainChain> {
        Arc::new(StubMainChain {
            schedule: LoopSchedule {
                loop_start_time: 1000,
                period: 5,
                signers: vec![addr(1), addr(2), addr(3)],
            },
            submitted: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn mc_inturn_follows_the_main_schedule() {
        let main = stub_main();
        let engine = side_engine(main);

        // slots 0, 1 and 2 after loop start
        assert!(engine.mc_inturn(addr(1), 1000).unwrap());
        assert!(engine.mc_inturn(addr(2), 1005).unwrap());
        assert!(engine.mc_inturn(addr(3), 1010).unwrap());
        assert!(!engine.mc_inturn(addr(1), 1005).unwrap());
        // wraps to slot 0 after a full loop
        assert!(engine.mc_inturn(addr(1), 1015).unwrap());
    }

    #[test]
    fn main_chain_engines_are_never_mc_inturn() {
        let engine = Alien::new(
            AlienConfig {
                self_vote_signers: vec![addr(1)],
                ..Default::default()
            },
            Arc::new(MemoryDb::default()),
            Arc::new(CoinbaseRecovery),
        );
        assert!(!engine.mc_inturn(addr(1), 1000).unwrap());
    }

    #[test]
    fn confirmations_are_submitted_once_per_height() {
        let main = stub_main();
        let engine = side_engine(main.clone());
        engine.authorize(addr(9), Box::new(|_, _| Ok(vec![0; 65])));

        let chain = MemoryChain::new(engine.config().clone());
        let first = build_header(1, addr(1), Hash::zero(), 1000, &HeaderExtra::default());
        chain.insert(first.clone());
        let header = build_header(4, addr(1), Hash::zero(), 1020, &HeaderExtra::default());

        engine.mc_confirm_block(&chain, &header);
        engine.mc_confirm_block(&chain, &header);

        let submitted = main.submitted.lock();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].nonce, 7);
        assert_eq!(submitted[0].to, addr(1));
        let payload = String::from_utf8(submitted[0].payload.clone()).unwrap();
        assert_eq!(payload, format!("ufo:1:sc:confirm:{:#x}:4", first.hash()));
    }

    #[test]
    fn unauthorized_engines_do_not_confirm() {
        let main = stub_main();
        let engine = side_engine(main.clone());
        let chain = MemoryChain::new(engine.config().clone());
        chain.insert(build_header(1, addr(1), Hash::zero(), 1000, &HeaderExtra::default()));

        let header = build_header(4, addr(1), Hash::zero(), 1020, &HeaderExtra::default());
        engine.mc_confirm_block(&chain, &header);
        assert!(main.submitted.lock().is_empty());
    }
}
