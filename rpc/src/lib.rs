pub mod types;

pub use crate::types::*;
use anyhow::Result;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use ufo_alien_core::api::{ConfirmationRequest, LoopSchedule, MainChain};
use ufo_alien_core::{Address, CoreError, Hash};

/// HTTP client a side-chain engine uses to reach its main chain.
pub struct MainChainClient {
    client: HttpClient,
}

impl MainChainClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = HttpClientBuilder::default().build(endpoint)?;
        Ok(Self { client })
    }

    /// The main-chain snapshot whose header-time window covers `target_time`.
    pub async fn snapshot_by_header_time(&self, target_time: u64) -> Result<SnapshotSummary> {
        let mut params = ArrayParams::new();
        params.insert(target_time)?;

        let response: SnapshotSummary = self
            .client
            .request("alien_getSnapshotByHeaderTime", params)
            .await?;
        Ok(response)
    }

    pub async fn transaction_count(&self, address: &Address) -> Result<u64> {
        let mut params = ArrayParams::new();
        params.insert(address)?;
        params.insert("latest")?;

        let response: String = self
            .client
            .request("eth_getTransactionCount", params)
            .await?;
        parse_quantity(&response)
    }

    /// Hand a side-chain block confirmation to the main chain; the remote
    /// node signs and wraps it. Returns the main-chain transaction hash.
    pub async fn send_side_chain_confirmation(
        &self,
        to: &Address,
        nonce: u64,
        payload: &str,
    ) -> Result<Hash> {
        let mut params = ArrayParams::new();
        params.insert(to)?;
        params.insert(nonce)?;
        params.insert(payload)?;

        let response: Hash = self
            .client
            .request("alien_sendSideChainConfirmation", params)
            .await?;
        Ok(response)
    }
}

fn parse_quantity(raw: &str) -> Result<u64> {
    let digits = raw.trim_start_matches("0x");
    Ok(u64::from_str_radix(digits, 16)?)
}

/// [`MainChain`] implementation for the synchronous engine, driving the
/// async client on an embedded single-thread runtime.
pub struct BlockingMainChain {
    client: MainChainClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingMainChain {
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            client: MainChainClient::new(endpoint)?,
            runtime: tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?,
        })
    }
}

impl MainChain for BlockingMainChain {
    fn loop_schedule_by_time(&self, target_time: u64) -> Result<LoopSchedule, CoreError> {
        let summary = self
            .runtime
            .block_on(self.client.snapshot_by_header_time(target_time))
            .map_err(rpc_error)?;
        Ok(LoopSchedule {
            loop_start_time: summary.loop_start_time,
            period: summary.period,
            signers: summary.signers,
        })
    }

    fn transaction_count(&self, address: &Address) -> Result<u64, CoreError> {
        self.runtime
            .block_on(self.client.transaction_count(address))
            .map_err(rpc_error)
    }

    fn submit_confirmation(&self, request: ConfirmationRequest) -> Result<Hash, CoreError> {
        let payload = String::from_utf8(request.payload).map_err(|e| CoreError::Rpc(e.to_string()))?;
        self.runtime
            .block_on(
                self.client
                    .send_side_chain_confirmation(&request.to, request.nonce, &payload),
            )
            .map_err(rpc_error)
    }
}

fn rpc_error(error: anyhow::Error) -> CoreError {
    CoreError::Rpc(error.to_string())
}
