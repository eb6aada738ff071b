//! Production [`UpstreamClient`] backed by alloy's WebSocket provider.

use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::B256;
use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::rpc::types::SyncStatus as AlloySyncStatus;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::timeout;
use tracing::instrument;

use crate::error::{ClientError, Result};
use crate::traits::{HeadStream, UpstreamClient};
use crate::types::{Header, SyncStatus, UpstreamBlock};

/// How long to wait for the initial WebSocket handshake before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Live client talking to one node over a persistent WebSocket connection.
#[derive(Clone)]
pub struct AlloyUpstreamClient {
    uri: String,
    provider: RootProvider,
}

impl std::fmt::Debug for AlloyUpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyUpstreamClient")
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl UpstreamClient for AlloyUpstreamClient {
    #[instrument(skip_all, fields(uri = %uri))]
    async fn dial(uri: &str) -> Result<Self> {
        let ws = WsConnect::new(uri);
        let provider = timeout(CONNECT_TIMEOUT, ProviderBuilder::new().connect_ws(ws))
            .await
            .map_err(|_| ClientError::Timeout(CONNECT_TIMEOUT))?
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        Ok(Self {
            uri: uri.to_string(),
            provider,
        })
    }

    async fn sync_status(&self) -> Result<SyncStatus> {
        let status = self.provider.syncing().await?;
        Ok(match status {
            AlloySyncStatus::None => SyncStatus::Synced,
            AlloySyncStatus::Info(info) => SyncStatus::Syncing {
                current_block: info.current_block,
                highest_block: info.highest_block,
            },
        })
    }

    #[instrument(skip(self))]
    async fn subscribe_heads(&self) -> Result<HeadStream> {
        let subscription = self
            .provider
            .subscribe_blocks()
            .await
            .map_err(|e| ClientError::Subscription(e.to_string()))?;

        let stream = subscription.into_stream().map(|header| {
            Ok(Header {
                number: header.number,
                hash: header.hash,
            })
        });

        Ok(Box::pin(stream))
    }

    async fn block_by_hash(&self, hash: B256) -> Result<UpstreamBlock> {
        let block = self
            .provider
            .get_block_by_hash(hash)
            .full()
            .await?
            .ok_or_else(|| ClientError::NotFound(hash.to_string()))?;
        Ok(UpstreamBlock::new(block))
    }

    async fn block_by_number(&self, number: u64) -> Result<UpstreamBlock> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .full()
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("block {number}")))?;
        Ok(UpstreamBlock::new(block))
    }
}
