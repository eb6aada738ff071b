//! The per-upstream subscription/reconnect state machine (§4.1).
//!
//! ```text
//! Disconnected → Connecting → Subscribed ↘
//!        ↑                         ↓
//!        └────── Backoff ←─────────┘
//! ```
//!
//! Each feed owns its own task and talks to the rest of the engine only by
//! pushing [`Block`] observations onto a shared inbound channel — there is
//! no shared mutable state between feeds, so no locking is needed at this
//! layer. A feed never surfaces a fatal error to its caller; every failure
//! routes back into the backoff loop and is retried indefinitely.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use futures::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use upstream_client::{ClientError, Header, UpstreamClient};

use crate::domain::block::{Block, Origin};

/// Base backoff delay; also the value `nextRetrySec` resets to after a
/// successful subscribe.
const BASE_BACKOFF: Duration = Duration::from_secs(5);

/// Backoff delay cap; doubles from `BASE_BACKOFF` on each consecutive
/// failure until it reaches this.
const MAX_BACKOFF: Duration = Duration::from_secs(180);

/// Observability counters for one feed, as listed in §4.1.
///
/// Shared via [`Arc`] so the coordinator's status accessor can read live
/// counters without owning the feed task.
#[derive(Debug, Default)]
pub struct FeedStats {
    is_connected: AtomicBool,
    is_subscribed: AtomicBool,
    num_blocks: AtomicU64,
    num_reconnects: AtomicU64,
    num_resubscribes: AtomicU64,
    next_retry_secs: AtomicU64,
}

impl FeedStats {
    /// Whether the feed currently holds a live connection to its node.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Relaxed)
    }

    /// Whether the feed currently holds an active new-head subscription.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.is_subscribed.load(Ordering::Relaxed)
    }

    /// Number of blocks delivered by this feed since it started.
    #[must_use]
    pub fn num_blocks(&self) -> u64 {
        self.num_blocks.load(Ordering::Relaxed)
    }

    /// Number of times this feed has had to re-dial its node.
    #[must_use]
    pub fn num_reconnects(&self) -> u64 {
        self.num_reconnects.load(Ordering::Relaxed)
    }

    /// Number of times this feed has (re-)established its head
    /// subscription.
    #[must_use]
    pub fn num_resubscribes(&self) -> u64 {
        self.num_resubscribes.load(Ordering::Relaxed)
    }

    /// Seconds until the next backoff retry, or 0 while subscribed.
    #[must_use]
    pub fn next_retry_secs(&self) -> u64 {
        self.next_retry_secs.load(Ordering::Relaxed)
    }
}

/// One upstream node, driven through the four-state machine of §4.1.
pub struct Feed<C: UpstreamClient> {
    uri: String,
    client: RwLock<Option<Arc<C>>>,
    stats: Arc<FeedStats>,
}

impl<C: UpstreamClient> std::fmt::Debug for Feed<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("uri", &self.uri)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<C: UpstreamClient> Feed<C> {
    /// Create a feed for `uri`. The feed dials lazily — on the first call
    /// to [`Feed::probe_connect`] or [`Feed::run`].
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            client: RwLock::new(None),
            stats: Arc::new(FeedStats::default()),
        }
    }

    /// The URI this feed subscribes to.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Shared observability counters.
    #[must_use]
    pub fn stats(&self) -> Arc<FeedStats> {
        Arc::clone(&self.stats)
    }

    /// Dial the node once and check its sync status, without subscribing.
    ///
    /// Used by the coordinator's `connectClients` to report an initial
    /// connectivity count at startup.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub async fn probe_connect(&self) -> Result<(), ClientError> {
        let client = C::dial(&self.uri).await?;
        let status = client.sync_status().await?;
        if !status.is_synced() {
            return Err(ClientError::Syncing {
                current: 0,
                highest: 0,
            });
        }
        *self.client.write().await = Some(Arc::new(client));
        self.stats.is_connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Fetch a block by hash using this feed's current connection. Used by
    /// the coordinator's on-demand reference closure (§4.5 step 2).
    pub async fn fetch_by_hash(&self, hash: B256) -> Result<upstream_client::UpstreamBlock, ClientError> {
        let client = self.client.read().await.clone();
        match client {
            Some(client) => client.block_by_hash(hash).await,
            None => Err(ClientError::Connection("feed has no active connection".into())),
        }
    }

    /// Drive this feed's state machine until `cancel` fires, pushing every
    /// delivered block onto `inbound`.
    #[instrument(skip(self, inbound, cancel), fields(uri = %self.uri))]
    pub async fn run(&self, inbound: mpsc::Sender<Block>, cancel: CancellationToken) {
        let mut backoff = BASE_BACKOFF;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            match self.connect_and_subscribe().await {
                Ok(mut stream) => {
                    backoff = BASE_BACKOFF;
                    self.stats.next_retry_secs.store(0, Ordering::Relaxed);
                    self.stats.is_subscribed.store(true, Ordering::Relaxed);
                    self.stats.num_resubscribes.fetch_add(1, Ordering::Relaxed);
                    info!(uri = %self.uri, "subscribed to new heads");

                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            item = stream.next() => {
                                match item {
                                    Some(Ok(header)) => {
                                        if let Err(error) = self.deliver(header, &inbound).await {
                                            warn!(uri = %self.uri, %error, "block fetch failed, reconnecting");
                                            break;
                                        }
                                    }
                                    Some(Err(error)) => {
                                        warn!(uri = %self.uri, %error, "subscription error, reconnecting");
                                        break;
                                    }
                                    None => {
                                        warn!(uri = %self.uri, "subscription ended, reconnecting");
                                        break;
                                    }
                                }
                            }
                        }
                    }

                    self.stats.is_subscribed.store(false, Ordering::Relaxed);
                    self.stats.is_connected.store(false, Ordering::Relaxed);
                }
                Err(error) => {
                    warn!(uri = %self.uri, %error, "connect/subscribe failed");
                }
            }

            self.stats.next_retry_secs.store(backoff.as_secs(), Ordering::Relaxed);
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn connect_and_subscribe(&self) -> Result<upstream_client::HeadStream, ClientError> {
        let needs_dial = self.client.read().await.is_none();
        if needs_dial {
            let client = C::dial(&self.uri).await?;
            let status = client.sync_status().await?;
            if !status.is_synced() {
                return Err(ClientError::Syncing {
                    current: 0,
                    highest: 0,
                });
            }
            *self.client.write().await = Some(Arc::new(client));
            self.stats.num_reconnects.fetch_add(1, Ordering::Relaxed);
            self.stats.is_connected.store(true, Ordering::Relaxed);
        }

        let client = self.client.read().await.clone();
        let Some(client) = client else {
            return Err(ClientError::Connection("dial did not populate client".into()));
        };
        client.subscribe_heads().await
    }

    async fn deliver(&self, header: Header, inbound: &mpsc::Sender<Block>) -> Result<(), ClientError> {
        let client = self.client.read().await.clone();
        let Some(client) = client else {
            return Err(ClientError::Connection("feed has no active connection".into()));
        };
        let payload = client.block_by_hash(header.hash).await?;
        let block = Block::from_upstream(&payload, self.uri.clone(), Origin::Subscription);
        debug!(uri = %self.uri, number = block.number(), hash = %block.hash(), "inserted block");
        self.stats.num_blocks.fetch_add(1, Ordering::Relaxed);
        if inbound.send(block).await.is_err() {
            // Consumer gone; the coordinator has shut down. Treat as a
            // terminal condition for this delivery loop so `run` falls
            // through to backoff and eventually observes cancellation.
            return Err(ClientError::Connection("inbound channel closed".into()));
        }
        Ok(())
    }
}
