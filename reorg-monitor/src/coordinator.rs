//! Coordinator: fans in observations from every feed, maintains the cache,
//! triggers tree analysis, and deduplicates emitted reorganizations (§4.5).
//!
//! All cache/tree mutation happens on the single task that drives
//! [`Coordinator::subscribe_and_listen`] — feeds communicate with it purely
//! by pushing [`Block`]s onto the inbound channel (§5), so nothing here
//! needs a lock beyond the feed map itself.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use upstream_client::UpstreamClient;

use crate::cache::BlockCache;
use crate::domain::block::{Block, Origin};
use crate::domain::tree;
use crate::error::{EngineError, FetchKind};
use crate::extractor::{self, Analysis, ReorgRecord};
use crate::feed::{Feed, FeedStats};

/// Bound on the inbound observation channel (§5): feeds block, applying
/// natural backpressure, when the coordinator falls behind.
const INBOUND_CHANNEL_SIZE: usize = 100;

/// Timeout for an on-demand parent/uncle fetch issued by the coordinator's
/// reference closure.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum height margin between the cache's current tip and a fork's
/// `start_height` before a finished verdict on that fork is trusted. A fork
/// that only just resolved this close to the tip could still be overtaken
/// by a late-arriving sibling on the losing branch; finalizing it on the
/// spot would race that arrival. Mirrors the original's
/// `distanceToLastBlockHeight = 2` margin on its live reorg loop.
const LIVE_TAIL_DISTANCE: u64 = 2;

/// Per-feed status, exposed for an optional status endpoint.
#[derive(Debug, Clone)]
pub struct FeedStatus {
    /// The feed's upstream URI.
    pub uri: String,
    /// Whether the feed currently holds a live connection.
    pub is_connected: bool,
    /// Whether the feed currently holds an active subscription.
    pub is_subscribed: bool,
    /// Blocks delivered by this feed so far.
    pub num_blocks: u64,
    /// Reconnects this feed has performed.
    pub num_reconnects: u64,
    /// Resubscribes this feed has performed.
    pub num_resubscribes: u64,
    /// Seconds until this feed's next backoff retry.
    pub next_retry_secs: u64,
}

/// Coordinator-wide status snapshot.
#[derive(Debug, Clone)]
pub struct Status {
    /// Per-feed counters.
    pub feeds: Vec<FeedStatus>,
    /// Number of blocks currently retained in the cache.
    pub cache_len: usize,
    /// Configured cache retention bound.
    pub max_blocks: u32,
    /// Number of distinct reorg identities emitted so far.
    pub reorgs_emitted: usize,
}

/// Owns the cache, the feed set, and the emitted-identity set; drives the
/// per-block procedure of §4.5.
pub struct Coordinator<C: UpstreamClient> {
    feeds: Vec<Arc<Feed<C>>>,
    cache: RwLock<BlockCache>,
    emitted: RwLock<HashSet<String>>,
    last_trigger_height: RwLock<Option<u64>>,
    outbound: mpsc::Sender<ReorgRecord>,
}

impl<C: UpstreamClient> Coordinator<C> {
    /// Build a coordinator over `upstream_uris`, retaining at most
    /// `max_blocks` cached blocks and pushing finished reorgs onto
    /// `outbound`.
    #[must_use]
    pub fn new(upstream_uris: &[String], outbound: mpsc::Sender<ReorgRecord>, max_blocks: u32) -> Self {
        let feeds = upstream_uris.iter().map(|uri| Arc::new(Feed::new(uri.clone()))).collect();
        Self {
            feeds,
            cache: RwLock::new(BlockCache::new(max_blocks)),
            emitted: RwLock::new(HashSet::new()),
            last_trigger_height: RwLock::new(None),
            outbound,
        }
    }

    /// Attempt an initial dial of every configured upstream. Returns the
    /// number that succeeded; the caller treats zero as fatal (§6).
    #[instrument(skip(self))]
    pub async fn connect_clients(&self) -> usize {
        let mut connected = 0;
        for feed in &self.feeds {
            match feed.probe_connect().await {
                Ok(()) => {
                    connected += 1;
                    info!(uri = feed.uri(), "connected to upstream");
                }
                Err(error) => warn!(uri = feed.uri(), %error, "initial dial failed"),
            }
        }
        connected
    }

    /// Spawn every feed's task and drive the coordinator loop until
    /// `cancel` fires, the inbound channel closes, or the downstream reorg
    /// consumer goes away.
    ///
    /// Per §7, a dropped outbound receiver terminates the coordinator: when
    /// [`Coordinator::handle_block`] reports [`EngineError::ConsumerGone`],
    /// this cancels `cancel` (so every feed task also unwinds out of its
    /// backoff loop) and breaks out of the loop instead of continuing to
    /// consume inbound blocks against a dead outbound channel.
    #[instrument(skip(self, cancel))]
    pub async fn subscribe_and_listen(&self, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::channel(INBOUND_CHANNEL_SIZE);

        let mut feed_tasks = Vec::new();
        for feed in &self.feeds {
            let feed = Arc::clone(feed);
            let tx = tx.clone();
            let cancel = cancel.clone();
            feed_tasks.push(tokio::spawn(async move { feed.run(tx, cancel).await }));
        }
        drop(tx);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                received = rx.recv() => {
                    match received {
                        Some(block) => {
                            if let Err(EngineError::ConsumerGone) = self.handle_block(block).await {
                                warn!("reorg consumer gone, terminating coordinator");
                                cancel.cancel();
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        for task in feed_tasks {
            let _ = task.await;
        }
    }

    /// Test hook: inject an observation synchronously, running the full
    /// per-block procedure of §4.5 without going through a feed task or
    /// channel.
    ///
    /// Unlike [`Coordinator::subscribe_and_listen`], this does not own a
    /// cancellation token to react to [`EngineError::ConsumerGone`] with —
    /// callers that need that behaviour drive the coordinator through
    /// `subscribe_and_listen` instead.
    pub async fn add_block(&self, block: Block) {
        let _ = self.handle_block(block).await;
    }

    /// Test hook: build a tree over a bounded window of the cache and
    /// extract its reorgs, without touching the emitted-identity set.
    ///
    /// `max_blocks` bounds the window length; `tail_distance` excludes the
    /// most recent N heights from the window (useful for inspecting a
    /// settled region while a split is still ongoing at the tip).
    pub async fn analyze_tree(&self, max_blocks: u64, tail_distance: u64) -> Option<Analysis> {
        let cache = self.cache.read().await;
        let latest = cache.latest()?;
        let earliest = cache.earliest()?;
        let end_height = latest.saturating_sub(tail_distance);
        if end_height < earliest {
            return None;
        }
        let start_height = end_height.saturating_sub(max_blocks).max(earliest);
        let built = tree::build(&cache, start_height, end_height).ok()?;
        Some(extractor::extract(&built))
    }

    /// Current per-feed and cache status.
    pub async fn status(&self) -> Status {
        let cache = self.cache.read().await;
        let feeds = self
            .feeds
            .iter()
            .map(|feed| feed_status(feed.uri(), &feed.stats()))
            .collect();
        Status {
            feeds,
            cache_len: cache.len(),
            max_blocks: cache.max_blocks(),
            reorgs_emitted: self.emitted.read().await.len(),
        }
    }

    /// Run the per-block procedure of §4.5 for one observation.
    ///
    /// # Errors
    /// Returns [`EngineError::ConsumerGone`] if the outbound reorg channel's
    /// receiver has been dropped while emitting a finished reorg — per §7
    /// this is the one failure that should terminate the coordinator rather
    /// than simply being logged and absorbed.
    #[instrument(skip(self, block), fields(number = block.number(), hash = %block.hash()))]
    async fn handle_block(&self, block: Block) -> Result<(), EngineError> {
        if !self.insert_with_closure(block.clone()).await {
            return Ok(());
        }

        {
            let mut cache = self.cache.write().await;
            cache.trim();
        }

        let height = block.number();
        let mut last_trigger = self.last_trigger_height.write().await;
        if *last_trigger == Some(height) {
            return Ok(());
        }
        *last_trigger = Some(height);
        drop(last_trigger);

        self.maybe_analyze().await
    }

    /// Insert `block`; if new, walk its reference closure backward (missing
    /// parent, then missing uncles), fetching each gap on demand from the
    /// feed that delivered the triggering block. Returns whether the
    /// top-level insert was new.
    async fn insert_with_closure(&self, block: Block) -> bool {
        let is_new = {
            let mut cache = self.cache.write().await;
            cache.insert(block.clone())
        };
        if !is_new {
            return false;
        }
        debug!(number = block.number(), hash = %block.hash(), source = block.source(), "inserted block");

        self.fill_gap(block.parent_hash(), block.source(), FetchKind::Parent).await;
        for uncle in block.uncle_hashes().to_vec() {
            self.fill_gap(uncle, block.source(), FetchKind::Uncle).await;
        }

        true
    }

    async fn fill_gap(&self, hash: B256, source: &str, kind: FetchKind) {
        let already_cached = {
            let cache = self.cache.read().await;
            cache.lookup(hash).is_some()
        };
        if already_cached {
            return;
        }

        let Some(feed) = self.feeds.iter().find(|f| f.uri() == source) else {
            return;
        };

        let origin = match kind {
            FetchKind::Parent => Origin::GetParent,
            FetchKind::Uncle => Origin::Uncle,
        };

        let fetched = tokio::time::timeout(FETCH_TIMEOUT, feed.fetch_by_hash(hash)).await;
        match fetched {
            Ok(Ok(payload)) => {
                let block = Block::from_upstream(&payload, source.to_string(), origin);
                Box::pin(self.insert_with_closure(block)).await;
            }
            Ok(Err(error)) => {
                let engine_error = EngineError::Fetch { kind, hash, source: error };
                warn!(%hash, %kind, %engine_error, "on-demand fetch failed");
            }
            Err(_) => {
                warn!(%hash, %kind, "on-demand fetch timed out");
            }
        }
    }

    #[instrument(skip(self))]
    async fn maybe_analyze(&self) -> Result<(), EngineError> {
        let (start_height, end_height) = {
            let cache = self.cache.read().await;
            let Some(earliest) = cache.earliest() else { return Ok(()) };
            let Some(latest) = cache.latest() else { return Ok(()) };
            if latest.saturating_sub(earliest) < 2 {
                return Ok(());
            }
            (earliest, latest)
        };

        let built = {
            let cache = self.cache.read().await;
            tree::build(&cache, start_height, end_height)
        };

        let built = match built {
            Ok(tree) => tree,
            Err(error @ EngineError::ParentMissing { .. }) => {
                warn!(%error, "tree build failed, deferring analysis");
                return Ok(());
            }
            Err(error) => {
                warn!(%error, "unexpected tree build failure");
                return Ok(());
            }
        };

        let mut analysis = extractor::extract(&built);
        // Defer a finished fork whose start is still within the tail zone —
        // its losing branch could yet grow a sibling and change the
        // verdict — instead of finalizing it immediately. It will be
        // re-evaluated on every later trigger until it clears the margin.
        analysis.records.retain(|record| {
            !record.is_finished() || end_height.saturating_sub(record.start_height()) >= LIVE_TAIL_DISTANCE
        });

        self.emit_finished(analysis).await
    }

    /// Push every newly-finished reorg onto the outbound channel.
    ///
    /// # Errors
    /// Returns [`EngineError::ConsumerGone`] as soon as a send fails,
    /// leaving any remaining records in `analysis` unemitted this cycle —
    /// the caller terminates the coordinator rather than retrying.
    async fn emit_finished(&self, analysis: Analysis) -> Result<(), EngineError> {
        for record in analysis.records {
            if !record.is_finished() {
                continue;
            }
            let id = record.id();
            let mut emitted = self.emitted.write().await;
            if emitted.contains(&id) {
                continue;
            }
            emitted.insert(id.clone());
            drop(emitted);

            info!(
                id = %id,
                depth = record.depth(),
                blocks = record.blocks_involved().len(),
                "reorg detected"
            );
            if self.outbound.send(record).await.is_err() {
                warn!("outbound reorg channel closed, consumer gone");
                return Err(EngineError::ConsumerGone);
            }
        }
        Ok(())
    }
}

fn feed_status(uri: &str, stats: &FeedStats) -> FeedStatus {
    FeedStatus {
        uri: uri.to_string(),
        is_connected: stats.is_connected(),
        is_subscribed: stats.is_subscribed(),
        num_blocks: stats.num_blocks(),
        num_reconnects: stats.num_reconnects(),
        num_resubscribes: stats.num_resubscribes(),
        next_retry_secs: stats.next_retry_secs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::make_block;
    use upstream_client::MockUpstreamClient;

    fn coordinator() -> (Coordinator<MockUpstreamClient>, mpsc::Receiver<ReorgRecord>) {
        let (tx, rx) = mpsc::channel(16);
        (Coordinator::new(&["test://mock".to_string()], tx, 1000), rx)
    }

    #[tokio::test]
    async fn single_chain_emits_nothing() {
        let (coordinator, mut rx) = coordinator();
        let a = make_block(100, B256::ZERO, Origin::Subscription);
        let b = make_block(101, a.hash(), Origin::Subscription);
        let c = make_block(102, b.hash(), Origin::Subscription);
        coordinator.add_block(a).await;
        coordinator.add_block(b).await;
        coordinator.add_block(c).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_outbound_receiver_reports_consumer_gone() {
        let (coordinator, rx) = coordinator();
        drop(rx);

        let a = make_block(100, B256::ZERO, Origin::Subscription);
        let b = make_block(101, a.hash(), Origin::Subscription);
        let c = make_block(101, a.hash(), Origin::Subscription);
        let d = make_block(102, b.hash(), Origin::Subscription);
        let e = make_block(103, d.hash(), Origin::Subscription);

        for block in [a, b, c, d] {
            coordinator.add_block(block).await;
        }
        // This block completes the fork at 101 and triggers the emission
        // that hits the now-dropped outbound receiver.
        let result = coordinator.handle_block(e).await;
        assert!(matches!(result, Err(EngineError::ConsumerGone)));
    }

    #[tokio::test]
    async fn simple_fork_emits_one_reorg() {
        let (coordinator, mut rx) = coordinator();
        let a = make_block(100, B256::ZERO, Origin::Subscription);
        let b = make_block(101, a.hash(), Origin::Subscription);
        let c = make_block(101, a.hash(), Origin::Subscription);
        let d = make_block(102, b.hash(), Origin::Subscription);
        let e = make_block(103, d.hash(), Origin::Subscription);

        for block in [a, b, c, d, e] {
            coordinator.add_block(block).await;
        }

        let record = rx.try_recv().expect("expected one emitted reorg");
        assert_eq!(record.id(), "101_101_d1_b2_l");
        assert!(rx.try_recv().is_err(), "reorg identity must not repeat");
    }

    #[tokio::test]
    async fn duplicate_insert_does_not_retrigger_analysis() {
        let (coordinator, mut rx) = coordinator();
        let a = make_block(100, B256::ZERO, Origin::Subscription);
        let b = make_block(101, a.hash(), Origin::Subscription);
        let c = make_block(101, a.hash(), Origin::Subscription);
        let d = make_block(102, b.hash(), Origin::Subscription);
        let e = make_block(103, d.hash(), Origin::Subscription);

        for block in [a.clone(), b.clone(), c.clone(), d.clone(), e.clone()] {
            coordinator.add_block(block).await;
        }
        // Re-delivering the same final block again must not produce a
        // second emission of the already-seen identity.
        coordinator.add_block(e).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn status_reports_cache_bound() {
        let (coordinator, _rx) = coordinator();
        let status = coordinator.status().await;
        assert_eq!(status.max_blocks, 1000);
        assert_eq!(status.feeds.len(), 1);
    }
}
