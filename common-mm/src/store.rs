use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::EngineError;
use crate::ticket::Ticket;

pub const STORE_URL_ENV: &str = "MM_STORE_URL";

const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_TICKET_TTL_SECS: u64 = 600;

/// Ticket store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backing store endpoint, from `MM_STORE_URL`.
    pub store_url: String,
    /// Ticket records expire after this long if still pooled.
    pub ticket_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_url: DEFAULT_STORE_URL.to_string(),
            ticket_ttl: Duration::from_secs(DEFAULT_TICKET_TTL_SECS),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            store_url: std::env::var(STORE_URL_ENV)
                .unwrap_or_else(|_| DEFAULT_STORE_URL.to_string()),
            ticket_ttl: Duration::from_secs(DEFAULT_TICKET_TTL_SECS),
        }
    }
}

/// Counters for store traffic, exposed for dashboards and tests.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    pub tickets_written: AtomicU64,
    pub tickets_expired: AtomicU64,
    pub pool_inserts: AtomicU64,
    pub pool_removals: AtomicU64,
}

impl StoreMetrics {
    pub fn get_stats(&self) -> (u64, u64, u64, u64) {
        (
            self.tickets_written.load(Ordering::Relaxed),
            self.tickets_expired.load(Ordering::Relaxed),
            self.pool_inserts.load(Ordering::Relaxed),
            self.pool_removals.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Clone)]
struct StoredTicket {
    ticket: Ticket,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
struct PoolEntry {
    ticket_id: String,
    score: f64,
    seq: u64,
}

/// Per-mode pool: ticket ids ordered by (score, insertion sequence).
#[derive(Debug, Default)]
struct Pool {
    entries: Vec<PoolEntry>,
    next_seq: u64,
}

impl Pool {
    fn position_for(&self, score: f64, seq: u64) -> usize {
        self.entries
            .partition_point(|e| (e.score, e.seq) < (score, seq))
    }

    fn insert(&mut self, ticket_id: &str, score: f64) {
        if let Some(existing) = self.entries.iter().position(|e| e.ticket_id == ticket_id) {
            if self.entries[existing].score == score {
                return;
            }
            self.entries.remove(existing);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let at = self.position_for(score, seq);
        self.entries.insert(
            at,
            PoolEntry {
                ticket_id: ticket_id.to_string(),
                score,
                seq,
            },
        );
    }

    fn remove_many(&mut self, ticket_ids: &[String]) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| !ticket_ids.iter().any(|id| id == &e.ticket_id));
        before - self.entries.len()
    }

    fn pop_min(&mut self) -> Option<(String, f64)> {
        if self.entries.is_empty() {
            return None;
        }
        let entry = self.entries.remove(0);
        Some((entry.ticket_id, entry.score))
    }

    fn range_by_score(&self, min: f64, max: f64) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.score >= min && e.score <= max)
            .map(|e| e.ticket_id.clone())
            .collect()
    }

    fn contains(&self, ticket_id: &str) -> bool {
        self.entries.iter().any(|e| e.ticket_id == ticket_id)
    }
}

/// Ticket records plus per-mode skill-ordered pools.
///
/// In-memory backend; the operation set mirrors a hash-map-plus-sorted-set
/// deployment behind `store_url`, so a shared store can slot in without
/// touching callers. Every method is individually atomic; cross-operation
/// consistency is the scheduler's job (it is the pool's unique remover).
#[derive(Debug, Clone)]
pub struct TicketStore {
    tickets: Arc<RwLock<HashMap<String, StoredTicket>>>,
    pools: Arc<RwLock<HashMap<String, Pool>>>,
    metrics: Arc<StoreMetrics>,
    config: StoreConfig,
}

impl Default for TicketStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl TicketStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            tickets: Arc::new(RwLock::new(HashMap::new())),
            pools: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(StoreMetrics::default()),
            config,
        }
    }

    pub fn metrics(&self) -> Arc<StoreMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Write a ticket record with the configured TTL.
    pub async fn put_ticket(&self, ticket: &Ticket) -> Result<(), EngineError> {
        let mut tickets = self.tickets.write().await;
        tickets.insert(
            ticket.ticket_id.clone(),
            StoredTicket {
                ticket: ticket.clone(),
                expires_at: Instant::now() + self.config.ticket_ttl,
            },
        );
        self.metrics.tickets_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Fetch a ticket record. Expired records behave as missing.
    pub async fn get_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>, EngineError> {
        let tickets = self.tickets.read().await;
        Ok(tickets
            .get(ticket_id)
            .filter(|stored| stored.expires_at > Instant::now())
            .map(|stored| stored.ticket.clone()))
    }

    pub async fn delete_ticket(&self, ticket_id: &str) -> Result<(), EngineError> {
        let mut tickets = self.tickets.write().await;
        tickets.remove(ticket_id);
        Ok(())
    }

    /// Insert a ticket id into a mode's pool. Idempotent on (id, score);
    /// re-inserting with a different score repositions the entry.
    pub async fn pool_insert(
        &self,
        mode: &str,
        ticket_id: &str,
        score: f64,
    ) -> Result<(), EngineError> {
        let mut pools = self.pools.write().await;
        pools.entry(mode.to_string()).or_default().insert(ticket_id, score);
        self.metrics.pool_inserts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove the given ids from a mode's pool in one atomic step, returning
    /// how many were actually present. A count below `ticket_ids.len()`
    /// means a competitor removed some first; nothing is rolled back here.
    pub async fn pool_remove_many(
        &self,
        mode: &str,
        ticket_ids: &[String],
    ) -> Result<usize, EngineError> {
        let mut pools = self.pools.write().await;
        let removed = match pools.get_mut(mode) {
            Some(pool) => pool.remove_many(ticket_ids),
            None => 0,
        };
        self.metrics
            .pool_removals
            .fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }

    /// Ids whose score lies in `[min, max]`, ascending by score with ties in
    /// insertion order.
    pub async fn pool_range_by_score(
        &self,
        mode: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, EngineError> {
        let pools = self.pools.read().await;
        Ok(pools
            .get(mode)
            .map(|pool| pool.range_by_score(min, max))
            .unwrap_or_default())
    }

    /// Pop the lowest-scored entry, the anchor of a matchmaking round.
    pub async fn pool_pop_min(&self, mode: &str) -> Result<Option<(String, f64)>, EngineError> {
        let mut pools = self.pools.write().await;
        let popped = pools.get_mut(mode).and_then(|pool| pool.pop_min());
        if popped.is_some() {
            self.metrics.pool_removals.fetch_add(1, Ordering::Relaxed);
        }
        Ok(popped)
    }

    pub async fn pool_size(&self, mode: &str) -> Result<usize, EngineError> {
        let pools = self.pools.read().await;
        Ok(pools.get(mode).map(|pool| pool.entries.len()).unwrap_or(0))
    }

    pub async fn pool_contains(&self, mode: &str, ticket_id: &str) -> Result<bool, EngineError> {
        let pools = self.pools.read().await;
        Ok(pools
            .get(mode)
            .map(|pool| pool.contains(ticket_id))
            .unwrap_or(false))
    }

    /// Drop expired ticket records and their pool entries. Returns how many
    /// records were reaped.
    pub async fn cleanup_expired(&self) -> Result<u64, EngineError> {
        let now = Instant::now();
        let expired: Vec<String> = {
            let tickets = self.tickets.read().await;
            tickets
                .iter()
                .filter(|(_, stored)| stored.expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect()
        };
        if expired.is_empty() {
            return Ok(0);
        }

        {
            let mut tickets = self.tickets.write().await;
            for id in &expired {
                tickets.remove(id);
            }
        }
        {
            let mut pools = self.pools.write().await;
            for pool in pools.values_mut() {
                pool.remove_many(&expired);
            }
        }

        self.metrics
            .tickets_expired
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        debug!(count = expired.len(), "reaped expired tickets");
        Ok(expired.len() as u64)
    }
}
