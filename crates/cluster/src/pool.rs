//! Bounded per-node connection pool.
//!
//! Idle connections wait in a lock-free queue. `total` counts every
//! connection that belongs to the node, pooled or checked out, so the pool
//! can cap how many it opens.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::ArrayQueue;
use info::Connection;

/// Idle connections of one node.
pub struct ConnectionPool {
    idle: ArrayQueue<Connection>,
    total: AtomicUsize,
    limit: Option<usize>,
}

impl ConnectionPool {
    /// Creates a pool holding up to `capacity` idle connections. When
    /// `limit_total` is set, no more than `capacity` connections exist at
    /// once.
    pub fn new(capacity: usize, limit_total: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            idle: ArrayQueue::new(capacity),
            total: AtomicUsize::new(0),
            limit: limit_total.then_some(capacity),
        }
    }

    /// Takes a usable idle connection. Broken or expired ones found on the
    /// way are discarded.
    pub fn poll(&self) -> Option<Connection> {
        while let Some(conn) = self.idle.pop() {
            if conn.is_connected() && !conn.is_idle() {
                return Some(conn);
            }
            self.discard(conn);
        }
        None
    }

    /// Claims a slot for a new connection. Fails when the limit is reached.
    pub fn try_reserve(&self) -> bool {
        match self.limit {
            None => {
                self.total.fetch_add(1, Ordering::AcqRel);
                true
            }
            Some(limit) => self
                .total
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < limit).then_some(n + 1)
                })
                .is_ok(),
        }
    }

    /// Gives back a slot claimed with `try_reserve` whose connection was
    /// never created.
    pub fn release(&self) {
        let _ = self
            .total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Returns a connection to the pool, or discards it when the pool is full.
    pub fn offer(&self, conn: Connection) {
        if let Err(conn) = self.idle.push(conn) {
            self.discard(conn);
        }
    }

    /// Drops a connection that belongs to this pool.
    pub fn discard(&self, conn: Connection) {
        drop(conn);
        self.release();
    }

    /// Closes pooled connections whose idle deadline has passed. Returns
    /// how many were closed.
    pub fn drop_idle(&self) -> usize {
        let mut dropped = 0;
        for _ in 0..self.idle.len() {
            let Some(conn) = self.idle.pop() else { break };
            if conn.is_idle() || !conn.is_connected() {
                self.discard(conn);
                dropped += 1;
            } else {
                self.offer(conn);
            }
        }
        dropped
    }

    /// Closes every pooled connection.
    pub fn close_all(&self) {
        while let Some(conn) = self.idle.pop() {
            self.discard(conn);
        }
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Number of connections owned by the node, pooled or in use.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("idle", &self.idle_count())
            .field("total", &self.total())
            .finish()
    }
}
