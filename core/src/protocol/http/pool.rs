/*
 * pool.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, a cross-platform application runtime.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Process-wide connection pool. Connections are keyed by destination and
//! tagged with the execution context that created them; a requester prefers
//! its own context's idle connections, and at the cap an idle connection on a
//! foreign context is evicted (closed on its owning runtime) to make room.
//! Excess requesters queue FIFO and are woken as slots open. The mutex only
//! guards the scan/insert/evict bookkeeping; stream I/O always happens on the
//! task that currently owns the connection.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::debug;
use tokio::sync::oneshot;

use crate::protocol::http::connection::{Destination, HttpConn};
use crate::protocol::http::error::HttpError;

/// Maximum simultaneously live connections per (host, port, scheme).
pub const MAX_PER_DESTINATION: usize = 5;

/// Identifies the execution context (event loop / worker) a connection
/// belongs to. Assigned per thread on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextId(u64);

impl ContextId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_CONTEXT: Cell<u64> = const { Cell::new(0) };
}

/// Context id of the calling thread, assigned on first use.
pub fn current_context() -> ContextId {
    THREAD_CONTEXT.with(|slot| {
        if slot.get() == 0 {
            slot.set(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        }
        ContextId(slot.get())
    })
}

struct Entry {
    id: u64,
    dest: Destination,
    in_use: bool,
    context: ContextId,
    runtime: tokio::runtime::Handle,
    /// Some while idle; taken by the borrowing transfer while in use.
    conn: Option<HttpConn>,
}

struct Waiter {
    dest: Destination,
    tx: oneshot::Sender<()>,
}

struct PoolInner {
    entries: Vec<Entry>,
    waiters: VecDeque<Waiter>,
    next_id: u64,
    shut_down: bool,
}

/// The pool service. One process-wide instance lives behind `pool()`;
/// tests construct their own.
pub struct ConnectionPool {
    inner: Mutex<PoolInner>,
}

enum Plan {
    Reuse(u64, HttpConn),
    Connect(u64),
    Wait(oneshot::Receiver<()>),
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                entries: Vec::new(),
                waiters: VecDeque::new(),
                next_id: 1,
                shut_down: false,
            }),
        }
    }

    /// Borrow a connection to `dest`, connecting, evicting, or queuing as the
    /// pool state requires. Completes immediately when an idle match exists.
    pub async fn acquire(
        self: Arc<Self>,
        dest: &Destination,
        ctx: ContextId,
        disable_tls_verify: bool,
    ) -> Result<PooledConnection, HttpError> {
        loop {
            let plan = {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if inner.shut_down {
                    return Err(HttpError::usage("connection pool is shut down"));
                }
                let mut reuse = None;
                for entry in inner.entries.iter_mut() {
                    if !entry.in_use && entry.dest == *dest && entry.context == ctx {
                        if let Some(conn) = entry.conn.take() {
                            entry.in_use = true;
                            reuse = Some((entry.id, conn));
                            break;
                        }
                    }
                }
                if let Some((id, conn)) = reuse {
                    Plan::Reuse(id, conn)
                } else {
                    let live = inner.entries.iter().filter(|e| e.dest == *dest).count();
                    if live < MAX_PER_DESTINATION {
                        let id = inner.next_id;
                        inner.next_id += 1;
                        inner.entries.push(Entry {
                            id,
                            dest: dest.clone(),
                            in_use: true,
                            context: ctx,
                            runtime: tokio::runtime::Handle::current(),
                            conn: None,
                        });
                        Plan::Connect(id)
                    } else if let Some(pos) = inner
                        .entries
                        .iter()
                        .position(|e| !e.in_use && e.conn.is_some() && e.dest == *dest)
                    {
                        // cap reached; the only idle match lives on a foreign
                        // context. Evict it (close on its own runtime) and
                        // connect fresh on the requester's context.
                        let evicted = inner.entries.remove(pos);
                        debug!(
                            "pool: evicting idle connection to {}:{} from context {:?}",
                            evicted.dest.host, evicted.dest.port, evicted.context
                        );
                        if let Some(conn) = evicted.conn {
                            evicted.runtime.spawn(conn.close());
                        }
                        let id = inner.next_id;
                        inner.next_id += 1;
                        inner.entries.push(Entry {
                            id,
                            dest: dest.clone(),
                            in_use: true,
                            context: ctx,
                            runtime: tokio::runtime::Handle::current(),
                            conn: None,
                        });
                        Plan::Connect(id)
                    } else {
                        let (tx, rx) = oneshot::channel();
                        inner.waiters.push_back(Waiter {
                            dest: dest.clone(),
                            tx,
                        });
                        Plan::Wait(rx)
                    }
                }
            };

            match plan {
                Plan::Reuse(id, conn) => {
                    return Ok(PooledConnection {
                        pool: self.clone(),
                        id,
                        conn: Some(conn),
                    });
                }
                Plan::Connect(id) => match HttpConn::connect(dest, disable_tls_verify).await {
                    Ok(conn) => {
                        return Ok(PooledConnection {
                            pool: self.clone(),
                            id,
                            conn: Some(conn),
                        });
                    }
                    Err(e) => {
                        // the reserved slot is gone; let a queued waiter retry
                        self.forget(id);
                        return Err(e);
                    }
                },
                Plan::Wait(rx) => {
                    // woken on release or slot-free; re-scan (a closed channel
                    // means shutdown, which the next loop pass reports)
                    let _ = rx.await;
                }
            }
        }
    }

    /// Drop a reserved or in-use entry without returning a connection.
    fn forget(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.retain(|e| e.id != id);
        Self::wake_locked(&mut inner);
    }

    fn release_inner(&self, id: u64, conn: HttpConn, force_close: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(pos) = inner.entries.iter().position(|e| e.id == id) else {
            // entry removed underneath us (shutdown): just close
            Self::close_anywhere(conn);
            return;
        };
        if force_close || !conn.is_clean() || inner.shut_down {
            let entry = inner.entries.remove(pos);
            entry.runtime.spawn(conn.close());
        } else {
            let entry = &mut inner.entries[pos];
            entry.in_use = false;
            entry.conn = Some(conn);
        }
        Self::wake_locked(&mut inner);
    }

    /// Service the head of the wait queue: the first waiter whose destination
    /// now has an idle connection or a free slot.
    fn wake_locked(inner: &mut PoolInner) {
        for i in 0..inner.waiters.len() {
            let dest = inner.waiters[i].dest.clone();
            let has_idle = inner
                .entries
                .iter()
                .any(|e| !e.in_use && e.conn.is_some() && e.dest == dest);
            let live = inner.entries.iter().filter(|e| e.dest == dest).count();
            if has_idle || live < MAX_PER_DESTINATION {
                if let Some(waiter) = inner.waiters.remove(i) {
                    let _ = waiter.tx.send(());
                }
                return;
            }
        }
    }

    fn close_anywhere(conn: HttpConn) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(conn.close());
            }
            // dropping the stream closes the socket without the shutdown
            // handshake; good enough off-runtime
            Err(_) => drop(conn),
        }
    }

    /// Close all idle connections and fail queued waiters. Further acquires
    /// report a shutdown error; in-flight connections are closed on release.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.shut_down = true;
        for entry in inner.entries.drain(..) {
            if let Some(conn) = entry.conn {
                entry.runtime.spawn(conn.close());
            }
        }
        // dropping the senders wakes every waiter; they observe shut_down
        inner.waiters.clear();
    }

    /// Number of live (idle + in-use + connecting) entries for a destination.
    pub fn live_count(&self, dest: &Destination) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.iter().filter(|e| e.dest == *dest).count()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

static POOL: OnceLock<Arc<ConnectionPool>> = OnceLock::new();

/// The process-wide pool.
pub fn pool() -> Arc<ConnectionPool> {
    POOL.get_or_init(|| Arc::new(ConnectionPool::new())).clone()
}

/// A borrowed connection. Release explicitly with `release(force_close)`;
/// dropping without releasing force-closes (never silently reused).
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    id: u64,
    conn: Option<HttpConn>,
}

impl PooledConnection {
    pub fn conn(&mut self) -> &mut HttpConn {
        self.conn.as_mut().expect("connection already released")
    }

    /// Return the connection to the pool. `force_close` (or leftover bytes in
    /// the parse buffer) removes it permanently; otherwise it joins the idle
    /// set and the wait queue is serviced.
    pub fn release(mut self, force_close: bool) {
        if let Some(conn) = self.conn.take() {
            self.pool.release_inner(self.id, conn, force_close);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("has_conn", &self.conn.is_some())
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release_inner(self.id, conn, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn stub_server() -> (std::net::SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    loop {
                        match sock.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }
                });
            }
        });
        (addr, accepted)
    }

    fn dest_for(addr: std::net::SocketAddr) -> Destination {
        Destination {
            host: addr.ip().to_string(),
            port: addr.port(),
            tls: false,
        }
    }

    #[tokio::test]
    async fn cap_is_never_exceeded_under_contention() {
        let (addr, accepted) = stub_server().await;
        let dest = dest_for(addr);
        let pool = Arc::new(ConnectionPool::new());

        let mut tasks = Vec::new();
        for _ in 0..12 {
            let pool = pool.clone();
            let dest = dest.clone();
            tasks.push(tokio::spawn(async move {
                let ctx = ContextId::from_raw(7);
                let conn = pool.clone().acquire(&dest, ctx, false).await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                conn.release(false);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert!(pool.live_count(&dest) <= MAX_PER_DESTINATION);
        assert!(
            accepted.load(Ordering::SeqCst) <= MAX_PER_DESTINATION,
            "opened {} connections for a cap of {}",
            accepted.load(Ordering::SeqCst),
            MAX_PER_DESTINATION
        );
    }

    #[tokio::test]
    async fn same_context_reuses_idle_connection() {
        let (addr, accepted) = stub_server().await;
        let dest = dest_for(addr);
        let pool = Arc::new(ConnectionPool::new());
        let ctx = ContextId::from_raw(1);

        let conn = pool.clone().acquire(&dest, ctx, false).await.unwrap();
        conn.release(false);
        let conn = pool.clone().acquire(&dest, ctx, false).await.unwrap();
        conn.release(false);

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn foreign_idle_connection_is_evicted_at_cap() {
        let (addr, accepted) = stub_server().await;
        let dest = dest_for(addr);
        let pool = Arc::new(ConnectionPool::new());
        let ctx_a = ContextId::from_raw(10);
        let ctx_b = ContextId::from_raw(11);

        let mut held = Vec::new();
        for _ in 0..MAX_PER_DESTINATION {
            held.push(pool.clone().acquire(&dest, ctx_a, false).await.unwrap());
        }
        for conn in held {
            conn.release(false);
        }
        assert_eq!(accepted.load(Ordering::SeqCst), MAX_PER_DESTINATION);

        // cap reached, all idle connections owned by ctx_a: a ctx_b acquire
        // must evict one and open a fresh connection
        let conn = pool.clone().acquire(&dest, ctx_b, false).await.unwrap();
        conn.release(false);
        assert_eq!(accepted.load(Ordering::SeqCst), MAX_PER_DESTINATION + 1);
        assert!(pool.live_count(&dest) <= MAX_PER_DESTINATION);
    }

    #[tokio::test]
    async fn force_close_removes_from_pool() {
        let (addr, accepted) = stub_server().await;
        let dest = dest_for(addr);
        let pool = Arc::new(ConnectionPool::new());
        let ctx = ContextId::from_raw(2);

        let conn = pool.clone().acquire(&dest, ctx, false).await.unwrap();
        conn.release(true);
        assert_eq!(pool.live_count(&dest), 0);

        let conn = pool.clone().acquire(&dest, ctx, false).await.unwrap();
        conn.release(false);
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn connect_error_surfaces_to_the_requester() {
        let pool = Arc::new(ConnectionPool::new());
        // bind then drop to find a port with no listener
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dest = dest_for(addr);
        let err = pool
            .clone()
            .acquire(&dest, ContextId::from_raw(3), false)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Connect(_)));
        assert_eq!(pool.live_count(&dest), 0);
    }

    #[tokio::test]
    async fn shutdown_fails_acquire() {
        let (addr, _accepted) = stub_server().await;
        let dest = dest_for(addr);
        let pool = Arc::new(ConnectionPool::new());

        let conn = pool.clone().acquire(&dest, ContextId::from_raw(4), false).await.unwrap();
        conn.release(false);
        pool.shutdown();
        assert_eq!(pool.live_count(&dest), 0);
        let err = pool
            .acquire(&dest, ContextId::from_raw(4), false)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Usage(_)));
    }
}
