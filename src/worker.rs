//! Search Service - worker pool running searches off the caller's thread
//!
//! Each search runs start to finish on one worker. Workers share the engine,
//! so concurrent searches draw from the same rate-limit budget and see each
//! other's cache writes.
//!
//! ```text
//! Caller(s)                    Channel                     Workers
//!     ├─ find_hashtag_path() ──►│ Command::FindHashtagPath ──►│ engine.find_hashtag_path()
//!     ├─ find_user_path() ─────►│ Command::FindUserPath ─────►│ engine.find_user_path()
//!     │◄────────────────────────│ response_tx ◄───────────────│
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::discovery::{Hashtag, User};
use crate::engine::SearchEngine;
use crate::error::{Result, SearchError};
use crate::ratelimit::AuthContext;
use crate::search::{SearchRequest, SearchResult};

/// Commands processed by the search workers
pub enum Command {
    FindHashtagPath {
        request: SearchRequest<Hashtag>,
        auth: Option<AuthContext>,
        response_tx: Sender<Result<SearchResult<Hashtag>>>,
    },
    FindUserPath {
        request: SearchRequest<User>,
        auth: Option<AuthContext>,
        response_tx: Sender<Result<SearchResult<User>>>,
    },
    Shutdown,
}

pub struct SearchService {
    engine: Arc<SearchEngine>,
    command_tx: Sender<Command>,
    workers: Vec<JoinHandle<()>>,
}

impl SearchService {
    /// Spawn `workers` threads (at least one) serving `engine`
    pub fn start(engine: Arc<SearchEngine>, workers: usize) -> Result<Self> {
        let (command_tx, command_rx) = unbounded::<Command>();

        let mut handles = Vec::with_capacity(workers.max(1));
        for worker_id in 0..workers.max(1) {
            let engine = Arc::clone(&engine);
            let command_rx = command_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("degrees-search-{}", worker_id))
                .spawn(move || worker_loop(worker_id, engine, command_rx))?;
            handles.push(handle);
        }

        tracing::info!("Search service started with {} workers", handles.len());

        Ok(Self {
            engine,
            command_tx,
            workers: handles,
        })
    }

    pub fn engine(&self) -> &Arc<SearchEngine> {
        &self.engine
    }

    /// Queue a hashtag search; the result arrives on the returned channel
    pub fn submit_hashtag_path(
        &self,
        request: SearchRequest<Hashtag>,
        auth: Option<AuthContext>,
    ) -> Result<Receiver<Result<SearchResult<Hashtag>>>> {
        let (response_tx, response_rx) = bounded(1);
        self.command_tx
            .send(Command::FindHashtagPath { request, auth, response_tx })
            .map_err(|_| SearchError::WorkerUnavailable)?;
        Ok(response_rx)
    }

    pub fn submit_user_path(
        &self,
        request: SearchRequest<User>,
        auth: Option<AuthContext>,
    ) -> Result<Receiver<Result<SearchResult<User>>>> {
        let (response_tx, response_rx) = bounded(1);
        self.command_tx
            .send(Command::FindUserPath { request, auth, response_tx })
            .map_err(|_| SearchError::WorkerUnavailable)?;
        Ok(response_rx)
    }

    pub fn find_hashtag_path(
        &self,
        request: SearchRequest<Hashtag>,
        auth: Option<AuthContext>,
    ) -> Result<SearchResult<Hashtag>> {
        self.submit_hashtag_path(request, auth)?
            .recv()
            .map_err(|_| SearchError::WorkerUnavailable)?
    }

    pub fn find_user_path(&self, request: SearchRequest<User>, auth: Option<AuthContext>) -> Result<SearchResult<User>> {
        self.submit_user_path(request, auth)?
            .recv()
            .map_err(|_| SearchError::WorkerUnavailable)?
    }

    /// Stop all workers after their current search, then flush the cache
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for _ in 0..self.workers.len() {
            let _ = self.command_tx.send(Command::Shutdown);
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if let Err(e) = self.engine.cache().flush() {
            tracing::error!("Flush on shutdown failed: {}", e);
        }
        tracing::info!("Search service stopped");
    }
}

impl Drop for SearchService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(worker_id: usize, engine: Arc<SearchEngine>, command_rx: Receiver<Command>) {
    tracing::debug!("Search worker {} started", worker_id);

    while let Ok(command) = command_rx.recv() {
        match command {
            Command::FindHashtagPath { request, auth, response_tx } => {
                let result = engine.find_hashtag_path(&request, auth.as_ref());
                if let Err(e) = &result {
                    tracing::warn!("Hashtag search {} -> {} failed: {}", request.start, request.end, e);
                }
                let _ = response_tx.send(result);
            }
            Command::FindUserPath { request, auth, response_tx } => {
                let result = engine.find_user_path(&request, auth.as_ref());
                if let Err(e) = &result {
                    tracing::warn!("User search {} -> {} failed: {}", request.start.id, request.end.id, e);
                }
                let _ = response_tx.send(result);
            }
            Command::Shutdown => break,
        }
    }

    tracing::debug!("Search worker {} stopped", worker_id);
}
