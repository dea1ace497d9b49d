//! Per-tile fetch+decode orchestration
//!
//! Work runs as scheduler tasks on blocking workers; outcomes travel back
//! over an unbounded channel the engine drains once per tick, so worker
//! threads never touch tile state. One outcome is emitted per attempt;
//! canceled work emits nothing.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::types::{DVec3, Vec3};
use crate::fetch::TileFetcher;
use crate::format::codec::CodecRegistry;
use crate::format::decoder::{decode_tile, DecodedTile};
use crate::streaming::tile::TileKey;
use crate::tasks::{Task, TaskPool};

/// Payload of a successful session initialization.
pub struct SessionData {
    pub srs: String,
    pub srs_origin: DVec3,
    pub offset: Vec3,
    /// Directory of the root tile; child references resolve against it
    pub base_data_url: String,
    /// Decoded root tile; its nodes become the session's root nodes
    pub root: DecodedTile,
}

/// Completion message drained by the engine once per tick.
pub enum LoadOutcome {
    Tile {
        key: TileKey,
        result: Result<DecodedTile, String>,
    },
    Session {
        epoch: u64,
        result: Result<SessionData, String>,
    },
}

/// Shared handles every load task needs: scheduler, transport, codecs, and
/// the completion channel back to the engine.
#[derive(Clone)]
pub struct LoaderContext {
    pub pool: Arc<TaskPool>,
    pub fetcher: Arc<dyn TileFetcher>,
    pub codecs: Arc<CodecRegistry>,
    pub completions: mpsc::UnboundedSender<LoadOutcome>,
}

/// Per-tile load handle. At most one live task per tile.
pub struct TileLoader {
    url: String,
    task: Option<Task>,
}

impl TileLoader {
    pub fn new(url: String) -> Self {
        Self { url, task: None }
    }

    /// Whether a task for this tile is still Waiting or Running.
    pub fn is_loading(&self) -> bool {
        self.task.as_ref().is_some_and(Task::is_live)
    }

    /// Submit a fetch+decode task for this tile. A no-op while a previous
    /// task is still live.
    pub fn start(&mut self, key: TileKey, ctx: &LoaderContext) {
        if self.is_loading() {
            log::warn!("tile {} is already loading, start ignored", self.url);
            return;
        }
        let url = self.url.clone();
        let fetcher = ctx.fetcher.clone();
        let codecs = ctx.codecs.clone();
        let completions = ctx.completions.clone();

        let task = Task::new(move |cancel| {
            let bytes = match fetcher.fetch(&url) {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = completions.send(LoadOutcome::Tile {
                        key,
                        result: Err(e.to_string()),
                    });
                    return;
                }
            };
            if cancel.is_canceled() {
                return;
            }
            match decode_tile(&url, &bytes, &codecs, cancel) {
                Ok(Some(decoded)) => {
                    let _ = completions.send(LoadOutcome::Tile {
                        key,
                        result: Ok(decoded),
                    });
                }
                // Canceled mid-decode: no notification
                Ok(None) => {}
                Err(e) => {
                    let _ = completions.send(LoadOutcome::Tile {
                        key,
                        result: Err(e.to_string()),
                    });
                }
            }
        });
        ctx.pool.submit(task.clone());
        self.task = Some(task);
    }

    /// Forget the task handle once its outcome has been applied. The worker
    /// sends the outcome from inside the task body, so the engine can drain
    /// it before the scheduler marks the task finished; without this, a
    /// retry started in that window would be refused and the tile would
    /// stay in its loading state forever.
    pub fn finish(&mut self) {
        self.task = None;
    }

    /// Cancel the live task, if any, and forget the handle. Cooperative: a
    /// running decode stops at its next checkpoint and emits nothing.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
    }
}
