//! Tile and TileNode: one 3MXB file instance and the LOD nodes it carries
//!
//! Tiles live in an arena keyed by [`TileKey`]; parent/child links are keys
//! and node handles rather than references, so the ownership graph stays a
//! tree with non-owning back-links.

use std::collections::HashMap;
use std::sync::Arc;

use crate::fetch::file_name;
use crate::format::decoder::{DecodedNode, DecodedTile, ResourcePayload};
use crate::math::Aabb;
use crate::core::types::Vec3;
use crate::streaming::loader::TileLoader;
use crate::streaming::scene::NodeHandle;

/// Arena key of one tile. Monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileKey(pub u64);

/// Decoded payloads keyed by resource id.
pub type ResourceCache = HashMap<String, ResourcePayload>;

/// Resource lifecycle of a tile. Each variant carries the data that is only
/// valid in that state, so stale payloads from a prior state cannot be read.
pub enum ResourceState {
    /// Initial, and after a destroy
    Unloaded,
    /// A fetch+decode task is in flight; `retries` counts retry attempts
    /// consumed so far
    Loading { retries: u32 },
    /// Decode succeeded; awaiting main-thread processing
    Processing(Box<DecodedTile>),
    /// Resources committed, nodes materialized
    Ready(ResourceCache),
    /// Last attempt failed; retried while budget remains
    Failed { retries: u32 },
}

impl ResourceState {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceState::Unloaded => "unloaded",
            ResourceState::Loading { .. } => "loading",
            ResourceState::Processing(_) => "processing",
            ResourceState::Ready(_) => "ready",
            ResourceState::Failed { .. } => "failed",
        }
    }
}

/// One LOD node within a tile's header.
pub struct TileNode {
    pub id: String,
    /// World-space bounds (scene offset applied)
    pub bounds: Aabb,
    /// Bounding-sphere radius, half the bounds diagonal
    pub radius: f32,
    /// Projected-diameter threshold above which this node refines
    pub max_screen_diameter: f32,
    /// Child tile file references
    pub children: Vec<String>,
    /// Resource ids this node displays
    pub resources: Vec<String>,
    /// Child tiles, created lazily on first refinement
    pub child_tiles: Vec<TileKey>,
    /// Currently presented
    pub shown: bool,
    /// Scene primitive built at least once
    pub materialized: bool,
}

impl TileNode {
    /// Build from decoded header data, translating bounds by the scene
    /// offset.
    pub fn from_decoded(info: &DecodedNode, offset: Vec3) -> Self {
        Self {
            id: info.id.clone(),
            bounds: info.bounds.translated(offset),
            radius: info.radius,
            max_screen_diameter: info.max_screen_diameter,
            children: info.children.clone(),
            resources: info.resources.clone(),
            child_tiles: Vec::new(),
            shown: false,
            materialized: false,
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

/// One 3MXB file instance in the tile tree.
pub struct Tile {
    pub key: TileKey,
    /// File name, for logs
    pub id: String,
    pub url: String,
    /// Owning TileNode; `None` for tiles directly under a root node
    pub parent: Option<NodeHandle>,
    pub loader: TileLoader,
    pub state: ResourceState,
    /// Nodes materialized from the last successful decode, keyed by node id
    pub nodes: HashMap<String, TileNode>,
}

impl Tile {
    pub fn new(key: TileKey, url: String, parent: Option<NodeHandle>) -> Self {
        let id = file_name(&url).to_string();
        Self {
            key,
            id,
            url: url.clone(),
            parent,
            loader: TileLoader::new(url),
            state: ResourceState::Unloaded,
            nodes: HashMap::new(),
        }
    }

    /// Never successfully decoded (or destroyed since).
    pub fn is_uninitialized(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ResourceState::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, ResourceState::Failed { .. })
    }

    /// Advance toward Loading if a new attempt may start. Returns `true`
    /// when the caller should issue the fetch+decode task.
    pub fn begin_load(&mut self, max_retries: u32) -> bool {
        match self.state {
            ResourceState::Unloaded => {
                self.state = ResourceState::Loading { retries: 0 };
                true
            }
            ResourceState::Failed { retries } if retries < max_retries => {
                log::warn!(
                    "tile {} load failed, retrying ({}/{})",
                    self.id,
                    retries + 1,
                    max_retries
                );
                self.state = ResourceState::Loading {
                    retries: retries + 1,
                };
                true
            }
            _ => false,
        }
    }

    /// Apply a success outcome drained from the completion channel. Decoded
    /// data for a tile that is no longer Loading (reset mid-flight) is
    /// discarded without merging.
    pub fn on_load_success(&mut self, decoded: DecodedTile) {
        if let ResourceState::Loading { .. } = self.state {
            self.state = ResourceState::Processing(Box::new(decoded));
        } else {
            log::debug!(
                "tile {} finished loading in state {}, result discarded",
                self.id,
                self.state.name()
            );
        }
    }

    /// Apply a failure outcome. One notification arrives per attempt.
    pub fn on_load_failure(&mut self, error: &str) {
        if let ResourceState::Loading { retries } = self.state {
            log::warn!("tile {} load failed: {}", self.id, error);
            self.state = ResourceState::Failed { retries };
        }
    }

    /// Take the decoded data for main-thread processing, leaving the tile
    /// Ready with the given cache installed afterwards via
    /// [`commit_cache`](Self::commit_cache).
    pub fn take_processing(&mut self) -> Option<Box<DecodedTile>> {
        if matches!(self.state, ResourceState::Processing(_)) {
            match std::mem::replace(&mut self.state, ResourceState::Unloaded) {
                ResourceState::Processing(decoded) => Some(decoded),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    /// Install the drained resource cache; the tile becomes Ready.
    pub fn commit_cache(&mut self, cache: ResourceCache) {
        self.state = ResourceState::Ready(cache);
    }

    pub fn cached_payload(&self, id: &str) -> Option<&ResourcePayload> {
        match &self.state {
            ResourceState::Ready(cache) => cache.get(id),
            _ => None,
        }
    }

    pub fn cached_texture(&self, id: &str) -> Option<Arc<Vec<u8>>> {
        match self.cached_payload(id) {
            Some(ResourcePayload::Texture(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(url: &str) -> DecodedTile {
        DecodedTile {
            url: url.to_string(),
            version: 1,
            nodes: Vec::new(),
            resources: Vec::new(),
        }
    }

    fn tile() -> Tile {
        Tile::new(TileKey(1), "mem://Data/Tile_0.3mxb".to_string(), None)
    }

    #[test]
    fn test_id_is_file_name() {
        assert_eq!(tile().id, "Tile_0.3mxb");
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut t = tile();
        assert!(matches!(t.state, ResourceState::Unloaded));

        assert!(t.begin_load(5));
        assert!(matches!(t.state, ResourceState::Loading { retries: 0 }));

        // While loading, another begin_load is a no-op
        assert!(!t.begin_load(5));

        t.on_load_success(decoded(&t.url.clone()));
        assert!(matches!(t.state, ResourceState::Processing(_)));
        assert!(!t.begin_load(5));

        let taken = t.take_processing().unwrap();
        assert_eq!(taken.version, 1);
        t.commit_cache(ResourceCache::new());
        assert!(t.is_ready());
        assert!(!t.begin_load(5));
    }

    #[test]
    fn test_failure_and_retry_budget() {
        let mut t = tile();
        for attempt in 0..=2u32 {
            assert!(t.begin_load(2), "attempt {} should start", attempt);
            t.on_load_failure("connection reset");
            assert!(matches!(t.state, ResourceState::Failed { retries } if retries == attempt));
        }
        // Budget of 2 retries exhausted: permanently failed
        assert!(!t.begin_load(2));
        assert!(t.is_failed());
    }

    #[test]
    fn test_success_for_reset_tile_is_discarded() {
        let mut t = tile();
        // Never entered Loading: a stale success must not install Processing
        t.on_load_success(decoded("mem://stale"));
        assert!(matches!(t.state, ResourceState::Unloaded));
    }

    #[test]
    fn test_failure_outside_loading_ignored() {
        let mut t = tile();
        t.on_load_failure("late error");
        assert!(matches!(t.state, ResourceState::Unloaded));
    }

    #[test]
    fn test_cached_lookups_require_ready() {
        let mut t = tile();
        assert!(t.cached_payload("geo0").is_none());

        let mut cache = ResourceCache::new();
        cache.insert(
            "tex0".to_string(),
            ResourcePayload::Texture(Arc::new(vec![1, 2, 3])),
        );
        t.commit_cache(cache);

        assert_eq!(
            t.cached_texture("tex0").unwrap().as_slice(),
            &[1, 2, 3]
        );
        assert!(t.cached_payload("geo0").is_none());
        assert!(t.cached_texture("geo0").is_none());
    }

    #[test]
    fn test_take_processing_only_in_processing() {
        let mut t = tile();
        assert!(t.take_processing().is_none());
        t.begin_load(5);
        assert!(t.take_processing().is_none());
    }
}
