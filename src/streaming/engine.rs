//! Streaming controller
//!
//! Owns the session and the tile arena, and drives one traversal per tick on
//! the engine thread. Workers only fetch and decode; their outcomes arrive
//! over the completion channel and are applied here before traversal, so all
//! tile and node state has a single writer.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::core::camera::Camera;
use crate::core::config::EngineConfig;
use crate::core::types::{DVec3, Vec3};
use crate::fetch::{base_url, join, TileFetcher};
use crate::format::codec::CodecRegistry;
use crate::format::decoder::{decode_tile, ResourcePayload};
use crate::format::tileset::TilesetDoc;
use crate::streaming::lod::CameraState;
use crate::streaming::loader::{LoadOutcome, LoaderContext, SessionData};
use crate::streaming::root::RootNode;
use crate::streaming::scene::{MeshPrimitive, NodeHandle, SceneSink};
use crate::streaming::tile::{ResourceCache, ResourceState, Tile, TileKey, TileNode};
use crate::tasks::{Task, TaskPool};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    /// Root tileset fetch+decode in flight
    Opening,
    Ready,
    /// Root tileset parse/fetch failed; fatal for the session
    Failed,
}

/// Counters refreshed at the end of every tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingStats {
    pub tiles: usize,
    pub ready_tiles: usize,
    pub failed_tiles: usize,
    pub shown_nodes: usize,
    pub pending_loads: usize,
    pub ticks: u64,
}

pub struct StreamingEngine {
    config: EngineConfig,
    ctx: LoaderContext,
    completions: mpsc::UnboundedReceiver<LoadOutcome>,
    scene: Box<dyn SceneSink>,
    camera_state: CameraState,
    phase: SessionPhase,
    /// Bumped by `clear()`; stale session outcomes are discarded
    epoch: u64,
    srs: Option<String>,
    srs_origin: DVec3,
    offset: Vec3,
    base_data_url: String,
    roots: Vec<RootNode>,
    tiles: HashMap<TileKey, Tile>,
    next_key: u64,
    /// Nodes superseded by ready children this tick; hidden after traversal
    deferred_unload: Vec<NodeHandle>,
    last_update: Option<Instant>,
    stats: StreamingStats,
}

impl StreamingEngine {
    /// Engine with the built-in codec registry.
    pub fn new(
        config: EngineConfig,
        fetcher: Arc<dyn TileFetcher>,
        scene: Box<dyn SceneSink>,
    ) -> Self {
        Self::with_codecs(config, fetcher, CodecRegistry::with_builtin(), scene)
    }

    pub fn with_codecs(
        config: EngineConfig,
        fetcher: Arc<dyn TileFetcher>,
        codecs: CodecRegistry,
        scene: Box<dyn SceneSink>,
    ) -> Self {
        let pool = Arc::new(TaskPool::new(
            config.max_concurrent_loads,
            config.poll_interval,
        ));
        pool.start();
        let (completion_tx, completions) = mpsc::unbounded_channel();
        let ctx = LoaderContext {
            pool,
            fetcher,
            codecs: Arc::new(codecs),
            completions: completion_tx,
        };
        Self {
            config,
            ctx,
            completions,
            scene,
            camera_state: CameraState::new(),
            phase: SessionPhase::Idle,
            epoch: 0,
            srs: None,
            srs_origin: DVec3::ZERO,
            offset: Vec3::ZERO,
            base_data_url: String::new(),
            roots: Vec::new(),
            tiles: HashMap::new(),
            next_key: 0,
            deferred_unload: Vec::new(),
            last_update: None,
            stats: StreamingStats::default(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn srs(&self) -> Option<&str> {
        self.srs.as_deref()
    }

    pub fn srs_origin(&self) -> DVec3 {
        self.srs_origin
    }

    pub fn scene_offset(&self) -> Vec3 {
        self.offset
    }

    pub fn stats(&self) -> StreamingStats {
        self.stats
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Begin a session: fetch and parse the root tileset document, then
    /// fetch and decode the root tile, all off-thread. The session becomes
    /// Ready once the outcome is drained by a later `update`.
    pub fn open(&mut self, url: &str) {
        match self.phase {
            SessionPhase::Idle | SessionPhase::Failed => {}
            _ => {
                log::warn!("open({}) ignored: session already {:?}", url, self.phase);
                return;
            }
        }
        log::info!("opening tileset {}", url);
        self.phase = SessionPhase::Opening;

        let url = url.to_string();
        let epoch = self.epoch;
        let fetcher = self.ctx.fetcher.clone();
        let codecs = self.ctx.codecs.clone();
        let completions = self.ctx.completions.clone();

        let task = Task::new(move |cancel| {
            let result = init_session(&url, fetcher.as_ref(), &codecs, cancel);
            match result {
                // Canceled: no notification at all
                Ok(None) => {}
                Ok(Some(data)) => {
                    let _ = completions.send(LoadOutcome::Session {
                        epoch,
                        result: Ok(data),
                    });
                }
                Err(e) => {
                    let _ = completions.send(LoadOutcome::Session {
                        epoch,
                        result: Err(e),
                    });
                }
            }
        });
        self.ctx.pool.submit(task);
    }

    /// Tear the session down: cancel in-flight work, destroy every tile and
    /// scene node, return to Idle. In-flight results are discarded when
    /// drained.
    pub fn clear(&mut self) {
        self.ctx.pool.cancel_all();
        let keys: Vec<TileKey> = self.tiles.keys().copied().collect();
        for key in keys {
            self.destroy_tile(key);
        }
        self.roots.clear();
        self.deferred_unload.clear();
        self.srs = None;
        self.srs_origin = DVec3::ZERO;
        self.offset = Vec3::ZERO;
        self.base_data_url.clear();
        self.phase = SessionPhase::Idle;
        self.epoch += 1;
        self.stats = StreamingStats {
            ticks: self.stats.ticks,
            ..StreamingStats::default()
        };
    }

    /// One engine tick: drain completions, refresh the camera state, visit
    /// every root in ascending camera-distance order, then flush deferred
    /// unloads. Skipped entirely while the update interval has not elapsed.
    pub fn update(&mut self, camera: &Camera) {
        if let Some(last) = self.last_update {
            if last.elapsed() < self.config.update_interval {
                return;
            }
        }
        self.last_update = Some(Instant::now());

        self.drain_completions();
        self.camera_state.update(camera, self.config.fov_ratio);
        if self.phase != SessionPhase::Ready {
            return;
        }

        // Distances from the previous visit; fresh roots sort first at 0
        self.roots.sort_by(|a, b| {
            a.camera_distance
                .partial_cmp(&b.camera_distance)
                .unwrap_or(Ordering::Equal)
        });

        let mut roots = std::mem::take(&mut self.roots);
        for root in &mut roots {
            self.visit_root(root);
        }
        self.roots = roots;

        self.flush_deferred_unloads();
        self.refresh_stats();
        self.stats.ticks += 1;
    }

    fn drain_completions(&mut self) {
        while let Ok(outcome) = self.completions.try_recv() {
            match outcome {
                LoadOutcome::Session { epoch, result } => {
                    if epoch != self.epoch {
                        continue;
                    }
                    match result {
                        Ok(data) => self.install_session(data),
                        Err(e) => {
                            log::error!("session initialization failed: {}", e);
                            self.phase = SessionPhase::Failed;
                        }
                    }
                }
                LoadOutcome::Tile { key, result } => {
                    // A missing key means the tile was destroyed mid-flight
                    if let Some(tile) = self.tiles.get_mut(&key) {
                        // The attempt is over even if its task has not been
                        // swept yet; release the handle so a retry can start
                        tile.loader.finish();
                        match result {
                            Ok(decoded) => tile.on_load_success(decoded),
                            Err(e) => tile.on_load_failure(&e),
                        }
                    }
                }
            }
        }
    }

    fn install_session(&mut self, data: SessionData) {
        self.srs = Some(data.srs);
        self.srs_origin = data.srs_origin;
        self.offset = data.offset;
        self.base_data_url = data.base_data_url;
        self.roots = data
            .root
            .nodes
            .iter()
            .map(|node| RootNode::from_decoded(node, &self.base_data_url, self.offset))
            .collect();
        self.phase = SessionPhase::Ready;
        log::info!(
            "session ready: {} root nodes under {}",
            self.roots.len(),
            self.base_data_url
        );
    }

    fn visit_root(&mut self, root: &mut RootNode) {
        root.camera_distance = self.camera_state.distance_to(root.center());
        if !root.visited {
            // Defer children one tick so the global root sort settles first
            root.visited = true;
            return;
        }
        if self.camera_state.visible(&root.bounds) {
            if root.child_tiles.is_empty() && !root.children.is_empty() {
                for child in &root.children {
                    let url = join(&self.base_data_url, child);
                    let key = self.alloc_tile(url, None);
                    root.child_tiles.push(key);
                }
            }
            for key in root.child_tiles.clone() {
                self.process_tile(key, &root.base_url);
            }
        } else if self.config.memory_cache {
            for key in root.child_tiles.clone() {
                self.unload_tile(key);
            }
        } else {
            let keys: Vec<TileKey> = root.child_tiles.drain(..).collect();
            for key in keys {
                self.destroy_tile(key);
            }
        }
    }

    fn alloc_tile(&mut self, url: String, parent: Option<NodeHandle>) -> TileKey {
        let key = TileKey(self.next_key);
        self.next_key += 1;
        self.tiles.insert(key, Tile::new(key, url, parent));
        key
    }

    /// Advance one tile's state machine and recurse into its nodes.
    fn process_tile(&mut self, key: TileKey, root_base: &str) {
        let needs_commit;
        {
            let Some(tile) = self.tiles.get_mut(&key) else {
                return;
            };
            if (tile.is_uninitialized() || tile.is_failed())
                && tile.begin_load(self.config.fail_retry_count)
            {
                tile.loader.start(key, &self.ctx);
            }
            needs_commit = matches!(tile.state, ResourceState::Processing(_));
        }
        if needs_commit {
            self.commit_tile(key);
        }

        let node_ids: Vec<String> = match self.tiles.get(&key) {
            Some(tile) => tile.nodes.keys().cloned().collect(),
            None => return,
        };
        for node_id in node_ids {
            self.process_node(NodeHandle::new(key, node_id), root_base);
        }
    }

    /// Main-thread half of a successful decode: drain resources into the
    /// cache, then materialize and show every new node. Nodes commit only
    /// after all resources are cached.
    fn commit_tile(&mut self, key: TileKey) {
        let mut new_nodes = Vec::new();
        {
            let Some(tile) = self.tiles.get_mut(&key) else {
                return;
            };
            let Some(decoded) = tile.take_processing() else {
                return;
            };
            let decoded = *decoded;
            let mut cache = ResourceCache::new();
            for resource in decoded.resources {
                cache.insert(resource.id, resource.payload);
            }
            tile.commit_cache(cache);
            for info in &decoded.nodes {
                if !tile.nodes.contains_key(&info.id) {
                    tile.nodes
                        .insert(info.id.clone(), TileNode::from_decoded(info, self.offset));
                    new_nodes.push(info.id.clone());
                }
            }
            log::debug!("tile {} ready with {} nodes", tile.id, tile.nodes.len());
        }
        for node_id in new_nodes {
            self.show_node(&NodeHandle::new(key, node_id));
        }
    }

    /// Refine-or-show decision for one node.
    fn process_node(&mut self, handle: NodeHandle, root_base: &str) {
        let (center, radius, max_diameter, children, has_child_tiles) =
            match self.node(&handle) {
                Some(node) => (
                    node.bounds.center(),
                    node.radius,
                    node.max_screen_diameter,
                    node.children.clone(),
                    !node.child_tiles.is_empty(),
                ),
                None => return,
            };

        let diameter =
            self.camera_state
                .projected_diameter(center, radius, self.config.diameter_ratio);

        if diameter > max_diameter && !children.is_empty() {
            // Refine: this node wants more detail than it carries
            if !has_child_tiles {
                let mut keys = Vec::with_capacity(children.len());
                for child in &children {
                    let url = join(root_base, child);
                    keys.push(self.alloc_tile(url, Some(handle.clone())));
                }
                if let Some(node) = self.node_mut(&handle) {
                    node.child_tiles = keys;
                }
            }
            let child_keys = self
                .node(&handle)
                .map(|node| node.child_tiles.clone())
                .unwrap_or_default();

            let mut any_uninitialized = false;
            for key in child_keys {
                self.process_tile(key, root_base);
                any_uninitialized |= self
                    .tiles
                    .get(&key)
                    .map(|tile| tile.is_uninitialized())
                    .unwrap_or(true);
            }
            if any_uninitialized {
                // Children still loading: keep covering the region
                self.show_node(&handle);
            } else if !self.deferred_unload.contains(&handle) {
                self.deferred_unload.push(handle);
            }
        } else {
            // Coarse: this node's own geometry is detailed enough
            let ready = self
                .tiles
                .get(&handle.tile)
                .map(Tile::is_ready)
                .unwrap_or(false);
            if ready {
                self.show_node(&handle);
                let child_keys = self
                    .node(&handle)
                    .map(|node| node.child_tiles.clone())
                    .unwrap_or_default();
                if self.config.memory_cache {
                    for key in child_keys {
                        self.unload_tile(key);
                    }
                } else {
                    for key in &child_keys {
                        self.destroy_tile(*key);
                    }
                    if let Some(node) = self.node_mut(&handle) {
                        node.child_tiles.clear();
                    }
                }
            } else {
                // Not ready: trigger the load and make sure the nearest
                // materialized ancestor keeps covering this region
                {
                    let Some(tile) = self.tiles.get_mut(&handle.tile) else {
                        return;
                    };
                    if tile.begin_load(self.config.fail_retry_count) {
                        tile.loader.start(handle.tile, &self.ctx);
                    }
                }
                self.revoke_ancestor_unload(&handle);
            }
        }
    }

    /// Walk the parent chain upward and pull the nearest materialized
    /// ancestor off the deferred-unload list. Iterative: tilesets can be
    /// deep.
    fn revoke_ancestor_unload(&mut self, handle: &NodeHandle) {
        let mut current = self
            .tiles
            .get(&handle.tile)
            .and_then(|tile| tile.parent.clone());
        while let Some(parent) = current {
            match self.node(&parent).map(|node| node.materialized) {
                Some(true) => {
                    self.deferred_unload.retain(|h| h != &parent);
                    break;
                }
                Some(false) => {
                    current = self
                        .tiles
                        .get(&parent.tile)
                        .and_then(|tile| tile.parent.clone());
                }
                None => break,
            }
        }
    }

    /// Materialize (once) and show one node.
    fn show_node(&mut self, handle: &NodeHandle) {
        // Gather primitives under a shared borrow first; flags flip below
        let mut created: Option<Vec<MeshPrimitive>> = None;
        if let Some(tile) = self.tiles.get(&handle.tile) {
            if let Some(node) = tile.nodes.get(&handle.node) {
                if !node.materialized {
                    let mut primitives = Vec::new();
                    for resource_id in &node.resources {
                        match tile.cached_payload(resource_id) {
                            Some(ResourcePayload::Mesh(mesh)) => {
                                let texture = mesh
                                    .texture
                                    .as_deref()
                                    .and_then(|texture_id| tile.cached_texture(texture_id));
                                primitives.push(MeshPrimitive {
                                    mesh: mesh.clone(),
                                    texture,
                                });
                            }
                            // Textures attach through their mesh's reference
                            Some(ResourcePayload::Texture(_)) => {}
                            None => log::debug!(
                                "resource {} missing from cache, skipped",
                                resource_id
                            ),
                        }
                    }
                    created = Some(primitives);
                }
            }
        }
        let mut newly_shown = false;
        {
            let Some(node) = self
                .tiles
                .get_mut(&handle.tile)
                .and_then(|tile| tile.nodes.get_mut(&handle.node))
            else {
                return;
            };
            if created.is_some() {
                node.materialized = true;
            }
            if !node.shown {
                node.shown = true;
                newly_shown = true;
            }
        }
        if let Some(primitives) = created {
            self.scene.create_node(handle, primitives);
        }
        if newly_shown {
            self.scene.set_node_visible(handle, true);
        }
    }

    /// Hide one node, keeping cache and children resident.
    fn hide_node(&mut self, handle: &NodeHandle) {
        let mut materialized = false;
        if let Some(node) = self
            .tiles
            .get_mut(&handle.tile)
            .and_then(|tile| tile.nodes.get_mut(&handle.node))
        {
            if !node.shown {
                return;
            }
            node.shown = false;
            materialized = node.materialized;
        }
        if materialized {
            self.scene.set_node_visible(handle, false);
        }
    }

    /// Hide a tile and all its descendants; everything stays in memory.
    fn unload_tile(&mut self, key: TileKey) {
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            let mut hidden = Vec::new();
            if let Some(tile) = self.tiles.get_mut(&k) {
                for (id, node) in tile.nodes.iter_mut() {
                    stack.extend(node.child_tiles.iter().copied());
                    if node.shown {
                        node.shown = false;
                        if node.materialized {
                            hidden.push(NodeHandle::new(k, id.clone()));
                        }
                    }
                }
            }
            for handle in &hidden {
                self.scene.set_node_visible(handle, false);
            }
        }
    }

    /// Irreversibly release a tile and all its descendants: cancel in-flight
    /// loads, destroy scene nodes, drop caches. A future visit starts over
    /// from Unloaded.
    fn destroy_tile(&mut self, key: TileKey) {
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            let Some(mut tile) = self.tiles.remove(&k) else {
                continue;
            };
            tile.loader.cancel();
            let mut destroyed = Vec::new();
            for (id, node) in tile.nodes.iter() {
                stack.extend(node.child_tiles.iter().copied());
                if node.materialized {
                    destroyed.push(NodeHandle::new(k, id.clone()));
                }
            }
            for handle in &destroyed {
                self.scene.destroy_node(handle);
            }
        }
        let tiles = &self.tiles;
        self.deferred_unload.retain(|h| tiles.contains_key(&h.tile));
    }

    /// Hide every node flagged during traversal. Runs strictly after the
    /// whole walk so a coarse node never disappears before its finer
    /// replacement is confirmed ready within the same tick.
    fn flush_deferred_unloads(&mut self) {
        let pending = std::mem::take(&mut self.deferred_unload);
        for handle in pending {
            self.hide_node(&handle);
        }
    }

    fn node(&self, handle: &NodeHandle) -> Option<&TileNode> {
        self.tiles
            .get(&handle.tile)
            .and_then(|tile| tile.nodes.get(&handle.node))
    }

    fn node_mut(&mut self, handle: &NodeHandle) -> Option<&mut TileNode> {
        self.tiles
            .get_mut(&handle.tile)
            .and_then(|tile| tile.nodes.get_mut(&handle.node))
    }

    fn refresh_stats(&mut self) {
        let mut stats = StreamingStats {
            ticks: self.stats.ticks,
            tiles: self.tiles.len(),
            ..StreamingStats::default()
        };
        for tile in self.tiles.values() {
            if tile.is_ready() {
                stats.ready_tiles += 1;
            }
            if tile.is_failed() {
                stats.failed_tiles += 1;
            }
            if tile.loader.is_loading() {
                stats.pending_loads += 1;
            }
            stats.shown_nodes += tile.nodes.values().filter(|n| n.shown).count();
        }
        self.stats = stats;
    }
}

impl Drop for StreamingEngine {
    fn drop(&mut self) {
        self.ctx.pool.cancel_all();
        self.ctx.pool.stop();
    }
}

/// Session initialization body, run on a worker. `Ok(None)` means canceled.
fn init_session(
    url: &str,
    fetcher: &dyn TileFetcher,
    codecs: &CodecRegistry,
    cancel: &crate::tasks::CancelToken,
) -> Result<Option<SessionData>, String> {
    let bytes = fetcher.fetch(url).map_err(|e| e.to_string())?;
    let doc = TilesetDoc::parse(&bytes).map_err(|e| format!("root tileset parse failed: {}", e))?;
    let layer = doc
        .first_layer()
        .ok_or_else(|| "root tileset has no layers".to_string())?;
    if cancel.is_canceled() {
        return Ok(None);
    }

    let base = base_url(url);
    let root_url = join(&base, &layer.root);
    let base_data_url = base_url(&root_url);
    let root_bytes = fetcher.fetch(&root_url).map_err(|e| e.to_string())?;
    let root = match decode_tile(&root_url, &root_bytes, codecs, cancel)
        .map_err(|e| format!("root tile decode failed: {}", e))?
    {
        Some(decoded) => decoded,
        None => return Ok(None),
    };

    Ok(Some(SessionData {
        srs: layer.srs.clone(),
        srs_origin: layer.srs_origin(),
        offset: layer.scene_offset(),
        base_data_url,
        root,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;
    use crate::fetch::MemoryFetcher;
    use crate::format::codec::{encode_raw_mesh, RawMesh};
    use crate::format::header::{NodeInfo, ResourceInfo, ResourceKind};
    use crate::format::writer::TileWriter;
    use crate::streaming::scene::{RecordingSink, SceneEvent};
    use std::sync::Mutex;
    use std::time::Duration;

    fn test_config() -> EngineConfig {
        EngineConfig {
            max_concurrent_loads: 4,
            update_interval: Duration::ZERO,
            poll_interval: Duration::from_millis(2),
            diameter_ratio: 1.0,
            fov_ratio: 1.0,
            fail_retry_count: 1,
            memory_cache: false,
        }
    }

    fn mesh_bytes() -> Vec<u8> {
        encode_raw_mesh(&RawMesh {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            normals: None,
            uvs: vec![0.0; 6],
            indices: vec![0, 1, 2],
        })
    }

    fn geometry_resource(id: &str, texture: Option<&str>) -> ResourceInfo {
        ResourceInfo {
            id: id.to_string(),
            kind: ResourceKind::GeometryBuffer,
            format: "raw".to_string(),
            size: 0,
            file: None,
            bb_min: Some([-10.0, -10.0, -10.0]),
            bb_max: Some([10.0, 10.0, 10.0]),
            texture: texture.map(str::to_string),
        }
    }

    fn node_info(
        id: &str,
        max_screen_diameter: f32,
        children: &[&str],
        resources: &[&str],
    ) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            bb_min: [-10.0, -10.0, -10.0],
            bb_max: [10.0, 10.0, 10.0],
            max_screen_diameter,
            children: children.iter().map(|s| s.to_string()).collect(),
            resources: resources.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Tileset with one root node, one intermediate tile that refines into a
    /// leaf tile. `threshold` is the intermediate node's refinement cutoff.
    fn fixture(threshold: f32) -> MemoryFetcher {
        let mut fetcher = MemoryFetcher::new();
        fetcher.insert(
            "mem://set/scene.3mx",
            br#"{"layers":[{"SRS":"EPSG:4978","SRSOrigin":[1.0,2.0,3.0],"root":"Data/root.3mxb"}]}"#
                .to_vec(),
        );

        let mut root = TileWriter::new(1);
        root.push_node(node_info("Root_0", 0.0, &["Tile_0.3mxb"], &[]));
        fetcher.insert("mem://set/Data/root.3mxb", root.finish());

        let mut tile0 = TileWriter::new(1);
        tile0.push_node(node_info("N0", threshold, &["Tile_1.3mxb"], &["geo0"]));
        tile0.push_resource(geometry_resource("geo0", Some("tex0")), mesh_bytes());
        tile0.push_resource(
            ResourceInfo {
                id: "tex0".to_string(),
                kind: ResourceKind::TextureBuffer,
                format: "jpg".to_string(),
                size: 0,
                file: None,
                bb_min: None,
                bb_max: None,
                texture: None,
            },
            vec![1, 2, 3, 4],
        );
        fetcher.insert("mem://set/Data/Tile_0.3mxb", tile0.finish());

        // Leaf lives under the root node's data directory
        let mut tile1 = TileWriter::new(1);
        tile1.push_node(node_info("N1", 1.0e9, &[], &["geo1"]));
        tile1.push_resource(geometry_resource("geo1", None), mesh_bytes());
        fetcher.insert("mem://set/Data/Root_0/Tile_1.3mxb", tile1.finish());

        fetcher
    }

    fn engine_with(
        fetcher: MemoryFetcher,
        config: EngineConfig,
    ) -> (StreamingEngine, Arc<Mutex<Vec<SceneEvent>>>) {
        let sink = RecordingSink::new();
        let events = sink.events();
        let engine = StreamingEngine::new(config, Arc::new(fetcher), Box::new(sink));
        (engine, events)
    }

    fn pump(
        engine: &mut StreamingEngine,
        camera: &Camera,
        mut done: impl FnMut(&StreamingEngine) -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            engine.update(camera);
            if done(engine) {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "engine did not reach expected state; stats: {:?}",
                engine.stats()
            );
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn far_camera() -> Camera {
        // 20m box at 100m with a 60 degree fov projects to ~150px
        Camera::new(Vec3::new(0.0, 0.0, 100.0), 60.0, 1000.0, 1000.0)
    }

    fn near_camera() -> Camera {
        // Same box at 30m projects to ~500px
        Camera::new(Vec3::new(0.0, 0.0, 30.0), 60.0, 1000.0, 1000.0)
    }

    fn event_matches(events: &Arc<Mutex<Vec<SceneEvent>>>, f: impl Fn(&SceneEvent) -> bool) -> bool {
        events.lock().unwrap().iter().any(f)
    }

    #[test]
    fn test_open_reaches_ready() {
        let (mut engine, _events) = engine_with(fixture(300.0), test_config());
        engine.open("mem://set/scene.3mx");
        assert_eq!(engine.phase(), SessionPhase::Opening);

        let camera = far_camera();
        pump(&mut engine, &camera, |e| e.phase() == SessionPhase::Ready);
        assert_eq!(engine.srs(), Some("EPSG:4978"));
        assert_eq!(engine.srs_origin(), DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(engine.root_count(), 1);
    }

    #[test]
    fn test_bad_root_document_fails_session() {
        let mut fetcher = MemoryFetcher::new();
        fetcher.insert("mem://set/scene.3mx", b"not json".to_vec());
        let (mut engine, _events) = engine_with(fetcher, test_config());
        engine.open("mem://set/scene.3mx");
        let camera = far_camera();
        pump(&mut engine, &camera, |e| e.phase() == SessionPhase::Failed);
    }

    #[test]
    fn test_coarse_camera_shows_single_node() {
        // Threshold 300 > projected ~150: N0 renders itself, no refinement
        let (mut engine, events) = engine_with(fixture(300.0), test_config());
        engine.open("mem://set/scene.3mx");
        let camera = far_camera();
        pump(&mut engine, &camera, |e| e.stats().shown_nodes == 1);

        assert!(event_matches(&events, |e| matches!(
            e,
            SceneEvent::Created(h, 1) if h.node == "N0"
        )));
        // The leaf tile was never requested
        assert!(!event_matches(&events, |e| matches!(
            e,
            SceneEvent::Created(h, _) if h.node == "N1"
        )));
        assert_eq!(engine.stats().tiles, 1);
    }

    #[test]
    fn test_refinement_swaps_coarse_for_fine() {
        // Threshold 300 < projected ~500 at 30m: N0 refines into Tile_1
        let (mut engine, events) = engine_with(fixture(300.0), test_config());
        engine.open("mem://set/scene.3mx");
        let camera = near_camera();

        pump(&mut engine, &camera, |_| {
            event_matches(&events, |e| matches!(
                e,
                SceneEvent::Created(h, 1) if h.node == "N1"
            ))
        });
        // Once the leaf is ready the coarse node is hidden, deferred to the
        // end of its tick
        pump(&mut engine, &camera, |_| {
            event_matches(&events, |e| matches!(
                e,
                SceneEvent::Visible(h, false) if h.node == "N0"
            ))
        });
        pump(&mut engine, &camera, |e| e.stats().shown_nodes == 1);
        assert_eq!(engine.stats().tiles, 2);
    }

    #[test]
    fn test_shown_set_reaches_fixpoint() {
        let (mut engine, events) = engine_with(fixture(300.0), test_config());
        engine.open("mem://set/scene.3mx");
        let camera = far_camera();
        pump(&mut engine, &camera, |e| e.stats().shown_nodes == 1);

        // With a static camera, further ticks emit no scene traffic
        let settled = events.lock().unwrap().len();
        for _ in 0..20 {
            engine.update(&camera);
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(events.lock().unwrap().len(), settled);
        assert_eq!(engine.stats().shown_nodes, 1);
    }

    #[test]
    fn test_invisible_root_destroys_tiles() {
        let (mut engine, events) = engine_with(fixture(300.0), test_config());
        engine.open("mem://set/scene.3mx");
        let camera = far_camera();
        pump(&mut engine, &camera, |e| e.stats().shown_nodes == 1);

        // Turn the camera around: scene leaves the frustum
        let mut away = far_camera();
        away.set_rotation_euler(std::f32::consts::PI, 0.0);
        pump(&mut engine, &away, |e| e.stats().tiles == 0);
        assert!(event_matches(&events, |e| matches!(
            e,
            SceneEvent::Destroyed(h) if h.node == "N0"
        )));
    }

    #[test]
    fn test_invisible_root_unloads_with_memory_cache() {
        let config = EngineConfig {
            memory_cache: true,
            ..test_config()
        };
        let (mut engine, events) = engine_with(fixture(300.0), config);
        engine.open("mem://set/scene.3mx");
        let camera = far_camera();
        pump(&mut engine, &camera, |e| e.stats().shown_nodes == 1);

        let mut away = far_camera();
        away.set_rotation_euler(std::f32::consts::PI, 0.0);
        pump(&mut engine, &away, |e| e.stats().shown_nodes == 0);
        // Tiles stay resident for fast reactivation
        assert_eq!(engine.stats().tiles, 1);
        assert!(!event_matches(&events, |e| matches!(e, SceneEvent::Destroyed(_))));

        // Looking back re-shows the cached node without a new create
        let created_before = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, SceneEvent::Created(_, _)))
            .count();
        pump(&mut engine, &camera, |e| e.stats().shown_nodes == 1);
        let created_after = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, SceneEvent::Created(_, _)))
            .count();
        assert_eq!(created_before, created_after);
    }

    #[test]
    fn test_missing_tile_stays_failed_once_budget_exhausted() {
        // Fixture without the intermediate tile
        let full = fixture(300.0);
        let mut fetcher = MemoryFetcher::new();
        for url in ["mem://set/scene.3mx", "mem://set/Data/root.3mxb"] {
            fetcher.insert(url, crate::fetch::TileFetcher::fetch(&full, url).unwrap());
        }
        let config = EngineConfig {
            fail_retry_count: 0,
            ..test_config()
        };
        let (mut engine, _events) = engine_with(fetcher, config);
        engine.open("mem://set/scene.3mx");
        let camera = far_camera();

        pump(&mut engine, &camera, |e| {
            e.stats().failed_tiles == 1 && e.stats().pending_loads == 0
        });
        // Further ticks must not restart the load
        for _ in 0..5 {
            engine.update(&camera);
            std::thread::sleep(Duration::from_millis(5));
        }
        let stats = engine.stats();
        assert_eq!(stats.failed_tiles, 1);
        assert_eq!(stats.pending_loads, 0);
        assert_eq!(stats.shown_nodes, 0);
    }

    #[test]
    fn test_clear_returns_to_idle() {
        let (mut engine, events) = engine_with(fixture(300.0), test_config());
        engine.open("mem://set/scene.3mx");
        let camera = far_camera();
        pump(&mut engine, &camera, |e| e.stats().shown_nodes == 1);

        engine.clear();
        assert_eq!(engine.phase(), SessionPhase::Idle);
        assert_eq!(engine.root_count(), 0);
        assert_eq!(engine.stats().tiles, 0);
        assert!(event_matches(&events, |e| matches!(e, SceneEvent::Destroyed(_))));

        // A cleared engine can open again
        engine.open("mem://set/scene.3mx");
        pump(&mut engine, &camera, |e| e.phase() == SessionPhase::Ready);
    }
}
