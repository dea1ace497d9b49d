//! Scene seam
//!
//! Presentation is an external collaborator: the engine hands over decoded
//! mesh buffers plus raw texture bytes and afterwards only toggles
//! visibility. All calls happen on the engine thread during traversal.

use std::sync::{Arc, Mutex};

use crate::format::decoder::MeshData;
use crate::streaming::tile::TileKey;

/// Identity of one displayable node: owning tile plus node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    pub tile: TileKey,
    pub node: String,
}

impl NodeHandle {
    pub fn new(tile: TileKey, node: impl Into<String>) -> Self {
        Self {
            tile,
            node: node.into(),
        }
    }
}

/// One mesh with its optional texture, shared immutably with the host.
#[derive(Clone)]
pub struct MeshPrimitive {
    pub mesh: Arc<MeshData>,
    /// Encoded image bytes (jpg/png); decoding is host-side
    pub texture: Option<Arc<Vec<u8>>>,
}

/// Host-side presentation collaborator.
pub trait SceneSink: Send {
    /// First materialization of a node; called at most once per handle until
    /// the node is destroyed.
    fn create_node(&mut self, handle: &NodeHandle, primitives: Vec<MeshPrimitive>);

    fn set_node_visible(&mut self, handle: &NodeHandle, visible: bool);

    fn destroy_node(&mut self, handle: &NodeHandle);
}

/// Headless sink: accepts everything, displays nothing.
pub struct NullSink;

impl SceneSink for NullSink {
    fn create_node(&mut self, _handle: &NodeHandle, _primitives: Vec<MeshPrimitive>) {}
    fn set_node_visible(&mut self, _handle: &NodeHandle, _visible: bool) {}
    fn destroy_node(&mut self, _handle: &NodeHandle) {}
}

/// Scene call observed by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    Created(NodeHandle, usize),
    Visible(NodeHandle, bool),
    Destroyed(NodeHandle),
}

/// Sink that records every call; the event log is shared so tests keep a
/// handle after the sink moves into the engine.
#[derive(Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SceneEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Arc<Mutex<Vec<SceneEvent>>> {
        self.events.clone()
    }
}

impl SceneSink for RecordingSink {
    fn create_node(&mut self, handle: &NodeHandle, primitives: Vec<MeshPrimitive>) {
        self.events
            .lock()
            .unwrap()
            .push(SceneEvent::Created(handle.clone(), primitives.len()));
    }

    fn set_node_visible(&mut self, handle: &NodeHandle, visible: bool) {
        self.events
            .lock()
            .unwrap()
            .push(SceneEvent::Visible(handle.clone(), visible));
    }

    fn destroy_node(&mut self, handle: &NodeHandle) {
        self.events
            .lock()
            .unwrap()
            .push(SceneEvent::Destroyed(handle.clone()));
    }
}
