//! Tile streaming: per-tile state machine, LOD traversal, session control

pub mod lod;
pub mod scene;
pub mod tile;
pub mod loader;
pub mod root;
pub mod engine;

pub use lod::CameraState;
pub use scene::{MeshPrimitive, NodeHandle, NullSink, RecordingSink, SceneEvent, SceneSink};
pub use tile::{ResourceState, Tile, TileKey, TileNode};
pub use loader::{LoadOutcome, LoaderContext, SessionData, TileLoader};
pub use root::RootNode;
pub use engine::{SessionPhase, StreamingEngine, StreamingStats};
