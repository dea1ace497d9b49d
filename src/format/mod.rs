//! 3MX/3MXB tile format: JSON header model, binary decoder/writer, mesh codecs

pub mod header;
pub mod codec;
pub mod decoder;
pub mod writer;
pub mod tileset;

pub use header::{HeaderInfo, NodeInfo, ResourceInfo, ResourceKind};
pub use codec::{CodecError, CodecRegistry, MeshCodec, RawMesh, RawMeshCodec};
pub use decoder::{
    decode_tile, DecodeError, DecodedNode, DecodedResource, DecodedTile, MeshData,
    ResourcePayload,
};
pub use writer::TileWriter;
pub use tileset::{LayerInfo, TilesetDoc};
