//! Mesh codec seam
//!
//! Geometry resources in a 3MXB tile carry a format tag (`ctm` in most
//! production tilesets). Decompression is an external concern: hosts register
//! a [`MeshCodec`] per tag and the tile decoder dispatches by tag. The crate
//! ships [`RawMeshCodec`], an uncompressed little-endian planar-array format,
//! so the engine works end-to-end without a CTM implementation.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

/// Planar mesh arrays as produced by a codec, before any axis remapping.
///
/// `positions` and `normals` hold 3 floats per vertex, `uvs` 2 floats per
/// vertex, `indices` 3 entries per triangle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMesh {
    pub positions: Vec<f32>,
    pub normals: Option<Vec<f32>>,
    pub uvs: Vec<f32>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated mesh block: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("malformed mesh block: {0}")]
    Malformed(String),
}

/// Decoder for one compressed-geometry format.
pub trait MeshCodec: Send + Sync {
    /// Format tag this codec handles, as it appears in resource headers
    fn format(&self) -> &str;

    /// Decode one geometry block into planar arrays
    fn decode(&self, bytes: &[u8]) -> Result<RawMesh, CodecError>;
}

/// Registry of mesh codecs keyed by format tag.
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn MeshCodec>>,
}

impl CodecRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Registry with the built-in `raw` codec registered
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RawMeshCodec));
        registry
    }

    /// Register a codec under its format tag, replacing any previous one
    pub fn register(&mut self, codec: Arc<dyn MeshCodec>) {
        self.codecs.insert(codec.format().to_string(), codec);
    }

    pub fn get(&self, format: &str) -> Option<&Arc<dyn MeshCodec>> {
        self.codecs.get(format)
    }

    pub fn supports(&self, format: &str) -> bool {
        self.codecs.contains_key(format)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Uncompressed planar-array mesh format, tag `raw`.
///
/// Layout (all little-endian):
/// ```text
/// u32 vertexCount
/// u32 indexCount
/// u32 flags            (bit 0: normals present)
/// f32 positions[vertexCount * 3]
/// f32 normals[vertexCount * 3]   (if flag set)
/// f32 uvs[vertexCount * 2]
/// u32 indices[indexCount]
/// ```
pub struct RawMeshCodec;

const RAW_HAS_NORMALS: u32 = 1;

impl MeshCodec for RawMeshCodec {
    fn format(&self) -> &str {
        "raw"
    }

    fn decode(&self, bytes: &[u8]) -> Result<RawMesh, CodecError> {
        let mut cursor = Cursor::new(bytes);
        let vertex_count = cursor.read_u32()? as usize;
        let index_count = cursor.read_u32()? as usize;
        let flags = cursor.read_u32()?;

        let positions = cursor.read_f32_vec(vertex_count * 3)?;
        let normals = if flags & RAW_HAS_NORMALS != 0 {
            Some(cursor.read_f32_vec(vertex_count * 3)?)
        } else {
            None
        };
        let uvs = cursor.read_f32_vec(vertex_count * 2)?;
        let indices = cursor.read_u32_vec(index_count)?;

        Ok(RawMesh {
            positions,
            normals,
            uvs,
            indices,
        })
    }
}

/// Encode a mesh in the `raw` wire format (tooling and tests).
pub fn encode_raw_mesh(mesh: &RawMesh) -> Vec<u8> {
    let vertex_count = (mesh.positions.len() / 3) as u32;
    let mut out = Vec::new();
    out.extend_from_slice(&vertex_count.to_le_bytes());
    out.extend_from_slice(&(mesh.indices.len() as u32).to_le_bytes());
    let flags = if mesh.normals.is_some() {
        RAW_HAS_NORMALS
    } else {
        0
    };
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(bytemuck::cast_slice(&mesh.positions));
    if let Some(normals) = &mesh.normals {
        out.extend_from_slice(bytemuck::cast_slice(normals));
    }
    out.extend_from_slice(bytemuck::cast_slice(&mesh.uvs));
    out.extend_from_slice(bytemuck::cast_slice(&mesh.indices));
    out
}

/// Bounds-checked little-endian reader over a byte slice
struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.bytes.len() - self.offset;
        if remaining < len {
            return Err(CodecError::Truncated {
                needed: len,
                have: remaining,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_f32_vec(&mut self, count: usize) -> Result<Vec<f32>, CodecError> {
        let bytes = self.take(count * 4)?;
        Ok(bytemuck::pod_collect_to_vec(bytes))
    }

    fn read_u32_vec(&mut self, count: usize) -> Result<Vec<u32>, CodecError> {
        let bytes = self.take(count * 4)?;
        Ok(bytemuck::pod_collect_to_vec(bytes))
    }
}
