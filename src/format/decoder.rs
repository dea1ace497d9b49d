//! Binary 3MXB tile decoder
//!
//! Layout of one tile file:
//! ```text
//! bytes[0..5]  ASCII "3MXBO"
//! bytes[5..9]  u32 LE header length (0 is invalid)
//! bytes[9..]   UTF-8 JSON header, then the raw payloads of every resource
//!              with size > 0, concatenated in header order
//! ```
//!
//! Runs entirely on worker threads: it takes bytes, touches no engine state,
//! and returns an immutable [`DecodedTile`]. Cancellation is checked between
//! every stage; a canceled decode returns `Ok(None)` and the caller emits
//! nothing.

use std::sync::Arc;

use thiserror::Error;

use crate::format::codec::CodecRegistry;
use crate::format::header::{HeaderInfo, NodeInfo, ResourceInfo, ResourceKind};
use crate::math::Aabb;
use crate::tasks::CancelToken;

pub const MAGIC: &[u8; 5] = b"3MXBO";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("bad magic {0:?}, expected \"3MXBO\"")]
    BadMagic(String),
    #[error("zero-length header")]
    EmptyHeader,
    #[error("truncated tile: need {needed} more bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("header parse failed: {0}")]
    Header(#[from] serde_json::Error),
}

/// Decoded mesh ready for the scene seam: engine axis convention, corrected
/// winding, planar arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub positions: Vec<f32>,
    pub normals: Option<Vec<f32>>,
    pub uvs: Vec<f32>,
    pub indices: Vec<u32>,
    /// Resource-level bounds, remapped; absent when the header omits them
    pub bounds: Option<Aabb>,
    /// Resource id of the texture this mesh is mapped with
    pub texture: Option<String>,
}

/// Decoded payload of one resource entry
#[derive(Debug, Clone)]
pub enum ResourcePayload {
    /// Raw encoded image bytes; image decoding is host-side
    Texture(Arc<Vec<u8>>),
    Mesh(Arc<MeshData>),
}

#[derive(Debug, Clone)]
pub struct DecodedResource {
    pub id: String,
    pub payload: ResourcePayload,
}

/// One node entry with engine-convention data derived at decode time
#[derive(Debug, Clone)]
pub struct DecodedNode {
    pub id: String,
    /// Bounds remapped into the engine convention, untranslated
    pub bounds: Aabb,
    /// Half the bounds' diagonal length
    pub radius: f32,
    pub max_screen_diameter: f32,
    pub children: Vec<String>,
    pub resources: Vec<String>,
}

/// Output of one successful tile decode
#[derive(Debug, Clone)]
pub struct DecodedTile {
    pub url: String,
    pub version: i32,
    pub nodes: Vec<DecodedNode>,
    pub resources: Vec<DecodedResource>,
}

/// Decode one fetched tile payload.
///
/// Returns `Ok(None)` when the cancel token fires mid-decode. A resource with
/// an unrecognized type or format is logged and skipped without failing the
/// tile; its declared bytes are still consumed so later resources stay
/// aligned.
pub fn decode_tile(
    url: &str,
    bytes: &[u8],
    codecs: &CodecRegistry,
    cancel: &CancelToken,
) -> Result<Option<DecodedTile>, DecodeError> {
    if cancel.is_canceled() {
        return Ok(None);
    }
    if bytes.len() < MAGIC.len() {
        return Err(DecodeError::Truncated {
            needed: MAGIC.len(),
            remaining: bytes.len(),
        });
    }
    if &bytes[..MAGIC.len()] != MAGIC {
        return Err(DecodeError::BadMagic(
            String::from_utf8_lossy(&bytes[..MAGIC.len()]).into_owned(),
        ));
    }
    if cancel.is_canceled() {
        return Ok(None);
    }

    let rest = &bytes[MAGIC.len()..];
    if rest.len() < 4 {
        return Err(DecodeError::Truncated {
            needed: 4,
            remaining: rest.len(),
        });
    }
    let header_len = u32::from_le_bytes(rest[..4].try_into().unwrap()) as usize;
    if header_len == 0 {
        return Err(DecodeError::EmptyHeader);
    }
    let rest = &rest[4..];
    if rest.len() < header_len {
        return Err(DecodeError::Truncated {
            needed: header_len,
            remaining: rest.len(),
        });
    }
    if cancel.is_canceled() {
        return Ok(None);
    }

    let header: HeaderInfo = serde_json::from_slice(&rest[..header_len])?;
    if cancel.is_canceled() {
        return Ok(None);
    }

    let mut payload = &rest[header_len..];
    let mut resources = Vec::with_capacity(header.resources.len());
    for info in &header.resources {
        if cancel.is_canceled() {
            return Ok(None);
        }
        let size = info.size as usize;
        if size == 0 {
            log::warn!("resource {} in {} declares zero size, skipped", info.id, url);
            continue;
        }
        if payload.len() < size {
            return Err(DecodeError::Truncated {
                needed: size,
                remaining: payload.len(),
            });
        }
        let block = &payload[..size];
        payload = &payload[size..];

        if let Some(decoded) = decode_resource(url, info, block, codecs) {
            resources.push(decoded);
        }
    }

    let mut nodes = Vec::with_capacity(header.nodes.len());
    for info in &header.nodes {
        if cancel.is_canceled() {
            return Ok(None);
        }
        nodes.push(decode_node(info));
    }

    if cancel.is_canceled() {
        return Ok(None);
    }
    Ok(Some(DecodedTile {
        url: url.to_string(),
        version: header.version,
        nodes,
        resources,
    }))
}

/// Interpret one resource's payload bytes. Unknown type/format combinations
/// and codec failures are soft: logged, `None` returned, decode continues.
fn decode_resource(
    url: &str,
    info: &ResourceInfo,
    block: &[u8],
    codecs: &CodecRegistry,
) -> Option<DecodedResource> {
    let payload = match info.kind {
        ResourceKind::TextureBuffer => ResourcePayload::Texture(Arc::new(block.to_vec())),
        ResourceKind::GeometryBuffer => {
            let codec = match codecs.get(&info.format) {
                Some(codec) => codec,
                None => {
                    log::warn!(
                        "unsupported geometry format {:?} for resource {} in {}, skipped",
                        info.format,
                        info.id,
                        url
                    );
                    return None;
                }
            };
            let mut mesh = match codec.decode(block) {
                Ok(mesh) => mesh,
                Err(e) => {
                    log::warn!("mesh decode of resource {} in {} failed: {}", info.id, url, e);
                    return None;
                }
            };
            swap_yz(&mut mesh.positions);
            if let Some(normals) = &mut mesh.normals {
                swap_yz(normals);
            }
            flip_winding(&mut mesh.indices);
            let bounds = match (info.bb_min, info.bb_max) {
                (Some(min), Some(max)) => Some(Aabb::from_source_order(min, max)),
                _ => None,
            };
            ResourcePayload::Mesh(Arc::new(MeshData {
                positions: mesh.positions,
                normals: mesh.normals,
                uvs: mesh.uvs,
                indices: mesh.indices,
                bounds,
                texture: info.texture.clone(),
            }))
        }
        ResourceKind::Unknown => {
            log::warn!("unsupported resource type for {} in {}, skipped", info.id, url);
            return None;
        }
    };
    Some(DecodedResource {
        id: info.id.clone(),
        payload,
    })
}

fn decode_node(info: &NodeInfo) -> DecodedNode {
    let bounds = Aabb::from_source_order(info.bb_min, info.bb_max);
    DecodedNode {
        id: info.id.clone(),
        bounds,
        radius: bounds.bounding_sphere_radius(),
        max_screen_diameter: info.max_screen_diameter,
        children: info.children.clone(),
        resources: info.resources.clone(),
    }
}

/// Swap the 2nd and 3rd component of every 3-vector (source Z-up to engine
/// Y-up).
fn swap_yz(values: &mut [f32]) {
    for v in values.chunks_exact_mut(3) {
        v.swap(1, 2);
    }
}

/// Reverse the last two indices of every complete triangle so winding stays
/// front-facing after the axis swap. A trailing partial triple passes
/// through untouched.
fn flip_winding(indices: &mut [u32]) {
    for tri in indices.chunks_exact_mut(3) {
        tri.swap(1, 2);
    }
}
