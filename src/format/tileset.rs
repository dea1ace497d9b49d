//! 3MX root tileset document
//!
//! The entry point of a scene is a small JSON document listing layers; each
//! layer names a spatial reference system and the root 3MXB tile path. Only
//! the first layer is consumed.

use serde::{Deserialize, Serialize};

use crate::core::types::{DVec3, Vec3};

/// Root 3MX document: `{"layers":[...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilesetDoc {
    pub layers: Vec<LayerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerInfo {
    /// Spatial reference system identifier, e.g. "EPSG:4978"
    #[serde(rename = "SRS", default)]
    pub srs: String,
    /// Scene origin within the SRS
    #[serde(rename = "SRSOrigin", default)]
    pub srs_origin: Option<[f64; 3]>,
    /// Root tile path, relative to this document
    pub root: String,
    /// Optional scene offset in source axis order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<[f64; 3]>,
}

impl TilesetDoc {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// First layer; a document without layers aborts the session.
    pub fn first_layer(&self) -> Option<&LayerInfo> {
        self.layers.first()
    }
}

impl LayerInfo {
    pub fn srs_origin(&self) -> DVec3 {
        self.srs_origin
            .map(|o| DVec3::new(o[0], o[1], o[2]))
            .unwrap_or(DVec3::ZERO)
    }

    /// Scene offset remapped into the engine convention (components 0, 2, 1),
    /// the same swap applied to every bounding box.
    pub fn scene_offset(&self) -> Vec3 {
        self.offset
            .map(|o| Vec3::new(o[0] as f32, o[2] as f32, o[1] as f32))
            .unwrap_or(Vec3::ZERO)
    }
}
