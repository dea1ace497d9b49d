//! Serde model of the 3MXB JSON header
//!
//! Field names follow the on-disk format (`bbMin`, `maxScreenDiameter`, ...).
//! Bounding boxes are stored in the source axis order (Z-up); the decoder
//! remaps them into the engine's Y-up convention.

use serde::{Deserialize, Serialize};

/// Parsed JSON header of one 3MXB tile file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub version: i32,
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
    #[serde(default)]
    pub resources: Vec<ResourceInfo>,
}

/// One LOD node entry in a tile header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    #[serde(rename = "bbMin")]
    pub bb_min: [f32; 3],
    #[serde(rename = "bbMax")]
    pub bb_max: [f32; 3],
    /// Projected screen diameter above which this node refines into children
    #[serde(rename = "maxScreenDiameter")]
    pub max_screen_diameter: f32,
    /// Child tile file references, relative to the root node's data directory
    #[serde(default)]
    pub children: Vec<String>,
    /// Resource ids this node displays
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Declared type of a resource payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "textureBuffer")]
    TextureBuffer,
    #[serde(rename = "geometryBuffer")]
    GeometryBuffer,
    /// Anything this engine does not recognize; skipped during decode
    #[serde(other)]
    Unknown,
}

/// One resource entry in a tile header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Format tag, e.g. `ctm`, `raw`, `jpg`, `png`
    #[serde(default)]
    pub format: String,
    /// Payload size in bytes within the tile file; 0 means no inline payload
    #[serde(default)]
    pub size: u32,
    /// External-payload variant: the payload lives in a separate file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Geometry resources carry their own bounds in source axis order
    #[serde(rename = "bbMin", default, skip_serializing_if = "Option::is_none")]
    pub bb_min: Option<[f32; 3]>,
    #[serde(rename = "bbMax", default, skip_serializing_if = "Option::is_none")]
    pub bb_max: Option<[f32; 3]>,
    /// Resource id of the texture a geometry resource is mapped with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> HeaderInfo {
        HeaderInfo {
            version: 1,
            nodes: vec![NodeInfo {
                id: "N0".to_string(),
                bb_min: [0.0, 0.0, 0.0],
                bb_max: [10.0, 10.0, 10.0],
                max_screen_diameter: 50.0,
                children: vec!["T1.3mxb".to_string()],
                resources: vec!["R0".to_string()],
            }],
            resources: vec![ResourceInfo {
                id: "R0".to_string(),
                kind: ResourceKind::GeometryBuffer,
                format: "ctm".to_string(),
                size: 128,
                file: None,
                bb_min: Some([0.0, 0.0, 0.0]),
                bb_max: Some([10.0, 10.0, 10.0]),
                texture: Some("R1".to_string()),
            }],
        }
    }

    #[test]
    fn test_header_json_round_trip() {
        let header = sample_header();
        let json = serde_json::to_string(&header).unwrap();
        let parsed: HeaderInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_string(&sample_header()).unwrap();
        assert!(json.contains("\"bbMin\""));
        assert!(json.contains("\"maxScreenDiameter\""));
        assert!(json.contains("\"type\":\"geometryBuffer\""));
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let json = r#"{"version":1,"nodes":[{"id":"N0","bbMin":[0,0,0],"bbMax":[1,1,1],"maxScreenDiameter":10}],"resources":[{"id":"R0","type":"textureBuffer","size":4}]}"#;
        let header: HeaderInfo = serde_json::from_str(json).unwrap();
        assert!(header.nodes[0].children.is_empty());
        assert!(header.resources[0].texture.is_none());
        assert!(header.resources[0].format.is_empty());
    }

    #[test]
    fn test_unknown_resource_type_parses() {
        let json = r#"{"id":"R0","type":"pointBuffer","size":4}"#;
        let resource: ResourceInfo = serde_json::from_str(json).unwrap();
        assert_eq!(resource.kind, ResourceKind::Unknown);
    }
}
