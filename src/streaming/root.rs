//! Root nodes: the top-level entries of a session
//!
//! Each node of the decoded root tile becomes one `RootNode`. Independent
//! root hierarchies are visited in ascending camera-distance order; a fresh
//! root defers its children by one tick so the global sort settles before
//! real work begins.

use crate::core::types::Vec3;
use crate::format::decoder::DecodedNode;
use crate::math::Aabb;
use crate::streaming::tile::TileKey;

pub struct RootNode {
    pub id: String,
    /// World-space bounds (scene offset applied)
    pub bounds: Aabb,
    pub radius: f32,
    /// Top-level tile file references
    pub children: Vec<String>,
    /// Data directory for descendant tiles: `<baseDataUrl><id>/`
    pub base_url: String,
    /// Top-level child tiles, created lazily on the first visible visit
    pub child_tiles: Vec<TileKey>,
    /// First visit only computes distance and defers children one tick
    pub visited: bool,
    /// Distance from bounds center to the camera at the latest visit; roots
    /// sort by the value of the previous tick
    pub camera_distance: f32,
}

impl RootNode {
    pub fn from_decoded(info: &DecodedNode, base_data_url: &str, offset: Vec3) -> Self {
        Self {
            id: info.id.clone(),
            bounds: info.bounds.translated(offset),
            radius: info.radius,
            children: info.children.clone(),
            base_url: format!("{}{}/", base_data_url, info.id),
            child_tiles: Vec::new(),
            visited: false,
            camera_distance: 0.0,
        }
    }

    pub fn center(&self) -> Vec3 {
        self.bounds.center()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_decoded() {
        let info = DecodedNode {
            id: "Root_0".to_string(),
            bounds: Aabb::new(Vec3::ZERO, Vec3::splat(10.0)),
            radius: 8.66,
            max_screen_diameter: 0.0,
            children: vec!["Tile_0.3mxb".to_string()],
            resources: Vec::new(),
        };
        let root = RootNode::from_decoded(&info, "mem://set/Data/", Vec3::new(100.0, 0.0, 0.0));
        assert_eq!(root.base_url, "mem://set/Data/Root_0/");
        assert_eq!(root.bounds.min, Vec3::new(100.0, 0.0, 0.0));
        assert!(!root.visited);
        assert!(root.child_tiles.is_empty());
    }
}
