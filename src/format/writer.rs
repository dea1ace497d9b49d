//! 3MXB tile writer for tooling and tests
//!
//! Produces the same wire layout the decoder consumes: magic, length-prefixed
//! JSON header, concatenated resource payloads.

use crate::format::decoder::MAGIC;
use crate::format::header::{HeaderInfo, NodeInfo, ResourceInfo};

/// Builder for one 3MXB tile file.
pub struct TileWriter {
    header: HeaderInfo,
    payloads: Vec<Vec<u8>>,
}

impl TileWriter {
    pub fn new(version: i32) -> Self {
        Self {
            header: HeaderInfo {
                version,
                nodes: Vec::new(),
                resources: Vec::new(),
            },
            payloads: Vec::new(),
        }
    }

    pub fn push_node(&mut self, node: NodeInfo) {
        self.header.nodes.push(node);
    }

    /// Add a resource entry; `info.size` is set from the payload length.
    pub fn push_resource(&mut self, mut info: ResourceInfo, payload: Vec<u8>) {
        info.size = payload.len() as u32;
        self.header.resources.push(info);
        self.payloads.push(payload);
    }

    /// Serialize into the binary tile layout.
    pub fn finish(self) -> Vec<u8> {
        let header_json =
            serde_json::to_vec(&self.header).expect("header serialization cannot fail");
        let mut out = Vec::with_capacity(
            MAGIC.len() + 4 + header_json.len() + self.payloads.iter().map(Vec::len).sum::<usize>(),
        );
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(header_json.len() as u32).to_le_bytes());
        out.extend_from_slice(&header_json);
        for payload in &self.payloads {
            out.extend_from_slice(payload);
        }
        out
    }
}
