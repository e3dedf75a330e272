//! In-memory node tree held by a loaded save (§3.4).
//!
//! A node is either a named [`Node::Object`] (itself either a leaf carrying
//! raw bytes, or a branch carrying further children) or an anonymous
//! [`Node::Blob`] — a span of raw bytes that doesn't belong to any node's
//! own descriptor. Blobs appear where a branch node's byte range isn't
//! fully covered by its real children: leading bytes before the first
//! child, gaps between children, or trailing bytes after the last one.

/// One node in the tree, or a gap of raw bytes between sibling nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Blob(Vec<u8>),
    Object { name: String, payload: NodePayload },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodePayload {
    Leaf(Vec<u8>),
    Children(Vec<Node>),
}

impl Node {
    pub fn leaf(name: impl Into<String>, data: Vec<u8>) -> Self {
        Node::Object { name: name.into(), payload: NodePayload::Leaf(data) }
    }

    pub fn branch(name: impl Into<String>, children: Vec<Node>) -> Self {
        Node::Object { name: name.into(), payload: NodePayload::Children(children) }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Node::Blob(_) => None,
            Node::Object { name, .. } => Some(name),
        }
    }
}

/// A whole save's node tree. The root itself is never assigned an index or
/// written as a descriptor (§4.I); only its children are.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaveTree {
    pub children: Vec<Node>,
}

impl SaveTree {
    /// Total count of real (non-blob) nodes in the tree, used to size the
    /// node-descriptor table.
    pub fn node_count(&self) -> u32 {
        self.children.iter().map(count_nodes).sum()
    }

    /// Total flattened byte size of the tree (excluding any leading
    /// zero-prefill), i.e. what `serial_tree::from_tree`'s node-data buffer
    /// grows by. Matches the original's `node_t::calcsize()`.
    pub fn calc_size(&self) -> u32 {
        self.children.iter().map(node_size).sum()
    }
}

fn count_nodes(node: &Node) -> u32 {
    match node {
        Node::Blob(_) => 0,
        Node::Object { payload: NodePayload::Leaf(_), .. } => 1,
        Node::Object { payload: NodePayload::Children(children), .. } => {
            1 + children.iter().map(count_nodes).sum::<u32>()
        }
    }
}

fn node_size(node: &Node) -> u32 {
    match node {
        Node::Blob(bytes) => bytes.len() as u32,
        Node::Object { payload: NodePayload::Leaf(data), .. } => 4 + data.len() as u32,
        Node::Object { payload: NodePayload::Children(children), .. } => {
            4 + children.iter().map(node_size).sum::<u32>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_count_ignores_blobs() {
        let tree = SaveTree {
            children: vec![
                Node::Blob(vec![1, 2, 3]),
                Node::branch(
                    "inventory",
                    vec![Node::Blob(vec![0]), Node::leaf("stack", vec![9, 9])],
                ),
            ],
        };
        assert_eq!(tree.node_count(), 2);
    }
}
