//! Flatten/unflatten between [`SaveTree`] and the on-disk node-descriptor
//! table + node-data byte stream (§3.4, §4.I).
//!
//! Grounded on `serial_tree.hpp`'s `from_node`/`write_node_visitor` and
//! `to_node`/`read_node`. The original threads a sentinel "root" descriptor
//! through `read_node` to exempt the root from the leading-index check; here
//! the root is simply never passed through `read_node` at all, since our
//! tree type already keeps the root's children as a plain `Vec<Node>` with
//! no descriptor of their own.

use crate::node::{Node, NodePayload, SaveTree};

pub const NULL_NODE_IDX: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialNodeDesc {
    pub name: String,
    pub next_idx: i32,
    pub child_idx: i32,
    pub data_offset: u32,
    pub data_size: u32,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SerialTreeError {
    #[error("node {index} data doesn't start with its own index (found {found})")]
    NodeIndexMismatch { index: u32, found: u32 },
    #[error("node descriptor index {0} out of range")]
    CorruptNodeIndex(i32),
    #[error("node {index} data range [{offset}, {offset}+{size}) exceeds node-data buffer of length {len}")]
    OutOfRange { index: i32, offset: u32, size: u32, len: usize },
}

/// Flatten `tree` into a node-descriptor table and node-data buffer. The
/// buffer is zero-prefilled up to `data_offset` first, matching the
/// original's "that's how they do it, minimal offset in file" quirk: the
/// game's reader expects node data to begin at the first chunk's logical
/// offset, not at zero.
pub fn from_tree(tree: &SaveTree, data_offset: u32) -> Result<(Vec<SerialNodeDesc>, Vec<u8>), SerialTreeError> {
    let total = tree.node_count();
    let mut nodedata = vec![0u8; data_offset as usize];
    let mut descs = Vec::with_capacity(total as usize);
    let mut next_idx = 0u32;
    write_children(&tree.children, total, &mut next_idx, &mut descs, &mut nodedata);

    for (i, d) in descs.iter().enumerate() {
        let at = d.data_offset as usize;
        let found = u32::from_le_bytes(nodedata[at..at + 4].try_into().unwrap());
        if found != i as u32 {
            return Err(SerialTreeError::NodeIndexMismatch { index: i as u32, found });
        }
    }

    Ok((descs, nodedata))
}

fn write_children(
    children: &[Node],
    total: u32,
    next_idx: &mut u32,
    descs: &mut Vec<SerialNodeDesc>,
    nodedata: &mut Vec<u8>,
) {
    let mut last_real: Option<usize> = None;

    for child in children {
        match child {
            Node::Blob(bytes) => nodedata.extend_from_slice(bytes),
            Node::Object { name, payload } => {
                let idx = *next_idx;
                *next_idx += 1;

                let data_offset = nodedata.len() as u32;
                nodedata.extend_from_slice(&idx.to_le_bytes());

                let desc_idx = descs.len();
                descs.push(SerialNodeDesc {
                    name: name.clone(),
                    next_idx: NULL_NODE_IDX,
                    child_idx: NULL_NODE_IDX,
                    data_offset,
                    data_size: 0,
                });

                match payload {
                    NodePayload::Leaf(bytes) => nodedata.extend_from_slice(bytes),
                    NodePayload::Children(sub) => {
                        if !sub.is_empty() {
                            descs[desc_idx].child_idx = *next_idx as i32;
                        }
                        write_children(sub, total, next_idx, descs, nodedata);
                    }
                }

                descs[desc_idx].next_idx = if *next_idx < total { *next_idx as i32 } else { NULL_NODE_IDX };
                descs[desc_idx].data_size = nodedata.len() as u32 - descs[desc_idx].data_offset;
                last_real = Some(desc_idx);
            }
        }
    }

    if let Some(i) = last_real {
        descs[i].next_idx = NULL_NODE_IDX;
    }
}

/// Reconstruct a [`SaveTree`] from a descriptor table and node-data buffer.
/// `data_offset` is the logical offset at which node data begins (the
/// smallest chunk's offset); everything before it is the zero-prefill.
pub fn to_tree(descs: &[SerialNodeDesc], nodedata: &[u8], data_offset: u32) -> Result<SaveTree, SerialTreeError> {
    for (i, d) in descs.iter().enumerate() {
        let at = d.data_offset as usize;
        if at + 4 > nodedata.len() {
            return Err(SerialTreeError::OutOfRange { index: i as i32, offset: d.data_offset, size: 4, len: nodedata.len() });
        }
        let found = u32::from_le_bytes(nodedata[at..at + 4].try_into().unwrap());
        if found != i as u32 {
            return Err(SerialTreeError::NodeIndexMismatch { index: i as u32, found });
        }
    }

    let end_offset = nodedata.len() as u32;
    let first_child = if descs.is_empty() { NULL_NODE_IDX } else { 0 };
    let children = read_child_chain(first_child, data_offset, end_offset, descs, nodedata)?;
    Ok(SaveTree { children })
}

fn read_child_chain(
    mut idx: i32,
    mut cur_offset: u32,
    end_offset: u32,
    descs: &[SerialNodeDesc],
    nodedata: &[u8],
) -> Result<Vec<Node>, SerialTreeError> {
    let mut children = Vec::new();

    while idx >= 0 {
        let d = descs.get(idx as usize).ok_or(SerialTreeError::CorruptNodeIndex(idx))?;

        if d.data_offset > cur_offset {
            children.push(Node::Blob(nodedata[cur_offset as usize..d.data_offset as usize].to_vec()));
        }

        children.push(read_node(idx, d, descs, nodedata)?);

        cur_offset = d.data_offset + d.data_size;
        idx = d.next_idx;
    }

    if cur_offset < end_offset {
        children.push(Node::Blob(nodedata[cur_offset as usize..end_offset as usize].to_vec()));
    }

    Ok(children)
}

fn read_node(idx: i32, d: &SerialNodeDesc, descs: &[SerialNodeDesc], nodedata: &[u8]) -> Result<Node, SerialTreeError> {
    tracing::debug!(index = idx, name = %d.name, offset = d.data_offset, size = d.data_size, "reading node");
    let data_begin = d.data_offset + 4;
    let data_end = d.data_offset + d.data_size;
    if data_end as usize > nodedata.len() {
        return Err(SerialTreeError::OutOfRange { index: idx, offset: d.data_offset, size: d.data_size, len: nodedata.len() });
    }

    let payload = if d.child_idx >= 0 {
        NodePayload::Children(read_child_chain(d.child_idx, data_begin, data_end, descs, nodedata)?)
    } else if data_begin < data_end {
        NodePayload::Leaf(nodedata[data_begin as usize..data_end as usize].to_vec())
    } else {
        NodePayload::Leaf(Vec::new())
    };

    Ok(Node::Object { name: d.name.clone(), payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_then_unflatten_round_trips() {
        let tree = SaveTree {
            children: vec![
                Node::branch(
                    "player",
                    vec![
                        Node::leaf("stats", vec![1, 2, 3, 4]),
                        Node::leaf("inventory", vec![9, 8, 7]),
                    ],
                ),
                Node::leaf("world", vec![0xAA; 16]),
            ],
        };

        let (descs, nodedata) = from_tree(&tree, 0x100).unwrap();
        let rebuilt = to_tree(&descs, &nodedata, 0x100).unwrap();
        assert_eq!(tree, rebuilt);
    }

    #[test]
    fn gaps_between_children_become_blobs() {
        let tree = SaveTree {
            children: vec![Node::branch(
                "root_obj",
                vec![
                    Node::Blob(vec![0xEE; 3]),
                    Node::leaf("a", vec![1]),
                    Node::Blob(vec![0xFF; 2]),
                    Node::leaf("b", vec![2]),
                ],
            )],
        };
        let (descs, nodedata) = from_tree(&tree, 0).unwrap();
        let rebuilt = to_tree(&descs, &nodedata, 0).unwrap();
        assert_eq!(tree, rebuilt);
    }

    #[test]
    fn corrupted_index_prefix_is_rejected() {
        let tree = SaveTree { children: vec![Node::leaf("a", vec![1, 2, 3])] };
        let (descs, mut nodedata) = from_tree(&tree, 0).unwrap();
        nodedata[0] = 0xFF;
        assert!(matches!(to_tree(&descs, &nodedata, 0), Err(SerialTreeError::NodeIndexMismatch { .. })));
    }
}
