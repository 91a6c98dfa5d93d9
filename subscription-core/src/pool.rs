use regex::bytes::Regex;
use slotmap::{new_key_type, SlotMap};

use crate::node::Node;

new_key_type! {
    /// Stable handle to a [`Node`] within its owning pool's arena.
    ///
    /// Stable across reordering of sibling nodes — unlike a `Vec` index, a
    /// `NodeKey` survives `unlink_node` calls on *other* nodes in the pool.
    pub struct NodeKey;
}

/// Literal byte-exact matching, or a compiled pattern for regexp mode.
#[derive(Debug)]
pub enum Mode {
    Literal,
    Pattern(Regex),
}

impl Mode {
    pub fn is_pattern(&self) -> bool {
        matches!(self, Mode::Pattern(_))
    }
}

/// All nodes advertised for one key.
///
/// `order` is the round-robin/insertion sequence; `nodes` is the backing
/// arena. Keeping them separate means removing one node never disturbs the
/// `NodeKey` of any other (see [`NodeKey`]), which matters because `select`
/// hands `NodeKey`s out to callers that hold them across other operations.
#[derive(Debug)]
pub struct Pool {
    pub key: Box<[u8]>,
    pub mode: Mode,
    pub hits: u64,
    pub rr: usize,
    nodes: SlotMap<NodeKey, Node>,
    order: Vec<NodeKey>,
}

impl Pool {
    pub fn new(key: Box<[u8]>, mode: Mode) -> Self {
        Self {
            key,
            mode,
            hits: 0,
            rr: 0,
            nodes: SlotMap::with_key(),
            order: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn order_slice(&self) -> &[NodeKey] {
        &self.order
    }

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    /// Linear scan by node name, the same cost the original linked list pays.
    pub fn find_node_by_name(&self, name: &[u8]) -> Option<NodeKey> {
        self.order
            .iter()
            .copied()
            .find(|&key| self.nodes[key].name.as_ref() == name)
    }

    /// Appends a node, preserving round-robin order.
    pub fn append_node(&mut self, node: Node) -> NodeKey {
        let key = self.nodes.insert(node);
        self.order.push(key);
        key
    }

    /// Removes a node without freeing the pool, even if it becomes empty —
    /// that decision belongs to the registry, which owns the pool sequence.
    pub fn unlink_node(&mut self, key: NodeKey) -> Option<Node> {
        self.order.retain(|&k| k != key);
        self.nodes.remove(key)
    }
}
