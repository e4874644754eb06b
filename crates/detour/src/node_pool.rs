//! Node pool and open list used by the graph searches
//!

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::detour_common::dt_next_pow2;
use super::{PolyRef, Result, Status};

/// Node flags for pathfinding state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags(u8);

impl NodeFlags {
    pub const OPEN: NodeFlags = NodeFlags(0x01);
    pub const CLOSED: NodeFlags = NodeFlags(0x02);

    pub fn contains(&self, flag: NodeFlags) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn insert(&mut self, flag: NodeFlags) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: NodeFlags) {
        self.0 &= !flag.0;
    }
}

/// Node index type
pub type NodeIndex = u16;

/// Null node index constant
pub const DT_NULL_IDX: NodeIndex = NodeIndex::MAX;

/// Largest node budget a pool accepts
pub const DT_MAX_NODE_BUDGET: usize = DT_NULL_IDX as usize;

/// Node in the search graph
#[derive(Debug, Clone)]
pub struct Node {
    /// Position of the node
    pub pos: [f32; 3],
    /// Cost from the start to this node
    pub cost: f32,
    /// Cost plus heuristic
    pub total: f32,
    /// Parent node
    pub parent: Option<NodeIndex>,
    /// Node flags
    pub flags: NodeFlags,
    /// Polygon ref the node corresponds to
    pub id: PolyRef,
}

impl Node {
    fn new(id: PolyRef) -> Self {
        Self {
            pos: [0.0; 3],
            cost: 0.0,
            total: 0.0,
            parent: None,
            flags: NodeFlags::default(),
            id,
        }
    }
}

/// Fixed budget node pool
///
/// Nodes are looked up by polygon through hash chains; a search owns the
/// pool for its whole duration and clears it on start.
#[derive(Debug)]
pub struct NodePool {
    /// Node storage, grows up to `max_nodes`
    nodes: Vec<Node>,
    /// First node index for each hash bucket
    first: Vec<NodeIndex>,
    /// Next node index in hash chain
    next: Vec<NodeIndex>,
    /// Maximum number of nodes
    max_nodes: usize,
    /// Hash table size, a power of two
    hash_size: usize,
}

impl NodePool {
    /// Creates a pool able to hold `max_nodes` nodes
    pub fn new(max_nodes: usize) -> Result<Self> {
        if max_nodes == 0 || max_nodes > DT_MAX_NODE_BUDGET {
            return Err(Status::InvalidParam);
        }
        let hash_size = dt_next_pow2((max_nodes / 4).max(1) as u32) as usize;

        Ok(Self {
            nodes: Vec::with_capacity(max_nodes),
            first: vec![DT_NULL_IDX; hash_size],
            next: vec![DT_NULL_IDX; max_nodes],
            max_nodes,
            hash_size,
        })
    }

    /// Clears the node pool
    pub fn clear(&mut self) {
        self.first.fill(DT_NULL_IDX);
        self.nodes.clear();
    }

    /// Gets or allocates the node of a polygon, `None` when the pool is exhausted
    pub fn get_node(&mut self, id: PolyRef) -> Option<NodeIndex> {
        if let Some(idx) = self.find_node(id) {
            return Some(idx);
        }

        if self.nodes.len() >= self.max_nodes {
            return None;
        }

        let idx = self.nodes.len() as NodeIndex;
        self.nodes.push(Node::new(id));

        let bucket = self.bucket(id);
        self.next[idx as usize] = self.first[bucket];
        self.first[bucket] = idx;
        Some(idx)
    }

    /// Finds the node of a polygon
    pub fn find_node(&self, id: PolyRef) -> Option<NodeIndex> {
        let mut idx = self.first[self.bucket(id)];
        while idx != DT_NULL_IDX {
            let node = self.nodes.get(idx as usize)?;
            if node.id == id {
                return Some(idx);
            }
            idx = self.next[idx as usize];
        }
        None
    }

    #[inline]
    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx as usize]
    }

    #[inline]
    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.nodes[idx as usize]
    }

    /// Polygons from the start of the search to the given node
    pub fn path_to(&self, idx: NodeIndex) -> Vec<PolyRef> {
        let mut path = Vec::new();
        let mut current = Some(idx);
        while let Some(i) = current {
            let node = self.node(i);
            path.push(node.id);
            current = node.parent;
        }
        path.reverse();
        path
    }

    /// Gets the maximum number of nodes
    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    /// Gets the current node count
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn bucket(&self, id: PolyRef) -> usize {
        let a = id.id() as usize;
        (a ^ (a >> 16)) & (self.hash_size - 1)
    }
}

/// Open list entry
#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    total: f32,
    idx: NodeIndex,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap on total cost
        other.total.total_cmp(&self.total)
    }
}

/// Priority queue of open nodes
///
/// Re-prioritised nodes are pushed again; stale entries are skipped on pop.
#[derive(Debug, Default)]
pub struct NodeQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl NodeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Pushes a node with its current total cost
    pub fn push(&mut self, pool: &NodePool, idx: NodeIndex) {
        self.heap.push(QueueEntry {
            total: pool.node(idx).total,
            idx,
        });
    }

    /// Pops the open node with the lowest total cost
    pub fn pop(&mut self, pool: &NodePool) -> Option<NodeIndex> {
        while let Some(entry) = self.heap.pop() {
            let node = pool.node(entry.idx);
            if node.flags.contains(NodeFlags::OPEN) && node.total == entry.total {
                return Some(entry.idx);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_pool() {
        let mut pool = NodePool::new(16).unwrap();

        let poly1 = PolyRef::new(1);
        let idx = pool.get_node(poly1).unwrap();
        assert_eq!(pool.node(idx).id, poly1);
        assert_eq!(pool.find_node(poly1), Some(idx));
        assert_eq!(pool.get_node(poly1), Some(idx));
        assert_eq!(pool.node_count(), 1);

        pool.clear();
        assert_eq!(pool.find_node(poly1), None);
        assert_eq!(pool.node_count(), 0);
    }

    #[test]
    fn test_node_pool_budget() {
        assert_eq!(NodePool::new(0).unwrap_err(), Status::InvalidParam);
        assert_eq!(
            NodePool::new(DT_MAX_NODE_BUDGET + 1).unwrap_err(),
            Status::InvalidParam
        );

        let mut pool = NodePool::new(2).unwrap();
        assert!(pool.get_node(PolyRef::new(1)).is_some());
        assert!(pool.get_node(PolyRef::new(2)).is_some());
        assert!(pool.get_node(PolyRef::new(3)).is_none());
    }

    #[test]
    fn test_node_queue_orders_by_total() {
        let mut pool = NodePool::new(16).unwrap();
        let mut queue = NodeQueue::new();

        for (id, total) in [(1, 5.0), (2, 3.0), (3, 7.0)] {
            let idx = pool.get_node(PolyRef::new(id)).unwrap();
            let node = pool.node_mut(idx);
            node.total = total;
            node.flags.insert(NodeFlags::OPEN);
            queue.push(&pool, idx);
        }

        // Lower the cost of poly 3; its old entry becomes stale.
        let idx3 = pool.find_node(PolyRef::new(3)).unwrap();
        pool.node_mut(idx3).total = 1.0;
        queue.push(&pool, idx3);

        let order: Vec<u32> = std::iter::from_fn(|| {
            let idx = queue.pop(&pool)?;
            pool.node_mut(idx).flags.remove(NodeFlags::OPEN);
            Some(pool.node(idx).id.id())
        })
        .collect();
        assert_eq!(order, vec![3, 2, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_path_to_follows_parents() {
        let mut pool = NodePool::new(8).unwrap();
        let a = pool.get_node(PolyRef::new(10)).unwrap();
        let b = pool.get_node(PolyRef::new(11)).unwrap();
        let c = pool.get_node(PolyRef::new(12)).unwrap();
        pool.node_mut(b).parent = Some(a);
        pool.node_mut(c).parent = Some(b);
        assert_eq!(
            pool.path_to(c),
            vec![PolyRef::new(10), PolyRef::new(11), PolyRef::new(12)]
        );
    }
}
