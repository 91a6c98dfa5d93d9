use std::time::{Duration, Instant};

use slotmap::{new_key_type, SlotMap};

use crate::error::AnnounceError;
use crate::node::Node;
use crate::pool::{Mode, NodeKey, Pool};

new_key_type! {
    /// Stable handle to a [`Pool`] in the registry's arena.
    ///
    /// Stable across auto-promotion and pattern-ordered insertion, both of
    /// which reorder `Registry::order` but never touch the arena slots
    /// themselves.
    pub struct PoolId;
}

/// Which matching discipline a lookup uses. A single call never mixes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    Literal,
    Pattern,
}

/// A handle to one node, stable across pool reordering and returned by
/// `select`. Round-trips through `release`, `lookup_by_name`, `remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId {
    pub(crate) pool: PoolId,
    pub(crate) node: NodeKey,
}

/// The result of a successful `select`: which node, and the modifiers the
/// dispatcher should pass along with the proxied request.
#[derive(Debug, Clone, Copy)]
pub struct Selection {
    pub node: NodeId,
    pub modifier1: u16,
    pub modifier2: u16,
}

/// An incoming subscription announcement, already decoded from the wire.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub key: Vec<u8>,
    pub address: Vec<u8>,
    pub modifier1: u16,
    pub modifier2: u16,
    pub regexp: bool,
}

/// `subscription_tolerance` and whether pattern-mode announcements/lookups
/// are permitted at all.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub tolerance: Duration,
    pub regexp_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tolerance: Duration::from_secs(30),
            regexp_enabled: true,
        }
    }
}

const MAX_LEN: usize = 255;

/// Process-wide ordered sequence of pools. Single-threaded cooperative: no
/// internal locking, no suspension points.
#[derive(Debug)]
pub struct Registry {
    pools: SlotMap<PoolId, Pool>,
    order: Vec<PoolId>,
    config: Config,
    evictions_total: u64,
    promotions_total: u64,
}

impl Registry {
    pub fn new(config: Config) -> Self {
        Self {
            pools: SlotMap::with_key(),
            order: Vec::new(),
            config,
            evictions_total: 0,
            promotions_total: 0,
        }
    }

    /// Cumulative count of nodes the sweep has unlinked for being stale and
    /// unreferenced. Monotonic for the registry's lifetime.
    pub fn evictions_total(&self) -> u64 {
        self.evictions_total
    }

    /// Cumulative count of auto-promotion swaps performed by `lookup_index`.
    pub fn promotions_total(&self) -> u64 {
        self.promotions_total
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool_count(&self) -> usize {
        self.order.len()
    }

    pub fn node_count(&self) -> usize {
        self.order.iter().map(|&id| self.pools[id].len()).sum()
    }

    /// Keys of pools in registry order, for diagnostics and tests.
    pub fn pool_keys(&self) -> Vec<Vec<u8>> {
        self.order.iter().map(|&id| self.pools[id].key.to_vec()).collect()
    }

    /// Scans for the matching pool, applying literal-mode auto-promotion.
    /// Shared by every call site that performs a keyed lookup —
    /// `select`, `announce`, `remove`, `lookup_by_name` — all promote
    /// through this one primitive rather than each doing their own scan.
    fn lookup_index(&mut self, key: &[u8], mode: LookupMode) -> Option<usize> {
        let mut pos = None;
        for (i, &id) in self.order.iter().enumerate() {
            let pool = &self.pools[id];
            let is_match = match (&pool.mode, mode) {
                (Mode::Literal, LookupMode::Literal) => pool.key.as_ref() == key,
                (Mode::Pattern(re), LookupMode::Pattern) => re.is_match(key),
                _ => false,
            };
            if is_match {
                pos = Some(i);
                break;
            }
        }

        let mut pos = pos?;
        if mode == LookupMode::Literal && pos > 0 {
            let cur_hits = self.pools[self.order[pos]].hits;
            let prev_hits = self.pools[self.order[pos - 1]].hits;
            if cur_hits > prev_hits {
                self.order.swap(pos, pos - 1);
                pos -= 1;
                self.promotions_total += 1;
                tracing::trace!(new_index = pos, "promoted subscription pool");
            }
        }
        Some(pos)
    }

    /// Inserts a newly created pattern pool so the sequence stays
    /// non-decreasing by key length: immediately before the first
    /// existing pool whose `keylen` strictly exceeds the new one's, or at
    /// the tail if none does.
    fn insert_pattern_pool(&mut self, id: PoolId) {
        let new_len = self.pools[id].key.len();
        let at = self
            .order
            .iter()
            .position(|&other| self.pools[other].key.len() > new_len)
            .unwrap_or(self.order.len());
        self.order.insert(at, id);
    }

    /// Looks up the pool, sweeps dead/unreferenced nodes, and hands back
    /// the next live node by round robin.
    pub fn select(&mut self, key: &[u8], mode: LookupMode, now: Instant) -> Option<Selection> {
        let pos = self.lookup_index(key, mode)?;
        let pool_id = self.order[pos];
        let tolerance = self.config.tolerance;

        let pool = self.pools.get_mut(pool_id).expect("matched pool must exist");
        pool.hits += 1;

        let snapshot: Vec<NodeKey> = pool.order_slice().to_vec();
        let mut i = 0usize;
        let mut rr = pool.rr;
        for node_key in snapshot {
            let node = pool.node_mut(node_key).expect("node present during walk");
            if now.saturating_duration_since(node.last_check) > tolerance {
                node.death_mark = true;
            }
            if node.death_mark && node.reference == 0 {
                pool.unlink_node(node_key);
                self.evictions_total += 1;
                if pool.is_empty() {
                    tracing::debug!(?pool_id, "subscription pool emptied by sweep");
                    self.pools.remove(pool_id);
                    self.order.retain(|&id| id != pool_id);
                    return None;
                }
                continue;
            }
            // Death-marked but still referenced: held back from selection,
            // not evicted, even if this is the node rr currently points at.
            if i == rr && !node.death_mark {
                node.reference += 1;
                let (modifier1, modifier2) = (node.modifier1, node.modifier2);
                rr += 1;
                pool.rr = rr;
                return Some(Selection {
                    node: NodeId { pool: pool_id, node: node_key },
                    modifier1,
                    modifier2,
                });
            }
            i += 1;
        }

        // rr overshot the live length: restart the walk at the first node,
        // as if it had just been matched at position zero.
        pool.rr = 0;
        let first_key = *pool.order_slice().first()?;
        let node = pool.node_mut(first_key).expect("first key must resolve");
        if node.death_mark {
            return None;
        }
        node.reference += 1;
        let (modifier1, modifier2) = (node.modifier1, node.modifier2);
        pool.rr = 1;
        Some(Selection {
            node: NodeId { pool: pool_id, node: first_key },
            modifier1,
            modifier2,
        })
    }

    /// Decrements the held reference; a no-op on a handle whose pool or
    /// node has already been freed, which can only happen once the
    /// reference count had already reached zero.
    pub fn release(&mut self, id: NodeId) {
        if let Some(pool) = self.pools.get_mut(id.pool) {
            if let Some(node) = pool.node_mut(id.node) {
                node.reference = node.reference.saturating_sub(1);
            }
        }
    }

    /// Accepts an announcement: refreshes an existing node, appends a new
    /// node to an existing pool, or creates a new pool entirely.
    pub fn announce(&mut self, req: AnnounceRequest, now: Instant) -> Result<NodeId, AnnounceError> {
        if req.key.len() > MAX_LEN {
            return Err(AnnounceError::KeyTooLong);
        }
        if req.address.len() > MAX_LEN {
            return Err(AnnounceError::NameTooLong);
        }
        if req.regexp && !self.config.regexp_enabled {
            return Err(AnnounceError::RegexpDisabled);
        }

        if let Some(pos) = self.lookup_index(&req.key, LookupMode::Literal) {
            let pool_id = self.order[pos];
            let pool = self.pools.get_mut(pool_id).expect("matched pool must exist");
            if let Some(node_key) = pool.find_node_by_name(&req.address) {
                let node = pool.node_mut(node_key).expect("node key must resolve");
                node.death_mark = false;
                node.last_check = now;
                tracing::debug!(pool = ?pool_id, "refreshed existing subscription node");
                return Ok(NodeId { pool: pool_id, node: node_key });
            }
            let node_key = pool.append_node(Node::new(
                req.address.into_boxed_slice(),
                req.modifier1,
                req.modifier2,
                now,
            ));
            tracing::debug!(pool = ?pool_id, "appended subscription node");
            return Ok(NodeId { pool: pool_id, node: node_key });
        }

        let mode = if req.regexp {
            let pattern =
                std::str::from_utf8(&req.key).map_err(|_| AnnounceError::PatternCompileFailed(regex::Error::Syntax(
                    "subscription pattern is not valid UTF-8".to_string(),
                )))?;
            Mode::Pattern(regex::bytes::Regex::new(pattern).map_err(AnnounceError::PatternCompileFailed)?)
        } else {
            Mode::Literal
        };

        let mut pool = Pool::new(req.key.into_boxed_slice(), mode);
        let node_key = pool.append_node(Node::new(
            req.address.into_boxed_slice(),
            req.modifier1,
            req.modifier2,
            now,
        ));
        let is_pattern = pool.mode.is_pattern();
        let pool_id = self.pools.insert(pool);

        if is_pattern {
            self.insert_pattern_pool(pool_id);
        } else {
            self.order.push(pool_id);
        }

        tracing::debug!(pool = ?pool_id, "created subscription pool");
        Ok(NodeId { pool: pool_id, node: node_key })
    }

    /// Removes the node named `name` from the pool matching `key`, if any.
    pub fn remove(&mut self, key: &[u8], name: &[u8], mode: LookupMode) -> bool {
        let Some(pos) = self.lookup_index(key, mode) else {
            return false;
        };
        let pool_id = self.order[pos];
        let node_key = match self.pools[pool_id].find_node_by_name(name) {
            Some(k) => k,
            None => return false,
        };
        self.remove_node(NodeId { pool: pool_id, node: node_key });
        true
    }

    /// Unlinks and frees a node, collapsing the pool if it's now empty.
    /// Exposed for administrative callers that already hold a handle, and
    /// used internally by `remove`. A node still holding a reference is
    /// only death-marked: the sweep inside `select` frees it once the
    /// reference drops to zero, the same as a node that simply went stale.
    pub fn remove_node(&mut self, id: NodeId) {
        let Some(pool) = self.pools.get_mut(id.pool) else { return };
        let Some(node) = pool.node_mut(id.node) else { return };
        if node.reference > 0 {
            node.death_mark = true;
            return;
        }
        pool.unlink_node(id.node);
        if pool.is_empty() {
            self.pools.remove(id.pool);
            self.order.retain(|&pid| pid != id.pool);
        }
    }

    /// Diagnostic lookup by pool key and node name. Still triggers literal
    /// auto-promotion, since it routes through the same promoting lookup
    /// primitive as every other keyed call.
    pub fn lookup_by_name(&mut self, key: &[u8], name: &[u8], mode: LookupMode) -> Option<NodeId> {
        let pos = self.lookup_index(key, mode)?;
        let pool_id = self.order[pos];
        let node_key = self.pools[pool_id].find_node_by_name(name)?;
        Some(NodeId { pool: pool_id, node: node_key })
    }

    /// Read-only accessors used by tests and by `subscription-metrics`.
    pub fn node_reference(&self, id: NodeId) -> Option<u32> {
        self.pools.get(id.pool)?.node(id.node).map(|n| n.reference)
    }

    pub fn node_death_mark(&self, id: NodeId) -> Option<bool> {
        self.pools.get(id.pool)?.node(id.node).map(|n| n.death_mark)
    }

    pub fn pool_hits(&self, id: NodeId) -> Option<u64> {
        self.pools.get(id.pool).map(|p| p.hits)
    }

    pub fn pool_rr(&self, id: NodeId) -> Option<usize> {
        self.pools.get(id.pool).map(|p| p.rr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(tolerance_secs: u64) -> Registry {
        Registry::new(Config {
            tolerance: Duration::from_secs(tolerance_secs),
            regexp_enabled: true,
        })
    }

    fn announce(reg: &mut Registry, key: &str, addr: &str, now: Instant) -> NodeId {
        reg.announce(
            AnnounceRequest {
                key: key.as_bytes().to_vec(),
                address: addr.as_bytes().to_vec(),
                modifier1: 0,
                modifier2: 0,
                regexp: false,
            },
            now,
        )
        .unwrap()
    }

    // A single node is returned on every select, reference-counted each time.
    // With only one live position, rr alternates 1/0/1/... as each call in
    // turn matches directly and overshoots on the next.
    #[test]
    fn single_node_steady_state() {
        let mut reg = registry(30);
        let now = Instant::now();
        let n1 = announce(&mut reg, "example.com", "10.0.0.1:9000", now);

        for _ in 0..3 {
            let sel = reg.select(b"example.com", LookupMode::Literal, now).unwrap();
            assert_eq!(sel.node, n1);
            reg.release(sel.node);
        }
        assert_eq!(reg.pool_hits(n1), Some(3));
        assert_eq!(reg.pool_rr(n1), Some(1));

        let sel = reg.select(b"example.com", LookupMode::Literal, now).unwrap();
        assert_eq!(sel.node, n1);
        reg.release(sel.node);
        assert_eq!(reg.pool_hits(n1), Some(4));
        assert_eq!(reg.pool_rr(n1), Some(1));
    }

    // Round robin cycles through all nodes in insertion order before repeating.
    #[test]
    fn round_robin_three_nodes() {
        let mut reg = registry(30);
        let now = Instant::now();
        let n1 = announce(&mut reg, "r.example", "10.0.0.1:1", now);
        let n2 = announce(&mut reg, "r.example", "10.0.0.2:1", now);
        let n3 = announce(&mut reg, "r.example", "10.0.0.3:1", now);

        let expected = [n1, n2, n3, n1, n2, n3];
        for want in expected {
            let sel = reg.select(b"r.example", LookupMode::Literal, now).unwrap();
            assert_eq!(sel.node, want);
            reg.release(sel.node);
        }
    }

    // A node held by an in-flight reference survives sweeping even once stale.
    #[test]
    fn reference_protected_deletion() {
        let mut reg = registry(5);
        let t0 = Instant::now();
        let n1 = announce(&mut reg, "k", "1.2.3.4:1", t0);

        let sel = reg.select(b"k", LookupMode::Literal, t0).unwrap();
        assert_eq!(sel.node, n1);
        assert_eq!(reg.node_reference(n1), Some(1));

        let t1 = t0 + Duration::from_secs(10);
        // still referenced: death-marked but not freed, so no live node to return.
        let none = reg.select(b"k", LookupMode::Literal, t1);
        assert!(none.is_none());
        assert_eq!(reg.node_death_mark(n1), Some(true));
        assert_eq!(reg.pool_count(), 1);

        reg.release(n1);
        assert_eq!(reg.node_reference(n1), Some(0));

        let gone = reg.select(b"k", LookupMode::Literal, t1);
        assert!(gone.is_none());
        assert_eq!(reg.pool_count(), 0);
    }

    // Repeated hits move a pool ahead of a less-popular predecessor.
    #[test]
    fn auto_promotion() {
        let mut reg = registry(30);
        let now = Instant::now();
        announce(&mut reg, "A", "1.1.1.1:1", now);
        announce(&mut reg, "B", "2.2.2.2:1", now);
        announce(&mut reg, "C", "3.3.3.3:1", now);
        assert_eq!(
            reg.pool_keys(),
            vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]
        );

        for _ in 0..5 {
            let sel = reg.select(b"C", LookupMode::Literal, now).unwrap();
            reg.release(sel.node);
        }
        let sel = reg.select(b"A", LookupMode::Literal, now).unwrap();
        reg.release(sel.node);
        let sel = reg.select(b"B", LookupMode::Literal, now).unwrap();
        reg.release(sel.node);

        assert_eq!(
            reg.pool_keys(),
            vec![b"C".to_vec(), b"A".to_vec(), b"B".to_vec()]
        );
    }

    // Pattern pools stay ordered by ascending key length as they're created.
    #[test]
    fn pattern_pool_ordering() {
        let mut reg = registry(30);
        let now = Instant::now();
        for key in ["^a$", "^abcdef$", "^ab$"] {
            reg.announce(
                AnnounceRequest {
                    key: key.as_bytes().to_vec(),
                    address: b"1.1.1.1:1".to_vec(),
                    modifier1: 0,
                    modifier2: 0,
                    regexp: true,
                },
                now,
            )
            .unwrap();
        }
        let lens: Vec<usize> = reg.pool_keys().iter().map(|k| k.len()).collect();
        assert_eq!(lens, vec![4, 5, 8]);
    }

    // Re-announcing a stale node clears its death mark and refreshes it.
    #[test]
    fn reannounce_clears_death_mark() {
        let mut reg = registry(5);
        let t0 = Instant::now();
        let n1 = announce(&mut reg, "k", "1.2.3.4:1", t0);
        let sel = reg.select(b"k", LookupMode::Literal, t0).unwrap();
        reg.release(sel.node);

        let t1 = t0 + Duration::from_secs(10);
        let again = announce(&mut reg, "k", "1.2.3.4:1", t1);
        assert_eq!(again, n1);
        assert_eq!(reg.node_death_mark(n1), Some(false));

        let sel = reg.select(b"k", LookupMode::Literal, t1).unwrap();
        assert_eq!(sel.node, n1);
    }

    // Re-announcing an existing (key, name) does not grow the pool.
    #[test]
    fn reannounce_does_not_duplicate() {
        let mut reg = registry(30);
        let now = Instant::now();
        let n1 = announce(&mut reg, "k", "1.2.3.4:1", now);
        let again = announce(&mut reg, "k", "1.2.3.4:1", now);
        assert_eq!(n1, again);
        assert_eq!(reg.node_count(), 1);
    }

    // Boundary on key length.
    #[test]
    fn key_length_boundary() {
        let mut reg = registry(30);
        let now = Instant::now();
        let ok_key = vec![b'a'; 255];
        let bad_key = vec![b'a'; 256];

        assert!(reg
            .announce(
                AnnounceRequest { key: ok_key, address: b"1.1.1.1:1".to_vec(), modifier1: 0, modifier2: 0, regexp: false },
                now
            )
            .is_ok());
        assert!(matches!(
            reg.announce(
                AnnounceRequest { key: bad_key, address: b"1.1.1.1:1".to_vec(), modifier1: 0, modifier2: 0, regexp: false },
                now
            ),
            Err(AnnounceError::KeyTooLong)
        ));
    }

    #[test]
    fn name_length_boundary() {
        let mut reg = registry(30);
        let now = Instant::now();
        let bad_addr = vec![b'a'; 256];
        assert!(matches!(
            reg.announce(
                AnnounceRequest { key: b"k".to_vec(), address: bad_addr, modifier1: 0, modifier2: 0, regexp: false },
                now
            ),
            Err(AnnounceError::NameTooLong)
        ));
    }

    #[test]
    fn pattern_compile_failure_leaves_no_pool() {
        let mut reg = registry(30);
        let now = Instant::now();
        let err = reg.announce(
            AnnounceRequest {
                key: b"(unclosed".to_vec(),
                address: b"1.1.1.1:1".to_vec(),
                modifier1: 0,
                modifier2: 0,
                regexp: true,
            },
            now,
        );
        assert!(matches!(err, Err(AnnounceError::PatternCompileFailed(_))));
        assert_eq!(reg.pool_count(), 0);
    }

    #[test]
    fn regexp_disabled_rejects_pattern_announce() {
        let mut reg = Registry::new(Config { tolerance: Duration::from_secs(30), regexp_enabled: false });
        let now = Instant::now();
        let err = reg.announce(
            AnnounceRequest {
                key: b"^a$".to_vec(),
                address: b"1.1.1.1:1".to_vec(),
                modifier1: 0,
                modifier2: 0,
                regexp: true,
            },
            now,
        );
        assert!(matches!(err, Err(AnnounceError::RegexpDisabled)));
    }

    #[test]
    fn lookup_by_name_is_diagnostic() {
        let mut reg = registry(30);
        let now = Instant::now();
        let n1 = announce(&mut reg, "k", "1.2.3.4:1", now);
        assert_eq!(reg.lookup_by_name(b"k", b"1.2.3.4:1", LookupMode::Literal), Some(n1));
        assert_eq!(reg.lookup_by_name(b"k", b"nope", LookupMode::Literal), None);
        assert_eq!(reg.lookup_by_name(b"missing", b"1.2.3.4:1", LookupMode::Literal), None);
    }

    #[test]
    fn explicit_remove_collapses_empty_pool() {
        let mut reg = registry(30);
        let now = Instant::now();
        announce(&mut reg, "k", "1.2.3.4:1", now);
        assert!(reg.remove(b"k", b"1.2.3.4:1", LookupMode::Literal));
        assert_eq!(reg.pool_count(), 0);
        assert!(!reg.remove(b"k", b"1.2.3.4:1", LookupMode::Literal));
    }

    quickcheck::quickcheck! {
        // No pool in the registry ever ends up with zero nodes.
        fn no_empty_pools_survive(ops: Vec<(u8, u8, u8)>) -> bool {
            let mut reg = registry(30);
            let now = Instant::now();
            for (key_byte, addr_byte, op) in ops {
                let key = vec![b'k', key_byte % 4];
                let addr = vec![b'a', addr_byte % 4];
                match op % 3 {
                    0 => {
                        let _ = reg.announce(
                            AnnounceRequest { key, address: addr, modifier1: 0, modifier2: 0, regexp: false },
                            now,
                        );
                    }
                    1 => {
                        if let Some(sel) = reg.select(&key, LookupMode::Literal, now) {
                            reg.release(sel.node);
                        }
                    }
                    _ => {
                        reg.remove(&key, &addr, LookupMode::Literal);
                    }
                }
            }
            reg.order.iter().all(|&id| !reg.pools[id].is_empty())
        }

        // A node with an outstanding reference is never freed, whether by
        // the lazy sweep or by an explicit remove racing a held selection.
        fn referenced_nodes_survive_interleaved_ops(ops: Vec<(u8, u8, u8)>) -> bool {
            let mut reg = registry(2);
            let now = Instant::now();
            let mut held: Vec<NodeId> = Vec::new();

            for (key_byte, addr_byte, op) in ops {
                let key = vec![b'k', key_byte % 3];
                let addr = vec![b'a', addr_byte % 3];
                match op % 4 {
                    0 => {
                        let _ = reg.announce(
                            AnnounceRequest { key, address: addr, modifier1: 0, modifier2: 0, regexp: false },
                            now,
                        );
                    }
                    1 => {
                        if let Some(sel) = reg.select(&key, LookupMode::Literal, now) {
                            held.push(sel.node);
                        }
                    }
                    2 => {
                        if let Some(id) = held.pop() {
                            reg.release(id);
                        }
                    }
                    _ => {
                        reg.remove(&key, &addr, LookupMode::Literal);
                    }
                }

                if !held.iter().all(|&id| reg.node_reference(id).map_or(false, |r| r >= 1)) {
                    return false;
                }
            }

            for id in held {
                reg.release(id);
            }
            true
        }

        // Pattern pools stay sorted by key length.
        fn pattern_pools_stay_sorted(lens: Vec<u8>) -> bool {
            let mut reg = registry(30);
            let now = Instant::now();
            for (i, len) in lens.into_iter().enumerate() {
                let len = (len % 20) as usize + 1;
                let pattern = format!("^{}{}$", "a".repeat(len.saturating_sub(2).max(0)), i);
                if reg.announce(
                    AnnounceRequest {
                        key: pattern.into_bytes(),
                        address: b"1.1.1.1:1".to_vec(),
                        modifier1: 0,
                        modifier2: 0,
                        regexp: true,
                    },
                    now,
                ).is_err() {
                    continue;
                }
            }
            let lens: Vec<usize> = reg.pool_keys().iter().map(|k| k.len()).collect();
            lens.windows(2).all(|w| w[0] <= w[1])
        }
    }
}
