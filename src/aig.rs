// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! And-inverter graph used for partitioning.
//!
//! Node 0 is reserved (none), node 1 is the constant, and all other
//! nodes are primary inputs, and gates, or primary outputs. The kind
//! of a node is implied by its fanin slots: an input has none, an
//! output has only the first one, an and gate has both.
//!
//! Fanins are stored with the inversion bit as the last bit, e.g.
//! `fanin0_iv = fanin_id << 1 | invert`.

use crate::error::Result;
use crate::graph::Graph;
use indexmap::IndexMap;

/// The reserved "none" node.
pub const AIG_NONE: usize = 0;
/// The constant node.
pub const AIG_CONST: usize = 1;

#[derive(Debug, Default, Clone)]
pub struct AigNode {
    pub fanin0_iv: usize,
    pub fanin1_iv: usize,
    pub num_fanouts: usize,
    /// Logic level, valid after [AIG::compute_all_levels].
    pub level: usize,
}

#[derive(Debug, Default)]
pub struct AIG {
    pub nodes: Vec<AigNode>,
    /// Structural hash of and gates and outputs, keyed by the packed
    /// fanin pair.
    pub strash: IndexMap<u64, usize>,
    /// Primary inputs in creation order.
    pub pis: Vec<usize>,
    /// Primary outputs in creation order.
    pub pos: Vec<usize>,
    /// The number of fanin edges.
    pub num_edges: usize,
    /// The traversal stamp of every node.
    pub trav_ids: Vec<u32>,
    /// The current traversal stamp.
    pub cur_trav: u32,
    /// The maximum level, valid after [AIG::compute_all_levels].
    pub max_level: usize,
    /// The graph node every AIG node was imported from, or `usize::MAX`.
    pub graph_ids: Vec<usize>,
}

#[inline]
fn strash_key(fanin0_iv: usize, fanin1_iv: usize) -> u64 {
    (fanin0_iv as u64) | (fanin1_iv as u64) << 32
}

impl AIG {
    pub fn new() -> AIG {
        let mut aig = AIG::default();
        for _ in 0..2 {
            aig.push_node(0, 0);
        }
        aig
    }

    fn push_node(&mut self, fanin0_iv: usize, fanin1_iv: usize) -> usize {
        self.nodes.push(AigNode { fanin0_iv, fanin1_iv, ..Default::default() });
        self.trav_ids.push(0);
        self.graph_ids.push(usize::MAX);
        self.nodes.len() - 1
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_ands(&self) -> usize {
        (2..self.nodes.len()).filter(|&i| self.is_and(i)).count()
    }

    pub fn is_pi(&self, id: usize) -> bool {
        id >= 2 && self.nodes[id].fanin0_iv >> 1 == AIG_NONE
    }

    pub fn is_po(&self, id: usize) -> bool {
        let n = &self.nodes[id];
        n.fanin0_iv >> 1 != AIG_NONE && n.fanin1_iv >> 1 == AIG_NONE
    }

    pub fn is_and(&self, id: usize) -> bool {
        let n = &self.nodes[id];
        n.fanin0_iv >> 1 != AIG_NONE && n.fanin1_iv >> 1 != AIG_NONE
    }

    pub fn fanin0(&self, id: usize) -> usize {
        self.nodes[id].fanin0_iv >> 1
    }

    pub fn fanin1(&self, id: usize) -> usize {
        self.nodes[id].fanin1_iv >> 1
    }

    pub fn add_pi(&mut self) -> usize {
        let id = self.push_node(0, 0);
        self.pis.push(id);
        id
    }

    /// Add an and gate, or return the existing one with the same
    /// fanins. The fanins are sorted so that the smaller id comes
    /// first.
    pub fn add_and(&mut self, a_iv: usize, b_iv: usize) -> usize {
        let n = self.nodes.len();
        assert!(a_iv >> 1 >= 1 && a_iv >> 1 < n,
                "fanin0 {} out of range (1..{})", a_iv >> 1, n);
        assert!(b_iv >> 1 < n, "fanin1 {} out of range (0..{})", b_iv >> 1, n);
        let (a_iv, b_iv) = match b_iv >> 1 != AIG_NONE && b_iv >> 1 < a_iv >> 1 {
            true => (b_iv, a_iv),
            false => (a_iv, b_iv),
        };
        let key = strash_key(a_iv, b_iv);
        if let Some(&id) = self.strash.get(&key) {
            return id
        }
        for fanin in [a_iv >> 1, b_iv >> 1] {
            assert!(fanin < 2 || !self.is_po(fanin), "output {} used as a fanin", fanin);
        }
        let id = self.push_node(a_iv, b_iv);
        self.strash.insert(key, id);
        for fanin in [a_iv >> 1, b_iv >> 1] {
            if fanin >= 2 {
                self.nodes[fanin].num_fanouts += 1;
                self.num_edges += 1;
            }
        }
        id
    }

    /// Add a primary output. It is listed as an output only if it
    /// was not there already.
    pub fn add_po(&mut self, fanin_iv: usize) -> usize {
        let num_before = self.nodes.len();
        let id = self.add_and(fanin_iv, AIG_NONE);
        if self.nodes.len() > num_before {
            self.pos.push(id);
        }
        id
    }

    /// Start a new traversal. Nodes are visited in this traversal
    /// iff their stamp equals the returned one.
    pub fn next_trav(&mut self) -> u32 {
        self.cur_trav += 1;
        self.cur_trav
    }

    #[inline]
    pub fn is_trav_current(&self, id: usize) -> bool {
        self.trav_ids[id] == self.cur_trav
    }

    #[inline]
    pub fn set_trav_current(&mut self, id: usize) {
        self.trav_ids[id] = self.cur_trav;
    }

    /// Add the nodes of a graph.
    ///
    /// Graph inputs are mapped in order to the existing primary
    /// inputs, creating new ones as needed. Gates and outputs already
    /// in the AIG are reused. Returns the AIG node of every graph node.
    pub fn import_graph(&mut self, graph: &Graph) -> Result<Vec<usize>> {
        graph.check()?;
        let num_pis = (0..graph.num_nodes()).filter(|&i| graph.is_pi(i)).count();
        while self.pis.len() < num_pis {
            self.add_pi();
        }
        let mut node_map = vec![usize::MAX; graph.num_nodes()];
        let mut pi_idx = 0;
        let lit = |node_map: &[usize], (f, c): (usize, bool)| node_map[f] << 1 | c as usize;
        for i in 0..graph.num_nodes() {
            let id = if graph.is_pi(i) {
                pi_idx += 1;
                self.pis[pi_idx - 1]
            }
            else {
                let mut fanins = graph.fanins(i);
                let a = lit(&node_map, fanins.next().expect("graph node without fanin"));
                match fanins.next() {
                    Some(b) => self.add_and(a, lit(&node_map, b)),
                    None => self.add_po(a),
                }
            };
            node_map[i] = id;
            self.graph_ids[id] = i;
        }
        Ok(node_map)
    }

    /// Convert to a graph. Graph node `i` is AIG node `i + 2`.
    pub fn to_graph(&self) -> Graph {
        let fanins = (2..self.nodes.len()).map(|i| {
            let n = &self.nodes[i];
            [n.fanin0_iv, n.fanin1_iv].into_iter()
                .filter(|&f| f >> 1 != AIG_NONE)
                .map(|f| {
                    assert!(f >> 1 >= 2, "node {} has a constant fanin", i);
                    ((f >> 1) - 2, f & 1 != 0)
                })
                .collect::<Vec<_>>()
        }).collect::<Vec<_>>();
        Graph::build(&fanins)
    }

    /// Compute the level of every node reachable from an output.
    /// Returns the maximum level.
    pub fn compute_all_levels(&mut self) -> usize {
        self.next_trav();
        let mut max_level = 0;
        for i in 0..self.pos.len() {
            let po = self.pos[i];
            max_level = max_level.max(self.compute_node_level(po));
        }
        self.max_level = max_level;
        max_level
    }

    /// Compute the level of a node, memoized in the current traversal.
    ///
    /// An output has the level of its fanin.
    pub fn compute_node_level(&mut self, id: usize) -> usize {
        if self.is_trav_current(id) {
            return self.nodes[id].level
        }
        self.set_trav_current(id);
        let level = if self.is_and(id) {
            let l0 = self.compute_node_level(self.fanin0(id));
            let l1 = self.compute_node_level(self.fanin1(id));
            1 + l0.max(l1)
        }
        else if self.is_po(id) {
            self.compute_node_level(self.fanin0(id))
        }
        else {
            0
        };
        self.nodes[id].level = level;
        level
    }

    /// Check the structural invariants. Panics on violation.
    pub fn check(&self) {
        let n = self.nodes.len();
        assert_eq!(self.trav_ids.len(), n, "traversal stamps out of sync");
        assert_eq!(self.graph_ids.len(), n, "graph ids out of sync");
        let num_hashed = (2..n).filter(|&i| !self.is_pi(i)).count();
        assert_eq!(self.strash.len(), num_hashed, "strash table out of sync");
        let mut num_fanouts = vec![0; n];
        for i in 2..n {
            let node = &self.nodes[i];
            for f in [node.fanin0_iv >> 1, node.fanin1_iv >> 1] {
                assert!(f < i, "fanin {} of node {} breaks DFS order", f, i);
                if f >= 2 {
                    num_fanouts[f] += 1;
                }
            }
            if !self.is_pi(i) {
                assert_eq!(self.strash.get(&strash_key(node.fanin0_iv, node.fanin1_iv)),
                           Some(&i), "node {} is not hashed", i);
            }
        }
        for i in 2..n {
            assert_eq!(num_fanouts[i], self.nodes[i].num_fanouts,
                       "fanout count of node {} is wrong", i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strash_is_idempotent() {
        let mut aig = AIG::new();
        let a = aig.add_pi();
        let b = aig.add_pi();
        let g = aig.add_and(a << 1, b << 1 | 1);
        let n = aig.num_nodes();
        assert_eq!(aig.add_and(b << 1 | 1, a << 1), g);
        assert_eq!(aig.add_and(a << 1, b << 1 | 1), g);
        assert_eq!(aig.num_nodes(), n);
        assert_eq!(aig.nodes[a].num_fanouts, 1);
        assert_eq!(aig.fanin0(g), a);
        aig.check();
    }

    #[test]
    fn po_is_listed_once() {
        let mut aig = AIG::new();
        let a = aig.add_pi();
        let b = aig.add_pi();
        let g = aig.add_and(a << 1, b << 1);
        let p = aig.add_po(g << 1 | 1);
        assert_eq!(aig.add_po(g << 1 | 1), p);
        assert_eq!(aig.pos, vec![p]);
        assert!(aig.is_po(p) && aig.is_and(g) && aig.is_pi(a));
        assert_eq!(aig.nodes[g].num_fanouts, 1);
    }

    #[test]
    fn fanins_precede_nodes_and_levels_are_monotone() {
        let mut aig = AIG::new();
        let pis = (0..4).map(|_| aig.add_pi()).collect::<Vec<_>>();
        let g0 = aig.add_and(pis[3] << 1, pis[0] << 1);
        let g1 = aig.add_and(g0 << 1 | 1, pis[1] << 1);
        let g2 = aig.add_and(pis[2] << 1, g1 << 1);
        let g3 = aig.add_and(g2 << 1, g0 << 1);
        aig.add_po(g3 << 1);
        aig.add_po(pis[2] << 1 | 1);
        assert_eq!(aig.compute_all_levels(), 4);
        for i in 2..aig.num_nodes() {
            if aig.is_and(i) {
                assert!(aig.fanin0(i) < i && aig.fanin1(i) < i);
                let l = aig.nodes[aig.fanin0(i)].level.max(aig.nodes[aig.fanin1(i)].level);
                assert_eq!(aig.nodes[i].level, l + 1);
            }
            if aig.is_pi(i) {
                assert_eq!(aig.nodes[i].level, 0);
            }
        }
        assert_eq!(aig.nodes[aig.pos[1]].level, 0);
        aig.check();
    }

    #[test]
    fn graph_round_trip() {
        let mut aig = AIG::new();
        let a = aig.add_pi();
        let b = aig.add_pi();
        let c = aig.add_pi();
        let g = aig.add_and(a << 1, b << 1 | 1);
        let h = aig.add_and(g << 1, c << 1);
        aig.add_po(h << 1 | 1);
        aig.add_po(g << 1);
        let graph = aig.to_graph();
        graph.check().unwrap();
        assert_eq!(graph.num_nodes(), aig.num_nodes() - 2);

        let mut copy = AIG::new();
        let node_map = copy.import_graph(&graph).unwrap();
        copy.check();
        assert_eq!(copy.num_nodes(), aig.num_nodes());
        for i in 2..aig.num_nodes() {
            let j = node_map[i - 2];
            assert_eq!(copy.graph_ids[j], i - 2);
            assert_eq!(copy.nodes[j].fanin0_iv, aig.nodes[i].fanin0_iv);
            assert_eq!(copy.nodes[j].fanin1_iv, aig.nodes[i].fanin1_iv);
        }
    }

    #[test]
    fn importing_twice_reuses_nodes() {
        let mut aig = AIG::new();
        let a = aig.add_pi();
        let b = aig.add_pi();
        let g = aig.add_and(a << 1 | 1, b << 1);
        aig.add_po(g << 1);
        let graph = aig.to_graph();

        let mut dst = AIG::new();
        let first = dst.import_graph(&graph).unwrap();
        let num_nodes = dst.num_nodes();
        let second = dst.import_graph(&graph).unwrap();
        assert_eq!(first, second);
        assert_eq!(dst.num_nodes(), num_nodes);
        assert_eq!(dst.pos.len(), 1);
        dst.check();
    }

    #[test]
    fn import_rejects_malformed_graph() {
        // an and gate without fanout
        let graph = Graph::build(&[vec![], vec![], vec![(0, false), (1, false)]]);
        let mut aig = AIG::new();
        assert!(aig.import_graph(&graph).is_err());
    }
}
