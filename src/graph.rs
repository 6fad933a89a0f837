// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Immutable compressed adjacency view of an and-inverter graph.
//!
//! Every node owns a contiguous range of edges. Fanin edges come
//! first, then fanout edges. Nodes are numbered in DFS order so
//! fanins always have smaller indices and fanouts larger ones.

use crate::error::{PifError, Result};
use crate::network::{Network, NetworkKind, ObjType};

#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// The edges of node `i` are `node_start[i]..node_start[i + 1]`.
    pub node_start: Vec<usize>,
    /// The node at the other end of every edge.
    pub edges: Vec<usize>,
    /// Whether the edge is inverted.
    pub edge_compl: Vec<bool>,
    /// 0 for inputs, 1 for outputs, 2 for and nodes.
    pub num_fanins: Vec<u8>,
}

impl Graph {
    /// Build a graph from the fanin lists of all nodes.
    ///
    /// Fanin lists hold `(node, inverted)` pairs with `node` smaller
    /// than the consumer. Fanout edges are derived, in ascending order
    /// of the consumer.
    pub fn build(fanins: &[Vec<(usize, bool)>]) -> Graph {
        let n = fanins.len();
        let mut num_fanouts = vec![0usize; n];
        for (i, fi) in fanins.iter().enumerate() {
            assert!(fi.len() <= 2, "node {} has {} fanins", i, fi.len());
            for &(f, _) in fi {
                assert!(f < i, "fanin {} of node {} breaks DFS order", f, i);
                num_fanouts[f] += 1;
            }
        }
        let mut node_start = Vec::with_capacity(n + 1);
        node_start.push(0);
        for i in 0..n {
            node_start.push(node_start[i] + fanins[i].len() + num_fanouts[i]);
        }
        let num_edges = node_start[n];
        let mut edges = vec![0; num_edges];
        let mut edge_compl = vec![false; num_edges];
        // next free fanout slot of every node
        let mut fill = (0..n).map(|i| node_start[i] + fanins[i].len())
            .collect::<Vec<_>>();
        for (i, fi) in fanins.iter().enumerate() {
            for (k, &(f, c)) in fi.iter().enumerate() {
                edges[node_start[i] + k] = f;
                edge_compl[node_start[i] + k] = c;
                edges[fill[f]] = i;
                edge_compl[fill[f]] = c;
                fill[f] += 1;
            }
        }
        Graph {
            node_start, edges, edge_compl,
            num_fanins: fanins.iter().map(|fi| fi.len() as u8).collect(),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.num_fanins.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn is_pi(&self, i: usize) -> bool {
        self.num_fanins[i] == 0
    }

    pub fn is_po(&self, i: usize) -> bool {
        self.num_fanins[i] == 1
    }

    pub fn is_and(&self, i: usize) -> bool {
        self.num_fanins[i] == 2
    }

    /// The fanins of node `i` as `(node, inverted)` pairs.
    pub fn fanins(&self, i: usize) -> impl Iterator<Item = (usize, bool)> + '_ {
        let st = self.node_start[i];
        let ed = st + self.num_fanins[i] as usize;
        (st..ed).map(move |e| (self.edges[e], self.edge_compl[e]))
    }

    pub fn fanouts(&self, i: usize) -> &[usize] {
        &self.edges[self.node_start[i] + self.num_fanins[i] as usize..self.node_start[i + 1]]
    }

    /// Validate the CSR layout, the DFS order and the edge symmetry.
    pub fn check(&self) -> Result<()> {
        let n = self.num_nodes();
        let malformed = |s: String| Err(PifError::MalformedNetwork(s));
        if self.node_start.len() != n + 1 || self.node_start[n] != self.edges.len() ||
            self.edge_compl.len() != self.edges.len()
        {
            return malformed("graph arrays have inconsistent sizes".into())
        }
        for i in 0..n {
            if self.node_start[i] > self.node_start[i + 1] ||
                self.node_start[i] + (self.num_fanins[i] as usize) > self.node_start[i + 1]
            {
                return malformed(format!("graph node {} has a bad edge range", i))
            }
            if self.num_fanins[i] > 2 {
                return malformed(format!("graph node {} has {} fanins", i, self.num_fanins[i]))
            }
            for (f, c) in self.fanins(i) {
                if f >= i {
                    return malformed(format!("fanin {} of graph node {} breaks DFS order", f, i))
                }
                let fo_start = self.node_start[f] + self.num_fanins[f] as usize;
                let has_back = self.fanouts(f).iter().enumerate()
                    .any(|(k, &o)| o == i && self.edge_compl[fo_start + k] == c);
                if !has_back {
                    return malformed(format!("edge {} -> {} has no fanout counterpart", f, i))
                }
            }
            for &o in self.fanouts(i) {
                if o <= i || o >= n {
                    return malformed(format!("fanout {} of graph node {} breaks DFS order", o, i))
                }
                if !self.fanins(o).any(|(f, _)| f == i) {
                    return malformed(format!("edge {} -> {} has no fanin counterpart", i, o))
                }
            }
            if self.is_po(i) && !self.fanouts(i).is_empty() {
                return malformed(format!("graph output {} has fanouts", i))
            }
            if self.is_and(i) && self.fanouts(i).is_empty() {
                return malformed(format!("graph and node {} has no fanout", i))
            }
        }
        Ok(())
    }

    /// Build the graph of a strashed network.
    ///
    /// Node order: the constant (only if used), the CIs, the and
    /// gates in DFS order from the COs, then the COs. CIs without any
    /// fanout are skipped with a warning, or rejected when
    /// `reject_dangling_inputs` is set.
    ///
    /// Returns the graph and the network object of every graph node.
    pub fn from_network(
        ntk: &Network, reject_dangling_inputs: bool
    ) -> Result<(Graph, Vec<usize>)> {
        if ntk.kind != NetworkKind::Strash {
            return Err(PifError::MalformedNetwork(
                format!("network {} is not strashed", ntk.name)))
        }
        let (fanouts_start, _) = ntk.fanout_csr();
        let num_fanouts = |i: usize| fanouts_start[i + 1] - fanouts_start[i];
        for (i, obj) in ntk.objs.iter().enumerate() {
            let bad = match obj.ty {
                ObjType::And if obj.fanins_iv.len() != 2 => Some(format!(
                    "and gate {} is supposed to have 2 fanins, has {}",
                    i, obj.fanins_iv.len())),
                ObjType::And if num_fanouts(i) == 0 => Some(format!(
                    "and gate {} has no fanout", i)),
                ObjType::Po | ObjType::BoxIn if obj.fanins_iv.len() != 1 => Some(format!(
                    "CO {} is supposed to have 1 fanin, has {}", i, obj.fanins_iv.len())),
                ObjType::Node => Some(format!("object {} is not an and gate", i)),
                _ => None,
            };
            if let Some(s) = bad {
                clilog::error!("{}", s);
                return Err(PifError::MalformedNetwork(s))
            }
        }

        let mut obj2node = vec![usize::MAX; ntk.objs.len()];
        let mut node2obj = Vec::with_capacity(ntk.objs.len());
        let mut push = |obj: usize, node2obj: &mut Vec<usize>| {
            obj2node[obj] = node2obj.len();
            node2obj.push(obj);
        };
        if num_fanouts(0) > 0 {
            push(0, &mut node2obj);
        }
        let mut num_dangling = 0;
        for (idx, &ci) in ntk.cis.iter().enumerate() {
            if num_fanouts(ci) == 0 {
                let name = ntk.objs[ci].name.as_ref()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("ci{}", idx));
                if reject_dangling_inputs {
                    clilog::error!("input {} has no fanout", name);
                    return Err(PifError::DanglingInput(name))
                }
                clilog::trace!("skipping dangling input {}", name);
                num_dangling += 1;
                continue
            }
            push(ci, &mut node2obj);
        }
        if num_dangling > 0 {
            clilog::warn!("{} dangling inputs are left out of the graph", num_dangling);
        }
        for i in ntk.topo_order() {
            if ntk.objs[i].ty == ObjType::And {
                push(i, &mut node2obj);
            }
        }
        for &co in &ntk.cos {
            push(co, &mut node2obj);
        }

        let fanins = node2obj.iter().map(|&obj| {
            ntk.objs[obj].fanins_iv.iter()
                .map(|&f| (obj2node[f >> 1], f & 1 != 0))
                .collect::<Vec<_>>()
        }).collect::<Vec<_>>();
        let graph = Graph::build(&fanins);
        clilog::debug!("graph of {}: {} nodes, {} edges",
                       ntk.name, graph.num_nodes(), graph.num_edges());
        Ok((graph, node2obj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_network() -> Network {
        let mut ntk = Network::new("small", NetworkKind::Strash);
        let a = ntk.add_pi("a") << 1;
        let b = ntk.add_pi("b") << 1;
        ntk.add_pi("unused");
        let c = ntk.add_pi("c") << 1;
        let g = ntk.add_and(a, b ^ 1);
        let h = ntk.add_and(g, c);
        ntk.add_po("x", g ^ 1);
        ntk.add_po("y", h);
        ntk.add_po("z", 1);
        ntk
    }

    #[test]
    fn from_network_orders_nodes() {
        let ntk = small_network();
        let (graph, node2obj) = Graph::from_network(&ntk, false).unwrap();
        graph.check().unwrap();
        // const, a, b, c, g, h, x, y, z
        assert_eq!(graph.num_nodes(), 9);
        assert_eq!(node2obj[0], 0);
        assert!(graph.is_pi(0) && graph.is_pi(3));
        assert!(graph.is_and(4) && graph.is_and(5));
        assert!(graph.is_po(6) && graph.is_po(8));
        assert_eq!(graph.fanins(4).collect::<Vec<_>>(), vec![(1, false), (2, true)]);
        assert_eq!(graph.fanouts(4), &[5, 6]);
        assert_eq!(graph.fanins(8).collect::<Vec<_>>(), vec![(0, true)]);
    }

    #[test]
    fn dangling_inputs_can_be_rejected() {
        let ntk = small_network();
        match Graph::from_network(&ntk, true) {
            Err(PifError::DanglingInput(name)) => assert_eq!(name, "unused"),
            other => panic!("unexpected {:?}", other.map(|r| r.1)),
        }
    }

    #[test]
    fn and_without_fanout_is_malformed() {
        let mut ntk = Network::new("bad", NetworkKind::Strash);
        let a = ntk.add_pi("a") << 1;
        let b = ntk.add_pi("b") << 1;
        let g = ntk.add_and(a, b);
        ntk.add_and(a, b ^ 1);
        ntk.add_po("y", g);
        assert!(matches!(Graph::from_network(&ntk, false),
                         Err(PifError::MalformedNetwork(_))));
    }

    #[test]
    fn check_detects_broken_symmetry() {
        let mut graph = Graph::build(&[vec![], vec![], vec![(0, false), (1, true)], vec![(2, false)]]);
        graph.check().unwrap();
        graph.edge_compl[graph.node_start[2] + 1] = false;
        assert!(graph.check().is_err());
    }
}
