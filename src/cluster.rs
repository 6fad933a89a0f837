// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Output cones, their boundaries, and clusters of overlapping cones.
//!
//! Cones are built in descending level order of their outputs, so the
//! longest cones own the logic they share with shorter ones. Cones that
//! touch each other are united into clusters, the unit of partitioning.

use crate::aig::AIG;
use indexmap::IndexSet;
use std::collections::HashSet;
use std::fmt;

/// The workload contributed by every visit of an input.
pub const PI_WORKLOAD: usize = 1;
/// The cap on the cut count estimate of one node.
pub const MAX_N_CUT: usize = 8;

/// An edge from `fanin` to `fanout`, in AIG node ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub fanin: usize,
    pub fanout: usize,
}

#[derive(Debug, Clone)]
pub struct Cone {
    pub id: usize,
    /// The output this cone belongs to.
    pub po: usize,
    pub level: usize,
    /// Edges entering the cone from shared logic, in discovery order.
    pub boundary: Vec<Edge>,
    /// The cones that own logic this cone depends on.
    pub adjacent: IndexSet<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Cluster {
    pub id: usize,
    pub cones: Vec<usize>,
    pub workload: usize,
    /// The number of and nodes.
    pub num_nodes: usize,
    pub level: usize,
}

/// Cones and clusters of an AIG.
///
/// The per-node scratch data of cone building and workload estimation
/// lives here, not in the AIG nodes.
#[derive(Debug)]
pub struct Clustering {
    pub aig: AIG,
    pub cones: Vec<Cone>,
    /// Clusters sorted by descending workload; `clusters[i].id == i`.
    pub clusters: Vec<Cluster>,
    /// The first cone that reached every node, or `usize::MAX`.
    pub cone_of_node: Vec<usize>,
    /// Edges cut off by splitting. Traversals stop at their fanin.
    pub cut_edges: HashSet<Edge>,
    pub total_workload: usize,
    pub max_workload: usize,
    pending: Vec<usize>,
    ncuts: Vec<usize>,
}

impl Clustering {
    /// Build cones and clusters of an AIG.
    pub fn new(mut aig: AIG) -> Clustering {
        let timer = clilog::stimer!("build clusters");
        let max_level = aig.compute_all_levels();
        let mut pos = aig.pos.clone();
        pos.sort_by(|&a, &b| aig.nodes[b].level.cmp(&aig.nodes[a].level));
        let n = aig.num_nodes();
        let cones = pos.iter().enumerate().map(|(id, &po)| Cone {
            id, po,
            level: aig.nodes[po].level,
            boundary: vec![],
            adjacent: IndexSet::new(),
        }).collect::<Vec<_>>();
        let mut clustering = Clustering {
            aig, cones,
            clusters: vec![],
            cone_of_node: vec![usize::MAX; n],
            cut_edges: HashSet::new(),
            total_workload: 0,
            max_workload: 0,
            pending: vec![0; n],
            ncuts: vec![0; n],
        };
        for i in 0..clustering.cones.len() {
            clustering.find_boundary_edges(i);
        }
        let num_boundary = clustering.cones.iter()
            .map(|c| c.boundary.len()).sum::<usize>();
        clilog::info!("{} cones, max level {}, {} boundary edges",
                      clustering.cones.len(), max_level, num_boundary);
        clustering.unite_cones();
        clustering.compute_all_workloads();
        clilog::finish!(timer);
        clilog::info!("{} clusters, total workload {}, max cluster workload {}",
                      clustering.clusters.len(), clustering.total_workload,
                      clustering.max_workload);
        clustering
    }

    /// Whether a traversal stops at `fanin` when coming from `fanout`.
    #[inline]
    pub(crate) fn is_leaf(&self, fanin: usize, fanout: usize) -> bool {
        fanin < 2 || self.aig.is_pi(fanin) ||
            self.cut_edges.contains(&Edge { fanin, fanout })
    }

    fn find_boundary_edges(&mut self, cone: usize) {
        let po = self.cones[cone].po;
        self.aig.next_trav();
        self.mark_cone(po, cone);
        self.aig.next_trav();
        self.find_boundary_edges_rec(cone, po, false);
    }

    /// Tag the nodes first reached by `cone`, and count the fanouts of
    /// every node not reached from this cone.
    fn mark_cone(&mut self, id: usize, cone: usize) {
        // the constant has no fanout count
        if id < 2 {
            return
        }
        if self.aig.is_po(id) {
            self.mark_cone(self.aig.fanin0(id), cone);
            return
        }
        if self.aig.is_trav_current(id) {
            assert!(self.pending[id] > 0, "node {} visited more than its fanouts", id);
            self.pending[id] -= 1;
            return
        }
        self.aig.set_trav_current(id);
        self.pending[id] = self.aig.nodes[id].num_fanouts.saturating_sub(1);
        match self.cone_of_node[id] {
            usize::MAX => self.cone_of_node[id] = cone,
            owner => assert!(
                self.cones[owner].level >= self.cones[cone].level,
                "node {} owned by cone {} of lower level than cone {}", id, owner, cone),
        }
        if !self.aig.is_and(id) {
            return
        }
        self.mark_cone(self.aig.fanin0(id), cone);
        self.mark_cone(self.aig.fanin1(id), cone);
    }

    #[inline]
    fn is_crossing(&self, fanin: usize, cone: usize) -> bool {
        self.pending[fanin] > 0 ||
            (self.aig.nodes[fanin].num_fanouts > 1 && self.cone_of_node[fanin] != cone)
    }

    fn find_boundary_edges_rec(&mut self, cone: usize, id: usize, covered: bool) {
        if id < 2 {
            return
        }
        if self.aig.is_po(id) {
            let fanin = self.aig.fanin0(id);
            let mut fc = covered;
            if self.pending[fanin] > 0 {
                self.cones[cone].boundary.push(Edge { fanin, fanout: id });
                let owner = self.cone_of_node[fanin];
                if owner != cone {
                    self.cones[cone].adjacent.insert(owner);
                }
                fc = true;
            }
            self.find_boundary_edges_rec(cone, fanin, fc);
            return
        }
        if !self.aig.is_and(id) || self.aig.is_trav_current(id) {
            return
        }
        self.aig.set_trav_current(id);
        for fanin in [self.aig.fanin0(id), self.aig.fanin1(id)] {
            if fanin < 2 {
                continue
            }
            let mut fc = covered;
            if self.is_crossing(fanin, cone) {
                if !covered {
                    self.cones[cone].boundary.push(Edge { fanin, fanout: id });
                }
                let owner = self.cone_of_node[fanin];
                if owner != cone {
                    self.cones[cone].adjacent.insert(owner);
                }
                fc = true;
            }
            self.find_boundary_edges_rec(cone, fanin, fc);
        }
    }

    /// Unite adjacent cones into clusters. The cones of the smaller
    /// cluster move into the larger one when two clusters meet.
    fn unite_cones(&mut self) {
        let mut cluster_of_cone = vec![usize::MAX; self.cones.len()];
        let mut clusters: Vec<Option<Cluster>> = vec![];
        for cone in 0..self.cones.len() {
            for k in 0..self.cones[cone].adjacent.len() {
                let neighbor = self.cones[cone].adjacent[k];
                let cn = cluster_of_cone[neighbor];
                assert_ne!(cn, usize::MAX, "cone {} adjacent to later cone {}", cone, neighbor);
                let cur = cluster_of_cone[cone];
                if cur == usize::MAX {
                    cluster_of_cone[cone] = cn;
                    if let Some(c) = &mut clusters[cn] {
                        c.cones.push(cone);
                    }
                }
                else if cur != cn {
                    let size = |c: usize| clusters[c].as_ref().map_or(0, |c| c.cones.len());
                    let (big, small) = match size(cur) >= size(cn) {
                        true => (cur, cn),
                        false => (cn, cur),
                    };
                    let Some(small_cluster) = clusters[small].take() else { continue };
                    for &c in &small_cluster.cones {
                        cluster_of_cone[c] = big;
                    }
                    if let Some(b) = &mut clusters[big] {
                        b.level = b.level.max(small_cluster.level);
                        b.cones.extend(small_cluster.cones);
                    }
                }
            }
            if cluster_of_cone[cone] == usize::MAX {
                cluster_of_cone[cone] = clusters.len();
                clusters.push(Some(Cluster {
                    id: clusters.len(),
                    cones: vec![cone],
                    level: self.cones[cone].level,
                    ..Default::default()
                }));
            }
        }
        self.clusters = clusters.into_iter().flatten().collect();
    }

    /// Compute workload and node count of every cluster, then sort the
    /// clusters by descending workload.
    pub fn compute_all_workloads(&mut self) {
        for i in 0..self.clusters.len() {
            self.compute_workload(i);
        }
        self.sort_clusters();
    }

    /// Sort the clusters by descending workload, drop empty ones, and
    /// renumber them. Updates the total and maximum workload.
    pub fn sort_clusters(&mut self) {
        self.clusters.retain(|c| !c.cones.is_empty());
        self.clusters.sort_by(|a, b| b.workload.cmp(&a.workload));
        for (i, c) in self.clusters.iter_mut().enumerate() {
            c.id = i;
        }
        self.total_workload = self.clusters.iter().map(|c| c.workload).sum();
        self.max_workload = self.clusters.first().map_or(0, |c| c.workload);
    }

    pub fn compute_workload(&mut self, cluster: usize) {
        let cones = self.clusters[cluster].cones.clone();
        let (workload, num_nodes) = self.workload_of_cones(&cones);
        let c = &mut self.clusters[cluster];
        c.workload = workload;
        c.num_nodes = num_nodes;
    }

    /// Workload and number of and nodes covered by some cones.
    pub fn workload_of_cones(&mut self, cones: &[usize]) -> (usize, usize) {
        let mut workload = 0;
        let mut num_nodes = 0;
        self.aig.next_trav();
        for &cone in cones {
            let po = self.cones[cone].po;
            let fanin = self.aig.fanin0(po);
            if self.is_leaf(fanin, po) {
                workload += PI_WORKLOAD;
            }
            else {
                self.workload_rec(fanin, &mut workload, &mut num_nodes);
            }
        }
        (workload, num_nodes)
    }

    fn workload_rec(&mut self, id: usize, workload: &mut usize, num_nodes: &mut usize) -> usize {
        if self.aig.is_trav_current(id) {
            return self.ncuts[id]
        }
        self.aig.set_trav_current(id);
        *num_nodes += 1;
        let mut ncuts = 1;
        for fanin in [self.aig.fanin0(id), self.aig.fanin1(id)] {
            ncuts *= match self.is_leaf(fanin, id) {
                true => {
                    *workload += PI_WORKLOAD;
                    1
                }
                false => self.workload_rec(fanin, workload, num_nodes),
            };
        }
        *workload += ncuts;
        self.ncuts[id] = ncuts.min(MAX_N_CUT) + 1;
        self.ncuts[id]
    }

    /// Recompute the level of a cone, stopping at cut edges.
    pub fn recompute_cone_level(&mut self, cone: usize) -> usize {
        self.aig.next_trav();
        let po = self.cones[cone].po;
        let fanin = self.aig.fanin0(po);
        let level = match self.is_leaf(fanin, po) {
            true => 0,
            false => self.level_rec(fanin),
        };
        self.cones[cone].level = level;
        level
    }

    fn level_rec(&mut self, id: usize) -> usize {
        if self.aig.is_trav_current(id) {
            return self.aig.nodes[id].level
        }
        self.aig.set_trav_current(id);
        let mut level = 0;
        for fanin in [self.aig.fanin0(id), self.aig.fanin1(id)] {
            if !self.is_leaf(fanin, id) {
                level = level.max(self.level_rec(fanin));
            }
        }
        self.aig.nodes[id].level = level + 1;
        level + 1
    }

    /// Merge small clusters. Clusters are visited by ascending node
    /// count, and each one joins the previous group unless the group
    /// would exceed `bound` nodes.
    pub fn coalesce_small_clusters(&mut self, bound: usize) {
        let mut clusters = std::mem::take(&mut self.clusters);
        clusters.sort_by_key(|c| c.num_nodes);
        let mut merged: Vec<Cluster> = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            match merged.last_mut() {
                Some(last) if last.num_nodes + cluster.num_nodes <= bound => {
                    last.level = last.level.max(cluster.level);
                    last.workload += cluster.workload;
                    last.num_nodes += cluster.num_nodes;
                    last.cones.extend(cluster.cones);
                }
                _ => merged.push(cluster),
            }
        }
        self.clusters = merged;
        self.sort_clusters();
        clilog::info!("{} clusters after coalescing with bound {}",
                      self.clusters.len(), bound);
    }

    /// The cluster of every cone.
    pub fn cluster_of_cone(&self) -> Vec<usize> {
        let mut ret = vec![usize::MAX; self.cones.len()];
        for c in &self.clusters {
            for &cone in &c.cones {
                ret[cone] = c.id;
            }
        }
        ret
    }

    /// Check that every and node reached from the cones of a cluster
    /// is owned by a cone of the same cluster. Panics otherwise.
    pub fn check_clusters(&mut self) {
        let cluster_of_cone = self.cluster_of_cone();
        for c in 0..self.clusters.len() {
            self.aig.next_trav();
            for k in 0..self.clusters[c].cones.len() {
                let po = self.cones[self.clusters[c].cones[k]].po;
                let fanin = self.aig.fanin0(po);
                if !self.is_leaf(fanin, po) {
                    self.check_node_cluster(fanin, c, &cluster_of_cone);
                }
            }
        }
    }

    fn check_node_cluster(&mut self, id: usize, cluster: usize, cluster_of_cone: &[usize]) {
        if self.aig.is_trav_current(id) {
            return
        }
        self.aig.set_trav_current(id);
        let owner = self.cone_of_node[id];
        assert!(owner != usize::MAX && cluster_of_cone[owner] == cluster,
                "node {} of cluster {} is owned by cone {} of another cluster",
                id, cluster, owner);
        for fanin in [self.aig.fanin0(id), self.aig.fanin1(id)] {
            if !self.is_leaf(fanin, id) {
                self.check_node_cluster(fanin, cluster, cluster_of_cone);
            }
        }
    }
}

impl fmt::Display for Clustering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Clustering: {} cones, {} clusters, total workload {}",
                 self.cones.len(), self.clusters.len(), self.total_workload)?;
        for c in &self.clusters {
            writeln!(f, "  cluster[{}]: workload {}, level {}, {} nodes, {} cones",
                     c.id, c.workload, c.level, c.num_nodes, c.cones.len())?;
        }
        Ok(())
    }
}
