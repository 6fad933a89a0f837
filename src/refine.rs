// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Splitting of oversized clusters and assignment of partitions.

use crate::cluster::{Cluster, Clustering, Edge};
use crate::graph::Graph;
use serde::{Deserialize, Serialize};

/// The smallest number of partitions worth balancing for.
pub const MIN_N_PART: usize = 2;
/// The largest number of partitions picked automatically.
pub const MAX_N_PART: usize = 20;

/// How the number of partitions is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BalancePolicy {
    /// One partition per cluster, no splitting.
    #[default]
    OnePerCluster,
    /// Split the largest clusters, then let the workload decide.
    Balanced,
    /// Split the largest clusters, then pack into at most this many
    /// partitions.
    Fixed(usize),
}

/// The final partition of every graph node.
#[derive(Debug, Clone, Default)]
pub struct Partitioning {
    pub num_parts: usize,
    /// The partition of every graph node.
    pub part_of_node: Vec<usize>,
    pub workloads: Vec<usize>,
    pub num_nodes: Vec<usize>,
}

impl Partitioning {
    /// The graph nodes of every partition.
    pub fn nodes_of_parts(&self) -> Vec<Vec<usize>> {
        let mut ret = vec![vec![]; self.num_parts];
        for (i, &p) in self.part_of_node.iter().enumerate() {
            ret[p].push(i);
        }
        ret
    }
}

impl Clustering {
    /// Move out every cone of a cluster whose boundary edges all come
    /// from primary inputs. Returns the number of cones moved out.
    pub fn split_by_input_cut(&mut self, cluster: usize) -> usize {
        if self.clusters[cluster].cones.len() <= 1 {
            return 0
        }
        let mut movable = self.clusters[cluster].cones.iter().copied()
            .filter(|&c| {
                let boundary = &self.cones[c].boundary;
                !boundary.is_empty() &&
                    boundary.iter().all(|e| self.aig.is_pi(e.fanin))
            })
            .collect::<Vec<_>>();
        self.keep_critical_cone(cluster, &mut movable);
        self.extract_cones(cluster, &movable);
        if !movable.is_empty() {
            clilog::debug!("input cut moved {} cones out of cluster {}",
                           movable.len(), cluster);
        }
        movable.len()
    }

    /// Cut the boundary edges of every cone of a cluster that neither
    /// feeds itself across its boundary nor has an output on it, and
    /// move those cones out. Returns the number of cones moved out.
    pub fn split_by_edge_cut(&mut self, cluster: usize, workload_limit: usize) -> usize {
        if self.clusters[cluster].workload <= workload_limit ||
            self.clusters[cluster].cones.len() <= 1
        {
            return 0
        }
        let mut cones = self.clusters[cluster].cones.clone();
        cones.sort_by(|&a, &b| self.cones[b].adjacent.len().cmp(&self.cones[a].adjacent.len()));
        let mut movable = cones.into_iter().filter(|&c| {
            self.cones[c].boundary.iter().all(|e| {
                self.cone_of_node[e.fanin] != c && !self.aig.is_po(e.fanout)
            })
        }).collect::<Vec<_>>();
        self.keep_critical_cone(cluster, &mut movable);
        for &c in &movable {
            let boundary = self.cones[c].boundary.clone();
            self.cut_edges.extend(boundary.iter().copied());
            self.recompute_cone_level(c);
        }
        self.extract_cones(cluster, &movable);
        if !movable.is_empty() {
            clilog::debug!("edge cut moved {} cones out of cluster {}, {} edges cut in total",
                           movable.len(), cluster, self.cut_edges.len());
        }
        movable.len()
    }

    /// A cluster is never emptied: its highest cone stays.
    fn keep_critical_cone(&self, cluster: usize, movable: &mut Vec<usize>) {
        if movable.len() == self.clusters[cluster].cones.len() {
            if let Some(&first) = self.clusters[cluster].cones.iter().min() {
                movable.retain(|&c| c != first);
            }
        }
    }

    /// Move cones out of a cluster, one new cluster per cone, and
    /// refresh workloads and the cluster order.
    fn extract_cones(&mut self, cluster: usize, cones: &[usize]) {
        if cones.is_empty() {
            return
        }
        self.clusters[cluster].cones.retain(|c| !cones.contains(c));
        for &cone in cones {
            let id = self.clusters.len();
            self.clusters.push(Cluster {
                id,
                cones: vec![cone],
                level: self.cones[cone].level,
                ..Default::default()
            });
            self.compute_workload(id);
        }
        self.clusters[cluster].level = self.clusters[cluster].cones.iter()
            .map(|&c| self.cones[c].level)
            .max().unwrap_or(0);
        self.compute_workload(cluster);
        self.sort_clusters();
    }

    /// Split the largest clusters until no cluster has more than
    /// `workload_limit`, or nothing can be split any more.
    /// Input cuts are tried first, edge cuts after.
    pub fn shrink_clusters(&mut self, workload_limit: usize) {
        while self.max_workload > workload_limit {
            // the largest cluster is always the first one
            if self.split_by_input_cut(0) == 0 {
                break
            }
        }
        while self.max_workload > workload_limit {
            if self.split_by_edge_cut(0, workload_limit) == 0 {
                break
            }
        }
        if self.max_workload > workload_limit {
            clilog::warn!("max cluster workload {} stays above limit {}",
                          self.max_workload, workload_limit);
        }
        clilog::info!("after splitting: {} clusters, max workload {}, {} cut edges",
                      self.clusters.len(), self.max_workload, self.cut_edges.len());
    }

    /// The number of partitions suggested by the workload, or `None`
    /// if the largest cluster dominates.
    pub fn decide_num_parts(&self) -> Option<usize> {
        if self.max_workload == 0 {
            return None
        }
        let mut num_parts = self.total_workload / self.max_workload;
        clilog::debug!("max number of partitions: {}", num_parts);
        if num_parts < MIN_N_PART {
            return None
        }
        while num_parts > MAX_N_PART {
            num_parts /= 2;
        }
        Some(num_parts)
    }

    /// Assign clusters greedily, in descending workload, to the least
    /// loaded of `num_parts` buckets. Returns the clusters of every
    /// bucket.
    pub fn assign_clusters(&self, num_parts: usize) -> Vec<Vec<usize>> {
        assert!(num_parts >= 1);
        let mut buckets = vec![vec![]; num_parts];
        let mut loads = vec![0usize; num_parts];
        for c in &self.clusters {
            let (best, _) = loads.iter().enumerate()
                .min_by_key(|&(i, &l)| (l, i))
                .expect("no partition");
            loads[best] += c.workload;
            buckets[best].push(c.id);
        }
        buckets
    }

    /// Pick the buckets according to a balancing policy.
    pub fn balance(&mut self, policy: BalancePolicy) -> Vec<Vec<usize>> {
        let one_per_cluster = |s: &Self| -> Vec<Vec<usize>> {
            (0..s.clusters.len()).map(|c| vec![c]).collect()
        };
        match policy {
            BalancePolicy::OnePerCluster => one_per_cluster(self),
            BalancePolicy::Balanced => {
                self.shrink_clusters(self.total_workload / MIN_N_PART);
                match self.decide_num_parts() {
                    Some(n) => self.assign_clusters(n.min(self.clusters.len())),
                    None => {
                        clilog::warn!("workload cannot be balanced, using one partition per cluster");
                        one_per_cluster(self)
                    }
                }
            }
            BalancePolicy::Fixed(n) => {
                self.shrink_clusters(self.total_workload / MIN_N_PART);
                if n > self.clusters.len() {
                    clilog::warn!("only {} clusters for {} requested partitions",
                                  self.clusters.len(), n);
                }
                self.assign_clusters(n.min(self.clusters.len()).max(1))
            }
        }
    }

    /// Stamp every graph node with its partition.
    ///
    /// Inputs may be reached from several partitions; the first one
    /// wins. An and node reached from two partitions is a fatal error.
    /// Outputs not reached otherwise take the partition of their fanin.
    pub fn stamp_partitions(&mut self, graph: &Graph, buckets: &[Vec<usize>]) -> Partitioning {
        let n = self.aig.num_nodes();
        let mut part_of_aig = vec![usize::MAX; n];
        let mut workloads = vec![0; buckets.len()];
        let mut num_nodes = vec![0; buckets.len()];
        for (p, bucket) in buckets.iter().enumerate() {
            for &c in bucket {
                workloads[p] += self.clusters[c].workload;
                num_nodes[p] += self.clusters[c].num_nodes;
                self.aig.next_trav();
                for k in 0..self.clusters[c].cones.len() {
                    let po = self.cones[self.clusters[c].cones[k]].po;
                    let fanin = self.aig.fanin0(po);
                    self.stamp_rec(fanin, p, &mut part_of_aig);
                }
            }
        }
        let mut part_of_node = vec![usize::MAX; graph.num_nodes()];
        for id in 2..n {
            let g = self.aig.graph_ids[id];
            if g != usize::MAX {
                part_of_node[g] = part_of_aig[id];
            }
        }
        for g in 0..graph.num_nodes() {
            if part_of_node[g] != usize::MAX {
                continue
            }
            assert!(graph.is_po(g), "graph node {} ({} fanins) has no partition",
                    g, graph.num_fanins[g]);
            let (fanin, _) = graph.fanins(g).next().expect("output without fanin");
            assert_ne!(part_of_node[fanin], usize::MAX,
                       "fanin {} of output {} has no partition", fanin, g);
            part_of_node[g] = part_of_node[fanin];
        }
        for (p, (w, nn)) in workloads.iter().zip(&num_nodes).enumerate() {
            clilog::debug!("partition {}: workload {}, {} nodes", p, w, nn);
        }
        Partitioning { num_parts: buckets.len(), part_of_node, workloads, num_nodes }
    }

    fn stamp_rec(&mut self, id: usize, part: usize, part_of_aig: &mut [usize]) {
        if id < 2 {
            return
        }
        if self.aig.is_pi(id) {
            if part_of_aig[id] == usize::MAX {
                part_of_aig[id] = part;
            }
            return
        }
        if self.aig.is_trav_current(id) {
            return
        }
        self.aig.set_trav_current(id);
        match part_of_aig[id] {
            usize::MAX => part_of_aig[id] = part,
            p if p == part => {}
            p => panic!("and node {} claimed by partitions {} and {}", id, p, part),
        }
        for fanin in [self.aig.fanin0(id), self.aig.fanin1(id)] {
            if !self.cut_edges.contains(&Edge { fanin, fanout: id }) {
                self.stamp_rec(fanin, part, part_of_aig);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tests::reference_aig;

    #[test]
    fn edge_cut_splits_shared_cone() {
        let (aig, [_, n4, _, n8, _, _]) = reference_aig();
        let mut cl = Clustering::new(aig);
        // all boundary edges of the first cluster come from and nodes
        assert_eq!(cl.split_by_input_cut(0), 0);
        assert_eq!(cl.split_by_edge_cut(0, 9), 1);
        assert!(cl.cut_edges.contains(&Edge { fanin: n4, fanout: n8 }));
        let workloads = cl.clusters.iter().map(|c| c.workload).collect::<Vec<_>>();
        assert_eq!(workloads, vec![10, 6, 3]);
        assert_eq!(cl.total_workload, 19);
        assert_eq!(cl.max_workload, 10);
        cl.check_clusters();
        // the remaining cone owns its boundary fanin
        assert_eq!(cl.split_by_edge_cut(0, 9), 0);
    }

    #[test]
    fn input_cut_moves_cones_fed_by_inputs_only() {
        let mut aig = crate::aig::AIG::new();
        let a = aig.add_pi();
        let b = aig.add_pi();
        let c = aig.add_pi();
        let g = aig.add_and(a << 1, b << 1);
        let h = aig.add_and(g << 1, c << 1);
        aig.add_po(h << 1);
        // shares input b only
        let k = aig.add_and(b << 1 | 1, c << 1 | 1);
        aig.add_po(k << 1);
        let mut cl = Clustering::new(aig);
        assert_eq!(cl.clusters.len(), 1);
        assert_eq!(cl.split_by_input_cut(0), 1);
        assert_eq!(cl.clusters.len(), 2);
        assert!(cl.cut_edges.is_empty());
        assert_eq!(cl.total_workload, 6 + 3);
    }

    #[test]
    fn decide_num_parts_bounds() {
        let (aig, _) = reference_aig();
        let mut cl = Clustering::new(aig);
        // 19 / 13
        assert_eq!(cl.decide_num_parts(), None);
        cl.total_workload = 100;
        cl.max_workload = 2;
        assert_eq!(cl.decide_num_parts(), Some(12));
        cl.max_workload = 50;
        assert_eq!(cl.decide_num_parts(), Some(2));
    }

    #[test]
    fn greedy_assignment_balances() {
        let (aig, _) = reference_aig();
        let mut cl = Clustering::new(aig);
        for (c, w) in cl.clusters.iter_mut().zip([9, 5]) {
            c.workload = w;
        }
        cl.clusters.push(Cluster { id: 2, cones: vec![], workload: 4, ..Default::default() });
        assert_eq!(cl.assign_clusters(2), vec![vec![0], vec![1, 2]]);
    }

    #[test]
    fn fixed_policy_stamps_three_partitions() {
        let (mut aig, [n3, n4, n5, n8, n13, n14]) = reference_aig();
        let graph = aig.to_graph();
        for i in 2..aig.num_nodes() {
            aig.graph_ids[i] = i - 2;
        }
        let mut cl = Clustering::new(aig);
        let buckets = cl.balance(BalancePolicy::Fixed(3));
        assert_eq!(buckets.len(), 3);
        let parts = cl.stamp_partitions(&graph, &buckets);
        let p = |id: usize| parts.part_of_node[id - 2];
        assert_eq!(p(n3), p(n5));
        assert_eq!(p(n4), p(n5));
        assert_ne!(p(n8), p(n4));
        assert_eq!(p(n13), p(n14));
        assert_ne!(p(n14), p(n5));
        assert_ne!(p(n14), p(n8));
        assert!(parts.part_of_node.iter().all(|&x| x < 3));
        assert_eq!(parts.workloads.iter().sum::<usize>(), 19);
        // outputs follow their fanins
        for g in 0..graph.num_nodes() {
            if graph.is_po(g) {
                let (f, _) = graph.fanins(g).next().unwrap();
                assert_eq!(parts.part_of_node[g], parts.part_of_node[f]);
            }
        }
    }

    #[test]
    fn default_policy_keeps_clusters() {
        let (mut aig, [_, _, n5, n8, _, n14]) = reference_aig();
        let graph = aig.to_graph();
        for i in 2..aig.num_nodes() {
            aig.graph_ids[i] = i - 2;
        }
        let mut cl = Clustering::new(aig);
        let buckets = cl.balance(BalancePolicy::OnePerCluster);
        let parts = cl.stamp_partitions(&graph, &buckets);
        assert_eq!(parts.num_parts, 2);
        assert_eq!(parts.part_of_node[n5 - 2], parts.part_of_node[n8 - 2]);
        assert_ne!(parts.part_of_node[n5 - 2], parts.part_of_node[n14 - 2]);
        assert!(cl.cut_edges.is_empty());
        let sizes = parts.nodes_of_parts().iter().map(|v| v.len()).collect::<Vec<_>>();
        // inputs, and nodes and outputs of each cluster
        assert_eq!(sizes, vec![4 + 4 + 2, 3 + 2 + 1]);
    }
}
