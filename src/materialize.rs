// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Extraction of one sub-network per partition.
//!
//! Every edge between two partitions becomes a synthetic input of the
//! consumer. If the source is an input of the original network, the
//! synthetic input refers to the copy of that input in the producer.
//! Otherwise the producer exports the value through a synthetic output,
//! created once per source node and shared by all consumers.

use crate::graph::Graph;
use crate::network::{CutMark, CutSource, Network, NetworkKind, ObjType};
use crate::refine::Partitioning;
use std::collections::HashMap;

/// Statistics of the extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CutStats {
    /// Cut edges, counted per consumer fanin.
    pub num_cut_edges: usize,
    /// Cut edges whose source is an input.
    pub num_cut_from_inputs: usize,
    pub num_cut_inputs: usize,
    pub num_cut_outputs: usize,
}

struct Extractor<'a> {
    ntk: &'a Network,
    subs: Vec<Network>,
    part_of_obj: Vec<usize>,
    /// The copy of every object in its own partition, as a signal
    /// (CIs and and gates) or an object id (COs).
    copy: Vec<usize>,
    /// The position of every copied CI in its sub-network.
    ci_index: Vec<usize>,
    /// The synthetic output exporting a source node: (part, CO position).
    cut_outputs: HashMap<usize, (usize, usize)>,
    /// The synthetic input of a (source node, consumer part) pair.
    cut_inputs: HashMap<(usize, usize), usize>,
    stats: CutStats,
}

impl Extractor<'_> {
    /// The signal of object `src` in partition `part`.
    fn fanin_signal(&mut self, src: usize, part: usize) -> usize {
        if src == 0 {
            // constants are never cut
            return 0
        }
        if self.part_of_obj[src] == part {
            return self.copy[src]
        }
        self.stats.num_cut_edges += 1;
        if self.ntk.objs[src].ty.is_ci() {
            self.stats.num_cut_from_inputs += 1;
        }
        if let Some(&iv) = self.cut_inputs.get(&(src, part)) {
            return iv
        }
        let src_part = self.part_of_obj[src];
        let source = if self.ntk.objs[src].ty.is_ci() {
            CutSource::Ci { part: src_part, index: self.ci_index[src] }
        }
        else {
            let (p, index) = match self.cut_outputs.get(&src) {
                Some(&r) => r,
                None => {
                    let sub = &mut self.subs[src_part];
                    let co = sub.add_co(None, ObjType::Po);
                    sub.set_co_driver(co, self.copy[src]);
                    sub.objs[co].cut = Some(CutMark::Output);
                    let r = (src_part, sub.cos.len() - 1);
                    self.cut_outputs.insert(src, r);
                    self.stats.num_cut_outputs += 1;
                    r
                }
            };
            CutSource::Co { part: p, index }
        };
        let sub = &mut self.subs[part];
        let pi = sub.add_ci(None, ObjType::Pi);
        sub.objs[pi].cut = Some(CutMark::Input(source));
        self.cut_inputs.insert((src, part), pi << 1);
        self.stats.num_cut_inputs += 1;
        pi << 1
    }
}

/// Build the sub-networks of a partitioning.
///
/// `node2obj` maps graph nodes to objects of `ntk`, as returned by
/// [Graph::from_network].
pub fn extract_sub_networks(
    ntk: &Network, graph: &Graph, node2obj: &[usize], parts: &Partitioning
) -> (Vec<Network>, CutStats) {
    let timer = clilog::stimer!("extract sub-networks");
    let mut part_of_obj = vec![usize::MAX; ntk.objs.len()];
    for (g, &obj) in node2obj.iter().enumerate() {
        part_of_obj[obj] = parts.part_of_node[g];
    }
    let subs = (0..parts.num_parts).map(|p| {
        Network::new(&format!("{}_part{}", ntk.name, p), NetworkKind::Strash)
    }).collect::<Vec<_>>();
    let mut ex = Extractor {
        ntk, subs, part_of_obj,
        copy: vec![usize::MAX; ntk.objs.len()],
        ci_index: vec![usize::MAX; ntk.objs.len()],
        cut_outputs: HashMap::new(),
        cut_inputs: HashMap::new(),
        stats: CutStats::default(),
    };
    for &ci in &ntk.cis {
        let p = ex.part_of_obj[ci];
        if p == usize::MAX {
            continue
        }
        let obj = &ntk.objs[ci];
        let sub = &mut ex.subs[p];
        ex.copy[ci] = sub.add_ci(obj.name.as_deref(), obj.ty) << 1;
        ex.ci_index[ci] = sub.cis.len() - 1;
    }
    for &co in &ntk.cos {
        let p = ex.part_of_obj[co];
        let obj = &ntk.objs[co];
        ex.copy[co] = ex.subs[p].add_co(obj.name.as_deref(), obj.ty);
    }
    // DFS order: every fanin is copied before its fanouts
    for (g, &obj) in node2obj.iter().enumerate() {
        if graph.is_pi(g) {
            continue
        }
        let p = ex.part_of_obj[obj];
        let fanins = ntk.objs[obj].fanins_iv.iter()
            .map(|&f| ex.fanin_signal(f >> 1, p) ^ (f & 1))
            .collect::<Vec<_>>();
        match ntk.objs[obj].ty {
            ObjType::And => {
                ex.copy[obj] = ex.subs[p].add_and(fanins[0], fanins[1]);
            }
            _ => {
                let co = ex.copy[obj];
                ex.subs[p].set_co_driver(co, fanins[0]);
            }
        }
    }
    clilog::finish!(timer);
    clilog::info!("{} cut edges ({} from inputs), {} synthetic inputs, {} synthetic outputs",
                  ex.stats.num_cut_edges, ex.stats.num_cut_from_inputs,
                  ex.stats.num_cut_inputs, ex.stats.num_cut_outputs);
    for sub in &ex.subs {
        clilog::debug!("{}: {} inputs, {} outputs, {} and gates",
                       sub.name, sub.cis.len(), sub.cos.len(), sub.num_logic());
    }
    (ex.subs, ex.stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::find_mismatch;

    /// a, b, c -> g = a & b, x = g & c, y = !g & !c
    fn shared_source_network() -> (Network, [usize; 3]) {
        let mut ntk = Network::new("shared", NetworkKind::Strash);
        let a = ntk.add_pi("a") << 1;
        let b = ntk.add_pi("b") << 1;
        let c = ntk.add_pi("c") << 1;
        let g = ntk.add_and(a, b);
        let x = ntk.add_and(g, c);
        let y = ntk.add_and(g ^ 1, c ^ 1);
        ntk.add_po("x", x);
        ntk.add_po("y", y ^ 1);
        (ntk, [g >> 1, x >> 1, y >> 1])
    }

    fn hand_partitioning(
        graph: &Graph, node2obj: &[usize], part_of_obj: &HashMap<usize, usize>
    ) -> Partitioning {
        let mut part_of_node = vec![0; graph.num_nodes()];
        for (g, obj) in node2obj.iter().enumerate() {
            part_of_node[g] = part_of_obj[obj];
        }
        for g in 0..graph.num_nodes() {
            if graph.is_po(g) {
                let (f, _) = graph.fanins(g).next().unwrap();
                part_of_node[g] = part_of_node[f];
            }
        }
        Partitioning {
            num_parts: 1 + *part_of_node.iter().max().unwrap(),
            part_of_node,
            ..Default::default()
        }
    }

    #[test]
    fn one_cut_output_per_source() {
        let (ntk, [g, x, y]) = shared_source_network();
        let (graph, node2obj) = Graph::from_network(&ntk, false).unwrap();
        // a, b, g in 0; c, x in 1; y in 2
        let part_of_obj = HashMap::from([
            (1, 0), (2, 0), (3, 1), (g, 0), (x, 1), (y, 2),
            (ntk.cos[0], 1), (ntk.cos[1], 2),
        ]);
        let parts = hand_partitioning(&graph, &node2obj, &part_of_obj);
        let (subs, stats) = extract_sub_networks(&ntk, &graph, &node2obj, &parts);
        assert_eq!(subs.len(), 3);
        // g feeds x and y in two other partitions
        assert_eq!(stats.num_cut_outputs, 1);
        let exported = subs[0].cos.iter()
            .filter(|&&co| subs[0].objs[co].cut == Some(CutMark::Output))
            .count();
        assert_eq!(exported, 1);
        // y reads g through the shared output, and c from partition 1
        let sources = subs[2].cis.iter()
            .filter_map(|&ci| match subs[2].objs[ci].cut {
                Some(CutMark::Input(s)) => Some(s),
                _ => None,
            })
            .collect::<Vec<_>>();
        // inputs follow the fanin order of y, which is not fixed here
        assert_eq!(sources.len(), 2);
        assert!(sources.contains(&CutSource::Co { part: 0, index: 0 }));
        assert!(sources.contains(&CutSource::Ci { part: 1, index: 0 }));
        assert_eq!(stats.num_cut_inputs, 3);
        assert_eq!(stats.num_cut_from_inputs, 1);
        for sub in &subs {
            sub.check().unwrap();
        }
    }

    #[test]
    fn single_partition_is_a_copy() {
        let (ntk, _) = shared_source_network();
        let (graph, node2obj) = Graph::from_network(&ntk, false).unwrap();
        let parts = Partitioning {
            num_parts: 1,
            part_of_node: vec![0; graph.num_nodes()],
            ..Default::default()
        };
        let (subs, stats) = extract_sub_networks(&ntk, &graph, &node2obj, &parts);
        assert_eq!(stats, CutStats::default());
        assert_eq!(subs[0].num_logic(), ntk.num_logic());
        assert_eq!(find_mismatch(&ntk, &subs[0], 3), None);
    }

    #[test]
    fn constant_outputs_are_local() {
        let mut ntk = Network::new("consts", NetworkKind::Strash);
        let a = ntk.add_pi("a") << 1;
        let b = ntk.add_pi("b") << 1;
        let g = ntk.add_and(a, b);
        ntk.add_po("one", 1);
        ntk.add_po("g", g);
        ntk.add_po("zero", 0);
        let (graph, node2obj) = Graph::from_network(&ntk, false).unwrap();
        // the constant is in partition 0, everything else in partition 1
        let mut part_of_node = vec![1; graph.num_nodes()];
        part_of_node[0] = 0;
        let parts = Partitioning { num_parts: 2, part_of_node, ..Default::default() };
        let (subs, stats) = extract_sub_networks(&ntk, &graph, &node2obj, &parts);
        assert_eq!(stats.num_cut_edges, 0);
        assert_eq!(subs[1].co_driver(subs[1].cos[0]), Some(1));
        assert_eq!(subs[1].co_driver(subs[1].cos[2]), Some(0));
        assert!(subs[0].cis.is_empty() && subs[0].cos.is_empty());
    }
}
