// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! The partition, map and merge flow.

use crate::aig::AIG;
use crate::cluster::Clustering;
use crate::dump;
use crate::error::Result;
use crate::graph::Graph;
use crate::mapper::{MapParams, Mapper};
use crate::materialize::{extract_sub_networks, CutStats};
use crate::merge::merge;
use crate::network::Network;
use crate::refine::{BalancePolicy, Partitioning};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options of the whole flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PifConfig {
    /// The number of partitions. 0 lets `balance` decide, anything
    /// else means `BalancePolicy::Fixed`.
    pub num_parts: usize,
    /// Pack small clusters together up to this many and nodes.
    pub max_cluster_nodes: Option<usize>,
    pub balance: BalancePolicy,
    pub map: MapParams,
    /// Map the partitions on the rayon thread pool.
    pub parallel: bool,
    /// Where to dump sub-networks and partitions, if anywhere.
    pub dump_dir: Option<PathBuf>,
    pub reject_dangling_inputs: bool,
}

impl Default for PifConfig {
    fn default() -> PifConfig {
        PifConfig {
            num_parts: 0,
            max_cluster_nodes: None,
            balance: BalancePolicy::default(),
            map: MapParams::default(),
            parallel: true,
            dump_dir: None,
            reject_dangling_inputs: false,
        }
    }
}

impl PifConfig {
    pub fn policy(&self) -> BalancePolicy {
        match self.num_parts {
            0 => self.balance,
            n => BalancePolicy::Fixed(n),
        }
    }
}

/// The sub-networks of a network, ready for mapping.
#[derive(Debug, Clone)]
pub struct Partitioned {
    pub parts: Partitioning,
    pub subs: Vec<Network>,
    pub stats: CutStats,
}

/// Partition a strashed network and extract the sub-networks.
pub fn partition_network(ntk: &Network, config: &PifConfig) -> Result<Partitioned> {
    let timer = clilog::stimer!("partition");
    ntk.check()?;
    let (graph, node2obj) = Graph::from_network(ntk, config.reject_dangling_inputs)?;
    let mut aig = AIG::new();
    aig.import_graph(&graph)?;
    aig.check();
    let mut clustering = Clustering::new(aig);
    if let Some(bound) = config.max_cluster_nodes {
        clustering.coalesce_small_clusters(bound);
    }
    let buckets = clustering.balance(config.policy());
    let parts = clustering.stamp_partitions(&graph, &buckets);
    clilog::info!("{} partitions, workloads {:?}", parts.num_parts, parts.workloads);
    let (subs, stats) = extract_sub_networks(ntk, &graph, &node2obj, &parts);
    clilog::finish!(timer);
    Ok(Partitioned { parts, subs, stats })
}

fn map_one<M: Mapper + ?Sized>(
    mapper: &M, i: usize, sub: &Network, params: &MapParams
) -> Result<Network> {
    let mut params = params.clone();
    params.thread_id = i;
    let timer = clilog::stimer!("map partition");
    let ret = mapper.map(sub, &params);
    clilog::finish!(timer);
    if let Err(e) = &ret {
        clilog::error!("partition {} failed: {}", i, e);
    }
    ret
}

/// Map all sub-networks concurrently. Any failure fails the batch.
pub fn map_parallel<M: Mapper + ?Sized>(
    subs: &[Network], mapper: &M, params: &MapParams
) -> Result<Vec<Network>> {
    let timer = clilog::stimer!("map partitions in parallel");
    let ret = subs.par_iter().enumerate()
        .map(|(i, sub)| map_one(mapper, i, sub, params))
        .collect::<Result<Vec<_>>>();
    clilog::finish!(timer);
    ret
}

/// Map all sub-networks one after another.
pub fn map_serial<M: Mapper + ?Sized>(
    subs: &[Network], mapper: &M, params: &MapParams
) -> Result<Vec<Network>> {
    let timer = clilog::stimer!("map partitions");
    let ret = subs.iter().enumerate()
        .map(|(i, sub)| map_one(mapper, i, sub, params))
        .collect::<Result<Vec<_>>>();
    clilog::finish!(timer);
    ret
}

/// Partition, map and merge a strashed network.
pub fn run<M: Mapper + ?Sized>(
    ntk: &Network, mapper: &M, config: &PifConfig
) -> Result<Network> {
    let timer = clilog::stimer!("partition, map and merge");
    let partitioned = partition_network(ntk, config)?;
    if let Some(dir) = &config.dump_dir {
        dump::dump_partition(dir, &partitioned.parts);
        dump::dump_sub_networks(dir, &partitioned.subs, "unmapped");
    }
    let mapped = match config.parallel {
        true => map_parallel(&partitioned.subs, mapper, &config.map)?,
        false => map_serial(&partitioned.subs, mapper, &config.map)?,
    };
    if let Some(dir) = &config.dump_dir {
        dump::dump_sub_networks(dir, &mapped, "mapped");
    }
    let ret = merge(ntk, &partitioned.subs, &mapped)?;
    clilog::finish!(timer);
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PifError;
    use crate::mapper::{IdentityMapper, LutMapper};
    use crate::network::{find_mismatch, NetworkKind, ObjType};

    /// The reference network of the cluster tests, as a host network.
    fn reference_network() -> Network {
        let mut ntk = Network::new("reference", NetworkKind::Strash);
        let p = (0..7).map(|i| ntk.add_pi(&format!("p{}", i)) << 1).collect::<Vec<_>>();
        let n3 = ntk.add_and(p[0], p[1] ^ 1);
        let n4 = ntk.add_and(p[1] ^ 1, p[2]);
        let n5 = ntk.add_and(n3, n4 ^ 1);
        let n8 = ntk.add_and(n4, p[3] ^ 1);
        let n13 = ntk.add_and(p[4], p[5]);
        let n14 = ntk.add_and(n13, p[6]);
        ntk.add_po("o0", n5);
        ntk.add_po("o1", n8);
        ntk.add_po("o2", n14);
        ntk
    }

    #[test]
    fn reference_round_trip_in_three_parts() {
        let ntk = reference_network();
        let config = PifConfig { num_parts: 3, ..Default::default() };
        let partitioned = partition_network(&ntk, &config).unwrap();
        assert_eq!(partitioned.parts.num_parts, 3);
        assert!(partitioned.parts.part_of_node.iter().all(|&p| p < 3));
        // n4 feeds o1 across the cut
        assert_eq!(partitioned.stats.num_cut_outputs, 1);
        let merged = run(&ntk, &IdentityMapper, &config).unwrap();
        assert_eq!(find_mismatch(&ntk, &merged, 0), None);
    }

    #[test]
    fn default_policy_is_one_partition_per_cluster() {
        let ntk = reference_network();
        let partitioned = partition_network(&ntk, &PifConfig::default()).unwrap();
        assert_eq!(partitioned.parts.num_parts, 2);
        assert_eq!(partitioned.stats, CutStats::default());
    }

    #[test]
    fn serial_and_parallel_agree() {
        let ntk = Network::random(7, 16, 400, 12);
        let config = PifConfig {
            balance: BalancePolicy::Balanced,
            map: MapParams { lut_size: 4, ..Default::default() },
            ..Default::default()
        };
        let partitioned = partition_network(&ntk, &config).unwrap();
        let a = map_parallel(&partitioned.subs, &LutMapper, &config.map).unwrap();
        let b = map_serial(&partitioned.subs, &LutMapper, &config.map).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.num_logic(), y.num_logic());
            assert_eq!(find_mismatch(x, y, 7), None);
        }
        let merged = merge(&ntk, &partitioned.subs, &a).unwrap();
        assert_eq!(find_mismatch(&ntk, &merged, 7), None);
    }

    struct FailingMapper(usize);

    impl Mapper for FailingMapper {
        fn map(&self, ntk: &Network, params: &MapParams) -> Result<Network> {
            match params.thread_id == self.0 {
                true => Err(PifError::Mapping { part: params.thread_id, reason: "boom".into() }),
                false => IdentityMapper.map(ntk, params),
            }
        }
    }

    #[test]
    fn one_failing_worker_fails_the_batch() {
        let ntk = reference_network();
        for parallel in [false, true] {
            let config = PifConfig { num_parts: 3, parallel, ..Default::default() };
            match run(&ntk, &FailingMapper(1), &config) {
                Err(PifError::Mapping { part: 1, .. }) => {}
                r => panic!("unexpected {:?}", r.map(|n| n.num_logic())),
            }
        }
    }

    #[test]
    fn dangling_inputs_follow_config() {
        let mut ntk = reference_network();
        ntk.add_ci(Some("unused"), ObjType::Pi);
        let merged = run(&ntk, &IdentityMapper, &PifConfig::default()).unwrap();
        assert_eq!(merged.cis.len(), 8);
        assert_eq!(find_mismatch(&ntk, &merged, 0), None);
        let config = PifConfig { reject_dangling_inputs: true, ..Default::default() };
        assert!(matches!(run(&ntk, &IdentityMapper, &config),
                         Err(PifError::DanglingInput(name)) if name == "unused"));
    }

    #[test]
    fn malformed_input_is_an_error() {
        let mut ntk = reference_network();
        let g = ntk.objs.iter().position(|o| o.ty == ObjType::And).unwrap();
        ntk.objs[g].fanins_iv[1] = (ntk.objs.len() + 5) << 1;
        assert!(matches!(partition_network(&ntk, &PifConfig::default()),
                         Err(PifError::MalformedNetwork(_))));

        let mut ntk = reference_network();
        let co = ntk.cos[0];
        ntk.objs[co].fanins_iv.clear();
        assert!(matches!(run(&ntk, &IdentityMapper, &PifConfig::default()),
                         Err(PifError::MalformedNetwork(_))));
    }
}
