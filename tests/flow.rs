// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use aigpart::dump::read_bare;
use aigpart::flow::{partition_network, run, PifConfig};
use aigpart::mapper::{IdentityMapper, LutLibrary, LutMapper, MapParams};
use aigpart::network::{find_mismatch, CutMark, CutSource, Network, NetworkKind, ObjType};
use aigpart::refine::BalancePolicy;
use tempdir::TempDir;

fn policies() -> Vec<PifConfig> {
    let base = PifConfig {
        map: MapParams { lut_size: 4, ..Default::default() },
        ..Default::default()
    };
    vec![
        base.clone(),
        PifConfig { balance: BalancePolicy::Balanced, ..base.clone() },
        PifConfig { num_parts: 3, ..base.clone() },
        PifConfig { max_cluster_nodes: Some(64), ..base.clone() },
        PifConfig { num_parts: 2, parallel: false, ..base },
    ]
}

#[test]
fn identity_flow_is_equivalent() {
    for seed in 0..5 {
        let ntk = Network::random(seed, 14, 300, 10);
        for config in policies() {
            let merged = run(&ntk, &IdentityMapper, &config).unwrap();
            assert_eq!(find_mismatch(&ntk, &merged, seed), None,
                       "seed {} config {:?}", seed, config);
        }
    }
}

#[test]
fn lut_flow_is_equivalent() {
    for seed in 10..14 {
        let ntk = Network::random(seed, 24, 600, 16);
        for config in policies() {
            let merged = run(&ntk, &LutMapper, &config).unwrap();
            assert_eq!(merged.kind, NetworkKind::Logic);
            assert!(merged.objs.iter().all(|o| o.fanins_iv.len() <= 4 || o.ty.is_co()));
            assert_eq!(find_mismatch(&ntk, &merged, seed), None,
                       "seed {} config {:?}", seed, config);
        }
    }
}

#[test]
fn lut_flow_with_library() {
    let lib = LutLibrary::parse("\
# size area delay
1 1 1
2 2 1
3 3 1
4 5 2
").unwrap();
    let ntk = Network::random(99, 12, 200, 8);
    let config = PifConfig {
        balance: BalancePolicy::Balanced,
        map: MapParams { lut_size: 4, library: Some(Arc::new(lib)), ..Default::default() },
        ..Default::default()
    };
    let merged = run(&ntk, &LutMapper, &config).unwrap();
    assert_eq!(find_mismatch(&ntk, &merged, 99), None);
}

#[test]
fn cut_links_are_in_range() {
    for seed in 20..25 {
        let ntk = Network::random(seed, 16, 400, 12);
        let config = PifConfig { num_parts: 4, ..Default::default() };
        let partitioned = partition_network(&ntk, &config).unwrap();
        let subs = &partitioned.subs;
        let mut num_inputs = 0;
        for (p, sub) in subs.iter().enumerate() {
            sub.check().unwrap();
            for &ci in &sub.cis {
                let source = match sub.objs[ci].cut {
                    Some(CutMark::Input(source)) => source,
                    Some(CutMark::Output) => panic!("input {} of part {} marked as output", ci, p),
                    None => continue,
                };
                num_inputs += 1;
                match source {
                    CutSource::Ci { part, index } => {
                        assert_ne!(part, p);
                        let target = subs[part].cis[index];
                        assert!(subs[part].objs[target].cut.is_none());
                    }
                    CutSource::Co { part, index } => {
                        assert_ne!(part, p);
                        let target = subs[part].cos[index];
                        assert_eq!(subs[part].objs[target].cut, Some(CutMark::Output));
                    }
                }
            }
        }
        assert_eq!(num_inputs, partitioned.stats.num_cut_inputs);
        // every original node lands in exactly one partition
        assert!(partitioned.parts.part_of_node.iter().all(|&p| p < subs.len()));
        let real_cos = subs.iter()
            .flat_map(|s| s.cos.iter().filter(|&&co| s.objs[co].cut.is_none()))
            .count();
        assert_eq!(real_cos, ntk.cos.len());
    }
}

#[test]
fn box_inputs_and_outputs_survive() {
    let mut ntk = Network::random(31, 10, 150, 6);
    // turn the first input and output into a latch
    let q = ntk.cis[0];
    ntk.objs[q].ty = ObjType::BoxOut;
    let d = ntk.cos[0];
    ntk.objs[d].ty = ObjType::BoxIn;
    ntk.rebuild_tables();
    let config = PifConfig { num_parts: 3, ..Default::default() };
    let merged = run(&ntk, &LutMapper, &config).unwrap();
    assert_eq!(merged.objs[merged.cis[0]].ty, ObjType::BoxOut);
    assert_eq!(merged.objs[merged.cos[0]].ty, ObjType::BoxIn);
    assert_eq!(find_mismatch(&ntk, &merged, 31), None);
}

#[test]
fn dump_dir_receives_all_formats() {
    let dir = TempDir::new("aigpart_flow").unwrap();
    let ntk = Network::random(41, 8, 120, 6);
    let config = PifConfig {
        num_parts: 2,
        dump_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let num_parts = partition_network(&ntk, &config).unwrap().parts.num_parts;
    assert!(num_parts >= 1);
    let merged = run(&ntk, &LutMapper, &config).unwrap();
    assert_eq!(find_mismatch(&ntk, &merged, 41), None);
    let text = std::fs::read_to_string(dir.path().join("partition.txt")).unwrap();
    assert!(text.lines().all(|l| l.parse::<usize>().unwrap() < num_parts));
    for p in 0..num_parts {
        let stem = format!("{}_part{}", ntk.name, p);
        assert!(dir.path().join(format!("{}_unmapped.blif", stem)).exists());
        assert!(dir.path().join(format!("{}_mapped.blif", stem)).exists());
        let sub = read_bare(&dir.path().join(format!("{}_mapped.bare", stem))).unwrap();
        assert_eq!(sub.kind, NetworkKind::Logic);
    }
}
