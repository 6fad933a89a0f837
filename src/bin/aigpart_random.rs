// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Partition, map and merge a random AIG, then check the result
//! against the original by simulation.

use std::path::PathBuf;
use std::sync::Arc;
use aigpart::flow::{run, PifConfig};
use aigpart::mapper::{IdentityMapper, LutLibrary, LutMapper, MapParams, Mapper};
use aigpart::network::{find_mismatch, Network};
use aigpart::refine::BalancePolicy;

#[derive(clap::Parser, Debug)]
struct RandomFlowArgs {
    /// Seed of the random AIG.
    #[clap(long, default_value_t=1)]
    seed: u64,
    #[clap(long, default_value_t=32)]
    num_pis: usize,
    #[clap(long, default_value_t=2000)]
    num_ands: usize,
    /// The minimum number of outputs.
    ///
    /// Gates left without fanout drive extra outputs.
    #[clap(long, default_value_t=16)]
    num_pos: usize,
    /// Number of partitions. 0 means one per cluster, or as
    /// decided by the workload with `--balanced`.
    #[clap(long, default_value_t=0)]
    num_parts: usize,
    /// Split the largest clusters and let the workload decide the
    /// number of partitions.
    #[clap(long)]
    balanced: bool,
    /// Pack small clusters together up to this many and nodes.
    #[clap(long)]
    max_cluster_nodes: Option<usize>,
    /// LUT size of the mapper.
    #[clap(long, default_value_t=6)]
    lut_size: usize,
    /// LUT library in ABC format. Unit area and delay if omitted.
    #[clap(long)]
    lut_library: Option<PathBuf>,
    /// Delay target of the mapper.
    #[clap(long)]
    delay_target: Option<f32>,
    /// Skip mapping, only partition and merge.
    #[clap(long)]
    identity: bool,
    /// Map partitions one after another.
    #[clap(long)]
    serial: bool,
    /// Directory to dump sub-networks and partitions to.
    #[clap(long)]
    dump_dir: Option<PathBuf>,
    /// Output path for the merged network in BLIF.
    #[clap(long)]
    blif_out: Option<PathBuf>,
}

fn main() {
    clilog::init_stderr_color_debug();
    let args = <RandomFlowArgs as clap::Parser>::parse();
    clilog::info!("aigpart_random args:\n{:#?}", args);

    let library = args.lut_library.as_ref().map(|path| {
        Arc::new(LutLibrary::read(path).expect("cannot read lut library"))
    });
    let config = PifConfig {
        num_parts: args.num_parts,
        max_cluster_nodes: args.max_cluster_nodes,
        balance: match args.balanced {
            true => BalancePolicy::Balanced,
            false => BalancePolicy::OnePerCluster,
        },
        map: MapParams {
            lut_size: args.lut_size,
            delay_target: args.delay_target,
            library,
            ..Default::default()
        },
        parallel: !args.serial,
        dump_dir: args.dump_dir.clone(),
        reject_dangling_inputs: false,
    };

    let ntk = Network::random(args.seed, args.num_pis, args.num_ands, args.num_pos);
    println!("random network has {} inputs, {} outputs, {} and gates, level {}",
             ntk.cis.len(), ntk.cos.len(), ntk.num_logic(), ntk.max_level());

    let mapper: &dyn Mapper = match args.identity {
        true => &IdentityMapper,
        false => &LutMapper,
    };
    let merged = run(&ntk, mapper, &config).expect("flow failed");
    println!("merged network has {} logic nodes, level {}",
             merged.num_logic(), merged.max_level());

    if let Some(path) = &args.blif_out {
        aigpart::dump::write_blif(&merged, path).expect("cannot write blif");
    }

    match find_mismatch(&ntk, &merged, args.seed) {
        None => println!("merged network is equivalent to the original"),
        Some(i) => {
            clilog::error!("output {} differs from the original", i);
            std::process::exit(1);
        }
    }
}
