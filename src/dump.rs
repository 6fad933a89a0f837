// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Diagnostic dumps of sub-networks and partitions.
//!
//! The `write_*` functions report errors. The `dump_*` functions are
//! what the flow calls: they only warn, and never affect the result.

use crate::error::Result;
use crate::network::Network;
use crate::refine::Partitioning;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Write the BLIF text of a network.
pub fn write_blif(ntk: &Network, path: &Path) -> Result<()> {
    let mut buf = BufWriter::new(File::create(path)?);
    write!(buf, "{}", ntk)?;
    buf.flush()?;
    Ok(())
}

/// Write a network in serde_bare binary encoding.
pub fn write_bare(ntk: &Network, path: &Path) -> Result<()> {
    let mut buf = BufWriter::new(File::create(path)?);
    serde_bare::to_writer(&mut buf, ntk)?;
    buf.flush()?;
    Ok(())
}

/// Read a network written by [write_bare].
pub fn read_bare(path: &Path) -> Result<Network> {
    let mut buf = BufReader::new(File::open(path)?);
    let mut ntk: Network = serde_bare::from_reader(&mut buf)?;
    ntk.rebuild_tables();
    Ok(ntk)
}

/// Write the partition of every graph node, one per line.
pub fn write_partition(parts: &Partitioning, path: &Path) -> Result<()> {
    let mut buf = BufWriter::new(File::create(path)?);
    for &p in &parts.part_of_node {
        writeln!(buf, "{}", p)?;
    }
    buf.flush()?;
    Ok(())
}

fn warn_on_error(what: &str, path: &Path, r: Result<()>) {
    match r {
        Ok(()) => clilog::debug!("dumped {} to {}", what, path.display()),
        Err(e) => clilog::warn!("cannot dump {} to {}: {}", what, path.display(), e),
    }
}

/// Dump every sub-network as `<name>_<tag>.blif` and `<name>_<tag>.bare`.
pub fn dump_sub_networks(dir: &Path, subs: &[Network], tag: &str) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        clilog::warn!("cannot create dump directory {}: {}", dir.display(), e);
        return
    }
    for sub in subs {
        let blif = dir.join(format!("{}_{}.blif", sub.name, tag));
        warn_on_error("sub-network", &blif, write_blif(sub, &blif));
        let bare = dir.join(format!("{}_{}.bare", sub.name, tag));
        warn_on_error("sub-network", &bare, write_bare(sub, &bare));
    }
}

/// Dump the partition assignment as `partition.txt`.
pub fn dump_partition(dir: &Path, parts: &Partitioning) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        clilog::warn!("cannot create dump directory {}: {}", dir.display(), e);
        return
    }
    let path = dir.join("partition.txt");
    warn_on_error("partition", &path, write_partition(parts, &path));
}
