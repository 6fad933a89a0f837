// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Technology mapping of sub-networks.
//!
//! The flow calls a [Mapper] once per sub-network, possibly from
//! several threads at a time. [LutMapper] is a k-LUT mapper based on
//! priority cuts: a delay-oriented pass, then area recovery passes
//! under the required times of the delay-oriented cover.

use crate::error::{PifError, Result};
use crate::network::{Network, NetworkKind, ObjType};
use crate::truth::{TruthTable, MAX_TRUTH_VARS};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Area and delay of LUTs by size, in the ABC `.lut` text format:
///
/// ```text
/// # size area delay
/// 1 1.00 1.00
/// 2 1.00 1.00
/// 3 1.00 1.00
/// ```
///
/// Sizes must start at 1 and be consecutive. A line may give one
/// delay per pin, in which case the largest one is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LutLibrary {
    /// Indexed by LUT size. Entry 0 is unused.
    pub areas: Vec<f32>,
    pub delays: Vec<f32>,
}

impl LutLibrary {
    /// Unit area and delay for all sizes up to `max_size`.
    pub fn unit(max_size: usize) -> LutLibrary {
        let mut areas = vec![1.0; max_size + 1];
        let mut delays = vec![1.0; max_size + 1];
        areas[0] = 0.;
        delays[0] = 0.;
        LutLibrary { areas, delays }
    }

    pub fn parse(text: &str) -> Result<LutLibrary> {
        let mut lib = LutLibrary { areas: vec![0.], delays: vec![0.] };
        for (lineno, line) in text.lines().enumerate() {
            let err = |reason: String| {
                clilog::error!("lut library line {}: {}", lineno + 1, reason);
                Err(PifError::Library { line: lineno + 1, reason })
            };
            let line = match line.find('#') {
                Some(i) => &line[..i],
                None => line,
            };
            let tokens = line.split_whitespace().collect::<Vec<_>>();
            if tokens.is_empty() {
                continue
            }
            if tokens.len() < 3 {
                return err(format!("expected size, area and delay, found {:?}", line.trim()))
            }
            let size = match tokens[0].parse::<usize>() {
                Ok(s) => s,
                Err(e) => return err(format!("bad size {}: {}", tokens[0], e)),
            };
            if size != lib.areas.len() {
                return err(format!("expected size {}, found {}", lib.areas.len(), size))
            }
            let mut values = Vec::with_capacity(tokens.len() - 1);
            for t in &tokens[1..] {
                match t.parse::<f32>() {
                    Ok(v) if v.is_finite() && v >= 0. => values.push(v),
                    _ => return err(format!("bad number {}", t)),
                }
            }
            if values.len() > size + 1 {
                return err(format!("{} pin delays for a {}-input LUT", values.len() - 1, size))
            }
            lib.areas.push(values[0]);
            lib.delays.push(values[1..].iter().copied().fold(0., f32::max));
        }
        if lib.max_lut_size() == 0 {
            return Err(PifError::Library { line: 0, reason: "no LUT sizes given".into() })
        }
        Ok(lib)
    }

    pub fn read(path: impl AsRef<Path>) -> Result<LutLibrary> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let lib = LutLibrary::parse(&text)?;
        clilog::info!("read lut library {} with sizes up to {}",
                      path.as_ref().display(), lib.max_lut_size());
        Ok(lib)
    }

    pub fn max_lut_size(&self) -> usize {
        self.areas.len() - 1
    }

    #[inline]
    pub fn area(&self, size: usize) -> f32 {
        self.areas[size]
    }

    #[inline]
    pub fn delay(&self, size: usize) -> f32 {
        self.delays[size]
    }
}

/// Parameters of one mapping call. Every worker owns a private copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapParams {
    /// The maximum number of LUT inputs.
    pub lut_size: usize,
    /// The number of priority cuts kept per node.
    pub cuts_max: usize,
    /// Area-flow recovery passes.
    pub flow_iters: usize,
    /// Area recovery passes with references of the current cover.
    pub area_iters: usize,
    /// The delay to meet. Defaults to the best achievable delay.
    pub delay_target: Option<f32>,
    /// Unit area and delay if not given.
    #[serde(skip)]
    pub library: Option<Arc<LutLibrary>>,
    /// The index of the worker, for logging.
    pub thread_id: usize,
}

impl Default for MapParams {
    fn default() -> MapParams {
        MapParams {
            lut_size: 6,
            cuts_max: 8,
            flow_iters: 1,
            area_iters: 2,
            delay_target: None,
            library: None,
            thread_id: 0,
        }
    }
}

/// A technology mapper for strashed sub-networks.
///
/// The result must keep the CIs and COs of the input, in order and
/// with their names.
pub trait Mapper: Sync {
    fn map(&self, ntk: &Network, params: &MapParams) -> Result<Network>;
}

/// Returns the sub-network unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl Mapper for IdentityMapper {
    fn map(&self, ntk: &Network, _params: &MapParams) -> Result<Network> {
        Ok(ntk.clone())
    }
}

/// Priority-cut k-LUT mapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct LutMapper;

const EPS: f32 = 1e-4;

#[derive(Debug, Clone)]
struct Cut {
    /// Sorted object ids.
    leaves: Vec<usize>,
    arrival: f32,
    area_flow: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CutOrder {
    Delay,
    Area,
}

struct MapState<'a> {
    ntk: &'a Network,
    lib: &'a LutLibrary,
    lut_size: usize,
    cuts_max: usize,
    order: Vec<usize>,
    num_fanouts: Vec<usize>,
    /// Reference estimates for area flow.
    refs: Vec<f32>,
    /// Priority cuts, the best one first. Empty for CIs.
    cuts: Vec<Vec<Cut>>,
    arrival: Vec<f32>,
    area_flow: Vec<f32>,
    required: Vec<f32>,
}

impl MapState<'_> {
    fn cmp_cuts(&self, mode: CutOrder, a: &Cut, b: &Cut) -> Ordering {
        let (ka, kb) = match mode {
            CutOrder::Delay => ((a.arrival, a.area_flow), (b.arrival, b.area_flow)),
            CutOrder::Area => ((a.area_flow, a.arrival), (b.area_flow, b.arrival)),
        };
        ka.0.total_cmp(&kb.0)
            .then(ka.1.total_cmp(&kb.1))
            .then(a.leaves.len().cmp(&b.leaves.len()))
    }

    fn evaluate(&self, id: usize, leaves: Vec<usize>) -> Cut {
        let arrival = leaves.iter().map(|&l| self.arrival[l]).fold(0., f32::max)
            + self.lib.delay(leaves.len());
        let area_flow = (self.lib.area(leaves.len())
                         + leaves.iter().map(|&l| self.area_flow[l]).sum::<f32>())
            / self.refs[id];
        Cut { leaves, arrival, area_flow }
    }

    /// Recompute the priority cuts of all and gates.
    fn enumerate(&mut self, mode: CutOrder) {
        let trivial = |i: usize| vec![i];
        for idx in 0..self.order.len() {
            let i = self.order[idx];
            let obj = &self.ntk.objs[i];
            if obj.ty != ObjType::And {
                self.cuts[i].clear();
                self.arrival[i] = 0.;
                self.area_flow[i] = 0.;
                continue
            }
            let (a, b) = (obj.fanins_iv[0] >> 1, obj.fanins_iv[1] >> 1);
            let cuts_a = self.cuts[a].iter().map(|c| c.leaves.clone())
                .chain(std::iter::once(trivial(a)))
                .collect::<Vec<_>>();
            let cuts_b = self.cuts[b].iter().map(|c| c.leaves.clone())
                .chain(std::iter::once(trivial(b)))
                .collect::<Vec<_>>();
            let mut leaf_sets = Vec::with_capacity(cuts_a.len() * cuts_b.len());
            for ca in &cuts_a {
                for cb in &cuts_b {
                    let leaves = ca.iter().merge(cb.iter()).dedup().copied()
                        .collect::<Vec<_>>();
                    if leaves.len() <= self.lut_size {
                        leaf_sets.push(leaves);
                    }
                }
            }
            leaf_sets.sort_unstable();
            leaf_sets.dedup();
            let mut cands = leaf_sets.into_iter()
                .map(|leaves| self.evaluate(i, leaves))
                .collect::<Vec<_>>();
            cands.sort_by(|x, y| self.cmp_cuts(CutOrder::Delay, x, y));
            if mode == CutOrder::Area {
                let req = self.required[i];
                let fastest = cands[0].clone();
                cands.retain(|c| c.arrival <= req + EPS);
                if cands.is_empty() {
                    cands.push(fastest);
                }
                cands.sort_by(|x, y| self.cmp_cuts(CutOrder::Area, x, y));
            }
            cands.truncate(self.cuts_max);
            self.arrival[i] = cands[0].arrival;
            self.area_flow[i] = cands[0].area_flow;
            self.cuts[i] = cands;
        }
    }

    fn max_arrival(&self) -> f32 {
        self.ntk.cos.iter()
            .filter_map(|&co| self.ntk.co_driver(co))
            .map(|d| self.arrival[d >> 1])
            .fold(0., f32::max)
    }

    /// Select the best cuts from the COs. Returns the number of
    /// references of every object in the cover, zero if unused.
    fn cover(&self) -> Vec<usize> {
        let mut map_refs = vec![0; self.ntk.objs.len()];
        for &co in &self.ntk.cos {
            if let Some(d) = self.ntk.co_driver(co) {
                map_refs[d >> 1] += 1;
            }
        }
        for &i in self.order.iter().rev() {
            if map_refs[i] == 0 || self.ntk.objs[i].ty != ObjType::And {
                continue
            }
            for &l in &self.cuts[i][0].leaves {
                map_refs[l] += 1;
            }
        }
        map_refs
    }

    fn compute_required(&mut self, map_refs: &[usize], target: f32) {
        self.required.iter_mut().for_each(|r| *r = f32::INFINITY);
        for &co in &self.ntk.cos {
            if let Some(d) = self.ntk.co_driver(co) {
                self.required[d >> 1] = target;
            }
        }
        for &i in self.order.iter().rev() {
            if map_refs[i] == 0 || self.ntk.objs[i].ty != ObjType::And {
                continue
            }
            let cut = &self.cuts[i][0];
            let req = self.required[i] - self.lib.delay(cut.leaves.len());
            for &l in &cut.leaves {
                self.required[l] = self.required[l].min(req);
            }
        }
    }

    fn cover_area(&self, map_refs: &[usize]) -> f32 {
        self.order.iter()
            .filter(|&&i| map_refs[i] > 0 && self.ntk.objs[i].ty == ObjType::And)
            .map(|&i| self.lib.area(self.cuts[i][0].leaves.len()))
            .sum()
    }

    /// One area recovery pass under the current required times.
    /// Reverted if the delay target is missed.
    fn recover(&mut self, map_refs: &mut Vec<usize>, exact_refs: bool, target: f32) {
        let saved = (self.cuts.clone(), self.arrival.clone(), self.area_flow.clone());
        for &i in &self.order {
            let r = match exact_refs && map_refs[i] > 0 {
                true => map_refs[i],
                false => self.num_fanouts[i],
            };
            self.refs[i] = r.max(1) as f32;
        }
        self.enumerate(CutOrder::Area);
        if self.max_arrival() > target + EPS {
            clilog::debug!("area recovery missed delay target {}, reverted", target);
            (self.cuts, self.arrival, self.area_flow) = saved;
            return
        }
        *map_refs = self.cover();
        self.compute_required(map_refs, target);
    }
}

/// The function of `root` over the leaves of one of its cuts.
fn cut_function(ntk: &Network, root: usize, leaves: &[usize]) -> TruthTable {
    fn rec(ntk: &Network, u: usize, memo: &mut HashMap<usize, TruthTable>) -> TruthTable {
        if let Some(&t) = memo.get(&u) {
            return t
        }
        let obj = &ntk.objs[u];
        assert_eq!(obj.ty, ObjType::And, "object {} escapes the cut", u);
        let [a, b] = [obj.fanins_iv[0], obj.fanins_iv[1]]
            .map(|f| rec(ntk, f >> 1, memo).not_if(f & 1 != 0));
        let t = a.and(b);
        memo.insert(u, t);
        t
    }
    let mut memo = leaves.iter().enumerate()
        .map(|(j, &l)| (l, TruthTable::var(j, leaves.len())))
        .collect::<HashMap<_, _>>();
    rec(ntk, root, &mut memo)
}

impl Mapper for LutMapper {
    fn map(&self, ntk: &Network, params: &MapParams) -> Result<Network> {
        let fail = |reason: String| {
            clilog::error!("mapping of {} failed: {}", ntk.name, reason);
            Err(PifError::Mapping { part: params.thread_id, reason })
        };
        if ntk.kind != NetworkKind::Strash {
            return fail(format!("{} is not strashed", ntk.name))
        }
        let unit;
        let lib = match &params.library {
            Some(lib) => lib.as_ref(),
            None => {
                unit = LutLibrary::unit(MAX_TRUTH_VARS);
                &unit
            }
        };
        if params.lut_size < 2 || params.lut_size > MAX_TRUTH_VARS.min(lib.max_lut_size()) {
            return fail(format!("unsupported lut size {} (library has up to {})",
                                params.lut_size, lib.max_lut_size()))
        }
        if params.cuts_max == 0 {
            return fail("at least one cut per node must be kept".into())
        }

        let n = ntk.objs.len();
        let mut num_fanouts = vec![0; n];
        for obj in &ntk.objs {
            for &f in &obj.fanins_iv {
                num_fanouts[f >> 1] += 1;
            }
        }
        let mut st = MapState {
            ntk, lib,
            lut_size: params.lut_size,
            cuts_max: params.cuts_max,
            order: ntk.topo_order(),
            refs: num_fanouts.iter().map(|&r| r.max(1) as f32).collect(),
            num_fanouts,
            cuts: vec![vec![]; n],
            arrival: vec![0.; n],
            area_flow: vec![0.; n],
            required: vec![f32::INFINITY; n],
        };
        st.enumerate(CutOrder::Delay);
        let best_delay = st.max_arrival();
        let target = match params.delay_target {
            Some(t) if t + EPS < best_delay => {
                clilog::warn!("part {}: delay target {} is below the best delay {}",
                              params.thread_id, t, best_delay);
                best_delay
            }
            Some(t) => t,
            None => best_delay,
        };
        let mut map_refs = st.cover();
        st.compute_required(&map_refs, target);
        clilog::trace!("part {}: delay {}, area {} after the delay pass",
                       params.thread_id, best_delay, st.cover_area(&map_refs));
        for _ in 0..params.flow_iters {
            st.recover(&mut map_refs, false, target);
        }
        for _ in 0..params.area_iters {
            st.recover(&mut map_refs, true, target);
        }

        let mut ret = Network::start_from(ntk, NetworkKind::Logic);
        let mut sig = vec![usize::MAX; n];
        sig[0] = 0;
        for (&ci, &new_ci) in ntk.cis.iter().zip(&ret.cis) {
            sig[ci] = new_ci << 1;
        }
        for &i in &st.order {
            if map_refs[i] == 0 || ntk.objs[i].ty != ObjType::And {
                continue
            }
            let leaves = &st.cuts[i][0].leaves;
            let func = cut_function(ntk, i, leaves);
            let fanins = leaves.iter().map(|&l| {
                assert_ne!(sig[l], usize::MAX, "leaf {} of {} is not mapped", l, i);
                sig[l]
            }).collect();
            sig[i] = ret.add_node(fanins, func) << 1;
        }
        for (&co, &new_co) in ntk.cos.iter().zip(&ret.cos.clone()) {
            match ntk.co_driver(co) {
                Some(d) => ret.set_co_driver(new_co, sig[d >> 1] ^ (d & 1)),
                None => return fail(format!("output {} is not connected", co)),
            }
        }
        clilog::debug!("part {}: {} and gates mapped to {} luts of area {}, delay {}",
                       params.thread_id, ntk.num_logic(), ret.num_logic(),
                       st.cover_area(&map_refs), st.max_arrival());
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::find_mismatch;

    #[test]
    fn parse_library() {
        let lib = LutLibrary::parse("\
# size area delay
1 1.00 1.0

2 1.00 1.0   # two inputs
3 1.50 1.2 1.2 1.4
").unwrap();
        assert_eq!(lib.max_lut_size(), 3);
        assert_eq!(lib.area(3), 1.5);
        assert_eq!(lib.delay(3), 1.4);
        assert_eq!(lib.delay(2), 1.0);
    }

    #[test]
    fn reject_bad_library() {
        let line_of = |text: &str| match LutLibrary::parse(text) {
            Err(PifError::Library { line, .. }) => line,
            r => panic!("unexpected {:?}", r),
        };
        assert_eq!(line_of("1 1\n"), 1);
        assert_eq!(line_of("1 1 1\n3 1 1\n"), 2);
        assert_eq!(line_of("# nothing\n1 1 1\nx 1 1\n"), 3);
        assert_eq!(line_of("1 1 -1\n"), 1);
        assert_eq!(line_of("1 1 1 1 1\n"), 1);
        assert_eq!(line_of("# empty\n"), 0);
    }

    #[test]
    fn lut_mapping_is_equivalent() {
        for seed in 0..6 {
            let ntk = Network::random(seed, 10, 120, 8);
            for lut_size in [2, 4, 6] {
                let params = MapParams { lut_size, ..Default::default() };
                let mapped = LutMapper.map(&ntk, &params).unwrap();
                mapped.check().unwrap();
                assert_eq!(mapped.kind, NetworkKind::Logic);
                assert!(mapped.objs.iter().all(|o| o.fanins_iv.len() <= lut_size
                                               || o.ty.is_co()));
                assert!(mapped.max_level() <= ntk.max_level());
                assert_eq!(find_mismatch(&ntk, &mapped, seed), None,
                           "seed {} lut size {}", seed, lut_size);
            }
        }
    }

    #[test]
    fn area_recovery_does_not_hurt() {
        let ntk = Network::random(42, 12, 300, 10);
        let delay_only = MapParams {
            lut_size: 4, flow_iters: 0, area_iters: 0, ..Default::default()
        };
        let recovered = MapParams { lut_size: 4, ..Default::default() };
        let a = LutMapper.map(&ntk, &delay_only).unwrap();
        let b = LutMapper.map(&ntk, &recovered).unwrap();
        assert!(b.max_level() <= a.max_level());
        assert_eq!(find_mismatch(&ntk, &b, 42), None);
    }

    #[test]
    fn library_limits_lut_size() {
        let ntk = Network::random(3, 6, 30, 3);
        let params = MapParams {
            lut_size: 4,
            library: Some(Arc::new(LutLibrary::unit(3))),
            thread_id: 7,
            ..Default::default()
        };
        assert!(matches!(LutMapper.map(&ntk, &params),
                         Err(PifError::Mapping { part: 7, .. })));
        let params = MapParams { lut_size: 3, ..params };
        let mapped = LutMapper.map(&ntk, &params).unwrap();
        assert_eq!(find_mismatch(&ntk, &mapped, 3), None);
    }

    #[test]
    fn reject_unmappable_networks() {
        let ntk = Network::random(5, 4, 10, 2);
        let mapped = LutMapper.map(&ntk, &MapParams::default()).unwrap();
        assert!(LutMapper.map(&mapped, &MapParams::default()).is_err());
        let params = MapParams { lut_size: 7, ..Default::default() };
        assert!(LutMapper.map(&ntk, &params).is_err());
        assert_eq!(IdentityMapper.map(&ntk, &params).unwrap().num_logic(), ntk.num_logic());
    }

    #[test]
    fn constant_and_input_outputs() {
        let mut ntk = Network::new("wires", NetworkKind::Strash);
        let a = ntk.add_pi("a") << 1;
        let b = ntk.add_pi("b") << 1;
        let g = ntk.add_and(a, b ^ 1);
        ntk.add_po("one", 1);
        ntk.add_po("na", a ^ 1);
        ntk.add_po("g", g);
        let mapped = LutMapper.map(&ntk, &MapParams::default()).unwrap();
        assert_eq!(mapped.co_driver(mapped.cos[0]), Some(1));
        assert_eq!(mapped.num_logic(), 1);
        assert_eq!(find_mismatch(&ntk, &mapped, 0), None);
    }
}
