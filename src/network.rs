// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Logic network exchanged with the rest of the synthesis flow.
//!
//! A network is either *strashed* (every logic object is a two-input
//! and gate with edge inversions, deduplicated through a structural
//! hash) or *logic* (every logic object carries a truth table over its
//! fanins, e.g. the result of LUT mapping).
//!
//! Signals are encoded like AIG pins: `obj_id << 1 | invert`.
//! Object 0 is always the constant zero, so signal 0 is false and
//! signal 1 is true.

use crate::error::{PifError, Result};
use crate::truth::{TruthTable, MAX_TRUTH_VARS};
use compact_str::CompactString;
use indexmap::IndexMap;
use rand::prelude::*;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The object types, which double as name spaces for name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjType {
    /// The constant zero. Only object 0 has this type.
    Const0,
    /// A primary input.
    Pi,
    /// The output of a box (e.g. a latch), seen as a combinational input.
    BoxOut,
    /// A primary output.
    Po,
    /// The input of a box, seen as a combinational output.
    BoxIn,
    /// A two-input and gate. Only in strashed networks.
    And,
    /// A logic node with a truth table. Only in logic networks.
    Node,
}

impl ObjType {
    pub fn is_ci(self) -> bool {
        matches!(self, ObjType::Pi | ObjType::BoxOut)
    }

    pub fn is_co(self) -> bool {
        matches!(self, ObjType::Po | ObjType::BoxIn)
    }

    pub fn is_logic(self) -> bool {
        matches!(self, ObjType::And | ObjType::Node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkKind {
    Strash,
    Logic,
}

/// Where a synthetic boundary input gets its value from.
///
/// The indices are positions in the CI/CO lists of another sub-network,
/// which survive technology mapping while object ids do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CutSource {
    /// The `index`-th CI of sub-network `part`.
    Ci { part: usize, index: usize },
    /// The `index`-th CO of sub-network `part`, itself a synthetic output.
    Co { part: usize, index: usize },
}

/// Marker of the inputs and outputs created for cut edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CutMark {
    /// Exports a value to other sub-networks.
    Output,
    /// Imports a value from another sub-network.
    Input(CutSource),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obj {
    pub ty: ObjType,
    /// The fanins with the inversion bit as the last bit.
    ///
    /// A CO has exactly one, an and gate exactly two.
    /// An unconnected CO has none.
    pub fanins_iv: Vec<usize>,
    /// The function of a logic node over its fanins.
    pub func: Option<TruthTable>,
    pub name: Option<CompactString>,
    pub cut: Option<CutMark>,
}

impl Obj {
    fn new(ty: ObjType) -> Obj {
        Obj { ty, fanins_iv: vec![], func: None, name: None, cut: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub name: CompactString,
    pub kind: NetworkKind,
    pub objs: Vec<Obj>,
    /// Combinational inputs in creation order.
    pub cis: Vec<usize>,
    /// Combinational outputs in creation order.
    pub cos: Vec<usize>,
    /// Name lookup, per name space.
    #[serde(skip)]
    pub names: IndexMap<(CompactString, ObjType), usize>,
    /// A cache for identical and gates.
    #[serde(skip)]
    pub and_gate_cache: IndexMap<(usize, usize), usize>,
}

impl Network {
    pub fn new(name: &str, kind: NetworkKind) -> Network {
        Network {
            name: name.into(),
            kind,
            objs: vec![Obj::new(ObjType::Const0)],
            cis: vec![],
            cos: vec![],
            names: IndexMap::new(),
            and_gate_cache: IndexMap::new(),
        }
    }

    /// Start a network with the same CIs and COs (names and types
    /// included) as `ntk`, but without any logic. COs are left
    /// unconnected.
    pub fn start_from(ntk: &Network, kind: NetworkKind) -> Network {
        let mut ret = Network::new(&ntk.name, kind);
        for &ci in &ntk.cis {
            let obj = &ntk.objs[ci];
            ret.add_ci(obj.name.as_deref(), obj.ty);
        }
        for &co in &ntk.cos {
            let obj = &ntk.objs[co];
            ret.add_co(obj.name.as_deref(), obj.ty);
        }
        ret
    }

    pub fn num_objs(&self) -> usize {
        self.objs.len()
    }

    /// The number of logic objects (and gates or nodes).
    pub fn num_logic(&self) -> usize {
        self.objs.iter().filter(|o| o.ty.is_logic()).count()
    }

    fn add_obj(&mut self, obj: Obj) -> usize {
        self.objs.push(obj);
        self.objs.len() - 1
    }

    /// Register `name` for object `id` in the name space of its type.
    pub fn set_name(&mut self, id: usize, name: &str) {
        let ty = self.objs[id].ty;
        let prev = self.names.insert((name.into(), ty), id);
        assert!(prev.is_none() || prev == Some(id),
                "duplicate name {} ({:?})", name, ty);
        self.objs[id].name = Some(name.into());
    }

    /// Rebuild the name table and the and gate cache from the objects,
    /// e.g. after deserialization.
    pub fn rebuild_tables(&mut self) {
        self.names.clear();
        self.and_gate_cache.clear();
        for (id, obj) in self.objs.iter().enumerate() {
            if let Some(name) = &obj.name {
                self.names.insert((name.clone(), obj.ty), id);
            }
            if obj.ty == ObjType::And {
                self.and_gate_cache.insert((obj.fanins_iv[0], obj.fanins_iv[1]), id);
            }
        }
    }

    pub fn find(&self, name: &str, ty: ObjType) -> Option<usize> {
        self.names.get(&(CompactString::from(name), ty)).copied()
    }

    pub fn add_ci(&mut self, name: Option<&str>, ty: ObjType) -> usize {
        assert!(ty.is_ci());
        let id = self.add_obj(Obj::new(ty));
        self.cis.push(id);
        if let Some(name) = name {
            self.set_name(id, name);
        }
        id
    }

    pub fn add_pi(&mut self, name: &str) -> usize {
        self.add_ci(Some(name), ObjType::Pi)
    }

    pub fn add_co(&mut self, name: Option<&str>, ty: ObjType) -> usize {
        assert!(ty.is_co());
        let id = self.add_obj(Obj::new(ty));
        self.cos.push(id);
        if let Some(name) = name {
            self.set_name(id, name);
        }
        id
    }

    /// Add a primary output driven by `driver_iv`.
    pub fn add_po(&mut self, name: &str, driver_iv: usize) -> usize {
        let id = self.add_co(Some(name), ObjType::Po);
        self.set_co_driver(id, driver_iv);
        id
    }

    pub fn set_co_driver(&mut self, co: usize, driver_iv: usize) {
        assert!(self.objs[co].ty.is_co());
        assert!(driver_iv >> 1 < self.objs.len());
        assert!(!self.objs[driver_iv >> 1].ty.is_co(),
                "CO {} cannot be driven by another CO", co);
        self.objs[co].fanins_iv = vec![driver_iv];
    }

    /// The driver of a CO, if it is connected.
    pub fn co_driver(&self, co: usize) -> Option<usize> {
        self.objs[co].fanins_iv.first().copied()
    }

    /// Add a structurally hashed and gate, returning its signal.
    ///
    /// Trivial cases (constants, equal or opposite inputs) are folded.
    pub fn add_and(&mut self, a: usize, b: usize) -> usize {
        assert_eq!(self.kind, NetworkKind::Strash);
        assert!(a >> 1 < self.objs.len() && b >> 1 < self.objs.len());
        assert!(!self.objs[a >> 1].ty.is_co() && !self.objs[b >> 1].ty.is_co());
        if a == 0 || b == 0 {
            return 0
        }
        if a == 1 {
            return b
        }
        if b == 1 || a == b {
            return a
        }
        if a == b ^ 1 {
            return 0
        }
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        if let Some(o) = self.and_gate_cache.get(&(a, b)) {
            return o << 1
        }
        let mut obj = Obj::new(ObjType::And);
        obj.fanins_iv = vec![a, b];
        let id = self.add_obj(obj);
        self.and_gate_cache.insert((a, b), id);
        id << 1
    }

    /// Add a logic node. Fanins may be connected later with
    /// [Network::set_node_fanins].
    pub fn add_node(&mut self, fanins_iv: Vec<usize>, func: TruthTable) -> usize {
        assert_eq!(self.kind, NetworkKind::Logic);
        assert!(fanins_iv.is_empty() || fanins_iv.len() == func.num_vars);
        let mut obj = Obj::new(ObjType::Node);
        obj.fanins_iv = fanins_iv;
        obj.func = Some(func);
        self.add_obj(obj)
    }

    pub fn set_node_fanins(&mut self, node: usize, fanins_iv: Vec<usize>) {
        assert_eq!(self.objs[node].ty, ObjType::Node);
        assert_eq!(self.objs[node].func.map(|f| f.num_vars), Some(fanins_iv.len()));
        self.objs[node].fanins_iv = fanins_iv;
    }

    pub fn set_node_func(&mut self, node: usize, func: TruthTable) {
        assert_eq!(self.objs[node].ty, ObjType::Node);
        self.objs[node].func = Some(func);
    }

    /// Build the fanout CSR: `(fanouts_start, fanouts)`.
    ///
    /// The fanouts of object `i` are
    /// `fanouts[fanouts_start[i]..fanouts_start[i + 1]]`.
    pub fn fanout_csr(&self) -> (Vec<usize>, Vec<usize>) {
        let n = self.objs.len();
        let mut fanouts_start = vec![0; n + 1];
        for obj in &self.objs {
            for &f in &obj.fanins_iv {
                fanouts_start[f >> 1] += 1;
            }
        }
        for i in 1..n + 1 {
            fanouts_start[i] += fanouts_start[i - 1];
        }
        let mut fanouts = vec![0; fanouts_start[n]];
        for (i, obj) in self.objs.iter().enumerate().rev() {
            for &f in obj.fanins_iv.iter().rev() {
                let st = fanouts_start[f >> 1] - 1;
                fanouts_start[f >> 1] = st;
                fanouts[st] = i;
            }
        }
        (fanouts_start, fanouts)
    }

    /// Topological order of all objects reachable from the COs,
    /// COs excluded. Panics on a combinational loop.
    pub fn topo_order(&self) -> Vec<usize> {
        let mut vis = vec![false; self.objs.len()];
        let mut instack = vec![false; self.objs.len()];
        let mut ret = Vec::new();
        fn dfs_topo(
            ntk: &Network, vis: &mut Vec<bool>, instack: &mut Vec<bool>,
            ret: &mut Vec<usize>, u: usize
        ) {
            if instack[u] {
                panic!("network {} has a loop around object {}", ntk.name, u);
            }
            if vis[u] {
                return
            }
            vis[u] = true;
            instack[u] = true;
            for &f in &ntk.objs[u].fanins_iv {
                dfs_topo(ntk, vis, instack, ret, f >> 1);
            }
            instack[u] = false;
            ret.push(u);
        }
        for &co in &self.cos {
            for &f in &self.objs[co].fanins_iv {
                dfs_topo(self, &mut vis, &mut instack, &mut ret, f >> 1);
            }
        }
        ret
    }

    /// Logic levels of all objects. CIs and constants are at level 0,
    /// a CO is at the level of its driver.
    pub fn levels(&self) -> Vec<usize> {
        let mut level = vec![0; self.objs.len()];
        for i in self.topo_order() {
            if self.objs[i].ty.is_logic() {
                level[i] = self.objs[i].fanins_iv.iter()
                    .map(|&f| level[f >> 1] + 1)
                    .max().unwrap_or(0);
            }
        }
        for &co in &self.cos {
            if let Some(d) = self.co_driver(co) {
                level[co] = level[d >> 1];
            }
        }
        level
    }

    pub fn max_level(&self) -> usize {
        self.levels().into_iter().max().unwrap_or(0)
    }

    /// Bit-parallel simulation. `ci_words[i]` holds 64 values of the
    /// `i`-th CI; returns 64 values for every CO in order.
    pub fn simulate(&self, ci_words: &[u64]) -> Vec<u64> {
        assert_eq!(ci_words.len(), self.cis.len());
        fn lit_word(vals: &[u64], iv: usize) -> u64 {
            if iv & 1 != 0 { !vals[iv >> 1] } else { vals[iv >> 1] }
        }
        let mut vals = vec![0u64; self.objs.len()];
        for (&ci, &w) in self.cis.iter().zip(ci_words) {
            vals[ci] = w;
        }
        for i in self.topo_order() {
            let obj = &self.objs[i];
            match obj.ty {
                ObjType::And => {
                    vals[i] = lit_word(&vals, obj.fanins_iv[0]) &
                        lit_word(&vals, obj.fanins_iv[1]);
                }
                ObjType::Node => {
                    let ins = obj.fanins_iv.iter()
                        .map(|&f| lit_word(&vals, f))
                        .collect::<Vec<_>>();
                    let func = obj.func.expect("logic node without function");
                    vals[i] = func.eval_words(&ins);
                }
                _ => {}
            }
        }
        self.cos.iter().map(|&co| {
            match self.co_driver(co) {
                Some(d) => lit_word(&vals, d),
                None => panic!("CO {} is not connected", co),
            }
        }).collect()
    }

    /// Validate the object shapes.
    pub fn check(&self) -> Result<()> {
        let malformed = |s: String| Err(PifError::MalformedNetwork(s));
        if self.objs.is_empty() || self.objs[0].ty != ObjType::Const0 {
            return malformed("object 0 must be the constant".into())
        }
        for (i, obj) in self.objs.iter().enumerate() {
            for &f in &obj.fanins_iv {
                if f >> 1 >= self.objs.len() {
                    return malformed(format!("object {} has fanin {} out of range", i, f >> 1))
                }
            }
            match obj.ty {
                ObjType::Const0 if i != 0 => {
                    return malformed(format!("object {} is a second constant", i))
                }
                ObjType::Pi | ObjType::BoxOut if !obj.fanins_iv.is_empty() => {
                    return malformed(format!("CI {} has fanins", i))
                }
                ObjType::Po | ObjType::BoxIn if obj.fanins_iv.len() != 1 => {
                    return malformed(format!(
                        "CO {} is supposed to have 1 fanin, has {}", i, obj.fanins_iv.len()))
                }
                ObjType::And => {
                    if obj.fanins_iv.len() != 2 {
                        return malformed(format!(
                            "and gate {} is supposed to have 2 fanins, has {}",
                            i, obj.fanins_iv.len()))
                    }
                    if obj.fanins_iv.iter().any(|&f| f >> 1 >= i) {
                        return malformed(format!("and gate {} is not in topological order", i))
                    }
                }
                ObjType::Node => {
                    let func = match obj.func {
                        Some(func) => func,
                        None => return malformed(format!("node {} has no function", i)),
                    };
                    if func.num_vars != obj.fanins_iv.len() || func.num_vars > MAX_TRUTH_VARS {
                        return malformed(format!(
                            "node {} has {} fanins but a {}-input function",
                            i, obj.fanins_iv.len(), func.num_vars))
                    }
                }
                _ => {}
            }
            if obj.fanins_iv.iter().any(|&f| self.objs[f >> 1].ty.is_co()) {
                return malformed(format!("object {} is driven by a CO", i))
            }
        }
        Ok(())
    }

    /// Generate a random strashed network. Deterministic in `seed`.
    ///
    /// Gates preferably take recent gates as fanins so that the
    /// result has some depth. Every gate left without fanout drives an
    /// output, so there may be more than `num_pos` outputs.
    pub fn random(seed: u64, num_pis: usize, num_ands: usize, num_pos: usize) -> Network {
        assert!(num_pis >= 2);
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut ntk = Network::new(&format!("random_{}", seed), NetworkKind::Strash);
        let mut signals = (0..num_pis)
            .map(|i| ntk.add_pi(&format!("pi{}", i)) << 1)
            .collect::<Vec<_>>();
        let mut num_fanouts = vec![0usize; num_pis + num_ands + 1];
        let mut trials = 0;
        while ntk.num_logic() < num_ands && trials < num_ands * 20 {
            trials += 1;
            let window = signals.len().min(num_pis.max(16));
            let pick = |rng: &mut ChaCha20Rng| {
                let i = if rng.gen_bool(0.7) {
                    signals.len() - 1 - rng.gen_range(0..window)
                } else {
                    rng.gen_range(0..signals.len())
                };
                signals[i] ^ (rng.gen_bool(0.5) as usize)
            };
            let a = pick(&mut rng);
            let b = pick(&mut rng);
            let num_before = ntk.objs.len();
            let o = ntk.add_and(a, b);
            if ntk.objs.len() == num_before {
                continue
            }
            num_fanouts.resize(ntk.objs.len(), 0);
            num_fanouts[a >> 1] += 1;
            num_fanouts[b >> 1] += 1;
            signals.push(o);
        }
        let mut drivers = signals[num_pis..].iter().copied()
            .filter(|&s| num_fanouts[s >> 1] == 0)
            .collect::<Vec<_>>();
        drivers.reverse();
        while drivers.len() < num_pos {
            drivers.push(signals[rng.gen_range(0..signals.len())]);
        }
        for (i, &d) in drivers.iter().enumerate() {
            ntk.add_po(&format!("po{}", i), d ^ (rng.gen_bool(0.5) as usize));
        }
        ntk
    }

    /// The name used for an object in text dumps.
    fn signal_name(&self, id: usize) -> String {
        match (&self.objs[id].name, self.objs[id].ty.is_ci()) {
            (Some(name), true) => name.to_string(),
            _ => format!("n{}", id),
        }
    }
}

/// Simulation patterns for comparing networks with `num_cis` inputs.
///
/// Exhaustive when there are at most 16 inputs, otherwise `rounds`
/// words of seeded random values.
pub fn simulation_patterns(num_cis: usize, seed: u64, rounds: usize) -> Vec<Vec<u64>> {
    if num_cis <= 16 {
        let total = 1usize << num_cis;
        (0..total).step_by(64).map(|base| {
            (0..num_cis).map(|i| {
                let mut w = 0u64;
                for j in 0..64.min(total - base) {
                    w |= ((((base + j) >> i) & 1) as u64) << j;
                }
                w
            }).collect()
        }).collect()
    }
    else {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        (0..rounds).map(|_| (0..num_cis).map(|_| rng.gen()).collect()).collect()
    }
}

/// Compare two networks with positionally matching CIs and COs by
/// simulation. Returns the index of the first differing CO.
pub fn find_mismatch(a: &Network, b: &Network, seed: u64) -> Option<usize> {
    assert_eq!(a.cis.len(), b.cis.len());
    assert_eq!(a.cos.len(), b.cos.len());
    for pattern in simulation_patterns(a.cis.len(), seed, 64) {
        let oa = a.simulate(&pattern);
        let ob = b.simulate(&pattern);
        if let Some(i) = oa.iter().zip(&ob).position(|(x, y)| x != y) {
            return Some(i)
        }
    }
    None
}

/// BLIF rendering of the combinational view.
impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use itertools::Itertools;
        writeln!(f, ".model {}", self.name)?;
        writeln!(f, ".inputs {}", self.cis.iter().map(|&i| self.signal_name(i)).join(" "))?;
        let co_name = |co: usize| match &self.objs[co].name {
            Some(name) => name.to_string(),
            None => format!("co{}", co),
        };
        writeln!(f, ".outputs {}", self.cos.iter().map(|&i| co_name(i)).join(" "))?;
        writeln!(f, ".names n0")?;
        for i in self.topo_order() {
            let obj = &self.objs[i];
            let ins = obj.fanins_iv.iter().map(|&x| self.signal_name(x >> 1)).join(" ");
            match obj.ty {
                ObjType::And => {
                    writeln!(f, ".names {} n{}", ins, i)?;
                    let (a, b) = (obj.fanins_iv[0], obj.fanins_iv[1]);
                    writeln!(f, "{}{} 1", (a & 1) ^ 1, (b & 1) ^ 1)?;
                }
                ObjType::Node => {
                    writeln!(f, ".names {} n{}", ins, i)?;
                    let mut func = obj.func.expect("logic node without function");
                    for (k, &x) in obj.fanins_iv.iter().enumerate() {
                        if x & 1 != 0 {
                            func = func.flip_var(k);
                        }
                    }
                    for row in func.onset_rows() {
                        writeln!(f, "{} 1", row)?;
                    }
                }
                _ => {}
            }
        }
        for &co in &self.cos {
            if let Some(d) = self.co_driver(co) {
                writeln!(f, ".names {} {}", self.signal_name(d >> 1), co_name(co))?;
                writeln!(f, "{} 1", (d & 1) ^ 1)?;
            }
        }
        writeln!(f, ".end")
    }
}
