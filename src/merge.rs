// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Reassembly of processed sub-networks into one logic network.

use crate::error::{PifError, Result};
use crate::network::{CutMark, CutSource, Network, NetworkKind, ObjType};
use crate::truth::TruthTable;

struct Merger<'a> {
    before: &'a [Network],
    after: &'a [Network],
    ret: Network,
    /// Per part: the signal in `ret` of every object, once known.
    map: Vec<Vec<Option<usize>>>,
    /// Per part: the cut marks of CIs and COs, by position.
    ci_marks: Vec<Vec<Option<CutMark>>>,
    co_marks: Vec<Vec<Option<CutMark>>>,
    /// Per part: the position of every CI object.
    ci_pos: Vec<Vec<usize>>,
    const_nodes: [Option<usize>; 2],
}

fn mismatch<T>(s: String) -> Result<T> {
    clilog::error!("{}", s);
    Err(PifError::BoundaryMismatch(s))
}

impl Merger<'_> {
    fn check_shapes(&self) -> Result<()> {
        if self.before.len() != self.after.len() {
            return mismatch(format!("{} sub-networks before processing, {} after",
                                    self.before.len(), self.after.len()))
        }
        for (p, (b, a)) in self.before.iter().zip(self.after).enumerate() {
            if b.cis.len() != a.cis.len() || b.cos.len() != a.cos.len() {
                return mismatch(format!(
                    "part {} has {}/{} inputs/outputs before processing, {}/{} after",
                    p, b.cis.len(), b.cos.len(), a.cis.len(), a.cos.len()))
            }
            for (&bc, &ac) in b.cis.iter().zip(&a.cis).chain(b.cos.iter().zip(&a.cos)) {
                let (bo, ao) = (&b.objs[bc], &a.objs[ac]);
                if bo.ty != ao.ty || (bo.cut.is_none() && bo.name != ao.name) {
                    return mismatch(format!(
                        "part {}: boundary object {:?} {:?} became {:?} {:?}",
                        p, bo.ty, bo.name, ao.ty, ao.name))
                }
            }
        }
        Ok(())
    }

    /// Copy the cut marks from the unprocessed sub-networks, and
    /// validate the cross-references.
    fn propagate_marks(&mut self) -> Result<()> {
        for (p, b) in self.before.iter().enumerate() {
            self.ci_marks.push(b.cis.iter().map(|&i| b.objs[i].cut).collect());
            self.co_marks.push(b.cos.iter().map(|&i| b.objs[i].cut).collect());
            let mut pos = vec![usize::MAX; self.after[p].objs.len()];
            for (i, &ci) in self.after[p].cis.iter().enumerate() {
                pos[ci] = i;
            }
            self.ci_pos.push(pos);
        }
        for p in 0..self.before.len() {
            for (i, mark) in self.ci_marks[p].iter().enumerate() {
                let valid = match *mark {
                    None => true,
                    Some(CutMark::Output) => false,
                    Some(CutMark::Input(CutSource::Ci { part, index })) =>
                        part != p && part < self.before.len() &&
                        index < self.ci_marks[part].len() &&
                        self.ci_marks[part][index].is_none(),
                    Some(CutMark::Input(CutSource::Co { part, index })) =>
                        part != p && part < self.before.len() &&
                        index < self.co_marks[part].len() &&
                        self.co_marks[part][index] == Some(CutMark::Output),
                };
                if !valid {
                    return mismatch(format!("part {}: input {} has a bad cut mark {:?}",
                                            p, i, mark))
                }
            }
            if let Some(i) = self.co_marks[p].iter()
                .position(|m| matches!(m, Some(CutMark::Input(_))))
            {
                return mismatch(format!("part {}: output {} is marked as an input", p, i))
            }
        }
        Ok(())
    }

    /// Resolve the real CIs and COs by name. Returns the merged CO of
    /// every real CO, per part.
    fn resolve_names(&mut self) -> Result<Vec<Vec<Option<usize>>>> {
        let mut driven = vec![false; self.ret.objs.len()];
        let mut real_cos = Vec::with_capacity(self.after.len());
        let after = self.after;
        for (p, a) in after.iter().enumerate() {
            for (i, &ci) in a.cis.iter().enumerate() {
                if self.ci_marks[p][i].is_some() {
                    continue
                }
                let id = self.lookup(a, ci, [ObjType::Pi, ObjType::BoxOut])?;
                self.map[p][ci] = Some(id << 1);
            }
            let mut cos = vec![None; a.cos.len()];
            for (i, &co) in a.cos.iter().enumerate() {
                if self.co_marks[p][i].is_some() {
                    continue
                }
                let id = self.lookup(a, co, [ObjType::Po, ObjType::BoxIn])?;
                if driven[id] {
                    return mismatch(format!("output {} is driven by two sub-networks",
                                            a.objs[co].name.as_deref().unwrap_or("?")))
                }
                driven[id] = true;
                cos[i] = Some(id);
            }
            real_cos.push(cos);
        }
        if let Some(&co) = self.ret.cos.iter().find(|&&co| !driven[co]) {
            return mismatch(format!("output {} is not driven by any sub-network",
                                    self.ret.objs[co].name.as_deref().unwrap_or("?")))
        }
        Ok(real_cos)
    }

    /// Find `obj` of `sub` in the merged network, trying the name
    /// spaces in order.
    fn lookup(&self, sub: &Network, obj: usize, spaces: [ObjType; 2]) -> Result<usize> {
        let name = match &sub.objs[obj].name {
            Some(name) => name,
            None => {
                clilog::error!("unnamed boundary object {} in {}", obj, sub.name);
                return Err(PifError::NameNotFound { name: format!("{}:{}", sub.name, obj) })
            }
        };
        for ty in spaces {
            if let Some(id) = self.ret.find(name, ty) {
                if ty != sub.objs[obj].ty {
                    clilog::trace!("{} resolved as {:?} instead of {:?}",
                                   name, ty, sub.objs[obj].ty);
                }
                return Ok(id)
            }
        }
        clilog::error!("{} ({:?}) of {} is not in {}",
                       name, sub.objs[obj].ty, sub.name, self.ret.name);
        Err(PifError::NameNotFound { name: name.to_string() })
    }

    fn const_node(&mut self, value: bool) -> usize {
        if let Some(id) = self.const_nodes[value as usize] {
            return id
        }
        let id = self.ret.add_node(vec![], TruthTable::constant(0, value));
        self.const_nodes[value as usize] = Some(id);
        id
    }

    /// Create the clones of all logic objects, without fanins.
    fn clone_logic(&mut self) -> Result<()> {
        let after = self.after;
        for (p, a) in after.iter().enumerate() {
            for i in a.topo_order() {
                let obj = &a.objs[i];
                let func = match obj.ty {
                    ObjType::And => TruthTable::and2(false, false),
                    ObjType::Node => match obj.func {
                        Some(func) => func,
                        None => return mismatch(format!(
                            "part {}: node {} has no function", p, i)),
                    },
                    _ => continue,
                };
                if func.num_vars != obj.fanins_iv.len() {
                    return mismatch(format!(
                        "part {}: node {} has {} fanins but a {}-input function",
                        p, i, obj.fanins_iv.len(), func.num_vars))
                }
                let id = if obj.fanins_iv.is_empty() {
                    self.const_node(func.is_const1())
                } else {
                    self.ret.add_node(vec![], func)
                };
                self.map[p][i] = Some(id << 1);
            }
        }
        Ok(())
    }

    /// The signal of object `obj` of part `p`, following cut links.
    fn signal(&self, p: usize, obj: usize, depth: usize) -> Result<usize> {
        if obj == 0 {
            return Ok(0)
        }
        if let Some(s) = self.map[p][obj] {
            return Ok(s)
        }
        if depth > self.after.len() {
            return mismatch(format!("part {}: cut links of object {} form a loop", p, obj))
        }
        let a = &self.after[p];
        if !a.objs[obj].ty.is_ci() {
            return mismatch(format!("part {}: object {} is used but not reachable", p, obj))
        }
        match self.ci_marks[p][self.ci_pos[p][obj]] {
            Some(CutMark::Input(CutSource::Ci { part, index })) => {
                self.signal(part, self.after[part].cis[index], depth + 1)
            }
            Some(CutMark::Input(CutSource::Co { part, index })) => {
                let co = self.after[part].cos[index];
                match self.after[part].co_driver(co) {
                    Some(d) => Ok(self.signal(part, d >> 1, depth + 1)? ^ (d & 1)),
                    None => mismatch(format!("part {}: output {} is not connected",
                                             part, index)),
                }
            }
            _ => unreachable!("real input {} of part {} is unresolved", obj, p),
        }
    }

    /// Connect the fanins of all clones, folding inversions into their
    /// functions.
    fn connect(&mut self, real_cos: &[Vec<Option<usize>>]) -> Result<()> {
        let after = self.after;
        for (p, a) in after.iter().enumerate() {
            for i in a.topo_order() {
                if !a.objs[i].ty.is_logic() || a.objs[i].fanins_iv.is_empty() {
                    continue
                }
                let node = self.map[p][i].expect("logic node not cloned") >> 1;
                let mut func = self.ret.objs[node].func.expect("clone without function");
                let mut fanins = Vec::with_capacity(a.objs[i].fanins_iv.len());
                for (k, &f) in a.objs[i].fanins_iv.iter().enumerate() {
                    let s = self.signal(p, f >> 1, 0)? ^ (f & 1);
                    if s & 1 != 0 {
                        func = func.flip_var(k);
                    }
                    fanins.push(s & !1);
                }
                self.ret.set_node_func(node, func);
                self.ret.set_node_fanins(node, fanins);
            }
            for (idx, &co) in a.cos.iter().enumerate() {
                let Some(target) = real_cos[p][idx] else { continue };
                let d = match a.co_driver(co) {
                    Some(d) => d,
                    None => return mismatch(format!(
                        "part {}: output {} is not connected", p, idx)),
                };
                let s = self.signal(p, d >> 1, 0)? ^ (d & 1);
                self.ret.set_co_driver(target, s);
            }
        }
        Ok(())
    }
}

/// Merge processed sub-networks into one logic network with the CIs
/// and COs of `ntk`.
///
/// `before` are the sub-networks as extracted, carrying the cut marks;
/// `after` are the same sub-networks after processing. Processing may
/// change the logic arbitrarily but must keep the CIs and COs in place.
pub fn merge(ntk: &Network, before: &[Network], after: &[Network]) -> Result<Network> {
    let timer = clilog::stimer!("merge");
    let mut merger = Merger {
        before, after,
        ret: Network::start_from(ntk, NetworkKind::Logic),
        map: after.iter().map(|a| vec![None; a.objs.len()]).collect(),
        ci_marks: Vec::with_capacity(before.len()),
        co_marks: Vec::with_capacity(before.len()),
        ci_pos: Vec::with_capacity(before.len()),
        const_nodes: [None; 2],
    };
    merger.check_shapes()?;
    merger.propagate_marks()?;
    let real_cos = merger.resolve_names()?;
    merger.clone_logic()?;
    merger.connect(&real_cos)?;
    let ret = merger.ret;
    ret.check()?;
    clilog::finish!(timer);
    clilog::info!("merged {} sub-networks into {}: {} logic nodes, level {}",
                  after.len(), ret.name, ret.num_logic(), ret.max_level());
    Ok(ret)
}
