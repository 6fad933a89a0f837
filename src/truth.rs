// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Truth tables of logic nodes with up to 6 inputs.
//!
//! The table is always kept as a full 64-bit word. Tables with less
//! than 6 variables are replicated so that bitwise operations between
//! tables of the same support never need masking.

use serde::{Deserialize, Serialize};

/// The maximum number of inputs a logic node may have.
pub const MAX_TRUTH_VARS: usize = 6;

const VAR_MASKS: [u64; MAX_TRUTH_VARS] = [
    0xAAAA_AAAA_AAAA_AAAA,
    0xCCCC_CCCC_CCCC_CCCC,
    0xF0F0_F0F0_F0F0_F0F0,
    0xFF00_FF00_FF00_FF00,
    0xFFFF_0000_FFFF_0000,
    0xFFFF_FFFF_0000_0000,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TruthTable {
    pub bits: u64,
    pub num_vars: usize,
}

impl TruthTable {
    pub fn constant(num_vars: usize, value: bool) -> TruthTable {
        assert!(num_vars <= MAX_TRUTH_VARS);
        TruthTable {
            bits: if value { u64::MAX } else { 0 },
            num_vars,
        }
    }

    /// The projection function of variable `i`.
    pub fn var(i: usize, num_vars: usize) -> TruthTable {
        assert!(i < num_vars && num_vars <= MAX_TRUTH_VARS,
                "variable {} out of range for {} inputs", i, num_vars);
        TruthTable { bits: VAR_MASKS[i], num_vars }
    }

    /// A two-input and gate with optional input inversions.
    pub fn and2(compl0: bool, compl1: bool) -> TruthTable {
        let a = TruthTable::var(0, 2).not_if(compl0);
        let b = TruthTable::var(1, 2).not_if(compl1);
        a.and(b)
    }

    pub fn not(self) -> TruthTable {
        TruthTable { bits: !self.bits, num_vars: self.num_vars }
    }

    pub fn not_if(self, c: bool) -> TruthTable {
        if c { self.not() } else { self }
    }

    pub fn and(self, rhs: TruthTable) -> TruthTable {
        assert_eq!(self.num_vars, rhs.num_vars);
        TruthTable { bits: self.bits & rhs.bits, num_vars: self.num_vars }
    }

    /// Substitute variable `k` by its complement.
    pub fn flip_var(self, k: usize) -> TruthTable {
        assert!(k < self.num_vars);
        let mask = VAR_MASKS[k];
        let shift = 1 << k;
        TruthTable {
            bits: ((self.bits & mask) >> shift) | ((self.bits << shift) & mask),
            num_vars: self.num_vars,
        }
    }

    pub fn is_const0(&self) -> bool {
        self.bits == 0
    }

    pub fn is_const1(&self) -> bool {
        self.bits == u64::MAX
    }

    /// Whether the function changes with variable `k`.
    pub fn depends_on(&self, k: usize) -> bool {
        self.flip_var(k).bits != self.bits
    }

    /// Evaluate on one input assignment, bit `i` of `minterm` being
    /// variable `i`.
    pub fn eval(&self, minterm: usize) -> bool {
        debug_assert!(minterm < (1 << self.num_vars));
        (self.bits >> minterm) & 1 != 0
    }

    /// Evaluate 64 assignments at once. `inputs[i]` holds the 64 values
    /// of variable `i`.
    pub fn eval_words(&self, inputs: &[u64]) -> u64 {
        assert_eq!(inputs.len(), self.num_vars);
        let mut out = 0u64;
        for m in 0..(1usize << self.num_vars) {
            if !self.eval(m) { continue }
            let mut term = u64::MAX;
            for (i, &x) in inputs.iter().enumerate() {
                term &= if (m >> i) & 1 != 0 { x } else { !x };
            }
            out |= term;
        }
        out
    }

    /// The on-set minterms as rows of a cover, e.g. `"1-0"` style
    /// strings without don't-cares.
    pub fn onset_rows(&self) -> Vec<String> {
        (0..(1usize << self.num_vars))
            .filter(|&m| self.eval(m))
            .map(|m| (0..self.num_vars)
                 .map(|i| if (m >> i) & 1 != 0 { '1' } else { '0' })
                 .collect())
            .collect()
    }
}
