// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Recoverable errors of the partition-map-merge flow.
//!
//! Structural invariant violations are not represented here: they
//! indicate a bug upstream and panic on the spot.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PifError {
    /// The input network does not have the shape the partitioner expects.
    #[error("malformed network: {0}")]
    MalformedNetwork(String),
    /// A combinational input without any fanout, rejected on request.
    #[error("dangling input {0}")]
    DanglingInput(String),
    /// A real input/output of a sub-network has no counterpart in the
    /// original network.
    #[error("cannot find object named {name} in the original network")]
    NameNotFound { name: String },
    /// The sub-networks before and after mapping disagree.
    #[error("boundary mismatch: {0}")]
    BoundaryMismatch(String),
    /// A mapping worker failed.
    #[error("mapping of partition {part} failed: {reason}")]
    Mapping { part: usize, reason: String },
    /// The LUT library file cannot be understood.
    #[error("lut library line {line}: {reason}")]
    Library { line: usize, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] serde_bare::error::Error),
}

pub type Result<T> = std::result::Result<T, PifError>;
