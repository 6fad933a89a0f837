// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
pub mod error;

pub mod truth;

pub mod network;

pub mod graph;

pub mod aig;

pub mod cluster;

pub mod refine;

pub mod materialize;

pub mod merge;

pub mod mapper;

pub mod dump;

pub mod flow;
