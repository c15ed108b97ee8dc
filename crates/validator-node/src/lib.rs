// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod cli;
pub mod config;
pub mod context;
pub mod engine_router;
pub mod error;
pub mod genesis;
pub mod identity;
pub mod supervisor;
