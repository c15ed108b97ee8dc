// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! C14: permission verifier. Reads the on-chain Settings and Identity
//! namespaces out of global state and evaluates role/policy decisions for
//! transactors, peers, and consensus messages, with an off-chain fallback
//! role table and a per-state-root policy cache.

pub mod error;
pub mod identity;
pub mod settings;
pub mod verifier;

pub use error::{PermissionError, Result};
pub use identity::{evaluate_policy, IdentityView, PolicyRule};
pub use settings::SettingsView;
pub use verifier::{OffChainRoles, PermissionVerifier, StateRoot};
