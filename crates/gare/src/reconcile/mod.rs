// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciliation between the local store and central: inbound entity
//! deltas applied idempotently, outbound pending records shipped with
//! retries.

pub mod inbound;
pub mod outbound;

pub use inbound::{Reconciler, SyncOutcome};
pub use outbound::{ShipperConfig, TripShipper};
