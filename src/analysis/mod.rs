// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Analysis module - movement features, anomaly scoring, temporal risk

mod features;
mod anomaly;
mod temporal;
mod statistics;

pub use features::*;
pub use anomaly::*;
pub use temporal::*;
pub use statistics::*;
