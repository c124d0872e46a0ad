// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Line coverage collected from LCOV reports published during a run.
//!
//! The main structure in this module is [`CoverageAggregator`].

mod aggregator;
mod lcov;

pub use aggregator::*;
pub use lcov::*;
