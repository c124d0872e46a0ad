// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test runs: walking a selection of the test tree, issuing requests per node, and collecting
//! results.
//!
//! A run is created with [`RunFactory::begin_run`] and driven with [`TestRun::execute`]. The
//! default per-node callback is [`TargetExecutor::run_node`].

mod executor;
mod factory;
mod orchestrator;
mod sink;
mod status;

pub use executor::*;
pub use factory::*;
pub use orchestrator::*;
pub use sink::*;
pub use status::*;

use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};

/// The kind for [`OriginId`].
pub enum OriginKind {}

impl TypedUuidKind for OriginKind {
    #[inline]
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("origin");
        TAG
    }
}

/// Identifies a run to the build server. Notifications caused by the run's requests carry it.
pub type OriginId = TypedUuid<OriginKind>;
