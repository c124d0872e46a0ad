// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs tests on a remote build through a Build Server Protocol server.
//!
//! bsprun finds the BSP connection file for the configured server in the workspace, launches
//! the server and asks it to test the selected build targets. Results are matched back to
//! targets and source files as the server reports them.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;
mod reporter;
mod selection;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
