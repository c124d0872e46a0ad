// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discovering, launching and managing the connection to the build server.

mod discovery;
mod launcher;
mod manager;

pub use discovery::*;
pub use launcher::*;
pub use manager::*;
