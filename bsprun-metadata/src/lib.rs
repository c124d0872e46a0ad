// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Message types for the subset of the [Build Server Protocol] spoken by bsprun.
//!
//! The types in this crate describe JSON-RPC params and results as they appear on the wire. They
//! are deliberately permissive when deserializing: optional fields default, and integer-coded
//! enums preserve values this crate doesn't know about.
//!
//! The [`bazel`] module contains extensions supported by Bazel BSP servers but not (yet) part
//! of the base protocol.
//!
//! [Build Server Protocol]: https://build-server-protocol.github.io/

pub mod bazel;
mod exit_codes;
mod protocol;

pub use exit_codes::*;
pub use protocol::*;
