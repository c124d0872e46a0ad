// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core functionality for bsprun, a client that runs tests on a remote build through a
//! [Build Server Protocol](https://build-server-protocol.github.io/) server such as Bazel BSP.
//!
//! The basic flow of operations is:
//!
//! 1. A [`ConnectionManager`](connection::ConnectionManager) discovers the server from a
//!    connection file and launches it on first use.
//! 2. A [`BspClient`](client::BspClient) performs the initialize handshake over that connection
//!    and routes notifications to the runs that caused them.
//! 3. A [`RunFactory`](run::RunFactory) creates a [`TestRun`](run::TestRun) over a selection of
//!    a [`TestTree`](tree::TestTree), which visits nodes in rank order and records results.
//! 4. Coverage reports published during a run are merged by a
//!    [`CoverageAggregator`](coverage::CoverageAggregator).

#![warn(missing_docs)]

pub mod cancel;
pub mod client;
pub mod config;
pub mod connection;
pub mod coverage;
pub mod errors;
pub mod helpers;
pub mod rpc;
pub mod run;
pub mod signal;
pub mod task_events;
pub mod tree;
