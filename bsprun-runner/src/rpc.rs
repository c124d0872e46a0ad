// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON-RPC 2.0 over a `Content-Length` framed byte stream.
//!
//! [`RpcConnection`] multiplexes requests by numeric id over a single reader/writer pair.
//! Notifications are handed to a [`NotificationHandler`] in arrival order, and cancellation is
//! forwarded to the server with `$/cancelRequest`.

mod connection;
mod framing;

pub use connection::*;
pub use framing::*;
