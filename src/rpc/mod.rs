// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-RPC transport: framing, correlation and HTTP exchange.
//!
//! # Architecture
//!
//! ```text
//!  child stdout ──bytes──▶ FrameReader ──Value──▶ RpcCorrelator::dispatch_incoming
//!                                                   │              │
//!                                        pending[id] ◀─ response   └─▶ notifications
//!                                                   │
//!  caller ──call(method)──▶ RpcCorrelator ──line──▶ writer task ──▶ child stdin
//! ```
//!
//! Tool servers reachable over the network use [`HttpRpcClient`] instead,
//! where each call is a single POST.

pub mod correlator;
pub mod error;
pub mod framing;
pub mod http;
pub mod protocol;

pub use correlator::{RpcCorrelator, DEFAULT_REQUEST_TIMEOUT};
pub use error::{RpcError, RpcResult};
pub use framing::FrameReader;
pub use http::HttpRpcClient;
pub use protocol::RpcNotification;
