// SPDX-License-Identifier: AGPL-3.0-or-later

//! External entry points: the TCP accept loop (C4) and the HTTP control
//! surface contract (§6.2).

pub mod http;
pub mod tcp;

pub use http::{Method, Request, Response, RouteTable, core_routes};
pub use tcp::{GatewayConfig, TcpGateway};
