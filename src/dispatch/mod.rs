// SPDX-License-Identifier: AGPL-3.0-or-later

//! Message routing: per-game handler registry (C5 collaborator) and the
//! dispatcher that wires decoded frames to it (§4.5).

pub mod dispatcher;
pub mod handler;

pub use dispatcher::MessageDispatcher;
pub use handler::{Handler, HandlerRegistry};
