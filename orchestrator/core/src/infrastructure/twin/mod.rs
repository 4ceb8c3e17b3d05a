// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Digital-twin link: wire protocol, session state and transport.

pub mod connection;
pub mod protocol;
pub mod session;
pub mod websocket;

pub use connection::{ConnectionError, ConnectionManager, TwinChannel, TwinConnector, TwinEvent, TwinHandle};
pub use protocol::{Envelope, Inbound, MessageType, ProtocolError, StatusPayload};
pub use session::{LinkSnapshot, LinkState, Outbound, SessionConfig, TwinSession};
pub use websocket::WebSocketConnector;
