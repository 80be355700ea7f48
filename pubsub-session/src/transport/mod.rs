/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! The transport seam.
//!
//! A session never touches the network itself. Everything that crosses the wire goes through
//! an `Arc<dyn Transport>` handed to `Session::open`, so the same core runs over the in-process
//! [`memory::MemoryTransport`] in tests and over a real link in production.

pub mod memory;

use crate::config::Config;
use crate::error::SessionError;
use crate::keyexpr::KeyExpr;
use crate::publication::{Alias, CongestionControl, Publication};
use async_trait::async_trait;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Transport-assigned identifier of an established connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What happened to a publication handed to [`Transport::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Discarded under [`CongestionControl::Drop`]. Not an error.
    Dropped,
}

/// Failures reported by a transport implementation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no reachable endpoint: {0}")]
    Unreachable(String),

    #[error("rejected by remote: {0}")]
    Rejected(String),

    #[error("payload of {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("connection is closed")]
    Closed,

    #[error("i/o failure: {0}")]
    Io(String),
}

impl TransportError {
    /// Maps a failure raised while opening a connection.
    pub(crate) fn into_connect_error(self) -> SessionError {
        match self {
            TransportError::Unreachable(reason) => SessionError::ConnectError(reason),
            other => SessionError::ConnectError(other.to_string()),
        }
    }

    /// Maps a failure raised while registering a declaration.
    pub(crate) fn into_declaration_error(self) -> SessionError {
        match self {
            TransportError::Rejected(reason) => SessionError::DeclarationError(reason),
            TransportError::Closed => SessionError::SessionClosed,
            other => SessionError::TransportError(other.to_string()),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::PayloadTooLarge { size, max } => {
                SessionError::PayloadTooLarge { size, max }
            }
            TransportError::Closed => SessionError::SessionClosed,
            other => SessionError::TransportError(other.to_string()),
        }
    }
}

/// The network collaborator of a session.
///
/// Implementations must be safe to call concurrently from any number of tasks. `send` is on
/// the hot path and is called without any session-level lock held.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes a connection according to `config`.
    async fn connect(&self, config: &Config) -> Result<ConnectionId, TransportError>;

    /// Registers `key_expr` as a publication target. May return an alias that later
    /// publications can use instead of the full key expression.
    async fn register(
        &self,
        conn: ConnectionId,
        key_expr: &KeyExpr,
    ) -> Result<Option<Alias>, TransportError>;

    /// Withdraws a registration made by [`Transport::register`].
    async fn unregister(
        &self,
        conn: ConnectionId,
        key_expr: &KeyExpr,
        alias: Option<Alias>,
    ) -> Result<(), TransportError>;

    /// Hands one publication to the wire.
    ///
    /// Under [`CongestionControl::Block`] the future stays pending until there is room. Under
    /// [`CongestionControl::Drop`] it returns [`SendOutcome::Dropped`] instead of waiting.
    async fn send(
        &self,
        conn: ConnectionId,
        publication: Publication,
        congestion_control: CongestionControl,
    ) -> Result<SendOutcome, TransportError>;

    /// Tears the connection down.
    async fn disconnect(&self, conn: ConnectionId) -> Result<(), TransportError>;
}
