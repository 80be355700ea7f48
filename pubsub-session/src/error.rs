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

//! Error taxonomy shared by every session-scoped operation.

use std::convert::Infallible;
use thiserror::Error;

/// Errors surfaced by sessions, publishers and the ownership primitives.
///
/// Handle misuse (`InvalidHandle`, `OwnershipViolation`, `PublisherUndeclared`) is a local
/// contract violation and is never retried. Transport-originated failures are returned as-is;
/// the core performs no retry of its own.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("unable to connect: {0}")]
    ConnectError(String),

    #[error("session is closed")]
    SessionClosed,

    #[error("declaration rejected: {0}")]
    DeclarationError(String),

    #[error("publisher has been undeclared")]
    PublisherUndeclared,

    #[error("invalid handle: already moved, released or never initialized")]
    InvalidHandle,

    #[error("invalid key expression `{expr}`: {reason}")]
    InvalidKeyExpr { expr: String, reason: &'static str },

    #[error("payload of {size} bytes exceeds transport limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("unsupported encoding `{0}`")]
    UnsupportedEncoding(String),

    #[error("transport failure: {0}")]
    TransportError(String),

    #[error("resource is owned by another session")]
    OwnershipViolation,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("session closed with {} release failure(s)", .0.len())]
    CloseIncomplete(Vec<SessionError>),
}

impl SessionError {
    pub(crate) fn invalid_key_expr(expr: &str, reason: &'static str) -> Self {
        SessionError::InvalidKeyExpr {
            expr: expr.to_string(),
            reason,
        }
    }

    /// `true` for errors caused by misuse of a handle rather than by the transport.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidHandle
                | SessionError::OwnershipViolation
                | SessionError::PublisherUndeclared
        )
    }
}

impl From<Infallible> for SessionError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}
