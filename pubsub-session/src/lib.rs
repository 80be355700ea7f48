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

//! # pubsub-session
//!
//! `pubsub-session` is the session and publication core of a publish/subscribe stack. It opens
//! a logical session over a [`Transport`], declares publishers on key expressions (with
//! router-assigned aliases when the transport grants them), pushes payloads with their
//! metadata, and tears everything down deterministically.
//!
//! Typical usage is centered on [`Session`] and [`Publisher`].
//!
//! ```
//! use std::sync::Arc;
//! use pubsub_session::{
//!     Config, Encoding, MemoryOptions, MemoryTransport, PublisherOptions, PutOptions, Session,
//! };
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let (transport, mut router) = MemoryTransport::new(MemoryOptions::default());
//! let session = Session::open(Config::default(), Arc::new(transport)).await.unwrap();
//!
//! let publisher = session
//!     .declare_publisher("demo/example/test", PublisherOptions::default())
//!     .await
//!     .unwrap();
//! publisher
//!     .put("hello", PutOptions::default().encoding(Encoding::TEXT_PLAIN))
//!     .await
//!     .unwrap();
//!
//! let delivery = router.recv().await.unwrap();
//! assert_eq!(delivery.key_expr.as_str(), "demo/example/test");
//! assert_eq!(&delivery.publication.payload[..], b"hello");
//!
//! publisher.undeclare().await.unwrap();
//! session.close().await.unwrap();
//! # });
//! ```
//!
//! ## Ownership
//!
//! `Session` and `Publisher` have a single owner and are consumed by `close` / `undeclare`.
//! When a handle has to live somewhere the borrow checker cannot follow, wrap it in
//! [`Owned`], which reports moved and released handles as errors instead of panicking.
//! Publishers find their session through its [`SessionId`], so moving a `Session` never
//! invalidates them.
//!
//! ## Observability Model
//!
//! The library emits `tracing` events with a stable `event` field (see the `observability`
//! module) and never installs a subscriber. Binaries and tests initialise
//! `tracing-subscriber` themselves.

mod config;
mod encoding;
mod error;
mod handle;
mod keyexpr;
#[doc(hidden)]
pub mod observability;
mod publication;
mod publisher;
mod registry;
mod session;
mod transport;

pub use config::{Config, WhatAmI, KNOWN_KEYS};
pub use encoding::{Encoding, EncodingPrefix};
pub use error::SessionError;
pub use handle::{HandleId, HandleTable, Owned, Release};
pub use keyexpr::KeyExpr;
pub use publication::{
    Alias, Attachment, CongestionControl, Priority, Publication, PublicationEncoder, SampleKind,
    WireKey,
};
pub use publisher::{Publisher, PublisherOptions, PutOptions, PutOutcome};
pub use session::{DeclarationId, Session, SessionId, SessionState};
pub use transport::memory::{Delivery, MemoryOptions, MemoryRouter, MemoryTransport};
pub use transport::{ConnectionId, SendOutcome, Transport, TransportError};

pub mod config_keys {
    //! Keys understood by [`Config::insert_json`](crate::Config::insert_json).
    pub use crate::config::{
        KEY_CLOSE_TIMEOUT_MS, KEY_CONGESTION_CONTROL, KEY_CONNECT_ENDPOINTS,
        KEY_DECLARE_TIMEOUT_MS, KEY_ENCODING, KEY_LISTEN_ENDPOINTS, KEY_MODE,
        KEY_OPEN_TIMEOUT_MS, KEY_PRIORITY, KEY_PUT_TIMEOUT_MS,
    };
}

/// Number of sessions currently open in this process.
pub fn open_sessions() -> usize {
    registry::open_sessions()
}
