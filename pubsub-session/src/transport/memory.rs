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

//! In-process transport.
//!
//! Publications land on a bounded queue drained through the paired [`MemoryRouter`]. The queue
//! capacity is what makes congestion observable: once it is full, `Block` sends wait for the
//! router to catch up and `Drop` sends are discarded.

use super::{ConnectionId, SendOutcome, Transport, TransportError};
use crate::config::Config;
use crate::keyexpr::KeyExpr;
use crate::publication::{Alias, CongestionControl, Publication, WireKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

const MEMORY_TRANSPORT_TAG: &str = "MemoryTransport:";
const MEMORY_TRANSPORT_FN_CONNECT_TAG: &str = "connect:";
const MEMORY_TRANSPORT_FN_SEND_TAG: &str = "send:";

/// Protocol part of the endpoint a memory transport answers to.
pub const MEMORY_PROTOCOL: &str = "memory";

#[derive(Clone, Debug)]
pub struct MemoryOptions {
    /// Address part of the endpoint: the transport answers to `memory/<name>`.
    pub name: String,
    /// Capacity of the delivery queue.
    pub capacity: usize,
    /// Hand out an alias for each registration.
    pub grant_aliases: bool,
    /// Reject payloads larger than this many bytes.
    pub max_payload: Option<usize>,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            capacity: 64,
            grant_aliases: true,
            max_payload: None,
        }
    }
}

impl MemoryOptions {
    pub fn endpoint(&self) -> String {
        format!("{MEMORY_PROTOCOL}/{}", self.name)
    }
}

/// A publication as observed on the far side of a [`MemoryTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub conn: ConnectionId,
    /// The key expression the publication was routed to, with any alias resolved.
    pub key_expr: KeyExpr,
    pub publication: Publication,
}

#[derive(Default)]
struct ConnectionState {
    aliases: HashMap<Alias, KeyExpr>,
    registrations: usize,
}

pub struct MemoryTransport {
    options: MemoryOptions,
    next_connection: AtomicU64,
    next_alias: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, ConnectionState>>,
    sender: mpsc::Sender<Delivery>,
}

/// Receiving side of a [`MemoryTransport`].
pub struct MemoryRouter {
    receiver: mpsc::Receiver<Delivery>,
}

impl MemoryRouter {
    /// Waits for the next delivery. `None` once the transport is gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    /// Takes everything currently queued without waiting.
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        while let Ok(delivery) = self.receiver.try_recv() {
            deliveries.push(delivery);
        }
        deliveries
    }
}

impl MemoryTransport {
    pub fn new(options: MemoryOptions) -> (Self, MemoryRouter) {
        let (sender, receiver) = mpsc::channel(options.capacity.max(1));
        let transport = Self {
            options,
            next_connection: AtomicU64::new(1),
            next_alias: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
            sender,
        };
        (transport, MemoryRouter { receiver })
    }

    pub fn options(&self) -> &MemoryOptions {
        &self.options
    }

    pub fn open_connections(&self) -> usize {
        self.with_connections(|connections| connections.len())
    }

    /// Live registrations summed over every connection.
    pub fn active_registrations(&self) -> usize {
        self.with_connections(|connections| {
            connections.values().map(|state| state.registrations).sum()
        })
    }

    fn with_connections<R>(
        &self,
        f: impl FnOnce(&mut HashMap<ConnectionId, ConnectionState>) -> R,
    ) -> R {
        let mut connections = match self.connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut connections)
    }

    fn resolve(&self, conn: ConnectionId, target: &WireKey) -> Result<KeyExpr, TransportError> {
        self.with_connections(|connections| {
            let state = connections.get(&conn).ok_or(TransportError::Closed)?;
            match target {
                WireKey::KeyExpr(key_expr) => Ok(key_expr.clone()),
                WireKey::Alias(alias) => state
                    .aliases
                    .get(alias)
                    .cloned()
                    .ok_or_else(|| TransportError::Rejected(format!("unknown alias {alias}"))),
            }
        })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, config: &Config) -> Result<ConnectionId, TransportError> {
        let endpoint = self.options.endpoint();
        if !config.connect.is_empty() && !config.connect.iter().any(|e| *e == endpoint) {
            warn!(
                "{MEMORY_TRANSPORT_TAG}:{MEMORY_TRANSPORT_FN_CONNECT_TAG} none of {:?} is {endpoint}",
                config.connect
            );
            return Err(TransportError::Unreachable(config.connect.join(", ")));
        }

        let conn = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        self.with_connections(|connections| {
            connections.insert(conn, ConnectionState::default());
        });
        debug!("{MEMORY_TRANSPORT_TAG}:{MEMORY_TRANSPORT_FN_CONNECT_TAG} opened {conn}");
        Ok(conn)
    }

    async fn register(
        &self,
        conn: ConnectionId,
        key_expr: &KeyExpr,
    ) -> Result<Option<Alias>, TransportError> {
        let alias = self
            .options
            .grant_aliases
            .then(|| self.next_alias.fetch_add(1, Ordering::Relaxed));

        self.with_connections(|connections| {
            let state = connections.get_mut(&conn).ok_or(TransportError::Closed)?;
            state.registrations += 1;
            if let Some(alias) = alias {
                state.aliases.insert(alias, key_expr.clone());
            }
            Ok(alias)
        })
    }

    async fn unregister(
        &self,
        conn: ConnectionId,
        _key_expr: &KeyExpr,
        alias: Option<Alias>,
    ) -> Result<(), TransportError> {
        self.with_connections(|connections| {
            let state = connections.get_mut(&conn).ok_or(TransportError::Closed)?;
            state.registrations = state.registrations.saturating_sub(1);
            if let Some(alias) = alias {
                state.aliases.remove(&alias);
            }
            Ok(())
        })
    }

    async fn send(
        &self,
        conn: ConnectionId,
        publication: Publication,
        congestion_control: CongestionControl,
    ) -> Result<SendOutcome, TransportError> {
        if let Some(max) = self.options.max_payload {
            if publication.len() > max {
                return Err(TransportError::PayloadTooLarge {
                    size: publication.len(),
                    max,
                });
            }
        }

        let key_expr = self.resolve(conn, &publication.target)?;
        trace!(
            "{MEMORY_TRANSPORT_TAG}:{MEMORY_TRANSPORT_FN_SEND_TAG} {conn} -> {key_expr} ({} bytes)",
            publication.len()
        );
        let delivery = Delivery {
            conn,
            key_expr,
            publication,
        };

        match congestion_control {
            CongestionControl::Block => self
                .sender
                .send(delivery)
                .await
                .map(|_| SendOutcome::Delivered)
                .map_err(|_| TransportError::Closed),
            CongestionControl::Drop => match self.sender.try_send(delivery) {
                Ok(()) => Ok(SendOutcome::Delivered),
                Err(TrySendError::Full(_)) => Ok(SendOutcome::Dropped),
                Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
            },
        }
    }

    async fn disconnect(&self, conn: ConnectionId) -> Result<(), TransportError> {
        self.with_connections(|connections| {
            connections
                .remove(&conn)
                .map(|_| ())
                .ok_or(TransportError::Closed)
        })
    }
}
