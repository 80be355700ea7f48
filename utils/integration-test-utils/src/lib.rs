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

//! Shared helpers for `pubsub-session` integration tests.

use async_trait::async_trait;
use pubsub_session::{
    Alias, CongestionControl, Config, ConnectionId, KeyExpr, Publication, SendOutcome, Transport,
    TransportError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Once};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const FAULTY_TRANSPORT_TAG: &str = "FaultyTransport:";

static TRACING: Once = Once::new();

/// Installs a test-friendly `tracing` subscriber once per process. Honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Register,
    Unregister,
    Send,
    Disconnect,
}

#[derive(Clone, Debug)]
pub enum Fault {
    /// Return this error instead of calling the wrapped transport.
    Fail(TransportError),
    /// Never answer.
    Hang,
}

/// Wraps a transport and injects failures or hangs per operation, counting every call.
pub struct FaultyTransport {
    inner: Arc<dyn Transport>,
    faults: Mutex<HashMap<Operation, Fault>>,
    calls: Mutex<HashMap<Operation, usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl FaultyTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn inject(&self, operation: Operation, fault: Fault) {
        lock(&self.faults).insert(operation, fault);
    }

    pub fn clear(&self, operation: Operation) {
        lock(&self.faults).remove(&operation);
    }

    /// How many times `operation` was invoked, faulted or not.
    pub fn calls(&self, operation: Operation) -> usize {
        lock(&self.calls).get(&operation).copied().unwrap_or(0)
    }

    async fn intercept(&self, operation: Operation) -> Result<(), TransportError> {
        *lock(&self.calls).entry(operation).or_insert(0) += 1;
        let fault = lock(&self.faults).get(&operation).cloned();

        match fault {
            None => Ok(()),
            Some(Fault::Fail(error)) => {
                debug!("{FAULTY_TRANSPORT_TAG} failing {operation:?} with {error}");
                Err(error)
            }
            Some(Fault::Hang) => {
                debug!("{FAULTY_TRANSPORT_TAG} hanging {operation:?}");
                std::future::pending().await
            }
        }
    }
}

#[async_trait]
impl Transport for FaultyTransport {
    async fn connect(&self, config: &Config) -> Result<ConnectionId, TransportError> {
        self.intercept(Operation::Connect).await?;
        self.inner.connect(config).await
    }

    async fn register(
        &self,
        conn: ConnectionId,
        key_expr: &KeyExpr,
    ) -> Result<Option<Alias>, TransportError> {
        self.intercept(Operation::Register).await?;
        self.inner.register(conn, key_expr).await
    }

    async fn unregister(
        &self,
        conn: ConnectionId,
        key_expr: &KeyExpr,
        alias: Option<Alias>,
    ) -> Result<(), TransportError> {
        self.intercept(Operation::Unregister).await?;
        self.inner.unregister(conn, key_expr, alias).await
    }

    async fn send(
        &self,
        conn: ConnectionId,
        publication: Publication,
        congestion_control: CongestionControl,
    ) -> Result<SendOutcome, TransportError> {
        self.intercept(Operation::Send).await?;
        self.inner.send(conn, publication, congestion_control).await
    }

    async fn disconnect(&self, conn: ConnectionId) -> Result<(), TransportError> {
        self.intercept(Operation::Disconnect).await?;
        self.inner.disconnect(conn).await
    }
}
