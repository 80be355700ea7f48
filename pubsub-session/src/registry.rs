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

//! Process-wide table of open sessions.
//!
//! Publishers hold a [`SessionId`] rather than a pointer to their session. Whatever happens to
//! the `Session` value itself (moved into another struct, boxed, sent to another task) the
//! publisher finds its session here.

use crate::error::SessionError;
use crate::handle::HandleTable;
use crate::session::{SessionId, SessionShared};
use lazy_static::lazy_static;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

lazy_static! {
    static ref SESSIONS: RwLock<HandleTable<Arc<SessionShared>>> = RwLock::new(HandleTable::new());
}

fn read() -> RwLockReadGuard<'static, HandleTable<Arc<SessionShared>>> {
    match SESSIONS.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write() -> RwLockWriteGuard<'static, HandleTable<Arc<SessionShared>>> {
    match SESSIONS.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Stores a freshly opened session and returns its id.
pub(crate) fn register(shared: Arc<SessionShared>) -> SessionId {
    SessionId(write().insert(shared))
}

/// Finds an open session. A closed session resolves to `SessionClosed`.
pub(crate) fn lookup(id: SessionId) -> Result<Arc<SessionShared>, SessionError> {
    read()
        .get(id.0)
        .map(Arc::clone)
        .map_err(|_| SessionError::SessionClosed)
}

pub(crate) fn remove(id: SessionId) {
    let _ = write().remove(id.0);
}

pub(crate) fn open_sessions() -> usize {
    read().len()
}

