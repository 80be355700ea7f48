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

//! Sessions: the root of every other resource.
//!
//! A [`Session`] owns one transport connection and the table of declarations made through it.
//! Publishers refer back to their session by [`SessionId`] through the process-wide registry,
//! so the `Session` value can be moved freely while publishers stay usable.

use crate::config::Config;
use crate::error::SessionError;
use crate::handle::{HandleId, HandleTable, Release};
use crate::keyexpr::KeyExpr;
use crate::observability::{events, fields};
use crate::publication::Alias;
use crate::publisher::{Publisher, PublisherOptions};
use crate::registry;
use crate::transport::{ConnectionId, Transport};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMPONENT: &str = "session";

/// Stable identity of an open session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) HandleId);

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Identity of one publisher declaration inside its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclarationId(pub(crate) HandleId);

impl Display for DeclarationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "decl-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Open,
    Closing,
    Closed,
}

/// Key expression → (publishers using it, alias granted by the transport).
type Registrations = HashMap<KeyExpr, (usize, Option<Alias>)>;

struct SessionCore {
    state: SessionState,
    declarations: HandleTable<KeyExpr>,
    registrations: Registrations,
}

/// State shared between a session and every publisher declared on it.
pub(crate) struct SessionShared {
    zid: Uuid,
    config: Config,
    transport: Arc<dyn Transport>,
    connection: ArcSwapOption<ConnectionId>,
    core: Mutex<SessionCore>,
    closing: watch::Sender<bool>,
    closed: AtomicBool,
}

impl SessionShared {
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The live connection, or `SessionClosed` once closing has started.
    pub(crate) fn connection(&self) -> Result<ConnectionId, SessionError> {
        if self.is_closing() {
            return Err(SessionError::SessionClosed);
        }
        self.connection
            .load_full()
            .map(|conn| *conn)
            .ok_or(SessionError::SessionClosed)
    }

    pub(crate) fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    pub(crate) fn subscribe_closing(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }

    /// `true` once teardown ran to the end, as opposed to merely having started.
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drops one declaration and the transport registration behind it once unused.
    pub(crate) async fn release_declaration(
        &self,
        session: SessionId,
        declaration: DeclarationId,
    ) -> Result<(), SessionError> {
        let (conn, key_expr, alias) = {
            let mut core = self.core.lock().await;
            if core.state != SessionState::Open {
                return Err(SessionError::InvalidHandle);
            }
            // once close has begun it owns every remaining declaration
            let conn = self.connection().map_err(|_| SessionError::InvalidHandle)?;
            let key_expr = core.declarations.remove(declaration.0)?;

            let remaining = match core.registrations.get_mut(&key_expr) {
                Some((active, _)) => {
                    *active -= 1;
                    *active
                }
                None => {
                    warn!(
                        event = events::REGISTRATION_RELEASE_FAILED,
                        component = COMPONENT,
                        %session,
                        %key_expr,
                        reason = "missing_registration",
                        "declaration had no registration"
                    );
                    return Ok(());
                }
            };
            if remaining > 0 {
                debug!(
                    event = events::REGISTRATION_RELEASE,
                    component = COMPONENT,
                    %session,
                    %key_expr,
                    remaining,
                    "registration still in use"
                );
                return Ok(());
            }

            let Some((_, alias)) = core.registrations.remove(&key_expr) else {
                return Ok(());
            };
            (conn, key_expr, alias)
        };

        let result = self.unregister(conn, &key_expr, alias).await;
        match &result {
            Ok(()) => debug!(
                event = events::REGISTRATION_RELEASE,
                component = COMPONENT,
                %session,
                %key_expr,
                alias = %fields::format_alias(alias),
                remaining = 0,
                "registration released"
            ),
            Err(err) => warn!(
                event = events::REGISTRATION_RELEASE_FAILED,
                component = COMPONENT,
                %session,
                %key_expr,
                alias = %fields::format_alias(alias),
                err = %err,
                "unable to unregister key expression"
            ),
        }
        result
    }

    async fn unregister(
        &self,
        conn: ConnectionId,
        key_expr: &KeyExpr,
        alias: Option<Alias>,
    ) -> Result<(), SessionError> {
        let declare_timeout = self.config.declare_timeout;
        match timeout(declare_timeout, self.transport.unregister(conn, key_expr, alias)).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::TransportError(format!(
                "unregister of `{key_expr}` timed out after {declare_timeout:?}"
            ))),
        }
    }

    /// Best-effort teardown. Every registration is attempted and the connection is always
    /// released; failures are collected into `CloseIncomplete`.
    pub(crate) async fn close(&self, session: SessionId) -> Result<(), SessionError> {
        if self.closing.send_replace(true) {
            return Err(SessionError::SessionClosed);
        }
        info!(
            event = events::SESSION_CLOSE_START,
            component = COMPONENT,
            %session,
            zid = %self.zid,
            "closing session"
        );
        self.teardown(session).await
    }

    /// Releases whatever is still held. Safe to run again after an interrupted run: what
    /// was already drained is skipped and the connection stays stored until disconnected.
    async fn teardown(&self, session: SessionId) -> Result<(), SessionError> {
        let (declarations, registrations) = {
            let mut core = self.core.lock().await;
            core.state = SessionState::Closing;
            let declarations = core.declarations.drain().len();
            let registrations: Vec<(KeyExpr, Option<Alias>)> = core
                .registrations
                .drain()
                .map(|(key_expr, (_, alias))| (key_expr, alias))
                .collect();
            (declarations, registrations)
        };

        let mut failures = Vec::new();
        if let Some(conn) = self.connection.load_full() {
            let conn = *conn;
            let close_timeout = self.config.close_timeout;
            let transport = &self.transport;

            let unregistered = join_all(registrations.iter().map(|(key_expr, alias)| async move {
                match timeout(close_timeout, transport.unregister(conn, key_expr, *alias)).await {
                    Ok(result) => result.map_err(SessionError::from),
                    Err(_) => Err(SessionError::TransportError(format!(
                        "unregister of `{key_expr}` timed out after {close_timeout:?}"
                    ))),
                }
            }))
            .await;

            for ((key_expr, alias), result) in registrations.iter().zip(unregistered) {
                if let Err(err) = result {
                    warn!(
                        event = events::REGISTRATION_RELEASE_FAILED,
                        component = COMPONENT,
                        %session,
                        %key_expr,
                        alias = %fields::format_alias(*alias),
                        err = %err,
                        "unable to unregister key expression during close"
                    );
                    failures.push(err);
                }
            }

            match timeout(close_timeout, transport.disconnect(conn)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failures.push(SessionError::TransportError(err.to_string())),
                Err(_) => failures.push(SessionError::TransportError(format!(
                    "disconnect timed out after {close_timeout:?}"
                ))),
            }
            self.connection.store(None);
        }

        self.core.lock().await.state = SessionState::Closed;
        self.closed.store(true, Ordering::Release);
        registry::remove(session);

        if failures.is_empty() {
            info!(
                event = events::SESSION_CLOSE_OK,
                component = COMPONENT,
                %session,
                declarations,
                registrations = registrations.len(),
                "session closed"
            );
            Ok(())
        } else {
            warn!(
                event = events::SESSION_CLOSE_INCOMPLETE,
                component = COMPONENT,
                %session,
                failures = %fields::format_errors(&failures),
                "session closed with release failures"
            );
            Err(SessionError::CloseIncomplete(failures))
        }
    }
}

/// An open session.
///
/// Not `Clone`: a session has exactly one owner. Borrow it to declare publishers, hand it
/// over by value to move it, and consume it with [`Session::close`].
pub struct Session {
    id: SessionId,
    shared: Arc<SessionShared>,
}

impl Session {
    /// Validates `config`, connects through `transport` and registers the session.
    ///
    /// # Errors
    /// `InvalidConfig` without touching the transport if the configuration is unusable,
    /// `ConnectError` if the transport cannot be reached within the open timeout.
    pub async fn open(config: Config, transport: Arc<dyn Transport>) -> Result<Self, SessionError> {
        config.validate()?;

        let zid = Uuid::new_v4();
        info!(
            event = events::SESSION_OPEN_START,
            component = COMPONENT,
            %zid,
            mode = %config.mode,
            connect = ?config.connect,
            "opening session"
        );

        let (closing, _) = watch::channel(false);
        let shared = Arc::new(SessionShared {
            zid,
            config,
            transport,
            connection: ArcSwapOption::empty(),
            core: Mutex::new(SessionCore {
                state: SessionState::Uninitialized,
                declarations: Default::default(),
                registrations: HashMap::new(),
            }),
            closing,
            closed: AtomicBool::new(false),
        });

        let open_timeout = shared.config.open_timeout;
        let connected = match timeout(open_timeout, shared.transport.connect(&shared.config)).await
        {
            Ok(result) => result.map_err(|err| err.into_connect_error()),
            Err(_) => Err(SessionError::ConnectError(format!(
                "no answer within {open_timeout:?}"
            ))),
        };
        let conn = match connected {
            Ok(conn) => conn,
            Err(err) => {
                warn!(
                    event = events::SESSION_OPEN_FAILED,
                    component = COMPONENT,
                    %zid,
                    err = %err,
                    "unable to open session"
                );
                return Err(err);
            }
        };

        shared.connection.store(Some(Arc::new(conn)));
        shared.core.lock().await.state = SessionState::Open;
        let id = registry::register(Arc::clone(&shared));

        info!(
            event = events::SESSION_OPEN_OK,
            component = COMPONENT,
            session = %id,
            %zid,
            %conn,
            "session open"
        );
        Ok(Self { id, shared })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Random identifier of this session instance, stable for its lifetime.
    pub fn zid(&self) -> Uuid {
        self.shared.zid
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub async fn state(&self) -> SessionState {
        self.shared.core.lock().await.state
    }

    /// Number of publishers currently declared on this session.
    pub async fn active_declarations(&self) -> usize {
        self.shared.core.lock().await.declarations.len()
    }

    /// Declares a publisher on `key_expr`.
    ///
    /// Publishers on the same canonical key expression share one transport registration
    /// (and its alias); the registration is withdrawn when the last of them is undeclared.
    ///
    /// # Errors
    /// `InvalidKeyExpr` for malformed or wildcard expressions (the transport is not called),
    /// `UnsupportedEncoding` for an unusable default encoding, `SessionClosed` once closing
    /// has started, `DeclarationError` if the transport rejects or does not answer in time.
    pub async fn declare_publisher<K>(
        &self,
        key_expr: K,
        options: PublisherOptions,
    ) -> Result<Publisher, SessionError>
    where
        K: TryInto<KeyExpr>,
        K::Error: Into<SessionError>,
    {
        let key_expr: KeyExpr = key_expr.try_into().map_err(Into::<SessionError>::into)?;
        key_expr.ensure_concrete()?;
        let key_expr = key_expr.canonicalize();
        if let Some(encoding) = &options.encoding {
            encoding.validate()?;
        }

        let session = self.id;
        {
            let mut core = self.shared.core.lock().await;
            if core.state != SessionState::Open {
                return Err(SessionError::SessionClosed);
            }
            if let Some((active, alias)) = core.registrations.get_mut(&key_expr) {
                *active += 1;
                let (active, alias) = (*active, *alias);
                debug!(
                    event = events::REGISTRATION_REUSE,
                    component = COMPONENT,
                    %session,
                    %key_expr,
                    alias = %fields::format_alias(alias),
                    active,
                    "reusing registration"
                );
                let declaration = DeclarationId(core.declarations.insert(key_expr.clone()));
                drop(core);
                return Ok(self.declared(declaration, key_expr, alias, options));
            }
        }

        // the round trip runs unlocked, the result is committed under the lock afterwards
        let conn = self.shared.connection()?;
        let registered = self.register(conn, &key_expr).await?;

        let mut core = self.shared.core.lock().await;
        if core.state != SessionState::Open {
            drop(core);
            self.discard_registration(conn, &key_expr, registered).await;
            return Err(SessionError::SessionClosed);
        }
        let (alias, duplicate) = match core.registrations.get_mut(&key_expr) {
            Some((active, alias)) => {
                *active += 1;
                (*alias, Some(registered))
            }
            None => {
                core.registrations.insert(key_expr.clone(), (1, registered));
                (registered, None)
            }
        };
        let declaration = DeclarationId(core.declarations.insert(key_expr.clone()));
        drop(core);

        if let Some(duplicate) = duplicate {
            self.discard_registration(conn, &key_expr, duplicate).await;
        }
        Ok(self.declared(declaration, key_expr, alias, options))
    }

    fn declared(
        &self,
        declaration: DeclarationId,
        key_expr: KeyExpr,
        alias: Option<Alias>,
        options: PublisherOptions,
    ) -> Publisher {
        info!(
            event = events::PUBLISHER_DECLARE_OK,
            component = COMPONENT,
            session = %self.id,
            %declaration,
            %key_expr,
            alias = %fields::format_alias(alias),
            "publisher declared"
        );
        Publisher::new(self.id, declaration, key_expr, alias, options)
    }

    async fn register(
        &self,
        conn: ConnectionId,
        key_expr: &KeyExpr,
    ) -> Result<Option<Alias>, SessionError> {
        let session = self.id;
        let declare_timeout = self.shared.config.declare_timeout;

        let registered = match timeout(
            declare_timeout,
            self.shared.transport.register(conn, key_expr),
        )
        .await
        {
            Ok(result) => result.map_err(|err| err.into_declaration_error()),
            Err(_) => Err(SessionError::DeclarationError(format!(
                "no answer for `{key_expr}` within {declare_timeout:?}"
            ))),
        };

        match &registered {
            Ok(alias) => debug!(
                event = events::REGISTRATION_ADD,
                component = COMPONENT,
                %session,
                %key_expr,
                alias = %fields::format_alias(*alias),
                "registered key expression"
            ),
            Err(err) => warn!(
                event = events::PUBLISHER_DECLARE_FAILED,
                component = COMPONENT,
                %session,
                %key_expr,
                err = %err,
                "unable to register key expression"
            ),
        }
        registered
    }

    /// Withdraws a registration that lost a race, either to a concurrent declaration of
    /// the same key expression or to close.
    async fn discard_registration(
        &self,
        conn: ConnectionId,
        key_expr: &KeyExpr,
        alias: Option<Alias>,
    ) {
        if let Err(err) = self.shared.unregister(conn, key_expr, alias).await {
            debug!(
                event = events::REGISTRATION_RELEASE_FAILED,
                component = COMPONENT,
                session = %self.id,
                %key_expr,
                alias = %fields::format_alias(alias),
                err = %err,
                "unable to withdraw surplus registration"
            );
        }
    }

    /// Undeclares a publisher through the session that owns it.
    ///
    /// # Errors
    /// `OwnershipViolation` if `publisher` was declared on another session. The publisher is
    /// handed back untouched with the error and stays declared on its own session. Errors
    /// from the undeclare itself come back without a publisher, which is consumed by then.
    pub async fn undeclare_publisher(
        &self,
        publisher: Publisher,
    ) -> Result<(), (SessionError, Option<Publisher>)> {
        if publisher.session_id() != self.id {
            warn!(
                component = COMPONENT,
                session = %self.id,
                owner = %publisher.session_id(),
                key_expr = %publisher.key_expr(),
                "publisher belongs to another session"
            );
            return Err((SessionError::OwnershipViolation, Some(publisher)));
        }
        publisher.undeclare().await.map_err(|err| (err, None))
    }

    /// Closes the session.
    ///
    /// In-flight puts are woken and fail with `SessionClosed`, every registration is
    /// withdrawn concurrently, then the connection is released.
    ///
    /// # Errors
    /// `CloseIncomplete` with every individual failure when some release did not succeed.
    /// The connection is released regardless.
    pub async fn close(self) -> Result<(), SessionError> {
        self.shared.close(self.id).await
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("zid", &self.shared.zid)
            .field("closing", &self.shared.is_closing())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.shared.is_closed() {
            return;
        }

        let session = self.id;
        let interrupted = self.shared.closing.send_replace(true);
        if interrupted {
            warn!(
                event = events::SESSION_CLOSE_INTERRUPTED,
                component = COMPONENT,
                %session,
                "close did not finish, completing it in background"
            );
        } else {
            warn!(
                event = events::SESSION_DROPPED_OPEN,
                component = COMPONENT,
                %session,
                "session dropped while open, closing in background"
            );
        }

        let shared = Arc::clone(&self.shared);
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(err) = shared.teardown(session).await {
                        warn!(component = COMPONENT, %session, err = %err, "background close failed");
                    }
                });
            }
            Err(_) => {
                shared.connection.store(None);
                shared.closed.store(true, Ordering::Release);
                registry::remove(session);
                warn!(
                    component = COMPONENT,
                    %session,
                    "no runtime available, connection detached without disconnect"
                );
            }
        }
    }
}

#[async_trait]
impl Release for Session {
    fn released_error() -> SessionError {
        SessionError::SessionClosed
    }

    async fn release(self) -> Result<(), SessionError> {
        self.close().await
    }
}
