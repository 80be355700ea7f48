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

//! Publishers: declared bindings of a key expression to a publication path.

use crate::encoding::Encoding;
use crate::error::SessionError;
use crate::handle::Release;
use crate::keyexpr::KeyExpr;
use crate::observability::{events, fields};
use crate::publication::{
    Alias, Attachment, CongestionControl, Priority, PublicationEncoder, SampleKind, WireKey,
};
use crate::registry;
use crate::session::{DeclarationId, SessionId};
use crate::transport::SendOutcome;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::{Debug, Formatter};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

const COMPONENT: &str = "publisher";

/// Defaults applied to every publication of a publisher.
///
/// `None` falls through to the session configuration, then to the library default.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublisherOptions {
    pub encoding: Option<Encoding>,
    pub congestion_control: Option<CongestionControl>,
    pub priority: Option<Priority>,
}

impl PublisherOptions {
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn congestion_control(mut self, congestion_control: CongestionControl) -> Self {
        self.congestion_control = Some(congestion_control);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Per-call overrides for [`Publisher::put`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PutOptions {
    pub encoding: Option<Encoding>,
    pub congestion_control: Option<CongestionControl>,
    pub priority: Option<Priority>,
    pub attachment: Option<Attachment>,
}

impl PutOptions {
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn congestion_control(mut self, congestion_control: CongestionControl) -> Self {
        self.congestion_control = Some(congestion_control);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Result of a successful `put`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Delivered,
    /// Discarded by the transport under [`CongestionControl::Drop`].
    Dropped,
}

impl From<SendOutcome> for PutOutcome {
    fn from(outcome: SendOutcome) -> Self {
        match outcome {
            SendOutcome::Delivered => PutOutcome::Delivered,
            SendOutcome::Dropped => PutOutcome::Dropped,
        }
    }
}

/// A declared publisher.
///
/// Safe to share between tasks (`&Publisher` is enough to `put`). Consumed by
/// [`Publisher::undeclare`]; dropping a declared publisher undeclares it in the background.
pub struct Publisher {
    session: SessionId,
    id: DeclarationId,
    key_expr: KeyExpr,
    alias: Option<Alias>,
    options: PublisherOptions,
    declared: bool,
}

impl Publisher {
    pub(crate) fn new(
        session: SessionId,
        id: DeclarationId,
        key_expr: KeyExpr,
        alias: Option<Alias>,
        options: PublisherOptions,
    ) -> Self {
        Self {
            session,
            id,
            key_expr,
            alias,
            options,
            declared: true,
        }
    }

    pub fn id(&self) -> DeclarationId {
        self.id
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    /// The canonical key expression this publisher was declared on.
    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    pub fn alias(&self) -> Option<Alias> {
        self.alias
    }

    pub fn options(&self) -> &PublisherOptions {
        &self.options
    }

    pub fn set_encoding(&mut self, encoding: Encoding) -> Result<(), SessionError> {
        encoding.validate()?;
        self.options.encoding = Some(encoding);
        Ok(())
    }

    pub fn set_congestion_control(&mut self, congestion_control: CongestionControl) {
        self.options.congestion_control = Some(congestion_control);
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.options.priority = Some(priority);
    }

    /// Publishes `payload`.
    ///
    /// Encoding, congestion control and priority resolve call options first, then the
    /// publisher defaults, then the session configuration, then the library defaults.
    /// Sequential puts from one task reach the transport in call order.
    ///
    /// # Errors
    /// * `SessionClosed` if the session is closed or starts closing while the put waits.
    /// * `UnsupportedEncoding` for an untagged custom encoding.
    /// * `PayloadTooLarge` when the transport refuses the size.
    /// * `TransportError` for I/O failures and for a `Block` put exceeding the put timeout.
    pub async fn put(
        &self,
        payload: impl Into<Bytes>,
        options: PutOptions,
    ) -> Result<PutOutcome, SessionError> {
        self.publish(payload.into(), SampleKind::Put, options).await
    }

    /// Publishes a deletion of the publisher's key expression.
    pub async fn delete(&self, options: PutOptions) -> Result<PutOutcome, SessionError> {
        self.publish(Bytes::new(), SampleKind::Delete, options).await
    }

    async fn publish(
        &self,
        payload: Bytes,
        kind: SampleKind,
        options: PutOptions,
    ) -> Result<PutOutcome, SessionError> {
        let shared = registry::lookup(self.session)?;
        let closing = shared.subscribe_closing();
        let conn = shared.connection()?;
        let config = shared.config();

        let encoding = options
            .encoding
            .or_else(|| self.options.encoding.clone())
            .or_else(|| config.encoding.clone())
            .unwrap_or_default();
        let congestion_control = options
            .congestion_control
            .or(self.options.congestion_control)
            .or(config.congestion_control)
            .unwrap_or_default();
        let priority = options
            .priority
            .or(self.options.priority)
            .or(config.priority)
            .unwrap_or_default();

        let target = match self.alias {
            Some(alias) => WireKey::Alias(alias),
            None => WireKey::KeyExpr(self.key_expr.clone()),
        };
        let mut publication = PublicationEncoder::encode(target, payload, &encoding)?;
        publication.kind = kind;
        publication.priority = priority;
        publication.attachment = options.attachment;

        trace!(
            component = COMPONENT,
            session = %self.session,
            key_expr = %self.key_expr,
            alias = %fields::format_alias(self.alias),
            size = publication.len(),
            ?congestion_control,
            "put"
        );

        let put_timeout = config.put_timeout;
        let send = timeout(
            put_timeout,
            shared
                .transport()
                .send(conn, publication, congestion_control),
        );

        let sent = tokio::select! {
            sent = send => sent,
            _ = closing_signalled(closing) => {
                debug!(
                    event = events::PUT_CANCELLED_BY_CLOSE,
                    component = COMPONENT,
                    session = %self.session,
                    key_expr = %self.key_expr,
                    "put cancelled, session is closing"
                );
                return Err(SessionError::SessionClosed);
            }
        };

        let result = match sent {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::TransportError(format!(
                "put on `{}` did not complete within {put_timeout:?}",
                self.key_expr
            ))),
        };
        match result {
            Ok(SendOutcome::Dropped) => {
                debug!(
                    event = events::PUT_DROPPED,
                    component = COMPONENT,
                    session = %self.session,
                    key_expr = %self.key_expr,
                    "publication dropped by congestion control"
                );
                Ok(PutOutcome::Dropped)
            }
            Ok(outcome) => Ok(outcome.into()),
            Err(err) => {
                warn!(
                    event = events::PUT_FAILED,
                    component = COMPONENT,
                    session = %self.session,
                    key_expr = %self.key_expr,
                    err = %err,
                    "put failed"
                );
                Err(err)
            }
        }
    }

    /// Undeclares the publisher, releasing its registration when it was the last user.
    ///
    /// # Errors
    /// `InvalidHandle` if the session already released this declaration (it was closed).
    pub async fn undeclare(mut self) -> Result<(), SessionError> {
        self.declared = false;
        let shared = registry::lookup(self.session).map_err(|_| SessionError::InvalidHandle)?;
        shared.release_declaration(self.session, self.id).await?;
        debug!(
            event = events::PUBLISHER_UNDECLARE_OK,
            component = COMPONENT,
            session = %self.session,
            declaration = %self.id,
            key_expr = %self.key_expr,
            "publisher undeclared"
        );
        Ok(())
    }
}

async fn closing_signalled(mut closing: watch::Receiver<bool>) {
    let signalled = closing.wait_for(|closing| *closing).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}

impl Debug for Publisher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("session", &self.session)
            .field("id", &self.id)
            .field("key_expr", &self.key_expr)
            .field("alias", &self.alias)
            .finish()
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if !self.declared {
            return;
        }
        let Ok(shared) = registry::lookup(self.session) else {
            return;
        };

        warn!(
            event = events::PUBLISHER_DROPPED_DECLARED,
            component = COMPONENT,
            session = %self.session,
            key_expr = %self.key_expr,
            "publisher dropped while declared, undeclaring in background"
        );
        let (session, declaration) = (self.session, self.id);
        if let Ok(runtime) = Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) = shared.release_declaration(session, declaration).await {
                    debug!(component = COMPONENT, %session, err = %err, "background undeclare failed");
                }
            });
        }
    }
}

#[async_trait]
impl Release for Publisher {
    fn released_error() -> SessionError {
        SessionError::PublisherUndeclared
    }

    async fn release(self) -> Result<(), SessionError> {
        self.undeclare().await
    }
}
