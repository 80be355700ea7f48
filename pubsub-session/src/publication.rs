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

//! Publications and the metadata attached to them.

use crate::encoding::Encoding;
use crate::error::SessionError;
use crate::keyexpr::KeyExpr;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Numeric identifier a router may hand out for a declared key expression.
pub type Alias = u64;

/// Free-form metadata that travels next to the payload.
pub type Attachment = BTreeMap<String, String>;

/// What the publisher does when the transport has no capacity left.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CongestionControl {
    /// Suspend the caller until the transport accepts the publication.
    Block,
    /// Discard the publication. This is an intentional data-loss policy, not a failure.
    #[default]
    Drop,
}

impl FromStr for CongestionControl {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(CongestionControl::Block),
            "drop" => Ok(CongestionControl::Drop),
            other => Err(SessionError::InvalidConfig(format!(
                "unknown congestion control `{other}`"
            ))),
        }
    }
}

/// Publication priority, from most to least urgent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    RealTime = 1,
    InteractiveHigh = 2,
    InteractiveLow = 3,
    DataHigh = 4,
    #[default]
    Data = 5,
    DataLow = 6,
    Background = 7,
}

impl TryFrom<u8> for Priority {
    type Error = SessionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::RealTime),
            2 => Ok(Priority::InteractiveHigh),
            3 => Ok(Priority::InteractiveLow),
            4 => Ok(Priority::DataHigh),
            5 => Ok(Priority::Data),
            6 => Ok(Priority::DataLow),
            7 => Ok(Priority::Background),
            other => Err(SessionError::InvalidConfig(format!(
                "priority {other} out of range 1..=7"
            ))),
        }
    }
}

impl FromStr for Priority {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "real_time" => Ok(Priority::RealTime),
            "interactive_high" => Ok(Priority::InteractiveHigh),
            "interactive_low" => Ok(Priority::InteractiveLow),
            "data_high" => Ok(Priority::DataHigh),
            "data" => Ok(Priority::Data),
            "data_low" => Ok(Priority::DataLow),
            "background" => Ok(Priority::Background),
            other => Err(SessionError::InvalidConfig(format!(
                "unknown priority `{other}`"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SampleKind {
    #[default]
    Put,
    Delete,
}

/// How a publication names its destination on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WireKey {
    Alias(Alias),
    KeyExpr(KeyExpr),
}

impl Display for WireKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WireKey::Alias(alias) => write!(f, "#{alias}"),
            WireKey::KeyExpr(key_expr) => write!(f, "{key_expr}"),
        }
    }
}

/// A wire-ready publication. Built per `put` and handed to the transport by value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publication {
    pub target: WireKey,
    pub payload: Bytes,
    pub encoding: Encoding,
    pub kind: SampleKind,
    pub priority: Priority,
    pub attachment: Option<Attachment>,
}

impl Publication {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Turns a raw payload and an encoding tag into a [`Publication`].
///
/// Stateless. The returned publication targets the given `target` and carries default
/// priority and no attachment; callers refine those fields afterwards.
pub struct PublicationEncoder;

impl PublicationEncoder {
    pub fn encode(
        target: WireKey,
        payload: impl Into<Bytes>,
        encoding: &Encoding,
    ) -> Result<Publication, SessionError> {
        encoding.validate()?;
        Ok(Publication {
            target,
            payload: payload.into(),
            encoding: encoding.clone(),
            kind: SampleKind::Put,
            priority: Priority::default(),
            attachment: None,
        })
    }
}
