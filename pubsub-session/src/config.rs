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

//! Session configuration.
//!
//! The configuration is a flat key/value set. Values are JSON so the same entry points serve
//! programmatic use (`insert_json("mode", "\"client\"")`) and file loaders. Nothing here touches
//! the network; [`Config::validate`] runs before any connection attempt.

use crate::encoding::Encoding;
use crate::error::SessionError;
use crate::publication::{CongestionControl, Priority};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const KEY_MODE: &str = "mode";
pub const KEY_CONNECT_ENDPOINTS: &str = "connect/endpoints";
pub const KEY_LISTEN_ENDPOINTS: &str = "listen/endpoints";
pub const KEY_CONGESTION_CONTROL: &str = "publication/congestion_control";
pub const KEY_ENCODING: &str = "publication/encoding";
pub const KEY_PRIORITY: &str = "publication/priority";
pub const KEY_OPEN_TIMEOUT_MS: &str = "timeouts/open_ms";
pub const KEY_DECLARE_TIMEOUT_MS: &str = "timeouts/declare_ms";
pub const KEY_CLOSE_TIMEOUT_MS: &str = "timeouts/close_ms";
pub const KEY_PUT_TIMEOUT_MS: &str = "timeouts/put_ms";

/// Every key understood by [`Config::insert`].
pub const KNOWN_KEYS: &[&str] = &[
    KEY_MODE,
    KEY_CONNECT_ENDPOINTS,
    KEY_LISTEN_ENDPOINTS,
    KEY_CONGESTION_CONTROL,
    KEY_ENCODING,
    KEY_PRIORITY,
    KEY_OPEN_TIMEOUT_MS,
    KEY_DECLARE_TIMEOUT_MS,
    KEY_CLOSE_TIMEOUT_MS,
    KEY_PUT_TIMEOUT_MS,
];

/// Role the session plays on the network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WhatAmI {
    #[default]
    Peer,
    Client,
    Router,
}

impl FromStr for WhatAmI {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "peer" => Ok(WhatAmI::Peer),
            "client" => Ok(WhatAmI::Client),
            "router" => Ok(WhatAmI::Router),
            other => Err(SessionError::InvalidConfig(format!("unknown mode `{other}`"))),
        }
    }
}

impl Display for WhatAmI {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WhatAmI::Peer => "peer",
            WhatAmI::Client => "client",
            WhatAmI::Router => "router",
        })
    }
}

/// Configuration consumed by `Session::open`.
///
/// Publication defaults left at `None` fall back to the library defaults
/// (`application/octet-stream`, `Drop`, `Data`).
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub mode: WhatAmI,
    pub connect: Vec<String>,
    pub listen: Vec<String>,
    pub congestion_control: Option<CongestionControl>,
    pub encoding: Option<Encoding>,
    pub priority: Option<Priority>,
    pub open_timeout: Duration,
    pub declare_timeout: Duration,
    pub close_timeout: Duration,
    pub put_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: WhatAmI::default(),
            connect: Vec::new(),
            listen: Vec::new(),
            congestion_control: None,
            encoding: None,
            priority: None,
            open_timeout: Duration::from_secs(10),
            declare_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(5),
            put_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// A client configuration connecting to the given endpoints.
    pub fn client<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: WhatAmI::Client,
            connect: endpoints.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Sets `key` from a JSON-encoded value.
    pub fn insert_json(&mut self, key: &str, json: &str) -> Result<(), SessionError> {
        let value: Value = serde_json::from_str(json).map_err(|error| {
            SessionError::InvalidConfig(format!("`{key}`: value is not valid JSON: {error}"))
        })?;
        self.insert(key, &value)
    }

    /// Sets `key` from an already parsed JSON value.
    pub fn insert(&mut self, key: &str, value: &Value) -> Result<(), SessionError> {
        debug!(key, %value, "config insert");
        match key {
            KEY_MODE => self.mode = as_str(key, value)?.parse()?,
            KEY_CONNECT_ENDPOINTS => self.connect = as_string_list(key, value)?,
            KEY_LISTEN_ENDPOINTS => self.listen = as_string_list(key, value)?,
            KEY_CONGESTION_CONTROL => {
                self.congestion_control = Some(as_str(key, value)?.parse()?)
            }
            KEY_ENCODING => {
                self.encoding = Some(Encoding::parse(as_str(key, value)?).map_err(|e| {
                    SessionError::InvalidConfig(format!("`{key}`: {e}"))
                })?)
            }
            KEY_PRIORITY => {
                self.priority = Some(match value {
                    Value::Number(n) => {
                        let raw = n.as_u64().and_then(|n| u8::try_from(n).ok()).ok_or_else(
                            || SessionError::InvalidConfig(format!("`{key}`: expected 1..=7")),
                        )?;
                        Priority::try_from(raw)?
                    }
                    _ => as_str(key, value)?.parse()?,
                })
            }
            KEY_OPEN_TIMEOUT_MS => self.open_timeout = as_millis(key, value)?,
            KEY_DECLARE_TIMEOUT_MS => self.declare_timeout = as_millis(key, value)?,
            KEY_CLOSE_TIMEOUT_MS => self.close_timeout = as_millis(key, value)?,
            KEY_PUT_TIMEOUT_MS => self.put_timeout = as_millis(key, value)?,
            unknown => {
                return Err(SessionError::InvalidConfig(format!(
                    "unknown key `{unknown}`"
                )))
            }
        }
        Ok(())
    }

    /// Returns the JSON encoding of the value stored under `key`.
    pub fn get_json(&self, key: &str) -> Option<String> {
        let value = match key {
            KEY_MODE => Value::from(self.mode.to_string()),
            KEY_CONNECT_ENDPOINTS => Value::from(self.connect.clone()),
            KEY_LISTEN_ENDPOINTS => Value::from(self.listen.clone()),
            KEY_CONGESTION_CONTROL => match self.congestion_control? {
                CongestionControl::Block => Value::from("block"),
                CongestionControl::Drop => Value::from("drop"),
            },
            KEY_ENCODING => Value::from(self.encoding.as_ref()?.to_string()),
            KEY_PRIORITY => Value::from(self.priority? as u8),
            KEY_OPEN_TIMEOUT_MS => Value::from(self.open_timeout.as_millis() as u64),
            KEY_DECLARE_TIMEOUT_MS => Value::from(self.declare_timeout.as_millis() as u64),
            KEY_CLOSE_TIMEOUT_MS => Value::from(self.close_timeout.as_millis() as u64),
            KEY_PUT_TIMEOUT_MS => Value::from(self.put_timeout.as_millis() as u64),
            _ => return None,
        };
        Some(value.to_string())
    }

    /// Checks the configuration is usable. Pure; calling it twice gives the same answer.
    pub fn validate(&self) -> Result<(), SessionError> {
        for endpoint in self.connect.iter().chain(self.listen.iter()) {
            validate_endpoint(endpoint)?;
        }
        if self.mode == WhatAmI::Client && self.connect.is_empty() {
            return Err(SessionError::InvalidConfig(
                "client mode needs at least one connect endpoint".to_string(),
            ));
        }
        for (name, timeout) in [
            (KEY_OPEN_TIMEOUT_MS, self.open_timeout),
            (KEY_DECLARE_TIMEOUT_MS, self.declare_timeout),
            (KEY_CLOSE_TIMEOUT_MS, self.close_timeout),
            (KEY_PUT_TIMEOUT_MS, self.put_timeout),
        ] {
            if timeout.is_zero() {
                return Err(SessionError::InvalidConfig(format!(
                    "`{name}` must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

/// Endpoints are written `<protocol>/<address>`, e.g. `tcp/127.0.0.1:7447`.
fn validate_endpoint(endpoint: &str) -> Result<(), SessionError> {
    match endpoint.split_once('/') {
        Some((protocol, address))
            if !protocol.is_empty()
                && !address.is_empty()
                && protocol.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') =>
        {
            Ok(())
        }
        _ => Err(SessionError::InvalidConfig(format!(
            "malformed endpoint `{endpoint}`, expected <protocol>/<address>"
        ))),
    }
}

fn as_str<'a>(key: &str, value: &'a Value) -> Result<&'a str, SessionError> {
    value
        .as_str()
        .ok_or_else(|| SessionError::InvalidConfig(format!("`{key}`: expected a string")))
}

fn as_string_list(key: &str, value: &Value) -> Result<Vec<String>, SessionError> {
    let Some(items) = value.as_array() else {
        return Err(SessionError::InvalidConfig(format!(
            "`{key}`: expected an array of strings"
        )));
    };
    items
        .iter()
        .map(|item| as_str(key, item).map(str::to_string))
        .collect()
}

fn as_millis(key: &str, value: &Value) -> Result<Duration, SessionError> {
    value.as_u64().map(Duration::from_millis).ok_or_else(|| {
        SessionError::InvalidConfig(format!("`{key}`: expected milliseconds as an integer"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_peer() {
        let config = Config::default();
        assert_eq!(config.mode, WhatAmI::Peer);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn insert_json_sets_known_keys() {
        let mut config = Config::default();
        config.insert_json(KEY_MODE, "\"client\"").unwrap();
        config
            .insert_json(KEY_CONNECT_ENDPOINTS, r#"["tcp/127.0.0.1:7447"]"#)
            .unwrap();
        config.insert_json(KEY_CONGESTION_CONTROL, "\"block\"").unwrap();
        config.insert_json(KEY_ENCODING, "\"text/plain\"").unwrap();
        config.insert_json(KEY_PRIORITY, "2").unwrap();
        config.insert_json(KEY_PUT_TIMEOUT_MS, "250").unwrap();

        assert_eq!(config.mode, WhatAmI::Client);
        assert_eq!(config.connect, vec!["tcp/127.0.0.1:7447".to_string()]);
        assert_eq!(config.congestion_control, Some(CongestionControl::Block));
        assert_eq!(config.encoding, Some(Encoding::TEXT_PLAIN));
        assert_eq!(config.priority, Some(Priority::InteractiveHigh));
        assert_eq!(config.put_timeout, Duration::from_millis(250));
        assert_eq!(config.get_json(KEY_MODE).as_deref(), Some("\"client\""));
        assert_eq!(config.get_json(KEY_PUT_TIMEOUT_MS).as_deref(), Some("250"));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn insert_rejects_unknown_keys_and_bad_values() {
        let mut config = Config::default();
        assert!(config.insert_json("scouting/multicast", "true").is_err());
        assert!(config.insert_json(KEY_MODE, "client").is_err());
        assert!(config.insert_json(KEY_PRIORITY, "9").is_err());
        assert!(config.insert_json(KEY_ENCODING, "\"video/mp4\"").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn validate_catches_unusable_settings() {
        let mut client = Config::default();
        client.mode = WhatAmI::Client;
        assert!(matches!(
            client.validate(),
            Err(SessionError::InvalidConfig(_))
        ));

        let bad_endpoint = Config::client(["127.0.0.1:7447"]);
        assert!(bad_endpoint.validate().is_err());
        assert_eq!(bad_endpoint.validate(), bad_endpoint.validate());

        let zero_timeout = Config {
            open_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());
    }
}
