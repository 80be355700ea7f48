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

use pubsub_session::{Config, SessionError, KNOWN_KEYS};
use serde_json::{Map, Value};
use std::fs::{self, canonicalize};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Loads a session [`Config`] from a JSON file.
///
/// Keys may be written flat (`"timeouts/put_ms": 500`) or nested
/// (`{"timeouts": {"put_ms": 500}}`). Unknown keys are logged and skipped; a known key with a
/// bad value fails the whole load.
pub struct StaticConfigFile {
    static_file: String,
}

impl StaticConfigFile {
    pub fn new(static_file: impl Into<String>) -> Self {
        Self {
            static_file: static_file.into(),
        }
    }

    fn canonicalized_static_file_path(&self) -> Result<PathBuf, SessionError> {
        let config_json_file = PathBuf::from(self.static_file.clone());
        debug!("config_json_file: {config_json_file:?}");

        let canonicalized_result = canonicalize(config_json_file);
        debug!("canonicalize: {canonicalized_result:?}");

        canonicalized_result.map_err(|error| {
            SessionError::InvalidConfig(format!("Static config file not found: {error:?}"))
        })
    }

    fn read_static_config_json(&self) -> Result<Value, SessionError> {
        let config_json_file = self.canonicalized_static_file_path()?;
        let data = fs::read_to_string(config_json_file).map_err(|error| {
            SessionError::InvalidConfig(format!("Unable to read file: {error:?}"))
        })?;

        serde_json::from_str(&data)
            .map_err(|error| SessionError::InvalidConfig(format!("Unable to parse JSON: {error:?}")))
    }

    pub fn load(&self) -> Result<Config, SessionError> {
        let value = self.read_static_config_json()?;
        let Some(entries) = value.as_object() else {
            return Err(SessionError::InvalidConfig(
                "Static config file must be a JSON object".to_string(),
            ));
        };

        let mut config = Config::default();
        apply_entries(&mut config, "", entries)?;
        debug!("Finished reading config\n{config:#?}");
        Ok(config)
    }
}

fn apply_entries(
    config: &mut Config,
    prefix: &str,
    entries: &Map<String, Value>,
) -> Result<(), SessionError> {
    for (key, value) in entries {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}/{key}")
        };

        if KNOWN_KEYS.contains(&path.as_str()) {
            config.insert(&path, value)?;
        } else if let Some(nested) = value.as_object() {
            apply_entries(config, &path, nested)?;
        } else {
            warn!("Ignoring unknown config key '{path}'");
        }
    }
    Ok(())
}
