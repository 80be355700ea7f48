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

//! Stable event names and field formatters for structured logs.

pub mod events {
    pub const SESSION_OPEN_START: &str = "session_open_start";
    pub const SESSION_OPEN_OK: &str = "session_open_ok";
    pub const SESSION_OPEN_FAILED: &str = "session_open_failed";
    pub const SESSION_CLOSE_START: &str = "session_close_start";
    pub const SESSION_CLOSE_OK: &str = "session_close_ok";
    pub const SESSION_CLOSE_INCOMPLETE: &str = "session_close_incomplete";
    pub const SESSION_CLOSE_INTERRUPTED: &str = "session_close_interrupted";
    pub const SESSION_DROPPED_OPEN: &str = "session_dropped_open";

    pub const PUBLISHER_DECLARE_OK: &str = "publisher_declare_ok";
    pub const PUBLISHER_DECLARE_FAILED: &str = "publisher_declare_failed";
    pub const PUBLISHER_UNDECLARE_OK: &str = "publisher_undeclare_ok";
    pub const PUBLISHER_DROPPED_DECLARED: &str = "publisher_dropped_declared";

    pub const REGISTRATION_ADD: &str = "registration_add";
    pub const REGISTRATION_REUSE: &str = "registration_reuse";
    pub const REGISTRATION_RELEASE: &str = "registration_release";
    pub const REGISTRATION_RELEASE_FAILED: &str = "registration_release_failed";

    pub const PUT_DROPPED: &str = "put_dropped";
    pub const PUT_FAILED: &str = "put_failed";
    pub const PUT_CANCELLED_BY_CLOSE: &str = "put_cancelled_by_close";
}

pub mod fields {
    use crate::publication::Alias;

    pub fn format_alias(alias: Option<Alias>) -> String {
        match alias {
            Some(alias) => format!("#{alias}"),
            None => "none".to_string(),
        }
    }

    pub fn format_errors<E: std::fmt::Display>(errors: &[E]) -> String {
        errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}
