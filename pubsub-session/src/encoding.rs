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

//! Payload encodings.
//!
//! An [`Encoding`] is a well-known prefix plus an optional free-form suffix. The prefix set
//! is closed and numbered so it travels as a single byte; anything else goes through the
//! `application/custom` prefix with the user tag as suffix.

use crate::error::SessionError;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

macro_rules! encoding_prefixes {
    ($($variant:ident = $id:literal => $mime:literal,)+) => {
        /// Well-known encoding prefixes.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum EncodingPrefix {
            $($variant = $id,)+
        }

        impl EncodingPrefix {
            pub const ALL: &'static [EncodingPrefix] = &[$(EncodingPrefix::$variant,)+];

            pub fn id(self) -> u8 {
                self as u8
            }

            pub fn from_id(id: u8) -> Option<Self> {
                match id {
                    $($id => Some(EncodingPrefix::$variant),)+
                    _ => None,
                }
            }

            pub fn mime(self) -> &'static str {
                match self {
                    $(EncodingPrefix::$variant => $mime,)+
                }
            }
        }
    };
}

encoding_prefixes! {
    Empty = 0 => "",
    AppOctetStream = 1 => "application/octet-stream",
    AppCustom = 2 => "application/custom",
    TextPlain = 3 => "text/plain",
    AppProperties = 4 => "application/properties",
    AppJson = 5 => "application/json",
    AppSql = 6 => "application/sql",
    AppInteger = 7 => "application/integer",
    AppFloat = 8 => "application/float",
    AppXml = 9 => "application/xml",
    AppXhtmlXml = 10 => "application/xhtml+xml",
    AppXWwwFormUrlencoded = 11 => "application/x-www-form-urlencoded",
    TextJson = 12 => "text/json",
    TextHtml = 13 => "text/html",
    TextXml = 14 => "text/xml",
    TextCss = 15 => "text/css",
    TextCsv = 16 => "text/csv",
    TextJavascript = 17 => "text/javascript",
    ImageJpeg = 18 => "image/jpeg",
    ImagePng = 19 => "image/png",
    ImageGif = 20 => "image/gif",
}

/// Encoding tag attached to every publication.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Encoding {
    prefix: EncodingPrefix,
    suffix: Option<String>,
}

impl Encoding {
    pub const EMPTY: Encoding = Encoding::from_prefix(EncodingPrefix::Empty);
    pub const APP_OCTET_STREAM: Encoding = Encoding::from_prefix(EncodingPrefix::AppOctetStream);
    pub const TEXT_PLAIN: Encoding = Encoding::from_prefix(EncodingPrefix::TextPlain);
    pub const APP_JSON: Encoding = Encoding::from_prefix(EncodingPrefix::AppJson);
    pub const TEXT_JSON: Encoding = Encoding::from_prefix(EncodingPrefix::TextJson);

    pub const fn from_prefix(prefix: EncodingPrefix) -> Self {
        Self {
            prefix,
            suffix: None,
        }
    }

    /// A prefix refined with a suffix, e.g. `text/plain;charset=utf-8`.
    pub fn with_suffix(prefix: EncodingPrefix, suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        Self {
            prefix,
            suffix: (!suffix.is_empty()).then_some(suffix),
        }
    }

    /// User-defined encoding carried under the `application/custom` prefix.
    pub fn custom(tag: impl Into<String>) -> Self {
        Self {
            prefix: EncodingPrefix::AppCustom,
            suffix: Some(tag.into()),
        }
    }

    /// Builds an encoding from its numeric prefix.
    ///
    /// # Errors
    /// `UnsupportedEncoding` if `id` is not a known prefix.
    pub fn from_id(id: u8, suffix: Option<&str>) -> Result<Self, SessionError> {
        let prefix = EncodingPrefix::from_id(id)
            .ok_or_else(|| SessionError::UnsupportedEncoding(format!("prefix id {id}")))?;
        Ok(match suffix {
            Some(suffix) => Encoding::with_suffix(prefix, suffix),
            None => Encoding::from_prefix(prefix),
        })
    }

    /// Parses a MIME-like tag. The longest known prefix wins and the rest becomes the suffix.
    ///
    /// # Errors
    /// `UnsupportedEncoding` when no known prefix matches.
    pub fn parse(tag: &str) -> Result<Self, SessionError> {
        if tag.is_empty() {
            return Ok(Encoding::EMPTY);
        }
        let prefix = EncodingPrefix::ALL
            .iter()
            .copied()
            .filter(|p| p.id() != 0 && tag.starts_with(p.mime()))
            .max_by_key(|p| p.mime().len())
            .ok_or_else(|| SessionError::UnsupportedEncoding(tag.to_string()))?;

        Ok(Encoding::with_suffix(prefix, &tag[prefix.mime().len()..]))
    }

    pub fn prefix(&self) -> EncodingPrefix {
        self.prefix
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// Checks the encoding can be put on the wire.
    pub(crate) fn validate(&self) -> Result<(), SessionError> {
        if self.prefix == EncodingPrefix::AppCustom && self.suffix.is_none() {
            return Err(SessionError::UnsupportedEncoding(
                "application/custom without a tag".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::APP_OCTET_STREAM
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix.mime())?;
        if let Some(suffix) = &self.suffix {
            f.write_str(suffix)?;
        }
        Ok(())
    }
}

impl FromStr for Encoding {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Encoding::parse(s)
    }
}

impl From<EncodingPrefix> for Encoding {
    fn from(prefix: EncodingPrefix) -> Self {
        Encoding::from_prefix(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::{Encoding, EncodingPrefix};
    use crate::error::SessionError;

    #[test]
    fn parse_picks_longest_known_prefix() {
        let encoding = Encoding::parse("text/plain;charset=utf-8").expect("known prefix");
        assert_eq!(encoding.prefix(), EncodingPrefix::TextPlain);
        assert_eq!(encoding.suffix(), Some(";charset=utf-8"));

        let xhtml = Encoding::parse("application/xhtml+xml").expect("known prefix");
        assert_eq!(xhtml.prefix(), EncodingPrefix::AppXhtmlXml);
        assert_eq!(xhtml.suffix(), None);
    }

    #[test]
    fn unknown_mime_is_unsupported() {
        assert_eq!(
            Encoding::parse("video/mp4"),
            Err(SessionError::UnsupportedEncoding("video/mp4".to_string()))
        );
        assert!(matches!(
            Encoding::from_id(200, None),
            Err(SessionError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn custom_tag_travels_under_custom_prefix() {
        let encoding = Encoding::custom("vnd.example.telemetry");
        assert_eq!(encoding.prefix(), EncodingPrefix::AppCustom);
        assert_eq!(encoding.to_string(), "application/customvnd.example.telemetry");
        assert_eq!(encoding.validate(), Ok(()));
        assert!(Encoding::from_prefix(EncodingPrefix::AppCustom)
            .validate()
            .is_err());
    }

    #[test]
    fn numeric_ids_are_stable() {
        assert_eq!(EncodingPrefix::TextPlain.id(), 3);
        assert_eq!(
            Encoding::from_id(5, None),
            Ok(Encoding::APP_JSON)
        );
        assert_eq!(Encoding::default(), Encoding::APP_OCTET_STREAM);
    }
}
