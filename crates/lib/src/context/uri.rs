//! Database URIs of the form `<scheme>://<did>/<context>/<database>`
//!
//! Path segments escape `%` as `%25` and `/` as `%2F`.

use std::fmt;
use std::str::FromStr;

use super::ContextError;
use crate::account::Did;
use crate::constants::DEFAULT_URI_SCHEME;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseUri {
    pub scheme: String,
    pub did: Did,
    pub context_name: String,
    pub database_name: String,
}

impl DatabaseUri {
    /// URI with the default scheme.
    pub fn new(did: Did, context_name: impl Into<String>, database_name: impl Into<String>) -> Self {
        Self {
            scheme: DEFAULT_URI_SCHEME.to_string(),
            did,
            context_name: context_name.into(),
            database_name: database_name.into(),
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn parse(uri: &str) -> Result<Self, ContextError> {
        let invalid = |reason: &str| ContextError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| invalid("missing '://'"))?;
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(invalid("invalid scheme"));
        }

        let segments: Vec<&str> = rest.split('/').collect();
        let [did, context_name, database_name] = segments.as_slice() else {
            return Err(invalid("expected <did>/<context>/<database>"));
        };
        if did.is_empty() || context_name.is_empty() || database_name.is_empty() {
            return Err(invalid("empty path segment"));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            did: Did::new(decode_segment(did).map_err(|r| invalid(&r))?),
            context_name: decode_segment(context_name).map_err(|r| invalid(&r))?,
            database_name: decode_segment(database_name).map_err(|r| invalid(&r))?,
        })
    }
}

impl fmt::Display for DatabaseUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}/{}",
            self.scheme,
            encode_segment(self.did.as_str()),
            encode_segment(&self.context_name),
            encode_segment(&self.database_name)
        )
    }
}

impl FromStr for DatabaseUri {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn encode_segment(segment: &str) -> String {
    segment.replace('%', "%25").replace('/', "%2F")
}

fn decode_segment(segment: &str) -> Result<String, String> {
    let mut decoded = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(pos) = rest.find('%') {
        decoded.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3).unwrap_or(&rest[pos..]);
        match escape {
            "%25" => decoded.push('%'),
            "%2F" | "%2f" => decoded.push('/'),
            other => return Err(format!("unsupported escape '{other}'")),
        }
        rest = &rest[pos + escape.len()..];
    }
    decoded.push_str(rest);
    Ok(decoded)
}
