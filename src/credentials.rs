//! Read-only credential pool supplied with each request.

use crate::{Error, ErrorContext, Result};
use rand::seq::SliceRandom;
use rand::Rng;

/// Immutable list of vendor credentials; selection never mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPool {
    credentials: Vec<String>,
}

impl CredentialPool {
    pub fn new<I, S>(credentials: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let credentials: Vec<String> = credentials
            .into_iter()
            .map(|c| {
                let c: String = c.into();
                c.trim().to_string()
            })
            .filter(|c| !c.is_empty())
            .collect();
        if credentials.is_empty() {
            return Err(Error::validation_with_context(
                "no vendor credential supplied",
                ErrorContext::new()
                    .with_field_path("request.credentials")
                    .with_source("credential_pool"),
            ));
        }
        Ok(Self { credentials })
    }

    /// Parse an `Authorization` header value: an optional `Bearer ` prefix followed by
    /// comma-separated credentials.
    pub fn from_header(value: &str) -> Result<Self> {
        let value = value.trim();
        let list = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .unwrap_or(value);
        Self::new(list.split(','))
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Uniform random pick.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        self.credentials
            .choose(rng)
            .map(String::as_str)
            .unwrap_or_default()
    }
}
