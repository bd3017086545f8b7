//! Channel identifier classification and resolution.
//!
//! Identifiers come from configuration in one of three shapes: `@handle`,
//! a numeric id (optionally `-`-prefixed), or any other string. Each shape
//! is normalised into a [`LookupQuery`] and handed to the one platform
//! lookup primitive. Failures are logged and returned, never retried.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::platform::{ChannelRef, LookupQuery, Platform, PlatformError};

/// Errors from resolving a channel identifier.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The identifier cannot be turned into a lookup query.
    #[error("malformed channel identifier {identifier:?}: {reason}")]
    Malformed {
        /// Identifier as configured.
        identifier: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The platform could not find or access the channel.
    #[error("failed to resolve {identifier:?}: {source}")]
    Lookup {
        /// Identifier as configured.
        identifier: String,
        /// Platform error.
        source: PlatformError,
    },
}

/// A channel identifier as supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelIdentifier(String);

impl ChannelIdentifier {
    /// Wrap a raw identifier string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The identifier exactly as configured.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classify the identifier by shape.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::Malformed`] for blank identifiers, a bare
    /// `@`, or numeric ids that overflow `i64`.
    pub fn classify(&self) -> Result<LookupQuery, ResolutionError> {
        let raw = self.0.trim();
        let malformed = |reason| ResolutionError::Malformed {
            identifier: self.0.clone(),
            reason,
        };

        if raw.is_empty() {
            return Err(malformed("identifier is empty"));
        }

        if let Some(handle) = raw.strip_prefix('@') {
            if handle.is_empty() {
                return Err(malformed("handle is empty"));
            }
            return Ok(LookupQuery::Handle(raw.to_owned()));
        }

        let digits = raw.strip_prefix('-').unwrap_or(raw);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return raw
                .parse::<i64>()
                .map(LookupQuery::Id)
                .map_err(|_| malformed("numeric id out of range"));
        }

        Ok(LookupQuery::Name(raw.to_owned()))
    }
}

impl fmt::Display for ChannelIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelIdentifier {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ChannelIdentifier {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Resolves identifiers against a shared platform connection.
pub struct EntityResolver<P: ?Sized> {
    platform: Arc<P>,
}

impl<P: ?Sized> Clone for EntityResolver<P> {
    fn clone(&self) -> Self {
        Self {
            platform: Arc::clone(&self.platform),
        }
    }
}

impl<P: Platform + ?Sized> EntityResolver<P> {
    /// Create a resolver over the shared platform handle.
    pub fn new(platform: Arc<P>) -> Self {
        Self { platform }
    }

    /// Resolve an identifier to a channel reference.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError`] when the identifier is malformed or the
    /// platform lookup fails. Both cases are logged with the original
    /// identifier.
    pub async fn resolve(
        &self,
        identifier: &ChannelIdentifier,
    ) -> Result<ChannelRef, ResolutionError> {
        let query = identifier.classify().inspect_err(|e| {
            error!(identifier = %identifier, error = %e, "rejected channel identifier");
        })?;

        match self.platform.lookup(&query).await {
            Ok(channel) => {
                info!(
                    identifier = %identifier,
                    channel_id = channel.id,
                    channel = %channel.label(),
                    "resolved channel"
                );
                Ok(channel)
            }
            Err(source) => {
                error!(identifier = %identifier, %query, error = %source, "failed to resolve channel");
                Err(ResolutionError::Lookup {
                    identifier: identifier.as_str().to_owned(),
                    source,
                })
            }
        }
    }
}
