//! Client authorization
//!
//! Each endpoint declares the [`AccessRole`] a client needs. An [`Authorizer`]
//! decides, per request, which [`AccessLevel`] the client is granted.
//!
//! The default [`AccessList`] recognises clients by the DN of their client
//! certificate, as forwarded by the TLS-terminating proxy in a header, or by
//! their IP address. Certificate verification itself happens in the proxy.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use axum::http::HeaderName;
use serde::{Deserialize, Serialize};

use crate::config::AccessConfig;
use crate::error::{Error, Result};
use crate::pipeline::RequestInfo;

/// Access an endpoint requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRole {
    /// Anyone may call the endpoint
    Public,
    Read,
    Write,
}

impl AccessRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for AccessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a client was let in, or that it was not
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessLevel {
    Denied,
    Public,
    DnRole,
    IpRole,
    DnWhitelist,
    IpWhitelist,
}

impl AccessLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Denied => "denied",
            Self::Public => "public",
            Self::DnRole => "dn_role",
            Self::IpRole => "ip_role",
            Self::DnWhitelist => "dn_whitelist",
            Self::IpWhitelist => "ip_whitelist",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of authorizing one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub level: AccessLevel,
    /// Log line explaining the decision
    pub message: String,
    /// Who the client is, when known
    pub subject: Option<String>,
}

impl Authorization {
    pub fn new(level: AccessLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            subject: None,
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn allowed(&self) -> bool {
        self.level != AccessLevel::Denied
    }
}

/// Decides whether a request may call an endpoint requiring `role`
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    async fn authorize(&self, request: &RequestInfo, role: AccessRole) -> Authorization;
}

/// Kind of a configured accessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessorKind {
    /// Certificate DN granted read, and write when flagged
    DnRole,
    /// Certificate DN granted everything
    DnWhitelist,
    /// IP address granted read, and write when flagged
    IpRole,
    /// IP address granted everything
    IpWhitelist,
}

#[derive(Debug, Clone, Copy)]
struct Accessor {
    kind: AccessorKind,
    write: bool,
}

impl Accessor {
    fn grants(&self, role: AccessRole) -> bool {
        role == AccessRole::Read || (role == AccessRole::Write && self.write)
    }
}

/// Authorizer over the configured accessor list
#[derive(Debug, Clone)]
pub struct AccessList {
    dn_header: HeaderName,
    accessors: HashMap<String, Accessor>,
}

impl AccessList {
    pub fn from_config(config: &AccessConfig) -> Result<Self> {
        let dn_header = HeaderName::try_from(config.dn_header.as_str()).map_err(|e| {
            Error::Internal(format!("invalid DN header '{}': {}", config.dn_header, e))
        })?;

        let accessors = config
            .accessors
            .iter()
            .filter(|a| a.active)
            .map(|a| {
                (
                    a.name.clone(),
                    Accessor {
                        kind: a.kind,
                        write: a.write,
                    },
                )
            })
            .collect::<HashMap<_, _>>();

        tracing::info!(accessors = accessors.len(), "access list loaded");

        Ok(Self {
            dn_header,
            accessors,
        })
    }

    fn authorize_dn(&self, dn: &str, role: AccessRole) -> Option<Authorization> {
        let accessor = self.accessors.get(dn)?;
        match accessor.kind {
            AccessorKind::DnRole if accessor.grants(role) => Some(Authorization::new(
                AccessLevel::DnRole,
                format!("cert matches authorized role {role} DN {dn}"),
            )),
            AccessorKind::DnWhitelist => Some(Authorization::new(
                AccessLevel::DnWhitelist,
                format!("cert matches whitelisted DN {dn}"),
            )),
            _ => None,
        }
    }

    fn authorize_ip(&self, ip: &str, role: AccessRole) -> Option<Authorization> {
        let accessor = self.accessors.get(ip)?;
        match accessor.kind {
            AccessorKind::IpRole if accessor.grants(role) => Some(Authorization::new(
                AccessLevel::IpRole,
                format!("ignoring DN of authorized IP {ip} with role {role}"),
            )),
            AccessorKind::IpWhitelist => Some(Authorization::new(
                AccessLevel::IpWhitelist,
                format!("ignoring DN of whitelisted IP {ip}"),
            )),
            _ => None,
        }
    }
}

#[async_trait]
impl Authorizer for AccessList {
    async fn authorize(&self, request: &RequestInfo, role: AccessRole) -> Authorization {
        let dn = request
            .headers
            .get(&self.dn_header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|dn| !dn.is_empty());
        let ip = request.client_ip.map(|ip| ip.to_string());
        let subject = dn.map(str::to_string).or_else(|| ip.clone());

        let decision = dn
            .and_then(|dn| self.authorize_dn(dn, role))
            .or_else(|| ip.as_deref().and_then(|ip| self.authorize_ip(ip, role)))
            .or_else(|| {
                (role == AccessRole::Public)
                    .then(|| Authorization::new(AccessLevel::Public, "public role authorized"))
            })
            .unwrap_or_else(|| Authorization::new(AccessLevel::Denied, "unable to authorize access"));

        match subject {
            Some(subject) => decision.with_subject(subject),
            None => decision,
        }
    }
}
