//! Method registry — binds handlers to the methods of a [`Catalog`].
//!
//! Keyed by the exact NSID.  A method can have at most one handler and the
//! handler's kind must match the declared kind.  Methods with no handler are
//! still looked up (the client role only needs the definition) but fail
//! server dispatch as not implemented.

use std::collections::HashMap;
use std::sync::Arc;

use xr_domain::{Error, MethodKind, Nsid};
use xr_lexicon::{Catalog, MethodDef};

use crate::handler::{MethodHandler, SubscriptionHandler};

/// A bound handler.
#[derive(Clone)]
pub enum Bound {
    Method(Arc<dyn MethodHandler>),
    Subscription(Arc<dyn SubscriptionHandler>),
}

impl std::fmt::Debug for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Method(_) => f.write_str("Bound::Method"),
            Self::Subscription(_) => f.write_str("Bound::Subscription"),
        }
    }
}

/// Proof of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub nsid: Nsid,
    pub kind: MethodKind,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("no lexicon defines method {0}")]
    UnknownMethod(String),
    #[error("{0} already has a handler")]
    Duplicate(String),
    #[error("{nsid} is a {declared}, can't bind a {handler} handler")]
    KindMismatch {
        nsid: String,
        declared: MethodKind,
        handler: &'static str,
    },
}

/// A looked-up method and its handler, if bound.
#[derive(Debug, Clone, Copy)]
pub struct Lookup<'a> {
    pub method: &'a MethodDef,
    pub handler: Option<&'a Bound>,
}

#[derive(Debug)]
pub struct Registry {
    catalog: Arc<Catalog>,
    handlers: HashMap<String, Bound>,
}

impl Registry {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            handlers: HashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Binds a query or procedure handler.
    pub fn register<H: MethodHandler>(
        &mut self,
        nsid: &str,
        handler: H,
    ) -> Result<Registration, RegistrationError> {
        self.register_bound(nsid, Bound::Method(Arc::new(handler)))
    }

    /// Binds a subscription handler.
    pub fn register_subscription<H: SubscriptionHandler>(
        &mut self,
        nsid: &str,
        handler: H,
    ) -> Result<Registration, RegistrationError> {
        self.register_bound(nsid, Bound::Subscription(Arc::new(handler)))
    }

    /// Binds a pre-wrapped handler.
    pub fn register_bound(
        &mut self,
        nsid: &str,
        handler: Bound,
    ) -> Result<Registration, RegistrationError> {
        let method = self
            .catalog
            .method(nsid)
            .ok_or_else(|| RegistrationError::UnknownMethod(nsid.to_string()))?;

        let fits = match (&handler, method.kind) {
            (Bound::Method(_), MethodKind::Query | MethodKind::Procedure) => true,
            (Bound::Subscription(_), MethodKind::Subscription) => true,
            _ => false,
        };
        if !fits {
            return Err(RegistrationError::KindMismatch {
                nsid: nsid.to_string(),
                declared: method.kind,
                handler: match handler {
                    Bound::Method(_) => "request",
                    Bound::Subscription(_) => "subscription",
                },
            });
        }
        if self.handlers.contains_key(nsid) {
            return Err(RegistrationError::Duplicate(nsid.to_string()));
        }

        let registration = Registration {
            nsid: method.nsid.clone(),
            kind: method.kind,
        };
        self.handlers.insert(nsid.to_string(), handler);
        tracing::debug!(nsid, kind = %registration.kind, "handler registered");
        Ok(registration)
    }

    /// Finds `nsid` and checks it is reachable through `access`.
    pub fn lookup(&self, nsid: &str, access: MethodKind) -> Result<Lookup<'_>, Error> {
        let method = self
            .catalog
            .method(nsid)
            .ok_or_else(|| Error::MethodNotFound(nsid.to_string()))?;
        if method.kind != access {
            return Err(Error::WrongMethodKind {
                nsid: nsid.to_string(),
                declared: method.kind,
                requested: access,
            });
        }
        Ok(Lookup {
            method,
            handler: self.handlers.get(nsid),
        })
    }

    /// NSIDs with a bound handler, sorted.
    pub fn bound(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}
