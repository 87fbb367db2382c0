use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use xr_domain::config::{ClientConfig, Config, ValidationConfig};
use xr_domain::Error;
use xr_lexicon::{Catalog, Validator};

use crate::client::{Client, Inner};
use crate::session::{Session, SessionCallback};
use crate::transport::{ReqwestTransport, Transport};

/// Builds a [`Client`].  Without an explicit catalog the bundled session
/// lexicons are loaded; without an explicit transport a `reqwest` one is
/// created with the configured timeout.
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    validation: ValidationConfig,
    catalog: Option<Arc<Catalog>>,
    transport: Option<Arc<dyn Transport>>,
    session: Option<Session>,
    on_session: Option<SessionCallback>,
}

impl ClientBuilder {
    pub fn from_config(config: &Config) -> Self {
        Self {
            config: config.client.clone(),
            validation: config.validation,
            ..Self::default()
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Adds a header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(name.into(), value.into());
        self
    }

    pub fn validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Starts from bare tokens, e.g. ones persisted from an earlier run.
    pub fn tokens(self, access: Option<String>, refresh: Option<String>) -> Self {
        self.session(Session::from_tokens(access, refresh))
    }

    pub fn on_session<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&Session>) + Send + Sync + 'static,
    {
        self.on_session = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<Client, Error> {
        let base = self.config.base_url.trim_end_matches('/').to_string();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(Error::Config(format!(
                "{base} doesn't start with http:// or https://"
            )));
        }
        reqwest::Url::parse(&base).map_err(|e| Error::Config(format!("bad base URL {base}: {e}")))?;

        let catalog = match self.catalog {
            Some(c) => c,
            None => Arc::new(Catalog::bundled()?),
        };
        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::new(Duration::from_millis(self.config.timeout_ms))?),
        };

        Ok(Client::from_inner(Inner {
            transport,
            base_url: base,
            validator: Validator::new(catalog.clone(), self.validation),
            catalog,
            user_agent: self.config.user_agent,
            headers: self.config.headers.into_iter().collect(),
            session: RwLock::new(self.session),
            refresh_lock: tokio::sync::Mutex::new(()),
            on_session: self.on_session,
        }))
    }
}
