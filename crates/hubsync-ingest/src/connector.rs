//! Connector core
//!
//! Lifecycle: [`Connector::initialize`] validates configuration without any
//! I/O, [`Connector::connect`] proves the credentials with a cheap call, the
//! `stream_*` methods hand out lazy record streams, and
//! [`Connector::disconnect`] releases the HTTP client. A disconnected
//! connector is finished; build a new one to sync again.
//!
//! Streams pull one page at a time and only fetch the next page once the
//! consumer has drained the current one. Dropping a stream stops it.

use async_stream::try_stream;
use futures::Stream;
use hubsync_common::{ObjectKind, RawRecord};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};

use crate::api::{CrmApi, HubSpotApi};
use crate::config::{ConnectorConfig, MAX_PAGE_SIZE};
use crate::error::{ConnectorError, Result};
use crate::normalize::default_properties;
use crate::pager::Pager;
use crate::rate_limit::RateLimiter;

/// Lazy, finite, non-restartable sequence of raw records
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<RawRecord>> + Send + 'static>>;

/// Per-stream options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOptions {
    /// Properties to request; `None` uses the kind's standard set
    pub properties: Option<Vec<String>>,
    /// Stream archived records instead of active ones
    pub archived: bool,
    /// Overrides the configured page size
    pub page_size: Option<u32>,
    /// Stop after this many records without fetching further pages
    pub max_records: Option<usize>,
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = Some(properties.into_iter().map(Into::into).collect());
        self
    }

    pub fn archived(mut self, archived: bool) -> Self {
        self.archived = archived;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }
}

enum State {
    Initialized(Arc<dyn CrmApi>),
    Connected(Arc<dyn CrmApi>),
    Disconnected,
}

impl State {
    fn as_str(&self) -> &'static str {
        match self {
            State::Initialized(_) => "initialized",
            State::Connected(_) => "connected",
            State::Disconnected => "disconnected",
        }
    }
}

/// HubSpot CRM connector
pub struct Connector {
    config: ConnectorConfig,
    limiter: Arc<RateLimiter>,
    state: Mutex<State>,
    /// Cleared on disconnect; open streams check it before every page
    open: Arc<AtomicBool>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config)
            .field("state", &self.lock_state().as_str())
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Validate configuration and prepare the HubSpot client. Performs no I/O.
    pub fn initialize(config: ConnectorConfig) -> Result<Self> {
        config.validate()?;
        let api = HubSpotApi::new(&config)?;
        Ok(Self::build(config, Arc::new(api)))
    }

    /// Like [`Connector::initialize`] but over a caller-supplied transport
    pub fn with_api(config: ConnectorConfig, api: Arc<dyn CrmApi>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, api))
    }

    fn build(config: ConnectorConfig, api: Arc<dyn CrmApi>) -> Self {
        let limiter = Arc::new(RateLimiter::from_settings(&config.rate_limit()));
        debug!(
            capacity = limiter.capacity(),
            refill_per_second = limiter.refill_per_second(),
            page_size = config.page_size(),
            "Connector initialized"
        );
        Self {
            config,
            limiter,
            state: Mutex::new(State::Initialized(api)),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Rate limiter shared by every stream of this connector
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.lock_state(), State::Connected(_))
    }

    /// Check liveness and credentials. Calling it again while connected is a no-op.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<()> {
        let api = match &*self.lock_state() {
            State::Initialized(api) => api.clone(),
            State::Connected(_) => return Ok(()),
            State::Disconnected => return Err(ConnectorError::NotConnected),
        };

        self.limiter.acquire().await;
        if let Err(e) = api.ping().await {
            warn!(error = %e, "Connection check failed");
            return Err(if e.is_retryable() {
                ConnectorError::RemoteUnavailable {
                    attempts: 1,
                    message: e.to_string(),
                }
            } else {
                ConnectorError::from_fatal(e)
            });
        }

        let mut state = self.lock_state();
        match &*state {
            State::Initialized(_) => {
                *state = State::Connected(api);
                self.open.store(true, Ordering::Release);
                info!("Connected to HubSpot");
                Ok(())
            },
            State::Connected(_) => Ok(()),
            // Disconnected while the check was in flight
            State::Disconnected => Err(ConnectorError::NotConnected),
        }
    }

    /// Release the HTTP client. Idempotent; the connector cannot be reused.
    pub fn disconnect(&self) {
        let mut state = self.lock_state();
        if !matches!(*state, State::Disconnected) {
            self.open.store(false, Ordering::Release);
            *state = State::Disconnected;
            info!("Disconnected from HubSpot");
        }
    }

    /// Connect and return a guard that disconnects when dropped
    pub async fn session(&self) -> Result<Session<'_>> {
        self.connect().await?;
        Ok(Session { connector: self })
    }

    pub fn stream_contacts(&self, options: StreamOptions) -> Result<RecordStream> {
        self.stream(ObjectKind::Contacts, options)
    }

    pub fn stream_companies(&self, options: StreamOptions) -> Result<RecordStream> {
        self.stream(ObjectKind::Companies, options)
    }

    pub fn stream_deals(&self, options: StreamOptions) -> Result<RecordStream> {
        self.stream(ObjectKind::Deals, options)
    }

    pub fn stream_tickets(&self, options: StreamOptions) -> Result<RecordStream> {
        self.stream(ObjectKind::Tickets, options)
    }

    /// Calls, emails, meetings, notes and tasks, one object type after another
    pub fn stream_engagements(&self, options: StreamOptions) -> Result<RecordStream> {
        self.stream(ObjectKind::Engagements, options)
    }

    /// Stream every record of `kind`
    pub fn stream(&self, kind: ObjectKind, options: StreamOptions) -> Result<RecordStream> {
        let api = match &*self.lock_state() {
            State::Connected(api) => api.clone(),
            _ => return Err(ConnectorError::NotConnected),
        };

        let limiter = self.limiter.clone();
        let open = self.open.clone();
        let retry = self.config.retry;
        let page_size = options
            .page_size
            .unwrap_or_else(|| self.config.page_size())
            .clamp(1, MAX_PAGE_SIZE);
        let properties = options.properties.unwrap_or_else(|| {
            default_properties(kind)
                .iter()
                .map(|p| p.to_string())
                .collect()
        });
        let archived = options.archived;
        let max_records = options.max_records;

        debug!(kind = %kind, page_size = page_size, archived = archived, "Opening record stream");

        let stream = try_stream! {
            let mut yielded = 0usize;
            if max_records != Some(0) {
                'object_types: for object_type in kind.api_object_types() {
                    let mut pager = Pager::new(
                        api.clone(),
                        limiter.clone(),
                        retry,
                        *object_type,
                        page_size,
                        properties.clone(),
                        archived,
                    );

                    loop {
                        if !open.load(Ordering::Acquire) {
                            Err::<(), _>(ConnectorError::NotConnected)?;
                        }
                        let page = match pager.next_page().await? {
                            Some(page) => page,
                            None => break,
                        };

                        for record in page.records {
                            yield record;
                            yielded += 1;
                            if max_records.is_some_and(|max| yielded >= max) {
                                break 'object_types;
                            }
                        }
                    }

                    debug!(
                        object_type = *object_type,
                        pages = pager.pages_fetched(),
                        "Finished object type"
                    );
                }
            }
            debug!(kind = %kind, records = yielded, "Record stream finished");
        };

        Ok(Box::pin(stream))
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
    }
}

/// Connected scope; disconnects on every exit path
#[must_use = "dropping the session disconnects immediately"]
pub struct Session<'a> {
    connector: &'a Connector,
}

impl Session<'_> {
    pub fn connector(&self) -> &Connector {
        self.connector
    }
}

impl std::ops::Deref for Session<'_> {
    type Target = Connector;

    fn deref(&self) -> &Connector {
        self.connector
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.connector.disconnect();
    }
}
