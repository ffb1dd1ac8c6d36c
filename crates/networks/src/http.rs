use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use bulkreg_core::config::TargetConfig;
use bulkreg_core::{HttpMethod, RegistrationTransport, StepRequest, StepResponse, TransportError};

/// Registration transport over HTTP(S). Every session owns its own client and cookie jar.
pub struct HttpTransport {
    user_agent: String,
    proxy: Option<String>,
    connect_timeout: Duration,
    request_timeout: Duration,
    sessions: AtomicUsize,
}

/// One candidate's cookie-carrying connection to the target
pub struct HttpSession {
    client: reqwest::Client,
    id: usize,
    exchanges: usize,
}

impl HttpSession {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges
    }
}

impl HttpTransport {
    pub fn new(config: &TargetConfig) -> Result<Self, TransportError> {
        if let Some(proxy) = &config.proxy {
            // Fail at startup rather than on the first session
            reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| TransportError::InvalidRequest(format!("proxy {}: {}", proxy, e)))?;
        }

        Ok(Self {
            user_agent: config.user_agent.clone(),
            proxy: config.proxy.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            sessions: AtomicUsize::new(0),
        })
    }

    /// Number of sessions opened so far
    pub fn sessions_opened(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    fn build_client(&self) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .cookie_store(true)
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout);

        if let Some(proxy) = &self.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))
    }
}

#[async_trait]
impl RegistrationTransport for HttpTransport {
    type Session = HttpSession;

    async fn open_session(&self) -> Result<HttpSession, TransportError> {
        let client = self.build_client()?;
        let id = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(session = id, "http session opened");
        Ok(HttpSession { client, id, exchanges: 0 })
    }

    async fn exchange(
        &self,
        session: &mut HttpSession,
        request: &StepRequest,
    ) -> Result<StepResponse, TransportError> {
        let start = Instant::now();
        session.exchanges += 1;

        let builder = match request.method {
            HttpMethod::Get => session.client.get(request.url.clone()).query(&request.form),
            HttpMethod::Post => session.client.post(request.url.clone()).form(&request.form),
        };

        let resp = builder.send().await.map_err(|e| {
            warn!(session = session.id, purpose = request.purpose, url = %request.url, error = %e, "exchange failed");
            classify(e, self.request_timeout)
        })?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| classify(e, self.request_timeout))?;

        debug!(
            session = session.id,
            purpose = request.purpose,
            status,
            body_len = body.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "exchange complete"
        );

        Ok(StepResponse { status, body })
    }
}

fn classify(e: reqwest::Error, timeout: Duration) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(timeout.as_secs())
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}
