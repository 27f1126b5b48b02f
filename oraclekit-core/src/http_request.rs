use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{header::AUTHORIZATION, Method, RequestBuilder, Response};

use crate::config::OracleConfig;
use crate::error::OracleKitError;

/// A thin wrapper over the HTTP client. Applies the configured connect and
/// read timeouts and a user-agent. HTTP statuses are returned as-is.
///
/// Polls go out exactly once per iteration; the next scheduled poll is the
/// retry. Only one-shot requests retry connect errors and timeouts.
pub(crate) struct Request {
    client: reqwest::Client,
    read_timeout: Duration,
    max_retries: u32,
}

/// A completed exchange: status code and body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reply {
    pub(crate) status: u16,
    pub(crate) body: String,
}

impl Reply {
    pub(crate) const fn is_success(&self) -> bool {
        self.status >= 200 && self.status <= 299
    }
}

impl Request {
    /// Builds the client from `config`.
    pub(crate) fn new(config: &OracleConfig) -> Result<Self, OracleKitError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(format!("oraclekit-core/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| OracleKitError::NetworkError {
                url: config.endpoint.clone(),
                error: format!("failed to build http client: {err}"),
            })?;
        Ok(Self {
            client,
            read_timeout: config.read_timeout(),
            max_retries: config.max_retries,
        })
    }

    /// Creates a request builder with defaults applied.
    fn req(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url).timeout(self.read_timeout)
    }

    /// GETs `url` with `Authorization: <token>` in a single attempt and reads
    /// the body as text. A hung exchange fails after the read timeout.
    pub(crate) async fn get_authorized(
        &self,
        url: &str,
        token: &str,
    ) -> Result<Reply, OracleKitError> {
        let response = execute_request_builder(self.authorized(url, token)).await?;
        read_reply(url, response).await
    }

    /// Like [`Request::get_authorized`], retrying connect errors and timeouts
    /// up to `max_retries` times with exponential backoff.
    pub(crate) async fn get_authorized_with_retry(
        &self,
        url: &str,
        token: &str,
    ) -> Result<Reply, OracleKitError> {
        let response = self.handle(self.authorized(url, token)).await?;
        read_reply(url, response).await
    }

    fn authorized(&self, url: &str, token: &str) -> RequestBuilder {
        self.req(Method::GET, url).header(AUTHORIZATION, token)
    }

    /// Sends the request, retrying transient transport failures.
    async fn handle(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, OracleKitError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries as usize);

        let Some(template) = request_builder.try_clone() else {
            return execute_request_builder(request_builder)
                .await
                .map_err(Into::into);
        };

        (|| async {
            let request_builder = template.try_clone().ok_or_else(|| RequestHandleError {
                url: "<unknown>".to_string(),
                error: "request cannot be retried because it is not cloneable".to_string(),
                kind: FailureKind::Permanent,
            })?;
            execute_request_builder(request_builder).await
        })
        .retry(backoff)
        .when(RequestHandleError::is_retryable)
        .notify(|err, delay| {
            log::debug!("retrying {} in {delay:?}: {}", err.url, err.error);
        })
        .await
        .map_err(Into::into)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Timeout,
    Connect,
    Permanent,
}

#[derive(Debug)]
struct RequestHandleError {
    url: String,
    error: String,
    kind: FailureKind,
}

impl RequestHandleError {
    fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::Timeout | FailureKind::Connect)
    }
}

impl From<RequestHandleError> for OracleKitError {
    fn from(value: RequestHandleError) -> Self {
        match value.kind {
            FailureKind::Timeout => Self::NetworkTimeout { url: value.url },
            FailureKind::Connect | FailureKind::Permanent => Self::NetworkError {
                url: value.url,
                error: value.error,
            },
        }
    }
}

async fn read_reply(url: &str, response: Response) -> Result<Reply, OracleKitError> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|err| classify(url.to_string(), &err))?;
    Ok(Reply { status, body })
}

fn classify(url: String, err: &reqwest::Error) -> OracleKitError {
    if err.is_timeout() {
        OracleKitError::NetworkTimeout { url }
    } else {
        OracleKitError::NetworkError {
            url,
            error: err.to_string(),
        }
    }
}

async fn execute_request_builder(
    request_builder: RequestBuilder,
) -> Result<Response, RequestHandleError> {
    let (client, request) = request_builder.build_split();
    let request = request.map_err(|err| RequestHandleError {
        url: err
            .url()
            .map_or_else(|| "<unknown>".to_string(), ToString::to_string),
        error: format!("request build failed: {err}"),
        kind: FailureKind::Permanent,
    })?;
    let url = request.url().to_string();

    client.execute(request).await.map_err(|err| {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_connect() {
            FailureKind::Connect
        } else {
            FailureKind::Permanent
        };
        RequestHandleError {
            url,
            error: format!("request failed: {err}"),
            kind,
        }
    })
}
