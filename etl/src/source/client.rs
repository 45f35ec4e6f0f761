use std::fmt;
use std::time::Duration;

use config::shared::{RetryConfig, VmPayConfig};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::source::DateWindow;

/// Query parameter carrying the API token.
const ACCESS_TOKEN_PARAM: &str = "access_token";

/// VM Pay API resources fetched by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    CashlessFacts,
    Categories,
    Clients,
    Locations,
    Manufacturers,
    Products,
}

impl Endpoint {
    /// Reference endpoints, fetched without pagination.
    pub const REFERENCE: [Endpoint; 5] = [
        Endpoint::Categories,
        Endpoint::Clients,
        Endpoint::Locations,
        Endpoint::Manufacturers,
        Endpoint::Products,
    ];

    /// Path segment of the endpoint below the API base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::CashlessFacts => "cashless_facts",
            Endpoint::Categories => "categories",
            Endpoint::Clients => "clients",
            Endpoint::Locations => "locations",
            Endpoint::Manufacturers => "manufacturers",
            Endpoint::Products => "products",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// A failed request attempt, split by whether trying again can help.
enum RequestFailure {
    Transient(EtlError),
    Permanent(EtlError),
}

/// HTTP client for the VM Pay REST API.
///
/// Requests are sent one at a time. Transient failures are retried with exponential
/// backoff according to the configured [`RetryConfig`].
pub struct VmPayClient {
    http: reqwest::Client,
    base_url: String,
    access_token: SecretString,
    retry: RetryConfig,
    per_page: u32,
    page_delay: Duration,
}

impl VmPayClient {
    pub fn new(config: &VmPayConfig) -> EtlResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| {
                etl_error!(
                    ErrorKind::ConfigError,
                    "Failed to build the VM Pay HTTP client",
                    source: err
                )
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            retry: config.retry.clone(),
            per_page: config.per_page,
            page_delay: Duration::from_millis(config.page_delay_ms),
        })
    }

    /// Fetches `endpoint` with `params` and returns the records of the JSON array body.
    pub async fn fetch(
        &self,
        endpoint: Endpoint,
        params: &[(&str, String)],
    ) -> EtlResult<Vec<Value>> {
        let url = format!("{}/{}", self.base_url, endpoint.path());
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt = 0;
        let body = loop {
            attempt += 1;
            match self.try_get(&url, params).await {
                Ok(body) => break body,
                Err(RequestFailure::Transient(err)) if attempt < max_attempts => {
                    let delay = self.backoff(attempt - 1);
                    warn!(
                        %endpoint,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "request to vm pay failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(RequestFailure::Transient(err)) | Err(RequestFailure::Permanent(err)) => {
                    warn!(
                        %endpoint,
                        attempt,
                        max_attempts,
                        error = %err,
                        "request to vm pay failed"
                    );
                    return Err(err);
                }
            }
        };

        match body {
            Value::Array(records) => {
                if let Some(index) = records.iter().position(|record| !record.is_object()) {
                    return Err(etl_error!(
                        ErrorKind::InvalidData,
                        "VM Pay API returned a non-object record",
                        format!("endpoint `{endpoint}`, record {index}")
                    ));
                }
                Ok(records)
            }
            other => Err(etl_error!(
                ErrorKind::InvalidData,
                "VM Pay API response is not a JSON array",
                format!("endpoint `{endpoint}` returned {}", json_kind(&other))
            )),
        }
    }

    /// Fetches every cashless fact of `window`, page by page.
    ///
    /// Paging stops at the first empty page or the first page shorter than the page size.
    pub async fn fetch_cashless(&self, window: &DateWindow) -> EtlResult<Vec<Value>> {
        let endpoint = Endpoint::CashlessFacts;
        let mut records = Vec::new();
        let mut page: u32 = 1;
        let mut pages: u32 = 0;

        info!(start = %window.start_param(), end = %window.end_param(), "fetching cashless facts");

        loop {
            let params = [
                ("start_date", window.start_param()),
                ("end_date", window.end_param()),
                ("page", page.to_string()),
                ("per_page", self.per_page.to_string()),
            ];
            let batch = self.fetch(endpoint, &params).await?;
            let batch_len = batch.len();
            debug!(page, records = batch_len, "fetched cashless page");

            if batch.is_empty() {
                break;
            }
            pages += 1;
            records.extend(batch);
            if batch_len < self.per_page as usize {
                break;
            }

            page += 1;
            sleep(self.page_delay).await;
        }

        info!(records = records.len(), pages, "fetched cashless facts");

        Ok(records)
    }

    /// Fetches all records of a reference endpoint in a single request.
    pub async fn fetch_reference(&self, endpoint: Endpoint) -> EtlResult<Vec<Value>> {
        let records = self.fetch(endpoint, &[]).await?;
        info!(%endpoint, records = records.len(), "fetched reference records");

        Ok(records)
    }

    async fn try_get(&self, url: &str, params: &[(&str, String)]) -> Result<Value, RequestFailure> {
        let response = self
            .http
            .get(url)
            .query(params)
            .query(&[(ACCESS_TOKEN_PARAM, self.access_token.expose_secret())])
            .send()
            .await
            .map_err(|err| {
                let transient = err.is_connect() || err.is_timeout() || err.is_request();
                let err = EtlError::from(err.without_url());
                if transient {
                    RequestFailure::Transient(err)
                } else {
                    RequestFailure::Permanent(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| RequestFailure::Permanent(EtlError::from(err.without_url())))
    }

    /// Delay before retry number `retry` (zero based): `initial * factor^retry`, capped.
    fn backoff(&self, retry: u32) -> Duration {
        let factor = self.retry.backoff_factor.powi(retry.min(i32::MAX as u32) as i32);
        let delay_ms =
            (self.retry.initial_delay_ms as f64 * factor).min(self.retry.max_delay_ms as f64);

        Duration::from_millis(delay_ms as u64)
    }
}

impl fmt::Debug for VmPayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmPayClient")
            .field("base_url", &self.base_url)
            .field("per_page", &self.per_page)
            .finish()
    }
}

fn classify_status(status: StatusCode) -> RequestFailure {
    let detail = format!("status {status}");

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RequestFailure::Permanent(etl_error!(
            ErrorKind::AuthenticationError,
            "VM Pay API rejected the access token",
            detail
        )),
        StatusCode::TOO_MANY_REQUESTS => RequestFailure::Transient(etl_error!(
            ErrorKind::SourceQueryFailed,
            "VM Pay API rate limit reached",
            detail
        )),
        status if status.is_server_error() => RequestFailure::Transient(etl_error!(
            ErrorKind::SourceQueryFailed,
            "VM Pay API server error",
            detail
        )),
        _ => RequestFailure::Permanent(etl_error!(
            ErrorKind::SourceQueryFailed,
            "VM Pay API request failed",
            detail
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String, per_page: u32) -> VmPayConfig {
        VmPayConfig {
            base_url,
            access_token: SecretString::new("token".to_string()),
            per_page,
            page_delay_ms: 0,
            request_timeout_secs: 5,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                backoff_factor: 2.0,
            },
        }
    }

    fn window() -> DateWindow {
        DateWindow::day(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
    }

    #[tokio::test]
    async fn paginates_until_a_short_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cashless_facts"))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "2"))
            .and(query_param("access_token", "token"))
            .and(query_param("start_date", "2025-03-10T00:00:00Z"))
            .and(query_param("end_date", "2025-03-11T00:00:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"id": 2}])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cashless_facts"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 3}])))
            .expect(1)
            .mount(&server)
            .await;

        let client = VmPayClient::new(&config(server.uri(), 2)).unwrap();
        let records = client.fetch_cashless(&window()).await.unwrap();

        assert_eq!(records, [json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);
    }

    #[tokio::test]
    async fn stops_at_an_empty_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cashless_facts"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"id": 2}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cashless_facts"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = VmPayClient::new(&config(server.uri(), 2)).unwrap();
        let records = client.fetch_cashless(&window()).await.unwrap();

        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 9}])))
            .mount(&server)
            .await;

        let client = VmPayClient::new(&config(server.uri(), 100)).unwrap();
        let records = client.fetch_reference(Endpoint::Products).await.unwrap();

        assert_eq!(records, [json!({"id": 9})]);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clients"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = VmPayClient::new(&config(server.uri(), 100)).unwrap();
        let err = client.fetch_reference(Endpoint::Clients).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);
    }

    #[tokio::test]
    async fn authentication_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/categories"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = VmPayClient::new(&config(server.uri(), 100)).unwrap();
        let err = client.fetch_reference(Endpoint::Categories).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthenticationError);
    }

    #[tokio::test]
    async fn rate_limits_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manufacturers"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/manufacturers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 4}])))
            .expect(1)
            .mount(&server)
            .await;

        let client = VmPayClient::new(&config(server.uri(), 100)).unwrap();
        let records = client.fetch_reference(Endpoint::Manufacturers).await.unwrap();

        assert_eq!(records, [json!({"id": 4})]);
    }

    #[tokio::test]
    async fn forbidden_requests_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clients"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let client = VmPayClient::new(&config(server.uri(), 100)).unwrap();
        let err = client.fetch_reference(Endpoint::Clients).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthenticationError);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = VmPayClient::new(&config(server.uri(), 100)).unwrap();
        let err = client.fetch_reference(Endpoint::Products).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);
        assert!(err.detail().unwrap().contains("404"));
    }

    #[tokio::test]
    async fn non_array_bodies_are_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/locations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "nope"})))
            .mount(&server)
            .await;

        let client = VmPayClient::new(&config(server.uri(), 100)).unwrap();
        let err = client.fetch_reference(Endpoint::Locations).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let mut config = config("http://localhost".to_string(), 100);
        config.retry = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 3000,
            backoff_factor: 2.0,
        };
        let client = VmPayClient::new(&config).unwrap();

        assert_eq!(client.backoff(0), Duration::from_millis(1000));
        assert_eq!(client.backoff(1), Duration::from_millis(2000));
        assert_eq!(client.backoff(2), Duration::from_millis(3000));
    }
}
