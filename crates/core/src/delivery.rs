//! Outbound delivery of assembled bundles.
//!
//! A single POST per call, JSON in and JSON out. Failures are returned to the caller, which
//! logs them; nothing here retries.

use crate::config::DeliveryConfig;
use crate::{CoreError, CoreResult};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Client that POSTs JSON payloads to one configured URL.
#[derive(Clone, Debug)]
pub struct DeliveryClient {
    http: reqwest::Client,
    url: String,
}

impl DeliveryClient {
    /// Create a client for `url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Delivery`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> CoreResult<Self> {
        let url = url.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Delivery {
                url: url.clone(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self { http, url })
    }

    pub fn from_config(config: &DeliveryConfig) -> CoreResult<Self> {
        Self::new(config.url.clone(), config.timeout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `payload` as JSON and return the parsed response body.
    ///
    /// An empty response body is returned as `Value::Null`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if:
    /// - the request fails in transport (connection, timeout),
    /// - the response status is not 2xx,
    /// - the response body is not JSON.
    pub async fn send<T>(&self, payload: &T) -> CoreResult<Value>
    where
        T: Serialize + ?Sized,
    {
        let response = self
            .http
            .post(&self.url)
            .header("Accept", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| CoreError::Delivery {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::DeliveryStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| CoreError::Delivery {
            url: self.url.clone(),
            reason: format!("failed to read response body: {e}"),
        })?;
        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&body).map_err(|e| CoreError::Delivery {
            url: self.url.clone(),
            reason: format!("response is not JSON: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_payload_and_returns_response_json() {
        let server = MockServer::start().await;
        let payload = json!({"resourceType": "Bundle", "type": "collection", "entry": []});

        Mock::given(method("POST"))
            .and(path("/receive_fhir/"))
            .and(body_json(&payload))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "received"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = DeliveryClient::new(
            format!("{}/receive_fhir/", server.uri()),
            Duration::from_secs(5),
        )
        .expect("client");
        let response = client.send(&payload).await.expect("delivered");
        assert_eq!(response, json!({"status": "received"}));
    }

    #[tokio::test]
    async fn non_success_status_is_a_delivery_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = DeliveryClient::new(server.uri(), Duration::from_secs(5)).expect("client");
        let err = client.send(&json!([])).await.expect_err("503 is a failure");
        assert!(matches!(err, CoreError::DeliveryStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn empty_body_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = DeliveryClient::new(server.uri(), Duration::from_secs(5)).expect("client");
        assert_eq!(client.send(&json!([])).await.expect("delivered"), Value::Null);
    }

    #[tokio::test]
    async fn transport_error_is_a_delivery_failure() {
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let client =
            DeliveryClient::new("http://127.0.0.1:9/", Duration::from_secs(2)).expect("client");
        let err = client.send(&json!([])).await.expect_err("nothing listening");
        assert!(matches!(err, CoreError::Delivery { .. }));
    }
}
