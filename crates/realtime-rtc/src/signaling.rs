//! SDP offer/answer exchange with the realtime negotiation endpoint.

use crate::ConnectionError;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, instrument};

/// Posts the local SDP offer and returns the remote SDP answer.
///
/// The request is aborted after `timeout`, independently of any deadline
/// the caller races it against.
#[instrument(name = "sdp_exchange", skip_all, fields(%endpoint, %model))]
pub async fn exchange_sdp(
    http: &reqwest::Client,
    endpoint: &str,
    model: &str,
    credential: &SecretString,
    offer: String,
    timeout: Duration,
) -> Result<String, ConnectionError> {
    let response = http
        .post(endpoint)
        .query(&[("model", model)])
        .bearer_auth(credential.expose_secret())
        .header(CONTENT_TYPE, "application/sdp")
        .body(offer)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ConnectionError::timeout("waiting for the SDP answer")
            } else {
                ConnectionError::Signaling(e.to_string())
            }
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ConnectionError::Signaling(e.to_string()))?;
    if !status.is_success() {
        return Err(ConnectionError::Signaling(format!(
            "negotiation endpoint returned {status}: {}",
            body.trim()
        )));
    }
    if body.trim().is_empty() {
        return Err(ConnectionError::Signaling(
            "negotiation endpoint returned an empty answer".to_string(),
        ));
    }
    debug!(bytes = body.len(), "Received SDP answer.");
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        http::{HeaderMap, StatusCode, Uri},
        routing::post,
    };

    async fn answer(headers: HeaderMap, uri: Uri, offer: String) -> (StatusCode, String) {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer ek_test");
        let sdp_content = headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            == Some("application/sdp");
        let model = uri.query() == Some("model=test-model");
        if !(authorized && sdp_content && model) {
            return (StatusCode::UNAUTHORIZED, "bad request".to_string());
        }
        if offer == "slow" {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        (StatusCode::CREATED, format!("answer-for:{offer}"))
    }

    async fn spawn_server() -> String {
        let app = Router::new().route("/v1/realtime", post(answer));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1/realtime")
    }

    #[tokio::test]
    async fn test_exchange_returns_answer() {
        let endpoint = spawn_server().await;
        let answer = exchange_sdp(
            &reqwest::Client::new(),
            &endpoint,
            "test-model",
            &SecretString::from("ek_test".to_string()),
            "v=0".to_string(),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(answer, "answer-for:v=0");
    }

    #[tokio::test]
    async fn test_non_success_status_is_signaling_error() {
        let endpoint = spawn_server().await;
        let err = exchange_sdp(
            &reqwest::Client::new(),
            &endpoint,
            "test-model",
            &SecretString::from("wrong".to_string()),
            "v=0".to_string(),
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectionError::Signaling(msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let endpoint = spawn_server().await;
        let err = exchange_sdp(
            &reqwest::Client::new(),
            &endpoint,
            "test-model",
            &SecretString::from("ek_test".to_string()),
            "slow".to_string(),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout(_)));
        assert!(err.is_retryable());
    }
}
