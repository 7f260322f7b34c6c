use std::time::Duration;

use log::debug;

use crate::checks::describe;
use crate::config::CheckDescriptor;
use crate::report::Report;
use crate::transport::{HttpRequest, Transport};

pub const STATUS_MSG: &str = "http(s) status";
pub const CONTAINS_MSG: &str = "http(s) text contains";

/// Runs an HTTP(S) check. Transport failures become failed reports carrying the error.
pub async fn check<'a>(
    transport: &dyn Transport,
    check: &'a CheckDescriptor,
    default_timeout: Duration,
) -> Report<'a> {
    debug!("Running HTTP check for {}", check.url);

    let request = match HttpRequest::from_args(&check.args, default_timeout) {
        Ok(request) => request,
        Err(e) => return Report::new(false, describe(&e), check),
    };
    let response = match transport.issue_http(&check.url, &request).await {
        Ok(response) => response,
        Err(e) => return Report::new(false, describe(&e), check),
    };

    let ok = response.status == check.expect.status;
    if !ok {
        debug!(
            "{} returned status {}, expected {}",
            check.url, response.status, check.expect.status
        );
    }
    match &check.expect.contains {
        Some(pattern) if ok => Report::new(pattern.is_match(&response.body), CONTAINS_MSG, check),
        _ => Report::new(ok, STATUS_MSG, check),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Pattern;
    use crate::resolver::ResolverOverride;
    use crate::transport::NetClient;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn client() -> NetClient {
        NetClient::new(Arc::new(ResolverOverride::default()))
    }

    #[tokio::test]
    async fn test_status_matches() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let descriptor = CheckDescriptor::new(mock_server.uri());
        let report = check(&client(), &descriptor, TIMEOUT).await;
        assert!(report.ok());
        assert_eq!(report.msg(), STATUS_MSG);
    }

    #[tokio::test]
    async fn test_status_mismatch_skips_contains() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("ok"))
            .mount(&mock_server)
            .await;

        let descriptor =
            CheckDescriptor::new(mock_server.uri()).expect_contains(Pattern::new("ok").unwrap());
        let report = check(&client(), &descriptor, TIMEOUT).await;
        assert!(!report.ok());
        assert_eq!(report.msg(), STATUS_MSG);
    }

    #[tokio::test]
    async fn test_expected_non_200_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let descriptor = CheckDescriptor::new(mock_server.uri()).expect_status(204);
        assert!(check(&client(), &descriptor, TIMEOUT).await.ok());
    }

    #[tokio::test]
    async fn test_body_contains() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("status: ok"))
            .mount(&mock_server)
            .await;

        let url = format!("{}/health", mock_server.uri());
        let descriptor =
            CheckDescriptor::new(&url).expect_contains(Pattern::new("status: (ok|healthy)").unwrap());
        let report = check(&client(), &descriptor, TIMEOUT).await;
        assert!(report.ok());
        assert_eq!(report.msg(), CONTAINS_MSG);

        let descriptor =
            CheckDescriptor::new(&url).expect_contains(Pattern::new("degraded").unwrap());
        let report = check(&client(), &descriptor, TIMEOUT).await;
        assert!(!report.ok());
        assert_eq!(report.msg(), CONTAINS_MSG);
    }

    #[tokio::test]
    async fn test_method_headers_params_and_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/probe"))
            .and(header("x-token", "secret"))
            .and(query_param("deep", "true"))
            .and(body_string("ping"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&mock_server)
            .await;

        let descriptor = CheckDescriptor::new(format!("{}/probe", mock_server.uri()))
            .with_arg("method", json!("POST"))
            .with_arg("headers", json!({"X-Token": "secret"}))
            .with_arg("params", json!({"deep": true}))
            .with_arg("data", json!("ping"))
            .expect_status(202);
        assert!(check(&client(), &descriptor, TIMEOUT).await.ok());
    }

    #[tokio::test]
    async fn test_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let descriptor = CheckDescriptor::new(mock_server.uri()).with_arg("timeout", json!(1));
        let report = check(&client(), &descriptor, TIMEOUT).await;
        assert!(!report.ok());
        assert!(report.msg().starts_with("Request error"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let descriptor = CheckDescriptor::new(format!("http://127.0.0.1:{}/", port));
        let report = check(&client(), &descriptor, TIMEOUT).await;
        assert!(!report.ok());
        assert!(report.msg().starts_with("Request error"));
    }

    #[tokio::test]
    async fn test_invalid_args_are_reported() {
        let descriptor =
            CheckDescriptor::new("http://127.0.0.1:1/").with_arg("method", json!("NOT A METHOD"));
        let report = check(&client(), &descriptor, TIMEOUT).await;
        assert!(!report.ok());
        assert!(report.msg().starts_with("Invalid arguments"));
    }

    #[tokio::test]
    async fn test_override_keeps_original_host_header() {
        let mock_server = MockServer::start().await;
        let port = mock_server.address().port();

        Mock::given(method("GET"))
            .and(header("host", format!("www.example.invalid:{}", port).as_str()))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let map = BTreeMap::from([("WWW.example.invalid.".to_string(), "127.0.0.1".to_string())]);
        let client = NetClient::new(Arc::new(ResolverOverride::install(&map)));
        let descriptor = CheckDescriptor::new(format!("http://www.example.invalid:{}/", port));
        let report = check(&client, &descriptor, TIMEOUT).await;
        assert!(report.ok(), "{}", report.msg());
    }
}
