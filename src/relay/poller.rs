use crate::error::PollError;
use crate::relay::protocol::RelayedRequest;

/// Long-polls the relay for the next queued request destined for this
/// client's server name. Blocks until the relay has one queued or
/// itself times out with HTTP 408.
pub async fn get_request(
    client: &reqwest::Client,
    relay_url: &str,
    bearer_token: Option<&str>,
) -> Result<RelayedRequest, PollError> {
    let mut req = client.get(relay_url);
    if let Some(token) = bearer_token {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await.map_err(classify_transport_error)?;

    let status = resp.status();
    if status.is_success() {
        let body = resp.text().await.map_err(|e| PollError::Malformed(e.to_string()))?;
        return serde_json::from_str(&body).map_err(|e| PollError::Malformed(e.to_string()));
    }

    match status.as_u16() {
        408 => Err(PollError::Timeout),
        403 => Err(PollError::Forbidden),
        other => {
            let body = resp.text().await.unwrap_or_default();
            Err(PollError::Transient {
                status: Some(other),
                body,
            })
        }
    }
}

fn classify_transport_error(err: reqwest::Error) -> PollError {
    if err.is_connect() {
        PollError::ConnectionRefused(err.to_string())
    } else {
        PollError::Transient {
            status: None,
            body: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_request() -> RelayedRequest {
        RelayedRequest {
            id: "req-1".into(),
            method: "GET".into(),
            url: "http://placeholder/healthz".into(),
            host: None,
            headers: vec![],
            body: vec![],
        }
    }

    #[tokio::test]
    async fn success_decodes_relayed_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/server/request"))
            .and(query_param("server", "my-cluster"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_request()))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/server/request?server=my-cluster", server.uri());
        let req = get_request(&client, &url, None).await.unwrap();
        assert_eq!(req.id, "req-1");
    }

    #[tokio::test]
    async fn timeout_status_maps_to_timeout_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(408))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = get_request(&client, &server.uri(), None).await.unwrap_err();
        assert!(matches!(err, PollError::Timeout));
    }

    #[tokio::test]
    async fn forbidden_status_maps_to_forbidden_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = get_request(&client, &server.uri(), None).await.unwrap_err();
        assert!(matches!(err, PollError::Forbidden));
    }

    #[tokio::test]
    async fn other_status_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = get_request(&client, &server.uri(), None).await.unwrap_err();
        match err {
            PollError::Transient { status, body } => {
                assert_eq!(status, Some(503));
                assert_eq!(body, "unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_malformed_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = get_request(&client, &server.uri(), None).await.unwrap_err();
        assert!(matches!(err, PollError::Malformed(_)));
    }
}
