use axum::body::Bytes;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, Method, StatusCode};

/// Forwards a request byte-for-byte to whichever node currently holds the
/// target partition's lease. Headers
/// (claimed identity, transaction id/secret/origin, bearer token) pass
/// through unchanged — authorization is bound to the original caller, not
/// to the forwarding hop, so this node never re-signs the request.
pub struct Forwarder {
    http: reqwest::Client,
    remote_base_url: String,
}

impl Forwarder {
    pub fn new(http: reqwest::Client, remote_base_url: String) -> Self {
        Forwarder { http, remote_base_url }
    }

    pub async fn forward(&self, method: Method, path: &str, headers: &HeaderMap, body: Bytes) -> Response {
        let url = format!("{}{}", self.remote_base_url, path);
        let mut request = self.http.request(method, &url);
        for (name, value) in headers.iter() {
            if *name == http::header::HOST {
                continue;
            }
            request = request.header(name, value);
        }
        match request.body(body).send().await {
            Ok(response) => {
                let status = response.status();
                let bytes = response.bytes().await.unwrap_or_default();
                (status, bytes).into_response()
            }
            // The remote is unreachable, not merely uncooperative: the
            // caller sees the same 503 it would if this node itself
            // couldn't accept new requests, and its retry loop treats the
            // two identically.
            Err(e) => {
                tracing::warn!(target: "pbs", error = %e, %url, "forward to remote partition owner failed");
                StatusCode::SERVICE_UNAVAILABLE.into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn forwards_method_path_and_headers_unchanged() {
        let remote = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/transactions:prepare"))
            .and(header("x-gscp-transaction-id", "abc"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-gscp-transaction-last-execution-timestamp", "7"))
            .mount(&remote)
            .await;

        let forwarder = Forwarder::new(reqwest::Client::new(), remote.uri());
        let mut headers = HeaderMap::new();
        headers.insert("x-gscp-transaction-id", "abc".parse().unwrap());
        let response = forwarder.forward(Method::POST, "/v1/transactions:prepare", &headers, Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unreachable_remote_surfaces_as_service_unavailable() {
        let forwarder = Forwarder::new(reqwest::Client::new(), "http://127.0.0.1:1".to_string());
        let response = forwarder.forward(Method::POST, "/v1/transactions:prepare", &HeaderMap::new(), Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
