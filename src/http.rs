//! HTTP request tasks.
//!
//! An [`HttpRequestSpec`] describes one request against an absolute URL.
//! [`http_task`] turns it into a [`TaskDefinition`] that sends the request
//! with a shared [`reqwest::Client`], reads the body to count its bytes, and
//! reports status, reason phrase and size in the result record.
//!
//! Any completed response counts as a success unless an expected status is
//! set; transport errors and body read errors always fail.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};

use crate::error::StampedeError;
use crate::record::ResponseMeta;
use crate::task::TaskDefinition;

/// The value produced by an HTTP task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Response status code.
    pub status: u16,
    /// Canonical reason phrase of the status, if known.
    pub reason: Option<String>,
    /// Size of the response body in bytes.
    pub bytes: u64,
}

/// A fully resolved HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    /// Label for result records.
    pub label: String,
    /// Request method.
    pub method: Method,
    /// Absolute request URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body, if any.
    pub body: Option<String>,
    /// Status that marks the request successful, if checked.
    pub expect_status: Option<u16>,
}

impl HttpRequestSpec {
    /// Creates a request with no headers, body or status check.
    ///
    /// The label defaults to `"<METHOD> - <path>"`.
    pub fn new(method: Method, url: Url) -> Self {
        let label = default_label(&method, &url);
        Self {
            label,
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            expect_status: None,
        }
    }

    /// Replaces the label. A blank label keeps the default.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !label.trim().is_empty() {
            self.label = label;
        }
        self
    }

    /// Adds a header, rejecting invalid names or values.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, StampedeError> {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| StampedeError::validation(format!("invalid header name '{name}': {e}")))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            StampedeError::validation(format!("invalid value for header '{name}': {e}"))
        })?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Sets the request body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Requires the response to carry `status`.
    pub fn expect_status(mut self, status: u16) -> Self {
        self.expect_status = Some(status);
        self
    }
}

/// `"<METHOD> - <path>"`, with the query string if present.
pub fn default_label(method: &Method, url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{method} - {}?{query}", url.path()),
        None => format!("{method} - {}", url.path()),
    }
}

/// Joins a base URL and a request path by concatenation.
///
/// A missing slash between the two is inserted; a doubled one is collapsed.
pub fn join_url(base_url: &str, path: &str) -> Result<Url, StampedeError> {
    let base = base_url.trim_end_matches('/');
    let joined = if path.is_empty() {
        format!("{base}/")
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    };
    Url::parse(&joined)
        .map_err(|e| StampedeError::validation(format!("invalid URL '{joined}': {e}")))
}

/// Builds the task for one request.
pub fn http_task(client: reqwest::Client, spec: HttpRequestSpec) -> TaskDefinition<HttpResponse> {
    let HttpRequestSpec {
        label,
        method,
        url,
        headers,
        body,
        expect_status,
    } = spec;

    let task = TaskDefinition::new(label, move |_ctx| {
        let mut request = client
            .request(method.clone(), url.clone())
            .headers(headers.clone());
        if let Some(body) = &body {
            request = request.body(body.clone());
        }
        async move {
            let response = request.send().await?;
            let status = response.status();
            let bytes = response.bytes().await?;
            Ok(HttpResponse {
                status: status.as_u16(),
                reason: status.canonical_reason().map(str::to_string),
                bytes: bytes.len() as u64,
            })
        }
    })
    .with_response_meta(|response: &HttpResponse| {
        let meta = ResponseMeta::status(response.status).with_bytes(response.bytes);
        match &response.reason {
            Some(reason) => meta.with_message(reason.clone()),
            None => meta,
        }
    });

    match expect_status {
        Some(expected) => task.with_expect(move |_ctx, outcome| match outcome {
            Ok(response) if response.status == expected => Ok(()),
            Ok(response) => Err(anyhow::anyhow!(
                "expected status {expected}, got {}",
                response.status
            )),
            Err(err) => Err(anyhow::anyhow!("{err:#}")),
        }),
        None => task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;

    #[test]
    fn test_join_url_slashes() {
        let cases = [
            ("http://localhost:8080", "/health", "http://localhost:8080/health"),
            ("http://localhost:8080/", "/health", "http://localhost:8080/health"),
            ("http://localhost:8080/api", "users", "http://localhost:8080/api/users"),
            ("http://localhost:8080", "", "http://localhost:8080/"),
            ("http://localhost:8080", "/q?x=1", "http://localhost:8080/q?x=1"),
        ];
        for (base, path, expected) in cases {
            assert_eq!(join_url(base, path).unwrap().as_str(), expected);
        }
    }

    #[test]
    fn test_join_url_rejects_garbage() {
        let err = join_url("not a url", "/x").unwrap_err();
        assert!(matches!(err, StampedeError::ConfigValidation { .. }));
    }

    #[test]
    fn test_default_label() {
        let url = Url::parse("http://example.com/search?q=rust").unwrap();
        assert_eq!(default_label(&Method::GET, &url), "GET - /search?q=rust");

        let url = Url::parse("http://example.com/login").unwrap();
        let spec = HttpRequestSpec::new(Method::POST, url);
        assert_eq!(spec.label, "POST - /login");
        assert_eq!(spec.with_label("  ").label, "POST - /login");
    }

    #[test]
    fn test_invalid_header_rejected() {
        let spec = HttpRequestSpec::new(Method::GET, Url::parse("http://example.com/").unwrap());
        assert!(spec.clone().with_header("bad header", "x").is_err());
        assert!(spec.clone().with_header("accept", "bad\nvalue").is_err());
        let spec = spec.with_header("accept", "text/html").unwrap();
        assert_eq!(spec.headers.get("accept").unwrap(), "text/html");
    }

    #[tokio::test]
    async fn test_transport_error_is_recorded() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let spec = HttpRequestSpec::new(Method::GET, url).expect_status(200);
        let task = http_task(reqwest::Client::new(), spec);

        let record = task.execute_once(&RunContext::new(), 0).await;

        assert!(!record.success);
        assert!(!record.error.is_empty());
        assert_eq!(record.status, None);
        assert_eq!(record.label, "GET - /");
    }
}
