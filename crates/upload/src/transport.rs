//! Abstract HTTP transport.
//!
//! The coordinator only needs to submit one request and await its response.
//! Dropping the returned future aborts the request; timeouts and
//! cancellation are applied by the caller.

use std::future::Future;
use std::pin::Pin;

use assetpush_protocol::FormFields;

use crate::error::UploadError;

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, UploadError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
    Put,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded` pairs, in order.
    Form(FormFields),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

/// One HTTP operation.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn post_form(url: impl Into<String>, form: FormFields) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Form(form),
        }
    }

    pub fn put_bytes(url: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            method: Method::Put,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Bytes(data),
        }
    }

    /// Appends headers after any already present.
    pub fn with_headers<'h>(
        mut self,
        headers: impl IntoIterator<Item = &'h (String, String)>,
    ) -> Self {
        self.headers.extend(headers.into_iter().cloned());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body of a completed HTTP operation.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into [`UploadError::Http`].
    pub fn error_for_status(self) -> Result<Self, UploadError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(UploadError::Http {
                status: self.status,
                body: String::from_utf8_lossy(&self.body).into_owned(),
            })
        }
    }
}

/// Submits HTTP operations on behalf of the coordinator.
///
/// Implemented by [`ReqwestTransport`](crate::ReqwestTransport) for real
/// uploads and by mocks in tests.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_>;
}
