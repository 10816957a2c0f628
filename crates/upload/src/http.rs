//! `reqwest`-backed [`HttpTransport`].

use crate::error::UploadError;
use crate::transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, RequestBody, TransportFuture,
};

/// HTTP transport over a shared `reqwest::Client` (rustls).
#[derive(Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default client.
    pub fn new() -> Result<Self, UploadError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("assetpush/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
        Box::pin(async move {
            let method = match request.method {
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
            };

            let mut builder = self.http.request(method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder = match request.body {
                RequestBody::Form(fields) => builder.form(&fields),
                RequestBody::Bytes(data) => builder.body(data),
            };

            let resp = builder.send().await?;
            let status = resp.status().as_u16();
            let body = resp.bytes().await?.to_vec();
            Ok(HttpResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Reads one full HTTP/1.1 request (headers plus Content-Length body).
    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Starts a one-shot mock server; the captured request is sent on the channel.
    async fn mock_server(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::sync::oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let request = read_request(&mut stream).await;
                let resp = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
                let _ = tx.send(request);
            }
        });

        (format!("http://127.0.0.1:{port}"), rx)
    }

    #[tokio::test]
    async fn posts_form_body() {
        let (url, captured) = mock_server("200 OK", r#"{"files":[]}"#).await;
        let transport = ReqwestTransport::new().unwrap();

        let req = HttpRequest::post_form(
            format!("{url}/content/dam/f.initiateUpload.json"),
            vec![
                ("path".into(), "/content/dam/f".into()),
                ("fileName".into(), "a b.jpg".into()),
            ],
        )
        .with_header("Authorization", "Basic YWRtaW46YWRtaW4=");
        let resp = transport.send(req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, br#"{"files":[]}"#);

        let raw = captured.await.unwrap();
        assert!(raw.starts_with("POST /content/dam/f.initiateUpload.json"));
        assert!(raw.to_ascii_lowercase().contains("application/x-www-form-urlencoded"));
        assert!(raw.contains("authorization: Basic YWRtaW46YWRtaW4="));
        assert!(raw.contains("path=%2Fcontent%2Fdam%2Ff"));
        assert!(raw.contains("fileName=a+b.jpg"));
    }

    #[tokio::test]
    async fn puts_raw_bytes() {
        let (url, captured) = mock_server("201 Created", "").await;
        let transport = ReqwestTransport::new().unwrap();

        let resp = transport
            .send(HttpRequest::put_bytes(format!("{url}/blob/1"), b"PARTDATA".to_vec()))
            .await
            .unwrap();
        assert_eq!(resp.status, 201);

        let raw = captured.await.unwrap();
        assert!(raw.starts_with("PUT /blob/1"));
        assert!(raw.contains("content-length: 8"));
        assert!(raw.ends_with("PARTDATA"));
    }

    #[tokio::test]
    async fn error_status_is_returned_not_raised() {
        let (url, _captured) = mock_server("500 Internal Server Error", "boom").await;
        let transport = ReqwestTransport::new().unwrap();

        let resp = transport
            .send(HttpRequest::put_bytes(format!("{url}/blob/1"), vec![1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(resp.status, 500);
        let err = resp.error_for_status().unwrap_err();
        assert!(matches!(err, UploadError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn connection_refused_is_request_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = ReqwestTransport::new().unwrap();
        let err = transport
            .send(HttpRequest::put_bytes(format!("http://127.0.0.1:{port}/x"), vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Request(_)));
    }
}
