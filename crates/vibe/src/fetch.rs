//! Network helpers
//!
//! Thin passthroughs to `reqwest`. `get` reports failures to the caller;
//! `post` logs them and carries on.

use serde_json::Value;
use url::Url;

use crate::error::{Result, VibeError};
use crate::handle::Handle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    #[default]
    Json,
    Text,
}

/// A decoded response body
#[derive(Debug, Clone, PartialEq)]
pub enum FetchData {
    Json(Value),
    Text(String),
}

impl FetchData {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FetchData::Json(value) => Some(value),
            FetchData::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FetchData::Text(text) => Some(text),
            FetchData::Json(_) => None,
        }
    }
}

impl Handle {
    fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.vibe.config().fetch_timeout())
            .build()?)
    }

    /// GET `url`, decode the body as `response_type` and hand it to
    /// `callback` together with this handle
    pub async fn get(
        &self,
        url: &str,
        response_type: ResponseType,
        callback: impl FnOnce(FetchData, &Handle),
    ) -> Result<()> {
        let url = Url::parse(url)?;
        tracing::debug!("GET {}", url);

        let response = self.http_client()?.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(VibeError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let data = match response_type {
            ResponseType::Json => FetchData::Json(response.json().await?),
            ResponseType::Text => FetchData::Text(response.text().await?),
        };
        callback(data, self);
        Ok(())
    }

    /// POST `body` with the given content type. JSON responses are decoded,
    /// anything else is passed on as text. Failures are logged, never
    /// returned.
    pub async fn post(
        &self,
        url: &str,
        body: impl Into<String>,
        content_type: &str,
        callback: impl FnOnce(FetchData),
    ) {
        match self.try_post(url, body.into(), content_type).await {
            Ok(data) => callback(data),
            Err(err) => tracing::warn!("POST {} failed: {}", url, err),
        }
    }

    async fn try_post(&self, url: &str, body: String, content_type: &str) -> Result<FetchData> {
        let url = Url::parse(url)?;
        let response = self
            .http_client()?
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));

        let text = response.text().await?;
        if is_json {
            Ok(FetchData::Json(serde_json::from_str(&text)?))
        } else {
            Ok(FetchData::Text(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer one request with `status`, `content_type` and `body`, and
    /// return what the client sent
    async fn serve_once(
        status: &'static str,
        content_type: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/data", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (url, task)
    }

    #[tokio::test]
    async fn test_get_json() {
        let vibe = fixture(r#"<div id="app"></div>"#);
        let app = vibe.get_by_id("app").unwrap();
        let (url, server) = serve_once("200 OK", "application/json", r#"{"title":"hello"}"#).await;

        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        app.get(&url, ResponseType::Json, move |data, h| {
            *slot.lock().unwrap() = Some((data, h.node()));
        })
        .await
        .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /data"));
        assert_eq!(
            *seen.lock().unwrap(),
            Some((FetchData::Json(json!({"title": "hello"})), app.node()))
        );
    }

    #[tokio::test]
    async fn test_get_status_error() {
        let vibe = fixture("");
        let (url, _server) = serve_once("404 Not Found", "text/plain", "nope").await;
        let err = vibe
            .body()
            .get(&url, ResponseType::Text, |_, _| panic!("callback on error"))
            .await
            .unwrap_err();
        assert!(matches!(err, VibeError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_get_rejects_bad_url() {
        let vibe = fixture("");
        let err = vibe
            .body()
            .get("not a url", ResponseType::Json, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, VibeError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_post_sends_content_type() {
        let vibe = fixture("");
        let (url, server) = serve_once("200 OK", "text/plain", "stored").await;

        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        vibe.body()
            .post(&url, "a=1", "application/x-www-form-urlencoded", move |data| {
                *slot.lock().unwrap() = Some(data);
            })
            .await;

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("post /data"));
        assert!(request.contains("content-type: application/x-www-form-urlencoded"));
        assert_eq!(*seen.lock().unwrap(), Some(FetchData::Text("stored".into())));
    }

    #[tokio::test]
    async fn test_post_failure_is_swallowed() {
        init_tracing();
        let vibe = fixture("");
        let (url, _server) = serve_once("500 Internal Server Error", "text/plain", "boom").await;
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        vibe.body()
            .post(&url, "{}", "application/json", move |_| *flag.lock().unwrap() = true)
            .await;
        assert!(!*called.lock().unwrap());
    }
}
