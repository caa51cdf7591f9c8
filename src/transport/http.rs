//! # HTTP Transport
//!
//! [`TransportAdapter`] over the storage backend's REST API:
//! - `POST /api/sessions/start`
//! - `POST /api/sessions/{id}/stop`
//! - `POST /api/sensor-data/batch`
//!
//! Every request carries a timeout so a hung server cannot stall a flush.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TransportAdapter;
use crate::error::{Result, SenseBridgeError};
use crate::session::types::{NewSession, SensorReadingRecord, Session, SessionEnd};

#[derive(Deserialize)]
struct SessionResponse<T> {
    session: T,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    readings: &'a [SensorReadingRecord],
}

#[derive(Deserialize)]
struct BatchResponse {
    count: usize,
}

/// REST client for the storage backend
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` (e.g. `http://127.0.0.1:8787`)
    ///
    /// # Errors
    ///
    /// Returns `TransportFailure` if the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body and decode the JSON reply, mapping non-2xx to errors
    async fn post<B, R>(&self, path: &str, body: Option<&B>) -> Result<R>
    where
        B: Serialize + ?Sized + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let url = self.url(path);
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SenseBridgeError::TransportFailure(format!(
                "POST {} returned {}: {}",
                path, status, text
            )));
        }

        debug!("POST {} -> {}", path, status);
        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl TransportAdapter for HttpTransport {
    async fn create_session(&self, request: &NewSession) -> Result<Session> {
        let reply: SessionResponse<Session> = self.post("/api/sessions/start", Some(request)).await?;
        Ok(reply.session)
    }

    async fn end_session(&self, session_id: &str) -> Result<SessionEnd> {
        let path = format!("/api/sessions/{}/stop", session_id);
        let reply: SessionResponse<SessionEnd> = self.post::<(), _>(&path, None).await?;
        Ok(reply.session)
    }

    async fn send_batch(&self, readings: &[SensorReadingRecord]) -> Result<usize> {
        let reply: BatchResponse = self
            .post("/api/sensor-data/batch", Some(&BatchRequest { readings }))
            .await?;
        Ok(reply.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::SessionStatus;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve exactly one HTTP request with a canned reply; yields the raw request
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];

            // Read headers, then the declared body length
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
            }

            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });

        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let transport = HttpTransport::new("http://localhost:8787/", Duration::from_secs(1)).unwrap();
        assert_eq!(transport.base_url(), "http://localhost:8787");
        assert_eq!(transport.url("/api/x"), "http://localhost:8787/api/x");
    }

    #[tokio::test]
    async fn test_create_session() {
        let (url, server) = serve_once(
            "201 Created",
            r#"{"success":true,"session":{"id":"s1","name":"Bench Test","device_name":"Nicla","device_id":null,"started_at":1000,"status":"active"}}"#,
        )
        .await;

        let transport = HttpTransport::new(&url, Duration::from_secs(5)).unwrap();
        let session = transport
            .create_session(&NewSession::new("Bench Test").with_device("Nicla", None))
            .await
            .unwrap();
        assert_eq!(session.id, "s1");
        assert_eq!(session.status, SessionStatus::Active);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/sessions/start"));
        assert!(request.contains(r#""name":"Bench Test""#));
    }

    #[tokio::test]
    async fn test_end_session() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"success":true,"session":{"id":"s1","ended_at":2000,"status":"completed"}}"#,
        )
        .await;

        let transport = HttpTransport::new(&url, Duration::from_secs(5)).unwrap();
        let end = transport.end_session("s1").await.unwrap();
        assert_eq!(end.ended_at, 2000);
        assert_eq!(end.status, SessionStatus::Completed);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/sessions/s1/stop"));
    }

    #[tokio::test]
    async fn test_send_batch() {
        let (url, server) = serve_once("201 Created", r#"{"success":true,"count":2,"timestamp":5}"#).await;

        let transport = HttpTransport::new(&url, Duration::from_secs(5)).unwrap();
        let readings = vec![
            SensorReadingRecord {
                session_id: "s1".to_string(),
                timestamp: 1,
                co2: Some(600.0),
                ..Default::default()
            };
            2
        ];
        assert_eq!(transport.send_batch(&readings).await.unwrap(), 2);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/sensor-data/batch"));
        assert!(request.contains(r#""readings":["#));
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let (url, server) = serve_once(
            "500 Internal Server Error",
            r#"{"error":"Failed to store batch sensor data"}"#,
        )
        .await;

        let transport = HttpTransport::new(&url, Duration::from_secs(5)).unwrap();
        match transport.send_batch(&[SensorReadingRecord::default()]).await {
            Err(SenseBridgeError::TransportFailure(msg)) => assert!(msg.contains("500")),
            other => panic!("Expected TransportFailure, got: {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            transport.end_session("s1").await,
            Err(SenseBridgeError::TransportFailure(_))
        ));
    }
}
