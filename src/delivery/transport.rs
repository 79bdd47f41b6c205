//! HTTP delivery to subscriber endpoints.
//!
//! POSTs a JSON [`DeliveryNotice`] and treats only `200 OK` as an
//! acknowledgment. The stable delivery id is also sent as a header so
//! receivers can dedup without parsing the body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::interfaces::{DeliveryError, DeliveryNotice, DeliveryTransport};

/// Header carrying the delivery id.
pub const DELIVERY_ID_HEADER: &str = "X-Delivery-Id";

/// reqwest-backed transport.
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport whose client gives up after `timeout`.
    ///
    /// The worker applies the same deadline around every attempt; the
    /// client timeout only makes sure sockets are released as well.
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    fn map_error(&self, err: reqwest::Error) -> DeliveryError {
        if err.is_timeout() {
            DeliveryError::Timeout(self.timeout)
        } else {
            DeliveryError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn deliver(&self, endpoint: &str, notice: &DeliveryNotice) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(endpoint)
            .header(DELIVERY_ID_HEADER, notice.delivery_id.to_string())
            .json(notice)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if status == StatusCode::OK {
            debug!(
                endpoint = %endpoint,
                delivery_id = %notice.delivery_id,
                attempt = notice.attempt,
                "Delivery acknowledged"
            );
            Ok(())
        } else {
            warn!(
                endpoint = %endpoint,
                delivery_id = %notice.delivery_id,
                status = %status,
                "Delivery not acknowledged"
            );
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeliveryTask, NewEvent};
    use chrono::Utc;

    fn notice() -> DeliveryNotice {
        let event = NewEvent::new("space.shooter", b"proto".to_vec()).into_event(1, Utc::now());
        DeliveryNotice::new(&event, &DeliveryTask::new(1, "alice"))
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let transport = HttpTransport::new(Duration::from_millis(500)).unwrap();

        // Port 9 (discard) on localhost is not expected to be listening.
        let result = transport.deliver("http://127.0.0.1:9/hook", &notice()).await;

        assert!(matches!(
            result,
            Err(DeliveryError::Transport(_)) | Err(DeliveryError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_non_200_is_rejected() {
        use axum::{http::StatusCode as AxumStatus, routing::post, Router};

        let app = Router::new().route("/hook", post(|| async { AxumStatus::ACCEPTED }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
        let result = transport
            .deliver(&format!("http://{}/hook", addr), &notice())
            .await;

        assert!(matches!(result, Err(DeliveryError::Rejected { status: 202 })));
    }

    #[tokio::test]
    async fn test_200_acknowledges_and_sends_delivery_id() {
        use axum::{http::HeaderMap, routing::post, Json, Router};
        use tokio::sync::mpsc;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/hook",
            post(move |headers: HeaderMap, Json(body): Json<DeliveryNotice>| {
                let tx = tx.clone();
                async move {
                    let header = headers
                        .get(DELIVERY_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let _ = tx.send((header, body));
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
        let notice = notice();
        transport
            .deliver(&format!("http://{}/hook", addr), &notice)
            .await
            .unwrap();

        let (header, body) = rx.recv().await.unwrap();
        assert_eq!(header, Some(notice.delivery_id.to_string()));
        assert_eq!(body, notice);
    }
}
