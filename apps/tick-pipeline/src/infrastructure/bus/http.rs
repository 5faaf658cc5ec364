//! Notification gateway client.
//!
//! | Operation     | Request                                          |
//! |---------------|--------------------------------------------------|
//! | publish       | `POST {base}/topics/{topic}/messages`            |
//! | receive       | `GET {base}/queues/{queue}/messages?max=N`       |
//! | acknowledge   | `DELETE {base}/queues/{queue}/messages/{receipt}` |
//! | topic exists  | `GET {base}/topics/{topic}`                      |

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::application::ports::{BusError, InboundMessage, NotificationBus, OutboundMessage};

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    subject: &'a str,
    body: &'a str,
    attributes: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct ReceiveResponse {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    message_id: String,
    receipt: String,
    body: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

/// [`NotificationBus`] over the gateway's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpBus {
    client: Client,
    base_url: String,
}

impl HttpBus {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::NotConfigured` if the URL is empty or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BusError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(BusError::NotConfigured("empty gateway URL".to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BusError::NotConfigured(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    async fn check(response: Response, not_found: BusError) -> Result<Response, BusError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(not_found);
        }
        let message = response.text().await.unwrap_or_default();
        Err(BusError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

fn unreachable(e: &reqwest::Error) -> BusError {
    BusError::Unreachable(e.to_string())
}

#[async_trait]
impl NotificationBus for HttpBus {
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<String, BusError> {
        let url = format!("{}/topics/{topic}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&PublishRequest {
                subject: &message.subject,
                body: &message.body,
                attributes: &message.attributes,
            })
            .send()
            .await
            .map_err(|e| unreachable(&e))?;

        let response = Self::check(response, BusError::UnknownTopic(topic.to_string())).await?;
        let parsed: PublishResponse = response
            .json()
            .await
            .map_err(|e| BusError::InvalidResponse(e.to_string()))?;
        Ok(parsed.message_id)
    }

    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> Result<Vec<InboundMessage>, BusError> {
        let url = format!("{}/queues/{queue}/messages", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("max", max_messages)])
            .send()
            .await
            .map_err(|e| unreachable(&e))?;

        let response = Self::check(response, BusError::UnknownQueue(queue.to_string())).await?;
        let parsed: ReceiveResponse = response
            .json()
            .await
            .map_err(|e| BusError::InvalidResponse(e.to_string()))?;

        Ok(parsed
            .messages
            .into_iter()
            .map(|m| InboundMessage {
                message_id: m.message_id,
                receipt: m.receipt,
                body: m.body,
                attributes: m.attributes,
            })
            .collect())
    }

    async fn acknowledge(&self, queue: &str, receipt: &str) -> Result<(), BusError> {
        let url = format!("{}/queues/{queue}/messages/{receipt}", self.base_url);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| unreachable(&e))?;
        Self::check(response, BusError::UnknownQueue(queue.to_string())).await?;
        Ok(())
    }

    async fn topic_exists(&self, topic: &str) -> Result<bool, BusError> {
        let url = format!("{}/topics/{topic}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unreachable(&e))?;
        match Self::check(response, BusError::UnknownTopic(topic.to_string())).await {
            Ok(_) => Ok(true),
            Err(BusError::UnknownTopic(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn bus(server: &MockServer) -> HttpBus {
        HttpBus::new(&server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn empty_url_is_not_configured() {
        assert!(matches!(
            HttpBus::new("  ", Duration::from_secs(1)),
            Err(BusError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn publish_posts_message_to_topic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/topics/pipeline-events/messages"))
            .and(body_partial_json(serde_json::json!({
                "subject": "Pipeline event: tick_generated",
                "attributes": {"event_type": "tick_generated"}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"message_id": "m-1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let message = OutboundMessage {
            subject: "Pipeline event: tick_generated".to_string(),
            body: "{}".to_string(),
            attributes: BTreeMap::from([(
                "event_type".to_string(),
                "tick_generated".to_string(),
            )]),
        };
        let id = bus(&server).publish("pipeline-events", message).await.unwrap();
        assert_eq!(id, "m-1");
    }

    #[tokio::test]
    async fn receive_and_acknowledge() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queues/driver/messages"))
            .and(query_param("max", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [
                    {"message_id": "m-1", "receipt": "r-1", "body": "{}"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/queues/driver/messages/r-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let bus = bus(&server);
        let messages = bus.receive("driver", 10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].receipt, "r-1");
        assert!(messages[0].attributes.is_empty());
        bus.acknowledge("driver", "r-1").await.unwrap();
    }

    #[tokio::test]
    async fn topic_lookup_maps_not_found_to_false() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/topics/known"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/topics/unknown"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let bus = bus(&server);
        assert!(bus.topic_exists("known").await.unwrap());
        assert!(!bus.topic_exists("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn server_errors_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queues/driver/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let result = bus(&server).receive("driver", 1).await;
        assert_eq!(
            result,
            Err(BusError::Rejected {
                status: 500,
                message: "boom".to_string()
            })
        );
    }

    #[tokio::test]
    async fn unreachable_gateway() {
        let bus = HttpBus::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(matches!(
            bus.topic_exists("events").await,
            Err(BusError::Unreachable(_))
        ));
    }
}
