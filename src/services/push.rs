use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushClient, WebPushError,
    WebPushMessage, WebPushMessageBuilder, URL_SAFE_NO_PAD,
};

use crate::db::models::PushSubscription;

/// Classified failure of a single push delivery attempt.
///
/// The transport reports what happened; the dispatcher decides what that
/// means for storage (pruning a `Gone` endpoint, logging a `Transient` one).
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The push service answered 404 or 410: the endpoint is permanently
    /// invalid and should be removed from the subscription store.
    #[error("subscription endpoint gone")]
    Gone,

    /// Any other failure (network error, 5xx, malformed keys). The endpoint
    /// is kept; the attempt simply does not count as a success.
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

/// Delivers one payload to one subscription endpoint.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &str,
    ) -> Result<(), DeliveryError>;
}

/// Webpush-protocol transport: AES-GCM payload encryption against the
/// subscription's `p256dh`/`auth` keys, VAPID-signed Authorization header.
#[derive(Clone)]
pub struct WebPushTransport {
    private_key: String,
    subject: String,
    client: Arc<WebPushClient>,
    timeout: Duration,
}

impl WebPushTransport {
    pub fn new(
        private_key: String,
        subject: String,
        timeout: Duration,
    ) -> Result<Self, WebPushError> {
        let client = WebPushClient::new()?;
        Ok(Self {
            private_key,
            subject,
            client: Arc::new(client),
            timeout,
        })
    }

    fn build_message(
        &self,
        subscription_info: &SubscriptionInfo,
        payload: &str,
    ) -> Result<WebPushMessage, WebPushError> {
        let mut builder = WebPushMessageBuilder::new(subscription_info)?;
        builder.set_payload(ContentEncoding::Aes128Gcm, payload.as_bytes());

        let mut signature_builder = VapidSignatureBuilder::from_base64(
            &self.private_key,
            URL_SAFE_NO_PAD,
            subscription_info,
        )?;
        signature_builder.add_claim("sub", self.subject.as_str());
        builder.set_vapid_signature(signature_builder.build()?);

        builder.build()
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &str,
    ) -> Result<(), DeliveryError> {
        let subscription_info = SubscriptionInfo::new(
            subscription.endpoint.clone(),
            subscription.p256dh.clone(),
            subscription.auth.clone(),
        );
        let message = self
            .build_message(&subscription_info, payload)
            .map_err(classify)?;

        // The cycle processes subscriptions sequentially, so one hanging
        // push service call would stall every remaining reminder without
        // this bound.
        match tokio::time::timeout(self.timeout, self.client.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(classify(err)),
            Err(_) => Err(DeliveryError::Transient(format!(
                "push request timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

fn classify(err: WebPushError) -> DeliveryError {
    match err {
        WebPushError::EndpointNotFound | WebPushError::EndpointNotValid => DeliveryError::Gone,
        other => DeliveryError::Transient(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gone_endpoints_are_distinguished_from_transient_failures() {
        assert!(matches!(
            classify(WebPushError::EndpointNotFound),
            DeliveryError::Gone
        ));
        assert!(matches!(
            classify(WebPushError::EndpointNotValid),
            DeliveryError::Gone
        ));
        assert!(matches!(
            classify(WebPushError::ServerError(None)),
            DeliveryError::Transient(_)
        ));
        assert!(matches!(
            classify(WebPushError::InvalidUri),
            DeliveryError::Transient(_)
        ));
    }
}
