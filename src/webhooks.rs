//! Outgoing webhook dispatch.
//!
//! Subscriptions are persisted in the index store and gated at registration
//! time: the URL must pass an SSRF filter (scheme, hostname denylist, and a
//! resolved-IP range check) and the secret must be long enough to key an
//! HMAC. Deliveries run on a bounded worker pool; each attempt is signed,
//! bounded by a timeout, and logged. Delivery is at-most-once: failures are
//! recorded, never retried.

use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::{Host, Url};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{DeliveryAttempt, IndexStore, SubscriptionRow};

/// Event types a subscription may listen for; `*` matches everything.
pub const EVENT_TYPES: &[&str] = &[
    "task.created",
    "task.updated",
    "doc.created",
    "doc.updated",
    "session.logged",
    "plan.created",
    "plan.updated",
    "project.initialized",
    "index.reindexed",
    "*",
];

pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_CONCURRENT_DELIVERIES: usize = 10;
pub const MAX_SUBSCRIPTIONS_PER_PROJECT: i64 = 50;
pub const MAX_SUBSCRIPTIONS_GLOBAL: i64 = 200;
pub const MIN_SECRET_LEN: usize = 32;

pub const SIGNATURE_HEADER: &str = "X-Vibe-Signature";
pub const EVENT_HEADER: &str = "X-Vibe-Event";
pub const EVENT_ID_HEADER: &str = "X-Vibe-Event-ID";

/// Hostnames rejected outright, before any DNS lookup.
const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "0.0.0.0",
    "::1",
    "metadata.google.internal",
    "169.254.169.254",
];

type HmacSha256 = Hmac<Sha256>;

// ---- signing ----

/// Hex HMAC-SHA256 of the exact payload bytes under `secret`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a `sha256=<hex>` (or bare hex) signature. Comparison runs in
/// constant time via `Mac::verify_slice`.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let hex_part = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

// ---- SSRF filter ----

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_blocked_ip(IpAddr::V4(mapped));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Reject URLs that could reach internal or special-use addresses.
///
/// The hostname is resolved and every returned address checked, so a
/// public-looking name pointing at a private IP is rejected at registration
/// time. A name that fails to resolve is allowed; it may simply be
/// unreachable right now, and delivery failures are logged anyway.
pub async fn validate_url(url: &str) -> Result<()> {
    let parsed =
        Url::parse(url).map_err(|e| Error::InvalidArgument(format!("invalid URL: {}", e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Unsafe("URL must use http or https".to_string()));
    }

    let host = parsed
        .host()
        .ok_or_else(|| Error::Unsafe("URL must have a hostname".to_string()))?;

    match host {
        Host::Ipv4(ip) => {
            if is_blocked_ip(IpAddr::V4(ip)) {
                return Err(Error::Unsafe(format!("blocked IP address: {}", ip)));
            }
        }
        Host::Ipv6(ip) => {
            if is_blocked_ip(IpAddr::V6(ip)) {
                return Err(Error::Unsafe(format!("blocked IP address: {}", ip)));
            }
        }
        Host::Domain(domain) => {
            let lower = domain.to_lowercase();
            if BLOCKED_HOSTNAMES.contains(&lower.as_str()) {
                return Err(Error::Unsafe(format!("blocked hostname: {}", lower)));
            }
            let port = parsed.port_or_known_default().unwrap_or(80);
            let lookup_result = tokio::net::lookup_host((lower.as_str(), port)).await;
            if let Ok(addrs) = lookup_result {
                for addr in addrs {
                    if is_blocked_ip(addr.ip()) {
                        return Err(Error::Unsafe(format!(
                            "URL resolves to blocked IP range: {}",
                            addr.ip()
                        )));
                    }
                }
            }
        }
    }

    Ok(())
}

// ---- dispatcher ----

#[derive(Debug)]
struct Delivery {
    subscription: SubscriptionRow,
    event_type: String,
    event_id: String,
    payload: String,
}

/// Registration receipt returned to the caller; never includes the secret.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub subscription_id: i64,
    pub url: String,
    pub event_types: Vec<String>,
    pub project: Option<String>,
}

/// A subscription listing entry with the secret stripped.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    pub id: i64,
    pub url: String,
    pub event_types: Vec<String>,
    pub project: Option<String>,
    pub active: bool,
    pub description: Option<String>,
    pub created_at: String,
}

pub struct WebhookDispatcher {
    store: Arc<IndexStore>,
    sender: std::sync::Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WebhookDispatcher {
    /// Start the dispatcher with its worker pool. Must be called from within
    /// a tokio runtime.
    pub fn new(store: Arc<IndexStore>) -> Result<Arc<WebhookDispatcher>> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| Error::Transient(format!("cannot build HTTP client: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel::<Delivery>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::with_capacity(MAX_CONCURRENT_DELIVERIES);
        for _ in 0..MAX_CONCURRENT_DELIVERIES {
            let rx = Arc::clone(&rx);
            let client = client.clone();
            let store = Arc::clone(&store);
            workers.push(tokio::spawn(async move {
                loop {
                    let delivery = { rx.lock().await.recv().await };
                    match delivery {
                        Some(delivery) => deliver(&client, &store, delivery).await,
                        None => break,
                    }
                }
            }));
        }

        Ok(Arc::new(WebhookDispatcher {
            store,
            sender: std::sync::Mutex::new(Some(tx)),
            workers: std::sync::Mutex::new(workers),
        }))
    }

    /// Register a subscription after URL, secret, event-type, and cap checks.
    pub async fn register(
        &self,
        url: &str,
        secret: &str,
        event_types: &[String],
        project: Option<&str>,
        description: Option<&str>,
    ) -> Result<Registration> {
        validate_url(url).await?;

        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::InvalidArgument(format!(
                "secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }

        if event_types.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one event type is required".to_string(),
            ));
        }
        for event_type in event_types {
            if !EVENT_TYPES.contains(&event_type.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "invalid event type: {}",
                    event_type
                )));
            }
        }

        match project {
            Some(p) => {
                if self.store.count_subscriptions(Some(p)).await? >= MAX_SUBSCRIPTIONS_PER_PROJECT {
                    return Err(Error::LimitExceeded(format!(
                        "maximum subscriptions ({}) reached for project {}",
                        MAX_SUBSCRIPTIONS_PER_PROJECT, p
                    )));
                }
            }
            None => {
                if self.store.count_subscriptions(None).await? >= MAX_SUBSCRIPTIONS_GLOBAL {
                    return Err(Error::LimitExceeded(format!(
                        "maximum global subscriptions ({}) reached",
                        MAX_SUBSCRIPTIONS_GLOBAL
                    )));
                }
            }
        }

        let id = self
            .store
            .create_subscription(url, secret, event_types, project, description)
            .await?;

        tracing::info!(subscription = id, url, "registered webhook subscription");

        Ok(Registration {
            subscription_id: id,
            url: url.to_string(),
            event_types: event_types.to_vec(),
            project: project.map(str::to_string),
        })
    }

    pub async fn unregister(&self, subscription_id: i64) -> Result<()> {
        if !self.store.delete_subscription(subscription_id).await? {
            return Err(Error::NotFound(format!(
                "subscription not found: {}",
                subscription_id
            )));
        }
        tracing::info!(subscription = subscription_id, "unregistered webhook subscription");
        Ok(())
    }

    pub async fn list(&self, project: Option<&str>) -> Result<Vec<SubscriptionInfo>> {
        let subs = self.store.list_subscriptions(project).await?;
        Ok(subs
            .into_iter()
            .map(|sub| SubscriptionInfo {
                id: sub.id,
                url: sub.url,
                event_types: sub.event_types,
                project: sub.project,
                active: sub.active,
                description: sub.description,
                created_at: sub.created_at,
            })
            .collect())
    }

    /// Queue one delivery per matching subscription and return immediately.
    /// A dispatcher that has begun shutdown drops the event. Errors never
    /// reach the caller; a failed lookup is logged and the event dropped.
    pub async fn fire_event(&self, event_type: &str, project: Option<&str>, data: serde_json::Value) {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        let Some(sender) = sender else {
            tracing::warn!(event_type, "dispatcher shutting down, dropping event");
            return;
        };

        let subscriptions = match self.store.subscriptions_for_event(event_type, project).await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::error!(event_type, error = %e, "subscription lookup failed");
                return;
            }
        };
        if subscriptions.is_empty() {
            return;
        }

        let event_id = Uuid::new_v4().to_string();
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let payload = serde_json::json!({
            "event_id": event_id,
            "event_type": event_type,
            "project": project,
            "timestamp": timestamp,
            "data": data,
        });
        let payload = payload.to_string();

        tracing::debug!(event_type, event_id, subscriptions = subscriptions.len(), "firing event");

        for subscription in subscriptions {
            let _ = sender.send(Delivery {
                subscription,
                event_type: event_type.to_string(),
                event_id: event_id.clone(),
                payload: payload.clone(),
            });
        }
    }

    /// Stop accepting new deliveries and wait up to `grace` for in-flight
    /// ones. Workers still running after the grace period are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
        let mut workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };

        let drain = async {
            for worker in &mut workers {
                let _ = worker.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!("webhook deliveries still in flight after grace period, aborting");
            for worker in &workers {
                worker.abort();
            }
        }
        tracing::info!("webhook dispatcher shut down");
    }
}

/// Execute one delivery and append its outcome to the log. Any 2xx response
/// is success; everything else, including timeouts, is a logged failure.
async fn deliver(client: &reqwest::Client, store: &IndexStore, delivery: Delivery) {
    let signature = sign_payload(&delivery.subscription.secret, delivery.payload.as_bytes());

    let response = client
        .post(&delivery.subscription.url)
        .header("Content-Type", "application/json")
        .header(EVENT_HEADER, &delivery.event_type)
        .header(EVENT_ID_HEADER, &delivery.event_id)
        .header(SIGNATURE_HEADER, format!("sha256={}", signature))
        .body(delivery.payload.clone())
        .send()
        .await;

    let (status_code, success, error_message) = match response {
        Ok(response) => {
            let status = response.status();
            if status.is_success() {
                (Some(status.as_u16() as i64), true, None)
            } else {
                let body = response.text().await.unwrap_or_default();
                let truncated: String = body.chars().take(200).collect();
                (
                    Some(status.as_u16() as i64),
                    false,
                    Some(format!("HTTP {}: {}", status.as_u16(), truncated)),
                )
            }
        }
        Err(e) if e.is_timeout() => (None, false, Some("request timed out".to_string())),
        Err(e) => (None, false, Some(e.to_string())),
    };

    if success {
        tracing::info!(
            event = delivery.event_id,
            subscription = delivery.subscription.id,
            url = delivery.subscription.url,
            "webhook delivered"
        );
    } else {
        tracing::warn!(
            event = delivery.event_id,
            subscription = delivery.subscription.id,
            error = error_message.as_deref().unwrap_or(""),
            "webhook delivery failed"
        );
    }

    let attempt = DeliveryAttempt {
        subscription_id: delivery.subscription.id,
        event_type: delivery.event_type,
        event_id: delivery.event_id,
        payload: delivery.payload,
        status_code,
        success,
        error_message,
    };
    if let Err(e) = store.log_delivery(&attempt).await {
        tracing::error!(error = %e, "failed to record webhook delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_is_deterministic() {
        let a = sign_payload("secret-key", b"payload bytes");
        let b = sign_payload("secret-key", b"payload bytes");
        assert_eq!(a, b);
        assert_ne!(a, sign_payload("other-key", b"payload bytes"));
    }

    #[test]
    fn verify_accepts_prefixed_and_bare_signatures() {
        let sig = sign_payload("s", b"p");
        assert!(verify_signature("s", b"p", &sig));
        assert!(verify_signature("s", b"p", &format!("sha256={}", sig)));
        assert!(!verify_signature("s", b"tampered", &sig));
        assert!(!verify_signature("wrong", b"p", &sig));
        assert!(!verify_signature("s", b"p", "not-hex"));
    }

    #[test]
    fn blocked_ip_ranges() {
        let blocked = [
            "127.0.0.1",
            "127.8.8.8",
            "10.0.0.5",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "::1",
            "fc00::1",
            "fdff::1",
            "fe80::1",
            "::ffff:10.0.0.1",
        ];
        for ip in blocked {
            assert!(is_blocked_ip(ip.parse().unwrap()), "{} should be blocked", ip);
        }

        let allowed = ["93.184.216.34", "172.32.0.1", "8.8.8.8", "2606:4700::1111"];
        for ip in allowed {
            assert!(!is_blocked_ip(ip.parse().unwrap()), "{} should be allowed", ip);
        }
    }

    #[tokio::test]
    async fn validate_url_rejects_schemes_and_literals() {
        assert!(matches!(
            validate_url("ftp://example.com/hook").await,
            Err(Error::Unsafe(_))
        ));
        assert!(matches!(
            validate_url("http://localhost:9000/in").await,
            Err(Error::Unsafe(_))
        ));
        assert!(matches!(
            validate_url("http://127.0.0.1:9000/in").await,
            Err(Error::Unsafe(_))
        ));
        assert!(matches!(
            validate_url("http://192.168.0.10/in").await,
            Err(Error::Unsafe(_))
        ));
        assert!(matches!(
            validate_url("http://[::1]/in").await,
            Err(Error::Unsafe(_))
        ));
        assert!(matches!(
            validate_url("not a url").await,
            Err(Error::InvalidArgument(_))
        ));
        // Public literal addresses pass without DNS.
        assert!(validate_url("http://93.184.216.34/hook").await.is_ok());
    }
}
