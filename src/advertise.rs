//! Local network service advertisement.
//!
//! The orchestrator registers the HTTP surface once at startup and
//! deregisters it at shutdown. Multicast DNS itself belongs to an external
//! responder; [`LoggingAdvertiser`] records the registration it would make.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

pub const HTTP_SERVICE_TYPE: &str = "_http._tcp.local.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRecord {
    /// Friendly host name, e.g. `ftcvideo.local`.
    pub hostname: String,
    /// DNS-SD instance name, e.g. `ftcvideo._http._tcp.local.`.
    pub instance_name: String,
    pub service_type: String,
    pub port: u16,
    pub properties: BTreeMap<String, String>,
}

impl ServiceRecord {
    /// Record for the clip server of an event.
    pub fn for_clip_server(mdns_name: &str, port: u16, event_code: &str) -> Self {
        let host = mdns_name.trim_end_matches('.').trim_end_matches(".local");

        let properties = BTreeMap::from([
            ("path".to_string(), "/".to_string()),
            ("description".to_string(), format!("MatchBox - {event_code}")),
            ("event".to_string(), event_code.to_string()),
            ("service".to_string(), "matchbox".to_string()),
        ]);

        Self {
            hostname: format!("{host}.local"),
            instance_name: format!("{host}.{HTTP_SERVICE_TYPE}"),
            service_type: HTTP_SERVICE_TYPE.to_string(),
            port,
            properties,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.hostname, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("service advertisement failed: {0}")]
pub struct AdvertiseError(pub String);

#[async_trait]
pub trait ServiceAdvertiser: Send + Sync {
    async fn register(&self, record: &ServiceRecord) -> Result<(), AdvertiseError>;
    async fn deregister(&self) -> Result<(), AdvertiseError>;
}

/// Advertiser that only logs and remembers the current registration.
#[derive(Debug, Default)]
pub struct LoggingAdvertiser {
    current: Mutex<Option<ServiceRecord>>,
}

impl LoggingAdvertiser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ServiceRecord> {
        self.current.lock().clone()
    }
}

#[async_trait]
impl ServiceAdvertiser for LoggingAdvertiser {
    async fn register(&self, record: &ServiceRecord) -> Result<(), AdvertiseError> {
        tracing::info!(
            instance = %record.instance_name,
            port = record.port,
            "Advertising clip server at {}",
            record.url()
        );
        *self.current.lock() = Some(record.clone());
        Ok(())
    }

    async fn deregister(&self) -> Result<(), AdvertiseError> {
        if let Some(record) = self.current.lock().take() {
            tracing::info!(instance = %record.instance_name, "Withdrew service advertisement");
        }
        Ok(())
    }
}
