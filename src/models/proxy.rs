use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcomes recorded against a proxy before auto-deactivation can trigger.
const MIN_HEALTH_SAMPLES: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    /// Cumulative moving average over all recorded requests.
    #[serde(default)]
    pub avg_response_ms: u64,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16, protocol: ProxyProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            username: None,
            password: None,
            is_active: true,
            success_count: 0,
            failure_count: 0,
            avg_response_ms: 0,
            last_used: None,
        }
    }

    /// Stable identity within a source's pool.
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full egress URL, with credentials when configured.
    pub fn url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!(
                "{}://{user}:{pass}@{}:{}",
                self.protocol.scheme(),
                self.host,
                self.port
            ),
            _ => format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port),
        }
    }

    pub fn record(&mut self, ok: bool, latency_ms: u64) {
        let samples = self.success_count + self.failure_count;
        self.avg_response_ms =
            (self.avg_response_ms * samples + latency_ms) / (samples + 1);
        if ok {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
    }

    pub fn failure_rate(&self) -> f64 {
        let samples = self.success_count + self.failure_count;
        if samples == 0 {
            return 0.0;
        }
        self.failure_count as f64 / samples as f64
    }
}

/// Rotating proxy pool embedded in a source. The cursor is persisted so
/// rotation continues across process restarts instead of resetting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyPoolState {
    pub endpoints: Vec<ProxyEndpoint>,
    pub cursor: usize,
    /// When set, an empty active pool terminates the run instead of
    /// falling back to a direct connection.
    pub require_proxy: bool,
    /// Failure-rate threshold (0..1) above which a proxy is deactivated,
    /// once it has at least MIN_HEALTH_SAMPLES outcomes. None disables
    /// auto-deactivation.
    pub deactivate_threshold: Option<f64>,
}

impl ProxyPoolState {
    /// Round-robin pick over active endpoints, starting at the cursor.
    pub fn next(&mut self, now: DateTime<Utc>) -> Option<ProxyEndpoint> {
        let len = self.endpoints.len();
        if len == 0 {
            return None;
        }
        for i in 0..len {
            let idx = (self.cursor + i) % len;
            if self.endpoints[idx].is_active {
                self.cursor = (idx + 1) % len;
                self.endpoints[idx].last_used = Some(now);
                return Some(self.endpoints[idx].clone());
            }
        }
        None
    }

    /// Update health counters for the endpoint identified by `key`.
    pub fn record(&mut self, key: &str, ok: bool, latency_ms: u64) {
        let threshold = self.deactivate_threshold;
        if let Some(endpoint) = self.endpoints.iter_mut().find(|e| e.key() == key) {
            endpoint.record(ok, latency_ms);
            if !ok
                && let Some(threshold) = threshold
                && endpoint.success_count + endpoint.failure_count >= MIN_HEALTH_SAMPLES
                && endpoint.failure_rate() > threshold
            {
                tracing::warn!(
                    proxy = %endpoint.key(),
                    rate = endpoint.failure_rate(),
                    "Deactivating proxy: failure rate over threshold"
                );
                endpoint.is_active = false;
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.endpoints.iter().filter(|e| e.is_active).count()
    }
}
