use std::collections::HashMap;
use std::time::{Duration, Instant};

const LATENCY_ALPHA: f64 = 0.1;

/// Point-in-time counters for a [`crate::ConnectionManager`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retry_attempts: u64,
    pub new_connections: u64,
    pub reused_connections: u64,
    pub average_latency: Duration,
}

impl ConnectionStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }

    pub fn reuse_ratio(&self) -> f64 {
        let opened = self.new_connections + self.reused_connections;
        if opened == 0 {
            return 0.0;
        }
        self.reused_connections as f64 / opened as f64
    }
}

/// The HTTP client does not say whether a request rode a pooled connection,
/// so reuse is estimated: each finished request parks one idle slot for its
/// host (up to the pool bound), and a request that finds a slot younger than
/// the idle timeout counts as reused.
#[derive(Debug)]
pub(crate) struct StatsRecorder {
    stats: ConnectionStats,
    latency_ms: Option<f64>,
    hosts: HashMap<String, IdleSlots>,
    max_idle_per_host: usize,
    idle_timeout: Duration,
}

#[derive(Debug)]
struct IdleSlots {
    idle: usize,
    last_release: Instant,
}

impl StatsRecorder {
    pub(crate) fn new(max_idle_per_host: usize, idle_timeout: Duration) -> Self {
        Self {
            stats: ConnectionStats::default(),
            latency_ms: None,
            hosts: HashMap::new(),
            max_idle_per_host,
            idle_timeout,
        }
    }

    pub(crate) fn begin(&mut self, host: &str, now: Instant) {
        self.stats.total_requests += 1;
        let idle_timeout = self.idle_timeout;
        let slot = self.hosts.get_mut(host).filter(|slot| {
            slot.idle > 0 && now.saturating_duration_since(slot.last_release) <= idle_timeout
        });
        match slot {
            Some(slot) => {
                slot.idle -= 1;
                self.stats.reused_connections += 1;
            }
            None => self.stats.new_connections += 1,
        }
    }

    /// Returns the connection to the host's idle set.
    pub(crate) fn release(&mut self, host: &str, now: Instant) {
        let max_idle = self.max_idle_per_host;
        let slot = self.hosts.entry(host.to_string()).or_insert(IdleSlots {
            idle: 0,
            last_release: now,
        });
        if now.saturating_duration_since(slot.last_release) > self.idle_timeout {
            slot.idle = 0;
        }
        slot.idle = (slot.idle + 1).min(max_idle);
        slot.last_release = now;
    }

    pub(crate) fn succeeded(&mut self, latency: Duration) {
        self.stats.successful_requests += 1;
        self.sample(latency);
    }

    pub(crate) fn failed(&mut self, latency: Option<Duration>) {
        self.stats.failed_requests += 1;
        if let Some(latency) = latency {
            self.sample(latency);
        }
    }

    pub(crate) fn retried(&mut self) {
        self.stats.retry_attempts += 1;
    }

    fn sample(&mut self, latency: Duration) {
        let sample = latency.as_secs_f64() * 1000.0;
        let average = match self.latency_ms {
            Some(average) => LATENCY_ALPHA * sample + (1.0 - LATENCY_ALPHA) * average,
            None => sample,
        };
        self.latency_ms = Some(average);
        self.stats.average_latency = Duration::from_secs_f64(average.max(0.0) / 1000.0);
    }

    pub(crate) fn snapshot(&self) -> ConnectionStats {
        self.stats.clone()
    }
}
