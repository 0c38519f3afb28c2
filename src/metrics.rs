//! Prometheus-compatible metrics endpoint
//!
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Samples kept for tick-time percentiles
const TICK_HISTORY_LEN: usize = 1000;

/// Metrics registry for the game server
#[derive(Debug)]
pub struct Metrics {
    // Sessions
    pub players_total: AtomicU64,
    pub players_alive: AtomicU64,
    pub players_pending_respawn: AtomicU64,

    // Entities
    pub bullet_count: AtomicU64,
    pub bullets_pooled: AtomicU64,
    pub bullet_fresh_allocations: AtomicU64,
    pub power_up_count: AtomicU64,
    pub power_ups_spawned: AtomicU64,
    pub power_ups_expired: AtomicU64,
    pub obstacle_count: AtomicU64,
    pub grid_max_per_cell: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Network
    pub connections_active: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub auth_failures: AtomicU64,
    pub deltas_sent: AtomicU64,
    pub resyncs_sent: AtomicU64,

    // Persistence
    pub persist_jobs: AtomicU64,
    pub persist_dropped: AtomicU64,
    pub persist_failures: AtomicU64,
    pub level_ups: AtomicU64,

    // Chat
    pub chat_messages: AtomicU64,
    pub chat_rejected: AtomicU64,

    start_time: Instant,
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            players_total: AtomicU64::new(0),
            players_alive: AtomicU64::new(0),
            players_pending_respawn: AtomicU64::new(0),
            bullet_count: AtomicU64::new(0),
            bullets_pooled: AtomicU64::new(0),
            bullet_fresh_allocations: AtomicU64::new(0),
            power_up_count: AtomicU64::new(0),
            power_ups_spawned: AtomicU64::new(0),
            power_ups_expired: AtomicU64::new(0),
            obstacle_count: AtomicU64::new(0),
            grid_max_per_cell: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            deltas_sent: AtomicU64::new(0),
            resyncs_sent: AtomicU64::new(0),
            persist_jobs: AtomicU64::new(0),
            persist_dropped: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            level_ups: AtomicU64::new(0),
            chat_messages: AtomicU64::new(0),
            chat_rejected: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY_LEN)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY_LEN {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);

        metric!("arena_players_total", "Connected player sessions", "gauge", load(&self.players_total));
        metric!("arena_players_alive", "Players currently alive", "gauge", load(&self.players_alive));
        metric!("arena_players_pending_respawn", "Players waiting to respawn", "gauge",
            load(&self.players_pending_respawn));

        metric!("arena_bullets", "Active bullets", "gauge", load(&self.bullet_count));
        metric!("arena_bullets_pooled", "Bullet objects available for reuse", "gauge",
            load(&self.bullets_pooled));
        metric!("arena_bullet_fresh_allocations_total", "Bullets allocated because the pool was empty", "counter",
            load(&self.bullet_fresh_allocations));
        metric!("arena_power_ups", "Power-ups on the map", "gauge", load(&self.power_up_count));
        metric!("arena_power_ups_spawned_total", "Power-ups placed by the spawner", "counter",
            load(&self.power_ups_spawned));
        metric!("arena_power_ups_expired_total", "Power-ups removed uncollected", "counter",
            load(&self.power_ups_expired));
        metric!("arena_obstacles", "Standing obstacles", "gauge", load(&self.obstacle_count));
        metric!("arena_grid_max_per_cell", "Most players in one spatial cell", "gauge",
            load(&self.grid_max_per_cell));

        metric!("arena_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            load(&self.tick_time_us));
        metric!("arena_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            load(&self.tick_time_p95_us));
        metric!("arena_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            load(&self.tick_time_p99_us));
        metric!("arena_tick_time_max_microseconds", "Maximum tick time", "gauge",
            load(&self.tick_time_max_us));
        metric!("arena_tick_count", "Total ticks processed", "counter", load(&self.tick_count));

        metric!("arena_connections_active", "Active WebTransport connections", "gauge",
            load(&self.connections_active));
        metric!("arena_messages_sent_total", "Total messages sent", "counter", load(&self.messages_sent));
        metric!("arena_messages_received_total", "Total messages received", "counter",
            load(&self.messages_received));
        metric!("arena_messages_dropped_total", "Outbound messages dropped on full outboxes", "counter",
            load(&self.messages_dropped));
        metric!("arena_bytes_sent_total", "Total bytes sent", "counter", load(&self.bytes_sent));
        metric!("arena_bytes_received_total", "Total bytes received", "counter", load(&self.bytes_received));
        metric!("arena_auth_failures_total", "Rejected authentication attempts", "counter",
            load(&self.auth_failures));
        metric!("arena_deltas_sent_total", "Delta broadcasts", "counter", load(&self.deltas_sent));
        metric!("arena_resyncs_sent_total", "Full snapshots sent after a dropped delta", "counter",
            load(&self.resyncs_sent));

        metric!("arena_persist_jobs_total", "Persistence jobs applied", "counter", load(&self.persist_jobs));
        metric!("arena_persist_dropped_total", "Persistence jobs dropped on a full queue", "counter",
            load(&self.persist_dropped));
        metric!("arena_persist_failures_total", "Persistence jobs that failed", "counter",
            load(&self.persist_failures));
        metric!("arena_level_ups_total", "Level-ups applied to live sessions", "counter", load(&self.level_ups));

        metric!("arena_chat_messages_total", "Chat messages broadcast", "counter", load(&self.chat_messages));
        metric!("arena_chat_rejected_total", "Chat messages rejected", "counter", load(&self.chat_rejected));

        metric!("arena_uptime_seconds", "Server uptime in seconds", "counter", self.uptime_seconds());

        output
    }

    /// JSON view of the same numbers
    pub fn to_json(&self) -> String {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        serde_json::json!({
            "players": {
                "total": load(&self.players_total),
                "alive": load(&self.players_alive),
                "pending_respawn": load(&self.players_pending_respawn),
            },
            "entities": {
                "bullets": load(&self.bullet_count),
                "bullets_pooled": load(&self.bullets_pooled),
                "power_ups": load(&self.power_up_count),
                "power_ups_spawned": load(&self.power_ups_spawned),
                "power_ups_expired": load(&self.power_ups_expired),
                "obstacles": load(&self.obstacle_count),
            },
            "performance": {
                "tick_time_us": load(&self.tick_time_us),
                "tick_time_p95_us": load(&self.tick_time_p95_us),
                "tick_time_p99_us": load(&self.tick_time_p99_us),
                "tick_time_max_us": load(&self.tick_time_max_us),
                "tick_count": load(&self.tick_count),
            },
            "network": {
                "connections": load(&self.connections_active),
                "messages_sent": load(&self.messages_sent),
                "messages_received": load(&self.messages_received),
                "messages_dropped": load(&self.messages_dropped),
                "bytes_sent": load(&self.bytes_sent),
                "bytes_received": load(&self.bytes_received),
                "resyncs": load(&self.resyncs_sent),
            },
            "persistence": {
                "jobs": load(&self.persist_jobs),
                "dropped": load(&self.persist_dropped),
                "failures": load(&self.persist_failures),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    let response = if request.starts_with("GET /metrics/json") {
                        http_response("application/json", &metrics.to_json())
                    } else if request.starts_with("GET /metrics") {
                        http_response("text/plain; version=0.0.4", &metrics.to_prometheus())
                    } else if request.starts_with("GET /health") {
                        http_response("text/plain", "OK")
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.players_total.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) >= 1000);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.players_total.store(12, Ordering::Relaxed);
        metrics.persist_dropped.store(3, Ordering::Relaxed);
        metrics.power_ups_expired.store(4, Ordering::Relaxed);

        let output = metrics.to_prometheus();
        assert!(output.contains("arena_players_total 12"));
        assert!(output.contains("arena_persist_dropped_total 3"));
        assert!(output.contains("arena_power_ups_expired_total 4"));
        assert!(output.contains("# TYPE arena_bullets gauge"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.record_sent(128);

        let value: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(value["network"]["messages_sent"], 1);
        assert_eq!(value["network"]["bytes_sent"], 128);
    }
}
