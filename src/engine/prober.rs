//! Liveness probes: IP-pinned HTTP(S) GET and ICMP echo via the OS `ping`
//! binary.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::Client;
use tokio::process::Command;
use tracing::debug;

const PROBE_USER_AGENT: &str = "dnsguard-monitor/1.0";
const PING_ATTEMPTS: u32 = 3;
const PING_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Resolves every hostname to one fixed address, so a probe connects to
/// the primary origin no matter where DNS currently points, while SNI and
/// the Host header keep the real hostname.
#[derive(Debug)]
struct PinnedResolver {
    ip: IpAddr,
}

impl Resolve for PinnedResolver {
    fn resolve(&self, _name: Name) -> Resolving {
        let addr = SocketAddr::new(self.ip, 0);
        Box::pin(async move {
            let addrs: Addrs = Box::new(std::iter::once(addr));
            Ok(addrs)
        })
    }
}

type ClientKey = (Option<IpAddr>, u64);

/// Probe clients are cached per (pinned ip, timeout) so TCP and TLS
/// session setup amortizes across check cycles. Entries are immutable and
/// live for the whole run; the cache is bounded by the number of distinct
/// monitors.
pub struct Prober {
    clients: Mutex<HashMap<ClientKey, Client>>,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, force_ip: Option<IpAddr>, timeout_secs: u64) -> Client {
        let key = (force_ip, timeout_secs);
        let mut cache = self.clients.lock().unwrap();
        if let Some(client) = cache.get(&key) {
            return client.clone();
        }

        let mut builder = Client::builder()
            // Origins behind the monitor frequently present self-signed
            // certificates; reachability is what is being measured.
            .danger_accept_invalid_certs(true)
            .user_agent(PROBE_USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30));
        if let Some(ip) = force_ip {
            builder = builder.dns_resolver(Arc::new(PinnedResolver { ip }));
        }
        let client = builder.build().unwrap(); // static settings, cannot fail

        cache.insert(key, client.clone());
        client
    }

    /// GET the target URL, optionally pinning the TCP connection to
    /// `force_ip`. Status in [200, 400) is up; any error is down.
    pub async fn check_http(
        &self,
        url: &str,
        timeout_secs: u64,
        force_ip: Option<IpAddr>,
    ) -> bool {
        let client = self.client(force_ip, timeout_secs.max(1));
        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                // Drain the body so the connection returns to the pool.
                let _ = response.bytes().await;
                (200..400).contains(&status)
            }
            Err(e) => {
                debug!(url, error = %e, "http probe failed");
                false
            }
        }
    }

    /// Ping the host with single-packet probes, up on the first success.
    /// The OS binary is used so no raw-socket capability is needed.
    pub async fn check_ping(&self, host: &str, timeout_secs: u64) -> bool {
        let timeout_secs = timeout_secs.max(1);
        // Hard deadline per attempt; a wedged ping process is killed.
        let deadline = Duration::from_secs(timeout_secs + 2);

        for attempt in 0..PING_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(PING_RETRY_DELAY).await;
            }
            let mut command = ping_command(host, timeout_secs);
            command
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true);

            match tokio::time::timeout(deadline, command.status()).await {
                Ok(Ok(status)) if status.success() => return true,
                Ok(Ok(_)) | Ok(Err(_)) => {}
                Err(_) => debug!(host, "ping attempt exceeded its deadline"),
            }
        }
        false
    }

    #[cfg(test)]
    fn cached_clients(&self) -> usize {
        self.clients.lock().unwrap().len()
    }
}

#[cfg(not(windows))]
fn ping_command(host: &str, timeout_secs: u64) -> Command {
    let mut command = Command::new("ping");
    command
        .args(["-c", "1", "-W", &timeout_secs.to_string()])
        .arg(host);
    command
}

#[cfg(windows)]
fn ping_command(host: &str, timeout_secs: u64) -> Command {
    let mut command = Command::new("ping");
    command
        .args(["-n", "1", "-w", &(timeout_secs * 1000).to_string()])
        .arg(host);
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serves a single connection with a fixed response and captures the
    /// request head.
    async fn serve_once(response: &'static str) -> (SocketAddr, Arc<StdMutex<String>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured = Arc::new(StdMutex::new(String::new()));
        let seen = captured.clone();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                if let Ok(n) = socket.read(&mut buf).await {
                    *seen.lock().unwrap() = String::from_utf8_lossy(&buf[..n]).to_string();
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (addr, captured)
    }

    const OK_RESPONSE: &str =
        "HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok";
    const ERROR_RESPONSE: &str =
        "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

    #[tokio::test]
    async fn http_probe_reports_up_for_2xx() {
        let (addr, _) = serve_once(OK_RESPONSE).await;
        let prober = Prober::new();
        assert!(prober.check_http(&format!("http://{addr}/"), 2, None).await);
    }

    #[tokio::test]
    async fn http_probe_reports_down_for_5xx() {
        let (addr, _) = serve_once(ERROR_RESPONSE).await;
        let prober = Prober::new();
        assert!(!prober.check_http(&format!("http://{addr}/"), 2, None).await);
    }

    #[tokio::test]
    async fn http_probe_reports_down_when_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = Prober::new();
        assert!(!prober.check_http(&format!("http://{addr}/"), 1, None).await);
    }

    #[tokio::test]
    async fn pinned_probe_connects_to_forced_ip_and_keeps_host_header() {
        let (addr, captured) = serve_once(OK_RESPONSE).await;
        let prober = Prober::new();

        // The hostname is never resolved; the connection must land on the
        // local listener.
        let url = format!("http://origin.example.com:{}/health", addr.port());
        let up = prober
            .check_http(&url, 2, Some("127.0.0.1".parse().unwrap()))
            .await;
        assert!(up);

        let request = captured.lock().unwrap().to_lowercase();
        assert!(request.contains("host: origin.example.com"));
        assert!(request.contains("dnsguard-monitor/1.0"));
    }

    #[tokio::test]
    async fn probe_clients_are_cached_per_key() {
        let (addr, _) = serve_once(OK_RESPONSE).await;
        let prober = Prober::new();
        let url = format!("http://{addr}/");

        prober.check_http(&url, 2, None).await;
        prober.check_http(&url, 2, None).await;
        assert_eq!(prober.cached_clients(), 1);

        let (addr2, _) = serve_once(OK_RESPONSE).await;
        prober
            .check_http(&format!("http://{addr2}/"), 3, None)
            .await;
        assert_eq!(prober.cached_clients(), 2);
    }

    #[tokio::test]
    async fn ping_reports_down_for_unresolvable_host() {
        let prober = Prober::new();
        assert!(!prober.check_ping("host.invalid", 1).await);
    }
}
