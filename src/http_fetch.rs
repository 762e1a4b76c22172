// Blocking HTTP helper shared by every widget: one client, a request timeout,
// a fixed number of linear retries, and the optional CORS relay.

use crate::error::{DashboardError, Result};
use reqwest::blocking;
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::thread;
use std::time::Duration;

const USER_AGENT: &str = concat!("HippodromeWebEdition/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: blocking::Client,
    timeout: Duration,
    retries: u32,
    retry_step: Duration,
    cors_proxy: Option<String>,
    prim_api_key: Option<String>,
}

impl HttpFetcher {
    pub fn new(
        timeout: Duration,
        retries: u32,
        cors_proxy: Option<String>,
        prim_api_key: Option<String>,
    ) -> Result<Self> {
        let client = blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DashboardError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpFetcher {
            client,
            timeout,
            retries,
            retry_step: Duration::from_millis(250),
            cors_proxy: cors_proxy.filter(|p| !p.trim().is_empty()),
            prim_api_key: prim_api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Wraps `target` into the relay URL when a relay is configured.
    pub fn proxied(&self, target: &str) -> Result<String> {
        match &self.cors_proxy {
            Some(proxy) => {
                let base = format!("{}/", proxy.trim_end_matches('/'));
                Url::parse_with_params(&base, &[("url", target)])
                    .map(|u| u.to_string())
                    .map_err(|e| DashboardError::ParseError(format!("Invalid proxy URL '{}': {}", proxy, e)))
            }
            None => Ok(target.to_string()),
        }
    }

    /// PRIM endpoints take the `apikey` header; nothing else should see it.
    fn wants_api_key(target: &str) -> bool {
        Url::parse(target)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.ends_with("iledefrance-mobilites.fr")))
            .unwrap_or(false)
    }

    /// Single attempt, no retry.
    pub fn fetch_with_timeout(&self, url: &str) -> Result<blocking::Response> {
        self.send(url, Self::wants_api_key(url))
    }

    fn send(&self, url: &str, with_api_key: bool) -> Result<blocking::Response> {
        let mut request = self.client.get(url);
        if let (true, Some(key)) = (with_api_key, &self.prim_api_key) {
            request = request.header("apikey", key);
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                DashboardError::Timeout { url: url.to_string(), seconds: self.timeout.as_secs() }
            } else {
                DashboardError::NetworkError(format!("GET {} failed: {}", url, e))
            }
        })?;

        if !response.status().is_success() {
            return Err(DashboardError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response)
    }

    /// Relays `url` when needed, then retries transport failures.
    /// The key follows the target, not the relay.
    pub fn fetch_with_retry(&self, url: &str) -> Result<blocking::Response> {
        let target = self.proxied(url)?;
        let with_api_key = Self::wants_api_key(url);
        with_retry(self.retries, self.retry_step, || self.send(&target, with_api_key))
    }

    pub fn get_text(&self, url: &str) -> Result<String> {
        self.fetch_with_retry(url)?
            .text()
            .map_err(|e| DashboardError::NetworkError(format!("Failed to read body of {}: {}", url, e)))
    }

    pub fn get_bytes(&self, url: &str) -> Result<bytes::Bytes> {
        self.fetch_with_retry(url)?
            .bytes()
            .map_err(|e| DashboardError::NetworkError(format!("Failed to read body of {}: {}", url, e)))
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url)?;
        serde_json::from_str(&body)
            .map_err(|e| DashboardError::ParseError(format!("Invalid JSON from {}: {}", url, e)))
    }
}

/// Runs `op` once plus up to `retries` more times while the error is
/// retryable, sleeping `step × attempt` between attempts.
pub fn with_retry<T, F>(retries: u32, step: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                log::debug!("↻ Retry {}/{} after: {}", attempt, retries, e);
                thread::sleep(step * attempt);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    fn fetcher(proxy: Option<&str>) -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(1), 0, proxy.map(String::from), None).unwrap()
    }

    /// One-shot local server: answers the first request with `response`
    /// (or never, when `None`) and hands back the raw request head.
    fn serve_once(response: Option<&'static str>) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else { return };
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            let _ = tx.send(String::from_utf8_lossy(&head).to_lowercase());
            match response {
                Some(body) => {
                    let _ = stream.write_all(body.as_bytes());
                }
                None => thread::sleep(Duration::from_secs(3)),
            }
        });

        (addr, rx)
    }

    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}";

    #[test]
    fn non_success_status_is_http_status_error() {
        let (addr, _) = serve_once(Some("HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"));
        let err = fetcher(None).get_text(&format!("{}/stop-monitoring", addr)).unwrap_err();
        assert!(matches!(err, DashboardError::HttpStatus { status: 503, .. }));
    }

    #[test]
    fn silent_server_is_a_timeout() {
        let (addr, _) = serve_once(None);
        let f = HttpFetcher::new(Duration::from_millis(300), 0, None, None).unwrap();
        let err = f.fetch_with_timeout(&addr).unwrap_err();
        assert!(matches!(err, DashboardError::Timeout { .. }), "{:?}", err);
    }

    #[test]
    fn api_key_goes_to_prim_targets_only() {
        let keyed = |proxy: &str| {
            HttpFetcher::new(Duration::from_secs(1), 0, Some(proxy.to_string()), Some("secret".into())).unwrap()
        };

        let (relay, seen) = serve_once(Some(OK));
        keyed(&relay)
            .get_text("https://prim.iledefrance-mobilites.fr/marketplace/general-message?LineRef=x")
            .unwrap();
        let head = seen.recv().unwrap();
        assert!(head.contains("apikey: secret"));
        assert!(head.starts_with("get /?url=https%3a%2f%2fprim.iledefrance-mobilites.fr"));

        let (relay, seen) = serve_once(Some(OK));
        keyed(&relay).get_text("https://api.open-meteo.com/v1/forecast").unwrap();
        assert!(!seen.recv().unwrap().contains("apikey"));
    }

    #[test]
    fn proxied_encodes_target_url() {
        let f = fetcher(Some("https://relay.example.dev/"));
        let url = f
            .proxied("https://prim.iledefrance-mobilites.fr/marketplace/stop-monitoring?MonitoringRef=STIF:StopArea:SP:43135:")
            .unwrap();
        assert!(url.starts_with("https://relay.example.dev/?url=https%3A%2F%2Fprim."));
        assert!(url.contains("MonitoringRef%3DSTIF%3AStopArea%3ASP%3A43135%3A"));
    }

    #[test]
    fn no_proxy_keeps_url() {
        let f = fetcher(None);
        assert_eq!(f.proxied("https://api.open-meteo.com/v1/forecast").unwrap(), "https://api.open-meteo.com/v1/forecast");
        assert_eq!(fetcher(Some("  ")).proxied("https://x.test/").unwrap(), "https://x.test/");
    }

    #[test]
    fn retry_stops_after_fixed_count() {
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(2, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            Err(DashboardError::Timeout { url: "u".into(), seconds: 1 })
        });
        assert!(matches!(result, Err(DashboardError::Timeout { .. })));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_returns_first_success() {
        let calls = Cell::new(0);
        let result = with_retry(3, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                Err(DashboardError::HttpStatus { url: "u".into(), status: 503 })
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn parse_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(5, Duration::ZERO, || {
            calls.set(calls.get() + 1);
            Err(DashboardError::ParseError("bad".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
