//! Reachability checks for the services the CLI talks to.
//!
//! HTTP endpoints count as reachable when they answer at all; the recognition
//! and query endpoints only accept `POST`, so a `405` is a healthy reply.  The
//! relay is checked with a plain TCP connect to the host behind its `ws://`
//! URL.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use reqwest::Url;

/// Upper bound for a single probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachability {
    /// The endpoint answered, with this HTTP status if it was an HTTP probe.
    Online(Option<u16>),
    Offline(String),
}

impl Reachability {
    pub fn is_online(&self) -> bool {
        matches!(self, Reachability::Online(_))
    }
}

/// `GET` the endpoint and report whether anything answered.
pub fn http(url: &str) -> Reachability {
    let client = match reqwest::blocking::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
    {
        Ok(c) => c,
        Err(e) => return Reachability::Offline(format!("HTTP client unavailable: {e}")),
    };
    match client.get(url).send() {
        Ok(resp) => Reachability::Online(Some(resp.status().as_u16())),
        Err(e) => Reachability::Offline(format!("{url} unreachable: {e}")),
    }
}

/// TCP-connect to the host and port of a `ws://` or `http://` URL.
pub fn tcp(url: &str) -> Reachability {
    let addr = match socket_target(url) {
        Ok(a) => a,
        Err(e) => return Reachability::Offline(e),
    };
    let resolved = match addr.to_socket_addrs() {
        Ok(mut addrs) => addrs.next(),
        Err(e) => return Reachability::Offline(format!("cannot resolve {addr}: {e}")),
    };
    let Some(resolved) = resolved else {
        return Reachability::Offline(format!("no address for {addr}"));
    };
    match TcpStream::connect_timeout(&resolved, PROBE_TIMEOUT) {
        Ok(_) => Reachability::Online(None),
        Err(e) => Reachability::Offline(format!("{addr} unreachable: {e}")),
    }
}

/// `host:port` for a URL, filling in the scheme's default port.
pub(crate) fn socket_target(url: &str) -> Result<String, String> {
    let parsed = Url::parse(url).map_err(|e| format!("invalid URL {url}: {e}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| format!("URL {url} has no host"))?;
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| format!("URL {url} has no port"))?;
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn socket_target_uses_explicit_port() {
        assert_eq!(
            socket_target("ws://localhost:5001").unwrap(),
            "localhost:5001"
        );
        assert_eq!(
            socket_target("http://10.0.0.2:8000/recognize-face").unwrap(),
            "10.0.0.2:8000"
        );
    }

    #[test]
    fn socket_target_falls_back_to_scheme_default() {
        assert_eq!(socket_target("ws://relay.local").unwrap(), "relay.local:80");
        assert_eq!(socket_target("https://api.example").unwrap(), "api.example:443");
    }

    #[test]
    fn socket_target_rejects_garbage() {
        assert!(socket_target("not a url").is_err());
    }

    #[test]
    fn tcp_probe_sees_open_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(tcp(&format!("ws://127.0.0.1:{port}")).is_online());
    }

    #[test]
    fn tcp_probe_reports_closed_port() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!tcp(&format!("ws://127.0.0.1:{port}")).is_online());
    }
}
