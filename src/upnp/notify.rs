/// NOTIFY listener: the HTTP endpoint subscribed services call back into.
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;

use reqwest::Url;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::event::{self, Notification};
use crate::core::player::PlayerEvent;

const MAX_BODY_SIZE: usize = 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed request line, headers and body
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    /// None when the request gave no Content-Length
    body: Option<Vec<u8>>,
}

pub struct NotifyListener {
    listener: TcpListener,
    /// callback path -> service id
    routes: HashMap<String, String>,
}

impl NotifyListener {
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("NOTIFY listener bound on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            routes: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Route NOTIFY requests on `path` to `service_id`
    pub fn route(&mut self, path: &str, service_id: &str) {
        self.routes.insert(path.to_string(), service_id.to_string());
    }

    /// `http://<ip>:<port>` as reachable from the device at `device_url`
    pub fn callback_base(&self, device_url: &str) -> io::Result<String> {
        let url = Url::parse(device_url)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let host = url
            .host_str()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "URL has no host"))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let local_ip = local_ip_towards(host, port)?;
        let listen_port = self.local_addr()?.port();
        Ok(match local_ip {
            IpAddr::V4(ip) => format!("http://{}:{}", ip, listen_port),
            IpAddr::V6(ip) => format!("http://[{}]:{}", ip, listen_port),
        })
    }

    /// Accept NOTIFY requests forever, forwarding every decoded variable
    /// to the player. Returns when the player is gone.
    /// Connections are served one at a time so events reach the player in
    /// the order the device sent them.
    pub async fn run(self, player_tx: mpsc::Sender<PlayerEvent>) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("NOTIFY accept error: {}", e);
                    continue;
                }
            };

            let notifications = match tokio::time::timeout(
                READ_TIMEOUT,
                handle_connection(stream, &self.routes),
            )
            .await
            {
                Ok(Ok(notifications)) => notifications,
                Ok(Err(e)) => {
                    warn!("Bad NOTIFY request from {}: {}", peer, e);
                    continue;
                }
                Err(_) => {
                    warn!("NOTIFY request from {} timed out", peer);
                    continue;
                }
            };

            for notification in notifications {
                if player_tx
                    .send(PlayerEvent::Notification(notification))
                    .await
                    .is_err()
                {
                    debug!("Player gone, NOTIFY listener stopping");
                    return;
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    routes: &HashMap<String, String>,
) -> io::Result<Vec<Notification>> {
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);
    let request = read_http_request(&mut reader).await?;

    if request.method != "NOTIFY" {
        write_http_response(&mut write_half, 405, "Method Not Allowed").await?;
        return Ok(Vec::new());
    }

    let Some(service_id) = routes.get(&request.path) else {
        debug!("NOTIFY for unknown path {}", request.path);
        write_http_response(&mut write_half, 412, "Precondition Failed").await?;
        return Ok(Vec::new());
    };

    let seq = request.headers.get("seq").map(String::as_str).unwrap_or("?");
    let Some(body) = request.body else {
        // chunked bodies are not supported
        warn!(
            service = service_id.as_str(),
            seq,
            transfer_encoding = request.headers.get("transfer-encoding").map(String::as_str),
            "NOTIFY without Content-Length refused"
        );
        write_http_response(&mut write_half, 411, "Length Required").await?;
        return Ok(Vec::new());
    };

    write_http_response(&mut write_half, 200, "OK").await?;

    let body = String::from_utf8_lossy(&body);
    match event::parse_property_set(service_id, &body) {
        Ok(notifications) => {
            debug!(
                service = service_id.as_str(),
                seq,
                "NOTIFY with {} variable(s)",
                notifications.len()
            );
            Ok(notifications)
        }
        Err(e) => {
            warn!(
                service = service_id.as_str(),
                seq,
                error = %e,
                "Unparseable NOTIFY body"
            );
            Ok(Vec::new())
        }
    }
}

async fn read_http_request<R>(reader: &mut BufReader<R>) -> io::Result<HttpRequest>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "missing request line",
        ));
    }

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing method"))?
        .to_ascii_uppercase();
    let path = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing path"))?
        .to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(&['\r', '\n'][..]);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let body = match headers.get("content-length") {
        Some(value) => {
            let content_length: usize = value.parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad Content-Length {:?}", value),
                )
            })?;
            if content_length > MAX_BODY_SIZE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("body too large: {} bytes", content_length),
                ));
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).await?;
            Some(body)
        }
        None => None,
    };

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

async fn write_http_response<W>(writer: &mut W, status: u16, message: &str) -> io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status, message
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}

/// Local address the OS would use to reach `host:port`
fn local_ip_towards(host: &str, port: u16) -> io::Result<IpAddr> {
    let is_ipv6 = host.contains(':');
    let target = if is_ipv6 {
        format!("[{}]:{}", host.trim_matches(|c| c == '[' || c == ']'), port)
    } else {
        format!("{}:{}", host, port)
    };
    let socket = UdpSocket::bind(if is_ipv6 { "[::]:0" } else { "0.0.0.0:0" })?;
    socket.connect(target)?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn notify_request(path: &str, body: &str) -> String {
        format!(
            "NOTIFY {} HTTP/1.1\r\nHOST: 127.0.0.1\r\nCONTENT-TYPE: text/xml\r\nNT: upnp:event\r\nNTS: upnp:propchange\r\nSID: uuid:1\r\nSEQ: 0\r\nContent-Length: {}\r\n\r\n{}",
            path,
            body.len(),
            body
        )
    }

    #[tokio::test]
    async fn test_notify_is_routed_to_player() {
        let mut listener = NotifyListener::bind("127.0.0.1:0").await.unwrap();
        listener.route("/notify/0/AVTransport", "urn:upnp-org:serviceId:AVTransport");
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(listener.run(tx));

        let body = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><TransportState>PLAYING</TransportState></e:property></e:propertyset>"#;
        let response = send(addr, &notify_request("/notify/0/AVTransport", body)).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");

        match rx.recv().await {
            Some(PlayerEvent::Notification(n)) => {
                assert_eq!(n.service_id, "urn:upnp-org:serviceId:AVTransport");
                assert_eq!(n.variable_name, "TransportState");
                assert_eq!(n.raw_payload, "PLAYING");
            }
            other => panic!("unexpected event {other:?}"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn test_unknown_path_and_method_are_refused() {
        let listener = NotifyListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let handle = tokio::spawn(listener.run(tx));

        let response = send(addr, &notify_request("/elsewhere", "")).await;
        assert!(response.starts_with("HTTP/1.1 412"), "{response}");

        let response = send(addr, "GET / HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 405"), "{response}");
        handle.abort();
    }

    #[tokio::test]
    async fn test_notify_without_content_length_is_refused() {
        let mut listener = NotifyListener::bind("127.0.0.1:0").await.unwrap();
        listener.route("/notify/0/AVTransport", "urn:upnp-org:serviceId:AVTransport");
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(listener.run(tx));

        let chunked = "NOTIFY /notify/0/AVTransport HTTP/1.1\r\nHOST: 127.0.0.1\r\nNT: upnp:event\r\nSEQ: 3\r\nTRANSFER-ENCODING: chunked\r\n\r\n";
        let response = send(addr, chunked).await;
        assert!(response.starts_with("HTTP/1.1 411"), "{response}");

        // the refused request produced no events; the next one is delivered
        let body = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><TransportState>STOPPED</TransportState></e:property></e:propertyset>"#;
        let response = send(addr, &notify_request("/notify/0/AVTransport", body)).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        match rx.recv().await {
            Some(PlayerEvent::Notification(n)) => assert_eq!(n.raw_payload, "STOPPED"),
            other => panic!("unexpected event {other:?}"),
        }
        handle.abort();
    }

    #[test]
    fn test_callback_base_uses_loopback_for_local_device() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let listener = rt.block_on(NotifyListener::bind("127.0.0.1:0")).unwrap();
        let port = listener.local_addr().unwrap().port();
        let base = listener
            .callback_base("http://127.0.0.1:49152/description.xml")
            .unwrap();
        assert_eq!(base, format!("http://127.0.0.1:{}", port));
    }
}
