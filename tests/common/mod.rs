//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use imbi::config::{ClickhouseConfig, EmailConfig, ImbiConfig, Neo4jConfig};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// A request seen by a mock HTTP backend.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Start a programmable HTTP backend on an ephemeral port.
pub async fn start_programmable_backend<F>(f: F) -> SocketAddr
where
    F: Fn(MockRequest) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let (reader, mut writer) = socket.into_split();
                let mut reader = BufReader::new(reader);

                let mut request_line = String::new();
                if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
                    return;
                }
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let target = parts.next().unwrap_or_default().to_string();

                let mut headers = Vec::new();
                let mut content_length = 0;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        break;
                    }
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((k, v)) = line.split_once(':') {
                        if k.eq_ignore_ascii_case("content-length") {
                            content_length = v.trim().parse().unwrap_or(0);
                        }
                        headers.push((k.trim().to_string(), v.trim().to_string()));
                    }
                }

                let mut body = vec![0; content_length];
                if reader.read_exact(&mut body).await.is_err() {
                    return;
                }

                let (status, body) = f(MockRequest {
                    method,
                    target,
                    headers,
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
                let response = format!(
                    "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = writer.write_all(response.as_bytes()).await;
                let _ = writer.shutdown().await;
            });
        }
    });

    addr
}

/// A Neo4j transactional response with one result set.
pub fn tx_result(columns: &[&str], rows: Vec<Value>) -> String {
    json!({
        "results": [{
            "columns": columns,
            "data": rows.into_iter().map(|row| json!({ "row": row })).collect::<Vec<_>>(),
        }],
        "errors": [],
    })
    .to_string()
}

/// Mock Neo4j transactional endpoint with an empty database.
///
/// Counts report zero and every MERGE reports a new node.
pub async fn start_mock_neo4j() -> SocketAddr {
    start_programmable_backend(|request| {
        let body: Value = serde_json::from_str(&request.body).unwrap_or(Value::Null);
        let statement = body["statements"][0]["statement"].as_str().unwrap_or_default();

        let response = if statement.contains("count(p)") {
            tx_result(&["count"], vec![json!([0])])
        } else if statement.contains("is_new") {
            tx_result(&["name", "is_new"], vec![json!(["x", true])])
        } else {
            tx_result(&[], vec![])
        };
        (200, response)
    })
    .await
}

/// Mock ClickHouse HTTP interface answering pings and returning two rows per SELECT.
pub async fn start_mock_clickhouse() -> SocketAddr {
    start_programmable_backend(|request| {
        if request.target.starts_with("/ping") {
            return (200, "Ok.\n".to_string());
        }
        if request.body.starts_with("SELECT") {
            return (200, "{\"n\":1}\n{\"n\":2}\n".to_string());
        }
        (200, String::new())
    })
    .await
}

/// A running mock SMTP server.
pub struct MockSmtp {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
    /// Every line received outside DATA, per connection order.
    pub commands: Arc<Mutex<Vec<String>>>,
    /// Message content received after DATA, without the terminating dot.
    pub messages: Arc<Mutex<Vec<String>>>,
}

/// Mock SMTP server sending `greeting` on connect.
pub async fn start_mock_smtp(greeting: &'static str) -> MockSmtp {
    start_mock_smtp_delayed(greeting, Duration::ZERO).await
}

/// Mock SMTP server that waits `delay` before greeting.
pub async fn start_mock_smtp_delayed(greeting: &'static str, delay: Duration) -> MockSmtp {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let smtp = MockSmtp {
        addr: listener.local_addr().unwrap(),
        connections: Arc::new(AtomicUsize::new(0)),
        commands: Arc::new(Mutex::new(Vec::new())),
        messages: Arc::new(Mutex::new(Vec::new())),
    };
    let counter = smtp.connections.clone();
    let commands = smtp.commands.clone();
    let messages = smtp.messages.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let commands = commands.clone();
            let messages = messages.clone();
            tokio::spawn(async move {
                let (reader, mut writer) = socket.into_split();
                let mut reader = BufReader::new(reader);
                tokio::time::sleep(delay).await;
                if writer.write_all(greeting.as_bytes()).await.is_err() {
                    return;
                }
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        break;
                    }
                    commands.lock().unwrap().push(line.trim_end().to_string());

                    let reply: &[u8] = if line.starts_with("EHLO") {
                        b"250-mock.smtp\r\n250 SIZE 10240000\r\n"
                    } else if line.starts_with("MAIL FROM:") || line.starts_with("RCPT TO:") {
                        b"250 OK\r\n"
                    } else if line.starts_with("DATA") {
                        if writer.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await.is_err() {
                            break;
                        }
                        let mut data = String::new();
                        loop {
                            let mut data_line = String::new();
                            if reader.read_line(&mut data_line).await.unwrap_or(0) == 0 {
                                return;
                            }
                            if data_line == ".\r\n" {
                                break;
                            }
                            data.push_str(&data_line);
                        }
                        messages.lock().unwrap().push(data);
                        b"250 Queued\r\n"
                    } else if line.starts_with("QUIT") {
                        b"221 Bye\r\n"
                    } else {
                        b"500 Unrecognized\r\n"
                    };
                    if writer.write_all(reply).await.is_err() || line.starts_with("QUIT") {
                        break;
                    }
                }
            });
        }
    });

    smtp
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn neo4j_config(addr: SocketAddr) -> Neo4jConfig {
    Neo4jConfig {
        url: format!("http://{}", addr),
        timeout_secs: 5,
        ..Neo4jConfig::default()
    }
}

pub fn clickhouse_config(addr: SocketAddr) -> ClickhouseConfig {
    ClickhouseConfig {
        url: format!("http://{}/analytics", addr),
        connect_attempts: 2,
        initial_retry_delay_ms: 10,
        max_retry_delay_ms: 20,
        timeout_secs: 5,
    }
}

pub fn email_config(addr: SocketAddr) -> EmailConfig {
    EmailConfig {
        smtp_host: addr.ip().to_string(),
        smtp_port: addr.port(),
        smtp_timeout_secs: 2,
        ..EmailConfig::default()
    }
}

/// Configuration pointing every service at the given mocks.
pub fn config_for(neo4j: SocketAddr, clickhouse: SocketAddr, smtp: SocketAddr) -> ImbiConfig {
    let mut config = ImbiConfig::default();
    config.neo4j = neo4j_config(neo4j);
    config.clickhouse = clickhouse_config(clickhouse);
    config.email = email_config(smtp);
    config
}
