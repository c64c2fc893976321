use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mio::{Poll, Token};
use origin_server::config::{RouteConfig, ServerConfig};
use origin_server::http::{Connection, Method};
use origin_server::server::Server;
use origin_server::timeouts;

fn make_route(path: &str, root: &str, methods: &[Method]) -> RouteConfig {
    RouteConfig {
        path: path.to_string(),
        root: root.to_string(),
        allowed_methods: methods.to_vec(),
        ..Default::default()
    }
}

fn make_vhost(port: u16, names: &[&str], locations: Vec<RouteConfig>) -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        port,
        bind_specified: true,
        server_names: names.iter().map(|n| n.to_string()).collect(),
        locations,
        ..Default::default()
    }
}

fn start_server(servers: Vec<ServerConfig>) {
    thread::spawn(move || {
        let poll = Poll::new().unwrap();
        let mut server = Server::new(servers, &poll).unwrap();
        server.run(poll).unwrap();
    });
    thread::sleep(Duration::from_millis(300));
}

fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Reads one Content-Length framed response.
fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];

    let header_end = loop {
        match stream.read(&mut tmp) {
            Ok(0) => panic!("connection closed before headers arrived"),
            Ok(n) => {
                buf.extend_from_slice(&tmp[..n]);
                if let Some(pos) = find(&buf, b"\r\n\r\n") {
                    break pos + 4;
                }
            }
            Err(e) => panic!("read failed: {}", e),
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = headers
        .lines()
        .find_map(|line| {
            line.to_ascii_lowercase()
                .strip_prefix("content-length:")
                .map(|v| v.trim().parse::<usize>().unwrap())
        })
        .unwrap_or(0);

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        match stream.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => body.extend_from_slice(&tmp[..n]),
            Err(e) => panic!("body read failed: {}", e),
        }
    }
    (headers, body)
}

#[test]
fn static_get_round_trip() {
    let port = 18311;
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(temp.path().join("index.html"), b"<h1>ok</h1>").unwrap();

    let root = temp.path().to_str().unwrap().to_string();
    start_server(vec![make_vhost(
        port,
        &["a"],
        vec![make_route("/", &root, &[Method::GET])],
    )]);

    let mut stream = connect(port);
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n")
        .unwrap();
    let (headers, body) = read_response(&mut stream);

    assert!(headers.starts_with("HTTP/1.1 200 OK\r\n"), "{}", headers);
    assert!(headers.to_ascii_lowercase().contains("content-length: 11"));
    assert_eq!(body, b"<h1>ok</h1>");
}

#[test]
fn missing_path_is_404() {
    let port = 18312;
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().to_str().unwrap().to_string();
    start_server(vec![make_vhost(
        port,
        &["a"],
        vec![make_route("/", &root, &[Method::GET])],
    )]);

    let mut stream = connect(port);
    stream
        .write_all(b"GET /missing HTTP/1.1\r\nHost: a\r\n\r\n")
        .unwrap();
    let (headers, _) = read_response(&mut stream);
    assert!(headers.starts_with("HTTP/1.1 404 Not Found\r\n"), "{}", headers);
}

#[test]
fn disallowed_method_gets_405_with_allow() {
    let port = 18313;
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().to_str().unwrap().to_string();
    start_server(vec![make_vhost(
        port,
        &["a"],
        vec![make_route("/", &root, &[Method::GET])],
    )]);

    let mut stream = connect(port);
    stream
        .write_all(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 0\r\n\r\n")
        .unwrap();
    let (headers, _) = read_response(&mut stream);
    assert!(headers.starts_with("HTTP/1.1 405 "), "{}", headers);
    assert!(headers.to_ascii_lowercase().contains("allow: get"));
}

#[test]
fn host_header_routes_between_vhosts() {
    let port = 18314;
    let temp_a = tempfile::tempdir().unwrap();
    let temp_b = tempfile::tempdir().unwrap();
    std::fs::write(temp_a.path().join("name.txt"), b"site-a").unwrap();
    std::fs::write(temp_b.path().join("name.txt"), b"site-b").unwrap();

    let root_a = temp_a.path().to_str().unwrap().to_string();
    let root_b = temp_b.path().to_str().unwrap().to_string();
    start_server(vec![
        make_vhost(port, &["a"], vec![make_route("/", &root_a, &[Method::GET])]),
        make_vhost(port, &["b"], vec![make_route("/", &root_b, &[Method::GET])]),
    ]);

    let mut stream = connect(port);
    stream
        .write_all(b"GET /name.txt HTTP/1.1\r\nHost: b\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (_, body) = read_response(&mut stream);
    assert_eq!(body, b"site-b");

    // Unknown host lands on the listener default (first configured).
    let mut stream = connect(port);
    stream
        .write_all(b"GET /name.txt HTTP/1.1\r\nHost: c\r\nConnection: close\r\n\r\n")
        .unwrap();
    let (_, body) = read_response(&mut stream);
    assert_eq!(body, b"site-a");
}

#[test]
fn keep_alive_serves_two_requests_on_one_socket() {
    let port = 18315;
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(temp.path().join("index.html"), b"again").unwrap();

    let root = temp.path().to_str().unwrap().to_string();
    start_server(vec![make_vhost(
        port,
        &["a"],
        vec![make_route("/", &root, &[Method::GET])],
    )]);

    let mut stream = connect(port);

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: a\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let (headers, body) = read_response(&mut stream);
    assert!(headers.starts_with("HTTP/1.1 200 "), "{}", headers);
    assert!(headers.to_ascii_lowercase().contains("connection: keep-alive"));
    assert_eq!(body, b"again");

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n")
        .unwrap();
    let (headers, body) = read_response(&mut stream);
    assert!(headers.starts_with("HTTP/1.1 200 "), "{}", headers);
    assert_eq!(body, b"again");
}

#[test]
fn multipart_upload_lands_in_uploads_dir() {
    let port = 18316;
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().to_str().unwrap().to_string();
    start_server(vec![make_vhost(
        port,
        &["a"],
        vec![make_route(
            "/upload",
            &root,
            &[Method::GET, Method::POST],
        )],
    )]);

    let mut body = Vec::new();
    body.extend_from_slice(b"--X\r\n");
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"cat.png\"\r\n\r\n",
    );
    body.extend_from_slice(b"fake png bytes");
    body.extend_from_slice(b"\r\n--X--\r\n");

    let mut request = format!(
        "POST /upload HTTP/1.1\r\nHost: a\r\nContent-Type: multipart/form-data; boundary=X\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(&body);

    let mut stream = connect(port);
    stream.write_all(&request).unwrap();
    let (headers, _) = read_response(&mut stream);
    assert!(headers.starts_with("HTTP/1.1 201 Created\r\n"), "{}", headers);

    let stored = std::fs::read(temp.path().join("uploads").join("cat.png")).unwrap();
    assert_eq!(stored, b"fake png bytes");
}

#[test]
fn chunked_post_echoes_through_cgi() {
    let port = 18317;
    let temp = tempfile::tempdir().unwrap();
    let script = temp.path().join("echo.sh");
    std::fs::write(
        &script,
        b"#!/bin/sh\nprintf 'Content-Type: text/plain\\r\\n\\r\\n'\ncat\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let root = temp.path().to_str().unwrap().to_string();
    let mut route = make_route("/cgi", &root, &[Method::GET, Method::POST]);
    route.cgi_enabled = true;
    start_server(vec![make_vhost(port, &["a"], vec![route])]);

    let mut stream = connect(port);
    stream
        .write_all(
            b"POST /cgi/echo.sh HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        )
        .unwrap();
    let (headers, body) = read_response(&mut stream);

    assert!(headers.starts_with("HTTP/1.1 200 "), "{}", headers);
    assert!(headers.to_ascii_lowercase().contains("content-type: text/plain"));
    assert_eq!(body, b"hello");
}

#[test]
fn cgi_get_runs_script() {
    let port = 18318;
    let temp = tempfile::tempdir().unwrap();
    let script = temp.path().join("hello.sh");
    std::fs::write(
        &script,
        b"#!/bin/sh\nprintf 'Content-Type: text/plain\\r\\n\\r\\n'\nprintf 'query=%s' \"$QUERY_STRING\"\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let root = temp.path().to_str().unwrap().to_string();
    let mut route = make_route("/cgi", &root, &[Method::GET, Method::POST]);
    route.cgi_enabled = true;
    start_server(vec![make_vhost(port, &["a"], vec![route])]);

    let mut stream = connect(port);
    stream
        .write_all(b"GET /cgi/hello.sh?x=42 HTTP/1.1\r\nHost: a\r\n\r\n")
        .unwrap();
    let (headers, body) = read_response(&mut stream);

    assert!(headers.starts_with("HTTP/1.1 200 "), "{}", headers);
    assert_eq!(body, b"query=x=42");
}

#[test]
fn cgi_rejects_wrong_extension() {
    let port = 18319;
    let temp = tempfile::tempdir().unwrap();
    let script = temp.path().join("evil.exe");
    std::fs::write(&script, b"MZ").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let root = temp.path().to_str().unwrap().to_string();
    let mut route = make_route("/cgi", &root, &[Method::GET]);
    route.cgi_enabled = true;
    start_server(vec![make_vhost(port, &["a"], vec![route])]);

    let mut stream = connect(port);
    stream
        .write_all(b"GET /cgi/evil.exe HTTP/1.1\r\nHost: a\r\n\r\n")
        .unwrap();
    let (headers, _) = read_response(&mut stream);
    assert!(headers.starts_with("HTTP/1.1 403 "), "{}", headers);
}

#[test]
fn delete_round_trip() {
    let port = 18320;
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("doomed.txt");
    std::fs::write(&target, b"bye").unwrap();

    let root = temp.path().to_str().unwrap().to_string();
    start_server(vec![make_vhost(
        port,
        &["a"],
        vec![make_route("/", &root, &[Method::GET, Method::DELETE])],
    )]);

    let mut stream = connect(port);
    stream
        .write_all(b"DELETE /doomed.txt HTTP/1.1\r\nHost: a\r\n\r\n")
        .unwrap();
    let (headers, body) = read_response(&mut stream);

    assert!(headers.starts_with("HTTP/1.1 204 No Content\r\n"), "{}", headers);
    assert!(body.is_empty());
    assert!(!target.exists());
}

#[test]
fn oversized_body_gets_413_and_close() {
    let port = 18321;
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().to_str().unwrap().to_string();
    let mut vhost = make_vhost(
        port,
        &["a"],
        vec![make_route("/", &root, &[Method::GET, Method::POST])],
    );
    vhost.client_max_body_size = 16;
    start_server(vec![vhost]);

    let mut stream = connect(port);
    stream
        .write_all(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 17\r\n\r\n")
        .unwrap();
    let (headers, _) = read_response(&mut stream);
    assert!(headers.starts_with("HTTP/1.1 413 "), "{}", headers);
    assert!(headers.to_ascii_lowercase().contains("connection: close"));
}

/// The sweep itself, without waiting a real minute: an aged connection is
/// dropped, a fresh one stays.
#[test]
fn timeout_sweep_closes_idle_connections() {
    let poll = Poll::new().unwrap();
    let cfg = ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        locations: vec![make_route("/", "/tmp", &[Method::GET])],
        ..Default::default()
    };
    let mut server = Server::new(vec![cfg.clone()], &poll).unwrap();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let mut make_conn = || {
        let _client = TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        let stream = mio::net::TcpStream::from_std(accepted);
        Connection::new(stream, "127.0.0.1".to_string(), vec![Arc::new(cfg.clone())])
    };

    let mut stale = make_conn();
    stale.last_activity = Instant::now()
        .checked_sub(Duration::from_secs(120))
        .expect("system uptime too short for this test");
    server.connections.insert(Token(901), stale);
    server.connections.insert(Token(902), make_conn());

    timeouts::process(&mut server, &poll);

    assert!(!server.connections.contains_key(&Token(901)));
    assert!(server.connections.contains_key(&Token(902)));
}
