use std::path::Path;
use std::str::FromStr;

use origin_server::cgi::{build_cgi_env, parse_cgi_output};
use origin_server::http::{HttpRequest, Method};

fn make_request(method: &str, path: &str, query: &str) -> HttpRequest {
    let mut req = HttpRequest::new();
    req.method = Method::from_str(method).unwrap();
    req.path = path.to_string();
    req.uri = path.to_string();
    req.query_string = query.to_string();
    req.version = "HTTP/1.1".to_string();
    req
}

#[test]
fn output_with_crlf_header_block() {
    let raw = b"Content-Type: text/plain\r\nX-Extra: yes\r\n\r\nhello body";
    let (status, headers, body) = parse_cgi_output(raw);

    assert_eq!(status, 200);
    assert!(headers.contains(&("content-type".to_string(), "text/plain".to_string())));
    assert!(headers.contains(&("x-extra".to_string(), "yes".to_string())));
    assert_eq!(body, b"hello body");
}

#[test]
fn output_with_lf_header_block() {
    let raw = b"Content-Type: text/html\n\n<p>hi</p>";
    let (status, headers, body) = parse_cgi_output(raw);
    assert_eq!(status, 200);
    assert_eq!(headers.len(), 1);
    assert_eq!(body, b"<p>hi</p>");
}

#[test]
fn status_header_overrides_code() {
    let raw = b"Status: 404 Not Found\r\nContent-Type: text/plain\r\n\r\ngone";
    let (status, headers, body) = parse_cgi_output(raw);
    assert_eq!(status, 404);
    // Status is consumed, not forwarded as a header.
    assert!(headers.iter().all(|(k, _)| k != "status"));
    assert_eq!(body, b"gone");
}

#[test]
fn headerless_output_is_all_body() {
    let raw = b"just some text the script printed";
    let (status, headers, body) = parse_cgi_output(raw);
    assert_eq!(status, 200);
    assert!(headers.is_empty());
    assert_eq!(body, raw);
}

#[test]
fn blank_line_inside_plain_text_does_not_fake_headers() {
    // There is a blank line, but the prefix is not a header block.
    let raw = b"first paragraph\r\n\r\nsecond paragraph";
    let (status, headers, body) = parse_cgi_output(raw);
    assert_eq!(status, 200);
    assert!(headers.is_empty());
    assert_eq!(body, raw);
}

#[test]
fn empty_output() {
    let (status, headers, body) = parse_cgi_output(b"");
    assert_eq!(status, 200);
    assert!(headers.is_empty());
    assert!(body.is_empty());
}

#[test]
fn env_contains_required_variables() {
    let mut req = make_request("GET", "/cgi-bin/echo.py", "a=1&b=2");
    req.headers
        .insert("content-type".to_string(), "text/plain".to_string());

    let envs = build_cgi_env(&req, Path::new("/srv/www/cgi-bin/echo.py"), "example.com");

    assert_eq!(envs.get("REQUEST_METHOD").unwrap(), "GET");
    assert_eq!(envs.get("SCRIPT_NAME").unwrap(), "/cgi-bin/echo.py");
    assert_eq!(envs.get("QUERY_STRING").unwrap(), "a=1&b=2");
    assert_eq!(envs.get("GATEWAY_INTERFACE").unwrap(), "CGI/1.1");
    assert_eq!(envs.get("SERVER_PROTOCOL").unwrap(), "HTTP/1.1");
    assert_eq!(envs.get("SERVER_NAME").unwrap(), "example.com");
    assert_eq!(
        envs.get("SCRIPT_FILENAME").unwrap(),
        "/srv/www/cgi-bin/echo.py"
    );
    assert_eq!(envs.get("CONTENT_TYPE").unwrap(), "text/plain");
}

#[test]
fn request_headers_become_http_variables() {
    let mut req = make_request("GET", "/cgi-bin/run.sh", "");
    req.headers
        .insert("x-custom-token".to_string(), "abc123".to_string());
    req.headers
        .insert("content-type".to_string(), "text/plain".to_string());

    let envs = build_cgi_env(&req, Path::new("/x/run.sh"), "_");
    assert_eq!(envs.get("HTTP_X_CUSTOM_TOKEN").unwrap(), "abc123");
    // Content headers keep their canonical CGI names only.
    assert!(!envs.contains_key("HTTP_CONTENT_TYPE"));
}

#[test]
fn empty_query_string_is_omitted() {
    let req = make_request("GET", "/cgi-bin/run.sh", "");
    let envs = build_cgi_env(&req, Path::new("/x/run.sh"), "_");
    assert!(!envs.contains_key("QUERY_STRING"));
}

#[test]
fn post_sets_content_length_from_body() {
    let mut req = make_request("POST", "/cgi-bin/run.sh", "");
    req.body = b"payload".to_vec();
    let envs = build_cgi_env(&req, Path::new("/x/run.sh"), "_");
    assert_eq!(envs.get("CONTENT_LENGTH").unwrap(), "7");
}
