use std::os::unix::fs::PermissionsExt;
use std::process::Child;

use crate::handlers::resolve_fs_path;
use crate::prelude::*;

pub const CGI_EXTENSIONS: &[&str] = &["php", "py", "sh"];

#[derive(Debug, PartialEq)]
pub enum CgiState {
    WritingBody,
    ReadingOutput,
}

/// A running CGI child and its two half-duplex pipes, driven entirely by
/// reactor readiness events routed through the pipe-token back-index.
#[derive(Debug)]
pub struct CgiExec {
    pub in_stream: Option<mio::net::UnixStream>,
    pub out_stream: Option<mio::net::UnixStream>,
    pub child: Child,
    pub stdin_buf: Vec<u8>,
    pub output: Vec<u8>,
    pub state: CgiState,
}

/// Pre-spawn checks. Returns the HTTP status to answer with on refusal.
fn validate_cgi(method: Method, script_path: &Path) -> std::result::Result<(), u16> {
    if !matches!(method, Method::GET | Method::POST) {
        return Err(HTTP_METHOD_NOT_ALLOWED);
    }

    let meta = match fs::metadata(script_path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(HTTP_NOT_FOUND),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => return Err(HTTP_FORBIDDEN),
        Err(_) => return Err(HTTP_INTERNAL_SERVER_ERROR),
    };
    if meta.is_dir() {
        return Err(HTTP_BAD_REQUEST);
    }
    if !meta.is_file() {
        return Err(HTTP_FORBIDDEN);
    }

    let extension = script_path.extension().and_then(|e| e.to_str());
    if !extension.is_some_and(|e| CGI_EXTENSIONS.contains(&e)) {
        return Err(HTTP_FORBIDDEN);
    }

    // The script is exec'd directly, so it needs the user-execute bit.
    if meta.permissions().mode() & 0o100 == 0 {
        return Err(HTTP_FORBIDDEN);
    }

    Ok(())
}

/// Validates the target, spawns it with its stdin/stdout as socketpairs,
/// registers the parent ends with the reactor and parks the exchange on the
/// connection. Refusals and spawn failures answer immediately instead.
pub fn spawn_cgi(
    conn: &mut Connection,
    poll: &Poll,
    client_token: Token,
    next_token: &mut usize,
    cgi_to_client: &mut HashMap<Token, Token>,
    route: &RouteConfig,
) -> Result<()> {
    let vhost = Arc::clone(&conn.vhost);
    let script_path = resolve_fs_path(route, &conn.request.path);

    if let Err(code) = validate_cgi(conn.request.method, &script_path) {
        handle_error(&mut conn.response, code, Some(&vhost));
        if code == HTTP_METHOD_NOT_ALLOWED {
            conn.response.set_header("allow", "GET, POST");
        }
        return Ok(());
    }

    // Absolute form, so current_dir below cannot change what gets exec'd.
    let script_path = match script_path.canonicalize() {
        Ok(path) => path,
        Err(_) => {
            handle_error(&mut conn.response, HTTP_INTERNAL_SERVER_ERROR, Some(&vhost));
            return Ok(());
        }
    };

    // One pair per direction: server->cgi stdin, cgi->server stdout.
    let Ok((server_in_std, script_in_std)) = UnixStream::pair() else {
        handle_error(&mut conn.response, HTTP_INTERNAL_SERVER_ERROR, Some(&vhost));
        return Ok(());
    };
    let Ok((server_out_std, script_out_std)) = UnixStream::pair() else {
        handle_error(&mut conn.response, HTTP_INTERNAL_SERVER_ERROR, Some(&vhost));
        return Ok(());
    };
    server_in_std.set_nonblocking(true).ok();
    server_out_std.set_nonblocking(true).ok();
    let server_in = mio::net::UnixStream::from_std(server_in_std);
    let mut server_out = mio::net::UnixStream::from_std(server_out_std);

    let script_stdin = unsafe { File::from_raw_fd(script_in_std.into_raw_fd()) };
    let script_stdout = unsafe { File::from_raw_fd(script_out_std.into_raw_fd()) };
    let Ok(script_stderr) = script_stdout.try_clone() else {
        handle_error(&mut conn.response, HTTP_INTERNAL_SERVER_ERROR, Some(&vhost));
        return Ok(());
    };

    let envs = build_cgi_env(&conn.request, &script_path, vhost.primary_name());

    let mut cmd = Command::new(&script_path);
    cmd.env_clear()
        .envs(envs)
        .current_dir(script_path.parent().unwrap_or(Path::new("/")))
        .stdin(Stdio::from(script_stdin))
        .stdout(Stdio::from(script_stdout))
        .stderr(Stdio::from(script_stderr));

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("cgi spawn failed for {}: {}", script_path.display(), e);
            handle_error(&mut conn.response, HTTP_INTERNAL_SERVER_ERROR, Some(&vhost));
            return Ok(());
        }
    };

    trace!("cgi spawned: {} (pid {})", script_path.display(), child.id());

    let out_token = Token(*next_token);
    *next_token += 1;
    poll.registry()
        .register(&mut server_out, out_token, Interest::READABLE)
        .ok();
    conn.cgi_out_token = Some(out_token);
    cgi_to_client.insert(out_token, client_token);

    let mut exec = CgiExec {
        in_stream: Some(server_in),
        out_stream: Some(server_out),
        child,
        stdin_buf: Vec::new(),
        output: Vec::new(),
        state: CgiState::ReadingOutput,
    };

    if conn.request.method == Method::POST && !conn.request.body.is_empty() {
        exec.stdin_buf = std::mem::take(&mut conn.request.body);
        let in_token = Token(*next_token);
        *next_token += 1;
        poll.registry()
            .register(exec.in_stream.as_mut().unwrap(), in_token, Interest::WRITABLE)
            .ok();
        conn.cgi_in_token = Some(in_token);
        cgi_to_client.insert(in_token, client_token);
        exec.state = CgiState::WritingBody;
    } else {
        // No body to deliver: immediate EOF on the script's stdin.
        drop(exec.in_stream.take());
    }

    conn.action = ActiveAction::Cgi(Box::new(exec));
    Ok(())
}

pub fn build_cgi_env(
    request: &HttpRequest,
    script_path: &Path,
    server_name: &str,
) -> HashMap<String, String> {
    let mut envs = HashMap::new();

    envs.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    envs.insert("SERVER_PROTOCOL".to_string(), request.version.clone());
    envs.insert("SERVER_NAME".to_string(), server_name.to_string());
    envs.insert("SERVER_SOFTWARE".to_string(), SERVER_SOFTWARE.to_string());
    envs.insert("REQUEST_METHOD".to_string(), request.method.to_string());
    envs.insert("SCRIPT_NAME".to_string(), request.path.clone());
    envs.insert(
        "SCRIPT_FILENAME".to_string(),
        script_path.display().to_string(),
    );
    envs.insert("PATH_INFO".to_string(), request.path.clone());
    if !request.query_string.is_empty() {
        envs.insert("QUERY_STRING".to_string(), request.query_string.clone());
    }
    if let Some(ct) = request.headers.get("content-type") {
        envs.insert("CONTENT_TYPE".to_string(), ct.clone());
    }
    if request.method == Method::POST {
        envs.insert("CONTENT_LENGTH".to_string(), request.body.len().to_string());
    }
    envs.insert(
        "PATH".to_string(),
        "/usr/local/bin:/usr/bin:/bin".to_string(),
    );

    // Remaining request headers travel as HTTP_<NAME>.
    for (key, value) in &request.headers {
        if key == "content-type" || key == "content-length" {
            continue;
        }
        let env_key = format!("HTTP_{}", key.to_ascii_uppercase().replace('-', "_"));
        envs.insert(env_key, value.clone());
    }

    envs
}

/// Progresses a CGI exchange on pipe readiness. Client-socket interest is
/// refreshed once the script's output has been turned into a response.
pub fn handle_cgi_event(
    poll: &Poll,
    event: &Event,
    cgi_token: Token,
    client_token: Token,
    conn: &mut Connection,
    cgi_to_client: &mut HashMap<Token, Token>,
    purgatory: &mut Vec<Child>,
) -> Result<()> {
    conn.touch();

    // SERVER -> SCRIPT (stdin)
    if event.is_writable() && Some(cgi_token) == conn.cgi_in_token {
        let mut broken = false;
        if let ActiveAction::Cgi(exec) = &mut conn.action {
            while !exec.stdin_buf.is_empty() {
                let Some(pipe) = exec.in_stream.as_mut() else {
                    break;
                };
                match pipe.write(&exec.stdin_buf) {
                    Ok(0) => {
                        broken = true;
                        break;
                    }
                    Ok(n) => {
                        exec.stdin_buf.drain(..n);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => {
                        broken = true;
                        break;
                    }
                }
            }

            if !broken && exec.stdin_buf.is_empty() {
                // Body delivered: unregister first, then close for EOF.
                if let Some(mut pipe) = exec.in_stream.take() {
                    poll.registry().deregister(&mut pipe).ok();
                }
                if let Some(token) = conn.cgi_in_token.take() {
                    cgi_to_client.remove(&token);
                }
                exec.state = CgiState::ReadingOutput;
                if let (Some(pipe), Some(token)) =
                    (exec.out_stream.as_mut(), conn.cgi_out_token)
                {
                    poll.registry()
                        .reregister(pipe, token, Interest::READABLE)
                        .ok();
                }
            }
        }
        if broken {
            return abort_cgi(
                conn,
                poll,
                client_token,
                cgi_to_client,
                purgatory,
                HTTP_INTERNAL_SERVER_ERROR,
            );
        }
    }

    // SCRIPT -> SERVER (stdout)
    if event.is_readable() && Some(cgi_token) == conn.cgi_out_token {
        let mut broken = false;
        let mut eof = false;
        if let ActiveAction::Cgi(exec) = &mut conn.action {
            let mut buf = [0u8; READ_BUF_SIZE];
            while let Some(pipe) = exec.out_stream.as_mut() {
                match pipe.read(&mut buf) {
                    Ok(0) => {
                        eof = true;
                        break;
                    }
                    Ok(n) => exec.output.extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => {
                        broken = true;
                        break;
                    }
                }
            }
        }
        if broken {
            return abort_cgi(
                conn,
                poll,
                client_token,
                cgi_to_client,
                purgatory,
                HTTP_INTERNAL_SERVER_ERROR,
            );
        }
        if eof {
            return finish_cgi(conn, poll, client_token, cgi_to_client, purgatory);
        }
    }

    Ok(())
}

/// EOF on stdout: tear the pipes down, reap the child and turn the
/// accumulated output into the response.
fn finish_cgi(
    conn: &mut Connection,
    poll: &Poll,
    client_token: Token,
    cgi_to_client: &mut HashMap<Token, Token>,
    purgatory: &mut Vec<Child>,
) -> Result<()> {
    let ActiveAction::Cgi(mut exec) = std::mem::replace(&mut conn.action, ActiveAction::None)
    else {
        return Ok(());
    };

    release_pipes(conn, poll, &mut exec, cgi_to_client);
    reap_child(exec.child, purgatory);

    let (status, headers, body) = parse_cgi_output(&exec.output);
    let mut res = HttpResponse::new(status, HttpResponse::status_text(status));
    let mut content_type = "text/html".to_string();
    for (key, value) in headers {
        if key == "content-type" {
            content_type = value;
        } else {
            res.set_header(&key, &value);
        }
    }
    res.set_body(body, &content_type);
    conn.response = res;

    conn.finalize_response(false);
    conn.request.reset_for_next();
    poll.registry().reregister(
        &mut conn.stream,
        client_token,
        Interest::READABLE | Interest::WRITABLE,
    )?;
    Ok(())
}

/// Pipe failure: kill the script and answer with an error response.
fn abort_cgi(
    conn: &mut Connection,
    poll: &Poll,
    client_token: Token,
    cgi_to_client: &mut HashMap<Token, Token>,
    purgatory: &mut Vec<Child>,
    code: u16,
) -> Result<()> {
    let ActiveAction::Cgi(mut exec) = std::mem::replace(&mut conn.action, ActiveAction::None)
    else {
        return Ok(());
    };

    release_pipes(conn, poll, &mut exec, cgi_to_client);
    let _ = exec.child.kill();
    reap_child(exec.child, purgatory);

    let vhost = Arc::clone(&conn.vhost);
    handle_error(&mut conn.response, code, Some(&vhost));
    conn.finalize_response(true);
    conn.request.reset_for_next();
    poll.registry().reregister(
        &mut conn.stream,
        client_token,
        Interest::READABLE | Interest::WRITABLE,
    )?;
    Ok(())
}

fn release_pipes(
    conn: &mut Connection,
    poll: &Poll,
    exec: &mut CgiExec,
    cgi_to_client: &mut HashMap<Token, Token>,
) {
    if let Some(mut pipe) = exec.in_stream.take() {
        poll.registry().deregister(&mut pipe).ok();
    }
    if let Some(mut pipe) = exec.out_stream.take() {
        poll.registry().deregister(&mut pipe).ok();
    }
    if let Some(token) = conn.cgi_in_token.take() {
        cgi_to_client.remove(&token);
    }
    if let Some(token) = conn.cgi_out_token.take() {
        cgi_to_client.remove(&token);
    }
}

pub fn reap_child(mut child: Child, purgatory: &mut Vec<Child>) {
    match child.try_wait() {
        Ok(Some(status)) => trace!("cgi child {} exited: {}", child.id(), status),
        Ok(None) => {
            let _ = child.kill();
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => purgatory.push(child),
            }
        }
        Err(_) => purgatory.push(child),
    }
}

/// CGI output contract: when the output opens with a header block
/// (terminated by a blank line, every line `name: value`), it is honored,
/// `Status:` included; otherwise the whole output is the body.
pub fn parse_cgi_output(raw: &[u8]) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let fallback = (HTTP_OK, Vec::new(), raw.to_vec());

    let (header_bytes, body_start) = match find_subsequence(raw, b"\r\n\r\n", 0) {
        Some(pos) => (&raw[..pos], pos + 4),
        None => match find_subsequence(raw, b"\n\n", 0) {
            Some(pos) => (&raw[..pos], pos + 2),
            None => return fallback,
        },
    };

    let Ok(header_text) = std::str::from_utf8(header_bytes) else {
        return fallback;
    };
    if header_text
        .lines()
        .any(|line| !line.trim().is_empty() && !line.contains(':'))
    {
        return fallback;
    }

    let mut status = HTTP_OK;
    let mut headers = Vec::new();
    for line in header_text.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().to_string();
            if key == "status" {
                status = value
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(HTTP_OK);
            } else {
                headers.push((key, value));
            }
        }
    }

    (status, headers, raw[body_start..].to_vec())
}
