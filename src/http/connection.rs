use crate::handlers;
use crate::prelude::*;

#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub listener_addr: String,
    pub vhost_group: Vec<Arc<ServerConfig>>,
    pub vhost: Arc<ServerConfig>,
    pub request: HttpRequest,
    pub response: HttpResponse,
    pub write_buffer: Vec<u8>,
    pub action: ActiveAction,
    pub keep_alive: bool,
    pub closed: bool,
    pub cgi_in_token: Option<Token>,
    pub cgi_out_token: Option<Token>,
    pub last_activity: Instant,
}

/// Handler progress that must survive across readiness events. Handlers
/// themselves are stateless; everything resumable lives here.
#[derive(Debug)]
pub enum ActiveAction {
    FileStream(File, usize),
    Cgi(Box<CgiExec>),
    None,
}

impl Connection {
    pub fn new(stream: TcpStream, listener_addr: String, vhost_group: Vec<Arc<ServerConfig>>) -> Self {
        let vhost = Arc::clone(&vhost_group[0]);
        Self {
            stream,
            listener_addr,
            vhost_group,
            vhost,
            request: HttpRequest::new(),
            response: HttpResponse::new(HTTP_OK, HttpResponse::status_text(HTTP_OK)),
            write_buffer: Vec::new(),
            action: ActiveAction::None,
            keep_alive: true,
            closed: false,
            cgi_in_token: None,
            cgi_out_token: None,
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn should_close(&self) -> bool {
        self.closed && self.write_buffer.is_empty()
    }

    // Returns true on EOF.
    pub fn read_data(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => self.request.buffer.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    // Returns true if the connection broke.
    pub fn write_data(&mut self) -> bool {
        match self.stream.write(&self.write_buffer) {
            Ok(n) => {
                self.write_buffer.drain(..n);
                false
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(_) => {
                self.write_buffer.clear();
                true
            }
        }
    }

    pub fn resolve_vhost(&self) -> Arc<ServerConfig> {
        resolve_virtual_host(
            &self.vhost_group,
            &self.listener_addr,
            self.request.headers.get("host").map(String::as_str),
        )
    }

    fn advance_parser(conn: &mut Connection) -> std::result::Result<(), ParseError> {
        loop {
            match conn.request.state {
                ParsingState::RequestLine => conn.request.parse_request_line()?,
                ParsingState::Headers => conn.request.parse_headers()?,
                ParsingState::HeadersDone => {
                    // The virtual host has to be known before the body so
                    // its client_max_body_size applies.
                    conn.vhost = conn.resolve_vhost();
                    let max_body = conn.vhost.client_max_body_size;
                    conn.request.finish_headers(max_body)?;
                }
                ParsingState::Body => conn.request.parse_body()?,
                ParsingState::ChunkedBody => {
                    let max_body = conn.vhost.client_max_body_size;
                    conn.request.parse_chunked_body(max_body)?;
                }
                ParsingState::Complete => return Ok(()),
            }
        }
    }

    /// Queues the response (or hands off to CGI) once the parser completes.
    pub fn process_request(
        conn: &mut Connection,
        poll: &Poll,
        token: Token,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
    ) -> Result<()> {
        match Connection::advance_parser(conn) {
            Ok(()) => {
                handlers::dispatch(conn, poll, token, next_token, cgi_to_client)?;
                if !matches!(conn.action, ActiveAction::Cgi(_)) {
                    conn.finalize_response(false);
                    conn.request.reset_for_next();
                }
            }
            Err(ParseError::Incomplete) => {}
            Err(e) => {
                let code = e.status_code();
                trace!("parse error on {:?}: {} -> {}", token, e, code);
                let vhost = Arc::clone(&conn.vhost);
                handle_error(&mut conn.response, code, Some(&vhost));
                // The stream position is unreliable after a parse failure.
                conn.finalize_response(true);
                conn.request.reset_for_next();
            }
        }

        if !conn.write_buffer.is_empty() || matches!(conn.action, ActiveAction::FileStream(_, _)) {
            poll.registry().reregister(
                &mut conn.stream,
                token,
                Interest::READABLE | Interest::WRITABLE,
            )?;
        }
        Ok(())
    }

    /// Computes the keep-alive verdict, stamps the `Connection` header and
    /// appends the serialized response to the write buffer.
    pub fn finalize_response(&mut self, force_close: bool) {
        let code = self.response.status_code;
        let close_code = matches!(
            code,
            HTTP_BAD_REQUEST | HTTP_PAYLOAD_TOO_LARGE | HTTP_HEADER_FIELDS_TOO_LARGE
        ) || code >= 500;

        self.keep_alive = !force_close && !close_code && self.request.is_keep_alive();
        let value = if self.keep_alive { "keep-alive" } else { "close" };
        self.response.set_header("connection", value);

        let bytes = self.response.to_bytes();
        self.write_buffer.extend_from_slice(&bytes);
    }

    /// Drains the socket into the request buffer and advances the parser
    /// when the connection is otherwise idle. Bytes that arrive while a
    /// response or CGI exchange is in flight stay buffered until the
    /// response drains (sequential keep-alive).
    pub fn handle_read_phase(
        conn: &mut Connection,
        poll: &Poll,
        token: Token,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
    ) -> Result<()> {
        match conn.read_data() {
            Ok(is_eof) => conn.closed = conn.closed || is_eof,
            Err(_) => conn.closed = true,
        }
        conn.touch();

        // A request that arrived before EOF (half-close) is still served;
        // the connection goes away once its response drains.
        let idle = conn.write_buffer.is_empty() && matches!(conn.action, ActiveAction::None);
        if idle && !conn.request.buffer.is_empty() {
            Connection::process_request(conn, poll, token, next_token, cgi_to_client)?;
        }
        Ok(())
    }

    /// Flushes buffered response bytes, refilling from a streamed file when
    /// the buffer runs dry, then runs keep-alive bookkeeping.
    pub fn handle_write_phase(
        conn: &mut Connection,
        poll: &Poll,
        token: Token,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
    ) -> Result<()> {
        if conn.write_buffer.is_empty() {
            if let ActiveAction::FileStream(ref mut file, ref mut remaining) = conn.action {
                let mut chunk = [0u8; 8192];
                match file.read(&mut chunk) {
                    Ok(0) => conn.action = ActiveAction::None,
                    Ok(n) => {
                        conn.write_buffer.extend_from_slice(&chunk[..n]);
                        *remaining = remaining.saturating_sub(n);
                        if *remaining == 0 {
                            conn.action = ActiveAction::None;
                        }
                    }
                    Err(_) => conn.closed = true,
                }
            }
        }

        if !conn.write_buffer.is_empty() {
            conn.closed = conn.write_data() || conn.closed;
            conn.touch();
        }

        if !conn.closed
            && conn.write_buffer.is_empty()
            && matches!(conn.action, ActiveAction::None)
        {
            Connection::handle_post_write_update(conn, poll, token, next_token, cgi_to_client)?;
        }
        Ok(())
    }

    /// After a response fully drains: close, or reset for the next request.
    pub fn handle_post_write_update(
        conn: &mut Connection,
        poll: &Poll,
        token: Token,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
    ) -> Result<()> {
        if !conn.keep_alive {
            conn.closed = true;
            return Ok(());
        }

        conn.response = HttpResponse::new(HTTP_OK, HttpResponse::status_text(HTTP_OK));
        poll.registry()
            .reregister(&mut conn.stream, token, Interest::READABLE)?;
        conn.touch();

        // Request N+1 starts parsing only now that response N is delivered.
        if !conn.request.buffer.is_empty() && conn.request.state == ParsingState::RequestLine {
            trace!("pipelined data on {:?}, parsing next request", token);
            Connection::process_request(conn, poll, token, next_token, cgi_to_client)?;
        }
        Ok(())
    }
}

/// `Host`-header dispatch: exact `server_names` match among the vhosts
/// bound to the accepting listener's address, wildcard group second,
/// listener default (first configured vhost) last.
pub fn resolve_virtual_host(
    group: &[Arc<ServerConfig>],
    listener_addr: &str,
    host_header: Option<&str>,
) -> Arc<ServerConfig> {
    let default = Arc::clone(&group[0]);

    let Some(host_header) = host_header else {
        return default;
    };
    let hostname = host_header
        .split(':')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if hostname.is_empty() {
        return default;
    }

    for cfg in group {
        if cfg.bind_address == listener_addr && cfg.has_server_name(&hostname) {
            return Arc::clone(cfg);
        }
    }
    if listener_addr != "0.0.0.0" {
        for cfg in group {
            if cfg.bind_address == "0.0.0.0" && cfg.has_server_name(&hostname) {
                return Arc::clone(cfg);
            }
        }
    }

    default
}
