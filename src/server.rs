use std::net::Shutdown;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::prelude::*;
use crate::{cgi, timeouts};

/// One bound socket plus the virtual hosts it serves. The first vhost of
/// the group is the binding's default.
pub struct Listener {
    pub socket: TcpListener,
    pub addr: String,
    pub port: u16,
    pub vhosts: Vec<Arc<ServerConfig>>,
}

pub struct Server {
    pub listeners: HashMap<Token, Listener>,
    pub connections: HashMap<Token, Connection>,
    pub cgi_to_client: HashMap<Token, Token>,
    pub next_token: usize,
    pub zombie_purgatory: Vec<Child>,
    pub running: Arc<AtomicBool>,
}

impl Server {
    /// Binds one socket per `(address, port)` group. A vhost on `0.0.0.0`
    /// absorbs every other vhost of its port behind a single wildcard
    /// socket.
    pub fn new(configs: Vec<ServerConfig>, poll: &Poll) -> Result<Self> {
        let configs: Vec<Arc<ServerConfig>> = configs.into_iter().map(Arc::new).collect();

        let mut by_port: HashMap<u16, Vec<Arc<ServerConfig>>> = HashMap::new();
        for cfg in &configs {
            by_port.entry(cfg.port).or_default().push(Arc::clone(cfg));
        }

        let mut bindings: Vec<(String, u16, Vec<Arc<ServerConfig>>)> = Vec::new();
        for (port, group) in by_port {
            if group.iter().any(|c| c.bind_address == "0.0.0.0") {
                bindings.push(("0.0.0.0".to_string(), port, group));
            } else {
                let mut by_addr: HashMap<String, Vec<Arc<ServerConfig>>> = HashMap::new();
                for cfg in group {
                    by_addr.entry(cfg.bind_address.clone()).or_default().push(cfg);
                }
                for (addr, vhosts) in by_addr {
                    bindings.push((addr, port, vhosts));
                }
            }
        }

        let mut listeners = HashMap::new();
        let mut next_token = 0;
        for (addr, port, vhosts) in bindings {
            let sock_addr: SocketAddr = format!("{}:{}", addr, port).parse()?;
            let mut socket = TcpListener::bind(sock_addr)?;
            let token = Token(next_token);
            next_token += 1;
            poll.registry()
                .register(&mut socket, token, Interest::READABLE)?;
            info!("listening on {}:{} ({} vhost(s))", addr, port, vhosts.len());
            listeners.insert(
                token,
                Listener {
                    socket,
                    addr,
                    port,
                    vhosts,
                },
            );
        }

        Ok(Self {
            listeners,
            connections: HashMap::new(),
            cgi_to_client: HashMap::new(),
            next_token,
            zombie_purgatory: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// SIGINT/SIGTERM clear the run flag; SIGPIPE must never kill the
    /// process while a peer resets mid-write.
    pub fn install_signal_handlers(&self) -> Result<()> {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }
        let running = Arc::clone(&self.running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })?;
        Ok(())
    }

    pub fn run(&mut self, mut poll: Poll) -> Result<()> {
        let mut events = Events::with_capacity(1024);

        while self.running.load(Ordering::SeqCst) {
            timeouts::process(self, &poll);
            self.reap_zombies();

            if let Err(e) = poll.poll(&mut events, Some(Duration::from_millis(POLL_TIMEOUT_MS))) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                let token = event.token();

                if self.listeners.contains_key(&token) {
                    self.accept_connections(token, &poll);
                } else if let Some(&client_token) = self.cgi_to_client.get(&token) {
                    self.dispatch_cgi_event(&poll, event, token, client_token);
                } else if self.connections.contains_key(&token) {
                    self.dispatch_client_event(&poll, event, token);
                }
            }
        }

        info!("shutting down");
        self.shutdown(&poll);
        Ok(())
    }

    fn accept_connections(&mut self, token: Token, poll: &Poll) {
        let Some(listener) = self.listeners.get(&token) else {
            return;
        };

        loop {
            match listener.socket.accept() {
                Ok((mut stream, peer)) => {
                    let client_token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(e) =
                        poll.registry()
                            .register(&mut stream, client_token, Interest::READABLE)
                    {
                        error!("failed to register client {}: {}", peer, e);
                        continue;
                    }
                    trace!("accepted {} as {:?}", peer, client_token);
                    let conn =
                        Connection::new(stream, listener.addr.clone(), listener.vhosts.clone());
                    self.connections.insert(client_token, conn);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn dispatch_cgi_event(&mut self, poll: &Poll, event: &Event, token: Token, client_token: Token) {
        let Some(conn) = self.connections.get_mut(&client_token) else {
            self.cgi_to_client.remove(&token);
            return;
        };

        if let Err(e) = cgi::handle_cgi_event(
            poll,
            event,
            token,
            client_token,
            conn,
            &mut self.cgi_to_client,
            &mut self.zombie_purgatory,
        ) {
            error!("cgi exchange failed: {}", e);
            conn.closed = true;
        }

        if conn.should_close() {
            self.terminate_connection(poll, client_token);
        }
    }

    fn dispatch_client_event(&mut self, poll: &Poll, event: &Event, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        if event.is_readable() {
            if let Err(e) = Connection::handle_read_phase(
                conn,
                poll,
                token,
                &mut self.next_token,
                &mut self.cgi_to_client,
            ) {
                error!("read phase failed on {:?}: {}", token, e);
                conn.closed = true;
            }
        }

        if event.is_writable() && !conn.should_close() {
            if let Err(e) = Connection::handle_write_phase(
                conn,
                poll,
                token,
                &mut self.next_token,
                &mut self.cgi_to_client,
            ) {
                error!("write phase failed on {:?}: {}", token, e);
                conn.closed = true;
            }
        }

        if conn.should_close() {
            self.terminate_connection(poll, token);
        }
    }

    /// The single close path: deregisters and releases every resource the
    /// connection owns. Safe to call for partially torn-down connections.
    pub fn terminate_connection(&mut self, poll: &Poll, token: Token) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };
        trace!("closing connection {:?}", token);

        let action = std::mem::replace(&mut conn.action, ActiveAction::None);
        if let ActiveAction::Cgi(mut exec) = action {
            if let Some(mut pipe) = exec.in_stream.take() {
                poll.registry().deregister(&mut pipe).ok();
            }
            if let Some(mut pipe) = exec.out_stream.take() {
                poll.registry().deregister(&mut pipe).ok();
            }
            let _ = exec.child.kill();
            cgi::reap_child(exec.child, &mut self.zombie_purgatory);
        }
        if let Some(t) = conn.cgi_in_token.take() {
            self.cgi_to_client.remove(&t);
        }
        if let Some(t) = conn.cgi_out_token.take() {
            self.cgi_to_client.remove(&t);
        }

        poll.registry().deregister(&mut conn.stream).ok();
        let _ = conn.stream.shutdown(Shutdown::Both);
    }

    fn reap_zombies(&mut self) {
        self.zombie_purgatory
            .retain_mut(|child| matches!(child.try_wait(), Ok(None)));
    }

    fn shutdown(&mut self, poll: &Poll) {
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.terminate_connection(poll, token);
        }
        for listener in self.listeners.values_mut() {
            poll.registry().deregister(&mut listener.socket).ok();
        }
        self.listeners.clear();
        for mut child in self.zombie_purgatory.drain(..) {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
