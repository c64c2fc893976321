use std::collections::HashMap;

use crate::http::Method;
use crate::prelude::DEFAULT_MAX_BODY_SIZE;

// --- Defaults ---
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SERVER_NAME: &str = "_";
pub const DEFAULT_INDEX: &str = "index.html";

/// One routing rule inside a virtual host.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteConfig {
    pub path: String,
    pub root: String,
    pub autoindex: bool,
    pub allowed_methods: Vec<Method>,
    pub cgi_enabled: bool,
    pub index: String,
    pub redirect: String,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            root: String::new(),
            autoindex: false,
            allowed_methods: vec![Method::GET],
            cgi_enabled: false,
            index: DEFAULT_INDEX.to_string(),
            redirect: String::new(),
        }
    }
}

impl RouteConfig {
    pub fn allow_header(&self) -> String {
        self.allowed_methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A virtual host: one `server { }` block of the configuration file,
/// selected at runtime by listener binding and `Host` header.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub bind_specified: bool,
    pub server_names: Vec<String>,
    pub client_max_body_size: usize,
    pub error_pages: HashMap<u16, String>,
    pub locations: Vec<RouteConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            bind_specified: false,
            server_names: vec![DEFAULT_SERVER_NAME.to_string()],
            client_max_body_size: DEFAULT_MAX_BODY_SIZE,
            error_pages: HashMap::new(),
            locations: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn primary_name(&self) -> &str {
        self.server_names
            .first()
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_SERVER_NAME)
    }

    pub fn has_server_name(&self, hostname: &str) -> bool {
        self.server_names.iter().any(|n| n == hostname)
    }
}
