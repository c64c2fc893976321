pub use crate::config::{RouteConfig, ServerConfig};
pub use crate::error::Result;
pub use crate::http::*;

pub use crate::cgi::{CgiExec, CgiState};
pub use crate::router::find_route;
pub use crate::server::{Listener, Server};

pub use mio::{
    Events, Interest, Poll, Token,
    event::Event,
    net::{TcpListener, TcpStream},
};
pub use server_log::{debug, error, info, trace, warn};

pub use std::collections::HashMap;
pub use std::fs::{self, File, OpenOptions};
pub use std::io::{ErrorKind, Read, Write};
pub use std::net::SocketAddr;
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant};

pub use std::{
    fmt::{self, Display},
    io,
    os::{
        fd::{FromRawFd, IntoRawFd},
        unix::net::UnixStream,
    },
    process::{Command, Stdio},
    str::FromStr,
};

pub const READ_BUF_SIZE: usize = 4096;
pub const IN_MEMORY_FILE_LIMIT: usize = 64 * 1024;
pub const POLL_TIMEOUT_MS: u64 = 1000;
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

pub const MAX_REQUEST_LINE_LENGTH: usize = 8192;
pub const MAX_URI_LENGTH: usize = 8192;
pub const MAX_HEADER_NAME_LENGTH: usize = 256;
pub const MAX_HEADER_VALUE_LENGTH: usize = 8192;
pub const MAX_HEADERS: usize = 100;
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

// 2xx / 3xx
pub const HTTP_OK: u16 = 200;
pub const HTTP_CREATED: u16 = 201;
pub const HTTP_NO_CONTENT: u16 = 204;
pub const HTTP_MOVED_PERMANENTLY: u16 = 301;

// 4xx Client Errors
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_FORBIDDEN: u16 = 403;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_METHOD_NOT_ALLOWED: u16 = 405;
pub const HTTP_REQUEST_TIMEOUT: u16 = 408;
pub const HTTP_CONFLICT: u16 = 409;
pub const HTTP_PAYLOAD_TOO_LARGE: u16 = 413;
pub const HTTP_URI_TOO_LONG: u16 = 414;
pub const HTTP_UNSUPPORTED_MEDIA_TYPE: u16 = 415;
pub const HTTP_HEADER_FIELDS_TOO_LARGE: u16 = 431;

// 5xx Server Errors
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_NOT_IMPLEMENTED: u16 = 501;
pub const HTTP_VERSION_NOT_SUPPORTED: u16 = 505;
pub const HTTP_INSUFFICIENT_STORAGE: u16 = 507;

pub const SERVER_SOFTWARE: &str = "origin-server/0.1";
