use core::fmt;
use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};

use conf_parser::ConfError;

pub struct ServerError(pub Box<dyn Error>);

impl Debug for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\r\x1b[K{}", self)
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {}", self.0)
    }
}

impl Error for ServerError {}

impl From<ConfError> for ServerError {
    fn from(e: ConfError) -> Self {
        ServerError(Box::new(e))
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError(Box::new(e))
    }
}

impl From<std::net::AddrParseError> for ServerError {
    fn from(e: std::net::AddrParseError) -> Self {
        ServerError(Box::new(e))
    }
}

impl From<ctrlc::Error> for ServerError {
    fn from(e: ctrlc::Error) -> Self {
        ServerError(Box::new(e))
    }
}

impl From<String> for ServerError {
    fn from(s: String) -> Self {
        ServerError(Box::new(ConfError::Generic(s)))
    }
}

impl From<&str> for ServerError {
    fn from(s: &str) -> Self {
        ServerError(Box::new(ConfError::Generic(s.to_string())))
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
