use std::path::Path;
use std::str::FromStr;

use conf_parser::Directive;

use crate::config::types::*;
use crate::config::validate;
use crate::error::Result;
use crate::http::Method;

/// Reads and interprets a `.conf` file into validated virtual hosts.
pub fn load(path: &Path) -> Result<Vec<ServerConfig>> {
    if path.extension().and_then(|e| e.to_str()) != Some("conf") {
        return Err(format!(
            "configuration file '{}' must have a .conf extension",
            path.display()
        )
        .into());
    }

    let source = std::fs::read_to_string(path)?;
    parse(&source)
}

/// Interprets configuration text; split out of `load` so tests can feed
/// sources without touching the filesystem.
pub fn parse(source: &str) -> Result<Vec<ServerConfig>> {
    let directives = conf_parser::parse(source)?;

    let mut servers = Vec::new();
    for directive in directives {
        if directive.name != "server" {
            return Err(format!(
                "unexpected top-level directive '{}' on line {}",
                directive.name, directive.line
            )
            .into());
        }
        if !directive.args.is_empty() {
            return Err(format!("'server' takes no arguments (line {})", directive.line).into());
        }
        let block = directive
            .block
            .ok_or_else(|| format!("'server' requires a block (line {})", directive.line))?;
        servers.push(build_server(block)?);
    }

    if servers.is_empty() {
        return Err("configuration contains no server blocks".into());
    }

    validate::validate(&servers)?;
    Ok(servers)
}

fn build_server(block: Vec<Directive>) -> Result<ServerConfig> {
    let mut cfg = ServerConfig::default();

    for d in block {
        match d.name.as_str() {
            "listen" => parse_listen(&d, &mut cfg)?,
            "server_name" => {
                if d.args.is_empty() {
                    return Err(directive_error(&d, "expects at least one name"));
                }
                cfg.server_names = d.args.iter().map(|n| n.to_ascii_lowercase()).collect();
            }
            "client_max_body_size" => {
                let arg = one_arg(&d)?;
                cfg.client_max_body_size = parse_size(arg)
                    .ok_or_else(|| directive_error(&d, "expects a size like 512, 8K, 2M or 1G"))?;
            }
            "error_page" => {
                if d.args.len() != 2 {
                    return Err(directive_error(&d, "expects a status code and a path"));
                }
                let code: u16 = d.args[0]
                    .parse()
                    .map_err(|_| directive_error(&d, "has an invalid status code"))?;
                cfg.error_pages.insert(code, d.args[1].clone());
            }
            "location" => cfg.locations.push(build_location(d)?),
            _ => {
                return Err(format!(
                    "unknown server directive '{}' on line {}",
                    d.name, d.line
                )
                .into());
            }
        }
    }

    Ok(cfg)
}

// listen HOST:PORT | PORT
fn parse_listen(d: &Directive, cfg: &mut ServerConfig) -> Result<()> {
    let arg = one_arg(d)?;

    let (host, port_str) = match arg.rsplit_once(':') {
        Some((host, port)) => (Some(host), port),
        None => (None, arg),
    };

    let port: u16 = port_str
        .parse()
        .map_err(|_| directive_error(d, "has an invalid port"))?;
    if port == 0 {
        return Err(directive_error(d, "must use a port between 1 and 65535"));
    }

    cfg.port = port;
    if let Some(host) = host {
        if host.is_empty() {
            return Err(directive_error(d, "has an empty bind address"));
        }
        cfg.bind_address = host.to_string();
        cfg.bind_specified = true;
    }
    Ok(())
}

// location PATH { root | autoindex | allow_methods | cgi | index | redirect }
fn build_location(d: Directive) -> Result<RouteConfig> {
    if d.args.len() != 1 {
        return Err(directive_error(&d, "expects exactly one path"));
    }
    let block = d
        .block
        .ok_or_else(|| format!("'location' requires a block (line {})", d.line))?;

    let mut route = RouteConfig {
        path: d.args[0].clone(),
        ..Default::default()
    };

    for inner in block {
        match inner.name.as_str() {
            "root" => route.root = one_arg(&inner)?.to_string(),
            "autoindex" => route.autoindex = parse_switch(&inner)?,
            "cgi" => route.cgi_enabled = parse_switch(&inner)?,
            "index" => route.index = one_arg(&inner)?.to_string(),
            "redirect" => route.redirect = one_arg(&inner)?.to_string(),
            "allow_methods" => {
                if inner.args.is_empty() {
                    return Err(directive_error(&inner, "expects at least one method"));
                }
                let mut methods = Vec::new();
                for arg in &inner.args {
                    let method = Method::from_str(arg).map_err(|_| {
                        directive_error(&inner, "only understands GET, POST and DELETE")
                    })?;
                    if !matches!(method, Method::GET | Method::POST | Method::DELETE) {
                        return Err(directive_error(
                            &inner,
                            "only understands GET, POST and DELETE",
                        ));
                    }
                    if !methods.contains(&method) {
                        methods.push(method);
                    }
                }
                route.allowed_methods = methods;
            }
            _ => {
                return Err(format!(
                    "unknown location directive '{}' on line {}",
                    inner.name, inner.line
                )
                .into());
            }
        }
    }

    Ok(route)
}

fn one_arg<'a>(d: &'a Directive) -> Result<&'a str> {
    if d.args.len() != 1 {
        return Err(directive_error(d, "expects exactly one argument"));
    }
    Ok(&d.args[0])
}

fn parse_switch(d: &Directive) -> Result<bool> {
    match one_arg(d)? {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(directive_error(d, "expects 'on' or 'off'")),
    }
}

fn directive_error(d: &Directive, what: &str) -> crate::error::ServerError {
    format!("'{}' {} (line {})", d.name, what, d.line).into()
}

/// `SIZE[K|M|G]`, suffix case-insensitive.
pub fn parse_size(s: &str) -> Option<usize> {
    if s.is_empty() {
        return None;
    }
    let (digits, factor) = match s.chars().last().unwrap() {
        'k' | 'K' => (&s[..s.len() - 1], 1024),
        'm' | 'M' => (&s[..s.len() - 1], 1024 * 1024),
        'g' | 'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let value: usize = digits.parse().ok()?;
    value.checked_mul(factor).filter(|v| *v > 0)
}
