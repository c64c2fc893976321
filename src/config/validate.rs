use std::collections::HashMap;
use std::path::Path;

use crate::config::types::ServerConfig;
use crate::error::Result;
use server_log::warn;

const FORBIDDEN_PATH_CHARS: &[char] = &['<', '>', '"', '\'', '|', '*', '?'];

/// Structural validation of the interpreted configuration. Violations are
/// startup errors; missing filesystem targets only produce warnings, the
/// request path reports 404 for those at runtime.
pub fn validate(servers: &[ServerConfig]) -> Result<()> {
    // Key: (address, port, primary name) -> first server index using it
    let mut seen: HashMap<(String, u16, String), usize> = HashMap::new();

    for (idx, server) in servers.iter().enumerate() {
        let key = (
            server.bind_address.clone(),
            server.port,
            server.primary_name().to_string(),
        );
        if let Some(other) = seen.insert(key, idx) {
            return Err(format!(
                "server blocks {} and {} both bind {}:{} as '{}'",
                other + 1,
                idx + 1,
                server.bind_address,
                server.port,
                server.primary_name()
            )
            .into());
        }

        validate_server(idx, server)?;
    }

    Ok(())
}

fn validate_server(idx: usize, server: &ServerConfig) -> Result<()> {
    let name = server.primary_name();

    if server.server_names.iter().any(|n| n.is_empty()) {
        return Err(format!("server block {} has an empty server_name", idx + 1).into());
    }

    for (code, page) in &server.error_pages {
        if *code < 100 || *code > 599 {
            return Err(format!(
                "server '{}' maps error page '{}' to invalid status code {}",
                name, page, code
            )
            .into());
        }
        if !Path::new(page).is_file() {
            warn!("server '{}': error page '{}' does not exist", name, page);
        }
    }

    if server.locations.is_empty() {
        return Err(format!("server '{}' declares no locations", name).into());
    }

    for location in &server.locations {
        if !location.path.starts_with('/') {
            return Err(format!(
                "server '{}': location path '{}' must be absolute",
                name, location.path
            )
            .into());
        }
        if location.path.contains(FORBIDDEN_PATH_CHARS) {
            return Err(format!(
                "server '{}': location path '{}' contains a forbidden character",
                name, location.path
            )
            .into());
        }
        if location.root.is_empty() {
            return Err(format!(
                "server '{}': location '{}' is missing a root",
                name, location.path
            )
            .into());
        }
        if location.allowed_methods.is_empty() {
            return Err(format!(
                "server '{}': location '{}' allows no methods",
                name, location.path
            )
            .into());
        }
        if !location.redirect.is_empty()
            && !location.redirect.starts_with('/')
            && !location.redirect.starts_with("http://")
            && !location.redirect.starts_with("https://")
        {
            return Err(format!(
                "server '{}': location '{}' has an invalid redirect target '{}'",
                name, location.path, location.redirect
            )
            .into());
        }
        if !Path::new(&location.root).is_dir() {
            warn!(
                "server '{}': root '{}' of location '{}' does not exist",
                name, location.root, location.path
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::RouteConfig;

    fn make_server(address: &str, port: u16, name: &str) -> ServerConfig {
        ServerConfig {
            bind_address: address.to_string(),
            port,
            server_names: vec![name.to_string()],
            locations: vec![RouteConfig {
                root: std::env::temp_dir().to_string_lossy().into_owned(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn accepts_distinct_bindings() {
        let servers = vec![
            make_server("127.0.0.1", 8001, "a"),
            make_server("127.0.0.1", 8002, "a"),
            make_server("127.0.0.1", 8001, "b"),
        ];
        assert!(validate(&servers).is_ok());
    }

    #[test]
    fn rejects_duplicate_binding() {
        let servers = vec![
            make_server("127.0.0.1", 8080, "same.com"),
            make_server("127.0.0.1", 8080, "same.com"),
        ];
        assert!(validate(&servers).is_err());
    }

    #[test]
    fn rejects_missing_locations() {
        let mut server = make_server("0.0.0.0", 8080, "a");
        server.locations.clear();
        assert!(validate(&[server]).is_err());
    }

    #[test]
    fn rejects_relative_location_path() {
        let mut server = make_server("0.0.0.0", 8080, "a");
        server.locations[0].path = "static".to_string();
        assert!(validate(&[server]).is_err());
    }

    #[test]
    fn rejects_forbidden_path_characters() {
        let mut server = make_server("0.0.0.0", 8080, "a");
        server.locations[0].path = "/sta*r".to_string();
        assert!(validate(&[server]).is_err());
    }

    #[test]
    fn rejects_empty_root() {
        let mut server = make_server("0.0.0.0", 8080, "a");
        server.locations[0].root.clear();
        assert!(validate(&[server]).is_err());
    }

    #[test]
    fn rejects_bad_redirect_target() {
        let mut server = make_server("0.0.0.0", 8080, "a");
        server.locations[0].redirect = "ftp://elsewhere".to_string();
        assert!(validate(&[server]).is_err());
    }

    #[test]
    fn accepts_absolute_and_http_redirects() {
        let mut server = make_server("0.0.0.0", 8080, "a");
        server.locations[0].redirect = "/moved".to_string();
        assert!(validate(std::slice::from_ref(&server)).is_ok());
        server.locations[0].redirect = "https://elsewhere".to_string();
        assert!(validate(&[server]).is_ok());
    }

    #[test]
    fn rejects_out_of_range_error_code() {
        let mut server = make_server("0.0.0.0", 8080, "a");
        server.error_pages.insert(99, "err.html".to_string());
        assert!(validate(&[server]).is_err());
    }
}
