use crate::config::types::ServerConfig;
use server_log::info;

/// Startup summary of every configured virtual host.
pub fn display_config(servers: &[ServerConfig]) {
    info!("loaded {} virtual host(s)", servers.len());
    for server in servers {
        info!(
            "  {} -> {}:{} (max body {} bytes)",
            server.server_names.join(" "),
            server.bind_address,
            server.port,
            server.client_max_body_size
        );
        for location in &server.locations {
            let mut flags = Vec::new();
            if location.cgi_enabled {
                flags.push("cgi");
            }
            if location.autoindex {
                flags.push("autoindex");
            }
            if !location.redirect.is_empty() {
                flags.push("redirect");
            }
            info!(
                "    location {} root={} methods=[{}]{}{}",
                location.path,
                location.root,
                location.allow_header(),
                if flags.is_empty() { "" } else { " " },
                flags.join(",")
            );
        }
    }
}
