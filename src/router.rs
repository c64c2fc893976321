use crate::config::{RouteConfig, ServerConfig};

/// Longest matching location prefix for `path`, with segment alignment so
/// `/img` matches `/img/a.png` but not `/imgs`.
pub fn find_route<'a>(vhost: &'a ServerConfig, path: &str) -> Option<&'a RouteConfig> {
    let mut best: Option<&RouteConfig> = None;
    for location in &vhost.locations {
        if matches_prefix(&location.path, path)
            && best.is_none_or(|b| location.path.len() > b.path.len())
        {
            best = Some(location);
        }
    }
    best
}

fn matches_prefix(prefix: &str, path: &str) -> bool {
    if !path.starts_with(prefix) {
        return false;
    }
    prefix == "/"
        || path.len() == prefix.len()
        || prefix.ends_with('/')
        || path.as_bytes()[prefix.len()] == b'/'
}
