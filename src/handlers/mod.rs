pub mod delete_handler;
pub mod get_handler;
pub mod upload_handler;

pub use delete_handler::*;
pub use get_handler::*;
pub use upload_handler::*;

use crate::cgi;
use crate::prelude::*;

/// Chooses the handler for a completed request and runs it (or, for CGI,
/// starts it). Non-CGI handlers fill `conn.response` synchronously.
pub fn dispatch(
    conn: &mut Connection,
    poll: &Poll,
    client_token: Token,
    next_token: &mut usize,
    cgi_to_client: &mut HashMap<Token, Token>,
) -> Result<()> {
    let vhost = Arc::clone(&conn.vhost);
    let request_path = conn.request.path.clone();

    let Some(route) = find_route(&vhost, &request_path) else {
        handle_error(&mut conn.response, HTTP_NOT_FOUND, Some(&vhost));
        return Ok(());
    };
    let route = route.clone();

    info!(
        "{} {} -> {} ({})",
        conn.request.method,
        conn.request.uri,
        route.path,
        vhost.primary_name()
    );

    if !route.redirect.is_empty() {
        conn.response = HttpResponse::redirect(HTTP_MOVED_PERMANENTLY, &route.redirect);
        return Ok(());
    }

    // PUT and HEAD parse fine but no handler serves them.
    if matches!(conn.request.method, Method::PUT | Method::HEAD) {
        handle_error(&mut conn.response, HTTP_NOT_IMPLEMENTED, Some(&vhost));
        return Ok(());
    }

    if !conn.request.method.is_allowed(&route.allowed_methods) {
        handle_error(&mut conn.response, HTTP_METHOD_NOT_ALLOWED, Some(&vhost));
        conn.response.set_header("allow", &route.allow_header());
        return Ok(());
    }

    if route.cgi_enabled {
        return cgi::spawn_cgi(conn, poll, client_token, next_token, cgi_to_client, &route);
    }

    match conn.request.method {
        Method::GET => {
            conn.action = handle_get(&conn.request, &mut conn.response, &route, &vhost);
        }
        Method::POST => handle_upload(&conn.request, &mut conn.response, &route, &vhost),
        Method::DELETE => handle_delete(&conn.request, &mut conn.response, &route, &vhost),
        Method::PUT | Method::HEAD => {}
    }
    Ok(())
}

/// Maps the resolved location prefix plus remaining URI path onto the
/// location's filesystem root.
pub fn resolve_fs_path(route: &RouteConfig, request_path: &str) -> PathBuf {
    let relative = request_path
        .strip_prefix(&route.path)
        .unwrap_or(request_path);
    let mut path = PathBuf::from(&route.root);
    path.push(relative.trim_start_matches('/'));
    path
}

pub fn filesystem_error_code(e: &io::Error) -> u16 {
    match e.kind() {
        ErrorKind::NotFound => HTTP_NOT_FOUND,
        ErrorKind::PermissionDenied => HTTP_FORBIDDEN,
        ErrorKind::ResourceBusy => HTTP_CONFLICT,
        ErrorKind::StorageFull => HTTP_INSUFFICIENT_STORAGE,
        _ => HTTP_INTERNAL_SERVER_ERROR,
    }
}
