use crate::handlers::{filesystem_error_code, resolve_fs_path};
use crate::prelude::*;

pub fn handle_delete(
    request: &HttpRequest,
    response: &mut HttpResponse,
    route: &RouteConfig,
    vhost: &Arc<ServerConfig>,
) {
    // The parser rejects ".." in URIs already; decoded paths get re-checked.
    if request.path.contains("..") {
        handle_error(response, HTTP_FORBIDDEN, Some(vhost));
        return;
    }

    let path = resolve_fs_path(route, &request.path);

    let meta = match fs::symlink_metadata(&path) {
        Ok(meta) => meta,
        Err(e) => {
            handle_error(response, filesystem_error_code(&e), Some(vhost));
            return;
        }
    };

    if meta.is_dir() || !meta.is_file() {
        handle_error(response, HTTP_FORBIDDEN, Some(vhost));
        return;
    }

    match fs::remove_file(&path) {
        Ok(()) => {
            *response =
                HttpResponse::new(HTTP_NO_CONTENT, HttpResponse::status_text(HTTP_NO_CONTENT));
        }
        Err(e) => handle_error(response, filesystem_error_code(&e), Some(vhost)),
    }
}
