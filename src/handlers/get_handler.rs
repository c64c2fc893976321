use crate::handlers::{filesystem_error_code, resolve_fs_path};
use crate::prelude::*;

pub fn handle_get(
    request: &HttpRequest,
    response: &mut HttpResponse,
    route: &RouteConfig,
    vhost: &Arc<ServerConfig>,
) -> ActiveAction {
    let path = resolve_fs_path(route, &request.path);

    if request.path.ends_with('/') {
        return serve_directory(request, response, route, vhost, &path);
    }

    match fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => {
            // Directory named without a trailing slash: redirect to it.
            *response =
                HttpResponse::redirect(HTTP_MOVED_PERMANENTLY, &format!("{}/", request.path));
            ActiveAction::None
        }
        Ok(meta) if !meta.is_file() => {
            handle_error(response, HTTP_FORBIDDEN, Some(vhost));
            ActiveAction::None
        }
        Ok(meta) => serve_file(&path, meta.len() as usize, response, vhost),
        Err(e) => {
            handle_error(response, filesystem_error_code(&e), Some(vhost));
            ActiveAction::None
        }
    }
}

fn serve_directory(
    request: &HttpRequest,
    response: &mut HttpResponse,
    route: &RouteConfig,
    vhost: &Arc<ServerConfig>,
    dir: &Path,
) -> ActiveAction {
    if !route.index.is_empty() {
        let candidate = dir.join(&route.index);
        if let Ok(meta) = fs::metadata(&candidate) {
            if meta.is_file() {
                return serve_file(&candidate, meta.len() as usize, response, vhost);
            }
        }
    }

    if !dir.is_dir() {
        handle_error(response, HTTP_NOT_FOUND, Some(vhost));
        return ActiveAction::None;
    }

    if route.autoindex {
        generate_autoindex(response, dir, &request.path);
    } else {
        handle_error(response, HTTP_FORBIDDEN, Some(vhost));
    }
    ActiveAction::None
}

/// Small files travel in the response body; larger ones stream from the
/// open file on writable readiness.
fn serve_file(
    path: &Path,
    size: usize,
    response: &mut HttpResponse,
    vhost: &Arc<ServerConfig>,
) -> ActiveAction {
    let mime_type = get_mime_type(path.extension().and_then(|s| s.to_str()));

    if size <= IN_MEMORY_FILE_LIMIT {
        match fs::read(path) {
            Ok(content) => {
                response.set_status_code(HTTP_OK);
                response.set_body(content, mime_type);
            }
            Err(e) => handle_error(response, filesystem_error_code(&e), Some(vhost)),
        }
        return ActiveAction::None;
    }

    match File::open(path) {
        Ok(file) => {
            response.set_status_code(HTTP_OK);
            response.set_header("content-length", &size.to_string());
            response.set_header("content-type", mime_type);
            ActiveAction::FileStream(file, size)
        }
        Err(e) => {
            handle_error(response, filesystem_error_code(&e), Some(vhost));
            ActiveAction::None
        }
    }
}
