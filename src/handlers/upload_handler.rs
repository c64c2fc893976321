use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;

use crate::prelude::*;

pub const UPLOAD_SUBDIR: &str = "uploads";
pub const FALLBACK_UPLOAD_NAME: &str = "upload_file";
const MAX_UPLOAD_NAME_LEN: usize = 255;

#[derive(Debug, Default)]
pub struct PartInfo {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: String,
}

/// Stores the file parts of a `multipart/form-data` body under the
/// location's `uploads/` directory.
pub fn handle_upload(
    request: &HttpRequest,
    response: &mut HttpResponse,
    route: &RouteConfig,
    vhost: &Arc<ServerConfig>,
) {
    let chunked = request
        .headers
        .get("transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    if !chunked && !request.headers.contains_key("content-length") {
        handle_error(response, HTTP_BAD_REQUEST, Some(vhost));
        return;
    }
    if request.body.len() > vhost.client_max_body_size {
        handle_error(response, HTTP_PAYLOAD_TOO_LARGE, Some(vhost));
        return;
    }

    let content_type = request
        .headers
        .get("content-type")
        .map(String::as_str)
        .unwrap_or("");
    if !content_type.starts_with("multipart/form-data") {
        handle_error(response, HTTP_UNSUPPORTED_MEDIA_TYPE, Some(vhost));
        return;
    }

    let Some(boundary) = extract_boundary(content_type) else {
        handle_error(response, HTTP_BAD_REQUEST, Some(vhost));
        return;
    };

    let parts = match parse_multipart(&request.body, &boundary) {
        Ok(parts) => parts,
        Err(()) => {
            handle_error(response, HTTP_BAD_REQUEST, Some(vhost));
            return;
        }
    };

    let files: Vec<_> = parts
        .into_iter()
        .filter(|(info, _)| info.filename.as_deref().is_some_and(|f| !f.is_empty()))
        .collect();
    if files.is_empty() {
        handle_error(response, HTTP_BAD_REQUEST, Some(vhost));
        return;
    }

    let upload_dir = PathBuf::from(&route.root).join(UPLOAD_SUBDIR);
    if let Err(e) = DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(&upload_dir)
    {
        let code = match e.kind() {
            ErrorKind::PermissionDenied => HTTP_FORBIDDEN,
            _ => HTTP_INTERNAL_SERVER_ERROR,
        };
        handle_error(response, code, Some(vhost));
        return;
    }

    let mut saved = Vec::new();
    for (info, content) in files {
        let name = sanitize_filename(info.filename.as_deref().unwrap_or(""));
        let dest = unique_path(&upload_dir, &name);
        if let Err(code) = write_upload(&dest, content) {
            handle_error(response, code, Some(vhost));
            return;
        }
        saved.push(dest.file_name().unwrap().to_string_lossy().into_owned());
    }

    info!("stored {} upload(s): {}", saved.len(), saved.join(", "));

    let body = format!(
        "<html><body><h1>201 Created</h1><p>Saved: {}</p></body></html>",
        saved.join(", ")
    );
    response.set_status_code(HTTP_CREATED);
    response.set_body(body.into_bytes(), "text/html");
}

fn write_upload(dest: &Path, content: &[u8]) -> std::result::Result<(), u16> {
    let mut file = File::create(dest).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => HTTP_FORBIDDEN,
        ErrorKind::StorageFull => HTTP_INSUFFICIENT_STORAGE,
        _ => HTTP_INTERNAL_SERVER_ERROR,
    })?;

    if let Err(e) = file.write_all(content) {
        if e.kind() == ErrorKind::StorageFull {
            return Err(HTTP_INSUFFICIENT_STORAGE);
        }
        let _ = fs::remove_file(dest);
        return Err(HTTP_INTERNAL_SERVER_ERROR);
    }
    Ok(())
}

/// `boundary=...`, quoted or unquoted, terminated by `;` or end of value.
pub fn extract_boundary(content_type: &str) -> Option<String> {
    let idx = content_type.find("boundary=")?;
    let rest = &content_type[idx + "boundary=".len()..];

    let boundary = if let Some(stripped) = rest.strip_prefix('"') {
        stripped.split('"').next()?
    } else {
        rest.split(';').next().unwrap_or(rest).trim()
    };

    (!boundary.is_empty()).then(|| boundary.to_string())
}

/// Splits a complete multipart body into its parts. Any framing surprise is
/// an error; the caller answers 400.
pub fn parse_multipart<'a>(
    body: &'a [u8],
    boundary: &str,
) -> std::result::Result<Vec<(PartInfo, &'a [u8])>, ()> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut pos = find_subsequence(body, delimiter, 0).ok_or(())? + delimiter.len();

    loop {
        let rest = body.get(pos..).ok_or(())?;
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(());
        }
        pos += 2;

        let header_end = find_subsequence(body, b"\r\n\r\n", pos).ok_or(())?;
        let headers = std::str::from_utf8(&body[pos..header_end]).map_err(|_| ())?;
        let info = parse_part_headers(headers);

        let data_start = header_end + 4;
        let next_delimiter = find_subsequence(body, delimiter, data_start).ok_or(())?;
        let mut data_end = next_delimiter;
        if data_end >= data_start + 2 && &body[data_end - 2..data_end] == b"\r\n" {
            data_end -= 2;
        }

        parts.push((info, &body[data_start..data_end]));
        pos = next_delimiter + delimiter.len();
    }
}

pub fn parse_part_headers(headers: &str) -> PartInfo {
    let mut info = PartInfo::default();

    for line in headers.lines() {
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("content-disposition:") {
            if let Some(n) = line.split(';').find(|s| s.trim().starts_with("name=")) {
                info.name = n
                    .split('=')
                    .nth(1)
                    .unwrap_or("")
                    .trim()
                    .trim_matches('"')
                    .to_string();
            }
            if let Some(f) = line.split(';').find(|s| s.trim().starts_with("filename=")) {
                info.filename = Some(
                    f.split('=')
                        .nth(1)
                        .unwrap_or("")
                        .trim()
                        .trim_matches('"')
                        .to_string(),
                );
            }
        } else if lower.starts_with("content-type:") {
            info.content_type = line.split(':').nth(1).unwrap_or("").trim().to_string();
        }
    }
    info
}

/// Picks a destination that does not clobber an existing upload: `cat.png`
/// becomes `cat_1.png`, `cat_2.png`, ... while taken.
pub fn unique_path(directory: &Path, filename: &str) -> PathBuf {
    let mut full_path = directory.join(filename);
    let mut counter = 1;

    while full_path.exists() {
        let stem = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(FALLBACK_UPLOAD_NAME);
        let ext = Path::new(filename)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("");

        let next_name = if ext.is_empty() {
            format!("{}_{}", stem, counter)
        } else {
            format!("{}_{}.{}", stem, counter, ext)
        };

        full_path = directory.join(next_name);
        counter += 1;
    }
    full_path
}

/// Path components stripped, anything outside `[A-Za-z0-9._-]` replaced
/// with `_`, capped at 255 bytes.
pub fn sanitize_filename(name: &str) -> String {
    let raw = Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    let mut sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return FALLBACK_UPLOAD_NAME.to_string();
    }
    sanitized.truncate(MAX_UPLOAD_NAME_LEN);
    sanitized
}
