use crate::prelude::*;

#[derive(Debug)]
pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status_code,
            status_text: status_text.to_string(),
            headers: HashMap::from([("content-length".to_string(), "0".to_string())]),
            body: Vec::new(),
        }
    }

    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers.insert(key.to_lowercase(), value.to_string());
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.headers
            .insert("content-length".to_string(), body.len().to_string());
        self.headers
            .insert("content-type".to_string(), content_type.to_string());
        self.body = body;
        self
    }

    pub fn set_status_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.status_text = Self::status_text(code).to_string();
        self
    }

    pub fn status_text(code: u16) -> &'static str {
        match code {
            HTTP_OK => "OK",
            HTTP_CREATED => "Created",
            HTTP_NO_CONTENT => "No Content",
            HTTP_MOVED_PERMANENTLY => "Moved Permanently",
            HTTP_BAD_REQUEST => "Bad Request",
            HTTP_FORBIDDEN => "Forbidden",
            HTTP_NOT_FOUND => "Not Found",
            HTTP_METHOD_NOT_ALLOWED => "Method Not Allowed",
            HTTP_REQUEST_TIMEOUT => "Request Timeout",
            HTTP_CONFLICT => "Conflict",
            HTTP_PAYLOAD_TOO_LARGE => "Payload Too Large",
            HTTP_URI_TOO_LONG => "URI Too Long",
            HTTP_UNSUPPORTED_MEDIA_TYPE => "Unsupported Media Type",
            HTTP_HEADER_FIELDS_TOO_LARGE => "Request Header Fields Too Large",
            HTTP_INTERNAL_SERVER_ERROR => "Internal Server Error",
            HTTP_NOT_IMPLEMENTED => "Not Implemented",
            HTTP_VERSION_NOT_SUPPORTED => "HTTP Version Not Supported",
            HTTP_INSUFFICIENT_STORAGE => "Insufficient Storage",
            _ => "Unknown",
        }
    }

    pub fn redirect(code: u16, target_url: &str) -> Self {
        let mut res = HttpResponse::new(code, Self::status_text(code));
        res.set_header("location", target_url);
        res
    }

    /// Serializes the status line, the mandatory `Date`/`Server` headers and
    /// every handler-supplied header, then the body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut res = format!(
            "{} {} {}\r\n",
            self.version, self.status_code, self.status_text
        )
        .into_bytes();

        if !self.headers.contains_key("date") {
            res.extend_from_slice(format!("Date: {}\r\n", current_gmt_time()).as_bytes());
        }
        if !self.headers.contains_key("server") {
            res.extend_from_slice(format!("Server: {}\r\n", SERVER_SOFTWARE).as_bytes());
        }

        for (key, val) in &self.headers {
            let formatted_key = Self::to_pascal_case(key);
            res.extend_from_slice(format!("{}: {}\r\n", formatted_key, val).as_bytes());
        }
        res.extend_from_slice(b"\r\n");
        res.extend_from_slice(&self.body);
        res
    }

    fn to_pascal_case(s: &str) -> String {
        s.split('-')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    None => String::new(),
                    Some(f) => f.to_uppercase().collect::<String>() + chars.as_str(),
                }
            })
            .collect::<Vec<String>>()
            .join("-")
    }
}

pub fn current_gmt_time() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Turns `res` into an error response for `code`, preferring the virtual
/// host's configured error page over the generated fallback body.
pub fn handle_error(res: &mut HttpResponse, code: u16, vhost: Option<&Arc<ServerConfig>>) {
    res.set_status_code(code);

    if let Some(cfg) = vhost {
        if let Some(page) = cfg.error_pages.get(&code) {
            if let Ok(content) = fs::read(page) {
                res.set_body(content, "text/html");
                return;
            }
        }
    }

    let body = format!(
        "<html><body><h1>{} {}</h1></body></html>",
        code,
        HttpResponse::status_text(code)
    );
    res.set_body(body.into_bytes(), "text/html");
}

pub fn get_mime_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

pub fn generate_autoindex(res: &mut HttpResponse, path: &Path, original_url: &str) {
    let base = original_url.trim_end_matches('/');
    let mut html = format!("<html><body><h1>Index of {}/</h1><ul>", base);

    if let Ok(entries) = path.read_dir() {
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let mut name = entry.file_name().into_string().ok()?;
                if entry.path().is_dir() {
                    name.push('/');
                }
                Some(name)
            })
            .collect();
        names.sort();

        for name in names {
            html.push_str(&format!(
                "<li><a href=\"{}/{}\">{}</a></li>",
                base, name, name
            ));
        }
    }

    html.push_str("</ul></body></html>");
    res.set_status_code(HTTP_OK);
    res.set_body(html.into_bytes(), "text/html");
}
