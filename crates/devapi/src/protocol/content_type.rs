pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_HTML: &str = "text/html";
pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";

const BY_EXTENSION: &[(&str, &str)] = &[
    (".html", TEXT_HTML),
    (".htm", TEXT_HTML),
    (".css", "text/css"),
    (".xhtml", "application/xhtml+xml"),
    (".js", "application/javascript"),
    (".json", APPLICATION_JSON),
    (".xml", "application/xml"),
    (".ico", "image/x-icon"),
    (".jpeg", "image/jpeg"),
    (".jpg", "image/jpeg"),
    (".gif", "image/gif"),
    (".png", "image/png"),
];

/// Infers the content type of a static file from its extension.
pub fn for_path(path: &str) -> &'static str {
    BY_EXTENSION
        .iter()
        .find(|(extension, _)| path.ends_with(extension))
        .map_or(APPLICATION_OCTET_STREAM, |&(_, content_type)| content_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_from_extension() {
        assert_eq!(for_path("index.html"), "text/html");
        assert_eq!(for_path("old.htm"), "text/html");
        assert_eq!(for_path("page.xhtml"), "application/xhtml+xml");
        assert_eq!(for_path("app.js"), "application/javascript");
        assert_eq!(for_path("data.json"), "application/json");
        assert_eq!(for_path("favicon.ico"), "image/x-icon");
        assert_eq!(for_path("photo.jpeg"), "image/jpeg");
        assert_eq!(for_path("photo.jpg"), "image/jpeg");
        assert_eq!(for_path("firmware.bin"), "application/octet-stream");
        assert_eq!(for_path("noext"), "application/octet-stream");
    }
}
