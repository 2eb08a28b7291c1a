//! HTTP handler serving archive entries.
//!
//! Deflated entries are sent as-is with `Content-Encoding: deflate` when the
//! client accepts it, so a whole-file GET costs no recompression. Stored
//! entries and clients without deflate support get the decompressed stream.
//! Range requests cannot be answered from a deflate stream; they are served
//! from a private temp copy of the entry through `tower-http`'s `ServeFile`.

mod body;
pub mod conditional;

pub use conditional::{Conditional, check_conditional, entity_tag, http_date};

use axum::Router;
use axum::body::Body;
use axum::http::header::{
    ACCEPT_ENCODING, ACCEPT_RANGES, ALLOW, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG,
    HeaderName, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE, IF_UNMODIFIED_SINCE,
    LAST_MODIFIED, LOCATION, RANGE, VARY, X_CONTENT_TYPE_OPTIONS,
};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use mime::Mime;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use std::convert::Infallible;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::error::{Error, Result};
use crate::fs::{Archive, FileSystem, clean_path};
use crate::io::ReadAt;
use crate::zip::{CompressionMethod, ZipFileEntry};

use body::{ChunkSource, with_temp_file};

/// Characters escaped when a path segment is echoed into `Location`.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Headers that must not reach `ServeFile`: they were already evaluated
/// against the archive entry, not the temp copy.
const PRECONDITIONS: [HeaderName; 5] = [
    IF_MATCH,
    IF_NONE_MATCH,
    IF_MODIFIED_SINCE,
    IF_UNMODIFIED_SINCE,
    IF_RANGE,
];

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Default response headers. The handler's own headers replace these,
    /// except `Content-Type`, which is only guessed when not configured.
    pub headers: HeaderMap,
}

/// Serves the files of a [`FileSystem`] over HTTP.
pub struct FileServer<R: ReadAt> {
    archive: Arc<Archive<R>>,
    config: Arc<ServerConfig>,
}

impl<R: ReadAt> Clone for FileServer<R> {
    fn clone(&self) -> Self {
        Self {
            archive: Arc::clone(&self.archive),
            config: Arc::clone(&self.config),
        }
    }
}

impl<R: ReadAt + 'static> FileServer<R> {
    pub fn new(fs: &FileSystem<R>) -> Self {
        Self {
            archive: Arc::clone(fs.archive()),
            config: Arc::new(ServerConfig::default()),
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Mount the handler under `base`; `/` serves every path.
    ///
    /// Request paths are resolved relative to `base`, so `/files/a.txt` on a
    /// server mounted at `/files` serves the archive's `a.txt`.
    pub fn router(self, base: &str) -> Router {
        let service = tower::service_fn(move |req: Request<Body>| {
            let server = self.clone();
            async move { Ok::<_, Infallible>(server.serve(req).await) }
        });

        let base = base.trim_matches('/');
        if base.is_empty() {
            Router::new().fallback_service(service)
        } else {
            Router::new().nest_service(&format!("/{base}"), service)
        }
    }

    /// Answer one request. Never fails: errors become `500` responses.
    pub async fn serve<B>(&self, req: Request<B>) -> Response {
        let (parts, _) = req.into_parts();
        if parts.method != Method::GET && parts.method != Method::HEAD {
            let mut response =
                text_response(StatusCode::METHOD_NOT_ALLOWED, "405 method not allowed");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
            return response;
        }

        let mut response = match self.respond(&parts).await {
            Ok(response) => response,
            Err(err) => {
                log::warn!("{} {}: {err}", parts.method, parts.uri.path());
                text_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        if parts.method == Method::HEAD {
            *response.body_mut() = Body::empty();
        }
        response
    }

    async fn respond(&self, parts: &Parts) -> Result<Response> {
        let mut path = percent_decode_str(parts.uri.path())
            .decode_utf8_lossy()
            .into_owned();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        if path.ends_with("/index.html") {
            return Ok(redirect("./"));
        }

        let index = &self.archive.index;
        let Some(mut id) = index.lookup(&path) else {
            return Ok(text_response(StatusCode::NOT_FOUND, "404 page not found"));
        };

        let node = index.node(id);
        let trailing_slash = path.ends_with('/');
        if node.is_dir() {
            if !trailing_slash {
                return Ok(redirect(&format!("{}/", escape(node.name()))));
            }
            match index.child(id, "index.html") {
                Some(child) if !index.node(child).is_dir() => id = child,
                _ => {
                    return Ok(text_response(
                        StatusCode::FORBIDDEN,
                        "403 directory listing not supported",
                    ));
                }
            }
        } else if trailing_slash {
            return Ok(redirect(&format!("../{}", escape(node.name()))));
        }

        let node = index.node(id);
        let entry = node.entry().ok_or_else(|| Error::IsADirectory {
            op: "serve",
            path: clean_path(&path),
        })?;

        let etag = entity_tag(entry);
        let modified = node.modified();
        let range = match check_conditional(&parts.method, &parts.headers, &etag, Some(modified))
        {
            Conditional::NotModified => return Ok(self.not_modified(&etag)),
            Conditional::Proceed { range } => range,
        };

        let mut response = match range {
            Some(range) => self.serve_range(parts, entry, &range).await?,
            None => self.serve_whole(parts, entry).await?,
        };

        let headers = response.headers_mut();
        headers.insert(ETAG, header_value(&etag));
        headers.insert(LAST_MODIFIED, header_value(&http_date(modified)));
        Ok(response)
    }

    fn not_modified(&self, etag: &str) -> Response {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        let headers = response.headers_mut();
        self.apply_defaults(headers);
        headers.insert(ETAG, header_value(etag));
        for name in [CONTENT_TYPE, CONTENT_LENGTH, CONTENT_ENCODING] {
            headers.remove(name);
        }
        response
    }

    /// Extract the entry and let `ServeFile` answer the range.
    async fn serve_range(
        &self,
        parts: &Parts,
        entry: &ZipFileEntry,
        range: &str,
    ) -> Result<Response> {
        let extractor = self.archive.extractor()?;
        let temp = extractor
            .extract_to_temp(entry, &self.archive.temp_dir())
            .await?;

        let mut request = Request::new(Body::empty());
        *request.method_mut() = parts.method.clone();
        *request.uri_mut() = parts.uri.clone();
        *request.headers_mut() = parts.headers.clone();
        for name in PRECONDITIONS {
            request.headers_mut().remove(name);
        }
        request.headers_mut().insert(RANGE, header_value(range));

        let mime = self.content_type(&entry.file_name);
        let response = ServeFile::new_with_mime(&temp, &mime)
            .oneshot(request)
            .await
            .unwrap_or_else(|never| match never {});

        let (mut head, body) = response.into_parts();
        self.apply_defaults(&mut head.headers);
        head.headers.remove(CONTENT_ENCODING);
        // The temp copy's timestamp means nothing to the client.
        head.headers.remove(LAST_MODIFIED);
        log::debug!("{} {range}: {}", entry.file_name, head.status);

        Ok(Response::from_parts(
            head,
            with_temp_file(Body::new(body), temp),
        ))
    }

    /// Whole-entry response, deflate passthrough when the client allows it.
    async fn serve_whole(&self, parts: &Parts, entry: &ZipFileEntry) -> Result<Response> {
        let extractor = self.archive.extractor()?;
        let passthrough = match entry.compression_method {
            CompressionMethod::Deflate => accepts_deflate(&parts.headers),
            CompressionMethod::Stored => false,
            CompressionMethod::Unknown(method) => {
                return Err(Error::UnsupportedCompressionMethod(method));
            }
        };

        let mut response = Response::new(Body::empty());
        let headers = response.headers_mut();
        self.apply_defaults(headers);
        if !headers.contains_key(CONTENT_TYPE) {
            let mime = self.content_type(&entry.file_name);
            headers.insert(CONTENT_TYPE, header_value(mime.as_ref()));
        }
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        if entry.compression_method == CompressionMethod::Deflate {
            headers.insert(VARY, HeaderValue::from_static("accept-encoding"));
        }

        let source = if passthrough {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("deflate"));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(entry.compressed_size));
            if parts.method == Method::HEAD {
                return Ok(response);
            }
            ChunkSource::Raw {
                source: Arc::clone(extractor.source()),
                offset: extractor.data_offset(entry).await?,
                remaining: entry.compressed_size,
            }
        } else {
            headers.remove(CONTENT_ENCODING);
            headers.insert(CONTENT_LENGTH, HeaderValue::from(entry.uncompressed_size));
            if parts.method == Method::HEAD {
                return Ok(response);
            }
            ChunkSource::Identity(extractor.open(entry).await?)
        };

        *response.body_mut() = source.into_body(entry.file_name.clone()).await?;
        Ok(response)
    }

    /// Copy configured headers the response does not already carry.
    fn apply_defaults(&self, headers: &mut HeaderMap) {
        for name in self.config.headers.keys() {
            if headers.contains_key(name) {
                continue;
            }
            for value in self.config.headers.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }

    /// Configured `Content-Type`, else a guess from the entry name.
    fn content_type(&self, name: &str) -> Mime {
        self.config
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or_else(|| guess_mime(name))
    }
}

/// MIME type by extension; text types are labelled UTF-8.
pub fn guess_mime(name: &str) -> Mime {
    let mime = mime_guess::from_path(name).first_or_octet_stream();
    if mime.type_() == mime::TEXT
        && mime.get_param(mime::CHARSET).is_none()
        && let Ok(with_charset) = format!("{mime}; charset=utf-8").parse::<Mime>()
    {
        return with_charset;
    }
    mime
}

/// Whether any `Accept-Encoding` value lists `deflate` with a non-zero q.
fn accepts_deflate(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|coding| {
            let mut params = coding.split(';').map(str::trim);
            let name = params.next().unwrap_or_default();
            name.eq_ignore_ascii_case("deflate")
                && params.all(|param| match param.split_once('=') {
                    Some((key, q)) if key.trim().eq_ignore_ascii_case("q") => {
                        q.trim().parse::<f32>().is_ok_and(|q| q > 0.0)
                    }
                    _ => true,
                })
        })
}

fn escape(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn redirect(location: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    response
        .headers_mut()
        .insert(LOCATION, header_value(location));
    response
}

fn text_response(status: StatusCode, message: impl Into<String>) -> Response {
    let mut response = Response::new(Body::from(message.into()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn accept_encoding_parsing() {
        assert!(accepts_deflate(&accept("deflate")));
        assert!(accepts_deflate(&accept("gzip, deflate, br")));
        assert!(accepts_deflate(&accept("gzip;q=1.0, Deflate;q=0.5")));
        assert!(!accepts_deflate(&accept("gzip, br")));
        assert!(!accepts_deflate(&accept("deflate;q=0")));
        assert!(!accepts_deflate(&accept("deflate; q=0.0")));
        assert!(!accepts_deflate(&HeaderMap::new()));
    }

    #[test]
    fn mime_guessing() {
        assert_eq!(guess_mime("index.html").as_ref(), "text/html; charset=utf-8");
        assert_eq!(guess_mime("img/circle.png").as_ref(), "image/png");
        assert_eq!(guess_mime("LICENSE").as_ref(), "application/octet-stream");
    }

    #[test]
    fn redirect_targets_are_escaped() {
        assert_eq!(escape("a b#c.txt"), "a%20b%23c.txt");
        assert_eq!(escape("plain"), "plain");
    }
}
