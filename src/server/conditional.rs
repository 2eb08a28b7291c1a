//! ETag computation and `If-Range` / `If-None-Match` evaluation.

use axum::http::header::{IF_NONE_MATCH, IF_RANGE, RANGE};
use axum::http::{HeaderMap, Method};
use chrono::{DateTime, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::zip::ZipFileEntry;

/// Strong validator for an entry: the CRC32 in the low word, the low 32 bits
/// of the compressed size in the high word, as quoted lowercase hex.
pub fn entity_tag(entry: &ZipFileEntry) -> String {
    let tag = u64::from(entry.crc32) ^ ((entry.compressed_size & 0xffff_ffff) << 32);
    format!("\"{tag:x}\"")
}

/// Outcome of evaluating the conditional headers of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conditional {
    /// The client's copy is current; answer 304.
    NotModified,
    /// Serve the entity, honouring `range` if present.
    Proceed { range: Option<String> },
}

/// Evaluate `If-Range` and `If-None-Match` against the current validators.
///
/// `If-Range` accepts either the exact ETag or an HTTP-date equal to
/// `modified` at second granularity; anything else drops the `Range`
/// header. `If-None-Match` is only honoured for GET and HEAD.
pub fn check_conditional(
    method: &Method,
    headers: &HeaderMap,
    etag: &str,
    modified: Option<SystemTime>,
) -> Conditional {
    let mut range = header_str(headers, RANGE.as_str())
        .filter(|r| !r.is_empty())
        .map(str::to_string);

    if let Some(if_range) = header_str(headers, IF_RANGE.as_str())
        && !if_range.is_empty()
        && if_range != etag
        && !date_matches(if_range, modified)
    {
        range = None;
    }

    if let Some(if_none_match) = header_str(headers, IF_NONE_MATCH.as_str())
        && !if_none_match.is_empty()
        && !etag.is_empty()
        && (method == Method::GET || method == Method::HEAD)
        && none_match_hits(if_none_match, etag)
    {
        return Conditional::NotModified;
    }

    Conditional::Proceed { range }
}

/// Format a timestamp as an IMF-fixdate, e.g. `Sun, 17 May 2020 10:30:00 GMT`.
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Weak comparison against every tag in the list.
fn none_match_hits(list: &str, etag: &str) -> bool {
    let etag = etag.trim_start_matches("W/");
    list.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == etag
    })
}

fn date_matches(value: &str, modified: Option<SystemTime>) -> bool {
    let Some(modified) = modified else {
        return false;
    };
    let Ok(modified) = modified.duration_since(UNIX_EPOCH) else {
        return false;
    };
    DateTime::parse_from_rfc2822(value)
        .is_ok_and(|date| date.timestamp() == modified.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::CompressionMethod;
    use axum::http::HeaderValue;
    use std::time::Duration;

    const ETAG: &str = "\"27106c15f45b\"";

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(*value));
        }
        map
    }

    fn modified() -> Option<SystemTime> {
        // Sun, 17 May 2020 10:30:00 GMT
        Some(UNIX_EPOCH + Duration::from_secs(1_589_711_400))
    }

    #[test]
    fn etag_fixed_point() {
        let entry = ZipFileEntry {
            file_name: "random.dat".to_string(),
            compression_method: CompressionMethod::Deflate,
            compressed_size: 0x45b,
            uncompressed_size: 10_000,
            crc32: 0x2710_6c15,
            lfh_offset: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            unix_mtime: None,
            is_directory: false,
        };
        assert_eq!(entity_tag(&entry), ETAG);
    }

    #[test]
    fn etag_ignores_high_bits_of_compressed_size() {
        let mut entry = ZipFileEntry {
            file_name: "big.bin".to_string(),
            compression_method: CompressionMethod::Stored,
            compressed_size: 0x1_0000_0001,
            uncompressed_size: 0,
            crc32: 0xffff_ffff,
            lfh_offset: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            unix_mtime: None,
            is_directory: false,
        };
        assert_eq!(entity_tag(&entry), "\"1ffffffff\"");
        entry.compressed_size = 0;
        entry.crc32 = 0;
        assert_eq!(entity_tag(&entry), "\"0\"");
    }

    #[test]
    fn http_date_round_trips_through_if_range() {
        let date = http_date(modified().unwrap());
        assert_eq!(date, "Sun, 17 May 2020 10:30:00 GMT");
        assert!(date_matches(&date, modified()));
    }

    #[test]
    fn plain_range_passes_through() {
        let h = headers(&[("range", "bytes=0-499")]);
        assert_eq!(
            check_conditional(&Method::GET, &h, ETAG, modified()),
            Conditional::Proceed {
                range: Some("bytes=0-499".to_string())
            }
        );
    }

    #[test]
    fn if_range_with_matching_etag_keeps_range() {
        let h = headers(&[("range", "bytes=0-499"), ("if-range", "\"27106c15f45b\"")]);
        assert_eq!(
            check_conditional(&Method::GET, &h, ETAG, modified()),
            Conditional::Proceed {
                range: Some("bytes=0-499".to_string())
            }
        );
    }

    #[test]
    fn if_range_with_stale_etag_drops_range() {
        let h = headers(&[("range", "bytes=0-499"), ("if-range", "\"123456789\"")]);
        assert_eq!(
            check_conditional(&Method::GET, &h, ETAG, modified()),
            Conditional::Proceed { range: None }
        );
    }

    #[test]
    fn if_range_with_http_date() {
        let current = headers(&[
            ("range", "bytes=10-"),
            ("if-range", "Sun, 17 May 2020 10:30:00 GMT"),
        ]);
        assert_eq!(
            check_conditional(&Method::GET, &current, ETAG, modified()),
            Conditional::Proceed {
                range: Some("bytes=10-".to_string())
            }
        );

        let stale = headers(&[
            ("range", "bytes=10-"),
            ("if-range", "Sun, 17 May 2020 10:29:59 GMT"),
        ]);
        assert_eq!(
            check_conditional(&Method::GET, &stale, ETAG, modified()),
            Conditional::Proceed { range: None }
        );
        assert_eq!(
            check_conditional(&Method::GET, &current, ETAG, None),
            Conditional::Proceed { range: None }
        );
    }

    #[test]
    fn if_none_match_hits() {
        for value in [ETAG, "*", "\"abc\", \"27106c15f45b\"", "W/\"27106c15f45b\""] {
            let mut h = HeaderMap::new();
            h.insert(IF_NONE_MATCH, HeaderValue::from_str(value).unwrap());
            assert_eq!(
                check_conditional(&Method::GET, &h, ETAG, modified()),
                Conditional::NotModified,
                "{value}"
            );
            assert_eq!(
                check_conditional(&Method::HEAD, &h, ETAG, modified()),
                Conditional::NotModified,
                "{value}"
            );
        }
    }

    #[test]
    fn if_none_match_misses() {
        let h = headers(&[("if-none-match", "\"abc\"")]);
        assert_eq!(
            check_conditional(&Method::GET, &h, ETAG, modified()),
            Conditional::Proceed { range: None }
        );

        let h = headers(&[("if-none-match", ETAG)]);
        assert_eq!(
            check_conditional(&Method::POST, &h, ETAG, modified()),
            Conditional::Proceed { range: None }
        );
        assert_eq!(
            check_conditional(&Method::GET, &h, "", modified()),
            Conditional::Proceed { range: None }
        );
    }
}
