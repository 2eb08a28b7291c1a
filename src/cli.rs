use axum::http::{HeaderMap, HeaderName, HeaderValue};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "zipfs")]
#[command(version)]
#[command(about = "Browse and serve the contents of a ZIP archive", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipfs serve site.zip --listen 0.0.0.0:8080     serve site.zip over HTTP\n  \
  zipfs ls https://example.com/archive.zip img    list a directory of a remote ZIP\n  \
  zipfs cat site.zip index.html | less            print one entry")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the archive over HTTP
    Serve {
        /// ZIP file path or HTTP URL
        #[arg(value_name = "ARCHIVE")]
        archive: String,

        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,

        /// URL path the archive is mounted under
        #[arg(short, long, default_value = "/")]
        base_path: String,

        /// Extra response header, e.g. 'Cache-Control: max-age=60'
        #[arg(short = 'H', long = "header", value_name = "NAME: VALUE", value_parser = parse_header)]
        headers: Vec<(HeaderName, HeaderValue)>,
    },

    /// List a directory of the archive
    Ls {
        /// ZIP file path or HTTP URL
        #[arg(value_name = "ARCHIVE")]
        archive: String,

        /// Directory to list
        #[arg(value_name = "PATH", default_value = "/")]
        path: String,

        /// Show size, compression and modification time
        #[arg(short = 'v')]
        verbose: bool,
    },

    /// Write one entry to stdout
    Cat {
        /// ZIP file path or HTTP URL
        #[arg(value_name = "ARCHIVE")]
        archive: String,

        /// Entry to print
        #[arg(value_name = "PATH")]
        path: String,

        /// Start at this byte offset
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
}

impl Cli {
    pub fn archive(&self) -> &str {
        match &self.command {
            Command::Serve { archive, .. }
            | Command::Ls { archive, .. }
            | Command::Cat { archive, .. } => archive,
        }
    }

    pub fn is_http_url(&self) -> bool {
        let archive = self.archive();
        archive.starts_with("http://") || archive.starts_with("https://")
    }
}

/// Collect `-H` values into a header map.
pub fn header_map(headers: &[(HeaderName, HeaderValue)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.append(name.clone(), value.clone());
    }
    map
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: value', got {raw:?}"))?;
    let name = HeaderName::try_from(name.trim()).map_err(|e| e.to_string())?;
    let value = HeaderValue::try_from(value.trim()).map_err(|e| e.to_string())?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_arguments() {
        let cli = Cli::parse_from([
            "zipfs",
            "serve",
            "https://example.com/site.zip",
            "--listen",
            "0.0.0.0:9000",
            "--base-path",
            "/static",
            "-H",
            "Cache-Control: max-age=60",
            "-H",
            "X-Frame-Options:deny",
        ]);
        assert!(cli.is_http_url());
        let Command::Serve {
            listen,
            base_path,
            headers,
            ..
        } = cli.command
        else {
            panic!("expected serve");
        };
        assert_eq!(listen.port(), 9000);
        assert_eq!(base_path, "/static");
        let map = header_map(&headers);
        assert_eq!(map["cache-control"], "max-age=60");
        assert_eq!(map["x-frame-options"], "deny");
    }

    #[test]
    fn ls_defaults_to_root() {
        let cli = Cli::parse_from(["zipfs", "ls", "site.zip"]);
        assert!(!cli.is_http_url());
        assert_eq!(cli.archive(), "site.zip");
        assert!(matches!(
            cli.command,
            Command::Ls { ref path, verbose: false, .. } if path == "/"
        ));
    }

    #[test]
    fn rejects_malformed_headers() {
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header("bad name: x").is_err());
        assert!(
            Cli::try_parse_from(["zipfs", "serve", "a.zip", "-H", "nope"]).is_err()
        );
    }
}
