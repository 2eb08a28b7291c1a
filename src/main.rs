//! Main entry point for the zipfs CLI application.
//!
//! Serves, lists or prints the contents of a ZIP archive that lives either on
//! the local filesystem or behind an HTTP URL.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use zipfs::cli::{Command, header_map};
use zipfs::{
    Cli, FileInfo, FileServer, FileSystem, HttpRangeReader, LocalFileReader, ReadAt, ServerConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.is_http_url() {
        // Remote archive via HTTP Range requests
        let reader = Arc::new(HttpRangeReader::new(cli.archive().to_string()).await?);
        run(Arc::clone(&reader), cli.command).await?;
        log::info!(
            "total bytes transferred: {}",
            format_size(reader.transferred_bytes())
        );
    } else {
        let reader = Arc::new(LocalFileReader::new(Path::new(cli.archive()))?);
        run(reader, cli.command).await?;
    }

    Ok(())
}

async fn run<R: ReadAt + 'static>(reader: Arc<R>, command: Command) -> Result<()> {
    let fs = FileSystem::new(reader)
        .await
        .context("reading archive directory")?;

    let result = match command {
        Command::Serve {
            listen,
            base_path,
            headers,
            ..
        } => {
            let config = ServerConfig {
                headers: header_map(&headers),
            };
            serve(&fs, listen, &base_path, config).await
        }
        Command::Ls { path, verbose, .. } => list(&fs, &path, verbose),
        Command::Cat { path, offset, .. } => cat(&fs, &path, offset).await,
    };

    fs.close()?;
    result
}

async fn serve<R: ReadAt + 'static>(
    fs: &FileSystem<R>,
    listen: std::net::SocketAddr,
    base_path: &str,
    config: ServerConfig,
) -> Result<()> {
    let app = FileServer::new(fs).with_config(config).router(base_path);
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    log::info!("serving {} files on http://{listen}{base_path}", fs.entries().len());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::warn!("waiting for ctrl-c: {err}");
            }
            log::info!("shutting down");
        })
        .await?;
    Ok(())
}

/// Print the children of a directory, or a single file's info.
fn list<R: ReadAt>(fs: &FileSystem<R>, path: &str, verbose: bool) -> Result<()> {
    let mut dir = fs.open(path)?;
    let infos = if dir.stat().is_dir() {
        dir.read_dir(0)?.entries
    } else {
        vec![dir.stat()]
    };
    dir.close()?;

    if verbose {
        println!(
            "{:<10}  {:>10}  {:>10}  {:>5}  {:>16}  Name",
            "Mode", "Length", "Size", "Cmpr", "Modified"
        );
        println!("{}", "-".repeat(72));
    }

    let mut total = 0u64;
    for info in &infos {
        let name = if info.is_dir() {
            format!("{}/", info.name())
        } else {
            info.name().to_string()
        };
        if verbose {
            println!("{}  {name}", describe(info));
        } else {
            println!("{name}");
        }
        total += info.len();
    }

    if verbose {
        println!("{}", "-".repeat(72));
        println!("{} in {} entries", format_size(total), infos.len());
    }
    Ok(())
}

fn describe(info: &FileInfo) -> String {
    let compressed = info.entry().map_or(0, |e| e.compressed_size);
    // Percentage saved by compression
    let ratio = if info.len() > 0 {
        100i64 - (compressed.saturating_mul(100) / info.len()) as i64
    } else {
        0
    };
    let modified: DateTime<Utc> = info.modified().into();
    format!(
        "{:<10}  {:>10}  {:>10}  {:>4}%  {}",
        info.mode().to_string(),
        info.len(),
        compressed,
        ratio,
        modified.format("%Y-%m-%d %H:%M")
    )
}

async fn cat<R: ReadAt>(fs: &FileSystem<R>, path: &str, offset: u64) -> Result<()> {
    let mut file = fs.open(path)?;
    if file.stat().is_dir() {
        bail!("{path}: is a directory");
    }
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }

    let mut stdout = tokio::io::stdout();
    let mut buf = zipfs::bufpool::get();
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buf[..n]).await?;
    }
    stdout.flush().await?;
    file.close()?;
    Ok(())
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
