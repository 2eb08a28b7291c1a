#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

pub const INDEX_HTML: &str = "<html><body><h1>zipfs</h1></body></html>\n";
pub const TEST_HTML: &str = "<html><body>test page</body></html>\n";
pub const APP_JS: &str = "console.log('hello from the archive');\n";

/// A fixture archive inside its own temp directory.
pub struct Fixture {
    pub dir: TempDir,
    pub path: PathBuf,
}

/// 10000 bytes with enough repetition to deflate well.
pub fn random_data() -> Vec<u8> {
    let mut state = 0x2545_f491u32;
    (0..10_000)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            b"abcdefghijklmnop"[(state >> 28) as usize]
        })
        .collect()
}

pub fn png(seed: u8) -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend((0..600u32).map(|i| (i as u8).wrapping_mul(seed)));
    data
}

pub fn lots_of_files() -> Vec<String> {
    (1..=20).map(|i| format!("file-{i:02}.txt")).collect()
}

/// Build the site archive used by the filesystem and server tests.
///
/// `img/` and `empty/` have explicit records; `js/` and `lots-of-files/`
/// only exist through the entries below them.
pub fn site() -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("site.zip");
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = ZipWriter::new(file);

    let time = DateTime::from_date_and_time(2020, 5, 17, 10, 30, 0).unwrap();
    let deflated = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(time);
    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(time);

    zip.start_file("index.html", deflated).unwrap();
    zip.write_all(INDEX_HTML.as_bytes()).unwrap();
    zip.start_file("test.html", deflated).unwrap();
    zip.write_all(TEST_HTML.as_bytes()).unwrap();

    zip.add_directory("img/", stored).unwrap();
    zip.start_file("img/circle.png", stored).unwrap();
    zip.write_all(&png(3)).unwrap();
    zip.start_file("img/another-circle.png", stored).unwrap();
    zip.write_all(&png(7)).unwrap();

    zip.start_file("random.dat", deflated).unwrap();
    zip.write_all(&random_data()).unwrap();

    zip.add_directory("empty/", stored).unwrap();

    zip.start_file("js/app.js", deflated).unwrap();
    zip.write_all(APP_JS.as_bytes()).unwrap();

    for name in lots_of_files() {
        zip.start_file(format!("lots-of-files/{name}"), stored)
            .unwrap();
        zip.write_all(name.as_bytes()).unwrap();
    }

    zip.finish().unwrap();
    Fixture { dir, path }
}

/// An archive holding `weird.bin` whose central directory record claims
/// compression method 12 (bzip2).
pub fn unsupported_method() -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("weird.zip");
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = ZipWriter::new(file);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    zip.start_file("weird.bin", stored).unwrap();
    zip.write_all(b"not really bzip2").unwrap();
    zip.start_file("fine.txt", stored).unwrap();
    zip.write_all(b"fine").unwrap();
    zip.finish().unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    patch_central_method(&mut bytes, "weird.bin", 12);
    std::fs::write(&path, bytes).unwrap();
    Fixture { dir, path }
}

/// Overwrite the compression method of `name`'s central directory record.
pub fn patch_central_method(bytes: &mut [u8], name: &str, method: u16) {
    const SIGNATURE: &[u8] = b"PK\x01\x02";
    let start = (0..bytes.len() - 46)
        .find(|&pos| {
            if &bytes[pos..pos + 4] != SIGNATURE {
                return false;
            }
            let name_len = u16::from_le_bytes([bytes[pos + 28], bytes[pos + 29]]) as usize;
            bytes.get(pos + 46..pos + 46 + name_len) == Some(name.as_bytes())
        })
        .expect("central directory record not found");
    bytes[start + 10..start + 12].copy_from_slice(&method.to_le_bytes());
}

/// A text file that is not an archive.
pub fn not_a_zip() -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("not-a-zip-file.txt");
    std::fs::write(&path, "this is not a zip file\n".repeat(10)).unwrap();
    Fixture { dir, path }
}

/// Number of extracted-entry temp files directly under `dir`.
pub fn temp_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(zipfs::zip::TEMP_PREFIX)
        })
        .count()
}
