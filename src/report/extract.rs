/*
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use log::{debug, error};

enum ContainerKind {
    Xml,
    Gzip,
    Zip,
}

fn container_kind(path: &Path) -> Option<ContainerKind> {
    let ext = path.extension()?.to_str()?;
    if ext.eq_ignore_ascii_case("xml") {
        Some(ContainerKind::Xml)
    } else if ext.eq_ignore_ascii_case("gz") {
        Some(ContainerKind::Gzip)
    } else if ext.eq_ignore_ascii_case("zip") {
        Some(ContainerKind::Zip)
    } else {
        None
    }
}

/// Yields the raw report documents contained in a file. Unrecognized
/// file kinds yield nothing; unreadable or corrupt containers are
/// logged and skipped, never fatal to the run.
pub fn extract(path: &Path) -> Vec<Vec<u8>> {
    let result = match container_kind(path) {
        Some(ContainerKind::Xml) => read_document(path),
        Some(ContainerKind::Gzip) => extract_gz(path),
        Some(ContainerKind::Zip) => extract_zip(path),
        None => {
            debug!("Ignoring {}", path.display());
            return Vec::new();
        }
    };

    match result {
        Ok(buffers) => buffers,
        Err(err) => {
            error!("Error extracting {}: {}", path.display(), err);
            Vec::new()
        }
    }
}

fn read_document(path: &Path) -> Result<Vec<Vec<u8>>, String> {
    fs::read(path)
        .map(|buf| vec![buf])
        .map_err(|err| err.to_string())
}

fn extract_gz(path: &Path) -> Result<Vec<Vec<u8>>, String> {
    let mut file = GzDecoder::new(File::open(path).map_err(|err| err.to_string())?);
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(|err| err.to_string())?;
    Ok(vec![buf])
}

fn extract_zip(path: &Path) -> Result<Vec<Vec<u8>>, String> {
    let mut archive = zip::ZipArchive::new(File::open(path).map_err(|err| err.to_string())?)
        .map_err(|err| err.to_string())?;
    let mut buffers = Vec::new();
    // Entries are returned in the archive's internal listing order.
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|err| err.to_string())?;
        if entry.name().to_ascii_lowercase().ends_with(".xml") {
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf).map_err(|err| err.to_string())?;
            buffers.push(buf);
        }
    }
    Ok(buffers)
}

#[cfg(test)]
mod test {
    use std::fs::{self, File};
    use std::io::Write;
    use std::path::PathBuf;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use zip::write::FileOptions;

    const REPORT: &[u8] = b"<feedback><record></record></feedback>";

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dmarc-audit-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn plain_document_is_read_verbatim() {
        let path = test_dir("xml").join("report.xml");
        fs::write(&path, REPORT).unwrap();
        assert_eq!(super::extract(&path), vec![REPORT.to_vec()]);
    }

    #[test]
    fn gzip_stream_is_decompressed() {
        let path = test_dir("gz").join("report.xml.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(REPORT).unwrap();
        fs::write(&path, encoder.finish().unwrap()).unwrap();
        assert_eq!(super::extract(&path), vec![REPORT.to_vec()]);
    }

    #[test]
    fn zip_yields_xml_entries_in_listing_order() {
        let path = test_dir("zip").join("reports.zip");
        let mut archive = zip::ZipWriter::new(File::create(&path).unwrap());
        archive.start_file("a.xml", FileOptions::default()).unwrap();
        archive.write_all(b"first").unwrap();
        archive.start_file("readme.txt", FileOptions::default()).unwrap();
        archive.write_all(b"not a report").unwrap();
        archive.start_file("b.xml", FileOptions::default()).unwrap();
        archive.write_all(b"second").unwrap();
        archive.finish().unwrap();

        assert_eq!(
            super::extract(&path),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
    }

    #[test]
    fn corrupt_gzip_is_skipped() {
        let path = test_dir("gz-corrupt").join("report.xml.gz");
        fs::write(&path, b"definitely not gzip").unwrap();
        assert!(super::extract(&path).is_empty());
    }

    #[test]
    fn corrupt_zip_is_skipped() {
        let path = test_dir("zip-corrupt").join("reports.zip");
        fs::write(&path, b"definitely not a zip archive").unwrap();
        assert!(super::extract(&path).is_empty());
    }

    #[test]
    fn unrecognized_kinds_are_ignored() {
        let dir = test_dir("other");
        let path = dir.join("notes.txt");
        fs::write(&path, b"hello").unwrap();
        assert!(super::extract(&path).is_empty());

        let path = dir.join("no-extension");
        fs::write(&path, b"hello").unwrap();
        assert!(super::extract(&path).is_empty());
    }
}
