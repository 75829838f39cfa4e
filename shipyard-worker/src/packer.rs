//! Artifact packaging for remote builds
//!
//! The output directory is zipped (paths relative to the directory, `/`
//! separated) and base64-encoded for the callback body.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

/// Zip every file under `dir` into memory
pub fn zip_directory(dir: &Path) -> anyhow::Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    add_dir(&mut writer, dir, dir, options)?;

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

fn add_dir(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    root: &Path,
    dir: &Path,
    options: FileOptions,
) -> anyhow::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = path
            .strip_prefix(root)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type()?.is_dir() {
            writer.add_directory(format!("{}/", name), options)?;
            add_dir(writer, root, &path, options)?;
        } else {
            writer.start_file(name, options)?;
            let mut buf = Vec::new();
            File::open(&path)?.read_to_end(&mut buf)?;
            writer.write_all(&buf)?;
        }
    }
    Ok(())
}

/// Zip `dir` and base64-encode the archive
pub async fn encode_directory(dir: &Path) -> anyhow::Result<String> {
    let dir = dir.to_path_buf();
    let bytes = tokio::task::spawn_blocking(move || zip_directory(&dir)).await??;
    Ok(STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::ZipArchive;

    #[test]
    fn test_zip_keeps_relative_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data/levels")).unwrap();
        std::fs::write(dir.path().join("game.bin"), b"exe").unwrap();
        std::fs::write(dir.path().join("data/levels/one.pck"), b"level").unwrap();

        let bytes = zip_directory(dir.path()).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

        let mut content = String::new();
        archive
            .by_name("data/levels/one.pck")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "level");
        assert!(archive.by_name("game.bin").is_ok());
    }

    #[tokio::test]
    async fn test_encoded_archive_decodes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("game.bin"), b"exe").unwrap();

        let encoded = encode_directory(dir.path()).await.unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        assert!(ZipArchive::new(Cursor::new(bytes)).unwrap().len() == 1);
    }

    #[test]
    fn test_missing_directory_fails() {
        assert!(zip_directory(Path::new("/nonexistent/shipyard/out")).is_err());
    }
}
