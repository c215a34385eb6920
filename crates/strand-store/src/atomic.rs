//! Write-to-temp then rename, so readers never see a partial file.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::StoreError;

pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|source| StoreError::io(dir, source))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|source| StoreError::io(dir, source))?;
    tmp.write_all(contents)
        .map_err(|source| StoreError::io(tmp.path(), source))?;
    tmp.as_file()
        .sync_all()
        .map_err(|source| StoreError::io(tmp.path(), source))?;
    tmp.persist(path)
        .map_err(|err| StoreError::io(path, err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_file_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("doc.json");

        write_atomic(&path, b"first").expect("write");
        write_atomic(&path, b"second").expect("overwrite");

        assert_eq!(fs::read_to_string(&path).expect("read"), "second");
        let entries = fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .count();
        assert_eq!(entries, 1);
    }
}
