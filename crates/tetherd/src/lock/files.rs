use std::io::{self, Write};
use std::path::Path;

use tempfile::Builder;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Replaces `path` with `contents` so readers see either the old or the new
/// payload, never a torn write.
///
/// The temporary file is created beside the target, fsync'd, then renamed
/// over it.
pub(super) fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "lock path has no parent directory",
        )
    })?;

    let mut builder = Builder::new();
    let prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .map_or_else(|| String::from(".tetherd"), |name| format!(".{name}"));
    builder.prefix(&prefix).suffix(".tmp");
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        builder.permissions(Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn replaces_existing_contents_without_leftovers() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tetherd.lock");
        atomic_write(&path, b"first").expect("first write");
        atomic_write(&path, b"second").expect("second write");
        assert_eq!(fs::read(&path).expect("read back"), b"second");
        let entries = fs::read_dir(dir.path()).expect("list dir").count();
        assert_eq!(entries, 1, "temporary files must not linger");
    }

    #[cfg(unix)]
    #[test]
    fn written_files_are_owner_only() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tetherd.lock");
        atomic_write(&path, b"{}").expect("write");
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
