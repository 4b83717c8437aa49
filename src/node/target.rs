//! Preparation and cleanup of mount targets on the host filesystem.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

use super::MountError;

fn io_error(path: &Utf8Path, err: &io::Error) -> MountError {
    MountError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), MountError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("/"));
    let file_name = path.file_name().ok_or_else(|| MountError::Io {
        path: path.to_path_buf(),
        message: String::from("target path is missing a final component"),
    })?;
    Ok((parent, file_name))
}

/// Creates `path` and any missing parents as directories.
pub(crate) fn ensure_directory(path: &Utf8Path) -> Result<(), MountError> {
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(|err| io_error(path, &err))
}

/// Creates an empty file at `path` unless something already exists there.
pub(crate) fn ensure_file(path: &Utf8Path) -> Result<(), MountError> {
    let (parent, file_name) = split(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())
        .map_err(|err| io_error(parent, &err))?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| io_error(parent, &err))?;
    if dir.try_exists(file_name).map_err(|err| io_error(path, &err))? {
        return Ok(());
    }
    dir.create(file_name)
        .map(drop)
        .map_err(|err| io_error(path, &err))
}

/// Removes the directory or file at `path`; a missing path is not an error.
pub(crate) fn remove_target(path: &Utf8Path) -> Result<(), MountError> {
    let (parent, file_name) = split(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(io_error(parent, &err)),
    };
    let metadata = match dir.symlink_metadata(file_name) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(io_error(path, &err)),
    };
    let removed = if metadata.is_dir() {
        dir.remove_dir(file_name)
    } else {
        dir.remove_file(file_name)
    };
    match removed {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_error(path, &err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn root(tmp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 temp path: {}", path.display()))
    }

    #[test]
    fn directory_and_file_targets_are_created_and_removed() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let base = root(&tmp);
        let staging = base.join("plugins/staging/vol-1");
        let block = base.join("pods/uid/volumeDevices/vol-1");

        ensure_directory(&staging).expect("staging dir");
        ensure_file(&block).expect("block file");
        ensure_file(&block).expect("second call is a no-op");
        assert!(staging.is_dir());
        assert!(block.is_file());

        remove_target(&staging).expect("remove dir");
        remove_target(&block).expect("remove file");
        assert!(!staging.exists());
        assert!(!block.exists());
    }

    #[test]
    fn removing_missing_target_succeeds() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let base = root(&tmp);
        remove_target(&base.join("missing/child")).expect("missing parent");
        remove_target(&base.join("missing")).expect("missing leaf");
    }
}
