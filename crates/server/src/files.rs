use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use snapnet::session::validate_path;
use snapnet::{BlockReader, DownloadError, FileSource};

/// Serves downloads from a directory on disk.
pub struct DirectoryFiles {
    root: Option<PathBuf>,
}

impl DirectoryFiles {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

struct FileReader {
    file: File,
    size: u64,
}

impl BlockReader for FileReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, DownloadError> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

impl FileSource for DirectoryFiles {
    fn open(&self, path: &str) -> Result<Box<dyn BlockReader>, DownloadError> {
        validate_path(path)?;
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| DownloadError::NotFound(path.to_string()))?;

        let full = root.join(path);
        let file = match File::open(&full) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DownloadError::NotFound(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(DownloadError::NotFound(path.to_string()));
        }

        log::debug!("serving {} ({} bytes)", full.display(), meta.len());
        Ok(Box::new(FileReader {
            file,
            size: meta.len(),
        }))
    }
}
