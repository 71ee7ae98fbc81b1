//! File abstraction used by pipeline workers

use std::fs::File;
use std::io::{self, Read, Seek, Write};

/// The three operations a pipeline needs from a file.
///
/// Anything that can be moved onto a worker thread qualifies; tests use
/// in-memory and failing implementations.
pub trait TransferFile: Send {
    /// Read into `buf`, returning the byte count (0 at end of file)
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `buf`
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Cut the file at the current position
    fn truncate(&mut self) -> io::Result<()>;
}

impl TransferFile for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(self, buf)
    }

    fn truncate(&mut self) -> io::Result<()> {
        let position = self.stream_position()?;
        self.set_len(position)
    }
}

impl TransferFile for io::Cursor<Vec<u8>> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(self, buf)
    }

    fn truncate(&mut self) -> io::Result<()> {
        let position = self.position() as usize;
        self.get_mut().truncate(position);
        Ok(())
    }
}

/// Open `path` for writing and reserve `size` bytes up front.
///
/// The pipeline truncates to the written length when it finishes, so an
/// overestimate costs nothing.
pub fn create_preallocated(path: &std::path::Path, size: u64) -> io::Result<File> {
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_len(size)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_truncates_at_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut file = create_preallocated(&path, 4096).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);

        TransferFile::write_all(&mut file, b"hello").unwrap();
        TransferFile::truncate(&mut file).unwrap();
        drop(file);

        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_cursor_truncate() {
        let mut cursor = io::Cursor::new(vec![0u8; 10]);
        TransferFile::write_all(&mut cursor, b"abc").unwrap();
        TransferFile::truncate(&mut cursor).unwrap();
        assert_eq!(cursor.into_inner(), b"abc");
    }
}
