use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::page::{PageId, PAGE_SIZE};

/// Flat-file page store. Pages are fixed-size slots at `page_id * PAGE_SIZE`
/// byte offsets, matching the "directory and all bucket pages are the
/// complete on-disk representation" persistence model (no auxiliary
/// metadata is written).
#[derive(Debug)]
pub struct DiskManager {
    file: Mutex<File>,
    path: PathBuf,
}

impl DiskManager {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .with_context(|| format!("opening db file {}", path.display()))?;

        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Reads `PAGE_SIZE` bytes for `page_id` into `page_content`. Pages
    /// never written to yet read back as zeros.
    pub fn read_page(&self, page_id: PageId, page_content: &mut [u8]) -> Result<()> {
        debug_assert_eq!(page_content.len(), PAGE_SIZE);

        let mut file = self.file.lock().unwrap();
        let offset = (page_id * PAGE_SIZE) as u64;
        let len = file
            .metadata()
            .with_context(|| format!("stat'ing db file {}", self.path.display()))?
            .len();

        if offset >= len {
            page_content.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))
            .with_context(|| format!("seeking to page {page_id}"))?;

        let to_read = ((len - offset) as usize).min(PAGE_SIZE);
        page_content.fill(0);
        file.read_exact(&mut page_content[..to_read])
            .with_context(|| format!("reading page {page_id}"))?;

        Ok(())
    }

    pub fn write_page(&self, page_id: PageId, page_content: &[u8]) -> Result<()> {
        debug_assert_eq!(page_content.len(), PAGE_SIZE);

        let mut file = self.file.lock().unwrap();
        let offset = (page_id * PAGE_SIZE) as u64;
        file.seek(SeekFrom::Start(offset))
            .with_context(|| format!("seeking to page {page_id}"))?;
        file.write_all(page_content)
            .with_context(|| format!("writing page {page_id}"))?;
        file.flush()
            .with_context(|| format!("flushing page {page_id}"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trips_a_page() {
        let file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(file.path()).unwrap();

        let mut written = vec![0u8; PAGE_SIZE];
        written[0] = 7;
        written[PAGE_SIZE - 1] = 9;
        dm.write_page(3, &written).unwrap();

        let mut read_back = vec![0u8; PAGE_SIZE];
        dm.read_page(3, &mut read_back).unwrap();

        assert_eq!(written, read_back);
    }

    #[test]
    fn unwritten_page_reads_as_zeros() {
        let file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(file.path()).unwrap();

        let mut buf = vec![0xffu8; PAGE_SIZE];
        dm.read_page(0, &mut buf).unwrap();

        assert!(buf.iter().all(|&b| b == 0));
    }
}
