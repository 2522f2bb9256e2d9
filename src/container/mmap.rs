// Tue Jan 13 2026 - Alex

use memmap2::Mmap;
use std::fs::File;
use std::ops::Deref;
use std::path::Path;

/// Backing storage for a container: heap bytes or a read-only file mapping.
pub enum ContainerData {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl ContainerData {
    pub fn open<P: AsRef<Path>>(path: P, use_mmap: bool) -> std::io::Result<Self> {
        let file = File::open(path.as_ref())?;
        if use_mmap && file.metadata()?.len() > 0 {
            // The mapping is read-only and the file is not modified while analysed.
            let mmap = unsafe { Mmap::map(&file)? };
            return Ok(Self::Mapped(mmap));
        }
        Ok(Self::Owned(std::fs::read(path)?))
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Owned(bytes) => bytes,
            Self::Mapped(mmap) => mmap.as_ref(),
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, Self::Mapped(_))
    }
}

impl Deref for ContainerData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for ContainerData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Owned(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_mapped_and_owned() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\xcf\xfa\xed\xfe").unwrap();
        file.flush().unwrap();

        let mapped = ContainerData::open(file.path(), true).unwrap();
        assert!(mapped.is_mapped());
        assert_eq!(&mapped[..], b"\xcf\xfa\xed\xfe");

        let owned = ContainerData::open(file.path(), false).unwrap();
        assert!(!owned.is_mapped());
        assert_eq!(owned.len(), 4);
    }
}
