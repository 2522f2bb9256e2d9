// Tue Jan 13 2026 - Alex

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed container: {0}")]
    MalformedContainer(String),
    #[error("Address 0x{0:x} is not mapped by any segment")]
    AddressNotMapped(u64),
    #[error("Unsupported architecture: cputype 0x{0:x}")]
    UnsupportedArchitecture(u32),
    #[error("Out of bounds: {len} bytes at offset 0x{offset:x}")]
    OutOfBounds { offset: u64, len: usize },
}

impl ContainerError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedContainer(msg.into())
    }
}

pub type ContainerResult<T> = Result<T, ContainerError>;
