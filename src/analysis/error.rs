// Tue Jan 13 2026 - Alex

use crate::container::ContainerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),
    #[error("Analysis cancelled")]
    Cancelled,
    #[error("No function contains 0x{0:x}")]
    FunctionNotFound(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
