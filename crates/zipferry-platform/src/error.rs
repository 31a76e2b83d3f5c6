use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot determine current process id: {0}")]
    NoPid(String),

    #[error("process {pid} not visible to the memory probe")]
    ProcessNotFound { pid: u32 },

    #[error("memory probe reported no total memory")]
    NoTotalMemory,
}
