use thiserror::Error;

// Standard errno constants compatible with MUSL
pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const EEXIST: i32 = 17;
pub const ENOTDIR: i32 = 20;
pub const EISDIR: i32 = 21;
pub const EINVAL: i32 = 22;
pub const ENAMETOOLONG: i32 = 36;
pub const ENOSYS: i32 = 38;

/// Failure taxonomy shared by the dispatcher and the inode-tree collaborator.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("operation not permitted: {0}")]
    NotPermitted(&'static str),
    #[error("not supported: {0}")]
    NotSupported(&'static str),
    #[error("already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("not a regular file")]
    NotAFile,
    #[error("overlay data is corrupt for inode {0}")]
    CorruptOverlay(u64),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("name too long: {0} bytes")]
    NameTooLong(usize),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// Errno reported to the protocol layer for this failure.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => ENOENT,
            FsError::NotPermitted(_) => EPERM,
            FsError::NotSupported(_) => ENOSYS,
            FsError::AlreadyExists => EEXIST,
            FsError::NotADirectory => ENOTDIR,
            FsError::NotAFile => EISDIR,
            FsError::CorruptOverlay(_) => EIO,
            FsError::InvalidArgument(_) => EINVAL,
            FsError::NameTooLong(_) => ENAMETOOLONG,
            FsError::Io(e) => e.raw_os_error().unwrap_or(EIO),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound)
    }
}
