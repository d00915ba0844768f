use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// A path component or the target itself does not resolve.
    NotFound,
    /// Create over a name that is already taken.
    AlreadyExists,
    /// Inode or data-block bitmap exhausted.
    NoSpace,
    NotADirectory,
    IsADirectory,
    /// Malformed mount configuration, inconsistent superblocks,
    /// undersized disk image, or an out-of-range request.
    InvalidArgument,
    /// A stored pointer or inode fails validation against region bounds.
    Corrupted,
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such file or directory"),
            Self::AlreadyExists => write!(f, "file exists"),
            Self::NoSpace => write!(f, "no space left on device"),
            Self::NotADirectory => write!(f, "not a directory"),
            Self::IsADirectory => write!(f, "is a directory"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Corrupted => write!(f, "corrupted filesystem image"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
