use std::path::{Path, PathBuf};
use std::{error, fmt, io};

/// Exit code for bad invocation or configuration
pub const EXIT_USAGE: i32 = 1;
/// Exit code when the job had to be killed
pub const EXIT_TIMEOUT: i32 = 2;
/// Exit code for any failed system call
pub const EXIT_OSERROR: i32 = 3;

#[derive(Debug)]
pub enum Error {
    File {
        op: String,
        name: PathBuf,
        io: io::Error,
    },
    OS {
        op: String,
        io: io::Error,
    },
    Usage(String),
    Collaborator {
        cmd: String,
        code: Option<i32>,
    },
    Thread(String),
    BadStr,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Annotate I/O error
    pub fn file<S: AsRef<str>, P: AsRef<Path>>(desc: S, path: P, err: io::Error) -> Self {
        Error::File {
            op: desc.as_ref().to_string(),
            name: path.as_ref().to_path_buf(),
            io: err,
        }
    }

    /// Annotate Error::last_os_error()
    pub fn last_file_error<S: AsRef<str>, P: AsRef<Path>>(desc: S, path: P) -> Self {
        Self::file(desc, path, io::Error::last_os_error())
    }

    pub fn os<S: AsRef<str>>(desc: S, err: io::Error) -> Self {
        Self::OS {
            op: desc.as_ref().to_string(),
            io: err,
        }
    }

    /// Annotate Error::last_os_error()
    pub fn last_os_error<S: AsRef<str>>(desc: S) -> Self {
        Self::os(desc, io::Error::last_os_error())
    }

    pub fn usage<S: AsRef<str>>(msg: S) -> Self {
        Self::Usage(msg.as_ref().to_string())
    }

    /// Process exit code to report this error with
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => EXIT_USAGE,
            _ => EXIT_OSERROR,
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::File { io, .. } => Some(io),
            Self::OS { io, .. } => Some(io),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { op, name, io } => {
                write!(f, "File {} with {} : {}", op, name.display(), io)
            }
            Self::OS { op, io } => write!(f, "OS {} : {}", op, io),
            Self::Usage(msg) => write!(f, "{}", msg),
            Self::Collaborator { cmd, code: Some(code) } => {
                write!(f, "{} exited with status {}", cmd, code)
            }
            Self::Collaborator { cmd, code: None } => write!(f, "{} killed by signal", cmd),
            Self::Thread(msg) => write!(f, "Sampler thread {}", msg),
            Self::BadStr => write!(f, "String can not contain nil"),
        }
    }
}

impl From<std::ffi::NulError> for Error {
    fn from(_inp: std::ffi::NulError) -> Self {
        Error::BadStr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(Error::usage("bad").exit_code(), EXIT_USAGE);
        assert_eq!(
            Error::os("fork", io::Error::from_raw_os_error(libc::EAGAIN)).exit_code(),
            EXIT_OSERROR
        );
        let err = Error::Collaborator {
            cmd: "/bin/mv".to_string(),
            code: Some(1),
        };
        assert_eq!(err.exit_code(), EXIT_OSERROR);
        assert_eq!(err.to_string(), "/bin/mv exited with status 1");
    }

    #[test]
    fn source_is_io() {
        use std::error::Error as _;
        let err = Error::file("open", "/nope", io::Error::from_raw_os_error(libc::ENOENT));
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("File open with /nope : "));
        assert!(Error::usage("x").source().is_none());
    }
}
