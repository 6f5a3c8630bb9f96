//! Module contains a library error and a mapping of OS error codes onto it.

use std::{cell::Cell, fmt, io, time::Duration};

use thiserror::Error;

thread_local! {
    static LAST_OS_ERROR: Cell<i32> = const { Cell::new(0) };
}

/// A platform independent classification of an error.
///
/// It's what callers are supposed to match on,
/// the raw OS code is available only for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A transport or resource error (broken pipe, exhausted descriptors, missing program, ...).
    Io,
    /// A deadline passed before the awaited event happened.
    WaitTimeout,
    /// A caller passed an argument which can't be used in the current state.
    InvalidArgument,
    /// The process was not started or has already exited.
    ProcessNotRunning,
    /// The other side of a pipe was closed and no buffered data is left.
    EndOfStream,
    /// An OS error which has no portable counterpart.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Io => "io error",
            Self::WaitTimeout => "wait timeout",
            Self::InvalidArgument => "invalid argument",
            Self::ProcessNotRunning => "process not running",
            Self::EndOfStream => "end of stream",
            Self::Unknown => "unknown error",
        };

        f.write_str(name)
    }
}

/// Error is a crate's error type.
#[derive(Debug, Error)]
pub enum Error {
    /// An OS call failed.
    #[error("{kind}: {source}")]
    Os {
        /// A portable classification of the OS error code.
        kind: ErrorKind,
        /// The original error.
        #[source]
        source: io::Error,
    },
    /// A error which is returned in case timeout was reached.
    #[error("a timeout {0:?} was reached")]
    Timeout(Duration),
    /// A call which is not allowed with given arguments or in the current process state.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The process was not started yet or it has already exited.
    #[error("process is not running")]
    NotRunning,
    /// A pipe reached its end.
    #[error("end of stream")]
    EndOfStream,
}

impl Error {
    /// Returns a portable kind of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Os { kind, .. } => *kind,
            Self::Timeout(_) => ErrorKind::WaitTimeout,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotRunning => ErrorKind::ProcessNotRunning,
            Self::EndOfStream => ErrorKind::EndOfStream,
        }
    }

    /// Returns a raw OS error code if the error was caused by an OS call.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Os { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Builds an error from the calling thread's last OS error.
    #[cfg_attr(unix, allow(dead_code))]
    pub(crate) fn last_os() -> Self {
        Self::from(io::Error::last_os_error())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.raw_os_error() {
            Some(code) => {
                LAST_OS_ERROR.with(|last| last.set(code));
                map_os_error(code)
            }
            None => match err.kind() {
                io::ErrorKind::InvalidInput => ErrorKind::InvalidArgument,
                io::ErrorKind::TimedOut => ErrorKind::WaitTimeout,
                _ => ErrorKind::Io,
            },
        };

        Error::Os { kind, source: err }
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        Error::from(io::Error::from_raw_os_error(errno as i32))
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for Error {
    fn from(err: windows::core::Error) -> Self {
        Error::from(crate::sys::win_error_to_io(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Os { source, .. } => source,
            Error::Timeout(limit) => io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timeout reached ({:?})", limit),
            ),
            Error::InvalidArgument(message) => io::Error::new(io::ErrorKind::InvalidInput, message),
            Error::NotRunning => io::Error::new(io::ErrorKind::Other, "process is not running"),
            Error::EndOfStream => io::Error::from(io::ErrorKind::UnexpectedEof),
        }
    }
}

/// Returns the last raw OS error code observed by this library on the calling thread.
///
/// It's 0 if no OS call has failed on the thread yet.
/// The value is informational, match on [`Error::kind`] instead.
pub fn last_os_error() -> i32 {
    LAST_OS_ERROR.with(Cell::get)
}

/// Maps a platform error code onto a portable [`ErrorKind`].
///
/// Codes without a mapping are reported as [`ErrorKind::Unknown`].
pub fn map_os_error(code: i32) -> ErrorKind {
    classify(code)
}

#[cfg(unix)]
fn classify(code: i32) -> ErrorKind {
    use nix::errno::Errno;

    match Errno::from_raw(code) {
        Errno::EINVAL
        | Errno::EBADF
        | Errno::ENAMETOOLONG
        | Errno::E2BIG
        | Errno::ENOTDIR
        | Errno::EFAULT => ErrorKind::InvalidArgument,
        Errno::ESRCH | Errno::ECHILD => ErrorKind::ProcessNotRunning,
        Errno::ETIMEDOUT => ErrorKind::WaitTimeout,
        Errno::EPIPE
        | Errno::EIO
        | Errno::EMFILE
        | Errno::ENFILE
        | Errno::ENOMEM
        | Errno::EAGAIN
        | Errno::EINTR
        | Errno::ENOENT
        | Errno::EACCES
        | Errno::EPERM
        | Errno::ENOEXEC
        | Errno::ENOSPC => ErrorKind::Io,
        _ => ErrorKind::Unknown,
    }
}

#[cfg(windows)]
fn classify(code: i32) -> ErrorKind {
    use windows::Win32::Foundation::{
        ERROR_ACCESS_DENIED, ERROR_BAD_ENVIRONMENT, ERROR_BAD_EXE_FORMAT, ERROR_BAD_PATHNAME,
        ERROR_BROKEN_PIPE, ERROR_DIRECTORY, ERROR_FILE_NOT_FOUND, ERROR_INVALID_HANDLE,
        ERROR_INVALID_NAME, ERROR_INVALID_PARAMETER, ERROR_NOT_ENOUGH_MEMORY, ERROR_NO_DATA,
        ERROR_OUTOFMEMORY, ERROR_PATH_NOT_FOUND, ERROR_PIPE_NOT_CONNECTED, ERROR_SEM_TIMEOUT,
        ERROR_TIMEOUT, ERROR_TOO_MANY_OPEN_FILES, WAIT_TIMEOUT, WIN32_ERROR,
    };

    // WaitForSingleObject reports a timeout as a wait event which shares the code space.
    const ERROR_WAIT_TIMEOUT: WIN32_ERROR = WIN32_ERROR(WAIT_TIMEOUT.0);

    match WIN32_ERROR(code as u32) {
        ERROR_INVALID_PARAMETER
        | ERROR_INVALID_HANDLE
        | ERROR_BAD_PATHNAME
        | ERROR_INVALID_NAME
        | ERROR_DIRECTORY
        | ERROR_BAD_ENVIRONMENT => ErrorKind::InvalidArgument,
        ERROR_WAIT_TIMEOUT | ERROR_TIMEOUT | ERROR_SEM_TIMEOUT => ErrorKind::WaitTimeout,
        ERROR_BROKEN_PIPE
        | ERROR_NO_DATA
        | ERROR_PIPE_NOT_CONNECTED
        | ERROR_NOT_ENOUGH_MEMORY
        | ERROR_OUTOFMEMORY
        | ERROR_TOO_MANY_OPEN_FILES
        | ERROR_FILE_NOT_FOUND
        | ERROR_PATH_NOT_FOUND
        | ERROR_ACCESS_DENIED
        | ERROR_BAD_EXE_FORMAT => ErrorKind::Io,
        _ => ErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn unix_error_table() {
        use nix::errno::Errno;

        let tests = [
            (Errno::EPIPE, ErrorKind::Io),
            (Errno::EMFILE, ErrorKind::Io),
            (Errno::ENOENT, ErrorKind::Io),
            (Errno::EACCES, ErrorKind::Io),
            (Errno::EINVAL, ErrorKind::InvalidArgument),
            (Errno::EBADF, ErrorKind::InvalidArgument),
            (Errno::ESRCH, ErrorKind::ProcessNotRunning),
            (Errno::ECHILD, ErrorKind::ProcessNotRunning),
            (Errno::ETIMEDOUT, ErrorKind::WaitTimeout),
            (Errno::EXDEV, ErrorKind::Unknown),
        ];

        for (errno, expected) in tests {
            assert_eq!(map_os_error(errno as i32), expected, "{:?}", errno);
        }
    }

    #[cfg(windows)]
    #[test]
    fn windows_error_table() {
        let tests = [
            (109, ErrorKind::Io),   // ERROR_BROKEN_PIPE
            (2, ErrorKind::Io),     // ERROR_FILE_NOT_FOUND
            (5, ErrorKind::Io),     // ERROR_ACCESS_DENIED
            (87, ErrorKind::InvalidArgument),
            (6, ErrorKind::InvalidArgument),
            (258, ErrorKind::WaitTimeout),
            (1460, ErrorKind::WaitTimeout),
            (17, ErrorKind::Unknown), // ERROR_NOT_SAME_DEVICE
        ];

        for (code, expected) in tests {
            assert_eq!(map_os_error(code), expected, "{}", code);
        }
    }

    #[test]
    fn mapping_is_total() {
        for code in [i32::MIN, -1, 0, 1, 4096, i32::MAX] {
            let _ = map_os_error(code);
        }
    }

    #[test]
    fn os_error_is_recorded_per_thread() {
        // ENOENT and ERROR_FILE_NOT_FOUND
        let code = 2;
        let _ = Error::from(io::Error::from_raw_os_error(code));
        assert_eq!(last_os_error(), code);

        let other = std::thread::spawn(last_os_error).join().unwrap();
        assert_eq!(other, 0);
        assert_eq!(last_os_error(), code);
    }

    #[test]
    fn errors_without_os_code() {
        let err = Error::from(io::Error::new(io::ErrorKind::InvalidInput, "nul byte"));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.raw_os_error(), None);

        let err = Error::from(io::Error::new(io::ErrorKind::Other, "???"));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn into_io_error() {
        let err = io::Error::from(Error::Timeout(Duration::from_millis(10)));
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        let err = io::Error::from(Error::EndOfStream);
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let err = io::Error::from(Error::invalid("empty argv"));
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn kinds_of_library_errors() {
        assert_eq!(Error::NotRunning.kind(), ErrorKind::ProcessNotRunning);
        assert_eq!(Error::EndOfStream.kind(), ErrorKind::EndOfStream);
        assert_eq!(
            Error::Timeout(Duration::ZERO).kind(),
            ErrorKind::WaitTimeout
        );
        assert_eq!(
            Error::Timeout(Duration::from_millis(5)).to_string(),
            "a timeout 5ms was reached"
        );
    }
}
