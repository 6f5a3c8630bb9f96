use std::{
    ffi::{OsStr, OsString},
    fmt,
    io::{self, Read, Write},
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    error::Error,
    io::{pipe, PipeReader, PipeWriter},
    options::Options,
    sys, util,
};

/// A lifecycle state of a [`Process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Allocated but not initialized.
    Uninitialized,
    /// Ready to be started.
    Initialized,
    /// A child was started and was not observed to exit yet.
    Running,
    /// The child exited, its status is cached.
    Exited,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Exited => "exited",
        };

        f.write_str(name)
    }
}

/// Everything a process owns in the OS.
///
/// Each slot is released once, either when the value is taken out or on drop.
#[derive(Debug, Default)]
struct Handles {
    stdin: Option<PipeWriter>,
    stdout: Option<PipeReader>,
    stderr: Option<PipeReader>,
    child: Option<sys::Child>,
}

/// The structure is responsible for interactions with a spawned process.
///
/// It moves through [`ProcessState`]s:
/// `new` -> `init` -> `start` -> (`wait` | `terminate`).
///
/// ```no_run
/// use pipeproc::{Options, Process};
///
/// let mut process = Process::new();
/// process.init()?;
/// process.start(&["cat"], &Options::default())?;
///
/// process.write(b"one\n")?;
///
/// let mut buf = [0; 16];
/// let n = process.read(&mut buf)?;
/// assert_eq!(&buf[..n], b"one\n");
///
/// process.close_stdin()?;
/// process.wait(Some(1000))?;
/// assert_eq!(process.exit_status()?, 0);
/// # Ok::<(), pipeproc::Error>(())
/// ```
#[derive(Debug)]
pub struct Process {
    state: ProcessState,
    handles: Handles,
    exit_status: Option<i32>,
}

impl Process {
    /// Allocates an empty process, the OS is not touched.
    pub fn new() -> Self {
        Self {
            state: ProcessState::Uninitialized,
            handles: Handles::default(),
            exit_status: None,
        }
    }

    /// Prepares the process to be started.
    pub fn init(&mut self) -> Result<(), Error> {
        if self.state != ProcessState::Uninitialized {
            return Err(Error::invalid(format!(
                "can't initialize a process which is {}",
                self.state
            )));
        }

        self.handles = Handles::default();
        self.exit_status = None;
        self.set_state(ProcessState::Initialized);

        Ok(())
    }

    /// Returns a current state.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Spawns `argv` with its stdin, stdout and stderr connected to pipes.
    ///
    /// The first element is a program, it's looked up in PATH unless it contains a path separator.
    /// Arguments are passed as they are, no shell is involved.
    ///
    /// If it fails nothing is leaked and the process stays [`ProcessState::Initialized`],
    /// so `start` can be called again.
    pub fn start<S: AsRef<OsStr>>(&mut self, argv: &[S], options: &Options) -> Result<(), Error> {
        if self.state != ProcessState::Initialized {
            return Err(Error::invalid(format!(
                "can't start a process which is {}",
                self.state
            )));
        }

        let argv = check_argv(argv)?;

        // Every end is owned from the moment it's created,
        // an early return closes whatever was opened so far.
        let (stdin_reader, stdin_writer) = pipe()?;
        let (stdout_reader, stdout_writer) = pipe()?;
        let (stderr_reader, stderr_writer) = pipe()?;

        stdin_writer.disable_inherit()?;
        stdout_reader.disable_inherit()?;
        stderr_reader.disable_inherit()?;

        let stdio = sys::ChildStdio {
            stdin: stdin_reader.into_inner(),
            stdout: stdout_writer.into_inner(),
            stderr: stderr_writer.into_inner(),
        };

        let child = sys::spawn(&argv, options, stdio).map_err(|err| {
            debug!(command = %util::command_line(&argv), error = %err, "failed to start a process");
            err
        })?;

        debug!(pid = child.id(), command = %util::command_line(&argv), "process started");

        self.handles = Handles {
            stdin: Some(stdin_writer),
            stdout: Some(stdout_reader),
            stderr: Some(stderr_reader),
            child: Some(child),
        };
        self.set_state(ProcessState::Running);

        Ok(())
    }

    /// Returns a pid of the child while it's running.
    pub fn pid(&self) -> Option<u32> {
        self.handles.child.as_ref().map(sys::Child::id)
    }

    /// Writes to the child's stdin.
    ///
    /// It returns the number of bytes the pipe accepted, which may be less than `buf.len()`.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if self.state != ProcessState::Running {
            return Err(Error::NotRunning);
        }

        let stdin = self
            .handles
            .stdin
            .as_mut()
            .ok_or_else(|| Error::invalid("stdin was closed"))?;

        Ok(Write::write(stdin, buf)?)
    }

    /// Reads the child's stdout.
    ///
    /// It blocks until some data is available and returns the number of bytes read.
    /// Data written before the child exited can still be read after it.
    /// Once the child's end is closed and the pipe is drained [`Error::EndOfStream`] is returned.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        read_pipe(self.state, self.handles.stdout.as_mut(), "stdout", buf)
    }

    /// Reads the child's stderr, see [`Process::read`].
    pub fn read_stderr(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        read_pipe(self.state, self.handles.stderr.as_mut(), "stderr", buf)
    }

    /// Closes the child's stdin, so it observes end of input.
    pub fn close_stdin(&mut self) -> Result<(), Error> {
        match self.state {
            ProcessState::Uninitialized | ProcessState::Initialized => Err(Error::NotRunning),
            ProcessState::Running | ProcessState::Exited => {
                drop(self.handles.stdin.take());
                Ok(())
            }
        }
    }

    /// Takes the stdin pipe out of the process.
    pub fn take_stdin(&mut self) -> Option<PipeWriter> {
        self.handles.stdin.take()
    }

    /// Takes the stdout pipe out of the process.
    pub fn take_stdout(&mut self) -> Option<PipeReader> {
        self.handles.stdout.take()
    }

    /// Takes the stderr pipe out of the process, e.g. to drain it on another thread.
    pub fn take_stderr(&mut self) -> Option<PipeReader> {
        self.handles.stderr.take()
    }

    /// Waits before the process exits.
    ///
    /// - `None` blocks until it exits
    /// - `Some(0)` checks the process without blocking
    /// - `Some(n)` blocks at most `n` milliseconds
    ///
    /// If the process is still running when time is up [`Error::Timeout`] is returned
    /// and the process stays [`ProcessState::Running`].
    pub fn wait(&mut self, timeout_millis: Option<u32>) -> Result<(), Error> {
        match self.state {
            ProcessState::Exited => return Ok(()),
            ProcessState::Running => {}
            ProcessState::Uninitialized | ProcessState::Initialized => {
                return Err(Error::NotRunning)
            }
        }

        let timeout = timeout_millis.map(|millis| Duration::from_millis(millis.into()));
        let child = self.handles.child.as_mut().ok_or(Error::NotRunning)?;
        match child.wait_timeout(timeout)? {
            Some(status) => {
                self.exited(status);
                Ok(())
            }
            None => Err(Error::Timeout(timeout.unwrap_or_default())),
        }
    }

    /// Checks whether the process is still running without blocking.
    pub fn is_alive(&mut self) -> Result<bool, Error> {
        match self.wait(Some(0)) {
            Ok(()) => Ok(false),
            Err(Error::Timeout(_)) => Ok(true),
            Err(Error::NotRunning) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Kills the process and waits for it to exit, see [`Process::wait`].
    ///
    /// It does nothing if the process has already exited.
    pub fn terminate(&mut self, timeout_millis: Option<u32>) -> Result<(), Error> {
        match self.state {
            ProcessState::Exited => return Ok(()),
            ProcessState::Running => {}
            ProcessState::Uninitialized | ProcessState::Initialized => {
                return Err(Error::NotRunning)
            }
        }

        let child = self.handles.child.as_mut().ok_or(Error::NotRunning)?;
        debug!(pid = child.id(), "terminating process");

        if let Err(err) = child.kill() {
            // It could have exited on its own just before.
            match child.try_wait()? {
                Some(status) => {
                    self.exited(status);
                    return Ok(());
                }
                None => return Err(err),
            }
        }

        self.wait(timeout_millis)
    }

    /// Returns an exit status of the exited process.
    ///
    /// On unix a process killed by a signal has a status of `128 + signal`.
    pub fn exit_status(&self) -> Result<i32, Error> {
        match (self.state, self.exit_status) {
            (ProcessState::Exited, Some(status)) => Ok(status),
            _ => Err(Error::NotRunning),
        }
    }

    /// Releases every handle owned by the process.
    ///
    /// A child which is still running is killed and reaped,
    /// so nothing is left in the process table.
    pub fn free(self) {
        drop(self)
    }

    fn exited(&mut self, status: i32) {
        if let Some(child) = self.handles.child.take() {
            debug!(pid = child.id(), status, "process exited");
        }

        self.exit_status = Some(status);
        self.set_state(ProcessState::Exited);
    }

    fn set_state(&mut self, state: ProcessState) {
        debug!(from = %self.state, to = %state, "process state changed");
        self.state = state;
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        // Pipes go first so the child sees EOF on its stdin.
        drop(self.handles.stdin.take());
        drop(self.handles.stdout.take());
        drop(self.handles.stderr.take());

        if let Some(mut child) = self.handles.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => debug!(pid = child.id(), status, "process exited"),
                Ok(None) => {
                    debug!(pid = child.id(), "killing a running process on release");
                    let result = child.kill().and_then(|()| child.wait_timeout(None));
                    if let Err(err) = result {
                        warn!(pid = child.id(), error = %err, "failed to reap a process");
                    }
                }
                Err(err) => warn!(pid = child.id(), error = %err, "failed to check a process"),
            }
        }
    }
}

impl Write for Process {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Process::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for Process {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match Process::read(self, buf) {
            Ok(n) => Ok(n),
            Err(Error::EndOfStream) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

/// Spawns `argv` with default options.
///
/// It's a shortcut for [`Process::new`], [`Process::init`] and [`Process::start`].
///
/// ```no_run
/// let mut process = pipeproc::spawn(&["sleep", "100"]).unwrap();
/// assert!(process.is_alive().unwrap());
/// process.terminate(Some(100)).unwrap();
/// ```
pub fn spawn<S: AsRef<OsStr>>(argv: &[S]) -> Result<Process, Error> {
    let mut process = Process::new();
    process.init()?;
    process.start(argv, &Options::default())?;
    Ok(process)
}

fn check_argv<S: AsRef<OsStr>>(argv: &[S]) -> Result<Vec<OsString>, Error> {
    if argv.is_empty() {
        return Err(Error::invalid("argv is empty"));
    }

    argv.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            if arg.to_string_lossy().contains('\0') {
                return Err(Error::invalid(format!("{:?} contains a nul byte", arg)));
            }

            Ok(arg.to_os_string())
        })
        .collect()
}

fn read_pipe(
    state: ProcessState,
    pipe: Option<&mut PipeReader>,
    name: &str,
    buf: &mut [u8],
) -> Result<usize, Error> {
    if let ProcessState::Uninitialized | ProcessState::Initialized = state {
        return Err(Error::NotRunning);
    }

    let pipe = pipe.ok_or_else(|| Error::invalid(format!("{} was taken from the process", name)))?;

    if buf.is_empty() {
        return Ok(0);
    }

    match Read::read(pipe, buf)? {
        0 => Err(Error::EndOfStream),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ErrorKind;

    #[test]
    fn new_process_is_uninitialized() {
        let process = Process::new();
        assert_eq!(process.state(), ProcessState::Uninitialized);
        assert_eq!(process.pid(), None);
    }

    #[test]
    fn init_twice() {
        let mut process = Process::new();
        process.init().unwrap();
        assert_eq!(process.state(), ProcessState::Initialized);

        let err = process.init().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(process.state(), ProcessState::Initialized);
    }

    #[test]
    fn start_requires_init() {
        let mut process = Process::new();
        let err = process.start(&["true"], &Options::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(process.state(), ProcessState::Uninitialized);
    }

    #[test]
    fn argv_is_checked() {
        let mut process = Process::new();
        process.init().unwrap();

        let empty: [&str; 0] = [];
        let err = process.start(&empty, &Options::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = process.start(&["a\0b"], &Options::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert_eq!(process.state(), ProcessState::Initialized);
    }

    #[test]
    fn operations_before_start() {
        let mut process = Process::new();
        process.init().unwrap();

        let mut buf = [0; 8];
        assert_eq!(
            process.write(b"x").unwrap_err().kind(),
            ErrorKind::ProcessNotRunning
        );
        assert_eq!(
            process.read(&mut buf).unwrap_err().kind(),
            ErrorKind::ProcessNotRunning
        );
        assert_eq!(
            process.read_stderr(&mut buf).unwrap_err().kind(),
            ErrorKind::ProcessNotRunning
        );
        assert_eq!(
            process.wait(Some(0)).unwrap_err().kind(),
            ErrorKind::ProcessNotRunning
        );
        assert_eq!(
            process.terminate(Some(0)).unwrap_err().kind(),
            ErrorKind::ProcessNotRunning
        );
        assert_eq!(
            process.exit_status().unwrap_err().kind(),
            ErrorKind::ProcessNotRunning
        );
        assert_eq!(
            process.close_stdin().unwrap_err().kind(),
            ErrorKind::ProcessNotRunning
        );
        assert!(!process.is_alive().unwrap());
    }

    #[test]
    fn free_in_any_state() {
        Process::new().free();

        let mut process = Process::new();
        process.init().unwrap();
        process.free();
    }
}
