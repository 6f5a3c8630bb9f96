use std::{
    collections::HashSet,
    convert::Infallible,
    env,
    ffi::{CStr, CString, OsStr, OsString},
    fs, io,
    os::{
        fd::{AsRawFd, OwnedFd},
        raw::c_char,
        unix::{ffi::OsStrExt, fs::PermissionsExt},
    },
    path::Path,
    ptr, thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    fcntl::{fcntl, FcntlArg, FdFlag},
    libc,
    sys::{
        signal::{kill, signal, SigHandler, Signal},
        wait::{waitpid, WaitPidFlag, WaitStatus},
    },
    unistd::{self, chdir, dup2, fork, ForkResult, Pid},
};
use tracing::warn;

use crate::{error::Error, options::Options};

/// A status of a child which failed to exec.
/// The parent never observes it as the failure is reported through the status pipe.
const EXEC_FAILED_STATUS: i32 = 127;

/// A status offset of a child killed by a signal, as shells report it.
const SIGNAL_STATUS_BASE: i32 = 128;

/// Upper bound of a sleep between two polls in `wait_timeout`.
const MAX_POLL_DELAY: Duration = Duration::from_millis(100);

pub(crate) type OwnedPipe = OwnedFd;

/// Pipe ends which become the child's fd 0, 1 and 2.
#[derive(Debug)]
pub(crate) struct ChildStdio {
    pub(crate) stdin: OwnedFd,
    pub(crate) stdout: OwnedFd,
    pub(crate) stderr: OwnedFd,
}

/// Creates a pipe with both ends closed on exec.
///
/// A child gets its ends through `dup2` so raw pipe ends never leak
/// into processes spawned concurrently by other threads.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn pipe() -> Result<(OwnedFd, OwnedFd), Error> {
    use nix::fcntl::OFlag;

    Ok(unistd::pipe2(OFlag::O_CLOEXEC)?)
}

/// Creates a pipe with both ends closed on exec.
///
/// A child gets its ends through `dup2` so raw pipe ends never leak
/// into processes spawned by this library.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn pipe() -> Result<(OwnedFd, OwnedFd), Error> {
    let (reader, writer) = unistd::pipe()?;
    disable_inherit(&reader)?;
    disable_inherit(&writer)?;
    Ok((reader, writer))
}

pub(crate) fn disable_inherit(fd: &OwnedFd) -> Result<(), Error> {
    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFD)?;
    let flags = FdFlag::from_bits_truncate(flags) | FdFlag::FD_CLOEXEC;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(flags))?;
    Ok(())
}

pub(crate) fn read(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match unistd::read(fd.as_raw_fd(), buf) {
            Err(Errno::EINTR) => continue,
            result => return result.map_err(io::Error::from),
        }
    }
}

pub(crate) fn write(fd: &OwnedFd, buf: &[u8]) -> io::Result<usize> {
    loop {
        match unistd::write(fd, buf) {
            Err(Errno::EINTR) => continue,
            result => return result.map_err(io::Error::from),
        }
    }
}

/// A running child.
#[derive(Debug)]
pub(crate) struct Child {
    pid: Pid,
}

impl Child {
    pub(crate) fn id(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    pub(crate) fn try_wait(&mut self) -> Result<Option<i32>, Error> {
        loop {
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(status) => return Ok(exit_code(status)),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
        }
    }

    /// Waits for the child to exit.
    ///
    /// None blocks until the exit, otherwise the child is polled
    /// with an exponential back-off until the deadline.
    pub(crate) fn wait_timeout(&mut self, timeout: Option<Duration>) -> Result<Option<i32>, Error> {
        let timeout = match timeout {
            Some(timeout) => timeout,
            None => return self.wait().map(Some),
        };

        let deadline = Instant::now() + timeout;
        let mut delay = Duration::from_millis(1);

        loop {
            if let Some(code) = self.try_wait()? {
                return Ok(Some(code));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            thread::sleep(delay.min(deadline - now));
            delay = (delay * 2).min(MAX_POLL_DELAY);
        }
    }

    fn wait(&mut self) -> Result<i32, Error> {
        loop {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    if let Some(code) = exit_code(status) {
                        return Ok(code);
                    }
                }
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(errno.into()),
            }
        }
    }

    pub(crate) fn kill(&mut self) -> Result<(), Error> {
        match kill(self.pid, Signal::SIGKILL) {
            // a zombie still accepts signals, so it's gone for good
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(errno.into()),
        }
    }
}

fn exit_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(SIGNAL_STATUS_BASE + signal as i32),
        _ => None,
    }
}

/// Forks and execs `argv` with stdio connected to the given pipe ends.
///
/// The parent's copies of `stdio` are closed before returning regardless of the result.
/// A failure of `exec` in the child is sent back through a status pipe,
/// so a returned `Child` is known to run the requested program.
pub(crate) fn spawn(argv: &[OsString], options: &Options, stdio: ChildStdio) -> Result<Child, Error> {
    let environment = options.environment.as_deref();

    let program = resolve_program(&argv[0], environment)?;
    let args = argv
        .iter()
        .map(|arg| to_cstring(arg))
        .collect::<Result<Vec<_>, _>>()?;
    let env = environment.map(format_env).transpose()?;
    let cwd = options
        .working_directory
        .as_deref()
        .map(|dir| to_cstring(dir.as_os_str()))
        .transpose()?;

    // Everything the child touches is allocated before fork.
    let args = null_terminated(&args);
    let env = env.as_deref().map(null_terminated);

    let (status_reader, status_writer) = pipe()?;

    // SAFETY: the child calls only async-signal-safe functions until exec or _exit.
    match unsafe { fork() }? {
        ForkResult::Child => {
            let errno = match exec_child(&stdio, cwd.as_deref(), &program, &args, env.as_deref()) {
                Ok(never) => match never {},
                Err(errno) => errno,
            };

            let _ = unistd::write(&status_writer, &(errno as i32).to_le_bytes());
            unsafe { libc::_exit(EXEC_FAILED_STATUS) }
        }
        ForkResult::Parent { child } => {
            drop(status_writer);
            drop(stdio);

            match read_exec_status(&status_reader) {
                Ok(None) => Ok(Child { pid: child }),
                Ok(Some(code)) => {
                    reap(child);
                    Err(io::Error::from_raw_os_error(code).into())
                }
                Err(err) => {
                    let _ = kill(child, Signal::SIGKILL);
                    reap(child);
                    Err(err)
                }
            }
        }
    }
}

fn exec_child(
    stdio: &ChildStdio,
    cwd: Option<&CStr>,
    program: &CStr,
    args: &[*const c_char],
    env: Option<&[*const c_char]>,
) -> nix::Result<Infallible> {
    let fds = [
        (stdio.stdin.as_raw_fd(), libc::STDIN_FILENO),
        (stdio.stdout.as_raw_fd(), libc::STDOUT_FILENO),
        (stdio.stderr.as_raw_fd(), libc::STDERR_FILENO),
    ];
    for (fd, target) in fds {
        if fd == target {
            // dup2 onto itself keeps FD_CLOEXEC
            fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
        } else {
            dup2(fd, target)?;
        }
    }

    // SIGPIPE is ignored by Rust programs and an ignored disposition survives exec.
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) }?;

    if let Some(cwd) = cwd {
        chdir(cwd)?;
    }

    unsafe {
        match env {
            Some(env) => libc::execve(program.as_ptr(), args.as_ptr(), env.as_ptr()),
            None => libc::execv(program.as_ptr(), args.as_ptr()),
        };
    }

    Err(Errno::last())
}

fn read_exec_status(reader: &OwnedFd) -> Result<Option<i32>, Error> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match read(reader, &mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }

    match filled {
        0 => Ok(None),
        4 => Ok(Some(i32::from_le_bytes(buf))),
        _ => Err(io::Error::new(io::ErrorKind::InvalidData, "truncated exec status").into()),
    }
}

fn reap(pid: Pid) {
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            Err(errno) => {
                warn!(pid = pid.as_raw(), %errno, "failed to reap a child");
                return;
            }
            Ok(_) => return,
        }
    }
}

/// Finds an executable in PATH unless the program is a path itself.
///
/// PATH is taken from the override environment when it has one.
fn resolve_program(
    program: &OsStr,
    environment: Option<&[(OsString, OsString)]>,
) -> Result<CString, Error> {
    if program.as_bytes().contains(&b'/') {
        return to_cstring(program);
    }

    let path = environment
        .and_then(|vars| vars.iter().rev().find(|(name, _)| name == "PATH"))
        .map(|(_, value)| value.clone())
        .or_else(|| env::var_os("PATH"));

    if let Some(path) = path {
        for dir in env::split_paths(&path) {
            let candidate = dir.join(program);
            if is_executable(&candidate) {
                return to_cstring(candidate.as_os_str());
            }
        }
    }

    Err(io::Error::from_raw_os_error(Errno::ENOENT as i32).into())
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn format_env(env: &[(OsString, OsString)]) -> Result<Vec<CString>, Error> {
    // keep the last value of a name
    let mut seen = HashSet::<&OsStr>::new();
    let mut formatted = env
        .iter()
        .rev()
        .filter(|&(name, _)| seen.insert(name.as_os_str()))
        .map(|(name, value)| {
            if name.is_empty() || name.as_bytes().contains(&b'=') {
                return Err(Error::invalid(format!(
                    "environment variable {:?} can't be passed",
                    name
                )));
            }

            let mut var = name.clone();
            var.push("=");
            var.push(value);
            to_cstring(&var)
        })
        .collect::<Result<Vec<_>, _>>()?;
    formatted.reverse();

    Ok(formatted)
}

fn to_cstring(s: &OsStr) -> Result<CString, Error> {
    CString::new(s.as_bytes()).map_err(|_| Error::invalid(format!("{:?} contains a nul byte", s)))
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}
