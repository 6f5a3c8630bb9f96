use std::{
    ffi::{c_void, OsString},
    io,
    mem::size_of,
    os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle},
    ptr::null_mut,
    time::Duration,
};

use windows::{
    core::{self as win, PCWSTR, PWSTR},
    Win32::{
        Foundation::{
            CloseHandle, SetHandleInformation, BOOL, ERROR_BROKEN_PIPE, HANDLE, HANDLE_FLAGS,
            HANDLE_FLAG_INHERIT, WAIT_OBJECT_0, WAIT_TIMEOUT,
        },
        Security::SECURITY_ATTRIBUTES,
        Storage::FileSystem::{ReadFile, WriteFile},
        System::{
            Pipes::CreatePipe,
            Threading::{
                CreateProcessW, GetExitCodeProcess, TerminateProcess, WaitForSingleObject,
                CREATE_UNICODE_ENVIRONMENT, PROCESS_CREATION_FLAGS, PROCESS_INFORMATION,
                STARTF_USESTDHANDLES, STARTUPINFOW,
            },
        },
    },
};

use crate::{
    error::Error,
    options::Options,
    util::{environment_block, to_wide_nul, windows_command_line},
};

/// An exit code of a process stopped by [`Child::kill`].
const TERMINATED_EXIT_CODE: u32 = 1;

const INFINITE: u32 = u32::MAX;

pub(crate) type OwnedPipe = OwnedHandle;

/// Pipe ends which become the child's standard handles.
#[derive(Debug)]
pub(crate) struct ChildStdio {
    pub(crate) stdin: OwnedHandle,
    pub(crate) stdout: OwnedHandle,
    pub(crate) stderr: OwnedHandle,
}

/// Creates an anonymous pipe.
///
/// Both handles are inheritable, `disable_inherit` must be called
/// for the end which stays in the parent.
pub(crate) fn pipe() -> Result<(OwnedHandle, OwnedHandle), Error> {
    let attributes = SECURITY_ATTRIBUTES {
        nLength: size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: null_mut(),
        bInheritHandle: BOOL::from(true),
    };

    let mut reader = HANDLE::default();
    let mut writer = HANDLE::default();
    unsafe { CreatePipe(&mut reader, &mut writer, Some(&attributes as *const _), 0)? };

    // SAFETY: both handles were just created and are owned by nobody else.
    Ok(unsafe { (owned(reader), owned(writer)) })
}

pub(crate) fn disable_inherit(handle: &OwnedHandle) -> Result<(), Error> {
    unsafe { SetHandleInformation(raw(handle), HANDLE_FLAG_INHERIT.0, HANDLE_FLAGS(0))? };
    Ok(())
}

pub(crate) fn read(handle: &OwnedHandle, buf: &mut [u8]) -> io::Result<usize> {
    // a zero sized read of an empty pipe blocks
    if buf.is_empty() {
        return Ok(0);
    }

    let mut n = 0;
    match unsafe { ReadFile(raw(handle), Some(buf), Some(&mut n), None) } {
        Ok(()) => Ok(n as usize),
        // the writer is gone, it's how an anonymous pipe reports EOF
        Err(err) if err.code() == ERROR_BROKEN_PIPE.to_hresult() => Ok(0),
        Err(err) => Err(win_error_to_io(err)),
    }
}

pub(crate) fn write(handle: &OwnedHandle, buf: &[u8]) -> io::Result<usize> {
    let mut n = 0;
    unsafe { WriteFile(raw(handle), Some(buf), Some(&mut n), None) }.map_err(win_error_to_io)?;
    Ok(n as usize)
}

/// A running child.
#[derive(Debug)]
pub(crate) struct Child {
    process: OwnedHandle,
    pid: u32,
}

impl Child {
    pub(crate) fn id(&self) -> u32 {
        self.pid
    }

    pub(crate) fn try_wait(&mut self) -> Result<Option<i32>, Error> {
        self.wait_timeout(Some(Duration::ZERO))
    }

    pub(crate) fn wait_timeout(&mut self, timeout: Option<Duration>) -> Result<Option<i32>, Error> {
        let millis = timeout.map_or(INFINITE, |timeout| {
            timeout.as_millis().min(u128::from(INFINITE - 1)) as u32
        });

        let event = unsafe { WaitForSingleObject(raw(&self.process), millis) };
        if event == WAIT_TIMEOUT {
            return Ok(None);
        }

        if event != WAIT_OBJECT_0 {
            return Err(Error::last_os());
        }

        let mut code = 0;
        unsafe { GetExitCodeProcess(raw(&self.process), &mut code)? };

        Ok(Some(code as i32))
    }

    pub(crate) fn kill(&mut self) -> Result<(), Error> {
        unsafe { TerminateProcess(raw(&self.process), TERMINATED_EXIT_CODE)? };
        Ok(())
    }
}

/// Creates a process with standard handles set to the given pipe ends.
///
/// The parent's copies of `stdio` are closed before returning regardless of the result.
pub(crate) fn spawn(argv: &[OsString], options: &Options, stdio: ChildStdio) -> Result<Child, Error> {
    let argv = argv
        .iter()
        .map(|arg| to_str(arg))
        .collect::<Result<Vec<_>, _>>()?;
    let mut commandline = to_wide_nul(&windows_command_line(&argv))?;

    let current_dir = match &options.working_directory {
        Some(dir) => Some(to_wide_nul(to_str(dir.as_os_str())?)?),
        None => None,
    };

    let envs = match &options.environment {
        Some(vars) => {
            let vars = vars
                .iter()
                .map(|(name, value)| Ok::<_, Error>((to_str(name)?, to_str(value)?)))
                .collect::<Result<Vec<_>, _>>()?;
            Some(environment_block(&vars)?)
        }
        None => None,
    };

    let mut flags = PROCESS_CREATION_FLAGS(0);
    if envs.is_some() {
        flags |= CREATE_UNICODE_ENVIRONMENT;
    }

    let startup_info = STARTUPINFOW {
        cb: size_of::<STARTUPINFOW>() as u32,
        dwFlags: STARTF_USESTDHANDLES,
        hStdInput: raw(&stdio.stdin),
        hStdOutput: raw(&stdio.stdout),
        hStdError: raw(&stdio.stderr),
        ..Default::default()
    };

    let mut proc_info = PROCESS_INFORMATION::default();
    unsafe {
        CreateProcessW(
            PCWSTR::null(),
            PWSTR(commandline.as_mut_ptr()),
            None,
            None,
            true,
            flags,
            envs.as_ref().map(|block| block.as_ptr() as *const c_void),
            current_dir
                .as_ref()
                .map_or(PCWSTR::null(), |dir| PCWSTR(dir.as_ptr())),
            &startup_info,
            &mut proc_info,
        )?
    };

    drop(stdio);

    unsafe {
        let _ = CloseHandle(proc_info.hThread);
    }

    Ok(Child {
        // SAFETY: CreateProcessW returned a new handle which we own.
        process: unsafe { owned(proc_info.hProcess) },
        pid: proc_info.dwProcessId,
    })
}

pub(crate) fn win_error_to_io(err: win::Error) -> io::Error {
    let code = err.code().0 as u32;
    // HRESULT_FROM_WIN32 keeps a win32 code in the low word under the 0x8007 prefix.
    if code & 0xFFFF_0000 == 0x8007_0000 {
        io::Error::from_raw_os_error((code & 0xFFFF) as i32)
    } else {
        io::Error::from_raw_os_error(code as i32)
    }
}

fn to_str(s: &std::ffi::OsStr) -> Result<&str, Error> {
    s.to_str()
        .ok_or_else(|| Error::invalid(format!("{:?} is not valid unicode", s)))
}

fn raw(handle: &impl AsRawHandle) -> HANDLE {
    HANDLE(handle.as_raw_handle() as isize)
}

unsafe fn owned(handle: HANDLE) -> OwnedHandle {
    OwnedHandle::from_raw_handle(handle.0 as RawHandle)
}
