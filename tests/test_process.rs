mod util;

use std::time::{Duration, Instant};

use pipeproc::{ErrorKind, Options, Process, ProcessState};
use pretty_assertions::assert_eq;

use util::{init_tracing, start};

#[cfg(unix)]
const SLEEP: &[&str] = &["sleep", "100"];
#[cfg(windows)]
const SLEEP: &[&str] = &["ping", "-n", "100", "127.0.0.1"];

#[test]
pub fn wait_timeout() {
    let mut proc = start(SLEEP);
    assert!(proc.pid().is_some());

    let now = Instant::now();
    let err = proc.wait(Some(0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WaitTimeout);
    assert!(now.elapsed() < Duration::from_secs(1));

    let now = Instant::now();
    let err = proc.wait(Some(200)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WaitTimeout);
    assert!(now.elapsed() >= Duration::from_millis(200));

    assert_eq!(proc.state(), ProcessState::Running);
    assert!(proc.is_alive().unwrap());

    proc.terminate(Some(5000)).unwrap();
}

#[test]
pub fn terminate() {
    let mut proc = start(SLEEP);

    proc.terminate(Some(5000)).unwrap();

    assert_eq!(proc.state(), ProcessState::Exited);
    assert!(!proc.is_alive().unwrap());
    assert_eq!(proc.pid(), None);

    #[cfg(unix)]
    assert_eq!(proc.exit_status().unwrap(), 128 + 9);
    #[cfg(windows)]
    assert_eq!(proc.exit_status().unwrap(), 1);

    // nothing left to terminate
    proc.terminate(Some(0)).unwrap();
    proc.wait(Some(0)).unwrap();
}

#[cfg(unix)]
#[test]
pub fn exit_status() {
    let mut proc = start(&["sh", "-c", "exit 3"]);

    let err = proc.exit_status().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProcessNotRunning);

    proc.wait(None).unwrap();

    assert_eq!(proc.exit_status().unwrap(), 3);
    assert_eq!(proc.exit_status().unwrap(), 3);
    proc.wait(None).unwrap();
    assert_eq!(proc.exit_status().unwrap(), 3);
}

#[cfg(windows)]
#[test]
pub fn exit_status() {
    let mut proc = start(&["cmd", "/C", "exit 3"]);
    proc.wait(None).unwrap();

    assert_eq!(proc.exit_status().unwrap(), 3);
    assert_eq!(proc.exit_status().unwrap(), 3);
}

#[cfg(unix)]
#[test]
pub fn terminate_after_exit() {
    let mut proc = start(&["true"]);

    // poll until it's gone on its own
    while proc.is_alive().unwrap() {
        std::thread::sleep(Duration::from_millis(10));
    }

    proc.terminate(None).unwrap();
    assert_eq!(proc.exit_status().unwrap(), 0);
}

#[test]
pub fn start_twice() {
    let mut proc = start(SLEEP);

    let err = proc.start(SLEEP, &Options::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(proc.state(), ProcessState::Running);

    let err = proc.init().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    proc.terminate(Some(5000)).unwrap();
}

#[test]
pub fn failed_start_can_be_retried() {
    init_tracing();

    let mut proc = Process::new();
    proc.init().unwrap();

    let err = proc
        .start(&["pipeproc-there-is-no-such-program"], &Options::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(proc.state(), ProcessState::Initialized);
    assert_eq!(proc.pid(), None);

    #[cfg(unix)]
    let argv = ["sh", "-c", "exit 5"];
    #[cfg(windows)]
    let argv = ["cmd", "/C", "exit 5"];

    proc.start(&argv, &Options::default()).unwrap();
    proc.wait(None).unwrap();
    assert_eq!(proc.exit_status().unwrap(), 5);
}

#[cfg(unix)]
#[test]
pub fn start_errors() {
    use std::{fs, os::unix::fs::PermissionsExt};

    init_tracing();

    let mut proc = Process::new();
    proc.init().unwrap();

    let err = proc
        .start(&["/nonexistent/path/program"], &Options::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.raw_os_error(), Some(2));
    assert_eq!(pipeproc::last_os_error(), 2);

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-executable");
    fs::write(&file, "data").unwrap();
    fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

    let err = proc.start(&[&file], &Options::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);

    let err = proc
        .start(&["true"], &Options::new().current_dir(dir.path().join("missing")))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);

    assert_eq!(proc.state(), ProcessState::Initialized);
}

#[test]
pub fn spawn_shortcut() {
    init_tracing();

    let mut proc = pipeproc::spawn(SLEEP).unwrap();
    assert_eq!(proc.state(), ProcessState::Running);
    assert!(proc.is_alive().unwrap());

    proc.terminate(Some(5000)).unwrap();
}

#[test]
pub fn drop_running_process() {
    let proc = start(SLEEP);
    let pid = proc.pid().unwrap();
    assert!(pid > 0);

    proc.free();

    // killed and reaped, not left as a zombie
    #[cfg(target_os = "linux")]
    assert!(
        !std::path::Path::new(&format!("/proc/{}/stat", pid)).exists(),
        "child {} is still in the process table",
        pid
    );
}

#[cfg(target_os = "linux")]
#[test]
pub fn drop_child_which_exits_later() {
    let proc = start(&["sh", "-c", "sleep 0.2"]);
    let pid = proc.pid().unwrap();

    drop(proc);
    std::thread::sleep(Duration::from_millis(600));

    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid));
    assert!(stat.is_err(), "child {} left {:?}", pid, stat);
}
