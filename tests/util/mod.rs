#![allow(dead_code)]

use pipeproc::{Error, Options, Process};
use tracing_subscriber::EnvFilter;

/// Enables logs, use `RUST_LOG=pipeproc=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn start(argv: &[&str]) -> Process {
    start_with(argv, &Options::default())
}

pub fn start_with(argv: &[&str], options: &Options) -> Process {
    init_tracing();

    let mut proc = Process::new();
    proc.init().unwrap();
    proc.start(argv, options).unwrap();
    proc
}

/// Reads stdout until the end of stream.
pub fn read_all(proc: &mut Process) -> String {
    read_until_end(|buf| proc.read(buf))
}

/// Reads stderr until the end of stream.
pub fn read_all_stderr(proc: &mut Process) -> String {
    read_until_end(|buf| proc.read_stderr(buf))
}

/// Reads stdout until `n` bytes are collected.
pub fn read_exact(proc: &mut Process, n: usize) -> String {
    let mut buf = vec![0; n];
    let mut filled = 0;
    while filled < n {
        filled += proc.read(&mut buf[filled..]).unwrap();
    }

    String::from_utf8(buf).unwrap()
}

fn read_until_end(mut read: impl FnMut(&mut [u8]) -> Result<usize, Error>) -> String {
    let mut output = Vec::new();
    let mut buf = [0; 256];
    loop {
        match read(&mut buf) {
            Ok(n) => output.extend_from_slice(&buf[..n]),
            Err(Error::EndOfStream) => break,
            Err(err) => panic!("unexpected read error {:?}", err),
        }
    }

    String::from_utf8(output).unwrap()
}
