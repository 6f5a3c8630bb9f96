//! A library which provides an interface for spawning a child process
//! and talking to it through anonymous pipes.
//!
//! The child's stdin, stdout and stderr are connected to three separate pipes,
//! so its output and errors are never mixed.
//!
//! # Example
//!
//! ```no_run
//! use std::io::{Read, Write};
//!
//! let mut proc = pipeproc::spawn(&["cat"]).unwrap();
//! proc.write_all(b"Hello World\n").unwrap();
//! proc.close_stdin().unwrap();
//!
//! let mut buf = String::new();
//! proc.read_to_string(&mut buf).unwrap();
//! assert_eq!(buf, "Hello World\n");
//!
//! proc.wait(None).unwrap();
//! assert_eq!(proc.exit_status().unwrap(), 0);
//! ```
//!
//! A [`Process`] can be driven step by step too, see its documentation.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod io;

mod error;
mod options;
mod process;
mod sys;
mod util;

pub use error::{last_os_error, map_os_error, Error, ErrorKind};
pub use io::{pipe, PipeReader, PipeWriter};
pub use options::Options;
pub use process::{spawn, Process, ProcessState};
