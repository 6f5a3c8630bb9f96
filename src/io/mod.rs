//! This module contains [crate::Process]'s `Input` and `Output` pipes.
//!
//! Input - PipeWriter
//! Output, Error - PipeReader

mod reader;
mod writer;

pub use reader::PipeReader;
pub use writer::PipeWriter;

use crate::{error::Error, sys};

/// Creates an anonymous unidirectional pipe.
///
/// Bytes written to the [`PipeWriter`] are read from the [`PipeReader`].
/// Whether the ends are inherited by children spawned later depends on a platform,
/// use `disable_inherit` on an end which must stay in this process.
///
/// ```
/// use std::io::{Read, Write};
///
/// let (mut reader, mut writer) = pipeproc::pipe().unwrap();
/// writer.write_all(b"ping").unwrap();
/// drop(writer);
///
/// let mut buf = String::new();
/// reader.read_to_string(&mut buf).unwrap();
/// assert_eq!(buf, "ping");
/// ```
pub fn pipe() -> Result<(PipeReader, PipeWriter), Error> {
    let (reader, writer) = sys::pipe()?;
    Ok((PipeReader::new(reader), PipeWriter::new(writer)))
}
