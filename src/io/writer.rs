use std::{
    fmt,
    io::{self, Write},
};

use crate::{error::Error, sys};

/// PipeWriter implements [std::io::Write] interface for a write end of a pipe.
pub struct PipeWriter {
    pipe: sys::OwnedPipe,
}

impl PipeWriter {
    pub(crate) fn new(pipe: sys::OwnedPipe) -> Self {
        Self { pipe }
    }

    pub(crate) fn into_inner(self) -> sys::OwnedPipe {
        self.pipe
    }

    /// Makes sure the end is not inherited by processes spawned afterwards.
    pub fn disable_inherit(&self) -> Result<(), Error> {
        sys::disable_inherit(&self.pipe)
    }
}

impl Write for PipeWriter {
    /// Returns a number of bytes accepted by the pipe, a write may be partial.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        sys::write(&self.pipe, buf)
    }

    // Pipes are not buffered on our side.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl From<PipeWriter> for std::fs::File {
    fn from(pipe: PipeWriter) -> Self {
        std::fs::File::from(pipe.into_inner())
    }
}

impl fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeWriter")
            .field("pipe", &self.pipe)
            .finish()
    }
}
