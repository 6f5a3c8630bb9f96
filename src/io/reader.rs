use std::{
    fmt,
    io::{self, Read},
};

use crate::{error::Error, sys};

/// PipeReader wraps a read end of a pipe to provide a [std::io::Read] interface.
///
/// It owns the end, which is closed on drop.
pub struct PipeReader {
    pipe: sys::OwnedPipe,
}

impl PipeReader {
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

impl Read for PipeReader {
    /// Blocks until some data is available.
    ///
    /// It may return less than `buf.len()`. 0 is returned only at the end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        sys::read(&self.pipe, buf)
    }
}

impl From<PipeReader> for std::fs::File {
    fn from(pipe: PipeReader) -> Self {
        std::fs::File::from(pipe.into_inner())
    }
}

impl fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeReader")
            .field("pipe", &self.pipe)
            .finish()
    }
}
