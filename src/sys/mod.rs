//! OS specific primitives.
//!
//! Each backend provides the same set of items:
//!
//! - `OwnedPipe`, an owned pipe end which is closed on drop
//! - `pipe`, `disable_inherit`, `read`, `write`
//! - `ChildStdio`, the ends which are handed to a child
//! - `spawn` and `Child` with `id`, `try_wait`, `wait_timeout` and `kill`

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use self::windows::*;
