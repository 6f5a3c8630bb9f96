use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

/// Options for [`crate::Process::start`].
///
/// Every field is independent, a default value means
/// "inherit it from the calling process".
///
/// ```
/// use pipeproc::Options;
///
/// let options = Options::new()
///     .current_dir("/tmp")
///     .env_clear()
///     .env("LANG", "C");
///
/// assert_eq!(options.environment.as_ref().map(Vec::len), Some(1));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Initial working directory of the child.
    ///
    /// None means inherit the working directory of the parent.
    pub working_directory: Option<PathBuf>,

    /// The complete environment of the child.
    ///
    /// If this is None, environment variables are inherited from the calling
    /// process. Otherwise only the listed variables are passed.
    /// If a name repeats the later value is used.
    pub environment: Option<Vec<(OsString, OsString)>>,
}

impl Options {
    /// Creates options which inherit everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a working directory of the child.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_directory = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Adds a variable to the child's environment.
    ///
    /// The first call switches the child from an inherited environment to an explicit one,
    /// so make sure to pass everything the child needs.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        let key = key.as_ref();
        let vars = self.environment.get_or_insert_with(Vec::new);
        vars.retain(|(name, _)| name != key);
        vars.push((key.to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Adds all given variables to the child's environment.
    pub fn envs<I, K, V>(self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        vars.into_iter()
            .fold(self, |options, (key, value)| options.env(key, value))
    }

    /// Makes the child start with an empty environment.
    pub fn env_clear(mut self) -> Self {
        self.environment = Some(Vec::new());
        self
    }
}
