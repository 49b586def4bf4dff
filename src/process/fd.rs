// Descriptor entries and the closed set of backends they bind to

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalEnd {
    /// Descriptor 0.
    Input,
    /// Descriptor 1.
    Output,
}

/// What an open descriptor is bound to. Dispatch happens in one `match`
/// in the syscall layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Terminal(TerminalEnd),
    Rtc,
    Directory,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    pub backend: Backend,
    /// Inode for files, unused otherwise.
    pub object: u32,
    /// Byte offset for files, entry index for directories.
    pub position: u32,
}

impl OpenFile {
    pub fn new(backend: Backend, object: u32) -> Self {
        Self {
            backend,
            object,
            position: 0,
        }
    }

    pub fn stdin() -> Self {
        Self::new(Backend::Terminal(TerminalEnd::Input), 0)
    }

    pub fn stdout() -> Self {
        Self::new(Backend::Terminal(TerminalEnd::Output), 0)
    }
}
