use std::{borrow::Cow, cell::RefCell, rc::Rc};

/// Trait for handling output from the `print()` builtin function.
///
/// Implement this trait to capture or redirect print output from sandboxed scripts.
/// The default implementation `StdPrint` writes to stdout.
pub trait PrintWriter {
    /// Called once for each formatted argument passed to `print()`.
    ///
    /// Must write only the given argument's text; separators and the final terminator
    /// are emitted via [`PrintWriter::stdout_push_str`].
    fn stdout_write(&mut self, output: Cow<'_, str>);

    /// Emits a separator or line terminator.
    fn stdout_push_str(&mut self, end: &str);
}

/// Default `PrintWriter` that writes to stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

#[allow(clippy::print_stdout)]
impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) {
        print!("{output}");
    }

    fn stdout_push_str(&mut self, end: &str) {
        print!("{end}");
    }
}

/// A `PrintWriter` that collects all output into a string.
///
/// Clones share one buffer, so a host can keep a handle while the playground owns the writer.
#[derive(Debug, Default, Clone)]
pub struct CollectStringPrint(Rc<RefCell<String>>);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    #[must_use]
    pub fn output(&self) -> String {
        self.0.borrow().clone()
    }

    /// Output split into lines, without terminators.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.0.borrow().lines().map(str::to_owned).collect()
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) {
        self.0.borrow_mut().push_str(&output);
    }

    fn stdout_push_str(&mut self, end: &str) {
        self.0.borrow_mut().push_str(end);
    }
}

/// `PrintWriter` that ignores all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: Cow<'_, str>) {}

    fn stdout_push_str(&mut self, _end: &str) {}
}
