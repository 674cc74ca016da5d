//! Levelled logger with a composable prefix stack and polling progress output.
//!
//! Verbosity is an integer between 0 and 7. The bands 0..=4 select what is
//! emitted here; 5..=7 additionally change what the SSH transport is asked
//! for (see [`crate::exec::ssh`]). Progress dots are only produced at
//! verbosity 0; above that, polling loops log the observed value instead.

use console::style;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Named verbosity bands. The numeric value is the verbosity required for
/// the band to be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    Verbose,
    Debug,
    Debug2,
    Debug3,
}

impl Level {
    fn threshold(self) -> u8 {
        match self {
            Level::Info => 0,
            Level::Verbose => 1,
            Level::Debug => 2,
            Level::Debug2 => 3,
            Level::Debug3 => 4,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Verbose => "VERBOSE",
            Level::Debug => "DEBUG",
            Level::Debug2 => "DEBUG2",
            Level::Debug3 => "DEBUG3",
        }
    }
}

struct SinkState {
    out: Box<dyn Write + Send>,
    /// A progress dot run is open (no trailing newline yet).
    dots_open: bool,
}

struct Shared {
    sink: Mutex<SinkState>,
    colors: bool,
}

/// A cheap-to-clone logger value. Child loggers created via
/// [`Logger::with_prefix`] share the sink and verbosity with their parent;
/// prefixes compose left-to-right.
#[derive(Clone)]
pub struct Logger {
    verbosity: u8,
    prefixes: Vec<String>,
    shared: Arc<Shared>,
}

impl Logger {
    /// Logger writing to stderr. Colour is used only when stderr supports it
    /// and `no_color` is not set.
    pub fn new(verbosity: u8, no_color: bool) -> Self {
        let colors =
            !no_color && console::Term::stderr().features().colors_supported();
        Self::build(verbosity, Box::new(std::io::stderr()), colors)
    }

    /// Logger writing to an arbitrary sink, without colour. Used by tests to
    /// capture output.
    pub fn with_sink(verbosity: u8, sink: Box<dyn Write + Send>) -> Self {
        Self::build(verbosity, sink, false)
    }

    fn build(verbosity: u8, out: Box<dyn Write + Send>, colors: bool) -> Self {
        Self {
            verbosity: verbosity.min(7),
            prefixes: Vec::new(),
            shared: Arc::new(Shared {
                sink: Mutex::new(SinkState {
                    out,
                    dots_open: false,
                }),
                colors,
            }),
        }
    }

    /// Returns a child logger with `prefix` appended to the prefix stack.
    pub fn with_prefix(&self, prefix: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.prefixes.push(prefix.into());
        child
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.log(Level::Info, msg.as_ref(), None);
    }

    pub fn verbose(&self, msg: impl AsRef<str>) {
        self.log(Level::Verbose, msg.as_ref(), None);
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        self.log(Level::Debug, msg.as_ref(), None);
    }

    pub fn debug2(&self, msg: impl AsRef<str>) {
        self.log(Level::Debug2, msg.as_ref(), None);
    }

    pub fn debug3(&self, msg: impl AsRef<str>) {
        self.log(Level::Debug3, msg.as_ref(), None);
    }

    /// Always emitted, green.
    pub fn success(&self, msg: impl AsRef<str>) {
        self.log(Level::Info, msg.as_ref(), Some(Paint::Green));
    }

    /// Always emitted, orange.
    pub fn warn(&self, msg: impl AsRef<str>) {
        self.log(Level::Info, msg.as_ref(), Some(Paint::Orange));
    }

    /// Always emitted, red.
    pub fn error(&self, msg: impl AsRef<str>) {
        self.log(Level::Info, msg.as_ref(), Some(Paint::Red));
    }

    /// Emits one progress dot, without a newline. Only active at verbosity 0;
    /// at higher verbosity polling loops log observed values instead.
    pub fn progress_dot(&self) {
        if self.verbosity != 0 {
            return;
        }
        let mut sink = self.shared.sink.lock().expect("log sink poisoned");
        let _ = sink.out.write_all(b".");
        let _ = sink.out.flush();
        sink.dots_open = true;
    }

    /// Terminates an open progress dot run, if any.
    pub fn progress_done(&self) {
        let mut sink = self.shared.sink.lock().expect("log sink poisoned");
        if sink.dots_open {
            let _ = sink.out.write_all(b"\n");
            let _ = sink.out.flush();
            sink.dots_open = false;
        }
    }

    fn log(&self, level: Level, msg: &str, paint: Option<Paint>) {
        if level.threshold() > self.verbosity {
            return;
        }
        let mut line = String::new();
        line.push_str(&self.timestamp());
        if self.verbosity >= 1 {
            line.push(' ');
            line.push_str(&self.paint_level(level));
        }
        for prefix in &self.prefixes {
            line.push_str(" [");
            line.push_str(prefix);
            line.push(']');
        }
        line.push(' ');
        match paint {
            Some(p) if self.shared.colors => line.push_str(&p.apply(msg)),
            _ => line.push_str(msg),
        }
        line.push('\n');

        let mut sink = self.shared.sink.lock().expect("log sink poisoned");
        if sink.dots_open {
            let _ = sink.out.write_all(b"\n");
            sink.dots_open = false;
        }
        let _ = sink.out.write_all(line.as_bytes());
        let _ = sink.out.flush();
    }

    fn timestamp(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        if self.verbosity >= 3 {
            format!("{}.{:03}", now.as_secs(), now.subsec_millis())
        } else {
            format!("{}", now.as_secs())
        }
    }

    fn paint_level(&self, level: Level) -> String {
        let name = level.name();
        if self.shared.colors && level >= Level::Debug {
            Paint::Purple.apply(name)
        } else {
            name.to_string()
        }
    }
}

/// The advisory colours used by the tool.
#[derive(Debug, Clone, Copy)]
enum Paint {
    Red,
    Purple,
    Green,
    Orange,
}

impl Paint {
    fn apply(self, text: &str) -> String {
        match self {
            Paint::Red => style(text).red().force_styling(true).to_string(),
            Paint::Purple => style(text).magenta().force_styling(true).to_string(),
            Paint::Green => style(text).green().force_styling(true).to_string(),
            Paint::Orange => style(text).color256(208).force_styling(true).to_string(),
        }
    }
}
