use std::fmt;
use std::sync::Mutex;

use log::Level;

/// Per-invocation log handle passed to every prober.
///
/// Lines are tagged with the module and target being probed and forwarded
/// to the `log` facade. When created with [`ProbeLogger::capturing`] the
/// lines are also kept, so the caller can hand them back as the debug
/// output of a single scrape.
#[derive(Debug)]
pub struct ProbeLogger {
    module: String,
    target: String,
    captured: Option<Mutex<Vec<String>>>,
}

impl ProbeLogger {
    pub fn new(module: &str, target: &str) -> Self {
        ProbeLogger {
            module: module.to_string(),
            target: target.to_string(),
            captured: None,
        }
    }

    pub fn capturing(module: &str, target: &str) -> Self {
        ProbeLogger {
            captured: Some(Mutex::new(Vec::new())),
            ..Self::new(module, target)
        }
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(level, "module={} target={} {}", self.module, self.target, args);
        if let Some(lines) = &self.captured {
            if let Ok(mut lines) = lines.lock() {
                lines.push(format!("level={} {}", level.as_str().to_lowercase(), args));
            }
        }
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    /// Lines retained so far; empty unless the logger is capturing.
    pub fn lines(&self) -> Vec<String> {
        self.captured
            .as_ref()
            .and_then(|lines| lines.lock().ok().map(|l| l.clone()))
            .unwrap_or_default()
    }
}
