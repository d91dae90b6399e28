use crate::backend::LevelInfo;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

/// Everything the controllers need from the editor UI.
pub trait Frontend {
    /// Highlights one block, or clears the highlight.
    fn highlight(&mut self, block: Option<&str>);
    fn set_warning(&mut self, block: &str, message: Option<&str>);
    fn set_enabled(&mut self, block: &str, enabled: bool);
    fn set_code(&mut self, code: &str);
    fn set_status(&mut self, status: &str);
    fn set_controls_enabled(&mut self, enabled: bool);
    fn show_variables(&mut self, variables: &[(String, String)]);
    fn show_level(&mut self, level: &LevelInfo);
    fn show_position(&mut self, position: &str);
}

pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when told to; `sleep` advances it instantly.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Instant,
    pub slept: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Instant::now(),
            slept: Vec::new(),
        }
    }

    pub fn advance(&mut self, duration: Duration) {
        self.now += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now
    }

    fn sleep(&mut self, duration: Duration) {
        self.slept.push(duration);
        self.now += duration;
    }
}

/// Frontend for the command line: highlights and status go to the log, values to stdout.
#[derive(Debug, Default)]
pub struct ConsoleFrontend {
    pub quiet: bool,
}

impl Frontend for ConsoleFrontend {
    fn highlight(&mut self, block: Option<&str>) {
        if let Some(block) = block {
            info!("highlight {}", block);
        }
    }

    fn set_warning(&mut self, block: &str, message: Option<&str>) {
        if let Some(message) = message {
            warn!("block {}: {}", block, message);
        }
    }

    fn set_enabled(&mut self, block: &str, enabled: bool) {
        if !enabled {
            info!("block {} disabled", block);
        }
    }

    fn set_code(&mut self, code: &str) {
        if !self.quiet {
            println!("{}", code);
        }
    }

    fn set_status(&mut self, status: &str) {
        eprintln!("{}", status);
    }

    fn set_controls_enabled(&mut self, _enabled: bool) {}

    fn show_variables(&mut self, variables: &[(String, String)]) {
        for (name, value) in variables {
            println!("{} = {}", name, value);
        }
    }

    fn show_level(&mut self, level: &LevelInfo) {
        if level.blocked.is_empty() {
            println!("level {}", level.name);
        } else {
            println!("level {} (blocked: {})", level.name, level.blocked.join(", "));
        }
    }

    fn show_position(&mut self, position: &str) {
        println!("hero at {}", position.trim());
    }
}

/// Frontend that remembers what it was told.
#[derive(Debug, Default)]
pub struct RecordingFrontend {
    pub highlighted: Option<String>,
    pub highlight_history: Vec<Option<String>>,
    pub warnings: BTreeMap<String, String>,
    pub disabled: BTreeSet<String>,
    pub code: String,
    pub statuses: Vec<String>,
    pub controls_enabled: bool,
    pub variables: Vec<(String, String)>,
    pub level: Option<LevelInfo>,
    pub position: Option<String>,
}

impl RecordingFrontend {
    pub fn new() -> Self {
        Self {
            controls_enabled: true,
            ..Self::default()
        }
    }

    pub fn last_status(&self) -> Option<&str> {
        self.statuses.last().map(String::as_str)
    }
}

impl Frontend for RecordingFrontend {
    fn highlight(&mut self, block: Option<&str>) {
        self.highlighted = block.map(str::to_string);
        self.highlight_history.push(self.highlighted.clone());
    }

    fn set_warning(&mut self, block: &str, message: Option<&str>) {
        match message {
            Some(message) => {
                self.warnings.insert(block.to_string(), message.to_string());
            }
            None => {
                self.warnings.remove(block);
            }
        }
    }

    fn set_enabled(&mut self, block: &str, enabled: bool) {
        if enabled {
            self.disabled.remove(block);
        } else {
            self.disabled.insert(block.to_string());
        }
    }

    fn set_code(&mut self, code: &str) {
        self.code = code.to_string();
    }

    fn set_status(&mut self, status: &str) {
        self.statuses.push(status.to_string());
    }

    fn set_controls_enabled(&mut self, enabled: bool) {
        self.controls_enabled = enabled;
    }

    fn show_variables(&mut self, variables: &[(String, String)]) {
        self.variables = variables.to_vec();
    }

    fn show_level(&mut self, level: &LevelInfo) {
        self.level = Some(level.clone());
    }

    fn show_position(&mut self, position: &str) {
        self.position = Some(position.to_string());
    }
}
