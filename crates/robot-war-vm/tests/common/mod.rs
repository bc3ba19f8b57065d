//! Shared harness: listing files in a temporary root, run through a deterministic playground.
#![allow(dead_code)]

use std::{fs, path::Path, time::Duration};

use robot_war_vm::{CollectStringPrint, FixedStepClock, Playground, PlaygroundConfig, SandboxId, SandboxOutcome, Value};
use tempfile::TempDir;

/// Milliseconds the playground clock advances per tick.
pub const TICK_MS: u64 = 10;

pub struct Scripts {
    dir: TempDir,
}

impl Scripts {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a listing at `relative`, creating package directories as needed.
    pub fn write(&self, relative: &str, listing: &str) -> &Self {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create package dir");
        }
        fs::write(&path, listing).expect("write listing");
        self
    }

    pub fn playground(&self) -> (Playground, CollectStringPrint) {
        let output = CollectStringPrint::new();
        let playground = Playground::new(PlaygroundConfig::new(self.root()))
            .with_writer(output.clone())
            .with_clock(FixedStepClock::new(Duration::from_millis(TICK_MS)));
        (playground, output)
    }

    /// Runs `main.py` until the playground is idle.
    pub fn run_main(&self) -> Run {
        let (mut playground, output) = self.playground();
        let main = playground.spawn_main("main.py");
        playground.run_until_idle(Some(100_000)).expect("no fatal engine error");
        Run {
            playground,
            output,
            main,
        }
    }
}

pub struct Run {
    pub playground: Playground,
    pub output: CollectStringPrint,
    pub main: SandboxId,
}

impl Run {
    pub fn outcome(&self) -> &SandboxOutcome {
        self.playground.outcome(self.main).expect("main sandbox finished")
    }

    pub fn lines(&self) -> Vec<String> {
        self.output.lines()
    }

    /// `repr` of a global of `__main__`.
    pub fn global(&self, name: &str) -> String {
        self.playground
            .global("__main__", name)
            .map(|value: Value| value.py_repr())
            .unwrap_or_else(|| panic!("__main__ has no global {name}"))
    }

    pub fn assert_exited(&self) {
        assert_eq!(
            self.outcome(),
            &SandboxOutcome::Exited(0),
            "main should exit normally; output so far: {:?}",
            self.lines()
        );
    }
}
