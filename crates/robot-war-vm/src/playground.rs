//! The cooperative scheduler that owns every sandbox of one agent.
//!
//! A [`Playground`] holds three pools: ready sandboxes, stepped round-robin within each tick;
//! workers, sandboxes blocked on a [`Resumable`] polled once per tick; and parked sandboxes,
//! waiting for a [`crate::Waiter`] to wake them. All shared state (module cache, agent object,
//! clock, print output) lives in [`Env`], which instructions borrow for the duration of one step.

use std::{fmt, path::Path, rc::Rc, task::Poll, time::Duration};

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;
use serde::Serialize;

use crate::{
    api::{api_modules, ApiObject, Resumable},
    bytecode::{
        vm::{SandBox, StepOutcome},
        ListingCompiler, ModuleCompiler,
    },
    clock::{Clock, SystemClock},
    config::PlaygroundConfig,
    error::EngineError,
    exception_public::ExceptionRecord,
    io::{PrintWriter, StdPrint},
    module::Module,
    value::Value,
};

/// Identifies one sandbox within its playground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SandboxId(u32);

impl SandboxId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a sandbox ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SandboxOutcome {
    /// The bootstrap call returned; holds the `repr` of the value.
    Returned(String),
    /// `SystemExit` reached the top of the stack.
    Exited(i64),
    /// An exception escaped the outermost frame.
    Failed(ExceptionRecord),
    /// The script misused the capability API in a way that cannot be caught.
    Fatal(String),
}

/// Scheduler work requested from inside a step, applied once the step is over.
#[derive(Debug)]
pub(crate) enum Pending {
    Spawn {
        sandbox: SandboxId,
        callable: Value,
        args: Vec<Value>,
    },
    Wake {
        sandbox: SandboxId,
        value: Value,
    },
}

/// State shared by every sandbox of a playground.
pub(crate) struct Env {
    pub(crate) config: PlaygroundConfig,
    /// Loaded script modules by dotted name; doubles as the import cycle guard.
    pub(crate) modules: AHashMap<String, Rc<Module>>,
    pub(crate) api_modules: AHashMap<String, Rc<Module>>,
    pub(crate) compiler: Box<dyn ModuleCompiler>,
    pub(crate) writer: Box<dyn PrintWriter>,
    pub(crate) clock: Rc<dyn Clock>,
    /// The agent object, once a class deriving from an agent class has been built.
    pub(crate) robot: Option<Rc<dyn ApiObject>>,
    /// Owner of engine-synthesized code; frames running it are hidden from tracebacks.
    pub(crate) engine_module: Rc<Module>,
    next_id: u32,
    pending: Vec<Pending>,
}

impl Env {
    pub(crate) fn new(config: PlaygroundConfig) -> Self {
        let api_modules = api_modules(&config.api_namespace);
        Self {
            config,
            modules: AHashMap::new(),
            api_modules,
            compiler: Box::new(ListingCompiler),
            writer: Box::new(StdPrint),
            clock: Rc::new(SystemClock::new()),
            robot: None,
            engine_module: Module::new("<engine>", None, false),
            next_id: 1,
            pending: Vec::new(),
        }
    }

    fn next_sandbox_id(&mut self) -> SandboxId {
        let id = SandboxId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Reserves an id for `callable(*args)`; the sandbox starts after the current step.
    pub(crate) fn spawn(&mut self, callable: Value, args: Vec<Value>) -> SandboxId {
        let sandbox = self.next_sandbox_id();
        self.pending.push(Pending::Spawn { sandbox, callable, args });
        sandbox
    }

    /// Requests that a parked sandbox resume with `value` as its call result.
    pub(crate) fn wake(&mut self, sandbox: SandboxId, value: Value) {
        self.pending.push(Pending::Wake { sandbox, value });
    }

    pub(crate) fn take_pending(&mut self) -> Vec<Pending> {
        std::mem::take(&mut self.pending)
    }
}

/// Scheduler and namespace owner for every sandbox of one agent.
///
/// # Example
/// ```no_run
/// use robot_war_vm::{Playground, PlaygroundConfig};
///
/// let mut playground = Playground::new(PlaygroundConfig::new("scripts"));
/// let main = playground.spawn_main("main.py");
/// playground.run_until_idle(None).unwrap();
/// println!("{:?}", playground.outcome(main));
/// ```
pub struct Playground {
    env: Env,
    sandboxes: AHashMap<SandboxId, SandBox>,
    ready: Vec<SandboxId>,
    workers: Vec<(SandboxId, Box<dyn Resumable>)>,
    parked: AHashSet<SandboxId>,
    outcomes: IndexMap<SandboxId, SandboxOutcome>,
}

impl fmt::Debug for Playground {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Playground")
            .field("root_path", &self.env.config.root_path)
            .field("ready", &self.ready)
            .field("workers", &self.workers.len())
            .field("parked", &self.parked.len())
            .field("finished", &self.outcomes.len())
            .finish_non_exhaustive()
    }
}

impl Playground {
    /// A playground reading text listings, printing to stdout and timed by the system clock.
    #[must_use]
    pub fn new(config: PlaygroundConfig) -> Self {
        Self {
            env: Env::new(config),
            sandboxes: AHashMap::new(),
            ready: Vec::new(),
            workers: Vec::new(),
            parked: AHashSet::new(),
            outcomes: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_compiler(mut self, compiler: impl ModuleCompiler + 'static) -> Self {
        self.env.compiler = Box::new(compiler);
        self
    }

    #[must_use]
    pub fn with_writer(mut self, writer: impl PrintWriter + 'static) -> Self {
        self.env.writer = Box::new(writer);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.env.clock = Rc::new(clock);
        self
    }

    #[must_use]
    pub fn config(&self) -> &PlaygroundConfig {
        &self.env.config
    }

    // ========================================================================
    // Spawning
    // ========================================================================

    /// Starts the main program at `path` (relative paths are taken from the root) as `__main__`.
    pub fn spawn_main(&mut self, path: impl AsRef<Path>) -> SandboxId {
        let path = path.as_ref();
        let path = if path.is_relative() {
            self.env.config.root_path.join(path)
        } else {
            path.to_path_buf()
        };
        let id = self.env.next_sandbox_id();
        let sandbox = SandBox::launch(id, &self.env, &path.to_string_lossy());
        tracing::info!(sandbox = %id, path = %path.display(), "main program started");
        self.start(sandbox);
        id
    }

    /// Starts `callable(*args)` in a new sandbox.
    pub fn spawn_call(&mut self, callable: Value, args: Vec<Value>) -> SandboxId {
        let id = self.env.next_sandbox_id();
        let sandbox = SandBox::spawn(id, &self.env, callable, args);
        tracing::info!(sandbox = %id, "sandbox spawned");
        self.start(sandbox);
        id
    }

    fn start(&mut self, sandbox: SandBox) {
        let id = sandbox.id();
        self.sandboxes.insert(id, sandbox);
        self.ready.push(id);
    }

    /// Resumes a parked sandbox with `value` as the result of its blocking call.
    pub fn wake(&mut self, sandbox: SandboxId, value: Value) -> Result<(), EngineError> {
        if !self.parked.contains(&sandbox) {
            return Err(EngineError::UnknownSandbox(sandbox.get()));
        }
        self.env.wake(sandbox, value);
        self.process_pending();
        Ok(())
    }

    fn process_pending(&mut self) {
        for pending in self.env.take_pending() {
            match pending {
                Pending::Spawn { sandbox, callable, args } => {
                    let sandbox = SandBox::spawn(sandbox, &self.env, callable, args);
                    tracing::info!(sandbox = %sandbox.id(), "sandbox spawned");
                    self.start(sandbox);
                }
                Pending::Wake { sandbox, value } => {
                    if !self.parked.remove(&sandbox) {
                        tracing::warn!(%sandbox, "wake for a sandbox that is not parked");
                        continue;
                    }
                    if let Some(target) = self.sandboxes.get_mut(&sandbox) {
                        target.resume_with(value);
                        self.ready.push(sandbox);
                        tracing::trace!(%sandbox, "woken");
                    }
                }
            }
        }
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Polls every worker once; completed ones rejoin the ready pool with their result.
    pub fn advance_workers(&mut self) {
        let workers = std::mem::take(&mut self.workers);
        for (id, mut resumable) in workers {
            match resumable.resume() {
                Poll::Ready(value) => {
                    if let Some(sandbox) = self.sandboxes.get_mut(&id) {
                        sandbox.resume_with(value);
                        self.ready.push(id);
                        tracing::trace!(sandbox = %id, "worker finished");
                    }
                }
                Poll::Pending => self.workers.push((id, resumable)),
            }
        }
    }

    /// Executes one instruction of every ready sandbox, in start order.
    ///
    /// Sandboxes started or woken during this pass join the ready pool after it. Every ready
    /// sandbox is stepped even when one ends fatally; the first fatal error is returned.
    pub fn step_ready(&mut self) -> Result<(), EngineError> {
        let current = std::mem::take(&mut self.ready);
        let mut still_ready = Vec::with_capacity(current.len());
        let mut fatal = None;

        for id in current {
            let Some(sandbox) = self.sandboxes.get_mut(&id) else {
                continue;
            };
            match sandbox.step(&mut self.env) {
                StepOutcome::Running => still_ready.push(id),
                StepOutcome::Blocked(resumable) => self.workers.push((id, resumable)),
                StepOutcome::Parked => {
                    self.parked.insert(id);
                }
                StepOutcome::Finished(outcome) => {
                    if let SandboxOutcome::Fatal(message) = &outcome {
                        fatal.get_or_insert_with(|| EngineError::Fatal {
                            sandbox: id.get(),
                            message: message.clone(),
                        });
                    }
                    self.finish(id, outcome);
                }
            }
            self.process_pending();
        }

        still_ready.append(&mut self.ready);
        self.ready = still_ready;
        fatal.map_or(Ok(()), Err)
    }

    fn finish(&mut self, id: SandboxId, outcome: SandboxOutcome) {
        self.sandboxes.remove(&id);
        match &outcome {
            SandboxOutcome::Returned(value) => tracing::info!(sandbox = %id, %value, "sandbox returned"),
            SandboxOutcome::Exited(code) => tracing::info!(sandbox = %id, code, "sandbox exited"),
            SandboxOutcome::Failed(record) => {
                tracing::info!(sandbox = %id, exc_type = %record.exc_type, "sandbox failed");
            }
            SandboxOutcome::Fatal(message) => tracing::warn!(sandbox = %id, %message, "sandbox stopped"),
        }
        self.outcomes.insert(id, outcome);
    }

    /// One scheduler tick: advance the clock, poll the workers, then step the ready sandboxes
    /// round by round until each has blocked, parked or finished, or the round budget runs out.
    ///
    /// Every sandbox started during the tick sees the same clock reading, so sleeps begun in
    /// one tick expire in deadline order.
    pub fn tick(&mut self) -> Result<(), EngineError> {
        self.env.clock.tick();
        self.advance_workers();
        for _ in 0..self.env.config.max_rounds_per_tick.max(1) {
            if self.ready.is_empty() {
                break;
            }
            self.step_ready()?;
        }
        Ok(())
    }

    /// Ticks until nothing is ready or blocked, or `max_ticks` (default from the config) pass.
    ///
    /// Returns the number of ticks run. Parked sandboxes do not keep the playground busy.
    pub fn run_until_idle(&mut self, max_ticks: Option<usize>) -> Result<usize, EngineError> {
        let max_ticks = max_ticks.unwrap_or(self.env.config.max_ticks_per_run);
        let mut ticks = 0;
        while ticks < max_ticks && !self.is_idle() {
            self.tick()?;
            ticks += 1;
        }
        tracing::debug!(ticks, idle = self.is_idle(), "run finished");
        Ok(ticks)
    }

    /// Ticks until `duration` has passed on the playground clock or the playground is idle.
    pub fn run_for(&mut self, duration: Duration) -> Result<usize, EngineError> {
        let deadline = self.env.clock.now() + duration;
        let mut ticks = 0;
        while self.env.clock.now() < deadline && !self.is_idle() {
            self.tick()?;
            ticks += 1;
        }
        Ok(ticks)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.workers.is_empty()
    }

    #[must_use]
    pub fn outcome(&self, sandbox: SandboxId) -> Option<&SandboxOutcome> {
        self.outcomes.get(&sandbox)
    }

    /// Outcomes of finished sandboxes, in the order they finished.
    pub fn outcomes(&self) -> impl Iterator<Item = (SandboxId, &SandboxOutcome)> {
        self.outcomes.iter().map(|(id, outcome)| (*id, outcome))
    }

    /// Sandboxes waiting on a waiter.
    #[must_use]
    pub fn parked(&self) -> Vec<SandboxId> {
        let mut parked: Vec<SandboxId> = self.parked.iter().copied().collect();
        parked.sort_unstable();
        parked
    }

    /// The agent object bound by the script, if any.
    #[must_use]
    pub fn robot(&self) -> Option<Rc<dyn ApiObject>> {
        self.env.robot.clone()
    }

    /// A loaded script module by dotted name.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<Rc<Module>> {
        self.env.modules.get(name).cloned()
    }

    /// A global of a loaded module.
    #[must_use]
    pub fn global(&self, module: &str, name: &str) -> Option<Value> {
        self.env.modules.get(module)?.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::NativeFn,
        args::ArgValues,
        builtins::Builtins,
    };

    #[test]
    fn ids_are_sequential() {
        let mut env = Env::new(PlaygroundConfig::default());
        let first = env.spawn(Value::None, Vec::new());
        let second = env.spawn(Value::None, Vec::new());
        assert_eq!((first.get(), second.get()), (1, 2));
        assert_eq!(env.take_pending().len(), 2);
        assert!(env.take_pending().is_empty());
    }

    #[test]
    fn spawn_call_runs_builtins() {
        let mut playground = Playground::new(PlaygroundConfig::default());
        let Some(len) = Builtins::lookup("len") else {
            panic!("len is a builtin");
        };
        let id = playground.spawn_call(len, vec![Value::from("abc")]);
        playground.run_until_idle(Some(10)).unwrap();
        assert_eq!(playground.outcome(id), Some(&SandboxOutcome::Returned("3".to_owned())));
        assert!(playground.is_idle());
    }

    #[test]
    fn one_tick_runs_rounds_until_nothing_is_ready() {
        let Some(len) = Builtins::lookup("len") else {
            panic!("len is a builtin");
        };
        let mut playground = Playground::new(PlaygroundConfig::default());
        let id = playground.spawn_call(len.clone(), vec![Value::from("abc")]);
        assert_eq!(playground.run_until_idle(Some(10)).unwrap(), 1);
        assert!(playground.outcome(id).is_some());

        // LOAD_FAST, LOAD_FAST, CALL_FUNCTION, RETURN_VALUE: one instruction per tick
        let mut single = Playground::new(PlaygroundConfig::default().with_max_rounds_per_tick(1));
        let id = single.spawn_call(len, vec![Value::from("abc")]);
        assert_eq!(single.run_until_idle(Some(10)).unwrap(), 4);
        assert_eq!(single.outcome(id), Some(&SandboxOutcome::Returned("3".to_owned())));
    }

    #[test]
    fn spawn_call_reports_failures() {
        fn boom(_cx: &mut crate::api::NativeCx<'_>, _args: ArgValues) -> Result<crate::api::NativeReturn, crate::api::NativeError> {
            Err(crate::exception_private::ExcType::ValueError.msg("boom").into())
        }
        let mut playground = Playground::new(PlaygroundConfig::default());
        let id = playground.spawn_call(NativeFn::value("boom", boom), Vec::new());
        playground.run_until_idle(Some(10)).unwrap();
        match playground.outcome(id) {
            Some(SandboxOutcome::Failed(record)) => {
                assert_eq!(record.exc_type, "ValueError");
                assert_eq!(record.message, "boom");
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn waking_an_unknown_sandbox_is_an_error() {
        let mut playground = Playground::new(PlaygroundConfig::default());
        let err = playground.wake(SandboxId::new(9), Value::None).unwrap_err();
        assert!(matches!(err, EngineError::UnknownSandbox(9)), "{err}");
    }
}
