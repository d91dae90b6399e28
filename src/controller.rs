use crate::backend::{Backend, LevelInfo, RemoteStatus, StartOutcome, SubmitOutcome, TransportError};
use crate::block::{BlockId, BlockKind};
use crate::codegen::{GeneratedProgram, GenerationError, Generator};
use crate::config::Config;
use crate::diagnostics::{anchor, is_already_running, parse_diagnostics, DEFAULT_WRAPPER_LINE_OFFSET};
use crate::frontend::{Clock, Frontend};
use crate::graph::BlockGraph;
use crate::interpreter::{
    CompileError, Host, Machine, Program, RuntimeError, StepEvent, DEFAULT_INSTRUCTION_BUDGET,
};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub enum ControllerError {
    NoProgram,
    Generation(GenerationError),
    Compile(CompileError),
    Runtime(RuntimeError),
    Transport(TransportError),
    /// A run is already in flight; the request was not queued.
    AlreadyRunning,
    Rejected(String),
    Timeout(Duration),
    CoolingDown(Duration),
    NotLoaded,
}

impl Display for ControllerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerError::NoProgram => f.write_str("No program: the workspace has no start block."),
            ControllerError::Generation(err) => write!(f, "{}", err),
            ControllerError::Compile(err) => write!(f, "Compile error: {}", err),
            ControllerError::Runtime(err) => write!(f, "Runtime error: {}", err),
            ControllerError::Transport(err) => write!(f, "{}", err),
            ControllerError::AlreadyRunning => {
                f.write_str("A program is already running. Stop it before starting another.")
            }
            ControllerError::Rejected(body) => write!(f, "The backend rejected the program: {}", body),
            ControllerError::Timeout(limit) => {
                write!(f, "The program did not finish within {} ms.", limit.as_millis())
            }
            ControllerError::CoolingDown(left) => {
                write!(f, "Stepping is paused for another {} ms.", left.as_millis())
            }
            ControllerError::NotLoaded => f.write_str("No program is loaded."),
        }
    }
}

impl Error for ControllerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ControllerError::Generation(err) => Some(err),
            ControllerError::Compile(err) => Some(err),
            ControllerError::Runtime(err) => Some(err),
            ControllerError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GenerationError> for ControllerError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::NoProgram => ControllerError::NoProgram,
            other => ControllerError::Generation(other),
        }
    }
}

impl From<TransportError> for ControllerError {
    fn from(err: TransportError) -> Self {
        ControllerError::Transport(err)
    }
}

/// Pushes one generation pass to the editor: orphaned and level-restricted blocks are
/// disabled, and every block shows exactly the warnings of this pass.
pub fn sync_workspace(
    graph: &BlockGraph,
    program: &GeneratedProgram,
    frontend: &mut dyn Frontend,
    disabled_types: &HashSet<String>,
) {
    let orphans = graph
        .orphans()
        .into_iter()
        .map(|b| b.id.as_str())
        .collect::<HashSet<_>>();
    for block in graph.blocks() {
        let enabled = block.enabled
            && !orphans.contains(block.id.as_str())
            && !disabled_types.contains(&block.type_name);
        frontend.set_enabled(&block.id, enabled);
        frontend.set_warning(&block.id, program.warning_for(&block.id).as_deref());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalState {
    Idle,
    Loaded,
    Stepping,
    Completed,
    Errored(String),
}

/// Runs generated code in the embedded interpreter, one highlighted block per step.
pub struct LocalController<H: Host, C: Clock> {
    generator: Generator,
    host: H,
    clock: C,
    budget: usize,
    cooldown: Duration,
    state: LocalState,
    machine: Option<Machine>,
    program: Option<GeneratedProgram>,
    cooldown_until: Option<Instant>,
}

impl<H: Host, C: Clock> LocalController<H, C> {
    pub fn new(generator: Generator, host: H, clock: C) -> Self {
        Self {
            generator,
            host,
            clock,
            budget: DEFAULT_INSTRUCTION_BUDGET,
            cooldown: Duration::from_millis(2_000),
            state: LocalState::Idle,
            machine: None,
            program: None,
            cooldown_until: None,
        }
    }

    pub fn from_config(generator: Generator, host: H, clock: C, config: &Config) -> Self {
        Self::new(generator, host, clock)
            .with_instruction_budget(config.instruction_budget)
            .with_cooldown(config.completion_cooldown())
    }

    pub fn with_instruction_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn state(&self) -> &LocalState {
        &self.state
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn program(&self) -> Option<&GeneratedProgram> {
        self.program.as_ref()
    }

    pub fn load(&mut self, graph: &BlockGraph, frontend: &mut dyn Frontend) -> Result<(), ControllerError> {
        self.discard();
        frontend.highlight(None);
        let program = match self.generator.generate(graph) {
            Ok(program) => program,
            Err(err) => {
                let err = ControllerError::from(err);
                frontend.set_status(&err.to_string());
                return Err(err);
            }
        };
        sync_workspace(graph, &program, frontend, &self.generator.options().disabled_types);
        let code = program.code();
        frontend.set_code(&code);
        let compiled = Program::from_source(&code);
        self.program = Some(program);
        match compiled {
            Ok(compiled) => {
                info!("Loaded {} instructions", compiled.len());
                self.machine = Some(Machine::new(compiled, self.budget));
                self.state = LocalState::Loaded;
                frontend.set_status("Program loaded.");
                Ok(())
            }
            Err(err) => {
                self.fail(err.to_string(), Some(err.pos.line), frontend);
                Err(ControllerError::Compile(err))
            }
        }
    }

    /// Runs until the next block reports itself, the program ends, or it faults.
    pub fn step(&mut self, frontend: &mut dyn Frontend) -> Result<LocalState, ControllerError> {
        if let Some(left) = self.cooldown_left() {
            return Err(ControllerError::CoolingDown(left));
        }
        let Some(machine) = self.machine.as_mut() else {
            return Err(ControllerError::NotLoaded);
        };
        match machine.step(&mut self.host) {
            Ok(StepEvent::Highlight(block)) => {
                debug!("paused at block {}", block);
                frontend.highlight(Some(&block));
                self.state = LocalState::Stepping;
            }
            Ok(StepEvent::Completed) => {
                let variables = machine.variables();
                self.machine = None;
                self.state = LocalState::Completed;
                self.cooldown_until = Some(self.clock.now() + self.cooldown);
                frontend.highlight(None);
                frontend.show_variables(&variables);
                frontend.set_controls_enabled(false);
                frontend.set_status("Program finished.");
                info!("local run completed");
            }
            Err(err) => {
                self.fail(err.to_string(), err.pos.map(|p| p.line), frontend);
                return Err(ControllerError::Runtime(err));
            }
        }
        Ok(self.state.clone())
    }

    /// Steps until the program ends or `max_steps` steps were taken.
    pub fn run(&mut self, frontend: &mut dyn Frontend, max_steps: usize) -> Result<LocalState, ControllerError> {
        for _ in 0..max_steps {
            if self.step(frontend)? != LocalState::Stepping {
                break;
            }
        }
        Ok(self.state.clone())
    }

    /// Re-enables the step control once the completion cooldown has passed.
    pub fn poll_cooldown(&mut self, frontend: &mut dyn Frontend) -> bool {
        match self.cooldown_until {
            Some(_) if self.cooldown_left().is_none() => {
                self.cooldown_until = None;
                frontend.set_controls_enabled(true);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    pub fn reset(&mut self, frontend: &mut dyn Frontend) {
        self.discard();
        self.cooldown_until = None;
        self.state = LocalState::Idle;
        frontend.highlight(None);
        frontend.set_controls_enabled(true);
    }

    fn discard(&mut self) {
        self.machine = None;
        self.program = None;
    }

    fn cooldown_left(&self) -> Option<Duration> {
        let until = self.cooldown_until?;
        let now = self.clock.now();
        (now < until).then(|| until - now)
    }

    fn fail(&mut self, message: String, line: Option<usize>, frontend: &mut dyn Frontend) {
        warn!("local run failed: {}", message);
        self.machine = None;
        self.state = LocalState::Errored(message.clone());
        frontend.highlight(None);
        let block = line.and_then(|line| self.program.as_ref()?.block_for_line(line));
        if let Some(block) = block {
            frontend.set_warning(block, Some(&message));
        }
        frontend.set_status(&message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    Idle,
    Dispatching,
    Running,
    Completed,
    Errored(String),
    Interrupted,
}

impl RemoteState {
    pub fn in_flight(&self) -> bool {
        matches!(self, RemoteState::Dispatching | RemoteState::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub poll_interval: Duration,
    pub max_poll_duration: Duration,
    pub step_delay: Duration,
    pub sleep_per_line_ms: Option<u64>,
    pub wrapper_line_offset: usize,
    /// Submit concatenated single-block fragments instead of the whole program.
    pub per_block: bool,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings::from(&Config::default())
    }
}

impl From<&Config> for RemoteSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_poll_duration: config.max_poll_duration(),
            step_delay: config.step_delay(),
            sleep_per_line_ms: config.sleep_per_line_ms,
            wrapper_line_offset: config.wrapper_line_offset,
            per_block: config.per_block,
        }
    }
}

/// Result of one remote single-block step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStep {
    /// The start block was highlighted; nothing was sent.
    Highlighted(BlockId),
    Executed(BlockId),
    /// Every block has run; the next step starts over.
    Finished,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    Start,
    At(BlockId),
    Done,
}

/// Drives a remote backend: whole-program runs with polling, block-by-block dispatch,
/// and single-block stepping.
pub struct RemoteController<B: Backend, C: Clock> {
    generator: Generator,
    backend: B,
    clock: C,
    settings: RemoteSettings,
    state: RemoteState,
    program: Option<GeneratedProgram>,
    started_at: Option<Instant>,
    cursor: Cursor,
    first_dispatch: bool,
    variables: Vec<(String, String)>,
}

impl<B: Backend, C: Clock> RemoteController<B, C> {
    pub fn new(generator: Generator, backend: B, clock: C, settings: RemoteSettings) -> Self {
        Self {
            generator,
            backend,
            clock,
            settings,
            state: RemoteState::Idle,
            program: None,
            started_at: None,
            cursor: Cursor::Start,
            first_dispatch: true,
            variables: Vec::new(),
        }
    }

    pub fn state(&self) -> &RemoteState {
        &self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn program(&self) -> Option<&GeneratedProgram> {
        self.program.as_ref()
    }

    /// Last variables shown; kept when a refresh fails.
    pub fn variables(&self) -> &[(String, String)] {
        &self.variables
    }

    /// Submits the program. The run continues on the backend; see [`Self::poll`].
    pub fn start(&mut self, graph: &BlockGraph, frontend: &mut dyn Frontend) -> Result<RemoteState, ControllerError> {
        if self.state.in_flight() {
            warn!("start rejected: a run is already in flight");
            return Err(ControllerError::AlreadyRunning);
        }
        self.release(frontend);

        let mut program = self.generate(graph, frontend)?;
        if self.settings.per_block {
            // Diagnostics must be anchored against the text that was actually submitted.
            program = self.generator.fragments(graph)?;
        }
        let code = program.code();
        frontend.set_code(&code);
        self.program = Some(program);

        self.state = RemoteState::Dispatching;
        frontend.set_controls_enabled(false);
        info!("submitting {} bytes of code", code.len());
        let outcome = match self.backend.submit_code(&code, self.settings.sleep_per_line_ms) {
            Ok(outcome) => outcome,
            Err(err) => return Err(self.transport_failed(err, frontend)),
        };
        match outcome {
            SubmitOutcome::Accepted(message) => {
                debug!("backend accepted: {}", message.trim());
                self.state = RemoteState::Running;
                self.started_at = Some(self.clock.now());
                frontend.set_status("Running...");
                Ok(self.state.clone())
            }
            SubmitOutcome::Rejected(body) if is_already_running(&body) => {
                self.state = RemoteState::Idle;
                frontend.set_controls_enabled(true);
                let err = ControllerError::AlreadyRunning;
                frontend.set_status(&err.to_string());
                Err(err)
            }
            SubmitOutcome::Rejected(body) => {
                self.report_remote_error(&body, frontend);
                Err(ControllerError::Rejected(body))
            }
        }
    }

    /// Checks the backend once and moves to a terminal state when the run has ended.
    pub fn poll(&mut self, frontend: &mut dyn Frontend) -> Result<RemoteState, ControllerError> {
        if self.state != RemoteState::Running {
            return Ok(self.state.clone());
        }
        let status = match self.backend.status() {
            Ok(status) => status,
            Err(err) => return Err(self.transport_failed(err, frontend)),
        };
        match status {
            RemoteStatus::Running => {
                let elapsed = self
                    .started_at
                    .map_or(Duration::ZERO, |at| self.clock.now().saturating_duration_since(at));
                if elapsed >= self.settings.max_poll_duration {
                    warn!("run exceeded {:?}; stopping it", self.settings.max_poll_duration);
                    if let Err(err) = self.backend.stop_code() {
                        warn!("stop after timeout failed: {}", err);
                    }
                    let err = ControllerError::Timeout(self.settings.max_poll_duration);
                    self.state = RemoteState::Errored(err.to_string());
                    frontend.highlight(None);
                    frontend.set_controls_enabled(true);
                    frontend.set_status(&err.to_string());
                    return Err(err);
                }
            }
            RemoteStatus::Completed => self.complete(frontend),
            RemoteStatus::Error(message) => self.report_remote_error(&message, frontend),
        }
        Ok(self.state.clone())
    }

    /// Polls until the run ends, sleeping `poll_interval` between checks.
    pub fn run_to_completion(&mut self, frontend: &mut dyn Frontend) -> Result<RemoteState, ControllerError> {
        loop {
            match self.poll(frontend)? {
                RemoteState::Running => self.clock.sleep(self.settings.poll_interval),
                other => return Ok(other),
            }
        }
    }

    /// Sends the program one block at a time, highlighting each block before it runs.
    pub fn run_blocks(&mut self, graph: &BlockGraph, frontend: &mut dyn Frontend) -> Result<RemoteState, ControllerError> {
        if self.state.in_flight() {
            return Err(ControllerError::AlreadyRunning);
        }
        self.release(frontend);
        let root = graph.root().ok_or(ControllerError::NoProgram)?.id.clone();
        let program = self.generate(graph, frontend)?;
        let fragments = self.generator.fragments(graph)?.fragments;
        frontend.set_code(&program.code());
        self.program = Some(program);

        self.state = RemoteState::Running;
        frontend.set_controls_enabled(false);
        frontend.highlight(Some(&root));
        let mut first = true;
        let total = fragments.len();
        for (i, fragment) in fragments.iter().enumerate() {
            let is_function = graph
                .get(&fragment.block)
                .is_some_and(|b| b.kind == BlockKind::FunctionDef);
            if !is_function {
                frontend.highlight(Some(&fragment.block));
            }
            let outcome = match self.backend.start(&fragment.code, first) {
                Ok(outcome) => outcome,
                Err(err) => return Err(self.transport_failed(err, frontend)),
            };
            first = false;
            match outcome {
                StartOutcome::Accepted => {
                    if !is_function && i + 1 < total {
                        self.clock.sleep(self.settings.step_delay);
                    }
                }
                StartOutcome::Interrupted => {
                    info!("dispatch interrupted at block {}", fragment.block);
                    self.state = RemoteState::Interrupted;
                    frontend.set_status("Program interrupted.");
                    break;
                }
                StartOutcome::Rejected(body) => {
                    let message = format!("Error while running the program: {}", body.trim());
                    frontend.set_warning(&fragment.block, Some(&message));
                    frontend.set_status(&message);
                    self.state = RemoteState::Errored(body);
                    break;
                }
            }
        }
        self.clear_backend(frontend);
        frontend.highlight(None);
        frontend.set_controls_enabled(true);
        if self.state == RemoteState::Running {
            self.complete(frontend);
        }
        Ok(self.state.clone())
    }

    /// Executes the block under the step cursor and advances it.
    pub fn step(&mut self, graph: &BlockGraph, frontend: &mut dyn Frontend) -> Result<RemoteStep, ControllerError> {
        if self.state.in_flight() {
            return Err(ControllerError::AlreadyRunning);
        }
        let root = graph.root().ok_or(ControllerError::NoProgram)?;
        let chain = graph.chain_after(&root.id);
        let next_after = |id: &str| -> Cursor {
            let pos = chain.iter().position(|b| b.id == id);
            match pos.and_then(|p| chain.get(p + 1)) {
                Some(block) => Cursor::At(block.id.clone()),
                None => Cursor::Done,
            }
        };

        match self.cursor.clone() {
            Cursor::Done => {
                self.restart_steps(frontend);
                frontend.set_status("All steps executed.");
                Ok(RemoteStep::Finished)
            }
            Cursor::Start => {
                frontend.highlight(Some(&root.id));
                self.cursor = match chain.first() {
                    Some(block) => Cursor::At(block.id.clone()),
                    None => Cursor::Done,
                };
                Ok(RemoteStep::Highlighted(root.id.clone()))
            }
            Cursor::At(id) => {
                if graph.get(&id).is_none() {
                    // The block was deleted since the last step.
                    self.restart_steps(frontend);
                    return Ok(RemoteStep::Finished);
                }
                frontend.highlight(Some(&id));
                let program = self.generate(graph, frontend)?;
                let pieces = self.generator.fragments(graph)?;
                let mut code = String::new();
                if self.first_dispatch {
                    for def in graph.function_definitions() {
                        if let Some(fragment) = pieces.fragment_for(&def.id) {
                            code.push_str(&fragment.code);
                            code.push('\n');
                        }
                    }
                }
                let Some(fragment) = pieces.fragment_for(&id) else {
                    debug!("block {} has no code; skipping", id);
                    self.cursor = next_after(&id);
                    return Ok(RemoteStep::Executed(id));
                };
                code.push_str(&fragment.code);
                self.program = Some(program);
                frontend.set_controls_enabled(false);
                let outcome = match self.backend.start(&code, self.first_dispatch) {
                    Ok(outcome) => outcome,
                    Err(err) => return Err(self.transport_failed(err, frontend)),
                };
                frontend.set_controls_enabled(true);
                match outcome {
                    StartOutcome::Accepted => {
                        self.first_dispatch = false;
                        self.cursor = next_after(&id);
                        Ok(RemoteStep::Executed(id))
                    }
                    StartOutcome::Interrupted => {
                        self.restart_steps(frontend);
                        self.state = RemoteState::Interrupted;
                        frontend.set_status("Program interrupted.");
                        Ok(RemoteStep::Interrupted)
                    }
                    StartOutcome::Rejected(body) => {
                        self.restart_steps(frontend);
                        let message = format!("Error while running the program: {}", body.trim());
                        frontend.set_warning(&id, Some(&message));
                        frontend.set_status(&message);
                        self.state = RemoteState::Errored(body.clone());
                        Err(ControllerError::Rejected(body))
                    }
                }
            }
        }
    }

    /// Asks the backend to stop the running code, then clears local session state.
    pub fn stop(&mut self, frontend: &mut dyn Frontend) {
        match self.backend.stop_code() {
            Ok(message) => debug!("stop: {}", message.trim()),
            Err(err) => warn!("stop request failed: {}", err),
        }
        self.clear_session(frontend);
    }

    /// Restarts the backend level, then clears local session state.
    pub fn reset(&mut self, frontend: &mut dyn Frontend) {
        match self.backend.reset() {
            Ok(position) => frontend.show_position(&position),
            Err(err) => warn!("reset request failed: {}", err),
        }
        self.clear_session(frontend);
    }

    pub fn refresh_variables(&mut self, frontend: &mut dyn Frontend) -> Result<(), ControllerError> {
        match self.backend.variables() {
            Ok(variables) => {
                frontend.show_variables(&variables);
                self.variables = variables;
                Ok(())
            }
            Err(err) => Err(connection_problem(err, frontend)),
        }
    }

    /// Switches the backend to `name` (or describes the current level) and applies its
    /// block restrictions to later generation passes.
    pub fn load_level(&mut self, name: Option<&str>, frontend: &mut dyn Frontend) -> Result<LevelInfo, ControllerError> {
        let level = self.backend.level(name).map_err(|err| connection_problem(err, frontend))?;
        info!("level {} blocks {:?}", level.name, level.blocked);
        self.generator.options_mut().disabled_types = level.blocked.iter().cloned().collect();
        frontend.show_level(&level);
        Ok(level)
    }

    fn generate(&mut self, graph: &BlockGraph, frontend: &mut dyn Frontend) -> Result<GeneratedProgram, ControllerError> {
        let program = match self.generator.generate(graph) {
            Ok(program) => program,
            Err(err) => {
                let err = ControllerError::from(err);
                frontend.set_status(&err.to_string());
                return Err(err);
            }
        };
        sync_workspace(graph, &program, frontend, &self.generator.options().disabled_types);
        Ok(program)
    }

    /// Implicit reset before a new run: best-effort stop plus local cleanup.
    fn release(&mut self, frontend: &mut dyn Frontend) {
        if let Err(err) = self.backend.stop_code() {
            debug!("pre-start stop failed: {}", err);
        }
        self.clear_session(frontend);
    }

    fn clear_session(&mut self, frontend: &mut dyn Frontend) {
        self.state = RemoteState::Idle;
        self.started_at = None;
        self.cursor = Cursor::Start;
        self.first_dispatch = true;
        frontend.highlight(None);
        frontend.set_controls_enabled(true);
    }

    fn restart_steps(&mut self, frontend: &mut dyn Frontend) {
        self.cursor = Cursor::Start;
        self.first_dispatch = true;
        frontend.highlight(None);
        self.clear_backend(frontend);
    }

    fn clear_backend(&mut self, frontend: &mut dyn Frontend) {
        match self.backend.clear() {
            Ok(position) => frontend.show_position(&position),
            Err(err) => warn!("clear request failed: {}", err),
        }
    }

    fn complete(&mut self, frontend: &mut dyn Frontend) {
        info!("remote run completed");
        self.state = RemoteState::Completed;
        self.started_at = None;
        frontend.highlight(None);
        frontend.set_controls_enabled(true);
        frontend.set_status("Program finished.");
        match self.backend.variables() {
            Ok(variables) => {
                frontend.show_variables(&variables);
                self.variables = variables;
            }
            Err(err) => warn!("variable refresh failed, keeping previous values: {}", err),
        }
    }

    fn transport_failed(&mut self, err: TransportError, frontend: &mut dyn Frontend) -> ControllerError {
        self.state = RemoteState::Idle;
        self.started_at = None;
        connection_problem(err, frontend)
    }

    fn report_remote_error(&mut self, text: &str, frontend: &mut dyn Frontend) {
        let offset = self.settings.wrapper_line_offset;
        let diagnostics = parse_diagnostics(text);
        let mut summary = Vec::new();
        if let Some(program) = &self.program {
            for diag in &diagnostics {
                let anchored = anchor(diag, program, offset);
                match (&anchored.block, anchored.line) {
                    (Some(block), Some(line)) => {
                        frontend.set_warning(block, Some(&anchored.message));
                        summary.push(format!("line {}: {}", line, anchored.message));
                    }
                    _ => summary.push(anchored.message),
                }
            }
        }
        if summary.is_empty() {
            summary.push(text.trim().to_string());
        }
        let message = summary.join("\n");
        warn!("remote error: {}", message);
        self.state = RemoteState::Errored(message.clone());
        self.started_at = None;
        frontend.highlight(None);
        frontend.set_controls_enabled(true);
        frontend.set_status(&format!("Error: {}", message));
    }
}

/// Shows a transport failure and hands the controls back to the user.
fn connection_problem(err: TransportError, frontend: &mut dyn Frontend) -> ControllerError {
    warn!("transport failure: {}", err);
    frontend.highlight(None);
    frontend.set_controls_enabled(true);
    frontend.set_status(&format!("Connection problem: {}", err));
    ControllerError::Transport(err)
}

impl<B: Backend, C: Clock> RemoteController<B, C> {
    pub fn from_config(generator: Generator, backend: B, clock: C, config: &Config) -> Self {
        let mut settings = RemoteSettings::from(config);
        if settings.wrapper_line_offset == 0 {
            settings.wrapper_line_offset = DEFAULT_WRAPPER_LINE_OFFSET;
        }
        Self::new(generator, backend, clock, settings)
    }
}
