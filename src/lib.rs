pub mod ast;
pub mod backend;
pub mod block;
pub mod codegen;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod frontend;
pub mod graph;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod precedence;
pub mod snapshot;
pub mod symbols;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

use anyhow::{Context, Result};
use block::BlockRegistry;
use codegen::{GeneratedProgram, Generator, GeneratorOptions};
use log::warn;
use std::path::{Path, PathBuf};

#[cfg(all(target_arch = "wasm32", feature = "wasm-bindings"))]
pub mod wasm;

#[cfg(not(target_arch = "wasm32"))]
pub fn run_cli(args: &cli::Args) -> Result<()> {
    use backend::HttpBackend;
    use config::Config;
    use controller::{LocalController, LocalState, RemoteController};
    use frontend::{ConsoleFrontend, SystemClock};
    use interpreter::ConsoleHost;

    let running = args.run_local || args.step_local.is_some() || args.remote.is_some();
    let total_stages = 3 + usize::from(args.output.is_some()) + usize::from(running);
    let progress = CliProgress::new("Generate", total_stages);
    let mut stage = 0usize;

    stage += 1;
    progress.emit(stage, "Resolving input path");
    let input = canonicalize_file(&args.input)?;
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    apply_overrides(&mut config, args);

    stage += 1;
    progress.emit(stage, "Reading workspace snapshot");
    let text = std::fs::read_to_string(&input)
        .with_context(|| format!("Cannot read '{}'.", input.display()))?;
    let graph = snapshot::load_workspace(&text, &BlockRegistry::standard())
        .map_err(|e| anyhow::anyhow!("Snapshot error: {} (file '{}')", e, pretty_path(&input)))?;

    stage += 1;
    progress.emit(stage, "Generating code");
    let generator = Generator::new(BlockRegistry::standard(), config.generator_options());
    let program = generator.generate(&graph)?;
    report_warnings(&program);

    if let Some(output) = &args.output {
        stage += 1;
        progress.emit(stage, "Writing generated code");
        std::fs::write(output, program.code())
            .with_context(|| format!("Cannot write '{}'.", output.display()))?;
    } else if !running {
        println!("{}", program.code());
    }

    if !running {
        return Ok(());
    }

    stage += 1;
    let mut frontend = ConsoleFrontend { quiet: true };
    if args.remote.is_some() {
        progress.emit(stage, "Running on the backend");
        let backend = HttpBackend::new(&config.backend_url)?;
        let mut remote = RemoteController::from_config(generator, backend, SystemClock, &config);
        if let Some(level) = &args.level {
            remote.load_level(Some(level.as_str()), &mut frontend)?;
        }
        if config.per_block {
            remote.run_blocks(&graph, &mut frontend)?;
        } else {
            remote.start(&graph, &mut frontend)?;
            remote.run_to_completion(&mut frontend)?;
        }
        return Ok(());
    }

    progress.emit(stage, "Running in the local interpreter");
    let mut local = LocalController::from_config(generator, ConsoleHost, SystemClock, &config);
    local.load(&graph, &mut frontend)?;
    let steps = args.step_local.unwrap_or(usize::MAX);
    if local.run(&mut frontend, steps)? == LocalState::Stepping {
        eprintln!("Stopped after {} steps.", steps);
    }
    Ok(())
}

#[cfg(not(target_arch = "wasm32"))]
fn apply_overrides(config: &mut config::Config, args: &cli::Args) {
    if args.per_block {
        config.per_block = true;
    }
    if args.no_hooks {
        config.statement_prefix.clear();
    }
    if args.value_cache {
        config.value_cache = true;
    }
    if args.strict {
        config.strict = true;
    }
    if let Some(Some(url)) = &args.remote {
        config.backend_url = url.clone();
    }
    config.disabled_types.extend(args.disabled_types.iter().cloned());
}

/// Generates code for a snapshot given as text (JSON or XML).
pub fn generate_from_snapshot(text: &str, options: GeneratorOptions) -> Result<GeneratedProgram> {
    let registry = BlockRegistry::standard();
    let graph = snapshot::load_workspace(text, &registry).map_err(|e| anyhow::anyhow!("Snapshot error: {}", e))?;
    let program = Generator::new(registry, options).generate(&graph)?;
    Ok(program)
}

pub fn canonicalize_file(path: &Path) -> Result<PathBuf> {
    if !path.exists() || !path.is_file() {
        return Err(anyhow::anyhow!("Input file not found: '{}'.", path.display()));
    }
    Ok(path.canonicalize()?)
}

fn report_warnings(program: &GeneratedProgram) {
    for warning in &program.warnings {
        warn!("block {}: {}", warning.block, warning.message);
    }
}

fn pretty_path(path: &Path) -> String {
    let raw = path.display().to_string();
    if let Some(stripped) = raw.strip_prefix(r"\\?\") {
        stripped.to_string()
    } else {
        raw
    }
}

#[cfg(not(target_arch = "wasm32"))]
struct CliProgress {
    prefix: &'static str,
    total: usize,
}

#[cfg(not(target_arch = "wasm32"))]
impl CliProgress {
    fn new(prefix: &'static str, total: usize) -> Self {
        Self {
            prefix,
            total: total.max(1),
        }
    }

    fn emit(&self, step: usize, label: &str) {
        let total = self.total;
        let step = step.clamp(1, total);
        let bar = render_progress_bar(step, total, 14);
        eprintln!("[{}] {}... ({}/{}) {}", self.prefix, label, step, total, bar);
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn render_progress_bar(step: usize, total: usize, width: usize) -> String {
    let width = width.max(1);
    let filled = ((step * width) + (total / 2)) / total;
    let mut s = String::with_capacity(width + 2);
    s.push('[');
    for i in 0..width {
        s.push(if i < filled { '=' } else { '-' });
    }
    s.push(']');
    s
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn progress_bar_rounds_to_width() {
        assert_eq!(render_progress_bar(1, 4, 8), "[==------]");
        assert_eq!(render_progress_bar(4, 4, 8), "[========]");
    }

    #[test]
    fn flags_override_the_config() {
        let args = cli::Args::parse_from([
            "dungeon-blocks",
            "ws.json",
            "--no-hooks",
            "--per-block",
            "--disable",
            "move_up",
            "--disable",
            "fireball_left",
        ]);
        let mut config = config::Config::default();
        apply_overrides(&mut config, &args);
        assert!(config.per_block);
        assert_eq!(config.generator_options().statement_prefix, None);
        assert_eq!(config.disabled_types, vec!["move_up", "fireball_left"]);
    }

    #[test]
    fn remote_without_url_uses_the_configured_backend() {
        let mut config = config::Config::from_toml_str("backend_url = \"http://dungeon:9000\"").unwrap();
        let args = cli::Args::parse_from(["dungeon-blocks", "ws.json", "--remote"]);
        assert_eq!(args.remote, Some(None));
        apply_overrides(&mut config, &args);
        assert_eq!(config.backend_url, "http://dungeon:9000");

        let args = cli::Args::parse_from(["dungeon-blocks", "ws.json", "--remote", "http://other:1"]);
        apply_overrides(&mut config, &args);
        assert_eq!(config.backend_url, "http://other:1");

        let args = cli::Args::parse_from(["dungeon-blocks", "ws.json"]);
        apply_overrides(&mut config, &args);
        assert_eq!(config.backend_url, "http://other:1");
    }

    #[test]
    fn level_requires_a_backend() {
        assert!(cli::Args::try_parse_from(["dungeon-blocks", "ws.json", "--level", "l1"]).is_err());
        assert!(cli::Args::try_parse_from(["dungeon-blocks", "ws.json", "--run-local", "--remote", "http://h"]).is_err());
    }

    #[test]
    fn snapshot_text_generates_code() {
        let program = generate_from_snapshot(
            r#"{"blocks":{"blocks":[{"type":"start","id":"s","next":{"block":{"type":"rest","id":"r"}}}]}}"#,
            GeneratorOptions::default(),
        )
        .unwrap();
        assert_eq!(program.code(), "highlightBlock(\"r\");\nrest();");
        assert!(generate_from_snapshot("nonsense", GeneratorOptions::default()).is_err());
    }
}
