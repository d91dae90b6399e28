use crate::block::{Block, BlockId, BlockKind, BlockRegistry, Direction, FieldValue};
use crate::graph::BlockGraph;
use crate::precedence::{BinaryOp, EmittedExpr, Order, ValueType};
use crate::symbols::{Lookup, SymbolKind, SymbolTable};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_STATEMENT_PREFIX: &str = "highlightBlock(%1);";
pub const HIGHLIGHT_FUNCTION: &str = "highlightBlock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmissionMode {
    #[default]
    WholeProgram,
    /// One fragment per statement block; `next` links are never followed.
    SingleBlock,
}

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub mode: EmissionMode,
    /// Instrumentation template; `%1` is replaced with the quoted block id.
    pub statement_prefix: Option<String>,
    pub value_cache: bool,
    pub strict: bool,
    /// Block types disabled for the current level.
    pub disabled_types: HashSet<String>,
    pub indent: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            mode: EmissionMode::WholeProgram,
            statement_prefix: Some(DEFAULT_STATEMENT_PREFIX.to_string()),
            value_cache: false,
            strict: false,
            disabled_types: HashSet::new(),
            indent: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedLine {
    pub text: String,
    pub block: BlockId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockWarning {
    pub block: BlockId,
    pub message: String,
}

/// Code for one statement block, as dispatched in per-block mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFragment {
    pub block: BlockId,
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedProgram {
    pub lines: Vec<EmittedLine>,
    pub warnings: Vec<BlockWarning>,
    pub fragments: Vec<BlockFragment>,
}

impl GeneratedProgram {
    pub fn code(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 1-based line number to originating block.
    pub fn attribution(&self) -> BTreeMap<usize, BlockId> {
        self.lines
            .iter()
            .enumerate()
            .map(|(i, l)| (i + 1, l.block.clone()))
            .collect()
    }

    pub fn block_for_line(&self, line: usize) -> Option<&str> {
        line.checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .map(|l| l.block.as_str())
    }

    /// All warnings of one block joined into a single message.
    pub fn warning_for(&self, block: &str) -> Option<String> {
        let messages = self
            .warnings
            .iter()
            .filter(|w| w.block == block)
            .map(|w| w.message.as_str())
            .collect::<Vec<_>>();
        if messages.is_empty() {
            None
        } else {
            Some(messages.join("\n"))
        }
    }

    /// Blocks that produced at least one line, in order of first appearance.
    pub fn blocks_with_code(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.lines
            .iter()
            .map(|l| l.block.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn fragment_for(&self, block: &str) -> Option<&BlockFragment> {
        self.fragments.iter().find(|f| f.block == block)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    NoProgram,
    UnfilledSocket { block: BlockId, socket: String },
    UnknownBlock(BlockId),
}

impl Display for GenerationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationError::NoProgram => write!(f, "No program: the workspace has no start block."),
            GenerationError::UnfilledSocket { block, socket } => {
                write!(f, "Block '{}' has nothing connected to '{}'.", block, socket)
            }
            GenerationError::UnknownBlock(id) => write!(f, "Block '{}' does not exist.", id),
        }
    }
}

impl Error for GenerationError {}

type EmitResult<T> = Result<T, GenerationError>;

/// One generator for every deployment variant: the registry decides which block kinds exist
/// and the options decide the emission granularity.
#[derive(Debug, Clone)]
pub struct Generator {
    registry: BlockRegistry,
    options: GeneratorOptions,
}

impl Generator {
    pub fn new(registry: BlockRegistry, options: GeneratorOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut GeneratorOptions {
        &mut self.options
    }

    pub fn generate(&self, graph: &BlockGraph) -> EmitResult<GeneratedProgram> {
        match self.options.mode {
            EmissionMode::WholeProgram => self.whole_program(graph),
            EmissionMode::SingleBlock => self.fragments(graph),
        }
    }

    /// Emits one block with its nested bodies. The block's `next` link is not followed.
    pub fn generate_block(&self, graph: &BlockGraph, id: &str) -> EmitResult<GeneratedProgram> {
        let block = graph
            .get(id)
            .ok_or_else(|| GenerationError::UnknownBlock(id.to_string()))?;
        let mut pass = Pass::new(graph, &self.registry, &self.options, EmissionMode::SingleBlock);
        pass.prepare();
        if pass.kind(block) == BlockKind::FunctionDef {
            pass.emit_function(block)?;
        } else {
            pass.emit_statement(block, 0)?;
        }
        let code = pass.lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n");
        let fragments = if code.is_empty() {
            Vec::new()
        } else {
            vec![BlockFragment {
                block: block.id.clone(),
                code,
            }]
        };
        Ok(pass.finish(fragments))
    }

    /// Emits every function definition and every statement after the root as its own fragment.
    pub fn fragments(&self, graph: &BlockGraph) -> EmitResult<GeneratedProgram> {
        let root = graph.root().ok_or(GenerationError::NoProgram)?;
        let mut pass = Pass::new(graph, &self.registry, &self.options, EmissionMode::SingleBlock);
        pass.prepare();
        let mut fragments = Vec::new();
        for def in pass.live_functions() {
            let start = pass.lines.len();
            pass.emit_function(def)?;
            pass.capture_fragment(def, start, &mut fragments);
        }
        for block in graph.chain_after(&root.id) {
            let start = pass.lines.len();
            pass.emit_statement(block, 0)?;
            pass.capture_fragment(block, start, &mut fragments);
        }
        Ok(pass.finish(fragments))
    }

    fn whole_program(&self, graph: &BlockGraph) -> EmitResult<GeneratedProgram> {
        let root = graph.root().ok_or(GenerationError::NoProgram)?;
        let mut pass = Pass::new(graph, &self.registry, &self.options, EmissionMode::WholeProgram);
        pass.prepare();
        for def in pass.live_functions() {
            pass.emit_function(def)?;
        }
        let functions = std::mem::take(&mut pass.lines);
        pass.emit_chain(root.next.as_deref(), 0)?;
        let main = std::mem::take(&mut pass.lines);
        let prelude = pass.prelude();
        pass.lines = functions.into_iter().chain(prelude).chain(main).collect();
        debug!(
            "generated {} lines with {} warnings",
            pass.lines.len(),
            pass.warnings.len()
        );
        Ok(pass.finish(Vec::new()))
    }
}

/// State of one generation pass. Built fresh for every request and dropped afterwards.
struct Pass<'g> {
    graph: &'g BlockGraph,
    registry: &'g BlockRegistry,
    options: &'g GeneratorOptions,
    mode: EmissionMode,
    symbols: SymbolTable,
    reachable: HashSet<&'g str>,
    functions: HashMap<String, &'g Block>,
    lines: Vec<EmittedLine>,
    warnings: Vec<BlockWarning>,
    active: HashSet<&'g str>,
    loop_depth: usize,
    repeat_depth: usize,
    counters: Vec<String>,
}

impl<'g> Pass<'g> {
    fn new(
        graph: &'g BlockGraph,
        registry: &'g BlockRegistry,
        options: &'g GeneratorOptions,
        mode: EmissionMode,
    ) -> Self {
        Self {
            graph,
            registry,
            options,
            mode,
            symbols: SymbolTable::new(),
            reachable: graph.reachable(),
            functions: HashMap::new(),
            lines: Vec::new(),
            warnings: Vec::new(),
            active: HashSet::new(),
            loop_depth: 0,
            repeat_depth: 0,
            counters: Vec::new(),
        }
    }

    fn kind(&self, block: &Block) -> BlockKind {
        self.registry.resolve(&block.type_name)
    }

    fn is_disabled(&self, block: &Block) -> bool {
        !block.enabled || self.options.disabled_types.contains(&block.type_name)
    }

    fn is_skipped(&self, block: &Block) -> bool {
        self.is_disabled(block) || !self.reachable.contains(block.id.as_str())
    }

    /// Declares names up front so editor names keep their identifiers ahead of generated
    /// loop counters, and pins names that cannot be folded.
    fn prepare(&mut self) {
        let graph = self.graph;
        for def in graph.function_definitions() {
            if self.is_skipped(def) {
                continue;
            }
            let Some(name) = function_name(def) else {
                continue;
            };
            self.symbols.declare(&name, SymbolKind::Function);
            if let Some(previous) = self.functions.insert(name.clone(), def) {
                self.warn(
                    previous,
                    format!("Function '{}' is defined again later; this definition is ignored.", name),
                );
            }
        }
        for var in graph.variables() {
            self.symbols.declare(&var.name, SymbolKind::Variable);
        }
        if self.options.value_cache {
            let mut pinned = Vec::new();
            for def in self.live_functions() {
                let body = def.input_any(&["DO", "STACK"]).map(|(_, id)| id);
                self.collect_assignments(body, true, &mut pinned);
            }
            if let Some(root) = graph.root() {
                self.collect_assignments(root.next.as_deref(), false, &mut pinned);
            }
            for name in pinned {
                self.symbols.pin(&name);
            }
        }
    }

    fn collect_assignments(&self, first: Option<&str>, nested: bool, out: &mut Vec<String>) {
        let Some(first) = first else {
            return;
        };
        for block in self.graph.chain_from(first) {
            let kind = self.kind(block);
            match kind {
                BlockKind::VariableSet | BlockKind::ChangeVariable if nested => {
                    out.extend(variable_name(block));
                }
                BlockKind::For => {
                    out.extend(variable_name(block));
                }
                _ => {}
            }
            for (name, input) in &block.inputs {
                if kind.is_statement_socket(name) {
                    self.collect_assignments(input.block_id(), true, out);
                }
            }
        }
    }

    /// Enabled function definitions in workspace order, later duplicates replacing earlier ones.
    fn live_functions(&self) -> Vec<&'g Block> {
        let graph = self.graph;
        graph
            .function_definitions()
            .into_iter()
            .filter(|def| {
                function_name(def)
                    .and_then(|name| self.functions.get(&name))
                    .is_some_and(|live| live.id == def.id)
            })
            .collect()
    }

    fn finish(mut self, fragments: Vec<BlockFragment>) -> GeneratedProgram {
        let mut seen = HashSet::new();
        self.warnings
            .retain(|w| seen.insert((w.block.clone(), w.message.clone())));
        GeneratedProgram {
            lines: self.lines,
            warnings: self.warnings,
            fragments,
        }
    }

    fn capture_fragment(&self, block: &Block, start: usize, out: &mut Vec<BlockFragment>) {
        if start == self.lines.len() {
            return;
        }
        let code = self.lines[start..]
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        out.push(BlockFragment {
            block: block.id.clone(),
            code,
        });
    }

    fn prelude(&self) -> Vec<EmittedLine> {
        let mut out = Vec::new();
        for symbol in self.symbols.referenced_values() {
            let Some(block) = &symbol.first_block else {
                continue;
            };
            let text = match symbol.kind {
                SymbolKind::Array => format!("int[] {} = new int[0];", symbol.ident),
                _ => format!(
                    "{} {} = {};",
                    symbol.ty.java_name(),
                    symbol.ident,
                    symbol.ty.placeholder().code
                ),
            };
            out.push(EmittedLine {
                text,
                block: block.clone(),
            });
        }
        out
    }

    fn warn(&mut self, block: &Block, message: impl Into<String>) {
        let message = message.into();
        warn!("block {} ({}): {}", block.id, block.type_name, message);
        self.warnings.push(BlockWarning {
            block: block.id.clone(),
            message,
        });
    }

    /// Reports an empty required socket. Fatal only for strict generators.
    fn unfilled(&mut self, block: &Block, socket: &str, consequence: &str) -> EmitResult<()> {
        if self.options.strict {
            return Err(GenerationError::UnfilledSocket {
                block: block.id.clone(),
                socket: socket.to_string(),
            });
        }
        self.warn(block, format!("Nothing is connected to '{}'; {}.", socket, consequence));
        Ok(())
    }

    fn push_line(&mut self, level: usize, text: impl AsRef<str>, block: &Block) {
        self.lines.push(EmittedLine {
            text: format!("{}{}", " ".repeat(level * self.options.indent), text.as_ref()),
            block: block.id.clone(),
        });
    }

    fn hook(&mut self, level: usize, block: &Block) {
        if let Some(prefix) = &self.options.statement_prefix {
            let text = prefix.replace("%1", &quote_str(&block.id));
            self.push_line(level, text, block);
        }
    }

    fn emit_chain(&mut self, first: Option<&str>, level: usize) -> EmitResult<()> {
        let Some(first) = first else {
            return Ok(());
        };
        let graph = self.graph;
        for block in graph.chain_from(first) {
            self.emit_statement(block, level)?;
        }
        Ok(())
    }

    fn emit_body(&mut self, block: &'g Block, socket: &str, level: usize) -> EmitResult<()> {
        self.emit_chain(block.input(socket), level)
    }

    fn emit_function(&mut self, def: &'g Block) -> EmitResult<()> {
        if self.is_skipped(def) {
            return Ok(());
        }
        let Some(name) = function_name(def) else {
            self.warn(def, "Function definition has no name.");
            return Ok(());
        };
        let ident = self.symbols.reference(&name, SymbolKind::Function, &def.id);
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        let saved_repeats = std::mem::replace(&mut self.repeat_depth, 0);
        self.active.insert(def.id.as_str());
        self.push_line(0, format!("void {}() {{", ident), def);
        let body = def.input_any(&["DO", "STACK"]).map(|(_, id)| id);
        let result = self.emit_chain(body, 1);
        self.push_line(0, "}", def);
        self.active.remove(def.id.as_str());
        self.loop_depth = saved_loops;
        self.repeat_depth = saved_repeats;
        result
    }

    fn emit_statement(&mut self, block: &'g Block, level: usize) -> EmitResult<()> {
        if self.is_skipped(block) {
            debug!("skipping disabled block {}", block.id);
            return Ok(());
        }
        if !self.active.insert(block.id.as_str()) {
            self.warn(block, "Block contains itself; the nested copy is skipped.");
            return Ok(());
        }
        let result = self.emit_statement_kind(block, level);
        self.active.remove(block.id.as_str());
        result
    }

    fn emit_statement_kind(&mut self, block: &'g Block, level: usize) -> EmitResult<()> {
        match self.kind(block) {
            BlockKind::Start => {
                self.warn(block, "Only one start block is allowed; this one is ignored.");
            }
            BlockKind::Move(dir) => {
                let amount = self.move_amount(block)?;
                self.action(block, level, format!("move_{}({});", dir, amount.in_slot(Order::NONE)));
            }
            BlockKind::Fireball(dir) => {
                self.action(block, level, format!("fireball({});", quote_str(dir.as_str())));
            }
            BlockKind::Command(command) => {
                self.action(block, level, format!("{}();", command.function_name()));
            }
            BlockKind::DropItem => {
                let item = block.field("ITEM").map(FieldValue::as_text).unwrap_or_default();
                self.action(block, level, format!("drop_item({});", quote_str(&item)));
            }
            BlockKind::Print => {
                let value = self.required_value(block, &["TEXT"], ValueType::Text)?;
                self.action(block, level, format!("print({});", value.in_slot(Order::NONE)));
            }
            BlockKind::Repeat => self.emit_repeat(block, level)?,
            BlockKind::While => self.emit_while(block, level)?,
            BlockKind::For => self.emit_for(block, level)?,
            BlockKind::If => self.emit_if(block, level)?,
            BlockKind::LoopFlow => {
                let flow = block.field("FLOW").map(FieldValue::as_text).unwrap_or_default();
                let keyword = if flow.eq_ignore_ascii_case("CONTINUE") {
                    "continue"
                } else {
                    "break"
                };
                if self.loop_depth == 0 {
                    self.warn(block, format!("'{}' is only allowed inside a loop.", keyword));
                } else {
                    self.action(block, level, format!("{};", keyword));
                }
            }
            BlockKind::VariableSet => self.emit_set(block, level)?,
            BlockKind::ChangeVariable => {
                let Some(name) = self.require_variable(block) else {
                    return Ok(());
                };
                let delta = self.required_value(block, &["DELTA"], ValueType::Int)?;
                self.symbols.infer_type(&name, ValueType::Int);
                if self.options.value_cache {
                    self.symbols.assign(&name, None);
                }
                let ident = self.symbols.reference(&name, SymbolKind::Variable, &block.id);
                self.action(block, level, format!("{} += {};", ident, delta.in_slot(Order::NONE)));
            }
            BlockKind::ArrayCreate => {
                let Some(name) = self.require_variable(block) else {
                    return Ok(());
                };
                let length = match self.socket_value(block, &["ARRAY_LENGTH"])? {
                    Some(length) => length,
                    None => match block.field("ARRAY_LENGTH") {
                        Some(field) => self.number_field(block, "ARRAY_LENGTH", field),
                        None => {
                            self.unfilled(block, "ARRAY_LENGTH", "using 0")?;
                            ValueType::Int.placeholder()
                        }
                    },
                };
                let ident = self.symbols.reference(&name, SymbolKind::Array, &block.id);
                let decl = self.inline_declaration(&name, "int[] ");
                self.action(
                    block,
                    level,
                    format!("{}{} = new int[{}];", decl, ident, length.in_slot(Order::NONE)),
                );
            }
            BlockKind::ArraySet => {
                let Some(name) = self.require_variable(block) else {
                    return Ok(());
                };
                let index = self.required_value(block, &["INPUT_INDEX", "INDEX"], ValueType::Int)?;
                let value = self.required_value(block, &["INPUT_VALUE", "VALUE"], ValueType::Int)?;
                let ident = self.symbols.reference(&name, SymbolKind::Array, &block.id);
                self.action(
                    block,
                    level,
                    format!(
                        "{}[{}] = {};",
                        ident,
                        index.in_slot(Order::NONE),
                        value.in_slot(Order::NONE)
                    ),
                );
            }
            BlockKind::FunctionCall => {
                let name = function_name(block);
                match name.filter(|n| self.functions.contains_key(n)) {
                    Some(name) => {
                        let ident = self.symbols.reference(&name, SymbolKind::Function, &block.id);
                        self.action(block, level, format!("{}();", ident));
                    }
                    None => self.warn(block, "Calls a function that is not defined."),
                }
            }
            BlockKind::FunctionDef => {
                self.warn(block, "Function definitions cannot be nested in a statement chain.");
            }
            BlockKind::Unknown(type_name) => {
                self.warn(block, format!("Unsupported block type '{}'.", type_name));
            }
            _ => {
                self.warn(block, "Value blocks cannot be used as statements.");
            }
        }
        Ok(())
    }

    fn action(&mut self, block: &Block, level: usize, text: String) {
        self.hook(level, block);
        self.push_line(level, text, block);
    }

    /// Counter identifier for a repeat loop; nested repeats get distinct names.
    fn repeat_counter(&mut self) -> String {
        if self.counters.len() <= self.repeat_depth {
            let counter = self.symbols.fresh("count");
            self.counters.push(counter);
        }
        self.counters[self.repeat_depth].clone()
    }

    fn emit_loop_body(&mut self, block: &'g Block, level: usize) -> EmitResult<()> {
        self.loop_depth += 1;
        self.emit_body(block, "DO", level + 1)?;
        self.loop_depth -= 1;
        self.push_line(level, "}", block);
        Ok(())
    }

    fn emit_repeat(&mut self, block: &'g Block, level: usize) -> EmitResult<()> {
        let times = match self.socket_value(block, &["TIMES"])? {
            Some(times) => times,
            None => match block.field("TIMES") {
                Some(field) => self.number_field(block, "TIMES", field),
                None => {
                    self.unfilled(block, "TIMES", "the loop is skipped")?;
                    return Ok(());
                }
            },
        };
        self.hook(level, block);
        let counter = self.repeat_counter();
        let (_, bound_slot) = BinaryOp::Less.operand_slots();
        self.push_line(
            level,
            format!(
                "for (int {c} = 0; {c} < {n}; {c}++) {{",
                c = counter,
                n = times.in_slot(bound_slot)
            ),
            block,
        );
        self.repeat_depth += 1;
        let result = self.emit_loop_body(block, level);
        self.repeat_depth -= 1;
        result
    }

    fn emit_while(&mut self, block: &'g Block, level: usize) -> EmitResult<()> {
        let mut condition = self.condition(block, &["CONDITION", "BOOL"])?;
        let until = block
            .field("MODE")
            .is_some_and(|m| m.as_text().eq_ignore_ascii_case("UNTIL"));
        if until {
            condition = negate(&condition);
        }
        self.hook(level, block);
        self.push_line(level, format!("while ({}) {{", condition.in_slot(Order::NONE)), block);
        self.emit_loop_body(block, level)
    }

    fn emit_for(&mut self, block: &'g Block, level: usize) -> EmitResult<()> {
        let Some(name) = self.require_variable(block) else {
            return Ok(());
        };
        let from = self.required_value(block, &["FROM"], ValueType::Int)?;
        let to = self.required_value(block, &["TO"], ValueType::Int)?;
        let by = match self.socket_value(block, &["BY"])? {
            Some(by) => by,
            None => {
                self.warn(block, "Nothing is connected to 'BY'; counting by 1.");
                EmittedExpr::atomic("1", ValueType::Int)
            }
        };
        let descending = matches!(
            (from.code.parse::<i64>(), to.code.parse::<i64>()),
            (Ok(a), Ok(b)) if a > b
        );
        let (compare, step) = if descending { (">=", "-=") } else { ("<=", "+=") };
        self.symbols.infer_type(&name, ValueType::Int);
        let ident = self.symbols.reference(&name, SymbolKind::Variable, &block.id);
        let decl = self.inline_declaration(&name, "int ");
        let (_, bound_slot) = BinaryOp::LessEq.operand_slots();
        self.hook(level, block);
        self.push_line(
            level,
            format!(
                "for ({decl}{i} = {from}; {i} {cmp} {to}; {i} {step} {by}) {{",
                decl = decl,
                i = ident,
                from = from.in_slot(Order::NONE),
                cmp = compare,
                to = to.in_slot(bound_slot),
                step = step,
                by = by.in_slot(Order::NONE)
            ),
            block,
        );
        self.emit_loop_body(block, level)
    }

    fn emit_if(&mut self, block: &'g Block, level: usize) -> EmitResult<()> {
        let branches = block
            .inputs
            .keys()
            .filter_map(|name| {
                name.strip_prefix("IF")
                    .or_else(|| name.strip_prefix("DO"))
                    .and_then(|n| n.parse::<usize>().ok())
            })
            .max()
            .map_or(1, |n| n + 1);
        let mut conditions = Vec::with_capacity(branches);
        for k in 0..branches {
            let socket = format!("IF{}", k);
            conditions.push(self.condition(block, &[socket.as_str()])?);
        }
        self.hook(level, block);
        for (k, condition) in conditions.iter().enumerate() {
            let header = if k == 0 { "if" } else { "} else if" };
            self.push_line(
                level,
                format!("{} ({}) {{", header, condition.in_slot(Order::NONE)),
                block,
            );
            self.emit_body(block, &format!("DO{}", k), level + 1)?;
        }
        if block.input("ELSE").is_some() {
            self.push_line(level, "} else {", block);
            self.emit_body(block, "ELSE", level + 1)?;
        }
        self.push_line(level, "}", block);
        Ok(())
    }

    fn emit_set(&mut self, block: &'g Block, level: usize) -> EmitResult<()> {
        let Some(name) = self.require_variable(block) else {
            return Ok(());
        };
        let value = self.required_value(block, &["VALUE"], ValueType::Int)?;
        self.symbols.infer_type(&name, value.ty);
        if self.options.value_cache {
            let literal = is_literal(&value).then(|| value.clone());
            self.symbols.assign(&name, literal);
        }
        let ident = self.symbols.reference(&name, SymbolKind::Variable, &block.id);
        let ty = self
            .symbols
            .get(&name, SymbolKind::Variable)
            .map_or(value.ty, |s| s.ty);
        let decl = self.inline_declaration(&name, &format!("{} ", ty.java_name()));
        self.action(
            block,
            level,
            format!("{}{} = {};", decl, ident, value.in_slot(Order::NONE)),
        );
        Ok(())
    }

    /// Type prefix for the first assignment of a name in single-block mode.
    fn inline_declaration(&mut self, name: &str, type_prefix: &str) -> String {
        if self.mode == EmissionMode::SingleBlock && self.symbols.mark_declared(name) {
            type_prefix.to_string()
        } else {
            String::new()
        }
    }

    fn require_variable(&mut self, block: &Block) -> Option<String> {
        let name = variable_name(block);
        if name.is_none() {
            self.warn(block, "No variable is selected.");
        }
        name
    }

    fn move_amount(&mut self, block: &'g Block) -> EmitResult<EmittedExpr> {
        const SOCKETS: [&str; 3] = ["amount", "AMOUNT", "REPEAT_NUMBER"];
        if let Some(value) = self.socket_value(block, &SOCKETS)? {
            return Ok(value);
        }
        if let Some(field) = block.field_any(&SOCKETS) {
            return Ok(self.number_field(block, "REPEAT_NUMBER", field));
        }
        if let Some(socket) = SOCKETS.iter().find(|s| block.inputs.contains_key(**s)) {
            self.unfilled(block, socket, "using 0")?;
            return Ok(ValueType::Int.placeholder());
        }
        Ok(EmittedExpr::atomic("1", ValueType::Int))
    }

    fn condition(&mut self, block: &'g Block, sockets: &[&str]) -> EmitResult<EmittedExpr> {
        match self.socket_value(block, sockets)? {
            Some(value) => Ok(value),
            None => {
                self.unfilled(block, sockets[0], "the condition is never true")?;
                Ok(ValueType::Bool.placeholder())
            }
        }
    }

    fn required_value(
        &mut self,
        block: &'g Block,
        sockets: &[&str],
        ty: ValueType,
    ) -> EmitResult<EmittedExpr> {
        match self.socket_value(block, sockets)? {
            Some(value) => Ok(value),
            None => {
                let placeholder = ty.placeholder();
                self.unfilled(block, sockets[0], &format!("using {}", placeholder.code))?;
                Ok(placeholder)
            }
        }
    }

    /// The emitted value of the first connected socket among `sockets`.
    fn socket_value(&mut self, block: &'g Block, sockets: &[&str]) -> EmitResult<Option<EmittedExpr>> {
        let graph = self.graph;
        let Some((_, id)) = block.input_any(sockets) else {
            return Ok(None);
        };
        let Some(child) = graph.get(id) else {
            return Ok(None);
        };
        if self.is_disabled(child) {
            return Ok(None);
        }
        if !self.active.insert(child.id.as_str()) {
            self.warn(block, "Block contains itself; the nested copy is skipped.");
            return Ok(None);
        }
        let value = self.emit_value(child);
        self.active.remove(child.id.as_str());
        value.map(Some)
    }

    fn emit_value(&mut self, block: &'g Block) -> EmitResult<EmittedExpr> {
        let expr = match self.kind(block) {
            BlockKind::Number => match block.field_any(&["NUM", "REPEAT_NUMBER", "NUMBER"]) {
                Some(field) => self.number_field(block, "NUM", field),
                None => {
                    self.warn(block, "Number block has no value; using 0.");
                    ValueType::Int.placeholder()
                }
            },
            BlockKind::Boolean => {
                let value = block.field("BOOL").is_some_and(|f| match f {
                    FieldValue::Bool(b) => *b,
                    other => other.as_text().eq_ignore_ascii_case("TRUE"),
                });
                EmittedExpr::atomic(if value { "true" } else { "false" }, ValueType::Bool)
            }
            BlockKind::Text => {
                let text = block.field("TEXT").map(FieldValue::as_text).unwrap_or_default();
                EmittedExpr::atomic(quote_str(&text), ValueType::Text)
            }
            BlockKind::Arithmetic => {
                let op = block.field_any(&["OP", "OPERATOR"]).map(FieldValue::as_text);
                let parsed = op.as_deref().and_then(BinaryOp::from_field);
                match parsed {
                    Some(op) if op.result_type() == ValueType::Int => self.binary(
                        block,
                        op,
                        &["A", "INPUT_A"],
                        &["B", "INPUT_B"],
                        ValueType::Int,
                    )?,
                    _ => self.unsupported_operator(block, op, ValueType::Int),
                }
            }
            BlockKind::Modulo => self.binary(
                block,
                BinaryOp::Modulo,
                &["DIVIDEND"],
                &["DIVISOR"],
                ValueType::Int,
            )?,
            BlockKind::Single => {
                let op = block.field("OP").map(FieldValue::as_text).unwrap_or_default();
                match op.as_str() {
                    "NEG" => {
                        let operand = self.required_value(block, &["NUM"], ValueType::Int)?;
                        EmittedExpr::new(
                            format!("-{}", operand.in_slot(Order::UNARY.tighter())),
                            Order::UNARY,
                            ValueType::Int,
                        )
                    }
                    "ABS" => {
                        let operand = self.required_value(block, &["NUM"], ValueType::Int)?;
                        EmittedExpr::new(
                            format!("abs({})", operand.in_slot(Order::NONE)),
                            Order::CALL,
                            ValueType::Int,
                        )
                    }
                    _ => self.unsupported_operator(block, Some(op.clone()), ValueType::Int),
                }
            }
            BlockKind::Compare => {
                let op = block.field_any(&["OP", "OPERATOR"]).map(FieldValue::as_text);
                let parsed = op.as_deref().and_then(BinaryOp::from_field);
                match parsed {
                    Some(op)
                        if op.result_type() == ValueType::Bool
                            && !matches!(op, BinaryOp::And | BinaryOp::Or) =>
                    {
                        self.binary(block, op, &["A", "INPUT_A"], &["B", "INPUT_B"], ValueType::Int)?
                    }
                    _ => self.unsupported_operator(block, op, ValueType::Bool),
                }
            }
            BlockKind::Logic => {
                let op = block.field_any(&["OP", "LOGIC_OPERATOR"]).map(FieldValue::as_text);
                let parsed = op.as_deref().and_then(BinaryOp::from_field);
                match parsed {
                    Some(op @ (BinaryOp::And | BinaryOp::Or)) => self.binary(
                        block,
                        op,
                        &["A", "CONDITION_A"],
                        &["B", "CONDITION_B"],
                        ValueType::Bool,
                    )?,
                    _ => self.unsupported_operator(block, op, ValueType::Bool),
                }
            }
            BlockKind::Not => {
                let operand = self.required_value(block, &["BOOL", "INPUT_A"], ValueType::Bool)?;
                negate(&operand)
            }
            BlockKind::Ternary => {
                let condition = self.required_value(block, &["IF"], ValueType::Bool)?;
                let then = self.required_value(block, &["THEN"], ValueType::Int)?;
                let otherwise = self.required_value(block, &["ELSE"], then.ty)?;
                EmittedExpr::new(
                    format!(
                        "{} ? {} : {}",
                        condition.in_slot(Order::CONDITIONAL.tighter()),
                        then.in_slot(Order::CONDITIONAL),
                        otherwise.in_slot(Order::CONDITIONAL)
                    ),
                    Order::CONDITIONAL,
                    then.ty,
                )
            }
            BlockKind::WallCheck(dir) => {
                let arg = dir.map(|d: Direction| quote_str(d.as_str())).unwrap_or_default();
                EmittedExpr::new(format!("isNearWall({})", arg), Order::CALL, ValueType::Bool)
            }
            BlockKind::VariableGet => match variable_name(block) {
                Some(name) => {
                    self.symbols.reference(&name, SymbolKind::Variable, &block.id);
                    let ty = self
                        .symbols
                        .get(&name, SymbolKind::Variable)
                        .map_or(ValueType::Int, |s| s.ty);
                    match self.symbols.lookup(&name) {
                        Some(Lookup::Value(value)) => value.clone(),
                        Some(Lookup::Name(ident)) => EmittedExpr::atomic(ident, ty),
                        None => ValueType::Int.placeholder(),
                    }
                }
                None => {
                    self.warn(block, "No variable is selected; using 0.");
                    ValueType::Int.placeholder()
                }
            },
            BlockKind::ArrayGet => {
                let Some(name) = self.require_variable(block) else {
                    return Ok(ValueType::Int.placeholder());
                };
                let index = self.required_value(block, &["INPUT_INDEX", "INDEX"], ValueType::Int)?;
                let ident = self.symbols.reference(&name, SymbolKind::Array, &block.id);
                EmittedExpr::new(
                    format!("{}[{}]", ident, index.in_slot(Order::NONE)),
                    Order::MEMBER,
                    ValueType::Int,
                )
            }
            BlockKind::ArrayLength => {
                let Some(name) = self.require_variable(block) else {
                    return Ok(ValueType::Int.placeholder());
                };
                let ident = self.symbols.reference(&name, SymbolKind::Array, &block.id);
                EmittedExpr::new(format!("{}.length", ident), Order::MEMBER, ValueType::Int)
            }
            BlockKind::Unknown(type_name) => {
                self.warn(block, format!("Unsupported block type '{}'; using 0.", type_name));
                ValueType::Int.placeholder()
            }
            _ => {
                self.warn(block, "Statement blocks cannot be used as values; using 0.");
                ValueType::Int.placeholder()
            }
        };
        Ok(expr)
    }

    fn binary(
        &mut self,
        block: &'g Block,
        op: BinaryOp,
        left: &[&str],
        right: &[&str],
        operand_ty: ValueType,
    ) -> EmitResult<EmittedExpr> {
        let lhs = self.required_value(block, left, operand_ty)?;
        let rhs = self.required_value(block, right, operand_ty)?;
        let (left_slot, right_slot) = op.operand_slots();
        Ok(EmittedExpr::new(
            format!(
                "{} {} {}",
                lhs.in_slot(left_slot),
                op.symbol(),
                rhs.in_slot(right_slot)
            ),
            op.order(),
            op.result_type(),
        ))
    }

    fn unsupported_operator(&mut self, block: &Block, op: Option<String>, ty: ValueType) -> EmittedExpr {
        let placeholder = ty.placeholder();
        self.warn(
            block,
            format!(
                "Operator '{}' is not supported; using {}.",
                op.unwrap_or_default(),
                placeholder.code
            ),
        );
        placeholder
    }

    fn number_field(&mut self, block: &Block, name: &str, field: &FieldValue) -> EmittedExpr {
        let Some(value) = field.as_number().filter(|v| v.is_finite()) else {
            self.warn(
                block,
                format!("'{}' is not a number: '{}'; using 0.", name, field.as_text()),
            );
            return ValueType::Int.placeholder();
        };
        if value.fract() != 0.0 {
            self.warn(
                block,
                format!("'{}' only accepts whole numbers; {} is truncated.", name, value),
            );
        }
        let whole = value.trunc();
        let (min, max) = (f64::from(i32::MIN), f64::from(i32::MAX));
        if !(min..=max).contains(&whole) {
            let clamped = whole.clamp(min, max) as i64;
            self.warn(
                block,
                format!("'{}' is out of the int range; {} is clamped to {}.", name, value, clamped),
            );
            return int_literal(clamped);
        }
        int_literal(whole as i64)
    }
}

fn int_literal(value: i64) -> EmittedExpr {
    let order = if value < 0 { Order::UNARY } else { Order::ATOMIC };
    EmittedExpr::new(value.to_string(), order, ValueType::Int)
}

fn negate(operand: &EmittedExpr) -> EmittedExpr {
    EmittedExpr::new(
        // `!` cannot fuse with a following `!`, so nested negations stay bare.
        format!("!{}", operand.in_slot(Order::UNARY)),
        Order::UNARY,
        ValueType::Bool,
    )
}

fn is_literal(expr: &EmittedExpr) -> bool {
    let code = expr.code.as_str();
    code == "true"
        || code == "false"
        || code.parse::<i64>().is_ok()
        || (code.len() >= 2 && code.starts_with('"') && code.ends_with('"'))
}

fn variable_name(block: &Block) -> Option<String> {
    block
        .field("VAR")
        .map(FieldValue::as_text)
        .filter(|name| !name.trim().is_empty())
}

fn function_name(block: &Block) -> Option<String> {
    block
        .field_any(&["FUNC_NAME", "NAME"])
        .map(FieldValue::as_text)
        .filter(|name| !name.trim().is_empty())
}

pub fn quote_str(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{Machine, Program, RecordingHost, DEFAULT_INSTRUCTION_BUDGET};
    use crate::snapshot::load_json;
    use serde_json::{json, Value};

    fn block(kind: &str, id: &str) -> Value {
        json!({ "type": kind, "id": id })
    }

    fn field(mut b: Value, name: &str, value: Value) -> Value {
        b["fields"][name] = value;
        b
    }

    fn input(mut b: Value, name: &str, child: Value) -> Value {
        b["inputs"][name] = json!({ "block": child });
        b
    }

    fn num(id: &str, n: f64) -> Value {
        field(block("math_number", id), "NUM", json!(n))
    }

    fn get(id: &str, name: &str) -> Value {
        field(block("variables_get", id), "VAR", json!({ "id": format!("v_{}", name) }))
    }

    fn set(id: &str, name: &str, value: Value) -> Value {
        let b = field(block("variables_set", id), "VAR", json!({ "id": format!("v_{}", name) }));
        input(b, "VALUE", value)
    }

    fn binary(kind: &str, id: &str, op: &str, a: Value, b: Value) -> Value {
        input(input(field(block(kind, id), "OP", json!(op)), "A", a), "B", b)
    }

    fn chain(mut statements: Vec<Value>) -> Option<Value> {
        let mut next: Option<Value> = None;
        while let Some(mut stmt) = statements.pop() {
            if let Some(n) = next.take() {
                stmt["next"] = json!({ "block": n });
            }
            next = Some(stmt);
        }
        next
    }

    fn workspace(statements: Vec<Value>, others: Vec<Value>, vars: &[&str]) -> BlockGraph {
        let mut root = block("start", "root");
        if let Some(first) = chain(statements) {
            root["next"] = json!({ "block": first });
        }
        let mut top = vec![root];
        top.extend(others);
        let variables = vars
            .iter()
            .map(|v| json!({ "name": v, "id": format!("v_{}", v) }))
            .collect::<Vec<_>>();
        let doc = json!({ "blocks": { "languageVersion": 0, "blocks": top }, "variables": variables });
        load_json(&doc.to_string(), &BlockRegistry::standard()).unwrap()
    }

    fn plain() -> GeneratorOptions {
        GeneratorOptions {
            statement_prefix: None,
            ..GeneratorOptions::default()
        }
    }

    fn generate(graph: &BlockGraph, options: GeneratorOptions) -> GeneratedProgram {
        Generator::new(BlockRegistry::standard(), options)
            .generate(graph)
            .unwrap()
    }

    fn last_line(graph: &BlockGraph) -> String {
        let program = generate(graph, plain());
        program.lines.last().map(|l| l.text.clone()).unwrap_or_default()
    }

    fn set_x(expr: Value) -> BlockGraph {
        workspace(vec![set("sx", "x", expr)], vec![], &["x", "a", "b", "c"])
    }

    #[test]
    fn moves_are_emitted_in_chain_order_with_hooks() {
        let graph = workspace(
            vec![
                field(block("move_up", "m1"), "REPEAT_NUMBER", json!(3)),
                field(block("move_left", "m2"), "REPEAT_NUMBER", json!(2)),
            ],
            vec![],
            &[],
        );
        let program = generate(&graph, GeneratorOptions::default());
        assert_eq!(
            program.code(),
            "highlightBlock(\"m1\");\nmove_up(3);\nhighlightBlock(\"m2\");\nmove_left(2);"
        );
        assert_eq!(program.block_for_line(2), Some("m1"));
        assert_eq!(program.block_for_line(4), Some("m2"));
        assert_eq!(program.blocks_with_code(), vec!["m1", "m2"]);
        assert!(program.warnings.is_empty());
    }

    #[test]
    fn tighter_operand_is_not_parenthesized() {
        let expr = binary(
            "math_arithmetic",
            "add",
            "ADD",
            get("ga", "a"),
            binary("math_arithmetic", "mul", "MULTIPLY", get("gb", "b"), get("gc", "c")),
        );
        assert_eq!(last_line(&set_x(expr)), "x = a + b * c;");
    }

    #[test]
    fn looser_operand_is_parenthesized() {
        let expr = binary(
            "math_arithmetic",
            "mul",
            "MULTIPLY",
            binary("math_arithmetic", "add", "ADD", get("ga", "a"), get("gb", "b")),
            get("gc", "c"),
        );
        assert_eq!(last_line(&set_x(expr)), "x = (a + b) * c;");
    }

    #[test]
    fn subtraction_grouping_is_preserved() {
        let right = binary(
            "math_arithmetic",
            "sub",
            "MINUS",
            get("ga", "a"),
            binary("math_arithmetic", "inner", "MINUS", get("gb", "b"), get("gc", "c")),
        );
        assert_eq!(last_line(&set_x(right)), "x = a - (b - c);");
        let left = binary(
            "math_arithmetic",
            "sub",
            "MINUS",
            binary("math_arithmetic", "inner", "MINUS", get("ga", "a"), get("gb", "b")),
            get("gc", "c"),
        );
        assert_eq!(last_line(&set_x(left)), "x = a - b - c;");
    }

    #[test]
    fn negated_negative_literal_keeps_parentheses() {
        let neg = input(field(block("math_single", "neg"), "OP", json!("NEG")), "NUM", num("n", -3.0));
        assert_eq!(last_line(&set_x(neg)), "x = -(-3);");
    }

    type IntOp = fn(i32, i32) -> Option<i32>;

    const ARITHMETIC: [(&str, IntOp); 4] = [
        ("ADD", |a, b| Some(a.wrapping_add(b))),
        ("MINUS", |a, b| Some(a.wrapping_sub(b))),
        ("MULTIPLY", |a, b| Some(a.wrapping_mul(b))),
        ("DIVIDE", |a, b| (b != 0).then(|| a.wrapping_div(b))),
    ];

    /// Every tree one level deeper than `level`, paired with its value under Java int rules.
    fn deepen(level: &[(Value, Option<i32>)], ids: &mut usize) -> Vec<(Value, Option<i32>)> {
        let mut next_id = || {
            *ids += 1;
            format!("e{}", ids)
        };
        let mut trees = vec![
            (num(&next_id(), 7.0), Some(7)),
            (num(&next_id(), -3.0), Some(-3)),
            (num(&next_id(), 2.0), Some(2)),
        ];
        for (operand, value) in level {
            let neg = field(block("math_single", &next_id()), "OP", json!("NEG"));
            trees.push((input(neg, "NUM", operand.clone()), value.map(i32::wrapping_neg)));
        }
        for (op, apply) in ARITHMETIC {
            for (a, va) in level {
                for (b, vb) in level {
                    let value = va.zip(*vb).and_then(|(x, y)| apply(x, y));
                    trees.push((binary("math_arithmetic", &next_id(), op, a.clone(), b.clone()), value));
                }
            }
        }
        trees
    }

    #[test]
    fn arithmetic_trees_evaluate_like_they_read() {
        let mut ids = 0;
        let leaves = deepen(&[], &mut ids);
        let one = deepen(&leaves, &mut ids);
        let two = deepen(&one, &mut ids);
        let mut checked = 0;
        for (tree, expected) in two {
            let Some(expected) = expected else {
                continue;
            };
            let program = generate(&set_x(tree), plain());
            let code = program.code();
            let mut machine = Machine::new(
                Program::from_source(&code).unwrap_or_else(|e| panic!("{}\n{}", e, code)),
                DEFAULT_INSTRUCTION_BUDGET,
            );
            machine.run(&mut RecordingHost::new()).unwrap();
            let x = machine.variables().into_iter().find(|(name, _)| name == "x").map(|(_, v)| v);
            assert_eq!(x, Some(expected.to_string()), "{}", code);
            checked += 1;
        }
        assert!(checked > 5_000);
    }

    #[test]
    fn double_negation_needs_no_parentheses() {
        let inner = input(block("logic_negate", "inner"), "BOOL", get("gb", "b"));
        let outer = input(block("logic_negate", "outer"), "BOOL", inner);
        assert_eq!(last_line(&set_x(outer)), "x = !!b;");
    }

    #[test]
    fn huge_numbers_are_clamped_to_int() {
        let graph = workspace(vec![set("s", "x", num("big", 1e12))], vec![], &["x"]);
        let program = generate(&graph, plain());
        assert_eq!(program.lines.last().unwrap().text, "x = 2147483647;");
        assert!(program.warning_for("big").unwrap().contains("clamped"));

        let graph = workspace(vec![set("s", "x", num("small", -1e12))], vec![], &["x"]);
        let program = generate(&graph, plain());
        assert_eq!(program.lines.last().unwrap().text, "x = -2147483648;");
        Program::from_source(&program.code()).unwrap();
    }

    #[test]
    fn logic_and_comparison_nest_correctly() {
        let compare = binary("logic_compare", "lt", "LT", get("ga", "a"), get("gb", "b"));
        let not = input(block("logic_negate", "not"), "BOOL", compare);
        assert_eq!(last_line(&set_x(not)), "x = !(a < b);");

        let and_in_or = binary(
            "logic_operation",
            "or",
            "OR",
            binary(
                "logic_operation",
                "and",
                "AND",
                binary("logic_compare", "eq", "EQ", get("ga", "a"), num("one", 1.0)),
                binary("logic_compare", "gt", "GT", get("gb", "b"), num("two", 2.0)),
            ),
            binary("logic_compare", "lte", "LTE", get("gc", "c"), num("three", 3.0)),
        );
        assert_eq!(last_line(&set_x(and_in_or)), "x = a == 1 && b > 2 || c <= 3;");
    }

    #[test]
    fn ternary_and_arrays_render_as_expressions() {
        let ternary = input(
            input(
                input(block("logic_ternary", "t"), "IF", field(block("logic_boolean", "bt"), "BOOL", json!("TRUE"))),
                "THEN",
                num("n1", 1.0),
            ),
            "ELSE",
            num("n2", 2.0),
        );
        assert_eq!(last_line(&set_x(ternary)), "x = true ? 1 : 2;");

        let length = field(block("array_length", "len"), "VAR", json!({ "id": "v_a" }));
        assert_eq!(last_line(&set_x(length)), "x = a.length;");
    }

    #[test]
    fn repeat_body_is_nested_and_indented() {
        let repeat = input(
            input(block("controls_repeat_ext", "r"), "TIMES", num("n", 3.0)),
            "DO",
            block("move_up", "u"),
        );
        let graph = workspace(vec![repeat, block("rest", "z")], vec![], &[]);
        let program = generate(&graph, GeneratorOptions::default());
        assert_eq!(
            program.code(),
            [
                "highlightBlock(\"r\");",
                "for (int count = 0; count < 3; count++) {",
                "  highlightBlock(\"u\");",
                "  move_up(1);",
                "}",
                "highlightBlock(\"z\");",
                "rest();",
            ]
            .join("\n")
        );
        assert_eq!(program.block_for_line(5), Some("r"));
    }

    #[test]
    fn nested_repeats_use_distinct_counters() {
        let inner = input(
            input(block("controls_repeat_ext", "inner"), "TIMES", num("n2", 2.0)),
            "DO",
            block("push", "p"),
        );
        let outer = input(
            input(block("controls_repeat_ext", "outer"), "TIMES", num("n1", 4.0)),
            "DO",
            inner,
        );
        let graph = workspace(vec![outer], vec![], &[]);
        let code = generate(&graph, plain()).code();
        assert!(code.contains("for (int count = 0; count < 4; count++) {"));
        assert!(code.contains("  for (int count2 = 0; count2 < 2; count2++) {"));
    }

    #[test]
    fn empty_if_condition_degrades_to_false() {
        let graph = workspace(vec![block("controls_if", "if"), block("rest", "z")], vec![], &[]);
        let program = generate(&graph, plain());
        assert_eq!(program.code(), "if (false) {\n}\nrest();");
        let warning = program.warning_for("if").unwrap();
        assert!(warning.contains("IF0"));
    }

    #[test]
    fn empty_repeat_count_emits_nothing() {
        let repeat = input(block("controls_repeat_ext", "r"), "DO", block("move_up", "u"));
        let graph = workspace(vec![repeat, block("rest", "z")], vec![], &[]);
        let program = generate(&graph, plain());
        assert_eq!(program.code(), "rest();");
        assert!(program.warning_for("r").unwrap().contains("TIMES"));
        assert!(program.warning_for("z").is_none());
    }

    #[test]
    fn strict_mode_reports_the_unfilled_socket() {
        let repeat = input(block("controls_repeat_ext", "r"), "DO", block("move_up", "u"));
        let graph = workspace(vec![repeat], vec![], &[]);
        let options = GeneratorOptions {
            strict: true,
            ..plain()
        };
        let err = Generator::new(BlockRegistry::standard(), options)
            .generate(&graph)
            .unwrap_err();
        assert_eq!(
            err,
            GenerationError::UnfilledSocket {
                block: "r".to_string(),
                socket: "TIMES".to_string()
            }
        );
    }

    #[test]
    fn else_if_chain_and_else_branch() {
        let mut branch = block("controls_if", "if");
        branch = input(branch, "IF0", block("logic_wall_up", "w"));
        branch = input(branch, "DO0", block("move_down", "d"));
        branch = input(branch, "IF1", get("ga", "a"));
        branch = input(branch, "DO1", block("interact", "i"));
        branch = input(branch, "ELSE", block("move_up", "u"));
        let graph = workspace(vec![branch], vec![], &["a"]);
        let code = generate(&graph, plain()).code();
        assert_eq!(
            code,
            [
                "int a = 0;",
                "if (isNearWall(\"up\")) {",
                "  move_down(1);",
                "} else if (a) {",
                "  interact();",
                "} else {",
                "  move_up(1);",
                "}",
            ]
            .join("\n")
        );
    }

    #[test]
    fn orphans_contribute_no_code() {
        let stray = field(block("move_down", "stray"), "REPEAT_NUMBER", json!(9));
        let graph = workspace(vec![block("rest", "z")], vec![stray], &[]);
        let program = generate(&graph, GeneratorOptions::default());
        assert!(!program.code().contains("move_down"));
        assert_eq!(program.blocks_with_code(), vec!["z"]);
    }

    #[test]
    fn every_line_is_attributed() {
        let repeat = input(
            input(block("controls_repeat_ext", "r"), "TIMES", num("n", 2.0)),
            "DO",
            set("s", "x", num("five", 5.0)),
        );
        let graph = workspace(vec![repeat, block("pull", "p")], vec![], &["x"]);
        let program = generate(&graph, GeneratorOptions::default());
        let attribution = program.attribution();
        assert_eq!(attribution.len(), program.lines.len());
        for id in attribution.values() {
            assert!(graph.get(id).is_some());
        }
        for id in ["r", "s", "p"] {
            assert!(program.blocks_with_code().contains(&id));
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let graph = workspace(
            vec![
                set("s1", "b", num("n1", 1.0)),
                set("s2", "a", get("gb", "b")),
                block("fireball_left", "f"),
            ],
            vec![],
            &["a", "b"],
        );
        let first = generate(&graph, GeneratorOptions::default());
        let second = generate(&graph, GeneratorOptions::default());
        assert_eq!(first, second);
    }

    #[test]
    fn missing_root_is_reported() {
        let doc = json!({ "blocks": { "blocks": [block("move_up", "m")] } });
        let graph = load_json(&doc.to_string(), &BlockRegistry::standard()).unwrap();
        let err = Generator::new(BlockRegistry::standard(), plain())
            .generate(&graph)
            .unwrap_err();
        assert_eq!(err, GenerationError::NoProgram);
    }

    #[test]
    fn functions_come_first_and_calls_resolve() {
        let def = input(
            field(block("func_def", "def"), "FUNC_NAME", json!("patrol")),
            "DO",
            block("move_up", "u"),
        );
        let call = field(block("func_call", "call"), "FUNC_NAME", json!("patrol"));
        let missing = field(block("func_call", "bad"), "FUNC_NAME", json!("dance"));
        let graph = workspace(vec![call, missing], vec![def], &[]);
        let program = generate(&graph, plain());
        assert_eq!(program.code(), "void patrol() {\n  move_up(1);\n}\npatrol();");
        assert!(program.warning_for("bad").is_some());
    }

    #[test]
    fn value_cache_folds_straight_line_reads_only() {
        let amount = input(block("move_up_var", "m"), "amount", get("gx", "x"));
        let looped = input(
            input(block("controls_repeat_ext", "r"), "TIMES", num("two", 2.0)),
            "DO",
            set("sy", "y", num("one", 1.0)),
        );
        let read_y = input(block("move_down_var", "md"), "amount", get("gy", "y"));
        let graph = workspace(
            vec![set("sx", "x", num("five", 5.0)), amount, looped, read_y],
            vec![],
            &["x", "y"],
        );
        let options = GeneratorOptions {
            value_cache: true,
            ..plain()
        };
        let code = generate(&graph, options).code();
        assert!(code.contains("move_up(5);"));
        assert!(code.contains("move_down(y);"));
    }

    #[test]
    fn single_block_mode_declares_on_first_assignment() {
        let graph = workspace(
            vec![set("s1", "x", num("n1", 5.0)), set("s2", "x", num("n2", 6.0))],
            vec![],
            &["x"],
        );
        let options = GeneratorOptions {
            mode: EmissionMode::SingleBlock,
            ..plain()
        };
        let program = generate(&graph, options);
        let fragments = program
            .fragments
            .iter()
            .map(|f| (f.block.as_str(), f.code.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(fragments, vec![("s1", "int x = 5;"), ("s2", "x = 6;")]);
    }

    #[test]
    fn generate_block_ignores_next_link() {
        let graph = workspace(
            vec![block("push", "p"), block("pull", "q")],
            vec![],
            &[],
        );
        let program = Generator::new(BlockRegistry::standard(), GeneratorOptions::default())
            .generate_block(&graph, "p")
            .unwrap();
        assert_eq!(program.code(), "highlightBlock(\"p\");\npush();");
        assert_eq!(program.fragment_for("p").map(|f| f.code.as_str()), Some(program.code().as_str()));
    }

    #[test]
    fn level_restricted_and_disabled_blocks_are_skipped() {
        let mut disabled = block("pull", "q");
        disabled["enabled"] = json!(false);
        let graph = workspace(
            vec![block("move_up", "u"), disabled, block("push", "p")],
            vec![],
            &[],
        );
        let options = GeneratorOptions {
            disabled_types: ["move_up".to_string()].into_iter().collect(),
            ..plain()
        };
        assert_eq!(generate(&graph, options).code(), "push();");
    }

    #[test]
    fn custom_statement_prefix_is_substituted() {
        let graph = workspace(vec![block("rest", "z")], vec![], &[]);
        let options = GeneratorOptions {
            statement_prefix: Some("trace(%1);".to_string()),
            ..GeneratorOptions::default()
        };
        assert_eq!(generate(&graph, options).code(), "trace(\"z\");\nrest();");
    }

    #[test]
    fn loop_flow_outside_loop_is_rejected() {
        let brk = field(block("controls_flow_statements", "b"), "FLOW", json!("BREAK"));
        let graph = workspace(vec![brk], vec![], &[]);
        let program = generate(&graph, plain());
        assert!(program.is_empty());
        assert!(program.warning_for("b").is_some());
    }

    #[test]
    fn prelude_type_follows_first_assignment() {
        let graph = workspace(
            vec![set("s", "flag", field(block("logic_boolean", "t"), "BOOL", json!("TRUE")))],
            vec![],
            &["flag"],
        );
        assert_eq!(generate(&graph, plain()).code(), "boolean flag = false;\nflag = true;");
    }

    #[test]
    fn fractional_amount_is_truncated_with_warning() {
        let graph = workspace(
            vec![field(block("move_right", "m"), "REPEAT_NUMBER", json!(2.7))],
            vec![],
            &[],
        );
        let program = generate(&graph, plain());
        assert_eq!(program.code(), "move_right(2);");
        assert!(program.warning_for("m").unwrap().contains("truncated"));
    }

    #[test]
    fn unknown_block_types_warn_without_code() {
        let graph = workspace(vec![block("colour_picker", "c"), block("rest", "z")], vec![], &[]);
        let program = generate(&graph, plain());
        assert_eq!(program.code(), "rest();");
        assert!(program.warning_for("c").unwrap().contains("colour_picker"));
    }

    #[test]
    fn reserved_variable_names_are_renamed() {
        let graph = workspace(vec![set("s", "while", num("n", 1.0))], vec![], &["while"]);
        assert_eq!(generate(&graph, plain()).code(), "int while_ = 0;\nwhile_ = 1;");
    }
}
