use crate::ast::{Expr, Function, Place, Position, Script, Statement, TypeName, UnaryOp};
use crate::block::{Command, Direction};
use crate::codegen::HIGHLIGHT_FUNCTION;
use crate::parser::{parse_script, ParseError};
use crate::precedence::BinaryOp;
use log::{debug, trace};
use std::cell::RefCell;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

pub const DEFAULT_INSTRUCTION_BUDGET: usize = 100_000;
const MAX_CALL_DEPTH: usize = 256;
const MAX_ARRAY_LENGTH: i32 = 1_000_000;

#[derive(Debug, Clone)]
pub struct CompileError {
    pub message: String,
    pub pos: Position,
}

impl Display for CompileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (line {}, column {})", self.message, self.pos.line, self.pos.column)
    }
}

impl Error for CompileError {}

impl From<ParseError> for CompileError {
    fn from(err: ParseError) -> Self {
        CompileError {
            message: err.message,
            pos: err.pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub message: String,
    /// Source position of the faulting instruction, when known.
    pub pos: Option<Position>,
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.pos {
            Some(pos) => write!(f, "{} (line {})", self.message, pos.line),
            None => f.write_str(&self.message),
        }
    }
}

impl Error for RuntimeError {}

#[derive(Debug, Clone)]
pub enum Value {
    Int(i32),
    Bool(bool),
    Str(String),
    Array(Rc<RefCell<Vec<i32>>>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "String",
            Value::Array(_) => "int[]",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(v) => f.write_str(v),
            Value::Array(items) => {
                let items = items.borrow();
                let parts = items.iter().map(|v| v.to_string()).collect::<Vec<_>>();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Something the hero was told to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Move { direction: Direction, amount: i32 },
    Fireball(Direction),
    Command(Command),
    DropItem(String),
    Print(String),
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Move { direction, amount } => write!(f, "move_{}({})", direction, amount),
            Action::Fireball(direction) => write!(f, "fireball(\"{}\")", direction),
            Action::Command(command) => write!(f, "{}()", command.function_name()),
            Action::DropItem(item) => write!(f, "drop_item(\"{}\")", item),
            Action::Print(text) => write!(f, "print(\"{}\")", text),
        }
    }
}

/// The world the script acts on.
pub trait Host {
    fn perform(&mut self, action: &Action) -> Result<(), String>;
    fn is_near_wall(&mut self, direction: Option<Direction>) -> bool;
}

/// Host that records every action. Walls are only reported where listed.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub actions: Vec<Action>,
    pub walls: Vec<Direction>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Host for RecordingHost {
    fn perform(&mut self, action: &Action) -> Result<(), String> {
        self.actions.push(action.clone());
        Ok(())
    }

    fn is_near_wall(&mut self, direction: Option<Direction>) -> bool {
        match direction {
            Some(direction) => self.walls.contains(&direction),
            None => !self.walls.is_empty(),
        }
    }
}

/// Host for the command line: actions are printed, there are no walls.
#[derive(Debug, Default)]
pub struct ConsoleHost;

impl Host for ConsoleHost {
    fn perform(&mut self, action: &Action) -> Result<(), String> {
        println!("{}", action);
        Ok(())
    }

    fn is_near_wall(&mut self, _direction: Option<Direction>) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Global(usize),
    Local(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Move(Direction),
    Fireball,
    Command(Command),
    DropItem,
    Print,
    NearWall,
    Abs,
}

impl Builtin {
    fn named(name: &str) -> Option<Builtin> {
        let builtin = match name {
            "move_up" => Builtin::Move(Direction::Up),
            "move_down" => Builtin::Move(Direction::Down),
            "move_left" => Builtin::Move(Direction::Left),
            "move_right" => Builtin::Move(Direction::Right),
            "fireball" => Builtin::Fireball,
            "interact" => Builtin::Command(Command::Interact),
            "rest" => Builtin::Command(Command::Rest),
            "push" => Builtin::Command(Command::Push),
            "pull" => Builtin::Command(Command::Pull),
            "pickup" => Builtin::Command(Command::PickUp),
            "move_to_exit" => Builtin::Command(Command::MoveToExit),
            "drop_item" => Builtin::DropItem,
            "print" => Builtin::Print,
            "isNearWall" => Builtin::NearWall,
            "abs" => Builtin::Abs,
            _ => return None,
        };
        Some(builtin)
    }

    /// Accepted argument counts as an inclusive range.
    fn arity(self) -> (usize, usize) {
        match self {
            Builtin::Command(_) => (0, 0),
            Builtin::NearWall => (0, 1),
            _ => (1, 1),
        }
    }

    fn returns_value(self) -> bool {
        matches!(self, Builtin::NearWall | Builtin::Abs)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Op {
    PushInt(i32),
    PushBool(bool),
    PushStr(String),
    Load(Slot),
    Store(Slot),
    LoadIndex(Slot),
    StoreIndex(Slot),
    Length(Slot),
    NewArray,
    Dup,
    Pop,
    Neg,
    Not,
    Binary(BinaryOp),
    Jump(usize),
    JumpIfFalse(usize),
    JumpIfTrue(usize),
    Call(usize),
    Return,
    Builtin(Builtin, usize),
    Highlight(String),
    Halt,
}

#[derive(Debug, Clone)]
struct FunctionInfo {
    name: String,
    entry: usize,
    locals: usize,
}

/// A compiled script, ready to run in a [`Machine`].
#[derive(Debug, Clone)]
pub struct Program {
    ops: Vec<Op>,
    positions: Vec<Position>,
    functions: Vec<FunctionInfo>,
    globals: usize,
    variables: Vec<(String, usize)>,
}

impl Program {
    pub fn from_source(source: &str) -> Result<Program, CompileError> {
        let script = parse_script(source)?;
        Program::compile(&script)
    }

    pub fn compile(script: &Script) -> Result<Program, CompileError> {
        Compiler::default().compile(script)
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|f| f.name.as_str())
    }
}

#[derive(Default)]
struct LoopTargets {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

#[derive(Default)]
struct Compiler {
    ops: Vec<Op>,
    positions: Vec<Position>,
    function_ids: HashMap<String, usize>,
    functions: Vec<FunctionInfo>,
    globals: usize,
    scopes: Vec<HashMap<String, Slot>>,
    locals: Option<usize>,
    loops: Vec<LoopTargets>,
}

impl Compiler {
    fn compile(mut self, script: &Script) -> Result<Program, CompileError> {
        // A later definition with the same name replaces the earlier one.
        let mut definitions: Vec<&Function> = Vec::new();
        for function in &script.functions {
            match self.function_ids.get(&function.name) {
                Some(&id) => definitions[id] = function,
                None => {
                    self.function_ids.insert(function.name.clone(), definitions.len());
                    definitions.push(function);
                }
            }
        }

        self.scopes.push(HashMap::new());
        let mut variables = Vec::new();
        for stmt in &script.statements {
            if let Statement::Declare { pos, name, .. } = stmt {
                if self.scopes[0].contains_key(name) {
                    return compile_error(*pos, format!("variable {} is already defined", name));
                }
                let slot = self.globals;
                self.globals += 1;
                self.scopes[0].insert(name.clone(), Slot::Global(slot));
                variables.push((name.clone(), slot));
            }
        }

        for stmt in &script.statements {
            self.statement(stmt)?;
        }
        let end = script.statements.last().map_or(Position::new(1, 1), Statement::pos);
        self.emit(Op::Halt, end);

        for function in definitions {
            let entry = self.ops.len();
            self.locals = Some(0);
            self.scopes.push(HashMap::new());
            for stmt in &function.body {
                self.statement(stmt)?;
            }
            self.scopes.pop();
            self.emit(Op::Return, function.pos);
            self.functions.push(FunctionInfo {
                name: function.name.clone(),
                entry,
                locals: self.locals.take().unwrap_or(0),
            });
        }

        debug!(
            "Compiled {} instructions, {} functions, {} globals",
            self.ops.len(),
            self.functions.len(),
            self.globals
        );
        Ok(Program {
            ops: self.ops,
            positions: self.positions,
            functions: self.functions,
            globals: self.globals,
            variables,
        })
    }

    fn emit(&mut self, op: Op, pos: Position) -> usize {
        self.ops.push(op);
        self.positions.push(pos);
        self.ops.len() - 1
    }

    fn patch(&mut self, at: usize, target: usize) {
        if let Some(Op::Jump(t) | Op::JumpIfFalse(t) | Op::JumpIfTrue(t)) = self.ops.get_mut(at) {
            *t = target;
        }
    }

    fn declare(&mut self, name: &str, pos: Position) -> Result<Slot, CompileError> {
        let at_top_level = self.scopes.len() == 1 && self.locals.is_none();
        if at_top_level {
            if let Some(&slot) = self.scopes[0].get(name) {
                return Ok(slot);
            }
        }
        let innermost = self.scopes.len() - 1;
        if self.scopes[innermost].contains_key(name) {
            return compile_error(pos, format!("variable {} is already defined", name));
        }
        let slot = match self.locals.as_mut() {
            Some(count) => {
                *count += 1;
                Slot::Local(*count - 1)
            }
            None => {
                self.globals += 1;
                Slot::Global(self.globals - 1)
            }
        };
        self.scopes[innermost].insert(name.to_string(), slot);
        Ok(slot)
    }

    fn resolve(&self, name: &str, pos: Position) -> Result<Slot, CompileError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
            .ok_or_else(|| CompileError {
                message: format!("cannot find symbol: variable {}", name),
                pos,
            })
    }

    fn block(&mut self, body: &[Statement]) -> Result<(), CompileError> {
        self.scopes.push(HashMap::new());
        let result = body.iter().try_for_each(|stmt| self.statement(stmt));
        self.scopes.pop();
        result
    }

    fn statement(&mut self, stmt: &Statement) -> Result<(), CompileError> {
        match stmt {
            Statement::Declare {
                pos,
                ty,
                name,
                value,
            } => {
                match value {
                    Some(value) => self.expr(value)?,
                    None => self.default_value(*ty, *pos),
                }
                let slot = self.declare(name, *pos)?;
                self.emit(Op::Store(slot), *pos);
            }
            Statement::Assign {
                pos,
                place,
                op,
                value,
            } => self.assign(place, *op, |c| c.expr(value), *pos)?,
            Statement::Increment { pos, place, delta } => {
                let delta = i32::try_from(*delta).unwrap_or(1);
                self.assign(
                    place,
                    Some(BinaryOp::Add),
                    |c| {
                        c.emit(Op::PushInt(delta), *pos);
                        Ok(())
                    },
                    *pos,
                )?
            }
            Statement::Expr { pos, expr } => match expr {
                Expr::Call { name, args, .. } => self.call(name, args, *pos, true)?,
                _ => return compile_error(*pos, "not a statement"),
            },
            Statement::If {
                pos,
                branches,
                otherwise,
            } => {
                let mut ends = Vec::new();
                for (condition, body) in branches {
                    self.expr(condition)?;
                    let skip = self.emit(Op::JumpIfFalse(0), condition.pos());
                    self.block(body)?;
                    ends.push(self.emit(Op::Jump(0), *pos));
                    let here = self.ops.len();
                    self.patch(skip, here);
                }
                if let Some(body) = otherwise {
                    self.block(body)?;
                }
                let here = self.ops.len();
                for end in ends {
                    self.patch(end, here);
                }
            }
            Statement::While {
                pos,
                condition,
                body,
            } => {
                let start = self.ops.len();
                self.expr(condition)?;
                let exit = self.emit(Op::JumpIfFalse(0), *pos);
                self.loop_body(body)?;
                self.emit(Op::Jump(start), *pos);
                let end = self.ops.len();
                self.patch(exit, end);
                self.close_loop(start, end);
            }
            Statement::For {
                pos,
                init,
                condition,
                update,
                body,
            } => {
                self.scopes.push(HashMap::new());
                if let Some(init) = init {
                    self.statement(init)?;
                }
                let start = self.ops.len();
                let exit = match condition {
                    Some(condition) => {
                        self.expr(condition)?;
                        Some(self.emit(Op::JumpIfFalse(0), *pos))
                    }
                    None => None,
                };
                self.loop_body(body)?;
                let next = self.ops.len();
                if let Some(update) = update {
                    self.statement(update)?;
                }
                self.emit(Op::Jump(start), *pos);
                let end = self.ops.len();
                if let Some(exit) = exit {
                    self.patch(exit, end);
                }
                self.close_loop(next, end);
                self.scopes.pop();
            }
            Statement::Break { pos } | Statement::Continue { pos } => {
                let is_break = matches!(stmt, Statement::Break { .. });
                if self.loops.is_empty() {
                    let keyword = if is_break { "break" } else { "continue" };
                    return compile_error(*pos, format!("{} outside of loop", keyword));
                }
                let jump = self.emit(Op::Jump(0), *pos);
                if let Some(targets) = self.loops.last_mut() {
                    if is_break {
                        targets.breaks.push(jump);
                    } else {
                        targets.continues.push(jump);
                    }
                }
            }
            Statement::Block { body, .. } => self.block(body)?,
        }
        Ok(())
    }

    fn loop_body(&mut self, body: &[Statement]) -> Result<(), CompileError> {
        self.loops.push(LoopTargets::default());
        self.block(body)
    }

    fn close_loop(&mut self, continue_target: usize, break_target: usize) {
        let Some(targets) = self.loops.pop() else {
            return;
        };
        for at in targets.continues {
            self.patch(at, continue_target);
        }
        for at in targets.breaks {
            self.patch(at, break_target);
        }
    }

    fn assign(
        &mut self,
        place: &Place,
        op: Option<BinaryOp>,
        value: impl FnOnce(&mut Self) -> Result<(), CompileError>,
        pos: Position,
    ) -> Result<(), CompileError> {
        match place {
            Place::Var(name) => {
                let slot = self.resolve(name, pos)?;
                if op.is_some() {
                    self.emit(Op::Load(slot), pos);
                }
                value(self)?;
                if let Some(op) = op {
                    self.emit(Op::Binary(op), pos);
                }
                self.emit(Op::Store(slot), pos);
            }
            Place::Index { array, index } => {
                let slot = self.resolve(array, pos)?;
                self.expr(index)?;
                if op.is_some() {
                    self.emit(Op::Dup, pos);
                    self.emit(Op::LoadIndex(slot), pos);
                }
                value(self)?;
                if let Some(op) = op {
                    self.emit(Op::Binary(op), pos);
                }
                self.emit(Op::StoreIndex(slot), pos);
            }
        }
        Ok(())
    }

    fn default_value(&mut self, ty: TypeName, pos: Position) {
        match ty {
            TypeName::Int => self.emit(Op::PushInt(0), pos),
            TypeName::Bool => self.emit(Op::PushBool(false), pos),
            TypeName::Str => self.emit(Op::PushStr(String::new()), pos),
            TypeName::IntArray => {
                self.emit(Op::PushInt(0), pos);
                self.emit(Op::NewArray, pos)
            }
        };
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Int { pos, value } => {
                let Ok(value) = i32::try_from(*value) else {
                    return compile_error(*pos, format!("integer number too large: {}", value));
                };
                self.emit(Op::PushInt(value), *pos);
            }
            Expr::Bool { pos, value } => {
                self.emit(Op::PushBool(*value), *pos);
            }
            Expr::Str { pos, value } => {
                self.emit(Op::PushStr(value.clone()), *pos);
            }
            Expr::Var { pos, name } => {
                let slot = self.resolve(name, *pos)?;
                self.emit(Op::Load(slot), *pos);
            }
            Expr::Index { pos, array, index } => {
                let slot = self.resolve(array, *pos)?;
                self.expr(index)?;
                self.emit(Op::LoadIndex(slot), *pos);
            }
            Expr::Length { pos, array } => {
                let slot = self.resolve(array, *pos)?;
                self.emit(Op::Length(slot), *pos);
            }
            Expr::NewArray { pos, length } => {
                self.expr(length)?;
                self.emit(Op::NewArray, *pos);
            }
            Expr::Call { pos, name, args } => self.call(name, args, *pos, false)?,
            Expr::Unary {
                pos,
                op: UnaryOp::Neg,
                operand,
            } if matches!(**operand, Expr::Int { value, .. } if value == -i64::from(i32::MIN)) => {
                // The one int literal only valid under a minus sign.
                self.emit(Op::PushInt(i32::MIN), *pos);
            }
            Expr::Unary { pos, op, operand } => {
                self.expr(operand)?;
                let op = match op {
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Not => Op::Not,
                };
                self.emit(op, *pos);
            }
            Expr::Binary {
                pos,
                op: op @ (BinaryOp::And | BinaryOp::Or),
                left,
                right,
            } => {
                self.expr(left)?;
                self.emit(Op::Dup, *pos);
                let short = if *op == BinaryOp::And {
                    self.emit(Op::JumpIfFalse(0), *pos)
                } else {
                    self.emit(Op::JumpIfTrue(0), *pos)
                };
                self.emit(Op::Pop, *pos);
                self.expr(right)?;
                let end = self.ops.len();
                self.patch(short, end);
            }
            Expr::Binary {
                pos,
                op,
                left,
                right,
            } => {
                self.expr(left)?;
                self.expr(right)?;
                self.emit(Op::Binary(*op), *pos);
            }
            Expr::Conditional {
                pos,
                condition,
                then,
                otherwise,
            } => {
                self.expr(condition)?;
                let skip = self.emit(Op::JumpIfFalse(0), *pos);
                self.expr(then)?;
                let end = self.emit(Op::Jump(0), *pos);
                let here = self.ops.len();
                self.patch(skip, here);
                self.expr(otherwise)?;
                let here = self.ops.len();
                self.patch(end, here);
            }
        }
        Ok(())
    }

    fn call(
        &mut self,
        name: &str,
        args: &[Expr],
        pos: Position,
        as_statement: bool,
    ) -> Result<(), CompileError> {
        if name == HIGHLIGHT_FUNCTION {
            if !as_statement {
                return compile_error(pos, "'void' type not allowed here");
            }
            return match args {
                [Expr::Str { value, .. }] => {
                    self.emit(Op::Highlight(value.clone()), pos);
                    Ok(())
                }
                _ => compile_error(pos, format!("{} expects one string literal", name)),
            };
        }
        if let Some(builtin) = Builtin::named(name) {
            let (min, max) = builtin.arity();
            if args.len() < min || args.len() > max {
                return compile_error(
                    pos,
                    format!("method {} cannot be applied to {} arguments", name, args.len()),
                );
            }
            if !as_statement && !builtin.returns_value() {
                return compile_error(pos, "'void' type not allowed here");
            }
            for arg in args {
                self.expr(arg)?;
            }
            self.emit(Op::Builtin(builtin, args.len()), pos);
            if as_statement && builtin.returns_value() {
                self.emit(Op::Pop, pos);
            }
            return Ok(());
        }
        let Some(&id) = self.function_ids.get(name) else {
            return compile_error(pos, format!("cannot find symbol: method {}", name));
        };
        if !args.is_empty() {
            return compile_error(pos, format!("method {} takes no arguments", name));
        }
        if !as_statement {
            return compile_error(pos, "'void' type not allowed here");
        }
        self.emit(Op::Call(id), pos);
        Ok(())
    }
}

fn compile_error<T>(pos: Position, message: impl Into<String>) -> Result<T, CompileError> {
    Err(CompileError {
        message: message.into(),
        pos,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEvent {
    /// The script reported the block about to run.
    Highlight(String),
    Completed,
}

enum Flow {
    Continue,
    Highlight(String),
    Halt,
}

struct Frame {
    return_pc: usize,
    locals: Vec<Value>,
}

/// Executes a [`Program`] one highlight at a time.
pub struct Machine {
    program: Program,
    pc: usize,
    stack: Vec<Value>,
    globals: Vec<Value>,
    frames: Vec<Frame>,
    budget: usize,
    executed: u64,
    finished: bool,
}

impl Machine {
    pub fn new(program: Program, budget: usize) -> Self {
        let globals = vec![Value::Int(0); program.globals];
        Self {
            program,
            pc: 0,
            stack: Vec::new(),
            globals,
            frames: Vec::new(),
            budget: budget.max(1),
            executed: 0,
            finished: false,
        }
    }

    pub fn from_source(source: &str, budget: usize) -> Result<Self, CompileError> {
        Ok(Machine::new(Program::from_source(source)?, budget))
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Instructions executed since the machine was created.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Top-level variables with their current values, in declaration order.
    pub fn variables(&self) -> Vec<(String, String)> {
        self.program
            .variables
            .iter()
            .filter_map(|(name, slot)| {
                self.globals.get(*slot).map(|value| (name.clone(), value.to_string()))
            })
            .collect()
    }

    /// Runs until the next highlight or the end of the program.
    ///
    /// Running more than the instruction budget without reaching either is a fault.
    pub fn step(&mut self, host: &mut dyn Host) -> Result<StepEvent, RuntimeError> {
        if self.finished {
            return Ok(StepEvent::Completed);
        }
        for _ in 0..self.budget {
            let pc = self.pc;
            let Some(op) = self.program.ops.get(pc).cloned() else {
                self.finish();
                return Ok(StepEvent::Completed);
            };
            self.pc += 1;
            self.executed += 1;
            trace!("{:>5}: {:?}", pc, op);
            match self.execute(op, host) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Highlight(id)) => return Ok(StepEvent::Highlight(id)),
                Ok(Flow::Halt) => {
                    self.finish();
                    return Ok(StepEvent::Completed);
                }
                Err(message) => {
                    self.finish();
                    return Err(RuntimeError {
                        message,
                        pos: self.program.positions.get(pc).copied(),
                    });
                }
            }
        }
        let pos = self.program.positions.get(self.pc).copied();
        self.finish();
        Err(RuntimeError {
            message: format!(
                "Instruction budget of {} exhausted before the next highlight.",
                self.budget
            ),
            pos,
        })
    }

    /// Runs to completion, ignoring highlights.
    pub fn run(&mut self, host: &mut dyn Host) -> Result<(), RuntimeError> {
        while self.step(host)? != StepEvent::Completed {}
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
        self.stack.clear();
        self.frames.clear();
    }

    fn execute(&mut self, op: Op, host: &mut dyn Host) -> Result<Flow, String> {
        match op {
            Op::PushInt(v) => self.stack.push(Value::Int(v)),
            Op::PushBool(v) => self.stack.push(Value::Bool(v)),
            Op::PushStr(v) => self.stack.push(Value::Str(v)),
            Op::Load(slot) => {
                let value = self.slot(slot)?.clone();
                self.stack.push(value);
            }
            Op::Store(slot) => {
                let value = self.pop()?;
                *self.slot(slot)? = value;
            }
            Op::LoadIndex(slot) => {
                let index = self.pop_int()?;
                let array = self.array(slot)?;
                let items = array.borrow();
                let value = checked_index(index, items.len()).map(|i| items[i])?;
                self.stack.push(Value::Int(value));
            }
            Op::StoreIndex(slot) => {
                let value = self.pop_int()?;
                let index = self.pop_int()?;
                let array = self.array(slot)?;
                let mut items = array.borrow_mut();
                let i = checked_index(index, items.len())?;
                items[i] = value;
            }
            Op::Length(slot) => {
                let len = self.array(slot)?.borrow().len();
                self.stack.push(Value::Int(len as i32));
            }
            Op::NewArray => {
                let len = self.pop_int()?;
                if len < 0 {
                    return Err(format!("NegativeArraySizeException: {}", len));
                }
                if len > MAX_ARRAY_LENGTH {
                    return Err(format!("Array length {} exceeds the limit of {}", len, MAX_ARRAY_LENGTH));
                }
                self.stack
                    .push(Value::Array(Rc::new(RefCell::new(vec![0; len as usize]))));
            }
            Op::Dup => {
                let top = self.stack.last().cloned().ok_or("Stack underflow")?;
                self.stack.push(top);
            }
            Op::Pop => {
                self.pop()?;
            }
            Op::Neg => {
                let v = self.pop_int()?;
                self.stack.push(Value::Int(v.wrapping_neg()));
            }
            Op::Not => {
                let v = self.pop_bool()?;
                self.stack.push(Value::Bool(!v));
            }
            Op::Binary(op) => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.stack.push(binary(op, left, right)?);
            }
            Op::Jump(target) => self.pc = target,
            Op::JumpIfFalse(target) => {
                if !self.pop_bool()? {
                    self.pc = target;
                }
            }
            Op::JumpIfTrue(target) => {
                if self.pop_bool()? {
                    self.pc = target;
                }
            }
            Op::Call(id) => {
                if self.frames.len() >= MAX_CALL_DEPTH {
                    return Err("StackOverflowError".to_string());
                }
                let function = self
                    .program
                    .functions
                    .get(id)
                    .ok_or_else(|| format!("Unknown function #{}", id))?;
                self.frames.push(Frame {
                    return_pc: self.pc,
                    locals: vec![Value::Int(0); function.locals],
                });
                self.pc = function.entry;
            }
            Op::Return => match self.frames.pop() {
                Some(frame) => self.pc = frame.return_pc,
                None => return Ok(Flow::Halt),
            },
            Op::Builtin(builtin, argc) => {
                if self.stack.len() < argc {
                    return Err("Stack underflow".to_string());
                }
                let args = self.stack.split_off(self.stack.len() - argc);
                if let Some(result) = call_builtin(builtin, args, host)? {
                    self.stack.push(result);
                }
            }
            Op::Highlight(id) => return Ok(Flow::Highlight(id)),
            Op::Halt => return Ok(Flow::Halt),
        }
        Ok(Flow::Continue)
    }

    fn slot(&mut self, slot: Slot) -> Result<&mut Value, String> {
        match slot {
            Slot::Global(i) => self.globals.get_mut(i),
            Slot::Local(i) => self.frames.last_mut().and_then(|f| f.locals.get_mut(i)),
        }
        .ok_or_else(|| format!("Invalid variable slot {:?}", slot))
    }

    fn array(&mut self, slot: Slot) -> Result<Rc<RefCell<Vec<i32>>>, String> {
        match self.slot(slot)? {
            Value::Array(items) => Ok(Rc::clone(items)),
            other => Err(format!(
                "incompatible types: {} cannot be indexed",
                other.type_name()
            )),
        }
    }

    fn pop(&mut self) -> Result<Value, String> {
        self.stack.pop().ok_or_else(|| "Stack underflow".to_string())
    }

    fn pop_int(&mut self) -> Result<i32, String> {
        expect_int(self.pop()?)
    }

    fn pop_bool(&mut self) -> Result<bool, String> {
        match self.pop()? {
            Value::Bool(v) => Ok(v),
            other => Err(format!(
                "incompatible types: {} cannot be converted to boolean",
                other.type_name()
            )),
        }
    }
}

fn expect_int(value: Value) -> Result<i32, String> {
    match value {
        Value::Int(v) => Ok(v),
        other => Err(format!(
            "incompatible types: {} cannot be converted to int",
            other.type_name()
        )),
    }
}

fn checked_index(index: i32, len: usize) -> Result<usize, String> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| format!("Index {} out of bounds for length {}", index, len))
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, String> {
    if op == BinaryOp::Add && (matches!(left, Value::Str(_)) || matches!(right, Value::Str(_))) {
        return Ok(Value::Str(format!("{}{}", left, right)));
    }
    match op {
        BinaryOp::Equal => return Ok(Value::Bool(left == right)),
        BinaryOp::NotEqual => return Ok(Value::Bool(left != right)),
        BinaryOp::And | BinaryOp::Or => {
            return match (left, right) {
                (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(if op == BinaryOp::And {
                    a && b
                } else {
                    a || b
                })),
                (a, b) => Err(format!(
                    "bad operand types for {}: {}, {}",
                    op.symbol(),
                    a.type_name(),
                    b.type_name()
                )),
            };
        }
        _ => {}
    }
    let a = expect_int(left)?;
    let b = expect_int(right)?;
    let value = match op {
        BinaryOp::Add => Value::Int(a.wrapping_add(b)),
        BinaryOp::Subtract => Value::Int(a.wrapping_sub(b)),
        BinaryOp::Multiply => Value::Int(a.wrapping_mul(b)),
        BinaryOp::Divide | BinaryOp::Modulo if b == 0 => {
            return Err("ArithmeticException: / by zero".to_string());
        }
        BinaryOp::Divide => Value::Int(a.wrapping_div(b)),
        BinaryOp::Modulo => Value::Int(a.wrapping_rem(b)),
        BinaryOp::Less => Value::Bool(a < b),
        BinaryOp::LessEq => Value::Bool(a <= b),
        BinaryOp::Greater => Value::Bool(a > b),
        BinaryOp::GreaterEq => Value::Bool(a >= b),
        BinaryOp::Equal | BinaryOp::NotEqual | BinaryOp::And | BinaryOp::Or => {
            return Err(format!("unexpected operator {}", op.symbol()));
        }
    };
    Ok(value)
}

fn call_builtin(
    builtin: Builtin,
    args: Vec<Value>,
    host: &mut dyn Host,
) -> Result<Option<Value>, String> {
    let mut args = args.into_iter();
    let action = match builtin {
        Builtin::Move(direction) => Action::Move {
            direction,
            amount: expect_int(args.next().ok_or("missing amount")?)?,
        },
        Builtin::Fireball => Action::Fireball(direction_arg(args.next())?),
        Builtin::Command(command) => Action::Command(command),
        Builtin::DropItem => Action::DropItem(args.next().map(|v| v.to_string()).unwrap_or_default()),
        Builtin::Print => Action::Print(args.next().map(|v| v.to_string()).unwrap_or_default()),
        Builtin::NearWall => {
            let direction = match args.next() {
                Some(arg) => Some(direction_arg(Some(arg))?),
                None => None,
            };
            return Ok(Some(Value::Bool(host.is_near_wall(direction))));
        }
        Builtin::Abs => {
            let v = expect_int(args.next().ok_or("missing argument")?)?;
            return Ok(Some(Value::Int(v.wrapping_abs())));
        }
    };
    host.perform(&action)?;
    Ok(None)
}

fn direction_arg(value: Option<Value>) -> Result<Direction, String> {
    match value {
        Some(Value::Str(name)) => {
            Direction::from_name(&name).ok_or_else(|| format!("Unknown direction \"{}\"", name))
        }
        Some(other) => Err(format!(
            "incompatible types: {} cannot be converted to String",
            other.type_name()
        )),
        None => Err("missing direction".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (Machine, RecordingHost) {
        let mut machine = Machine::from_source(source, DEFAULT_INSTRUCTION_BUDGET).unwrap();
        let mut host = RecordingHost::new();
        machine.run(&mut host).unwrap();
        (machine, host)
    }

    fn value_of(source: &str, name: &str) -> String {
        let (machine, _) = run(source);
        machine
            .variables()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .unwrap()
    }

    fn fault(source: &str) -> RuntimeError {
        let mut machine = Machine::from_source(source, 1_000).unwrap();
        machine.run(&mut RecordingHost::new()).unwrap_err()
    }

    #[test]
    fn highlights_pause_before_each_statement() {
        let source = "highlightBlock(\"b1\");\nmove_up(3);\nhighlightBlock(\"b2\");\nmove_left(2);\n";
        let mut machine = Machine::from_source(source, DEFAULT_INSTRUCTION_BUDGET).unwrap();
        let mut host = RecordingHost::new();
        assert_eq!(machine.step(&mut host).unwrap(), StepEvent::Highlight("b1".into()));
        assert!(host.actions.is_empty());
        assert_eq!(machine.step(&mut host).unwrap(), StepEvent::Highlight("b2".into()));
        assert_eq!(
            host.actions,
            vec![Action::Move {
                direction: Direction::Up,
                amount: 3
            }]
        );
        assert_eq!(machine.step(&mut host).unwrap(), StepEvent::Completed);
        assert_eq!(host.actions.len(), 2);
        assert!(machine.is_finished());
        assert_eq!(machine.step(&mut host).unwrap(), StepEvent::Completed);
    }

    #[test]
    fn arithmetic_follows_java_grouping() {
        assert_eq!(value_of("int x = 2 + 3 * 4;", "x"), "14");
        assert_eq!(value_of("int x = (2 + 3) * 4;", "x"), "20");
        assert_eq!(value_of("int x = 10 - (4 - 3);", "x"), "9");
        assert_eq!(value_of("int x = 10 - 4 - 3;", "x"), "3");
        assert_eq!(value_of("int x = -(-3);", "x"), "3");
        assert_eq!(value_of("int x = -7 / 2;", "x"), "-3");
        assert_eq!(value_of("int x = -7 % 3;", "x"), "-1");
        assert_eq!(value_of("int x = 2147483647 + 1;", "x"), "-2147483648");
        assert_eq!(value_of("int x = 1 < 2 ? 5 : 6;", "x"), "5");
        assert_eq!(value_of("String s = \"hp: \" + 3;", "s"), "hp: 3");
    }

    #[test]
    fn logic_short_circuits() {
        assert_eq!(value_of("boolean b = false && 1 / 0 == 0;", "b"), "false");
        assert_eq!(value_of("boolean b = true || 1 / 0 == 0;", "b"), "true");
        assert_eq!(value_of("boolean b = !(1 < 2) || 3 >= 3 && 2 != 2;", "b"), "false");
    }

    #[test]
    fn loops_break_and_continue() {
        let source = r#"
int total = 0;
for (int count = 0; count < 10; count++) {
  if (count == 6) {
    break;
  } else if (count % 2 == 1) {
    continue;
  }
  total += count;
}
int n = 0;
while (n < 3) {
  n = n + 1;
}
"#;
        assert_eq!(value_of(source, "total"), "6");
        assert_eq!(value_of(source, "n"), "3");
    }

    #[test]
    fn sibling_loops_may_reuse_counter_names() {
        let source = "int t = 0;\nfor (int count = 0; count < 2; count++) { t += 1; }\nfor (int count = 0; count < 3; count++) { t += 1; }\n";
        assert_eq!(value_of(source, "t"), "5");
    }

    #[test]
    fn arrays_store_and_measure() {
        let source = "int[] a = new int[3];\na[1] = 4;\na[1] += 2;\nint n = a.length + a[1];\n";
        assert_eq!(value_of(source, "n"), "9");
        assert_eq!(value_of(source, "a"), "[0, 6, 0]");
    }

    #[test]
    fn functions_see_globals_and_keep_locals() {
        let source = r#"
void walk() {
  int steps = 2;
  move_right(steps);
  hits += 1;
}
int hits = 0;
walk();
walk();
"#;
        let (machine, host) = run(source);
        assert_eq!(host.actions.len(), 2);
        assert_eq!(machine.variables(), vec![("hits".to_string(), "2".to_string())]);
    }

    #[test]
    fn sensors_and_commands_reach_the_host() {
        let mut machine = Machine::from_source(
            "while (!isNearWall(\"up\")) { move_up(1); }\nfireball(\"left\");\npickup();\nprint(abs(-4));",
            DEFAULT_INSTRUCTION_BUDGET,
        )
        .unwrap();
        let mut host = RecordingHost::new();
        host.walls.push(Direction::Up);
        machine.run(&mut host).unwrap();
        let rendered = host.actions.iter().map(|a| a.to_string()).collect::<Vec<_>>();
        assert_eq!(rendered, vec!["fireball(\"left\")", "pickup()", "print(\"4\")"]);
    }

    #[test]
    fn division_by_zero_reports_its_line() {
        let err = fault("int x = 1;\nx = x / 0;");
        assert_eq!(err.message, "ArithmeticException: / by zero");
        assert_eq!(err.pos.map(|p| p.line), Some(2));
    }

    #[test]
    fn out_of_bounds_access_faults() {
        let err = fault("int[] a = new int[2];\na[2] = 1;");
        assert_eq!(err.message, "Index 2 out of bounds for length 2");
    }

    #[test]
    fn runaway_recursion_overflows() {
        let err = fault("void spin() { spin(); }\nspin();");
        assert_eq!(err.message, "StackOverflowError");
    }

    #[test]
    fn endless_loop_exhausts_the_budget() {
        let err = fault("while (true) { }");
        assert!(err.message.contains("budget"));
    }

    #[test]
    fn compile_errors_name_the_problem() {
        let err = Program::from_source("x = 1;").unwrap_err();
        assert_eq!(err.message, "cannot find symbol: variable x");
        let err = Program::from_source("break;").unwrap_err();
        assert_eq!(err.message, "break outside of loop");
        let err = Program::from_source("jump();").unwrap_err();
        assert_eq!(err.message, "cannot find symbol: method jump");
        let err = Program::from_source("int x = move_up(1);").unwrap_err();
        assert_eq!(err.message, "'void' type not allowed here");
        let err = Program::from_source("int x = 0;\nint x = 1;").unwrap_err();
        assert_eq!(err.pos.line, 2);
    }

    #[test]
    fn later_function_definition_wins() {
        let (_, host) = run("void f() { move_up(1); }\nvoid f() { move_down(1); }\nf();");
        assert_eq!(
            host.actions,
            vec![Action::Move {
                direction: Direction::Down,
                amount: 1
            }]
        );
    }

    #[test]
    fn smallest_int_literal_is_accepted_only_when_negated() {
        assert_eq!(value_of("int x = -2147483648;", "x"), "-2147483648");
        assert!(Program::from_source("int x = 2147483648;").is_err());
    }
}
