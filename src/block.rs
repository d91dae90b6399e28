use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

pub type BlockId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }

    pub fn from_name(name: &str) -> Option<Direction> {
        match name.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Argument-less hero commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Interact,
    Rest,
    Push,
    Pull,
    PickUp,
    MoveToExit,
}

impl Command {
    pub fn function_name(self) -> &'static str {
        match self {
            Command::Interact => "interact",
            Command::Rest => "rest",
            Command::Push => "push",
            Command::Pull => "pull",
            Command::PickUp => "pickup",
            Command::MoveToExit => "move_to_exit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Start,
    Move(Direction),
    Fireball(Direction),
    Command(Command),
    DropItem,
    Print,
    Repeat,
    While,
    For,
    If,
    LoopFlow,
    Number,
    Boolean,
    Text,
    Arithmetic,
    Modulo,
    Single,
    Compare,
    Logic,
    Not,
    Ternary,
    WallCheck(Option<Direction>),
    VariableGet,
    VariableSet,
    ChangeVariable,
    ArrayCreate,
    ArraySet,
    ArrayGet,
    ArrayLength,
    FunctionDef,
    FunctionCall,
    Unknown(String),
}

impl BlockKind {
    /// Value blocks plug into sockets; everything else chains as a statement.
    pub fn is_value(&self) -> bool {
        matches!(
            self,
            BlockKind::Number
                | BlockKind::Boolean
                | BlockKind::Text
                | BlockKind::Arithmetic
                | BlockKind::Modulo
                | BlockKind::Single
                | BlockKind::Compare
                | BlockKind::Logic
                | BlockKind::Not
                | BlockKind::Ternary
                | BlockKind::WallCheck(_)
                | BlockKind::VariableGet
                | BlockKind::ArrayGet
                | BlockKind::ArrayLength
        )
    }

    pub fn is_statement(&self) -> bool {
        !self.is_value() && !matches!(self, BlockKind::Unknown(_))
    }

    /// Names of the sockets holding nested statement chains rather than values.
    pub fn is_statement_socket(&self, name: &str) -> bool {
        match self {
            BlockKind::Repeat | BlockKind::While | BlockKind::For => name == "DO",
            BlockKind::If => name == "ELSE" || name.starts_with("DO"),
            BlockKind::FunctionDef => name == "DO" || name == "STACK",
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Bool(bool),
    /// Variable field, resolved to the variable's display name.
    Variable { id: Option<String>, name: String },
}

impl FieldValue {
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) => format_number(*n),
            FieldValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            FieldValue::Variable { name, .. } => name.clone(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Value(BlockId),
    Statement(BlockId),
    Empty,
}

impl Input {
    pub fn block_id(&self) -> Option<&str> {
        match self {
            Input::Value(id) | Input::Statement(id) => Some(id),
            Input::Empty => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub type_name: String,
    pub kind: BlockKind,
    pub fields: BTreeMap<String, FieldValue>,
    pub inputs: BTreeMap<String, Input>,
    pub next: Option<BlockId>,
    pub enabled: bool,
    pub shadow: bool,
    pub top_level: bool,
    pub position: Option<(i64, i64)>,
}

impl Block {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// First present field among `names`.
    pub fn field_any(&self, names: &[&str]) -> Option<&FieldValue> {
        names.iter().find_map(|n| self.fields.get(*n))
    }

    pub fn input(&self, name: &str) -> Option<&str> {
        self.inputs.get(name).and_then(Input::block_id)
    }

    /// First connected input among `names`, with the name it was found under.
    pub fn input_any<'a>(&'a self, names: &[&'a str]) -> Option<(&'a str, &'a str)> {
        names
            .iter()
            .find_map(|n| self.input(n).map(|id| (*n, id)))
    }
}

/// Maps editor type names onto block kinds. Deployment variants add aliases or drop kinds.
#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    kinds: HashMap<String, BlockKind>,
}

impl BlockRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register("start", BlockKind::Start);
        for dir in [Direction::Up, Direction::Down, Direction::Left, Direction::Right] {
            registry.register(&format!("move_{}", dir), BlockKind::Move(dir));
            registry.register(&format!("move_{}_var", dir), BlockKind::Move(dir));
            registry.register(&format!("fireball_{}", dir), BlockKind::Fireball(dir));
            registry.register(&format!("logic_wall_{}", dir), BlockKind::WallCheck(Some(dir)));
        }
        for cmd in [
            Command::Interact,
            Command::Rest,
            Command::Push,
            Command::Pull,
            Command::PickUp,
            Command::MoveToExit,
        ] {
            registry.register(cmd.function_name(), BlockKind::Command(cmd));
        }
        registry.register("logic_wall", BlockKind::WallCheck(None));
        registry.register("drop_item", BlockKind::DropItem);
        registry.register("text_print", BlockKind::Print);
        for name in ["repeat", "controls_repeat_ext", "controls_repeat"] {
            registry.register(name, BlockKind::Repeat);
        }
        registry.register("while_loop", BlockKind::While);
        registry.register("controls_whileUntil", BlockKind::While);
        registry.register("controls_for", BlockKind::For);
        registry.register("controls_if", BlockKind::If);
        registry.register("controls_ifelse", BlockKind::If);
        registry.register("controls_flow_statements", BlockKind::LoopFlow);
        for name in ["math_number", "var_number", "repeat_number"] {
            registry.register(name, BlockKind::Number);
        }
        registry.register("logic_boolean", BlockKind::Boolean);
        registry.register("text", BlockKind::Text);
        registry.register("math_arithmetic", BlockKind::Arithmetic);
        registry.register("expression", BlockKind::Arithmetic);
        registry.register("math_modulo", BlockKind::Modulo);
        registry.register("math_single", BlockKind::Single);
        registry.register("logic_compare", BlockKind::Compare);
        registry.register("usual_condition", BlockKind::Compare);
        registry.register("logic_operation", BlockKind::Logic);
        registry.register("logic_operator", BlockKind::Logic);
        registry.register("logic_negate", BlockKind::Not);
        registry.register("not_condition", BlockKind::Not);
        registry.register("logic_ternary", BlockKind::Ternary);
        for name in ["variables_get", "get_variable", "get_number"] {
            registry.register(name, BlockKind::VariableGet);
        }
        for name in ["variables_set", "set_number", "set_number_expression"] {
            registry.register(name, BlockKind::VariableSet);
        }
        registry.register("math_change", BlockKind::ChangeVariable);
        registry.register("var_array", BlockKind::ArrayCreate);
        registry.register("array_set", BlockKind::ArraySet);
        registry.register("array_get", BlockKind::ArrayGet);
        registry.register("array_length", BlockKind::ArrayLength);
        registry.register("func_def", BlockKind::FunctionDef);
        registry.register("procedures_defnoreturn", BlockKind::FunctionDef);
        registry.register("func_call", BlockKind::FunctionCall);
        registry.register("procedures_callnoreturn", BlockKind::FunctionCall);
        registry
    }

    pub fn register(&mut self, type_name: &str, kind: BlockKind) {
        self.kinds.insert(type_name.to_string(), kind);
    }

    pub fn unregister(&mut self, type_name: &str) -> Option<BlockKind> {
        self.kinds.remove(type_name)
    }

    pub fn resolve(&self, type_name: &str) -> BlockKind {
        self.kinds
            .get(type_name)
            .cloned()
            .unwrap_or_else(|| BlockKind::Unknown(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.kinds.contains_key(type_name)
    }
}

pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.is_finite() {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}
