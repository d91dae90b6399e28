/// Binding strength of an emitted expression. Lower values bind tighter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Order(pub u16);

impl Order {
    pub const ATOMIC: Order = Order(0);
    pub const MEMBER: Order = Order(10);
    pub const CALL: Order = Order(20);
    pub const UNARY: Order = Order(40);
    pub const MULTIPLICATION: Order = Order(50);
    pub const DIVISION: Order = Order(51);
    pub const MODULUS: Order = Order(52);
    pub const ADDITION: Order = Order(60);
    pub const SUBTRACTION: Order = Order(61);
    pub const RELATIONAL: Order = Order(80);
    pub const EQUALITY: Order = Order(90);
    pub const LOGICAL_AND: Order = Order(130);
    pub const LOGICAL_OR: Order = Order(140);
    pub const CONDITIONAL: Order = Order(150);
    pub const NONE: Order = Order(u16::MAX);

    /// The loosest order strictly tighter than `self`.
    pub fn tighter(self) -> Order {
        Order(self.0.saturating_sub(1))
    }

    /// Whether a child of this order must be wrapped in a slot tolerating `slot`.
    pub fn needs_parens_in(self, slot: Order) -> bool {
        self > slot
    }
}

/// Embeds `code` (of order `inner`) into a slot tolerating at most `slot`.
pub fn embed(code: &str, inner: Order, slot: Order) -> String {
    if inner.needs_parens_in(slot) {
        format!("({})", code)
    } else {
        code.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int,
    Bool,
    Text,
}

impl ValueType {
    pub fn java_name(self) -> &'static str {
        match self {
            ValueType::Int => "int",
            ValueType::Bool => "boolean",
            ValueType::Text => "String",
        }
    }

    /// Literal used for unfilled sockets and fresh declarations.
    pub fn placeholder(self) -> EmittedExpr {
        let code = match self {
            ValueType::Int => "0",
            ValueType::Bool => "false",
            ValueType::Text => "\"\"",
        };
        EmittedExpr::atomic(code, self)
    }
}

/// One emitted value: code text tagged with its binding strength.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedExpr {
    pub code: String,
    pub order: Order,
    pub ty: ValueType,
}

impl EmittedExpr {
    pub fn new(code: impl Into<String>, order: Order, ty: ValueType) -> Self {
        Self {
            code: code.into(),
            order,
            ty,
        }
    }

    pub fn atomic(code: impl Into<String>, ty: ValueType) -> Self {
        Self::new(code, Order::ATOMIC, ty)
    }

    /// Code ready to be placed in a slot tolerating `slot`.
    pub fn in_slot(&self, slot: Order) -> String {
        embed(&self.code, self.order, slot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOp {
    /// Accepts both Blockly dropdown values (`ADD`, `LTE`) and the dungeon's symbol spellings.
    pub fn from_field(value: &str) -> Option<BinaryOp> {
        let op = match value.trim() {
            "ADD" | "+" => BinaryOp::Add,
            "MINUS" | "-" => BinaryOp::Subtract,
            "MULTIPLY" | "*" => BinaryOp::Multiply,
            "DIVIDE" | "/" => BinaryOp::Divide,
            "MODULO" | "%" => BinaryOp::Modulo,
            "LT" | "<" => BinaryOp::Less,
            "LTE" | "<=" => BinaryOp::LessEq,
            "GT" | ">" => BinaryOp::Greater,
            "GTE" | ">=" => BinaryOp::GreaterEq,
            "EQ" | "==" => BinaryOp::Equal,
            "NEQ" | "!=" => BinaryOp::NotEqual,
            "AND" | "&&" => BinaryOp::And,
            "OR" | "||" => BinaryOp::Or,
            _ => return None,
        };
        Some(op)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn result_type(self) -> ValueType {
        match self {
            BinaryOp::Add
            | BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::Modulo => ValueType::Int,
            _ => ValueType::Bool,
        }
    }

    pub fn order(self) -> Order {
        match self {
            BinaryOp::Add => Order::ADDITION,
            BinaryOp::Subtract => Order::SUBTRACTION,
            BinaryOp::Multiply => Order::MULTIPLICATION,
            BinaryOp::Divide => Order::DIVISION,
            BinaryOp::Modulo => Order::MODULUS,
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
                Order::RELATIONAL
            }
            BinaryOp::Equal | BinaryOp::NotEqual => Order::EQUALITY,
            BinaryOp::And => Order::LOGICAL_AND,
            BinaryOp::Or => Order::LOGICAL_OR,
        }
    }

    /// Loosest orders tolerated by the (left, right) operand slots.
    ///
    /// Left operands accept their whole precedence class because every operator here is
    /// left-associative. Right operands accept the operator itself only where regrouping
    /// cannot change the result.
    pub fn operand_slots(self) -> (Order, Order) {
        match self {
            BinaryOp::Add => (Order::SUBTRACTION, Order::ADDITION),
            BinaryOp::Subtract => (Order::SUBTRACTION, Order::ADDITION.tighter()),
            BinaryOp::Multiply => (Order::MODULUS, Order::MULTIPLICATION),
            BinaryOp::Divide | BinaryOp::Modulo => {
                (Order::MODULUS, Order::MULTIPLICATION.tighter())
            }
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
                (Order::RELATIONAL.tighter(), Order::RELATIONAL.tighter())
            }
            BinaryOp::Equal | BinaryOp::NotEqual => {
                (Order::EQUALITY.tighter(), Order::EQUALITY.tighter())
            }
            BinaryOp::And => (Order::LOGICAL_AND, Order::LOGICAL_AND),
            BinaryOp::Or => (Order::LOGICAL_OR, Order::LOGICAL_OR),
        }
    }

    /// Binding strength used when parsing the emitted text back; higher binds tighter.
    pub fn binding_power(self) -> i32 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Equal | BinaryOp::NotEqual => 3,
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => 4,
            BinaryOp::Add | BinaryOp::Subtract => 5,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 6,
        }
    }
}
