use crate::ast::{Expr, Function, Place, Position, Script, Statement, TypeName, UnaryOp};
use crate::lexer::{Lexer, LexerError, Token, TokenType};
use crate::precedence::BinaryOp;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub pos: Position,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (line {}, column {})", self.message, self.pos.line, self.pos.column)
    }
}

impl Error for ParseError {}

impl From<LexerError> for ParseError {
    fn from(err: LexerError) -> Self {
        ParseError {
            message: err.message,
            pos: err.pos,
        }
    }
}

/// Tokenizes and parses a generated script.
pub fn parse_script(source: &str) -> Result<Script, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_script()
}

pub struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, index: 0 }
    }

    pub fn parse_script(&mut self) -> Result<Script, ParseError> {
        let mut script = Script::default();
        while !self.at_end() {
            if self.check_keyword("void") {
                script.functions.push(self.parse_function()?);
            } else {
                script.statements.push(self.parse_statement()?);
            }
        }
        Ok(script)
    }

    fn parse_function(&mut self) -> Result<Function, ParseError> {
        let pos = self.consume_keyword("void", "Expected 'void'.")?.pos;
        let name = self
            .consume_type(TokenType::Ident, "Expected function name after 'void'.")?
            .value;
        self.consume_type(TokenType::LParen, "Expected '(' after function name.")?;
        self.consume_type(TokenType::RParen, "Functions take no parameters.")?;
        let body = self.parse_block()?;
        Ok(Function { pos, name, body })
    }

    fn parse_block(&mut self) -> Result<Vec<Statement>, ParseError> {
        self.consume_type(TokenType::LBrace, "Expected '{'.")?;
        let mut body = Vec::new();
        while !self.check_type(TokenType::RBrace) {
            if self.at_end() {
                return self.error_here("Expected '}' before end of input.");
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let token = self.current().clone();
        if token.typ == TokenType::LBrace {
            let body = self.parse_block()?;
            return Ok(Statement::Block { pos: token.pos, body });
        }
        if token.typ == TokenType::Keyword {
            match token.value.as_str() {
                "if" => return self.parse_if_stmt(),
                "while" => return self.parse_while_stmt(),
                "for" => return self.parse_for_stmt(),
                "break" | "continue" => {
                    self.advance();
                    self.consume_type(TokenType::Semicolon, "Expected ';'.")?;
                    return Ok(if token.value == "break" {
                        Statement::Break { pos: token.pos }
                    } else {
                        Statement::Continue { pos: token.pos }
                    });
                }
                _ => {}
            }
        }
        let stmt = self.parse_simple_statement()?;
        self.consume_type(TokenType::Semicolon, "Expected ';' after statement.")?;
        Ok(stmt)
    }

    /// Declarations, assignments, increments and call statements (no trailing `;`).
    fn parse_simple_statement(&mut self) -> Result<Statement, ParseError> {
        if let Some(ty) = self.parse_type_name()? {
            return self.parse_declaration(ty);
        }
        let token = self.current().clone();
        if token.typ != TokenType::Ident {
            return self.error_here(format!("Unexpected '{}' at start of statement.", token.value));
        }
        if self.peek().typ == TokenType::LParen {
            let expr = self.parse_expression()?;
            return Ok(Statement::Expr { pos: token.pos, expr });
        }
        let place = self.parse_place()?;
        let op_token = self.consume_type(TokenType::Op, "Expected assignment operator.")?;
        match op_token.value.as_str() {
            "++" | "--" => Ok(Statement::Increment {
                pos: token.pos,
                place,
                delta: if op_token.value == "++" { 1 } else { -1 },
            }),
            "=" => Ok(Statement::Assign {
                pos: token.pos,
                place,
                op: None,
                value: self.parse_expression()?,
            }),
            compound => {
                let op = compound
                    .strip_suffix('=')
                    .and_then(BinaryOp::from_field)
                    .filter(|op| op.binding_power() >= BinaryOp::Add.binding_power());
                let Some(op) = op else {
                    return Err(ParseError {
                        message: format!("Unsupported assignment operator '{}'.", compound),
                        pos: op_token.pos,
                    });
                };
                Ok(Statement::Assign {
                    pos: token.pos,
                    place,
                    op: Some(op),
                    value: self.parse_expression()?,
                })
            }
        }
    }

    fn parse_type_name(&mut self) -> Result<Option<TypeName>, ParseError> {
        let token = self.current().clone();
        if token.typ != TokenType::Keyword {
            return Ok(None);
        }
        let ty = match token.value.as_str() {
            "int" => TypeName::Int,
            "boolean" => TypeName::Bool,
            "String" => TypeName::Str,
            _ => return Ok(None),
        };
        self.advance();
        if ty == TypeName::Int && self.check_type(TokenType::LBracket) {
            self.advance();
            self.consume_type(TokenType::RBracket, "Expected ']' in array type.")?;
            return Ok(Some(TypeName::IntArray));
        }
        Ok(Some(ty))
    }

    fn parse_declaration(&mut self, ty: TypeName) -> Result<Statement, ParseError> {
        let name_token = self.consume_type(TokenType::Ident, "Expected variable name.")?;
        let value = if self.check_op("=") {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Statement::Declare {
            pos: name_token.pos,
            ty,
            name: name_token.value,
            value,
        })
    }

    fn parse_place(&mut self) -> Result<Place, ParseError> {
        let name = self.consume_type(TokenType::Ident, "Expected variable name.")?.value;
        if self.check_type(TokenType::LBracket) {
            self.advance();
            let index = self.parse_expression()?;
            self.consume_type(TokenType::RBracket, "Expected ']' after index.")?;
            return Ok(Place::Index { array: name, index });
        }
        Ok(Place::Var(name))
    }

    fn parse_if_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("if", "Expected 'if'.")?.pos;
        let mut branches = vec![(self.parse_condition()?, self.parse_block()?)];
        let mut otherwise = None;
        while self.check_keyword("else") {
            self.advance();
            if self.check_keyword("if") {
                self.advance();
                branches.push((self.parse_condition()?, self.parse_block()?));
            } else {
                otherwise = Some(self.parse_block()?);
                break;
            }
        }
        Ok(Statement::If {
            pos,
            branches,
            otherwise,
        })
    }

    fn parse_while_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("while", "Expected 'while'.")?.pos;
        let condition = self.parse_condition()?;
        let body = self.parse_block()?;
        Ok(Statement::While {
            pos,
            condition,
            body,
        })
    }

    fn parse_for_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("for", "Expected 'for'.")?.pos;
        self.consume_type(TokenType::LParen, "Expected '(' after 'for'.")?;
        let init = if self.check_type(TokenType::Semicolon) {
            None
        } else {
            Some(Box::new(self.parse_simple_statement()?))
        };
        self.consume_type(TokenType::Semicolon, "Expected ';' after loop initializer.")?;
        let condition = if self.check_type(TokenType::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_type(TokenType::Semicolon, "Expected ';' after loop condition.")?;
        let update = if self.check_type(TokenType::RParen) {
            None
        } else {
            Some(Box::new(self.parse_simple_statement()?))
        };
        self.consume_type(TokenType::RParen, "Expected ')' after loop header.")?;
        let body = self.parse_block()?;
        Ok(Statement::For {
            pos,
            init,
            condition,
            update,
            body,
        })
    }

    fn parse_condition(&mut self) -> Result<Expr, ParseError> {
        self.consume_type(TokenType::LParen, "Expected '(' before condition.")?;
        let expr = self.parse_expression()?;
        self.consume_type(TokenType::RParen, "Expected ')' after condition.")?;
        Ok(expr)
    }

    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let condition = self.parse_binary(1)?;
        if !self.check_op("?") {
            return Ok(condition);
        }
        let pos = self.advance().pos;
        let then = self.parse_expression()?;
        if !self.check_op(":") {
            return self.error_here("Expected ':' in conditional expression.");
        }
        self.advance();
        let otherwise = self.parse_expression()?;
        Ok(Expr::Conditional {
            pos,
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_binary(&mut self, min_precedence: i32) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let token = self.current().clone();
            if token.typ != TokenType::Op {
                break;
            }
            let Some(op) = BinaryOp::from_field(&token.value) else {
                break;
            };
            let precedence = op.binding_power();
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_binary(precedence + 1)?;
            left = Expr::Binary {
                pos: token.pos,
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        if token.typ == TokenType::Op && (token.value == "-" || token.value == "!") {
            self.advance();
            let operand = self.parse_unary()?;
            if token.value == "-" {
                if let Expr::Int { value, .. } = operand {
                    return Ok(Expr::Int {
                        pos: token.pos,
                        value: -value,
                    });
                }
            }
            let op = if token.value == "-" { UnaryOp::Neg } else { UnaryOp::Not };
            return Ok(Expr::Unary {
                pos: token.pos,
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        match token.typ {
            TokenType::Number => {
                self.advance();
                let value = token.value.parse::<i64>().map_err(|_| ParseError {
                    message: format!("Integer literal '{}' is out of range.", token.value),
                    pos: token.pos,
                })?;
                Ok(Expr::Int {
                    pos: token.pos,
                    value,
                })
            }
            TokenType::String => {
                self.advance();
                Ok(Expr::Str {
                    pos: token.pos,
                    value: token.value,
                })
            }
            TokenType::Keyword if token.value == "true" || token.value == "false" => {
                self.advance();
                Ok(Expr::Bool {
                    pos: token.pos,
                    value: token.value == "true",
                })
            }
            TokenType::Keyword if token.value == "new" => {
                self.advance();
                self.consume_keyword("int", "Only 'new int[...]' arrays are supported.")?;
                self.consume_type(TokenType::LBracket, "Expected '[' after 'new int'.")?;
                let length = self.parse_expression()?;
                self.consume_type(TokenType::RBracket, "Expected ']' after array length.")?;
                Ok(Expr::NewArray {
                    pos: token.pos,
                    length: Box::new(length),
                })
            }
            TokenType::Ident => {
                self.advance();
                self.parse_identifier_tail(token)
            }
            TokenType::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.consume_type(TokenType::RParen, "Expected ')' after grouped expression.")?;
                Ok(expr)
            }
            _ => self.error_here("Expected expression."),
        }
    }

    fn parse_identifier_tail(&mut self, name: Token) -> Result<Expr, ParseError> {
        if self.check_type(TokenType::LParen) {
            self.advance();
            let mut args = Vec::new();
            if !self.check_type(TokenType::RParen) {
                loop {
                    args.push(self.parse_expression()?);
                    if !self.check_type(TokenType::Comma) {
                        break;
                    }
                    self.advance();
                }
            }
            self.consume_type(TokenType::RParen, "Expected ')' after arguments.")?;
            return Ok(Expr::Call {
                pos: name.pos,
                name: name.value,
                args,
            });
        }
        if self.check_type(TokenType::LBracket) {
            self.advance();
            let index = self.parse_expression()?;
            self.consume_type(TokenType::RBracket, "Expected ']' after index.")?;
            return Ok(Expr::Index {
                pos: name.pos,
                array: name.value,
                index: Box::new(index),
            });
        }
        if self.check_type(TokenType::Dot) {
            self.advance();
            let member = self.consume_type(TokenType::Ident, "Expected member name after '.'.")?;
            if member.value != "length" {
                return Err(ParseError {
                    message: format!("Unknown member '{}'.", member.value),
                    pos: member.pos,
                });
            }
            return Ok(Expr::Length {
                pos: name.pos,
                array: name.value,
            });
        }
        Ok(Expr::Var {
            pos: name.pos,
            name: name.value,
        })
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        let token = self.current();
        token.typ == TokenType::Keyword && token.value == keyword
    }

    fn check_op(&self, op: &str) -> bool {
        let token = self.current();
        token.typ == TokenType::Op && token.value == op
    }

    fn consume_keyword(&mut self, keyword: &str, message: &str) -> Result<Token, ParseError> {
        let token = self.current().clone();
        if token.typ == TokenType::Keyword && token.value == keyword {
            self.advance();
            Ok(token)
        } else {
            Err(ParseError {
                message: message.to_string(),
                pos: token.pos,
            })
        }
    }

    fn consume_type(&mut self, typ: TokenType, message: &str) -> Result<Token, ParseError> {
        let token = self.current().clone();
        if token.typ == typ {
            self.advance();
            Ok(token)
        } else {
            Err(ParseError {
                message: message.to_string(),
                pos: token.pos,
            })
        }
    }

    fn check_type(&self, typ: TokenType) -> bool {
        self.current().typ == typ
    }

    fn at_end(&self) -> bool {
        self.current().typ == TokenType::Eof
    }

    fn current(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        if self.index + 1 >= self.tokens.len() {
            &self.tokens[self.tokens.len() - 1]
        } else {
            &self.tokens[self.index + 1]
        }
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn error_here<T: Into<String>, R>(&self, message: T) -> Result<R, ParseError> {
        Err(ParseError {
            message: message.into(),
            pos: self.current().pos,
        })
    }
}
