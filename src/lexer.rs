use crate::ast::Position;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Keyword,
    Ident,
    Number,
    String,
    Op,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Dot,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub typ: TokenType,
    pub value: String,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct LexerError {
    pub message: String,
    pub pos: Position,
}

impl Display for LexerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (line {}, column {})",
            self.message, self.pos.line, self.pos.column
        )
    }
}

impl Error for LexerError {}

pub struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: usize,
    column: usize,
    keywords: HashSet<&'static str>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
            keywords: keyword_set(),
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        while !self.at_end() {
            let ch = self.peek();
            if is_ignorable_format_char(ch) || ch.is_whitespace() {
                self.advance();
                continue;
            }
            if ch == '/' && self.peek_next() == '/' {
                self.skip_line_comment();
                continue;
            }
            if ch == '/' && self.peek_next() == '*' {
                self.skip_block_comment()?;
                continue;
            }
            if ch == '"' {
                tokens.push(self.read_string()?);
                continue;
            }
            if ch.is_ascii_digit() {
                tokens.push(self.read_number()?);
                continue;
            }
            if ch.is_ascii_alphabetic() || ch == '_' {
                tokens.push(self.read_identifier());
                continue;
            }
            let pos = self.pos();
            let single = match ch {
                '(' => Some(TokenType::LParen),
                ')' => Some(TokenType::RParen),
                '{' => Some(TokenType::LBrace),
                '}' => Some(TokenType::RBrace),
                '[' => Some(TokenType::LBracket),
                ']' => Some(TokenType::RBracket),
                ',' => Some(TokenType::Comma),
                ';' => Some(TokenType::Semicolon),
                '.' => Some(TokenType::Dot),
                _ => None,
            };
            if let Some(typ) = single {
                self.advance();
                tokens.push(Token {
                    typ,
                    value: ch.to_string(),
                    pos,
                });
                continue;
            }
            if "+-*/%=!<>&|?:".contains(ch) {
                tokens.push(self.read_operator()?);
                continue;
            }
            return Err(LexerError {
                message: format!("Unexpected character {:?}", ch),
                pos,
            });
        }
        tokens.push(Token {
            typ: TokenType::Eof,
            value: String::new(),
            pos: self.pos(),
        });
        Ok(tokens)
    }

    fn read_operator(&mut self) -> Result<Token, LexerError> {
        let pos = self.pos();
        let ch = self.advance();
        let next = self.peek();
        let mut value = ch.to_string();
        let doubled = match (ch, next) {
            ('+', '+') | ('-', '-') | ('&', '&') | ('|', '|') => true,
            ('+' | '-' | '*' | '/' | '%' | '=' | '!' | '<' | '>', '=') => true,
            _ => false,
        };
        if doubled {
            value.push(self.advance());
        } else if ch == '&' || ch == '|' {
            return Err(LexerError {
                message: format!("Unsupported operator '{}'", ch),
                pos,
            });
        }
        Ok(Token {
            typ: TokenType::Op,
            value,
            pos,
        })
    }

    fn read_identifier(&mut self) -> Token {
        let pos = self.pos();
        let mut text = String::new();
        text.push(self.advance());
        while !self.at_end() {
            let ch = self.peek();
            if ch.is_ascii_alphanumeric() || ch == '_' {
                text.push(self.advance());
            } else {
                break;
            }
        }
        let typ = if self.keywords.contains(text.as_str()) {
            TokenType::Keyword
        } else {
            TokenType::Ident
        };
        Token {
            typ,
            value: text,
            pos,
        }
    }

    fn read_number(&mut self) -> Result<Token, LexerError> {
        let pos = self.pos();
        let mut text = String::new();
        while !self.at_end() && (self.peek().is_ascii_digit() || self.peek() == '_') {
            let ch = self.advance();
            if ch != '_' {
                text.push(ch);
            }
        }
        if self.peek() == '.' || self.peek().is_ascii_alphabetic() {
            return Err(LexerError {
                message: format!("Malformed integer literal starting with '{}'", text),
                pos,
            });
        }
        Ok(Token {
            typ: TokenType::Number,
            value: text,
            pos,
        })
    }

    fn read_string(&mut self) -> Result<Token, LexerError> {
        let pos = self.pos();
        self.advance();
        let mut out = String::new();
        while !self.at_end() {
            let ch = self.advance();
            if ch == '"' {
                return Ok(Token {
                    typ: TokenType::String,
                    value: out,
                    pos,
                });
            }
            if ch == '\\' {
                if self.at_end() {
                    break;
                }
                let esc = self.advance();
                let mapped = match esc {
                    '"' => '"',
                    '\\' => '\\',
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    _ => esc,
                };
                out.push(mapped);
                continue;
            }
            if ch == '\n' {
                return Err(LexerError {
                    message: "Unterminated string literal".to_string(),
                    pos,
                });
            }
            out.push(ch);
        }
        Err(LexerError {
            message: "Unterminated string literal".to_string(),
            pos,
        })
    }

    fn skip_line_comment(&mut self) {
        while !self.at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), LexerError> {
        let pos = self.pos();
        self.advance();
        self.advance();
        while !self.at_end() {
            if self.peek() == '*' && self.peek_next() == '/' {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }
        Err(LexerError {
            message: "Unterminated comment".to_string(),
            pos,
        })
    }

    fn at_end(&self) -> bool {
        self.index >= self.chars.len()
    }

    fn peek(&self) -> char {
        self.chars.get(self.index).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.chars.get(self.index + 1).copied().unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.index];
        self.index += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        ch
    }

    fn pos(&self) -> Position {
        Position::new(self.line, self.column)
    }
}

fn keyword_set() -> HashSet<&'static str> {
    [
        "boolean", "break", "continue", "else", "false", "for", "if", "int", "new", "String",
        "true", "void", "while",
    ]
    .into_iter()
    .collect()
}

fn is_ignorable_format_char(ch: char) -> bool {
    matches!(
        ch,
        '\u{feff}' // BOM / zero width no-break space
            | '\u{200b}' // zero width space
            | '\u{200c}' // zero width non-joiner
            | '\u{200d}' // zero width joiner
            | '\u{2060}' // word joiner
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<(TokenType, String)> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| (t.typ, t.value))
            .collect()
    }

    #[test]
    fn for_header_tokens() {
        let tokens = kinds("for (int count = 0; count < 3; count++) {");
        let values = tokens.iter().map(|(_, v)| v.as_str()).collect::<Vec<_>>();
        assert_eq!(
            values,
            vec![
                "for", "(", "int", "count", "=", "0", ";", "count", "<", "3", ";", "count", "++",
                ")", "{", ""
            ]
        );
        assert_eq!(tokens[0].0, TokenType::Keyword);
        assert_eq!(tokens[3].0, TokenType::Ident);
    }

    #[test]
    fn compound_operators_are_single_tokens() {
        let tokens = kinds("a += 1 && !b || c <= d");
        let ops = tokens
            .iter()
            .filter(|(t, _)| *t == TokenType::Op)
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ops, vec!["+=", "&&", "!", "||", "<="]);
    }

    #[test]
    fn comments_are_skipped_and_lines_tracked() {
        let tokens = Lexer::new("// header\n/* note */ rest();").tokenize().unwrap();
        assert_eq!(tokens[0].value, "rest");
        assert_eq!(tokens[0].pos, Position::new(2, 12));
    }

    #[test]
    fn string_escapes_are_decoded() {
        let tokens = kinds(r#"print("say \"hi\"");"#);
        assert_eq!(tokens[2], (TokenType::String, "say \"hi\"".to_string()));
    }

    #[test]
    fn fractional_numbers_are_rejected() {
        let err = Lexer::new("x = 2.5;").tokenize().unwrap_err();
        assert!(err.message.contains("Malformed integer"));
    }

    #[test]
    fn unterminated_string_reports_position() {
        let err = Lexer::new("\n  print(\"oops").tokenize().unwrap_err();
        assert_eq!(err.pos, Position::new(2, 9));
    }
}
