//! Script front-end: tokenizer, syntax tree and recursive-descent parser for
//! the language subset the host runtime executes.
//!
//! Statements: `var`/`let`/`const`, function declarations, `return`,
//! `if`/`else`, blocks, `throw`, `try`/`catch`/`finally`, expression
//! statements with automatic semicolon insertion at line breaks.
//! Expressions: literals, identifiers, `this`, object literals, function
//! expressions, member access, calls, `new`, assignment (`=`, `+=`, `-=`),
//! unary, binary, logical, conditional and comma operators.

use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (line {line})")]
pub struct ScriptError {
    pub message: String,
    pub line: usize,
}

impl ScriptError {
    fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

pub type ScriptResult<T> = Result<T, ScriptError>;

// ---------------------------------------------------------------------------
// Syntax tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Declaration {
        kind: DeclKind,
        declarations: Vec<(String, Option<Expr>)>,
    },
    Function(Rc<FunctionDef>),
    Return(Option<Expr>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    Block(Vec<Stmt>),
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        param: Option<String>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberProperty {
    Named(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    TypeOf,
    Void,
    Not,
    Minus,
    Plus,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    In,
    InstanceOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    This,
    Object(Vec<(String, Expr)>),
    Function(Rc<FunctionDef>),
    Member {
        object: Box<Expr>,
        property: MemberProperty,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Sequence(Vec<Expr>),
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    line: usize,
    newline_before: bool,
}

/// Longest punctuators first so prefix matching picks the longest.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "+=", "-=", "{", "}", "(", ")", "[", "]",
    ";", ",", ".", "?", ":", "=", "+", "-", "*", "/", "%", "<", ">", "!",
];

const KEYWORDS: &[&str] = &[
    "var",
    "let",
    "const",
    "function",
    "return",
    "if",
    "else",
    "throw",
    "try",
    "catch",
    "finally",
    "new",
    "typeof",
    "void",
    "delete",
    "this",
    "true",
    "false",
    "null",
    "in",
    "instanceof",
];

fn is_identifier_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_identifier_part(c: char) -> bool {
    is_identifier_start(c) || c.is_ascii_digit() || c.is_alphanumeric()
}

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

fn is_whitespace(c: char) -> bool {
    c.is_whitespace() || c == '\u{feff}'
}

fn tokenize(source: &str) -> ScriptResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    let mut line = 1usize;
    let mut newline_before = false;

    while i < chars.len() {
        let c = chars[i];
        if is_line_terminator(c) {
            if c == '\r' && chars.get(i + 1) == Some(&'\n') {
                i += 1;
            }
            line += 1;
            newline_before = true;
            i += 1;
            continue;
        }
        if is_whitespace(c) {
            i += 1;
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && !is_line_terminator(chars[i]) {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let start_line = line;
            i += 2;
            loop {
                match chars.get(i) {
                    None => return Err(ScriptError::new("unterminated comment", start_line)),
                    Some('*') if chars.get(i + 1) == Some(&'/') => {
                        i += 2;
                        break;
                    }
                    Some(&ch) => {
                        if is_line_terminator(ch) {
                            line += 1;
                            newline_before = true;
                        }
                        i += 1;
                    }
                }
            }
            continue;
        }

        let token_line = line;
        let kind = if c.is_ascii_digit()
            || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()))
        {
            let (value, next) = read_number(&chars, i, token_line)?;
            i = next;
            TokenKind::Number(value)
        } else if c == '"' || c == '\'' {
            let (value, next) = read_string(&chars, i, token_line)?;
            i = next;
            TokenKind::Str(value)
        } else if is_identifier_start(c) {
            let start = i;
            while i < chars.len() && is_identifier_part(chars[i]) {
                i += 1;
            }
            TokenKind::Ident(chars[start..i].iter().collect())
        } else {
            let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
            let Some(punct) = PUNCTUATORS.iter().find(|p| rest.starts_with(**p)) else {
                return Err(ScriptError::new(
                    format!("Invalid or unexpected token '{c}'"),
                    token_line,
                ));
            };
            i += punct.chars().count();
            TokenKind::Punct(punct)
        };
        tokens.push(Token {
            kind,
            line: token_line,
            newline_before,
        });
        newline_before = false;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
        newline_before,
    });
    Ok(tokens)
}

fn read_number(chars: &[char], start: usize, line: usize) -> ScriptResult<(f64, usize)> {
    let mut i = start;
    if chars[i] == '0' && matches!(chars.get(i + 1), Some('x' | 'X')) {
        i += 2;
        let digits_start = i;
        while i < chars.len() && chars[i].is_ascii_hexdigit() {
            i += 1;
        }
        let digits: String = chars[digits_start..i].iter().collect();
        let value = u64::from_str_radix(&digits, 16)
            .map_err(|_| ScriptError::new("Invalid hexadecimal literal", line))?;
        return Ok((value as f64, i));
    }
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if matches!(chars.get(i), Some('e' | 'E')) {
        let mut j = i + 1;
        if matches!(chars.get(j), Some('+' | '-')) {
            j += 1;
        }
        if chars.get(j).is_some_and(|d| d.is_ascii_digit()) {
            i = j;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    if chars.get(i).is_some_and(|c| is_identifier_start(*c)) {
        return Err(ScriptError::new(
            "Invalid or unexpected token after numeric literal",
            line,
        ));
    }
    let text: String = chars[start..i].iter().collect();
    let value = text
        .parse::<f64>()
        .map_err(|_| ScriptError::new(format!("Invalid numeric literal '{text}'"), line))?;
    Ok((value, i))
}

fn read_string(chars: &[char], start: usize, line: usize) -> ScriptResult<(String, usize)> {
    let quote = chars[start];
    let mut i = start + 1;
    let mut out = String::new();
    loop {
        let Some(&c) = chars.get(i) else {
            return Err(ScriptError::new("Invalid or unexpected token", line));
        };
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == '\n' || c == '\r' {
            return Err(ScriptError::new("Invalid or unexpected token", line));
        }
        if c == '\\' {
            let Some(&escaped) = chars.get(i + 1) else {
                return Err(ScriptError::new("Invalid or unexpected token", line));
            };
            i += 2;
            match escaped {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                'v' => out.push('\u{b}'),
                '0' => out.push('\0'),
                'u' => {
                    let hex: String = chars.get(i..i + 4).unwrap_or_default().iter().collect();
                    let code = u32::from_str_radix(&hex, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| ScriptError::new("Invalid Unicode escape sequence", line))?;
                    out.push(code);
                    i += 4;
                }
                'x' => {
                    let hex: String = chars.get(i..i + 2).unwrap_or_default().iter().collect();
                    let code = u32::from_str_radix(&hex, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| ScriptError::new("Invalid hexadecimal escape sequence", line))?;
                    out.push(code);
                    i += 2;
                }
                '\n' => {}
                other => out.push(other),
            }
            continue;
        }
        out.push(c);
        i += 1;
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Recursive productions plus operator and member chain links one parse may
/// stack. Bounds both the parser's own recursion and the height of the tree
/// handed to the evaluator.
const MAX_NESTING_DEPTH: usize = 96;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    function_depth: usize,
    nesting: usize,
}

/// Parse a complete program.
pub fn parse_program(source: &str) -> ScriptResult<Program> {
    let mut parser = Parser::new(source)?;
    let body = parser.parse_statements_until_eof()?;
    Ok(Program { body })
}

/// Parse a dynamic-constructor parameter list: identifiers separated by
/// commas, nothing else.
pub fn parse_formal_parameters(source: &str) -> ScriptResult<Vec<String>> {
    let mut parser = Parser::new(source)?;
    let mut params = Vec::new();
    if parser.at_eof() {
        return Ok(params);
    }
    loop {
        params.push(parser.expect_identifier()?);
        if parser.at_eof() {
            return Ok(params);
        }
        parser.expect_punct(",")?;
    }
}

/// Parse a dynamic-constructor body as the statements of a function.
pub fn parse_function_body(source: &str) -> ScriptResult<Vec<Stmt>> {
    let mut parser = Parser::new(source)?;
    parser.function_depth = 1;
    parser.parse_statements_until_eof()
}

impl Parser {
    fn new(source: &str) -> ScriptResult<Self> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            function_depth: 0,
            nesting: 0,
        })
    }

    fn descend(&mut self) -> ScriptResult<()> {
        if self.nesting >= MAX_NESTING_DEPTH {
            return Err(ScriptError::new("Program nested too deeply", self.peek().line));
        }
        self.nesting += 1;
        Ok(())
    }

    fn ascend(&mut self, levels: usize) {
        self.nesting = self.nesting.saturating_sub(levels);
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek().kind, TokenKind::Punct(p) if p == punct)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == keyword)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.advance();
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            return true;
        }
        false
    }

    fn unexpected(&self) -> ScriptError {
        let token = self.peek();
        let text = match &token.kind {
            TokenKind::Number(n) => n.to_string(),
            TokenKind::Str(s) => format!("string '{s}'"),
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::Punct(p) => format!("token '{p}'"),
            TokenKind::Eof => "end of input".to_string(),
        };
        ScriptError::new(format!("Unexpected {text}"), token.line)
    }

    fn expect_punct(&mut self, punct: &str) -> ScriptResult<()> {
        if self.eat_punct(punct) {
            return Ok(());
        }
        Err(self.unexpected())
    }

    fn expect_identifier(&mut self) -> ScriptResult<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) if !KEYWORDS.contains(&name.as_str()) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn consume_semicolon(&mut self) -> ScriptResult<()> {
        if self.eat_punct(";") {
            return Ok(());
        }
        let token = self.peek();
        if token.kind == TokenKind::Eof || token.newline_before || self.is_punct("}") {
            return Ok(());
        }
        Err(self.unexpected())
    }

    fn parse_statements_until_eof(&mut self) -> ScriptResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.at_eof() {
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    fn parse_block(&mut self) -> ScriptResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.unexpected());
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn parse_statement(&mut self) -> ScriptResult<Stmt> {
        self.descend()?;
        let stmt = self.parse_statement_nested();
        self.ascend(1);
        stmt
    }

    fn parse_statement_nested(&mut self) -> ScriptResult<Stmt> {
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.parse_block()?));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        let TokenKind::Ident(word) = self.peek().kind.clone() else {
            return self.parse_expression_statement();
        };
        match word.as_str() {
            "var" | "let" | "const" => {
                self.advance();
                let kind = match word.as_str() {
                    "var" => DeclKind::Var,
                    "let" => DeclKind::Let,
                    _ => DeclKind::Const,
                };
                let mut declarations = Vec::new();
                loop {
                    let name = self.expect_identifier()?;
                    let init = if self.eat_punct("=") {
                        Some(self.parse_assignment()?)
                    } else {
                        None
                    };
                    if kind == DeclKind::Const && init.is_none() {
                        return Err(ScriptError::new(
                            "Missing initializer in const declaration",
                            self.peek().line,
                        ));
                    }
                    declarations.push((name, init));
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.consume_semicolon()?;
                Ok(Stmt::Declaration { kind, declarations })
            }
            "function" => {
                self.advance();
                let def = self.parse_function_rest(true)?;
                Ok(Stmt::Function(def))
            }
            "return" => {
                let line = self.advance().line;
                if self.function_depth == 0 {
                    return Err(ScriptError::new("Illegal return statement", line));
                }
                let token = self.peek();
                let argument = if self.is_punct(";")
                    || self.is_punct("}")
                    || token.kind == TokenKind::Eof
                    || token.newline_before
                {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(argument))
            }
            "if" => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.parse_expression()?;
                self.expect_punct(")")?;
                let consequent = Box::new(self.parse_statement()?);
                let alternate = if self.eat_keyword("else") {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    test,
                    consequent,
                    alternate,
                })
            }
            "throw" => {
                let line = self.advance().line;
                if self.peek().newline_before {
                    return Err(ScriptError::new("Illegal newline after throw", line));
                }
                let argument = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(argument))
            }
            "try" => {
                let line = self.advance().line;
                let block = self.parse_block()?;
                let mut param = None;
                let mut handler = None;
                if self.eat_keyword("catch") {
                    if self.eat_punct("(") {
                        param = Some(self.expect_identifier()?);
                        self.expect_punct(")")?;
                    }
                    handler = Some(self.parse_block()?);
                }
                let finalizer = if self.eat_keyword("finally") {
                    Some(self.parse_block()?)
                } else {
                    None
                };
                if handler.is_none() && finalizer.is_none() {
                    return Err(ScriptError::new("Missing catch or finally after try", line));
                }
                Ok(Stmt::Try {
                    block,
                    param,
                    handler,
                    finalizer,
                })
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> ScriptResult<Stmt> {
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    /// After the `function` keyword: optional name, parameters, body.
    fn parse_function_rest(&mut self, require_name: bool) -> ScriptResult<Rc<FunctionDef>> {
        let name = if require_name || matches!(self.peek().kind, TokenKind::Ident(_)) {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.eat_punct(")") {
            loop {
                params.push(self.expect_identifier()?);
                if self.eat_punct(")") {
                    break;
                }
                self.expect_punct(",")?;
            }
        }
        self.function_depth += 1;
        let body = self.parse_block();
        self.function_depth -= 1;
        Ok(Rc::new(FunctionDef {
            name,
            params,
            body: body?,
        }))
    }

    fn parse_expression(&mut self) -> ScriptResult<Expr> {
        let first = self.parse_assignment()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            items.push(self.parse_assignment()?);
        }
        Ok(Expr::Sequence(items))
    }

    fn parse_assignment(&mut self) -> ScriptResult<Expr> {
        self.descend()?;
        let expr = self.parse_assignment_nested();
        self.ascend(1);
        expr
    }

    fn parse_assignment_nested(&mut self) -> ScriptResult<Expr> {
        let line = self.peek().line;
        let target = self.parse_conditional()?;
        let op = if self.is_punct("=") {
            AssignOp::Assign
        } else if self.is_punct("+=") {
            AssignOp::AddAssign
        } else if self.is_punct("-=") {
            AssignOp::SubAssign
        } else {
            return Ok(target);
        };
        if !matches!(target, Expr::Ident(_) | Expr::Member { .. }) {
            return Err(ScriptError::new(
                "Invalid left-hand side in assignment",
                line,
            ));
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn parse_conditional(&mut self) -> ScriptResult<Expr> {
        let test = self.parse_logical_or()?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect_punct(":")?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_logical_or(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_logical_and()?;
        let mut links = 0;
        while self.eat_punct("||") {
            self.descend()?;
            links += 1;
            let right = self.parse_logical_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.ascend(links);
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_equality()?;
        let mut links = 0;
        while self.eat_punct("&&") {
            self.descend()?;
            links += 1;
            let right = self.parse_equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.ascend(links);
        Ok(left)
    }

    fn parse_equality(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_relational()?;
        let mut links = 0;
        loop {
            let op = if self.eat_punct("===") {
                BinaryOp::StrictEq
            } else if self.eat_punct("!==") {
                BinaryOp::StrictNotEq
            } else if self.eat_punct("==") {
                BinaryOp::Eq
            } else if self.eat_punct("!=") {
                BinaryOp::NotEq
            } else {
                break;
            };
            self.descend()?;
            links += 1;
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }
        self.ascend(links);
        Ok(left)
    }

    fn parse_relational(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_additive()?;
        let mut links = 0;
        loop {
            let op = if self.eat_punct("<=") {
                BinaryOp::LtEq
            } else if self.eat_punct(">=") {
                BinaryOp::GtEq
            } else if self.eat_punct("<") {
                BinaryOp::Lt
            } else if self.eat_punct(">") {
                BinaryOp::Gt
            } else if self.eat_keyword("in") {
                BinaryOp::In
            } else if self.eat_keyword("instanceof") {
                BinaryOp::InstanceOf
            } else {
                break;
            };
            self.descend()?;
            links += 1;
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
        self.ascend(links);
        Ok(left)
    }

    fn parse_additive(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        let mut links = 0;
        loop {
            let op = if self.eat_punct("+") {
                BinaryOp::Add
            } else if self.eat_punct("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            self.descend()?;
            links += 1;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        self.ascend(links);
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_unary()?;
        let mut links = 0;
        loop {
            let op = if self.eat_punct("*") {
                BinaryOp::Mul
            } else if self.eat_punct("/") {
                BinaryOp::Div
            } else if self.eat_punct("%") {
                BinaryOp::Rem
            } else {
                break;
            };
            self.descend()?;
            links += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        self.ascend(links);
        Ok(left)
    }

    fn parse_unary(&mut self) -> ScriptResult<Expr> {
        let op = if self.eat_keyword("typeof") {
            UnaryOp::TypeOf
        } else if self.eat_keyword("void") {
            UnaryOp::Void
        } else if self.eat_keyword("delete") {
            UnaryOp::Delete
        } else if self.eat_punct("!") {
            UnaryOp::Not
        } else if self.eat_punct("-") {
            UnaryOp::Minus
        } else if self.eat_punct("+") {
            UnaryOp::Plus
        } else {
            return self.parse_postfix();
        };
        self.descend()?;
        let operand = self.parse_unary();
        self.ascend(1);
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    fn parse_arguments(&mut self) -> ScriptResult<Vec<Expr>> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_assignment()?);
            if self.eat_punct(")") {
                return Ok(args);
            }
            self.expect_punct(",")?;
        }
    }

    fn at_member_suffix(&self) -> bool {
        self.is_punct(".") || self.is_punct("[")
    }

    /// `.name` or `[expression]` after a member base.
    fn parse_member_property(&mut self) -> ScriptResult<MemberProperty> {
        if self.eat_punct("[") {
            let property = self.parse_expression()?;
            self.expect_punct("]")?;
            return Ok(MemberProperty::Computed(Box::new(property)));
        }
        self.expect_punct(".")?;
        let TokenKind::Ident(name) = self.peek().kind.clone() else {
            return Err(self.unexpected());
        };
        self.advance();
        Ok(MemberProperty::Named(name))
    }

    fn parse_postfix(&mut self) -> ScriptResult<Expr> {
        let mut expr = if self.is_keyword("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        let mut links = 0;
        loop {
            if self.is_punct("(") {
                self.descend()?;
                links += 1;
                let args = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.at_member_suffix() {
                self.descend()?;
                links += 1;
                let property = self.parse_member_property()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else {
                break;
            }
        }
        self.ascend(links);
        Ok(expr)
    }

    fn parse_new(&mut self) -> ScriptResult<Expr> {
        self.advance();
        self.descend()?;
        let mut links = 1;
        let mut callee = if self.is_keyword("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        while self.at_member_suffix() {
            self.descend()?;
            links += 1;
            let property = self.parse_member_property()?;
            callee = Expr::Member {
                object: Box::new(callee),
                property,
            };
        }
        let args = if self.is_punct("(") {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        self.ascend(links);
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
        })
    }

    fn parse_primary(&mut self) -> ScriptResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Punct("(") => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct("{") => self.parse_object_literal(),
            TokenKind::Ident(name) => match name.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Null)
                }
                "this" => {
                    self.advance();
                    Ok(Expr::This)
                }
                "function" => {
                    self.advance();
                    Ok(Expr::Function(self.parse_function_rest(false)?))
                }
                _ => Ok(Expr::Ident(self.expect_identifier()?)),
            },
            _ => Err(self.unexpected()),
        }
    }

    fn parse_object_literal(&mut self) -> ScriptResult<Expr> {
        self.expect_punct("{")?;
        let mut properties = Vec::new();
        while !self.eat_punct("}") {
            let key_token = self.advance();
            let key = match key_token.kind {
                TokenKind::Ident(name) => name,
                TokenKind::Str(s) => s,
                TokenKind::Number(n) => crate::object_model::format_number(n),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
            };
            let value = if self.eat_punct(":") {
                self.parse_assignment()?
            } else if KEYWORDS.contains(&key.as_str()) {
                return Err(self.unexpected());
            } else {
                Expr::Ident(key.clone())
            };
            properties.push((key, value));
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Expr::Object(properties))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_with_precedence() {
        let program = parse_program("1 + 2 * 3").unwrap();
        let Stmt::Expr(Expr::Binary { op, right, .. }) = &program.body[0] else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(**right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn automatic_semicolon_at_line_break() {
        let program = parse_program("var a = 1\nvar b = 2\na + b").unwrap();
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn missing_separator_on_same_line_is_an_error() {
        let err = parse_program("a b").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("identifier 'b'"));
    }

    #[test]
    fn return_outside_function_is_rejected() {
        let err = parse_program("return 1").unwrap_err();
        assert_eq!(err.message, "Illegal return statement");
    }

    #[test]
    fn comments_are_skipped_and_lines_counted() {
        let err = parse_program("// one\n/* two\nthree */\n)").unwrap_err();
        assert_eq!(err.line, 4);
    }

    #[test]
    fn member_call_and_new() {
        let program = parse_program("new Error('x').message; a.b['c'](1, 2)").unwrap();
        assert!(matches!(&program.body[0], Stmt::Expr(Expr::Member { .. })));
        assert!(matches!(&program.body[1], Stmt::Expr(Expr::Call { args, .. }) if args.len() == 2));
    }

    #[test]
    fn invalid_assignment_target() {
        let err = parse_program("1 = 2").unwrap_err();
        assert_eq!(err.message, "Invalid left-hand side in assignment");
    }

    #[test]
    fn string_escapes() {
        let program = parse_program(r#""a\nbA""#).unwrap();
        assert_eq!(program.body[0], Stmt::Expr(Expr::Str("a\nbA".to_string())));
    }

    #[test]
    fn formal_parameters_accept_only_identifiers() {
        assert_eq!(parse_formal_parameters("a, b").unwrap(), vec!["a", "b"]);
        assert!(parse_formal_parameters("").unwrap().is_empty());
        assert!(parse_formal_parameters("a) { return this }; (function(").is_err());
        assert!(parse_formal_parameters("this").is_err());
    }

    #[test]
    fn function_body_allows_return() {
        let body = parse_function_body("return a + b").unwrap();
        assert!(matches!(body[0], Stmt::Return(Some(_))));
        assert!(parse_function_body("}").is_err());
    }

    #[test]
    fn try_requires_handler_or_finalizer() {
        assert!(parse_program("try { 1 }").is_err());
        assert!(parse_program("try { 1 } catch (e) { e } finally { 2 }").is_ok());
    }

    #[test]
    fn object_literal_shorthand_and_trailing_comma() {
        let program = parse_program("({a: 1, 'b': 2, c,})").unwrap();
        let Stmt::Expr(Expr::Object(props)) = &program.body[0] else {
            panic!("expected object literal");
        };
        assert_eq!(props.len(), 3);
        assert_eq!(props[2], ("c".to_string(), Expr::Ident("c".to_string())));
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let parens = format!("{}1{}", "(".repeat(50_000), ")".repeat(50_000));
        let err = parse_program(&parens).unwrap_err();
        assert_eq!(err, ScriptError::new("Program nested too deeply", 1));

        let unary = format!("{}1", "- ".repeat(500));
        let chain = format!("1{}", " + 1".repeat(500));
        let members = format!("a{}", ".b".repeat(500));
        let calls = format!("f{}", "()".repeat(500));
        let blocks = format!("{}{}", "{".repeat(500), "}".repeat(500));
        for src in [unary, chain, members, calls, blocks] {
            let err = parse_program(&src).unwrap_err();
            assert_eq!(err.message, "Program nested too deeply");
        }
    }

    #[test]
    fn moderate_nesting_still_parses() {
        let parens = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(
            parse_program(&parens).unwrap().body[0],
            Stmt::Expr(Expr::Number(1.0))
        );
        assert!(parse_program(&format!("1{}", " + 1".repeat(60))).is_ok());
        assert!(parse_program(&format!("a{}", ".b(1)".repeat(30))).is_ok());
        assert!(parse_program("new new a.b.c()()").is_ok());
    }

    #[test]
    fn member_access_reports_a_missing_name() {
        let err = parse_program("a.").unwrap_err();
        assert_eq!(err.message, "Unexpected end of input");
        assert!(parse_program("a.1").is_err());
    }
}
