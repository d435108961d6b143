use super::ast::{BinaryOperator, Expression, FilterCall, UnaryOperator};
use crate::error::{Error, Result};

/// Token of the expression sublanguage used inside tags
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Integer(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Pipe,
    Assign,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Name(name) => format!("'{}'", name),
            Token::Integer(n) => format!("'{}'", n),
            Token::Float(n) => format!("'{}'", n),
            Token::Str(s) => format!("{:?}", s),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Dot => "'.'".to_string(),
            Token::Pipe => "'|'".to_string(),
            Token::Assign => "'='".to_string(),
            Token::Equal => "'=='".to_string(),
            Token::NotEqual => "'!='".to_string(),
            Token::Less => "'<'".to_string(),
            Token::LessEqual => "'<='".to_string(),
            Token::Greater => "'>'".to_string(),
            Token::GreaterEqual => "'>='".to_string(),
            Token::Plus => "'+'".to_string(),
            Token::Minus => "'-'".to_string(),
            Token::Star => "'*'".to_string(),
            Token::Slash => "'/'".to_string(),
            Token::DoubleSlash => "'//'".to_string(),
            Token::Percent => "'%'".to_string(),
        }
    }
}

const KEYWORDS: &[&str] = &["and", "or", "not", "in", "true", "false", "null", "none"];

/// Whether `name` can be bound or looked up as a plain variable
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_') && !KEYWORDS.contains(&name)
}

/// Parser for the expressions found in `{{ }}` and `{% %}` tag bodies
pub struct ExpressionParser<'a> {
    source: &'a str,
    line: usize,
    tokens: Vec<Token>,
    position: usize,
}

impl<'a> ExpressionParser<'a> {
    pub fn new(source: &'a str, line: usize) -> Result<Self> {
        let tokens = tokenize(source).map_err(|message| Error::syntax(line, source, message))?;
        Ok(Self {
            source,
            line,
            tokens,
            position: 0,
        })
    }

    /// Parse a complete expression
    pub fn parse_expression(mut self) -> Result<Expression> {
        let expr = self.expression(false)?;
        self.finish()?;
        Ok(expr)
    }

    /// Parse `expr | filter | filter(arg, key=value)`
    pub fn parse_pipeline(mut self) -> Result<(Expression, Vec<FilterCall>)> {
        let expr = self.expression(false)?;
        let mut filters = Vec::new();

        while self.eat(&Token::Pipe) {
            let name = self.expect_name("a filter name after '|'")?;
            let mut call = FilterCall {
                name,
                args: Vec::new(),
                kwargs: Vec::new(),
            };

            if self.eat(&Token::LParen) && !self.eat(&Token::RParen) {
                loop {
                    self.filter_argument(&mut call)?;
                    if self.eat(&Token::RParen) {
                        break;
                    }
                    self.expect(&Token::Comma, "',' or ')' in filter arguments")?;
                }
            }
            filters.push(call);
        }

        self.finish()?;
        Ok((expr, filters))
    }

    /// Parse `name=expr and name=expr ...`
    pub fn parse_assignments(mut self) -> Result<Vec<(String, Expression)>> {
        let mut assignments = Vec::new();

        loop {
            let name = self.expect_name("a variable name")?;
            if !is_identifier(&name) {
                return Err(self.error(format!("cannot assign to '{}'", name)));
            }
            self.expect(&Token::Assign, "'=' after the variable name")?;
            let value = self.expression(true)?;
            assignments.push((name, value));

            if self.is_end() {
                break;
            }
            if !self.eat_keyword("and") {
                return Err(self.unexpected());
            }
        }

        Ok(assignments)
    }

    /// Parse `target in expr` or `key, value in expr`
    pub fn parse_for(mut self) -> Result<(Vec<String>, Expression)> {
        let mut targets = vec![self.expect_name("a loop variable")?];
        while self.eat(&Token::Comma) {
            targets.push(self.expect_name("a loop variable after ','")?);
        }
        if targets.len() > 2 {
            return Err(self.error("expects one or two loop variables"));
        }
        if let Some(bad) = targets.iter().find(|t| !is_identifier(t)) {
            return Err(self.error(format!("cannot use '{}' as a loop variable", bad)));
        }
        if !self.eat_keyword("in") {
            return Err(self.error("expected 'in' after the loop variable"));
        }

        let iterable = self.expression(false)?;
        self.finish()?;
        Ok((targets, iterable))
    }

    fn filter_argument(&mut self, call: &mut FilterCall) -> Result<()> {
        let is_keyword = matches!(
            (self.tokens.get(self.position), self.tokens.get(self.position + 1)),
            (Some(Token::Name(_)), Some(Token::Assign))
        );

        if is_keyword {
            let name = self.expect_name("an argument name")?;
            self.position += 1;
            call.kwargs.push((name, self.expression(false)?));
        } else if !call.kwargs.is_empty() {
            return Err(self.error("positional argument follows keyword argument"));
        } else {
            call.args.push(self.expression(false)?);
        }
        Ok(())
    }

    // Precedence climbing, lowest first: or, and, not, comparison, + -, * / // %, unary minus, postfix

    fn expression(&mut self, in_assignment: bool) -> Result<Expression> {
        let mut left = self.and_expression(in_assignment)?;
        while self.eat_keyword("or") {
            let right = self.and_expression(in_assignment)?;
            left = binary(left, BinaryOperator::Or, right);
        }
        Ok(left)
    }

    fn and_expression(&mut self, in_assignment: bool) -> Result<Expression> {
        let mut left = self.not_expression()?;
        loop {
            // In `set`, `and name=` starts the next assignment
            if in_assignment && self.starts_next_assignment() {
                break;
            }
            if !self.eat_keyword("and") {
                break;
            }
            let right = self.not_expression()?;
            left = binary(left, BinaryOperator::And, right);
        }
        Ok(left)
    }

    fn starts_next_assignment(&self) -> bool {
        matches!(
            (
                self.tokens.get(self.position),
                self.tokens.get(self.position + 1),
                self.tokens.get(self.position + 2),
            ),
            (Some(Token::Name(and)), Some(Token::Name(_)), Some(Token::Assign)) if and == "and"
        )
    }

    fn not_expression(&mut self) -> Result<Expression> {
        if self.peek_keyword("not") && !self.peek_keyword_at(1, "in") {
            self.position += 1;
            let operand = self.not_expression()?;
            return Ok(Expression::UnaryOp {
                op: UnaryOperator::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expression> {
        let mut left = self.additive()?;
        loop {
            let op = match self.tokens.get(self.position) {
                Some(Token::Equal) => BinaryOperator::Equal,
                Some(Token::NotEqual) => BinaryOperator::NotEqual,
                Some(Token::Less) => BinaryOperator::LessThan,
                Some(Token::LessEqual) => BinaryOperator::LessThanOrEqual,
                Some(Token::Greater) => BinaryOperator::GreaterThan,
                Some(Token::GreaterEqual) => BinaryOperator::GreaterThanOrEqual,
                Some(Token::Name(word)) if word == "in" => BinaryOperator::In,
                Some(Token::Name(word)) if word == "not" && self.peek_keyword_at(1, "in") => {
                    self.position += 1;
                    BinaryOperator::NotIn
                }
                _ => break,
            };
            self.position += 1;
            let right = self.additive()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expression> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.tokens.get(self.position) {
                Some(Token::Plus) => BinaryOperator::Add,
                Some(Token::Minus) => BinaryOperator::Subtract,
                _ => break,
            };
            self.position += 1;
            let right = self.multiplicative()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expression> {
        let mut left = self.unary()?;
        loop {
            let op = match self.tokens.get(self.position) {
                Some(Token::Star) => BinaryOperator::Multiply,
                Some(Token::Slash) => BinaryOperator::Divide,
                Some(Token::DoubleSlash) => BinaryOperator::FloorDivide,
                Some(Token::Percent) => BinaryOperator::Modulo,
                _ => break,
            };
            self.position += 1;
            let right = self.unary()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expression> {
        if self.eat(&Token::Minus) {
            let operand = self.unary()?;
            return Ok(match operand {
                Expression::Integer(n) => Expression::Integer(-n),
                Expression::Float(n) => Expression::Float(-n),
                other => Expression::UnaryOp {
                    op: UnaryOperator::Minus,
                    operand: Box::new(other),
                },
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expression> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let property = match self.next_token() {
                    Some(Token::Name(name)) => name,
                    Some(Token::Integer(n)) if n >= 0 => n.to_string(),
                    _ => return Err(self.error("expected an attribute name after '.'")),
                };
                expr = Expression::PropertyAccess {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat(&Token::LBracket) {
                let index = self.expression(false)?;
                self.expect(&Token::RBracket, "']' to close the subscript")?;
                expr = Expression::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expression> {
        let token = match self.next_token() {
            Some(token) => token,
            None => return Err(self.error("unexpected end of expression")),
        };

        match token {
            Token::Integer(n) => Ok(Expression::Integer(n)),
            Token::Float(n) => Ok(Expression::Float(n)),
            Token::Str(s) => Ok(Expression::String(s)),
            Token::LParen => {
                let expr = self.expression(false)?;
                self.expect(&Token::RParen, "')' to close the group")?;
                Ok(expr)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.expression(false)?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(&Token::Comma, "',' or ']' in list")?;
                        // Trailing comma
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                    }
                }
                Ok(Expression::Array(items))
            }
            Token::Name(name) => match name.as_str() {
                "true" | "True" => Ok(Expression::Boolean(true)),
                "false" | "False" => Ok(Expression::Boolean(false)),
                "null" | "none" | "None" => Ok(Expression::Null),
                "and" | "or" | "not" | "in" => {
                    self.position -= 1;
                    Err(self.unexpected())
                }
                _ if self.eat(&Token::LParen) => {
                    let mut args = Vec::new();
                    if !self.eat(&Token::RParen) {
                        loop {
                            args.push(self.expression(false)?);
                            if self.eat(&Token::RParen) {
                                break;
                            }
                            self.expect(&Token::Comma, "',' or ')' in call arguments")?;
                        }
                    }
                    Ok(Expression::FunctionCall { name, args })
                }
                _ => Ok(Expression::Variable(name)),
            },
            other => {
                self.position -= 1;
                Err(self.error(format!("unexpected {}", other.describe())))
            }
        }
    }

    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.tokens.get(self.position) == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek_keyword_at(0, keyword)
    }

    fn peek_keyword_at(&self, offset: usize, keyword: &str) -> bool {
        matches!(self.tokens.get(self.position + offset), Some(Token::Name(word)) if word == keyword)
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<String> {
        match self.tokens.get(self.position) {
            Some(Token::Name(name)) => {
                let name = name.clone();
                self.position += 1;
                Ok(name)
            }
            _ => Err(self.error(format!("expected {}", what))),
        }
    }

    fn is_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn finish(&self) -> Result<()> {
        if self.is_end() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> Error {
        match self.tokens.get(self.position) {
            Some(token) => self.error(format!("unexpected {}", token.describe())),
            None => self.error("unexpected end of expression"),
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::syntax(self.line, self.source, message)
    }
}

fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Expression {
    Expression::BinaryOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

fn tokenize(source: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
                i += 1;
            }
            // `items.0.name` is attribute access, not a float
            let after_dot = matches!(tokens.last(), Some(Token::Dot));
            let is_float = !after_dot
                && i + 1 < chars.len()
                && chars[i] == '.'
                && chars[i + 1].is_ascii_digit();
            if is_float {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }

            let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
            if is_float {
                let value = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Float(value));
            } else {
                let value = text
                    .parse::<i64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Integer(value));
            }
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Name(chars[start..i].iter().collect()));
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let mut value = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err("unterminated string literal".to_string()),
                    Some(&ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = chars
                            .get(i + 1)
                            .ok_or_else(|| "unterminated string literal".to_string())?;
                        match escaped {
                            'n' => value.push('\n'),
                            't' => value.push('\t'),
                            'r' => value.push('\r'),
                            other => value.push(*other),
                        }
                        i += 2;
                    }
                    Some(&ch) => {
                        value.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(value));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            ('=', Some('=')) => (Token::Equal, 2),
            ('!', Some('=')) => (Token::NotEqual, 2),
            ('<', Some('=')) => (Token::LessEqual, 2),
            ('>', Some('=')) => (Token::GreaterEqual, 2),
            ('/', Some('/')) => (Token::DoubleSlash, 2),
            ('=', _) => (Token::Assign, 1),
            ('<', _) => (Token::Less, 1),
            ('>', _) => (Token::Greater, 1),
            ('/', _) => (Token::Slash, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            (',', _) => (Token::Comma, 1),
            ('.', _) => (Token::Dot, 1),
            ('|', _) => (Token::Pipe, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('%', _) => (Token::Percent, 1),
            _ => return Err(format!("unexpected character '{}'", c)),
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}
