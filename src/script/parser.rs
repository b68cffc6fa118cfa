//! Recursive-descent parser producing [`Program`]s

use std::rc::Rc;

use super::ast::*;
use super::error::EvalError;
use super::lexer::{tokenize, Keyword, Punct, TemplateChunk, Token, TokenKind};
use super::value::number_to_string;

/// Nesting bound for statements and expressions; keeps parsing and evaluation off the
/// end of the native stack.
const MAX_NESTING: usize = 128;

/// Parse `source` as a single value-producing expression.
pub fn parse_expression_program(source: &str) -> Result<Program, EvalError> {
    let mut parser = Parser::new(tokenize(source)?, 0);
    if parser.at_eof() {
        return Ok(Program::Statements(Vec::new()));
    }
    let expr = parser.expression()?;
    parser.expect_eof()?;
    Ok(Program::Expression(expr))
}

/// Parse `source` as the body of a function: statements with `return` allowed.
pub fn parse_statement_program(source: &str) -> Result<Program, EvalError> {
    let mut parser = Parser::new(tokenize(source)?, 0);
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.statement()?);
    }
    Ok(Program::Statements(body))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, depth: usize) -> Self {
        Self { tokens, pos: 0, depth }
    }

    // -- token helpers -----------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_nth(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn at_punct(&self, punct: Punct) -> bool {
        self.peek().kind == TokenKind::Punct(punct)
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(keyword)
    }

    fn at_contextual(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if &**name == word)
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.at_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.at_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct) -> Result<(), EvalError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_eof(&self) -> Result<(), EvalError> {
        if self.at_eof() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_ident(&mut self) -> Result<Rc<str>, EvalError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn unexpected(&self) -> EvalError {
        let token = self.peek();
        let message = match &token.kind {
            TokenKind::Eof => "Unexpected end of input".to_string(),
            TokenKind::Ident(name) => format!("Unexpected identifier '{}'", name),
            _ => format!("Unexpected {}", token.describe()),
        };
        EvalError::Syntax(message)
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(EvalError::Syntax("Program is nested too deeply".to_string()));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Automatic semicolon insertion: `;`, a line break, `}` or end of input ends a statement.
    fn consume_semicolon(&mut self) -> Result<(), EvalError> {
        if self.eat_punct(Punct::Semicolon) {
            return Ok(());
        }
        if self.at_punct(Punct::RBrace) || self.at_eof() || self.peek().newline_before {
            return Ok(());
        }
        Err(self.unexpected())
    }

    // -- statements --------------------------------------------------------

    fn statement(&mut self) -> Result<Stmt, EvalError> {
        self.enter()?;
        let stmt = self.statement_inner();
        self.leave();
        stmt
    }

    fn statement_inner(&mut self) -> Result<Stmt, EvalError> {
        match self.peek().kind.clone() {
            TokenKind::Punct(Punct::LBrace) => Ok(Stmt::Block(self.block()?)),
            TokenKind::Punct(Punct::Semicolon) => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::Keyword(Keyword::Const) => self.declaration_statement(DeclKind::Const),
            TokenKind::Keyword(Keyword::Let) => self.declaration_statement(DeclKind::Let),
            TokenKind::Keyword(Keyword::Var) => self.declaration_statement(DeclKind::Var),
            TokenKind::Keyword(Keyword::Function) => {
                self.advance();
                let def = self.function_rest(true)?;
                Ok(Stmt::Function(def))
            }
            TokenKind::Keyword(Keyword::If) => self.if_statement(),
            TokenKind::Keyword(Keyword::For) => self.for_statement(),
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let test = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { test, body })
            }
            TokenKind::Keyword(Keyword::Do) => {
                self.advance();
                let body = Box::new(self.statement()?);
                if !self.eat_keyword(Keyword::While) {
                    return Err(self.unexpected());
                }
                self.expect_punct(Punct::LParen)?;
                let test = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                self.eat_punct(Punct::Semicolon);
                Ok(Stmt::DoWhile { body, test })
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Break)
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Continue)
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.at_punct(Punct::Semicolon)
                    || self.at_punct(Punct::RBrace)
                    || self.at_eof()
                    || self.peek().newline_before
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(value))
            }
            TokenKind::Keyword(Keyword::Throw) => {
                self.advance();
                let value = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(value))
            }
            TokenKind::Keyword(Keyword::Try) => self.try_statement(),
            _ => {
                let expr = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, EvalError> {
        self.expect_punct(Punct::LBrace)?;
        let mut body = Vec::new();
        while !self.at_punct(Punct::RBrace) {
            if self.at_eof() {
                return Err(self.unexpected());
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn declaration_statement(&mut self, kind: DeclKind) -> Result<Stmt, EvalError> {
        self.advance();
        let first = self.binding_pattern()?;
        let decls = self.declarators(kind, first)?;
        self.consume_semicolon()?;
        Ok(Stmt::Decl { kind, decls })
    }

    /// Remaining declarators after the first pattern has been read.
    fn declarators(&mut self, kind: DeclKind, first: Pattern) -> Result<Vec<(Pattern, Option<Expr>)>, EvalError> {
        let mut decls = Vec::new();
        let mut pattern = first;
        loop {
            let init = if self.eat_punct(Punct::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            if init.is_none() && (kind == DeclKind::Const || !matches!(pattern, Pattern::Ident(_))) {
                let message = if kind == DeclKind::Const {
                    "Missing initializer in const declaration"
                } else {
                    "Missing initializer in destructuring declaration"
                };
                return Err(EvalError::Syntax(message.to_string()));
            }
            decls.push((pattern, init));
            if !self.eat_punct(Punct::Comma) {
                return Ok(decls);
            }
            pattern = self.binding_pattern()?;
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, EvalError> {
        self.advance();
        self.expect_punct(Punct::LParen)?;
        let test = self.expression()?;
        self.expect_punct(Punct::RParen)?;
        let then = Box::new(self.statement()?);
        let otherwise = if self.eat_keyword(Keyword::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If { test, then, otherwise })
    }

    fn for_statement(&mut self) -> Result<Stmt, EvalError> {
        self.advance();
        self.expect_punct(Punct::LParen)?;

        let decl_kind = match self.peek().kind {
            TokenKind::Keyword(Keyword::Const) => Some(DeclKind::Const),
            TokenKind::Keyword(Keyword::Let) => Some(DeclKind::Let),
            TokenKind::Keyword(Keyword::Var) => Some(DeclKind::Var),
            _ => None,
        };

        let init = if let Some(kind) = decl_kind {
            self.advance();
            let pattern = self.binding_pattern()?;
            if let Some(stmt) = self.for_in_of_tail(Some(kind), pattern.clone())? {
                return Ok(stmt);
            }
            let decls = self.declarators(kind, pattern)?;
            Some(Box::new(Stmt::Decl { kind, decls }))
        } else if self.at_punct(Punct::Semicolon) {
            None
        } else {
            let is_loop_head = matches!(self.peek().kind, TokenKind::Ident(_))
                && match &self.peek_nth(1).kind {
                    TokenKind::Keyword(Keyword::In) => true,
                    TokenKind::Ident(word) => &**word == "of",
                    _ => false,
                };
            if is_loop_head {
                let name = self.expect_ident()?;
                if let Some(stmt) = self.for_in_of_tail(None, Pattern::Ident(name))? {
                    return Ok(stmt);
                }
            }
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };

        self.expect_punct(Punct::Semicolon)?;
        let test = if self.at_punct(Punct::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::Semicolon)?;
        let update = if self.at_punct(Punct::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::RParen)?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For { init, test, update, body })
    }

    fn for_in_of_tail(&mut self, kind: Option<DeclKind>, target: Pattern) -> Result<Option<Stmt>, EvalError> {
        if self.at_contextual("of") {
            self.advance();
            let iterable = self.assignment()?;
            self.expect_punct(Punct::RParen)?;
            let body = Box::new(self.statement()?);
            return Ok(Some(Stmt::ForOf { kind, target, iterable, body }));
        }
        if self.eat_keyword(Keyword::In) {
            let object = self.expression()?;
            self.expect_punct(Punct::RParen)?;
            let body = Box::new(self.statement()?);
            return Ok(Some(Stmt::ForIn { kind, target, object, body }));
        }
        Ok(None)
    }

    fn try_statement(&mut self) -> Result<Stmt, EvalError> {
        self.advance();
        let block = self.block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword(Keyword::Catch) {
            if self.eat_punct(Punct::LParen) {
                param = Some(self.binding_pattern()?);
                self.expect_punct(Punct::RParen)?;
            }
            handler = Some(self.block()?);
        }
        let finalizer = if self.eat_keyword(Keyword::Finally) {
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(EvalError::Syntax("Missing catch or finally after try".to_string()));
        }
        Ok(Stmt::Try { block, param, handler, finalizer })
    }

    // -- patterns ----------------------------------------------------------

    fn binding_pattern(&mut self) -> Result<Pattern, EvalError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Pattern::Ident(name))
            }
            TokenKind::Punct(Punct::LBrace) => self.object_pattern(),
            TokenKind::Punct(Punct::LBracket) => self.array_pattern(),
            _ => Err(self.unexpected()),
        }
    }

    fn object_pattern(&mut self) -> Result<Pattern, EvalError> {
        self.expect_punct(Punct::LBrace)?;
        let mut props = Vec::new();
        let mut rest = None;
        while !self.eat_punct(Punct::RBrace) {
            if self.eat_punct(Punct::Ellipsis) {
                rest = Some(self.expect_ident()?);
                self.expect_punct(Punct::RBrace)?;
                break;
            }
            let (key, shorthand) = self.property_key()?;
            let value = if self.eat_punct(Punct::Colon) {
                self.binding_pattern()?
            } else {
                match shorthand {
                    Some(name) => Pattern::Ident(name),
                    None => return Err(self.unexpected()),
                }
            };
            let default = if self.eat_punct(Punct::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            props.push(PropPattern { key, value, default });
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RBrace)?;
                break;
            }
        }
        Ok(Pattern::Object { props, rest })
    }

    fn array_pattern(&mut self) -> Result<Pattern, EvalError> {
        self.expect_punct(Punct::LBracket)?;
        let mut elems = Vec::new();
        let mut rest = None;
        loop {
            if self.eat_punct(Punct::RBracket) {
                break;
            }
            if self.eat_punct(Punct::Comma) {
                elems.push(None);
                continue;
            }
            if self.eat_punct(Punct::Ellipsis) {
                rest = Some(Box::new(self.binding_pattern()?));
                self.expect_punct(Punct::RBracket)?;
                break;
            }
            let pattern = self.binding_pattern()?;
            let default = if self.eat_punct(Punct::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            elems.push(Some(PatternElem { pattern, default }));
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RBracket)?;
                break;
            }
        }
        Ok(Pattern::Array { elems, rest })
    }

    /// Reads an object key; the second value is set when the key may be used as shorthand.
    fn property_key(&mut self) -> Result<(PropKey, Option<Rc<str>>), EvalError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((PropKey::Static(name.clone()), Some(name)))
            }
            TokenKind::Keyword(keyword) => {
                self.advance();
                Ok((PropKey::Static(keyword.as_str().into()), None))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok((PropKey::Static(s), None))
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok((PropKey::Static(number_to_string(n).into()), None))
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.advance();
                let expr = self.assignment()?;
                self.expect_punct(Punct::RBracket)?;
                Ok((PropKey::Computed(Box::new(expr)), None))
            }
            _ => Err(self.unexpected()),
        }
    }

    // -- functions ---------------------------------------------------------

    /// Parses `name? (params) { body }` after the `function` keyword.
    fn function_rest(&mut self, require_name: bool) -> Result<Rc<FunctionDef>, EvalError> {
        let name = match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ if require_name => return Err(self.unexpected()),
            _ => None,
        };
        let (params, rest) = self.parameter_list()?;
        let body = FunctionBody::Block(self.block()?);
        Ok(Rc::new(FunctionDef {
            name,
            params,
            rest,
            body,
            is_arrow: false,
        }))
    }

    fn parameter_list(&mut self) -> Result<(Vec<Param>, Option<Pattern>), EvalError> {
        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        let mut rest = None;
        while !self.eat_punct(Punct::RParen) {
            if self.eat_punct(Punct::Ellipsis) {
                rest = Some(self.binding_pattern()?);
                self.expect_punct(Punct::RParen)?;
                break;
            }
            let pattern = self.binding_pattern()?;
            let default = if self.eat_punct(Punct::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            params.push(Param { pattern, default });
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen)?;
                break;
            }
        }
        Ok((params, rest))
    }

    /// Looks past a balanced parenthesised group for `=>`.
    fn at_arrow_params(&self) -> bool {
        if !self.at_punct(Punct::LParen) {
            return false;
        }
        let mut depth = 0usize;
        let mut i = self.pos;
        while i < self.tokens.len() {
            match self.tokens[i].kind {
                TokenKind::Punct(Punct::LParen | Punct::LBracket | Punct::LBrace) => depth += 1,
                TokenKind::Punct(Punct::RParen | Punct::RBracket | Punct::RBrace) => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(i + 1).map(|t| &t.kind),
                            Some(TokenKind::Punct(Punct::Arrow))
                        );
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn arrow_function(&mut self) -> Result<Expr, EvalError> {
        let (params, rest) = if let TokenKind::Ident(name) = self.peek().kind.clone() {
            self.advance();
            (
                vec![Param {
                    pattern: Pattern::Ident(name),
                    default: None,
                }],
                None,
            )
        } else {
            self.parameter_list()?
        };
        self.expect_punct(Punct::Arrow)?;
        let body = if self.at_punct(Punct::LBrace) {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(Box::new(self.assignment()?))
        };
        Ok(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            rest,
            body,
            is_arrow: true,
        })))
    }

    // -- expressions -------------------------------------------------------

    fn expression(&mut self) -> Result<Expr, EvalError> {
        let first = self.assignment()?;
        if !self.at_punct(Punct::Comma) {
            return Ok(first);
        }
        let mut exprs = vec![first];
        while self.eat_punct(Punct::Comma) {
            exprs.push(self.assignment()?);
        }
        Ok(Expr::Sequence(exprs))
    }

    fn assignment(&mut self) -> Result<Expr, EvalError> {
        self.enter()?;
        let expr = self.assignment_inner();
        self.leave();
        expr
    }

    fn assignment_inner(&mut self) -> Result<Expr, EvalError> {
        let single_param_arrow = matches!(self.peek().kind, TokenKind::Ident(_))
            && self.peek_nth(1).kind == TokenKind::Punct(Punct::Arrow);
        if single_param_arrow || self.at_arrow_params() {
            return self.arrow_function();
        }

        let target = self.conditional()?;
        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Assign) => AssignOp::Assign,
            TokenKind::Punct(Punct::PlusAssign) => AssignOp::Arith(BinaryOp::Add),
            TokenKind::Punct(Punct::MinusAssign) => AssignOp::Arith(BinaryOp::Sub),
            TokenKind::Punct(Punct::StarAssign) => AssignOp::Arith(BinaryOp::Mul),
            TokenKind::Punct(Punct::SlashAssign) => AssignOp::Arith(BinaryOp::Div),
            TokenKind::Punct(Punct::PercentAssign) => AssignOp::Arith(BinaryOp::Rem),
            TokenKind::Punct(Punct::StarStarAssign) => AssignOp::Arith(BinaryOp::Pow),
            TokenKind::Punct(Punct::AndAndAssign) => AssignOp::Logical(LogicalOp::And),
            TokenKind::Punct(Punct::OrOrAssign) => AssignOp::Logical(LogicalOp::Or),
            TokenKind::Punct(Punct::QuestionQuestionAssign) => AssignOp::Logical(LogicalOp::Nullish),
            _ => return Ok(target),
        };
        if !is_assignable(&target) {
            return Err(EvalError::Syntax("Invalid left-hand side in assignment".to_string()));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> Result<Expr, EvalError> {
        let test = self.binary(0)?;
        if !self.eat_punct(Punct::Question) {
            return Ok(test);
        }
        let consequent = self.assignment()?;
        self.expect_punct(Punct::Colon)?;
        let alternate = self.assignment()?;
        Ok(Expr::Conditional(Box::new(test), Box::new(consequent), Box::new(alternate)))
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, EvalError> {
        let mut left = self.unary()?;
        loop {
            let Some((prec, op)) = binary_operator(&self.peek().kind) else {
                return Ok(left);
            };
            if prec < min_prec {
                return Ok(left);
            }
            self.advance();
            // `**` is right-associative
            let right = if matches!(op, Operator::Binary(BinaryOp::Pow)) {
                self.binary(prec)?
            } else {
                self.binary(prec + 1)?
            };
            left = match op {
                Operator::Binary(op) => Expr::Binary(op, Box::new(left), Box::new(right)),
                Operator::Logical(op) => Expr::Logical(op, Box::new(left), Box::new(right)),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        self.enter()?;
        let expr = self.unary_inner();
        self.leave();
        expr
    }

    fn unary_inner(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Bang) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            TokenKind::Keyword(Keyword::TypeOf) => Some(UnaryOp::TypeOf),
            TokenKind::Keyword(Keyword::Void) => Some(UnaryOp::Void),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary()?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }

        if self.at_punct(Punct::PlusPlus) || self.at_punct(Punct::MinusMinus) {
            let increment = self.at_punct(Punct::PlusPlus);
            self.advance();
            let target = self.unary()?;
            if !is_assignable(&target) {
                return Err(EvalError::Syntax(
                    "Invalid left-hand side expression in prefix operation".to_string(),
                ));
            }
            return Ok(Expr::Update {
                increment,
                prefix: true,
                target: Box::new(target),
            });
        }

        let expr = self.left_hand_side()?;
        let postfix = (self.at_punct(Punct::PlusPlus) || self.at_punct(Punct::MinusMinus))
            && !self.peek().newline_before;
        if postfix {
            if !is_assignable(&expr) {
                return Err(EvalError::Syntax(
                    "Invalid left-hand side expression in postfix operation".to_string(),
                ));
            }
            let increment = self.at_punct(Punct::PlusPlus);
            self.advance();
            return Ok(Expr::Update {
                increment,
                prefix: false,
                target: Box::new(expr),
            });
        }
        Ok(expr)
    }

    fn left_hand_side(&mut self) -> Result<Expr, EvalError> {
        let mut expr = if self.at_keyword(Keyword::New) {
            self.new_expression()?
        } else {
            self.primary()?
        };
        let mut optional_chain = false;
        loop {
            match self.peek().kind.clone() {
                TokenKind::Punct(Punct::Dot) => {
                    self.advance();
                    let name = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Static(name),
                        optional: false,
                    };
                }
                TokenKind::Punct(Punct::QuestionDot) => {
                    self.advance();
                    optional_chain = true;
                    if self.at_punct(Punct::LParen) {
                        let args = self.arguments()?;
                        expr = Expr::Call {
                            callee: Box::new(expr),
                            args,
                            optional: true,
                        };
                    } else if self.eat_punct(Punct::LBracket) {
                        let property = self.expression()?;
                        self.expect_punct(Punct::RBracket)?;
                        expr = Expr::Member {
                            object: Box::new(expr),
                            property: MemberProp::Computed(Box::new(property)),
                            optional: true,
                        };
                    } else {
                        let name = self.property_name()?;
                        expr = Expr::Member {
                            object: Box::new(expr),
                            property: MemberProp::Static(name),
                            optional: true,
                        };
                    }
                }
                TokenKind::Punct(Punct::LBracket) => {
                    self.advance();
                    let property = self.expression()?;
                    self.expect_punct(Punct::RBracket)?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Computed(Box::new(property)),
                        optional: false,
                    };
                }
                TokenKind::Punct(Punct::LParen) => {
                    let args = self.arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: false,
                    };
                }
                TokenKind::Template(_) => {
                    return Err(EvalError::Syntax("Tagged templates are not supported".to_string()));
                }
                _ => break,
            }
        }
        if optional_chain {
            expr = Expr::OptionalChain(Box::new(expr));
        }
        Ok(expr)
    }

    fn new_expression(&mut self) -> Result<Expr, EvalError> {
        self.advance();
        let mut callee = self.primary()?;
        loop {
            if self.eat_punct(Punct::Dot) {
                let name = self.property_name()?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property: MemberProp::Static(name),
                    optional: false,
                };
            } else if self.eat_punct(Punct::LBracket) {
                let property = self.expression()?;
                self.expect_punct(Punct::RBracket)?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property: MemberProp::Computed(Box::new(property)),
                    optional: false,
                };
            } else {
                break;
            }
        }
        let args = if self.at_punct(Punct::LParen) {
            self.arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
        })
    }

    fn property_name(&mut self) -> Result<Rc<str>, EvalError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            TokenKind::Keyword(keyword) => {
                self.advance();
                Ok(keyword.as_str().into())
            }
            _ => Err(self.unexpected()),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Arg>, EvalError> {
        self.expect_punct(Punct::LParen)?;
        let mut args = Vec::new();
        while !self.eat_punct(Punct::RParen) {
            if self.eat_punct(Punct::Ellipsis) {
                args.push(Arg::Spread(self.assignment()?));
            } else {
                args.push(Arg::Item(self.assignment()?));
            }
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen)?;
                break;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Expr::String(s))
            }
            TokenKind::Template(chunks) => {
                self.advance();
                self.template(chunks)
            }
            TokenKind::Regex { pattern, flags } => {
                self.advance();
                Ok(Expr::Regex { pattern, flags })
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Ident(name))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::Keyword(Keyword::Function) => {
                self.advance();
                Ok(Expr::Function(self.function_rest(false)?))
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                Ok(expr)
            }
            TokenKind::Punct(Punct::LBracket) => self.array_literal(),
            TokenKind::Punct(Punct::LBrace) => self.object_literal(),
            _ => Err(self.unexpected()),
        }
    }

    fn template(&mut self, chunks: Vec<TemplateChunk>) -> Result<Expr, EvalError> {
        let mut pieces = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match chunk {
                TemplateChunk::Str(s) => pieces.push(TemplatePiece::Str(s.into())),
                TemplateChunk::Expr(source) => {
                    let mut inner = Parser::new(tokenize(&source)?, self.depth + 1);
                    let expr = inner.expression()?;
                    inner.expect_eof()?;
                    pieces.push(TemplatePiece::Expr(expr));
                }
            }
        }
        Ok(Expr::Template(pieces))
    }

    fn array_literal(&mut self) -> Result<Expr, EvalError> {
        self.expect_punct(Punct::LBracket)?;
        let mut elems = Vec::new();
        loop {
            if self.eat_punct(Punct::RBracket) {
                break;
            }
            if self.eat_punct(Punct::Comma) {
                elems.push(ArrayElem::Hole);
                continue;
            }
            if self.eat_punct(Punct::Ellipsis) {
                elems.push(ArrayElem::Spread(self.assignment()?));
            } else {
                elems.push(ArrayElem::Item(self.assignment()?));
            }
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RBracket)?;
                break;
            }
        }
        Ok(Expr::Array(elems))
    }

    fn object_literal(&mut self) -> Result<Expr, EvalError> {
        self.expect_punct(Punct::LBrace)?;
        let mut props = Vec::new();
        while !self.eat_punct(Punct::RBrace) {
            if self.eat_punct(Punct::Ellipsis) {
                props.push(ObjectProp::Spread(self.assignment()?));
            } else {
                let (key, shorthand) = self.property_key()?;
                let value = if self.eat_punct(Punct::Colon) {
                    self.assignment()?
                } else if self.at_punct(Punct::LParen) {
                    let (params, rest) = self.parameter_list()?;
                    let body = FunctionBody::Block(self.block()?);
                    let name = match &key {
                        PropKey::Static(name) => Some(name.clone()),
                        PropKey::Computed(_) => None,
                    };
                    Expr::Function(Rc::new(FunctionDef {
                        name,
                        params,
                        rest,
                        body,
                        is_arrow: false,
                    }))
                } else {
                    match shorthand {
                        Some(name) => Expr::Ident(name),
                        None => return Err(self.unexpected()),
                    }
                };
                props.push(ObjectProp::KeyValue(key, value));
            }
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RBrace)?;
                break;
            }
        }
        Ok(Expr::Object(props))
    }
}

enum Operator {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn binary_operator(kind: &TokenKind) -> Option<(u8, Operator)> {
    let entry = match kind {
        TokenKind::Punct(Punct::QuestionQuestion) => (1, Operator::Logical(LogicalOp::Nullish)),
        TokenKind::Punct(Punct::OrOr) => (2, Operator::Logical(LogicalOp::Or)),
        TokenKind::Punct(Punct::AndAnd) => (3, Operator::Logical(LogicalOp::And)),
        TokenKind::Punct(Punct::EqEq) => (6, Operator::Binary(BinaryOp::Eq)),
        TokenKind::Punct(Punct::NotEq) => (6, Operator::Binary(BinaryOp::NotEq)),
        TokenKind::Punct(Punct::EqEqEq) => (6, Operator::Binary(BinaryOp::StrictEq)),
        TokenKind::Punct(Punct::NotEqEq) => (6, Operator::Binary(BinaryOp::StrictNotEq)),
        TokenKind::Punct(Punct::Lt) => (7, Operator::Binary(BinaryOp::Lt)),
        TokenKind::Punct(Punct::Gt) => (7, Operator::Binary(BinaryOp::Gt)),
        TokenKind::Punct(Punct::LtEq) => (7, Operator::Binary(BinaryOp::LtEq)),
        TokenKind::Punct(Punct::GtEq) => (7, Operator::Binary(BinaryOp::GtEq)),
        TokenKind::Keyword(Keyword::In) => (7, Operator::Binary(BinaryOp::In)),
        TokenKind::Keyword(Keyword::InstanceOf) => (7, Operator::Binary(BinaryOp::InstanceOf)),
        TokenKind::Punct(Punct::Plus) => (9, Operator::Binary(BinaryOp::Add)),
        TokenKind::Punct(Punct::Minus) => (9, Operator::Binary(BinaryOp::Sub)),
        TokenKind::Punct(Punct::Star) => (10, Operator::Binary(BinaryOp::Mul)),
        TokenKind::Punct(Punct::Slash) => (10, Operator::Binary(BinaryOp::Div)),
        TokenKind::Punct(Punct::Percent) => (10, Operator::Binary(BinaryOp::Rem)),
        TokenKind::Punct(Punct::StarStar) => (11, Operator::Binary(BinaryOp::Pow)),
        _ => return None,
    };
    Some(entry)
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(expr, Expr::Ident(_) | Expr::Member { optional: false, .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(source: &str) -> Expr {
        match parse_expression_program(source).unwrap() {
            Program::Expression(expr) => expr,
            other => panic!("expected expression, got {:?}", other),
        }
    }

    fn statements(source: &str) -> Vec<Stmt> {
        match parse_statement_program(source).unwrap() {
            Program::Statements(body) => body,
            other => panic!("expected statements, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_helper_call_with_arrow() {
        let parsed = expr("findByType('TEXT').map(n => ({ name: n.name }))");
        let Expr::Call { callee, args, .. } = parsed else {
            panic!("expected call");
        };
        assert!(matches!(*callee, Expr::Member { .. }));
        assert!(matches!(&args[0], Arg::Item(Expr::Function(def)) if def.is_arrow));
    }

    #[test]
    fn test_precedence() {
        let parsed = expr("1 + 2 * 3");
        let Expr::Binary(BinaryOp::Add, _, right) = parsed else {
            panic!("expected addition at the root");
        };
        assert!(matches!(*right, Expr::Binary(BinaryOp::Mul, _, _)));
    }

    #[test]
    fn test_exponent_right_associative() {
        let parsed = expr("2 ** 3 ** 2");
        let Expr::Binary(BinaryOp::Pow, left, _) = parsed else {
            panic!("expected power");
        };
        assert!(matches!(*left, Expr::Number(n) if n == 2.0));
    }

    #[test]
    fn test_optional_chain_wrapped() {
        assert!(matches!(expr("a?.b.c"), Expr::OptionalChain(_)));
        assert!(matches!(expr("a.b.c"), Expr::Member { .. }));
    }

    #[test]
    fn test_parenthesised_arrow_with_destructuring() {
        let parsed = expr("({ id, name = 'x' }, i) => id");
        let Expr::Function(def) = parsed else {
            panic!("expected arrow");
        };
        assert_eq!(def.params.len(), 2);
        assert!(matches!(def.params[0].pattern, Pattern::Object { .. }));
    }

    #[test]
    fn test_statement_program_with_asi() {
        let body = statements("const a = 1\nconst b = 2\nreturn a + b");
        assert_eq!(body.len(), 3);
        assert!(matches!(body[2], Stmt::Return(Some(_))));
    }

    #[test]
    fn test_for_of_and_classic_for() {
        let body = statements("for (const n of getAllNodes()) {} for (let i = 0; i < 3; i++) {}");
        assert!(matches!(body[0], Stmt::ForOf { kind: Some(DeclKind::Const), .. }));
        assert!(matches!(body[1], Stmt::For { .. }));
    }

    #[test]
    fn test_for_in_without_declaration() {
        let body = statements("let k; for (k in obj) {}");
        assert!(matches!(body[1], Stmt::ForIn { kind: None, .. }));
    }

    #[test]
    fn test_return_newline_is_empty_return() {
        let body = statements("return\n42");
        assert!(matches!(body[0], Stmt::Return(None)));
    }

    #[test]
    fn test_const_requires_initializer() {
        let err = parse_statement_program("const x;").unwrap_err();
        assert_eq!(
            err,
            EvalError::Syntax("Missing initializer in const declaration".to_string())
        );
    }

    #[test]
    fn test_unexpected_token_message() {
        let err = parse_expression_program("findByType(").unwrap_err();
        assert_eq!(err, EvalError::Syntax("Unexpected end of input".to_string()));
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(parse_statement_program("1 = 2").is_err());
    }

    #[test]
    fn test_excessive_nesting_rejected() {
        let source = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        assert!(matches!(
            parse_expression_program(&source),
            Err(EvalError::Syntax(_))
        ));
    }

    #[test]
    fn test_empty_expression_program() {
        assert!(matches!(
            parse_expression_program("").unwrap(),
            Program::Statements(body) if body.is_empty()
        ));
    }
}
