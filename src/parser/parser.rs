//! Рекурсивный нисходящий парсер шейдерного языка.
//!
//! Работает над вектором токенов: различение объявления и выражения
//! (`vec4 a;` против `vec4(1.0);`) требует заглядывания на два токена.
//! Первая синтаксическая ошибка прерывает разбор.

use super::ast::*;
use super::error::ParseError;
use super::lexer::Lexer;
use super::token::{Span, Spanned, Token};
use crate::ops::{BinaryOp, UnaryOp};
use crate::types::Type;

/// Приоритет самого слабого бинарного оператора (`||`).
const LOWEST_BINARY_PRECEDENCE: u8 = 14;

/// Парсер шейдерного языка.
pub struct Parser {
    tokens: Vec<Spanned<Token>>,
    pos: usize,
}

impl Parser {
    /// Создать новый парсер (лексический анализ выполняется сразу).
    pub fn new(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: Lexer::new(source).tokenize()?,
            pos: 0,
        })
    }

    /// Распарсить все объявления верхнего уровня.
    pub fn parse_items(&mut self) -> Result<Vec<ExternalDecl>, ParseError> {
        let mut items = Vec::new();
        while !self.check(&Token::Eof) {
            if let Some(item) = self.parse_external()? {
                items.push(item);
            }
        }
        Ok(items)
    }

    // === Навигация по токенам ===

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Token {
        self.tokens
            .get(self.pos + n)
            .or_else(|| self.tokens.last())
            .map_or(&Token::Eof, |t| &t.value)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or_else(Span::default, |t| t.span)
    }

    fn previous_span(&self) -> Span {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(t) => t.span,
            None => self.span(),
        }
    }

    fn advance(&mut self) -> Spanned<Token> {
        let token = match self.tokens.get(self.pos) {
            Some(t) => t.clone(),
            None => Spanned::new(Token::Eof, self.span()),
        };
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error_here(&self, expected: &str) -> ParseError {
        if self.check(&Token::Eof) {
            ParseError::unexpected_eof(self.span(), format!("expected {}", expected))
        } else {
            ParseError::unexpected_token(self.span(), expected, self.peek())
        }
    }

    fn expect(&mut self, token: &Token) -> Result<Span, ParseError> {
        if self.check(token) {
            Ok(self.advance().span)
        } else {
            Err(self.error_here(&format!("'{}'", token)))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Span), ParseError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                let span = self.advance().span;
                Ok((name, span))
            }
            _ => Err(self.error_here(what)),
        }
    }

    /// Начинается ли здесь объявление переменной.
    fn at_declaration(&self) -> bool {
        if self.peek().starts_declaration() {
            return true;
        }
        match (self.peek(), self.peek_at(1)) {
            (Token::Ident(name), Token::Ident(_)) => Type::from_name(name).is_some(),
            _ => false,
        }
    }

    // === Верхний уровень ===

    fn parse_external(&mut self) -> Result<Option<ExternalDecl>, ParseError> {
        if self.eat(&Token::Semicolon) {
            return Ok(None);
        }
        if self.check(&Token::Precision) {
            self.parse_precision()?;
            return Ok(None);
        }

        let start = self.span();
        let qualifiers = self.parse_qualifiers()?;

        if qualifiers.storage == Some(StorageQualifier::In)
            && !qualifiers.layout.is_empty()
            && self.check(&Token::Semicolon)
        {
            let end = self.advance().span;
            return Ok(Some(ExternalDecl::LocalSize(qualifiers.layout, start.merge(end))));
        }

        let ty = self.parse_type_spec()?;
        let (name, _) = self.expect_ident("identifier")?;

        if self.check(&Token::LParen) {
            if qualifiers.storage.is_some() || !qualifiers.layout.is_empty() {
                return Err(ParseError::unsupported(start, "qualified function return type"));
            }
            let proto = self.parse_function_rest(ty, name, start)?;
            if self.eat(&Token::Semicolon) {
                return Ok(Some(ExternalDecl::Prototype(proto)));
            }
            let body = self.parse_block_body()?;
            let span = start.merge(self.previous_span());
            return Ok(Some(ExternalDecl::Function(FunctionDef { proto, body, span })));
        }

        let decl = self.parse_declaration_rest(qualifiers, ty, name, start)?;
        Ok(Some(ExternalDecl::Variables(decl)))
    }

    /// `precision highp float;`: принимается и игнорируется.
    fn parse_precision(&mut self) -> Result<(), ParseError> {
        self.expect(&Token::Precision)?;
        if !self.peek().is_precision() {
            return Err(self.error_here("precision qualifier"));
        }
        self.advance();
        self.expect_ident("type name")?;
        self.expect(&Token::Semicolon)?;
        Ok(())
    }

    fn parse_qualifiers(&mut self) -> Result<Qualifiers, ParseError> {
        let mut qualifiers = Qualifiers::default();
        loop {
            let storage = match self.peek() {
                Token::Const => Some(StorageQualifier::Const),
                Token::Uniform => Some(StorageQualifier::Uniform),
                Token::In => Some(StorageQualifier::In),
                Token::Out => Some(StorageQualifier::Out),
                Token::InOut => Some(StorageQualifier::InOut),
                Token::Attribute => Some(StorageQualifier::Attribute),
                Token::Varying => Some(StorageQualifier::Varying),
                _ => None,
            };
            if let Some(storage) = storage {
                if qualifiers.storage.is_some() {
                    return Err(self.error_here("type name"));
                }
                qualifiers.storage = Some(storage);
                self.advance();
                continue;
            }

            match self.peek() {
                Token::Layout => {
                    self.advance();
                    self.parse_layout(&mut qualifiers.layout)?;
                }
                Token::Highp | Token::Mediump | Token::Lowp => {
                    self.advance();
                }
                Token::Flat => {
                    self.advance();
                    qualifiers.interpolation = Some(Interpolation::Flat);
                }
                Token::Smooth => {
                    self.advance();
                    qualifiers.interpolation = Some(Interpolation::Smooth);
                }
                Token::NoPerspective => {
                    self.advance();
                    qualifiers.interpolation = Some(Interpolation::NoPerspective);
                }
                Token::Centroid => {
                    self.advance();
                    qualifiers.interpolation = Some(Interpolation::Centroid);
                }
                Token::Invariant => {
                    self.advance();
                    qualifiers.invariant = true;
                }
                _ => return Ok(qualifiers),
            }
        }
    }

    fn parse_layout(&mut self, entries: &mut Vec<LayoutEntry>) -> Result<(), ParseError> {
        self.expect(&Token::LParen)?;
        loop {
            let (name, span) = self.expect_ident("layout identifier")?;
            let value = if self.eat(&Token::Assign) {
                Some(self.parse_conditional()?)
            } else {
                None
            };
            entries.push(LayoutEntry { name, value, span });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(())
    }

    fn parse_type_spec(&mut self) -> Result<TypeSpec, ParseError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                let span = self.advance().span;
                Ok(TypeSpec { name, span })
            }
            Token::Struct => Err(ParseError::unsupported(self.span(), "struct")),
            _ => Err(self.error_here("type name")),
        }
    }

    fn parse_array_sizes(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut sizes = Vec::new();
        while self.check(&Token::LBracket) {
            let open = self.advance().span;
            if self.check(&Token::RBracket) {
                return Err(ParseError::unsupported(open, "implicitly sized array"));
            }
            sizes.push(self.parse_conditional()?);
            self.expect(&Token::RBracket)?;
        }
        Ok(sizes)
    }

    /// Остаток объявления после имени первого декларатора, включая `;`.
    fn parse_declaration_rest(
        &mut self,
        qualifiers: Qualifiers,
        ty: TypeSpec,
        first_name: String,
        start: Span,
    ) -> Result<Declaration, ParseError> {
        let mut declarators = Vec::new();
        let mut name = first_name;
        let mut name_span = self.previous_span();
        loop {
            let array_sizes = self.parse_array_sizes()?;
            let init = if self.eat(&Token::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            declarators.push(Declarator {
                name,
                array_sizes,
                init,
                span: name_span.merge(self.previous_span()),
            });
            if !self.eat(&Token::Comma) {
                break;
            }
            let (next, span) = self.expect_ident("identifier")?;
            name = next;
            name_span = span;
        }
        let end = self.expect(&Token::Semicolon)?;
        Ok(Declaration {
            qualifiers,
            ty,
            declarators,
            span: start.merge(end),
        })
    }

    fn parse_function_rest(
        &mut self,
        return_type: TypeSpec,
        name: String,
        start: Span,
    ) -> Result<FunctionProto, ParseError> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();

        let void_only = matches!(self.peek(), Token::Ident(n) if n == "void")
            && self.peek_at(1) == &Token::RParen;
        if void_only {
            self.advance();
        }

        if !self.check(&Token::RParen) {
            loop {
                params.push(self.parse_param()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        let end = self.expect(&Token::RParen)?;
        Ok(FunctionProto {
            return_type,
            name,
            params,
            span: start.merge(end),
        })
    }

    fn parse_param(&mut self) -> Result<ParamDecl, ParseError> {
        let start = self.span();
        let mut qualifier = None;
        let mut is_const = false;
        loop {
            let next = match self.peek() {
                Token::Const => {
                    is_const = true;
                    None
                }
                Token::In => Some(ParamQualifier::In),
                Token::Out => Some(ParamQualifier::Out),
                Token::InOut => Some(ParamQualifier::InOut),
                Token::Highp | Token::Mediump | Token::Lowp => None,
                _ => break,
            };
            if let Some(q) = next {
                if qualifier.is_some() {
                    return Err(self.error_here("type name"));
                }
                qualifier = Some(q);
            }
            self.advance();
        }

        let ty = self.parse_type_spec()?;
        let name = match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ => None,
        };
        let array_sizes = self.parse_array_sizes()?;
        Ok(ParamDecl {
            qualifier: qualifier.unwrap_or_default(),
            is_const,
            ty,
            name,
            array_sizes,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.check(&Token::Eof) {
                return Err(ParseError::unexpected_eof(self.span(), "missing '}'"));
            }
            stmts.push(self.parse_statement()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(stmts)
    }

    // === Операторы ===

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        stacker::maybe_grow(256 * 1024, 8 * 1024 * 1024, || self.parse_statement_inner())
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, ParseError> {
        let start = self.span();
        let kind = match self.peek() {
            Token::LBrace => StmtKind::Block(self.parse_block_body()?),
            Token::Semicolon => {
                self.advance();
                StmtKind::Empty
            }
            Token::Precision => {
                self.parse_precision()?;
                StmtKind::Empty
            }
            Token::If => {
                self.advance();
                self.expect(&Token::LParen)?;
                let cond = self.parse_expression()?;
                self.expect(&Token::RParen)?;
                let then_branch = Box::new(self.parse_statement()?);
                let else_branch = if self.eat(&Token::Else) {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }
            Token::For => {
                self.advance();
                self.expect(&Token::LParen)?;
                let init = if self.eat(&Token::Semicolon) {
                    None
                } else {
                    Some(Box::new(self.parse_simple_statement()?))
                };
                let cond = if self.check(&Token::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(&Token::Semicolon)?;
                let step = if self.check(&Token::RParen) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(&Token::RParen)?;
                let body = Box::new(self.parse_statement()?);
                StmtKind::For {
                    init,
                    cond,
                    step,
                    body,
                }
            }
            Token::While => {
                self.advance();
                self.expect(&Token::LParen)?;
                let cond = self.parse_expression()?;
                self.expect(&Token::RParen)?;
                let body = Box::new(self.parse_statement()?);
                StmtKind::While { cond, body }
            }
            Token::Do => {
                self.advance();
                let body = Box::new(self.parse_statement()?);
                self.expect(&Token::While)?;
                self.expect(&Token::LParen)?;
                let cond = self.parse_expression()?;
                self.expect(&Token::RParen)?;
                self.expect(&Token::Semicolon)?;
                StmtKind::DoWhile { body, cond }
            }
            Token::Return => {
                self.advance();
                let value = if self.check(&Token::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(&Token::Semicolon)?;
                StmtKind::Return(value)
            }
            Token::Break => {
                self.advance();
                self.expect(&Token::Semicolon)?;
                StmtKind::Break
            }
            Token::Continue => {
                self.advance();
                self.expect(&Token::Semicolon)?;
                StmtKind::Continue
            }
            Token::Discard => {
                self.advance();
                self.expect(&Token::Semicolon)?;
                StmtKind::Discard
            }
            Token::Struct => return Err(ParseError::unsupported(start, "struct")),
            _ => return self.parse_simple_statement(),
        };
        Ok(Stmt {
            kind,
            span: start.merge(self.previous_span()),
        })
    }

    /// Объявление или выражение, завершённое `;`.
    fn parse_simple_statement(&mut self) -> Result<Stmt, ParseError> {
        let start = self.span();
        let kind = if self.at_declaration() {
            let qualifiers = self.parse_qualifiers()?;
            let ty = self.parse_type_spec()?;
            let (name, _) = self.expect_ident("identifier")?;
            StmtKind::Declaration(self.parse_declaration_rest(qualifiers, ty, name, start)?)
        } else {
            let expr = self.parse_expression()?;
            self.expect(&Token::Semicolon)?;
            StmtKind::Expr(expr)
        };
        Ok(Stmt {
            kind,
            span: start.merge(self.previous_span()),
        })
    }

    // === Выражения ===

    /// Выражение (оператор «запятая» не поддерживается).
    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        stacker::maybe_grow(256 * 1024, 8 * 1024 * 1024, || self.parse_assignment_inner())
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, ParseError> {
        let target = self.parse_conditional()?;
        let op = match self.peek() {
            Token::Assign => None,
            Token::PlusAssign => Some(BinaryOp::Add),
            Token::MinusAssign => Some(BinaryOp::Sub),
            Token::StarAssign => Some(BinaryOp::Mul),
            Token::SlashAssign => Some(BinaryOp::Div),
            Token::PercentAssign => Some(BinaryOp::Mod),
            Token::AmpAssign => Some(BinaryOp::BitAnd),
            Token::PipeAssign => Some(BinaryOp::BitOr),
            Token::CaretAssign => Some(BinaryOp::BitXor),
            Token::ShlAssign => Some(BinaryOp::Shl),
            Token::ShrAssign => Some(BinaryOp::Shr),
            _ => return Ok(target),
        };
        self.advance();
        let value = self.parse_assignment()?;
        let span = target.span.merge(value.span);
        Ok(Expr::new(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        ))
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_binary(LOWEST_BINARY_PRECEDENCE)?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then_expr = self.parse_expression()?;
        self.expect(&Token::Colon)?;
        let else_expr = self.parse_assignment()?;
        let span = cond.span.merge(else_expr.span);
        Ok(Expr::new(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            span,
        ))
    }

    fn binary_op(token: &Token) -> Option<BinaryOp> {
        let op = match token {
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Percent => BinaryOp::Mod,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            Token::EqEq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::Ne,
            Token::AndAnd => BinaryOp::LogicalAnd,
            Token::OrOr => BinaryOp::LogicalOr,
            Token::XorXor => BinaryOp::LogicalXor,
            Token::Amp => BinaryOp::BitAnd,
            Token::Pipe => BinaryOp::BitOr,
            Token::Caret => BinaryOp::BitXor,
            Token::Shl => BinaryOp::Shl,
            Token::Shr => BinaryOp::Shr,
            _ => return None,
        };
        Some(op)
    }

    /// Бинарные операторы с приоритетом не слабее `max_precedence`.
    fn parse_binary(&mut self, max_precedence: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = Self::binary_op(self.peek()) {
            if op.precedence() > max_precedence {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(op.precedence() - 1)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        stacker::maybe_grow(256 * 1024, 8 * 1024 * 1024, || self.parse_unary_inner())
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, ParseError> {
        let start = self.span();
        let op = match self.peek() {
            Token::Plus => {
                self.advance();
                return self.parse_unary();
            }
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
            Token::Tilde => UnaryOp::BitNot,
            Token::Inc | Token::Dec => {
                let increment = self.advance().value == Token::Inc;
                let operand = self.parse_unary()?;
                let span = start.merge(operand.span);
                return Ok(Expr::new(
                    ExprKind::IncDec {
                        increment,
                        prefix: true,
                        operand: Box::new(operand),
                    },
                    span,
                ));
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        let span = start.merge(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    let end = self.expect(&Token::RBracket)?;
                    let span = expr.span.merge(end);
                    expr = Expr::new(
                        ExprKind::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                Token::Dot => {
                    self.advance();
                    let (name, end) = self.expect_ident("field selection")?;
                    let span = expr.span.merge(end);
                    expr = Expr::new(
                        ExprKind::Field {
                            base: Box::new(expr),
                            name,
                        },
                        span,
                    );
                }
                Token::Inc | Token::Dec => {
                    let token = self.advance();
                    let span = expr.span.merge(token.span);
                    expr = Expr::new(
                        ExprKind::IncDec {
                            increment: token.value == Token::Inc,
                            prefix: false,
                            operand: Box::new(expr),
                        },
                        span,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.advance();
        let span = token.span;
        let kind = match token.value {
            Token::IntLit(n) => ExprKind::IntLit(Self::literal_u32(n, span)?),
            Token::UintLit(n) => ExprKind::UintLit(Self::literal_u32(n, span)?),
            Token::FloatLit(f) => ExprKind::FloatLit(f as f32),
            Token::BoolLit(b) => ExprKind::BoolLit(b),
            Token::Ident(name) => {
                if !self.check(&Token::LParen) {
                    return Ok(Expr::new(ExprKind::Ident(name), span));
                }
                self.advance();
                let mut args = Vec::new();
                if !self.check(&Token::RParen) {
                    loop {
                        args.push(self.parse_assignment()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                let end = self.expect(&Token::RParen)?;
                return Ok(Expr::new(ExprKind::Call { name, args }, span.merge(end)));
            }
            Token::LParen => {
                let mut inner = self.parse_expression()?;
                let end = self.expect(&Token::RParen)?;
                inner.span = span.merge(end);
                return Ok(inner);
            }
            Token::Eof => {
                return Err(ParseError::unexpected_eof(span, "expected expression"));
            }
            other => return Err(ParseError::unexpected_token(span, "expression", &other)),
        };
        Ok(Expr::new(kind, span))
    }

    fn literal_u32(value: u64, span: Span) -> Result<u32, ParseError> {
        u32::try_from(value)
            .map_err(|_| ParseError::invalid_literal(span, "integer literal too big"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<ExternalDecl> {
        Parser::new(source).unwrap().parse_items().unwrap()
    }

    fn parse_expr(source: &str) -> Expr {
        Parser::new(source).unwrap().parse_expression().unwrap()
    }

    #[test]
    fn test_parse_uniforms_and_main() {
        let items = parse("uniform vec4 u_tint; uniform sampler2D s_albedo; void main(){}");
        assert_eq!(items.len(), 3);
        match &items[0] {
            ExternalDecl::Variables(decl) => {
                assert_eq!(decl.qualifiers.storage, Some(StorageQualifier::Uniform));
                assert_eq!(decl.ty.name, "vec4");
                assert_eq!(decl.declarators[0].name, "u_tint");
            }
            other => panic!("expected variables, got {:?}", other),
        }
        match &items[2] {
            ExternalDecl::Function(f) => {
                assert_eq!(f.proto.name, "main");
                assert!(f.proto.params.is_empty());
                assert!(f.body.is_empty());
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_arrays_and_multiple_declarators() {
        let items = parse("uniform vec4 u_arr[4], u_m[2][3];");
        let ExternalDecl::Variables(decl) = &items[0] else {
            panic!("expected variables");
        };
        assert_eq!(decl.declarators.len(), 2);
        assert_eq!(decl.declarators[0].array_sizes.len(), 1);
        assert_eq!(decl.declarators[1].array_sizes.len(), 2);
    }

    #[test]
    fn test_parse_layout_and_local_size() {
        let items = parse(
            "layout(location = 2) in vec3 a_pos; layout(local_size_x = 8, local_size_y = 4) in;",
        );
        let ExternalDecl::Variables(decl) = &items[0] else {
            panic!("expected variables");
        };
        let location = decl.qualifiers.layout_value("location").unwrap();
        assert!(matches!(
            location.value.as_ref().map(|e| &e.kind),
            Some(ExprKind::IntLit(2))
        ));
        assert!(matches!(&items[1], ExternalDecl::LocalSize(entries, _) if entries.len() == 2));
    }

    #[test]
    fn test_operator_precedence() {
        let expr = parse_expr("a + b * c == d && e");
        let ExprKind::Binary { op, lhs, .. } = expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::LogicalAnd);
        let ExprKind::Binary { op, lhs, .. } = lhs.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Eq);
        let ExprKind::Binary { op, rhs, .. } = lhs.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_left_associativity() {
        let expr = parse_expr("a - b - c");
        let ExprKind::Binary { lhs, rhs, .. } = expr.kind else {
            panic!("expected binary");
        };
        assert!(matches!(lhs.kind, ExprKind::Binary { op: BinaryOp::Sub, .. }));
        assert!(matches!(rhs.kind, ExprKind::Ident(ref n) if n == "c"));
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let expr = parse_expr("a = b += c");
        let ExprKind::Assign { op: None, value, .. } = expr.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value.kind,
            ExprKind::Assign {
                op: Some(BinaryOp::Add),
                ..
            }
        ));
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse_expr("u_arr[i + 1].xyz");
        let ExprKind::Field { base, name } = expr.kind else {
            panic!("expected field");
        };
        assert_eq!(name, "xyz");
        assert!(matches!(base.kind, ExprKind::Index { .. }));
    }

    #[test]
    fn test_statements() {
        let items = parse(
            "void main(){ float x = 1.0; for (int i = 0; i < 4; i++) { x += 1.0; } \
             if (x > 2.0) discard; else x = 0.0; do { x--; } while (x > 0.0); vec4(x); }",
        );
        let ExternalDecl::Function(f) = &items[0] else {
            panic!("expected function");
        };
        assert_eq!(f.body.len(), 5);
        assert!(matches!(f.body[0].kind, StmtKind::Declaration(_)));
        assert!(matches!(f.body[1].kind, StmtKind::For { init: Some(_), .. }));
        assert!(matches!(f.body[2].kind, StmtKind::If { else_branch: Some(_), .. }));
        assert!(matches!(f.body[3].kind, StmtKind::DoWhile { .. }));
        assert!(matches!(
            &f.body[4].kind,
            StmtKind::Expr(Expr { kind: ExprKind::Call { name, .. }, .. }) if name == "vec4"
        ));
    }

    #[test]
    fn test_prototype_and_params() {
        let items = parse("float f(in float a, out vec2 b, inout int c); void g(void);");
        let ExternalDecl::Prototype(proto) = &items[0] else {
            panic!("expected prototype");
        };
        assert_eq!(proto.params.len(), 3);
        assert_eq!(proto.params[1].qualifier, ParamQualifier::Out);
        assert_eq!(proto.params[2].qualifier, ParamQualifier::InOut);
        let ExternalDecl::Prototype(proto) = &items[1] else {
            panic!("expected prototype");
        };
        assert!(proto.params.is_empty());
    }

    #[test]
    fn test_precision_is_skipped() {
        let items = parse("precision mediump float; uniform highp vec4 u;");
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_syntax_errors() {
        let err = Parser::new("void main() { float x = ; }")
            .unwrap()
            .parse_items()
            .unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedToken { .. }));

        let err = Parser::new("void main() {").unwrap().parse_items().unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof { .. }));

        let err = Parser::new("struct S { float a; };")
            .unwrap()
            .parse_items()
            .unwrap_err();
        assert!(matches!(err, ParseError::Unsupported { .. }));

        let err = Parser::new("int x = 4294967296;")
            .unwrap()
            .parse_items()
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidLiteral { .. }));
    }
}
