use anyhow::Result;

use crate::asg::{self, GraphNode};
use crate::ast::{self, AstNode, ExprOp, LeafKind};
use crate::errors::Session;
use crate::gen::{Param, TranslationUnit};
use crate::scan::{Keyword, Punct, Scanner, Token};
use crate::symtab::SymbolTable;
use crate::types::{BaseType, StructTable, TypeFlags, TypeInfo};

/// Recursive-descent parser. Drives the AST and ASG builders, opening
/// a scope at each function and block, and hands every finished
/// function body to the translation unit.
pub struct Parser<'a> {
    sess: &'a Session,
    scanner: Scanner<'a>,
    tok: Token,
    symtab: SymbolTable,
    structs: StructTable,
}

fn is_type_start(tok: &Token) -> bool {
    matches!(
        tok,
        Token::Kw(
            Keyword::Int
                | Keyword::Char
                | Keyword::Void
                | Keyword::Unsigned
                | Keyword::Struct
        )
    )
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, sess: &'a Session) -> Result<Self> {
        let mut scanner = Scanner::new(source, sess);
        let tok = scanner.next_token()?;
        Ok(Parser {
            sess,
            scanner,
            tok,
            symtab: SymbolTable::new(),
            structs: StructTable::new(),
        })
    }

    pub fn run(&mut self, unit: &mut TranslationUnit) -> Result<()> {
        while self.tok != Token::Eof {
            self.top_level(unit)?;
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Token> {
        let next = self.scanner.next_token()?;
        Ok(std::mem::replace(&mut self.tok, next))
    }

    fn check_punct(&self, p: Punct) -> bool {
        self.tok == Token::Punct(p)
    }

    fn check_kw(&self, kw: Keyword) -> bool {
        self.tok == Token::Kw(kw)
    }

    fn eat_punct(&mut self, p: Punct) -> Result<bool> {
        if self.check_punct(p) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_punct(&mut self, p: Punct) -> Result<()> {
        if !self.eat_punct(p)? {
            return Err(self.sess.error(format!(
                "syntax error: expected `{}', found {}",
                p.spelling(),
                self.tok.describe()
            )));
        }
        Ok(())
    }

    fn expect_kw(&mut self, kw: Keyword) -> Result<()> {
        if !self.check_kw(kw) {
            return Err(self.sess.error(format!(
                "syntax error: expected keyword, found {}",
                self.tok.describe()
            )));
        }
        self.advance()?;
        Ok(())
    }

    fn expect_ident(&mut self) -> Result<String> {
        match &self.tok {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            other => Err(self.sess.error(format!(
                "syntax error: expected identifier, found {}",
                other.describe()
            ))),
        }
    }

    fn count_stars(&mut self) -> Result<u32> {
        let mut stars = 0;
        while self.eat_punct(Punct::Star)? {
            stars += 1;
        }
        Ok(stars)
    }

    // Declarations.

    /// Type specifier: some combination of `unsigned` and a base
    /// keyword, or a named struct.
    fn parse_base_type(&mut self) -> Result<TypeInfo> {
        let mut flags = TypeFlags::default();
        let mut def = None;
        loop {
            match self.tok {
                Token::Kw(Keyword::Unsigned) => {
                    flags = flags.with_unsigned();
                    self.advance()?;
                }
                Token::Kw(Keyword::Int) if !flags.has_base() => {
                    flags = flags.with_base(BaseType::Int);
                    self.advance()?;
                }
                Token::Kw(Keyword::Char) if !flags.has_base() => {
                    flags = flags.with_base(BaseType::Char);
                    self.advance()?;
                }
                Token::Kw(Keyword::Void) if !flags.has_base() => {
                    flags = flags.with_base(BaseType::Void);
                    self.advance()?;
                }
                Token::Kw(Keyword::Struct) if !flags.has_base() => {
                    self.advance()?;
                    let name = self.expect_ident()?;
                    let found = self.structs.find(&name).ok_or_else(|| {
                        self.sess.error(format!("struct `{name}' undefined"))
                    })?;
                    flags = flags.with_base(BaseType::Struct);
                    def = Some(found);
                }
                _ => break,
            }
        }
        Ok(TypeInfo { flags, def })
    }

    fn top_level(&mut self, unit: &mut TranslationUnit) -> Result<()> {
        if self.check_kw(Keyword::Struct) {
            self.advance()?;
            let name = self.expect_ident()?;
            if self.check_punct(Punct::LBrace) {
                self.struct_definition(&name)?;
                self.expect_punct(Punct::Semi)?;
                return Ok(());
            }
            let def = self.structs.find(&name).ok_or_else(|| {
                self.sess.error(format!("struct `{name}' undefined"))
            })?;
            let base = TypeInfo {
                flags: TypeFlags::new(BaseType::Struct),
                def: Some(def),
            };
            return self.function_with_base(base, unit);
        }

        if !is_type_start(&self.tok) {
            return Err(self.sess.error(format!(
                "syntax error: expected declaration, found {}",
                self.tok.describe()
            )));
        }
        let base = self.parse_base_type()?;
        self.function_with_base(base, unit)
    }

    fn struct_definition(&mut self, name: &str) -> Result<()> {
        self.expect_punct(Punct::LBrace)?;
        let mut members = Vec::new();
        while !self.check_punct(Punct::RBrace) {
            if !is_type_start(&self.tok) {
                return Err(self.sess.error(format!(
                    "syntax error: expected member declaration, found {}",
                    self.tok.describe()
                )));
            }
            let base = self.parse_base_type()?;
            loop {
                let stars = self.count_stars()?;
                let member_name = self.expect_ident()?;
                let ty = self.declared_type(&base, stars, &member_name)?;
                members.push((member_name, ty));
                if !self.eat_punct(Punct::Comma)? {
                    break;
                }
            }
            self.expect_punct(Punct::Semi)?;
        }
        self.expect_punct(Punct::RBrace)?;
        self.structs.define(self.sess, name, members)?;
        Ok(())
    }

    /// Combine a base type with a declarator's indirection, defaulting
    /// the base to int and rejecting non-pointer void.
    fn declared_type(
        &self,
        base: &TypeInfo,
        stars: u32,
        name: &str,
    ) -> Result<TypeInfo> {
        let mut ty = TypeInfo {
            flags: base.flags.with_indirection(stars),
            def: base.def.clone(),
        };
        if !ty.flags.has_base() {
            ty.flags = ty.flags.with_base(BaseType::Int);
        }
        if ty.flags.base() == Some(BaseType::Void) && !ty.flags.is_ptr() {
            return Err(self.sess.error(format!(
                "variable `{name}' declared as type `void'"
            )));
        }
        Ok(ty)
    }

    fn function_with_base(
        &mut self,
        base: TypeInfo,
        unit: &mut TranslationUnit,
    ) -> Result<()> {
        let stars = self.count_stars()?;
        let name = self.expect_ident()?;
        if !self.check_punct(Punct::LParen) {
            return Err(self.sess.error(
                "only functions and struct definitions may appear at file scope",
            ));
        }
        let mut ret = TypeInfo {
            flags: base.flags.with_indirection(stars),
            def: base.def,
        };
        if !ret.flags.has_base() {
            ret.flags = ret.flags.with_base(BaseType::Int);
        }
        self.function(ret, &name, unit)
    }

    fn function(
        &mut self,
        ret: TypeInfo,
        name: &str,
        unit: &mut TranslationUnit,
    ) -> Result<()> {
        self.expect_punct(Punct::LParen)?;
        let params = self.parse_params()?;
        self.expect_punct(Punct::RParen)?;

        if let Some(existing) = self.symtab.lookup_current_scope(name) {
            if !existing.ty.borrow().flags.is_func() {
                return Err(self.sess.error(format!(
                    "`{name}' has already been declared in this scope"
                )));
            }
        }
        self.symtab.add_function(name, ret);

        if self.eat_punct(Punct::Semi)? {
            // Prototype only.
            return Ok(());
        }

        self.expect_punct(Punct::LBrace)?;
        self.symtab.push_scope();
        for param in &params {
            if self.symtab.lookup_current_scope(&param.name).is_some() {
                return Err(self.sess.error(format!(
                    "`{}' has already been declared in this scope",
                    param.name
                )));
            }
            self.symtab.add(&param.name, Some(param.ty.clone()));
        }
        let body = self.compound_tail()?;
        self.symtab.pop_scope();

        unit.translate_function(self.sess, name, &params, body.as_deref())
    }

    fn parse_params(&mut self) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        if self.check_punct(Punct::RParen) {
            return Ok(params);
        }

        loop {
            if !is_type_start(&self.tok) {
                return Err(self.sess.error(format!(
                    "syntax error: expected parameter declaration, found {}",
                    self.tok.describe()
                )));
            }
            let base = self.parse_base_type()?;
            // `(void)` declares an empty parameter list.
            if params.is_empty()
                && base.flags.base() == Some(BaseType::Void)
                && self.check_punct(Punct::RParen)
            {
                return Ok(params);
            }
            let stars = self.count_stars()?;
            let name = self.expect_ident()?;
            let ty = self.declared_type(&base, stars, &name)?;
            params.push(Param { name, ty });
            if !self.eat_punct(Punct::Comma)? {
                break;
            }
        }
        Ok(params)
    }

    // Statements.

    /// Parse the statements of a block up to and including the
    /// closing brace.
    fn compound_tail(&mut self) -> Result<Option<Box<GraphNode>>> {
        let mut graph = None;
        while !self.check_punct(Punct::RBrace) {
            if self.tok == Token::Eof {
                return Err(self.sess.error("unexpected end of file"));
            }
            if let Some(node) = self.statement()? {
                graph = Some(asg::append(graph, node, self.sess));
            }
        }
        self.expect_punct(Punct::RBrace)?;
        Ok(graph)
    }

    fn statement(&mut self) -> Result<Option<Box<GraphNode>>> {
        match &self.tok {
            Token::Punct(Punct::LBrace) => {
                self.advance()?;
                self.symtab.push_scope();
                let graph = self.compound_tail()?;
                self.symtab.pop_scope();
                Ok(graph)
            }
            Token::Punct(Punct::Semi) => {
                self.advance()?;
                Ok(None)
            }
            Token::Kw(Keyword::If) => self.if_statement().map(Some),
            Token::Kw(Keyword::For) => self.for_statement().map(Some),
            Token::Kw(Keyword::While) => self.while_statement().map(Some),
            Token::Kw(Keyword::Do) => self.do_statement().map(Some),
            Token::Kw(Keyword::Return) => self.return_statement().map(Some),
            tok if is_type_start(tok) => self.declaration().map(Some),
            _ => {
                let expr = self.expression()?;
                self.expect_punct(Punct::Semi)?;
                Ok(Some(GraphNode::statement(expr)))
            }
        }
    }

    fn declaration(&mut self) -> Result<Box<GraphNode>> {
        let base = self.parse_base_type()?;

        let mut root = self.declarator()?;
        while self.eat_punct(Punct::Comma)? {
            let next = self.declarator()?;
            root =
                ast::create_expr(ExprOp::Comma, root, Some(next), self.sess)?;
        }
        self.expect_punct(Punct::Semi)?;

        ast::set_declaration_type(&mut root, &base, self.sess)?;
        Ok(GraphNode::declaration(root))
    }

    /// One declarator: optional stars, then a fresh identifier. The
    /// indirection goes on the symbol now; the base type follows once
    /// the whole declaration has been read.
    fn declarator(&mut self) -> Result<Box<AstNode>> {
        let stars = self.count_stars()?;
        let name = self.expect_ident()?;
        let node = ast::create_leaf(
            LeafKind::NewId,
            &name,
            self.sess,
            &mut self.symtab,
        )?;
        if stars > 0 {
            if let Some(sym) = node.symbol() {
                let mut ty = sym.ty.borrow_mut();
                ty.flags = ty.flags.with_indirection(stars);
            }
        }
        Ok(node)
    }

    fn if_statement(&mut self) -> Result<Box<GraphNode>> {
        self.expect_kw(Keyword::If)?;
        self.expect_punct(Punct::LParen)?;
        let cond = self.expression()?;
        self.expect_punct(Punct::RParen)?;

        let succ = self.statement()?;
        let fail = if self.check_kw(Keyword::Else) {
            self.advance()?;
            self.statement()?
        } else {
            None
        };
        Ok(GraphNode::conditional(cond, succ, fail))
    }

    fn for_statement(&mut self) -> Result<Box<GraphNode>> {
        self.expect_kw(Keyword::For)?;
        self.expect_punct(Punct::LParen)?;
        let init = self.expression()?;
        self.expect_punct(Punct::Semi)?;
        let cond = self.expression()?;
        self.expect_punct(Punct::Semi)?;
        let post = self.expression()?;
        self.expect_punct(Punct::RParen)?;
        let body = self.statement()?;
        Ok(GraphNode::for_loop(init, cond, post, body))
    }

    fn while_statement(&mut self) -> Result<Box<GraphNode>> {
        self.expect_kw(Keyword::While)?;
        self.expect_punct(Punct::LParen)?;
        let cond = self.expression()?;
        self.expect_punct(Punct::RParen)?;
        let body = self.statement()?;
        Ok(GraphNode::while_loop(cond, body))
    }

    fn do_statement(&mut self) -> Result<Box<GraphNode>> {
        self.expect_kw(Keyword::Do)?;
        let body = self.statement()?;
        self.expect_kw(Keyword::While)?;
        self.expect_punct(Punct::LParen)?;
        let cond = self.expression()?;
        self.expect_punct(Punct::RParen)?;
        self.expect_punct(Punct::Semi)?;
        Ok(GraphNode::do_while_loop(cond, body))
    }

    fn return_statement(&mut self) -> Result<Box<GraphNode>> {
        self.expect_kw(Keyword::Return)?;
        if self.eat_punct(Punct::Semi)? {
            return Ok(GraphNode::ret(None));
        }
        let value = self.expression()?;
        self.expect_punct(Punct::Semi)?;
        Ok(GraphNode::ret(Some(value)))
    }

    // Expressions, in increasing precedence.

    fn expression(&mut self) -> Result<Box<AstNode>> {
        let mut expr = self.assignment()?;
        while self.eat_punct(Punct::Comma)? {
            let rhs = self.assignment()?;
            expr =
                ast::create_expr(ExprOp::Comma, expr, Some(rhs), self.sess)?;
        }
        Ok(expr)
    }

    fn assignment(&mut self) -> Result<Box<AstNode>> {
        let lhs = self.logical_or()?;
        if self.eat_punct(Punct::Assign)? {
            let rhs = self.assignment()?;
            return ast::create_expr(ExprOp::Assign, lhs, Some(rhs), self.sess);
        }
        Ok(lhs)
    }

    fn binary_level(
        &mut self,
        ops: &[(Punct, ExprOp)],
        next: fn(&mut Self) -> Result<Box<AstNode>>,
    ) -> Result<Box<AstNode>> {
        let mut expr = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.check_punct(*punct) {
                    self.advance()?;
                    let rhs = next(self)?;
                    expr =
                        ast::create_expr(*op, expr, Some(rhs), self.sess)?;
                    continue 'outer;
                }
            }
            break;
        }
        Ok(expr)
    }

    fn logical_or(&mut self) -> Result<Box<AstNode>> {
        self.binary_level(
            &[(Punct::OrOr, ExprOp::LogicalOr)],
            Self::logical_and,
        )
    }

    fn logical_and(&mut self) -> Result<Box<AstNode>> {
        self.binary_level(
            &[(Punct::AndAnd, ExprOp::LogicalAnd)],
            Self::bit_or,
        )
    }

    fn bit_or(&mut self) -> Result<Box<AstNode>> {
        self.binary_level(&[(Punct::Pipe, ExprOp::Or)], Self::bit_xor)
    }

    fn bit_xor(&mut self) -> Result<Box<AstNode>> {
        self.binary_level(&[(Punct::Caret, ExprOp::Xor)], Self::bit_and)
    }

    fn bit_and(&mut self) -> Result<Box<AstNode>> {
        self.binary_level(&[(Punct::Amp, ExprOp::And)], Self::equality)
    }

    fn equality(&mut self) -> Result<Box<AstNode>> {
        self.binary_level(
            &[(Punct::EqEq, ExprOp::Eq), (Punct::Ne, ExprOp::Ne)],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Box<AstNode>> {
        self.binary_level(
            &[
                (Punct::Lt, ExprOp::Lt),
                (Punct::Gt, ExprOp::Gt),
                (Punct::Le, ExprOp::Le),
                (Punct::Ge, ExprOp::Ge),
            ],
            Self::shift,
        )
    }

    fn shift(&mut self) -> Result<Box<AstNode>> {
        self.binary_level(
            &[(Punct::Shl, ExprOp::Lshift), (Punct::Shr, ExprOp::Rshift)],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Box<AstNode>> {
        self.binary_level(
            &[(Punct::Plus, ExprOp::Add), (Punct::Minus, ExprOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Box<AstNode>> {
        self.binary_level(
            &[
                (Punct::Star, ExprOp::Mult),
                (Punct::Slash, ExprOp::Div),
                (Punct::Percent, ExprOp::Mod),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Box<AstNode>> {
        let prefix = match &self.tok {
            Token::Punct(Punct::Plus) => Some(ExprOp::UnaryPlus),
            Token::Punct(Punct::Minus) => Some(ExprOp::UnaryMinus),
            Token::Punct(Punct::Bang) => Some(ExprOp::LogicalNot),
            Token::Punct(Punct::Tilde) => Some(ExprOp::Not),
            Token::Punct(Punct::Star) => Some(ExprOp::Dereference),
            Token::Punct(Punct::Amp) => Some(ExprOp::Address),
            _ => None,
        };
        if let Some(op) = prefix {
            self.advance()?;
            let operand = self.unary()?;
            return ast::create_expr(op, operand, None, self.sess);
        }

        if self.check_punct(Punct::LParen) {
            self.advance()?;
            if is_type_start(&self.tok) {
                // Cast expression.
                let base = self.parse_base_type()?;
                let stars = self.count_stars()?;
                self.expect_punct(Punct::RParen)?;
                let mut operand = self.unary()?;
                let ty = TypeInfo {
                    flags: base.flags.with_indirection(stars),
                    def: base.def,
                };
                ast::cast(&mut operand, ty, self.sess)?;
                return Ok(operand);
            }
            let expr = self.expression()?;
            self.expect_punct(Punct::RParen)?;
            return self.postfix_tail(expr);
        }

        let primary = self.primary()?;
        self.postfix_tail(primary)
    }

    fn postfix_tail(
        &mut self,
        mut expr: Box<AstNode>,
    ) -> Result<Box<AstNode>> {
        loop {
            if self.eat_punct(Punct::LParen)? {
                let args = if self.check_punct(Punct::RParen) {
                    None
                } else {
                    Some(self.argument_list()?)
                };
                self.expect_punct(Punct::RParen)?;
                expr =
                    ast::create_expr(ExprOp::Func, expr, args, self.sess)?;
            } else if self.check_punct(Punct::Dot)
                || self.check_punct(Punct::Arrow)
            {
                self.advance()?;
                let name = self.expect_ident()?;
                let member = ast::create_leaf(
                    LeafKind::Member,
                    &name,
                    self.sess,
                    &mut self.symtab,
                )?;
                expr = ast::create_expr(
                    ExprOp::Member,
                    expr,
                    Some(member),
                    self.sess,
                )?;
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn argument_list(&mut self) -> Result<Box<AstNode>> {
        let mut args = self.assignment()?;
        while self.eat_punct(Punct::Comma)? {
            let next = self.assignment()?;
            args =
                ast::create_expr(ExprOp::Comma, args, Some(next), self.sess)?;
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Box<AstNode>> {
        let (kind, lexeme) = match &self.tok {
            Token::Ident(name) => (LeafKind::Identifier, name.clone()),
            Token::Number(lexeme) => (LeafKind::Constant, lexeme.clone()),
            Token::CharConst(lexeme) => (LeafKind::Constant, lexeme.clone()),
            Token::StrLit(lexeme) => (LeafKind::StrLit, lexeme.clone()),
            Token::Punct(Punct::LParen) => {
                self.advance()?;
                let expr = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                return Ok(expr);
            }
            other => {
                return Err(self.sess.error(format!(
                    "syntax error: unexpected {}",
                    other.describe()
                )));
            }
        };
        self.advance()?;
        ast::create_leaf(kind, &lexeme, self.sess, &mut self.symtab)
    }
}
