use anyhow::Result;

use crate::errors::Session;
use crate::symtab::{SymbolRef, SymbolTable};
use crate::types::{integer_convert, BaseType, TypeFlags, TypeInfo};

/// Expression operators, in source precedence groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprOp {
    Comma,
    Assign,
    LogicalOr,
    LogicalAnd,
    Or,
    Xor,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Lshift,
    Rshift,
    Add,
    Sub,
    Mult,
    Div,
    Mod,
    Address,
    Dereference,
    UnaryPlus,
    UnaryMinus,
    Not,
    LogicalNot,
    Func,
    Member,
}

impl ExprOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ExprOp::Comma => ",",
            ExprOp::Assign => "=",
            ExprOp::LogicalOr => "||",
            ExprOp::LogicalAnd => "&&",
            ExprOp::Or => "|",
            ExprOp::Xor => "^",
            ExprOp::And | ExprOp::Address => "&",
            ExprOp::Eq => "==",
            ExprOp::Ne => "!=",
            ExprOp::Lt => "<",
            ExprOp::Gt => ">",
            ExprOp::Le => "<=",
            ExprOp::Ge => ">=",
            ExprOp::Lshift => "<<",
            ExprOp::Rshift => ">>",
            ExprOp::Add | ExprOp::UnaryPlus => "+",
            ExprOp::Sub | ExprOp::UnaryMinus => "-",
            ExprOp::Mult | ExprOp::Dereference => "*",
            ExprOp::Div => "/",
            ExprOp::Mod => "%",
            ExprOp::Not => "~",
            ExprOp::LogicalNot => "!",
            ExprOp::Func => "()",
            ExprOp::Member => ".",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            ExprOp::Eq
                | ExprOp::Ne
                | ExprOp::Lt
                | ExprOp::Gt
                | ExprOp::Le
                | ExprOp::Ge
        )
    }

    /// Operators whose lowered form leaves the processor flags set for
    /// a subsequent conditional jump.
    pub fn is_condition(self) -> bool {
        self.is_comparison() || self == ExprOp::LogicalNot
    }

    pub fn is_unary(self) -> bool {
        matches!(
            self,
            ExprOp::Address
                | ExprOp::Dereference
                | ExprOp::UnaryPlus
                | ExprOp::UnaryMinus
                | ExprOp::Not
                | ExprOp::LogicalNot
        )
    }
}

/// Kind of leaf requested from [`create_leaf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    Identifier,
    NewId,
    Constant,
    StrLit,
    Member,
}

/// A node in the expression tree. Every node caches its computed type.
#[derive(Debug)]
pub enum AstNode {
    Constant {
        value: i64,
        ty: TypeInfo,
    },
    Identifier {
        sym: SymbolRef,
        ty: TypeInfo,
    },
    StrLit {
        lexeme: String,
        ty: TypeInfo,
    },
    /// Member name on the right side of a `.` access; typed once the
    /// access expression is checked.
    Member {
        lexeme: String,
        ty: TypeInfo,
    },
    Expr {
        op: ExprOp,
        ty: TypeInfo,
        lhs: Box<AstNode>,
        rhs: Option<Box<AstNode>>,
    },
}

impl AstNode {
    pub fn ty(&self) -> &TypeInfo {
        match self {
            AstNode::Constant { ty, .. }
            | AstNode::Identifier { ty, .. }
            | AstNode::StrLit { ty, .. }
            | AstNode::Member { ty, .. }
            | AstNode::Expr { ty, .. } => ty,
        }
    }

    pub fn ty_mut(&mut self) -> &mut TypeInfo {
        match self {
            AstNode::Constant { ty, .. }
            | AstNode::Identifier { ty, .. }
            | AstNode::StrLit { ty, .. }
            | AstNode::Member { ty, .. }
            | AstNode::Expr { ty, .. } => ty,
        }
    }

    /// Constants, identifiers and string literals are read in place by
    /// the IR builder instead of producing instructions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AstNode::Constant { .. }
                | AstNode::Identifier { .. }
                | AstNode::StrLit { .. }
        )
    }

    pub fn is_op(&self, op: ExprOp) -> bool {
        matches!(self, AstNode::Expr { op: o, .. } if *o == op)
    }

    pub fn symbol(&self) -> Option<&SymbolRef> {
        match self {
            AstNode::Identifier { sym, .. } => Some(sym),
            _ => None,
        }
    }

    fn is_lvalue(&self) -> bool {
        match self {
            AstNode::Identifier { ty, .. } => !ty.flags.is_func(),
            AstNode::Expr { op, .. } => {
                matches!(op, ExprOp::Dereference | ExprOp::Member)
            }
            _ => false,
        }
    }
}

/// Render a node's type for a diagnostic. String literals show their
/// storage size, everything else the plain type spelling.
fn render_type(node: &AstNode) -> String {
    match node {
        AstNode::StrLit { lexeme, .. } => {
            format!("const char[{}]", lexeme.len() + 1)
        }
        _ => node.ty().to_string(),
    }
}

fn err_incompatible(
    sess: &Session,
    op: ExprOp,
    lhs: &AstNode,
    rhs: Option<&AstNode>,
) -> anyhow::Error {
    match rhs {
        Some(rhs) => sess.error(format!(
            "incompatible types for binary {} operator: `{}' and `{}'",
            op.symbol(),
            render_type(lhs),
            render_type(rhs)
        )),
        None => sess.error(format!(
            "incompatible type for unary {} operator: `{}'",
            op.symbol(),
            render_type(lhs)
        )),
    }
}

/// Build a leaf node, performing the associated symbol table action.
pub fn create_leaf(
    kind: LeafKind,
    lexeme: &str,
    sess: &Session,
    symtab: &mut SymbolTable,
) -> Result<Box<AstNode>> {
    let node = match kind {
        LeafKind::Identifier => {
            let sym = symtab.lookup(lexeme).ok_or_else(|| {
                sess.error(format!("undeclared identifier `{lexeme}'"))
            })?;
            let ty = sym.ty.borrow().clone();
            AstNode::Identifier { sym, ty }
        }
        LeafKind::NewId => {
            if symtab.lookup_current_scope(lexeme).is_some() {
                return Err(sess.error(format!(
                    "`{lexeme}' has already been declared in this scope"
                )));
            }
            let sym = symtab.add(lexeme, None);
            let ty = sym.ty.borrow().clone();
            AstNode::Identifier { sym, ty }
        }
        LeafKind::Constant => {
            let (value, unsigned) = constant_value(sess, lexeme)?;
            let mut flags = TypeFlags::new(BaseType::Int);
            if unsigned {
                flags = flags.with_unsigned();
            }
            AstNode::Constant {
                value,
                ty: TypeInfo::with_flags(flags),
            }
        }
        LeafKind::StrLit => AstNode::StrLit {
            lexeme: lexeme.to_owned(),
            ty: TypeInfo::new(BaseType::StrLit),
        },
        LeafKind::Member => AstNode::Member {
            lexeme: lexeme.to_owned(),
            ty: TypeInfo::default(),
        },
    };
    Ok(Box::new(node))
}

/// Parse an integer or character constant lexeme. A literal is
/// unsigned iff it carries a `u`/`U` suffix or is written in a
/// non-decimal base; a bare `0` stays signed.
fn constant_value(sess: &Session, lexeme: &str) -> Result<(i64, bool)> {
    if lexeme.starts_with('\'') {
        return Ok((char_const_value(lexeme), false));
    }

    let mut digits = lexeme;
    let mut unsigned = false;
    if let Some(stripped) =
        digits.strip_suffix('u').or_else(|| digits.strip_suffix('U'))
    {
        digits = stripped;
        unsigned = true;
    }

    let radix = if digits.starts_with("0x") || digits.starts_with("0X") {
        digits = &digits[2..];
        16
    } else if digits.len() > 1 && digits.starts_with('0') {
        digits = &digits[1..];
        8
    } else {
        10
    };
    unsigned |= radix != 10;

    let value = i64::from_str_radix(digits, radix).map_err(|_| {
        sess.error(format!("invalid integer constant `{lexeme}'"))
    })?;
    Ok((value, unsigned))
}

fn char_const_value(lexeme: &str) -> i64 {
    let bytes = lexeme.as_bytes();
    if bytes.len() < 3 {
        return 0;
    }
    if bytes[1] == b'\\' {
        match bytes[2] {
            b'n' => b'\n' as i64,
            b't' => b'\t' as i64,
            b'\'' => b'\'' as i64,
            b'"' => b'"' as i64,
            b'\\' => b'\\' as i64,
            b'0' => 0,
            _ => 0,
        }
    } else {
        bytes[1] as i64
    }
}

/// Build an expression node from `op` applied to `lhs` (and `rhs` for
/// binary operators), validating operand types and computing the
/// result type. Constant operands are folded at construction time.
pub fn create_expr(
    op: ExprOp,
    mut lhs: Box<AstNode>,
    mut rhs: Option<Box<AstNode>>,
    sess: &Session,
) -> Result<Box<AstNode>> {
    if op == ExprOp::UnaryPlus {
        let flags = lhs.ty().flags;
        if !flags.is_integer() || flags.is_ptr() {
            return Err(err_incompatible(sess, op, &lhs, None));
        }
        return Ok(lhs);
    }

    if let Some(folded) = fold_constants(op, &lhs, rhs.as_deref()) {
        if let AstNode::Constant { value, .. } = lhs.as_mut() {
            *value = folded;
        }
        return Ok(lhs);
    }

    let ty = check_expr(op, &mut lhs, &mut rhs, sess)?;
    Ok(Box::new(AstNode::Expr { op, ty, lhs, rhs }))
}

/// Evaluate `op` over constant operands using the host's wide integer
/// semantics. Returns `None` when the operands are not constants or
/// the operator cannot be folded.
fn fold_constants(
    op: ExprOp,
    lhs: &AstNode,
    rhs: Option<&AstNode>,
) -> Option<i64> {
    let AstNode::Constant { value: l, .. } = lhs else {
        return None;
    };
    let l = *l;
    let r = match rhs {
        Some(AstNode::Constant { value, .. }) => Some(*value),
        Some(_) => return None,
        None => None,
    };

    Some(match (op, r) {
        (ExprOp::LogicalOr, Some(r)) => (l != 0 || r != 0) as i64,
        (ExprOp::LogicalAnd, Some(r)) => (l != 0 && r != 0) as i64,
        (ExprOp::Or, Some(r)) => l | r,
        (ExprOp::Xor, Some(r)) => l ^ r,
        (ExprOp::And, Some(r)) => l & r,
        (ExprOp::Eq, Some(r)) => (l == r) as i64,
        (ExprOp::Ne, Some(r)) => (l != r) as i64,
        (ExprOp::Lt, Some(r)) => (l < r) as i64,
        (ExprOp::Gt, Some(r)) => (l > r) as i64,
        (ExprOp::Le, Some(r)) => (l <= r) as i64,
        (ExprOp::Ge, Some(r)) => (l >= r) as i64,
        (ExprOp::Lshift, Some(r)) => l.wrapping_shl(r as u32),
        (ExprOp::Rshift, Some(r)) => l.wrapping_shr(r as u32),
        (ExprOp::Add, Some(r)) => l.wrapping_add(r),
        (ExprOp::Sub, Some(r)) => l.wrapping_sub(r),
        (ExprOp::Mult, Some(r)) => l.wrapping_mul(r),
        (ExprOp::Div, Some(r)) if r != 0 => l.wrapping_div(r),
        (ExprOp::Mod, Some(r)) if r != 0 => l.wrapping_rem(r),
        (ExprOp::UnaryMinus, None) => l.wrapping_neg(),
        (ExprOp::Not, None) => !l,
        (ExprOp::LogicalNot, None) => (l == 0) as i64,
        _ => return None,
    })
}

fn check_expr(
    op: ExprOp,
    lhs: &mut Box<AstNode>,
    rhs: &mut Option<Box<AstNode>>,
    sess: &Session,
) -> Result<TypeInfo> {
    match op {
        ExprOp::Comma => {
            let rhs = rhs.as_ref().ok_or_else(|| {
                sess.error("missing operand for `,' operator")
            })?;
            Ok(rhs.ty().clone())
        }
        ExprOp::Assign => {
            let rhs = &**required(rhs, op, sess)?;
            check_assign(lhs, rhs, sess)
        }
        ExprOp::LogicalOr | ExprOp::LogicalAnd => {
            check_boolean(op, lhs, rhs.as_deref(), sess)
        }
        ExprOp::LogicalNot => check_boolean(op, lhs, None, sess),
        ExprOp::Or
        | ExprOp::Xor
        | ExprOp::And
        | ExprOp::Lshift
        | ExprOp::Rshift => {
            let rhs = &**required(rhs, op, sess)?;
            check_bitop(op, lhs, Some(rhs), sess)
        }
        ExprOp::Not => check_bitop(op, lhs, None, sess),
        ExprOp::Eq
        | ExprOp::Ne
        | ExprOp::Lt
        | ExprOp::Gt
        | ExprOp::Le
        | ExprOp::Ge => {
            let rhs = &**required(rhs, op, sess)?;
            check_equality(op, lhs, rhs, sess)
        }
        ExprOp::Add | ExprOp::Sub => check_additive(op, lhs, rhs, sess),
        ExprOp::Mult | ExprOp::Div | ExprOp::Mod => {
            let rhs = &**required(rhs, op, sess)?;
            check_multiplicative(op, lhs, rhs, sess)
        }
        ExprOp::Address => check_address(lhs, sess),
        ExprOp::Dereference => check_dereference(op, lhs, sess),
        ExprOp::UnaryMinus => check_unary(op, lhs, sess),
        ExprOp::Func => check_func(lhs, sess),
        ExprOp::Member => {
            let lhs = &**lhs;
            check_member(lhs, required(rhs, op, sess)?, sess)
        }
        ExprOp::UnaryPlus => unreachable!("unary plus is folded away"),
    }
}

fn required<'a>(
    rhs: &'a mut Option<Box<AstNode>>,
    op: ExprOp,
    sess: &Session,
) -> Result<&'a mut Box<AstNode>> {
    rhs.as_mut().ok_or_else(|| {
        sess.error(format!("missing operand for `{}' operator", op.symbol()))
    })
}

fn check_assign(
    lhs: &AstNode,
    rhs: &AstNode,
    sess: &Session,
) -> Result<TypeInfo> {
    if !lhs.is_lvalue() {
        return Err(sess.error("cannot assign to non-lvalue expression"));
    }

    let lf = lhs.ty().flags;
    let rf = rhs.ty().flags;

    if lf.is_ptr() {
        if rf.is_ptr() {
            // Different non-`void *` pointer types may be assigned to
            // each other with a warning.
            if lf != rf && !lhs.ty().is_void_ptr() && !rhs.ty().is_void_ptr() {
                sess.warn(format!(
                    "assignment from incompatible pointer type: `{}' => `{}'",
                    render_type(rhs),
                    render_type(lhs)
                ));
            }
            return Ok(lhs.ty().clone());
        }
        if rf.is_integer() {
            sess.warn("assigning integer to pointer without cast");
            return Ok(lhs.ty().clone());
        }
        if lf.base() == Some(BaseType::Char)
            && lf.indirection() == 1
            && rf.base() == Some(BaseType::StrLit)
        {
            return Ok(lhs.ty().clone());
        }
        return Err(err_incompatible(sess, ExprOp::Assign, lhs, Some(rhs)));
    }

    if rf.is_ptr() {
        if !lf.is_integer() {
            return Err(err_incompatible(sess, ExprOp::Assign, lhs, Some(rhs)));
        }
        sess.warn("assigning pointer to integer without cast");
        return Ok(lhs.ty().clone());
    }

    if lf.is_integer() && rf.is_integer() {
        return Ok(lhs.ty().clone());
    }

    Err(err_incompatible(sess, ExprOp::Assign, lhs, Some(rhs)))
}

fn check_boolean(
    op: ExprOp,
    lhs: &AstNode,
    rhs: Option<&AstNode>,
    sess: &Session,
) -> Result<TypeInfo> {
    let lf = lhs.ty().flags;
    if !lf.is_integer() && !lf.is_ptr() {
        return Err(err_incompatible(sess, op, lhs, rhs));
    }
    if let Some(rhs_node) = rhs {
        let rf = rhs_node.ty().flags;
        if !rf.is_integer() && !rf.is_ptr() {
            return Err(err_incompatible(sess, op, lhs, Some(rhs_node)));
        }
    }
    Ok(TypeInfo::int())
}

fn check_bitop(
    op: ExprOp,
    lhs: &AstNode,
    rhs: Option<&AstNode>,
    sess: &Session,
) -> Result<TypeInfo> {
    let lf = lhs.ty().flags;
    let Some(rhs) = rhs else {
        // Unary `~`.
        if lf.is_ptr() || !lf.is_integer() {
            return Err(err_incompatible(sess, op, lhs, None));
        }
        return Ok(lhs.ty().clone());
    };

    let rf = rhs.ty().flags;
    if lf.is_ptr() || rf.is_ptr() || !lf.is_integer() || !rf.is_integer() {
        return Err(err_incompatible(sess, op, lhs, Some(rhs)));
    }
    Ok(TypeInfo::with_flags(integer_convert(lf, rf)))
}

fn check_equality(
    op: ExprOp,
    lhs: &AstNode,
    rhs: &AstNode,
    sess: &Session,
) -> Result<TypeInfo> {
    let lf = lhs.ty().flags;
    let rf = rhs.ty().flags;

    if lf.is_ptr() && rf.is_ptr() {
        if lf != rf {
            sess.warn(format!(
                "comparison between incompatible pointer types: `{}' and `{}'",
                render_type(lhs),
                render_type(rhs)
            ));
        }
        return Ok(TypeInfo::int());
    }
    if lf.is_ptr() || rf.is_ptr() {
        let other = if lf.is_ptr() { rf } else { lf };
        if !other.is_integer() {
            return Err(err_incompatible(sess, op, lhs, Some(rhs)));
        }
        sess.warn("comparison between integer and pointer without cast");
        return Ok(TypeInfo::int());
    }
    if lf.is_integer() && rf.is_integer() {
        return Ok(TypeInfo::int());
    }
    Err(err_incompatible(sess, op, lhs, Some(rhs)))
}

fn check_additive(
    op: ExprOp,
    lhs: &mut Box<AstNode>,
    rhs: &mut Option<Box<AstNode>>,
    sess: &Session,
) -> Result<TypeInfo> {
    {
        let rhs = required(rhs, op, sess)?;
        let lf = lhs.ty().flags;
        let rf = rhs.ty().flags;

        if lf.is_ptr() && rf.is_ptr() {
            // Two pointers of the same type can be subtracted; the
            // result is int.
            if op == ExprOp::Sub && lf == rf {
                return Ok(TypeInfo::int());
            }
            return Err(err_incompatible(sess, op, lhs, Some(&**rhs)));
        }
        if lf.is_ptr() {
            if !rf.is_integer() || lf.base() == Some(BaseType::Void) {
                return Err(err_incompatible(sess, op, lhs, Some(&**rhs)));
            }
            let ty = lhs.ty().clone();
            pointer_additive_scale(&ty, rhs, sess)?;
            return Ok(ty);
        }
        if rf.is_ptr() {
            // A pointer can be added to an integer, but not subtracted
            // from one.
            if op != ExprOp::Add
                || !lf.is_integer()
                || rf.base() == Some(BaseType::Void)
            {
                return Err(err_incompatible(sess, op, lhs, Some(&**rhs)));
            }
            let ty = rhs.ty().clone();
            pointer_additive_scale(&ty, lhs, sess)?;
            return Ok(ty);
        }
        if lf.is_integer() && rf.is_integer() {
            return Ok(TypeInfo::with_flags(integer_convert(lf, rf)));
        }
        Err(err_incompatible(sess, op, lhs, Some(&**rhs)))
    }
}

/// Scale the integer operand of a pointer-additive expression by the
/// size of the pointed-to type. A constant is folded in place; any
/// other operand is wrapped in a synthesized multiplication.
fn pointer_additive_scale(
    ptr_ty: &TypeInfo,
    operand: &mut Box<AstNode>,
    sess: &Session,
) -> Result<()> {
    let size = ptr_ty.pointee_size();
    if size <= 1 {
        return Ok(());
    }

    if let AstNode::Constant { value, .. } = operand.as_mut() {
        *value *= size as i64;
        return Ok(());
    }

    let scale = Box::new(AstNode::Constant {
        value: size as i64,
        ty: TypeInfo::with_flags(
            TypeFlags::new(BaseType::Int).with_unsigned(),
        ),
    });
    let old = std::mem::replace(
        operand,
        Box::new(AstNode::Constant {
            value: 0,
            ty: TypeInfo::int(),
        }),
    );
    *operand = create_expr(ExprOp::Mult, old, Some(scale), sess)?;
    Ok(())
}

fn check_multiplicative(
    op: ExprOp,
    lhs: &AstNode,
    rhs: &AstNode,
    sess: &Session,
) -> Result<TypeInfo> {
    let lf = lhs.ty().flags;
    let rf = rhs.ty().flags;
    if lf.is_ptr() || rf.is_ptr() || !lf.is_integer() || !rf.is_integer() {
        return Err(err_incompatible(sess, op, lhs, Some(rhs)));
    }
    Ok(TypeInfo::with_flags(integer_convert(lf, rf)))
}

fn check_address(lhs: &AstNode, sess: &Session) -> Result<TypeInfo> {
    if !lhs.is_lvalue() {
        return Err(
            sess.error("cannot take address of non-lvalue expression")
        );
    }
    let ty = lhs.ty();
    Ok(TypeInfo {
        flags: ty.flags.reference(),
        def: ty.def.clone(),
    })
}

fn check_dereference(
    op: ExprOp,
    lhs: &AstNode,
    sess: &Session,
) -> Result<TypeInfo> {
    let ty = lhs.ty();
    // `void *` at a single level of indirection cannot be dereferenced.
    if !ty.flags.is_ptr() || ty.is_void_ptr() {
        return Err(err_incompatible(sess, op, lhs, None));
    }
    Ok(TypeInfo {
        flags: ty.flags.dereference(),
        def: ty.def.clone(),
    })
}

fn check_unary(op: ExprOp, lhs: &AstNode, sess: &Session) -> Result<TypeInfo> {
    let lf = lhs.ty().flags;
    if !lf.is_integer() || lf.is_ptr() {
        return Err(err_incompatible(sess, op, lhs, None));
    }
    Ok(lhs.ty().clone())
}

fn check_func(lhs: &AstNode, sess: &Session) -> Result<TypeInfo> {
    let AstNode::Identifier { sym, ty } = lhs else {
        return Err(sess.error("called object is not a function"));
    };
    if !ty.flags.is_func() {
        return Err(
            sess.error(format!("called object `{}' is not a function", sym.id))
        );
    }
    Ok(TypeInfo {
        flags: ty.flags.without_func(),
        def: ty.def.clone(),
    })
}

fn check_member(
    lhs: &AstNode,
    rhs: &mut Box<AstNode>,
    sess: &Session,
) -> Result<TypeInfo> {
    let AstNode::Member { lexeme, ty: member_ty } = rhs.as_mut() else {
        return Err(sess.error("malformed member access expression"));
    };

    let lt = lhs.ty();
    if lt.flags.base() != Some(BaseType::Struct)
        || (lt.flags.is_ptr() && lt.flags.indirection() != 1)
    {
        return Err(sess.error(format!(
            "request for member `{lexeme}' in non-struct expression"
        )));
    }
    if lt.flags.is_ptr() {
        return Err(sess.error(format!(
            "struct pointer member access requires `->' for member `{lexeme}'"
        )));
    }

    let def = lt.def.as_ref().ok_or_else(|| {
        sess.error(format!(
            "request for member `{lexeme}' in non-struct expression"
        ))
    })?;
    let member = def.member(lexeme).ok_or_else(|| {
        sess.error(format!(
            "struct `{}' has no member `{lexeme}'",
            def.name
        ))
    })?;

    *member_ty = member.ty.clone();
    Ok(member.ty.clone())
}

/// Set the declared type on every identifier in a declaration subtree,
/// preserving the indirection level each declarator put on its symbol.
pub fn set_declaration_type(
    root: &mut AstNode,
    ty: &TypeInfo,
    sess: &Session,
) -> Result<()> {
    // Variables can be declared without an explicit base type,
    // e.g. `unsigned i`; the base is assumed to be int.
    let mut ty = ty.clone();
    if !ty.flags.has_base() {
        ty.flags = ty.flags.with_base(BaseType::Int);
    }
    apply_declaration_type(root, &ty, sess)
}

fn apply_declaration_type(
    node: &mut AstNode,
    ty: &TypeInfo,
    sess: &Session,
) -> Result<()> {
    match node {
        AstNode::Identifier { sym, ty: node_ty } => {
            let indirection = sym.ty.borrow().flags.indirection();
            if ty.flags.base() == Some(BaseType::Void) && indirection == 0 {
                return Err(sess.error(format!(
                    "variable `{}' declared as type `void'",
                    sym.id
                )));
            }
            let merged = TypeInfo {
                flags: ty.flags.with_indirection(indirection),
                def: ty.def.clone(),
            };
            *sym.ty.borrow_mut() = merged.clone();
            *node_ty = merged;
            Ok(())
        }
        AstNode::Expr { op: ExprOp::Comma, ty: node_ty, lhs, rhs } => {
            *node_ty = ty.clone();
            apply_declaration_type(lhs, ty, sess)?;
            if let Some(rhs) = rhs {
                apply_declaration_type(rhs, ty, sess)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Cast `expr` to `target`. Only integer/pointer conversions and casts
/// to void are permitted.
pub fn cast(
    expr: &mut AstNode,
    target: TypeInfo,
    sess: &Session,
) -> Result<()> {
    let mut target = target;
    if !target.flags.has_base() {
        target.flags = target.flags.with_base(BaseType::Int);
    }

    let ef = expr.ty().flags;
    let allowed = if target.flags.is_ptr() {
        ef.is_ptr() || ef.is_integer()
    } else if target.flags.is_integer() {
        ef.is_ptr() || ef.is_integer()
    } else {
        target.flags.base() == Some(BaseType::Void)
    };

    if !allowed {
        return Err(sess.error(format!(
            "invalid cast from `{}' to `{}'",
            render_type(expr),
            target
        )));
    }
    *expr.ty_mut() = target;
    Ok(())
}
