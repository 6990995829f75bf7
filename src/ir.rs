use anyhow::{anyhow, Result};

use crate::ast::{AstNode, ExprOp};
use crate::types::TypeInfo;

pub const NUM_TEMP_REGS: usize = 31;

/// Instruction tag: an expression operator or one of the special
/// operations the expression grammar has no spelling for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrTag {
    Expr(ExprOp),
    /// Set processor flags from a single operand.
    Test,
    /// Push a call argument.
    Push,
    /// Load an address-carrying value into a temp.
    Load,
}

/// Operand of a three-address instruction. Terminals are read in
/// place from the AST; struct member accesses fold into base+offset
/// forms.
#[derive(Debug, Clone)]
pub enum IrOperand<'a> {
    Node(&'a AstNode),
    Temp(i16),
    NodeOff(&'a AstNode, usize),
    RegOff(i16, usize),
}

#[derive(Debug)]
pub struct IrInstruction<'a> {
    pub tag: IrTag,
    pub target: i16,
    pub ty: TypeInfo,
    pub lhs: Option<IrOperand<'a>>,
    pub rhs: Option<IrOperand<'a>>,
}

/// Free list over the fixed pool of virtual temp registers, linked
/// through `items` and headed by `next`.
struct TempPool {
    next: i16,
    items: [i16; NUM_TEMP_REGS],
}

impl TempPool {
    fn new() -> Self {
        let mut items = [0i16; NUM_TEMP_REGS];
        for (i, item) in items.iter_mut().enumerate() {
            *item = i as i16 + 1;
        }
        items[NUM_TEMP_REGS - 1] = -1;
        TempPool { next: 0, items }
    }

    fn acquire(&mut self) -> Result<i16> {
        let t = self.next;
        if t < 0 {
            return Err(anyhow!("expression requires too many temporaries"));
        }
        self.next = self.items[t as usize];
        Ok(t)
    }

    fn release(&mut self, t: i16) {
        self.items[t as usize] = self.next;
        self.next = t;
    }
}

#[derive(Debug, Default)]
pub struct IrSequence<'a> {
    pub seq: Vec<IrInstruction<'a>>,
}

impl<'a> IrSequence<'a> {
    pub fn new() -> Self {
        IrSequence::default()
    }

    /// Lower one expression statement into three-address form. With
    /// `cond` set the sequence is guaranteed to end in an instruction
    /// that leaves the processor flags set for a conditional jump.
    pub fn parse_expr(&mut self, expr: &'a AstNode, cond: bool) -> Result<()> {
        if matches!(expr, AstNode::StrLit { .. }) {
            return Ok(());
        }
        let mut pool = TempPool::new();

        if expr.is_op(ExprOp::Member) {
            let target = self.member_value(expr, &mut pool)?;
            if cond {
                self.push_test(IrOperand::Temp(target));
            }
            return Ok(());
        }

        if cond && !root_sets_flags(expr) {
            match expr {
                AstNode::Constant { .. } | AstNode::Identifier { .. } => {
                    self.push_test(IrOperand::Node(expr));
                }
                _ => {
                    self.read_ast(expr, &mut pool)?;
                    let operand = self.result().ok_or_else(|| {
                        anyhow!("expression cannot be used as a condition")
                    })?;
                    self.push_test(operand);
                }
            }
            return Ok(());
        }

        self.read_ast(expr, &mut pool)?;
        Ok(())
    }

    /// Where the value of the lowered expression can be read from
    /// afterwards. Assignments leave nothing on the temp stack, so
    /// their value is re-read from the destination (or, for a store
    /// through a pointer, from a terminal source).
    pub fn result(&self) -> Option<IrOperand<'a>> {
        let last = self.seq.last()?;
        if last.tag == IrTag::Expr(ExprOp::Assign) {
            return match &last.lhs {
                Some(op @ (IrOperand::Node(_) | IrOperand::NodeOff(..))) => {
                    Some(op.clone())
                }
                _ => match &last.rhs {
                    Some(op @ IrOperand::Node(_)) => Some(op.clone()),
                    _ => None,
                },
            };
        }
        if last.target >= 0 {
            Some(IrOperand::Temp(last.target))
        } else {
            None
        }
    }

    fn push_test(&mut self, operand: IrOperand<'a>) {
        self.seq.push(IrInstruction {
            tag: IrTag::Test,
            target: -1,
            ty: TypeInfo::int(),
            lhs: Some(operand),
            rhs: None,
        });
    }

    /// Recursively lower `expr`, returning the temp holding its value.
    /// Terminals produce no instruction and return -1; the consuming
    /// site packages them into operands instead.
    fn read_ast(
        &mut self,
        expr: &'a AstNode,
        pool: &mut TempPool,
    ) -> Result<i16> {
        let AstNode::Expr { op, ty, lhs, rhs } = expr else {
            return Ok(-1);
        };
        let (op, ty) = (*op, ty.clone());
        if op == ExprOp::Member {
            return Ok(-1);
        }

        if op == ExprOp::Func {
            self.parse_arguments(rhs.as_deref(), pool)?;
            let target = pool.acquire()?;
            self.seq.push(IrInstruction {
                tag: IrTag::Expr(op),
                target,
                ty,
                lhs: Some(IrOperand::Node(&**lhs)),
                rhs: rhs.as_deref().map(IrOperand::Node),
            });
            return Ok(target);
        }

        let Some(rhs) = rhs.as_deref() else {
            return self.read_unary(op, ty, lhs, pool);
        };

        if op == ExprOp::Comma {
            return self.read_comma(lhs, rhs, pool);
        }

        if lhs.is_op(ExprOp::Member) || rhs.is_op(ExprOp::Member) {
            return self.read_member_binary(op, ty, lhs, rhs, pool);
        }

        let assign_deref =
            op == ExprOp::Assign && lhs.is_op(ExprOp::Dereference);

        let (target, lhs_op, rhs_op) = match (lhs.is_terminal(), rhs.is_terminal())
        {
            (true, true) => {
                // Two terminal values need a new temporary.
                let target = pool.acquire()?;
                (target, IrOperand::Node(&**lhs), IrOperand::Node(rhs))
            }
            (true, false) => {
                let rt = self.read_ast(rhs, pool)?;
                (rt, IrOperand::Node(&**lhs), IrOperand::Temp(rt))
            }
            (false, true) => {
                let lt = if assign_deref {
                    self.parse_lvalue_deref(lhs, pool)?
                } else {
                    self.read_ast(lhs, pool)?
                };
                (lt, IrOperand::Temp(lt), IrOperand::Node(rhs))
            }
            (false, false) => {
                // Both operands are expressions; reuse the left temp.
                let lt = if assign_deref {
                    self.parse_lvalue_deref(lhs, pool)?
                } else {
                    self.read_ast(lhs, pool)?
                };
                let rt = self.read_ast(rhs, pool)?;
                pool.release(rt);
                (lt, IrOperand::Temp(lt), IrOperand::Temp(rt))
            }
        };

        self.seq.push(IrInstruction {
            tag: IrTag::Expr(op),
            target,
            ty,
            lhs: Some(lhs_op),
            rhs: Some(rhs_op),
        });
        Ok(target)
    }

    fn read_unary(
        &mut self,
        op: ExprOp,
        ty: TypeInfo,
        operand: &'a AstNode,
        pool: &mut TempPool,
    ) -> Result<i16> {
        let (target, lhs_op) = if operand.is_terminal() {
            (pool.acquire()?, IrOperand::Node(operand))
        } else if operand.is_op(ExprOp::Member) {
            let folded = self.member_operand(operand, pool)?;
            (pool.acquire()?, folded)
        } else {
            let t = self.read_ast(operand, pool)?;
            (t, IrOperand::Temp(t))
        };

        self.seq.push(IrInstruction {
            tag: IrTag::Expr(op),
            target,
            ty,
            lhs: Some(lhs_op),
            rhs: None,
        });
        Ok(target)
    }

    fn read_comma(
        &mut self,
        lhs: &'a AstNode,
        rhs: &'a AstNode,
        pool: &mut TempPool,
    ) -> Result<i16> {
        if !lhs.is_terminal() {
            let t = self.read_ast(lhs, pool)?;
            // The left result is discarded.
            if t >= 0 {
                pool.release(t);
            }
        }

        if rhs.is_op(ExprOp::Member) {
            return self.member_value(rhs, pool);
        }
        if rhs.is_terminal() {
            // Materialize the bare terminal into a temp.
            let target = pool.acquire()?;
            self.seq.push(IrInstruction {
                tag: IrTag::Expr(ExprOp::UnaryPlus),
                target,
                ty: rhs.ty().clone(),
                lhs: Some(IrOperand::Node(rhs)),
                rhs: None,
            });
            return Ok(target);
        }
        self.read_ast(rhs, pool)
    }

    /// Binary operation with a struct member on one or both sides:
    /// fold each member access into a base+offset operand.
    fn read_member_binary(
        &mut self,
        op: ExprOp,
        ty: TypeInfo,
        lhs: &'a AstNode,
        rhs: &'a AstNode,
        pool: &mut TempPool,
    ) -> Result<i16> {
        if lhs.is_op(ExprOp::Member) && rhs.is_op(ExprOp::Member) {
            let lhs_op = self.member_operand(lhs, pool)?;
            let rhs_op = self.member_operand(rhs, pool)?;
            let target = pool.acquire()?;
            self.seq.push(IrInstruction {
                tag: IrTag::Expr(op),
                target,
                ty,
                lhs: Some(lhs_op),
                rhs: Some(rhs_op),
            });
            return Ok(target);
        }

        let member_on_left = lhs.is_op(ExprOp::Member);
        let (member_expr, other) =
            if member_on_left { (lhs, rhs) } else { (rhs, lhs) };
        let member_op = self.member_operand(member_expr, pool)?;

        let (target, other_op) = if other.is_terminal() {
            (pool.acquire()?, IrOperand::Node(other))
        } else {
            let t = self.read_ast(other, pool)?;
            (t, IrOperand::Temp(t))
        };

        let (lhs_op, rhs_op) = if member_on_left {
            (member_op, other_op)
        } else {
            (other_op, member_op)
        };
        self.seq.push(IrInstruction {
            tag: IrTag::Expr(op),
            target,
            ty,
            lhs: Some(lhs_op),
            rhs: Some(rhs_op),
        });
        Ok(target)
    }

    /// Materialize a bare member access into a temp of its own.
    fn member_value(
        &mut self,
        expr: &'a AstNode,
        pool: &mut TempPool,
    ) -> Result<i16> {
        let operand = self.member_operand(expr, pool)?;
        let target = pool.acquire()?;
        self.seq.push(IrInstruction {
            tag: IrTag::Expr(ExprOp::UnaryPlus),
            target,
            ty: expr.ty().clone(),
            lhs: Some(operand),
            rhs: None,
        });
        Ok(target)
    }

    fn member_operand(
        &mut self,
        expr: &'a AstNode,
        pool: &mut TempPool,
    ) -> Result<IrOperand<'a>> {
        let AstNode::Expr {
            op: ExprOp::Member,
            lhs: base,
            rhs: Some(member),
            ..
        } = expr
        else {
            return Err(anyhow!("malformed member access in IR builder"));
        };
        let AstNode::Member { lexeme, .. } = member.as_ref() else {
            return Err(anyhow!("malformed member access in IR builder"));
        };

        let offset = base
            .ty()
            .def
            .as_ref()
            .and_then(|def| def.member(lexeme))
            .map(|m| m.offset)
            .ok_or_else(|| anyhow!("unknown member `{lexeme}' in IR builder"))?;

        if base.is_terminal() {
            return Ok(IrOperand::NodeOff(&**base, offset));
        }
        let reg = if base.is_op(ExprOp::Dereference) {
            self.parse_lvalue_deref(base, pool)?
        } else {
            self.read_ast(base, pool)?
        };
        Ok(IrOperand::RegOff(reg, offset))
    }

    /// Pre-lower a dereference chain used as an assignment target: load
    /// the deepest base into a temp, then apply all but the last
    /// dereference, so the destination is addressed through a
    /// register-held pointer.
    fn parse_lvalue_deref(
        &mut self,
        expr: &'a AstNode,
        pool: &mut TempPool,
    ) -> Result<i16> {
        let mut depth = 0usize;
        let mut base = expr;
        while let AstNode::Expr {
            op: ExprOp::Dereference,
            lhs,
            ..
        } = base
        {
            depth += 1;
            base = &**lhs;
        }

        let target = if base.is_terminal() {
            let target = pool.acquire()?;
            self.seq.push(IrInstruction {
                tag: IrTag::Load,
                target,
                ty: base.ty().clone(),
                lhs: Some(IrOperand::Node(base)),
                rhs: None,
            });
            target
        } else {
            self.read_ast(base, pool)?
        };

        for _ in 1..depth {
            self.seq.push(IrInstruction {
                tag: IrTag::Expr(ExprOp::Dereference),
                target,
                ty: TypeInfo::int(),
                lhs: Some(IrOperand::Temp(target)),
                rhs: None,
            });
        }
        Ok(target)
    }

    fn parse_arguments(
        &mut self,
        arglist: Option<&'a AstNode>,
        pool: &mut TempPool,
    ) -> Result<()> {
        let Some(arg) = arglist else {
            return Ok(());
        };

        if let AstNode::Expr {
            op: ExprOp::Comma,
            lhs,
            rhs,
            ..
        } = arg
        {
            // Arguments are pushed in reverse source order.
            self.parse_arguments(rhs.as_deref(), pool)?;
            self.parse_arguments(Some(&**lhs), pool)?;
            return Ok(());
        }

        let operand = if arg.is_terminal() {
            IrOperand::Node(arg)
        } else if arg.is_op(ExprOp::Member) {
            self.member_operand(arg, pool)?
        } else {
            let t = self.read_ast(arg, pool)?;
            pool.release(t);
            IrOperand::Temp(t)
        };
        self.seq.push(IrInstruction {
            tag: IrTag::Push,
            target: -1,
            ty: arg.ty().clone(),
            lhs: Some(operand),
            rhs: None,
        });
        Ok(())
    }
}

fn root_sets_flags(expr: &AstNode) -> bool {
    matches!(expr, AstNode::Expr { op, .. } if op.is_condition())
}

/// Count the arguments in a call's comma-joined argument tree.
pub fn count_arguments(arglist: Option<&AstNode>) -> usize {
    match arglist {
        None => 0,
        Some(AstNode::Expr {
            op: ExprOp::Comma,
            lhs,
            rhs,
            ..
        }) => {
            count_arguments(Some(&**lhs))
                + rhs.as_deref().map(|r| count_arguments(Some(r))).unwrap_or(0)
        }
        Some(_) => 1,
    }
}
