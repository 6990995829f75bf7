use std::rc::Rc;

use anyhow::{anyhow, Result};

use crate::asg::{GraphKind, GraphNode};
use crate::ast::{AstNode, ExprOp};
use crate::gen::{LabelCounter, StringTable};
use crate::ir::{
    count_arguments, IrInstruction, IrOperand, IrSequence, IrTag,
    NUM_TEMP_REGS,
};
use crate::local::{LocalFlags, LocalVars};
use crate::symtab::SymbolRef;

/// General-purpose registers, including the 8-bit subregisters the
/// emitter reaches for in byte-sized operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gpr {
    Al,
    Ah,
    Cl,
    Ch,
    Dl,
    Ax,
    Bx,
    Cx,
    Dx,
    Si,
    Di,
    Sp,
    Bp,
}

const NUM_GPRS: usize = 8;

impl Gpr {
    pub fn name(self) -> &'static str {
        match self {
            Gpr::Al => "al",
            Gpr::Ah => "ah",
            Gpr::Cl => "cl",
            Gpr::Ch => "ch",
            Gpr::Dl => "dl",
            Gpr::Ax => "eax",
            Gpr::Bx => "ebx",
            Gpr::Cx => "ecx",
            Gpr::Dx => "edx",
            Gpr::Si => "esi",
            Gpr::Di => "edi",
            Gpr::Sp => "esp",
            Gpr::Bp => "ebp",
        }
    }

    /// Byte-sized subregister, for registers that have one.
    fn low8(self) -> Gpr {
        match self {
            Gpr::Ax => Gpr::Al,
            Gpr::Cx => Gpr::Cl,
            Gpr::Dx => Gpr::Dl,
            other => other,
        }
    }

    fn wide(self) -> Gpr {
        match self {
            Gpr::Al | Gpr::Ah => Gpr::Ax,
            Gpr::Cl | Gpr::Ch => Gpr::Cx,
            Gpr::Dl => Gpr::Dx,
            other => other,
        }
    }

    fn sized(self, size: u8) -> Gpr {
        if size == 1 {
            self.low8()
        } else {
            self
        }
    }

    fn slot(self) -> usize {
        match self.wide() {
            Gpr::Ax => 0,
            Gpr::Bx => 1,
            Gpr::Cx => 2,
            Gpr::Dx => 3,
            Gpr::Si => 4,
            Gpr::Di => 5,
            Gpr::Sp => 6,
            _ => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Mov,
    Push,
    Pop,
    Add,
    Sub,
    Or,
    Xor,
    And,
    Shl,
    Shr,
    Sar,
    Imul,
    Div,
    Not,
    Neg,
    Sete,
    Setne,
    Setl,
    Setle,
    Setg,
    Setge,
    Movzb,
    Cmp,
    Cdq,
    Lea,
    Test,
    Call,
    Ret,
    Jmp,
    Je,
    Jne,
    Jz,
    Jnz,
    Jl,
    Jle,
    Jg,
    Jge,
}

impl Opcode {
    fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Mov => "mov",
            Opcode::Push => "push",
            Opcode::Pop => "pop",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::And => "and",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::Sar => "sar",
            Opcode::Imul => "imul",
            Opcode::Div => "div",
            Opcode::Not => "not",
            Opcode::Neg => "neg",
            Opcode::Sete => "sete",
            Opcode::Setne => "setne",
            Opcode::Setl => "setl",
            Opcode::Setle => "setle",
            Opcode::Setg => "setg",
            Opcode::Setge => "setge",
            Opcode::Movzb => "movzb",
            Opcode::Cmp => "cmp",
            Opcode::Cdq => "cdq",
            Opcode::Lea => "lea",
            Opcode::Test => "test",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::Jmp => "jmp",
            Opcode::Je => "je",
            Opcode::Jne => "jne",
            Opcode::Jz => "jz",
            Opcode::Jnz => "jnz",
            Opcode::Jl => "jl",
            Opcode::Jle => "jle",
            Opcode::Jg => "jg",
            Opcode::Jge => "jge",
        }
    }

    /// Branches take their label operand bare; everywhere else a label
    /// is an immediate.
    fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Jmp
                | Opcode::Je
                | Opcode::Jne
                | Opcode::Jz
                | Opcode::Jnz
                | Opcode::Jl
                | Opcode::Jle
                | Opcode::Jg
                | Opcode::Jge
        )
    }
}

#[derive(Debug, Clone)]
pub enum X86Operand {
    Gpr(Gpr),
    Constant(i64),
    UConstant(u64),
    Label(u32),
    Func(String),
    Offset(i32, Gpr),
}

#[derive(Debug, Clone)]
pub enum X86Instruction {
    Op {
        op: Opcode,
        size: u8,
        ops: Vec<X86Operand>,
    },
    Label(u32),
    Named(String),
}

fn size_suffix(size: u8) -> &'static str {
    match size {
        1 => "b",
        2 => "w",
        4 => "l",
        _ => "",
    }
}

fn render_operand(op: &X86Operand, branch: bool) -> String {
    match op {
        X86Operand::Gpr(g) => format!("%{}", g.name()),
        X86Operand::Constant(v) => format!("${v}"),
        X86Operand::UConstant(v) => format!("${v}"),
        X86Operand::Label(n) if branch => format!(".L{n}"),
        X86Operand::Label(n) => format!("$.L{n}"),
        X86Operand::Func(name) => name.clone(),
        X86Operand::Offset(0, g) => format!("(%{})", g.name()),
        X86Operand::Offset(disp, g) => format!("{disp}(%{})", g.name()),
    }
}

/// Render one instruction as a line of AT&T-syntax assembly.
pub fn render(ins: &X86Instruction) -> String {
    match ins {
        X86Instruction::Named(name) => format!("\n{name}:\n"),
        X86Instruction::Label(n) => format!(".L{n}:\n"),
        X86Instruction::Op { op, size, ops } => {
            let mut line = format!("\t{}{}", op.mnemonic(), size_suffix(*size));
            for (i, operand) in ops.iter().enumerate() {
                line.push_str(if i == 0 { " " } else { ", " });
                line.push_str(&render_operand(operand, op.is_branch()));
            }
            line.push('\n');
            line
        }
    }
}

#[derive(Debug, Clone, Default)]
enum CacheValue {
    #[default]
    None,
    Node(SymbolRef),
}

#[derive(Debug, Clone, Default)]
struct RegState {
    value: CacheValue,
    used: bool,
}

/// Instruction sequence for one function, together with the register
/// state the instruction selector tracks while emitting it: which GPR
/// holds which variable, where each virtual temp sits on the stack,
/// and how far the stack has drifted from its statement-entry depth.
pub struct Sequence<'a> {
    out: Vec<X86Instruction>,
    locals: &'a mut LocalVars,
    labels: &'a mut LabelCounter,
    strings: &'a mut StringTable,
    regs: [RegState; NUM_GPRS],
    tmp: [i32; NUM_TEMP_REGS],
    depth: i32,
    frame: usize,
}

impl<'a> Sequence<'a> {
    pub fn new(
        locals: &'a mut LocalVars,
        labels: &'a mut LabelCounter,
        strings: &'a mut StringTable,
        frame: usize,
    ) -> Self {
        Sequence {
            out: Vec::new(),
            locals,
            labels,
            strings,
            regs: Default::default(),
            tmp: [-1; NUM_TEMP_REGS],
            depth: 0,
            frame,
        }
    }

    pub fn finish(self) -> Vec<X86Instruction> {
        self.out
    }

    fn emit(&mut self, op: Opcode, size: u8, ops: Vec<X86Operand>) {
        self.out.push(X86Instruction::Op { op, size, ops });
    }

    pub fn begin_function(&mut self, name: &str) {
        self.out.push(X86Instruction::Named(name.to_owned()));
        self.emit(Opcode::Push, 0, vec![X86Operand::Gpr(Gpr::Bp)]);
        self.emit(
            Opcode::Mov,
            4,
            vec![X86Operand::Gpr(Gpr::Sp), X86Operand::Gpr(Gpr::Bp)],
        );
    }

    pub fn grow_stack(&mut self) {
        if self.frame > 0 {
            self.emit(
                Opcode::Sub,
                4,
                vec![
                    X86Operand::Constant(self.frame as i64),
                    X86Operand::Gpr(Gpr::Sp),
                ],
            );
        }
    }

    fn shrink_stack(&mut self) {
        if self.frame > 0 {
            self.emit(
                Opcode::Add,
                4,
                vec![
                    X86Operand::Constant(self.frame as i64),
                    X86Operand::Gpr(Gpr::Sp),
                ],
            );
        }
    }

    fn epilogue(&mut self) {
        self.shrink_stack();
        self.emit(Opcode::Pop, 0, vec![X86Operand::Gpr(Gpr::Bp)]);
        self.emit(Opcode::Ret, 0, vec![]);
    }

    pub fn ends_with_ret(&self) -> bool {
        matches!(
            self.out.last(),
            Some(X86Instruction::Op {
                op: Opcode::Ret,
                ..
            })
        )
    }

    /// Append the function epilogue for control flow that falls off
    /// the end of the body.
    pub fn finish_function(&mut self) {
        if !self.ends_with_ret() {
            self.epilogue();
        }
    }

    // Register cache.

    fn reset_used(&mut self) {
        for reg in &mut self.regs {
            reg.used = false;
        }
    }

    fn mark_used(&mut self, g: Gpr) {
        self.regs[g.slot()].used = true;
    }

    fn clear_cache(&mut self) {
        self.regs = Default::default();
    }

    fn clobber(&mut self, g: Gpr) {
        self.regs[g.slot()].value = CacheValue::None;
    }

    fn cache_set(&mut self, g: Gpr, sym: &SymbolRef) {
        self.regs[g.slot()].value = CacheValue::Node(Rc::clone(sym));
        if let Some(local) = self.locals.find_mut(&sym.id) {
            local.reg_cache = Some(g.wide());
        }
    }

    /// Look up the register caching `sym`, going through the local's
    /// hint and verifying it against the register table.
    fn cache_find(&self, sym: &SymbolRef) -> Option<Gpr> {
        let g = self.locals.find(&sym.id)?.reg_cache?;
        match &self.regs[g.slot()].value {
            CacheValue::Node(cached) if Rc::ptr_eq(cached, sym) => Some(g),
            _ => None,
        }
    }

    fn invalidate_sym(&mut self, sym: &SymbolRef) {
        for reg in &mut self.regs {
            if matches!(&reg.value, CacheValue::Node(s) if Rc::ptr_eq(s, sym))
            {
                reg.value = CacheValue::None;
            }
        }
    }

    /// Writes through a pointer may alias any variable; drop every
    /// cached variable binding.
    fn invalidate_all_nodes(&mut self) {
        for reg in &mut self.regs {
            if matches!(reg.value, CacheValue::Node(_)) {
                reg.value = CacheValue::None;
            }
        }
    }

    fn any_get(&mut self) -> Gpr {
        for g in [Gpr::Ax, Gpr::Dx, Gpr::Cx] {
            if !self.regs[g.slot()].used {
                self.mark_used(g);
                return g;
            }
        }
        Gpr::Ax
    }

    fn pick(&mut self, want: Option<Gpr>) -> Gpr {
        match want {
            Some(g) => {
                self.mark_used(g);
                g
            }
            None => self.any_get(),
        }
    }

    // Temp register stack.

    fn tmp_push(&mut self, t: i16, gpr: Gpr) {
        for off in &mut self.tmp {
            if *off >= 0 {
                *off += 4;
            }
        }
        self.tmp[t as usize] = 0;
        self.emit(Opcode::Push, 0, vec![X86Operand::Gpr(gpr)]);
        self.depth += 4;
    }

    fn tmp_pop(&mut self, t: i16, gpr: Option<Gpr>) {
        for off in &mut self.tmp {
            if *off >= 0 {
                *off -= 4;
            }
        }
        self.tmp[t as usize] = -1;
        if let Some(g) = gpr {
            self.emit(Opcode::Pop, 0, vec![X86Operand::Gpr(g)]);
            self.clobber(g);
            self.depth -= 4;
        }
    }

    /// Adjust temp offsets and drift for pushes that happen outside
    /// the temp discipline (call arguments and their cleanup).
    fn adjust_arg_stack(&mut self, delta: i32) {
        for off in &mut self.tmp {
            if *off >= 0 {
                *off += delta;
            }
        }
        self.depth += delta;
    }

    /// Reclaim any stack drift left by the statement and forget all
    /// temp slots. In conditional context the adjustment must not
    /// disturb the flags a following jump reads, so `lea` stands in
    /// for `add`.
    fn end_statement(&mut self, preserve_flags: bool) {
        if self.depth > 0 {
            if preserve_flags {
                self.emit(
                    Opcode::Lea,
                    4,
                    vec![
                        X86Operand::Offset(self.depth, Gpr::Sp),
                        X86Operand::Gpr(Gpr::Sp),
                    ],
                );
            } else {
                self.emit(
                    Opcode::Add,
                    4,
                    vec![
                        X86Operand::Constant(self.depth as i64),
                        X86Operand::Gpr(Gpr::Sp),
                    ],
                );
            }
        }
        self.depth = 0;
        self.tmp = [-1; NUM_TEMP_REGS];
    }

    // Operand lowering.

    fn local_disp(&self, name: &str) -> Result<i32> {
        let local = self
            .locals
            .find(name)
            .ok_or_else(|| anyhow!("unknown local `{name}'"))?;
        if local.flags.contains(LocalFlags::ARG) {
            Ok(local.offset)
        } else {
            Ok(-local.offset)
        }
    }

    /// Lower an IR operand to an x86 operand. `force_mem` bypasses the
    /// register cache so the result is usable as a store destination.
    fn operand(
        &mut self,
        ir: &IrOperand<'a>,
        force_mem: bool,
    ) -> Result<X86Operand> {
        match ir {
            IrOperand::Node(node) => match node {
                AstNode::Identifier { sym, .. } => {
                    if !force_mem {
                        if let Some(g) = self.cache_find(sym) {
                            self.mark_used(g);
                            return Ok(X86Operand::Gpr(g));
                        }
                    }
                    Ok(X86Operand::Offset(self.local_disp(&sym.id)?, Gpr::Bp))
                }
                AstNode::Constant { value, ty } => {
                    if ty.flags.is_unsigned() {
                        Ok(X86Operand::UConstant(*value as u32 as u64))
                    } else {
                        Ok(X86Operand::Constant(*value))
                    }
                }
                AstNode::StrLit { lexeme, .. } => Ok(X86Operand::Label(
                    self.strings.intern(lexeme, self.labels),
                )),
                _ => Err(anyhow!("invalid terminal operand")),
            },
            IrOperand::Temp(t) => {
                Ok(X86Operand::Offset(self.tmp[*t as usize], Gpr::Sp))
            }
            IrOperand::NodeOff(node, off) => {
                let AstNode::Identifier { sym, .. } = node else {
                    return Err(anyhow!("member base is not an identifier"));
                };
                Ok(X86Operand::Offset(
                    self.local_disp(&sym.id)? + *off as i32,
                    Gpr::Bp,
                ))
            }
            IrOperand::RegOff(t, off) => {
                let g = self.load_tmp(*t, None)?;
                Ok(X86Operand::Offset(*off as i32, g))
            }
        }
    }

    fn load_operand(
        &mut self,
        op: &IrOperand<'a>,
        want: Option<Gpr>,
        size: u8,
    ) -> Result<Gpr> {
        match op {
            IrOperand::Temp(t) => self.load_tmp(*t, want),
            _ => self.load_value(op, want, size),
        }
    }

    /// Load a memory or immediate operand into a register, reusing a
    /// cached copy when one is live.
    fn load_value(
        &mut self,
        op: &IrOperand<'a>,
        want: Option<Gpr>,
        default_size: u8,
    ) -> Result<Gpr> {
        if let IrOperand::Node(AstNode::Identifier { sym, .. }) = op {
            if let Some(g) = self.cache_find(sym) {
                match want {
                    None => {
                        self.mark_used(g);
                        return Ok(g);
                    }
                    Some(w) if w == g => {
                        self.mark_used(g);
                        return Ok(g);
                    }
                    Some(_) => {}
                }
            }
        }

        let size = match op {
            IrOperand::Node(node) => {
                let s = node.ty().size().min(4) as u8;
                if s == 0 {
                    4
                } else {
                    s
                }
            }
            _ => default_size,
        };

        let src = self.operand(op, true)?;
        let g = self.pick(want);
        let dst = if size == 1 { g.low8() } else { g };
        self.emit(Opcode::Mov, size, vec![src, X86Operand::Gpr(dst)]);
        if let IrOperand::Node(AstNode::Identifier { sym, .. }) = op {
            self.cache_set(g, sym);
        } else {
            self.clobber(g);
        }
        Ok(g)
    }

    /// Load a temp into a register: a pop when it sits on top of the
    /// stack, a plain move otherwise. A pop immediately following the
    /// matching push elides both.
    fn load_tmp(&mut self, t: i16, want: Option<Gpr>) -> Result<Gpr> {
        if t < 0 {
            return Err(anyhow!("expression produced no temp register"));
        }
        let off = self.tmp[t as usize];
        if off < 0 {
            return Err(anyhow!("temp register {t} is not live"));
        }

        if off == 0 {
            let pushed = match self.out.last() {
                Some(X86Instruction::Op {
                    op: Opcode::Push,
                    ops,
                    ..
                }) => match ops.first() {
                    Some(X86Operand::Gpr(g)) => Some(*g),
                    _ => None,
                },
                _ => None,
            };
            if let Some(src) = pushed {
                self.out.pop();
                self.depth -= 4;
                self.tmp_pop(t, None);
                self.clobber(src);
                self.mark_used(src);
                return match want {
                    None => Ok(src),
                    Some(w) if w == src => Ok(w),
                    Some(w) => {
                        self.emit(
                            Opcode::Mov,
                            4,
                            vec![X86Operand::Gpr(src), X86Operand::Gpr(w)],
                        );
                        self.clobber(w);
                        self.mark_used(w);
                        Ok(w)
                    }
                };
            }
            let g = self.pick(want);
            self.tmp_pop(t, Some(g));
            return Ok(g);
        }

        let g = self.pick(want);
        self.emit(
            Opcode::Mov,
            4,
            vec![X86Operand::Offset(off, Gpr::Sp), X86Operand::Gpr(g)],
        );
        self.clobber(g);
        Ok(g)
    }

    // Instruction selection.

    fn translate_ir(
        &mut self,
        ir: &IrSequence<'a>,
        cond: bool,
    ) -> Result<Option<IrTag>> {
        let count = ir.seq.len();
        for (i, ins) in ir.seq.iter().enumerate() {
            let flags_only = cond && i + 1 == count;
            self.translate_instruction(ins, flags_only)?;
        }
        Ok(ir.seq.last().map(|ins| ins.tag))
    }

    fn translate_instruction(
        &mut self,
        ins: &IrInstruction<'a>,
        flags_only: bool,
    ) -> Result<()> {
        self.reset_used();
        match ins.tag {
            IrTag::Test => self.translate_test(ins),
            IrTag::Push => self.translate_push(ins),
            IrTag::Load => self.translate_load(ins),
            IrTag::Expr(op) => match op {
                ExprOp::Assign => self.translate_assign(ins),
                ExprOp::Or => self.translate_generic(ins, Opcode::Or, true),
                ExprOp::Xor => self.translate_generic(ins, Opcode::Xor, true),
                ExprOp::And => self.translate_generic(ins, Opcode::And, true),
                ExprOp::Add => self.translate_generic(ins, Opcode::Add, true),
                ExprOp::Sub => self.translate_generic(ins, Opcode::Sub, true),
                ExprOp::Lshift | ExprOp::Rshift => {
                    self.translate_shift(ins, op)
                }
                ExprOp::Eq
                | ExprOp::Ne
                | ExprOp::Lt
                | ExprOp::Gt
                | ExprOp::Le
                | ExprOp::Ge => self.translate_comparison(ins, op, flags_only),
                ExprOp::Mult => self.translate_mult(ins),
                ExprOp::Div | ExprOp::Mod => self.translate_division(ins, op),
                ExprOp::Address => self.translate_address(ins),
                ExprOp::Dereference => self.translate_dereference(ins),
                ExprOp::UnaryMinus => {
                    self.translate_unary(ins, Opcode::Neg)
                }
                ExprOp::Not => self.translate_unary(ins, Opcode::Not),
                ExprOp::LogicalNot => {
                    self.translate_logical_not(ins, flags_only)
                }
                ExprOp::UnaryPlus => self.translate_unary_plus(ins),
                ExprOp::LogicalAnd => {
                    self.translate_logical(ins, Opcode::And)
                }
                ExprOp::LogicalOr => self.translate_logical(ins, Opcode::Or),
                ExprOp::Func => self.translate_call(ins),
                ExprOp::Comma | ExprOp::Member => {
                    Err(anyhow!("operator {:?} has no x86 lowering", op))
                }
            },
        }
    }

    fn lhs_of<'i>(
        &self,
        ins: &'i IrInstruction<'a>,
    ) -> Result<&'i IrOperand<'a>> {
        ins.lhs
            .as_ref()
            .ok_or_else(|| anyhow!("IR instruction is missing its operand"))
    }

    fn rhs_of<'i>(
        &self,
        ins: &'i IrInstruction<'a>,
    ) -> Result<&'i IrOperand<'a>> {
        ins.rhs
            .as_ref()
            .ok_or_else(|| anyhow!("IR instruction is missing its operand"))
    }

    fn op_size(ins: &IrInstruction<'a>) -> u8 {
        let size = ins.ty.size().min(4) as u8;
        if size == 0 {
            4
        } else {
            size
        }
    }

    /// Two-operand arithmetic into a single destination register, the
    /// result optionally pushed into the target temp.
    fn translate_generic(
        &mut self,
        ins: &IrInstruction<'a>,
        opcode: Opcode,
        push: bool,
    ) -> Result<()> {
        let size = Self::op_size(ins);
        let lhs = self.lhs_of(ins)?.clone();
        let rhs = self.rhs_of(ins)?.clone();

        let commutative = !matches!(opcode, Opcode::Sub | Opcode::Cmp);
        let lhs_is_const =
            matches!(&lhs, IrOperand::Node(AstNode::Constant { .. }));

        if lhs_is_const && commutative {
            let imm = self.operand(&lhs, true)?;
            self.load_operand(&rhs, Some(Gpr::Ax), size)?;
            self.emit(
                opcode,
                size,
                vec![imm, X86Operand::Gpr(Gpr::Ax.sized(size))],
            );
        } else {
            self.load_operand(&lhs, Some(Gpr::Ax), size)?;
            let rhs_op = match &rhs {
                IrOperand::Temp(_)
                | IrOperand::RegOff(..)
                | IrOperand::Node(AstNode::Identifier { .. }) => {
                    let g = self.load_operand(&rhs, Some(Gpr::Dx), size)?;
                    X86Operand::Gpr(g.sized(size))
                }
                _ => self.operand(&rhs, false)?,
            };
            self.emit(
                opcode,
                size,
                vec![rhs_op, X86Operand::Gpr(Gpr::Ax.sized(size))],
            );
        }

        self.clobber(Gpr::Ax);
        if push {
            self.tmp_push(ins.target, Gpr::Ax);
        }
        Ok(())
    }

    fn translate_comparison(
        &mut self,
        ins: &IrInstruction<'a>,
        op: ExprOp,
        flags_only: bool,
    ) -> Result<()> {
        self.translate_generic(ins, Opcode::Cmp, false)?;
        if flags_only {
            return Ok(());
        }

        let set = match op {
            ExprOp::Eq => Opcode::Sete,
            ExprOp::Ne => Opcode::Setne,
            ExprOp::Lt => Opcode::Setl,
            ExprOp::Gt => Opcode::Setg,
            ExprOp::Le => Opcode::Setle,
            _ => Opcode::Setge,
        };
        self.emit(set, 0, vec![X86Operand::Gpr(Gpr::Al)]);
        self.emit(
            Opcode::Movzb,
            0,
            vec![X86Operand::Gpr(Gpr::Al), X86Operand::Gpr(Gpr::Ax)],
        );
        self.clobber(Gpr::Ax);
        self.tmp_push(ins.target, Gpr::Ax);
        Ok(())
    }

    fn translate_shift(
        &mut self,
        ins: &IrInstruction<'a>,
        op: ExprOp,
    ) -> Result<()> {
        let size = Self::op_size(ins);
        let lhs = self.lhs_of(ins)?.clone();
        let rhs = self.rhs_of(ins)?.clone();

        let opcode = if op == ExprOp::Lshift {
            Opcode::Shl
        } else if ins.ty.flags.is_unsigned() {
            Opcode::Shr
        } else {
            Opcode::Sar
        };

        self.load_operand(&lhs, Some(Gpr::Ax), size)?;
        if matches!(&rhs, IrOperand::Node(AstNode::Constant { .. })) {
            let imm = self.operand(&rhs, true)?;
            self.emit(
                opcode,
                size,
                vec![imm, X86Operand::Gpr(Gpr::Ax.sized(size))],
            );
        } else {
            // Variable shift counts go through %cl.
            self.load_operand(&rhs, Some(Gpr::Cx), 4)?;
            self.emit(
                opcode,
                size,
                vec![
                    X86Operand::Gpr(Gpr::Cl),
                    X86Operand::Gpr(Gpr::Ax.sized(size)),
                ],
            );
        }
        self.clobber(Gpr::Ax);
        self.tmp_push(ins.target, Gpr::Ax);
        Ok(())
    }

    fn translate_mult(&mut self, ins: &IrInstruction<'a>) -> Result<()> {
        let lhs = self.lhs_of(ins)?.clone();
        let rhs = self.rhs_of(ins)?.clone();

        let lhs_const =
            matches!(&lhs, IrOperand::Node(AstNode::Constant { .. }));
        let rhs_const =
            matches!(&rhs, IrOperand::Node(AstNode::Constant { .. }));

        if lhs_const || rhs_const {
            let (imm_op, other) =
                if lhs_const { (&lhs, &rhs) } else { (&rhs, &lhs) };
            let imm = self.operand(imm_op, true)?;
            let src = self.load_operand(other, None, 4)?;
            let dst = self.any_get();
            self.emit(
                Opcode::Imul,
                0,
                vec![imm, X86Operand::Gpr(src), X86Operand::Gpr(dst)],
            );
            self.clobber(dst);
            self.tmp_push(ins.target, dst);
        } else {
            self.load_operand(&lhs, Some(Gpr::Ax), 4)?;
            let src = self.load_operand(&rhs, None, 4)?;
            self.emit(
                Opcode::Imul,
                0,
                vec![X86Operand::Gpr(src), X86Operand::Gpr(Gpr::Ax)],
            );
            self.clobber(Gpr::Ax);
            self.tmp_push(ins.target, Gpr::Ax);
        }
        Ok(())
    }

    fn translate_division(
        &mut self,
        ins: &IrInstruction<'a>,
        op: ExprOp,
    ) -> Result<()> {
        let lhs = self.lhs_of(ins)?.clone();
        let rhs = self.rhs_of(ins)?.clone();

        self.load_operand(&lhs, Some(Gpr::Ax), 4)?;
        self.emit(Opcode::Cdq, 0, vec![]);
        // The dividend occupies %edx:%eax until the divide issues.
        self.clobber(Gpr::Dx);
        self.mark_used(Gpr::Dx);
        self.load_operand(&rhs, Some(Gpr::Cx), 4)?;
        self.emit(Opcode::Div, 0, vec![X86Operand::Gpr(Gpr::Cx)]);
        self.clobber(Gpr::Ax);
        self.clobber(Gpr::Dx);

        let result = if op == ExprOp::Div { Gpr::Ax } else { Gpr::Dx };
        self.tmp_push(ins.target, result);
        Ok(())
    }

    fn translate_address(&mut self, ins: &IrInstruction<'a>) -> Result<()> {
        let lhs = self.lhs_of(ins)?.clone();
        let mem = self.operand(&lhs, true)?;
        self.emit(Opcode::Lea, 4, vec![mem, X86Operand::Gpr(Gpr::Ax)]);
        self.clobber(Gpr::Ax);
        self.tmp_push(ins.target, Gpr::Ax);
        Ok(())
    }

    fn translate_dereference(
        &mut self,
        ins: &IrInstruction<'a>,
    ) -> Result<()> {
        let lhs = self.lhs_of(ins)?.clone();
        let size = Self::op_size(ins);
        let g = self.load_operand(&lhs, None, 4)?;
        let dst = if size == 1 { g.low8() } else { g };
        self.emit(
            Opcode::Mov,
            size,
            vec![X86Operand::Offset(0, g), X86Operand::Gpr(dst)],
        );
        self.clobber(g);
        self.tmp_push(ins.target, g);
        Ok(())
    }

    fn translate_unary(
        &mut self,
        ins: &IrInstruction<'a>,
        opcode: Opcode,
    ) -> Result<()> {
        let lhs = self.lhs_of(ins)?.clone();
        let size = Self::op_size(ins);
        let g = self.load_operand(&lhs, None, size)?;
        self.emit(opcode, size, vec![X86Operand::Gpr(g.sized(size))]);
        self.clobber(g);
        self.tmp_push(ins.target, g);
        Ok(())
    }

    fn translate_logical_not(
        &mut self,
        ins: &IrInstruction<'a>,
        flags_only: bool,
    ) -> Result<()> {
        let lhs = self.lhs_of(ins)?.clone();
        let g = self.load_operand(&lhs, None, 4)?;
        self.emit(
            Opcode::Cmp,
            0,
            vec![X86Operand::Constant(0), X86Operand::Gpr(g)],
        );
        if flags_only {
            return Ok(());
        }
        self.emit(Opcode::Setne, 0, vec![X86Operand::Gpr(Gpr::Al)]);
        self.emit(
            Opcode::Movzb,
            0,
            vec![X86Operand::Gpr(Gpr::Al), X86Operand::Gpr(Gpr::Ax)],
        );
        self.clobber(Gpr::Ax);
        self.tmp_push(ins.target, Gpr::Ax);
        Ok(())
    }

    fn translate_unary_plus(&mut self, ins: &IrInstruction<'a>) -> Result<()> {
        let lhs = self.lhs_of(ins)?.clone();
        let size = Self::op_size(ins);
        let g = self.load_operand(&lhs, None, size)?;
        self.tmp_push(ins.target, g);
        Ok(())
    }

    /// Logical and/or over values: normalize both operands to 0 or 1,
    /// then combine. Short-circuit evaluation is not modeled.
    fn translate_logical(
        &mut self,
        ins: &IrInstruction<'a>,
        opcode: Opcode,
    ) -> Result<()> {
        let lhs = self.lhs_of(ins)?.clone();
        let rhs = self.rhs_of(ins)?.clone();

        self.load_operand(&lhs, Some(Gpr::Ax), 4)?;
        self.normalize_bool(Gpr::Ax);
        self.load_operand(&rhs, Some(Gpr::Cx), 4)?;
        self.normalize_bool(Gpr::Cx);

        self.emit(
            opcode,
            4,
            vec![X86Operand::Gpr(Gpr::Cx), X86Operand::Gpr(Gpr::Ax)],
        );
        self.clobber(Gpr::Ax);
        self.tmp_push(ins.target, Gpr::Ax);
        Ok(())
    }

    fn normalize_bool(&mut self, g: Gpr) {
        self.emit(
            Opcode::Cmp,
            0,
            vec![X86Operand::Constant(0), X86Operand::Gpr(g)],
        );
        self.emit(Opcode::Setne, 0, vec![X86Operand::Gpr(g.low8())]);
        self.emit(
            Opcode::Movzb,
            0,
            vec![X86Operand::Gpr(g.low8()), X86Operand::Gpr(g)],
        );
        self.clobber(g);
        self.mark_used(g);
    }

    fn translate_test(&mut self, ins: &IrInstruction<'a>) -> Result<()> {
        let lhs = self.lhs_of(ins)?.clone();
        let size = match &lhs {
            IrOperand::Node(node) => {
                let s = node.ty().size().min(4) as u8;
                if s == 0 {
                    4
                } else {
                    s
                }
            }
            _ => 4,
        };
        let g = self.load_operand(&lhs, None, size)?;
        let r = if size == 1 { g.low8() } else { g };
        self.emit(
            Opcode::Test,
            0,
            vec![X86Operand::Gpr(r), X86Operand::Gpr(r)],
        );
        Ok(())
    }

    fn translate_push(&mut self, ins: &IrInstruction<'a>) -> Result<()> {
        let lhs = self.lhs_of(ins)?.clone();
        match &lhs {
            IrOperand::Node(AstNode::Constant { .. })
            | IrOperand::Node(AstNode::StrLit { .. }) => {
                let imm = self.operand(&lhs, true)?;
                self.emit(Opcode::Push, 0, vec![imm]);
            }
            _ => {
                let g = self.load_operand(&lhs, None, 4)?;
                self.emit(Opcode::Push, 0, vec![X86Operand::Gpr(g)]);
            }
        }
        self.adjust_arg_stack(4);
        Ok(())
    }

    fn translate_load(&mut self, ins: &IrInstruction<'a>) -> Result<()> {
        let lhs = self.lhs_of(ins)?.clone();
        let g = self.load_operand(&lhs, Some(Gpr::Ax), 4)?;
        self.tmp_push(ins.target, g);
        Ok(())
    }

    fn translate_call(&mut self, ins: &IrInstruction<'a>) -> Result<()> {
        let lhs = self.lhs_of(ins)?;
        let IrOperand::Node(AstNode::Identifier { sym, .. }) = lhs else {
            return Err(anyhow!("call target is not an identifier"));
        };
        let name = sym.id.clone();

        let argc = match &ins.rhs {
            Some(IrOperand::Node(args)) => count_arguments(Some(args)),
            _ => 0,
        };

        self.emit(Opcode::Call, 0, vec![X86Operand::Func(name)]);
        if argc > 0 {
            self.emit(
                Opcode::Add,
                4,
                vec![
                    X86Operand::Constant(4 * argc as i64),
                    X86Operand::Gpr(Gpr::Sp),
                ],
            );
            self.adjust_arg_stack(-(4 * argc as i32));
        }
        self.clear_cache();
        self.tmp_push(ins.target, Gpr::Ax);
        Ok(())
    }

    fn translate_assign(&mut self, ins: &IrInstruction<'a>) -> Result<()> {
        let size = Self::op_size(ins);
        let lhs = self.lhs_of(ins)?.clone();
        let rhs = self.rhs_of(ins)?.clone();

        let mut stored_sym = None;
        let mut deref_store = false;
        let dst = match &lhs {
            IrOperand::Node(AstNode::Identifier { sym, .. }) => {
                stored_sym = Some(Rc::clone(sym));
                self.operand(&lhs, true)?
            }
            IrOperand::NodeOff(..) => self.operand(&lhs, true)?,
            IrOperand::RegOff(..) => {
                deref_store = true;
                self.operand(&lhs, true)?
            }
            IrOperand::Temp(t) => {
                deref_store = true;
                let g = self.load_tmp(*t, None)?;
                X86Operand::Offset(0, g)
            }
            _ => return Err(anyhow!("invalid assignment destination")),
        };

        match &rhs {
            IrOperand::Node(AstNode::Constant { .. })
            | IrOperand::Node(AstNode::StrLit { .. }) => {
                let imm = self.operand(&rhs, true)?;
                self.emit(Opcode::Mov, size, vec![imm, dst]);
                if let Some(sym) = &stored_sym {
                    self.invalidate_sym(sym);
                }
            }
            _ => {
                let g = self.load_operand(&rhs, None, size)?;
                let src = if size == 1 { g.low8() } else { g };
                self.emit(
                    Opcode::Mov,
                    size,
                    vec![X86Operand::Gpr(src), dst],
                );
                if let Some(sym) = &stored_sym {
                    self.invalidate_sym(sym);
                    self.cache_set(g, sym);
                }
            }
        }

        if deref_store {
            self.invalidate_all_nodes();
        }
        Ok(())
    }

    // Control flow.

    pub fn translate_graph(
        &mut self,
        mut graph: Option<&'a GraphNode>,
    ) -> Result<()> {
        while let Some(node) = graph {
            match &node.kind {
                GraphKind::Declaration(_) => {}
                GraphKind::Statement(ast) => self.statement(ast)?,
                GraphKind::Conditional { cond, succ, fail } => {
                    self.conditional(cond, succ.as_deref(), fail.as_deref())?
                }
                GraphKind::For {
                    init,
                    cond,
                    post,
                    body,
                } => self.for_loop(init, cond, post, body.as_deref())?,
                GraphKind::While { cond, body } => {
                    self.while_loop(cond, body.as_deref())?
                }
                GraphKind::DoWhile { cond, body } => {
                    self.do_while_loop(cond, body.as_deref())?
                }
                GraphKind::Return(value) => self.ret(value.as_deref())?,
            }
            graph = node.next.as_deref();
        }
        Ok(())
    }

    fn statement(&mut self, ast: &'a AstNode) -> Result<()> {
        let mut ir = IrSequence::new();
        ir.parse_expr(ast, false)?;
        self.translate_ir(&ir, false)?;
        self.end_statement(false);
        Ok(())
    }

    /// Lower a condition expression and return the tag whose flags the
    /// following jump will read.
    fn emit_cond(&mut self, cond: &'a AstNode) -> Result<IrTag> {
        let mut ir = IrSequence::new();
        ir.parse_expr(cond, true)?;
        let tag = self
            .translate_ir(&ir, true)?
            .ok_or_else(|| anyhow!("condition produced no instructions"))?;
        self.end_statement(true);
        Ok(tag)
    }

    fn new_label(&mut self) -> u32 {
        self.labels.next()
    }

    fn place_label(&mut self, label: u32) {
        self.out.push(X86Instruction::Label(label));
        self.clear_cache();
    }

    fn emit_jump(&mut self, op: Opcode, label: u32) {
        self.emit(op, 0, vec![X86Operand::Label(label)]);
    }

    fn conditional(
        &mut self,
        cond: &'a AstNode,
        succ: Option<&'a GraphNode>,
        fail: Option<&'a GraphNode>,
    ) -> Result<()> {
        let tag = self.emit_cond(cond)?;
        let jfail = self.new_label();
        self.emit_jump(inverse_jump(tag)?, jfail);

        self.translate_graph(succ)?;

        if fail.is_some() {
            let jend = self.new_label();
            self.emit_jump(Opcode::Jmp, jend);
            self.place_label(jfail);
            self.translate_graph(fail)?;
            self.place_label(jend);
        } else {
            self.place_label(jfail);
        }
        Ok(())
    }

    fn for_loop(
        &mut self,
        init: &'a AstNode,
        cond: &'a AstNode,
        post: &'a AstNode,
        body: Option<&'a GraphNode>,
    ) -> Result<()> {
        self.statement(init)?;
        let jtest = self.new_label();
        self.place_label(jtest);
        let tag = self.emit_cond(cond)?;
        let jexit = self.new_label();
        self.emit_jump(inverse_jump(tag)?, jexit);

        self.translate_graph(body)?;
        self.statement(post)?;
        self.emit_jump(Opcode::Jmp, jtest);
        self.place_label(jexit);
        Ok(())
    }

    fn while_loop(
        &mut self,
        cond: &'a AstNode,
        body: Option<&'a GraphNode>,
    ) -> Result<()> {
        // Rotated loop: test once on entry, then re-test at the bottom.
        let tag = self.emit_cond(cond)?;
        let jexit = self.new_label();
        self.emit_jump(inverse_jump(tag)?, jexit);

        let jstart = self.new_label();
        self.place_label(jstart);
        self.translate_graph(body)?;

        let tag = self.emit_cond(cond)?;
        self.emit_jump(forward_jump(tag)?, jstart);
        self.place_label(jexit);
        Ok(())
    }

    fn do_while_loop(
        &mut self,
        cond: &'a AstNode,
        body: Option<&'a GraphNode>,
    ) -> Result<()> {
        let jstart = self.new_label();
        self.place_label(jstart);
        self.translate_graph(body)?;
        let tag = self.emit_cond(cond)?;
        self.emit_jump(forward_jump(tag)?, jstart);
        Ok(())
    }

    fn ret(&mut self, value: Option<&'a AstNode>) -> Result<()> {
        match value {
            Some(v) if v.is_terminal() => {
                self.reset_used();
                self.load_value(&IrOperand::Node(v), Some(Gpr::Ax), 4)?;
            }
            Some(v) => {
                let mut ir = IrSequence::new();
                ir.parse_expr(v, false)?;
                let result = ir.result();
                self.translate_ir(&ir, false)?;
                match result {
                    Some(IrOperand::Temp(t)) => {
                        self.load_tmp(t, Some(Gpr::Ax))?;
                    }
                    Some(op) => {
                        self.reset_used();
                        self.load_value(&op, Some(Gpr::Ax), 4)?;
                    }
                    None => {}
                }
            }
            None => {}
        }
        self.end_statement(false);
        self.epilogue();
        self.clear_cache();
        Ok(())
    }
}

/// Jump taken when the condition does NOT hold.
fn inverse_jump(tag: IrTag) -> Result<Opcode> {
    Ok(match tag {
        IrTag::Test => Opcode::Jz,
        IrTag::Expr(ExprOp::LogicalNot) => Opcode::Jne,
        IrTag::Expr(ExprOp::Eq) => Opcode::Jne,
        IrTag::Expr(ExprOp::Ne) => Opcode::Je,
        IrTag::Expr(ExprOp::Lt) => Opcode::Jge,
        IrTag::Expr(ExprOp::Gt) => Opcode::Jle,
        IrTag::Expr(ExprOp::Le) => Opcode::Jg,
        IrTag::Expr(ExprOp::Ge) => Opcode::Jl,
        _ => return Err(anyhow!("tag {tag:?} cannot head a conditional jump")),
    })
}

/// Jump taken when the condition holds.
fn forward_jump(tag: IrTag) -> Result<Opcode> {
    Ok(match tag {
        IrTag::Test => Opcode::Jnz,
        IrTag::Expr(ExprOp::LogicalNot) => Opcode::Je,
        IrTag::Expr(ExprOp::Eq) => Opcode::Je,
        IrTag::Expr(ExprOp::Ne) => Opcode::Jne,
        IrTag::Expr(ExprOp::Lt) => Opcode::Jl,
        IrTag::Expr(ExprOp::Gt) => Opcode::Jg,
        IrTag::Expr(ExprOp::Le) => Opcode::Jle,
        IrTag::Expr(ExprOp::Ge) => Opcode::Jge,
        _ => return Err(anyhow!("tag {tag:?} cannot head a conditional jump")),
    })
}
