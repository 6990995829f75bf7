use rstest::rstest;

use crate::asg::{self, GraphNode};
use crate::ast::{self, AstNode, ExprOp, LeafKind};
use crate::errors::Session;
use crate::local::LocalVars;
use crate::symtab::SymbolTable;
use crate::types::{
    integer_convert, BaseType, StructTable, TypeFlags, TypeInfo,
};

fn session() -> Session {
    Session::new("test.c")
}

fn constant(
    lexeme: &str,
    sess: &Session,
    symtab: &mut SymbolTable,
) -> Box<AstNode> {
    ast::create_leaf(LeafKind::Constant, lexeme, sess, symtab).unwrap()
}

fn constant_value(node: &AstNode) -> i64 {
    match node {
        AstNode::Constant { value, .. } => *value,
        other => panic!("expected a constant node, got {other:?}"),
    }
}

#[test]
fn type_flags_packing() {
    let flags = TypeFlags::new(BaseType::Char)
        .with_unsigned()
        .with_indirection(2);
    assert_eq!(flags.base(), Some(BaseType::Char));
    assert!(flags.is_unsigned());
    assert!(flags.is_ptr());
    assert_eq!(flags.indirection(), 2);
    assert!(!flags.is_func());

    let fun = TypeFlags::new(BaseType::Int).with_func();
    assert!(fun.is_func());
    assert!(!fun.without_func().is_func());

    assert_eq!(flags.dereference().indirection(), 1);
    assert_eq!(flags.reference().indirection(), 3);
}

#[test]
fn type_sizes() {
    assert_eq!(TypeInfo::new(BaseType::Int).size(), 4);
    assert_eq!(TypeInfo::new(BaseType::Char).size(), 1);
    assert_eq!(TypeInfo::new(BaseType::Void).size(), 0);
    assert_eq!(TypeInfo::new(BaseType::StrLit).size(), 0);

    // Pointers of any base are 4 bytes, `void *` included.
    let void_ptr = TypeInfo::with_flags(
        TypeFlags::new(BaseType::Void).with_indirection(1),
    );
    assert_eq!(void_ptr.size(), 4);
    let char_ptr = TypeInfo::with_flags(
        TypeFlags::new(BaseType::Char).with_indirection(1),
    );
    assert_eq!(char_ptr.size(), 4);
    assert_eq!(char_ptr.pointee_size(), 1);
}

#[test]
fn integer_conversion() {
    let int = TypeFlags::new(BaseType::Int);
    let chr = TypeFlags::new(BaseType::Char);
    let uint = int.with_unsigned();

    assert_eq!(integer_convert(int, int).base(), Some(BaseType::Int));
    assert_eq!(integer_convert(chr, chr).base(), Some(BaseType::Char));
    assert_eq!(integer_convert(chr, int).base(), Some(BaseType::Int));
    // The unsigned qualifier of either operand carries over.
    assert!(integer_convert(uint, int).is_unsigned());
    assert!(integer_convert(chr, uint).is_unsigned());
    assert!(!integer_convert(int, chr).is_unsigned());
}

#[test]
fn struct_layout_aligns_members_to_their_size() {
    let sess = session();
    let mut structs = StructTable::new();
    let def = structs
        .define(
            &sess,
            "mixed",
            vec![
                ("a".to_owned(), TypeInfo::new(BaseType::Char)),
                ("b".to_owned(), TypeInfo::new(BaseType::Int)),
                ("c".to_owned(), TypeInfo::new(BaseType::Char)),
            ],
        )
        .unwrap();

    assert_eq!(def.member("a").unwrap().offset, 0);
    assert_eq!(def.member("b").unwrap().offset, 4);
    assert_eq!(def.member("c").unwrap().offset, 8);
    assert_eq!(def.size, 9);
    assert!(def.member("d").is_none());
}

#[test]
fn struct_redefinition_is_an_error() {
    let sess = session();
    let mut structs = StructTable::new();
    structs.define(&sess, "s", vec![]).unwrap();
    let err = structs.define(&sess, "s", vec![]).unwrap_err();
    assert!(err.to_string().contains("redefinition"));
    assert!(structs.find("s").is_some());
    assert!(structs.find("t").is_none());
}

#[test]
fn symtab_scopes_shadow_and_pop() {
    let mut tab = SymbolTable::new();
    let outer = tab.add("x", None);
    assert_eq!(outer.ty.borrow().flags.base(), Some(BaseType::Int));

    tab.push_scope();
    assert!(tab.lookup("x").is_some());
    assert!(tab.lookup_current_scope("x").is_none());

    let inner = tab.add("x", Some(TypeInfo::new(BaseType::Char)));
    let found = tab.lookup("x").unwrap();
    assert!(std::rc::Rc::ptr_eq(&found, &inner));

    tab.pop_scope();
    let found = tab.lookup("x").unwrap();
    assert!(std::rc::Rc::ptr_eq(&found, &outer));
}

#[test]
fn functions_live_in_the_global_scope() {
    let mut tab = SymbolTable::new();
    tab.push_scope();
    let f = tab.add_function("f", TypeInfo::new(BaseType::Int));
    assert!(f.ty.borrow().flags.is_func());
    tab.pop_scope();
    assert!(tab.lookup("f").is_some());
}

#[rstest]
#[case(ExprOp::Add, "2", "3", 5)]
#[case(ExprOp::Sub, "2", "3", -1)]
#[case(ExprOp::Mult, "4", "3", 12)]
#[case(ExprOp::Div, "7", "2", 3)]
#[case(ExprOp::Mod, "7", "2", 1)]
#[case(ExprOp::Or, "6", "1", 7)]
#[case(ExprOp::Xor, "6", "3", 5)]
#[case(ExprOp::And, "6", "3", 2)]
#[case(ExprOp::Lshift, "1", "4", 16)]
#[case(ExprOp::Rshift, "16", "2", 4)]
#[case(ExprOp::Eq, "2", "2", 1)]
#[case(ExprOp::Ne, "2", "2", 0)]
#[case(ExprOp::Lt, "1", "2", 1)]
#[case(ExprOp::Gt, "1", "2", 0)]
#[case(ExprOp::Le, "2", "2", 1)]
#[case(ExprOp::Ge, "1", "2", 0)]
#[case(ExprOp::LogicalAnd, "2", "3", 1)]
#[case(ExprOp::LogicalOr, "0", "0", 0)]
fn binary_constant_folding(
    #[case] op: ExprOp,
    #[case] lhs: &str,
    #[case] rhs: &str,
    #[case] expected: i64,
) {
    let sess = session();
    let mut tab = SymbolTable::new();
    let lhs = constant(lhs, &sess, &mut tab);
    let rhs = constant(rhs, &sess, &mut tab);
    let folded = ast::create_expr(op, lhs, Some(rhs), &sess).unwrap();
    assert_eq!(constant_value(&folded), expected);
}

#[rstest]
#[case(ExprOp::UnaryMinus, "5", -5)]
#[case(ExprOp::Not, "0", -1)]
#[case(ExprOp::LogicalNot, "0", 1)]
#[case(ExprOp::LogicalNot, "7", 0)]
fn unary_constant_folding(
    #[case] op: ExprOp,
    #[case] operand: &str,
    #[case] expected: i64,
) {
    let sess = session();
    let mut tab = SymbolTable::new();
    let operand = constant(operand, &sess, &mut tab);
    let folded = ast::create_expr(op, operand, None, &sess).unwrap();
    assert_eq!(constant_value(&folded), expected);
}

#[test]
fn division_by_zero_is_not_folded() {
    let sess = session();
    let mut tab = SymbolTable::new();
    let lhs = constant("4", &sess, &mut tab);
    let rhs = constant("0", &sess, &mut tab);
    let expr = ast::create_expr(ExprOp::Div, lhs, Some(rhs), &sess).unwrap();
    assert!(matches!(&*expr, AstNode::Expr { op: ExprOp::Div, .. }));
}

#[rstest]
#[case("0", 0, false)]
#[case("42", 42, false)]
#[case("42u", 42, true)]
#[case("42U", 42, true)]
#[case("0x10", 16, true)]
#[case("0X10", 16, true)]
#[case("010", 8, true)]
#[case("'a'", 97, false)]
#[case("'\\n'", 10, false)]
#[case("'\\t'", 9, false)]
#[case("'\\0'", 0, false)]
#[case("'\\\\'", 92, false)]
fn constant_lexemes(
    #[case] lexeme: &str,
    #[case] value: i64,
    #[case] unsigned: bool,
) {
    let sess = session();
    let mut tab = SymbolTable::new();
    let node = constant(lexeme, &sess, &mut tab);
    assert_eq!(constant_value(&node), value);
    assert_eq!(node.ty().flags.is_unsigned(), unsigned);
}

#[test]
fn undeclared_identifier_is_an_error() {
    let sess = session();
    let mut tab = SymbolTable::new();
    let err = ast::create_leaf(LeafKind::Identifier, "nope", &sess, &mut tab)
        .unwrap_err();
    assert!(err.to_string().contains("undeclared identifier `nope'"));
}

#[test]
fn duplicate_declaration_is_an_error() {
    let sess = session();
    let mut tab = SymbolTable::new();
    ast::create_leaf(LeafKind::NewId, "a", &sess, &mut tab).unwrap();
    let err =
        ast::create_leaf(LeafKind::NewId, "a", &sess, &mut tab).unwrap_err();
    assert!(err.to_string().contains("already been declared"));

    // Shadowing an outer scope is fine.
    tab.push_scope();
    ast::create_leaf(LeafKind::NewId, "a", &sess, &mut tab).unwrap();
}

#[test]
fn assignment_requires_an_lvalue() {
    let sess = session();
    let mut tab = SymbolTable::new();
    let lhs = constant("1", &sess, &mut tab);
    let rhs = constant("2", &sess, &mut tab);
    let err =
        ast::create_expr(ExprOp::Assign, lhs, Some(rhs), &sess).unwrap_err();
    assert!(err.to_string().contains("non-lvalue"));
}

#[test]
fn pointer_addition_scales_by_pointee_size() {
    let sess = session();
    let mut tab = SymbolTable::new();
    tab.add(
        "p",
        Some(TypeInfo::with_flags(
            TypeFlags::new(BaseType::Int).with_indirection(1),
        )),
    );
    let p =
        ast::create_leaf(LeafKind::Identifier, "p", &sess, &mut tab).unwrap();
    let two = constant("2", &sess, &mut tab);
    let sum = ast::create_expr(ExprOp::Add, p, Some(two), &sess).unwrap();

    let AstNode::Expr { op, ty, rhs, .. } = &*sum else {
        panic!("expected an expression node");
    };
    assert_eq!(*op, ExprOp::Add);
    assert!(ty.flags.is_ptr());
    assert_eq!(constant_value(rhs.as_deref().unwrap()), 8);
}

#[test]
fn pointer_difference_is_int_and_sum_is_rejected() {
    let sess = session();
    let mut tab = SymbolTable::new();
    let ptr = TypeInfo::with_flags(
        TypeFlags::new(BaseType::Int).with_indirection(1),
    );
    tab.add("p", Some(ptr.clone()));
    tab.add("q", Some(ptr));

    let p =
        ast::create_leaf(LeafKind::Identifier, "p", &sess, &mut tab).unwrap();
    let q =
        ast::create_leaf(LeafKind::Identifier, "q", &sess, &mut tab).unwrap();
    let diff = ast::create_expr(ExprOp::Sub, p, Some(q), &sess).unwrap();
    assert_eq!(diff.ty().flags.base(), Some(BaseType::Int));
    assert!(!diff.ty().flags.is_ptr());

    let p =
        ast::create_leaf(LeafKind::Identifier, "p", &sess, &mut tab).unwrap();
    let q =
        ast::create_leaf(LeafKind::Identifier, "q", &sess, &mut tab).unwrap();
    let err = ast::create_expr(ExprOp::Add, p, Some(q), &sess).unwrap_err();
    assert!(err.to_string().contains("incompatible"));
}

#[test]
fn void_pointer_cannot_be_dereferenced() {
    let sess = session();
    let mut tab = SymbolTable::new();
    tab.add(
        "v",
        Some(TypeInfo::with_flags(
            TypeFlags::new(BaseType::Void).with_indirection(1),
        )),
    );
    let v =
        ast::create_leaf(LeafKind::Identifier, "v", &sess, &mut tab).unwrap();
    let err =
        ast::create_expr(ExprOp::Dereference, v, None, &sess).unwrap_err();
    assert!(err.to_string().contains("incompatible"));
}

#[test]
fn unreachable_code_after_return_warns() {
    let sess = session();
    let mut tab = SymbolTable::new();
    let ret = GraphNode::ret(Some(constant("0", &sess, &mut tab)));
    let stmt = GraphNode::statement(constant("1", &sess, &mut tab));
    let graph = asg::append(None, ret, &sess);
    assert_eq!(sess.warning_count(), 0);
    asg::append(Some(graph), stmt, &sess);
    assert_eq!(sess.warning_count(), 1);
}

#[test]
fn frame_layout_aligns_and_skips_unused() {
    let sess = session();
    let mut locals = LocalVars::new();
    locals.add("c", TypeInfo::new(BaseType::Char));
    locals.add("n", TypeInfo::new(BaseType::Int));
    locals.add("dead", TypeInfo::new(BaseType::Int));
    locals.mark_used("c");
    locals.mark_used("n");

    let frame = crate::local::layout_frame(&mut locals, &sess, "f");
    assert_eq!(frame, 8);
    assert_eq!(frame % 4, 0);
    assert_eq!(locals.find("c").unwrap().offset, 1);
    assert_eq!(locals.find("n").unwrap().offset, 8);
    // Offsets are aligned to the variable's own size.
    for local in locals.iter() {
        let size = local.ty.size() as i32;
        if size > 0 && local.offset > 0 {
            assert_eq!(local.offset % size, 0);
        }
    }
    assert_eq!(locals.find("dead").unwrap().offset, 0);
    assert_eq!(sess.warning_count(), 1);
}

// End-to-end: compile snippets and inspect the emitted assembly.

fn compile_ok(source: &str) -> (String, usize) {
    let sess = session();
    let sections = crate::compile(source, &sess).unwrap();
    (sections.render(), sess.warning_count())
}

fn compile_err(source: &str) -> String {
    let sess = session();
    crate::compile(source, &sess).unwrap_err().to_string()
}

#[test]
fn return_constant() {
    let (asm, warnings) = compile_ok("int main(void) { return 0; }");
    assert_eq!(
        asm,
        ".section .text\n\
         \nmain:\n\
         \tpush %ebp\n\
         \tmovl %esp, %ebp\n\
         \tmovl $0, %eax\n\
         \tpop %ebp\n\
         \tret\n"
    );
    assert_eq!(warnings, 0);
}

#[test]
fn folded_assignment_and_unused_warning() {
    let (asm, warnings) =
        compile_ok("int f(void) { int a, b; a = 2 + 3; return a; }");
    assert_eq!(
        asm,
        ".section .text\n\
         \nf:\n\
         \tpush %ebp\n\
         \tmovl %esp, %ebp\n\
         \tsubl $4, %esp\n\
         \tmovl $5, -4(%ebp)\n\
         \tmovl -4(%ebp), %eax\n\
         \taddl $4, %esp\n\
         \tpop %ebp\n\
         \tret\n"
    );
    assert_eq!(warnings, 1);
}

#[test]
fn dereference_of_parameter() {
    let (asm, _) = compile_ok("int g(int *p) { return *p; }");
    assert_eq!(
        asm,
        ".section .text\n\
         \ng:\n\
         \tpush %ebp\n\
         \tmovl %esp, %ebp\n\
         \tmovl 8(%ebp), %eax\n\
         \tmovl (%eax), %eax\n\
         \tpop %ebp\n\
         \tret\n"
    );
}

#[test]
fn conditional_with_else() {
    let (asm, _) =
        compile_ok("int h(int x) { if (x < 0) return -1; else return 1; }");
    assert_eq!(
        asm,
        ".section .text\n\
         \nh:\n\
         \tpush %ebp\n\
         \tmovl %esp, %ebp\n\
         \tmovl 8(%ebp), %eax\n\
         \tcmpl $0, %eax\n\
         \tjge .L0\n\
         \tmovl $-1, %eax\n\
         \tpop %ebp\n\
         \tret\n\
         \tjmp .L1\n\
         .L0:\n\
         \tmovl $1, %eax\n\
         \tpop %ebp\n\
         \tret\n\
         .L1:\n\
         \tpop %ebp\n\
         \tret\n"
    );
}

#[test]
fn for_loop_shape() {
    let (asm, _) = compile_ok(
        "int l(void) {\n\
         \tint i, s;\n\
         \ts = 0;\n\
         \tfor (i = 0; i < 10; i = i + 1)\n\
         \t\ts = s + i;\n\
         \treturn s;\n\
         }\n",
    );
    assert_eq!(
        asm,
        ".section .text\n\
         \nl:\n\
         \tpush %ebp\n\
         \tmovl %esp, %ebp\n\
         \tsubl $8, %esp\n\
         \tmovl $0, -8(%ebp)\n\
         \tmovl $0, -4(%ebp)\n\
         .L0:\n\
         \tmovl -4(%ebp), %eax\n\
         \tcmpl $10, %eax\n\
         \tjge .L1\n\
         \tmovl -8(%ebp), %eax\n\
         \tmovl -4(%ebp), %edx\n\
         \taddl %edx, %eax\n\
         \tmovl %eax, -8(%ebp)\n\
         \tmovl -4(%ebp), %eax\n\
         \taddl $1, %eax\n\
         \tmovl %eax, -4(%ebp)\n\
         \tjmp .L0\n\
         .L1:\n\
         \tmovl -8(%ebp), %eax\n\
         \taddl $8, %esp\n\
         \tpop %ebp\n\
         \tret\n"
    );
}

#[test]
fn while_loop_tests_on_entry_and_at_the_bottom() {
    let (asm, _) =
        compile_ok("int w(int n) { while (n > 0) n = n - 1; return n; }");
    // Rotated loop: inverse jump past the body, forward jump back.
    assert!(asm.contains("\tjle .L0\n.L1:\n"));
    assert!(asm.contains("\tjg .L1\n.L0:\n"));
}

#[test]
fn do_while_jumps_back_on_true() {
    let (asm, _) =
        compile_ok("int d(int n) { do n = n - 1; while (n > 0); return n; }");
    assert!(asm.contains(".L0:\n"));
    assert!(asm.contains("\tjg .L0\n"));
}

#[test]
fn call_pushes_arguments_in_reverse_order() {
    let (asm, _) = compile_ok(
        "int add(int a, int b);\n\
         int main(void) { return add(1, 2); }\n",
    );
    assert!(asm.contains(
        "\tpush $2\n\
         \tpush $1\n\
         \tcall add\n\
         \taddl $8, %esp\n"
    ));
}

#[test]
fn store_through_pointer() {
    let (asm, _) = compile_ok("int s(int *p) { *p = 7; return 0; }");
    assert!(asm.contains(
        "\tmovl 8(%ebp), %eax\n\
         \tmovl $7, (%eax)\n"
    ));
}

#[test]
fn string_literal_lands_in_the_data_section() {
    let (asm, _) = compile_ok(
        "int f(char *p) {\n\
         \tp = \"hello\";\n\
         \treturn 0;\n\
         }\n",
    );
    assert!(asm.contains("\tmovl $.L0, 8(%ebp)\n"));
    assert!(asm.contains(".section .data\n.L0:\n\t.string \"hello\"\n"));
}

#[test]
fn duplicate_string_literals_share_a_label() {
    let (asm, _) =
        compile_ok("int f(char *p) { p = \"x\"; p = \"x\"; return 0; }");
    assert_eq!(asm.matches(".string \"x\"").count(), 1);
}

#[test]
fn struct_member_offsets_reach_the_frame() {
    let (asm, _) = compile_ok(
        "struct point { int x; int y; };\n\
         int f(void) {\n\
         \tstruct point p;\n\
         \tp.x = 3;\n\
         \tp.y = 4;\n\
         \treturn p.y;\n\
         }\n",
    );
    // p occupies 8 bytes; x at the low address, y four above it.
    assert!(asm.contains("\tmovl $3, -8(%ebp)\n"));
    assert!(asm.contains("\tmovl $4, -4(%ebp)\n"));
    assert!(asm.contains("\tmovl -4(%ebp), %eax\n"));
}

#[test]
fn labels_stay_unique_across_functions() {
    let (asm, _) = compile_ok(
        "int a(int x) { if (x) return 1; return 0; }\n\
         int b(int x) { if (x) return 2; return 0; }\n",
    );
    assert!(asm.contains("jz .L0"));
    assert!(asm.contains("jz .L1"));
}

#[test]
fn char_variables_use_byte_moves() {
    let (asm, _) = compile_ok("int f(void) { char c; c = 7; return c; }");
    assert!(asm.contains("\tmovb $7, -1(%ebp)\n"));
}

#[test]
fn division_uses_cdq_and_ecx() {
    let (asm, _) = compile_ok("int f(int a, int b) { return a / b; }");
    assert!(asm.contains(
        "\tcdq\n\
         \tmovl 12(%ebp), %ecx\n\
         \tdiv %ecx\n"
    ));
}

#[test]
fn modulo_returns_the_remainder_register() {
    let (asm, _) = compile_ok("int f(int a, int b) { return a % b; }");
    assert!(asm.contains("\tdiv %ecx\n\tpush %edx\n"));
}

#[test]
fn shift_by_variable_goes_through_cl() {
    let (asm, _) = compile_ok("int f(int a, int n) { return a << n; }");
    assert!(asm.contains("\tshll %cl, %eax\n"));
}

#[test]
fn signed_right_shift_is_arithmetic() {
    let (asm, _) = compile_ok("int f(int a) { return a >> 2; }");
    assert!(asm.contains("\tsarl $2, %eax\n"));

    let (asm, _) = compile_ok("int f(unsigned a) { return a >> 2; }");
    assert!(asm.contains("\tshrl $2, %eax\n"));
}

#[test]
fn address_of_local_uses_lea() {
    let (asm, _) =
        compile_ok("int f(void) { int a, *p; a = 1; p = &a; return *p; }");
    assert!(asm.contains("\tleal -4(%ebp), %eax\n"));
}

#[test]
fn void_declaration_is_rejected() {
    let err = compile_err("int f(void) { void v; return 0; }");
    assert!(err.contains("declared as type `void'"));
    assert!(err.contains("test.c"));
}

#[test]
fn undeclared_use_is_rejected_with_location() {
    let err = compile_err("int f(void) {\n\treturn x;\n}\n");
    assert!(err.contains("undeclared identifier `x'"));
    assert!(err.contains("line 2"));
}

#[test]
fn duplicate_local_is_rejected() {
    let err = compile_err("int f(void) { int a; int a; return 0; }");
    assert!(err.contains("already been declared"));
}

#[test]
fn arrow_access_is_reported_as_an_error() {
    let err = compile_err(
        "struct s { int x; };\n\
         int f(struct s *p) { return p->x; }\n",
    );
    assert!(err.contains("`->'"));
}

#[test]
fn unknown_member_is_rejected() {
    let err = compile_err(
        "struct s { int x; };\n\
         int f(void) { struct s v; return v.nope; }\n",
    );
    assert!(err.contains("has no member `nope'"));
}

#[test]
fn struct_redefinition_is_rejected_end_to_end() {
    let err = compile_err("struct s { int x; };\nstruct s { int y; };\n");
    assert!(err.contains("redefinition of struct `s'"));
}

#[test]
fn undefined_struct_is_rejected() {
    let err = compile_err("int f(void) { struct nope v; return 0; }");
    assert!(err.contains("struct `nope' undefined"));
}

#[test]
fn unreachable_code_warns_but_compiles() {
    let (_, warnings) = compile_ok("int f(void) { return 0; return 1; }");
    assert_eq!(warnings, 1);
}

#[test]
fn incompatible_pointer_assignment_warns() {
    let (_, warnings) =
        compile_ok("int f(int *p, char *q) { p = q; return 0; }");
    assert_eq!(warnings, 1);
}

#[test]
fn void_pointer_assignment_is_silent() {
    let (_, warnings) =
        compile_ok("int f(void *p, char *q) { p = q; return 0; }");
    assert_eq!(warnings, 0);
}

#[test]
fn pointer_integer_mix_warns() {
    let (_, warnings) =
        compile_ok("int f(int *p, int n) { if (p == n) return 1; return 0; }");
    assert_eq!(warnings, 1);
}

#[test]
fn cast_silences_pointer_conversion() {
    let (_, warnings) =
        compile_ok("int f(int *p, char *q) { p = (int *) q; return 0; }");
    assert_eq!(warnings, 0);
}

#[test]
fn comma_expression_keeps_the_right_value() {
    let (asm, _) = compile_ok("int f(int a) { return (a = 1, 2); }");
    assert!(asm.contains("\tmovl $1, 8(%ebp)\n"));
    assert!(asm.contains("\tmovl $2, %eax\n"));
}

#[test]
fn logical_and_normalizes_both_operands() {
    let (asm, _) = compile_ok("int f(int a, int b) { return a && b; }");
    assert!(asm.contains("\tsetne %al\n"));
    assert!(asm.contains("\tsetne %cl\n"));
    assert!(asm.contains("\tandl %ecx, %eax\n"));
}

#[test]
fn condition_on_a_plain_variable_emits_test() {
    let (asm, _) = compile_ok("int f(int x) { if (x) return 1; return 0; }");
    assert!(asm.contains("\ttest %eax, %eax\n\tjz .L0\n"));
}

#[test]
fn nested_conditionals_allocate_matched_labels() {
    let (asm, _) = compile_ok(
        "int f(int x) {\n\
         \tif (x > 0) {\n\
         \t\tif (x > 10)\n\
         \t\t\treturn 2;\n\
         \t\treturn 1;\n\
         \t}\n\
         \treturn 0;\n\
         }\n",
    );
    // Every referenced label is also placed.
    for label in ["\tjle .L0\n", "\tjle .L1\n", ".L0:\n", ".L1:\n"] {
        assert!(asm.contains(label), "missing {label:?} in:\n{asm}");
    }
}
