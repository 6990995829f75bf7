use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use anyhow::Result;
use num_enum::TryFromPrimitive;

use crate::errors::Session;

/// Base type tag stored in the low bits of a [`TypeFlags`] word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum BaseType {
    Int = 1,
    Char = 2,
    Void = 3,
    StrLit = 4,
    Struct = 5,
}

/// Packed type descriptor.
///
/// The word is laid out as `PPPPPPPPxxxxxxxUxxxxxxxFxxxxTTTT`:
/// bits 0-3 hold the base type tag, bit 8 the function property,
/// bit 16 the unsigned qualifier and bits 24-31 the level of pointer
/// indirection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TypeFlags(u32);

const BASE_MASK: u32 = 0xF;
const PROPERTY_FUNC: u32 = 1 << 8;
const QUAL_UNSIGNED: u32 = 1 << 16;
const INDIRECTION_SHIFT: u32 = 24;
const INDIRECTION_MASK: u32 = 0xFF00_0000;

impl TypeFlags {
    pub fn new(base: BaseType) -> Self {
        TypeFlags(base as u32)
    }

    pub fn from_raw(raw: u32) -> Self {
        TypeFlags(raw)
    }

    pub fn into_raw(self) -> u32 {
        self.0
    }

    pub fn base(self) -> Option<BaseType> {
        BaseType::try_from(self.0 & BASE_MASK).ok()
    }

    pub fn with_base(self, base: BaseType) -> Self {
        TypeFlags((self.0 & !BASE_MASK) | base as u32)
    }

    pub fn has_base(self) -> bool {
        self.0 & BASE_MASK != 0
    }

    pub fn is_integer(self) -> bool {
        matches!(self.base(), Some(BaseType::Int) | Some(BaseType::Char))
    }

    pub fn is_ptr(self) -> bool {
        self.0 & INDIRECTION_MASK != 0
    }

    pub fn is_func(self) -> bool {
        self.0 & PROPERTY_FUNC != 0
    }

    pub fn with_func(self) -> Self {
        TypeFlags(self.0 | PROPERTY_FUNC)
    }

    pub fn without_func(self) -> Self {
        TypeFlags(self.0 & !PROPERTY_FUNC)
    }

    pub fn is_unsigned(self) -> bool {
        self.0 & QUAL_UNSIGNED != 0
    }

    pub fn with_unsigned(self) -> Self {
        TypeFlags(self.0 | QUAL_UNSIGNED)
    }

    pub fn unsigned_bit(self) -> u32 {
        self.0 & QUAL_UNSIGNED
    }

    pub fn indirection(self) -> u32 {
        self.0 >> INDIRECTION_SHIFT
    }

    pub fn with_indirection(self, level: u32) -> Self {
        TypeFlags((self.0 & !INDIRECTION_MASK) | (level << INDIRECTION_SHIFT))
    }

    /// Type of an address-of expression: one more level of indirection.
    pub fn reference(self) -> Self {
        self.with_indirection(self.indirection() + 1)
    }

    /// Type of a dereference expression: one less level of indirection.
    pub fn dereference(self) -> Self {
        self.with_indirection(self.indirection() - 1)
    }
}

/// Conversion in an operation between two integer types. The less
/// precise type converts to the more precise one; the unsigned
/// qualifiers of both operands are carried into the result.
pub fn integer_convert(lhs: TypeFlags, rhs: TypeFlags) -> TypeFlags {
    let merged_unsigned = lhs.unsigned_bit() | rhs.unsigned_bit();
    let base = match (lhs.base(), rhs.base()) {
        (Some(BaseType::Char), Some(BaseType::Char)) => BaseType::Char,
        _ => BaseType::Int,
    };
    TypeFlags::from_raw(TypeFlags::new(base).into_raw() | merged_unsigned)
}

/// Full type of an expression or variable: the packed flags plus the
/// struct descriptor when the base tag is [`BaseType::Struct`].
#[derive(Debug, Clone, Default)]
pub struct TypeInfo {
    pub flags: TypeFlags,
    pub def: Option<Rc<StructDef>>,
}

impl TypeInfo {
    pub fn new(base: BaseType) -> Self {
        TypeInfo {
            flags: TypeFlags::new(base),
            def: None,
        }
    }

    pub fn int() -> Self {
        TypeInfo::new(BaseType::Int)
    }

    pub fn with_flags(flags: TypeFlags) -> Self {
        TypeInfo { flags, def: None }
    }

    /// Size in bytes. Pointers of any base are 4 bytes; `void` and
    /// string literals have no size at the declaration level.
    pub fn size(&self) -> usize {
        if self.flags.is_ptr() {
            return 4;
        }
        match self.flags.base() {
            Some(BaseType::Int) => 4,
            Some(BaseType::Char) => 1,
            Some(BaseType::Struct) => {
                self.def.as_ref().map(|d| d.size).unwrap_or(0)
            }
            _ => 0,
        }
    }

    /// Size of the type this pointer points to, used to scale additive
    /// pointer arithmetic.
    pub fn pointee_size(&self) -> usize {
        TypeInfo {
            flags: self.flags.dereference(),
            def: self.def.clone(),
        }
        .size()
    }

    pub fn is_void_ptr(&self) -> bool {
        self.flags.base() == Some(BaseType::Void)
            && self.flags.indirection() == 1
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flags.is_unsigned() {
            write!(f, "unsigned ")?;
        }
        match self.flags.base() {
            Some(BaseType::Int) => write!(f, "int")?,
            Some(BaseType::Char) => write!(f, "char")?,
            Some(BaseType::Void) => write!(f, "void")?,
            Some(BaseType::StrLit) => write!(f, "const char[]")?,
            Some(BaseType::Struct) => {
                let name =
                    self.def.as_ref().map(|d| d.name.as_str()).unwrap_or("?");
                write!(f, "struct {name}")?;
            }
            None => write!(f, "int")?,
        }
        let ind = self.flags.indirection();
        if ind > 0 {
            write!(f, " ")?;
            for _ in 0..ind {
                write!(f, "*")?;
            }
        }
        Ok(())
    }
}

pub(crate) fn align_to(value: usize, align: usize) -> usize {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

#[derive(Debug, Clone)]
pub struct StructMember {
    pub name: String,
    pub ty: TypeInfo,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub size: usize,
    pub members: Vec<StructMember>,
}

impl StructDef {
    pub fn member(&self, name: &str) -> Option<&StructMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// Registry of struct definitions for the translation unit. Names are
/// unique; redefinition is an error.
#[derive(Debug, Default)]
pub struct StructTable {
    defs: HashMap<String, Rc<StructDef>>,
}

impl StructTable {
    pub fn new() -> Self {
        StructTable::default()
    }

    /// Lay out `members` and register the definition. Each member is
    /// aligned to its own size before placement.
    pub fn define(
        &mut self,
        sess: &Session,
        name: &str,
        members: Vec<(String, TypeInfo)>,
    ) -> Result<Rc<StructDef>> {
        if self.defs.contains_key(name) {
            return Err(sess.error(format!("redefinition of struct `{name}'")));
        }

        let mut laid_out = Vec::with_capacity(members.len());
        let mut size = 0usize;
        for (member_name, ty) in members {
            let member_size = ty.size();
            size = align_to(size, member_size);
            laid_out.push(StructMember {
                name: member_name,
                ty,
                offset: size,
            });
            size += member_size;
        }

        let def = Rc::new(StructDef {
            name: name.to_owned(),
            size,
            members: laid_out,
        });
        self.defs.insert(name.to_owned(), Rc::clone(&def));
        Ok(def)
    }

    pub fn find(&self, name: &str) -> Option<Rc<StructDef>> {
        self.defs.get(name).cloned()
    }
}
