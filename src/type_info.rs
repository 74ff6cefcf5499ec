use crate::config::Config;
use llvm_ir::types::{FPType, NamedStructDef};
use llvm_ir::{Constant, Module, Operand, Type};

/// Scalar classification of a value as the runtime ABI sees it.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub(crate) enum ScalarKind {
    Pointer,
    /// Integer, with its bit width
    Integer(u32),
    Float,
}

pub(crate) fn scalar_kind(ty: &Type) -> Option<ScalarKind> {
    match ty {
        Type::PointerType { .. } => Some(ScalarKind::Pointer),
        Type::IntegerType { bits } => Some(ScalarKind::Integer(*bits)),
        Type::FPType(_) => Some(ScalarKind::Float),
        _ => None,
    }
}

/// Classify an operand without consulting the module type context: local
/// operands carry their type, and the constants we care about determine
/// theirs.
pub(crate) fn operand_kind(op: &Operand) -> Option<ScalarKind> {
    match op {
        Operand::LocalOperand { ty, .. } => scalar_kind(ty),
        Operand::ConstantOperand(c) => constant_kind(c),
        Operand::MetadataOperand => None,
    }
}

fn constant_kind(c: &Constant) -> Option<ScalarKind> {
    match c {
        Constant::Int { bits, .. } => Some(ScalarKind::Integer(*bits)),
        Constant::Float(_) => Some(ScalarKind::Float),
        Constant::Null(ty) | Constant::AggregateZero(ty) | Constant::Undef(ty) => scalar_kind(ty),
        Constant::GlobalReference { .. } => Some(ScalarKind::Pointer),
        Constant::GetElementPtr(_) | Constant::IntToPtr(_) => Some(ScalarKind::Pointer),
        Constant::BitCast(bc) => scalar_kind(&bc.to_type),
        Constant::PtrToInt(pti) => scalar_kind(&pti.to_type),
        _ => None,
    }
}

/// The scalar kind a load through `op` would produce.
pub(crate) fn pointee_kind(op: &Operand) -> Option<ScalarKind> {
    match op {
        Operand::LocalOperand { ty, .. } => match ty.as_ref() {
            Type::PointerType { pointee_type, .. } => scalar_kind(pointee_type),
            _ => None,
        },
        Operand::ConstantOperand(c) => match c.as_ref() {
            Constant::GlobalReference { ty, .. } => scalar_kind(ty),
            _ => None,
        },
        Operand::MetadataOperand => None,
    }
}

/// Is this a struct-like type, either literal or named?
pub(crate) fn is_aggregate(ty: &Type) -> bool {
    matches!(ty, Type::StructType { .. } | Type::NamedStructType { .. })
}

/// The name of a named aggregate type, if any.
pub(crate) fn aggregate_name(ty: &Type) -> Option<&str> {
    match ty {
        Type::NamedStructType { name } => Some(name.as_str()),
        _ => None,
    }
}

/// Allocation size in bytes of `ty`, as far as it can be recovered from the
/// type alone. Struct sizes are the sum of member sizes; alignment padding
/// is not modeled, since sizes only gate instrumentation decisions here.
/// `None` means the size is not resolvable and the site should be skipped.
pub(crate) fn alloc_size_bytes(ty: &Type, module: &Module, config: &Config) -> Option<u64> {
    match ty {
        Type::IntegerType { bits } => Some((*bits as u64 + 7) / 8),
        Type::PointerType { .. } => Some(config.pointer_size_bytes),
        Type::FPType(fpt) => fp_size_bytes(*fpt),
        Type::ArrayType { element_type, num_elements }
        | Type::VectorType { element_type, num_elements } => {
            alloc_size_bytes(element_type, module, config).map(|s| s * (*num_elements as u64))
        },
        Type::StructType { element_types, .. } => element_types
            .iter()
            .map(|t| alloc_size_bytes(t, module, config))
            .sum::<Option<u64>>(),
        Type::NamedStructType { name } => match module.types.named_struct_def(name) {
            Some(NamedStructDef::Defined(ty)) => alloc_size_bytes(ty, module, config),
            Some(NamedStructDef::Opaque) | None => None,
        },
        _ => None,
    }
}

fn fp_size_bytes(fpt: FPType) -> Option<u64> {
    match fpt {
        FPType::Half => Some(2),
        FPType::Single => Some(4),
        FPType::Double => Some(8),
        FPType::FP128 | FPType::X86_FP80 | FPType::PPC_FP128 => Some(16),
        _ => None,
    }
}

/// Allocation size of the region behind a pointer operand. Function
/// pointees have no allocation size.
pub(crate) fn pointee_alloc_size(op: &Operand, module: &Module, config: &Config) -> Option<u64> {
    let pointee = match op {
        Operand::LocalOperand { ty, .. } => match ty.as_ref() {
            Type::PointerType { pointee_type, .. } => pointee_type.clone(),
            _ => return None,
        },
        Operand::ConstantOperand(c) => match c.as_ref() {
            Constant::GlobalReference { ty, .. } => ty.clone(),
            _ => return None,
        },
        Operand::MetadataOperand => return None,
    };
    match pointee.as_ref() {
        Type::FuncType { .. } => None,
        ty => alloc_size_bytes(ty, module, config),
    }
}
