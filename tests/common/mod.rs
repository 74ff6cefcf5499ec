// IR builders shared by the integration tests. Modules are constructed by
// hand rather than parsed from bitcode, so the tests run without a compiled
// fixture corpus.
#![allow(dead_code)]

use either::Either;
use llvm_ir::debugloc::DebugLoc;
use llvm_ir::function::{CallingConvention, Parameter, ParameterAttribute};
use llvm_ir::instruction::{Alloca, Call, GetElementPtr, ICmp, Load, Store};
use llvm_ir::predicates::IntPredicate;
use llvm_ir::terminator::{Br, CondBr, Ret};
use llvm_ir::types::Types;
use llvm_ir::{
    BasicBlock, Constant, ConstantRef, Function, Instruction, Module, Name, Operand, Terminator,
    TypeRef,
};

pub fn dbg(line: u32, col: u32, file: &str) -> DebugLoc {
    DebugLoc {
        line,
        col: Some(col),
        filename: file.to_owned(),
        directory: None,
    }
}

pub fn func_dbg(line: u32, file: &str) -> DebugLoc {
    DebugLoc {
        line,
        col: None,
        filename: file.to_owned(),
        directory: None,
    }
}

pub fn param(name: &str, ty: TypeRef) -> Parameter {
    Parameter {
        name: Name::from(name),
        ty,
        attributes: vec![],
    }
}

pub fn sret_param(name: &str, ty: TypeRef) -> Parameter {
    Parameter {
        name: Name::from(name),
        ty,
        attributes: vec![ParameterAttribute::SRet],
    }
}

pub fn function(
    name: &str,
    parameters: Vec<Parameter>,
    blocks: Vec<BasicBlock>,
    debugloc: Option<DebugLoc>,
) -> Function {
    let mut f = Function::new(name);
    f.parameters = parameters;
    f.basic_blocks = blocks;
    f.debugloc = debugloc;
    f
}

pub fn module(types: Types, functions: Vec<Function>) -> Module {
    Module {
        name: "test".into(),
        source_file_name: String::new(),
        data_layout: Default::default(),
        target_triple: None,
        functions,
        global_vars: vec![],
        global_aliases: vec![],
        types,
    }
}

pub fn block(name: &str, instrs: Vec<Instruction>, term: Terminator) -> BasicBlock {
    BasicBlock {
        name: Name::from(name),
        instrs,
        term,
    }
}

pub fn local(name: &str, ty: TypeRef) -> Operand {
    Operand::LocalOperand {
        name: Name::from(name),
        ty,
    }
}

pub fn const_int(bits: u32, value: u64) -> Operand {
    Operand::ConstantOperand(ConstantRef::new(Constant::Int { bits, value }))
}

pub fn load(dest: &str, address: Operand, debugloc: Option<DebugLoc>) -> Instruction {
    Instruction::Load(Load {
        address,
        dest: Name::from(dest),
        volatile: false,
        atomicity: None,
        alignment: 1,
        debugloc,
    })
}

pub fn store(address: Operand, value: Operand, debugloc: Option<DebugLoc>) -> Instruction {
    Instruction::Store(Store {
        address,
        value,
        volatile: false,
        atomicity: None,
        alignment: 1,
        debugloc,
    })
}

pub fn alloca(dest: &str, allocated_type: TypeRef, debugloc: Option<DebugLoc>) -> Instruction {
    Instruction::Alloca(Alloca {
        allocated_type,
        num_elements: const_int(32, 1),
        dest: Name::from(dest),
        alignment: 4,
        debugloc,
    })
}

pub fn gep(
    dest: &str,
    address: Operand,
    indices: Vec<Operand>,
    debugloc: Option<DebugLoc>,
) -> Instruction {
    Instruction::GetElementPtr(GetElementPtr {
        address,
        indices,
        dest: Name::from(dest),
        in_bounds: false,
        debugloc,
    })
}

pub fn icmp(dest: &str, operand0: Operand, operand1: Operand, debugloc: Option<DebugLoc>) -> Instruction {
    Instruction::ICmp(ICmp {
        predicate: IntPredicate::NE,
        operand0,
        operand1,
        dest: Name::from(dest),
        debugloc,
    })
}

pub fn call(
    dest: Option<&str>,
    callee_name: &str,
    callee_ty: TypeRef,
    arguments: Vec<Operand>,
    debugloc: Option<DebugLoc>,
) -> Instruction {
    Instruction::Call(Call {
        function: Either::Right(Operand::ConstantOperand(ConstantRef::new(
            Constant::GlobalReference {
                name: Name::from(callee_name),
                ty: callee_ty,
            },
        ))),
        arguments: arguments.into_iter().map(|op| (op, vec![])).collect(),
        return_attributes: vec![],
        dest: dest.map(Name::from),
        function_attributes: vec![],
        is_tail_call: false,
        calling_convention: CallingConvention::C,
        debugloc,
    })
}

pub fn ret_void(debugloc: Option<DebugLoc>) -> Terminator {
    Terminator::Ret(Ret {
        return_operand: None,
        debugloc,
    })
}

pub fn ret(op: Operand, debugloc: Option<DebugLoc>) -> Terminator {
    Terminator::Ret(Ret {
        return_operand: Some(op),
        debugloc,
    })
}

pub fn br(dest: &str, debugloc: Option<DebugLoc>) -> Terminator {
    Terminator::Br(Br {
        dest: Name::from(dest),
        debugloc,
    })
}

pub fn condbr(condition: Operand, true_dest: &str, false_dest: &str, debugloc: Option<DebugLoc>) -> Terminator {
    Terminator::CondBr(CondBr {
        condition,
        true_dest: Name::from(true_dest),
        false_dest: Name::from(false_dest),
        debugloc,
    })
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
