//! Representation of Ingot IR functions.

mod atomic_rmw_op;
mod builder;
pub mod condcodes;
mod constant;
mod dfg;
pub mod entities;
mod extfunc;
mod function;
mod globalvalue;
pub mod immediates;
pub mod instructions;
mod jumptable;
mod layout;
mod memflags;
mod progpoint;
mod stackslot;
mod trapcode;
pub mod types;

pub use self::atomic_rmw_op::AtomicRmwOp;
pub use self::builder::{InstBuilder, InstBuilderBase, ReplaceBuilder};
pub use self::constant::{ConstantData, ConstantPool};
pub use self::dfg::{BlockData, DataFlowGraph, DisplayInst, JumpTables, ValueDef};
pub use self::entities::{
    AnyEntity, Block, Constant, FuncRef, GlobalValue, Inst, JumpTable, SigRef, StackSlot, Value,
};
pub use self::extfunc::{
    AbiParam, ArgumentExtension, ArgumentPurpose, ExtFuncData, ExternalName, LibCall, Signature,
};
pub use self::function::Function;
pub use self::globalvalue::GlobalValueData;
pub use self::instructions::{
    BlockCall, CallInfo, InstructionData, Opcode, ValueList, ValueListPool,
};
pub use self::jumptable::JumpTableData;
pub use self::layout::Layout;
pub use self::memflags::{AliasRegion, MemFlags};
pub use self::progpoint::ProgramPoint;
pub use self::stackslot::{StackSlotData, StackSlotKind, StackSlots};
pub use self::trapcode::TrapCode;
pub use self::types::Type;
