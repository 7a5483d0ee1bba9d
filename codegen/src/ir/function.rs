//! Intermediate representation of a function.
//!
//! The `Function` struct defined in this module owns all of its basic blocks
//! and instructions.

use crate::ir::{
    DataFlowGraph, ExternalName, GlobalValue, GlobalValueData, JumpTable, JumpTableData, Layout,
    Signature, StackSlot, StackSlotData, StackSlots,
};
use crate::entity::PrimaryMap;
use crate::isa::CallConv;
use core::fmt;

/// A function.
///
/// Functions can be cloned, but it is not a very fast operation. The clone
/// will have all the same entity numbers as the original.
#[derive(Clone)]
pub struct Function {
    /// Name of this function. Mostly used by `.clif` files.
    pub name: ExternalName,

    /// Signature of this function.
    pub signature: Signature,

    /// Stack slots allocated in this function's frame.
    pub stack_slots: StackSlots,

    /// Global values referenced.
    pub global_values: PrimaryMap<GlobalValue, GlobalValueData>,

    /// Data flow graph containing the primary definition of all instructions,
    /// blocks and values.
    pub dfg: DataFlowGraph,

    /// Layout of blocks and instructions in the function body.
    pub layout: Layout,
}

impl Function {
    /// Create a function with the given name and signature.
    pub fn with_name_signature(name: ExternalName, signature: Signature) -> Self {
        Self {
            name,
            signature,
            stack_slots: StackSlots::new(),
            global_values: PrimaryMap::new(),
            dfg: DataFlowGraph::new(),
            layout: Layout::new(),
        }
    }

    /// Create a new empty, anonymous function with the default calling
    /// convention.
    pub fn new() -> Self {
        Self::with_name_signature(ExternalName::default(), Signature::new(CallConv::SystemV))
    }

    /// Clear all data structures in this function.
    pub fn clear(&mut self) {
        self.name = ExternalName::default();
        self.signature.clear(CallConv::SystemV);
        self.stack_slots.clear();
        self.global_values.clear();
        self.dfg.clear();
        self.layout.clear();
    }

    /// Creates a stack slot in the function, to be used by `stack_load`,
    /// `stack_store` and `stack_addr` instructions.
    pub fn create_stack_slot(&mut self, data: StackSlotData) -> StackSlot {
        self.stack_slots.push(data)
    }

    /// Declares a global value accessible to the function.
    pub fn create_global_value(&mut self, data: GlobalValueData) -> GlobalValue {
        self.global_values.push(data)
    }

    /// Creates a jump table in the function, to be used by `br_table`
    /// instructions.
    pub fn create_jump_table(&mut self, data: JumpTableData) -> JumpTable {
        self.dfg.jump_tables.push(data)
    }

    /// Returns true when the function is empty: no blocks at all.
    pub fn is_empty(&self) -> bool {
        self.layout.entry_block().is_none()
    }
}

impl Default for Function {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "function {}{} {{", self.name, self.signature)?;
        for (ss, data) in self.stack_slots.iter() {
            writeln!(f, "    {ss} = {data}")?;
        }
        for (gv, data) in self.global_values.iter() {
            writeln!(f, "    {gv} = {data}")?;
        }
        for block in self.layout.blocks() {
            write!(f, "{block}")?;
            let params = self.dfg.block_params(block);
            if !params.is_empty() {
                write!(f, "(")?;
                for (i, &param) in params.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{param}: {}", self.dfg.value_type(param))?;
                }
                write!(f, ")")?;
            }
            writeln!(f, ":")?;
            for inst in self.layout.block_insts(block) {
                writeln!(f, "    {}", self.dfg.display_inst(inst))?;
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
