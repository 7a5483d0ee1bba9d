//! Function builder.
//!
//! A [`FunctionBuilder`] is the supported way for an embedder to construct
//! IR: it tracks which blocks exist, which are sealed and filled, and checks
//! at `finalize()` time that the function is structurally complete. SSA form
//! is explicit: the producer passes values between blocks as block
//! parameters and branch arguments.

use crate::cursor::{Cursor, CursorPosition, FuncCursor};
use crate::entity::SecondaryMap;
use crate::ir::{Block, Function, Inst, InstBuilderBase, InstructionData, Type, Value};

/// Temporary state describing a block during construction.
#[derive(Clone, Default)]
struct BlockStatus {
    /// The block has been created with `create_block`.
    created: bool,
    /// The block's predecessor set is final: no branch to it will be added.
    sealed: bool,
    /// The block ends in a terminator.
    filled: bool,
}

/// Builder that constructs a [`Function`] one instruction at a time.
pub struct FunctionBuilder<'a> {
    /// The function currently being built.
    pub func: &'a mut Function,
    position: CursorPosition,
    status: SecondaryMap<Block, BlockStatus>,
}

impl<'a> FunctionBuilder<'a> {
    /// Create a builder adding to `func`. The function's signature must
    /// already be set.
    pub fn new(func: &'a mut Function) -> Self {
        Self {
            func,
            position: CursorPosition::Nowhere,
            status: SecondaryMap::new(),
        }
    }

    /// Create a new block. The block is not reachable until a branch targets
    /// it or it becomes the entry by being the first laid out.
    pub fn create_block(&mut self) -> Block {
        let block = self.func.dfg.make_block();
        self.status[block].created = true;
        block
    }

    /// Append a typed parameter to `block`, returning the parameter value.
    pub fn append_block_param(&mut self, block: Block, ty: Type) -> Value {
        debug_assert!(
            !self.status[block].sealed,
            "cannot add parameters to a sealed block"
        );
        self.func.dfg.append_block_param(block, ty)
    }

    /// Position the builder at the end of `block`; subsequent instructions
    /// are appended there. Lays the block out if it is not yet inserted.
    pub fn switch_to_block(&mut self, block: Block) {
        debug_assert!(self.status[block].created, "unknown block");
        debug_assert!(
            !self.status[block].filled,
            "cannot switch to a filled block"
        );
        if !self.func.layout.is_block_inserted(block) {
            self.func.layout.append_block(block);
        }
        self.position = CursorPosition::After(block);
    }

    /// Declare that the predecessor set of `block` is final.
    ///
    /// Branches to a sealed block from blocks filled later are a programming
    /// error caught by `finalize`.
    pub fn seal_block(&mut self, block: Block) {
        debug_assert!(self.status[block].created, "unknown block");
        self.status[block].sealed = true;
    }

    /// Seal every created block at once; convenient when the whole CFG shape
    /// is known up front.
    pub fn seal_all_blocks(&mut self) {
        for block in self.func.dfg.blocks.keys() {
            self.status[block].sealed = true;
        }
    }

    /// The block currently being filled.
    pub fn current_block(&self) -> Option<Block> {
        match self.position {
            CursorPosition::After(block) => Some(block),
            _ => None,
        }
    }

    /// Get an instruction builder inserting at the current position.
    pub fn ins(&mut self) -> FuncBuilderInst<'_, 'a> {
        debug_assert!(
            self.current_block().is_some(),
            "must call switch_to_block before inserting instructions"
        );
        FuncBuilderInst { builder: self }
    }

    /// Check that the function is complete: every created block is inserted,
    /// sealed, and ends in exactly one terminator.
    ///
    /// # Panics
    ///
    /// Panics when a block is unsealed, unfilled, or not laid out. Run the
    /// verifier afterwards for the deeper SSA and typing invariants.
    pub fn finalize(self) {
        for block in self.func.dfg.blocks.keys() {
            let status = &self.status[block];
            if !status.created {
                continue;
            }
            assert!(
                self.func.layout.is_block_inserted(block),
                "{block} was created but never inserted in the layout"
            );
            assert!(status.sealed, "{block} is not sealed");
            assert!(status.filled, "{block} is not filled with a terminator");
        }
    }
}

/// The instruction builder for [`FunctionBuilder`]; appends at the current
/// block and tracks when the block is terminated.
pub struct FuncBuilderInst<'short, 'long: 'short> {
    builder: &'short mut FunctionBuilder<'long>,
}

impl<'short, 'long> InstBuilderBase<'short> for FuncBuilderInst<'short, 'long> {
    fn data_flow_graph(&self) -> &crate::ir::DataFlowGraph {
        &self.builder.func.dfg
    }

    fn data_flow_graph_mut(&mut self) -> &mut crate::ir::DataFlowGraph {
        &mut self.builder.func.dfg
    }

    fn build(
        self,
        data: InstructionData,
        ctrl_typevar: Type,
    ) -> (Inst, &'short mut crate::ir::DataFlowGraph) {
        let block = self
            .builder
            .current_block()
            .expect("not positioned at a block");
        debug_assert!(
            !self.builder.status[block].filled,
            "cannot add instructions after the terminator of {block}"
        );
        if data.opcode().is_terminator() {
            self.builder.status[block].filled = true;
        }
        let mut cursor = FuncCursor::new(self.builder.func).at_position(self.builder.position);
        let inst = cursor.func.dfg.make_inst(data);
        cursor.func.dfg.make_inst_results(inst, ctrl_typevar);
        cursor.insert_inst(inst);
        (inst, &mut self.builder.func.dfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::condcodes::IntCC;
    use crate::ir::types::I32;
    use crate::ir::{AbiParam, InstBuilder, Signature};
    use crate::isa::CallConv;

    #[test]
    fn build_branching_function() {
        let mut sig = Signature::new(CallConv::SystemV);
        sig.params.push(AbiParam::new(I32));
        sig.returns.push(AbiParam::new(I32));
        let mut func = Function::with_name_signature(Default::default(), sig);

        let mut builder = FunctionBuilder::new(&mut func);
        let entry = builder.create_block();
        let then_block = builder.create_block();
        let else_block = builder.create_block();

        let arg = builder.append_block_param(entry, I32);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let ten = builder.ins().iconst(I32, 10);
        let cond = builder.ins().icmp(IntCC::SignedLessThan, arg, ten);
        builder.ins().brif(cond, then_block, &[], else_block, &[]);

        builder.switch_to_block(then_block);
        builder.seal_block(then_block);
        let one = builder.ins().iconst(I32, 1);
        builder.ins().return_(&[one]);

        builder.switch_to_block(else_block);
        builder.seal_block(else_block);
        let zero = builder.ins().iconst(I32, 0);
        builder.ins().return_(&[zero]);

        builder.finalize();

        assert_eq!(func.layout.blocks().count(), 3);
    }

    #[test]
    #[should_panic(expected = "not sealed")]
    fn unsealed_block_is_caught() {
        let mut func = Function::new();
        let mut builder = FunctionBuilder::new(&mut func);
        let entry = builder.create_block();
        builder.switch_to_block(entry);
        builder.ins().return_(&[]);
        builder.finalize();
    }
}
