//! Cursor library.
//!
//! This module defines cursor data types that can be used for inserting
//! instructions in an IR function, and for traversing and mutating it one
//! element at a time. Every mid-end pass is written against this interface.

use crate::ir;
use crate::ir::{Block, Function, Inst, InstBuilderBase, InstructionData, Type};

/// The possible positions of a cursor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CursorPosition {
    /// Cursor is not pointing anywhere. No instructions can be inserted.
    Nowhere,
    /// Cursor is pointing at an existing instruction.
    /// New instructions will be inserted *before* the current instruction.
    At(Inst),
    /// Cursor is before the beginning of a block. No instructions can be
    /// inserted. Calling `next_inst()` will move to the first instruction in
    /// the block.
    Before(Block),
    /// Cursor is pointing after the end of a block.
    /// New instructions will be appended to the block.
    After(Block),
}

/// All cursor types implement the `Cursor` trait which provides common
/// navigation operations.
pub trait Cursor {
    /// Get the current cursor position.
    fn position(&self) -> CursorPosition;

    /// Set the current position.
    fn set_position(&mut self, pos: CursorPosition);

    /// Borrow a reference to the function layout that this cursor is
    /// navigating.
    fn layout(&self) -> &ir::Layout;

    /// Borrow a mutable reference to the function layout that this cursor is
    /// navigating.
    fn layout_mut(&mut self) -> &mut ir::Layout;

    /// Rebuild this cursor positioned at `pos`.
    fn at_position(mut self, pos: CursorPosition) -> Self
    where
        Self: Sized,
    {
        self.set_position(pos);
        self
    }

    /// Rebuild this cursor positioned at `inst`.
    fn at_inst(mut self, inst: Inst) -> Self
    where
        Self: Sized,
    {
        self.goto_inst(inst);
        self
    }

    /// Rebuild this cursor positioned at the top of `block`.
    fn at_top(mut self, block: Block) -> Self
    where
        Self: Sized,
    {
        self.goto_top(block);
        self
    }

    /// Rebuild this cursor positioned at the bottom of `block`.
    fn at_bottom(mut self, block: Block) -> Self
    where
        Self: Sized,
    {
        self.goto_bottom(block);
        self
    }

    /// Rebuild this cursor positioned at the first instruction of `block`,
    /// or at the bottom when the block is empty.
    fn at_first_inst(mut self, block: Block) -> Self
    where
        Self: Sized,
    {
        self.goto_first_inst(block);
        self
    }

    /// Get the block corresponding to the current position.
    fn current_block(&self) -> Option<Block> {
        use self::CursorPosition::*;
        match self.position() {
            Nowhere => None,
            At(inst) => self.layout().inst_block(inst),
            Before(block) | After(block) => Some(block),
        }
    }

    /// Get the instruction corresponding to the current position, if any.
    fn current_inst(&self) -> Option<Inst> {
        match self.position() {
            CursorPosition::At(inst) => Some(inst),
            _ => None,
        }
    }

    /// Go to a specific instruction which must be inserted in the layout.
    /// New instructions will be inserted before `inst`.
    fn goto_inst(&mut self, inst: Inst) {
        debug_assert!(self.layout().inst_block(inst).is_some());
        self.set_position(CursorPosition::At(inst));
    }

    /// Go to the position after a specific instruction: at the following
    /// instruction, or at the bottom of the block when `inst` is its last.
    fn goto_after_inst(&mut self, inst: Inst) {
        debug_assert!(self.layout().inst_block(inst).is_some());
        let new_pos = match self.layout().next_inst(inst) {
            Some(next) => CursorPosition::At(next),
            None => CursorPosition::After(
                self.layout()
                    .inst_block(inst)
                    .expect("current instruction removed?"),
            ),
        };
        self.set_position(new_pos);
    }

    /// Go to the top of `block`, which must be inserted into the layout.
    /// At this position, instructions cannot be inserted, but `next_inst()`
    /// will move to the first instruction in the block.
    fn goto_top(&mut self, block: Block) {
        debug_assert!(self.layout().is_block_inserted(block));
        self.set_position(CursorPosition::Before(block));
    }

    /// Go to the bottom of `block`, which must be inserted into the layout.
    /// At this position, inserted instructions will be appended to the
    /// block.
    fn goto_bottom(&mut self, block: Block) {
        debug_assert!(self.layout().is_block_inserted(block));
        self.set_position(CursorPosition::After(block));
    }

    /// Go to the first instruction in `block`, or to the bottom when it is
    /// empty.
    fn goto_first_inst(&mut self, block: Block) {
        match self.layout().first_inst(block) {
            Some(inst) => self.goto_inst(inst),
            None => self.goto_bottom(block),
        }
    }

    /// Go to the first block in layout order, positioned before it.
    /// Returns the block, or `None` if the function has no blocks.
    fn goto_entry_block(&mut self) -> Option<Block> {
        let entry = self.layout().entry_block()?;
        self.goto_top(entry);
        Some(entry)
    }

    /// Move to the next block in layout order, positioned before it.
    ///
    /// From `Nowhere`, this moves to the first block. Returns the new block,
    /// or `None` when the layout is exhausted (position becomes `Nowhere`).
    fn next_block(&mut self) -> Option<Block> {
        let next = if let Some(block) = self.current_block() {
            self.layout().next_block(block)
        } else {
            self.layout().entry_block()
        };
        self.set_position(match next {
            Some(block) => CursorPosition::Before(block),
            None => CursorPosition::Nowhere,
        });
        next
    }

    /// Move to the previous block in layout order, positioned after it.
    fn prev_block(&mut self) -> Option<Block> {
        let prev = if let Some(block) = self.current_block() {
            self.layout().prev_block(block)
        } else {
            self.layout().last_block()
        };
        self.set_position(match prev {
            Some(block) => CursorPosition::After(block),
            None => CursorPosition::Nowhere,
        });
        prev
    }

    /// Move to the next instruction in the same block and return it.
    ///
    /// - At an instruction, step to the following one.
    /// - Before a block, move to its first instruction.
    /// - When the block is exhausted, the position becomes `After(block)`
    ///   and `None` is returned.
    fn next_inst(&mut self) -> Option<Inst> {
        use self::CursorPosition::*;
        match self.position() {
            Nowhere | After(..) => None,
            At(inst) => {
                if let Some(next) = self.layout().next_inst(inst) {
                    self.set_position(At(next));
                    Some(next)
                } else {
                    let pos = After(
                        self.layout()
                            .inst_block(inst)
                            .expect("current instruction removed?"),
                    );
                    self.set_position(pos);
                    None
                }
            }
            Before(block) => {
                if let Some(next) = self.layout().first_inst(block) {
                    self.set_position(At(next));
                    Some(next)
                } else {
                    self.set_position(After(block));
                    None
                }
            }
        }
    }

    /// Move to the previous instruction in the same block and return it.
    fn prev_inst(&mut self) -> Option<Inst> {
        use self::CursorPosition::*;
        match self.position() {
            Nowhere | Before(..) => None,
            At(inst) => {
                if let Some(prev) = self.layout().prev_inst(inst) {
                    self.set_position(At(prev));
                    Some(prev)
                } else {
                    let pos = Before(
                        self.layout()
                            .inst_block(inst)
                            .expect("current instruction removed?"),
                    );
                    self.set_position(pos);
                    None
                }
            }
            After(block) => {
                if let Some(prev) = self.layout().last_inst(block) {
                    self.set_position(At(prev));
                    Some(prev)
                } else {
                    self.set_position(Before(block));
                    None
                }
            }
        }
    }

    /// Insert an instruction at the current position.
    ///
    /// - At an instruction, the new instruction is inserted before it.
    /// - At the bottom of a block, the new instruction is appended.
    ///
    /// In either case the position is unchanged, so repeated insertions
    /// appear in order.
    fn insert_inst(&mut self, inst: Inst) {
        use self::CursorPosition::*;
        match self.position() {
            Nowhere | Before(..) => panic!("cannot insert instruction at {:?}", self.position()),
            At(cur) => self.layout_mut().insert_inst(inst, cur),
            After(block) => self.layout_mut().append_inst(inst, block),
        }
    }

    /// Remove the instruction under the cursor.
    ///
    /// The cursor is left pointing at the position following the removed
    /// instruction, so a `next_inst()` loop may remove the current element
    /// safely.
    fn remove_inst(&mut self) -> Inst {
        let inst = self.current_inst().expect("no instruction to remove");
        self.goto_after_inst(inst);
        self.layout_mut().remove_inst(inst);
        inst
    }

    /// Remove the instruction under the cursor and step back to the previous
    /// position, so a forward `next_inst()` loop does not skip the
    /// instruction after the removed one.
    fn remove_inst_and_step_back(&mut self) -> Inst {
        let inst = self.current_inst().expect("no instruction to remove");
        match self.layout().prev_inst(inst) {
            Some(prev) => self.set_position(CursorPosition::At(prev)),
            None => {
                let block = self.layout().inst_block(inst).unwrap();
                self.set_position(CursorPosition::Before(block));
            }
        }
        self.layout_mut().remove_inst(inst);
        inst
    }

    /// Insert a new block just before the current position, splitting
    /// nothing: the block must be empty and not yet inserted.
    fn insert_block(&mut self, new_block: Block) {
        use self::CursorPosition::*;
        match self.position() {
            At(inst) => {
                let split_block = self.layout().inst_block(inst).unwrap();
                self.layout_mut().insert_block(new_block, split_block);
            }
            Nowhere => self.layout_mut().append_block(new_block),
            Before(block) => self.layout_mut().insert_block(new_block, block),
            After(block) => {
                self.layout_mut().insert_block_after(new_block, block);
            }
        }
        // Leave the cursor ready to fill the new block.
        self.set_position(After(new_block));
    }
}

/// Function cursor.
///
/// A `FuncCursor` holds a mutable reference to a whole `ir::Function` while
/// keeping a position too. The function can be re-borrowed by accessing the
/// public `cur.func` member directly whenever the cursor position is not
/// needed.
pub struct FuncCursor<'f> {
    pos: CursorPosition,
    /// The referenced function.
    pub func: &'f mut Function,
}

impl<'f> FuncCursor<'f> {
    /// Create a new `FuncCursor` pointing nowhere.
    pub fn new(func: &'f mut Function) -> Self {
        Self {
            pos: CursorPosition::Nowhere,
            func,
        }
    }

    /// Create an instruction builder that inserts an instruction at the
    /// current position.
    pub fn ins(&mut self) -> FuncInstBuilder<'_, 'f> {
        FuncInstBuilder { cursor: self }
    }
}

impl<'f> Cursor for FuncCursor<'f> {
    fn position(&self) -> CursorPosition {
        self.pos
    }

    fn set_position(&mut self, pos: CursorPosition) {
        self.pos = pos;
    }

    fn layout(&self) -> &ir::Layout {
        &self.func.layout
    }

    fn layout_mut(&mut self) -> &mut ir::Layout {
        &mut self.func.layout
    }
}

/// An instruction builder that inserts built instructions at the position of
/// a [`FuncCursor`].
pub struct FuncInstBuilder<'c, 'f: 'c> {
    cursor: &'c mut FuncCursor<'f>,
}

impl<'c, 'f> InstBuilderBase<'c> for FuncInstBuilder<'c, 'f> {
    fn data_flow_graph(&self) -> &ir::DataFlowGraph {
        &self.cursor.func.dfg
    }

    fn data_flow_graph_mut(&mut self) -> &mut ir::DataFlowGraph {
        &mut self.cursor.func.dfg
    }

    fn build(self, data: InstructionData, ctrl_typevar: Type) -> (Inst, &'c mut ir::DataFlowGraph) {
        let inst = self.cursor.func.dfg.make_inst(data);
        self.cursor.func.dfg.make_inst_results(inst, ctrl_typevar);
        self.cursor.insert_inst(inst);
        (inst, &mut self.cursor.func.dfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::I32;
    use crate::ir::InstBuilder;

    #[test]
    fn insert_and_walk() {
        let mut func = Function::new();
        let block = func.dfg.make_block();
        func.layout.append_block(block);

        let mut pos = FuncCursor::new(&mut func).at_bottom(block);
        let a = pos.ins().iconst(I32, 1);
        let b = pos.ins().iconst(I32, 2);
        let c = pos.ins().iadd(a, b);
        pos.ins().return_(&[c]);

        let mut pos = FuncCursor::new(&mut func);
        assert_eq!(pos.next_block(), Some(block));
        let mut count = 0;
        while pos.next_inst().is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
        assert_eq!(pos.position(), CursorPosition::After(block));
        assert_eq!(pos.next_block(), None);
    }

    #[test]
    fn remove_during_forward_walk() {
        let mut func = Function::new();
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        {
            let mut pos = FuncCursor::new(&mut func).at_bottom(block);
            let a = pos.ins().iconst(I32, 1);
            pos.ins().iconst(I32, 2);
            pos.ins().return_(&[a]);
        }

        // Remove the middle constant while iterating forward.
        let mut pos = FuncCursor::new(&mut func);
        let mut survivors = Vec::new();
        while let Some(_block) = pos.next_block() {
            while let Some(inst) = pos.next_inst() {
                if pos.func.dfg.display_inst(inst).to_string().contains("= iconst 2") {
                    pos.remove_inst_and_step_back();
                } else {
                    survivors.push(inst);
                }
            }
        }
        assert_eq!(survivors.len(), 2);
        assert_eq!(func.layout.block_insts(block).count(), 2);
    }
}
