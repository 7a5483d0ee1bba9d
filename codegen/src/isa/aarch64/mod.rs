//! AArch64 Instruction Set Architecture.

pub mod abi;
pub mod inst;
pub(crate) mod lower;
pub(crate) mod lower_inst;
#[cfg(feature = "unwind")]
pub mod unwind;

use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::Function;
use crate::isa::{OwnedTargetIsa, TargetIsa};
use crate::machinst::regalloc;
use crate::machinst::{CompiledCode, Lower, MachStackMap};
use crate::result::CodegenResult;
use crate::settings::Flags;
use crate::timing;
use inst::{EmitState, Inst};
use std::sync::Arc;
use target_lexicon::Triple;

/// An AArch64 backend.
pub struct AArch64Backend {
    triple: Triple,
    flags: Flags,
}

impl AArch64Backend {
    /// Create a new AArch64 backend with the given (shared) flags.
    pub fn new_with_flags(triple: Triple, flags: Flags) -> Self {
        Self { triple, flags }
    }
}

/// Constructor used by `isa::lookup`.
pub(crate) fn isa_constructor(triple: Triple, flags: Flags) -> OwnedTargetIsa {
    Arc::new(AArch64Backend::new_with_flags(triple, flags))
}

impl TargetIsa for AArch64Backend {
    fn name(&self) -> &'static str {
        "aarch64"
    }

    fn triple(&self) -> &Triple {
        &self.triple
    }

    fn flags(&self) -> &Flags {
        &self.flags
    }

    fn compile_function(&self, func: &Function) -> CodegenResult<CompiledCode> {
        let cfg = ControlFlowGraph::with_function(func);
        let domtree = DominatorTree::with_function(func, &cfg);

        // Lower into virtual-register machine code.
        let backend = lower::AArch64Lowering::new(&self.flags, func)?;
        let vcode = {
            let _tt = timing::vcode_lower();
            Lower::new(func, &domtree).lower(&backend)?
        };
        let mut vcode = vcode;
        trace!(
            "aarch64: lowered {} instructions in {} blocks",
            vcode.insts.len(),
            vcode.num_blocks()
        );

        // Assign real registers and spill slots.
        let call_conv = func.signature.call_conv;
        let env = inst::machine_env(call_conv);
        let remat = backend.remat.borrow().clone();
        let ra_result = regalloc::run(&mut vcode, &env, &remat)?;

        // Fix the frame now that the clobbers are known.
        let is_leaf = !vcode.insts.iter().any(|inst| {
            matches!(
                inst,
                Inst::Call { .. }
                    | Inst::CallInd { .. }
                    | Inst::TlsDesc { .. }
            )
        });
        let frame = abi::compute_frame_layout(
            backend.stackslots_size(func),
            ra_result.num_spill_slots,
            backend.outgoing_args_size.get(),
            backend.sig_data.sized_stack_arg_space,
            ra_result.clobbered_callee_saves,
            is_leaf,
        );
        let prologue = abi::gen_prologue(&frame, self.flags.enable_probestack());
        let epilogue = abi::gen_epilogue(&frame);

        // Emit.
        let (buffer, bb_starts) = {
            let _tt = timing::vcode_emit();
            let mut state = EmitState {
                frame_layout: frame.clone(),
                is_pic: self.flags.is_pic(),
            };
            vcode.emit(&mut state, &prologue, &epilogue)?
        };

        let bb_edges = {
            let mut edges = Vec::new();
            for (block, succs) in vcode.block_succs.iter().enumerate() {
                for &succ in succs {
                    edges.push((bb_starts[block], bb_starts[succ as usize]));
                }
            }
            edges
        };

        #[cfg(feature = "unwind")]
        let unwind_info = {
            let _tt = timing::unwind_emit();
            Some(unwind::create_unwind_info(
                &frame,
                buffer.total_size(),
            )?)
        };
        #[cfg(not(feature = "unwind"))]
        let unwind_info = None;

        let lsda = build_lsda(&buffer);

        Ok(CompiledCode {
            buffer,
            frame_size: frame.total_frame_size(),
            bb_starts,
            bb_edges,
            unwind_info,
            lsda,
            stack_maps: Vec::<MachStackMap>::new(),
        })
    }
}

impl core::fmt::Display for AArch64Backend {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "aarch64 ({})", self.triple)
    }
}

/// Build the language-specific data area describing exception landing pads,
/// when any call site has one.
///
/// The table is the standard call-site list: header bytes selecting uleb128
/// encodings (with the landing-pad base and type table omitted), then one
/// `(begin, length, landing pad, action)` record per call site. A zero
/// landing pad means "no handler at this site"; a zero action means no
/// type-based filtering.
fn build_lsda(buffer: &crate::machinst::MachBufferFinalized) -> Option<Vec<u8>> {
    if !buffer
        .call_sites()
        .iter()
        .any(|cs| cs.exception_handler.is_some())
    {
        return None;
    }

    fn uleb(out: &mut Vec<u8>, mut value: u64) {
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    let mut body = Vec::new();
    for cs in buffer.call_sites() {
        // The call instruction is the 4 bytes preceding the recorded
        // return address.
        let begin = cs.ret_addr.saturating_sub(4);
        uleb(&mut body, u64::from(begin));
        uleb(&mut body, 4);
        uleb(&mut body, u64::from(cs.exception_handler.unwrap_or(0)));
        uleb(&mut body, 0);
    }

    let mut out = Vec::new();
    out.push(0xff); // LPStart: omitted (function start)
    out.push(0xff); // TType: omitted
    out.push(0x01); // call-site encoding: uleb128
    uleb(&mut out, body.len() as u64);
    out.extend_from_slice(&body);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Cursor, FuncCursor};
    use crate::ir::{types, AbiParam, InstBuilder, Signature};
    use crate::isa::CallConv;
    use crate::settings;

    fn isa() -> OwnedTargetIsa {
        crate::isa::lookup_by_name("aarch64-unknown-linux-gnu")
            .unwrap()
            .finish(settings::Flags::new(settings::builder()))
    }

    /// Decode the emitted words of a compiled function.
    fn words(code: &CompiledCode) -> Vec<u32> {
        code.code_buffer()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn return_constant_42() {
        let mut sig = Signature::new(CallConv::SystemV);
        sig.returns.push(AbiParam::new(types::I32));
        let mut func = crate::ir::Function::with_name_signature(Default::default(), sig);
        let block0 = func.dfg.make_block();
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let v = cur.ins().iconst(types::I32, 42);
            cur.ins().return_(&[v]);
        }

        let code = isa().compile_function(&func).unwrap();
        let words = words(&code);
        // movz w0/x0, #42 ; ret. The leaf function needs no frame.
        assert_eq!(words.len(), 2);
        assert_eq!(words[0], 0xD2800540); // movz x0, #42
        assert_eq!(words[1], 0xD65F03C0); // ret
        assert_eq!(code.stack_frame_size(), 0);
    }

    #[test]
    fn add_two_args() {
        let mut sig = Signature::new(CallConv::SystemV);
        sig.params.push(AbiParam::new(types::I64));
        sig.params.push(AbiParam::new(types::I64));
        sig.returns.push(AbiParam::new(types::I64));
        let mut func = crate::ir::Function::with_name_signature(Default::default(), sig);
        let block0 = func.dfg.make_block();
        let a = func.dfg.append_block_param(block0, types::I64);
        let b = func.dfg.append_block_param(block0, types::I64);
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let sum = cur.ins().iadd(a, b);
            cur.ins().return_(&[sum]);
        }

        let code = isa().compile_function(&func).unwrap();
        let words = words(&code);
        // add x0, x0, x1 ; ret (moves coalesce away).
        assert_eq!(words, vec![0x8B010000, 0xD65F03C0]);
    }

    #[test]
    fn mul_two_args() {
        let mut sig = Signature::new(CallConv::SystemV);
        sig.params.push(AbiParam::new(types::I64));
        sig.params.push(AbiParam::new(types::I64));
        sig.returns.push(AbiParam::new(types::I64));
        let mut func = crate::ir::Function::with_name_signature(Default::default(), sig);
        let block0 = func.dfg.make_block();
        let a = func.dfg.append_block_param(block0, types::I64);
        let b = func.dfg.append_block_param(block0, types::I64);
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let prod = cur.ins().imul(a, b);
            cur.ins().return_(&[prod]);
        }

        let code = isa().compile_function(&func).unwrap();
        let words = words(&code);
        // mul x0, x0, x1 (madd with xzr) ; ret.
        assert_eq!(words, vec![0x9B017C00, 0xD65F03C0]);
    }
}
