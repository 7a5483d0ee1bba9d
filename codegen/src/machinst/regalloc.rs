//! Register allocation: assign every virtual register a real register, with
//! spill slots backing the overflow.
//!
//! The allocator is a linear scan over live-range intervals:
//!
//! - Operand constraints are gathered up front. A `Reuse` def is coalesced
//!   with its input (both become one virtual register, hence one interval
//!   and one assignment), and a `FixedUse`/`FixedDef` on a virtual register
//!   pins that register's interval to the required real register.
//! - Liveness runs block-level backward dataflow, then condenses each
//!   virtual register to one interval `[first def, last use]` over the
//!   linearized instruction stream (extended to block boundaries where the
//!   value is live across them).
//! - Real registers named directly by instructions (ABI moves, call
//!   clobbers) produce *busy segments* on their physical registers; an
//!   interval never lands on a register whose busy segments it overlaps.
//! - Intervals are visited in start order. A pinned interval takes its
//!   required register unconditionally, evicting (spilling) whatever
//!   unpinned interval holds it. Others take a free register of their bank
//!   (preferring a move-hinted one), or force the active interval with the
//!   furthest end to spill.
//! - Spilled registers get stack slots from a per-bank free list; a spill
//!   round inserts a store after each def and a reload before each use
//!   (or a rematerialization when the value is a known cheap constant) with
//!   fresh short-lived virtual registers, then allocation re-runs. Pressure
//!   falls monotonically, so a few rounds settle; if they do not, the
//!   function exceeds the allocator's limits.
//! - Once every interval has a register, moves whose ends were assigned the
//!   same register are deleted (move coalescing).

use crate::fx::FxHashMap;
use crate::machinst::{
    MachInstEmit, OperandCollector, OperandKind, Reg, RegClass, RealReg, VCode, VirtualReg,
    Writable,
};
use crate::result::{CodegenError, CodegenResult};
use crate::timing;
use smallvec::SmallVec;

/// The machine's allocatable registers, in preference order per bank, plus
/// the callee-saved set used to report clobbers.
#[derive(Clone, Debug)]
pub struct MachineEnv {
    /// Allocatable registers for bank 0 (integer), preference order.
    pub int_regs: Vec<RealReg>,
    /// Allocatable registers for bank 1 (float/vector), preference order.
    pub float_regs: Vec<RealReg>,
    /// Callee-saved registers under the active calling convention.
    pub callee_saves: Vec<RealReg>,
}

/// Spill/reload code generation, implemented by the target instruction.
pub trait SpillOps: Sized {
    /// Store `src` to the numbered spill slot.
    fn gen_spill_store(slot: u32, src: Reg, class: RegClass) -> Self;
    /// Load the numbered spill slot into `dst`.
    fn gen_spill_reload(slot: u32, dst: Writable<Reg>, class: RegClass) -> Self;
    /// Materialize a constant into `dst`; used to rematerialize instead of
    /// reloading.
    fn gen_const(dst: Writable<Reg>, value: u64) -> SmallVec<[Self; 4]>;
}

/// The outcome of register allocation.
#[derive(Debug)]
pub struct RegAllocResult {
    /// Number of 16-byte spill slots used.
    pub num_spill_slots: u32,
    /// Callee-saved registers the function writes, integer bank first.
    pub clobbered_callee_saves: Vec<RealReg>,
}

#[derive(Clone, Copy, Debug)]
struct Interval {
    vreg: u32,
    start: u32,
    end: u32,
}

/// Limit on spill-insertion rounds. Pressure shrinks every round; a
/// function still spilling after this many has demands no heuristic fixes.
const MAX_ROUNDS: usize = 8;

/// Run register allocation over `vcode`, editing it in place.
pub fn run<I>(
    vcode: &mut VCode<I>,
    env: &MachineEnv,
    remat_consts: &FxHashMap<u32, u64>,
) -> CodegenResult<RegAllocResult>
where
    I: MachInstEmit + SpillOps,
{
    let _tt = timing::regalloc();

    // Gather the operand constraints; coalescing the reuse pairs rewrites
    // the instruction stream so each pair shares one virtual register.
    let (reuse_alias, fixed_pins) = collect_constraints(vcode)?;
    if !reuse_alias.is_empty() {
        let classes = vcode.vreg_classes.clone();
        for inst in &mut vcode.insts {
            inst.map_regs(&mut |reg: Reg| match reg {
                Reg::Virtual(v) => {
                    let c = canonical(&reuse_alias, v.index() as u32);
                    if c != v.index() as u32 {
                        Reg::Virtual(VirtualReg::new(c, classes[c as usize]))
                    } else {
                        reg
                    }
                }
                real => real,
            });
        }
    }

    let mut spill_slots_used = 0u32;
    let mut slot_free_list: [Vec<u32>; 2] = [Vec::new(), Vec::new()];
    let mut remat_consts = remat_consts.clone();

    for round in 0..MAX_ROUNDS {
        let mut ctx = Allocator::new(vcode, env, &fixed_pins);
        ctx.compute_liveness();
        ctx.build_intervals();
        ctx.scan(&mut spill_slots_used, &mut slot_free_list)?;

        if ctx.spilled.is_empty() {
            let assignment = ctx.assignment;
            apply_assignment(vcode, &assignment)?;
            coalesce_moves(vcode);
            let clobbered = collect_clobbered_callee_saves(vcode, env);
            trace!(
                "regalloc: finished after {} round(s), {} spill slots",
                round + 1,
                spill_slots_used
            );
            return Ok(RegAllocResult {
                num_spill_slots: spill_slots_used,
                clobbered_callee_saves: clobbered,
            });
        }

        let spilled = core::mem::take(&mut ctx.spilled);
        drop(ctx);
        insert_spill_code(vcode, &spilled, &mut remat_consts);
    }

    Err(CodegenError::Regalloc(format!(
        "register pressure not resolved after {MAX_ROUNDS} spill rounds"
    )))
}

/// Resolve a virtual register through the reuse-alias map.
fn canonical(alias: &FxHashMap<u32, u32>, mut v: u32) -> u32 {
    // An alias chain can be at most as long as the map.
    for _ in 0..=alias.len() {
        match alias.get(&v) {
            Some(&next) => v = next,
            None => return v,
        }
    }
    v
}

/// Walk every operand once, recording the reuse coalescing pairs and the
/// fixed-register pins.
///
/// `Reuse` defs alias onto their input's virtual register (or inherit a pin
/// when the input is real). `FixedUse`/`FixedDef` on a virtual register
/// pins it; on a real register, the register must already be the required
/// one.
fn collect_constraints<I>(
    vcode: &VCode<I>,
) -> CodegenResult<(FxHashMap<u32, u32>, FxHashMap<u32, RealReg>)>
where
    I: MachInstEmit,
{
    let mut collector = OperandCollector::default();
    let mut alias: FxHashMap<u32, u32> = FxHashMap::default();
    let mut pins: FxHashMap<u32, RealReg> = FxHashMap::default();

    // First pass: reuse pairs, so pins land on canonical registers.
    for ix in 0..vcode.insts.len() {
        vcode.collect_operands(ix, &mut collector);
        for op in collector.operands.clone() {
            if let OperandKind::Reuse(idx) = op.kind {
                let input = collector.operands.get(idx).ok_or_else(|| {
                    CodegenError::InternalError {
                        stage: "regalloc",
                        message: format!("reuse constraint names missing operand {idx}"),
                    }
                })?;
                match (op.reg, input.reg) {
                    (Reg::Virtual(d), Reg::Virtual(s)) if d != s => {
                        let (d, s) = (d.index() as u32, s.index() as u32);
                        // Only tie in one direction so no cycle can form.
                        if canonical(&alias, s) != d {
                            alias.insert(d, canonical(&alias, s));
                        }
                    }
                    (Reg::Virtual(d), Reg::Real(p)) => {
                        pins.insert(d.index() as u32, p);
                    }
                    _ => {}
                }
            }
        }
    }

    // Second pass: fixed pins.
    for ix in 0..vcode.insts.len() {
        vcode.collect_operands(ix, &mut collector);
        for op in &collector.operands {
            let required = match op.kind {
                OperandKind::FixedUse(p) | OperandKind::FixedDef(p) => p,
                _ => continue,
            };
            match op.reg {
                Reg::Virtual(v) => {
                    let v = canonical(&alias, v.index() as u32);
                    match pins.insert(v, required) {
                        Some(prev) if prev.index() != required.index() => {
                            return Err(CodegenError::InternalError {
                                stage: "regalloc",
                                message: format!(
                                    "%v{v} is pinned to both {prev:?} and {required:?}"
                                ),
                            });
                        }
                        _ => {}
                    }
                }
                Reg::Real(r) if r.index() != required.index() => {
                    return Err(CodegenError::InternalError {
                        stage: "regalloc",
                        message: format!(
                            "{r:?} carries a fixed constraint for {required:?}"
                        ),
                    });
                }
                Reg::Real(_) => {}
            }
        }
    }

    Ok((alias, pins))
}

struct Allocator<'a, I: MachInstEmit> {
    vcode: &'a VCode<I>,
    env: &'a MachineEnv,
    /// Fixed-register pins per (canonical) vreg.
    fixed_pins: &'a FxHashMap<u32, RealReg>,
    /// Use/def positions of each vreg: (first_def, last_use) seeds.
    intervals: Vec<Interval>,
    /// vreg -> chosen real register.
    assignment: FxHashMap<u32, RealReg>,
    /// vreg -> spill slot, for this round's victims.
    spilled: FxHashMap<u32, u32>,
    /// Busy segments per physical register index.
    preg_busy: FxHashMap<usize, Vec<(u32, u32)>>,
    /// Allocation hints from moves: vreg -> preferred preg.
    hints: FxHashMap<u32, RealReg>,
    /// Liveness: per-block live-in vreg sets.
    live_in: Vec<Vec<u32>>,
}

impl<'a, I: MachInstEmit> Allocator<'a, I> {
    fn new(
        vcode: &'a VCode<I>,
        env: &'a MachineEnv,
        fixed_pins: &'a FxHashMap<u32, RealReg>,
    ) -> Self {
        Self {
            vcode,
            env,
            fixed_pins,
            intervals: Vec::new(),
            assignment: FxHashMap::default(),
            spilled: FxHashMap::default(),
            preg_busy: FxHashMap::default(),
            hints: FxHashMap::default(),
            live_in: Vec::new(),
        }
    }

    /// Block-level backward liveness over virtual registers.
    fn compute_liveness(&mut self) {
        let nblocks = self.vcode.num_blocks();
        let mut live_in: Vec<Vec<u32>> = vec![Vec::new(); nblocks];
        let mut collector = OperandCollector::default();

        let mut changed = true;
        while changed {
            changed = false;
            for block in (0..nblocks).rev() {
                // live = union of successors' live-ins.
                let mut live: Vec<u32> = Vec::new();
                for &succ in &self.vcode.block_succs[block] {
                    for &v in &live_in[succ as usize] {
                        if !live.contains(&v) {
                            live.push(v);
                        }
                    }
                }
                // Walk the block backward.
                let (start, end) = self.vcode.block_ranges[block];
                for ix in (start..end).rev() {
                    self.vcode.collect_operands(ix as usize, &mut collector);
                    for op in &collector.operands {
                        if let Some(v) = op.reg.to_virtual_reg() {
                            let v = v.index() as u32;
                            match op.kind {
                                OperandKind::Def
                                | OperandKind::FixedDef(_)
                                | OperandKind::Reuse(_) => {
                                    live.retain(|&x| x != v);
                                }
                                OperandKind::Use | OperandKind::FixedUse(_) => {
                                    if !live.contains(&v) {
                                        live.push(v);
                                    }
                                }
                            }
                        }
                    }
                }
                live.sort_unstable();
                if live != live_in[block] {
                    live_in[block] = live;
                    changed = true;
                }
            }
        }
        self.live_in = live_in;
    }

    /// Condense liveness into one interval per vreg and busy segments per
    /// preg. Position scheme: instruction `i` reads at `2i` and writes at
    /// `2i + 1`.
    fn build_intervals(&mut self) {
        let mut starts: FxHashMap<u32, u32> = FxHashMap::default();
        let mut ends: FxHashMap<u32, u32> = FxHashMap::default();
        let mut collector = OperandCollector::default();

        let mut touch = |map: &mut FxHashMap<u32, u32>, v: u32, pos: u32, min: bool| {
            map.entry(v)
                .and_modify(|p| {
                    if (min && pos < *p) || (!min && pos > *p) {
                        *p = pos;
                    }
                })
                .or_insert(pos);
        };

        // Real-register busy tracking: last def position per preg.
        let mut preg_last_def: FxHashMap<usize, u32> = FxHashMap::default();
        let mut push_busy = |busy: &mut FxHashMap<usize, Vec<(u32, u32)>>,
                             preg: RealReg,
                             seg: (u32, u32)| {
            busy.entry(preg.index()).or_default().push(seg);
        };

        for block in 0..self.vcode.num_blocks() {
            let (bstart, bend) = self.vcode.block_ranges[block];
            let block_start_pos = bstart * 2;
            let block_end_pos = bend * 2;

            // Values live into the block extend back to its start; values
            // live out (live into any successor) extend to its end.
            for &v in &self.live_in[block] {
                touch(&mut starts, v, block_start_pos, true);
                touch(&mut ends, v, block_start_pos, false);
            }
            for &succ in &self.vcode.block_succs[block] {
                for &v in &self.live_in[succ as usize] {
                    touch(&mut starts, v, block_end_pos.saturating_sub(1), true);
                    touch(&mut ends, v, block_end_pos.saturating_sub(1), false);
                }
            }

            for ix in bstart..bend {
                self.vcode.collect_operands(ix as usize, &mut collector);
                let use_pos = ix * 2;
                let def_pos = ix * 2 + 1;

                // A call's clobbers make every clobbered preg busy at the
                // write position.
                for preg in collector.clobbers.iter() {
                    push_busy(&mut self.preg_busy, preg, (def_pos, def_pos));
                }

                for op in &collector.operands {
                    match op.reg {
                        Reg::Virtual(v) => {
                            let v = v.index() as u32;
                            match op.kind {
                                OperandKind::Def
                                | OperandKind::FixedDef(_)
                                | OperandKind::Reuse(_) => {
                                    touch(&mut starts, v, def_pos, true);
                                    touch(&mut ends, v, def_pos, false);
                                }
                                OperandKind::Use | OperandKind::FixedUse(_) => {
                                    touch(&mut starts, v, use_pos, true);
                                    touch(&mut ends, v, use_pos, false);
                                }
                            }
                        }
                        Reg::Real(p) => match op.kind {
                            OperandKind::Def
                            | OperandKind::FixedDef(_)
                            | OperandKind::Reuse(_) => {
                                preg_last_def.insert(p.index(), def_pos);
                            }
                            OperandKind::Use | OperandKind::FixedUse(_) => {
                                let from =
                                    preg_last_def.get(&p.index()).copied().unwrap_or(0);
                                push_busy(&mut self.preg_busy, p, (from, use_pos));
                            }
                        },
                    }
                }

                // Move hints: prefer assigning a vreg the real register on
                // the other side of a copy, or the pin of its copy partner.
                if let Some((dst, src)) = self.vcode.insts[ix as usize].is_move() {
                    match (dst.to_reg(), src) {
                        (Reg::Virtual(v), Reg::Real(p)) | (Reg::Real(p), Reg::Virtual(v)) => {
                            self.hints.entry(v.index() as u32).or_insert(p);
                        }
                        (Reg::Virtual(d), Reg::Virtual(s)) => {
                            let (d, s) = (d.index() as u32, s.index() as u32);
                            if let Some(&p) = self.fixed_pins.get(&d) {
                                self.hints.entry(s).or_insert(p);
                            } else if let Some(&p) = self.fixed_pins.get(&s) {
                                self.hints.entry(d).or_insert(p);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        for segs in self.preg_busy.values_mut() {
            segs.sort_unstable();
        }

        self.intervals = starts
            .iter()
            .map(|(&v, &start)| Interval {
                vreg: v,
                start,
                end: ends.get(&v).copied().unwrap_or(start),
            })
            .collect();
        self.intervals.sort_unstable_by_key(|iv| (iv.start, iv.end, iv.vreg));
    }

    fn bank_of(&self, vreg: u32) -> usize {
        self.vcode.vreg_classes[vreg as usize].bank()
    }

    fn preg_conflicts(&self, preg: RealReg, iv: &Interval) -> bool {
        if let Some(segs) = self.preg_busy.get(&preg.index()) {
            for &(s, e) in segs {
                if s <= iv.end && iv.start <= e {
                    return true;
                }
            }
        }
        false
    }

    /// The linear scan proper.
    fn scan(
        &mut self,
        spill_slots_used: &mut u32,
        slot_free_list: &mut [Vec<u32>; 2],
    ) -> CodegenResult<()> {
        // Active intervals per bank, with their assigned registers.
        let mut active: Vec<(Interval, RealReg)> = Vec::new();
        // Slots returned to the free list when their holder's range ends.
        let mut slot_expiry: Vec<(u32, usize, u32)> = Vec::new(); // (end, bank, slot)

        let intervals = self.intervals.clone();
        for iv in intervals {
            // Expire finished intervals.
            active.retain(|(a, _)| a.end >= iv.start);
            slot_expiry.retain(|&(end, bank, slot)| {
                if end < iv.start {
                    slot_free_list[bank].push(slot);
                    false
                } else {
                    true
                }
            });

            let bank = self.bank_of(iv.vreg);

            // A pinned interval takes its required register; whatever
            // unpinned interval holds it gets spilled out of the way.
            if let Some(&preg) = self.fixed_pins.get(&iv.vreg) {
                debug_assert_eq!(preg.class().bank(), bank);
                if self.preg_conflicts(preg, &iv) {
                    return Err(CodegenError::Regalloc(format!(
                        "fixed constraint on %v{} conflicts with {preg:?}'s other uses",
                        iv.vreg
                    )));
                }
                if let Some(ix) = active.iter().position(|&(_, p)| p == preg) {
                    let (victim, _) = active.swap_remove(ix);
                    if self.fixed_pins.contains_key(&victim.vreg) {
                        return Err(CodegenError::Regalloc(format!(
                            "two live ranges are pinned to {preg:?} at once"
                        )));
                    }
                    self.assignment.remove(&victim.vreg);
                    let vbank = self.bank_of(victim.vreg);
                    let slot = match slot_free_list[vbank].pop() {
                        Some(slot) => slot,
                        None => {
                            let slot = *spill_slots_used;
                            *spill_slots_used += 1;
                            slot
                        }
                    };
                    slot_expiry.push((victim.end, vbank, slot));
                    trace!(
                        "regalloc: spilling %v{} to slot {slot} for a pin",
                        victim.vreg
                    );
                    self.spilled.insert(victim.vreg, slot);
                }
                self.assignment.insert(iv.vreg, preg);
                active.push((iv, preg));
                continue;
            }

            let pool: &[RealReg] = if bank == 0 {
                &self.env.int_regs
            } else {
                &self.env.float_regs
            };

            let in_use = |active: &Vec<(Interval, RealReg)>, preg: RealReg| {
                active.iter().any(|&(_, p)| p == preg)
            };

            // Try the hinted register first, then the pool in preference
            // order.
            let mut chosen: Option<RealReg> = None;
            if let Some(&hint) = self.hints.get(&iv.vreg) {
                if hint.class().bank() == bank
                    && pool.contains(&hint)
                    && !in_use(&active, hint)
                    && !self.preg_conflicts(hint, &iv)
                {
                    chosen = Some(hint);
                }
            }
            if chosen.is_none() {
                chosen = pool
                    .iter()
                    .copied()
                    .find(|&p| !in_use(&active, p) && !self.preg_conflicts(p, &iv));
            }

            match chosen {
                Some(preg) => {
                    self.assignment.insert(iv.vreg, preg);
                    active.push((iv, preg));
                }
                None => {
                    // Spill the active interval with the furthest end whose
                    // register this interval could take over. Pinned
                    // intervals are never victims: their location is not
                    // ours to change.
                    let victim_ix = active
                        .iter()
                        .enumerate()
                        .filter(|(_, (a, p))| {
                            self.bank_of(a.vreg) == bank
                                && !self.fixed_pins.contains_key(&a.vreg)
                                && !self.preg_conflicts(*p, &iv)
                        })
                        .max_by_key(|(_, (a, _))| a.end)
                        .map(|(ix, _)| ix);

                    let spill_target = match victim_ix {
                        Some(ix) if active[ix].0.end > iv.end => {
                            // The victim reaches further; its register goes
                            // to the current interval.
                            let (victim, preg) = active.swap_remove(ix);
                            self.assignment.remove(&victim.vreg);
                            self.assignment.insert(iv.vreg, preg);
                            active.push((iv, preg));
                            victim
                        }
                        _ => {
                            // Spilling the current interval is cheaper.
                            iv
                        }
                    };

                    let bank = self.bank_of(spill_target.vreg);
                    let slot = match slot_free_list[bank].pop() {
                        Some(slot) => slot,
                        None => {
                            let slot = *spill_slots_used;
                            *spill_slots_used += 1;
                            slot
                        }
                    };
                    slot_expiry.push((spill_target.end, bank, slot));
                    trace!(
                        "regalloc: spilling %v{} to slot {slot}",
                        spill_target.vreg
                    );
                    self.spilled.insert(spill_target.vreg, slot);
                }
            }
        }
        Ok(())
    }
}

/// Insert spill stores after defs and reloads (or rematerializations)
/// before uses of every spilled vreg, with fresh short-lived vregs.
fn insert_spill_code<I>(
    vcode: &mut VCode<I>,
    spilled: &FxHashMap<u32, u32>,
    remat_consts: &mut FxHashMap<u32, u64>,
) where
    I: MachInstEmit + SpillOps,
{
    let mut collector = OperandCollector::default();
    let mut new_insts: Vec<I> = Vec::with_capacity(vcode.insts.len());
    let mut new_ranges = Vec::with_capacity(vcode.block_ranges.len());

    let old_insts = core::mem::take(&mut vcode.insts);
    let old_ranges = core::mem::take(&mut vcode.block_ranges);

    let mut alloc_vreg = |classes: &mut Vec<RegClass>, class: RegClass| -> u32 {
        let index = classes.len() as u32;
        classes.push(class);
        index
    };

    for (bstart, bend) in old_ranges {
        let start = new_insts.len() as u32;
        for ix in bstart..bend {
            let mut inst = old_insts[ix as usize].clone();
            collector.clear();
            inst.get_operands(&mut collector);

            // Map each spilled vreg this instruction touches to one fresh
            // vreg, shared between its use and def positions within the
            // instruction (so two-address constraints keep holding).
            let mut replacements: SmallVec<[(u32, u32, RegClass); 4]> = SmallVec::new();
            let mut has_use: SmallVec<[u32; 4]> = SmallVec::new();
            let mut has_def: SmallVec<[u32; 4]> = SmallVec::new();
            for op in &collector.operands {
                if let Some(v) = op.reg.to_virtual_reg() {
                    let vi = v.index() as u32;
                    if let Some(_slot) = spilled.get(&vi) {
                        if !replacements.iter().any(|&(old, _, _)| old == vi) {
                            let fresh = alloc_vreg(&mut vcode.vreg_classes, v.class());
                            replacements.push((vi, fresh, v.class()));
                        }
                        match op.kind {
                            OperandKind::Use | OperandKind::FixedUse(_) => {
                                if !has_use.contains(&vi) {
                                    has_use.push(vi);
                                }
                            }
                            _ => {
                                if !has_def.contains(&vi) {
                                    has_def.push(vi);
                                }
                            }
                        }
                    }
                }
            }

            if replacements.is_empty() {
                new_insts.push(inst);
                continue;
            }

            // Reloads before the instruction.
            for &(old, fresh, class) in &replacements {
                if !has_use.contains(&old) {
                    continue;
                }
                let slot = spilled[&old];
                let dst = Writable::from_reg(Reg::Virtual(VirtualReg::new(fresh, class)));
                if let Some(&value) = remat_consts.get(&old) {
                    // Rematerialize: cheaper than the memory access.
                    for c in I::gen_const(dst, value) {
                        new_insts.push(c);
                    }
                    remat_consts.insert(fresh, value);
                } else {
                    new_insts.push(I::gen_spill_reload(slot, dst, class));
                }
            }

            // Rewrite the instruction's registers.
            inst.map_regs(&mut |reg: Reg| {
                if let Some(v) = reg.to_virtual_reg() {
                    let vi = v.index() as u32;
                    if let Some(&(_, fresh, class)) =
                        replacements.iter().find(|&&(old, _, _)| old == vi)
                    {
                        return Reg::Virtual(VirtualReg::new(fresh, class));
                    }
                }
                reg
            });
            new_insts.push(inst);

            // Spill stores after the instruction.
            for &(old, fresh, class) in &replacements {
                if !has_def.contains(&old) {
                    continue;
                }
                let slot = spilled[&old];
                let src = Reg::Virtual(VirtualReg::new(fresh, class));
                new_insts.push(I::gen_spill_store(slot, src, class));
            }
        }
        new_ranges.push((start, new_insts.len() as u32));
    }

    vcode.insts = new_insts;
    vcode.block_ranges = new_ranges;
}

/// Rewrite every virtual register to its assigned real register.
fn apply_assignment<I>(
    vcode: &mut VCode<I>,
    assignment: &FxHashMap<u32, RealReg>,
) -> CodegenResult<()>
where
    I: MachInstEmit,
{
    let mut missing = None;
    for inst in &mut vcode.insts {
        inst.map_regs(&mut |reg: Reg| match reg {
            Reg::Virtual(v) => match assignment.get(&(v.index() as u32)) {
                Some(&preg) => Reg::Real(preg),
                None => {
                    missing = Some(v.index());
                    reg
                }
            },
            real => real,
        });
    }
    if let Some(v) = missing {
        return Err(CodegenError::InternalError {
            stage: "regalloc",
            message: format!("virtual register %v{v} survived allocation"),
        });
    }
    Ok(())
}

/// Delete moves whose source and destination were assigned the same
/// register.
fn coalesce_moves<I>(vcode: &mut VCode<I>)
where
    I: MachInstEmit,
{
    let old_insts = core::mem::take(&mut vcode.insts);
    let old_ranges = core::mem::take(&mut vcode.block_ranges);
    let mut new_insts = Vec::with_capacity(old_insts.len());
    let mut new_ranges = Vec::with_capacity(old_ranges.len());

    let mut iter = old_insts.into_iter();
    for (bstart, bend) in old_ranges {
        let start = new_insts.len() as u32;
        for _ in bstart..bend {
            let inst = iter.next().unwrap();
            if let Some((dst, src)) = inst.is_move() {
                if dst.to_reg() == src {
                    continue;
                }
            }
            new_insts.push(inst);
        }
        new_ranges.push((start, new_insts.len() as u32));
    }

    vcode.insts = new_insts;
    vcode.block_ranges = new_ranges;
}

/// The callee-saved registers the final code actually writes.
fn collect_clobbered_callee_saves<I>(vcode: &VCode<I>, env: &MachineEnv) -> Vec<RealReg>
where
    I: MachInstEmit,
{
    let mut collector = OperandCollector::default();
    let mut clobbered: Vec<RealReg> = Vec::new();
    for ix in 0..vcode.insts.len() {
        vcode.collect_operands(ix, &mut collector);
        for op in &collector.operands {
            let is_def = matches!(
                op.kind,
                OperandKind::Def | OperandKind::FixedDef(_) | OperandKind::Reuse(_)
            );
            if !is_def {
                continue;
            }
            if let Some(p) = op.reg.to_real_reg() {
                if env.callee_saves.iter().any(|&cs| cs.index() == p.index())
                    && !clobbered.iter().any(|&c| c.index() == p.index())
                {
                    clobbered.push(p);
                }
            }
        }
    }
    clobbered.sort_unstable_by_key(|r| r.index());
    clobbered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;
    use crate::machinst::vcode::MachInstEmit;
    use crate::machinst::{
        MachBuffer, MachInst, MachInstLabelUse, MachLabel, MachTerminator,
    };
    use smallvec::smallvec;

    #[derive(Clone, Copy, Debug)]
    struct NoLabelUse;

    impl MachInstLabelUse for NoLabelUse {
        fn max_pos_range(self) -> u32 {
            u32::MAX
        }
        fn max_neg_range(self) -> u32 {
            u32::MAX
        }
        fn patch_size(self) -> u32 {
            0
        }
        fn patch(self, _: &mut [u8], _: u32, _: u32) {}
        fn supports_veneer(self) -> bool {
            false
        }
        fn veneer_size(self) -> u32 {
            0
        }
        fn generate_veneer(self, _: &mut [u8], _: u32) -> (u32, Self) {
            (0, self)
        }
    }

    /// A miniature instruction set exercising every operand kind.
    #[derive(Clone, Debug)]
    enum TestInst {
        Def(Writable<Reg>),
        Use(Reg),
        FixedUse(Reg, RealReg),
        FixedDef(Writable<Reg>, RealReg),
        ReuseDef { src: Reg, dst: Writable<Reg> },
        Move { dst: Writable<Reg>, src: Reg },
        Spill(u32, Reg),
        Reload(u32, Writable<Reg>),
        Const(Writable<Reg>, u64),
        Nop,
    }

    impl MachInst for TestInst {
        type LabelUse = NoLabelUse;

        fn get_operands(&self, collector: &mut OperandCollector) {
            match self {
                TestInst::Def(rd) | TestInst::Const(rd, _) | TestInst::Reload(_, rd) => {
                    collector.reg_def(*rd)
                }
                TestInst::Use(rn) | TestInst::Spill(_, rn) => collector.reg_use(*rn),
                TestInst::FixedUse(rn, preg) => collector.reg_fixed_use(*rn, *preg),
                TestInst::FixedDef(rd, preg) => collector.reg_fixed_def(*rd, *preg),
                TestInst::ReuseDef { src, dst } => {
                    collector.reg_use(*src);
                    collector.reg_reuse_def(*dst, 0);
                }
                TestInst::Move { dst, src } => {
                    collector.reg_use(*src);
                    collector.reg_def(*dst);
                }
                TestInst::Nop => {}
            }
        }

        fn map_regs(&mut self, map: &mut dyn FnMut(Reg) -> Reg) {
            match self {
                TestInst::Def(rd)
                | TestInst::Const(rd, _)
                | TestInst::Reload(_, rd)
                | TestInst::FixedDef(rd, _) => *rd = Writable::from_reg(map(rd.to_reg())),
                TestInst::Use(rn) | TestInst::Spill(_, rn) | TestInst::FixedUse(rn, _) => {
                    *rn = map(*rn)
                }
                TestInst::ReuseDef { src, dst } | TestInst::Move { dst, src } => {
                    *src = map(*src);
                    *dst = Writable::from_reg(map(dst.to_reg()));
                }
                TestInst::Nop => {}
            }
        }

        fn is_move(&self) -> Option<(Writable<Reg>, Reg)> {
            match self {
                TestInst::Move { dst, src } => Some((*dst, *src)),
                _ => None,
            }
        }

        fn is_term(&self) -> MachTerminator {
            MachTerminator::None
        }

        fn gen_move(dst: Writable<Reg>, src: Reg, _ty: Type) -> Self {
            TestInst::Move { dst, src }
        }

        fn gen_jump(_: MachLabel) -> Self {
            TestInst::Nop
        }

        fn gen_nop() -> Self {
            TestInst::Nop
        }

        fn rc_for_type(_: Type) -> CodegenResult<RegClass> {
            Ok(RegClass::Int)
        }

        fn worst_case_size() -> u32 {
            4
        }
    }

    impl MachInstEmit for TestInst {
        type State = ();

        fn emit(&self, _sink: &mut MachBuffer<NoLabelUse>, _state: &mut ()) {}
    }

    impl SpillOps for TestInst {
        fn gen_spill_store(slot: u32, src: Reg, _class: RegClass) -> Self {
            TestInst::Spill(slot, src)
        }
        fn gen_spill_reload(slot: u32, dst: Writable<Reg>, _class: RegClass) -> Self {
            TestInst::Reload(slot, dst)
        }
        fn gen_const(dst: Writable<Reg>, value: u64) -> SmallVec<[Self; 4]> {
            smallvec![TestInst::Const(dst, value)]
        }
    }

    fn vreg(i: u32) -> Reg {
        Reg::Virtual(VirtualReg::new(i, RegClass::Int))
    }

    fn wvreg(i: u32) -> Writable<Reg> {
        Writable::from_reg(vreg(i))
    }

    fn preg(i: u8) -> RealReg {
        RealReg::new(RegClass::Int, i)
    }

    fn test_env() -> MachineEnv {
        MachineEnv {
            int_regs: vec![preg(5), preg(6)],
            float_regs: vec![],
            callee_saves: vec![],
        }
    }

    fn make_vcode(insts: Vec<TestInst>, nvregs: usize) -> VCode<TestInst> {
        let len = insts.len() as u32;
        VCode {
            insts,
            block_ranges: vec![(0, len)],
            block_succs: vec![smallvec![]],
            vreg_classes: vec![RegClass::Int; nvregs],
        }
    }

    #[test]
    fn fixed_use_evicts_the_holder_and_pins() {
        // v0's long range takes x5 (first in preference order); v1's
        // fixed-use then forces v0 out of it.
        let mut vcode = make_vcode(
            vec![
                TestInst::Def(wvreg(0)),
                TestInst::Def(wvreg(1)),
                TestInst::FixedUse(vreg(1), preg(5)),
                TestInst::Use(vreg(0)),
            ],
            2,
        );
        let result = run(&mut vcode, &test_env(), &FxHashMap::default()).unwrap();
        assert_eq!(result.num_spill_slots, 1);

        let (reg, required) = vcode
            .insts
            .iter()
            .find_map(|inst| match inst {
                TestInst::FixedUse(reg, required) => Some((*reg, *required)),
                _ => None,
            })
            .expect("the fixed-use instruction survives");
        assert_eq!(reg, Reg::Real(required));
    }

    #[test]
    fn fixed_def_is_honored() {
        let mut vcode = make_vcode(
            vec![
                TestInst::FixedDef(wvreg(0), preg(6)),
                TestInst::Use(vreg(0)),
            ],
            1,
        );
        run(&mut vcode, &test_env(), &FxHashMap::default()).unwrap();
        match &vcode.insts[0] {
            TestInst::FixedDef(rd, required) => {
                assert_eq!(rd.to_reg(), Reg::Real(*required));
            }
            other => panic!("unexpected inst {other:?}"),
        }
        match &vcode.insts[1] {
            TestInst::Use(reg) => assert_eq!(*reg, Reg::Real(preg(6))),
            other => panic!("unexpected inst {other:?}"),
        }
    }

    #[test]
    fn reuse_def_shares_the_input_register() {
        let mut vcode = make_vcode(
            vec![
                TestInst::Def(wvreg(0)),
                TestInst::ReuseDef {
                    src: vreg(0),
                    dst: wvreg(1),
                },
                TestInst::Use(vreg(1)),
            ],
            2,
        );
        run(&mut vcode, &test_env(), &FxHashMap::default()).unwrap();
        match &vcode.insts[1] {
            TestInst::ReuseDef { src, dst } => {
                assert!(src.is_real());
                assert_eq!(*src, dst.to_reg());
            }
            other => panic!("unexpected inst {other:?}"),
        }
    }

    #[test]
    fn overlapping_intervals_get_distinct_registers() {
        let mut vcode = make_vcode(
            vec![
                TestInst::Def(wvreg(0)),
                TestInst::Def(wvreg(1)),
                TestInst::Use(vreg(0)),
                TestInst::Use(vreg(1)),
            ],
            2,
        );
        run(&mut vcode, &test_env(), &FxHashMap::default()).unwrap();
        let (a, b) = match (&vcode.insts[2], &vcode.insts[3]) {
            (TestInst::Use(a), TestInst::Use(b)) => (*a, *b),
            other => panic!("unexpected insts {other:?}"),
        };
        assert!(a.is_real() && b.is_real());
        assert_ne!(a, b);
    }

    #[test]
    fn conflicting_pins_are_reported() {
        // One virtual register cannot satisfy two different fixed homes.
        let mut vcode = make_vcode(
            vec![
                TestInst::FixedDef(wvreg(0), preg(5)),
                TestInst::FixedUse(vreg(0), preg(6)),
            ],
            1,
        );
        match run(&mut vcode, &test_env(), &FxHashMap::default()) {
            Err(CodegenError::InternalError { stage, .. }) => {
                assert_eq!(stage, "regalloc");
            }
            other => panic!("expected a constraint conflict, got {other:?}"),
        }
    }
}
