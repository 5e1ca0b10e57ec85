//! Fetch/decode/execute loop.
//!
//! One `match` over the decoded [`Opcode`], with a private helper per
//! instruction group — the same shape as a `match`-per-instruction-group
//! interpreter core. Every arm is responsible for its own operand
//! fetch and bounds checking; a failure anywhere sets `err` and `halted`
//! atomically and returns immediately, per spec §3 and §7.

use crate::container::{Container, FLAG_SIGNED_RELATIVE_JUMPS};
use crate::error::VmError;
use crate::opcode::{builtin_display_dispatch, split_dstsrc, Opcode};

use super::ext::ExtensionTable;
use super::state::{VmState, MEM_WORDS, REG_COUNT};
use crate::clock::Clock;

/// The virtual machine: fixed state plus the read-only code/constants it
/// was loaded with and the extension table it dispatches through.
pub struct Vm {
    pub state: VmState,
    code: Vec<u8>,
    consts: Vec<i32>,
    ext: ExtensionTable,
    clock: Box<dyn Clock>,
    pub err: Option<VmError>,
}

impl Default for Vm {
    fn default() -> Self {
        Vm {
            state: VmState::default(),
            code: Vec::new(),
            consts: Vec::new(),
            ext: ExtensionTable::new(),
            clock: Box::new(crate::clock::SystemClock::default()),
            err: None,
        }
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm::default()
    }

    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        Vm {
            clock,
            ..Vm::default()
        }
    }

    pub fn register_extension(&mut self, id: u8, handler: Box<dyn super::ext::ExtensionHandler>) {
        self.ext.register(id, handler);
    }

    /// Reset all state and install code, constants, and flags from a
    /// decoded container (spec §4.2). Extension handlers registered
    /// before this call survive it; the container only supplies which
    /// ids are *required*, not their implementations.
    pub fn load(&mut self, container: &Container) {
        self.state.reset();
        self.state.pc = container.entry_point;
        self.state.flags = container.flags;
        self.code = container.code.clone();
        self.consts = container.constants.clone();
        self.err = None;
    }

    /// Decode raw LBC bytes and load the result in one step (spec §4.2's
    /// `load(container) → ok | load-error`). A rejected container leaves
    /// the VM's prior state untouched and reports `VmError::LoadFail`;
    /// callers that need the precise reason should call
    /// `Container::decode` themselves instead.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        let container = Container::decode(bytes).map_err(|_| VmError::LoadFail)?;
        self.load(&container);
        Ok(())
    }

    pub fn halted(&self) -> bool {
        self.state.halted
    }

    pub fn error(&self) -> Option<VmError> {
        self.err
    }

    pub fn registers(&self) -> &[i32; REG_COUNT] {
        &self.state.regs
    }

    pub fn memory(&self) -> &[i32; MEM_WORDS] {
        &self.state.mem
    }

    fn fail(&mut self, e: VmError) {
        self.err = Some(e);
        self.state.halted = true;
    }

    fn fetch_u8(&mut self) -> Option<u8> {
        let pc = self.state.pc as usize;
        if pc >= self.code.len() {
            return None;
        }
        self.state.pc += 1;
        Some(self.code[pc])
    }

    fn fetch_i8(&mut self) -> Option<i8> {
        self.fetch_u8().map(|b| b as i8)
    }

    fn fetch_u16(&mut self) -> Option<u16> {
        let lo = self.fetch_u8()?;
        let hi = self.fetch_u8()?;
        Some(u16::from_le_bytes([lo, hi]))
    }

    fn fetch_i32(&mut self) -> Option<i32> {
        let b0 = self.fetch_u8()?;
        let b1 = self.fetch_u8()?;
        let b2 = self.fetch_u8()?;
        let b3 = self.fetch_u8()?;
        Some(i32::from_le_bytes([b0, b1, b2, b3]))
    }

    fn fetch_dstsrc(&mut self) -> Option<(u8, u8)> {
        self.fetch_u8().map(split_dstsrc)
    }

    fn code_len(&self) -> u16 {
        self.code.len() as u16
    }

    /// Absolute jump: the target must already have been fetched by the
    /// caller (it needs to know which opcode requested it, for a
    /// malformed-operand error to be reported consistently).
    fn jump_absolute(&mut self, target: u16) -> Result<(), VmError> {
        if target < self.code_len() {
            self.state.pc = target;
            Ok(())
        } else {
            Err(VmError::BadOpcode)
        }
    }

    /// Relative jump (spec §4.3): page-local by default, widened to
    /// full 16-bit arithmetic when the container's signed-relative-jump
    /// flag bit is set.
    fn jump_relative(&mut self, rel: i8) -> Result<(), VmError> {
        let target = if self.state.flags & FLAG_SIGNED_RELATIVE_JUMPS != 0 {
            self.state.pc.wrapping_add(rel as i16 as u16)
        } else {
            let hi = self.state.pc & 0xFF00;
            let lo = ((self.state.pc as u8 as i8).wrapping_add(rel)) as u8;
            hi | lo as u16
        };
        self.jump_absolute(target)
    }

    fn reg(&self, idx: u8) -> Result<i32, VmError> {
        if (idx as usize) < REG_COUNT {
            Ok(self.state.regs[idx as usize])
        } else {
            Err(VmError::BadOpcode)
        }
    }

    fn set_reg(&mut self, idx: u8, value: i32) -> Result<(), VmError> {
        if (idx as usize) < REG_COUNT {
            self.state.regs[idx as usize] = value;
            Ok(())
        } else {
            Err(VmError::BadOpcode)
        }
    }

    fn mem_read(&self, addr: u8) -> Result<i32, VmError> {
        if (addr as usize) < MEM_WORDS {
            Ok(self.state.mem[addr as usize])
        } else {
            Err(VmError::BadOpcode)
        }
    }

    fn mem_write(&mut self, addr: u8, value: i32) -> Result<(), VmError> {
        if (addr as usize) < MEM_WORDS {
            self.state.mem[addr as usize] = value;
            Ok(())
        } else {
            Err(VmError::BadOpcode)
        }
    }

    fn const_at(&self, idx: u8) -> Result<i32, VmError> {
        self.consts
            .get(idx as usize)
            .copied()
            .ok_or(VmError::BadOpcode)
    }

    fn binary_arith(&mut self, dstsrc: (u8, u8), f: impl Fn(i32, i32) -> i32) -> Result<(), VmError> {
        let (dst, src) = dstsrc;
        let a = self.reg(dst)?;
        let b = self.reg(src)?;
        self.set_reg(dst, f(a, b))
    }

    fn comparison(&mut self, dstsrc: (u8, u8), f: impl Fn(i32, i32) -> bool) -> Result<(), VmError> {
        let (dst, src) = dstsrc;
        let a = self.reg(dst)?;
        let b = self.reg(src)?;
        self.set_reg(dst, if f(a, b) { 1 } else { 0 })
    }

    fn dispatch_ext(&mut self, ext_id: u8, sub_op: u8) -> Result<(), VmError> {
        let mut state = std::mem::take(&mut self.state);
        let result = self.ext.dispatch(&mut state, ext_id, sub_op);
        self.state = state;
        result
    }

    /// Execute one instruction, or, while a delay is armed, check
    /// whether it has elapsed (spec §4.2). A no-op once `halted`.
    pub fn step(&mut self) {
        if self.state.halted {
            return;
        }
        if self.state.delay.delaying {
            let now = self.clock.now_ms();
            self.state.delay.check(now);
            return;
        }
        if let Err(e) = self.step_inner() {
            self.fail(e);
        }
    }

    /// Run until halted. Hosts with their own event loop should prefer
    /// calling `step()` directly so they can interleave other work.
    pub fn run(&mut self) {
        while !self.state.halted {
            self.step();
        }
    }

    fn step_inner(&mut self) -> Result<(), VmError> {
        let op_byte = self.fetch_u8().ok_or(VmError::BadOpcode)?;
        let op = Opcode::from_u8(op_byte).ok_or(VmError::BadOpcode)?;

        if let Some((ext_id, sub_op)) = builtin_display_dispatch(op) {
            return self.dispatch_ext(ext_id, sub_op);
        }

        use Opcode::*;
        match op {
            Noop => Ok(()),
            Movi => {
                let dst = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let imm = self.fetch_i32().ok_or(VmError::BadOpcode)?;
                self.set_reg(dst, imm)
            }
            Mov => {
                let (dst, src) = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                let v = self.reg(src)?;
                self.set_reg(dst, v)
            }
            Load => {
                let dst = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let addr = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let v = self.mem_read(addr)?;
                self.set_reg(dst, v)
            }
            Store => {
                let addr = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let src = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let v = self.reg(src)?;
                self.mem_write(addr, v)
            }
            Push => {
                let src = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let v = self.reg(src)?;
                self.state.push(v).ok_or(VmError::StackOverflow)
            }
            Pop => {
                let dst = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                if dst as usize >= REG_COUNT {
                    return Err(VmError::BadOpcode);
                }
                let v = self.state.pop().ok_or(VmError::StackUnderflow)?;
                self.set_reg(dst, v)
            }
            Ldc => {
                let dst = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let idx = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let v = self.const_at(idx)?;
                self.set_reg(dst, v)
            }
            Add => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.binary_arith(ds, |a, b| a.wrapping_add(b))
            }
            Sub => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.binary_arith(ds, |a, b| a.wrapping_sub(b))
            }
            Mul => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.binary_arith(ds, |a, b| a.wrapping_mul(b))
            }
            Div => {
                let (dst, src) = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                let a = self.reg(dst)?;
                let b = self.reg(src)?;
                if b == 0 {
                    return Err(VmError::DivByZero);
                }
                self.set_reg(dst, a.wrapping_div(b))
            }
            Mod => {
                let (dst, src) = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                let a = self.reg(dst)?;
                let b = self.reg(src)?;
                if b == 0 {
                    return Err(VmError::DivByZero);
                }
                self.set_reg(dst, a.wrapping_rem(b))
            }
            Abs => {
                let dst = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let v = self.reg(dst)?;
                self.set_reg(dst, v.wrapping_abs())
            }
            Max => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.binary_arith(ds, |a, b| a.max(b))
            }
            Min => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.binary_arith(ds, |a, b| a.min(b))
            }
            And => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.binary_arith(ds, |a, b| a & b)
            }
            Or => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.binary_arith(ds, |a, b| a | b)
            }
            Xor => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.binary_arith(ds, |a, b| a ^ b)
            }
            Not => {
                let dst = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let v = self.reg(dst)?;
                self.set_reg(dst, !v)
            }
            Eq => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.comparison(ds, |a, b| a == b)
            }
            Neq => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.comparison(ds, |a, b| a != b)
            }
            Geq => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.comparison(ds, |a, b| a >= b)
            }
            Leq => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.comparison(ds, |a, b| a <= b)
            }
            Gt => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.comparison(ds, |a, b| a > b)
            }
            Lt => {
                let ds = self.fetch_dstsrc().ok_or(VmError::BadOpcode)?;
                self.comparison(ds, |a, b| a < b)
            }
            Jmpa => {
                let target = self.fetch_u16().ok_or(VmError::BadOpcode)?;
                self.jump_absolute(target)
            }
            Jmpr => {
                let rel = self.fetch_i8().ok_or(VmError::BadOpcode)?;
                self.jump_relative(rel)
            }
            Jza => {
                let cond = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let target = self.fetch_u16().ok_or(VmError::BadOpcode)?;
                if self.reg(cond)? == 0 {
                    self.jump_absolute(target)
                } else {
                    Ok(())
                }
            }
            Jzr => {
                let cond = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let rel = self.fetch_i8().ok_or(VmError::BadOpcode)?;
                if self.reg(cond)? == 0 {
                    self.jump_relative(rel)
                } else {
                    Ok(())
                }
            }
            Jnza => {
                let cond = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let target = self.fetch_u16().ok_or(VmError::BadOpcode)?;
                if self.reg(cond)? != 0 {
                    self.jump_absolute(target)
                } else {
                    Ok(())
                }
            }
            Jnzr => {
                let cond = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let rel = self.fetch_i8().ok_or(VmError::BadOpcode)?;
                if self.reg(cond)? != 0 {
                    self.jump_relative(rel)
                } else {
                    Ok(())
                }
            }
            Calla => {
                let target = self.fetch_u16().ok_or(VmError::BadOpcode)?;
                let return_pc = self.state.pc as i32;
                self.state.push(return_pc).ok_or(VmError::StackOverflow)?;
                self.jump_absolute(target)
            }
            Callr => {
                let rel = self.fetch_i8().ok_or(VmError::BadOpcode)?;
                let return_pc = self.state.pc as i32;
                self.state.push(return_pc).ok_or(VmError::StackOverflow)?;
                self.jump_relative(rel)
            }
            Ret => {
                let target = self.state.pop().ok_or(VmError::StackUnderflow)?;
                if !(0..=u16::MAX as i32).contains(&target) {
                    return Err(VmError::BadOpcode);
                }
                self.jump_absolute(target as u16)
            }
            Ext => {
                let ext_id = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let sub_op = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                self.dispatch_ext(ext_id, sub_op)
            }
            Delay => {
                let reg = self.fetch_u8().ok_or(VmError::BadOpcode)?;
                let amount = self.reg(reg)?;
                let now = self.clock.now_ms();
                self.state.delay.arm(amount, now);
                Ok(())
            }
            Halt => {
                self.state.halted = true;
                Ok(())
            }
            DSrgb | DFrgb | DShow | DClr | DNled => unreachable!(
                "handled above by builtin_display_dispatch before the main match"
            ),
        }
    }
}
