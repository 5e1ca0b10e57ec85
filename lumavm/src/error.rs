use thiserror::Error;

/// A fatal VM runtime error. Detection of any of these halts the VM in
/// the same step that raised it (spec §7): `err` and `halted` are set
/// together, never one without the other.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    #[error("bad opcode, truncated operand, or out-of-range register/memory/jump target")]
    BadOpcode,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("division or modulo by zero")]
    DivByZero,
    #[error("dispatch to unregistered extension id 0x{id:02x}")]
    UnknownExtension { id: u8 },
    #[error("container rejected by loader")]
    LoadFail,
}
