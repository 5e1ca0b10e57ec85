pub mod ext;
pub mod interp;
pub mod state;

pub use ext::{ExtensionHandler, ExtensionTable};
pub use interp::Vm;
pub use state::{DelayState, VmState, MEM_WORDS, REG_COUNT, STACK_WORDS};
