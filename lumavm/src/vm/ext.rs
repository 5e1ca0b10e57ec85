//! Extension dispatch
//!
//! An execution-environment-interface trait: the interpreter only ever
//! calls through this trait, never owning knowledge of what a concrete
//! extension does.

use super::state::VmState;
use crate::error::VmError;

/// A host-provided handler for one extension id.
///
/// Arguments are read from `R0..R3` (and, beyond the fourth, from the
/// stack in push order) per spec §4.4. A handler that produces a value
/// writes it into `R0` before returning. A handler must not mutate `pc`
/// or the code section; it may return an error to abort execution.
pub trait ExtensionHandler {
    fn call(&mut self, vm: &mut VmState, sub_op: u8) -> Result<(), VmError>;
}

/// A 256-entry table keyed by extension id, constructed per VM instance
/// (spec §9: no process-wide singleton on the runtime side).
#[derive(Default)]
pub struct ExtensionTable {
    handlers: Vec<Option<Box<dyn ExtensionHandler>>>,
}

impl ExtensionTable {
    pub fn new() -> Self {
        let mut handlers = Vec::with_capacity(256);
        handlers.resize_with(256, || None);
        ExtensionTable { handlers }
    }

    pub fn register(&mut self, id: u8, handler: Box<dyn ExtensionHandler>) {
        self.handlers[id as usize] = Some(handler);
    }

    pub fn dispatch(&mut self, vm: &mut VmState, ext_id: u8, sub_op: u8) -> Result<(), VmError> {
        match self.handlers[ext_id as usize].as_mut() {
            Some(handler) => handler.call(vm, sub_op),
            None => Err(VmError::UnknownExtension { id: ext_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(i32);
    impl ExtensionHandler for Echo {
        fn call(&mut self, vm: &mut VmState, sub_op: u8) -> Result<(), VmError> {
            self.0 = sub_op as i32;
            vm.regs[0] = self.0;
            Ok(())
        }
    }

    #[test]
    fn check_unregistered_extension_errors() {
        let mut table = ExtensionTable::new();
        let mut vm = VmState::default();
        assert_eq!(
            table.dispatch(&mut vm, 0x01, 0x00),
            Err(VmError::UnknownExtension { id: 0x01 })
        );
    }

    #[test]
    fn check_registered_extension_dispatches() {
        let mut table = ExtensionTable::new();
        table.register(0x01, Box::new(Echo(0)));
        let mut vm = VmState::default();
        table.dispatch(&mut vm, 0x01, 7).unwrap();
        assert_eq!(vm.regs[0], 7);
    }
}
