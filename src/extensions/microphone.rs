//! Reference `microphone` extension (id `0x02`): a single-channel level
//! reader. The host-side sample source is pluggable so tests and
//! `lumarun --trace` runs don't depend on real audio input.

use lumavm::error::VmError;
use lumavm::vm::{ExtensionHandler, VmState};

/// Supplies the next sample for `read()`. The default implementation
/// always reports silence; hosts that actually have a microphone
/// attached provide their own.
pub trait SampleSource {
    fn next_sample(&mut self) -> i32;
}

pub struct Silence;
impl SampleSource for Silence {
    fn next_sample(&mut self) -> i32 {
        0
    }
}

/// `sub_op` values: `read=0x00` (the only function `Extension.h`'s
/// `Microphone` descriptor declares).
pub struct Microphone {
    source: Box<dyn SampleSource>,
}

impl Microphone {
    pub fn new(source: Box<dyn SampleSource>) -> Self {
        Microphone { source }
    }
}

impl Default for Microphone {
    fn default() -> Self {
        Microphone::new(Box::new(Silence))
    }
}

impl ExtensionHandler for Microphone {
    fn call(&mut self, vm: &mut VmState, sub_op: u8) -> Result<(), VmError> {
        match sub_op {
            0x00 => {
                vm.regs[0] = self.source.next_sample();
                Ok(())
            }
            _ => Err(VmError::UnknownExtension { id: 0x02 }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(i32);
    impl SampleSource for Fixed {
        fn next_sample(&mut self) -> i32 {
            self.0
        }
    }

    #[test]
    fn check_read_writes_sample_into_r0() {
        let mut ext = Microphone::new(Box::new(Fixed(777)));
        let mut vm = VmState::default();
        ext.call(&mut vm, 0x00).unwrap();
        assert_eq!(vm.regs[0], 777);
    }

    #[test]
    fn check_default_source_reports_silence() {
        let mut ext = Microphone::default();
        let mut vm = VmState::default();
        ext.call(&mut vm, 0x00).unwrap();
        assert_eq!(vm.regs[0], 0);
    }

    #[test]
    fn check_unknown_sub_op_errors() {
        let mut ext = Microphone::default();
        let mut vm = VmState::default();
        assert_eq!(ext.call(&mut vm, 0x09), Err(VmError::UnknownExtension { id: 0x02 }));
    }
}
