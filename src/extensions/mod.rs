//! Reference extension handlers for the two built-in descriptors the
//! compiler's `Registry` ships with (spec §4.9).

pub mod microphone;
pub mod neopixel;

pub use microphone::Microphone;
pub use neopixel::Neopixel;

use lumavm::Vm;

/// Registers `neopixel` (id `0x01`) and `microphone` (id `0x02`) on
/// `vm`, ready for any container produced against the compiler's
/// built-in `Registry` (spec §4.9).
pub fn register_reference_extensions(vm: &mut Vm) {
    vm.register_extension(0x01, Box::new(Neopixel::new()));
    vm.register_extension(0x02, Box::new(Microphone::default()));
}
