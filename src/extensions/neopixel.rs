//! Reference `neopixel` extension (id `0x01`): an in-memory LED strip
//! that both `lumac`'s generated containers and hand-written bytecode
//! can target through `EXT 0x01, sub_op` (spec §4.4/§4.9).

use lumavm::error::VmError;
use lumavm::vm::{ExtensionHandler, VmState};

const STRIP_LEN: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// `sub_op` values match `original_source/tools/compiler/Extension.h`'s
/// `Neopixel` descriptor: `set_rgb=0x00 fill_rgb=0x01 show=0x02
/// clear=0x03 num_leds=0x04`.
pub struct Neopixel {
    pixels: [Rgb; STRIP_LEN],
    /// Set by `show`; inspectable by hosts/tests without parsing stdout.
    pub last_shown: Option<[Rgb; STRIP_LEN]>,
}

impl Neopixel {
    pub fn new() -> Self {
        Neopixel {
            pixels: [Rgb::default(); STRIP_LEN],
            last_shown: None,
        }
    }

    pub fn pixels(&self) -> &[Rgb; STRIP_LEN] {
        &self.pixels
    }
}

impl Default for Neopixel {
    fn default() -> Self {
        Neopixel::new()
    }
}

fn byte(word: i32) -> u8 {
    (word & 0xFF) as u8
}

impl ExtensionHandler for Neopixel {
    fn call(&mut self, vm: &mut VmState, sub_op: u8) -> Result<(), VmError> {
        match sub_op {
            0x00 => {
                // set_rgb(index, r, g, b)
                let index = vm.regs[0] as usize;
                if index >= STRIP_LEN {
                    return Err(VmError::BadOpcode);
                }
                self.pixels[index] = Rgb {
                    r: byte(vm.regs[1]),
                    g: byte(vm.regs[2]),
                    b: byte(vm.regs[3]),
                };
                Ok(())
            }
            0x01 => {
                // fill_rgb(r, g, b)
                let rgb = Rgb {
                    r: byte(vm.regs[0]),
                    g: byte(vm.regs[1]),
                    b: byte(vm.regs[2]),
                };
                self.pixels = [rgb; STRIP_LEN];
                Ok(())
            }
            0x02 => {
                // show()
                self.last_shown = Some(self.pixels);
                println!(
                    "neopixel.show: {}",
                    self.pixels
                        .iter()
                        .map(|p| format!("#{:02x}{:02x}{:02x}", p.r, p.g, p.b))
                        .collect::<Vec<_>>()
                        .join(" ")
                );
                Ok(())
            }
            0x03 => {
                // clear()
                self.pixels = [Rgb::default(); STRIP_LEN];
                Ok(())
            }
            0x04 => {
                // num_leds() -> R0
                vm.regs[0] = STRIP_LEN as i32;
                Ok(())
            }
            _ => Err(VmError::UnknownExtension { id: 0x01 }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_fill_rgb_sets_every_pixel() {
        let mut ext = Neopixel::new();
        let mut vm = VmState::default();
        vm.regs[0] = 10;
        vm.regs[1] = 20;
        vm.regs[2] = 30;
        ext.call(&mut vm, 0x01).unwrap();
        for p in ext.pixels() {
            assert_eq!(*p, Rgb { r: 10, g: 20, b: 30 });
        }
    }

    #[test]
    fn check_set_rgb_only_touches_one_pixel() {
        let mut ext = Neopixel::new();
        let mut vm = VmState::default();
        vm.regs[0] = 2; // index
        vm.regs[1] = 1;
        vm.regs[2] = 2;
        vm.regs[3] = 3;
        ext.call(&mut vm, 0x00).unwrap();
        assert_eq!(ext.pixels()[2], Rgb { r: 1, g: 2, b: 3 });
        assert_eq!(ext.pixels()[0], Rgb::default());
    }

    #[test]
    fn check_num_leds_writes_strip_length_into_r0() {
        let mut ext = Neopixel::new();
        let mut vm = VmState::default();
        ext.call(&mut vm, 0x04).unwrap();
        assert_eq!(vm.regs[0], STRIP_LEN as i32);
    }

    #[test]
    fn check_out_of_range_index_is_rejected() {
        let mut ext = Neopixel::new();
        let mut vm = VmState::default();
        vm.regs[0] = 99;
        assert_eq!(ext.call(&mut vm, 0x00), Err(VmError::BadOpcode));
    }

    #[test]
    fn check_clear_resets_every_pixel() {
        let mut ext = Neopixel::new();
        let mut vm = VmState::default();
        vm.regs[0] = 255;
        vm.regs[1] = 255;
        vm.regs[2] = 255;
        ext.call(&mut vm, 0x01).unwrap();
        ext.call(&mut vm, 0x03).unwrap();
        assert_eq!(ext.pixels()[0], Rgb::default());
    }
}
