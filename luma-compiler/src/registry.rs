//! Extension registry: maps namespaced call syntax (`neopixel.fill_rgb`)
//! to an extension id and sub-opcode at compile time.
//!
//! Ported from the reference `Extension.h`/`ExtensionRegistry`, but built
//! as a plain value the caller constructs and passes around rather than
//! a process-wide `instance()` singleton (spec §9 redesign note).

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtFunction {
    pub sub_op: u8,
    pub arg_count: usize,
    pub has_return_value: bool,
}

#[derive(Debug, Clone)]
pub struct ExtensionDescriptor {
    pub id: u8,
    pub functions: HashMap<&'static str, ExtFunction>,
}

impl ExtensionDescriptor {
    pub fn function(&self, name: &str) -> Option<&ExtFunction> {
        self.functions.get(name)
    }
}

fn neopixel() -> ExtensionDescriptor {
    let mut functions = HashMap::new();
    functions.insert(
        "set_rgb",
        ExtFunction {
            sub_op: 0x00,
            arg_count: 4,
            has_return_value: false,
        },
    );
    functions.insert(
        "fill_rgb",
        ExtFunction {
            sub_op: 0x01,
            arg_count: 3,
            has_return_value: false,
        },
    );
    functions.insert(
        "show",
        ExtFunction {
            sub_op: 0x02,
            arg_count: 0,
            has_return_value: false,
        },
    );
    functions.insert(
        "clear",
        ExtFunction {
            sub_op: 0x03,
            arg_count: 0,
            has_return_value: false,
        },
    );
    functions.insert(
        "num_leds",
        ExtFunction {
            sub_op: 0x04,
            arg_count: 0,
            has_return_value: true,
        },
    );
    ExtensionDescriptor { id: 0x01, functions }
}

fn microphone() -> ExtensionDescriptor {
    let mut functions = HashMap::new();
    functions.insert(
        "read",
        ExtFunction {
            sub_op: 0x00,
            arg_count: 0,
            has_return_value: true,
        },
    );
    ExtensionDescriptor { id: 0x02, functions }
}

/// Name-to-descriptor table consulted by the parser/code generator while
/// resolving namespaced calls. Constructed fresh per compilation.
#[derive(Debug, Clone)]
pub struct Registry {
    extensions: HashMap<&'static str, ExtensionDescriptor>,
}

impl Registry {
    /// The registry pre-populated with the two reference extensions the
    /// toolchain ships (spec §4.9): `neopixel` and `microphone`.
    pub fn with_builtins() -> Self {
        let mut extensions = HashMap::new();
        extensions.insert("neopixel", neopixel());
        extensions.insert("microphone", microphone());
        Registry { extensions }
    }

    pub fn empty() -> Self {
        Registry {
            extensions: HashMap::new(),
        }
    }

    pub fn get(&self, namespace: &str) -> Option<&ExtensionDescriptor> {
        self.extensions.get(namespace)
    }

    pub fn resolve(&self, namespace: &str, function: &str) -> Option<(u8, &ExtFunction)> {
        let ext = self.get(namespace)?;
        let func = ext.function(function)?;
        Some((ext.id, func))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_neopixel_fill_rgb_resolves_to_sub_op_one() {
        let reg = Registry::with_builtins();
        let (id, func) = reg.resolve("neopixel", "fill_rgb").unwrap();
        assert_eq!(id, 0x01);
        assert_eq!(func.sub_op, 0x01);
        assert_eq!(func.arg_count, 3);
    }

    #[test]
    fn check_microphone_read_has_return_value() {
        let reg = Registry::with_builtins();
        let (id, func) = reg.resolve("microphone", "read").unwrap();
        assert_eq!(id, 0x02);
        assert!(func.has_return_value);
    }

    #[test]
    fn check_unknown_namespace_resolves_to_none() {
        let reg = Registry::with_builtins();
        assert!(reg.resolve("bogus", "fn").is_none());
    }

    #[test]
    fn check_empty_registry_has_no_builtins() {
        let reg = Registry::empty();
        assert!(reg.resolve("neopixel", "fill_rgb").is_none());
    }
}
