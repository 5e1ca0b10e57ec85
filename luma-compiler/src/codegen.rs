//! Tree-walking code generator (spec §4.8), ground in the reference
//! `CodegenVisitor`. Lowers a [`Program`] straight into an LBC
//! [`Container`] image — no intermediate IR.

use std::collections::HashMap;

use thiserror::Error;

use lumavm::container::{Container, ExtensionTableEntry};
use lumavm::opcode::{pack_dstsrc, Opcode};

use crate::ast::{BinOp, Expr, Program, Stmt};
use crate::registry::Registry;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("use of undeclared variable `{name}`")]
    UndeclaredVariable { name: String },
    #[error("assignment to undeclared variable `{name}`")]
    UndeclaredAssignTarget { name: String },
    #[error("out of registers")]
    OutOfRegisters,
    #[error("unknown extension `{name}` in require statement")]
    UnknownExtension { name: String },
    #[error("unknown extension function `{namespace}.{name}`")]
    UnknownExtensionFunction { namespace: String, name: String },
    #[error("unknown function `{name}`")]
    UnknownBareCall { name: String },
}

/// 8-slot scratch register bitmap. The generator never treats a
/// register as stable storage — variables live in global memory.
struct RegAllocator {
    used: [bool; 8],
}

impl RegAllocator {
    fn new() -> Self {
        RegAllocator { used: [false; 8] }
    }

    fn alloc(&mut self) -> Result<u8, CodegenError> {
        for (i, slot) in self.used.iter_mut().enumerate() {
            if !*slot {
                *slot = true;
                return Ok(i as u8);
            }
        }
        Err(CodegenError::OutOfRegisters)
    }

    fn free(&mut self, r: u8) {
        self.used[r as usize] = false;
    }

    fn is_used(&self, r: u8) -> bool {
        self.used[r as usize]
    }

    fn mark_used(&mut self, r: u8) {
        self.used[r as usize] = true;
    }
}

pub struct Codegen<'a> {
    registry: &'a Registry,
    code: Vec<u8>,
    var_map: HashMap<String, u8>,
    allocator: RegAllocator,
    next_var_loc: u8,
    var_loc_stack: Vec<u8>,
    ext_ids: Vec<u8>,
}

impl<'a> Codegen<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Codegen {
            registry,
            code: Vec::new(),
            var_map: HashMap::new(),
            allocator: RegAllocator::new(),
            next_var_loc: 0,
            var_loc_stack: Vec::new(),
            ext_ids: Vec::new(),
        }
    }

    pub fn compile(program: &Program, registry: &Registry) -> Result<Container, CodegenError> {
        let mut gen = Codegen::new(registry);
        gen.gen_program(program)?;
        let extensions = gen
            .ext_ids
            .into_iter()
            .map(|id| ExtensionTableEntry { id })
            .collect();
        Ok(Container::new(gen.code, Vec::new(), extensions))
    }

    fn emit_u8(&mut self, v: u8) {
        self.code.push(v);
    }

    fn emit_u16(&mut self, v: u16) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_i32(&mut self, v: i32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_dstsrc(&mut self, dst: u8, src: u8) {
        self.code.push(pack_dstsrc(dst, src));
    }

    fn patch_u16(&mut self, at: usize, v: u16) {
        self.code[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn gen_program(&mut self, program: &Program) -> Result<(), CodegenError> {
        for req in &program.requires {
            let ext = self
                .registry
                .get(req)
                .ok_or_else(|| CodegenError::UnknownExtension { name: req.clone() })?;
            self.ext_ids.push(ext.id);
        }
        for stmt in &program.stmts {
            self.gen_stmt(stmt)?;
        }
        Ok(())
    }

    fn gen_stmt(&mut self, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Expr(expr) => {
                let reg = self.gen_expr(expr)?;
                self.allocator.free(reg);
                Ok(())
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => self.gen_if(cond, then_branch, else_branch.as_deref()),
            Stmt::Loop { body } => self.gen_loop(body),
            Stmt::Block(stmts) => self.gen_block(stmts),
            Stmt::VarDecl { name, init } => self.gen_var_decl(name, init.as_ref()),
        }
    }

    fn gen_if(
        &mut self,
        cond: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
    ) -> Result<(), CodegenError> {
        let cond_reg = self.gen_expr(cond)?;
        self.allocator.free(cond_reg);
        self.emit_u8(Opcode::Jza.as_u8());
        self.emit_u8(cond_reg);
        let jmp_pos = self.code.len();
        self.emit_u16(0);

        self.gen_stmt(then_branch)?;

        if let Some(else_branch) = else_branch {
            self.emit_u8(Opcode::Jmpa.as_u8());
            let jend_pos = self.code.len();
            self.emit_u16(0);

            let addr = self.code.len() as u16;
            self.patch_u16(jmp_pos, addr);

            self.gen_stmt(else_branch)?;

            let addr = self.code.len() as u16;
            self.patch_u16(jend_pos, addr);
        } else {
            let addr = self.code.len() as u16;
            self.patch_u16(jmp_pos, addr);
        }
        Ok(())
    }

    fn gen_loop(&mut self, body: &Stmt) -> Result<(), CodegenError> {
        let loop_start = self.code.len() as u16;
        self.gen_stmt(body)?;
        self.emit_u8(Opcode::Jmpa.as_u8());
        self.emit_u16(loop_start);
        Ok(())
    }

    fn gen_block(&mut self, stmts: &[Stmt]) -> Result<(), CodegenError> {
        self.var_loc_stack.push(self.next_var_loc);
        for stmt in stmts {
            self.gen_stmt(stmt)?;
        }
        self.next_var_loc = self
            .var_loc_stack
            .pop()
            .expect("pushed exactly once above");
        Ok(())
    }

    fn gen_var_decl(&mut self, name: &str, init: Option<&Expr>) -> Result<(), CodegenError> {
        let slot = self.next_var_loc;
        self.next_var_loc += 1;
        self.var_map.insert(name.to_string(), slot);

        let reg = match init {
            Some(expr) => self.gen_expr(expr)?,
            None => self.allocator.alloc()?,
        };
        self.emit_u8(Opcode::Store.as_u8());
        self.emit_u8(slot);
        self.emit_u8(reg);
        self.allocator.free(reg);
        Ok(())
    }

    fn gen_expr(&mut self, expr: &Expr) -> Result<u8, CodegenError> {
        match expr {
            Expr::Number(n) => {
                let reg = self.allocator.alloc()?;
                self.emit_u8(Opcode::Movi.as_u8());
                self.emit_u8(reg);
                self.emit_i32(*n);
                Ok(reg)
            }
            Expr::Var(name) => {
                let slot = *self
                    .var_map
                    .get(name)
                    .ok_or_else(|| CodegenError::UndeclaredVariable { name: name.clone() })?;
                let reg = self.allocator.alloc()?;
                self.emit_u8(Opcode::Load.as_u8());
                self.emit_u8(reg);
                self.emit_u8(slot);
                Ok(reg)
            }
            Expr::Assign { name, value } => {
                let reg = self.gen_expr(value)?;
                let slot = *self.var_map.get(name).ok_or_else(|| {
                    CodegenError::UndeclaredAssignTarget {
                        name: name.clone(),
                    }
                })?;
                self.emit_u8(Opcode::Store.as_u8());
                self.emit_u8(slot);
                self.emit_u8(reg);
                Ok(reg)
            }
            Expr::Binary { op, lhs, rhs } => {
                let r_lhs = self.gen_expr(lhs)?;
                let r_rhs = self.gen_expr(rhs)?;
                self.emit_u8(binop_opcode(*op).as_u8());
                self.emit_dstsrc(r_lhs, r_rhs);
                self.allocator.free(r_rhs);
                Ok(r_lhs)
            }
            Expr::Call { namespace, name, args } => self.gen_call(namespace.as_deref(), name, args),
        }
    }

    fn gen_call(
        &mut self,
        namespace: Option<&str>,
        name: &str,
        args: &[Expr],
    ) -> Result<u8, CodegenError> {
        if !args.is_empty() {
            let mut arg_regs = Vec::with_capacity(args.len());
            for arg in args {
                arg_regs.push(self.gen_expr(arg)?);
            }
            for &reg in &arg_regs {
                self.allocator.free(reg);
            }
            for (i, &reg) in arg_regs.iter().enumerate().take(4) {
                if reg != i as u8 {
                    self.emit_u8(Opcode::Mov.as_u8());
                    self.emit_dstsrc(i as u8, reg);
                }
            }
            for &reg in arg_regs.iter().skip(4).rev() {
                self.emit_u8(Opcode::Push.as_u8());
                self.emit_u8(reg);
            }
        }

        if let Some(namespace) = namespace {
            let (ext_id, func) = self.registry.resolve(namespace, name).ok_or_else(|| {
                CodegenError::UnknownExtensionFunction {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
            })?;
            if func.has_return_value {
                if self.allocator.is_used(0) {
                    self.emit_u8(Opcode::Push.as_u8());
                    self.emit_u8(0);
                }
                self.allocator.mark_used(0);
            }
            self.emit_u8(Opcode::Ext.as_u8());
            self.emit_u8(ext_id);
            self.emit_u8(func.sub_op);
            return Ok(0);
        }

        if name == "delay" {
            self.emit_u8(Opcode::Delay.as_u8());
            self.emit_u8(0);
            return Ok(0);
        }

        Err(CodegenError::UnknownBareCall {
            name: name.to_string(),
        })
    }
}

/// Maps a source binary operator to the opcode that implements it.
/// Every `BinOp` variant gets the opcode it actually names — a binary
/// expression never lowers to a plain register move.
fn binop_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Div,
        BinOp::Mod => Opcode::Mod,
        BinOp::Eq => Opcode::Eq,
        BinOp::Neq => Opcode::Neq,
        BinOp::Greater => Opcode::Gt,
        BinOp::Less => Opcode::Lt,
        BinOp::Geq => Opcode::Geq,
        BinOp::Leq => Opcode::Leq,
        BinOp::LogicalAnd => Opcode::And,
        BinOp::LogicalOr => Opcode::Or,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::parse;

    fn compile_src(src: &str) -> Container {
        let toks = Lexer::new(src).tokenize_all().unwrap();
        let program = parse(toks).unwrap();
        let registry = Registry::with_builtins();
        Codegen::compile(&program, &registry).unwrap()
    }

    #[test]
    fn check_number_literal_emits_movi() {
        let container = compile_src("1;");
        assert_eq!(container.code[0], Opcode::Movi.as_u8());
        assert_eq!(container.code[1], 0); // r0
        assert_eq!(&container.code[2..6], &1i32.to_le_bytes());
    }

    #[test]
    fn check_binary_expr_emits_matching_opcode_not_mov() {
        let container = compile_src("let x = 1 + 2;");
        // MOVI r0,1 ; MOVI r1,2 ; ADD r0,r1 ; STORE slot,r0
        let add_pos = 6 + 6;
        assert_eq!(container.code[add_pos], Opcode::Add.as_u8());
        assert_eq!(
            container.code[add_pos],
            binop_opcode(BinOp::Add).as_u8()
        );
        assert_ne!(container.code[add_pos], Opcode::Mov.as_u8());
    }

    #[test]
    fn check_var_decl_then_read_round_trips_through_a_slot() {
        let container = compile_src("let x = 5; x;");
        assert!(container.code.contains(&Opcode::Store.as_u8()));
        assert!(container.code.contains(&Opcode::Load.as_u8()));
    }

    #[test]
    fn check_scenario_6_let_then_reassign_matches_expected_bytes() {
        // spec.md §8 scenario 6: `let x = 3; x = x + 4;` compiles to:
        // allocate slot 0, MOVI r,3; STORE 0,r; LOAD a,0; MOVI b,4; ADD a,b; STORE 0,a
        // with r=a=0 and b=1 (the allocator reuses r0 once it's freed).
        let container = compile_src("let x = 3; x = x + 4;");
        let mut expected = vec![];
        expected.push(Opcode::Movi.as_u8());
        expected.push(0); // r0
        expected.extend_from_slice(&3i32.to_le_bytes());
        expected.push(Opcode::Store.as_u8());
        expected.push(0); // slot 0
        expected.push(0); // src r0
        expected.push(Opcode::Load.as_u8());
        expected.push(0); // r0
        expected.push(0); // slot 0
        expected.push(Opcode::Movi.as_u8());
        expected.push(1); // r1
        expected.extend_from_slice(&4i32.to_le_bytes());
        expected.push(Opcode::Add.as_u8());
        expected.push(pack_dstsrc(0, 1));
        expected.push(Opcode::Store.as_u8());
        expected.push(0); // slot 0
        expected.push(0); // src r0
        assert_eq!(container.code, expected);
    }

    #[test]
    fn check_undeclared_variable_is_a_codegen_error() {
        let toks = Lexer::new("x;").tokenize_all().unwrap();
        let program = parse(toks).unwrap();
        let registry = Registry::with_builtins();
        assert_eq!(
            Codegen::compile(&program, &registry),
            Err(CodegenError::UndeclaredVariable {
                name: "x".to_string()
            })
        );
    }

    #[test]
    fn check_unknown_require_is_a_codegen_error() {
        let toks = Lexer::new("require bogus;").tokenize_all().unwrap();
        let program = parse(toks).unwrap();
        let registry = Registry::with_builtins();
        assert_eq!(
            Codegen::compile(&program, &registry),
            Err(CodegenError::UnknownExtension {
                name: "bogus".to_string()
            })
        );
    }

    #[test]
    fn check_unqualified_unknown_call_is_rejected() {
        let toks = Lexer::new("foo();").tokenize_all().unwrap();
        let program = parse(toks).unwrap();
        let registry = Registry::with_builtins();
        assert_eq!(
            Codegen::compile(&program, &registry),
            Err(CodegenError::UnknownBareCall {
                name: "foo".to_string()
            })
        );
    }

    #[test]
    fn check_require_populates_extension_table_with_resolved_id() {
        let container = compile_src("require neopixel;\nneopixel.show();");
        assert_eq!(container.extensions.len(), 1);
        assert_eq!(container.extensions[0].id, 0x01);
    }

    #[test]
    fn check_delay_call_emits_delay_opcode_on_r0() {
        let container = compile_src("delay(500);");
        // MOVI r0,500 ; DELAY r0
        assert_eq!(container.code[6], Opcode::Delay.as_u8());
        assert_eq!(container.code[7], 0);
    }

    #[test]
    fn check_neopixel_blink_program_matches_expected_bytes() {
        // spec.md §8 scenario 5:
        // require neopixel; loop { neopixel.fill_rgb(255,0,0); neopixel.show(); delay(500); }
        // compiles to a code section beginning with:
        // MOVI R0,255; MOVI R1,0; MOVI R2,0; EXT 01 01; EXT 01 02; MOVI R0,500; DELAY R0; JMPA <start>
        let container = compile_src(
            "require neopixel;\n\
             loop {\n\
             \tneopixel.fill_rgb(255, 0, 0);\n\
             \tneopixel.show();\n\
             \tdelay(500);\n\
             }",
        );
        assert_eq!(container.extensions.len(), 1);
        assert_eq!(container.extensions[0].id, 0x01);

        let mut expected = vec![];
        expected.push(Opcode::Movi.as_u8());
        expected.push(0); // r0
        expected.extend_from_slice(&255i32.to_le_bytes());
        expected.push(Opcode::Movi.as_u8());
        expected.push(1); // r1
        expected.extend_from_slice(&0i32.to_le_bytes());
        expected.push(Opcode::Movi.as_u8());
        expected.push(2); // r2
        expected.extend_from_slice(&0i32.to_le_bytes());
        expected.push(Opcode::Ext.as_u8());
        expected.push(0x01); // neopixel
        expected.push(0x01); // fill_rgb
        expected.push(Opcode::Ext.as_u8());
        expected.push(0x01); // neopixel
        expected.push(0x02); // show
        expected.push(Opcode::Movi.as_u8());
        expected.push(0); // r0
        expected.extend_from_slice(&500i32.to_le_bytes());
        expected.push(Opcode::Delay.as_u8());
        expected.push(0); // r0
        expected.push(Opcode::Jmpa.as_u8());
        expected.extend_from_slice(&0u16.to_le_bytes()); // loop start

        assert_eq!(container.code, expected);
    }
}
