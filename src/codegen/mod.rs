/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! x86-64 CodeGen (spec.md §4): ties the assembler, label registry, ABI
//! classifier, frame planner and lowerer together into whole-function
//! emission, and drives one translation unit's worth of functions and
//! data objects into a DYO blob.

pub mod abi;
pub mod cast_table;
pub mod data;
pub mod frame;
pub mod lower;
pub mod mca;
pub mod registry;

use crate::dyo::writer::DyoWriter;
use crate::errors::CodegenError;
use crate::ir::{Function, GlobalObj, TopLevel};
use mca::{Assembler, Reg};
use registry::Registry;

/// One translation unit's worth of code generation: accumulates all
/// function bodies into a single assembler (so intra-unit `lea rax,
/// [entry_label]` references resolve against real pc-labels), then emits
/// everything as one DYO blob.
pub struct Session {
    asm: Assembler,
    registry: Registry,
    entry_point_fn: Option<String>,
    pending_objects: Vec<GlobalObj>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            asm: Assembler::new(),
            registry: Registry::new(),
            entry_point_fn: None,
            pending_objects: Vec::new(),
        }
    }

    /// Designates which function's entry label becomes the unit's
    /// `EntryPoint` record (spec.md §4.8's "main's special bookkeeping").
    pub fn set_entry_point(&mut self, function_name: impl Into<String>) {
        self.entry_point_fn = Some(function_name.into());
    }

    pub fn emit_top_level(&mut self, item: &TopLevel) -> Result<FunctionExportInfo, CodegenError> {
        match item {
            TopLevel::Function(func) => {
                if !func.is_definition || !func.is_live {
                    return Ok(FunctionExportInfo::None);
                }
                let entry = self.emit_function(func)?;
                Ok(FunctionExportInfo::Function {
                    name: func.name.clone(),
                    entry,
                    is_static: func.is_static,
                })
            }
            TopLevel::Object(obj) => {
                self.pending_objects.push(obj.clone());
                Ok(FunctionExportInfo::None)
            }
        }
    }

    fn emit_function(&mut self, func: &Function) -> Result<mca::PcLabel, CodegenError> {
        let mut planned = func.clone();
        frame::assign_lvar_offsets(&mut planned);

        let entry_label = self.asm.new_pc_label();
        let return_label = self.asm.new_pc_label();
        self.asm.place_pc_label(entry_label);
        self.asm.label_text(&planned.name);

        // Prologue: save caller's frame, reserve locals, spill
        // register-passed parameters to their assigned stack slots.
        self.asm.push_reg(Reg::Rbp);
        self.asm.mov_rr(Reg::Rbp, Reg::Rsp, 8);
        if planned.stack_size > 0 {
            self.asm.sub_imm(Reg::Rsp, planned.stack_size as i32, 8);
        }
        let alloca_bottom_offset = planned.var(planned.alloca_bottom).offset as i32;
        self.asm.mov_store(Reg::Rbp, alloca_bottom_offset, Reg::Rsp, 8);

        // Save arg registers if the function is variadic.
        if let Some(va_area) = planned.va_area {
            let mut gp = 0i64;
            let mut fp = 0i64;
            for &param_id in &planned.params {
                if planned.var(param_id).ty.is_flonum() {
                    fp += 1;
                } else {
                    gp += 1;
                }
            }
            let off = planned.var(va_area).offset as i32;

            self.asm.mov_imm(Reg::Rax, gp * 8, 4);
            self.asm.mov_store(Reg::Rbp, off, Reg::Rax, 4); // gp_offset
            self.asm.mov_imm(Reg::Rax, fp * 8 + 48, 4);
            self.asm.mov_store(Reg::Rbp, off + 4, Reg::Rax, 4); // fp_offset
            self.asm.lea(Reg::Rax, Reg::Rbp, 16);
            self.asm.mov_store(Reg::Rbp, off + 8, Reg::Rax, 8); // overflow_arg_area
            self.asm.lea(Reg::Rax, Reg::Rbp, off + 24);
            self.asm.mov_store(Reg::Rbp, off + 16, Reg::Rax, 8); // reg_save_area

            self.asm.mov_store(Reg::Rbp, off + 24, Reg::Rdi, 8);
            self.asm.mov_store(Reg::Rbp, off + 32, Reg::Rsi, 8);
            self.asm.mov_store(Reg::Rbp, off + 40, Reg::Rdx, 8);
            self.asm.mov_store(Reg::Rbp, off + 48, Reg::Rcx, 8);
            self.asm.mov_store(Reg::Rbp, off + 56, Reg::R8, 8);
            self.asm.mov_store(Reg::Rbp, off + 64, Reg::R9, 8);
            self.asm.movsd_store(Reg::Rbp, off + 72, 0);
            self.asm.movsd_store(Reg::Rbp, off + 80, 1);
            self.asm.movsd_store(Reg::Rbp, off + 88, 2);
            self.asm.movsd_store(Reg::Rbp, off + 96, 3);
            self.asm.movsd_store(Reg::Rbp, off + 104, 4);
            self.asm.movsd_store(Reg::Rbp, off + 112, 5);
            self.asm.movsd_store(Reg::Rbp, off + 120, 6);
            self.asm.movsd_store(Reg::Rbp, off + 128, 7);
        }

        let mut gp_idx = 0usize;
        let mut sse_idx = 0usize;
        for &param_id in &planned.params {
            let var = planned.var(param_id);
            if var.offset_fixed {
                continue; // already on the stack from the caller
            }
            let offset = var.offset as i32;
            if var.ty.is_flonum() {
                if var.ty.kind == crate::ir::TypeKind::Float {
                    self.asm.movss_store(Reg::Rbp, offset, sse_idx as u8);
                } else {
                    self.asm.movsd_store(Reg::Rbp, offset, sse_idx as u8);
                }
                sse_idx += 1;
            } else {
                let reg = Reg::ARG_GP[gp_idx];
                self.asm.mov_store(Reg::Rbp, offset, reg, var.ty.size.max(8) as u8);
                gp_idx += 1;
            }
        }

        if planned.name == "main" {
            // dyibicc's `main` wrapper zeroes RAX up front so a
            // fall-through with no explicit `return` still yields 0.
            self.asm.mov_imm(Reg::Rax, 0, 4);
        }

        {
            let mut lowerer = lower::Lowerer::new(&mut self.asm, &mut self.registry, &planned, return_label);
            lowerer.gen_stmt(&planned.body)?;
        }

        self.asm.place_pc_label(return_label);
        self.asm.mov_rr(Reg::Rsp, Reg::Rbp, 8);
        self.asm.pop_reg(Reg::Rbp);
        self.asm.ret();

        Ok(entry_label)
    }

    /// Writes the accumulated assembly text (spec.md §4's diagnostic
    /// dual-emission output) to `sink`.
    pub fn emit_diagnostics(&self, sink: &mut (impl crate::diagnostics::DiagnosticSink + ?Sized)) {
        sink.emit(&self.asm.text);
    }

    /// Finalizes the assembler and writes every accumulated export,
    /// import/data fixup, and the code blob itself into a DYO writer.
    pub fn finish(mut self, exports: Vec<(String, mca::PcLabel, bool)>) -> DyoWriter {
        self.asm.link();

        let mut writer = DyoWriter::new();

        for import in &self.registry.imports {
            writer.write_import(&import.name);
        }

        let entry_offset = self
            .entry_point_fn
            .as_ref()
            .and_then(|name| exports.iter().find(|(n, _, _)| n == name))
            .map(|(_, label, _)| self.asm.get_offset(*label));

        for (name, label, is_static) in &exports {
            if *is_static {
                continue; // static functions are still callable intra-unit via pc-labels, never exported
            }
            writer.write_function_export(name, self.asm.get_offset(*label));
        }

        for import in &self.registry.imports {
            writer.write_code_reference_to_global(
                &import.name,
                self.asm.fixup_patch_offset(import.label),
            );
        }

        for obj in &self.pending_objects {
            data::emit_data(&mut writer, obj, &self.asm);
        }

        if let Some(offset) = entry_offset {
            writer.write_entrypoint(offset);
        }

        let mut code = Vec::new();
        self.asm.encode(&mut code);
        writer.write_code(&code);

        writer
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub enum FunctionExportInfo {
    None,
    Function {
        name: String,
        entry: mca::PcLabel,
        is_static: bool,
    },
}
