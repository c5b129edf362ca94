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

//! A textbook x86-64 backend for a C compiler: lowers a typed IR into
//! dual-output machine code (assembly text plus encoded bytes), packages
//! each translation unit as a `.dyo` object, and links a set of `.dyo`
//! objects into executable memory in the host process.
//!
//! The three stages are independently usable: [`codegen`] turns IR into a
//! `.dyo` blob, [`dyo`] reads/writes/links that format, and [`host`]
//! abstracts the OS services the linker needs (page allocation/protection,
//! dynamic symbol lookup) behind traits so the whole pipeline can be driven
//! against an in-memory fake in tests.

pub mod codegen;
pub mod diagnostics;
pub mod dyo;
pub mod errors;
pub mod host;
pub mod ir;

use anyhow::{Context, Result};
use diagnostics::DiagnosticSink;
use host::{HostSymbols, MemoryManager};
use ir::TopLevel;

/// Emits one translation unit's `.dyo` object from its IR top-level items.
/// `entry_point` names the function (if any) whose address becomes the
/// unit's `EntryPoint` record; pass `None` for a unit with no `main`. When
/// `sink` is given, the unit's generated assembly text is reported to it
/// before the object is finalized.
pub fn compile_unit(
    items: &[TopLevel],
    entry_point: Option<&str>,
    sink: Option<&mut dyn DiagnosticSink>,
) -> Result<Vec<u8>> {
    let mut session = codegen::Session::new();
    if let Some(name) = entry_point {
        session.set_entry_point(name);
    }

    let mut exports = Vec::new();
    for item in items {
        match session
            .emit_top_level(item)
            .context("failed to emit a top-level item")?
        {
            codegen::FunctionExportInfo::None => {}
            codegen::FunctionExportInfo::Function { name, entry, is_static } => {
                exports.push((name, entry, is_static));
            }
        }
    }

    if let Some(sink) = sink {
        session.emit_diagnostics(sink);
    }

    Ok(session.finish(exports).into_bytes())
}

/// Links a set of already-compiled `.dyo` units (as produced by
/// [`compile_unit`]) into executable memory, resolving cross-unit and host
/// symbols through `mem`/`host`. Returns the address of the entry point
/// recorded by whichever unit called [`codegen::Session::set_entry_point`].
pub fn link_units(
    unit_bytes: &[&[u8]],
    mem: &mut impl MemoryManager,
    host: &impl HostSymbols,
) -> Result<dyo::linker::LinkResult> {
    dyo::linker::link(unit_bytes, mem, host).context("failed to link DYO units")
}
