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

//! Label & Relocation Registry (spec.md §4.2): per-unit bookkeeping for
//! which pc-labels still need a name resolved against the DYO import table
//! once a function has finished emitting. Covers both genuinely external
//! symbols and references to other functions/objects in this same unit:
//! both are resolved identically by the linker's exports-map-then-host-
//! lookup fallback, so there is no need to distinguish them here.

use crate::codegen::mca::PcLabel;

/// A `mov64 rax, imm64` site whose immediate names a function or data
/// object by symbol name, to be recorded as a DYO Import + CodeReference
/// ToGlobal pair.
#[derive(Debug, Clone)]
pub struct ImportFixup {
    pub name: String,
    pub label: PcLabel,
}

/// Accumulates fixups across an entire translation unit as functions are
/// emitted one at a time. Handed to the DYO writer once code generation for
/// the unit completes.
#[derive(Default)]
pub struct Registry {
    pub imports: Vec<ImportFixup>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { imports: Vec::new() }
    }

    pub fn record_import(&mut self, name: impl Into<String>, label: PcLabel) {
        self.imports.push(ImportFixup {
            name: name.into(),
            label,
        });
    }
}
