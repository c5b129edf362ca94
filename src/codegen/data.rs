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

//! Data Emitter (spec.md §4.7): walks a global object's initializer bytes
//! and relocations in lockstep, handing byte runs and relocation records to
//! the DYO writer, or declaring a zero-filled bss span when there is no
//! initializer at all.

use crate::codegen::mca::{Assembler, PcLabel};
use crate::dyo::writer::DyoWriter;
use crate::ir::{GlobalObj, RelocTarget};

/// Emits one global object's initializer into `writer`. Tentative
/// definitions and declarations without `init_data` become a bare
/// size-only bss record; everything else is walked byte range by byte
/// range, interrupted at each relocation site. `asm` resolves
/// `RelocTarget::Code` pc-labels to their final byte offset, so this must
/// run after `Assembler::link()`.
pub fn emit_data(writer: &mut DyoWriter, obj: &GlobalObj, asm: &Assembler) {
    let Some(data) = &obj.init_data else {
        writer.write_bss(&obj.name, obj.ty.size as u32);
        return;
    };

    writer.write_initialized_data(&obj.name, obj.ty.size as u32, obj.is_static);

    let mut relocs: Vec<_> = obj.relocations.iter().collect();
    relocs.sort_by_key(|r| r.offset);

    let mut cursor = 0usize;
    for reloc in &relocs {
        let reloc_off = reloc.offset as usize;
        if reloc_off > cursor {
            writer.write_initializer_bytes(&data[cursor..reloc_off]);
        }
        match &reloc.target {
            RelocTarget::Data(name) => {
                writer.write_initializer_data_relocation(name, reloc.addend);
            }
            RelocTarget::Code(label) => {
                let offset = asm.get_offset(PcLabel(*label));
                writer.write_initializer_code_relocation(offset, reloc.addend);
            }
        }
        cursor = reloc_off + 8; // relocations are always pointer-sized
    }
    if cursor < data.len() {
        writer.write_initializer_bytes(&data[cursor..]);
    }

    writer.write_initializer_end(&obj.name, obj.ty.size as u32, obj.is_static);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GlobalRelocation, Type, TypeKind};

    #[test]
    fn declaration_without_init_data_becomes_bss() {
        let mut w = DyoWriter::new();
        let obj = GlobalObj {
            name: "counter".into(),
            ty: Type::basic(TypeKind::Int, 4, 4, false),
            is_definition: true,
            is_static: false,
            is_tentative: true,
            is_tls: false,
            init_data: None,
            relocations: vec![],
        };
        emit_data(&mut w, &obj, &Assembler::new());
        assert!(w.records.iter().any(|r| r.is_bss()));
    }

    #[test]
    fn relocation_splits_the_byte_run() {
        let mut w = DyoWriter::new();
        let obj = GlobalObj {
            name: "p".into(),
            ty: Type::basic(TypeKind::Pointer, 8, 8, true),
            is_definition: true,
            is_static: false,
            is_tentative: false,
            is_tls: false,
            init_data: Some(vec![0u8; 8]),
            relocations: vec![GlobalRelocation {
                offset: 0,
                addend: 0,
                target: crate::ir::RelocTarget::Data("target".into()),
            }],
        };
        emit_data(&mut w, &obj, &Assembler::new());
        assert!(w.records.iter().any(|r| matches!(
            r,
            crate::dyo::writer::EmittedRecord::InitializerDataRelocation { .. }
        )));
    }
}
