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

//! DYO Writer (spec.md §4.8): an append-only record stream with a string
//! intern cache, producing the byte layout `link.c`'s reader expects.

use crate::dyo::format::*;
use crate::errors::DyoError;
use std::collections::HashMap;

/// A structured log of what was written, kept alongside the byte stream so
/// tests (and a future `dump_dyo_file`-style inspector) don't need to
/// re-parse the binary form to see what happened.
#[derive(Debug, Clone)]
pub enum EmittedRecord {
    Import { name: String },
    FunctionExport { name: String, offset: u32 },
    CodeReferenceToGlobal { name: String, patch_offset: u32 },
    InitializedData { name: String, size: u32, is_static: bool },
    InitializerEnd { name: String, size: u32, is_static: bool },
    InitializerBytes { len: usize },
    InitializerDataRelocation { target: String, addend: i64 },
    InitializerCodeRelocation { code_offset: u32, addend: i64 },
    Bss { name: String, size: u32 },
    Code { len: usize },
    EntryPoint { offset: u32 },
}

impl EmittedRecord {
    pub fn is_bss(&self) -> bool {
        matches!(self, EmittedRecord::Bss { .. })
    }
}

pub struct DyoWriter {
    pub bytes: Vec<u8>,
    pub records: Vec<EmittedRecord>,
    strings: HashMap<String, u32>,
    code_written: bool,
}

impl DyoWriter {
    pub fn new() -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(SIGNATURE);
        DyoWriter {
            bytes,
            records: Vec::new(),
            strings: HashMap::new(),
            code_written: false,
        }
    }

    fn push_record(&mut self, record_type: u32, payload: &[u8]) -> Result<u32, DyoError> {
        if payload.len() as u32 > MAX_RECORD_LEN {
            return Err(DyoError::RecordTooLarge {
                length: payload.len() as u32,
                capacity: MAX_RECORD_LEN as usize,
            });
        }
        let header = pack_header(record_type, payload.len() as u32);
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(&header.to_le_bytes());
        self.bytes.extend_from_slice(payload);
        Ok(offset)
    }

    /// Interns `s`, writing a fresh String record the first time it's seen
    /// and returning its 1-based table index either way.
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.strings.get(s) {
            return idx;
        }
        self.push_record(RT_STRING, s.as_bytes())
            .expect("string payloads never exceed the record size cap");
        let idx = self.strings.len() as u32 + 1;
        self.strings.insert(s.to_string(), idx);
        idx
    }

    pub fn write_import(&mut self, name: &str) {
        let idx = self.intern(name);
        self.push_record(RT_IMPORT, &idx.to_le_bytes()).unwrap();
        self.records.push(EmittedRecord::Import {
            name: name.to_string(),
        });
    }

    pub fn write_function_export(&mut self, name: &str, offset: u32) {
        let idx = self.intern(name);
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&idx.to_le_bytes());
        payload.extend_from_slice(&offset.to_le_bytes());
        self.push_record(RT_FUNCTION_EXPORT, &payload).unwrap();
        self.records.push(EmittedRecord::FunctionExport {
            name: name.to_string(),
            offset,
        });
    }

    /// Records a `mov64 rax, imm64` fixup site (already resolved to a byte
    /// offset + 2 by the caller) that must be patched with the address of
    /// `name` at link time.
    pub fn write_code_reference_to_global(&mut self, name: &str, patch_offset: u32) {
        let idx = self.intern(name);
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&idx.to_le_bytes());
        payload.extend_from_slice(&patch_offset.to_le_bytes());
        self.push_record(RT_CODE_REFERENCE_TO_GLOBAL, &payload)
            .unwrap();
        self.records.push(EmittedRecord::CodeReferenceToGlobal {
            name: name.to_string(),
            patch_offset,
        });
    }

    pub fn write_initialized_data(&mut self, name: &str, size: u32, is_static: bool) {
        let idx = self.intern(name);
        let mut payload = Vec::with_capacity(9);
        payload.extend_from_slice(&idx.to_le_bytes());
        payload.extend_from_slice(&size.to_le_bytes());
        payload.push(is_static as u8);
        self.push_record(RT_INITIALIZED_DATA, &payload).unwrap();
        self.records.push(EmittedRecord::InitializedData {
            name: name.to_string(),
            size,
            is_static,
        });
    }

    /// A tentative/declaration-only object: `InitializedData` immediately
    /// followed by `InitializerEnd` with no byte runs in between, which the
    /// linker treats as a request to zero-fill `size` bytes.
    pub fn write_bss(&mut self, name: &str, size: u32) {
        self.write_initialized_data(name, size, false);
        self.push_end_marker(name, size, false);
        self.records.push(EmittedRecord::Bss {
            name: name.to_string(),
            size,
        });
    }

    pub fn write_initializer_bytes(&mut self, bytes: &[u8]) {
        self.push_record(RT_INITIALIZER_BYTES, bytes).unwrap();
        self.records.push(EmittedRecord::InitializerBytes {
            len: bytes.len(),
        });
    }

    pub fn write_initializer_data_relocation(&mut self, target: &str, addend: i64) {
        let idx = self.intern(target);
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&idx.to_le_bytes());
        payload.extend_from_slice(&addend.to_le_bytes());
        self.push_record(RT_INITIALIZER_DATA_RELOCATION, &payload)
            .unwrap();
        self.records.push(EmittedRecord::InitializerDataRelocation {
            target: target.to_string(),
            addend,
        });
    }

    /// Relocation against a position in this unit's own code, given as a
    /// byte offset already resolved by the assembler (callers write data
    /// records after `Assembler::link()`, so every pc-label has a final
    /// offset by the time this runs).
    pub fn write_initializer_code_relocation(&mut self, code_offset: u32, addend: i64) {
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&code_offset.to_le_bytes());
        payload.extend_from_slice(&addend.to_le_bytes());
        self.push_record(RT_INITIALIZER_CODE_RELOCATION, &payload).unwrap();
        self.records.push(EmittedRecord::InitializerCodeRelocation {
            code_offset,
            addend,
        });
    }

    fn push_end_marker(&mut self, name: &str, size: u32, is_static: bool) {
        let idx = self.intern(name);
        let mut payload = Vec::with_capacity(9);
        payload.extend_from_slice(&idx.to_le_bytes());
        payload.extend_from_slice(&size.to_le_bytes());
        payload.push(is_static as u8);
        self.push_record(RT_INITIALIZER_END, &payload).unwrap();
    }

    pub fn write_initializer_end(&mut self, name: &str, size: u32, is_static: bool) {
        self.push_end_marker(name, size, is_static);
        self.records.push(EmittedRecord::InitializerEnd {
            name: name.to_string(),
            size,
            is_static,
        });
    }

    /// Exactly one X64Code record per file, and it must be the last record
    /// before any trailing EntryPoint (spec.md §4.8 invariant).
    pub fn write_code(&mut self, code: &[u8]) {
        assert!(!self.code_written, "write_code called more than once");
        self.push_record(RT_X64_CODE, code).unwrap();
        self.code_written = true;
        self.records.push(EmittedRecord::Code { len: code.len() });
    }

    /// Must precede the `X64Code` record (spec.md §4.8 invariant: "must
    /// precede type 100").
    pub fn write_entrypoint(&mut self, offset: u32) {
        assert!(
            !self.code_written,
            "EntryPoint record must be written before the code record"
        );
        self.push_record(RT_ENTRY_POINT, &offset.to_le_bytes()).unwrap();
        self.records.push(EmittedRecord::EntryPoint { offset });
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Default for DyoWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_first_sixteen_bytes() {
        let w = DyoWriter::new();
        assert_eq!(&w.bytes[0..16], SIGNATURE);
    }

    #[test]
    fn repeated_names_reuse_the_same_string_index() {
        let mut w = DyoWriter::new();
        w.write_import("puts");
        w.write_import("puts");

        let mut pos = 16usize;
        let mut string_records = 0;
        while pos < w.bytes.len() {
            let header = u32::from_le_bytes(w.bytes[pos..pos + 4].try_into().unwrap());
            let (record_type, len) = unpack_header(header);
            if record_type == RT_STRING {
                string_records += 1;
            }
            pos += 4 + len as usize;
        }
        assert_eq!(string_records, 1);
    }

    #[test]
    fn entrypoint_after_code_panics() {
        let result = std::panic::catch_unwind(|| {
            let mut w = DyoWriter::new();
            w.write_code(&[0x90]);
            w.write_entrypoint(0);
        });
        assert!(result.is_err());
    }
}
