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

//! The DYO object format and linker (spec.md §4.8).

pub mod format;
pub mod linker;
pub mod reader;
pub mod writer;

/// Walks a `.dyo` byte stream and renders a human-readable listing of its
/// records, for debugging failed links without a disassembler.
pub fn dump_dyo_file(bytes: &[u8]) -> Result<String, crate::errors::DyoError> {
    use reader::DyoReader;
    use std::fmt::Write;

    let mut reader = DyoReader::new(bytes)?;
    let mut out = String::new();
    while let Some(rec) = reader.next_record()? {
        let _ = writeln!(
            out,
            "@{:08x} type={:<3} len={}",
            rec.file_offset,
            rec.record_type,
            rec.payload.len()
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use writer::DyoWriter;

    #[test]
    fn dump_lists_every_record_in_order() {
        let mut w = DyoWriter::new();
        w.write_import("puts");
        w.write_code(&[0x90]);
        let dump = dump_dyo_file(&w.into_bytes()).unwrap();
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines.len(), 3); // String, Import, X64Code
        assert!(lines[2].contains("type=100"));
    }
}
