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

//! Shared, bounds-checked DYO record stream reader. Used by both the
//! linker (to resolve a unit's records into memory) and the read-only
//! debug dumper.

use crate::dyo::format::{unpack_header, SIGNATURE};
use crate::errors::DyoError;

pub struct DyoRecord<'a> {
    pub record_type: u32,
    pub payload: &'a [u8],
    /// Byte offset of this record's 4-byte header within the file, used by
    /// the linker to locate code-relocation patch sites.
    pub file_offset: u32,
}

pub struct DyoReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DyoReader<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, DyoError> {
        if data.len() < SIGNATURE.len() || &data[..SIGNATURE.len()] != SIGNATURE {
            return Err(DyoError::BadSignature);
        }
        Ok(DyoReader {
            data,
            pos: SIGNATURE.len(),
        })
    }

    /// Reads the next record, or `None` at end of stream.
    pub fn next_record(&mut self) -> Result<Option<DyoRecord<'a>>, DyoError> {
        if self.pos == self.data.len() {
            return Ok(None);
        }
        if self.pos + 4 > self.data.len() {
            return Err(DyoError::UnexpectedEof);
        }
        let header = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        let (record_type, length) = unpack_header(header);
        let file_offset = self.pos as u32;
        let payload_start = self.pos + 4;
        let payload_end = payload_start + length as usize;
        if payload_end > self.data.len() {
            return Err(DyoError::RecordTooLarge {
                length,
                capacity: self.data.len() - payload_start,
            });
        }
        self.pos = payload_end;
        Ok(Some(DyoRecord {
            record_type,
            payload: &self.data[payload_start..payload_end],
            file_offset,
        }))
    }
}

pub fn read_u32(payload: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(payload[at..at + 4].try_into().unwrap())
}

pub fn read_i64(payload: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(payload[at..at + 8].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dyo::writer::DyoWriter;

    #[test]
    fn round_trips_an_import_and_code_record() {
        let mut w = DyoWriter::new();
        w.write_import("puts");
        w.write_code(&[0x90, 0xC3]);
        let bytes = w.into_bytes();

        let mut r = DyoReader::new(&bytes).unwrap();
        let mut types = Vec::new();
        while let Some(rec) = r.next_record().unwrap() {
            types.push(rec.record_type);
        }
        assert_eq!(types, vec![
            crate::dyo::format::RT_STRING,
            crate::dyo::format::RT_IMPORT,
            crate::dyo::format::RT_X64_CODE,
        ]);
    }

    #[test]
    fn rejects_bad_signature() {
        let bytes = vec![0u8; 32];
        assert!(matches!(DyoReader::new(&bytes), Err(DyoError::BadSignature)));
    }
}
