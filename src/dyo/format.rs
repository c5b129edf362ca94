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

//! DYO record layout constants (spec.md §4.8 / original `dyo.c`): the
//! 16-byte signature, record type tags, and the `(type<<24)|length` header
//! shared by every record.

/// Every `.dyo` file starts with this fixed ASCII signature.
pub const SIGNATURE: &[u8; 16] = b"DYOBJECT-FMT-1\0\0";

pub const RT_STRING: u32 = 1;
pub const RT_IMPORT: u32 = 2;
pub const RT_FUNCTION_EXPORT: u32 = 3;
pub const RT_CODE_REFERENCE_TO_GLOBAL: u32 = 4;
pub const RT_INITIALIZED_DATA: u32 = 5;
pub const RT_INITIALIZER_END: u32 = 6;
pub const RT_INITIALIZER_BYTES: u32 = 7;
pub const RT_INITIALIZER_DATA_RELOCATION: u32 = 8;
pub const RT_INITIALIZER_CODE_RELOCATION: u32 = 9;
pub const RT_X64_CODE: u32 = 100;
pub const RT_ENTRY_POINT: u32 = 101;

/// Max payload length a single record can carry: 24 bits, since the high
/// byte of the header word is the type tag.
pub const MAX_RECORD_LEN: u32 = 0x00FF_FFFF;

pub fn pack_header(record_type: u32, length: u32) -> u32 {
    debug_assert!(length <= MAX_RECORD_LEN);
    (record_type << 24) | (length & MAX_RECORD_LEN)
}

pub fn unpack_header(word: u32) -> (u32, u32) {
    (word >> 24, word & MAX_RECORD_LEN)
}
