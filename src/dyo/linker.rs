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

//! DYO Linker (spec.md §4.8): a three-pass in-memory linker that allocates
//! executable/data regions for a set of `.dyo` units, resolves cross-unit
//! and host symbols, applies relocations, and hands back an entry point.
//!
//! Multiple units declaring the same data object name is treated as one
//! authoritative definition (first occurrence wins); the spec is silent on
//! multi-unit tentative-definition merging, so this is the simplest rule
//! that doesn't corrupt memory.

use crate::dyo::format::*;
use crate::dyo::reader::{read_i64, read_u32, DyoReader};
use crate::errors::{DyoError, LinkError};
use crate::host::{HostSymbols, MemoryManager, Region};
use std::collections::HashMap;

const MAX_UNITS: usize = 4096;

struct ParsedUnit<'a> {
    records: Vec<(u32, &'a [u8])>,
    strings: Vec<String>,
}

fn parse_unit(bytes: &[u8]) -> Result<ParsedUnit<'_>, DyoError> {
    let mut reader = DyoReader::new(bytes)?;
    let mut records = Vec::new();
    let mut strings = Vec::new();
    while let Some(rec) = reader.next_record()? {
        if rec.record_type == RT_STRING {
            strings.push(String::from_utf8_lossy(rec.payload).into_owned());
        }
        records.push((rec.record_type, rec.payload));
    }
    Ok(ParsedUnit { records, strings })
}

fn lookup_string<'a>(strings: &'a [String], idx: u32) -> &'a str {
    &strings[(idx - 1) as usize]
}

pub struct LinkResult {
    pub entry_point: usize,
    pub code_regions: Vec<Region>,
    /// Every function and named data object resolved during linking,
    /// mirroring `link.c`'s own `exports` hashmap: callers can look up any
    /// exported symbol by name, not just the designated entry point.
    pub exports: HashMap<String, usize>,
}

pub fn link(
    unit_bytes: &[&[u8]],
    mem: &mut impl MemoryManager,
    host: &impl HostSymbols,
) -> Result<LinkResult, LinkError> {
    if unit_bytes.len() > MAX_UNITS {
        return Err(LinkError::TooManyUnits { max: MAX_UNITS });
    }

    let units: Vec<ParsedUnit> = unit_bytes
        .iter()
        .map(|b| parse_unit(b).map_err(LinkError::from))
        .collect::<Result<_, _>>()?;

    // Pass 1: allocate. One code region per unit that has an X64Code
    // record; one data region per distinct InitializedData name, sized
    // from its declared size.
    let mut code_regions: Vec<Option<Region>> = Vec::with_capacity(units.len());
    let mut data_regions: HashMap<String, (Region, u32)> = HashMap::new();

    for unit in &units {
        let mut region = None;
        for (rt, payload) in &unit.records {
            match *rt {
                RT_X64_CODE => {
                    region = Some(
                        mem.allocate_writable(payload.len())
                            .ok_or(LinkError::AllocationFailed { bytes: payload.len() })?,
                    );
                }
                RT_INITIALIZED_DATA => {
                    let name_idx = read_u32(payload, 0);
                    let size = read_u32(payload, 4);
                    let name = lookup_string(&unit.strings, name_idx).to_string();
                    if !data_regions.contains_key(&name) {
                        let region = mem
                            .allocate_writable(size.max(1) as usize)
                            .ok_or(LinkError::AllocationFailed { bytes: size as usize })?;
                        data_regions.insert(name, (region, size));
                    }
                }
                _ => {}
            }
        }
        code_regions.push(region);
    }

    // Pass 2: collect exports (functions and named data objects) into one
    // cross-unit symbol table.
    let mut exports: HashMap<String, usize> = HashMap::new();
    for name in data_regions.keys() {
        let (region, _) = &data_regions[name];
        exports.insert(name.clone(), region.addr);
    }
    for (unit, region) in units.iter().zip(&code_regions) {
        let Some(region) = region else { continue };
        for (rt, payload) in &unit.records {
            if *rt == RT_FUNCTION_EXPORT {
                let name_idx = read_u32(payload, 0);
                let offset = read_u32(payload, 4);
                let name = lookup_string(&unit.strings, name_idx).to_string();
                exports.insert(name, region.addr + offset as usize);
            }
        }
    }

    let resolve = |name: &str, exports: &HashMap<String, usize>| -> Result<usize, LinkError> {
        exports
            .get(name)
            .copied()
            .or_else(|| host.host_symbol_lookup(name))
            .ok_or_else(|| LinkError::UndefinedSymbol(name.to_string()))
    };

    // Pass 3: resolve and initialize. Copy code bytes in, patch import/data
    // fixup sites, and replay each object's initializer byte-run +
    // relocation sequence into its data region.
    let mut entry_point = None;

    for (unit, region) in units.iter().zip(&code_regions) {
        let mut cursor_obj: Option<(Region, u32, usize)> = None; // (region, declared size, cursor)

        for (rt, payload) in &unit.records {
            match *rt {
                RT_X64_CODE => {
                    let region = region.as_ref().expect("code region allocated in pass 1");
                    unsafe { region.as_mut_slice()[..payload.len()].copy_from_slice(payload) };
                }
                RT_IMPORT => {
                    let name_idx = read_u32(payload, 0);
                    let name = lookup_string(&unit.strings, name_idx);
                    resolve(name, &exports)?;
                }
                RT_CODE_REFERENCE_TO_GLOBAL => {
                    let name_idx = read_u32(payload, 0);
                    let patch_offset = read_u32(payload, 4);
                    let name = lookup_string(&unit.strings, name_idx);
                    let addr = resolve(name, &exports)?;
                    let region = region.as_ref().expect("code region allocated in pass 1");
                    let slice = unsafe { region.as_mut_slice() };
                    slice[patch_offset as usize..patch_offset as usize + 8]
                        .copy_from_slice(&(addr as u64).to_le_bytes());
                }
                RT_INITIALIZED_DATA => {
                    let name_idx = read_u32(payload, 0);
                    let size = read_u32(payload, 4);
                    let name = lookup_string(&unit.strings, name_idx).to_string();
                    let (region, _) = data_regions
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| LinkError::DataNotAllocated(name.clone()))?;
                    cursor_obj = Some((region, size, 0));
                }
                RT_INITIALIZER_BYTES => {
                    let (region, size, cursor) =
                        cursor_obj.as_mut().expect("InitializerBytes outside an object group");
                    let end = *cursor + payload.len();
                    if end > *size as usize {
                        return Err(LinkError::InitializerOverrun {
                            name: "<anonymous>".into(),
                            size: *size,
                        });
                    }
                    unsafe { region.as_mut_slice()[*cursor..end].copy_from_slice(payload) };
                    *cursor = end;
                }
                RT_INITIALIZER_DATA_RELOCATION => {
                    let target_idx = read_u32(payload, 0);
                    let addend = read_i64(payload, 4);
                    let target = lookup_string(&unit.strings, target_idx);
                    let addr = resolve(target, &exports)?;
                    let (region, size, cursor) =
                        cursor_obj.as_mut().expect("relocation outside an object group");
                    let end = *cursor + 8;
                    if end > *size as usize {
                        return Err(LinkError::InitializerOverrun {
                            name: "<anonymous>".into(),
                            size: *size,
                        });
                    }
                    let value = (addr as i64 + addend) as u64;
                    unsafe {
                        region.as_mut_slice()[*cursor..end].copy_from_slice(&value.to_le_bytes())
                    };
                    *cursor = end;
                }
                RT_INITIALIZER_CODE_RELOCATION => {
                    let code_offset = read_u32(payload, 0);
                    let addend = read_i64(payload, 4);
                    let code_region = region.as_ref().expect("code region allocated in pass 1");
                    let addr = code_region.addr + code_offset as usize;
                    let (region, size, cursor) =
                        cursor_obj.as_mut().expect("relocation outside an object group");
                    let end = *cursor + 8;
                    if end > *size as usize {
                        return Err(LinkError::InitializerOverrun {
                            name: "<anonymous>".into(),
                            size: *size,
                        });
                    }
                    let value = (addr as i64 + addend) as u64;
                    unsafe {
                        region.as_mut_slice()[*cursor..end].copy_from_slice(&value.to_le_bytes())
                    };
                    *cursor = end;
                }
                RT_INITIALIZER_END => {
                    cursor_obj = None;
                }
                RT_ENTRY_POINT => {
                    let offset = read_u32(payload, 0);
                    let region = region.as_ref().expect("code region allocated in pass 1");
                    entry_point = Some(region.addr + offset as usize);
                }
                _ => {}
            }
        }
    }

    let mut flattened_code_regions = Vec::new();
    for region in code_regions.into_iter().flatten() {
        if !mem.make_executable(region) {
            return Err(LinkError::ProtectionFailed);
        }
        flattened_code_regions.push(region);
    }

    let entry_point = entry_point.ok_or_else(|| LinkError::UndefinedSymbol("<entry point>".into()))?;

    Ok(LinkResult {
        entry_point,
        code_regions: flattened_code_regions,
        exports,
    })
}
