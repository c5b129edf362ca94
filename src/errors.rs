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

use thiserror::Error;

use crate::ir::Token;

#[derive(Error, Debug, PartialEq)]
pub enum CodegenError {
    #[error("{tok:?}: not an lvalue")]
    NotAnLvalue { tok: Token },

    #[error("{tok:?}: invalid expression")]
    InvalidExpression { tok: Token },

    #[error("{tok:?}: invalid statement")]
    InvalidStatement { tok: Token },

    #[error("unsupported long double to integer conversion: {from} -> {to}")]
    UnsupportedF80Conversion { from: &'static str, to: &'static str },

    #[error("thread-local variable access reached code emission: {name}")]
    ThreadLocalNotSupported { name: String },
}

#[derive(Error, Debug, PartialEq)]
pub enum DyoError {
    #[error("record length {length} exceeds reader buffer of {capacity} bytes")]
    RecordTooLarge { length: u32, capacity: usize },

    #[error("bad DYO signature")]
    BadSignature,

    #[error("unexpected end of DYO stream")]
    UnexpectedEof,

    #[error("I/O error: {0}")]
    Io(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum LinkError {
    #[error(transparent)]
    Dyo(#[from] DyoError),

    #[error("undefined symbol: {0}")]
    UndefinedSymbol(String),

    #[error("initializer for \"{name}\" overran its declared size of {size} bytes")]
    InitializerOverrun { name: String, size: u32 },

    #[error("initialized data not allocated: {0}")]
    DataNotAllocated(String),

    #[error("too many DYO units in one link (max {max})")]
    TooManyUnits { max: usize },

    #[error("failed to allocate {bytes} writable bytes")]
    AllocationFailed { bytes: usize },

    #[error("failed to flip code region executable")]
    ProtectionFailed,
}
