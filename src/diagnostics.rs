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

//! Diagnostics sink: the assembly text a [`crate::codegen::Session`]
//! accumulates alongside its encoded bytes is the crate's diagnostic
//! output (spec.md §4's dual emission: "the assembly text is diagnostic").
//! This trait lets a caller choose where that text goes instead of
//! hardcoding a destination.

pub trait DiagnosticSink {
    fn emit(&mut self, text: &str);
}

/// Default sink: writes straight to stderr, the way this codebase's
/// assembler phases report failures via plain `eprintln!` rather than a
/// logging framework.
#[derive(Default)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn emit(&mut self, text: &str) {
        eprint!("{text}");
    }
}

/// In-memory sink for tests and tooling that wants to inspect the
/// generated assembly text without going through stderr.
#[derive(Default)]
pub struct CapturingSink {
    pub buffer: String,
}

impl DiagnosticSink for CapturingSink {
    fn emit(&mut self, text: &str) {
        self.buffer.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capturing_sink_accumulates_across_calls() {
        let mut sink = CapturingSink::default();
        sink.emit("main:\n");
        sink.emit("  ret\n");
        assert_eq!(sink.buffer, "main:\n  ret\n");
    }
}
