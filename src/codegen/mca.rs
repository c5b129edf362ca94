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

//! Machine-Code Assembler Interface (spec.md §4.1): dual text/byte emission,
//! a growable pc-label table, and rel32 fixup resolution at `link()`.

use std::fmt::Write as _;

/// Identity into the assembler's pc-label table. Dense from 0; growing the
/// table never invalidates previously issued ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcLabel(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    pub fn enc(self) -> u8 {
        self as u8
    }
    pub fn low3(self) -> u8 {
        self.enc() & 7
    }
    pub fn is_ext(self) -> bool {
        self.enc() >= 8
    }

    pub fn name8(self) -> &'static str {
        const N: [&str; 16] = [
            "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b",
            "r12b", "r13b", "r14b", "r15b",
        ];
        N[self.enc() as usize]
    }
    pub fn name16(self) -> &'static str {
        const N: [&str; 16] = [
            "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w",
            "r13w", "r14w", "r15w",
        ];
        N[self.enc() as usize]
    }
    pub fn name32(self) -> &'static str {
        const N: [&str; 16] = [
            "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d",
            "r12d", "r13d", "r14d", "r15d",
        ];
        N[self.enc() as usize]
    }
    pub fn name64(self) -> &'static str {
        const N: [&str; 16] = [
            "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11",
            "r12", "r13", "r14", "r15",
        ];
        N[self.enc() as usize]
    }

    /// Operand-size templating by register index, as spec.md §4.1 requires:
    /// the same logical register is named differently depending on the
    /// width of the access.
    pub fn name(self, size: u8) -> &'static str {
        match size {
            1 => self.name8(),
            2 => self.name16(),
            4 => self.name32(),
            8 => self.name64(),
            _ => unreachable!("unsupported operand size {size}"),
        }
    }

    /// The six SysV integer argument registers, in order.
    pub const ARG_GP: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];
}

fn rex(w: bool, r: bool, x: bool, b: bool) -> Option<u8> {
    if !w && !r && !x && !b {
        None
    } else {
        Some(0x40 | ((w as u8) << 3) | ((r as u8) << 2) | ((x as u8) << 1) | (b as u8))
    }
}

fn modrm(m: u8, reg: u8, rm: u8) -> u8 {
    (m << 6) | ((reg & 7) << 3) | (rm & 7)
}

/// A single fixup: the last 4 bytes starting at `site` are a rel32 relative
/// to the byte immediately following them, pointing at `label`.
struct Rel32Fixup {
    site: u32,
    label: PcLabel,
}

pub struct Assembler {
    pub code: Vec<u8>,
    pub text: String,
    labels: Vec<Option<u32>>,
    fixups: Vec<Rel32Fixup>,
    linked: bool,
}

impl Assembler {
    pub fn new() -> Self {
        Assembler {
            code: Vec::new(),
            text: String::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            linked: false,
        }
    }

    pub fn println(&mut self, line: impl AsRef<str>) {
        self.text.push_str("  ");
        self.text.push_str(line.as_ref());
        self.text.push('\n');
    }

    pub fn label_text(&mut self, name: impl AsRef<str>) {
        let _ = writeln!(self.text, "{}:", name.as_ref());
    }

    /// Allocates a fresh pc-label. The table is append-only; existing ids
    /// keep their value as it grows.
    pub fn new_pc_label(&mut self) -> PcLabel {
        let id = self.labels.len() as u32;
        self.labels.push(None);
        PcLabel(id)
    }

    pub fn place_pc_label(&mut self, id: PcLabel) {
        self.labels[id.0 as usize] = Some(self.code.len() as u32);
    }

    fn place_pc_label_at(&mut self, id: PcLabel, offset: u32) {
        self.labels[id.0 as usize] = Some(offset);
    }

    fn emit(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    fn push_rex(&mut self, w: bool, r: bool, x: bool, b: bool) {
        if let Some(byte) = rex(w, r, x, b) {
            self.code.push(byte);
        }
    }

    // ---- register/stack primitives ----

    pub fn push_reg(&mut self, reg: Reg) {
        self.println(format!("push {}", reg.name64()));
        self.push_rex(false, false, false, reg.is_ext());
        self.code.push(0x50 + reg.low3());
    }

    pub fn pop_reg(&mut self, reg: Reg) {
        self.println(format!("pop {}", reg.name64()));
        self.push_rex(false, false, false, reg.is_ext());
        self.code.push(0x58 + reg.low3());
    }

    pub fn ret(&mut self) {
        self.println("ret");
        self.code.push(0xC3);
    }

    /// `mov reg, imm32/imm64` depending on `size` (4 or 8 bytes).
    pub fn mov_imm(&mut self, reg: Reg, imm: i64, size: u8) {
        self.println(format!("mov {}, {}", reg.name(size), imm as u64 as i64));
        match size {
            4 => {
                self.push_rex(false, false, false, reg.is_ext());
                self.code.push(0xB8 + reg.low3());
                self.emit(&(imm as i32).to_le_bytes());
            }
            8 => {
                self.push_rex(true, false, false, reg.is_ext());
                self.code.push(0xB8 + reg.low3());
                self.emit(&imm.to_le_bytes());
            }
            _ => unreachable!(),
        }
    }

    /// `mov64 reg, imm64`: REX.W + B8+r + 8-byte immediate. The immediate
    /// always lies at instruction-offset + 2 (design note §9); callers that
    /// need a fixup site should use [`Assembler::mov64_fixup`] instead so
    /// that invariant is captured in one place.
    pub fn mov64(&mut self, reg: Reg, imm: u64) {
        self.mov_imm(reg, imm as i64, 8);
    }

    /// Emits `mov64 reg, <placeholder>` and atomically captures the
    /// fixup site as a fresh pc-label placed at the instruction's start,
    /// pairing emission with fixup capture per design note §9.
    pub fn mov64_fixup(&mut self, reg: Reg) -> PcLabel {
        let site = self.code.len() as u32;
        let label = self.new_pc_label();
        self.place_pc_label_at(label, site);
        self.mov64(reg, 0);
        label
    }

    /// Byte offset of the immediate within a `mov64_fixup` site: skips the
    /// REX.W + opcode prefix. See design note §9.
    pub fn fixup_patch_offset(&self, label: PcLabel) -> u32 {
        self.get_offset(label) + 2
    }

    // ---- memory addressing: [base + disp32], base in {rbp, rsp, others} ----

    fn emit_mem_operand(&mut self, reg_field: u8, base: Reg, disp: i32) {
        // RBP/R13 with disp==0 still needs an explicit disp8 escape, since
        // mod=00,rm=101 is the RIP-relative encoding in 64-bit mode.
        let force_disp8 = matches!(base, Reg::Rbp | Reg::R13) && disp == 0;
        let needs_sib = matches!(base, Reg::Rsp | Reg::R12);
        let use_disp8 = (-128..=127).contains(&disp) && !force_disp8 || (force_disp8 && disp == 0);
        let mode = if disp == 0 && !force_disp8 {
            0b00
        } else if use_disp8 {
            0b01
        } else {
            0b10
        };

        self.code.push(modrm(mode, reg_field, base.low3()));
        if needs_sib {
            self.code.push(0x24); // SIB: no index, base = rsp/r12
        }
        match mode {
            0b01 => self.code.push(disp as i8 as u8),
            0b10 => self.emit(&disp.to_le_bytes()),
            _ => {}
        }
    }

    /// `lea dst, [base + disp]`.
    pub fn lea(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.println(format!("lea {}, [{}{:+}]", dst.name64(), base.name64(), disp));
        self.push_rex(true, dst.is_ext(), false, base.is_ext());
        self.code.push(0x8D);
        self.emit_mem_operand(dst.low3(), base, disp);
    }

    /// `lea dst, [rip + label]` (used for `lea rax, [entry_label]`).
    pub fn lea_rip(&mut self, dst: Reg, label: PcLabel) {
        self.println(format!("lea {}, [rel L{}]", dst.name64(), label.0));
        self.push_rex(true, dst.is_ext(), false, false);
        self.code.push(0x8D);
        self.code.push(modrm(0b00, dst.low3(), 0b101));
        let site = self.code.len() as u32;
        self.emit(&0i32.to_le_bytes());
        self.fixups.push(Rel32Fixup { site, label });
    }

    /// `mov dst, [base+disp]` / `movsx`/`movzx` by size, mirroring
    /// spec.md §4.3's `load` contract.
    pub fn mov_load(&mut self, dst: Reg, base: Reg, disp: i32, size: u8, unsigned: bool) {
        match size {
            1 | 2 => {
                let insn = if unsigned { "movzx" } else { "movsx" };
                self.println(format!(
                    "{} {}, [{}{:+}]",
                    insn,
                    dst.name32(),
                    base.name64(),
                    disp
                ));
                self.push_rex(false, dst.is_ext(), false, base.is_ext());
                self.code.push(0x0F);
                self.code.push(if unsigned {
                    if size == 1 { 0xB6 } else { 0xB7 }
                } else if size == 1 {
                    0xBE
                } else {
                    0xBF
                });
                self.emit_mem_operand(dst.low3(), base, disp);
            }
            4 => {
                if unsigned {
                    self.println(format!("mov {}, [{}{:+}]", dst.name32(), base.name64(), disp));
                    self.push_rex(false, dst.is_ext(), false, base.is_ext());
                    self.code.push(0x8B);
                } else {
                    self.println(format!(
                        "movsxd {}, [{}{:+}]",
                        dst.name64(),
                        base.name64(),
                        disp
                    ));
                    self.push_rex(true, dst.is_ext(), false, base.is_ext());
                    self.code.push(0x63);
                }
                self.emit_mem_operand(dst.low3(), base, disp);
            }
            8 => {
                self.println(format!("mov {}, [{}{:+}]", dst.name64(), base.name64(), disp));
                self.push_rex(true, dst.is_ext(), false, base.is_ext());
                self.code.push(0x8B);
                self.emit_mem_operand(dst.low3(), base, disp);
            }
            _ => unreachable!(),
        }
    }

    /// `mov [base+disp], src` by size.
    pub fn mov_store(&mut self, base: Reg, disp: i32, src: Reg, size: u8) {
        self.println(format!(
            "mov [{}{:+}], {}",
            base.name64(),
            disp,
            src.name(size)
        ));
        match size {
            1 => {
                self.push_rex(false, src.is_ext(), false, base.is_ext());
                self.code.push(0x88);
            }
            2 => {
                self.code.push(0x66);
                self.push_rex(false, src.is_ext(), false, base.is_ext());
                self.code.push(0x89);
            }
            4 => {
                self.push_rex(false, src.is_ext(), false, base.is_ext());
                self.code.push(0x89);
            }
            8 => {
                self.push_rex(true, src.is_ext(), false, base.is_ext());
                self.code.push(0x89);
            }
            _ => unreachable!(),
        }
        self.emit_mem_operand(src.low3(), base, disp);
    }

    /// `mov dst, src` register-to-register, by size.
    pub fn mov_rr(&mut self, dst: Reg, src: Reg, size: u8) {
        self.println(format!("mov {}, {}", dst.name(size), src.name(size)));
        match size {
            2 => self.code.push(0x66),
            _ => {}
        }
        self.push_rex(size == 8, src.is_ext(), false, dst.is_ext());
        self.code.push(0x89);
        self.code.push(modrm(0b11, src.low3(), dst.low3()));
    }

    // ---- arithmetic reg,reg (size 4 or 8) ----

    fn alu_rr(&mut self, opcode: u8, dst: Reg, src: Reg, size: u8, mnemonic: &str) {
        self.println(format!("{} {}, {}", mnemonic, dst.name(size), src.name(size)));
        self.push_rex(size == 8, src.is_ext(), false, dst.is_ext());
        self.code.push(opcode);
        self.code.push(modrm(0b11, src.low3(), dst.low3()));
    }

    pub fn add_rr(&mut self, dst: Reg, src: Reg, size: u8) {
        self.alu_rr(0x01, dst, src, size, "add")
    }
    pub fn sub_rr(&mut self, dst: Reg, src: Reg, size: u8) {
        self.alu_rr(0x29, dst, src, size, "sub")
    }
    pub fn and_rr(&mut self, dst: Reg, src: Reg, size: u8) {
        self.alu_rr(0x21, dst, src, size, "and")
    }
    pub fn or_rr(&mut self, dst: Reg, src: Reg, size: u8) {
        self.alu_rr(0x09, dst, src, size, "or")
    }
    pub fn xor_rr(&mut self, dst: Reg, src: Reg, size: u8) {
        self.alu_rr(0x31, dst, src, size, "xor")
    }
    pub fn cmp_rr(&mut self, dst: Reg, src: Reg, size: u8) {
        self.alu_rr(0x39, dst, src, size, "cmp")
    }

    pub fn cmp_imm(&mut self, dst: Reg, imm: i32, size: u8) {
        self.println(format!("cmp {}, {}", dst.name(size), imm));
        self.push_rex(size == 8, false, false, dst.is_ext());
        self.code.push(0x81);
        self.code.push(modrm(0b11, 7, dst.low3()));
        self.emit(&imm.to_le_bytes());
    }

    pub fn sub_imm(&mut self, dst: Reg, imm: i32, size: u8) {
        self.println(format!("sub {}, {}", dst.name(size), imm));
        self.push_rex(size == 8, false, false, dst.is_ext());
        self.code.push(0x81);
        self.code.push(modrm(0b11, 5, dst.low3()));
        self.emit(&imm.to_le_bytes());
    }

    pub fn add_imm(&mut self, dst: Reg, imm: i32, size: u8) {
        self.println(format!("add {}, {}", dst.name(size), imm));
        self.push_rex(size == 8, false, false, dst.is_ext());
        self.code.push(0x81);
        self.code.push(modrm(0b11, 0, dst.low3()));
        self.emit(&imm.to_le_bytes());
    }

    pub fn neg(&mut self, reg: Reg, size: u8) {
        self.println(format!("neg {}", reg.name(size)));
        self.push_rex(size == 8, false, false, reg.is_ext());
        self.code.push(0xF7);
        self.code.push(modrm(0b11, 3, reg.low3()));
    }

    pub fn not(&mut self, reg: Reg, size: u8) {
        self.println(format!("not {}", reg.name(size)));
        self.push_rex(size == 8, false, false, reg.is_ext());
        self.code.push(0xF7);
        self.code.push(modrm(0b11, 2, reg.low3()));
    }

    pub fn imul(&mut self, dst: Reg, src: Reg, size: u8) {
        self.println(format!("imul {}, {}", dst.name(size), src.name(size)));
        self.push_rex(size == 8, dst.is_ext(), false, src.is_ext());
        self.code.push(0x0F);
        self.code.push(0xAF);
        self.code.push(modrm(0b11, dst.low3(), src.low3()));
    }

    pub fn idiv(&mut self, reg: Reg, size: u8) {
        self.println(format!("idiv {}", reg.name(size)));
        self.push_rex(size == 8, false, false, reg.is_ext());
        self.code.push(0xF7);
        self.code.push(modrm(0b11, 7, reg.low3()));
    }

    pub fn div(&mut self, reg: Reg, size: u8) {
        self.println(format!("div {}", reg.name(size)));
        self.push_rex(size == 8, false, false, reg.is_ext());
        self.code.push(0xF7);
        self.code.push(modrm(0b11, 6, reg.low3()));
    }

    pub fn cdq(&mut self) {
        self.println("cdq");
        self.code.push(0x99);
    }
    pub fn cqo(&mut self) {
        self.println("cqo");
        self.push_rex(true, false, false, false);
        self.code.push(0x99);
    }

    pub fn shl_cl(&mut self, reg: Reg, size: u8) {
        self.println(format!("shl {}, cl", reg.name(size)));
        self.push_rex(size == 8, false, false, reg.is_ext());
        self.code.push(0xD3);
        self.code.push(modrm(0b11, 4, reg.low3()));
    }
    pub fn sar_cl(&mut self, reg: Reg, size: u8) {
        self.println(format!("sar {}, cl", reg.name(size)));
        self.push_rex(size == 8, false, false, reg.is_ext());
        self.code.push(0xD3);
        self.code.push(modrm(0b11, 7, reg.low3()));
    }
    pub fn shr_cl(&mut self, reg: Reg, size: u8) {
        self.println(format!("shr {}, cl", reg.name(size)));
        self.push_rex(size == 8, false, false, reg.is_ext());
        self.code.push(0xD3);
        self.code.push(modrm(0b11, 5, reg.low3()));
    }
    pub fn shl_imm(&mut self, reg: Reg, imm: u8, size: u8) {
        self.println(format!("shl {}, {}", reg.name(size), imm));
        self.push_rex(size == 8, false, false, reg.is_ext());
        self.code.push(0xC1);
        self.code.push(modrm(0b11, 4, reg.low3()));
        self.code.push(imm);
    }
    pub fn sar_imm(&mut self, reg: Reg, imm: u8, size: u8) {
        self.println(format!("sar {}, {}", reg.name(size), imm));
        self.push_rex(size == 8, false, false, reg.is_ext());
        self.code.push(0xC1);
        self.code.push(modrm(0b11, 7, reg.low3()));
        self.code.push(imm);
    }
    pub fn shr_imm(&mut self, reg: Reg, imm: u8, size: u8) {
        self.println(format!("shr {}, {}", reg.name(size), imm));
        self.push_rex(size == 8, false, false, reg.is_ext());
        self.code.push(0xC1);
        self.code.push(modrm(0b11, 5, reg.low3()));
        self.code.push(imm);
    }

    pub fn setcc(&mut self, cc: u8, mnemonic: &str, reg: Reg) {
        self.println(format!("set{} {}", mnemonic, reg.name8()));
        if reg.is_ext() || matches!(reg, Reg::Rsp | Reg::Rbp | Reg::Rsi | Reg::Rdi) {
            self.push_rex(false, false, false, reg.is_ext());
        }
        self.code.push(0x0F);
        self.code.push(0x90 + cc);
        self.code.push(modrm(0b11, 0, reg.low3()));
    }

    pub fn movzx8_to_reg(&mut self, dst: Reg, src: Reg, dst_size: u8) {
        self.println(format!("movzx {}, {}", dst.name(dst_size), src.name8()));
        self.push_rex(dst_size == 8, dst.is_ext(), false, src.is_ext());
        self.code.push(0x0F);
        self.code.push(0xB6);
        self.code.push(modrm(0b11, dst.low3(), src.low3()));
    }

    pub fn movsx8_to_reg(&mut self, dst: Reg, src: Reg, dst_size: u8) {
        self.println(format!("movsx {}, {}", dst.name(dst_size), src.name8()));
        self.push_rex(dst_size == 8, dst.is_ext(), false, src.is_ext());
        self.code.push(0x0F);
        self.code.push(0xBE);
        self.code.push(modrm(0b11, dst.low3(), src.low3()));
    }

    pub fn jmp(&mut self, label: PcLabel) {
        self.println(format!("jmp L{}", label.0));
        self.code.push(0xE9);
        let site = self.code.len() as u32;
        self.emit(&0i32.to_le_bytes());
        self.fixups.push(Rel32Fixup { site, label });
    }

    /// `jcc` with a condition byte (the low nibble of `0F 8x`).
    pub fn jcc(&mut self, cc: u8, mnemonic: &str, label: PcLabel) {
        self.println(format!("j{} L{}", mnemonic, label.0));
        self.code.push(0x0F);
        self.code.push(0x80 + cc);
        let site = self.code.len() as u32;
        self.emit(&0i32.to_le_bytes());
        self.fixups.push(Rel32Fixup { site, label });
    }

    pub fn call_reg(&mut self, reg: Reg) {
        self.println(format!("call {}", reg.name64()));
        self.push_rex(false, false, false, reg.is_ext());
        self.code.push(0xFF);
        self.code.push(modrm(0b11, 2, reg.low3()));
    }

    pub fn jmp_reg(&mut self, reg: Reg) {
        self.println(format!("jmp {}", reg.name64()));
        self.push_rex(false, false, false, reg.is_ext());
        self.code.push(0xFF);
        self.code.push(modrm(0b11, 4, reg.low3()));
    }

    pub fn xchg_mem(&mut self, base: Reg, reg: Reg, size: u8) {
        self.println(format!("xchg [{}], {}", base.name64(), reg.name(size)));
        match size {
            1 => {
                self.push_rex(false, reg.is_ext(), false, base.is_ext());
                self.code.push(0x86);
            }
            2 => {
                self.code.push(0x66);
                self.push_rex(false, reg.is_ext(), false, base.is_ext());
                self.code.push(0x87);
            }
            4 => {
                self.push_rex(false, reg.is_ext(), false, base.is_ext());
                self.code.push(0x87);
            }
            8 => {
                self.push_rex(true, reg.is_ext(), false, base.is_ext());
                self.code.push(0x87);
            }
            _ => unreachable!(),
        }
        self.emit_mem_operand(reg.low3(), base, 0);
    }

    /// Emission of raw bytes the assembler cannot template: the `lock
    /// cmpxchg` family, selected by operand size per spec.md §4.1.
    pub fn lock_cmpxchg(&mut self, size: u8) {
        self.println(format!("lock cmpxchg [rdi], {}", Reg::Rdx.name(size)));
        let bytes: &[u8] = match size {
            1 => &[0xF0, 0x0F, 0xB0, 0x17],
            2 => &[0x66, 0xF0, 0x0F, 0xB1, 0x17],
            4 => &[0xF0, 0x0F, 0xB1, 0x17],
            8 => &[0xF0, 0x48, 0x0F, 0xB1, 0x17],
            _ => unreachable!(),
        };
        self.emit(bytes);
    }

    pub fn rep_stosb(&mut self) {
        self.println("rep stosb");
        self.code.push(0xF3);
        self.code.push(0xAA);
    }

    // ---- SSE scalar float ----

    fn sse_rm(&mut self, prefix: u8, opcode: u8, reg: u8, rm: u8) {
        if prefix != 0 {
            self.code.push(prefix);
        }
        self.push_rex(false, reg >= 8, false, rm >= 8);
        self.code.push(0x0F);
        self.code.push(opcode);
        self.code.push(modrm(0b11, reg, rm & 0x7));
    }

    pub fn movss_load(&mut self, xmm: u8, base: Reg, disp: i32) {
        self.println(format!("movss xmm{}, [{}{:+}]", xmm, base.name64(), disp));
        self.code.push(0xF3);
        self.push_rex(false, xmm >= 8, false, base.is_ext());
        self.code.push(0x0F);
        self.code.push(0x10);
        self.emit_mem_operand(xmm, base, disp);
    }
    pub fn movsd_load(&mut self, xmm: u8, base: Reg, disp: i32) {
        self.println(format!("movsd xmm{}, [{}{:+}]", xmm, base.name64(), disp));
        self.code.push(0xF2);
        self.push_rex(false, xmm >= 8, false, base.is_ext());
        self.code.push(0x0F);
        self.code.push(0x10);
        self.emit_mem_operand(xmm, base, disp);
    }
    pub fn movss_store(&mut self, base: Reg, disp: i32, xmm: u8) {
        self.println(format!("movss [{}{:+}], xmm{}", base.name64(), disp, xmm));
        self.code.push(0xF3);
        self.push_rex(false, xmm >= 8, false, base.is_ext());
        self.code.push(0x0F);
        self.code.push(0x11);
        self.emit_mem_operand(xmm, base, disp);
    }
    pub fn movsd_store(&mut self, base: Reg, disp: i32, xmm: u8) {
        self.println(format!("movsd [{}{:+}], xmm{}", base.name64(), disp, xmm));
        self.code.push(0xF2);
        self.push_rex(false, xmm >= 8, false, base.is_ext());
        self.code.push(0x0F);
        self.code.push(0x11);
        self.emit_mem_operand(xmm, base, disp);
    }

    /// `movq xmm, reg` / `movq reg, xmm` (66 0F 6E / 7E, REX.W) — used to
    /// bit-reinterpret integer immediates into XMM0 for float/double
    /// literals and for the negate-via-xor sign-bit trick.
    pub fn movq_gpr_to_xmm(&mut self, xmm: u8, reg: Reg) {
        self.println(format!("movq xmm{}, {}", xmm, reg.name64()));
        self.code.push(0x66);
        self.push_rex(true, xmm >= 8, false, reg.is_ext());
        self.code.push(0x0F);
        self.code.push(0x6E);
        self.code.push(modrm(0b11, xmm, reg.low3()));
    }

    pub fn xorps(&mut self, dst: u8, src: u8) {
        self.println(format!("xorps xmm{}, xmm{}", dst, src));
        self.sse_rm(0, 0x57, dst, src);
    }
    pub fn xorpd(&mut self, dst: u8, src: u8) {
        self.println(format!("xorpd xmm{}, xmm{}", dst, src));
        self.sse_rm(0x66, 0x57, dst, src);
    }
    pub fn ucomiss(&mut self, a: u8, b: u8) {
        self.println(format!("ucomiss xmm{}, xmm{}", a, b));
        self.sse_rm(0, 0x2E, a, b);
    }
    pub fn ucomisd(&mut self, a: u8, b: u8) {
        self.println(format!("ucomisd xmm{}, xmm{}", a, b));
        self.sse_rm(0x66, 0x2E, a, b);
    }
    pub fn addss(&mut self, dst: u8, src: u8) {
        self.sse_rm(0xF3, 0x58, dst, src);
    }
    pub fn addsd(&mut self, dst: u8, src: u8) {
        self.sse_rm(0xF2, 0x58, dst, src);
    }
    pub fn subss(&mut self, dst: u8, src: u8) {
        self.sse_rm(0xF3, 0x5C, dst, src);
    }
    pub fn subsd(&mut self, dst: u8, src: u8) {
        self.sse_rm(0xF2, 0x5C, dst, src);
    }
    pub fn mulss(&mut self, dst: u8, src: u8) {
        self.sse_rm(0xF3, 0x59, dst, src);
    }
    pub fn mulsd(&mut self, dst: u8, src: u8) {
        self.sse_rm(0xF2, 0x59, dst, src);
    }
    pub fn divss(&mut self, dst: u8, src: u8) {
        self.sse_rm(0xF3, 0x5E, dst, src);
    }
    pub fn divsd(&mut self, dst: u8, src: u8) {
        self.sse_rm(0xF2, 0x5E, dst, src);
    }
    pub fn cvtss2sd(&mut self, dst: u8, src: u8) {
        self.sse_rm(0xF3, 0x5A, dst, src);
    }
    pub fn cvtsd2ss(&mut self, dst: u8, src: u8) {
        self.sse_rm(0xF2, 0x5A, dst, src);
    }
    pub fn cvtsi2ss(&mut self, xmm: u8, reg: Reg, size: u8) {
        self.println(format!("cvtsi2ss xmm{}, {}", xmm, reg.name(size)));
        self.code.push(0xF3);
        self.push_rex(size == 8, xmm >= 8, false, reg.is_ext());
        self.code.push(0x0F);
        self.code.push(0x2A);
        self.code.push(modrm(0b11, xmm, reg.low3()));
    }
    pub fn cvtsi2sd(&mut self, xmm: u8, reg: Reg, size: u8) {
        self.println(format!("cvtsi2sd xmm{}, {}", xmm, reg.name(size)));
        self.code.push(0xF2);
        self.push_rex(size == 8, xmm >= 8, false, reg.is_ext());
        self.code.push(0x0F);
        self.code.push(0x2A);
        self.code.push(modrm(0b11, xmm, reg.low3()));
    }
    pub fn cvttss2si(&mut self, reg: Reg, xmm: u8, size: u8) {
        self.println(format!("cvttss2si {}, xmm{}", reg.name(size), xmm));
        self.code.push(0xF3);
        self.push_rex(size == 8, reg.is_ext(), false, xmm >= 8);
        self.code.push(0x0F);
        self.code.push(0x2C);
        self.code.push(modrm(0b11, reg.low3(), xmm & 7));
    }
    pub fn cvttsd2si(&mut self, reg: Reg, xmm: u8, size: u8) {
        self.println(format!("cvttsd2si {}, xmm{}", reg.name(size), xmm));
        self.code.push(0xF2);
        self.push_rex(size == 8, reg.is_ext(), false, xmm >= 8);
        self.code.push(0x0F);
        self.code.push(0x2C);
        self.code.push(modrm(0b11, reg.low3(), xmm & 7));
    }

    // ---- x87 ----

    pub fn fld_tword(&mut self, base: Reg, disp: i32) {
        self.println(format!("fld tword [{}{:+}]", base.name64(), disp));
        self.code.push(0xDB);
        self.emit_mem_operand(5, base, disp);
    }
    pub fn fstp_tword(&mut self, base: Reg, disp: i32) {
        self.println(format!("fstp tword [{}{:+}]", base.name64(), disp));
        self.code.push(0xDB);
        self.emit_mem_operand(7, base, disp);
    }
    pub fn fld_dword(&mut self, base: Reg, disp: i32) {
        self.println(format!("fld dword [{}{:+}]", base.name64(), disp));
        self.code.push(0xD9);
        self.emit_mem_operand(0, base, disp);
    }
    pub fn fld_qword(&mut self, base: Reg, disp: i32) {
        self.println(format!("fld qword [{}{:+}]", base.name64(), disp));
        self.code.push(0xDD);
        self.emit_mem_operand(0, base, disp);
    }
    pub fn fstp_dword(&mut self, base: Reg, disp: i32) {
        self.println(format!("fstp dword [{}{:+}]", base.name64(), disp));
        self.code.push(0xD9);
        self.emit_mem_operand(3, base, disp);
    }
    pub fn fstp_qword(&mut self, base: Reg, disp: i32) {
        self.println(format!("fstp qword [{}{:+}]", base.name64(), disp));
        self.code.push(0xDD);
        self.emit_mem_operand(3, base, disp);
    }
    pub fn fild_dword(&mut self, base: Reg, disp: i32) {
        self.println(format!("fild dword [{}{:+}]", base.name64(), disp));
        self.code.push(0xDB);
        self.emit_mem_operand(0, base, disp);
    }
    pub fn fild_qword(&mut self, base: Reg, disp: i32) {
        self.println(format!("fild qword [{}{:+}]", base.name64(), disp));
        self.code.push(0xDF);
        self.emit_mem_operand(5, base, disp);
    }
    pub fn fistp_dword(&mut self, base: Reg, disp: i32) {
        self.println(format!("fistp dword [{}{:+}]", base.name64(), disp));
        self.code.push(0xDB);
        self.emit_mem_operand(3, base, disp);
    }
    pub fn fistp_qword(&mut self, base: Reg, disp: i32) {
        self.println(format!("fistp qword [{}{:+}]", base.name64(), disp));
        self.code.push(0xDF);
        self.emit_mem_operand(7, base, disp);
    }
    pub fn fistp_word(&mut self, base: Reg, disp: i32) {
        self.println(format!("fistp word [{}{:+}]", base.name64(), disp));
        self.code.push(0xDF);
        self.emit_mem_operand(3, base, disp);
    }
    pub fn fnstcw(&mut self, base: Reg, disp: i32) {
        self.println(format!("fnstcw [{}{:+}]", base.name64(), disp));
        self.code.push(0xD9);
        self.emit_mem_operand(7, base, disp);
    }
    pub fn fldcw(&mut self, base: Reg, disp: i32) {
        self.println(format!("fldcw [{}{:+}]", base.name64(), disp));
        self.code.push(0xD9);
        self.emit_mem_operand(5, base, disp);
    }
    pub fn fchs(&mut self) {
        self.println("fchs");
        self.emit(&[0xD9, 0xE0]);
    }
    pub fn fldz(&mut self) {
        self.println("fldz");
        self.emit(&[0xD9, 0xEE]);
    }
    pub fn fucomip(&mut self) {
        self.println("fucomip st0, st1");
        self.emit(&[0xDF, 0xE9]);
    }
    pub fn fcomip(&mut self) {
        self.println("fcomip st0, st1");
        self.emit(&[0xDF, 0xF1]);
    }
    pub fn fstp_st0(&mut self) {
        self.println("fstp st0");
        self.emit(&[0xDD, 0xD8]);
    }
    pub fn faddp(&mut self) {
        self.println("faddp st1, st0");
        self.emit(&[0xDE, 0xC1]);
    }
    pub fn fsubrp(&mut self) {
        self.println("fsubrp st1, st0");
        self.emit(&[0xDE, 0xE1]);
    }
    pub fn fmulp(&mut self) {
        self.println("fmulp st1, st0");
        self.emit(&[0xDE, 0xC9]);
    }
    pub fn fdivrp(&mut self) {
        self.println("fdivrp st1, st0");
        self.emit(&[0xDE, 0xF1]);
    }
    pub fn fadd_dword(&mut self, base: Reg, disp: i32) {
        self.println(format!("fadd dword [{}{:+}]", base.name64(), disp));
        self.code.push(0xD8);
        self.emit_mem_operand(0, base, disp);
    }

    // ---- linking ----

    /// Resolves all pending rel32 fixups now that every referenced label
    /// has been placed. Must run after all emission, before `encode`.
    pub fn link(&mut self) {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0 as usize]
                .expect("pc-label referenced by a jump/lea was never placed");
            let rel = target as i64 - (fixup.site as i64 + 4);
            let bytes = (rel as i32).to_le_bytes();
            self.code[fixup.site as usize..fixup.site as usize + 4].copy_from_slice(&bytes);
        }
        self.linked = true;
    }

    pub fn get_offset(&self, id: PcLabel) -> u32 {
        self.labels[id.0 as usize].expect("pc-label was never placed")
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        assert!(self.linked, "encode() called before link()");
        buf.clear();
        buf.extend_from_slice(&self.code);
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mov64_fixup_patch_offset_skips_prefix() {
        let mut asm = Assembler::new();
        let label = asm.mov64_fixup(Reg::Rax);
        asm.link();
        // REX.W (1) + opcode B8 (1) = 2 bytes before the immediate.
        assert_eq!(asm.fixup_patch_offset(label), 2);
    }

    #[test]
    fn forward_jump_resolves_after_link() {
        let mut asm = Assembler::new();
        let target = asm.new_pc_label();
        asm.jmp(target);
        let before_place = asm.len();
        asm.place_pc_label(target);
        asm.link();
        let rel = i32::from_le_bytes(
            asm.code[before_place - 4..before_place].try_into().unwrap(),
        );
        assert_eq!(rel, 0);
    }

    #[test]
    fn growing_label_table_preserves_ids() {
        let mut asm = Assembler::new();
        let a = asm.new_pc_label();
        for _ in 0..100 {
            asm.new_pc_label();
        }
        asm.place_pc_label(a);
        asm.link();
        assert_eq!(asm.get_offset(a), 0);
    }
}
