use std::fmt;

use once_cell::sync::Lazy;

use crate::util::{FastHashMap, fast_hash_map_new};

/// Gas price tier of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Zero,
    Base,
    VeryLow,
    Low,
    Mid,
    High,
    Ext,
    Special,
}

impl Tier {
    /// Static execution gas of the tier. `Special` instructions report their base price.
    pub const fn gas(self) -> u64 {
        match self {
            Tier::Zero => 0,
            Tier::Base => 2,
            Tier::VeryLow => 3,
            Tier::Low => 5,
            Tier::Mid => 8,
            Tier::High => 10,
            Tier::Ext => 20,
            Tier::Special => 30,
        }
    }
}

/// Static metadata for one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionInfo {
    pub name: &'static str,
    /// Immediate bytes following the opcode (only pushes have any).
    pub additional: usize,
    pub args: usize,
    pub ret: usize,
    pub side_effects: bool,
    pub tier: Tier,
}

/// A single opcode byte of the target machine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Instruction(u8);

impl Instruction {
    pub const STOP: Instruction = Instruction(0x00);
    pub const ADD: Instruction = Instruction(0x01);
    pub const MUL: Instruction = Instruction(0x02);
    pub const SUB: Instruction = Instruction(0x03);
    pub const DIV: Instruction = Instruction(0x04);
    pub const SDIV: Instruction = Instruction(0x05);
    pub const MOD: Instruction = Instruction(0x06);
    pub const SMOD: Instruction = Instruction(0x07);
    pub const ADDMOD: Instruction = Instruction(0x08);
    pub const MULMOD: Instruction = Instruction(0x09);
    pub const EXP: Instruction = Instruction(0x0a);
    pub const SIGNEXTEND: Instruction = Instruction(0x0b);
    pub const LT: Instruction = Instruction(0x10);
    pub const GT: Instruction = Instruction(0x11);
    pub const SLT: Instruction = Instruction(0x12);
    pub const SGT: Instruction = Instruction(0x13);
    pub const EQ: Instruction = Instruction(0x14);
    pub const ISZERO: Instruction = Instruction(0x15);
    pub const AND: Instruction = Instruction(0x16);
    pub const OR: Instruction = Instruction(0x17);
    pub const XOR: Instruction = Instruction(0x18);
    pub const NOT: Instruction = Instruction(0x19);
    pub const BYTE: Instruction = Instruction(0x1a);
    pub const SHL: Instruction = Instruction(0x1b);
    pub const SHR: Instruction = Instruction(0x1c);
    pub const SAR: Instruction = Instruction(0x1d);
    pub const KECCAK256: Instruction = Instruction(0x20);
    pub const ADDRESS: Instruction = Instruction(0x30);
    pub const BALANCE: Instruction = Instruction(0x31);
    pub const ORIGIN: Instruction = Instruction(0x32);
    pub const CALLER: Instruction = Instruction(0x33);
    pub const CALLVALUE: Instruction = Instruction(0x34);
    pub const CALLDATALOAD: Instruction = Instruction(0x35);
    pub const CALLDATASIZE: Instruction = Instruction(0x36);
    pub const CALLDATACOPY: Instruction = Instruction(0x37);
    pub const CODESIZE: Instruction = Instruction(0x38);
    pub const CODECOPY: Instruction = Instruction(0x39);
    pub const GASPRICE: Instruction = Instruction(0x3a);
    pub const EXTCODESIZE: Instruction = Instruction(0x3b);
    pub const EXTCODECOPY: Instruction = Instruction(0x3c);
    pub const RETURNDATASIZE: Instruction = Instruction(0x3d);
    pub const RETURNDATACOPY: Instruction = Instruction(0x3e);
    pub const EXTCODEHASH: Instruction = Instruction(0x3f);
    pub const BLOCKHASH: Instruction = Instruction(0x40);
    pub const COINBASE: Instruction = Instruction(0x41);
    pub const TIMESTAMP: Instruction = Instruction(0x42);
    pub const NUMBER: Instruction = Instruction(0x43);
    pub const DIFFICULTY: Instruction = Instruction(0x44);
    pub const GASLIMIT: Instruction = Instruction(0x45);
    pub const CHAINID: Instruction = Instruction(0x46);
    pub const SELFBALANCE: Instruction = Instruction(0x47);
    pub const POP: Instruction = Instruction(0x50);
    pub const MLOAD: Instruction = Instruction(0x51);
    pub const MSTORE: Instruction = Instruction(0x52);
    pub const MSTORE8: Instruction = Instruction(0x53);
    pub const SLOAD: Instruction = Instruction(0x54);
    pub const SSTORE: Instruction = Instruction(0x55);
    pub const JUMP: Instruction = Instruction(0x56);
    pub const JUMPI: Instruction = Instruction(0x57);
    pub const PC: Instruction = Instruction(0x58);
    pub const MSIZE: Instruction = Instruction(0x59);
    pub const GAS: Instruction = Instruction(0x5a);
    pub const JUMPDEST: Instruction = Instruction(0x5b);
    pub const PUSH1: Instruction = Instruction(0x60);
    pub const PUSH20: Instruction = Instruction(0x73);
    pub const PUSH32: Instruction = Instruction(0x7f);
    pub const DUP1: Instruction = Instruction(0x80);
    pub const DUP16: Instruction = Instruction(0x8f);
    pub const SWAP1: Instruction = Instruction(0x90);
    pub const SWAP16: Instruction = Instruction(0x9f);
    pub const LOG0: Instruction = Instruction(0xa0);
    pub const LOG4: Instruction = Instruction(0xa4);
    pub const CREATE: Instruction = Instruction(0xf0);
    pub const CALL: Instruction = Instruction(0xf1);
    pub const CALLCODE: Instruction = Instruction(0xf2);
    pub const RETURN: Instruction = Instruction(0xf3);
    pub const DELEGATECALL: Instruction = Instruction(0xf4);
    pub const CREATE2: Instruction = Instruction(0xf5);
    pub const STATICCALL: Instruction = Instruction(0xfa);
    pub const REVERT: Instruction = Instruction(0xfd);
    pub const INVALID: Instruction = Instruction(0xfe);
    pub const SELFDESTRUCT: Instruction = Instruction(0xff);

    #[inline]
    pub const fn from_byte(byte: u8) -> Instruction {
        Instruction(byte)
    }

    #[inline]
    pub const fn byte(self) -> u8 {
        self.0
    }

    /// `PUSHn` for `n` in `1..=32`.
    pub fn push(n: usize) -> Instruction {
        debug_assert!((1..=32).contains(&n), "invalid push width {n}");
        Instruction(Self::PUSH1.0 + (n as u8 - 1))
    }

    /// `DUPn` for `n` in `1..=16`.
    pub fn dup(n: usize) -> Instruction {
        debug_assert!((1..=16).contains(&n), "invalid dup depth {n}");
        Instruction(Self::DUP1.0 + (n as u8 - 1))
    }

    /// `SWAPn` for `n` in `1..=16`.
    pub fn swap(n: usize) -> Instruction {
        debug_assert!((1..=16).contains(&n), "invalid swap depth {n}");
        Instruction(Self::SWAP1.0 + (n as u8 - 1))
    }

    /// `LOGn` for `n` in `0..=4`.
    pub fn log(n: usize) -> Instruction {
        debug_assert!(n <= 4, "invalid log topic count {n}");
        Instruction(Self::LOG0.0 + n as u8)
    }

    #[inline]
    pub const fn is_push(self) -> bool {
        self.0 >= Self::PUSH1.0 && self.0 <= Self::PUSH32.0
    }

    #[inline]
    pub const fn is_dup(self) -> bool {
        self.0 >= Self::DUP1.0 && self.0 <= Self::DUP16.0
    }

    #[inline]
    pub const fn is_swap(self) -> bool {
        self.0 >= Self::SWAP1.0 && self.0 <= Self::SWAP16.0
    }

    #[inline]
    pub const fn is_log(self) -> bool {
        self.0 >= Self::LOG0.0 && self.0 <= Self::LOG4.0
    }

    /// Immediate width of a `PUSHn`, zero for anything else.
    pub const fn push_size(self) -> usize {
        if self.is_push() { (self.0 - Self::PUSH1.0) as usize + 1 } else { 0 }
    }

    pub const fn dup_depth(self) -> usize {
        if self.is_dup() { (self.0 - Self::DUP1.0) as usize + 1 } else { 0 }
    }

    pub const fn swap_depth(self) -> usize {
        if self.is_swap() { (self.0 - Self::SWAP1.0) as usize + 1 } else { 0 }
    }

    pub fn is_valid(self) -> bool {
        self.info().is_some()
    }

    /// Metadata for the opcode, `None` for unassigned bytes.
    pub fn info(self) -> Option<InstructionInfo> {
        use Tier::*;
        let b = self.0;
        let info = |name, args, ret, side_effects, tier| InstructionInfo {
            name,
            additional: 0,
            args,
            ret,
            side_effects,
            tier,
        };
        if self.is_push() {
            let n = self.push_size();
            return Some(InstructionInfo {
                name: PUSH_NAMES[n - 1],
                additional: n,
                args: 0,
                ret: 1,
                side_effects: false,
                tier: VeryLow,
            });
        }
        if self.is_dup() {
            let n = self.dup_depth();
            return Some(info(DUP_NAMES[n - 1], n, n + 1, false, VeryLow));
        }
        if self.is_swap() {
            let n = self.swap_depth();
            return Some(info(SWAP_NAMES[n - 1], n + 1, n + 1, false, VeryLow));
        }
        if self.is_log() {
            let n = (b - Self::LOG0.0) as usize;
            return Some(info(LOG_NAMES[n], n + 2, 0, true, Special));
        }
        Some(match b {
            0x00 => info("STOP", 0, 0, true, Zero),
            0x01 => info("ADD", 2, 1, false, VeryLow),
            0x02 => info("MUL", 2, 1, false, Low),
            0x03 => info("SUB", 2, 1, false, VeryLow),
            0x04 => info("DIV", 2, 1, false, Low),
            0x05 => info("SDIV", 2, 1, false, Low),
            0x06 => info("MOD", 2, 1, false, Low),
            0x07 => info("SMOD", 2, 1, false, Low),
            0x08 => info("ADDMOD", 3, 1, false, Mid),
            0x09 => info("MULMOD", 3, 1, false, Mid),
            0x0a => info("EXP", 2, 1, false, Special),
            0x0b => info("SIGNEXTEND", 2, 1, false, Low),
            0x10 => info("LT", 2, 1, false, VeryLow),
            0x11 => info("GT", 2, 1, false, VeryLow),
            0x12 => info("SLT", 2, 1, false, VeryLow),
            0x13 => info("SGT", 2, 1, false, VeryLow),
            0x14 => info("EQ", 2, 1, false, VeryLow),
            0x15 => info("ISZERO", 1, 1, false, VeryLow),
            0x16 => info("AND", 2, 1, false, VeryLow),
            0x17 => info("OR", 2, 1, false, VeryLow),
            0x18 => info("XOR", 2, 1, false, VeryLow),
            0x19 => info("NOT", 1, 1, false, VeryLow),
            0x1a => info("BYTE", 2, 1, false, VeryLow),
            0x1b => info("SHL", 2, 1, false, VeryLow),
            0x1c => info("SHR", 2, 1, false, VeryLow),
            0x1d => info("SAR", 2, 1, false, VeryLow),
            0x20 => info("KECCAK256", 2, 1, false, Special),
            0x30 => info("ADDRESS", 0, 1, false, Base),
            0x31 => info("BALANCE", 1, 1, false, Special),
            0x32 => info("ORIGIN", 0, 1, false, Base),
            0x33 => info("CALLER", 0, 1, false, Base),
            0x34 => info("CALLVALUE", 0, 1, false, Base),
            0x35 => info("CALLDATALOAD", 1, 1, false, VeryLow),
            0x36 => info("CALLDATASIZE", 0, 1, false, Base),
            0x37 => info("CALLDATACOPY", 3, 0, true, VeryLow),
            0x38 => info("CODESIZE", 0, 1, false, Base),
            0x39 => info("CODECOPY", 3, 0, true, VeryLow),
            0x3a => info("GASPRICE", 0, 1, false, Base),
            0x3b => info("EXTCODESIZE", 1, 1, false, Special),
            0x3c => info("EXTCODECOPY", 4, 0, true, Special),
            0x3d => info("RETURNDATASIZE", 0, 1, false, Base),
            0x3e => info("RETURNDATACOPY", 3, 0, true, VeryLow),
            0x3f => info("EXTCODEHASH", 1, 1, false, Special),
            0x40 => info("BLOCKHASH", 1, 1, false, Ext),
            0x41 => info("COINBASE", 0, 1, false, Base),
            0x42 => info("TIMESTAMP", 0, 1, false, Base),
            0x43 => info("NUMBER", 0, 1, false, Base),
            0x44 => info("DIFFICULTY", 0, 1, false, Base),
            0x45 => info("GASLIMIT", 0, 1, false, Base),
            0x46 => info("CHAINID", 0, 1, false, Base),
            0x47 => info("SELFBALANCE", 0, 1, false, Low),
            0x50 => info("POP", 1, 0, false, Base),
            0x51 => info("MLOAD", 1, 1, false, VeryLow),
            0x52 => info("MSTORE", 2, 0, true, VeryLow),
            0x53 => info("MSTORE8", 2, 0, true, VeryLow),
            0x54 => info("SLOAD", 1, 1, false, Special),
            0x55 => info("SSTORE", 2, 0, true, Special),
            0x56 => info("JUMP", 1, 0, true, Mid),
            0x57 => info("JUMPI", 2, 0, true, High),
            0x58 => info("PC", 0, 1, false, Base),
            0x59 => info("MSIZE", 0, 1, false, Base),
            0x5a => info("GAS", 0, 1, false, Base),
            0x5b => info("JUMPDEST", 0, 0, true, Special),
            0xf0 => info("CREATE", 3, 1, true, Special),
            0xf1 => info("CALL", 7, 1, true, Special),
            0xf2 => info("CALLCODE", 7, 1, true, Special),
            0xf3 => info("RETURN", 2, 0, true, Zero),
            0xf4 => info("DELEGATECALL", 6, 1, true, Special),
            0xf5 => info("CREATE2", 4, 1, true, Special),
            0xfa => info("STATICCALL", 6, 1, true, Special),
            0xfd => info("REVERT", 2, 0, true, Zero),
            0xfe => info("INVALID", 0, 0, true, Zero),
            0xff => info("SELFDESTRUCT", 1, 0, true, Special),
            _ => return None,
        })
    }

    /// Mnemonic, or `INVALID_0x..` for unassigned bytes.
    pub fn name(self) -> String {
        match self.info() {
            Some(info) => info.name.to_string(),
            None => format!("INVALID_0x{:02x}", self.0),
        }
    }

    /// Case-insensitive mnemonic lookup. Accepts the historic alias `SHA3`.
    pub fn from_name(name: &str) -> Option<Instruction> {
        let upper = name.to_ascii_uppercase();
        BY_NAME.get(upper.as_str()).copied()
    }
}

static BY_NAME: Lazy<FastHashMap<&'static str, Instruction>> = Lazy::new(|| {
    let mut map = fast_hash_map_new();
    for byte in 0..=u8::MAX {
        let instruction = Instruction(byte);
        if let Some(info) = instruction.info() {
            map.insert(info.name, instruction);
        }
    }
    map.insert("SHA3", Instruction::KECCAK256);
    map
});

const PUSH_NAMES: [&str; 32] = [
    "PUSH1", "PUSH2", "PUSH3", "PUSH4", "PUSH5", "PUSH6", "PUSH7", "PUSH8", "PUSH9", "PUSH10", "PUSH11", "PUSH12",
    "PUSH13", "PUSH14", "PUSH15", "PUSH16", "PUSH17", "PUSH18", "PUSH19", "PUSH20", "PUSH21", "PUSH22", "PUSH23",
    "PUSH24", "PUSH25", "PUSH26", "PUSH27", "PUSH28", "PUSH29", "PUSH30", "PUSH31", "PUSH32",
];

const DUP_NAMES: [&str; 16] = [
    "DUP1", "DUP2", "DUP3", "DUP4", "DUP5", "DUP6", "DUP7", "DUP8", "DUP9", "DUP10", "DUP11", "DUP12", "DUP13",
    "DUP14", "DUP15", "DUP16",
];

const SWAP_NAMES: [&str; 16] = [
    "SWAP1", "SWAP2", "SWAP3", "SWAP4", "SWAP5", "SWAP6", "SWAP7", "SWAP8", "SWAP9", "SWAP10", "SWAP11", "SWAP12",
    "SWAP13", "SWAP14", "SWAP15", "SWAP16",
];

const LOG_NAMES: [&str; 5] = ["LOG0", "LOG1", "LOG2", "LOG3", "LOG4"];

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
