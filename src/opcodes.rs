use once_cell::sync::Lazy;

use crate::fork::Spec;

macro_rules! instructions {
    (
        $($byte:literal => $variant:ident $name:literal,)*
        ;
        $($sub_byte:literal => $sub_variant:ident $sub_name:literal,)*
    ) => {
        /// Every instruction the interpreter knows, decoded from a single code byte.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Instruction {
            $($variant,)*
            $($sub_variant,)*
        }

        impl Instruction {
            const TABLE: &'static [(u8, Instruction)] = &[$(($byte, Instruction::$variant),)*];

            pub const fn byte(&self) -> u8 {
                match self {
                    $(Instruction::$variant => $byte,)*
                    $(Instruction::$sub_variant => $sub_byte,)*
                }
            }

            pub const fn name(&self) -> &'static str {
                match self {
                    $(Instruction::$variant => $name,)*
                    $(Instruction::$sub_variant => $sub_name,)*
                }
            }
        }
    };
}

instructions! {
    0x00 => Stop "STOP",
    0x01 => Add "ADD",
    0x02 => Mul "MUL",
    0x03 => Sub "SUB",
    0x04 => Div "DIV",
    0x05 => SDiv "SDIV",
    0x06 => Mod "MOD",
    0x07 => SMod "SMOD",
    0x08 => AddMod "ADDMOD",
    0x09 => MulMod "MULMOD",
    0x0a => Exp "EXP",
    0x0b => SignExtend "SIGNEXTEND",

    0x10 => Lt "LT",
    0x11 => Gt "GT",
    0x12 => Slt "SLT",
    0x13 => Sgt "SGT",
    0x14 => Eq "EQ",
    0x15 => IsZero "ISZERO",
    0x16 => And "AND",
    0x17 => Or "OR",
    0x18 => Xor "XOR",
    0x19 => Not "NOT",
    0x1a => Byte "BYTE",
    0x1b => Shl "SHL",
    0x1c => Shr "SHR",
    0x1d => Sar "SAR",

    0x20 => Sha3 "SHA3",

    0x30 => Address "ADDRESS",
    0x31 => Balance "BALANCE",
    0x32 => Origin "ORIGIN",
    0x33 => Caller "CALLER",
    0x34 => CallValue "CALLVALUE",
    0x35 => CallDataLoad "CALLDATALOAD",
    0x36 => CallDataSize "CALLDATASIZE",
    0x37 => CallDataCopy "CALLDATACOPY",
    0x38 => CodeSize "CODESIZE",
    0x39 => CodeCopy "CODECOPY",
    0x3a => GasPrice "GASPRICE",
    0x3b => ExtCodeSize "EXTCODESIZE",
    0x3c => ExtCodeCopy "EXTCODECOPY",
    0x3d => ReturnDataSize "RETURNDATASIZE",
    0x3e => ReturnDataCopy "RETURNDATACOPY",
    0x3f => ExtCodeHash "EXTCODEHASH",

    0x40 => BlockHash "BLOCKHASH",
    0x41 => Coinbase "COINBASE",
    0x42 => Timestamp "TIMESTAMP",
    0x43 => Number "NUMBER",
    0x44 => PrevRandao "PREVRANDAO",
    0x45 => GasLimit "GASLIMIT",
    0x46 => ChainId "CHAINID",
    0x47 => SelfBalance "SELFBALANCE",
    0x48 => BaseFee "BASEFEE",
    0x49 => BlobHash "BLOBHASH",
    0x4a => BlobBaseFee "BLOBBASEFEE",

    0x50 => Pop "POP",
    0x51 => MLoad "MLOAD",
    0x52 => MStore "MSTORE",
    0x53 => MStore8 "MSTORE8",
    0x54 => SLoad "SLOAD",
    0x55 => SStore "SSTORE",
    0x56 => Jump "JUMP",
    0x57 => JumpI "JUMPI",
    0x58 => Pc "PC",
    0x59 => MSize "MSIZE",
    0x5a => Gas "GAS",
    0x5b => JumpDest "JUMPDEST",
    0x5c => TLoad "TLOAD",
    0x5d => TStore "TSTORE",
    0x5e => MCopy "MCOPY",
    0x5f => Push0 "PUSH0",

    0x60 => Push1 "PUSH1",
    0x61 => Push2 "PUSH2",
    0x62 => Push3 "PUSH3",
    0x63 => Push4 "PUSH4",
    0x64 => Push5 "PUSH5",
    0x65 => Push6 "PUSH6",
    0x66 => Push7 "PUSH7",
    0x67 => Push8 "PUSH8",
    0x68 => Push9 "PUSH9",
    0x69 => Push10 "PUSH10",
    0x6a => Push11 "PUSH11",
    0x6b => Push12 "PUSH12",
    0x6c => Push13 "PUSH13",
    0x6d => Push14 "PUSH14",
    0x6e => Push15 "PUSH15",
    0x6f => Push16 "PUSH16",
    0x70 => Push17 "PUSH17",
    0x71 => Push18 "PUSH18",
    0x72 => Push19 "PUSH19",
    0x73 => Push20 "PUSH20",
    0x74 => Push21 "PUSH21",
    0x75 => Push22 "PUSH22",
    0x76 => Push23 "PUSH23",
    0x77 => Push24 "PUSH24",
    0x78 => Push25 "PUSH25",
    0x79 => Push26 "PUSH26",
    0x7a => Push27 "PUSH27",
    0x7b => Push28 "PUSH28",
    0x7c => Push29 "PUSH29",
    0x7d => Push30 "PUSH30",
    0x7e => Push31 "PUSH31",
    0x7f => Push32 "PUSH32",

    0x80 => Dup1 "DUP1",
    0x81 => Dup2 "DUP2",
    0x82 => Dup3 "DUP3",
    0x83 => Dup4 "DUP4",
    0x84 => Dup5 "DUP5",
    0x85 => Dup6 "DUP6",
    0x86 => Dup7 "DUP7",
    0x87 => Dup8 "DUP8",
    0x88 => Dup9 "DUP9",
    0x89 => Dup10 "DUP10",
    0x8a => Dup11 "DUP11",
    0x8b => Dup12 "DUP12",
    0x8c => Dup13 "DUP13",
    0x8d => Dup14 "DUP14",
    0x8e => Dup15 "DUP15",
    0x8f => Dup16 "DUP16",

    0x90 => Swap1 "SWAP1",
    0x91 => Swap2 "SWAP2",
    0x92 => Swap3 "SWAP3",
    0x93 => Swap4 "SWAP4",
    0x94 => Swap5 "SWAP5",
    0x95 => Swap6 "SWAP6",
    0x96 => Swap7 "SWAP7",
    0x97 => Swap8 "SWAP8",
    0x98 => Swap9 "SWAP9",
    0x99 => Swap10 "SWAP10",
    0x9a => Swap11 "SWAP11",
    0x9b => Swap12 "SWAP12",
    0x9c => Swap13 "SWAP13",
    0x9d => Swap14 "SWAP14",
    0x9e => Swap15 "SWAP15",
    0x9f => Swap16 "SWAP16",

    0xa0 => Log0 "LOG0",
    0xa1 => Log1 "LOG1",
    0xa2 => Log2 "LOG2",
    0xa3 => Log3 "LOG3",
    0xa4 => Log4 "LOG4",

    0xf0 => Create "CREATE",
    0xf1 => Call "CALL",
    0xf2 => CallCode "CALLCODE",
    0xf3 => Return "RETURN",
    0xf4 => DelegateCall "DELEGATECALL",
    0xf5 => Create2 "CREATE2",
    0xfa => StaticCall "STATICCALL",
    0xfd => Revert "REVERT",
    0xfe => Invalid "INVALID",
    0xff => SelfDestruct "SELFDESTRUCT",
    ;
    0x5c => BeginSub "BEGINSUB",
    0x5d => ReturnSub "RETURNSUB",
    0x5e => JumpSub "JUMPSUB",
}

static DECODE: Lazy<[Option<Instruction>; 256]> = Lazy::new(|| {
    let mut table = [None; 256];
    for (byte, instruction) in Instruction::TABLE {
        table[*byte as usize] = Some(*instruction);
    }
    table
});

impl Instruction {
    /// Decodes a code byte. Bytes 0x5c..=0x5e are subroutine instructions when `Spec::subroutines` is set.
    pub fn decode(byte: u8, spec: &Spec) -> Option<Instruction> {
        if spec.subroutines {
            match byte {
                0x5c => return Some(Instruction::BeginSub),
                0x5d => return Some(Instruction::ReturnSub),
                0x5e => return Some(Instruction::JumpSub),
                _ => (),
            }
        }
        DECODE[byte as usize]
    }

    pub fn from_byte(byte: u8) -> Option<Instruction> {
        DECODE[byte as usize]
    }

    pub fn is_push(&self) -> bool {
        (0x60..=0x7f).contains(&self.byte())
    }

    /// Width of the immediate operand that follows the opcode byte.
    pub fn push_width(&self) -> usize {
        if self.is_push() {
            (self.byte() - 0x5f) as usize
        } else {
            0
        }
    }

    pub fn dup_depth(&self) -> Option<usize> {
        let byte = self.byte();
        (0x80..=0x8f).contains(&byte).then(|| (byte - 0x7f) as usize)
    }

    pub fn swap_depth(&self) -> Option<usize> {
        let byte = self.byte();
        (0x90..=0x9f).contains(&byte).then(|| (byte - 0x8f) as usize)
    }

    pub fn log_topics(&self) -> Option<usize> {
        let byte = self.byte();
        (0xa0..=0xa4).contains(&byte).then(|| (byte - 0xa0) as usize)
    }

    /// Whether the instruction exists under `spec`. Disabled instructions behave like undefined bytes.
    pub fn is_enabled(&self, spec: &Spec) -> bool {
        use Instruction::*;
        match self {
            DelegateCall => spec.delegatecall,
            Revert => spec.revert,
            ReturnDataSize | ReturnDataCopy => spec.return_data,
            StaticCall => spec.static_call,
            Shl | Shr | Sar => spec.bitwise_shifts,
            Create2 => spec.create2,
            ExtCodeHash => spec.extcodehash,
            ChainId => spec.chain_id,
            SelfBalance => spec.eip1884,
            BaseFee => spec.base_fee,
            Push0 => spec.push0,
            TLoad | TStore => spec.transient_storage,
            MCopy => spec.mcopy,
            BlobHash => spec.blob_hash,
            BlobBaseFee => spec.blob_base_fee,
            BeginSub | ReturnSub | JumpSub => spec.subroutines,
            _ => true,
        }
    }

    /// Instructions that write state and are rejected inside a static frame.
    pub fn is_state_modifying(&self) -> bool {
        use Instruction::*;
        matches!(
            self,
            SStore | TStore | Log0 | Log1 | Log2 | Log3 | Log4 | Create | Create2 | SelfDestruct
        )
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
