//! # STABS Debug Information
//!
//! Parsing of the `.stab` / `.stabstr` section pair.
//!
//! ## Layout
//!
//! - [`record`]: fixed 12-byte records, string resolution, continuation reassembly
//! - [`typetable`]: the type arena, per-unit and per-include type numbering, typedef cache
//! - [`grammar`]: the type-definition mini-language embedded in symbol strings
//! - [`builder`]: the state machine turning records into functions, globals, locals and lines
//!
//! A stab string looks like `name:<descriptor><type>`, for example
//! `main:F1` or `point:T5=s8x:1,0,32;y:1,32,32;;`. Everything after a `=`
//! that follows a type number is a type definition.

pub mod builder;
pub mod grammar;
pub mod record;
pub mod typetable;

pub use builder::StabsBuilder;
pub use record::{RawStab, StabEntry, StabReader, STAB_RECORD_SIZE};
pub use typetable::{TypeNode, TypeNumber, TypeRef, TypeStore};

/// String-table partition boundary; `value` is the size of the next partition.
pub const N_UNDF: u8 = 0x00;
/// Global variable.
pub const N_GSYM: u8 = 0x20;
/// Function name (inert).
pub const N_FNAME: u8 = 0x22;
/// Function start, or function end when the name is empty.
pub const N_FUN: u8 = 0x24;
/// File-static data.
pub const N_STSYM: u8 = 0x26;
/// File-static bss.
pub const N_LCSYM: u8 = 0x28;
/// Program entry name (inert).
pub const N_MAIN: u8 = 0x2a;
/// Read-only static data.
pub const N_ROSYM: u8 = 0x2c;
/// Begin nested symbols (inert).
pub const N_BNSYM: u8 = 0x2e;
/// Compiler options (inert).
pub const N_OPT: u8 = 0x3c;
/// Register variable.
pub const N_RSYM: u8 = 0x40;
/// Line number in the text segment.
pub const N_SLINE: u8 = 0x44;
/// End nested symbols (inert).
pub const N_ENSYM: u8 = 0x4e;
/// Structure element (inert).
pub const N_SSYM: u8 = 0x60;
/// Source file start.
pub const N_SO: u8 = 0x64;
/// Stack variable or typedef.
pub const N_LSYM: u8 = 0x80;
/// Include file push.
pub const N_BINCL: u8 = 0x82;
/// Source file inclusion (`#include` of code, or back to the main file).
pub const N_SOL: u8 = 0x84;
/// Parameter.
pub const N_PSYM: u8 = 0xa0;
/// Include file pop.
pub const N_EINCL: u8 = 0xa2;
/// Alternate entry point (inert).
pub const N_ENTRY: u8 = 0xa4;
/// Block begin (inert).
pub const N_LBRAC: u8 = 0xc0;
/// Include file reuse.
pub const N_EXCL: u8 = 0xc2;
/// Block end (inert).
pub const N_RBRAC: u8 = 0xe0;

/// Symbolic name of a record kind, for logs.
pub fn kind_name(kind: u8) -> Option<&'static str>
{
    let name = match kind {
        N_UNDF => "N_UNDF",
        N_GSYM => "N_GSYM",
        N_FNAME => "N_FNAME",
        N_FUN => "N_FUN",
        N_STSYM => "N_STSYM",
        N_LCSYM => "N_LCSYM",
        N_MAIN => "N_MAIN",
        N_ROSYM => "N_ROSYM",
        N_BNSYM => "N_BNSYM",
        N_OPT => "N_OPT",
        N_RSYM => "N_RSYM",
        N_SLINE => "N_SLINE",
        N_ENSYM => "N_ENSYM",
        N_SSYM => "N_SSYM",
        N_SO => "N_SO",
        N_LSYM => "N_LSYM",
        N_BINCL => "N_BINCL",
        N_SOL => "N_SOL",
        N_PSYM => "N_PSYM",
        N_EINCL => "N_EINCL",
        N_ENTRY => "N_ENTRY",
        N_LBRAC => "N_LBRAC",
        N_EXCL => "N_EXCL",
        N_RBRAC => "N_RBRAC",
        _ => return None,
    };
    Some(name)
}
