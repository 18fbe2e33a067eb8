//! functions callable from expressions
//!
//! Lookup order for a call `name(...)`:
//!
//! 1. functions bound by the scope (`ref` inside a gen block's `data`)
//! 2. functions that need the evaluation state: `allof`, `alloflist`, `allofarray`, `file`, `self`
//! 3. user functions declared with `func` blocks in the current block or any block around it
//! 4. the builtin library
use crate::diagnostics::Diagnostics;
use crate::marks::MarkedValue;

mod contextual;
mod merge;
pub mod path;
mod stdlib;
mod time;

pub use merge::{concat, merge};

pub const CONTEXTUAL: &[&str] = &["allof", "alloflist", "allofarray", "file", "self"];

/// Builtins whose results keep the provenance of every element, all others are marked as a whole
pub const KEEPS_PROVENANCE: &[&str] = &["merge", "concat"];

pub type Builtin = fn(Vec<MarkedValue>) -> Result<MarkedValue, FuncError>;

#[derive(thiserror::Error, Debug)]
pub enum FuncError {
    #[error("unknown function {0}")]
    Unknown(String),
    #[error("{name} expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("{name}: expected {expected}, got {got}")]
    Type {
        name: &'static str,
        expected: &'static str,
        got: &'static str,
    },
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Incomplete(String),
    #[error("function body did not evaluate")]
    Diagnostics(Diagnostics),
}

/// Functions that only exist in some scopes
#[derive(Debug, Clone, PartialEq)]
pub enum ScopedFunction {
    /// `ref(path)`: `path` relative to the directory of the file being generated
    RelativePath(String),
}

impl ScopedFunction {
    pub fn call(&self, args: Vec<MarkedValue>) -> Result<MarkedValue, FuncError> {
        match self {
            ScopedFunction::RelativePath(output_path) => path::ref_function(output_path, args),
        }
    }
}

pub fn builtin(name: &str) -> Option<Builtin> {
    use self::stdlib::*;
    use self::time::*;

    let builtin: Builtin = match name {
        // collections
        "merge" => merge,
        "concat" => concat,
        "length" => length,
        "keys" => keys,
        "values" => values,
        "flatten" => flatten,
        "contains" => contains,
        "index" => index,
        "lookup" => lookup,
        "element" => element,
        "slice" => slice,
        "compact" => compact,
        "distinct" => distinct,
        "reverse" | "reverselist" => reverse,
        "chunklist" => chunklist,
        "coalescelist" | "coelscelist" => coalescelist,
        "assertnotnull" => assertnotnull,
        "sort" => sort,
        "zipmap" => zipmap,
        "coalesce" => coalesce,
        "range" => range,
        "tolist" | "toset" => tolist,
        "tomap" => tomap,
        // sets
        "setproduct" => setproduct,
        "setunion" => setunion,
        "setintersection" => setintersection,
        "sethaselement" => sethaselement,
        "setsubtract" => setsubtract,
        "setsymmetricdifference" => setsymmetricdifference,
        // strings
        "upper" => upper,
        "lower" => lower,
        "title" => title,
        "format" => format,
        "formatlist" => formatlist,
        "join" => join,
        "split" => split,
        "replace" => replace,
        "trim" => trim,
        "trimprefix" => trimprefix,
        "trimsuffix" => trimsuffix,
        "trimspace" => trimspace,
        "chomp" => chomp,
        "indent" => indent,
        "substr" => substr,
        "strrev" => strrev,
        "startswith" => startswith,
        "endswith" => endswith,
        "byteslen" => byteslen,
        "byteslice" => byteslice,
        "regex" => regex,
        "regexall" => regexall,
        "regexreplace" => regexreplace,
        // encoding
        "jsonencode" => jsonencode,
        "jsondecode" => jsondecode,
        "csvdecode" => csvdecode,
        "yamlencode" => yamlencode,
        "yamldecode" => yamldecode,
        "base64encode" => base64encode,
        "base64decode" => base64decode,
        "tostring" => tostring,
        "tonumber" => tonumber,
        "tobool" => tobool,
        // numbers
        "abs" => abs,
        "ceil" => ceil,
        "floor" => floor,
        "max" => max,
        "min" => min,
        "pow" => pow,
        "log" => log,
        "signum" => signum,
        "parseint" => parseint,
        "add" => add,
        "subtract" | "sub" => subtract,
        "multiply" | "mul" => multiply,
        "divide" | "div" => divide,
        "modulo" | "mod" => modulo,
        "negate" | "neg" => negate,
        "int" => int,
        // comparison and logic
        "equal" => equal,
        "notequal" => notequal,
        "greaterthan" | "gt" => greaterthan,
        "greaterthanorequalto" | "gte" => greaterthanorequalto,
        "lessthan" | "lt" => lessthan,
        "lessthanorequalto" | "lte" => lessthanorequalto,
        "not" => not,
        "and" => and,
        "or" => or,
        // time
        "formatdate" => formatdate,
        "timeadd" => timeadd,
        _ => return None,
    };

    Some(builtin)
}
