//! The target-source format.
//!
//! A program is a sequence of blocks. `native` blocks declare a native by
//! signature and qualified path; `function` blocks carry a function's
//! header and its instructions. Strings are JSON-escaped, floats are
//! written as their bit pattern and decimals as digits plus scale, so
//! parsing a block gives back exactly the values that were emitted.
//!
//! ```text
//! native "not_Boolean_1__Boolean_1_" "meta::pure::functions::boolean::not"
//!   param "value" 1
//!   returns 1
//! end
//!
//! function "test::f"
//!   returns 1
//!   code
//!     push.bool true
//!     call.native "not_Boolean_1__Boolean_1_" 1 at "t.pure" 1 1 1 30
//!     ret
//! end
//! ```
//!
//! Instructions are generic over how they reference other functions:
//! `Instr<String>` names labels and signatures as they appear in the text,
//! `Instr<usize>` is what the loader resolves them to.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;

use metagraph_core::{Multiplicity, SourceInfo};

use crate::error::CodegenError;

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: String,
    pub multiplicity: Multiplicity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeBlock {
    pub signature: String,
    /// Qualified path, used in diagnostics and by function references.
    pub label: String,
    pub params: Vec<ParamDecl>,
    pub returns: Multiplicity,
}

/// A compiled function. Its local slots are its captures, then its
/// parameters, then `locals`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBlock<R = String> {
    pub label: String,
    pub captures: Vec<String>,
    pub params: Vec<ParamDecl>,
    pub returns: Multiplicity,
    pub locals: Vec<String>,
    pub code: Vec<Line<R>>,
}

impl<R> FunctionBlock<R> {
    /// Name of every slot, in slot order.
    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.captures
            .iter()
            .map(String::as_str)
            .chain(self.params.iter().map(|p| p.name.as_str()))
            .chain(self.locals.iter().map(String::as_str))
    }

    pub fn slot_count(&self) -> usize {
        self.captures.len() + self.params.len() + self.locals.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Native(NativeBlock),
    Function(FunctionBlock),
}

impl Block {
    pub fn label(&self) -> &str {
        match self {
            Block::Native(native) => &native.label,
            Block::Function(function) => &function.label,
        }
    }
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

/// Every instruction leaves sequences on the operand stack; `argc` and
/// `captures` count sequences popped.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr<R> {
    PushBool(bool),
    PushInt(i64),
    PushFloat(f64),
    PushDecimal(BigDecimal),
    PushString(String),
    PushEmpty,
    /// Pop `n` sequences and push their concatenation.
    Concat(usize),
    Load(usize),
    /// Fail unless the slot holds a value.
    Check(usize),
    Store(usize),
    Dup,
    Pop,
    Call { function: R, argc: usize },
    CallNative { native: R, argc: usize },
    /// Pop `captures` sequences, bound to the target's capture names in order.
    Closure { function: R, captures: usize },
    /// Pop the test of an inlined `if` and jump to `target` when it is false.
    TestIf { native: R, target: usize },
    /// Enter and leave the body of an inlined lambda.
    Enter { lambda: R },
    Leave { lambda: R },
    Jump(usize),
    Ret,
}

/// Which namespace a reference is resolved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// A function or lambda, by label.
    Function,
    /// A native, by signature.
    Native,
}

impl<R> Instr<R> {
    pub fn map_refs<S, E>(self, mut f: impl FnMut(R, RefKind) -> Result<S, E>) -> Result<Instr<S>, E> {
        Ok(match self {
            Instr::PushBool(b) => Instr::PushBool(b),
            Instr::PushInt(i) => Instr::PushInt(i),
            Instr::PushFloat(x) => Instr::PushFloat(x),
            Instr::PushDecimal(d) => Instr::PushDecimal(d),
            Instr::PushString(s) => Instr::PushString(s),
            Instr::PushEmpty => Instr::PushEmpty,
            Instr::Concat(n) => Instr::Concat(n),
            Instr::Load(slot) => Instr::Load(slot),
            Instr::Check(slot) => Instr::Check(slot),
            Instr::Store(slot) => Instr::Store(slot),
            Instr::Dup => Instr::Dup,
            Instr::Pop => Instr::Pop,
            Instr::Call { function, argc } => Instr::Call {
                function: f(function, RefKind::Function)?,
                argc,
            },
            Instr::CallNative { native, argc } => Instr::CallNative {
                native: f(native, RefKind::Native)?,
                argc,
            },
            Instr::Closure { function, captures } => Instr::Closure {
                function: f(function, RefKind::Function)?,
                captures,
            },
            Instr::TestIf { native, target } => Instr::TestIf {
                native: f(native, RefKind::Native)?,
                target,
            },
            Instr::Enter { lambda } => Instr::Enter {
                lambda: f(lambda, RefKind::Function)?,
            },
            Instr::Leave { lambda } => Instr::Leave {
                lambda: f(lambda, RefKind::Function)?,
            },
            Instr::Jump(target) => Instr::Jump(target),
            Instr::Ret => Instr::Ret,
        })
    }

    /// Function labels this instruction refers to.
    pub fn function_ref(&self) -> Option<&R> {
        match self {
            Instr::Call { function, .. } | Instr::Closure { function, .. } => Some(function),
            Instr::Enter { lambda } | Instr::Leave { lambda } => Some(lambda),
            _ => None,
        }
    }
}

/// An instruction and the location errors raised by it are reported at.
#[derive(Debug, Clone, PartialEq)]
pub struct Line<R> {
    pub instr: Instr<R>,
    pub at: Option<SourceInfo>,
}

impl<R> Line<R> {
    pub fn new(instr: Instr<R>, at: Option<SourceInfo>) -> Self {
        Line { instr, at }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn quote(text: &str) -> Result<String, fmt::Error> {
    serde_json::to_string(text).map_err(|_| fmt::Error)
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &[ParamDecl], returns: &Multiplicity) -> fmt::Result {
    for param in params {
        writeln!(f, "  param {} {}", quote(&param.name)?, param.multiplicity)?;
    }
    writeln!(f, "  returns {returns}")
}

impl fmt::Display for NativeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "native {} {}", quote(&self.signature)?, quote(&self.label)?)?;
        write_params(f, &self.params, &self.returns)?;
        writeln!(f, "end")
    }
}

impl fmt::Display for FunctionBlock<String> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {}", quote(&self.label)?)?;
        for capture in &self.captures {
            writeln!(f, "  capture {}", quote(capture)?)?;
        }
        write_params(f, &self.params, &self.returns)?;
        for local in &self.locals {
            writeln!(f, "  local {}", quote(local)?)?;
        }
        writeln!(f, "  code")?;
        for line in &self.code {
            writeln!(f, "    {line}")?;
        }
        writeln!(f, "end")
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Block::Native(native) => fmt::Display::fmt(native, f),
            Block::Function(function) => fmt::Display::fmt(function, f),
        }
    }
}

impl fmt::Display for Instr<String> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::PushBool(b) => write!(f, "push.bool {b}"),
            Instr::PushInt(i) => write!(f, "push.int {i}"),
            Instr::PushFloat(x) => write!(f, "push.float {:#018x}", x.to_bits()),
            Instr::PushDecimal(d) => {
                let (digits, scale) = d.as_bigint_and_exponent();
                write!(f, "push.decimal {digits} {scale}")
            }
            Instr::PushString(s) => write!(f, "push.string {}", quote(s)?),
            Instr::PushEmpty => f.write_str("push.empty"),
            Instr::Concat(n) => write!(f, "concat {n}"),
            Instr::Load(slot) => write!(f, "load {slot}"),
            Instr::Check(slot) => write!(f, "check {slot}"),
            Instr::Store(slot) => write!(f, "store {slot}"),
            Instr::Dup => f.write_str("dup"),
            Instr::Pop => f.write_str("pop"),
            Instr::Call { function, argc } => write!(f, "call {} {argc}", quote(function)?),
            Instr::CallNative { native, argc } => write!(f, "call.native {} {argc}", quote(native)?),
            Instr::Closure { function, captures } => {
                write!(f, "closure {} {captures}", quote(function)?)
            }
            Instr::TestIf { native, target } => write!(f, "test.if {} {target}", quote(native)?),
            Instr::Enter { lambda } => write!(f, "enter {}", quote(lambda)?),
            Instr::Leave { lambda } => write!(f, "leave {}", quote(lambda)?),
            Instr::Jump(target) => write!(f, "jump {target}"),
            Instr::Ret => f.write_str("ret"),
        }
    }
}

impl fmt::Display for Line<String> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.instr, f)?;
        if let Some(at) = &self.at {
            write!(
                f,
                " at {} {} {} {} {}",
                quote(at.unit.as_str())?,
                at.start_line,
                at.start_column,
                at.end_line,
                at.end_column
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Word(&'a str),
    Str(String),
}

fn tokenize(text: &str, line: usize) -> Result<Vec<Token<'_>>, CodegenError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' => i += 1,
            b'"' => {
                let start = i;
                i += 1;
                let mut escaped = false;
                loop {
                    let Some(&b) = bytes.get(i) else {
                        return Err(CodegenError::parse(line, "unterminated string"));
                    };
                    i += 1;
                    if escaped {
                        escaped = false;
                    } else if b == b'\\' {
                        escaped = true;
                    } else if b == b'"' {
                        break;
                    }
                }
                let s: String = serde_json::from_str(&text[start..i])
                    .map_err(|e| CodegenError::parse(line, e.to_string()))?;
                tokens.push(Token::Str(s));
            }
            _ => {
                let start = i;
                while i < bytes.len() && bytes[i] != b' ' && bytes[i] != b'\t' {
                    i += 1;
                }
                tokens.push(Token::Word(&text[start..i]));
            }
        }
    }
    Ok(tokens)
}

struct Cursor<'a> {
    tokens: std::iter::Peekable<std::vec::IntoIter<Token<'a>>>,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str, line: usize) -> Result<Self, CodegenError> {
        Ok(Cursor {
            tokens: tokenize(text, line)?.into_iter().peekable(),
            line,
        })
    }

    fn error(&self, message: impl Into<String>) -> CodegenError {
        CodegenError::parse(self.line, message)
    }

    fn word(&mut self) -> Result<&'a str, CodegenError> {
        match self.tokens.next() {
            Some(Token::Word(w)) => Ok(w),
            Some(Token::Str(s)) => Err(self.error(format!("expected a word, found string {s:?}"))),
            None => Err(self.error("unexpected end of line")),
        }
    }

    fn string(&mut self) -> Result<String, CodegenError> {
        match self.tokens.next() {
            Some(Token::Str(s)) => Ok(s),
            Some(Token::Word(w)) => Err(self.error(format!("expected a string, found '{w}'"))),
            None => Err(self.error("unexpected end of line")),
        }
    }

    fn number<T: FromStr>(&mut self) -> Result<T, CodegenError> {
        let word = self.word()?;
        word.parse()
            .map_err(|_| self.error(format!("'{word}' is not a valid number")))
    }

    fn multiplicity(&mut self) -> Result<Multiplicity, CodegenError> {
        let word = self.word()?;
        word.parse()
            .map_err(|_| self.error(format!("'{word}' is not a multiplicity")))
    }

    /// An optional trailing `at "unit" l c l c`.
    fn location(&mut self) -> Result<Option<SourceInfo>, CodegenError> {
        match self.tokens.peek() {
            Some(Token::Word("at")) => {
                self.tokens.next();
                let unit = self.string()?;
                Ok(Some(SourceInfo::new(
                    unit,
                    self.number()?,
                    self.number()?,
                    self.number()?,
                    self.number()?,
                )))
            }
            _ => Ok(None),
        }
    }

    fn finish(mut self) -> Result<(), CodegenError> {
        match self.tokens.next() {
            None => Ok(()),
            Some(extra) => Err(self.error(format!("unexpected trailing {extra:?}"))),
        }
    }
}

fn parse_instr(mnemonic: &str, c: &mut Cursor<'_>) -> Result<Instr<String>, CodegenError> {
    Ok(match mnemonic {
        "push.bool" => match c.word()? {
            "true" => Instr::PushBool(true),
            "false" => Instr::PushBool(false),
            other => return Err(c.error(format!("'{other}' is not a boolean"))),
        },
        "push.int" => Instr::PushInt(c.number()?),
        "push.float" => {
            let word = c.word()?;
            let bits = u64::from_str_radix(word.trim_start_matches("0x"), 16)
                .map_err(|_| c.error(format!("'{word}' is not a float bit pattern")))?;
            Instr::PushFloat(f64::from_bits(bits))
        }
        "push.decimal" => {
            let digits = c.word()?;
            let scale: i64 = c.number()?;
            let decimal = BigDecimal::from_str(&format!("{digits}e{}", -scale))
                .map_err(|e| c.error(e.to_string()))?;
            Instr::PushDecimal(decimal)
        }
        "push.string" => Instr::PushString(c.string()?),
        "push.empty" => Instr::PushEmpty,
        "concat" => Instr::Concat(c.number()?),
        "load" => Instr::Load(c.number()?),
        "check" => Instr::Check(c.number()?),
        "store" => Instr::Store(c.number()?),
        "dup" => Instr::Dup,
        "pop" => Instr::Pop,
        "call" => Instr::Call {
            function: c.string()?,
            argc: c.number()?,
        },
        "call.native" => Instr::CallNative {
            native: c.string()?,
            argc: c.number()?,
        },
        "closure" => Instr::Closure {
            function: c.string()?,
            captures: c.number()?,
        },
        "test.if" => Instr::TestIf {
            native: c.string()?,
            target: c.number()?,
        },
        "enter" => Instr::Enter { lambda: c.string()? },
        "leave" => Instr::Leave { lambda: c.string()? },
        "jump" => Instr::Jump(c.number()?),
        "ret" => Instr::Ret,
        other => return Err(c.error(format!("unknown instruction '{other}'"))),
    })
}

enum Section {
    Header,
    Code,
}

/// Parse target source into blocks, in the order they appear.
pub fn parse(source: &str) -> Result<Vec<Block>, CodegenError> {
    let mut blocks = Vec::new();
    let mut current: Option<(Block, Section)> = None;

    for (index, text) in source.lines().enumerate() {
        let line = index + 1;
        if text.trim().is_empty() {
            continue;
        }
        let mut c = Cursor::new(text, line)?;
        let keyword = c.word()?;

        if current.is_none() {
            let block = match keyword {
                "native" => Block::Native(NativeBlock {
                    signature: c.string()?,
                    label: c.string()?,
                    params: Vec::new(),
                    returns: Multiplicity::ZERO_MANY,
                }),
                "function" => Block::Function(FunctionBlock {
                    label: c.string()?,
                    captures: Vec::new(),
                    params: Vec::new(),
                    returns: Multiplicity::ZERO_MANY,
                    locals: Vec::new(),
                    code: Vec::new(),
                }),
                other => return Err(c.error(format!("expected a block, found '{other}'"))),
            };
            c.finish()?;
            current = Some((block, Section::Header));
            continue;
        }

        if keyword == "end" {
            c.finish()?;
            if let Some((block, _)) = current.take() {
                blocks.push(block);
            }
            continue;
        }

        let Some((block, section)) = current.as_mut() else {
            continue;
        };
        match block {
            Block::Native(native) => match keyword {
                "param" => native.params.push(ParamDecl {
                    name: c.string()?,
                    multiplicity: c.multiplicity()?,
                }),
                "returns" => native.returns = c.multiplicity()?,
                other => return Err(c.error(format!("unexpected '{other}' in native block"))),
            },
            Block::Function(function) => match section {
                Section::Header => match keyword {
                    "capture" => function.captures.push(c.string()?),
                    "param" => function.params.push(ParamDecl {
                        name: c.string()?,
                        multiplicity: c.multiplicity()?,
                    }),
                    "returns" => function.returns = c.multiplicity()?,
                    "local" => function.locals.push(c.string()?),
                    "code" => *section = Section::Code,
                    other => {
                        return Err(c.error(format!("unexpected '{other}' in function header")))
                    }
                },
                Section::Code => {
                    let instr = parse_instr(keyword, &mut c)?;
                    let at = c.location()?;
                    function.code.push(Line::new(instr, at));
                }
            },
        }
        c.finish()?;
    }

    match current {
        Some((block, _)) => Err(CodegenError::Load(format!(
            "block '{}' is missing its 'end'",
            block.label()
        ))),
        None => Ok(blocks),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FunctionBlock {
        FunctionBlock {
            label: "test::f$lambda0".into(),
            captures: vec!["x".into()],
            params: vec![ParamDecl {
                name: "n".into(),
                multiplicity: Multiplicity::PURE_ONE,
            }],
            returns: Multiplicity::ZERO_ONE,
            locals: vec!["tmp \"quoted\"".into()],
            code: vec![
                Line::new(Instr::PushFloat(0.1), None),
                Line::new(Instr::PushDecimal(BigDecimal::from_str("2.50").unwrap()), None),
                Line::new(Instr::PushString("tab\tand\nnewline".into()), None),
                Line::new(
                    Instr::CallNative {
                        native: "plus_Number_MANY__Number_1_".into(),
                        argc: 1,
                    },
                    Some(SourceInfo::new("a b.pure", 1, 2, 3, 4)),
                ),
                Line::new(Instr::Ret, None),
            ],
        }
    }

    #[test]
    fn rendered_blocks_parse_back() {
        let block = sample();
        let text = block.to_string();
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed, vec![Block::Function(block)]);
    }

    #[test]
    fn decimal_scale_survives() {
        let text = Instr::<String>::PushDecimal(BigDecimal::from_str("2.50").unwrap()).to_string();
        assert_eq!(text, "push.decimal 250 2");
    }

    #[test]
    fn floats_are_written_as_bits() {
        let text = Instr::<String>::PushFloat(1.5).to_string();
        assert_eq!(text, "push.float 0x3ff8000000000000");
    }

    #[test]
    fn native_blocks() {
        let native = NativeBlock {
            signature: "not_Boolean_1__Boolean_1_".into(),
            label: "meta::pure::functions::boolean::not".into(),
            params: vec![ParamDecl {
                name: "value".into(),
                multiplicity: Multiplicity::PURE_ONE,
            }],
            returns: Multiplicity::PURE_ONE,
        };
        let text = native.to_string();
        assert!(text.starts_with("native \"not_Boolean_1__Boolean_1_\""));
        assert_eq!(parse(&text).unwrap(), vec![Block::Native(native)]);
    }

    #[test]
    fn parse_errors_carry_the_line() {
        let err = parse("function \"f\"\n  code\n    frobnicate\nend\n").unwrap_err();
        assert!(matches!(err, CodegenError::Parse { line: 3, .. }));
        let err = parse("function \"f\"\n  code\n    push.string \"open\n").unwrap_err();
        assert!(matches!(err, CodegenError::Parse { line: 3, .. }));
    }

    #[test]
    fn unterminated_block_is_rejected() {
        let err = parse("function \"f\"\n  code\n    ret\n").unwrap_err();
        assert!(matches!(err, CodegenError::Load(_)));
    }
}
