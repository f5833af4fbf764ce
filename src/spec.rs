//! Chain specification strings.
//!
//! A chain is described as stage names separated by `!`, each optionally
//! followed by `key=value` arguments:
//!
//! ```text
//! scale format=i420 ! expand ! identity
//! ```
//!
//! Values may be quoted strings, integers, floats, booleans, or bare words.
//! Whitespace around `!` and `=` is optional.

use smallvec::SmallVec;
use winnow::Parser;
use winnow::ascii::{alpha1, digit1, multispace0};
use winnow::combinator::{alt, delimited, opt, repeat, separated};
use winnow::error::ContextError;
use winnow::token::{take_till, take_while};

use crate::error::{Error, Result};

type PResult<T> = std::result::Result<T, ContextError>;

/// One stage in a parsed chain specification.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    /// Registered stage name.
    pub name: String,
    /// Arguments given after the name.
    pub args: StageArgs,
}

/// A typed argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Quoted or bare string.
    String(String),
    /// Signed integer.
    Integer(i64),
    /// Floating-point number.
    Float(f64),
    /// Boolean.
    Bool(bool),
}

impl ArgValue {
    /// Interpret as an integer where sensible.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Integer(i) => Some(*i),
            ArgValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Interpret as a boolean where sensible.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            ArgValue::Integer(i) => Some(*i != 0),
            ArgValue::String(s) => match s.as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            ArgValue::Float(_) => None,
        }
    }

    /// Interpret as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Ordered key-value arguments for one stage.
///
/// Most stages take no more than a handful, so these stay inline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StageArgs(SmallVec<[(String, ArgValue); 4]>);

impl StageArgs {
    /// No arguments.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up an argument by key (first occurrence wins).
    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Look up an argument and interpret it as `u32`.
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key)
            .and_then(ArgValue::as_i64)
            .and_then(|i| u32::try_from(i).ok())
    }

    /// Look up an argument and interpret it as a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ArgValue::as_str)
    }

    /// Look up an argument and interpret it as a boolean.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ArgValue::as_bool)
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append one argument.
    pub fn push(&mut self, key: impl Into<String>, value: ArgValue) {
        self.0.push((key.into(), value));
    }
}

/// Parse a chain specification string into its stages, source side first.
pub fn parse_chain_spec(input: &str) -> Result<Vec<StageSpec>> {
    chain
        .parse(input.trim())
        .map_err(|e| Error::InvalidSpec(format!("parse error: {e}")))
}

fn chain(input: &mut &str) -> PResult<Vec<StageSpec>> {
    let stages = separated(1.., stage, separator).parse_next(input)?;
    multispace0.parse_next(input)?;
    if !input.is_empty() {
        return Err(ContextError::new());
    }
    Ok(stages)
}

fn stage(input: &mut &str) -> PResult<StageSpec> {
    let _ = multispace0.parse_next(input)?;
    let name: &str = identifier.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    let pairs: Vec<(String, ArgValue)> = repeat(0.., argument).parse_next(input)?;
    let mut args = StageArgs::empty();
    for (k, v) in pairs {
        args.push(k, v);
    }
    Ok(StageSpec {
        name: name.to_string(),
        args,
    })
}

fn separator(input: &mut &str) -> PResult<()> {
    let _ = multispace0.parse_next(input)?;
    let _ = '!'.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    Ok(())
}

fn identifier<'a>(input: &mut &'a str) -> PResult<&'a str> {
    (
        alt((alpha1::<_, ContextError>, "_")),
        take_while(0.., |c: char| c.is_alphanumeric() || c == '_' || c == '-'),
    )
        .take()
        .parse_next(input)
}

/// One `key=value` pair; backtracks without consuming if the next token is
/// not an argument (for example the next stage name).
fn argument(input: &mut &str) -> PResult<(String, ArgValue)> {
    let _ = multispace0.parse_next(input)?;
    let checkpoint = *input;

    let key: &str = match identifier.parse_next(input) {
        Ok(k) => k,
        Err(_) => {
            *input = checkpoint;
            return Err(ContextError::new());
        }
    };
    let _ = multispace0.parse_next(input)?;
    if !input.starts_with('=') {
        *input = checkpoint;
        return Err(ContextError::new());
    }
    let _ = '='.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    let value = arg_value.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    Ok((key.to_string(), value))
}

fn arg_value(input: &mut &str) -> PResult<ArgValue> {
    alt((
        quoted.map(ArgValue::String),
        boolean.map(ArgValue::Bool),
        float.map(ArgValue::Float),
        integer.map(ArgValue::Integer),
        bare.map(ArgValue::String),
    ))
    .parse_next(input)
}

fn quoted(input: &mut &str) -> PResult<String> {
    alt((
        delimited('"', take_till(0.., '"'), '"'),
        delimited('\'', take_till(0.., '\''), '\''),
    ))
    .map(|s: &str| s.to_string())
    .parse_next(input)
}

fn boolean(input: &mut &str) -> PResult<bool> {
    alt((
        "true".map(|_| true),
        "false".map(|_| false),
        "yes".map(|_| true),
        "no".map(|_| false),
    ))
    .parse_next(input)
}

fn integer(input: &mut &str) -> PResult<i64> {
    let sign = opt('-').parse_next(input)?;
    let digits: &str = digit1.parse_next(input)?;
    if input.starts_with('.') {
        // It is a float; let that branch take it.
        return Err(ContextError::new());
    }
    let value: i64 = digits.parse().map_err(|_| ContextError::new())?;
    Ok(if sign.is_some() { -value } else { value })
}

fn float(input: &mut &str) -> PResult<f64> {
    let sign = opt('-').parse_next(input)?;
    let whole: &str = digit1.parse_next(input)?;
    let _ = '.'.parse_next(input)?;
    let frac: &str = digit1.parse_next(input)?;
    format!("{}{whole}.{frac}", if sign.is_some() { "-" } else { "" })
        .parse()
        .map_err(|_| ContextError::new())
}

fn bare(input: &mut &str) -> PResult<String> {
    take_while(1.., |c: char| !c.is_whitespace() && c != '!' && c != '=')
        .map(|s: &str| s.to_string())
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_stage() {
        let specs = parse_chain_spec("identity").unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "identity");
        assert!(specs[0].args.is_empty());
    }

    #[test]
    fn test_parse_chain_order() {
        let specs = parse_chain_spec("scale ! expand ! identity").unwrap();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["scale", "expand", "identity"]);
    }

    #[test]
    fn test_parse_arguments() {
        let specs = parse_chain_spec("scale format=i420 ! expand pad=16").unwrap();
        assert_eq!(specs[0].args.get_str("format"), Some("i420"));
        assert_eq!(specs[1].args.get_u32("pad"), Some(16));
    }

    #[test]
    fn test_parse_typed_values() {
        let specs =
            parse_chain_spec("identity skip=true rate=1.5 offset=-4 label='a b'").unwrap();
        let args = &specs[0].args;
        assert_eq!(args.get_bool("skip"), Some(true));
        assert_eq!(args.get("rate"), Some(&ArgValue::Float(1.5)));
        assert_eq!(args.get("offset"), Some(&ArgValue::Integer(-4)));
        assert_eq!(args.get_str("label"), Some("a b"));
    }

    #[test]
    fn test_parse_no_spaces() {
        let specs = parse_chain_spec("scale!expand!identity").unwrap();
        assert_eq!(specs.len(), 3);
    }

    #[test]
    fn test_parse_empty_fails() {
        assert!(parse_chain_spec("").is_err());
        assert!(parse_chain_spec("!").is_err());
    }
}
