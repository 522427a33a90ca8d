//! Primitive arguments for calls into script

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use qjs_core::HostValue;

/// A primitive argument passed to a global function
#[derive(Debug, Clone, PartialEq)]
pub enum HostArg {
    Null,
    Bool(bool),
    Int(i32),
    /// Converted like the engine does: `i32` when it fits, otherwise a double
    Long(i64),
    Double(f64),
    String(String),
}

impl HostArg {
    pub fn to_host_value(&self) -> HostValue {
        match self {
            HostArg::Null => HostValue::Null,
            HostArg::Bool(b) => HostValue::Bool(*b),
            HostArg::Int(n) => HostValue::Int(*n),
            HostArg::Long(n) => HostValue::from(*n),
            HostArg::Double(d) => HostValue::Float(*d),
            HostArg::String(s) => HostValue::String(s.clone()),
        }
    }
}

/// Text form: `null`, `true`, `false`, integers, doubles; anything else is a string
impl FromStr for HostArg {
    type Err = Infallible;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Ok(match text {
            "null" => HostArg::Null,
            "true" => HostArg::Bool(true),
            "false" => HostArg::Bool(false),
            _ => {
                if let Ok(n) = text.parse::<i64>() {
                    match i32::try_from(n) {
                        Ok(n) => HostArg::Int(n),
                        Err(_) => HostArg::Long(n),
                    }
                } else if let Some(d) = parse_double(text) {
                    HostArg::Double(d)
                } else {
                    HostArg::String(text.to_string())
                }
            }
        })
    }
}

// `f64::from_str` also accepts "inf" and "NaN"; those stay strings
fn parse_double(text: &str) -> Option<f64> {
    let looks_numeric = text
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if !looks_numeric {
        return None;
    }
    text.parse::<f64>().ok()
}

impl fmt::Display for HostArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostArg::Null => f.write_str("null"),
            HostArg::Bool(b) => write!(f, "{}", b),
            HostArg::Int(n) => write!(f, "{}", n),
            HostArg::Long(n) => write!(f, "{}", n),
            HostArg::Double(d) => write!(f, "{}", d),
            HostArg::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for HostArg {
    fn from(b: bool) -> Self {
        HostArg::Bool(b)
    }
}

impl From<i32> for HostArg {
    fn from(n: i32) -> Self {
        HostArg::Int(n)
    }
}

impl From<u32> for HostArg {
    fn from(n: u32) -> Self {
        HostArg::Long(n as i64)
    }
}

impl From<i64> for HostArg {
    fn from(n: i64) -> Self {
        HostArg::Long(n)
    }
}

impl From<f64> for HostArg {
    fn from(d: f64) -> Self {
        HostArg::Double(d)
    }
}

impl From<&str> for HostArg {
    fn from(s: &str) -> Self {
        HostArg::String(s.to_string())
    }
}

impl From<String> for HostArg {
    fn from(s: String) -> Self {
        HostArg::String(s)
    }
}

impl<T: Into<HostArg>> From<Option<T>> for HostArg {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(HostArg::Null)
    }
}
