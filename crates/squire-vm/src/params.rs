//! Call-time parameter checking for native closures.
//!
//! A closure may carry a [`ParamsCheck`]: an arity range plus a type mask
//! with one symbol per parameter, the receiver (`this`) first. The VM
//! validates the supplied arguments against it before the closure body
//! runs, so native code never sees a wrong argument count or kind.
//!
//! | symbol | accepts                    |
//! |--------|----------------------------|
//! | `i`    | integer, bool              |
//! | `b`    | bool, integer              |
//! | `f`    | float, integer             |
//! | `n`    | integer, float, bool       |
//! | `s`    | string                     |
//! | `t`    | table                      |
//! | `a`    | array                      |
//! | `c`    | function, class            |
//! | `y`    | class                      |
//! | `x`    | instance                   |
//! | `u`    | userdata                   |
//! | `o`    | null                       |
//! | `.`    | anything                   |

use crate::value::ValueType;
use crate::{VmError, VmResult};

/// One symbol of the type mask alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Integer (booleans are accepted)
    Integer,
    /// Boolean (integers are accepted)
    Bool,
    /// Float (integers are accepted)
    Float,
    /// Any numeric value
    Number,
    /// String
    String,
    /// Table
    Table,
    /// Array
    Array,
    /// Anything callable
    Callable,
    /// Class
    Class,
    /// Class instance
    Instance,
    /// Opaque host data
    UserData,
    /// Null
    Null,
    /// No constraint
    Any,
}

impl ParamKind {
    /// Mask symbol for this kind
    pub const fn symbol(self) -> char {
        match self {
            ParamKind::Integer => 'i',
            ParamKind::Bool => 'b',
            ParamKind::Float => 'f',
            ParamKind::Number => 'n',
            ParamKind::String => 's',
            ParamKind::Table => 't',
            ParamKind::Array => 'a',
            ParamKind::Callable => 'c',
            ParamKind::Class => 'y',
            ParamKind::Instance => 'x',
            ParamKind::UserData => 'u',
            ParamKind::Null => 'o',
            ParamKind::Any => '.',
        }
    }

    /// Parse a mask symbol
    pub const fn from_symbol(symbol: char) -> Option<Self> {
        Some(match symbol {
            'i' => ParamKind::Integer,
            'b' => ParamKind::Bool,
            'f' => ParamKind::Float,
            'n' => ParamKind::Number,
            's' => ParamKind::String,
            't' => ParamKind::Table,
            'a' => ParamKind::Array,
            'c' => ParamKind::Callable,
            'y' => ParamKind::Class,
            'x' => ParamKind::Instance,
            'u' => ParamKind::UserData,
            'o' => ParamKind::Null,
            '.' => ParamKind::Any,
            _ => return None,
        })
    }

    /// Name used in error messages
    pub const fn name(self) -> &'static str {
        match self {
            ParamKind::Integer => "integer",
            ParamKind::Bool => "bool",
            ParamKind::Float => "float",
            ParamKind::Number => "number",
            ParamKind::String => "string",
            ParamKind::Table => "table",
            ParamKind::Array => "array",
            ParamKind::Callable => "function",
            ParamKind::Class => "class",
            ParamKind::Instance => "instance",
            ParamKind::UserData => "userdata",
            ParamKind::Null => "null",
            ParamKind::Any => "any",
        }
    }

    /// Whether a value of dynamic type `ty` satisfies this kind
    pub const fn accepts(self, ty: ValueType) -> bool {
        use ValueType as T;
        match self {
            ParamKind::Integer | ParamKind::Bool => matches!(ty, T::Integer | T::Bool),
            ParamKind::Float => matches!(ty, T::Float | T::Integer),
            ParamKind::Number => matches!(ty, T::Integer | T::Float | T::Bool),
            ParamKind::String => matches!(ty, T::String),
            ParamKind::Table => matches!(ty, T::Table),
            ParamKind::Array => matches!(ty, T::Array),
            ParamKind::Callable => matches!(ty, T::Closure | T::Class),
            ParamKind::Class => matches!(ty, T::Class),
            ParamKind::Instance => matches!(ty, T::Instance),
            ParamKind::UserData => matches!(ty, T::UserData),
            ParamKind::Null => matches!(ty, T::Null),
            ParamKind::Any => true,
        }
    }
}

/// Arity range and type mask checked before a native closure runs.
///
/// Both bounds count the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamsCheck {
    min: usize,
    max: usize,
    mask: Vec<ParamKind>,
}

impl ParamsCheck {
    /// Build a check from bounds and a mask string.
    ///
    /// A mask shorter than `max` leaves the trailing parameters unchecked.
    pub fn new(min: usize, max: usize, mask: &str) -> VmResult<Self> {
        if min > max {
            return Err(VmError::InvalidParamsCheck(format!(
                "minimum arity {} exceeds maximum {}",
                min, max
            )));
        }
        let mask = mask
            .chars()
            .map(|c| {
                ParamKind::from_symbol(c).ok_or_else(|| {
                    VmError::InvalidParamsCheck(format!("unknown type mask symbol '{}'", c))
                })
            })
            .collect::<VmResult<Vec<_>>>()?;
        if mask.len() > max {
            return Err(VmError::InvalidParamsCheck(format!(
                "type mask has {} symbols but at most {} parameters are accepted",
                mask.len(),
                max
            )));
        }
        Ok(Self { min, max, mask })
    }

    /// Minimum parameter count (receiver included)
    pub fn min(&self) -> usize {
        self.min
    }

    /// Maximum parameter count (receiver included)
    pub fn max(&self) -> usize {
        self.max
    }

    /// The type mask
    pub fn mask(&self) -> &[ParamKind] {
        &self.mask
    }

    /// The type mask rendered back to its string form
    pub fn mask_string(&self) -> String {
        self.mask.iter().map(|k| k.symbol()).collect()
    }

    /// Validate the dynamic types of the supplied parameters
    pub fn check(&self, supplied: &[ValueType]) -> VmResult<()> {
        if supplied.len() < self.min || supplied.len() > self.max {
            return Err(VmError::WrongArgumentCount {
                min: self.min,
                max: self.max,
                got: supplied.len(),
            });
        }
        for (index, (kind, ty)) in self.mask.iter().zip(supplied).enumerate() {
            if !kind.accepts(*ty) {
                return Err(VmError::ParameterType {
                    index,
                    expected: kind.name(),
                    got: ty.name(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_roundtrip() {
        for c in "ibfnstacyxuo.".chars() {
            assert_eq!(ParamKind::from_symbol(c).map(|k| k.symbol()), Some(c));
        }
        assert!(ParamKind::from_symbol('z').is_none());
    }

    #[test]
    fn test_integer_accepts_bool() {
        assert!(ParamKind::Integer.accepts(ValueType::Bool));
        assert!(ParamKind::Float.accepts(ValueType::Integer));
        assert!(!ParamKind::Integer.accepts(ValueType::Float));
        assert!(!ParamKind::String.accepts(ValueType::Integer));
    }

    #[test]
    fn test_arity_bounds() {
        let check = ParamsCheck::new(2, 3, ".ii").unwrap();
        assert!(check.check(&[ValueType::Table, ValueType::Integer]).is_ok());
        assert!(matches!(
            check.check(&[ValueType::Table]),
            Err(VmError::WrongArgumentCount { min: 2, max: 3, got: 1 })
        ));
        assert!(matches!(
            check.check(&[ValueType::Table; 4]),
            Err(VmError::WrongArgumentCount { got: 4, .. })
        ));
    }

    #[test]
    fn test_type_mask() {
        let check = ParamsCheck::new(2, 2, ".i").unwrap();
        let err = check
            .check(&[ValueType::Table, ValueType::String])
            .unwrap_err();
        assert!(matches!(
            err,
            VmError::ParameterType { index: 1, expected: "integer", got: "string" }
        ));
    }

    #[test]
    fn test_invalid_masks() {
        assert!(ParamsCheck::new(3, 2, "").is_err());
        assert!(ParamsCheck::new(1, 1, "q").is_err());
        assert!(ParamsCheck::new(1, 1, "..").is_err());
        assert_eq!(ParamsCheck::new(1, 3, ".sn").unwrap().mask_string(), ".sn");
    }
}
