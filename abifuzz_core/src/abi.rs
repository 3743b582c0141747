use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while parsing a contract interface description.
#[derive(Error, Debug)]
pub enum AbiError {
    #[error("unsupported ABI type '{0}'")]
    UnknownType(String),
    #[error("invalid bit width {width} in '{ty}' (must be a multiple of 8 in 8..=512)")]
    InvalidBitWidth { ty: String, width: u32 },
    #[error("invalid precision {precision} in '{ty}' (must be in 1..=160)")]
    InvalidPrecision { ty: String, precision: u32 },
    #[error("invalid array length in '{0}'")]
    InvalidArrayLength(String),
    #[error("unbalanced parentheses in tuple type '{0}'")]
    UnbalancedTuple(String),
    #[error("failed to parse contract description: {0}")]
    Json(#[from] serde_json::Error),
}

/// Closed description of one ABI parameter type. Read-only input to the
/// fuzzer; drives mutation-strategy selection and is never mutated itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiType {
    /// Unsigned integer of `bits` width (multiple of 8, up to 512 as declared;
    /// mutation operates on at most 128 bits).
    Uint { bits: u16 },
    /// Fixed-point value carried as its scaled integer representation.
    Ufixed { bits: u16, precision: u8 },
    Bool,
    Byte,
    String,
    DynamicArray(Box<AbiType>),
    StaticArray(Box<AbiType>, usize),
    Tuple(Vec<AbiType>),
    /// Currency-transfer placeholder; the concrete amount is resampled against
    /// the acting account's live balance.
    Payment,
    /// Reference to one of the externally managed known accounts.
    Account,
}

impl AbiType {
    /// Parses one type string from a contract description, e.g. `uint64`,
    /// `ufixed64x2`, `byte[32]`, `(uint8,bool)[]`, `pay`, `account`.
    pub fn parse(spec: &str) -> Result<Self, AbiError> {
        let spec = spec.trim();

        if let Some(inner) = spec.strip_suffix("[]") {
            return Ok(AbiType::DynamicArray(Box::new(AbiType::parse(inner)?)));
        }
        if spec.ends_with(']') {
            let open = spec
                .rfind('[')
                .ok_or_else(|| AbiError::InvalidArrayLength(spec.to_string()))?;
            let len: usize = spec[open + 1..spec.len() - 1]
                .parse()
                .map_err(|_| AbiError::InvalidArrayLength(spec.to_string()))?;
            if len == 0 {
                return Err(AbiError::InvalidArrayLength(spec.to_string()));
            }
            return Ok(AbiType::StaticArray(
                Box::new(AbiType::parse(&spec[..open])?),
                len,
            ));
        }
        if spec.starts_with('(') {
            if !spec.ends_with(')') {
                return Err(AbiError::UnbalancedTuple(spec.to_string()));
            }
            let mut elems = Vec::new();
            for part in split_tuple(&spec[1..spec.len() - 1], spec)? {
                elems.push(AbiType::parse(part)?);
            }
            return Ok(AbiType::Tuple(elems));
        }

        match spec {
            "bool" => return Ok(AbiType::Bool),
            "byte" => return Ok(AbiType::Byte),
            "string" => return Ok(AbiType::String),
            "pay" => return Ok(AbiType::Payment),
            "account" => return Ok(AbiType::Account),
            _ => {}
        }

        if let Some(width_str) = spec.strip_prefix("uint") {
            let bits = parse_bit_width(spec, width_str)?;
            return Ok(AbiType::Uint { bits });
        }
        if let Some(rest) = spec.strip_prefix("ufixed") {
            let (width_str, precision_str) = rest
                .split_once('x')
                .ok_or_else(|| AbiError::UnknownType(spec.to_string()))?;
            let bits = parse_bit_width(spec, width_str)?;
            let precision: u32 = precision_str
                .parse()
                .map_err(|_| AbiError::UnknownType(spec.to_string()))?;
            if precision == 0 || precision > 160 {
                return Err(AbiError::InvalidPrecision {
                    ty: spec.to_string(),
                    precision,
                });
            }
            return Ok(AbiType::Ufixed {
                bits,
                precision: precision as u8,
            });
        }

        Err(AbiError::UnknownType(spec.to_string()))
    }

    /// Packed byte length of a value of this type, when statically known.
    /// Dynamically sized types return `None`; callers estimate instead.
    pub fn packed_byte_len(&self) -> Option<usize> {
        match self {
            AbiType::Uint { bits } | AbiType::Ufixed { bits, .. } => Some(usize::from(*bits) / 8),
            AbiType::Bool | AbiType::Byte => Some(1),
            AbiType::StaticArray(child, len) => child.packed_byte_len().map(|l| l * len),
            AbiType::Tuple(elems) => elems.iter().map(AbiType::packed_byte_len).sum(),
            AbiType::String
            | AbiType::DynamicArray(_)
            | AbiType::Payment
            | AbiType::Account => None,
        }
    }
}

fn parse_bit_width(ty: &str, width_str: &str) -> Result<u16, AbiError> {
    let width: u32 = width_str
        .parse()
        .map_err(|_| AbiError::UnknownType(ty.to_string()))?;
    if width == 0 || width > 512 || width % 8 != 0 {
        return Err(AbiError::InvalidBitWidth {
            ty: ty.to_string(),
            width,
        });
    }
    Ok(width as u16)
}

/// Splits a tuple body on top-level commas only.
fn split_tuple<'a>(body: &'a str, whole: &str) -> Result<Vec<&'a str>, AbiError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| AbiError::UnbalancedTuple(whole.to_string()))?;
            }
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(AbiError::UnbalancedTuple(whole.to_string()));
    }
    if !body.is_empty() {
        parts.push(&body[start..]);
    }
    Ok(parts)
}

/// Address of one known account, opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRef(pub String);

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One concrete argument value, shaped by its `AbiType`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbiValue {
    Uint(u128),
    Ufixed { scaled: u128, precision: u8 },
    Bool(bool),
    Byte(u8),
    String(String),
    Array(Vec<AbiValue>),
    Tuple(Vec<AbiValue>),
    Payment { amount: u64 },
    Account(AccountRef),
}

impl fmt::Display for AbiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiValue::Uint(v) => write!(f, "{v}"),
            AbiValue::Ufixed { scaled, precision } => {
                let scale = 10u128.pow(u32::from(*precision));
                write!(
                    f,
                    "{}.{:0width$}",
                    scaled / scale,
                    scaled % scale,
                    width = usize::from(*precision)
                )
            }
            AbiValue::Bool(v) => write!(f, "{v}"),
            AbiValue::Byte(v) => write!(f, "{v:#04x}"),
            AbiValue::String(v) => write!(f, "{v:?}"),
            AbiValue::Array(elems) | AbiValue::Tuple(elems) => {
                let (open, close) = if matches!(self, AbiValue::Array(_)) {
                    ('[', ']')
                } else {
                    ('(', ')')
                };
                write!(f, "{open}")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, "{close}")
            }
            AbiValue::Payment { amount } => write!(f, "pay {amount}"),
            AbiValue::Account(acc) => write!(f, "{acc}"),
        }
    }
}

/// One declared method parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: AbiType,
}

/// One callable method of the target program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub name: String,
    pub params: Vec<Param>,
}

/// The typed method interface of the program under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiContract {
    pub name: String,
    pub methods: Vec<Method>,
}

#[derive(Deserialize)]
struct RawContract {
    name: String,
    methods: Vec<RawMethod>,
}

#[derive(Deserialize)]
struct RawMethod {
    name: String,
    #[serde(default)]
    args: Vec<RawArg>,
}

#[derive(Deserialize)]
struct RawArg {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    ty: String,
}

impl AbiContract {
    /// Loads a contract description from its JSON artifact, the same shape the
    /// target toolchain emits: `{"name": ..., "methods": [{"name", "args"}]}`.
    pub fn from_json(text: &str) -> Result<Self, AbiError> {
        let raw: RawContract = serde_json::from_str(text)?;
        let mut methods = Vec::with_capacity(raw.methods.len());
        for raw_method in raw.methods {
            let mut params = Vec::with_capacity(raw_method.args.len());
            for (i, arg) in raw_method.args.iter().enumerate() {
                params.push(Param {
                    name: arg.name.clone().unwrap_or_else(|| format!("arg{i}")),
                    ty: AbiType::parse(&arg.ty)?,
                });
            }
            methods.push(Method {
                name: raw_method.name,
                params,
            });
        }
        Ok(AbiContract {
            name: raw.name,
            methods,
        })
    }

    pub fn get_method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalar_types() {
        assert_eq!(AbiType::parse("uint64").unwrap(), AbiType::Uint { bits: 64 });
        assert_eq!(
            AbiType::parse("ufixed64x2").unwrap(),
            AbiType::Ufixed {
                bits: 64,
                precision: 2
            }
        );
        assert_eq!(AbiType::parse("bool").unwrap(), AbiType::Bool);
        assert_eq!(AbiType::parse("byte").unwrap(), AbiType::Byte);
        assert_eq!(AbiType::parse("string").unwrap(), AbiType::String);
        assert_eq!(AbiType::parse("pay").unwrap(), AbiType::Payment);
        assert_eq!(AbiType::parse("account").unwrap(), AbiType::Account);
    }

    #[test]
    fn parses_nested_compound_types() {
        assert_eq!(
            AbiType::parse("uint8[]").unwrap(),
            AbiType::DynamicArray(Box::new(AbiType::Uint { bits: 8 }))
        );
        assert_eq!(
            AbiType::parse("byte[32]").unwrap(),
            AbiType::StaticArray(Box::new(AbiType::Byte), 32)
        );
        assert_eq!(
            AbiType::parse("(uint8,bool)[]").unwrap(),
            AbiType::DynamicArray(Box::new(AbiType::Tuple(vec![
                AbiType::Uint { bits: 8 },
                AbiType::Bool
            ])))
        );
        assert_eq!(
            AbiType::parse("(uint16,(bool,string))").unwrap(),
            AbiType::Tuple(vec![
                AbiType::Uint { bits: 16 },
                AbiType::Tuple(vec![AbiType::Bool, AbiType::String]),
            ])
        );
    }

    #[test]
    fn rejects_malformed_types() {
        assert!(matches!(
            AbiType::parse("uint63"),
            Err(AbiError::InvalidBitWidth { .. })
        ));
        assert!(matches!(
            AbiType::parse("uint1024"),
            Err(AbiError::InvalidBitWidth { .. })
        ));
        assert!(matches!(
            AbiType::parse("ufixed64x0"),
            Err(AbiError::InvalidPrecision { .. })
        ));
        assert!(matches!(
            AbiType::parse("uint8[0]"),
            Err(AbiError::InvalidArrayLength(_))
        ));
        assert!(matches!(
            AbiType::parse("(uint8,bool"),
            Err(AbiError::UnbalancedTuple(_))
        ));
        assert!(matches!(
            AbiType::parse("complex128"),
            Err(AbiError::UnknownType(_))
        ));
    }

    #[test]
    fn packed_byte_len_known_for_static_types_only() {
        assert_eq!(AbiType::parse("uint64").unwrap().packed_byte_len(), Some(8));
        assert_eq!(
            AbiType::parse("(uint32,bool)").unwrap().packed_byte_len(),
            Some(5)
        );
        assert_eq!(
            AbiType::parse("byte[16]").unwrap().packed_byte_len(),
            Some(16)
        );
        assert_eq!(AbiType::parse("string").unwrap().packed_byte_len(), None);
        assert_eq!(AbiType::parse("uint8[]").unwrap().packed_byte_len(), None);
    }

    #[test]
    fn loads_contract_from_json() {
        let text = r#"{
            "name": "vault",
            "methods": [
                {"name": "deposit", "args": [{"name": "payment", "type": "pay"}]},
                {"name": "withdraw", "args": [{"type": "uint64"}, {"name": "to", "type": "account"}]},
                {"name": "reset"}
            ]
        }"#;
        let contract = AbiContract::from_json(text).unwrap();
        assert_eq!(contract.name, "vault");
        assert_eq!(contract.methods.len(), 3);
        assert_eq!(contract.methods[0].params[0].ty, AbiType::Payment);
        assert_eq!(contract.methods[1].params[0].name, "arg0");
        assert_eq!(contract.methods[1].params[1].ty, AbiType::Account);
        assert!(contract.methods[2].params.is_empty());
        assert!(contract.get_method("withdraw").is_some());
        assert!(contract.get_method("missing").is_none());
    }

    #[test]
    fn value_display_is_readable() {
        assert_eq!(AbiValue::Uint(7).to_string(), "7");
        assert_eq!(
            AbiValue::Ufixed {
                scaled: 1234,
                precision: 2
            }
            .to_string(),
            "12.34"
        );
        assert_eq!(
            AbiValue::Tuple(vec![AbiValue::Bool(true), AbiValue::Uint(1)]).to_string(),
            "(true, 1)"
        );
        assert_eq!(AbiValue::Payment { amount: 500 }.to_string(), "pay 500");
    }
}
