//! CPE 2.3 formatted-string unbinding
//!
//! Turns a bound name such as `cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*`
//! into a [`WellFormedName`] holding one value per attribute.
//!
//! Rules applied while unbinding:
//!
//! - the `cpe:2.3:` prefix is required (case-insensitive)
//! - up to 11 colon-separated components follow; `\:` does not split
//! - `*` unbinds to the logical value `ANY`, `-` to `NA`
//! - attributes missing from the string are `ANY`
//! - literal values keep alphanumerics, `_`, `-` and `.`; any other
//!   punctuation must be escaped and is stored without its backslash
//! - `*` and runs of `?` are only legal at either end of a value

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CpeError;

/// Required prefix of every CPE 2.3 formatted string
pub const CPE23_PREFIX: &str = "cpe:2.3:";

/// Stored form of the logical value ANY
pub const ANY: &str = "ANY";

/// Stored form of the logical value NA
pub const NA: &str = "NA";

/// The eleven attributes of a well-formed name, in binding order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Part,
    Vendor,
    Product,
    Version,
    Update,
    Edition,
    Language,
    SwEdition,
    TargetSw,
    TargetHw,
    Other,
}

impl Attribute {
    /// All attributes in the order they appear in a formatted string
    pub const ALL: [Attribute; 11] = [
        Attribute::Part,
        Attribute::Vendor,
        Attribute::Product,
        Attribute::Version,
        Attribute::Update,
        Attribute::Edition,
        Attribute::Language,
        Attribute::SwEdition,
        Attribute::TargetSw,
        Attribute::TargetHw,
        Attribute::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Attribute::Part => "part",
            Attribute::Vendor => "vendor",
            Attribute::Product => "product",
            Attribute::Version => "version",
            Attribute::Update => "update",
            Attribute::Edition => "edition",
            Attribute::Language => "language",
            Attribute::SwEdition => "sw_edition",
            Attribute::TargetSw => "target_sw",
            Attribute::TargetHw => "target_hw",
            Attribute::Other => "other",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a single attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeValue {
    /// Unspecified, matches anything
    Any,
    /// Not applicable
    Na,
    /// Literal value with escapes removed
    Value(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> &str {
        match self {
            AttributeValue::Any => ANY,
            AttributeValue::Na => NA,
            AttributeValue::Value(v) => v,
        }
    }
}

/// A fully decoded CPE name
///
/// Every attribute always carries a value: construction either unbinds the
/// whole string or fails.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WellFormedName {
    values: [AttributeValue; 11],
}

impl WellFormedName {
    /// Unbind a CPE 2.3 formatted string
    pub fn unbind_formatted_string(fs: &str) -> Result<Self, CpeError> {
        let body = fs
            .get(..CPE23_PREFIX.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(CPE23_PREFIX))
            .map(|_| &fs[CPE23_PREFIX.len()..])
            .ok_or_else(|| CpeError::MissingPrefix(fs.to_string()))?;

        let components = split_components(body);
        if components.len() > Attribute::ALL.len() {
            return Err(CpeError::TooManyComponents(components.len()));
        }

        let mut values: [AttributeValue; 11] = std::array::from_fn(|_| AttributeValue::Any);
        for (attribute, raw) in Attribute::ALL.iter().zip(components.iter()) {
            values[attribute.index()] = unbind_value(*attribute, raw)?;
        }

        if let AttributeValue::Value(part) = &values[Attribute::Part.index()] {
            if !matches!(part.as_str(), "a" | "o" | "h") {
                return Err(CpeError::InvalidPart(part.clone()));
            }
        }

        Ok(Self { values })
    }

    pub fn get(&self, attribute: Attribute) -> &AttributeValue {
        &self.values[attribute.index()]
    }

    /// Stored string form of an attribute (`ANY` / `NA` for logical values)
    pub fn get_string(&self, attribute: Attribute) -> &str {
        self.get(attribute).as_str()
    }
}

impl FromStr for WellFormedName {
    type Err = CpeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::unbind_formatted_string(s)
    }
}

/// Split on colons that are not escaped; escapes stay in place for
/// [`unbind_value`] to interpret.
fn split_components(body: &str) -> Vec<&str> {
    let mut components = Vec::with_capacity(Attribute::ALL.len());
    let mut start = 0;
    let mut escaped = false;

    for (idx, ch) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            ':' => {
                components.push(&body[start..idx]);
                start = idx + 1;
            },
            _ => {},
        }
    }
    components.push(&body[start..]);
    components
}

fn unbind_value(attribute: Attribute, raw: &str) -> Result<AttributeValue, CpeError> {
    let name = attribute.as_str();
    match raw {
        "" => return Err(CpeError::EmptyComponent { attribute: name }),
        "*" => return Ok(AttributeValue::Any),
        "-" => return Ok(AttributeValue::Na),
        _ => {},
    }

    let chars: Vec<char> = raw.chars().collect();
    let len = chars.len();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;

    while i < len {
        match chars[i] {
            '\\' => {
                let next = *chars
                    .get(i + 1)
                    .ok_or(CpeError::DanglingEscape { attribute: name })?;
                if !next.is_ascii_graphic() {
                    return Err(CpeError::InvalidCharacter { attribute: name, ch: next });
                }
                out.push(next);
                i += 2;
            },
            '*' => {
                if i != 0 && i != len - 1 {
                    return Err(CpeError::MisplacedWildcard { attribute: name });
                }
                out.push('*');
                i += 1;
            },
            '?' => {
                let run_start = i;
                while i < len && chars[i] == '?' {
                    out.push('?');
                    i += 1;
                }
                if run_start != 0 && i != len {
                    return Err(CpeError::MisplacedWildcard { attribute: name });
                }
            },
            ch if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.') => {
                out.push(ch);
                i += 1;
            },
            ch => return Err(CpeError::InvalidCharacter { attribute: name, ch }),
        }
    }

    Ok(AttributeValue::Value(out))
}
