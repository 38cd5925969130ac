// ============================================================================
// Color Row Model
// ============================================================================
//
// The demo table holds one categorical column whose value is always either
// `white` or `black`. Updates only ever flip a row from one value to the
// other, so the whole write surface is a `ColorTransition`.
//
// ============================================================================

use super::{Result, SkewError};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Reject anything that cannot be spliced into SQL as a bare identifier.
pub fn validate_identifier(ident: &str) -> Result<()> {
    if IDENTIFIER.is_match(ident) {
        Ok(())
    } else {
        Err(SkewError::InvalidIdentifier(ident.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn inverse(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::White => "white",
            Color::Black => "black",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Color {
    type Err = SkewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "white" => Ok(Color::White),
            "black" => Ok(Color::Black),
            _ => Err(SkewError::InvalidColor(s.to_string())),
        }
    }
}

/// "Set to `to` where currently `from`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTransition {
    pub from: Color,
    pub to: Color,
}

impl ColorTransition {
    /// The outer query of the scenario.
    pub const WHITE_TO_BLACK: ColorTransition = ColorTransition {
        from: Color::White,
        to: Color::Black,
    };

    pub fn new(from: Color, to: Color) -> Result<Self> {
        if from == to {
            return Err(SkewError::Execution(format!(
                "Transition from '{from}' to itself changes nothing"
            )));
        }
        Ok(Self { from, to })
    }

    pub fn inverse(self) -> Self {
        Self {
            from: self.to,
            to: self.from,
        }
    }

    /// Whether a row currently holding `current` is rewritten by this update.
    pub fn matches(self, current: Color) -> bool {
        current == self.from
    }

    /// Render the fixed statement shape `UPDATE t SET c = 'to' WHERE c = 'from'`.
    ///
    /// Values come from a closed enum, identifiers must pass
    /// [`validate_identifier`].
    pub fn update_statement(self, table: &str, column: &str) -> Result<String> {
        validate_identifier(table)?;
        validate_identifier(column)?;
        Ok(format!(
            "UPDATE {table} SET {column} = '{}' WHERE {column} = '{}'",
            self.to, self.from
        ))
    }
}

impl fmt::Display for ColorTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}
