use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_BRIGHTNESS: u8 = 100;
const AUTO_KEYWORD: &str = "auto";

/// Strip brightness: a percentage, or `auto` to let the surface derive a level
/// from what is being displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BrightnessRepr", into = "BrightnessRepr")]
pub enum Brightness {
    Level(u8),
    Auto,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrightnessError {
    #[error("brightness must be between 0 and 100 (received {0})")]
    OutOfRange(i64),
    #[error("brightness must be a number between 0 and 100 or 'auto' (received '{0}')")]
    Invalid(String),
}

impl Brightness {
    pub const FULL: Brightness = Brightness::Level(MAX_BRIGHTNESS);

    pub fn level(value: i64) -> Result<Self, BrightnessError> {
        if (0..=i64::from(MAX_BRIGHTNESS)).contains(&value) {
            Ok(Brightness::Level(value as u8))
        } else {
            Err(BrightnessError::OutOfRange(value))
        }
    }
}

impl Default for Brightness {
    fn default() -> Self {
        Brightness::FULL
    }
}

impl fmt::Display for Brightness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Brightness::Level(level) => write!(f, "{level}"),
            Brightness::Auto => f.write_str(AUTO_KEYWORD),
        }
    }
}

impl FromStr for Brightness {
    type Err = BrightnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == AUTO_KEYWORD {
            return Ok(Brightness::Auto);
        }
        let value: i64 = trimmed
            .parse()
            .map_err(|_| BrightnessError::Invalid(trimmed.to_string()))?;
        Brightness::level(value)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum BrightnessRepr {
    Level(i64),
    Keyword(String),
}

impl TryFrom<BrightnessRepr> for Brightness {
    type Error = BrightnessError;

    fn try_from(repr: BrightnessRepr) -> Result<Self, Self::Error> {
        match repr {
            BrightnessRepr::Level(value) => Brightness::level(value),
            BrightnessRepr::Keyword(keyword) if keyword == AUTO_KEYWORD => Ok(Brightness::Auto),
            BrightnessRepr::Keyword(other) => Err(BrightnessError::Invalid(other)),
        }
    }
}

impl From<Brightness> for BrightnessRepr {
    fn from(brightness: Brightness) -> Self {
        match brightness {
            Brightness::Level(level) => BrightnessRepr::Level(i64::from(level)),
            Brightness::Auto => BrightnessRepr::Keyword(AUTO_KEYWORD.to_string()),
        }
    }
}
