use std::fmt::{self, Display, Formatter};
use std::ops::Deref;
use std::str::FromStr;

use rand::distributions::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CODE_LENGTH: usize = 4;

/// A one-time-password code: a fixed number of decimal digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code {
    digits: [u8; CODE_LENGTH],
}

impl Code {
    /// Generate a random code.
    pub fn random() -> Self {
        let mut digits = [0; CODE_LENGTH];
        let digit_dist = Uniform::from(0..=9);
        let mut rng = rand::thread_rng();
        for digit in &mut digits {
            *digit = digit_dist.sample(&mut rng);
        }
        Self { digits }
    }
}

impl Deref for Code {
    type Target = [u8; CODE_LENGTH];

    fn deref(&self) -> &Self::Target {
        &self.digits
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for digit in self.digits {
            write!(f, "{digit}")?;
        }
        Ok(())
    }
}

impl FromStr for Code {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let len = s.chars().count();
        if len != CODE_LENGTH {
            return Err(ParseError::InvalidLength(len));
        }
        let mut digits = [0; CODE_LENGTH];
        for (slot, c) in digits.iter_mut().zip(s.chars()) {
            *slot = c
                .to_digit(10)
                .map(|d| d as u8)
                .ok_or(ParseError::InvalidChar(c))?;
        }
        Ok(Self { digits })
    }
}

impl TryFrom<String> for Code {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.to_string()
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("code must contain exactly {CODE_LENGTH} characters, got {0}")]
    InvalidLength(usize),
    #[error("code must contain only digits, found '{0}'")]
    InvalidChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let code: Code = "0429".parse().unwrap();
        assert_eq!([0, 4, 2, 9], *code);
        assert_eq!("0429", code.to_string());
    }

    #[test]
    fn reject_malformed() {
        assert!(matches!("123".parse::<Code>(), Err(ParseError::InvalidLength(3))));
        assert!(matches!("12345".parse::<Code>(), Err(ParseError::InvalidLength(5))));
        assert!(matches!("12a4".parse::<Code>(), Err(ParseError::InvalidChar('a'))));
    }

    #[test]
    fn random_codes_are_well_formed() {
        for _ in 0..100 {
            let code = Code::random();
            assert!(code.iter().all(|d| *d <= 9));
            assert_eq!(code, code.to_string().parse().unwrap());
        }
    }
}
