use crate::error::InvalidInput;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// An inclusive range of integers, used for prefix lengths, ports, DSCP values and ICMP fields
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct SubRange {
    start: u32,
    end: u32,
}

impl SubRange {
    pub fn new(start: u32, end: u32) -> Result<Self, InvalidInput> {
        if start > end {
            return Err(InvalidInput::InvalidSubRange(format!("{start}-{end}")));
        }

        Ok(Self { start, end })
    }

    pub fn singleton(value: u32) -> Self {
        Self {
            start: value,
            end: value,
        }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn includes(&self, value: u32) -> bool {
        (self.start..=self.end).contains(&value)
    }

    pub fn includes_range(&self, other: &SubRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl Display for SubRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl Debug for SubRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for SubRange {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidInput::InvalidSubRange(s.to_string());
        let parse = |n: &str| n.trim().parse::<u32>().map_err(|_| invalid());

        match s.split_once('-') {
            None => parse(s).map(SubRange::singleton),
            Some((start, end)) => SubRange::new(parse(start)?, parse(end)?).map_err(|_| invalid()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("16-24".parse(), Ok(SubRange { start: 16, end: 24 }));
        assert_eq!("80".parse(), Ok(SubRange::singleton(80)));
        assert_eq!(
            "24-16".parse::<SubRange>(),
            Err(InvalidInput::InvalidSubRange("24-16".to_string()))
        );
        assert!("a-b".parse::<SubRange>().is_err());
        assert!("".parse::<SubRange>().is_err());
    }

    #[test]
    fn test_inclusion() {
        let range = SubRange::new(16, 24).unwrap();
        assert!(range.includes(16));
        assert!(range.includes(24));
        assert!(!range.includes(25));
        assert!(range.includes_range(&SubRange::singleton(20)));
        assert!(!range.includes_range(&SubRange::new(8, 20).unwrap()));
    }
}
