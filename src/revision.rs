//! Parsing and ordering of dotted/lettered revision strings.
//!
//! Revisions look like `30.0.3`, `26.1.1`, or `25b`. A trailing letter acts
//! as an ordinal ('a' = 0), so `25` < `25b` < `26`. Comparison is
//! component-wise with shorter tuples zero-padded, which keeps the relation
//! total and transitive over everything a manifest can throw at it.

use std::cmp::Ordering;
use std::fmt;

/// Revision string with no recognizable numeric component.
#[derive(Debug)]
pub struct MalformedVersion(pub String);

impl fmt::Display for MalformedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognizable revision string: {:?}", self.0)
    }
}

impl std::error::Error for MalformedVersion {}

/// Parsed revision value used to pick the newest of several candidates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct Revision {
    parts: Vec<u64>,
    letter: Option<u32>,
}

impl Revision {
    pub fn new(parts: Vec<u64>, letter: Option<u32>) -> Self {
        Self { parts, letter }
    }

    /// Parse a dotted/lettered revision string.
    ///
    /// Each `.`-separated segment contributes its leading digit run; a single
    /// letter after the digits of the final segment becomes the ordinal
    /// component. Anything else in a segment is ignored, so `"30.0.3 rc2"`
    /// parses as `[30, 0, 3]`.
    pub fn parse(text: &str) -> Result<Self, MalformedVersion> {
        let mut parts = Vec::new();
        let mut letter = None;

        let segments: Vec<&str> = text.trim().split('.').collect();
        let last = segments.len().saturating_sub(1);
        for (i, segment) in segments.iter().enumerate() {
            let digits: String = segment.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                continue;
            }
            let value = digits
                .parse::<u64>()
                .map_err(|_| MalformedVersion(text.to_string()))?;
            parts.push(value);
            if i == last {
                let rest = &segment[digits.len()..];
                if let Some(c) = rest.chars().next()
                    && c.is_ascii_lowercase()
                {
                    letter = Some(c as u32 - 'a' as u32);
                }
            }
        }

        if parts.is_empty() {
            return Err(MalformedVersion(text.to_string()));
        }
        Ok(Self { parts, letter })
    }

    /// Parse, treating unparsable input as the lowest possible revision.
    ///
    /// Manifests carry partial and legacy entries; a bad version string must
    /// lose every comparison, never abort processing.
    pub fn parse_or_lowest(text: &str) -> Self {
        Self::parse(text).unwrap_or_default()
    }

    /// The numeric components, without the letter ordinal.
    pub fn numeric_parts(&self) -> &[u64] {
        &self.parts
    }

    pub fn letter_ordinal(&self) -> Option<u32> {
        self.letter
    }

    /// Numeric components joined with `.`, at most `max` of them.
    pub fn dotted(&self, max: usize) -> String {
        self.parts
            .iter()
            .take(max)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        // None < Some: a bare number sorts before its lettered successors
        self.letter.cmp(&other.letter)
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dotted(usize::MAX))?;
        if let Some(ordinal) = self.letter
            && let Some(c) = char::from_u32('a' as u32 + ordinal)
        {
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(text: &str) -> Revision {
        Revision::parse(text).unwrap()
    }

    #[test]
    fn test_parse_dotted() {
        assert_eq!(rev("30.0.3").numeric_parts(), &[30, 0, 3]);
        assert_eq!(rev("26.1.1").numeric_parts(), &[26, 1, 1]);
        assert_eq!(rev("9.123456").numeric_parts(), &[9, 123456]);
    }

    #[test]
    fn test_parse_trailing_letter() {
        let r = rev("25b");
        assert_eq!(r.numeric_parts(), &[25]);
        assert_eq!(r.letter_ordinal(), Some(1));
    }

    #[test]
    fn test_parse_ignores_prerelease_suffix() {
        assert_eq!(rev("30.0.3 rc2").numeric_parts(), &[30, 0, 3]);
        assert_eq!(rev("30.0.3 rc2").letter_ordinal(), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Revision::parse("").is_err());
        assert!(Revision::parse("canary").is_err());
        assert!(Revision::parse("...").is_err());
    }

    #[test]
    fn test_parse_or_lowest_never_fails() {
        let lowest = Revision::parse_or_lowest("not-a-version");
        assert!(lowest < rev("0.0.1"));
        assert!(lowest <= Revision::default());
    }

    #[test]
    fn test_ordering_basic() {
        assert!(rev("30.0.2") < rev("30.0.3"));
        assert!(rev("9.1") < rev("10.0"));
        assert!(rev("31.0.0") > rev("30.99.99"));
    }

    #[test]
    fn test_ordering_zero_padding() {
        assert_eq!(rev("1.0").cmp(&rev("1")), Ordering::Equal);
        assert!(rev("1.0.1") > rev("1"));
    }

    #[test]
    fn test_letter_sorts_after_bare_number() {
        assert!(rev("25") < rev("25b"));
        assert!(rev("25b") < rev("26"));
        assert!(rev("25a") < rev("25b"));
    }

    #[test]
    fn test_antisymmetry_and_transitivity() {
        let samples = ["1", "1.0.1", "2", "25", "25a", "25b", "26", "30.0.3"];
        for a in &samples {
            for b in &samples {
                let (ra, rb) = (rev(a), rev(b));
                assert_eq!(ra.cmp(&rb), rb.cmp(&ra).reverse(), "{} vs {}", a, b);
                for c in &samples {
                    let rc = rev(c);
                    if ra <= rb && rb <= rc {
                        assert!(ra <= rc, "{} <= {} <= {}", a, b, c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_display_roundtrip() {
        assert_eq!(rev("30.0.3").to_string(), "30.0.3");
        assert_eq!(rev("25b").to_string(), "25b");
    }

    #[test]
    fn test_dotted_truncation() {
        assert_eq!(rev("26.1.1").dotted(3), "26.1.1");
        assert_eq!(rev("25.1.8937393").dotted(2), "25.1");
        assert_eq!(rev("25b").dotted(3), "25");
    }
}
