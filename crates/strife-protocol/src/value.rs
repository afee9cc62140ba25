//! The decoded shape of one protocol field.
//!
//! The wire format has no type tags: a field is "numeric-looking" or it
//! isn't, and a list field is inspected element-wise. This mirrors the
//! reference implementation's `unprotocol_msg`, which promotes a token to an
//! integer when `token.isnumeric()` and a list to a list of integers when its
//! first element is numeric.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Int(i64),
    IntList(Vec<i64>),
    Str(String),
    StrList(Vec<String>),
}

impl Field {
    /// Parse one raw (already `#`-split-aware) token per the promotion rules.
    pub fn parse(raw: &str) -> Field {
        if raw.contains('#') {
            let parts: Vec<&str> = raw.split('#').collect();
            if parts.first().is_some_and(|p| is_numeric(p)) {
                Field::IntList(parts.iter().filter_map(|p| p.parse().ok()).collect())
            } else {
                Field::StrList(parts.into_iter().map(str::to_string).collect())
            }
        } else if is_numeric(raw) {
            Field::Int(raw.parse().expect("is_numeric implies a valid i64"))
        } else {
            Field::Str(raw.to_string())
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Usernames and group names can be all-digits; §9's defensive-coercion
    /// note applies here — callers that need a string regardless of whether
    /// the codec promoted it to an integer should use this instead of `as_str`.
    pub fn as_str_lossy(&self) -> String {
        match self {
            Field::Str(s) => s.clone(),
            Field::Int(i) => i.to_string(),
            Field::StrList(v) => v.join("#"),
            Field::IntList(v) => v
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join("#"),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Field::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            Field::StrList(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> Option<&[i64]> {
        match self {
            Field::IntList(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(i) => write!(f, "{i}"),
            Field::Str(s) => write!(f, "{s}"),
            Field::IntList(v) => {
                write!(
                    f,
                    "{}",
                    v.iter().map(i64::to_string).collect::<Vec<_>>().join("#")
                )
            }
            Field::StrList(v) => write!(f, "{}", v.join("#")),
        }
    }
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_string() {
        assert_eq!(Field::parse("alice"), Field::Str("alice".into()));
    }

    #[test]
    fn parses_plain_integer() {
        assert_eq!(Field::parse("42"), Field::Int(42));
    }

    #[test]
    fn parses_int_list_when_first_element_numeric() {
        assert_eq!(Field::parse("1#2#3"), Field::IntList(vec![1, 2, 3]));
    }

    #[test]
    fn parses_str_list_when_first_element_not_numeric() {
        assert_eq!(
            Field::parse("bob#carol"),
            Field::StrList(vec!["bob".into(), "carol".into()])
        );
    }

    #[test]
    fn all_digit_username_round_trips_via_lossy_string() {
        let f = Field::parse("1234");
        assert_eq!(f, Field::Int(1234));
        assert_eq!(f.as_str_lossy(), "1234");
    }

    #[test]
    fn display_matches_wire_form() {
        assert_eq!(Field::IntList(vec![1, 2, 3]).to_string(), "1#2#3");
        assert_eq!(Field::Str("hi".into()).to_string(), "hi");
    }
}
