use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

static QUALIFIED_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*/)?[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$",
    )
    .expect("label key pattern compiles")
});

static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$")
        .expect("label value pattern compiles")
});

static SET_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+(in|notin)\s*\((.*)\)$")
        .expect("set term pattern compiles")
});

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid label key '{0}'")]
    InvalidKey(String),
    #[error("invalid label value '{0}'")]
    InvalidValue(String),
    #[error("empty value set for key '{0}'")]
    EmptySet(String),
    #[error("unbalanced parentheses in '{0}'")]
    Unbalanced(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub op: Operator,
    /// Sorted and deduplicated.
    pub values: Vec<String>,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Operator::Equals => write!(f, "{}={}", self.key, self.values[0]),
            Operator::NotEquals => {
                write!(f, "{}!={}", self.key, self.values[0])
            }
            Operator::In => {
                write!(f, "{} in ({})", self.key, self.values.join(","))
            }
            Operator::NotIn => {
                write!(f, "{} notin ({})", self.key, self.values.join(","))
            }
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// Kubernetes label selector in its textual form. Requirements are kept
/// sorted by key so two selectors that differ only in term order compare
/// equal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Equality-only selectors map directly onto a node selector. Any other
    /// operator yields `None`.
    pub fn as_label_map(&self) -> Option<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for req in &self.requirements {
            if req.op != Operator::Equals {
                return None;
            }
            if let Some(prev) = out.insert(req.key.clone(), req.values[0].clone())
            {
                if prev != req.values[0] {
                    return None;
                }
            }
        }
        Some(out)
    }
}

fn validate_key(key: &str) -> Result<String, SelectorError> {
    let name_len = key.rsplit('/').next().map(str::len).unwrap_or(0);
    if key.len() > 316 || name_len > 63 || !QUALIFIED_KEY.is_match(key) {
        return Err(SelectorError::InvalidKey(key.to_string()));
    }
    Ok(key.to_string())
}

fn validate_value(value: &str) -> Result<String, SelectorError> {
    if value.len() > 63 || !LABEL_VALUE.is_match(value) {
        return Err(SelectorError::InvalidValue(value.to_string()));
    }
    Ok(value.to_string())
}

fn split_terms(raw: &str) -> Result<Vec<&str>, SelectorError> {
    let mut terms = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(SelectorError::Unbalanced(raw.to_string()));
                }
            }
            ',' if depth == 0 => {
                terms.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SelectorError::Unbalanced(raw.to_string()));
    }
    terms.push(&raw[start..]);
    Ok(terms)
}

fn parse_term(term: &str) -> Result<Requirement, SelectorError> {
    if let Some(caps) = SET_TERM.captures(term) {
        let key = validate_key(&caps[1])?;
        let op = if &caps[2] == "in" {
            Operator::In
        } else {
            Operator::NotIn
        };
        let values = caps[3]
            .split(',')
            .map(str::trim)
            .map(validate_value)
            .collect::<Result<BTreeSet<_>, _>>()?;
        if caps[3].trim().is_empty() {
            return Err(SelectorError::EmptySet(key));
        }
        return Ok(Requirement {
            key,
            op,
            values: values.into_iter().collect(),
        });
    }
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement {
            key: validate_key(key.trim())?,
            op: Operator::DoesNotExist,
            values: Vec::new(),
        });
    }
    let (key, op, value) = if let Some((k, v)) = term.split_once("!=") {
        (k, Operator::NotEquals, v)
    } else if let Some((k, v)) = term.split_once("==") {
        (k, Operator::Equals, v)
    } else if let Some((k, v)) = term.split_once('=') {
        (k, Operator::Equals, v)
    } else {
        return Ok(Requirement {
            key: validate_key(term)?,
            op: Operator::Exists,
            values: Vec::new(),
        });
    };
    Ok(Requirement {
        key: validate_key(key.trim())?,
        op,
        values: vec![validate_value(value.trim())?],
    })
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }
        let mut requirements = split_terms(raw)?
            .into_iter()
            .map(str::trim)
            .map(parse_term)
            .collect::<Result<Vec<_>, _>>()?;
        requirements.sort_by(|a, b| {
            a.key.cmp(&b.key).then(a.op.cmp(&b.op)).then(a.values.cmp(&b.values))
        });
        Ok(Self { requirements })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, req) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{req}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_equality_and_canonicalizes_order() {
        let sel: LabelSelector = "zone == a, app=disk".parse().unwrap();
        assert_eq!(sel.to_string(), "app=disk,zone=a");
        assert_eq!(
            sel.as_label_map(),
            Some(labels(&[("app", "disk"), ("zone", "a")]))
        );
    }

    #[test]
    fn parses_set_based_terms() {
        let sel: LabelSelector =
            "tier in (b, a),!legacy,env notin (dev),role".parse().unwrap();
        assert_eq!(
            sel.to_string(),
            "env notin (dev),!legacy,role,tier in (a,b)"
        );
        assert_eq!(sel.requirements[0].op, Operator::NotIn);
        assert_eq!(sel.requirements[3].values, vec!["a", "b"]);
        assert_eq!(sel.as_label_map(), None);
    }

    #[test]
    fn blank_selector_is_empty() {
        let sel: LabelSelector = "  ".parse().unwrap();
        assert!(sel.requirements.is_empty());
        assert_eq!(sel.as_label_map(), Some(BTreeMap::new()));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            "app=disk,=x".parse::<LabelSelector>(),
            Err(SelectorError::InvalidKey(_))
        ));
        assert!(matches!(
            "app=bad value".parse::<LabelSelector>(),
            Err(SelectorError::InvalidValue(_))
        ));
        assert!(matches!(
            "tier in (a,b".parse::<LabelSelector>(),
            Err(SelectorError::Unbalanced(_))
        ));
        assert!(matches!(
            "tier in ()".parse::<LabelSelector>(),
            Err(SelectorError::EmptySet(_))
        ));
    }

    #[test]
    fn prefixed_keys_are_accepted() {
        let sel: LabelSelector =
            "node-role.kubernetes.io/storage=true".parse().unwrap();
        assert_eq!(sel.requirements[0].key, "node-role.kubernetes.io/storage");
    }
}
