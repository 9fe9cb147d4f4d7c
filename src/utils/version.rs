use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::utils::errors::AppError;

/// A WordPress-style version: dot-separated numbers with an optional
/// `-suffix` pre-release tag (`6.4`, `6.4.3`, `6.5-RC1`).
#[derive(Debug, Clone)]
pub struct WpVersion {
    parts: Vec<u64>,
    pre: Option<String>,
}

impl WpVersion {
    pub fn major(&self) -> u64 {
        self.parts.first().copied().unwrap_or(0)
    }

    pub fn minor(&self) -> u64 {
        self.parts.get(1).copied().unwrap_or(0)
    }

    /// Release branch, e.g. `6.4` for `6.4.3`.
    pub fn branch(&self) -> String {
        format!("{}.{}", self.major(), self.minor())
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    pub fn same_branch(&self, other: &WpVersion) -> bool {
        self.major() == other.major() && self.minor() == other.minor()
    }
}

impl FromStr for WpVersion {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (numeric, pre) = match trimmed.split_once('-') {
            Some((numeric, pre)) if !pre.is_empty() => (numeric, Some(pre.to_string())),
            Some(_) => return Err(AppError::Parse(format!("invalid version '{}'", s))),
            None => (trimmed, None),
        };

        if numeric.is_empty() {
            return Err(AppError::Parse(format!("invalid version '{}'", s)));
        }

        let parts = numeric
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| AppError::Parse(format!("invalid version '{}'", s)))?;

        Ok(Self { parts, pre })
    }
}

impl Ord for WpVersion {
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

        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for WpVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for WpVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WpVersion {}

impl fmt::Display for WpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let numeric: Vec<String> = self.parts.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", numeric.join("."))?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}
