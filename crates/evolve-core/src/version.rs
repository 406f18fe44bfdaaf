//! # Version Model
//!
//! Immutable semantic versions: `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`.
//!
//! ## Equality vs. precedence
//!
//! Two relations are exposed and they intentionally disagree on build
//! metadata:
//! - `==` / [`Version::equals`] compare all five fields, build included.
//! - [`Version::compare`] is SemVer precedence and ignores build metadata,
//!   so `1.0.0+b1` and `1.0.0+b2` compare `Equal` while not being equal.
//!
//! The `Ord` impl refines precedence with a lexical build tie-break so that
//! versions can key a `BTreeMap` consistently with `Eq`.

use crate::EvolveError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// One dot-separated pre-release identifier.
///
/// Numeric identifiers always have lower precedence than alphanumeric ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u64),
    /// Numeric identifier above `u64::MAX`, kept as its digits.
    BigNumeric(String),
    AlphaNumeric(String),
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => a.cmp(b),
            // no leading zeros, so the longer digit string is the larger number
            (Self::BigNumeric(a), Self::BigNumeric(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Self::AlphaNumeric(a), Self::AlphaNumeric(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Identifier {
    const fn rank(&self) -> u8 {
        match self {
            Self::Numeric(_) => 0,
            Self::BigNumeric(_) => 1,
            Self::AlphaNumeric(_) => 2,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::BigNumeric(s) | Self::AlphaNumeric(s) => f.write_str(s),
        }
    }
}

/// Which part of a version an increment bumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpKind {
    Major,
    Minor,
    Patch,
}

impl fmt::Display for BumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Major => f.write_str("major"),
            Self::Minor => f.write_str("minor"),
            Self::Patch => f.write_str("patch"),
        }
    }
}

// =============================================================================
// VERSION
// =============================================================================

/// A semantic version.
///
/// Serialized as its canonical text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    pre_release: Vec<Identifier>,
    build: Vec<String>,
}

impl Version {
    /// Create a release version with no pre-release or build metadata.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: Vec::new(),
            build: Vec::new(),
        }
    }

    /// Parse version text.
    ///
    /// Rejects anything that is not exactly
    /// `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`: surrounding whitespace,
    /// a `v` prefix, missing components, empty identifiers, characters
    /// outside `[0-9A-Za-z-]`, and leading zeros in numeric core or
    /// pre-release identifiers.
    pub fn parse(text: &str) -> Result<Self, EvolveError> {
        if text.is_empty() {
            return Err(EvolveError::parse(text, "empty version"));
        }

        let (rest, build) = match text.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (text, None),
        };
        let (core, pre_release) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(EvolveError::parse(
                text,
                "expected MAJOR.MINOR.PATCH with exactly three components",
            ));
        };

        let major = parse_numeric(text, major, "major")?;
        let minor = parse_numeric(text, minor, "minor")?;
        let patch = parse_numeric(text, patch, "patch")?;

        let pre_release = match pre_release {
            Some(pre) => split_identifiers(text, pre, "pre-release")?
                .into_iter()
                .map(|ident| parse_pre_release_identifier(text, ident))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let build = match build {
            Some(build) => split_identifiers(text, build, "build")?
                .into_iter()
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };

        Ok(Self {
            major,
            minor,
            patch,
            pre_release,
            build,
        })
    }

    /// Attach pre-release identifiers, validating them like `parse` does.
    pub fn with_pre_release(mut self, pre_release: &str) -> Result<Self, EvolveError> {
        self.pre_release = split_identifiers(pre_release, pre_release, "pre-release")?
            .into_iter()
            .map(|ident| parse_pre_release_identifier(pre_release, ident))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self)
    }

    /// Attach build metadata, validating it like `parse` does.
    pub fn with_build(mut self, build: &str) -> Result<Self, EvolveError> {
        self.build = split_identifiers(build, build, "build")?
            .into_iter()
            .map(str::to_string)
            .collect();
        Ok(self)
    }

    #[must_use]
    pub const fn major(&self) -> u64 {
        self.major
    }

    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.minor
    }

    #[must_use]
    pub const fn patch(&self) -> u64 {
        self.patch
    }

    /// Pre-release identifiers (empty for a release).
    #[must_use]
    pub fn pre_release(&self) -> &[Identifier] {
        &self.pre_release
    }

    /// Build metadata identifiers (empty when absent).
    #[must_use]
    pub fn build(&self) -> &[String] {
        &self.build
    }

    /// Check whether this is a pre-release version.
    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        !self.pre_release.is_empty()
    }

    /// SemVer precedence. Build metadata never affects the result.
    ///
    /// Core numbers compare first. On a tie a release outranks any
    /// pre-release; two pre-releases compare identifier by identifier
    /// (numeric < alphanumeric, numerics by value, alphanumerics lexically)
    /// and a strict prefix ranks lower.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
            .then_with(|| self.patch.cmp(&other.patch))
            .then_with(|| {
                match (self.pre_release.is_empty(), other.pre_release.is_empty()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => self.pre_release.as_slice().cmp(other.pre_release.as_slice()),
                }
            })
    }

    /// Strict field equality, build metadata included.
    ///
    /// Stricter than "neither less nor greater" under [`Version::compare`].
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        self == other
    }

    /// Check that `next` is exactly one `kind` increment above `self`.
    ///
    /// - Major: `major + 1`, minor and patch reset to 0
    /// - Minor: major unchanged, `minor + 1`, patch reset to 0
    /// - Patch: major and minor unchanged, `patch + 1`
    ///
    /// Pre-release and build metadata of either side are not inspected.
    pub fn validate_increment(&self, next: &Self, kind: BumpKind) -> Result<bool, EvolveError> {
        let expected = self.bump(kind);
        let valid = next.major == expected.major
            && next.minor == expected.minor
            && next.patch == expected.patch;

        if valid {
            Ok(true)
        } else {
            Err(EvolveError::Validation(format!(
                "{} bump from {} must produce {}, got {}",
                kind, self, expected, next
            )))
        }
    }

    /// The release version one `kind` increment above this one.
    #[must_use]
    pub fn bump(&self, kind: BumpKind) -> Self {
        match kind {
            BumpKind::Major => Self::new(self.major.saturating_add(1), 0, 0),
            BumpKind::Minor => Self::new(self.major, self.minor.saturating_add(1), 0),
            BumpKind::Patch => Self::new(self.major, self.minor, self.patch.saturating_add(1)),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other).then_with(|| self.build.cmp(&other.build))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre_release.is_empty() {
            f.write_str("-")?;
            for (i, ident) in self.pre_release.iter().enumerate() {
                if i > 0 {
                    f.write_str(".")?;
                }
                write!(f, "{ident}")?;
            }
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build.join("."))?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = EvolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = EvolveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

// =============================================================================
// PARSING HELPERS
// =============================================================================

fn parse_numeric(input: &str, part: &str, name: &str) -> Result<u64, EvolveError> {
    check_digits(input, part, name)?;
    part.parse::<u64>()
        .map_err(|_| EvolveError::parse(input, format!("{name} '{part}' is out of range")))
}

fn check_digits(input: &str, part: &str, name: &str) -> Result<(), EvolveError> {
    if part.is_empty() {
        return Err(EvolveError::parse(input, format!("{name} is empty")));
    }
    if !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EvolveError::parse(
            input,
            format!("{name} '{part}' is not a number"),
        ));
    }
    if part.len() > 1 && part.starts_with('0') {
        return Err(EvolveError::parse(
            input,
            format!("{name} '{part}' has a leading zero"),
        ));
    }
    Ok(())
}

fn split_identifiers<'a>(
    input: &str,
    section: &'a str,
    name: &str,
) -> Result<Vec<&'a str>, EvolveError> {
    let idents: Vec<&str> = section.split('.').collect();
    for ident in &idents {
        if ident.is_empty() {
            return Err(EvolveError::parse(
                input,
                format!("{name} contains an empty identifier"),
            ));
        }
        if !ident
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(EvolveError::parse(
                input,
                format!("{name} identifier '{ident}' contains invalid characters"),
            ));
        }
    }
    Ok(idents)
}

fn parse_pre_release_identifier(input: &str, ident: &str) -> Result<Identifier, EvolveError> {
    if ident.bytes().all(|b| b.is_ascii_digit()) {
        check_digits(input, ident, "pre-release identifier")?;
        Ok(match ident.parse::<u64>() {
            Ok(n) => Identifier::Numeric(n),
            Err(_) => Identifier::BigNumeric(ident.to_string()),
        })
    } else {
        Ok(Identifier::AlphaNumeric(ident.to_string()))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Version {
        Version::parse(text).expect("valid version")
    }

    #[test]
    fn parse_release() {
        let version = v("1.2.3");
        assert_eq!(
            (version.major(), version.minor(), version.patch()),
            (1, 2, 3)
        );
        assert!(!version.is_prerelease());
        assert!(version.build().is_empty());
    }

    #[test]
    fn parse_pre_release_and_build() {
        let version = v("1.0.0-alpha.1+build.5-x");
        assert_eq!(
            version.pre_release(),
            &[
                Identifier::AlphaNumeric("alpha".to_string()),
                Identifier::Numeric(1)
            ]
        );
        assert_eq!(version.build(), &["build".to_string(), "5-x".to_string()]);
    }

    #[test]
    fn hyphen_inside_pre_release_is_kept() {
        let version = v("1.0.0-x-y-z.--");
        assert_eq!(version.to_string(), "1.0.0-x-y-z.--");
    }

    #[test]
    fn build_identifiers_may_have_leading_zeros() {
        assert_eq!(v("1.0.0+001").to_string(), "1.0.0+001");
    }

    #[test]
    fn malformed_text_is_rejected() {
        for text in [
            "",
            "1",
            "1.2",
            "1.2.3.4",
            "v1.2.3",
            " 1.2.3",
            "01.2.3",
            "1.02.3",
            "1.2.03",
            "1.2.3-",
            "1.2.3+",
            "1.2.3-alpha..1",
            "1.2.3-01",
            "1.2.3-alpha_1",
            "1.2.3+build+meta",
            "a.b.c",
            "1.2.-3",
            "99999999999999999999.0.0",
        ] {
            assert!(
                matches!(Version::parse(text), Err(EvolveError::Parse { .. })),
                "expected parse error for {text:?}"
            );
        }
    }

    #[test]
    fn zero_identifiers_are_allowed() {
        assert!(Version::parse("0.0.0-0").is_ok());
    }

    #[test]
    fn release_outranks_pre_release() {
        assert_eq!(v("1.0.0").compare(&v("1.0.0-rc.1")), Ordering::Greater);
        assert_eq!(v("1.0.0-rc.1").compare(&v("1.0.0")), Ordering::Less);
    }

    #[test]
    fn core_numbers_compare_numerically() {
        assert_eq!(v("1.10.0").compare(&v("1.9.0")), Ordering::Greater);
        assert_eq!(v("2.0.0-alpha").compare(&v("1.99.99")), Ordering::Greater);
    }

    #[test]
    fn numeric_pre_release_compares_by_value() {
        assert_eq!(v("1.0.0-beta.11").compare(&v("1.0.0-beta.2")), Ordering::Greater);
    }

    #[test]
    fn numeric_pre_release_ranks_below_alphanumeric() {
        assert_eq!(v("1.0.0-1").compare(&v("1.0.0-a")), Ordering::Less);
        assert_eq!(v("1.0.0-alpha.1").compare(&v("1.0.0-alpha.beta")), Ordering::Less);
    }

    #[test]
    fn oversized_numeric_pre_release_is_kept_numeric() {
        let huge = v("1.0.0-99999999999999999999");
        assert_eq!(
            huge.pre_release(),
            &[Identifier::BigNumeric("99999999999999999999".to_string())]
        );
        assert_eq!(huge.to_string(), "1.0.0-99999999999999999999");

        assert_eq!(v("1.0.0-18446744073709551615").compare(&huge), Ordering::Less);
        assert_eq!(huge.compare(&v("1.0.0-100000000000000000000")), Ordering::Less);
        assert_eq!(huge.compare(&v("1.0.0-a")), Ordering::Less);
        assert!(Version::parse("1.0.0-099999999999999999999").is_err());
    }

    #[test]
    fn shorter_pre_release_prefix_ranks_lower() {
        assert_eq!(v("1.0.0-alpha").compare(&v("1.0.0-alpha.1")), Ordering::Less);
    }

    #[test]
    fn build_metadata_ties_under_precedence_but_not_equality() {
        let a = v("1.0.0+b1");
        let b = v("1.0.0+b2");
        assert_eq!(a.compare(&b), Ordering::Equal);
        assert!(!a.equals(&b));
        assert_ne!(a, b);
        // Ord stays consistent with Eq
        assert_eq!(a.cmp(&b), Ordering::Less);
    }

    #[test]
    fn equals_is_strict() {
        assert!(v("1.0.0-rc.1+abc").equals(&v("1.0.0-rc.1+abc")));
        assert!(!v("1.0.0").equals(&v("1.0.0+abc")));
    }

    #[test]
    fn validate_increment_major() {
        let current = v("1.2.3");
        assert!(current.validate_increment(&v("2.0.0"), BumpKind::Major).expect("valid"));
        assert!(matches!(
            current.validate_increment(&v("2.1.0"), BumpKind::Major),
            Err(EvolveError::Validation(_))
        ));
        assert!(current.validate_increment(&v("3.0.0"), BumpKind::Major).is_err());
    }

    #[test]
    fn validate_increment_minor() {
        let current = v("1.2.3");
        assert!(current.validate_increment(&v("1.3.0"), BumpKind::Minor).expect("valid"));
        assert!(current.validate_increment(&v("1.3.3"), BumpKind::Minor).is_err());
        assert!(current.validate_increment(&v("2.3.0"), BumpKind::Minor).is_err());
    }

    #[test]
    fn validate_increment_patch() {
        let current = v("1.2.3");
        assert!(current.validate_increment(&v("1.2.4"), BumpKind::Patch).expect("valid"));
        assert!(current.validate_increment(&v("1.2.5"), BumpKind::Patch).is_err());
        assert!(current.validate_increment(&v("1.3.4"), BumpKind::Patch).is_err());
    }

    #[test]
    fn bump_resets_lower_components() {
        let current = v("1.2.3-rc.1+meta");
        assert_eq!(current.bump(BumpKind::Major), v("2.0.0"));
        assert_eq!(current.bump(BumpKind::Minor), v("1.3.0"));
        assert_eq!(current.bump(BumpKind::Patch), v("1.2.4"));
    }

    #[test]
    fn builder_methods_validate_identifiers() {
        let version = Version::new(1, 0, 0)
            .with_pre_release("rc.2")
            .expect("pre-release")
            .with_build("sha.abc")
            .expect("build");
        assert_eq!(version, v("1.0.0-rc.2+sha.abc"));
        assert!(Version::new(1, 0, 0).with_pre_release("rc..2").is_err());
    }

    #[test]
    fn serde_uses_text_form() {
        let version = v("1.4.0-beta.2+exp");
        let json = serde_json::to_string(&version).expect("serialize");
        assert_eq!(json, "\"1.4.0-beta.2+exp\"");
        let back: Version = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, version);
        assert!(serde_json::from_str::<Version>("\"1.4\"").is_err());
    }
}
