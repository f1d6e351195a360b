//! Validated text types shared across the dinkes crates.
//!
//! Every type here trims its input once at construction and refuses values that would be
//! meaningless as identifiers. Once constructed, callers can rely on the invariant without
//! re-checking it.

/// Maximum length accepted for a dataset identifier.
pub const MAX_DATASET_ID_LEN: usize = 64;

/// Errors that can occur when creating validated text types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// A NIK contained whitespace between its characters
    #[error("NIK must not contain whitespace: '{0}'")]
    InvalidNik(String),
    /// A dataset identifier was too long or used characters outside the allowed set
    #[error("invalid dataset id '{0}' (only alphanumeric, '.', '-', '_' allowed, max 64 chars)")]
    InvalidDatasetId(String),
}

/// National identity number (Nomor Induk Kependudukan).
///
/// The NIK is the sole linkage key between datasets. Two records refer to the same person
/// only when their NIKs are exactly equal after trimming.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Nik(String);

impl Nik {
    /// Validates and wraps a NIK.
    ///
    /// # Errors
    ///
    /// - [`TextError::Empty`] if the trimmed input is empty
    /// - [`TextError::InvalidNik`] if whitespace remains inside the value
    pub fn parse(input: &str) -> Result<Self, TextError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(TextError::InvalidNik(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }
}

/// Identifier of a dataset (a health-office section such as `seksi-p2p`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatasetId(String);

impl DatasetId {
    /// Validates and wraps a dataset identifier.
    ///
    /// # Errors
    ///
    /// - [`TextError::Empty`] if the trimmed input is empty
    /// - [`TextError::InvalidDatasetId`] if it is too long or uses disallowed characters
    pub fn parse(input: &str) -> Result<Self, TextError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }

        let ok = trimmed.len() <= MAX_DATASET_ID_LEN
            && trimmed
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'.' | b'-' | b'_'));
        if !ok {
            return Err(TextError::InvalidDatasetId(trimmed.to_owned()));
        }

        Ok(Self(trimmed.to_owned()))
    }
}

macro_rules! text_newtype_impls {
    ($ty:ident) => {
        impl $ty {
            /// Returns the inner string as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::str::FromStr for $ty {
            type Err = TextError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $ty::parse(s)
            }
        }

        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $ty::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

text_newtype_impls!(Nik);
text_newtype_impls!(DatasetId);
