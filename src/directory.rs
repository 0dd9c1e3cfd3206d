//! Family codes and the `families/{code}` namespace that holds one family.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::remote::{family_path, RemoteError, RemoteStore};
use crate::time::now_iso;

pub const CODE_LENGTH: usize = 6;
/// Generated codes avoid 0/O and 1/I.
pub const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

static CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{6}$").expect("family code pattern to compile"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FamilyCodeError {
    #[error("please enter a 6-character family code")]
    WrongLength,
    #[error("family codes contain only letters and digits")]
    InvalidCharacter,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error(transparent)]
    InvalidCode(#[from] FamilyCodeError),
    #[error("family {0} not found")]
    NotFound(String),
    #[error("not signed in")]
    NotSignedIn,
    #[error("family directory unreachable: {0}")]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FamilyCode(String);

impl FamilyCode {
    /// Normalise user input (trim, uppercase) and validate its shape.
    pub fn parse(input: &str) -> Result<Self, FamilyCodeError> {
        let normalized = input.trim().to_ascii_uppercase();
        if normalized.chars().count() != CODE_LENGTH {
            return Err(FamilyCodeError::WrongLength);
        }
        if !CODE_PATTERN.is_match(&normalized) {
            return Err(FamilyCodeError::InvalidCharacter);
        }
        Ok(Self(normalized))
    }

    /// Draw a fresh code from [`CODE_ALPHABET`]. Uniqueness is not checked.
    pub fn generate() -> Self {
        let random = Uuid::new_v4();
        // The first six bytes of a v4 UUID are fully random; 32 divides 256
        // so the modulo keeps the draw uniform.
        let code = random.as_bytes()[..CODE_LENGTH]
            .iter()
            .map(|byte| CODE_ALPHABET[(*byte as usize) % CODE_ALPHABET.len()] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FamilyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FamilyCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone)]
pub struct FamilyDirectory {
    remote: Arc<dyn RemoteStore>,
}

impl FamilyDirectory {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    pub fn generate_code(&self) -> FamilyCode {
        FamilyCode::generate()
    }

    /// Write the creation marker at `families/{code}`.
    pub async fn create(&self, code: &FamilyCode) -> Result<(), RemoteError> {
        self.remote
            .write(&family_path(code.as_str()), json!({ "createdAt": now_iso() }))
            .await?;
        info!(target: "famhealth", event = "family_created", family_code = %code);
        Ok(())
    }

    pub async fn exists(&self, code: &FamilyCode) -> Result<bool, RemoteError> {
        Ok(self.remote.read(&family_path(code.as_str())).await?.is_some())
    }

    /// Parse `input` and confirm the family exists.
    pub async fn resolve(&self, input: &str) -> Result<FamilyCode, JoinError> {
        let code = FamilyCode::parse(input)?;
        if self.exists(&code).await? {
            Ok(code)
        } else {
            Err(JoinError::NotFound(code.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;

    #[test]
    fn generated_codes_use_unambiguous_alphabet() {
        for _ in 0..200 {
            let code = FamilyCode::generate();
            assert_eq!(code.as_str().len(), CODE_LENGTH);
            assert!(code
                .as_str()
                .bytes()
                .all(|b| CODE_ALPHABET.contains(&b)));
            assert!(!code.as_str().contains(['0', 'O', '1', 'I']));
        }
    }

    #[test]
    fn parse_normalises_case_and_whitespace() {
        let code = FamilyCode::parse("  ab12cd ").unwrap();
        assert_eq!(code.as_str(), "AB12CD");
    }

    #[test]
    fn parse_rejects_bad_shapes() {
        assert_eq!(FamilyCode::parse("ABC"), Err(FamilyCodeError::WrongLength));
        assert_eq!(FamilyCode::parse("ABCDEFG"), Err(FamilyCodeError::WrongLength));
        assert_eq!(
            FamilyCode::parse("AB-2CD"),
            Err(FamilyCodeError::InvalidCharacter)
        );
        assert_eq!(
            FamilyCode::parse("ÀB12CD"),
            Err(FamilyCodeError::InvalidCharacter)
        );
    }

    #[tokio::test]
    async fn create_then_exists() {
        let remote = MemoryRemote::new();
        let directory = FamilyDirectory::new(Arc::new(remote.clone()));
        let code = directory.generate_code();

        assert!(!directory.exists(&code).await.unwrap());
        directory.create(&code).await.unwrap();
        assert!(directory.exists(&code).await.unwrap());

        let marker = remote.peek(&family_path(code.as_str())).unwrap();
        assert!(marker["createdAt"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn resolve_distinguishes_missing_from_unreachable() {
        let remote = MemoryRemote::new();
        let directory = FamilyDirectory::new(Arc::new(remote));
        let err = directory.resolve("zzzzzz").await.unwrap_err();
        assert_eq!(err, JoinError::NotFound("ZZZZZZ".into()));

        let err = directory.resolve("abc").await.unwrap_err();
        assert!(matches!(err, JoinError::InvalidCode(FamilyCodeError::WrongLength)));
    }

    #[tokio::test]
    async fn create_propagates_write_failure() {
        let remote = MemoryRemote::new();
        remote.fail_writes(true);
        let directory = FamilyDirectory::new(Arc::new(remote));
        let err = directory.create(&FamilyCode::generate()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Network(_)));
    }
}
