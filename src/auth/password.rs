use super::AuthError;

pub const MIN_PASSWORD_LENGTH: usize = 8;
/// bcrypt ignores everything past 72 bytes.
pub const MAX_PASSWORD_LENGTH: usize = 72;

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::Invalid(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(AuthError::Invalid(format!(
            "Password must be at most {MAX_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Hashes on the blocking pool; bcrypt at the default cost takes a few
/// hundred milliseconds.
pub async fn hash_password(password: String, cost: u32) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|err| AuthError::Hashing(err.to_string()))?
        .map_err(|err| AuthError::Hashing(err.to_string()))
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|err| AuthError::Hashing(err.to_string()))?
        .map_err(|err| AuthError::Hashing(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_limits() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
        assert!(validate_password(&"x".repeat(73)).is_err());
    }

    #[tokio::test]
    async fn hash_then_verify() {
        let hash = hash_password("correct horse".into(), 4).await.unwrap();
        assert!(verify_password("correct horse".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("wrong horse".into(), hash).await.unwrap());
    }
}
