// Email verification: the mailed link proves ownership of the address, the
// six-digit code completes it.

use chrono::{Duration, Utc};
use rand::Rng;
use tracing::{debug, info};

use crate::auth::{secure_eq, sha256_hex};
use crate::error::{AppError, AppResult};
use crate::Marketplace;

pub const LINK_PROMPT: &str =
    "Please enter the verification code to complete the email verification.";
pub const VERIFIED: &str = "Your email has been successfully verified!";

/// Six random decimal digits.
pub fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// Hash embedded in the verification link.
pub fn verification_hash(email: &str) -> String {
    sha256_hex(&email.to_lowercase())
}

impl Marketplace {
    /// Check the link hash. The email is not marked verified here.
    pub fn verify_link(&self, user_id: i64, hash: &str) -> AppResult<&'static str> {
        let user = self
            .db
            .get_user(user_id)?
            .ok_or_else(|| AppError::not_found("User"))?;
        if !secure_eq(hash, &verification_hash(&user.email)) {
            return Err(AppError::BadRequest(
                "The email verification link is invalid or expired.".into(),
            ));
        }
        Ok(LINK_PROMPT)
    }

    /// Checks run in a fixed order: unknown user, wrong code, expired code.
    pub fn verify_code(&self, user_id: i64, code: &str) -> AppResult<&'static str> {
        let record = self
            .db
            .get_user_record(user_id)?
            .ok_or_else(|| AppError::not_found("User"))?;

        let matches = record
            .verification_code
            .as_deref()
            .is_some_and(|stored| secure_eq(stored, code.trim()));
        if !matches {
            debug!(user_id, "invalid verification code");
            return Err(AppError::BadRequest("Invalid verification code.".into()));
        }

        let now = Utc::now();
        if record
            .verification_code_expires_at
            .is_some_and(|expires| now > expires)
        {
            debug!(user_id, "verification code expired");
            return Err(AppError::BadRequest("Verification code has expired.".into()));
        }

        self.db.mark_email_verified(user_id, now)?;
        info!(user_id, "email verified");
        Ok(VERIFIED)
    }

    /// Issue a fresh code and mail it again.
    pub async fn resend_code(&self, email: &str) -> AppResult<()> {
        let record = self
            .db
            .find_user_record_by_email(email.trim())?
            .ok_or_else(|| AppError::not_found("User"))?;
        if record.user.email_verified_at.is_some() {
            return Err(AppError::BadRequest("Email already verified.".into()));
        }

        let code = generate_code();
        let expires = Utc::now() + Duration::hours(self.config.auth.verification_code_ttl_hours);
        self.db
            .set_verification_code(record.user.id, &code, expires)?;
        self.send_verification_mail(&record.user, &code).await;
        Ok(())
    }

    /// Give every unverified user without a code a long-lived one. Returns
    /// the affected email addresses.
    pub fn generate_missing_codes(&self) -> AppResult<Vec<String>> {
        let expires = Utc::now() + Duration::days(self.config.auth.backfill_code_ttl_days);
        let mut emails = Vec::new();
        for user in self.db.users_without_verification_code()? {
            self.db
                .set_verification_code(user.id, &generate_code(), expires)?;
            emails.push(user.email);
        }
        info!(count = emails.len(), "generated missing verification codes");
        Ok(emails)
    }
}
