// Password reset by mailed token.

use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::accounts::check_password;
use crate::auth::{self, random_token, secure_eq, sha256_hex};
use crate::error::{AppError, AppResult, ValidationErrors};
use crate::mail::OutgoingMail;
use crate::Marketplace;

const RESET_TOKEN_LEN: usize = 64;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResetInput {
    pub token: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

impl Marketplace {
    pub async fn send_reset_link(&self, email: &str) -> AppResult<&'static str> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::invalid("email", "The email must be a valid email address."));
        }
        let Some(record) = self.db.find_user_record_by_email(email)? else {
            info!("password reset requested for unknown address");
            return Err(AppError::BadRequest("Unable to send reset link.".into()));
        };

        let token = random_token(RESET_TOKEN_LEN);
        self.db
            .put_password_reset(&record.user.email, &sha256_hex(&token), Utc::now())?;

        let link = format!(
            "{}/reset-password/{token}?email={}",
            self.config.public_url.trim_end_matches('/'),
            record.user.email
        );
        let mail = OutgoingMail {
            to: record.user.email.clone(),
            subject: "Reset Password Notification".into(),
            body: format!(
                "You are receiving this email because we received a password reset request \
                 for your account. Reset your password at {link}. This link expires in {} minutes.",
                self.config.auth.password_reset_ttl_minutes
            ),
        };
        if let Err(e) = self.mailer.send(mail).await {
            warn!(user_id = record.user.id, "failed to send reset mail: {e:#}");
            return Err(AppError::BadRequest("Unable to send reset link.".into()));
        }
        Ok("Password reset link sent!")
    }

    pub fn reset_password(&self, input: &ResetInput) -> AppResult<&'static str> {
        let mut errors = ValidationErrors::new();
        if input.token.is_empty() {
            errors.add("token", "The token field is required.");
        }
        if !input.email.contains('@') {
            errors.add("email", "The email must be a valid email address.");
        }
        check_password(&mut errors, &input.password, &input.password_confirmation);
        errors.into_result()?;

        let invalid = || AppError::BadRequest("Invalid token or email.".into());
        let record = self
            .db
            .find_user_record_by_email(input.email.trim())?
            .ok_or_else(invalid)?;
        let (stored, created_at) = self
            .db
            .get_password_reset(&record.user.email)?
            .ok_or_else(invalid)?;

        let now = Utc::now();
        let expired = now - created_at > Duration::minutes(self.config.auth.password_reset_ttl_minutes);
        if expired || !secure_eq(&sha256_hex(&input.token), &stored) {
            return Err(invalid());
        }

        self.db
            .update_password(record.user.id, &auth::hash_password(&input.password)?, now)?;
        self.db.delete_password_reset(&record.user.email)?;
        let revoked = self.db.delete_user_tokens(record.user.id)?;
        info!(user_id = record.user.id, revoked, "password reset");
        Ok("Password successfully reset!")
    }
}
