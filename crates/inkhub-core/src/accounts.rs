// Registration, login, the admin user list and personal information.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth;
use crate::db::{duplicate_user_field, NewUser};
use crate::error::{AppError, AppResult, ValidationErrors};
use crate::mail::OutgoingMail;
use crate::model::{page_offset, Page, PersonalInformation, Role, User, UserProfile};
use crate::verification::{generate_code, verification_hash};
use crate::Marketplace;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
    pub role_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersonalInformationInput {
    pub firstname: String,
    pub lastname: String,
    pub zipcode: Option<String>,
    pub profilepicture: Option<String>,
    pub coverphoto: Option<String>,
}

/// Shared password rules for registration and reset.
pub(crate) fn check_password(errors: &mut ValidationErrors, password: &str, confirmation: &str) {
    if password.is_empty() {
        errors.add("password", "The password field is required.");
    } else if password.chars().count() < 8 {
        errors.add("password", "The password must be at least 8 characters.");
    } else if password != confirmation {
        errors.add("password", "The password confirmation does not match.");
    }
}

/// The checks in `register` race with concurrent sign-ups; the UNIQUE index
/// has the final word.
fn duplicate_as_invalid(err: anyhow::Error) -> AppError {
    match duplicate_user_field(&err) {
        Some(field) => AppError::invalid(field, format!("The {field} has already been taken.")),
        None => AppError::Internal(err),
    }
}

fn require_self_or_admin(viewer: &User, user_id: i64) -> AppResult<()> {
    if viewer.id == user_id || viewer.role == Role::Admin {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "You are not allowed to access this user's information.".into(),
        ))
    }
}

impl Marketplace {
    pub async fn register(&self, input: RegisterInput) -> AppResult<User> {
        let username = input.username.trim().to_string();
        let email = input.email.trim().to_string();
        let mut errors = ValidationErrors::new();

        let len = username.chars().count();
        if len == 0 {
            errors.add("username", "The username field is required.");
        } else if !(3..=50).contains(&len) {
            errors.add("username", "The username must be between 3 and 50 characters.");
        } else if self.db.username_exists(&username)? {
            errors.add("username", "The username has already been taken.");
        }

        if email.is_empty() {
            errors.add("email", "The email field is required.");
        } else if !email.contains('@') {
            errors.add("email", "The email must be a valid email address.");
        } else if self.db.email_exists(&email)? {
            errors.add("email", "The email has already been taken.");
        }

        check_password(&mut errors, &input.password, &input.password_confirmation);

        let role = input.role_id.and_then(Role::from_id);
        match role {
            Some(Role::Admin) | None => errors.add("role_id", "The selected role id is invalid."),
            Some(_) => {}
        }
        errors.into_result()?;
        let role = role.ok_or_else(|| AppError::invalid("role_id", "The selected role id is invalid."))?;

        let now = Utc::now();
        let code = generate_code();
        let user = self
            .db
            .insert_user(&NewUser {
                username,
                email,
                password_hash: auth::hash_password(&input.password)?,
                role,
                verified: !role.is_provider(),
                verification_code: Some(code.clone()),
                verification_code_expires_at: Some(
                    now + Duration::hours(self.config.auth.verification_code_ttl_hours),
                ),
                now,
            })
            .map_err(duplicate_as_invalid)?;
        info!(user_id = user.id, role = role.name(), "registered user");

        self.send_verification_mail(&user, &code).await;
        Ok(user)
    }

    pub(crate) async fn send_verification_mail(&self, user: &User, code: &str) {
        let link = format!(
            "{}/verify-email?id={}&hash={}",
            self.config.public_url.trim_end_matches('/'),
            user.id,
            verification_hash(&user.email)
        );
        let mail = OutgoingMail {
            to: user.email.clone(),
            subject: "Verify Email Address".into(),
            body: format!(
                "Hello {}, open {link} and enter the verification code {code}. \
                 The code expires in {} hours.",
                user.username, self.config.auth.verification_code_ttl_hours
            ),
        };
        if let Err(e) = self.mailer.send(mail).await {
            warn!(user_id = user.id, "failed to send verification mail: {e:#}");
        }
    }

    pub fn login(&self, input: &LoginInput) -> AppResult<LoginResponse> {
        let mut errors = ValidationErrors::new();
        if input.email.trim().is_empty() {
            errors.add("email", "The email field is required.");
        }
        if input.password.is_empty() {
            errors.add("password", "The password field is required.");
        }
        errors.into_result()?;

        let invalid = || AppError::InvalidCredentials;
        let record = self
            .db
            .find_user_record_by_email(input.email.trim())?
            .ok_or_else(invalid)?;
        if !auth::verify_password(&input.password, &record.password_hash) {
            return Err(invalid());
        }
        if record.user.email_verified_at.is_none() {
            return Err(AppError::Forbidden(
                "Your email address is not verified.".into(),
            ));
        }

        let token = auth::issue_token(&self.db, record.user.id)?;
        info!(user_id = record.user.id, "user logged in");
        Ok(LoginResponse {
            token,
            user: self.current_user(record.user)?,
        })
    }

    pub fn logout(&self, token_id: i64) -> AppResult<()> {
        self.db.delete_access_token(token_id)?;
        Ok(())
    }

    pub fn current_user(&self, user: User) -> AppResult<UserProfile> {
        let personal_information = self.db.get_personal_information(user.id)?;
        Ok(UserProfile {
            user,
            personal_information,
        })
    }

    pub fn list_users(&self, page: u32) -> AppResult<Page<User>> {
        let per_page = self.config.auth.page_size;
        let (page, offset) = page_offset(page, per_page);
        let users = self.db.list_users(offset, per_page)?;
        let total = self.db.count_users()?;
        Ok(Page::new(users, page, per_page, total))
    }

    /// Admin approval of a provider account.
    pub fn set_verified(&self, user_id: i64, verified: bool) -> AppResult<User> {
        if !self.db.set_user_verified(user_id, verified, Utc::now())? {
            return Err(AppError::not_found("User"));
        }
        info!(user_id, verified, "updated verified flag");
        self.db
            .get_user(user_id)?
            .ok_or_else(|| AppError::not_found("User"))
    }

    pub fn personal_information(
        &self,
        viewer: &User,
        user_id: i64,
    ) -> AppResult<Option<PersonalInformation>> {
        require_self_or_admin(viewer, user_id)?;
        if self.db.get_user(user_id)?.is_none() {
            return Err(AppError::not_found("User"));
        }
        Ok(self.db.get_personal_information(user_id)?)
    }

    pub fn save_personal_information(
        &self,
        viewer: &User,
        user_id: i64,
        input: PersonalInformationInput,
    ) -> AppResult<PersonalInformation> {
        require_self_or_admin(viewer, user_id)?;
        if self.db.get_user(user_id)?.is_none() {
            return Err(AppError::not_found("User"));
        }

        let mut errors = ValidationErrors::new();
        if input.firstname.trim().is_empty() {
            errors.add("firstname", "The firstname field is required.");
        }
        if input.lastname.trim().is_empty() {
            errors.add("lastname", "The lastname field is required.");
        }
        errors.into_result()?;

        let info = PersonalInformation {
            user_id,
            firstname: input.firstname.trim().to_string(),
            lastname: input.lastname.trim().to_string(),
            zipcode: input.zipcode,
            profilepicture: input.profilepicture,
            coverphoto: input.coverphoto,
        };
        self.db.upsert_personal_information(&info)?;
        Ok(info)
    }
}
