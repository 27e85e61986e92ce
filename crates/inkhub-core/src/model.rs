// Marketplace entities as they are read from the store and returned as JSON.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Account role. Ids match the `roles` table seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Client,
    GraphicDesigner,
    PrintingShop,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Admin,
        Role::Client,
        Role::GraphicDesigner,
        Role::PrintingShop,
    ];

    pub fn id(self) -> i64 {
        match self {
            Role::Admin => 1,
            Role::Client => 2,
            Role::GraphicDesigner => 3,
            Role::PrintingShop => 4,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Client => "User",
            Role::GraphicDesigner => "Graphic Designer",
            Role::PrintingShop => "Printing Shop",
        }
    }

    /// Graphic designers and printing shops sell services.
    pub fn is_provider(self) -> bool {
        matches!(self, Role::GraphicDesigner | Role::PrintingShop)
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Role", 2)?;
        s.serialize_field("roleid", &self.id())?;
        s.serialize_field("rolename", self.name())?;
        s.end()
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let id = value.as_i64()?;
        Role::from_id(id).ok_or(FromSqlError::OutOfRange(id))
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.id()))
    }
}

// ---------------------------------------------------------------------------
// Text-backed status enums
// ---------------------------------------------------------------------------

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }
    };
}

text_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Initiated => "initiated",
    Completed => "completed",
    Refunded => "refunded",
});

text_enum!(RequestStatus, "request status", {
    Pending => "pending",
    Accepted => "accepted",
    Declined => "declined",
    Completed => "completed",
});

text_enum!(NotificationStatus, "notification status", {
    Unread => "unread",
    Read => "read",
});

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub verified: bool,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user row together with the columns that never leave the server.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user: User,
    pub password_hash: String,
    pub verification_code: Option<String>,
    pub verification_code_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalInformation {
    #[serde(default)]
    pub user_id: i64,
    pub firstname: String,
    pub lastname: String,
    #[serde(default)]
    pub zipcode: Option<String>,
    #[serde(default)]
    pub profilepicture: Option<String>,
    #[serde(default)]
    pub coverphoto: Option<String>,
}

impl PersonalInformation {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.firstname, self.lastname)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub personal_information: Option<PersonalInformation>,
}

// ---------------------------------------------------------------------------
// Posts and tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostImage {
    pub image_id: i64,
    pub post_id: i64,
    pub image_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostAuthor {
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Post {
    pub post_id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    /// Price in centavos.
    pub price: i64,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user: PostAuthor,
    pub tags: Vec<Tag>,
    pub images: Vec<PostImage>,
}

// ---------------------------------------------------------------------------
// Requests and payments
// ---------------------------------------------------------------------------

pub const PRODUCT_REQUEST: &str = "product_request";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRequest {
    pub request_id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub target_user_id: i64,
    pub request_type: String,
    pub status: RequestStatus,
    pub request_content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitialPayment {
    pub initial_payment_id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub request_id: i64,
    /// Amount paid so far, in centavos.
    pub amount: i64,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestWithPayments {
    #[serde(flatten)]
    pub request: ServiceRequest,
    pub initial_payments: Vec<InitialPayment>,
}

// ---------------------------------------------------------------------------
// Ratings, chat, notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRef {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rating {
    pub id: i64,
    pub user_id: i64,
    pub rated_user_id: i64,
    pub rating: u8,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user: UserRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub rated_user_id: i64,
    pub count: u64,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chat {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: Option<String>,
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sender: UserRef,
    pub receiver: UserRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub request_id: Option<i64>,
    pub content: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Store {
    pub id: i64,
    pub user_id: i64,
    pub storename: String,
    pub description: String,
    pub location: Location,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub current_page: u32,
    pub last_page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, current_page: u32, per_page: u32, total: u64) -> Self {
        let last_page = total.div_ceil(u64::from(per_page.max(1))).max(1) as u32;
        Self {
            data,
            current_page,
            last_page,
            per_page,
            total,
        }
    }
}

/// Normalize a 1-based page number and compute the SQL offset.
pub fn page_offset(page: u32, per_page: u32) -> (u32, i64) {
    let page = page.max(1);
    (page, i64::from(page - 1) * i64::from(per_page))
}
