use crate::{
    db::models::vouchers::{VoucherDBResponse, VoucherKind},
    types::{UserId, VoucherId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Admins create platform vouchers, instructors create vouchers for their own courses.
/// The kind follows from the caller's role.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VoucherCreate {
    /// Case-insensitive, stored upper-case
    pub code: String,
    /// Percentage off, 1 to 100
    pub discount_percent: i32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VoucherResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: VoucherId,
    pub code: String,
    pub kind: VoucherKind,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub instructor_id: Option<UserId>,
    pub discount_percent: i32,
    pub expires_at: DateTime<Utc>,
    #[schema(value_type = String, format = "uuid")]
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListVouchersQuery {
    /// Number of items to skip
    pub skip: Option<i64>,

    /// Maximum number of items to return
    pub limit: Option<i64>,
}

impl From<VoucherDBResponse> for VoucherResponse {
    fn from(db: VoucherDBResponse) -> Self {
        Self {
            id: db.id,
            code: db.code,
            kind: db.kind,
            instructor_id: db.instructor_id,
            discount_percent: db.discount_percent,
            expires_at: db.expires_at,
            created_by: db.created_by,
            created_at: db.created_at,
        }
    }
}
