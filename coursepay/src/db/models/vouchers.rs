use crate::types::{UserId, VoucherId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::courses::CourseDBResponse;

/// Who issued a voucher, and therefore who absorbs its discount
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VoucherKind {
    /// Issued by an admin, valid for every course; the platform absorbs the discount
    Platform,
    /// Issued by an instructor, valid for their own courses; reduces their income
    Instructor,
}

#[derive(Debug, Clone)]
pub struct VoucherCreateDBRequest {
    pub code: String,
    pub kind: VoucherKind,
    pub instructor_id: Option<UserId>,
    pub discount_percent: i32,
    pub expires_at: DateTime<Utc>,
    pub created_by: UserId,
}

#[derive(Debug, Clone, FromRow)]
pub struct VoucherDBResponse {
    pub id: VoucherId,
    pub code: String,
    pub kind: VoucherKind,
    pub instructor_id: Option<UserId>,
    pub discount_percent: i32,
    pub expires_at: DateTime<Utc>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl VoucherDBResponse {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn applies_to(&self, course: &CourseDBResponse) -> bool {
        match self.kind {
            VoucherKind::Platform => true,
            VoucherKind::Instructor => self.instructor_id == Some(course.instructor_id),
        }
    }
}

/// Filter for listing vouchers
#[derive(Debug, Clone)]
pub struct VoucherFilter {
    /// Restrict to vouchers issued by this instructor
    pub instructor_id: Option<UserId>,
    pub skip: i64,
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn course(instructor_id: UserId) -> CourseDBResponse {
        CourseDBResponse {
            id: Uuid::new_v4(),
            instructor_id,
            title: "Rust 101".to_string(),
            description: None,
            price: 100_000,
            discounted_price: None,
            is_published: true,
            published_at: Some(Utc::now()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn voucher(kind: VoucherKind, instructor_id: Option<UserId>) -> VoucherDBResponse {
        VoucherDBResponse {
            id: Uuid::new_v4(),
            code: "SAVE20".to_string(),
            kind,
            instructor_id,
            discount_percent: 20,
            expires_at: Utc::now() + Duration::days(1),
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_instructor_voucher_only_applies_to_own_courses() {
        let instructor = Uuid::new_v4();
        let v = voucher(VoucherKind::Instructor, Some(instructor));
        assert!(v.applies_to(&course(instructor)));
        assert!(!v.applies_to(&course(Uuid::new_v4())));
    }

    #[test]
    fn test_platform_voucher_applies_everywhere() {
        let v = voucher(VoucherKind::Platform, None);
        assert!(v.applies_to(&course(Uuid::new_v4())));
    }

    #[test]
    fn test_expiry_boundary() {
        let v = voucher(VoucherKind::Platform, None);
        assert!(!v.is_expired(Utc::now()));
        assert!(v.is_expired(v.expires_at));
    }
}
