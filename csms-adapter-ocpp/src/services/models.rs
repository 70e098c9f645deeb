//! Tenant records the engine reads but never owns
//!
//! Tags, users, site areas and registration tokens are administered
//! elsewhere; the engine only looks them up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// RFID badge or virtual token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Issued by this operator. Foreign tags come through roaming.
    pub issuer: bool,
    pub active: bool,
}

impl Tag {
    pub fn local(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: Some(user_id.into()),
            issuer: true,
            active: true,
        }
    }

    pub fn roaming(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: None,
            issuer: false,
            active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    Active,
    Pending,
    Blocked,
    Locked,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Basic,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub status: UserStatus,
    pub role: UserRole,
}

impl User {
    pub fn new(id: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: id.into(),
            status: UserStatus::Active,
            role,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Group of stations behind one electrical supply limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteArea {
    pub id: String,
    pub site_id: String,
    pub smart_charging: bool,
}

/// One-off credential letting an unknown station register itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationToken {
    pub id: String,
    pub expiration_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_area_id: Option<String>,
}

impl RegistrationToken {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        let revoked = self.revocation_date.is_some_and(|at| at <= now);
        !revoked && self.expiration_date > now
    }
}

/// Optional features enabled for a tenant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantComponents {
    pub pricing: bool,
    pub billing: bool,
    pub smart_charging: bool,
    pub roaming: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_registration_token_validity() {
        let now = Utc::now();
        let mut token = RegistrationToken {
            id: "tok".to_string(),
            expiration_date: now + Duration::days(1),
            revocation_date: None,
            site_area_id: None,
        };
        assert!(token.is_valid(now));

        token.revocation_date = Some(now - Duration::minutes(1));
        assert!(!token.is_valid(now));

        token.revocation_date = None;
        token.expiration_date = now - Duration::seconds(1);
        assert!(!token.is_valid(now));
    }
}
