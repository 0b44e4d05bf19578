//! In-memory account registry with an approval step.
//!
//! Nothing here is durable and passwords are kept as given; it exists to
//! gate the dashboard in demos, not to secure anything.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use livefeed_common::config::UsersConfig;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
}

/// Public view of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// The email address; accounts are keyed by it.
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub status: ApprovalStatus,
    pub created_at: i64,
}

struct UserRecord {
    summary: UserSummary,
    password: String,
    /// Signup order, for stable listings.
    order: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    Success(UserSummary),
    Pending,
    Failure,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UserError {
    #[error("User already exists")]
    AlreadyExists,
    #[error("User not found")]
    NotFound,
}

#[derive(Default)]
struct Registry {
    next_order: u64,
    by_email: HashMap<String, UserRecord>,
}

#[derive(Default)]
pub struct UserRegistry {
    inner: Mutex<Registry>,
}

impl UserRegistry {
    /// Empty registry, plus the approved admin account when both admin
    /// credentials are configured.
    pub fn from_config(config: &UsersConfig) -> Self {
        let registry = Self::default();
        if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
            let mut inner = registry.lock();
            insert(&mut inner, email, password, Role::Admin, ApprovalStatus::Approved);
            drop(inner);
            info!(email = %email, "admin account seeded");
        }
        registry
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new account awaiting approval.
    pub fn signup(&self, email: &str, password: &str) -> Result<UserSummary, UserError> {
        let mut inner = self.lock();
        if inner.by_email.contains_key(email) {
            return Err(UserError::AlreadyExists);
        }
        let summary = insert(&mut inner, email, password, Role::User, ApprovalStatus::Pending);
        info!(email, "signup pending approval");
        Ok(summary)
    }

    /// Approval is checked before the password, so an unapproved account
    /// always answers `Pending`.
    pub fn login(&self, email: &str, password: &str) -> LoginOutcome {
        let inner = self.lock();
        match inner.by_email.get(email) {
            Some(user) if user.summary.status == ApprovalStatus::Pending => LoginOutcome::Pending,
            Some(user) if user.password == password => LoginOutcome::Success(user.summary.clone()),
            _ => LoginOutcome::Failure,
        }
    }

    pub fn approve(&self, email: &str) -> Result<UserSummary, UserError> {
        let mut inner = self.lock();
        let user = inner.by_email.get_mut(email).ok_or(UserError::NotFound)?;
        user.summary.status = ApprovalStatus::Approved;
        info!(email, "user approved");
        Ok(user.summary.clone())
    }

    /// Accounts in `status`, oldest first.
    pub fn list(&self, status: ApprovalStatus) -> Vec<UserSummary> {
        let inner = self.lock();
        let mut users: Vec<&UserRecord> = inner
            .by_email
            .values()
            .filter(|u| u.summary.status == status)
            .collect();
        users.sort_by_key(|u| u.order);
        users.into_iter().map(|u| u.summary.clone()).collect()
    }
}

fn insert(
    registry: &mut Registry,
    email: &str,
    password: &str,
    role: Role,
    status: ApprovalStatus,
) -> UserSummary {
    registry.next_order += 1;
    let summary = UserSummary {
        id: email.to_string(),
        email: email.to_string(),
        name: display_name(email),
        role,
        status,
        created_at: Utc::now().timestamp_millis(),
    };
    registry.by_email.insert(
        email.to_string(),
        UserRecord {
            summary: summary.clone(),
            password: password.to_string(),
            order: registry.next_order,
        },
    );
    summary
}

/// Local part of the address, first letter upper-cased and the rest lowered.
fn display_name(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    let mut chars = local.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
