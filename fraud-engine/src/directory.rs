//! Known-user lookup

use crate::UserId;
use dashmap::DashSet;

/// Answers whether a user id belongs to an enrolled customer
pub trait UserDirectory: Send + Sync {
    /// Enrolled
    fn is_known(&self, user_id: &UserId) -> bool;

    /// Every enrolled user
    fn users(&self) -> Vec<UserId>;
}

/// In-memory directory
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: DashSet<UserId>,
}

impl InMemoryUserDirectory {
    /// Directory seeded with `users`
    pub fn with_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let directory = Self::default();
        for user in users {
            directory.enroll(UserId::new(user));
        }
        directory
    }

    /// Add a user
    pub fn enroll(&self, user_id: UserId) {
        self.users.insert(user_id);
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn is_known(&self, user_id: &UserId) -> bool {
        self.users.contains(user_id)
    }

    fn users(&self) -> Vec<UserId> {
        self.users.iter().map(|u| u.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enrollment() {
        let directory = InMemoryUserDirectory::with_users(["U1", "U2"]);
        assert!(directory.is_known(&UserId::new("U1")));
        assert!(!directory.is_known(&UserId::new("U3")));

        directory.enroll(UserId::new("U3"));
        let mut users = directory.users();
        users.sort();
        assert_eq!(users, vec![UserId::new("U1"), UserId::new("U2"), UserId::new("U3")]);
    }
}
