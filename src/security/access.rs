//! Read/write eligibility of a user against a repository's membership lists.
//!
//! These are pure predicates over already-loaded entities: they never fetch,
//! never mutate, and express a denial only through `false`.

use std::collections::BTreeSet;

use crate::repository::Repository;
use crate::user::User;

/// Kind of access a git service needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Membership lists may hold either the full name or the remote host's slug
/// for it (`alice@example.com` is `alice` on the host)
fn is_member(members: &BTreeSet<String>, user: &User) -> bool {
    members.contains(&user.name) || members.contains(user.slug())
}

/// True iff the user is listed in `users`
pub fn has_write_permission(user: &User, repo: &Repository) -> bool {
    is_member(&repo.users, user)
}

/// True iff the repository is public or the user is in either membership list
pub fn has_read_permission(user: &User, repo: &Repository) -> bool {
    repo.is_public || is_member(&repo.users, user) || is_member(&repo.read_only_users, user)
}

pub fn is_allowed(user: &User, repo: &Repository, access: Access) -> bool {
    match access {
        Access::Read => has_read_permission(user, repo),
        Access::Write => has_write_permission(user, repo),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(users: &[&str], read_only: &[&str], is_public: bool) -> Repository {
        Repository::new(
            "team/proj",
            users.iter().map(|u| u.to_string()),
            read_only.iter().map(|u| u.to_string()),
            is_public,
        )
    }

    #[test]
    fn test_writer_can_read_and_write() {
        let r = repo(&["alice"], &[], false);
        let alice = User::new("alice");
        assert!(has_write_permission(&alice, &r));
        assert!(has_read_permission(&alice, &r));
    }

    #[test]
    fn test_read_only_user_cannot_write() {
        let r = repo(&["alice"], &["bob"], false);
        let bob = User::new("bob");
        assert!(!has_write_permission(&bob, &r));
        assert!(has_read_permission(&bob, &r));
    }

    #[test]
    fn test_stranger_is_denied_on_private_repository() {
        let r = repo(&["alice"], &["bob"], false);
        let eve = User::new("eve");
        assert!(!has_write_permission(&eve, &r));
        assert!(!has_read_permission(&eve, &r));
    }

    #[test]
    fn test_public_repository_is_readable_by_anyone() {
        let r = repo(&["alice"], &[], true);
        for name in ["eve", "mallory", "someone@example.com", ""] {
            let user = User::new(name);
            assert!(has_read_permission(&user, &r));
            assert!(!has_write_permission(&user, &r));
        }
    }

    #[test]
    fn test_membership_only_ever_grants_read() {
        let users = ["alice", "bob", "carol"];
        for is_public in [false, true] {
            let mut r = repo(&["owner"], &[], is_public);
            for name in users {
                let user = User::new(name);
                let before = has_read_permission(&user, &r);

                r.read_only_users.insert(name.to_string());
                let after_read_only = has_read_permission(&user, &r);
                r.users.insert(name.to_string());
                let after_write = has_read_permission(&user, &r);

                assert!(!before || after_read_only);
                assert!(after_read_only);
                assert!(after_write);
            }
        }
    }

    #[test]
    fn test_is_allowed_dispatches_on_access() {
        let r = repo(&["alice"], &["bob"], false);
        assert!(is_allowed(&User::new("alice"), &r, Access::Write));
        assert!(is_allowed(&User::new("bob"), &r, Access::Read));
        assert!(!is_allowed(&User::new("bob"), &r, Access::Write));
    }

    #[test]
    fn test_membership_by_host_slug() {
        let r = repo(&["alice"], &["bob"], false);
        assert!(has_write_permission(&User::new("alice@example.com"), &r));
        assert!(has_read_permission(&User::new("bob@example.com"), &r));
        assert!(!has_write_permission(&User::new("bob@example.com"), &r));

        let r = repo(&["alice@example.com"], &[], false);
        assert!(has_write_permission(&User::new("alice@example.com"), &r));
        assert!(!has_write_permission(&User::new("alice"), &r));
    }
}
