//! Group membership storage (§6 supplement), grounded in the original
//! `group_membership_service.py`: a user's standing in a group is an
//! interval, not a boolean, so a prediction placed while a member later
//! leaves still settles correctly.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::db::Db;
use crate::models::{GroupId, GroupMembership, MembershipRole, UserId};

fn row_to_membership(row: &rusqlite::Row) -> rusqlite::Result<GroupMembership> {
    let role: String = row.get(3)?;
    Ok(GroupMembership {
        user_id: row.get::<_, String>(0)?.parse().unwrap(),
        group_id: row.get::<_, String>(1)?.parse().unwrap(),
        joined_at: row.get::<_, String>(2)?.parse().unwrap(),
        role: if role == "moderator" {
            MembershipRole::Moderator
        } else {
            MembershipRole::Member
        },
        left_at: row
            .get::<_, Option<String>>(4)?
            .map(|s| s.parse().unwrap()),
    })
}

#[derive(Clone)]
pub struct MembershipStore {
    db: Db,
}

impl MembershipStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn join(
        &self,
        user_id: UserId,
        group_id: GroupId,
        role: MembershipRole,
        joined_at: DateTime<Utc>,
    ) -> Result<GroupMembership> {
        let role_str = match role {
            MembershipRole::Member => "member",
            MembershipRole::Moderator => "moderator",
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_memberships (user_id, group_id, joined_at, left_at, role) \
                 VALUES (?1, ?2, ?3, NULL, ?4) \
                 ON CONFLICT (user_id, group_id) DO UPDATE SET joined_at = excluded.joined_at, left_at = NULL, role = excluded.role",
                params![user_id.to_string(), group_id.to_string(), joined_at.to_rfc3339(), role_str],
            )
        })?;
        Ok(GroupMembership {
            user_id,
            group_id,
            joined_at,
            left_at: None,
            role,
        })
    }

    pub fn leave(&self, user_id: UserId, group_id: GroupId, left_at: DateTime<Utc>) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE group_memberships SET left_at = ?1 WHERE user_id = ?2 AND group_id = ?3",
                params![left_at.to_rfc3339(), user_id.to_string(), group_id.to_string()],
            )
        })?;
        Ok(())
    }

    pub fn get(&self, user_id: UserId, group_id: GroupId) -> Result<Option<GroupMembership>> {
        let membership = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id, group_id, joined_at, role, left_at FROM group_memberships \
                 WHERE user_id = ?1 AND group_id = ?2",
                params![user_id.to_string(), group_id.to_string()],
                row_to_membership,
            )
            .optional()
        })?;
        Ok(membership)
    }

    /// `is_active_at` (§6 supplement): the admission check the Prediction
    /// Store relies on to reject submissions from non-members.
    pub fn is_active(&self, user_id: UserId, group_id: GroupId, at: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .get(user_id, group_id)?
            .map(|m| m.is_active_at(at))
            .unwrap_or(false))
    }

    pub fn members_of(&self, group_id: GroupId) -> Result<Vec<GroupMembership>> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, group_id, joined_at, role, left_at FROM group_memberships \
                 WHERE group_id = ?1",
            )?;
            stmt.query_map(params![group_id.to_string()], row_to_membership)?
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> MembershipStore {
        MembershipStore::new(Db::open_in_memory().unwrap())
    }

    #[test]
    fn join_then_active_at_now() {
        let store = store();
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();
        let now = Utc::now();
        store.join(user, group, MembershipRole::Member, now).unwrap();
        assert!(store.is_active(user, group, now).unwrap());
    }

    #[test]
    fn leave_makes_membership_inactive_after_left_at() {
        let store = store();
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();
        let now = Utc::now();
        store.join(user, group, MembershipRole::Member, now - Duration::days(1)).unwrap();
        store.leave(user, group, now).unwrap();
        assert!(store.is_active(user, group, now - Duration::hours(1)).unwrap());
        assert!(!store.is_active(user, group, now + Duration::hours(1)).unwrap());
    }

    #[test]
    fn non_member_is_not_active() {
        let store = store();
        assert!(!store
            .is_active(Uuid::new_v4(), Uuid::new_v4(), Utc::now())
            .unwrap());
    }
}
