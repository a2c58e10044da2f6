//! Account storage: bcrypt-hashed credentials over the shared connection,
//! seeding a default admin account on first boot.

use crate::auth::models::User;
use crate::db::Db;
use crate::models::{Role, UserId};
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let role_str: String = row.get(3)?;
    Ok(User {
        id: row.get::<_, String>(0)?.parse().unwrap(),
        username: row.get(1)?,
        password_hash: row.get(2)?,
        role: Role::from_str(&role_str).unwrap_or(Role::User),
        created_at: row.get::<_, String>(4)?.parse().unwrap(),
    })
}

const SELECT_COLUMNS: &str = "id, username, password_hash, role, created_at";

pub struct UserStore {
    db: Db,
}

impl UserStore {
    pub fn new(db: Db) -> Result<Self> {
        let store = Self { db };
        store.create_default_admin()?;
        Ok(store)
    }

    fn create_default_admin(&self) -> Result<()> {
        self.db
            .with_conn(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM users WHERE role = 'admin'",
                    [],
                    |row| row.get(0),
                )?;
                if count > 0 {
                    return Ok(());
                }

                let password_hash = hash("admin123", DEFAULT_COST)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                let admin = User {
                    id: Uuid::new_v4(),
                    username: "admin".to_string(),
                    password_hash,
                    role: Role::Admin,
                    created_at: Utc::now(),
                };

                conn.execute(
                    "INSERT INTO users (id, username, password_hash, role, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        admin.id.to_string(),
                        admin.username,
                        admin.password_hash,
                        admin.role.as_str(),
                        admin.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .context("seeding default admin")?;

        info!("default admin account ready (username: admin, password: admin123)");
        warn!("change the default admin password before going to production");
        Ok(())
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                row_to_user,
            )
            .optional()
        })?;
        Ok(user)
    }

    pub fn get_user_by_id(&self, user_id: UserId) -> Result<Option<User>> {
        let user = self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM users WHERE id = ?1"),
                params![user_id.to_string()],
                row_to_user,
            )
            .optional()
        })?;
        Ok(user)
    }

    pub fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        match self.get_user_by_username(username)? {
            Some(user) => Ok(verify(password, &user.password_hash).context("verifying password")?),
            None => Ok(false),
        }
    }

    pub fn create_user(&self, username: &str, password: &str, role: Role) -> Result<User> {
        let password_hash = hash(password, DEFAULT_COST).context("hashing password")?;
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash,
            role,
            created_at: Utc::now(),
        };

        self.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO users (id, username, password_hash, role, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        user.id.to_string(),
                        user.username,
                        user.password_hash,
                        user.role.as_str(),
                        user.created_at.to_rfc3339(),
                    ],
                )
            })
            .context("inserting user")?;

        info!(username = %user.username, role = user.role.as_str(), "created user");
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let users = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM users"))?;
            stmt.query_map([], row_to_user)?.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(users)
    }

    pub fn delete_user(&self, user_id: UserId) -> Result<()> {
        let rows_affected = self
            .db
            .with_conn(|conn| conn.execute("DELETE FROM users WHERE id = ?1", params![user_id.to_string()]))?;

        if rows_affected == 0 {
            anyhow::bail!("user not found");
        }

        info!(%user_id, "deleted user");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> UserStore {
        UserStore::new(Db::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn default_admin_created() {
        let store = test_store();
        let admin = store.get_user_by_username("admin").unwrap().unwrap();
        assert_eq!(admin.username, "admin");
        assert_eq!(admin.role, Role::Admin);
    }

    #[test]
    fn password_verification() {
        let store = test_store();
        assert!(store.verify_password("admin", "admin123").unwrap());
        assert!(!store.verify_password("admin", "wrongpassword").unwrap());
        assert!(!store.verify_password("nonexistent", "password").unwrap());
    }

    #[test]
    fn create_and_retrieve_user() {
        let store = test_store();
        let user = store.create_user("alice", "password123", Role::User).unwrap();
        assert_eq!(user.role, Role::User);

        let retrieved = store.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(retrieved.username, "alice");
    }

    #[test]
    fn list_users_includes_seeded_admin() {
        let store = test_store();
        store.create_user("alice", "pass", Role::User).unwrap();
        store.create_user("bob", "pass", Role::User).unwrap();

        let users = store.list_users().unwrap();
        assert_eq!(users.len(), 3);
    }

    #[test]
    fn delete_user_removes_account() {
        let store = test_store();
        let user = store.create_user("tempuser", "pass", Role::User).unwrap();
        assert!(store.get_user_by_username("tempuser").unwrap().is_some());

        store.delete_user(user.id).unwrap();
        assert!(store.get_user_by_username("tempuser").unwrap().is_none());
    }

    #[test]
    fn delete_unknown_user_errors() {
        let store = test_store();
        assert!(store.delete_user(Uuid::new_v4()).is_err());
    }
}
