use crate::models::{AgencyRow, FeedbackRow, UserRow};
use crate::Database;
use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{Connection, Row};

/// Insert payload for a freshly registered, unverified account.
pub struct NewUser<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub verification_token: &'a str,
    pub verification_token_expires: &'a str,
    pub now: &'a str,
}

pub struct NewFeedback<'a> {
    pub id: &'a str,
    pub kind: &'a str,
    pub department: &'a str,
    pub agency: &'a str,
    pub subject: &'a str,
    pub description: &'a str,
    pub user_id: &'a str,
    pub file_paths: &'a [String],
    pub now: &'a str,
}

/// Columns an owner may change. `None` leaves the stored value untouched;
/// `file_paths` is always written in full.
pub struct ContentUpdate<'a> {
    pub kind: Option<&'a str>,
    pub department: Option<&'a str>,
    pub agency: Option<&'a str>,
    pub subject: Option<&'a str>,
    pub description: Option<&'a str>,
    pub file_paths: &'a [String],
    pub now: &'a str,
}

/// Filters for listing feedback. `owner = None` lists every record.
#[derive(Default)]
pub struct FeedbackQuery<'a> {
    pub owner: Option<&'a str>,
    pub kind: Option<&'a str>,
    pub department: Option<&'a str>,
    pub status: Option<&'a str>,
    pub limit: Option<u32>,
    pub offset: u32,
}

const USER_COLUMNS: &str = "id, name, email, password_hash, role, email_verified, \
     verification_token, verification_token_expires, created_at, updated_at";

const FEEDBACK_COLUMNS: &str = "id, type, department, agency, subject, description, \
     status, user_id, file_paths, created_at, updated_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, verification_token, verification_token_expires, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![
                    user.id,
                    user.name,
                    user.email,
                    user.verification_token,
                    user.verification_token_expires,
                    user.now,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_verification_token(&self, token: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "verification_token", token))
    }

    /// Clears the verification token fields and flags the email as verified.
    /// The WHERE clause on the token makes a second use a no-op.
    pub fn mark_email_verified(&self, id: &str, token: &str, now: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users
                 SET email_verified = 1, verification_token = NULL,
                     verification_token_expires = NULL, updated_at = ?3
                 WHERE id = ?1 AND verification_token = ?2",
                rusqlite::params![id, token, now],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn set_password_hash(&self, id: &str, password_hash: &str, now: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, password_hash, now],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn set_role_by_email(&self, email: &str, role: &str, now: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET role = ?2, updated_at = ?3 WHERE email = ?1",
                rusqlite::params![email, role, now],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(changed == 1)
        })
    }

    pub fn count_users(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
            Ok(count as u64)
        })
    }

    // -- Feedback --

    pub fn insert_feedback(&self, fb: &NewFeedback<'_>) -> Result<FeedbackRow> {
        let file_paths = serde_json::to_string(fb.file_paths)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO feedback (id, type, department, agency, subject, description, status, user_id, file_paths, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'PENDING', ?7, ?8, ?9, ?9)",
                rusqlite::params![
                    fb.id,
                    fb.kind,
                    fb.department,
                    fb.agency,
                    fb.subject,
                    fb.description,
                    fb.user_id,
                    file_paths,
                    fb.now,
                ],
            )?;
            query_feedback(conn, fb.id, None)?
                .ok_or_else(|| anyhow::anyhow!("Feedback {} vanished after insert", fb.id))
        })
    }

    /// Fetches one record. With `owner = Some(..)` a record owned by someone
    /// else is reported as absent.
    pub fn get_feedback(&self, id: &str, owner: Option<&str>) -> Result<Option<FeedbackRow>> {
        self.with_conn(|conn| query_feedback(conn, id, owner))
    }

    /// Returns the requested page (newest first) and the total matching count.
    pub fn list_feedback(&self, query: &FeedbackQuery<'_>) -> Result<(Vec<FeedbackRow>, u64)> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        let filters = [
            ("user_id = ?", query.owner),
            ("type = ?", query.kind),
            ("department = ?", query.department),
            ("status = ?", query.status),
        ];
        for (clause, value) in filters {
            if let Some(v) = value {
                clauses.push(clause);
                params.push(Value::Text(v.to_string()));
            }
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM feedback{}", where_sql),
                rusqlite::params_from_iter(params.iter()),
                |r| r.get(0),
            )?;

            let mut sql = format!(
                "SELECT {} FROM feedback{} ORDER BY created_at DESC, rowid DESC",
                FEEDBACK_COLUMNS, where_sql
            );
            let mut page_params = params.clone();
            if let Some(limit) = query.limit {
                sql.push_str(" LIMIT ? OFFSET ?");
                page_params.push(Value::Integer(limit as i64));
                page_params.push(Value::Integer(query.offset as i64));
            }

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(page_params.iter()), feedback_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((rows, total as u64))
        })
    }

    pub fn update_feedback_status(
        &self,
        id: &str,
        status: &str,
        now: &str,
    ) -> Result<Option<FeedbackRow>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE feedback SET status = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, status, now],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_feedback(conn, id, None)
        })
    }

    pub fn update_feedback_content(
        &self,
        id: &str,
        owner: &str,
        update: &ContentUpdate<'_>,
    ) -> Result<Option<FeedbackRow>> {
        let file_paths = serde_json::to_string(update.file_paths)?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE feedback SET
                    type = COALESCE(?3, type),
                    department = COALESCE(?4, department),
                    agency = COALESCE(?5, agency),
                    subject = COALESCE(?6, subject),
                    description = COALESCE(?7, description),
                    file_paths = ?8,
                    updated_at = ?9
                 WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![
                    id,
                    owner,
                    update.kind,
                    update.department,
                    update.agency,
                    update.subject,
                    update.description,
                    file_paths,
                    update.now,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_feedback(conn, id, None)
        })
    }

    pub fn delete_feedback(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM feedback WHERE id = ?1", [id])?;
            Ok(changed == 1)
        })
    }

    // -- Agencies --

    pub fn list_agencies(&self, department: Option<&str>) -> Result<Vec<AgencyRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, code, name, department, customer_care_email FROM agencies
                 WHERE ?1 IS NULL OR department = ?1
                 ORDER BY name",
            )?;
            let rows = stmt
                .query_map([department], agency_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_agency_by_code(&self, code: &str) -> Result<Option<AgencyRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, code, name, department, customer_care_email FROM agencies WHERE code = ?1",
                [code],
                agency_from_row,
            )
            .optional()
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always one of our own literals, never caller input.
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
    let mut stmt = conn.prepare(&sql)?;

    stmt.query_row([value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            role: row.get(4)?,
            email_verified: row.get(5)?,
            verification_token: row.get(6)?,
            verification_token_expires: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    })
    .optional()
}

fn query_feedback(conn: &Connection, id: &str, owner: Option<&str>) -> Result<Option<FeedbackRow>> {
    let sql = format!(
        "SELECT {} FROM feedback WHERE id = ?1 AND (?2 IS NULL OR user_id = ?2)",
        FEEDBACK_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row(rusqlite::params![id, owner], feedback_from_row)
        .optional()
}

fn feedback_from_row(row: &Row<'_>) -> rusqlite::Result<FeedbackRow> {
    Ok(FeedbackRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        department: row.get(2)?,
        agency: row.get(3)?,
        subject: row.get(4)?,
        description: row.get(5)?,
        status: row.get(6)?,
        user_id: row.get(7)?,
        file_paths: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn agency_from_row(row: &Row<'_>) -> rusqlite::Result<AgencyRow> {
    Ok(AgencyRow {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        department: row.get(3)?,
        customer_care_email: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_user(db: &Database, id: &str, email: &str) {
        db.create_user(&NewUser {
            id,
            name: "Test",
            email,
            verification_token: &format!("tok-{}", id),
            verification_token_expires: "2099-01-01T00:00:00.000000Z",
            now: "2024-01-01T00:00:00.000000Z",
        })
        .unwrap();
    }

    fn seed_feedback(db: &Database, id: &str, owner: &str, kind: &str, now: &str) {
        db.insert_feedback(&NewFeedback {
            id,
            kind,
            department: "Transport",
            agency: "LTA",
            subject: "s",
            description: "d",
            user_id: owner,
            file_paths: &[],
            now,
        })
        .unwrap();
    }

    #[test]
    fn duplicate_email_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "a@x.com");
        let err = db
            .create_user(&NewUser {
                id: "u2",
                name: "Other",
                email: "a@x.com",
                verification_token: "t2",
                verification_token_expires: "2099-01-01T00:00:00.000000Z",
                now: "2024-01-01T00:00:00.000000Z",
            })
            .unwrap_err();
        assert!(crate::is_unique_violation(&err));
    }

    #[test]
    fn verification_token_clears_once() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "a@x.com");
        assert!(db.mark_email_verified("u1", "tok-u1", "2024-01-02T00:00:00.000000Z").unwrap());
        assert!(!db.mark_email_verified("u1", "tok-u1", "2024-01-02T00:00:00.000000Z").unwrap());

        let row = db.get_user_by_id("u1").unwrap().unwrap();
        assert!(row.email_verified);
        assert!(row.verification_token.is_none());
        assert!(db.get_user_by_verification_token("tok-u1").unwrap().is_none());
    }

    #[test]
    fn list_filters_scope_and_orders_newest_first() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "a@x.com");
        seed_user(&db, "u2", "b@x.com");
        seed_feedback(&db, "f1", "u1", "COMPLAINT", "2024-01-01T00:00:00.000000Z");
        seed_feedback(&db, "f2", "u1", "SUGGESTION", "2024-01-02T00:00:00.000000Z");
        seed_feedback(&db, "f3", "u2", "COMPLAINT", "2024-01-03T00:00:00.000000Z");

        let (rows, total) = db
            .list_feedback(&FeedbackQuery { owner: Some("u1"), ..Default::default() })
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["f2", "f1"]);

        let (rows, total) = db
            .list_feedback(&FeedbackQuery {
                kind: Some("COMPLAINT"),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "f3");
    }

    #[test]
    fn scoped_get_hides_foreign_records() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "a@x.com");
        seed_user(&db, "u2", "b@x.com");
        seed_feedback(&db, "f1", "u1", "ENQUIRE", "2024-01-01T00:00:00.000000Z");

        assert!(db.get_feedback("f1", Some("u1")).unwrap().is_some());
        assert!(db.get_feedback("f1", Some("u2")).unwrap().is_none());
        assert!(db.get_feedback("f1", None).unwrap().is_some());
    }

    #[test]
    fn agencies_are_seeded_and_filterable() {
        let db = Database::open_in_memory().unwrap();
        let health = db.list_agencies(Some("Health")).unwrap();
        assert_eq!(health.len(), 2);
        assert!(health.iter().all(|a| a.department == "Health"));
        assert!(db.list_agencies(None).unwrap().len() > health.len());
        assert_eq!(db.get_agency_by_code("HDB").unwrap().unwrap().department, "Housing");
        assert!(db.get_agency_by_code("NOPE").unwrap().is_none());
    }
}
