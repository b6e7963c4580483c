use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, feedback)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                          TEXT PRIMARY KEY,
                name                        TEXT NOT NULL,
                email                       TEXT NOT NULL UNIQUE,
                password_hash               TEXT,
                role                        TEXT NOT NULL DEFAULT 'user',
                email_verified              INTEGER NOT NULL DEFAULT 0,
                verification_token          TEXT UNIQUE,
                verification_token_expires  TEXT,
                created_at                  TEXT NOT NULL,
                updated_at                  TEXT NOT NULL
            );

            CREATE TABLE feedback (
                id          TEXT PRIMARY KEY,
                type        TEXT NOT NULL,
                department  TEXT NOT NULL,
                agency      TEXT NOT NULL,
                subject     TEXT NOT NULL,
                description TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'PENDING',
                user_id     TEXT NOT NULL REFERENCES users(id),
                file_paths  TEXT NOT NULL DEFAULT '[]',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_feedback_user ON feedback(user_id, created_at);
            CREATE INDEX idx_feedback_department ON feedback(department);
            CREATE INDEX idx_feedback_type ON feedback(type);
            CREATE INDEX idx_feedback_status ON feedback(status);

            INSERT INTO schema_version (version) VALUES (1);
            "
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (agencies)");
        conn.execute_batch(
            "
            CREATE TABLE agencies (
                id                   TEXT PRIMARY KEY,
                code                 TEXT NOT NULL UNIQUE,
                name                 TEXT NOT NULL,
                department           TEXT NOT NULL,
                customer_care_email  TEXT NOT NULL,
                created_at           TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX idx_agencies_department ON agencies(department);

            -- Seed catalog
            INSERT OR IGNORE INTO agencies (id, code, name, department, customer_care_email) VALUES
                ('00000000-0000-0000-0000-000000000101', 'LTA',  'Land Transport Authority',     'Transport',   'feedback@lta.example.gov'),
                ('00000000-0000-0000-0000-000000000102', 'PTC',  'Public Transport Council',     'Transport',   'care@ptc.example.gov'),
                ('00000000-0000-0000-0000-000000000201', 'MOH',  'Ministry of Health',           'Health',      'contact@moh.example.gov'),
                ('00000000-0000-0000-0000-000000000202', 'HPB',  'Health Promotion Board',       'Health',      'care@hpb.example.gov'),
                ('00000000-0000-0000-0000-000000000301', 'MOE',  'Ministry of Education',        'Education',   'contact@moe.example.gov'),
                ('00000000-0000-0000-0000-000000000401', 'HDB',  'Housing & Development Board',  'Housing',     'feedback@hdb.example.gov'),
                ('00000000-0000-0000-0000-000000000501', 'NEA',  'National Environment Agency',  'Environment', 'contact@nea.example.gov'),
                ('00000000-0000-0000-0000-000000000502', 'PUB',  'National Water Agency',        'Environment', 'care@pub.example.gov');

            INSERT INTO schema_version (version) VALUES (2);
            "
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
