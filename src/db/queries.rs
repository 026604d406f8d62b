pub const CREATE_SESSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id INTEGER PRIMARY KEY NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NULL,
    fix_count INTEGER NOT NULL DEFAULT 0,
    CHECK (end_time IS NULL OR end_time >= start_time)
);
"#;

pub const CREATE_FIXES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS fixes (
    fix_id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    timestamp INTEGER NOT NULL,
    accuracy REAL NULL,
    altitude REAL NULL,
    speed REAL NULL,
    bearing REAL NULL,
    address TEXT NULL
);
"#;

pub const CREATE_FIXES_SESSION_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_fixes_session ON fixes(session_id, fix_id);
"#;

pub const CREATE_SESSIONS_START_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start_time DESC);
"#;

pub const INSERT_SESSION: &str = r#"
INSERT INTO sessions (session_id, start_time, end_time, fix_count)
VALUES (?1, ?2, ?3, ?4);
"#;

pub const UPDATE_SESSION_HEADER: &str = r#"
UPDATE sessions
SET start_time = ?2,
    end_time = ?3
WHERE session_id = ?1;
"#;

pub const SELECT_SESSION_EXISTS: &str = r#"
SELECT COUNT(*) FROM sessions WHERE session_id = ?1;
"#;

pub const SELECT_MAX_SESSION_ID: &str = r#"
SELECT MAX(session_id) FROM sessions;
"#;

pub const INSERT_FIX: &str = r#"
INSERT INTO fixes (session_id, latitude, longitude, timestamp, accuracy, altitude, speed, bearing, address)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);
"#;

pub const REFRESH_FIX_COUNT: &str = r#"
UPDATE sessions
SET fix_count = (SELECT COUNT(*) FROM fixes WHERE fixes.session_id = sessions.session_id)
WHERE session_id = ?1;
"#;

pub const SELECT_SESSION_BY_ID: &str = r#"
SELECT session_id, start_time, end_time, fix_count FROM sessions WHERE session_id = ?1;
"#;

pub const SELECT_ALL_SESSIONS: &str = r#"
SELECT session_id, start_time, end_time, fix_count
FROM sessions
ORDER BY start_time DESC, session_id DESC;
"#;

pub const SELECT_RECENT_SESSIONS: &str = r#"
SELECT session_id, start_time, end_time, fix_count
FROM sessions
ORDER BY start_time DESC, session_id DESC
LIMIT ?1;
"#;

// LIMIT 2 is enough to detect a second open session.
pub const SELECT_ACTIVE_SESSIONS: &str = r#"
SELECT session_id, start_time, end_time, fix_count
FROM sessions
WHERE end_time IS NULL
ORDER BY start_time DESC
LIMIT 2;
"#;

pub const SELECT_FIXES_FOR_SESSION: &str = r#"
SELECT latitude, longitude, timestamp, accuracy, altitude, speed, bearing, address
FROM fixes
WHERE session_id = ?1
ORDER BY fix_id ASC;
"#;

pub const DELETE_FIXES_FOR_SESSION: &str = r#"
DELETE FROM fixes WHERE session_id = ?1;
"#;

pub const DELETE_SESSION: &str = r#"
DELETE FROM sessions WHERE session_id = ?1;
"#;

pub const DELETE_ALL_FIXES: &str = r#"
DELETE FROM fixes;
"#;

pub const DELETE_ALL_SESSIONS: &str = r#"
DELETE FROM sessions;
"#;
