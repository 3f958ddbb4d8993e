//! Database schema and migrations for feedhook.
//!
//! Migrations are applied in order; the schema_version table tracks which
//! ones have already run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: feed registry
    r#"
CREATE TABLE feeds (
    id                      TEXT PRIMARY KEY,
    url                     TEXT NOT NULL,
    refresh_interval_secs   INTEGER NOT NULL CHECK (refresh_interval_secs > 0),
    webhook_url             TEXT NOT NULL,
    time_first_fetch        TEXT,
    time_last_fetch         TEXT,
    items_fetched_total     INTEGER NOT NULL DEFAULT 0,
    items_cached            INTEGER NOT NULL DEFAULT 0,
    notifications_sent      INTEGER NOT NULL DEFAULT 0,
    created_at              TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Latest fetch snapshot, replaced wholesale on every poll
CREATE TABLE feed_items (
    feed_id     TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    position    INTEGER NOT NULL,
    title       TEXT NOT NULL,
    link        TEXT NOT NULL,
    published   TEXT NOT NULL,
    summary     TEXT NOT NULL,
    PRIMARY KEY (feed_id, position)
);
"#,
    // v2: seen-item stores
    r#"
-- Exact strategy: one row per notified identity, aged once per poll
CREATE TABLE seen_items (
    feed_id     TEXT NOT NULL,
    identity    TEXT NOT NULL,
    age         INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (feed_id, identity)
);

-- Approximate strategy: serialized filter per feed
CREATE TABLE seen_filters (
    feed_id         TEXT PRIMARY KEY,
    format_version  INTEGER NOT NULL,
    data            BLOB NOT NULL,
    updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
];
