//! SQL schema for the registry SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Staging extracts are strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS staging_extracts (
    extract_id     TEXT PRIMARY KEY,
    external_id    TEXT NOT NULL,
    extract_kind   TEXT NOT NULL,   -- 'company' | 'officers' | 'addresses' | 'links'
    extracted_at   TEXT NOT NULL,   -- fixed-width RFC 3339, micros; store-assigned
    source_tag     TEXT NOT NULL,   -- 'bulk_discovery' | 'on_demand'
    payload        TEXT,            -- raw JSON slice; NULL for error rows
    payload_digest TEXT,            -- hex SHA-256 of payload
    status         TEXT NOT NULL,   -- 'ok' | 'error'
    error_detail   TEXT
);

CREATE INDEX IF NOT EXISTS staging_latest_idx
    ON staging_extracts(external_id, extract_kind, extracted_at DESC);

CREATE TABLE IF NOT EXISTS companies (
    canonical_key      TEXT PRIMARY KEY,
    external_id        TEXT NOT NULL UNIQUE,
    name               TEXT NOT NULL,
    name_key           TEXT NOT NULL,   -- lowercased, whitespace-collapsed name
    legal_form         TEXT,
    status             TEXT,
    city               TEXT,
    country            TEXT,
    address_summary    TEXT,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    last_fetched_at    TEXT,
    last_normalized_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS companies_name_key_idx ON companies(name_key);

-- Replaced wholesale per company on every normalization.
CREATE TABLE IF NOT EXISTS officers (
    canonical_key TEXT    NOT NULL REFERENCES companies(canonical_key) ON DELETE CASCADE,
    position      INTEGER NOT NULL,
    title         TEXT,
    first_name    TEXT,
    last_name     TEXT,
    full_name     TEXT    NOT NULL,
    role          TEXT,
    birth_date    TEXT,             -- YYYY-MM-DD
    is_active     INTEGER NOT NULL,
    version_tag   TEXT,
    PRIMARY KEY (canonical_key, position)
);

CREATE TABLE IF NOT EXISTS addresses (
    canonical_key  TEXT    NOT NULL REFERENCES companies(canonical_key) ON DELETE CASCADE,
    position       INTEGER NOT NULL,
    street         TEXT,
    house_number   TEXT,
    stairway       TEXT,
    door_number    TEXT,
    postal_code    TEXT,
    city           TEXT,
    state          TEXT,
    country        TEXT    NOT NULL,
    is_deliverable INTEGER NOT NULL,
    is_active      INTEGER NOT NULL,
    version_tag    TEXT,
    PRIMARY KEY (canonical_key, position)
);

-- The target may not be canonical yet, so only the source is a foreign key.
CREATE TABLE IF NOT EXISTS links (
    source_key         TEXT NOT NULL REFERENCES companies(canonical_key) ON DELETE CASCADE,
    target_key         TEXT NOT NULL,
    target_external_id TEXT NOT NULL,
    link_type          TEXT NOT NULL,
    share              REAL,
    note               TEXT,
    updated_at         TEXT NOT NULL,
    PRIMARY KEY (source_key, target_key, link_type)
);

CREATE INDEX IF NOT EXISTS links_target_idx ON links(target_key);

CREATE TABLE IF NOT EXISTS ingestion_runs (
    run_id          TEXT PRIMARY KEY,
    started_at      TEXT    NOT NULL,
    finished_at     TEXT,
    strategy        TEXT    NOT NULL,
    max_identifiers INTEGER NOT NULL,
    concurrency     INTEGER NOT NULL,
    rate_per_sec    REAL    NOT NULL,
    attempted       INTEGER NOT NULL DEFAULT 0,
    succeeded       INTEGER NOT NULL DEFAULT 0,
    failed          INTEGER NOT NULL DEFAULT 0,
    skipped         INTEGER NOT NULL DEFAULT 0,
    status          TEXT    NOT NULL   -- 'running' | 'completed' | 'cancelled'
);

PRAGMA user_version = 1;
";
