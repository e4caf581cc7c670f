use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS thought_chains (
            id                      TEXT PRIMARY KEY,
            owner_id                TEXT NOT NULL,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL,
            first_thought_at        TEXT,
            display_label           TEXT,
            diverged_from_chain_id  TEXT,
            diverged_at_thought_id  TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_chains_owner
            ON thought_chains(owner_id);

        CREATE TABLE IF NOT EXISTS thoughts (
            id              TEXT PRIMARY KEY,
            owner_id        TEXT NOT NULL,
            content         TEXT NOT NULL,
            state           TEXT NOT NULL CHECK (state IN ('active', 'anchored')),
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            anchored_at     TEXT,
            display_label   TEXT,
            chain_id        TEXT,
            edited_from_id  TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_thoughts_owner
            ON thoughts(owner_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_thoughts_chain
            ON thoughts(chain_id);

        CREATE TABLE IF NOT EXISTS chain_links (
            id              TEXT PRIMARY KEY,
            owner_id        TEXT NOT NULL,
            from_chain_id   TEXT NOT NULL,
            to_chain_id     TEXT NOT NULL,
            pair_low        TEXT NOT NULL,
            pair_high       TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            CHECK (from_chain_id != to_chain_id),
            UNIQUE(owner_id, pair_low, pair_high)
        );

        CREATE INDEX IF NOT EXISTS idx_links_owner
            ON chain_links(owner_id);

        -- Owner-scoped key/value cache for offline-first reads
        CREATE TABLE IF NOT EXISTS local_cache (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
