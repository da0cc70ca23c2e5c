//! SQLite schema definitions for the news database.
//!
//! Article uniqueness is a storage constraint (`UNIQUE (link)`), so concurrent
//! writers (scrape cycles and maintenance jobs) never need in-process locking
//! to avoid duplicates.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

// =============================================================================
// Version 1 - Articles, reads, preferences and daily counters
// =============================================================================

const ARTICLES_TABLE_V1: Table = Table {
    name: "articles",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true), // AUTOINCREMENT
        sqlite_column!("link", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("source", &SqlType::Text, non_null = true),
        sqlite_column!("topic", &SqlType::Text),
        sqlite_column!("body", &SqlType::Text),
        sqlite_column!("summary", &SqlType::Text),
        sqlite_column!(
            "fetched_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_articles_fetched_at", "fetched_at")],
    unique_constraints: &[&["link"]],
};

const ARTICLE_FOREIGN_KEY: ForeignKey = ForeignKey {
    foreign_table: "articles",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const ARTICLE_READS_TABLE_V1: Table = Table {
    name: "article_reads",
    columns: &[
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!(
            "article_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ARTICLE_FOREIGN_KEY)
        ),
        sqlite_column!(
            "read_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        ("idx_article_reads_user", "user_id"),
        ("idx_article_reads_article", "article_id"),
    ],
    unique_constraints: &[],
};

const USER_PREFERENCES_TABLE_V1: Table = Table {
    name: "user_preferences",
    columns: &[
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!("topic", &SqlType::Text, non_null = true),
        sqlite_column!("weight", &SqlType::Real, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["user_id", "topic"]],
};

const DAILY_COUNTERS_TABLE_V1: Table = Table {
    name: "daily_counters",
    columns: &[
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!("counter", &SqlType::Text, non_null = true),
        sqlite_column!(
            "value",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[],
    unique_constraints: &[&["user_id", "counter"]],
};

pub const NEWS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        ARTICLES_TABLE_V1,
        ARTICLE_READS_TABLE_V1,
        USER_PREFERENCES_TABLE_V1,
        DAILY_COUNTERS_TABLE_V1,
    ],
}];
