use super::models::{Article, NewArticle, TopicReadCount, UserPreference};
use super::schema::NEWS_VERSIONED_SCHEMAS;
use super::NewsStore;
use crate::server::metrics;
use crate::sqlite_persistence::init_schema;
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{error, info};

pub struct SqliteNewsStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteNewsStore {
    /// Open (or create) the news database at `db_path`.
    ///
    /// Fails if the file cannot be opened, is not a news database, or was
    /// written by an unknown schema version.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open news database at {:?}", path))?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        let version = init_schema(&conn, NEWS_VERSIONED_SCHEMAS, "news")
            .with_context(|| format!("Failed to initialize news database at {:?}", path))?;
        info!("News database at {:?} ready (schema v{})", path, version);

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Run `f` against the open connection, recording the query duration.
    ///
    /// Errors are counted and logged here; callers decide whether to
    /// propagate them further.
    fn with_conn<T>(&self, operation: &str, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("News database lock poisoned"))?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| anyhow!("News database connection is closed"))?;

        let start = Instant::now();
        let result = f(conn);
        metrics::record_db_query(operation, start.elapsed());
        if let Err(e) = &result {
            metrics::record_db_error(operation);
            error!("Storage error during {}: {:#}", operation, e);
        }
        result
    }

    fn row_to_article(row: &rusqlite::Row) -> rusqlite::Result<Article> {
        Ok(Article {
            id: row.get("id")?,
            link: row.get("link")?,
            title: row.get("title")?,
            source: row.get("source")?,
            topic: row.get("topic")?,
            body: row.get("body")?,
            summary: row.get("summary")?,
            fetched_at: row.get("fetched_at")?,
        })
    }
}

impl NewsStore for SqliteNewsStore {
    fn insert_article(&self, article: &NewArticle) -> Result<Option<i64>> {
        self.with_conn("insert_article", |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO articles (link, title, source, topic, body, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    article.link,
                    article.title,
                    article.source,
                    article.topic,
                    article.body,
                    article.fetched_at
                ],
            )?;
            if inserted == 0 {
                Ok(None)
            } else {
                Ok(Some(conn.last_insert_rowid()))
            }
        })
    }

    fn get_article(&self, id: i64) -> Result<Option<Article>> {
        self.with_conn("get_article", |conn| {
            let article = conn
                .query_row(
                    "SELECT id, link, title, source, topic, body, summary, fetched_at
                     FROM articles WHERE id = ?1",
                    params![id],
                    Self::row_to_article,
                )
                .optional()?;
            Ok(article)
        })
    }

    fn set_article_summary(&self, id: i64, summary: &str) -> Result<()> {
        self.with_conn("set_article_summary", |conn| {
            conn.execute(
                "UPDATE articles SET summary = ?1 WHERE id = ?2",
                params![summary, id],
            )?;
            Ok(())
        })
    }

    fn count_articles(&self) -> Result<usize> {
        self.with_conn("count_articles", |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    fn delete_articles_fetched_before(&self, cutoff: i64) -> Result<usize> {
        self.with_conn("delete_stale_articles", |conn| {
            let deleted = conn.execute(
                "DELETE FROM articles WHERE fetched_at < ?1",
                params![cutoff],
            )?;
            Ok(deleted)
        })
    }

    fn record_read(&self, user_id: &str, article_id: i64, read_at: i64) -> Result<()> {
        self.with_conn("record_read", |conn| {
            conn.execute(
                "INSERT INTO article_reads (user_id, article_id, read_at) VALUES (?1, ?2, ?3)",
                params![user_id, article_id, read_at],
            )?;
            Ok(())
        })
    }

    fn get_topic_read_counts(&self) -> Result<Vec<TopicReadCount>> {
        self.with_conn("get_topic_read_counts", |conn| {
            let mut stmt = conn.prepare(
                "SELECT r.user_id, a.topic, COUNT(*) AS reads
                 FROM article_reads r
                 JOIN articles a ON a.id = r.article_id
                 WHERE a.topic IS NOT NULL
                 GROUP BY r.user_id, a.topic
                 ORDER BY r.user_id, a.topic",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    let reads: i64 = row.get("reads")?;
                    Ok(TopicReadCount {
                        user_id: row.get("user_id")?,
                        topic: row.get("topic")?,
                        reads: reads as u64,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn replace_user_preferences(
        &self,
        user_id: &str,
        weights: &[(String, f64)],
        updated_at: i64,
    ) -> Result<()> {
        self.with_conn("replace_user_preferences", |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM user_preferences WHERE user_id = ?1",
                params![user_id],
            )?;
            for (topic, weight) in weights {
                tx.execute(
                    "INSERT INTO user_preferences (user_id, topic, weight, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![user_id, topic, weight, updated_at],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn get_user_preferences(&self, user_id: &str) -> Result<Vec<UserPreference>> {
        self.with_conn("get_user_preferences", |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, topic, weight, updated_at FROM user_preferences
                 WHERE user_id = ?1 ORDER BY weight DESC, topic",
            )?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok(UserPreference {
                        user_id: row.get("user_id")?,
                        topic: row.get("topic")?,
                        weight: row.get("weight")?,
                        updated_at: row.get("updated_at")?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn list_users_with_preferences(&self) -> Result<Vec<String>> {
        self.with_conn("list_users_with_preferences", |conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT user_id FROM user_preferences ORDER BY user_id")?;
            let users = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(users)
        })
    }

    fn increment_daily_counter(&self, user_id: &str, counter: &str) -> Result<i64> {
        self.with_conn("increment_daily_counter", |conn| {
            conn.execute(
                "INSERT INTO daily_counters (user_id, counter, value) VALUES (?1, ?2, 1)
                 ON CONFLICT (user_id, counter) DO UPDATE SET value = value + 1",
                params![user_id, counter],
            )?;
            let value = conn.query_row(
                "SELECT value FROM daily_counters WHERE user_id = ?1 AND counter = ?2",
                params![user_id, counter],
                |row| row.get(0),
            )?;
            Ok(value)
        })
    }

    fn get_daily_counter(&self, user_id: &str, counter: &str) -> Result<i64> {
        self.with_conn("get_daily_counter", |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM daily_counters WHERE user_id = ?1 AND counter = ?2",
                    params![user_id, counter],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.unwrap_or(0))
        })
    }

    fn reset_daily_counters(&self) -> Result<usize> {
        self.with_conn("reset_daily_counters", |conn| {
            let reset = conn.execute("UPDATE daily_counters SET value = 0 WHERE value != 0", [])?;
            Ok(reset)
        })
    }

    fn close(&self) -> Result<()> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("News database lock poisoned"))?;
        match guard.take() {
            Some(conn) => {
                conn.close()
                    .map_err(|(_, e)| e)
                    .context("Failed to close news database")?;
                info!("News database closed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct TestStore {
        store: SqliteNewsStore,
        _temp_dir: TempDir, // Keep temp dir alive
    }

    fn create_test_store() -> TestStore {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("news.db");
        let store = SqliteNewsStore::new(&db_path).unwrap();
        TestStore {
            store,
            _temp_dir: temp_dir,
        }
    }

    fn article(link: &str, topic: Option<&str>, fetched_at: i64) -> NewArticle {
        NewArticle {
            link: link.to_string(),
            title: format!("Title of {}", link),
            source: "test".to_string(),
            topic: topic.map(|t| t.to_string()),
            body: Some("Body.".to_string()),
            fetched_at,
        }
    }

    #[test]
    fn test_insert_article_ignores_duplicate_links() {
        let test = create_test_store();
        let store = &test.store;

        let first = store.insert_article(&article("https://a", None, 100)).unwrap();
        assert!(first.is_some());

        let second = store.insert_article(&article("https://a", None, 200)).unwrap();
        assert!(second.is_none());
        assert_eq!(store.count_articles().unwrap(), 1);
    }

    #[test]
    fn test_set_and_get_summary() {
        let test = create_test_store();
        let store = &test.store;

        let id = store
            .insert_article(&article("https://a", Some("tech"), 100))
            .unwrap()
            .unwrap();
        store.set_article_summary(id, "Short.").unwrap();

        let loaded = store.get_article(id).unwrap().unwrap();
        assert_eq!(loaded.summary.as_deref(), Some("Short."));
        assert_eq!(loaded.topic.as_deref(), Some("tech"));
        assert!(store.get_article(id + 1).unwrap().is_none());
    }

    #[test]
    fn test_delete_articles_cascades_reads() {
        let test = create_test_store();
        let store = &test.store;

        let old = store
            .insert_article(&article("https://old", Some("world"), 100))
            .unwrap()
            .unwrap();
        let fresh = store
            .insert_article(&article("https://fresh", Some("tech"), 1_000))
            .unwrap()
            .unwrap();
        store.record_read("alice", old, 150).unwrap();
        store.record_read("alice", fresh, 1_050).unwrap();

        let deleted = store.delete_articles_fetched_before(500).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count_articles().unwrap(), 1);

        let counts = store.get_topic_read_counts().unwrap();
        assert_eq!(
            counts,
            vec![TopicReadCount {
                user_id: "alice".to_string(),
                topic: "tech".to_string(),
                reads: 1,
            }]
        );
    }

    #[test]
    fn test_topic_read_counts_skip_untagged_articles() {
        let test = create_test_store();
        let store = &test.store;

        let tagged = store
            .insert_article(&article("https://tagged", Some("sports"), 100))
            .unwrap()
            .unwrap();
        let untagged = store
            .insert_article(&article("https://untagged", None, 100))
            .unwrap()
            .unwrap();
        store.record_read("bob", tagged, 110).unwrap();
        store.record_read("bob", tagged, 120).unwrap();
        store.record_read("bob", untagged, 130).unwrap();

        let counts = store.get_topic_read_counts().unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].reads, 2);
    }

    #[test]
    fn test_replace_user_preferences() {
        let test = create_test_store();
        let store = &test.store;

        store
            .replace_user_preferences("alice", &[("tech".to_string(), 1.0)], 10)
            .unwrap();
        store
            .replace_user_preferences(
                "alice",
                &[("world".to_string(), 0.25), ("sports".to_string(), 0.75)],
                20,
            )
            .unwrap();

        let prefs = store.get_user_preferences("alice").unwrap();
        assert_eq!(prefs.len(), 2);
        assert_eq!(prefs[0].topic, "sports");
        assert_eq!(prefs[1].topic, "world");
        assert!(prefs.iter().all(|p| p.updated_at == 20));

        store.replace_user_preferences("bob", &[], 30).unwrap();
        assert_eq!(store.list_users_with_preferences().unwrap(), vec!["alice"]);
    }

    #[test]
    fn test_daily_counters_increment_and_reset() {
        let test = create_test_store();
        let store = &test.store;

        assert_eq!(store.get_daily_counter("alice", "summaries").unwrap(), 0);
        assert_eq!(store.increment_daily_counter("alice", "summaries").unwrap(), 1);
        assert_eq!(store.increment_daily_counter("alice", "summaries").unwrap(), 2);
        assert_eq!(store.increment_daily_counter("bob", "summaries").unwrap(), 1);

        assert_eq!(store.reset_daily_counters().unwrap(), 2);
        assert_eq!(store.get_daily_counter("alice", "summaries").unwrap(), 0);
        assert_eq!(store.reset_daily_counters().unwrap(), 0);
    }

    #[test]
    fn test_reopen_existing_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("news.db");
        {
            let store = SqliteNewsStore::new(&db_path).unwrap();
            store.insert_article(&article("https://a", None, 1)).unwrap();
            store.close().unwrap();
        }

        let store = SqliteNewsStore::new(&db_path).unwrap();
        assert_eq!(store.count_articles().unwrap(), 1);
    }

    #[test]
    fn test_open_fails_for_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("does-not-exist").join("news.db");
        assert!(SqliteNewsStore::new(&db_path).is_err());
    }

    #[test]
    fn test_open_fails_for_foreign_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("other.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE unrelated (id INTEGER)", []).unwrap();
        }

        let err = SqliteNewsStore::new(&db_path).err().unwrap();
        assert!(format!("{:#}", err).contains("not written by this server"));
    }

    #[test]
    fn test_calls_fail_after_close() {
        let test = create_test_store();
        test.store.close().unwrap();
        assert!(test.store.count_articles().is_err());
        // Closing twice is harmless
        test.store.close().unwrap();
    }
}
