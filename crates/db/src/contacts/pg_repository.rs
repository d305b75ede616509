use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use crate::contacts::models::{rows_above_watermark, ContactRow, WriteSummary};
use crate::contacts::repositories::ContactRepository;
use crate::schema::{validate_table_name, CONTACTS_TABLE};
use hubsync_common::error::{HubsyncError, HubsyncResult};
use hubsync_common::types::WriteMode;

const MERGE_SET: &str = "do update set
               first_name = excluded.first_name,
               last_name = excluded.last_name,
               email = excluded.email,
               business_name = excluded.business_name,
               vat_number = excluded.vat_number,
               country = excluded.country,
               number_of_users = excluded.number_of_users,
               vendor = excluded.vendor,
               lead_status = excluded.lead_status,
               created_date = excluded.created_date,
               last_activity_date = excluded.last_activity_date,
               updated_at = now()";

#[derive(Clone)]
pub struct PgContactRepository {
    pool: PgPool,
    table: String,
}

impl PgContactRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: CONTACTS_TABLE.to_string(),
        }
    }

    /// Target a table other than `hubspot_contacts` with the same columns.
    pub fn with_table(pool: PgPool, table: &str) -> HubsyncResult<Self> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    fn insert_sql(&self, mode: WriteMode) -> String {
        let on_conflict = match mode {
            WriteMode::Merge => MERGE_SET,
            WriteMode::InsertOnly | WriteMode::InsertIfNew => "do nothing",
        };
        format!(
            "insert into {table}
             (hubspot_id, first_name, last_name, email, business_name, vat_number,
              country, number_of_users, vendor, lead_status, created_date,
              last_activity_date, updated_at)
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())
             on conflict (hubspot_id) {on_conflict}",
            table = self.table,
        )
    }

    async fn query_max_numeric_id(&self, conn: &mut PgConnection) -> HubsyncResult<Option<i64>> {
        let sql = format!(
            "select max(case
                          when hubspot_id !~ '^[0-9]{{1,19}}$' then null
                          when hubspot_id::numeric <= 9223372036854775807 then hubspot_id::bigint
                        end)
             from {}",
            self.table
        );
        sqlx::query_scalar::<_, Option<i64>>(&sql)
            .fetch_one(conn)
            .await
            .map_err(|e| HubsyncError::Database(e.to_string()))
    }

    async fn insert_row(
        conn: &mut PgConnection,
        sql: &str,
        row: &ContactRow,
    ) -> HubsyncResult<u64> {
        let result = sqlx::query(sql)
            .bind(&row.hubspot_id)
            .bind(&row.first_name)
            .bind(&row.last_name)
            .bind(&row.email)
            .bind(&row.business_name)
            .bind(&row.vat_number)
            .bind(&row.country)
            .bind(row.number_of_users)
            .bind(&row.vendor)
            .bind(&row.lead_status)
            .bind(row.created_date)
            .bind(row.last_activity_date)
            .execute(conn)
            .await
            .map_err(|e| {
                HubsyncError::Database(format!("write of contact {} failed: {e}", row.hubspot_id))
            })?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ContactRepository for PgContactRepository {
    async fn max_numeric_id(&self) -> HubsyncResult<Option<i64>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| HubsyncError::Database(e.to_string()))?;
        self.query_max_numeric_id(&mut conn).await
    }

    /// One transaction per batch. Rows are written one statement at a time
    /// so that a repeated id inside a batch resolves like a re-run would.
    async fn write_batch(
        &self,
        rows: &[ContactRow],
        mode: WriteMode,
    ) -> HubsyncResult<WriteSummary> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HubsyncError::Database(e.to_string()))?;

        let mut summary = WriteSummary::default();

        let candidates: Vec<&ContactRow> = if mode == WriteMode::InsertIfNew {
            let watermark = self.query_max_numeric_id(&mut tx).await?;
            let (kept, skipped) = rows_above_watermark(rows, watermark)?;
            tracing::info!(
                watermark = ?watermark,
                skipped,
                candidates = kept.len(),
                "applied id watermark"
            );
            summary.watermark = watermark;
            summary.skipped_by_watermark = skipped;
            kept
        } else {
            rows.iter().collect()
        };

        let sql = self.insert_sql(mode);
        for row in candidates {
            match Self::insert_row(&mut tx, &sql, row).await? {
                0 => summary.unchanged += 1,
                n => summary.affected += n,
            }
        }

        tx.commit()
            .await
            .map_err(|e| HubsyncError::Database(e.to_string()))?;

        tracing::debug!(?summary, mode = %mode, "contact batch committed");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;
    use crate::schema::ensure_contacts_table;
    use chrono::{DateTime, Utc};
    use sqlx::postgres::PgConnectOptions;
    use sqlx::Row;
    use std::str::FromStr;

    struct TestTable {
        repo: PgContactRepository,
        pool: PgPool,
        table: String,
    }

    impl TestTable {
        async fn fetch(&self, id: &str) -> Option<ContactRow> {
            let sql = format!(
                "select hubspot_id, first_name, last_name, email, business_name, vat_number,
                        country, number_of_users, vendor, lead_status, created_date,
                        last_activity_date
                 from {} where hubspot_id = $1",
                self.table
            );
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .expect("select should work")?;
            Some(ContactRow {
                hubspot_id: row.get("hubspot_id"),
                first_name: row.get("first_name"),
                last_name: row.get("last_name"),
                email: row.get("email"),
                business_name: row.get("business_name"),
                vat_number: row.get("vat_number"),
                country: row.get("country"),
                number_of_users: row.get("number_of_users"),
                vendor: row.get("vendor"),
                lead_status: row.get("lead_status"),
                created_date: row.get("created_date"),
                last_activity_date: row.get("last_activity_date"),
            })
        }

        async fn count(&self) -> i64 {
            sqlx::query_scalar(&format!("select count(*) from {}", self.table))
                .fetch_one(&self.pool)
                .await
                .expect("count should work")
        }

        async fn cleanup(self) {
            let _ = sqlx::query(&format!("drop table if exists {}", self.table))
                .execute(&self.pool)
                .await;
        }
    }

    /// Each test gets its own table so that watermarks do not leak between
    /// tests running in parallel.
    async fn test_table(tag: &str) -> Option<TestTable> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let options = PgConnectOptions::from_str(&url).expect("valid TEST_DATABASE_URL");
        let pool = create_pool(options).await.expect("db should connect");

        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let table = format!("contacts_test_{tag}_{nanos}");
        ensure_contacts_table(&pool, &table).await.ok()?;

        let repo = PgContactRepository::with_table(pool.clone(), &table).expect("valid name");
        Some(TestTable { repo, pool, table })
    }

    fn contact(id: &str, email: &str) -> ContactRow {
        ContactRow {
            hubspot_id: id.to_string(),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            email: Some(email.to_string()),
            country: Some("GB".to_string()),
            number_of_users: 3,
            created_date: Some(
                DateTime::parse_from_rfc3339("2024-01-05T10:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn merge_inserts_then_overwrites() {
        let Some(t) = test_table("merge").await else {
            return;
        };

        let first = t
            .repo
            .write_batch(&[contact("1", "a@x.com")], WriteMode::Merge)
            .await
            .expect("first write");
        assert_eq!(first.affected, 1);

        let mut changed = contact("1", "b@x.com");
        changed.country = None;
        t.repo
            .write_batch(&[changed.clone()], WriteMode::Merge)
            .await
            .expect("second write");

        assert_eq!(t.fetch("1").await, Some(changed));
        t.cleanup().await;
    }

    #[tokio::test]
    async fn merge_twice_is_idempotent() {
        let Some(t) = test_table("idem").await else {
            return;
        };
        let batch = vec![contact("1", "a@x.com"), contact("2", "b@x.com")];

        t.repo.write_batch(&batch, WriteMode::Merge).await.expect("first");
        let once = (t.fetch("1").await, t.fetch("2").await, t.count().await);
        t.repo.write_batch(&batch, WriteMode::Merge).await.expect("second");
        let twice = (t.fetch("1").await, t.fetch("2").await, t.count().await);

        assert_eq!(once, twice);
        assert_eq!(twice.2, 2);
        t.cleanup().await;
    }

    #[tokio::test]
    async fn merge_refreshes_updated_at() {
        let Some(t) = test_table("touch").await else {
            return;
        };
        let sql = format!("select updated_at from {} where hubspot_id = '1'", t.table);

        t.repo
            .write_batch(&[contact("1", "a@x.com")], WriteMode::Merge)
            .await
            .expect("first");
        let before: DateTime<Utc> = sqlx::query_scalar(&sql).fetch_one(&t.pool).await.unwrap();
        t.repo
            .write_batch(&[contact("1", "a@x.com")], WriteMode::Merge)
            .await
            .expect("second");
        let after: DateTime<Utc> = sqlx::query_scalar(&sql).fetch_one(&t.pool).await.unwrap();

        assert!(after >= before);
        t.cleanup().await;
    }

    #[tokio::test]
    async fn insert_only_never_overwrites() {
        let Some(t) = test_table("ins_only").await else {
            return;
        };

        t.repo
            .write_batch(&[contact("1", "a@x.com")], WriteMode::InsertOnly)
            .await
            .expect("first");
        let second = t
            .repo
            .write_batch(&[contact("1", "b@x.com")], WriteMode::InsertOnly)
            .await
            .expect("second");

        assert_eq!(second.affected, 0);
        assert_eq!(second.unchanged, 1);
        let stored = t.fetch("1").await.expect("row exists");
        assert_eq!(stored.email.as_deref(), Some("a@x.com"));
        t.cleanup().await;
    }

    #[tokio::test]
    async fn insert_if_new_skips_ids_at_or_below_watermark() {
        let Some(t) = test_table("wm").await else {
            return;
        };
        t.repo
            .write_batch(&[contact("100", "seed@x.com")], WriteMode::Merge)
            .await
            .expect("seed");

        let summary = t
            .repo
            .write_batch(
                &[contact("57", "old@x.com"), contact("101", "new@x.com")],
                WriteMode::InsertIfNew,
            )
            .await
            .expect("watermark write");

        assert_eq!(summary.watermark, Some(100));
        assert_eq!(summary.skipped_by_watermark, 1);
        assert_eq!(summary.affected, 1);
        assert!(t.fetch("57").await.is_none());
        assert!(t.fetch("101").await.is_some());
        t.cleanup().await;
    }

    #[tokio::test]
    async fn insert_if_new_rejects_non_numeric_ids_without_writing() {
        let Some(t) = test_table("wm_bad").await else {
            return;
        };

        let err = t
            .repo
            .write_batch(
                &[contact("200", "a@x.com"), contact("c-9", "b@x.com")],
                WriteMode::InsertIfNew,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, HubsyncError::Validation(_)));
        assert_eq!(t.count().await, 0);
        t.cleanup().await;
    }

    #[tokio::test]
    async fn failed_row_rolls_back_whole_batch() {
        let Some(t) = test_table("rollback").await else {
            return;
        };

        // Postgres text cannot hold NUL, so the second row fails mid-batch.
        let err = t
            .repo
            .write_batch(
                &[contact("1", "a@x.com"), contact("2", "bad\0@x.com")],
                WriteMode::Merge,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, HubsyncError::Database(_)));
        assert_eq!(t.count().await, 0);
        t.cleanup().await;
    }

    #[tokio::test]
    async fn repeated_id_in_one_merge_batch_keeps_last() {
        let Some(t) = test_table("dup").await else {
            return;
        };

        let summary = t
            .repo
            .write_batch(
                &[contact("1", "a@x.com"), contact("1", "b@x.com")],
                WriteMode::Merge,
            )
            .await
            .expect("write");

        assert_eq!(summary.affected, 2);
        let stored = t.fetch("1").await.expect("row exists");
        assert_eq!(stored.email.as_deref(), Some("b@x.com"));
        t.cleanup().await;
    }

    #[tokio::test]
    async fn max_numeric_id_ignores_non_numeric_ids() {
        let Some(t) = test_table("max").await else {
            return;
        };
        assert_eq!(t.repo.max_numeric_id().await.unwrap(), None);

        t.repo
            .write_batch(
                &[contact("9", "a@x.com"), contact("42", "b@x.com"), contact("x-1000", "c@x.com")],
                WriteMode::Merge,
            )
            .await
            .expect("write");

        assert_eq!(t.repo.max_numeric_id().await.unwrap(), Some(42));
        t.cleanup().await;
    }

    #[tokio::test]
    async fn watermark_counts_nineteen_digit_ids() {
        let Some(t) = test_table("wm_wide").await else {
            return;
        };
        t.repo
            .write_batch(
                &[
                    contact("1000000000000000000", "big@x.com"),
                    contact("100", "small@x.com"),
                    // Past i64::MAX: stored under merge but never a watermark.
                    contact("9999999999999999999", "huge@x.com"),
                ],
                WriteMode::Merge,
            )
            .await
            .expect("seed");

        assert_eq!(
            t.repo.max_numeric_id().await.unwrap(),
            Some(1_000_000_000_000_000_000)
        );

        let summary = t
            .repo
            .write_batch(&[contact("500", "mid@x.com")], WriteMode::InsertIfNew)
            .await
            .expect("watermark write");

        assert_eq!(summary.watermark, Some(1_000_000_000_000_000_000));
        assert_eq!(summary.skipped_by_watermark, 1);
        assert_eq!(summary.affected, 0);
        assert!(t.fetch("500").await.is_none());
        t.cleanup().await;
    }

    #[tokio::test]
    async fn with_table_validates_name() {
        // Lazy pool: never connects, only used to build the repository.
        let pool = PgPool::connect_lazy("postgres://localhost/unused").expect("lazy pool");
        assert!(PgContactRepository::with_table(pool.clone(), "contacts_shadow").is_ok());
        assert!(PgContactRepository::with_table(pool.clone(), "x; drop table y").is_err());

        let repo = PgContactRepository::new(pool);
        assert!(repo.insert_sql(WriteMode::Merge).contains("email = excluded.email"));
        assert!(repo.insert_sql(WriteMode::InsertOnly).ends_with("do nothing"));
        assert!(repo.insert_sql(WriteMode::InsertIfNew).ends_with("do nothing"));
    }
}
