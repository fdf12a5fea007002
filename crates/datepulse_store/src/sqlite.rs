use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use datepulse_core::{
    AssignmentMethod, BehaviorCluster, ClusterMembership, ContentItem, DerivedOpportunity,
    Embedding, IngestionRun, Language, OpportunityCard, OpportunityStatus, Persona,
    PersonaClusterLink, Store,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// SQLite caps bound parameters per statement; id lists are chunked below it.
const MAX_BIND_CHUNK: usize = 500;

const CONTENT_COLUMNS: &str =
    "id, platform, source_id, title, body, published_at, language, embedding, metadata_json";

const SCHEMA: &[(&str, &str)] = &[
    (
        "content_items",
        r#"
        CREATE TABLE IF NOT EXISTS content_items (
            id TEXT PRIMARY KEY,
            platform TEXT NOT NULL,
            source_id TEXT NOT NULL,
            title TEXT,
            body TEXT NOT NULL,
            published_at INTEGER NOT NULL,
            language TEXT NOT NULL DEFAULT 'unknown',
            embedding BLOB,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            UNIQUE(platform, source_id)
        );
        "#,
    ),
    (
        "content language index",
        "CREATE INDEX IF NOT EXISTS idx_content_language_published ON content_items(language, published_at)",
    ),
    (
        "behavior_clusters",
        r#"
        CREATE TABLE IF NOT EXISTS behavior_clusters (
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            summary TEXT NOT NULL,
            top_phrases_json TEXT NOT NULL,
            content_count_total INTEGER NOT NULL,
            content_count_last_7d INTEGER NOT NULL,
            source_breakdown_json TEXT NOT NULL,
            centroid BLOB NOT NULL,
            growth_score REAL NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            CHECK (content_count_last_7d <= content_count_total)
        );
        "#,
    ),
    (
        "cluster_memberships",
        r#"
        CREATE TABLE IF NOT EXISTS cluster_memberships (
            cluster_id TEXT NOT NULL,
            content_id TEXT NOT NULL,
            similarity REAL NOT NULL,
            assigned_at INTEGER NOT NULL,
            PRIMARY KEY (cluster_id, content_id),
            FOREIGN KEY(cluster_id) REFERENCES behavior_clusters(id) ON DELETE CASCADE,
            FOREIGN KEY(content_id) REFERENCES content_items(id) ON DELETE CASCADE
        );
        "#,
    ),
    (
        "personas",
        r#"
        CREATE TABLE IF NOT EXISTS personas (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL,
            keywords_json TEXT NOT NULL,
            pain_points_json TEXT NOT NULL,
            typical_behaviors_json TEXT NOT NULL,
            goals_json TEXT NOT NULL
        );
        "#,
    ),
    (
        "persona_cluster_links",
        r#"
        CREATE TABLE IF NOT EXISTS persona_cluster_links (
            persona_id TEXT NOT NULL,
            cluster_id TEXT NOT NULL,
            association_score REAL NOT NULL,
            assignment_method TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (persona_id, cluster_id),
            FOREIGN KEY(persona_id) REFERENCES personas(id) ON DELETE CASCADE,
            FOREIGN KEY(cluster_id) REFERENCES behavior_clusters(id) ON DELETE CASCADE
        );
        "#,
    ),
    (
        "opportunity_cards",
        r#"
        CREATE TABLE IF NOT EXISTS opportunity_cards (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            problem_statement TEXT NOT NULL,
            signals_summary TEXT NOT NULL,
            why_now TEXT NOT NULL,
            status TEXT NOT NULL,
            severity TEXT NOT NULL,
            confidence REAL NOT NULL,
            notes TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    ),
    (
        "opportunity_clusters",
        r#"
        CREATE TABLE IF NOT EXISTS opportunity_clusters (
            opportunity_id TEXT NOT NULL,
            cluster_id TEXT NOT NULL,
            PRIMARY KEY (opportunity_id, cluster_id),
            FOREIGN KEY(opportunity_id) REFERENCES opportunity_cards(id) ON DELETE CASCADE,
            FOREIGN KEY(cluster_id) REFERENCES behavior_clusters(id) ON DELETE CASCADE
        );
        "#,
    ),
    (
        "opportunity_personas",
        r#"
        CREATE TABLE IF NOT EXISTS opportunity_personas (
            opportunity_id TEXT NOT NULL,
            persona_id TEXT NOT NULL,
            PRIMARY KEY (opportunity_id, persona_id),
            FOREIGN KEY(opportunity_id) REFERENCES opportunity_cards(id) ON DELETE CASCADE,
            FOREIGN KEY(persona_id) REFERENCES personas(id) ON DELETE CASCADE
        );
        "#,
    ),
    (
        "ingestion_runs",
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_runs (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            items_processed INTEGER NOT NULL DEFAULT 0,
            items_ingested INTEGER NOT NULL DEFAULT 0,
            error TEXT
        );
        "#,
    ),
];

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        Self::connect(options, 5).await
    }

    /// A private database living as long as the store. A single connection
    /// keeps every query on the same in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("Failed to build in-memory SQLite options")?;
        Self::connect(options, 1).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON").execute(conn).await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for (name, ddl) in SCHEMA {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to create {}", name))?;
        }
        Ok(())
    }
}

// =============================================================================
// Row codecs
// =============================================================================

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .with_context(|| format!("Invalid timestamp {}", ms))
}

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).with_context(|| format!("Invalid uuid in column {}", column))
}

fn encode_embedding(embedding: &Embedding) -> Result<Vec<u8>> {
    bincode::serialize(embedding.as_slice()).context("Failed to serialize embedding")
}

/// Malformed blobs are treated as missing rather than failing the whole read.
fn decode_embedding(blob: Option<Vec<u8>>) -> Option<Embedding> {
    let blob = blob?;
    let values = match bincode::deserialize::<Vec<f32>>(&blob) {
        Ok(values) => values,
        Err(e) => {
            tracing::warn!("Dropping undecodable embedding blob: {}", e);
            return None;
        }
    };
    match Embedding::new(values) {
        Ok(embedding) => Some(embedding),
        Err(e) => {
            tracing::warn!("Dropping invalid embedding: {}", e);
            None
        }
    }
}

fn content_from_row(row: &SqliteRow) -> Result<ContentItem> {
    let platform: String = row.try_get("platform")?;
    let language: String = row.try_get("language")?;
    let metadata_json: String = row.try_get("metadata_json")?;
    Ok(ContentItem {
        id: parse_uuid(row, "id")?,
        platform: platform.parse()?,
        source_id: row.try_get("source_id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        published_at: millis_to_datetime(row.try_get("published_at")?)?,
        language: language.parse()?,
        embedding: decode_embedding(row.try_get("embedding")?),
        metadata: serde_json::from_str(&metadata_json)
            .context("Failed to deserialize content metadata")?,
    })
}

fn cluster_from_row(row: &SqliteRow) -> Result<BehaviorCluster> {
    let top_phrases_json: String = row.try_get("top_phrases_json")?;
    let breakdown_json: String = row.try_get("source_breakdown_json")?;
    let centroid_blob: Vec<u8> = row.try_get("centroid")?;
    let centroid_values: Vec<f32> =
        bincode::deserialize(&centroid_blob).context("Failed to deserialize centroid")?;
    let total: i64 = row.try_get("content_count_total")?;
    let last_7d: i64 = row.try_get("content_count_last_7d")?;
    Ok(BehaviorCluster {
        id: parse_uuid(row, "id")?,
        label: row.try_get("label")?,
        summary: row.try_get("summary")?,
        top_phrases: serde_json::from_str(&top_phrases_json)
            .context("Failed to deserialize top phrases")?,
        content_count_total: total as u32,
        content_count_last_7d: last_7d as u32,
        source_breakdown: serde_json::from_str(&breakdown_json)
            .context("Failed to deserialize source breakdown")?,
        centroid: Embedding::new(centroid_values).context("Stored centroid is invalid")?,
        growth_score: row.try_get("growth_score")?,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
        updated_at: millis_to_datetime(row.try_get("updated_at")?)?,
    })
}

fn persona_from_row(row: &SqliteRow) -> Result<Persona> {
    let list = |column: &str| -> Result<Vec<String>> {
        let raw: String = row.try_get(column)?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to deserialize {}", column))
    };
    Ok(Persona {
        id: parse_uuid(row, "id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        keywords: list("keywords_json")?,
        pain_points: list("pain_points_json")?,
        typical_behaviors: list("typical_behaviors_json")?,
        goals: list("goals_json")?,
    })
}

fn link_from_row(row: &SqliteRow) -> Result<PersonaClusterLink> {
    let method: String = row.try_get("assignment_method")?;
    Ok(PersonaClusterLink {
        persona_id: parse_uuid(row, "persona_id")?,
        cluster_id: parse_uuid(row, "cluster_id")?,
        association_score: row.try_get("association_score")?,
        assignment_method: AssignmentMethod::from_str(&method)?,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
    })
}

fn opportunity_from_row(row: &SqliteRow) -> Result<OpportunityCard> {
    let status: String = row.try_get("status")?;
    let severity: String = row.try_get("severity")?;
    Ok(OpportunityCard {
        id: parse_uuid(row, "id")?,
        title: row.try_get("title")?,
        problem_statement: row.try_get("problem_statement")?,
        signals_summary: row.try_get("signals_summary")?,
        why_now: row.try_get("why_now")?,
        status: status.parse()?,
        severity: severity.parse()?,
        confidence: row.try_get("confidence")?,
        notes: row.try_get("notes")?,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
        updated_at: millis_to_datetime(row.try_get("updated_at")?)?,
    })
}

fn run_from_row(row: &SqliteRow) -> Result<IngestionRun> {
    let status: String = row.try_get("status")?;
    let completed_at: Option<i64> = row.try_get("completed_at")?;
    let processed: i64 = row.try_get("items_processed")?;
    let ingested: i64 = row.try_get("items_ingested")?;
    Ok(IngestionRun {
        id: parse_uuid(row, "id")?,
        source: row.try_get("source")?,
        status: status.parse()?,
        started_at: millis_to_datetime(row.try_get("started_at")?)?,
        completed_at: completed_at.map(millis_to_datetime).transpose()?,
        items_processed: processed as u32,
        items_ingested: ingested as u32,
        error: row.try_get("error")?,
    })
}

// =============================================================================
// Store
// =============================================================================

#[async_trait]
impl Store for SqliteStore {
    async fn insert_content(&self, item: &ContentItem) -> Result<bool> {
        let embedding_blob = item.embedding.as_ref().map(encode_embedding).transpose()?;
        let metadata_json =
            serde_json::to_string(&item.metadata).context("Failed to serialize metadata")?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO content_items
                (id, platform, source_id, title, body, published_at, language, embedding, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.platform.as_str())
        .bind(&item.source_id)
        .bind(&item.title)
        .bind(&item.body)
        .bind(item.published_at.timestamp_millis())
        .bind(item.language.as_str())
        .bind(embedding_blob)
        .bind(metadata_json)
        .execute(&self.pool)
        .await
        .context("Failed to insert content item")?;

        Ok(result.rows_affected() > 0)
    }

    async fn content_by_language(&self, language: Language) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM content_items WHERE language = ? ORDER BY published_at, id",
            CONTENT_COLUMNS
        ))
        .bind(language.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch content by language")?;

        rows.iter().map(content_from_row).collect()
    }

    async fn set_language(&self, id: Uuid, language: Language) -> Result<()> {
        sqlx::query("UPDATE content_items SET language = ? WHERE id = ?")
            .bind(language.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update content language")?;
        Ok(())
    }

    async fn delete_content(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM content_items WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete content item")?;
        Ok(())
    }

    async fn content_needing_embedding(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM content_items
            WHERE language = 'en' AND embedding IS NULL AND published_at >= ?
            ORDER BY published_at, id
            LIMIT ?
            "#,
            CONTENT_COLUMNS
        ))
        .bind(since.timestamp_millis())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch content needing embeddings")?;

        rows.iter().map(content_from_row).collect()
    }

    async fn set_embedding(&self, id: Uuid, embedding: Option<&Embedding>) -> Result<()> {
        let blob = embedding.map(encode_embedding).transpose()?;
        sqlx::query("UPDATE content_items SET embedding = ? WHERE id = ?")
            .bind(blob)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to store embedding")?;
        Ok(())
    }

    async fn embedded_content(&self, since: DateTime<Utc>) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM content_items
            WHERE language = 'en' AND embedding IS NOT NULL AND published_at >= ?
            ORDER BY published_at, id
            "#,
            CONTENT_COLUMNS
        ))
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch embedded content")?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let item = content_from_row(row)?;
            // A blob that failed validation decodes to None; skip it.
            if item.embedding.is_some() {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn content_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ContentItem>> {
        let mut items = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_BIND_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "SELECT {} FROM content_items WHERE id IN (",
                CONTENT_COLUMNS
            ));
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.to_string());
            }
            separated.push_unseparated(") ORDER BY published_at, id");

            let rows = builder
                .build()
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch content by ids")?;
            for row in &rows {
                items.push(content_from_row(row)?);
            }
        }
        Ok(items)
    }

    async fn cluster_sample(&self, cluster_id: Uuid, limit: usize) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.platform, c.source_id, c.title, c.body, c.published_at,
                   c.language, c.embedding, c.metadata_json
            FROM content_items c
            JOIN cluster_memberships m ON m.content_id = c.id
            WHERE m.cluster_id = ?
            ORDER BY m.similarity DESC, c.id
            LIMIT ?
            "#,
        )
        .bind(cluster_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to sample cluster members")?;

        rows.iter().map(content_from_row).collect()
    }

    async fn list_clusters(&self) -> Result<Vec<BehaviorCluster>> {
        let rows = sqlx::query("SELECT * FROM behavior_clusters ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list clusters")?;
        rows.iter().map(cluster_from_row).collect()
    }

    async fn get_cluster(&self, id: Uuid) -> Result<Option<BehaviorCluster>> {
        let row = sqlx::query("SELECT * FROM behavior_clusters WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch cluster")?;
        row.as_ref().map(cluster_from_row).transpose()
    }

    async fn insert_cluster(&self, cluster: &BehaviorCluster) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO behavior_clusters
                (id, label, summary, top_phrases_json, content_count_total, content_count_last_7d,
                 source_breakdown_json, centroid, growth_score, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(cluster.id.to_string())
        .bind(&cluster.label)
        .bind(&cluster.summary)
        .bind(serde_json::to_string(&cluster.top_phrases)?)
        .bind(cluster.content_count_total as i64)
        .bind(cluster.content_count_last_7d as i64)
        .bind(serde_json::to_string(&cluster.source_breakdown)?)
        .bind(encode_embedding(&cluster.centroid)?)
        .bind(cluster.growth_score)
        .bind(cluster.created_at.timestamp_millis())
        .bind(cluster.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert cluster")?;
        Ok(())
    }

    async fn update_cluster(&self, cluster: &BehaviorCluster) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE behavior_clusters SET
                label = ?, summary = ?, top_phrases_json = ?, content_count_total = ?,
                content_count_last_7d = ?, source_breakdown_json = ?, centroid = ?,
                growth_score = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&cluster.label)
        .bind(&cluster.summary)
        .bind(serde_json::to_string(&cluster.top_phrases)?)
        .bind(cluster.content_count_total as i64)
        .bind(cluster.content_count_last_7d as i64)
        .bind(serde_json::to_string(&cluster.source_breakdown)?)
        .bind(encode_embedding(&cluster.centroid)?)
        .bind(cluster.growth_score)
        .bind(cluster.updated_at.timestamp_millis())
        .bind(cluster.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update cluster")?;
        Ok(())
    }

    async fn cluster_member_ids(&self, cluster_id: Uuid) -> Result<Vec<Uuid>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT content_id FROM cluster_memberships WHERE cluster_id = ? ORDER BY content_id",
        )
        .bind(cluster_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch cluster member ids")?;

        ids.into_iter()
            .map(|(id,)| Uuid::parse_str(&id).context("Invalid member id"))
            .collect()
    }

    async fn upsert_membership(&self, membership: &ClusterMembership) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_memberships (cluster_id, content_id, similarity, assigned_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(cluster_id, content_id) DO UPDATE SET
                similarity = excluded.similarity,
                assigned_at = excluded.assigned_at
            "#,
        )
        .bind(membership.cluster_id.to_string())
        .bind(membership.content_id.to_string())
        .bind(membership.similarity as f64)
        .bind(membership.assigned_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to upsert cluster membership")?;
        Ok(())
    }

    async fn list_personas(&self) -> Result<Vec<Persona>> {
        let rows = sqlx::query("SELECT * FROM personas ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list personas")?;
        rows.iter().map(persona_from_row).collect()
    }

    async fn upsert_persona(&self, persona: &Persona) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO personas
                (id, name, description, keywords_json, pain_points_json, typical_behaviors_json, goals_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                keywords_json = excluded.keywords_json,
                pain_points_json = excluded.pain_points_json,
                typical_behaviors_json = excluded.typical_behaviors_json,
                goals_json = excluded.goals_json
            "#,
        )
        .bind(persona.id.to_string())
        .bind(&persona.name)
        .bind(&persona.description)
        .bind(serde_json::to_string(&persona.keywords)?)
        .bind(serde_json::to_string(&persona.pain_points)?)
        .bind(serde_json::to_string(&persona.typical_behaviors)?)
        .bind(serde_json::to_string(&persona.goals)?)
        .execute(&self.pool)
        .await
        .context("Failed to upsert persona")?;
        Ok(())
    }

    async fn persona_links(&self, cluster_id: Uuid) -> Result<Vec<PersonaClusterLink>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM persona_cluster_links
            WHERE cluster_id = ?
            ORDER BY association_score DESC, persona_id
            "#,
        )
        .bind(cluster_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch persona links")?;
        rows.iter().map(link_from_row).collect()
    }

    async fn replace_persona_links(
        &self,
        cluster_id: Uuid,
        links: &[PersonaClusterLink],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM persona_cluster_links WHERE cluster_id = ?")
            .bind(cluster_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to clear persona links")?;

        for link in links {
            sqlx::query(
                r#"
                INSERT INTO persona_cluster_links
                    (persona_id, cluster_id, association_score, assignment_method, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(link.persona_id.to_string())
            .bind(cluster_id.to_string())
            .bind(link.association_score)
            .bind(link.assignment_method.as_str())
            .bind(link.created_at.timestamp_millis())
            .execute(&mut *tx)
            .await
            .context("Failed to insert persona link")?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn opportunity_for_cluster(&self, cluster_id: Uuid) -> Result<Option<OpportunityCard>> {
        let row = sqlx::query(
            r#"
            SELECT o.* FROM opportunity_cards o
            JOIN opportunity_clusters oc ON oc.opportunity_id = o.id
            WHERE oc.cluster_id = ?
            ORDER BY o.created_at
            LIMIT 1
            "#,
        )
        .bind(cluster_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up opportunity for cluster")?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    async fn create_opportunity(
        &self,
        card: &OpportunityCard,
        cluster_id: Uuid,
        persona_ids: &[Uuid],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO opportunity_cards
                (id, title, problem_statement, signals_summary, why_now, status, severity,
                 confidence, notes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(card.id.to_string())
        .bind(&card.title)
        .bind(&card.problem_statement)
        .bind(&card.signals_summary)
        .bind(&card.why_now)
        .bind(card.status.as_str())
        .bind(card.severity.as_str())
        .bind(card.confidence)
        .bind(&card.notes)
        .bind(card.created_at.timestamp_millis())
        .bind(card.updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .context("Failed to insert opportunity card")?;

        sqlx::query("INSERT INTO opportunity_clusters (opportunity_id, cluster_id) VALUES (?, ?)")
            .bind(card.id.to_string())
            .bind(cluster_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to link opportunity to cluster")?;

        for persona_id in persona_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO opportunity_personas (opportunity_id, persona_id) VALUES (?, ?)",
            )
            .bind(card.id.to_string())
            .bind(persona_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to link opportunity to persona")?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_opportunity_derived(
        &self,
        id: Uuid,
        derived: &DerivedOpportunity,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE opportunity_cards SET
                title = ?, problem_statement = ?, signals_summary = ?, why_now = ?,
                severity = ?, confidence = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&derived.title)
        .bind(&derived.problem_statement)
        .bind(&derived.signals_summary)
        .bind(&derived.why_now)
        .bind(derived.severity.as_str())
        .bind(derived.confidence)
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update opportunity")?;
        Ok(())
    }

    async fn set_opportunity_status(
        &self,
        id: Uuid,
        status: OpportunityStatus,
        notes: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE opportunity_cards SET status = ?, notes = COALESCE(?, notes), updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(notes)
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update opportunity status")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_opportunities(&self) -> Result<Vec<OpportunityCard>> {
        let rows = sqlx::query("SELECT * FROM opportunity_cards ORDER BY updated_at DESC, id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list opportunities")?;
        rows.iter().map(opportunity_from_row).collect()
    }

    async fn record_run(&self, run: &IngestionRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_runs
                (id, source, status, started_at, completed_at, items_processed, items_ingested, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                completed_at = excluded.completed_at,
                items_processed = excluded.items_processed,
                items_ingested = excluded.items_ingested,
                error = excluded.error
            "#,
        )
        .bind(run.id.to_string())
        .bind(&run.source)
        .bind(run.status.as_str())
        .bind(run.started_at.timestamp_millis())
        .bind(run.completed_at.map(|t| t.timestamp_millis()))
        .bind(run.items_processed as i64)
        .bind(run.items_ingested as i64)
        .bind(&run.error)
        .execute(&self.pool)
        .await
        .context("Failed to record ingestion run")?;
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<IngestionRun>> {
        let rows = sqlx::query("SELECT * FROM ingestion_runs ORDER BY started_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list ingestion runs")?;
        rows.iter().map(run_from_row).collect()
    }
}
