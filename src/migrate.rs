//! Database schema migrations.
//!
//! Creates the extensions, text-search configuration, tables, generated
//! full-text column, and indexes, and ensures idempotent execution.
//! Designed to be run via `corpusd init`.
//!
//! The `full_text_vec` column is entirely database-maintained: a generated
//! weighted tsvector over record metadata and body text. The application
//! never writes it. `unaccent` is wrapped in an `IMMUTABLE` SQL function
//! because the bare function is only STABLE and Postgres rejects it inside
//! generated columns.

use anyhow::Result;
use sqlx::PgPool;

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;
    sqlx::query("CREATE EXTENSION IF NOT EXISTS unaccent")
        .execute(pool)
        .await?;

    // Accent-folding simple configuration for lexical match.
    sqlx::query(
        r#"
        DO $$
        BEGIN
            IF NOT EXISTS (
                SELECT 1 FROM pg_ts_config WHERE cfgname = 'simple_unaccent'
            ) THEN
                CREATE TEXT SEARCH CONFIGURATION simple_unaccent (COPY = simple);
                ALTER TEXT SEARCH CONFIGURATION simple_unaccent
                    ALTER MAPPING FOR hword, hword_part, word
                    WITH unaccent, simple;
            END IF;
        END
        $$
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE OR REPLACE FUNCTION f_unaccent(text)
        RETURNS text
        LANGUAGE sql IMMUTABLE PARALLEL SAFE STRICT
        AS $func$ SELECT public.unaccent('public.unaccent', $1) $func$
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS libraries (
            id BIGSERIAL PRIMARY KEY,
            uuid UUID NOT NULL UNIQUE,
            name TEXT NOT NULL,
            area TEXT,
            semantic_weight DOUBLE PRECISION NOT NULL,
            textual_weight DOUBLE PRECISION NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{}',
            active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            CHECK (semantic_weight >= 0 AND textual_weight >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id BIGSERIAL PRIMARY KEY,
            library_id BIGINT NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'generic',
            metadata JSONB NOT NULL DEFAULT '{}',
            active BOOLEAN NOT NULL DEFAULT FALSE,
            status TEXT NOT NULL DEFAULT 'PENDING',
            progress INTEGER NOT NULL DEFAULT 0,
            status_message TEXT,
            total_tokens BIGINT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // The versioning invariant: at most one active document per (library, title).
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_one_active
            ON documents(library_id, title) WHERE active
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chapters (
            id BIGSERIAL PRIMARY KEY,
            document_id BIGINT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            order_index INTEGER NOT NULL,
            token_count BIGINT NOT NULL,
            summary TEXT,
            UNIQUE(document_id, order_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS doc_embeddings (
            id BIGSERIAL PRIMARY KEY,
            library_id BIGINT NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
            document_id BIGINT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            chapter_id BIGINT REFERENCES chapters(id) ON DELETE CASCADE,
            text TEXT NOT NULL,
            order_in_chapter INTEGER NOT NULL DEFAULT 0,
            embedding_kind TEXT NOT NULL,
            vector vector NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{}',
            full_text_vec tsvector GENERATED ALWAYS AS (
                setweight(to_tsvector('simple', f_unaccent(coalesce(metadata->>'name', ''))), 'A') ||
                setweight(to_tsvector('simple', f_unaccent(coalesce(metadata->>'chapter_title', ''))), 'A') ||
                setweight(to_tsvector('simple', f_unaccent(coalesce(metadata->>'description', ''))), 'B') ||
                setweight(to_tsvector('simple', f_unaccent(coalesce(metadata->>'keywords', ''))), 'C') ||
                setweight(to_tsvector('simple', f_unaccent(coalesce(metadata->>'area', ''))), 'C') ||
                setweight(to_tsvector('simple', f_unaccent(text)), 'C') ||
                setweight(to_tsvector('simple', f_unaccent(coalesce(metadata->>'author', ''))), 'D')
            ) STORED
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_library_associations (
            user_id BIGINT NOT NULL,
            library_id BIGINT NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
            role TEXT NOT NULL,
            PRIMARY KEY (user_id, library_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_fts ON doc_embeddings USING GIN (full_text_vec)",
    )
    .execute(pool)
    .await?;
    // HNSW requires a typed dimension and dimensionality varies per library,
    // so per-dimension partial vector indexes are created on first write
    // (see store::ensure_vector_index).
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_library ON doc_embeddings(library_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_document ON doc_embeddings(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_chapter ON doc_embeddings(chapter_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chapters_document ON chapters(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_library ON documents(library_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_active ON documents(active)")
        .execute(pool)
        .await?;

    Ok(())
}
