use sqlx::{PgPool, Row};

/// Fetch the encrypted IMAI API key stored for a shop
pub async fn get_encrypted_key(pool: &PgPool, shop: &str) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query("SELECT encrypted_key FROM api_keys WHERE shop = $1")
        .bind(shop)
        .fetch_optional(pool)
        .await?;

    row.map(|r| r.try_get("encrypted_key")).transpose()
}

/// Store (or replace) the encrypted IMAI API key for a shop
pub async fn upsert_encrypted_key(
    pool: &PgPool,
    shop: &str,
    encrypted_key: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO api_keys (shop, encrypted_key)
        VALUES ($1, $2)
        ON CONFLICT (shop) DO UPDATE
        SET encrypted_key = EXCLUDED.encrypted_key,
            updated_at = NOW()
        "#,
    )
    .bind(shop)
    .bind(encrypted_key)
    .execute(pool)
    .await?;

    Ok(())
}
