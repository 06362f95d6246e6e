use crate::pool::DbPool;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Apply pending SQL migrations from `crates/database/migrations`
pub async fn run(pool: &DbPool) -> anyhow::Result<()> {
    let mut client = pool.get().await?;
    let report = embedded::migrations::runner()
        .run_async(&mut **client)
        .await?;

    for migration in report.applied_migrations() {
        tracing::info!(
            "Applied migration: version={}, name={}",
            migration.version(),
            migration.name()
        );
    }
    Ok(())
}
