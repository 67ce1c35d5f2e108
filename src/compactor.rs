use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that rewrites a tenant's WAL once enough appends have
/// accumulated since the last compaction. Runs forever alongside the
/// engine; an error is logged and retried on the next tick.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rosterd_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compaction_shrinks_churned_wal() {
        let path = test_wal_path("churn.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path.clone(), notify).unwrap());

        let eid = Ulid::new();
        engine
            .create_employee(eid, "Ana".into(), "ana@example.com".into(), None, Role::Admin, true)
            .await
            .unwrap();

        // Churn: profile rewrites that all collapse into one event on compaction
        for i in 0..50 {
            engine
                .update_employee(
                    eid,
                    format!("Ana {i}"),
                    "ana@example.com".into(),
                    None,
                    Role::Admin,
                    true,
                )
                .await
                .unwrap();
        }

        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should shrink: {after} < {before}");
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
