use gridsync_core::RelationalTx;

use crate::error::SyncError;

/// Commit when `outcome` is `Ok`, roll back otherwise. A failed rollback is
/// logged and the original error returned; the connection is released
/// either way.
pub(crate) async fn settle<T>(
    tx: Box<dyn RelationalTx>,
    outcome: Result<T, SyncError>,
) -> Result<T, SyncError> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::error!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}
