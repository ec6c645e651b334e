use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::probe::session_result::{Role, SessionResult};

/// Persists a session's result after the session completed
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn append(&self, result: &SessionResult) -> anyhow::Result<()>;
}

/// Appends each session as one row of comma separated rates to a per-role CSV file in a
///  result directory: `stream_rates_rin.csv` for the Sender, `stream_rates_rout.csv` for the
///  Receiver.
pub struct CsvResultSink {
    dir: PathBuf,
}

impl CsvResultSink {
    pub fn new(dir: impl AsRef<Path>) -> CsvResultSink {
        CsvResultSink {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn file_path(&self, role: Role) -> PathBuf {
        let file_name = match role {
            Role::Sender => "stream_rates_rin.csv",
            Role::Receiver => "stream_rates_rout.csv",
        };
        self.dir.join(file_name)
    }
}

#[async_trait]
impl ResultSink for CsvResultSink {
    async fn append(&self, result: &SessionResult) -> anyhow::Result<()> {
        create_dir_all(&self.dir).await?;

        let path = self.file_path(result.role);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let mut row = result.to_csv_row();
        row.push('\n');
        file.write_all(row.as_bytes()).await?;
        file.flush().await?;

        info!("{} rates written to {:?}", result.role, path);
        Ok(())
    }
}
