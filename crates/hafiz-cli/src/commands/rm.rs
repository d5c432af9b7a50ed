//! rm command - remove objects

use super::CommandContext;
use crate::s3_client::S3Uri;
use crate::utils::confirm;
use anyhow::{Context, Result};
use colored::Colorize;
use hafiz_core::types::ObjectRef;
use hafiz_transfer::{BatchDelete, DeleteListIterator, TransferError};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct RmOptions {
    pub recursive: bool,
    /// Skip the confirmation prompt
    pub force: bool,
}

pub async fn execute(ctx: &CommandContext, path: &str, opts: RmOptions) -> Result<()> {
    let uri = S3Uri::parse(path)?;

    if uri.is_prefix() && !opts.recursive {
        anyhow::bail!("Cannot delete a prefix without --recursive flag");
    }

    if opts.recursive {
        delete_prefix(ctx, &uri, &opts).await
    } else {
        delete_object(ctx, &uri).await
    }
}

async fn delete_object(ctx: &CommandContext, uri: &S3Uri) -> Result<()> {
    let key = uri.key.as_ref().context("Object key required")?;

    let object = ObjectRef::new(&uri.bucket, key);

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => anyhow::bail!("Cancelled before deleting {}", uri),
        result = ctx.client.delete_object(&object) => {
            result.with_context(|| format!("Failed to delete {}", uri))?
        }
    }

    ctx.info(&format!("{} {}", "delete:".red(), uri));
    Ok(())
}

async fn delete_prefix(ctx: &CommandContext, uri: &S3Uri, opts: &RmOptions) -> Result<()> {
    if !opts.force && !ctx.quiet {
        let msg = format!("Delete every object under {}?", uri);
        if !confirm(&msg)? {
            ctx.info("Cancelled");
            return Ok(());
        }
    }

    let prefix = uri.key.clone();
    let mut iter = DeleteListIterator::new(Arc::clone(&ctx.client), &uri.bucket, prefix);
    let deleter = BatchDelete::new(Arc::clone(&ctx.client));

    match deleter.delete(&mut iter, &ctx.cancel).await {
        Ok(()) => {
            ctx.info(&format!("{} {}", "deleted:".red(), uri));
            Ok(())
        }
        Err(TransferError::Batch(batch)) => {
            for failure in &batch.failures {
                ctx.error(&format!(
                    "{} s3://{}/{}: {}",
                    "delete failed:".red().bold(),
                    failure.bucket,
                    failure.key,
                    failure.cause
                ));
            }
            if let Some(e) = &batch.iteration_error {
                ctx.error(&format!("{} {}", "listing stopped:".red().bold(), e));
            }
            anyhow::bail!(
                "{} of the objects under {} could not be deleted",
                batch.failures.len(),
                uri
            )
        }
        Err(e) => Err(e).with_context(|| format!("Failed to delete {}", uri)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::context;
    use hafiz_storage::MemoryStorage;

    fn storage() -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new().with_page_size(2));
        storage.create_bucket("bucket");
        for key in ["logs/a", "logs/b", "logs/c", "logs/d", "keep/e"] {
            storage.insert_object("bucket", key, key.as_bytes().to_vec());
        }
        storage
    }

    #[tokio::test]
    async fn test_delete_single_object() {
        let storage = storage();
        let ctx = context(&storage);

        execute(&ctx, "s3://bucket/logs/a", RmOptions::default())
            .await
            .unwrap();

        assert!(storage.object_data("bucket", "logs/a").is_none());
        assert_eq!(storage.object_count("bucket"), 4);
    }

    #[tokio::test]
    async fn test_cancelled_delete_keeps_object() {
        let storage = storage();
        let ctx = context(&storage);
        ctx.cancel.cancel();

        let err = execute(&ctx, "s3://bucket/logs/a", RmOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Cancelled"));
        assert!(storage.object_data("bucket", "logs/a").is_some());
    }

    #[tokio::test]
    async fn test_prefix_requires_recursive() {
        let storage = storage();
        let ctx = context(&storage);

        assert!(execute(&ctx, "s3://bucket/logs/", RmOptions::default())
            .await
            .is_err());
        assert_eq!(storage.object_count("bucket"), 5);
    }

    #[tokio::test]
    async fn test_recursive_delete_spans_pages() {
        let storage = storage();
        let ctx = context(&storage);
        let opts = RmOptions {
            recursive: true,
            force: true,
        };

        execute(&ctx, "s3://bucket/logs/", opts).await.unwrap();

        assert_eq!(storage.object_count("bucket"), 1);
        assert!(storage.object_data("bucket", "keep/e").is_some());
    }
}
