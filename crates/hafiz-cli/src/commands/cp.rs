//! cp command - copy files to/from S3

use super::CommandContext;
use crate::progress::transfer_summary;
use crate::s3_client::{S3Uri, TransferDirection};
use crate::utils::{determine_dest_key, guess_content_type, local_dest_path, relative_key};
use anyhow::{Context, Result};
use colored::Colorize;
use hafiz_core::types::{CopySource, ObjectAttributes};
use hafiz_transfer::{
    BatchUploadObject, BufferPool, Copier, CopyInput, DownloadInput, Downloader, FileSink,
    ObjectsIterator, UploadInput, Uploader,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct CpOptions {
    pub recursive: bool,
    pub content_type: Option<String>,
}

pub async fn execute(
    ctx: &CommandContext,
    source: &str,
    destination: &str,
    opts: CpOptions,
) -> Result<()> {
    let direction = TransferDirection::determine(source, destination);

    match direction {
        TransferDirection::Upload => upload(ctx, source, destination, &opts).await,
        TransferDirection::Download => download(ctx, source, destination, &opts).await,
        TransferDirection::S3ToS3 => s3_copy(ctx, source, destination, &opts).await,
        TransferDirection::LocalToLocal => {
            anyhow::bail!("Local to local copy is not supported. Use system cp command.")
        }
    }
}

async fn upload(
    ctx: &CommandContext,
    source: &str,
    destination: &str,
    opts: &CpOptions,
) -> Result<()> {
    let dest_uri = S3Uri::parse(destination)?;
    let source_path = Path::new(source);

    if !source_path.exists() {
        anyhow::bail!("Source path does not exist: {}", source);
    }

    if source_path.is_file() {
        upload_file(ctx, source_path, &dest_uri, opts).await
    } else if source_path.is_dir() {
        if !opts.recursive {
            anyhow::bail!("Cannot copy directory without --recursive flag");
        }
        upload_directory(ctx, source_path, &dest_uri, opts).await
    } else {
        anyhow::bail!("Source is neither a file nor a directory: {}", source);
    }
}

fn attributes_for(path: &str, opts: &CpOptions) -> ObjectAttributes {
    let content_type = opts
        .content_type
        .clone()
        .unwrap_or_else(|| guess_content_type(path));
    ObjectAttributes::default().with_content_type(content_type)
}

async fn upload_file(
    ctx: &CommandContext,
    source: &Path,
    dest_uri: &S3Uri,
    opts: &CpOptions,
) -> Result<()> {
    let source_str = source.to_string_lossy();
    let key = determine_dest_key(&source_str, dest_uri.key.as_deref(), dest_uri.is_prefix());
    let size = tokio::fs::metadata(source)
        .await
        .with_context(|| format!("Failed to stat {}", source_str))?
        .len();

    let uploader = Uploader::new(Arc::clone(&ctx.client), ctx.transfer.upload.clone());
    let input = UploadInput::new(&dest_uri.bucket, &key, source.to_path_buf())
        .with_attributes(attributes_for(&source_str, opts));

    let pb = ctx.spinner(&format!("upload: {}", source_str));
    let started = Instant::now();
    let result = uploader.upload(input, &ctx.cancel).await;
    pb.finish_and_clear();
    let output = result.with_context(|| format!("Failed to upload {}", source_str))?;

    debug!("Upload of {} finished with ETag {:?}", key, output.etag);
    ctx.info(&format!(
        "{} {} -> s3://{}/{} ({})",
        "upload:".green(),
        source_str,
        dest_uri.bucket,
        key,
        transfer_summary(size, started.elapsed())
    ));
    Ok(())
}

async fn upload_directory(
    ctx: &CommandContext,
    source: &Path,
    dest_uri: &S3Uri,
    opts: &CpOptions,
) -> Result<()> {
    let prefix = dest_uri.key.as_deref().unwrap_or("");
    let mut items = Vec::new();

    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to walk {:?}", source))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path: PathBuf = entry.into_path();
        let key = relative_key(source, &path, prefix)?;
        let display = path.to_string_lossy().to_string();
        let input = UploadInput::new(&dest_uri.bucket, &key, path.clone())
            .with_attributes(attributes_for(&display, opts));

        let quiet = ctx.quiet;
        let target = format!("s3://{}/{}", dest_uri.bucket, key);
        items.push(BatchUploadObject::new(input).with_after(move || {
            if !quiet {
                println!("{} {} -> {}", "upload:".green(), display, target);
            }
            Ok(())
        }));
    }

    if items.is_empty() {
        ctx.info("Nothing to upload");
        return Ok(());
    }

    let count = items.len();
    let part_size = usize::try_from(ctx.transfer.upload.part_size)
        .context("Part size does not fit in memory")?;
    let pool = BufferPool::new(part_size, 0);
    let uploader = Uploader::new(Arc::clone(&ctx.client), ctx.transfer.upload.clone())
        .with_shared_buffer_pool(pool);

    let mut iter: ObjectsIterator<BatchUploadObject> = items.into_iter().collect();
    uploader.upload_with_iterator(&mut iter, &ctx.cancel).await?;

    ctx.info(&format!("Uploaded {} files", count));
    Ok(())
}

async fn download(
    ctx: &CommandContext,
    source: &str,
    destination: &str,
    opts: &CpOptions,
) -> Result<()> {
    let source_uri = S3Uri::parse(source)?;
    if opts.recursive || source_uri.is_prefix() {
        anyhow::bail!("Recursive download is not supported; name a single object");
    }
    let key = source_uri.key.as_deref().context("Object key required")?;

    let path = local_dest_path(destination, key);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let sink = Arc::new(
        FileSink::create(&path)
            .await
            .with_context(|| format!("Failed to create {:?}", path))?,
    );
    let downloader = Downloader::new(Arc::clone(&ctx.client), ctx.transfer.download.clone());
    let input = DownloadInput::new(&source_uri.bucket, key);

    let pb = ctx.spinner(&format!("download: {}", source));
    let started = Instant::now();
    let result = downloader.download(sink.clone(), &input, &ctx.cancel).await;
    pb.finish_and_clear();

    let written = match result {
        Ok(written) => written,
        Err(e) => {
            drop(sink);
            if let Err(remove) = tokio::fs::remove_file(&path).await {
                debug!("Could not remove partial file {:?}: {}", path, remove);
            }
            return Err(e).with_context(|| format!("Failed to download {}", source));
        }
    };
    sink.flush().await?;

    ctx.info(&format!(
        "{} {} -> {} ({})",
        "download:".green(),
        source,
        path.display(),
        transfer_summary(written, started.elapsed())
    ));
    Ok(())
}

async fn s3_copy(
    ctx: &CommandContext,
    source: &str,
    destination: &str,
    opts: &CpOptions,
) -> Result<()> {
    let source_uri = S3Uri::parse(source)?;
    let dest_uri = S3Uri::parse(destination)?;
    if opts.recursive || source_uri.is_prefix() {
        anyhow::bail!("Recursive copy is not supported; name a single object");
    }
    let source_key = source_uri.key.as_deref().context("Object key required")?;
    let dest_key = determine_dest_key(source_key, dest_uri.key.as_deref(), dest_uri.is_prefix());

    let copy_source = CopySource::new(&source_uri.bucket, source_key).to_header();
    let mut input = CopyInput::new(&dest_uri.bucket, &dest_key, copy_source);
    if let Some(content_type) = &opts.content_type {
        input = input.with_replaced_attributes(
            ObjectAttributes::default().with_content_type(content_type.clone()),
        );
    }

    let copier = Copier::new(Arc::clone(&ctx.client), ctx.transfer.copy.clone());
    let pb = ctx.spinner(&format!("copy: {}", source));
    let result = copier.copy(input, &ctx.cancel).await;
    pb.finish_and_clear();
    result.with_context(|| format!("Failed to copy {}", source))?;

    ctx.info(&format!(
        "{} {} -> s3://{}/{}",
        "copy:".green(),
        source,
        dest_uri.bucket,
        dest_key
    ));
    Ok(())
}
