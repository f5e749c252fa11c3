use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use ripsy::{
    config,
    embedding::{EmbeddingClient, get_embedding_client},
    extraction::{PdfTextExtractor, TextExtractor},
    logging,
    processing::chunking::chunk,
    qdrant::{FragmentInsert, QdrantService},
};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "ingest-fragments",
    about = "Index a directory of regulatory PDFs into the fragment store"
)]
struct Cli {
    /// Directory searched recursively for `*.pdf` files.
    dir: PathBuf,
    /// Collection receiving the fragments.
    #[arg(long, env = "QDRANT_COLLECTION_NAME")]
    collection: Option<String>,
    /// Maximum characters per fragment; defaults to `CONTEXT_CHUNK_CHARS`.
    #[arg(long)]
    chunk_chars: Option<usize>,
    /// Fragments embedded per provider request.
    #[arg(long, default_value_t = 16)]
    batch_size: usize,
    /// Extract and chunk only; nothing is embedded or written.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Default)]
struct Summary {
    documents: usize,
    skipped: usize,
    fragments: usize,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();

    if cli.batch_size == 0 {
        bail!("--batch-size must be greater than zero");
    }
    let collection = cli
        .collection
        .clone()
        .unwrap_or_else(|| config.qdrant_collection_name.clone());
    let chunk_chars = cli.chunk_chars.unwrap_or(config.context_chunk_chars);

    let documents = find_pdfs(&cli.dir)?;
    if documents.is_empty() {
        bail!("no PDF files found under {}", cli.dir.display());
    }
    tracing::info!(
        dir = %cli.dir.display(),
        documents = documents.len(),
        collection = %collection,
        "Starting fragment ingestion"
    );

    let embedding = get_embedding_client(config).context("failed to build embedding client")?;
    let qdrant = QdrantService::new(
        &config.qdrant_url,
        config.qdrant_api_key.clone(),
        config.request_timeout(),
    )
    .context("failed to build Qdrant client")?;
    if !cli.dry_run {
        qdrant
            .ensure_collection(&collection, config.embedding_dimension as u64)
            .await
            .with_context(|| format!("failed to prepare collection `{collection}`"))?;
    }
    let mut next_sequence = if cli.dry_run {
        0
    } else {
        qdrant.count_points(&collection).await?
    };

    let extractor = PdfTextExtractor::new();
    let mut summary = Summary::default();

    for path in documents {
        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let text = match extractor.extract(&source, bytes).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(source = %source, error = %err, "Skipping unreadable document");
                summary.skipped += 1;
                continue;
            }
        };
        let pieces: Vec<String> = chunk(&text, chunk_chars)?.map(str::to_string).collect();
        tracing::info!(source = %source, fragments = pieces.len(), "Document chunked");
        summary.documents += 1;

        if cli.dry_run {
            summary.fragments += pieces.len();
            continue;
        }

        for batch in pieces.chunks(cli.batch_size) {
            let inserts = embed_batch(
                embedding.as_ref(),
                &source,
                batch,
                next_sequence,
                config.embedding_dimension,
            )
            .await?;
            let written = qdrant.upsert_fragments(&collection, inserts).await?;
            next_sequence += written as u64;
            summary.fragments += written;
        }
    }

    tracing::info!(
        documents = summary.documents,
        skipped = summary.skipped,
        fragments = summary.fragments,
        dry_run = cli.dry_run,
        "Fragment ingestion finished"
    );
    println!(
        "{} documents, {} fragments{}, {} skipped",
        summary.documents,
        summary.fragments,
        if cli.dry_run { " (dry run)" } else { "" },
        summary.skipped
    );
    Ok(())
}

fn find_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        let is_pdf = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if entry.file_type().is_file() && is_pdf {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

async fn embed_batch(
    embedding: &(dyn EmbeddingClient + Send + Sync),
    source: &str,
    batch: &[String],
    first_sequence: u64,
    dimension: usize,
) -> Result<Vec<FragmentInsert>> {
    let vectors = embedding
        .generate_embeddings(batch.to_vec())
        .await
        .with_context(|| format!("failed to embed fragments of {source}"))?;
    if vectors.len() != batch.len() {
        bail!(
            "provider returned {} embeddings for {} fragments",
            vectors.len(),
            batch.len()
        );
    }

    let mut inserts = Vec::with_capacity(batch.len());
    for (offset, (text, vector)) in batch.iter().zip(vectors).enumerate() {
        if vector.len() != dimension {
            bail!(
                "expected {dimension}-dimensional embeddings, got {}",
                vector.len()
            );
        }
        inserts.push(FragmentInsert {
            source: source.to_string(),
            text: text.clone(),
            sequence: first_sequence + offset as u64,
            vector,
        });
    }
    Ok(inserts)
}
