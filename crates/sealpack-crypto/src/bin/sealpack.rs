//! sealpack: command-line tool for streaming container encryption.
//!
//! Identities are derived from a user id and passphrase, so there are no key
//! files. Share the public key printed by `sealpack identity` with senders.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sealpack_core::init_tracing;
use sealpack_crypto::format::file_id_string;
use sealpack_crypto::{
    encode_container, read_container_info, verify_container, CodecConfig, ContainerCodec,
    Credentials, CryptoError, FileDescriptor, FileSink, FileSource, PublicKey, Source,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exit code for an operation cancelled with Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "sealpack")]
#[command(author, version, about = "Streaming multi-recipient file encryption")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the public key derived from a user id and passphrase
    Identity {
        #[arg(short, long)]
        user_id: String,

        #[arg(short, long)]
        passphrase: String,
    },

    /// Encrypt a file for one or more recipients
    Encrypt {
        /// Input file to encrypt
        #[arg(short, long)]
        input: PathBuf,

        /// Output container path
        #[arg(short, long)]
        output: PathBuf,

        /// Sender user id
        #[arg(short, long)]
        user_id: String,

        /// Sender passphrase
        #[arg(short, long)]
        passphrase: String,

        /// Recipient as USER_ID=PUBLIC_KEY (base64), repeatable
        #[arg(short, long, num_args = 1..)]
        recipient: Vec<String>,

        /// MIME type recorded in the metadata
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,

        /// Plaintext bytes per chunk (overrides SEALPACK_CHUNK_SIZE)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Do not add the sender as a recipient
        #[arg(long)]
        no_self: bool,
    },

    /// Verify and decrypt a container
    Decrypt {
        /// Input container
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for the plaintext
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long)]
        user_id: String,

        #[arg(short, long)]
        passphrase: String,

        /// Sender public key (default: owner key from the metadata)
        #[arg(short, long)]
        sender: Option<String>,
    },

    /// Show container metadata and recipients without keys
    Inspect {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Check the container checksum without keys
    Verify {
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _log_guard = init_tracing("warn");
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let cancelled = e
                .downcast_ref::<CryptoError>()
                .is_some_and(CryptoError::is_cancelled);
            if cancelled {
                eprintln!("Cancelled");
                ExitCode::from(EXIT_CANCELLED)
            } else {
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> anyhow::Result<()> {
    let config = CodecConfig::load().context("invalid configuration")?;

    match cli.command {
        Commands::Identity {
            user_id,
            passphrase,
        } => cmd_identity(config, Credentials::new(user_id, passphrase)).await,
        Commands::Encrypt {
            input,
            output,
            user_id,
            passphrase,
            recipient,
            mime,
            chunk_size,
            no_self,
        } => {
            let mut config = config;
            if let Some(chunk_size) = chunk_size {
                config.chunk_size = chunk_size;
            }
            let request = EncryptRequest {
                input: &input,
                output: &output,
                credentials: Credentials::new(user_id, passphrase),
                recipients: &recipient,
                mime,
                include_self: !no_self,
            };
            cmd_encrypt(config, request, cancel).await
        }
        Commands::Decrypt {
            input,
            output,
            user_id,
            passphrase,
            sender,
        } => {
            let credentials = Credentials::new(user_id, passphrase);
            cmd_decrypt(config, &input, &output, &credentials, sender.as_deref(), cancel).await
        }
        Commands::Inspect { input } => cmd_inspect(&input).await,
        Commands::Verify { input } => cmd_verify(&input, cancel).await,
    }
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_identity(config: CodecConfig, credentials: Credentials) -> anyhow::Result<()> {
    let identity = ContainerCodec::new(config).identity(&credentials).await?;

    print_json(&serde_json::json!({
        "user_id": credentials.user_id(),
        "public_key": identity.public.to_base64(),
    }))
}

/// Parse `USER_ID=PUBLIC_KEY` recipient arguments.
fn parse_recipients(args: &[String]) -> anyhow::Result<BTreeMap<String, PublicKey>> {
    let mut recipients = BTreeMap::new();
    for arg in args {
        let Some((user_id, key)) = arg.split_once('=') else {
            bail!("recipient must be USER_ID=PUBLIC_KEY, got {:?}", arg);
        };
        let public: PublicKey = key
            .parse()
            .with_context(|| format!("invalid public key for recipient {:?}", user_id))?;
        recipients.insert(user_id.to_string(), public);
    }
    Ok(recipients)
}

struct EncryptRequest<'a> {
    input: &'a Path,
    output: &'a Path,
    credentials: Credentials,
    recipients: &'a [String],
    mime: String,
    include_self: bool,
}

async fn cmd_encrypt(
    config: CodecConfig,
    request: EncryptRequest<'_>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    config.validate()?;
    let chunk_size = config.chunk_size;
    let codec = ContainerCodec::new(config);
    let mut recipients = parse_recipients(request.recipients)?;

    let identity = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(CryptoError::Cancelled.into()),
        identity = codec.identity(&request.credentials) => identity?,
    };
    if request.include_self {
        recipients.insert(
            request.credentials.user_id().to_string(),
            identity.public.clone(),
        );
    }
    if recipients.is_empty() {
        bail!("at least one recipient is required (use --recipient or drop --no-self)");
    }

    let mut source = FileSource::open(request.input)
        .await
        .with_context(|| format!("cannot open {}", request.input.display()))?;
    let filename = request
        .input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let original = FileDescriptor {
        filename,
        mime: request.mime,
        size: source.size(),
    };

    let mut sink = FileSink::create(request.output)
        .await
        .with_context(|| format!("cannot create {}", request.output.display()))?;

    let summary = encode_container(
        &mut source,
        &mut sink,
        &identity,
        &recipients,
        original,
        chunk_size,
        cancel,
    )
    .await?;

    print_json(&serde_json::json!({
        "input": request.input.to_string_lossy(),
        "output": request.output.to_string_lossy(),
        "file_id": file_id_string(&summary.file_id),
        "input_size": summary.plaintext_size,
        "output_size": summary.container_size,
        "total_chunks": summary.total_chunks,
        "checksum": hex::encode(summary.checksum),
        "recipients": recipients.keys().collect::<Vec<_>>(),
    }))
}

async fn cmd_decrypt(
    config: CodecConfig,
    input: &Path,
    output: &Path,
    credentials: &Credentials,
    sender: Option<&str>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let sender: Option<PublicKey> = sender
        .map(str::parse)
        .transpose()
        .context("invalid sender public key")?;

    let mut source = FileSource::open(input)
        .await
        .with_context(|| format!("cannot open {}", input.display()))?;
    let mut sink = FileSink::create(output)
        .await
        .with_context(|| format!("cannot create {}", output.display()))?;

    let summary = ContainerCodec::new(config)
        .decode(&mut source, &mut sink, credentials, sender.as_ref(), cancel)
        .await?;

    print_json(&serde_json::json!({
        "input": input.to_string_lossy(),
        "output": output.to_string_lossy(),
        "file_id": file_id_string(&summary.file_id),
        "output_size": summary.plaintext_size,
        "original_filename": summary.metadata.original.filename,
        "mime": summary.metadata.original.mime,
    }))
}

async fn cmd_inspect(input: &Path) -> anyhow::Result<()> {
    let mut source = FileSource::open(input)
        .await
        .with_context(|| format!("cannot open {}", input.display()))?;
    let info = read_container_info(&mut source).await?;

    print_json(&serde_json::json!({
        "file": input.to_string_lossy(),
        "version": info.version,
        "file_id": file_id_string(&info.file_id),
        "checksum": hex::encode(info.checksum),
        "container_size": info.container_size,
        "owner_pub_key": info.metadata.owner_pub_key.to_base64(),
        "chunk_size": info.metadata.chunk_size,
        "total_chunks": info.metadata.total_chunks,
        "original": info.metadata.original,
        "recipients": info.recipients(),
    }))
}

async fn cmd_verify(input: &Path, cancel: &CancellationToken) -> anyhow::Result<()> {
    let mut source = FileSource::open(input)
        .await
        .with_context(|| format!("cannot open {}", input.display()))?;

    match verify_container(&mut source, cancel).await {
        Ok(info) => print_json(&serde_json::json!({
            "file": input.to_string_lossy(),
            "valid": true,
            "file_id": file_id_string(&info.file_id),
            "checksum": hex::encode(info.checksum),
        })),
        Err(CryptoError::Cancelled) => Err(CryptoError::Cancelled.into()),
        Err(e) => {
            print_json(&serde_json::json!({
                "file": input.to_string_lossy(),
                "valid": false,
                "error": e.to_string(),
            }))?;
            Err(e.into())
        }
    }
}
