use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use sg_gateway::cipher::{KeyMaterial, BLOCK_SIZE, KEY_SIZE};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Generate a random AES-256 key and IV for the gateway envelope cipher.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Where to write the key file
    #[arg(default_value = "keys.json", env = "SG_KEY_FILE")]
    output: PathBuf,

    /// Overwrite an existing file
    #[arg(short, long)]
    force: bool,
}

fn generate() -> KeyMaterial {
    let mut secret_key = [0u8; KEY_SIZE];
    let mut iv = [0u8; BLOCK_SIZE];
    rand::fill(&mut secret_key);
    rand::fill(&mut iv);
    KeyMaterial::new(secret_key, iv)
}

#[derive(Debug, thiserror::Error)]
enum KeygenError {
    #[error("{0} already exists (use --force to overwrite)")]
    Exists(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to serialize key file: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn write_key_file(keys: &KeyMaterial, path: &Path, force: bool) -> Result<(), KeygenError> {
    let json = serde_json::to_string_pretty(&keys.to_key_file())?;

    let io_err = |source: std::io::Error| KeygenError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut file = options.open(path).map_err(|e| match e.kind() {
        ErrorKind::AlreadyExists => KeygenError::Exists(path.display().to_string()),
        _ => io_err(e),
    })?;
    file.write_all(json.as_bytes()).map_err(io_err)
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let keys = generate();
    if let Err(e) = write_key_file(&keys, &args.output, args.force) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
    tracing::info!("key file written to {}", args.output.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(generate(), generate());
    }

    #[test]
    fn test_written_file_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        let keys = generate();

        write_key_file(&keys, &path, false).unwrap();
        assert_eq!(KeyMaterial::load(&path).unwrap(), keys);
    }

    #[test]
    fn test_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");

        write_key_file(&generate(), &path, false).unwrap();
        let first = KeyMaterial::load(&path).unwrap();
        assert!(matches!(
            write_key_file(&generate(), &path, false),
            Err(KeygenError::Exists(_))
        ));
        assert_eq!(KeyMaterial::load(&path).unwrap(), first);

        let replacement = generate();
        write_key_file(&replacement, &path, true).unwrap();
        assert_eq!(KeyMaterial::load(&path).unwrap(), replacement);
    }
}
