//! Bundle signing utility for Glycorisk model bundles.
//!
//! Hashes `schema.json` and `model.json` into `manifest.json` and writes an
//! Ed25519 signature over the manifest bytes to `bundle.sig`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin sign_bundle -- <bundle_dir>
//! ```
//!
//! The signing seed (32 bytes, base64) is read from the file descriptor in
//! `GLYCORISK_BUNDLE_SIGNING_KEY_B64_FD`, the file in
//! `GLYCORISK_BUNDLE_SIGNING_KEY_B64_FILE`, or (debug builds only)
//! `GLYCORISK_BUNDLE_SIGNING_KEY_B64`. Seed material is zeroized after use.

use std::env;
use std::fs;
#[cfg(unix)]
use std::os::unix::io::FromRawFd;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose;
use base64::Engine;
use clap::Parser;
use ed25519_dalek::{Signature, Signer, SigningKey};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use glycorisk::adapters::artifact::{build_manifest, MANIFEST_FILE, MODEL_FILE, SCHEMA_FILE, SIGNATURE_FILE};

const KEY_FD_ENV: &str = "GLYCORISK_BUNDLE_SIGNING_KEY_B64_FD";
const KEY_FILE_ENV: &str = "GLYCORISK_BUNDLE_SIGNING_KEY_B64_FILE";
const KEY_ENV: &str = "GLYCORISK_BUNDLE_SIGNING_KEY_B64";

#[derive(Parser, Debug)]
#[clap(name = "sign_bundle", about = "Write manifest.json and bundle.sig for a model bundle")]
struct Args {
    /// Bundle directory holding schema.json and model.json
    bundle_dir: PathBuf,

    /// Generate a fresh signing seed, print it, and sign with it
    #[clap(long)]
    generate_key: bool,
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct Seed([u8; 32]);

fn non_empty(raw: String) -> Result<Zeroizing<String>> {
    let raw = Zeroizing::new(raw);
    let secret = raw.trim_end_matches(['\n', '\r']).to_string();
    if secret.is_empty() {
        bail!("Empty signing key");
    }
    Ok(Zeroizing::new(secret))
}

fn read_signing_seed_b64() -> Result<Zeroizing<String>> {
    #[cfg(unix)]
    if let Ok(fd_str) = env::var(KEY_FD_ENV) {
        let fd: i32 = fd_str.trim().parse().context("Invalid key FD")?;
        if fd <= 2 {
            bail!("Refusing to read signing key from stdio FD");
        }
        // SAFETY: take ownership of FD for one-time secret read.
        let mut file = unsafe { fs::File::from_raw_fd(fd) };
        let mut buf = String::new();
        use std::io::Read;
        file.read_to_string(&mut buf)
            .context("Failed reading signing key from FD")?;
        return non_empty(buf);
    }

    if let Ok(path) = env::var(KEY_FILE_ENV) {
        let content = fs::read_to_string(path.trim()).context("Failed reading signing key file")?;
        return non_empty(content);
    }

    if cfg!(debug_assertions) {
        if let Ok(v) = env::var(KEY_ENV) {
            return non_empty(v);
        }
    }

    bail!(
        "Missing signing key. Provide {KEY_FD_ENV} or {KEY_FILE_ENV} (env var fallback only in debug builds)."
    )
}

fn decode_seed(b64: &str) -> Result<Seed> {
    let raw = Zeroizing::new(
        general_purpose::STANDARD
            .decode(b64.trim())
            .context("Invalid base64 in signing key")?,
    );
    if raw.len() != 32 {
        bail!(
            "Signing key seed must be 32 bytes after base64 decode (got {})",
            raw.len()
        );
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&raw);
    Ok(Seed(seed))
}

fn generate_seed() -> Seed {
    use rand::RngCore;
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    Seed(seed)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let dir = args.bundle_dir;

    let mut seed = if args.generate_key {
        let seed = generate_seed();
        let b64 = Zeroizing::new(general_purpose::STANDARD.encode(seed.0));
        eprintln!("Generated signing seed (store it securely): {}", b64.as_str());
        seed
    } else {
        decode_seed(&read_signing_seed_b64()?)?
    };
    let signing_key = SigningKey::from_bytes(&seed.0);
    let verifying_key = signing_key.verifying_key();

    let manifest = build_manifest(&dir, &[SCHEMA_FILE, MODEL_FILE])
        .with_context(|| format!("Cannot hash bundle files in {}", dir.display()))?;
    let manifest_bytes = serde_json::to_vec_pretty(&manifest).context("Failed to serialize manifest")?;

    let manifest_path = dir.join(MANIFEST_FILE);
    fs::write(&manifest_path, &manifest_bytes)
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;

    let sig: Signature = signing_key.sign(&manifest_bytes);
    let sig_path = dir.join(SIGNATURE_FILE);
    fs::write(&sig_path, sig.to_bytes()).with_context(|| format!("Failed to write {}", sig_path.display()))?;

    println!("Signed manifest: {}", manifest_path.display());
    println!("Wrote signature: {}", sig_path.display());
    println!(
        "BUNDLE_PUBKEY (base64)={}",
        general_purpose::STANDARD.encode(verifying_key.as_bytes())
    );

    seed.zeroize();
    Ok(())
}
