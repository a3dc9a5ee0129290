//! Model bundle loader.
//!
//! A bundle is a directory holding the frozen feature schema and the model
//! it was trained with:
//!
//! - `schema.json`: `FeatureSchema` (column lists, frozen order, labels)
//! - `model.json`: `ExportedLinearModel`
//! - `manifest.json` (optional): SHA-256 of each bound file
//! - `bundle.sig` (optional): raw 64-byte Ed25519 signature over
//!   `manifest.json`
//!
//! # Security
//!
//! When a manifest is present every file it lists must hash to the recorded
//! value, and it must bind both the schema and the model. With
//! `require_signed` the manifest and signature are mandatory and must
//! verify against the configured key. A model is never loaded without its
//! schema.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::adapters::linear::LinearClassifier;
use crate::domain::{FeatureSchema, SchemaError};
use crate::ports::{Classifier, ModelError};

pub const SCHEMA_FILE: &str = "schema.json";
pub const MODEL_FILE: &str = "model.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SIGNATURE_FILE: &str = "bundle.sig";

const MANIFEST_VERSION: u32 = 1;

/// Errors raised while loading or checking a model bundle.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Missing bundle file: {0}")]
    Missing(PathBuf),

    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("File hash mismatch for {0}")]
    HashMismatch(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Model features {model:?} do not match the schema's frozen order {schema:?}")]
    FeatureMismatch {
        model: Vec<String>,
        schema: Vec<String>,
    },

    #[error("Model emits {model} classes but the schema labels {labels}")]
    ClassCountMismatch { model: usize, labels: usize },
}

/// Hashes of the files a bundle binds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Relative file name → lowercase hex SHA-256.
    pub files: BTreeMap<String, String>,
}

/// How strictly to load a bundle.
#[derive(Debug, Clone, Default)]
pub struct BundleOptions {
    pub require_signed: bool,
    pub verifying_key: Option<VerifyingKey>,
}

/// A loaded schema and its model.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub schema: FeatureSchema,
    pub classifier: LinearClassifier,
    pub manifest: Option<BundleManifest>,
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) fn constant_time_eq_str(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Parse a base64-encoded 32-byte Ed25519 verifying key.
///
/// # Errors
/// Returns `ArtifactError::Signature` for bad base64, length or key.
pub fn verifying_key_from_b64(b64: &str) -> Result<VerifyingKey, ArtifactError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|_| ArtifactError::Signature("Invalid public key base64".into()))?;
    let pubkey: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| ArtifactError::Signature("Invalid public key length (expected 32 bytes)".into()))?;
    VerifyingKey::from_bytes(&pubkey).map_err(|_| ArtifactError::Signature("Invalid verifying key".into()))
}

/// Read a verifying key from a file holding its base64 encoding.
///
/// # Errors
/// Returns error if the file is unreadable or the key is invalid.
pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey, ArtifactError> {
    let b64 = read(path)?;
    verifying_key_from_b64(&String::from_utf8_lossy(&b64))
}

fn read(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ArtifactError::Missing(path.to_path_buf())
        } else {
            ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

/// Hash the given bundle files into a manifest.
///
/// # Errors
/// Returns error if any file is unreadable.
pub fn build_manifest(dir: &Path, files: &[&str]) -> Result<BundleManifest, ArtifactError> {
    let mut hashes = BTreeMap::new();
    for name in files {
        let bytes = read(&dir.join(name))?;
        hashes.insert((*name).to_string(), sha256_hex(&bytes));
    }
    Ok(BundleManifest {
        version: MANIFEST_VERSION,
        created_at: Some(Utc::now()),
        files: hashes,
    })
}

/// Check that a classifier was fit on exactly the schema's frozen order and
/// emits one class per label.
///
/// # Errors
/// Returns the first mismatch; there is no fallback.
pub fn check_compatibility<C: Classifier + ?Sized>(
    classifier: &C,
    schema: &FeatureSchema,
) -> Result<(), ArtifactError> {
    match classifier.feature_names() {
        Some(names) if names != schema.feature_order.as_slice() => {
            return Err(ArtifactError::FeatureMismatch {
                model: names.to_vec(),
                schema: schema.feature_order.clone(),
            });
        }
        None if classifier.n_features() != schema.n_features() => {
            return Err(ArtifactError::Model(ModelError::FeatureCount {
                expected: schema.n_features(),
                actual: classifier.n_features(),
            }));
        }
        _ => {}
    }
    if classifier.n_classes() != schema.labels.len() {
        return Err(ArtifactError::ClassCountMismatch {
            model: classifier.n_classes(),
            labels: schema.labels.len(),
        });
    }
    Ok(())
}

fn verify_signature(
    manifest_bytes: &[u8],
    sig_path: &Path,
    key: &VerifyingKey,
) -> Result<(), ArtifactError> {
    let sig_bytes = read(sig_path)?;
    let sig: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| ArtifactError::Signature("Invalid signature length (expected 64 bytes)".into()))?;
    key.verify(manifest_bytes, &Signature::from_bytes(&sig))
        .map_err(|_| ArtifactError::Signature("Invalid bundle signature".into()))
}

fn verify_manifest(dir: &Path, manifest_bytes: &[u8]) -> Result<BundleManifest, ArtifactError> {
    let manifest: BundleManifest = serde_json::from_slice(manifest_bytes)
        .map_err(|e| ArtifactError::Manifest(format!("Invalid {MANIFEST_FILE} format: {e}")))?;
    if manifest.version != MANIFEST_VERSION {
        return Err(ArtifactError::Manifest(format!(
            "Unsupported manifest version: {}",
            manifest.version
        )));
    }
    for required in [SCHEMA_FILE, MODEL_FILE] {
        if !manifest.files.contains_key(required) {
            return Err(ArtifactError::Manifest(format!("{MANIFEST_FILE} must bind {required}")));
        }
    }
    for (rel, expected_hex) in &manifest.files {
        if Path::new(rel).components().count() != 1 {
            return Err(ArtifactError::Manifest(format!("Manifest entry {rel} is not a bundle file name")));
        }
        let actual_hex = sha256_hex(&read(&dir.join(rel))?);
        if !constant_time_eq_str(&actual_hex, &expected_hex.to_ascii_lowercase()) {
            return Err(ArtifactError::HashMismatch(rel.clone()));
        }
    }
    Ok(manifest)
}

/// Load and cross-check a bundle directory.
///
/// # Errors
/// Returns `ArtifactError` if a file is missing or malformed, an integrity
/// check fails, or the model does not match its schema.
pub fn load_bundle(dir: &Path, options: &BundleOptions) -> Result<ModelBundle, ArtifactError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let sig_path = dir.join(SIGNATURE_FILE);

    let manifest_bytes = if manifest_path.exists() {
        Some(read(&manifest_path)?)
    } else {
        None
    };

    match (&manifest_bytes, options.verifying_key.as_ref()) {
        (Some(bytes), Some(key)) if sig_path.exists() => {
            verify_signature(bytes, &sig_path, key)?;
            tracing::info!("Bundle signature verified");
        }
        _ if options.require_signed => {
            return Err(ArtifactError::Signature(format!(
                "Signed bundle required: {MANIFEST_FILE}, {SIGNATURE_FILE} and a verifying key must all be present"
            )));
        }
        (Some(_), None) if sig_path.exists() => {
            tracing::warn!("Bundle is signed but no verifying key is configured; signature not checked");
        }
        (Some(_), Some(_)) => {
            tracing::warn!("Verifying key configured but {} is missing; signature not checked", SIGNATURE_FILE);
        }
        _ => {}
    }

    let manifest = match &manifest_bytes {
        Some(bytes) => Some(verify_manifest(dir, bytes)?),
        None => {
            tracing::warn!("Loading bundle from {} without a manifest", dir.display());
            None
        }
    };

    let schema_bytes = read(&dir.join(SCHEMA_FILE))?;
    let schema: FeatureSchema = serde_json::from_slice(&schema_bytes)
        .map_err(|e| SchemaError::Invalid(format!("{SCHEMA_FILE}: {e}")))?;
    schema.validate()?;

    let model_bytes = read(&dir.join(MODEL_FILE))?;
    let classifier = LinearClassifier::from_json(&String::from_utf8_lossy(&model_bytes))?;

    check_compatibility(&classifier, &schema)?;

    tracing::info!(
        "Loaded model bundle from {} (n_features={}, n_classes={}, schema_version={})",
        dir.display(),
        classifier.n_features(),
        classifier.n_classes(),
        schema.version
    );

    Ok(ModelBundle {
        schema,
        classifier,
        manifest,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn sign(dir: &Path, key: &SigningKey) {
        let manifest = build_manifest(dir, &[SCHEMA_FILE, MODEL_FILE]).expect("manifest");
        let bytes = serde_json::to_vec_pretty(&manifest).expect("json");
        fs::write(dir.join(MANIFEST_FILE), &bytes).expect("write");
        fs::write(dir.join(SIGNATURE_FILE), key.sign(&bytes).to_bytes()).expect("write");
    }

    #[test]
    fn test_unsigned_bundle_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let schema = schema();
        write_bundle(dir.path(), &schema, &model(&schema));

        let bundle = load_bundle(dir.path(), &BundleOptions::default()).expect("load");
        assert_eq!(bundle.schema, schema);
        assert!(bundle.manifest.is_none());
    }

    #[test]
    fn test_missing_schema_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let schema = schema();
        write_bundle(dir.path(), &schema, &model(&schema));
        fs::remove_file(dir.path().join(SCHEMA_FILE)).expect("remove");

        let err = load_bundle(dir.path(), &BundleOptions::default()).expect_err("no schema");
        assert!(matches!(err, ArtifactError::Missing(_)));
    }

    #[test]
    fn test_feature_order_mismatch_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let schema = schema();
        let mut model = model(&schema);
        model.feature_names.swap(0, 1);
        write_bundle(dir.path(), &schema, &model);

        let err = load_bundle(dir.path(), &BundleOptions::default()).expect_err("mismatch");
        assert!(matches!(err, ArtifactError::FeatureMismatch { .. }));
    }

    #[test]
    fn test_class_count_mismatch_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let schema = schema();
        let mut model = model(&schema);
        model.coefficients.pop();
        model.intercepts.pop();
        write_bundle(dir.path(), &schema, &model);

        let err = load_bundle(dir.path(), &BundleOptions::default()).expect_err("mismatch");
        assert!(matches!(err, ArtifactError::ClassCountMismatch { model: 2, labels: 3 }));
    }

    #[test]
    fn test_signed_bundle_verifies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let schema = schema();
        write_bundle(dir.path(), &schema, &model(&schema));
        let key = signing_key();
        sign(dir.path(), &key);

        let options = BundleOptions {
            require_signed: true,
            verifying_key: Some(key.verifying_key()),
        };
        let bundle = load_bundle(dir.path(), &options).expect("load");
        assert!(bundle.manifest.expect("manifest").files.contains_key(MODEL_FILE));
    }

    #[test]
    fn test_tampered_file_fails_hash_check() {
        let dir = tempfile::tempdir().expect("tempdir");
        let schema = schema();
        write_bundle(dir.path(), &schema, &model(&schema));
        sign(dir.path(), &signing_key());

        let mut tampered = model(&schema);
        tampered.intercepts = vec![1.0, 0.0, 0.0];
        write_bundle(dir.path(), &schema, &tampered);

        let err = load_bundle(dir.path(), &BundleOptions::default()).expect_err("tampered");
        assert!(matches!(err, ArtifactError::HashMismatch(ref f) if f == MODEL_FILE));
    }

    #[test]
    fn test_wrong_key_or_missing_signature() {
        let dir = tempfile::tempdir().expect("tempdir");
        let schema = schema();
        write_bundle(dir.path(), &schema, &model(&schema));

        let other = SigningKey::from_bytes(&[9u8; 32]).verifying_key();
        let options = BundleOptions {
            require_signed: true,
            verifying_key: Some(other),
        };
        assert!(matches!(load_bundle(dir.path(), &options), Err(ArtifactError::Signature(_))));

        sign(dir.path(), &signing_key());
        assert!(matches!(load_bundle(dir.path(), &options), Err(ArtifactError::Signature(_))));
    }

    #[test]
    fn test_unsigned_manifest_loads_when_signature_optional() {
        let dir = tempfile::tempdir().expect("tempdir");
        let schema = schema();
        write_bundle(dir.path(), &schema, &model(&schema));
        let key = signing_key();
        sign(dir.path(), &key);
        fs::remove_file(dir.path().join(SIGNATURE_FILE)).expect("remove");

        let options = BundleOptions {
            require_signed: false,
            verifying_key: Some(key.verifying_key()),
        };
        let bundle = load_bundle(dir.path(), &options).expect("load");
        assert!(bundle.manifest.is_some());
    }

    #[test]
    fn test_verifying_key_from_b64() {
        let key = signing_key().verifying_key();
        let b64 = base64::engine::general_purpose::STANDARD.encode(key.as_bytes());
        assert_eq!(verifying_key_from_b64(&format!(" {b64}\n")).expect("key"), key);
        assert!(verifying_key_from_b64("AAAA").is_err());
    }
}
