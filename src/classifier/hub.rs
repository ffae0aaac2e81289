//! Locating checkpoint files, either on disk or on the Hugging Face Hub.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use tracing::{debug, info};

use super::ModelError;

pub const DEFAULT_MODEL_ID: &str = "jazzmacedo/fruits-and-vegetables-detector-36";
pub const CONFIG_FILE: &str = "config.json";
pub const PREPROCESSOR_FILE: &str = "preprocessor_config.json";
pub const DEFAULT_ONNX_FILE: &str = "model.onnx";

const HF_TOKEN_ENV_VAR: &str = "HF_TOKEN";

/// Where the checkpoint comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    /// A directory holding `config.json`, `preprocessor_config.json` and the ONNX graph.
    Local(PathBuf),
    /// A model hub identifier, optionally pinned to a revision.
    Hub {
        model_id: String,
        revision: Option<String>,
    },
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Local(dir) => write!(f, "{}", dir.display()),
            ModelSource::Hub {
                model_id,
                revision: Some(rev),
            } => write!(f, "{model_id}@{rev}"),
            ModelSource::Hub { model_id, .. } => write!(f, "{model_id}"),
        }
    }
}

/// Resolved on-disk paths of a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub preprocessor: PathBuf,
    pub onnx: PathBuf,
}

impl ModelSource {
    /// Resolves all checkpoint files, downloading them when the source is the
    /// hub. `onnx_file` is relative to the model root.
    pub fn resolve(&self, onnx_file: &str) -> Result<ModelFiles, ModelError> {
        match self {
            ModelSource::Local(dir) => resolve_local(dir, onnx_file),
            ModelSource::Hub { model_id, revision } => {
                resolve_hub(model_id, revision.as_deref(), onnx_file)
            }
        }
    }
}

fn resolve_local(dir: &Path, onnx_file: &str) -> Result<ModelFiles, ModelError> {
    let existing = |name: &str| {
        let path = dir.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ModelError::MissingFile(path))
        }
    };

    Ok(ModelFiles {
        config: existing(CONFIG_FILE)?,
        preprocessor: existing(PREPROCESSOR_FILE)?,
        onnx: existing(onnx_file)?,
    })
}

fn resolve_hub(
    model_id: &str,
    revision: Option<&str>,
    onnx_file: &str,
) -> Result<ModelFiles, ModelError> {
    let token = env::var(HF_TOKEN_ENV_VAR).ok();
    let api = ApiBuilder::new()
        .with_progress(true)
        .with_token(token)
        .build()
        .map_err(|source| ModelError::Hub {
            model_id: model_id.to_string(),
            file: "api client".to_string(),
            source,
        })?;

    let repo = match revision {
        Some(rev) => Repo::with_revision(model_id.to_string(), RepoType::Model, rev.to_string()),
        None => Repo::new(model_id.to_string(), RepoType::Model),
    };
    let repo = api.repo(repo);

    let fetch = |file: &str| {
        debug!(model_id, file, "Fetching checkpoint file");
        repo.get(file).map_err(|source| ModelError::Hub {
            model_id: model_id.to_string(),
            file: file.to_string(),
            source,
        })
    };

    let files = ModelFiles {
        config: fetch(CONFIG_FILE)?,
        preprocessor: fetch(PREPROCESSOR_FILE)?,
        onnx: fetch(onnx_file)?,
    };
    info!(model_id, onnx = %files.onnx.display(), "Checkpoint files cached");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_checkpoint(dir: &Path, onnx_file: &str) {
        fs::write(dir.join(CONFIG_FILE), r#"{"id2label": {"0": "apple"}}"#).unwrap();
        fs::write(dir.join(PREPROCESSOR_FILE), "{}").unwrap();
        let onnx = dir.join(onnx_file);
        fs::create_dir_all(onnx.parent().unwrap()).unwrap();
        fs::write(onnx, b"onnx").unwrap();
    }

    #[test]
    fn resolves_local_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_checkpoint(dir.path(), "onnx/model.onnx");

        let files = ModelSource::Local(dir.path().to_path_buf())
            .resolve("onnx/model.onnx")
            .unwrap();
        assert_eq!(files.config, dir.path().join(CONFIG_FILE));
        assert_eq!(files.onnx, dir.path().join("onnx/model.onnx"));
    }

    #[test]
    fn local_directory_reports_missing_graph() {
        let dir = tempfile::tempdir().unwrap();
        write_checkpoint(dir.path(), "other.onnx");

        let err = ModelSource::Local(dir.path().to_path_buf())
            .resolve(DEFAULT_ONNX_FILE)
            .unwrap_err();
        match err {
            ModelError::MissingFile(path) => assert!(path.ends_with(DEFAULT_ONNX_FILE)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn displays_hub_revision() {
        let source = ModelSource::Hub {
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: Some("main".to_string()),
        };
        assert_eq!(
            source.to_string(),
            "jazzmacedo/fruits-and-vegetables-detector-36@main"
        );
    }
}
