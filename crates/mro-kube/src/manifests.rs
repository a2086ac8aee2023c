//! CRD manifest loading
//!
//! Custom resource definitions ship as YAML files in a directory mounted
//! into the operator image. The directory is read fresh on every call;
//! nothing is cached between reconciles.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use std::path::PathBuf;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{OperatorError, Result};

const CRD_KIND: &str = "CustomResourceDefinition";

/// Source of CRD templates
#[derive(Debug, Clone)]
pub struct ManifestSource {
    dir: PathBuf,
}

impl ManifestSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load every CRD document from `*.yaml` / `*.yml` files, in file name order
    pub fn load(&self) -> Result<Vec<CustomResourceDefinition>> {
        if !self.dir.is_dir() {
            return Err(OperatorError::Manifest(format!(
                "manifest directory '{}' does not exist",
                self.dir.display()
            )));
        }

        let mut crds = Vec::new();
        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| OperatorError::Manifest(e.to_string()))?;
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false);
            if !entry.file_type().is_file() || !is_yaml {
                continue;
            }

            let content = std::fs::read_to_string(path)?;
            let parsed = parse_crds(&content).map_err(|e| {
                OperatorError::Manifest(format!("{}: {}", path.display(), e))
            })?;
            debug!(file = %path.display(), count = parsed.len(), "loaded CRD manifests");
            crds.extend(parsed);
        }

        Ok(crds)
    }
}

/// Parse the CRD documents of a multi-document YAML string
///
/// Documents of any other kind are skipped with a warning.
pub fn parse_crds(content: &str) -> Result<Vec<CustomResourceDefinition>> {
    let mut crds = Vec::new();

    for (index, doc) in split_documents(content).into_iter().enumerate() {
        let value: serde_yaml::Value = serde_yaml::from_str(doc)
            .map_err(|e| OperatorError::Manifest(format!("document {}: {}", index, e)))?;

        let kind = value.get("kind").and_then(|k| k.as_str()).unwrap_or_default();
        if kind != CRD_KIND {
            warn!(document = index, kind, "skipping non-CRD manifest document");
            continue;
        }

        let crd: CustomResourceDefinition = serde_yaml::from_value(value)
            .map_err(|e| OperatorError::Manifest(format!("document {}: {}", index, e)))?;
        if crd.metadata.name.as_deref().unwrap_or_default().is_empty() {
            return Err(OperatorError::Manifest(format!(
                "document {}: CRD has no metadata.name",
                index
            )));
        }
        crds.push(crd);
    }

    Ok(crds)
}

/// Split on `---` separator lines, dropping empty and comment-only documents
fn split_documents(content: &str) -> Vec<&str> {
    let mut docs = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        if line.trim_end() == "---" {
            docs.push(&content[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    docs.push(&content[start..]);

    docs.into_iter()
        .map(str::trim)
        .filter(|doc| {
            !doc.is_empty()
                && !doc
                    .lines()
                    .all(|l| l.trim().is_empty() || l.trim().starts_with('#'))
        })
        .collect()
}
