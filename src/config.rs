//! Export configuration. Every field has a default, so an options file only
//! needs the values it changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::render::RenderOptions;

/// Default output file name.
pub const DEFAULT_FILENAME: &str = "document.pdf";

/// How the clone is staged before rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingOptions {
    /// CSS `min-height` of the staged clone.
    pub min_height: String,
    /// CSS `background` of the staged clone.
    pub background: String,
    pub z_index: i32,
}

impl Default for StagingOptions {
    fn default() -> Self {
        Self {
            min_height: "1124px".to_string(),
            background: "#fff".to_string(),
            z_index: -1,
        }
    }
}

/// Options for one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub filename: PathBuf,
    /// Directory `filename` is resolved against; the working directory
    /// when unset.
    pub output_dir: Option<PathBuf>,
    pub render: RenderOptions,
    pub staging: StagingOptions,
    /// Per-image limit on the readiness wait. Unset waits indefinitely.
    #[serde(with = "humantime_serde")]
    pub image_timeout: Option<Duration>,
    /// Directory relative image sources are read from.
    pub base_dir: Option<PathBuf>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            filename: PathBuf::from(DEFAULT_FILENAME),
            output_dir: None,
            render: RenderOptions::default(),
            staging: StagingOptions::default(),
            image_timeout: None,
            base_dir: None,
        }
    }
}

impl ExportOptions {
    /// Options with a different output file name.
    pub fn with_filename(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }

    /// Load options from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Where the rendered file is written.
    pub fn output_path(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) if self.filename.is_relative() => dir.join(&self.filename),
            _ => self.filename.clone(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        self.base_dir.as_deref().unwrap_or(Path::new("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{AutoPaging, Orientation};

    #[test]
    fn default_values_match_expected() {
        let opts = ExportOptions::default();
        assert_eq!(opts.filename, PathBuf::from("document.pdf"));
        assert_eq!(opts.output_path(), PathBuf::from("document.pdf"));
        assert_eq!(opts.staging.min_height, "1124px");
        assert_eq!(opts.staging.background, "#fff");
        assert_eq!(opts.staging.z_index, -1);
        assert_eq!(opts.image_timeout, None);
        assert_eq!(opts.render.format, [210.0, 297.1]);
        assert_eq!(opts.render.width, 190.0);
        assert_eq!(opts.render.window_width, 794.0);
        assert_eq!(opts.base_dir(), Path::new("."));
    }

    #[test]
    fn partial_json_overrides_defaults() {
        let opts = ExportOptions::from_json(
            r#"{
                "filename": "report.pdf",
                "output_dir": "out",
                "image_timeout": "1s 500ms",
                "render": { "orientation": "landscape", "auto_paging": "off" }
            }"#,
        )
        .unwrap();
        assert_eq!(opts.output_path(), PathBuf::from("out/report.pdf"));
        assert_eq!(opts.image_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(opts.render.orientation, Orientation::Landscape);
        assert_eq!(opts.render.auto_paging, AutoPaging::Off);
        assert_eq!(opts.render.width, 190.0);
        assert_eq!(opts.staging, StagingOptions::default());
    }

    #[test]
    fn reads_files_and_reports_problems() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opts.json");
        std::fs::write(&path, r#"{"filename": "a.pdf"}"#).unwrap();
        assert_eq!(
            ExportOptions::from_json_file(&path).unwrap().filename,
            PathBuf::from("a.pdf")
        );

        assert!(matches!(
            ExportOptions::from_json_file(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ExportOptions::from_json_file(&path),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn absolute_filename_ignores_output_dir() {
        let opts = ExportOptions {
            filename: PathBuf::from("/tmp/x.pdf"),
            output_dir: Some(PathBuf::from("out")),
            ..ExportOptions::default()
        };
        assert_eq!(opts.output_path(), PathBuf::from("/tmp/x.pdf"));
    }
}
