//! Input scan formats.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Scan formats the pipeline accepts, recognised by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanFormat {
    /// Single DICOM file; converted to NIfTI before segmentation.
    Dicom,
    Nifti,
    NiftiGz,
}

impl ScanFormat {
    pub fn detect(path: &Path) -> Result<Self, PipelineError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let format = if name.ends_with(".nii.gz") {
            ScanFormat::NiftiGz
        } else if name.ends_with(".nii") {
            ScanFormat::Nifti
        } else if name.ends_with(".dcm") {
            ScanFormat::Dicom
        } else {
            return Err(PipelineError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        };

        if format.stem(path).is_empty() {
            return Err(PipelineError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        }
        Ok(format)
    }

    /// File name without the format extension: `T1.nii.gz` -> `T1`.
    pub fn stem(self, path: &Path) -> String {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext_len = match self {
            ScanFormat::Dicom | ScanFormat::Nifti => 4,
            ScanFormat::NiftiGz => 7,
        };
        name[..name.len().saturating_sub(ext_len)].to_string()
    }
}
