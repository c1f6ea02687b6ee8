//! Text recognition through the `tesseract` command-line binary.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use image::GrayImage;
use omrgrade::{RecognitionError, RecognitionHints, TextRecognizer};
use tempfile::NamedTempFile;

/// Runs `tesseract <crop.png> stdout` once per region.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    exe: PathBuf,
}

impl TesseractRecognizer {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    /// Check that the binary can be started.
    pub fn probe(&self) -> Result<String, RecognitionError> {
        let output = Command::new(&self.exe)
            .arg("--version")
            .output()
            .map_err(|e| {
                RecognitionError::Unavailable(format!("{}: {}", self.exe.display(), e))
            })?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().next().unwrap_or("tesseract").trim().to_string())
    }
}

fn command_args(input: &Path, hints: &RecognitionHints) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![input.into(), "stdout".into()];
    if !hints.languages.is_empty() {
        args.push("-l".into());
        args.push(hints.languages.join("+").into());
    }
    args.push("--psm".into());
    // 7: single text line, 6: uniform block.
    let psm = if hints.single_line { "7" } else { "6" };
    args.push(psm.into());
    if hints.digits_only {
        args.push("-c".into());
        args.push("tessedit_char_whitelist=0123456789".into());
    }
    args
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(
        &self,
        region: &GrayImage,
        hints: &RecognitionHints,
    ) -> Result<String, RecognitionError> {
        let input = NamedTempFile::with_suffix(".png")
            .map_err(|e| RecognitionError::Failed(format!("temp file: {}", e)))?;
        region
            .save(input.path())
            .map_err(|e| RecognitionError::Failed(format!("writing crop: {}", e)))?;

        let output = Command::new(&self.exe)
            .args(command_args(input.path(), hints))
            .output()
            .map_err(|e| {
                RecognitionError::Unavailable(format!("{}: {}", self.exe.display(), e))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognitionError::Failed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
