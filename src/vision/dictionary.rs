//! Character dictionary for recognition decoding
//!
//! One glyph per non-blank line. Entry `i` is the glyph for model output
//! class `i + 1`; class 0 is the blank.

use std::path::Path;
use tracing::info;

use super::error::{OcrError, StageResult};

/// Ordered list of recognizable glyphs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterDictionary {
    glyphs: Vec<String>,
}

impl CharacterDictionary {
    /// Load a dictionary file
    pub fn from_file(path: &Path) -> StageResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| OcrError::Dictionary {
            path: path.to_path_buf(),
            source,
        })?;

        let dictionary = Self::parse(&content);
        info!(
            "Loaded character dictionary with {} glyphs from {:?}",
            dictionary.len(),
            path
        );
        Ok(dictionary)
    }

    /// Parse dictionary text; lines are trimmed and blank lines skipped
    pub fn parse(content: &str) -> Self {
        Self {
            glyphs: content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Build from an explicit glyph list
    pub fn from_glyphs<I, S>(glyphs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            glyphs: glyphs.into_iter().map(Into::into).collect(),
        }
    }

    /// Glyph for a model output class; `None` for the blank class or out of range
    pub fn glyph_for_class(&self, class: usize) -> Option<&str> {
        class
            .checked_sub(1)
            .and_then(|idx| self.glyphs.get(idx))
            .map(String::as_str)
    }

    /// Number of glyphs (excluding the blank class)
    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}
