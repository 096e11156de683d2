use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Cpp,
    Java,
    #[default]
    Python,
    Go,
    JavaScript,
    TypeScript,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::Rust,
        Language::Cpp,
        Language::Java,
        Language::Python,
        Language::Go,
        Language::JavaScript,
        Language::TypeScript,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
            Language::Go => "go",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
        }
    }

    /// Compact code used by the `submission.language` column.
    pub fn code(self) -> i16 {
        match self {
            Language::Rust => 0,
            Language::Cpp => 1,
            Language::Java => 2,
            Language::Python => 3,
            Language::Go => 4,
            Language::JavaScript => 5,
            Language::TypeScript => 6,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, DomainError> {
        Self::ALL
            .into_iter()
            .find(|language| language.code() == code)
            .ok_or(DomainError::InvalidCode {
                kind: "language",
                code,
            })
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rust" => Ok(Language::Rust),
            "cpp" | "c++" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "python" | "python3" => Ok(Language::Python),
            "go" => Ok(Language::Go),
            "javascript" | "js" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            _ => Err(DomainError::UnknownLanguage(s.to_string())),
        }
    }
}
