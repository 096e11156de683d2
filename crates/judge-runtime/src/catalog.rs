use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, bail};
use openjudge_core::domain::{Problem, ProblemId};
use serde::Deserialize;
type Result<T> = anyhow::Result<T>;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    problems: Vec<Problem>,
}

/// 只读题库，按配置文件中的顺序保存题目。
#[derive(Debug, Clone, Default)]
pub struct ProblemCatalog {
    problems: Vec<Problem>,
    index: HashMap<ProblemId, usize>,
}

impl ProblemCatalog {
    pub fn new(problems: Vec<Problem>) -> Result<Self> {
        let mut index = HashMap::with_capacity(problems.len());
        for (position, problem) in problems.iter().enumerate() {
            problem
                .validate()
                .with_context(|| format!("invalid problem {}", problem.id))?;
            if index.insert(problem.id.clone(), position).is_some() {
                bail!("duplicate problem id {}", problem.id);
            }
        }
        Ok(Self { problems, index })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read problem catalog: {}", path.display()))?;
        Self::from_str(&content)
            .with_context(|| format!("failed to parse problem catalog: {}", path.display()))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(s).context("failed to deserialize problems")?;
        Self::new(file.problems)
    }

    pub fn get(&self, id: &ProblemId) -> Option<&Problem> {
        self.index.get(id).map(|&position| &self.problems[position])
    }

    pub fn contains(&self, id: &ProblemId) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Problem> {
        self.problems.iter()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}
