//! Demo script model and markdown step extraction

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::container::ContainerConfig;
use crate::error::{Error, Result};

/// One step of a demo script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStep {
    pub step_number: usize,
    pub title: String,
    pub command: String,
    pub notes: String,
}

/// Structured block at the top of a script
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptFrontmatter {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub docker: Option<ContainerConfig>,
}

/// A parsed demo script
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub title: String,
    pub steps: Vec<ScriptStep>,
    pub docker: Option<ContainerConfig>,
    /// File the script was loaded from, if any
    pub path: Option<PathBuf>,
}

impl Script {
    /// Parse script source
    pub fn parse(content: &str) -> Result<Self> {
        let (frontmatter, body) = split_frontmatter(content)?;
        let (title, steps) = parse_steps(body);

        if steps.is_empty() {
            return Err(Error::InvalidScriptFormat(
                "no steps found (expected '## Step N' headers or fenced code blocks)".to_string(),
            ));
        }

        let title = frontmatter
            .title
            .filter(|t| !t.trim().is_empty())
            .or(title)
            .unwrap_or_else(|| "Demo".to_string());

        Ok(Self {
            title,
            steps,
            docker: frontmatter.docker,
            path: None,
        })
    }

    /// Read and parse a script file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
        let mut script = Self::parse(&content)?;
        script.path = Some(path.to_path_buf());
        Ok(script)
    }

    /// Directory used to resolve relative volume paths
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.path
            .as_ref()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
    }
}

/// Split an optional `---` delimited frontmatter block off the content.
///
/// Content without a leading `---` line has empty frontmatter.
pub fn split_frontmatter(content: &str) -> Result<(ScriptFrontmatter, &str)> {
    let content = content.trim_start_matches('\u{feff}');

    let mut lines = content.split_inclusive('\n');
    match lines.next() {
        Some(first) if first.trim_end() == "---" => {}
        _ => return Ok((ScriptFrontmatter::default(), content)),
    }

    let yaml_start = content.find('\n').map(|i| i + 1).unwrap_or(content.len());
    let mut offset = yaml_start;
    for line in lines {
        if line.trim_end() == "---" {
            let yaml = &content[yaml_start..offset];
            let body = &content[offset + line.len()..];

            let frontmatter = if yaml.trim().is_empty() {
                ScriptFrontmatter::default()
            } else {
                serde_yaml::from_str(yaml)?
            };
            return Ok((frontmatter, body));
        }
        offset += line.len();
    }

    Err(Error::InvalidFrontmatter("missing closing '---'".to_string()))
}

fn step_header() -> &'static Regex {
    static STEP_HEADER: OnceLock<Regex> = OnceLock::new();
    STEP_HEADER.get_or_init(|| {
        Regex::new(r"(?i)^##\s+(?:Paso|Step)\s*(\d+)[:\s]*(.*)$").expect("valid step header regex")
    })
}

fn is_fence(line: &str) -> bool {
    line.starts_with("```") || line.starts_with("~~~")
}

fn main_title(line: &str) -> Option<&str> {
    line.strip_prefix("# ").map(str::trim)
}

/// Extract the title and steps from the markdown body
fn parse_steps(body: &str) -> (Option<String>, Vec<ScriptStep>) {
    let lines: Vec<&str> = body.lines().collect();
    let mut title: Option<String> = None;
    let mut steps: Vec<ScriptStep> = Vec::new();

    let mut current: Option<ScriptStep> = None;
    let mut notes: Vec<&str> = Vec::new();
    let mut in_code = false;
    let mut code: Vec<&str> = Vec::new();

    for line in &lines {
        if in_code {
            if is_fence(line) {
                in_code = false;
                if let Some(step) = current.as_mut() {
                    if step.command.is_empty() {
                        step.command = code.join("\n").trim().to_string();
                    }
                }
            } else {
                code.push(line);
            }
            continue;
        }

        if title.is_none() {
            if let Some(t) = main_title(line) {
                title = Some(t.to_string());
                continue;
            }
        }

        if let Some(caps) = step_header().captures(line) {
            if let Some(mut step) = current.take() {
                step.notes = notes.join("\n").trim().to_string();
                steps.push(step);
            }
            notes.clear();

            let step_number = steps.len() + 1;
            let header_title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            current = Some(ScriptStep {
                step_number,
                title: if header_title.is_empty() {
                    format!("Step {}", &caps[1])
                } else {
                    header_title.to_string()
                },
                command: String::new(),
                notes: String::new(),
            });
            continue;
        }

        if is_fence(line) {
            in_code = true;
            code.clear();
            continue;
        }

        if current.is_some() && !line.trim().is_empty() && !line.starts_with('#') {
            notes.push(line);
        }
    }

    if let Some(mut step) = current.take() {
        step.notes = notes.join("\n").trim().to_string();
        steps.push(step);
    }

    if steps.is_empty() {
        steps = parse_code_blocks(&lines);
    }

    (title, steps)
}

/// Fallback: every fenced code block is one step
fn parse_code_blocks(lines: &[&str]) -> Vec<ScriptStep> {
    let mut steps = Vec::new();
    let mut in_code = false;
    let mut code: Vec<&str> = Vec::new();
    let mut notes: Vec<&str> = Vec::new();

    for line in lines {
        if is_fence(line) {
            if in_code {
                let step_number = steps.len() + 1;
                steps.push(ScriptStep {
                    step_number,
                    title: format!("Step {}", step_number),
                    command: code.join("\n").trim().to_string(),
                    notes: notes.join("\n").trim().to_string(),
                });
                notes.clear();
            } else {
                code.clear();
            }
            in_code = !in_code;
            continue;
        }

        if in_code {
            code.push(line);
        } else if !line.trim().is_empty() && !line.starts_with('#') {
            notes.push(line);
        }
    }

    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEPPED: &str = r#"# Git basics

Intro text that belongs to no step.

## Step 1: Check status

```bash
git status
```

Shows the working tree.

## Paso 2

```
git log --oneline
```

## Step 7 - Diff

```sh
git diff
```
"#;

    #[test]
    fn test_parse_step_headers() {
        let script = Script::parse(STEPPED).unwrap();
        assert_eq!(script.title, "Git basics");
        assert_eq!(script.steps.len(), 3);

        let numbers: Vec<usize> = script.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        assert_eq!(script.steps[0].title, "Check status");
        assert_eq!(script.steps[0].command, "git status");
        assert_eq!(script.steps[0].notes, "Shows the working tree.");
        assert_eq!(script.steps[1].title, "Step 2");
        assert_eq!(script.steps[1].command, "git log --oneline");
        assert_eq!(script.steps[2].title, "- Diff");
        assert!(script.steps.iter().all(|s| !s.command.is_empty()));
        assert!(script.docker.is_none());
    }

    #[test]
    fn test_fallback_code_blocks() {
        let content = "# Quick\n\nList files\n\n```\nls -la\n```\n\nThen print\n\n```\npwd\n```\n\n```\nwhoami\n```\n";
        let script = Script::parse(content).unwrap();
        assert_eq!(script.title, "Quick");
        assert_eq!(script.steps.len(), 3);
        assert_eq!(script.steps[0].step_number, 1);
        assert_eq!(script.steps[0].notes, "List files");
        assert_eq!(script.steps[1].command, "pwd");
        assert_eq!(script.steps[2].step_number, 3);
        assert_eq!(script.steps[2].title, "Step 3");
    }

    #[test]
    fn test_no_steps_is_format_error() {
        let err = Script::parse("# Only a title\n\nSome prose.\n").unwrap_err();
        assert!(matches!(err, Error::InvalidScriptFormat(_)));
    }

    #[test]
    fn test_crlf_input() {
        let content = "# T\r\n\r\n## Step 1: One\r\n\r\n```\r\necho hi\r\n```\r\n";
        let script = Script::parse(content).unwrap();
        assert_eq!(script.steps.len(), 1);
        assert_eq!(script.steps[0].command, "echo hi");
        assert_eq!(script.steps[0].title, "One");
    }

    #[test]
    fn test_frontmatter_with_docker_block() {
        let content = r#"---
docker:
  image: python:3.12-slim
  volumes:
    - ./src:/app
  env:
    DEBUG: "1"
---
# Python demo

## Step 1: Version

```
python --version
```
"#;
        let script = Script::parse(content).unwrap();
        assert_eq!(script.title, "Python demo");
        let docker = script.docker.expect("docker config");
        assert_eq!(docker.image, "python:3.12-slim");
        assert_eq!(docker.volumes, vec!["./src:/app".to_string()]);
        assert_eq!(docker.env, vec!["DEBUG=1".to_string()]);
        assert!(docker.auto_remove);
    }

    #[test]
    fn test_frontmatter_without_docker() {
        let (frontmatter, body) = split_frontmatter("---\ntitle: Hello\n---\nbody\n").unwrap();
        assert_eq!(frontmatter.title.as_deref(), Some("Hello"));
        assert!(frontmatter.docker.is_none());
        assert_eq!(body, "body\n");
    }

    #[test]
    fn test_unterminated_frontmatter() {
        let err = split_frontmatter("---\ndocker:\n  image: alpine\n").unwrap_err();
        assert!(matches!(err, Error::InvalidFrontmatter(_)));
    }

    #[test]
    fn test_no_frontmatter_passthrough() {
        let (frontmatter, body) = split_frontmatter("# Title\n---\n").unwrap();
        assert!(frontmatter.docker.is_none());
        assert_eq!(body, "# Title\n---\n");
    }

    #[tokio::test]
    async fn test_load_sets_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.md");
        std::fs::write(&path, "## Step 1\n```\nls\n```\n").unwrap();

        let script = Script::load(&path).await.unwrap();
        assert_eq!(script.base_dir().as_deref(), Some(dir.path()));
        assert_eq!(script.title, "Demo");
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let err = Script::load(Path::new("/definitely/not/here.md")).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
