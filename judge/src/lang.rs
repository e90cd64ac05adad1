use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::{JudgeError, JudgeResult};

/// Image the built-in checker, verifier and generator compile and run in.
pub const DEFAULT_TOOLS_IMAGE: &str = "library-checker-images-gcc";
/// Language whose compiler builds the model solution.
pub const DEFAULT_MODEL_SOLUTION_LANG: &str = "cpp";

/// How to compile and run one language.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Language {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// File name the source is staged as.
    pub source: String,
    pub image: String,
    /// Compile argv; empty for languages run from source.
    #[serde(default)]
    pub compile: Vec<String>,
    pub exec: Vec<String>,
    /// Host files staged next to the source before compiling.
    #[serde(default)]
    pub additional_files: Vec<PathBuf>,
}

impl Language {
    fn tool(id: &str, image: &str, exec: &[&str]) -> Self {
        let source = format!("{id}.cpp");
        Self {
            id: id.to_string(),
            name: id.to_string(),
            version: String::new(),
            compile: [
                "g++",
                "-O2",
                "-std=c++17",
                "-march=native",
                "-o",
                id,
                source.as_str(),
            ]
            .map(String::from)
            .to_vec(),
            source,
            image: image.to_string(),
            exec: exec.iter().map(|s| s.to_string()).collect(),
            additional_files: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default = "default_tools_image")]
    tools_image: String,
    #[serde(default = "default_model_solution")]
    model_solution: String,
    langs: Vec<Language>,
}

fn default_tools_image() -> String {
    DEFAULT_TOOLS_IMAGE.to_string()
}

fn default_model_solution() -> String {
    DEFAULT_MODEL_SOLUTION_LANG.to_string()
}

/// Immutable set of languages plus the built-in judge tools.
///
/// Built once at startup and shared by every pipeline.
#[derive(Debug)]
pub struct LanguageRegistry {
    langs: HashMap<String, Language>,
    checker: Language,
    verifier: Language,
    generator: Language,
    model_solution: Language,
}

impl LanguageRegistry {
    /// Load a registry YAML file. Relative `additional_files` resolve
    /// against the file's directory.
    pub async fn load(path: &Path) -> JudgeResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| JudgeError::Config(format!("read {}: {e}", path.display())))?;
        let base = path.parent().unwrap_or(Path::new("."));
        let registry = Self::from_yaml(&content, base)
            .map_err(|e| JudgeError::Config(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), langs = registry.langs.len(), "language registry loaded");
        Ok(registry)
    }

    pub fn from_yaml(content: &str, base: &Path) -> JudgeResult<Self> {
        let file: RegistryFile = serde_yaml_ng::from_str(content)
            .map_err(|e| JudgeError::Config(format!("parse language registry: {e}")))?;

        let mut langs = HashMap::with_capacity(file.langs.len());
        for mut lang in file.langs {
            if lang.exec.is_empty() {
                return Err(JudgeError::Config(format!("language {} has no exec command", lang.id)));
            }
            for extra in &mut lang.additional_files {
                if extra.is_relative() {
                    *extra = base.join(&*extra);
                }
            }
            let id = lang.id.clone();
            if langs.insert(id.clone(), lang).is_some() {
                return Err(JudgeError::Config(format!("duplicate language id {id}")));
            }
        }

        let model_solution = langs.get(&file.model_solution).cloned().ok_or_else(|| {
            JudgeError::Config(format!(
                "model solution language {} is not defined",
                file.model_solution
            ))
        })?;

        let image = file.tools_image.as_str();
        Ok(Self {
            langs,
            checker: Language::tool("checker", image, &["./checker"]),
            verifier: Language::tool("verifier", image, &["./verifier"]),
            generator: Language::tool("generator", image, &["./generator", "0"]),
            model_solution,
        })
    }

    pub fn get(&self, id: &str) -> JudgeResult<&Language> {
        self.langs
            .get(id)
            .ok_or_else(|| JudgeError::UnknownLanguage(id.to_string()))
    }

    pub fn checker(&self) -> &Language {
        &self.checker
    }

    pub fn verifier(&self) -> &Language {
        &self.verifier
    }

    pub fn generator(&self) -> &Language {
        &self.generator
    }

    pub fn model_solution(&self) -> &Language {
        &self.model_solution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
langs:
  - id: cpp
    name: C++
    version: GCC 13
    source: main.cpp
    image: library-checker-images-gcc
    compile: [g++, -O2, -std=c++20, -o, main, main.cpp]
    exec: [./main]
    additional_files: [include/ac-library.hpp, /opt/abs.hpp]
  - id: python3
    name: Python
    source: main.py
    image: library-checker-images-python3
    exec: [python3, main.py]
"#;

    #[test]
    fn parses_languages_and_tools() {
        let registry = LanguageRegistry::from_yaml(YAML, Path::new("/etc/judge")).unwrap();

        let cpp = registry.get("cpp").unwrap();
        assert_eq!(cpp.source, "main.cpp");
        assert_eq!(cpp.exec, ["./main"]);
        assert_eq!(
            cpp.additional_files,
            [
                PathBuf::from("/etc/judge/include/ac-library.hpp"),
                PathBuf::from("/opt/abs.hpp")
            ]
        );

        let python = registry.get("python3").unwrap();
        assert!(python.compile.is_empty());

        assert_eq!(registry.model_solution().id, "cpp");
        assert_eq!(registry.checker().source, "checker.cpp");
        assert_eq!(
            registry.checker().compile,
            ["g++", "-O2", "-std=c++17", "-march=native", "-o", "checker", "checker.cpp"]
        );
        assert_eq!(registry.generator().exec, ["./generator", "0"]);
        assert_eq!(registry.verifier().image, DEFAULT_TOOLS_IMAGE);
    }

    #[test]
    fn unknown_language_is_an_error() {
        let registry = LanguageRegistry::from_yaml(YAML, Path::new("/")).unwrap();
        assert!(matches!(
            registry.get("cobol"),
            Err(JudgeError::UnknownLanguage(id)) if id == "cobol"
        ));
    }

    #[test]
    fn model_solution_language_must_exist() {
        let yaml = r#"
model_solution: rust
langs:
  - id: cpp
    source: main.cpp
    image: gcc
    exec: [./main]
"#;
        let err = LanguageRegistry::from_yaml(yaml, Path::new("/")).unwrap_err();
        assert!(err.to_string().contains("rust"), "{err}");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let yaml = r#"
langs:
  - {id: cpp, source: a.cpp, image: gcc, exec: [./a]}
  - {id: cpp, source: b.cpp, image: gcc, exec: [./b]}
"#;
        assert!(LanguageRegistry::from_yaml(yaml, Path::new("/")).is_err());
    }

    #[test]
    fn tools_image_is_configurable() {
        let yaml = r#"
tools_image: my-gcc
langs:
  - {id: cpp, source: main.cpp, image: gcc, exec: [./main]}
"#;
        let registry = LanguageRegistry::from_yaml(yaml, Path::new("/")).unwrap();
        assert_eq!(registry.checker().image, "my-gcc");
    }

    #[tokio::test]
    async fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("langs.yaml");
        tokio::fs::write(&path, YAML).await.unwrap();
        let registry = LanguageRegistry::load(&path).await.unwrap();
        assert_eq!(
            registry.get("cpp").unwrap().additional_files[0],
            dir.path().join("include/ac-library.hpp")
        );
    }
}
