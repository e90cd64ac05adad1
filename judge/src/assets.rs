use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{JudgeError, JudgeResult};

/// A problem at one testcase version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProblemRef {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestGroup {
    /// Input generator or file name; its stem names the cases.
    pub name: String,
    pub number: usize,
}

/// `info.yaml` of a problem.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProblemInfo {
    #[serde(default)]
    pub title: String,
    /// Seconds.
    pub time_limit: f64,
    pub tests: Vec<TestGroup>,
}

/// Files of one problem version, laid out as
///
/// ```text
/// <dir>/info.yaml
/// <dir>/checker.cpp  verifier.cpp  params.h  common/*
/// <dir>/sol/correct.cpp
/// <dir>/in/<case>.in  out/<case>.out
/// ```
#[derive(Debug, Clone)]
pub struct ProblemAssets {
    dir: PathBuf,
    time_limit: Duration,
    testcases: Vec<String>,
    include_files: Vec<PathBuf>,
}

impl ProblemAssets {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Testcase names in judging order.
    pub fn testcases(&self) -> &[String] {
        &self.testcases
    }

    pub fn checker_source(&self) -> PathBuf {
        self.dir.join("checker.cpp")
    }

    pub fn verifier_source(&self) -> PathBuf {
        self.dir.join("verifier.cpp")
    }

    pub fn model_solution_source(&self) -> PathBuf {
        self.dir.join("sol").join("correct.cpp")
    }

    /// Headers staged next to every trusted source: `params.h` and
    /// everything under `common/`.
    pub fn include_files(&self) -> &[PathBuf] {
        &self.include_files
    }

    pub fn input_path(&self, case: &str) -> PathBuf {
        self.dir.join("in").join(format!("{case}.in"))
    }

    pub fn expected_path(&self, case: &str) -> PathBuf {
        self.dir.join("out").join(format!("{case}.out"))
    }
}

/// Case names `<stem>_<nn>` for each test group, in order.
///
/// Case files and result rows are keyed by name, so two groups sharing a
/// stem (`random.in` and `random.cpp`) are rejected.
fn testcase_names(tests: &[TestGroup]) -> JudgeResult<Vec<String>> {
    let mut stems = HashSet::new();
    let mut names = Vec::new();
    for test in tests {
        let stem = Path::new(&test.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| test.name.clone());
        if !stems.insert(stem.clone()) {
            return Err(JudgeError::Assets(format!(
                "test group {} reuses case stem {stem:?}",
                test.name
            )));
        }
        names.extend((0..test.number).map(|i| format!("{stem}_{i:02}")));
    }
    Ok(names)
}

/// Source of problem assets.
#[async_trait]
pub trait AssetProvider: Send + Sync {
    async fn fetch(&self, problem: &ProblemRef) -> JudgeResult<Arc<ProblemAssets>>;
}

/// Problem versions unpacked under `<root>/<name>/<version>/`.
///
/// Versions are immutable, so parsed assets are cached for the life of
/// the process.
pub struct LocalAssetProvider {
    root: PathBuf,
    cache: Mutex<HashMap<ProblemRef, Arc<ProblemAssets>>>,
}

impl LocalAssetProvider {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, problem: &ProblemRef) -> JudgeResult<Option<Arc<ProblemAssets>>> {
        let cache = self
            .cache
            .lock()
            .map_err(|_| JudgeError::Internal("asset cache poisoned".into()))?;
        Ok(cache.get(problem).cloned())
    }

    async fn load(&self, problem: &ProblemRef) -> JudgeResult<ProblemAssets> {
        let dir = self.root.join(&problem.name).join(&problem.version);
        let info_path = dir.join("info.yaml");
        let content = tokio::fs::read_to_string(&info_path)
            .await
            .map_err(|e| JudgeError::Assets(format!("read {}: {e}", info_path.display())))?;
        let info: ProblemInfo = serde_yaml_ng::from_str(&content)
            .map_err(|e| JudgeError::Assets(format!("parse {}: {e}", info_path.display())))?;

        if !info.time_limit.is_finite() || info.time_limit <= 0.0 {
            return Err(JudgeError::Assets(format!(
                "{}: invalid time limit {}",
                problem.name, info.time_limit
            )));
        }

        let mut include_files = vec![dir.join("params.h")];
        match tokio::fs::read_dir(dir.join("common")).await {
            Ok(mut entries) => {
                let mut common = Vec::new();
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_file() {
                        common.push(entry.path());
                    }
                }
                common.sort();
                include_files.extend(common);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let assets = ProblemAssets {
            time_limit: Duration::from_secs_f64(info.time_limit),
            testcases: testcase_names(&info.tests)?,
            include_files,
            dir,
        };

        let mut required = vec![assets.checker_source()];
        for case in assets.testcases() {
            required.push(assets.input_path(case));
            required.push(assets.expected_path(case));
        }
        for path in required {
            if !tokio::fs::try_exists(&path).await? {
                return Err(JudgeError::Assets(format!("missing {}", path.display())));
            }
        }
        Ok(assets)
    }
}

#[async_trait]
impl AssetProvider for LocalAssetProvider {
    async fn fetch(&self, problem: &ProblemRef) -> JudgeResult<Arc<ProblemAssets>> {
        if let Some(assets) = self.cached(problem)? {
            return Ok(assets);
        }
        let assets = Arc::new(self.load(problem).await?);
        debug!(
            problem = %problem.name,
            version = %problem.version,
            testcases = assets.testcases().len(),
            "problem assets loaded"
        );
        self.cache
            .lock()
            .map_err(|_| JudgeError::Internal("asset cache poisoned".into()))?
            .insert(problem.clone(), Arc::clone(&assets));
        Ok(assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(path: PathBuf, content: &str) {
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(path, content).await.unwrap();
    }

    async fn problem_tree(root: &Path) -> ProblemRef {
        let dir = root.join("aplusb").join("v1");
        write(
            dir.join("info.yaml"),
            "title: A + B\ntime_limit: 2.5\ntests:\n  - {name: example.in, number: 2}\n  - {name: random.cpp, number: 1}\n",
        )
        .await;
        write(dir.join("checker.cpp"), "// checker").await;
        write(dir.join("common").join("random.h"), "// random").await;
        write(dir.join("common").join("fastio.h"), "// io").await;
        for case in ["example_00", "example_01", "random_00"] {
            write(dir.join("in").join(format!("{case}.in")), "1 2\n").await;
            write(dir.join("out").join(format!("{case}.out")), "3\n").await;
        }
        ProblemRef {
            name: "aplusb".into(),
            version: "v1".into(),
        }
    }

    #[test]
    fn case_names_use_stem_and_two_digits() {
        let names = testcase_names(&[
            TestGroup {
                name: "example.in".into(),
                number: 2,
            },
            TestGroup {
                name: "max_random.cpp".into(),
                number: 11,
            },
        ])
        .unwrap();
        assert_eq!(names.len(), 13);
        assert_eq!(names[0], "example_00");
        assert_eq!(names[1], "example_01");
        assert_eq!(names[2], "max_random_00");
        assert_eq!(names[12], "max_random_10");
    }

    #[test]
    fn groups_sharing_a_stem_are_rejected() {
        let err = testcase_names(&[
            TestGroup {
                name: "random.in".into(),
                number: 1,
            },
            TestGroup {
                name: "random.cpp".into(),
                number: 2,
            },
        ])
        .unwrap_err();
        assert!(err.to_string().contains("random.cpp"), "{err}");
    }

    #[tokio::test]
    async fn fetch_reads_layout() {
        let root = tempfile::tempdir().unwrap();
        let problem = problem_tree(root.path()).await;
        let provider = LocalAssetProvider::new(root.path().to_path_buf());

        let assets = provider.fetch(&problem).await.unwrap();
        assert_eq!(assets.time_limit(), Duration::from_millis(2500));
        assert_eq!(assets.testcases(), ["example_00", "example_01", "random_00"]);
        assert_eq!(
            assets.input_path("random_00"),
            root.path().join("aplusb/v1/in/random_00.in")
        );
        let dir = root.path().join("aplusb/v1");
        assert_eq!(
            assets.include_files(),
            [
                dir.join("params.h"),
                dir.join("common/fastio.h"),
                dir.join("common/random.h")
            ]
        );
    }

    #[tokio::test]
    async fn fetch_is_cached() {
        let root = tempfile::tempdir().unwrap();
        let problem = problem_tree(root.path()).await;
        let provider = LocalAssetProvider::new(root.path().to_path_buf());

        let first = provider.fetch(&problem).await.unwrap();
        tokio::fs::remove_file(root.path().join("aplusb/v1/info.yaml"))
            .await
            .unwrap();
        let second = provider.fetch(&problem).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn missing_expected_output_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let problem = problem_tree(root.path()).await;
        tokio::fs::remove_file(root.path().join("aplusb/v1/out/example_01.out"))
            .await
            .unwrap();
        let provider = LocalAssetProvider::new(root.path().to_path_buf());

        let err = provider.fetch(&problem).await.unwrap_err();
        assert!(err.to_string().contains("example_01.out"), "{err}");
    }

    #[tokio::test]
    async fn unknown_problem_is_an_asset_error() {
        let root = tempfile::tempdir().unwrap();
        let provider = LocalAssetProvider::new(root.path().to_path_buf());
        let problem = ProblemRef {
            name: "nope".into(),
            version: "v1".into(),
        };
        assert!(matches!(
            provider.fetch(&problem).await,
            Err(JudgeError::Assets(_))
        ));
    }
}
