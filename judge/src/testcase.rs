use std::path::Path;
use std::time::Duration;

use sandbox::{Input, Output, Volume};
use tracing::debug;

use crate::error::JudgeResult;
use crate::lang::Language;
use crate::toolchain::{CASEDIR, Execution, Toolchain};
use crate::verdict::{CaseResult, Verdict, checker_verdict};

/// A compiled program: its language and the volume holding the build.
#[derive(Clone, Copy)]
pub struct Program<'a> {
    pub lang: &'a Language,
    pub volume: &'a Volume,
}

/// Everything needed to run and grade one testcase.
pub struct CaseContext<'a> {
    pub toolchain: &'a Toolchain,
    pub program: Program<'a>,
    pub checker: Program<'a>,
    pub time_limit: Duration,
}

impl CaseContext<'_> {
    /// Run the program on `input` and grade its output against `expected`.
    ///
    /// Every case gets its own scratch volume, released before returning.
    pub async fn run_case(
        &self,
        name: &str,
        input: &Path,
        expected: &Path,
    ) -> JudgeResult<CaseResult> {
        let scratch = self.toolchain.new_volume().await?;
        let result = self.run_in(&scratch, name, input, expected).await;
        self.toolchain.release(scratch).await;
        result
    }

    async fn run_in(
        &self,
        scratch: &Volume,
        name: &str,
        input: &Path,
        expected: &Path,
    ) -> JudgeResult<CaseResult> {
        let host = tempfile::tempdir()?;
        let actual = host.path().join("actual.out");

        let run = self
            .toolchain
            .execute(
                self.program.lang,
                Execution {
                    program: self.program.volume,
                    args: Vec::new(),
                    stdin: Input::File(input.to_path_buf()),
                    stdout: Output::File(actual.clone()),
                    timeout: self.time_limit,
                    scratch: None,
                },
            )
            .await?;

        let mut case = CaseResult {
            name: name.to_string(),
            verdict: Verdict::Accepted,
            time: run.time,
            memory: run.memory,
            tle: run.tle,
            stderr: run.stderr,
            checker_out: Vec::new(),
        };
        if run.tle {
            case.verdict = Verdict::TimeLimitExceeded;
            return Ok(case);
        }
        if run.exit_code != 0 {
            case.verdict = Verdict::RuntimeError;
            return Ok(case);
        }

        self.toolchain.stage(scratch, input, "input.in").await?;
        self.toolchain.stage(scratch, &actual, "actual.out").await?;
        self.toolchain.stage(scratch, expected, "expect.out").await?;

        let check = self
            .toolchain
            .execute(
                self.checker.lang,
                Execution {
                    program: self.checker.volume,
                    args: ["input.in", "actual.out", "expect.out"]
                        .iter()
                        .map(|file| format!("{CASEDIR}/{file}"))
                        .collect(),
                    stdin: Input::Null,
                    stdout: Output::Discard,
                    timeout: self.toolchain.limits().tool_timeout,
                    scratch: Some(scratch),
                },
            )
            .await?;

        case.verdict = if check.tle {
            Verdict::CheckerTimeLimitExceeded
        } else {
            checker_verdict(check.exit_code)
        };
        case.checker_out = check.stderr;
        debug!(
            case = name,
            verdict = %case.verdict,
            time_ms = case.time.as_millis() as u64,
            "case graded"
        );
        Ok(case)
    }
}
